//! `PostgreSQL` repository backend.
//!
//! Queries are runtime-bound (`sqlx::query` + `bind`); the schema lives in
//! `crates/commerce/migrations/`. The order aggregate is written inside one
//! transaction, and the order number comes from a database sequence, so
//! concurrent creations can never collide on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use maplecart_core::{
    AddressKind, ItemId, ItemVariantId, Money, OrderAddressId, OrderId, OrderItemId,
    OrderItemStatus, OrderNumber, OrderPaymentId, OrderStatus, PaymentMethodId, SessionId, UserId,
};

use super::orders::{NewOrderRecord, OrderRepository};
use super::sessions::SessionRepository;
use super::RepositoryError;
use crate::models::{Order, OrderAddress, OrderItem, OrderPayment, Session};

/// `PostgreSQL`-backed session storage.
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, created_at, expires_at, logged_out_at, user_agent, ip_address";

fn session_from_row(row: &PgRow) -> Result<Session, RepositoryError> {
    Ok(Session {
        id: SessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        logged_out_at: row.try_get("logged_out_at")?,
        user_agent: row.try_get("user_agent")?,
        ip_address: row.try_get("ip_address")?,
    })
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn insert(&self, session: Session) -> Result<Session, RepositoryError> {
        sqlx::query(
            "INSERT INTO commerce.session \
             (id, user_id, created_at, expires_at, logged_out_at, user_agent, ip_address) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session.id.as_uuid())
        .bind(session.user_id.as_i32())
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.logged_out_at)
        .bind(session.user_agent.as_deref())
        .bind(session.ip_address.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict("session id already exists".to_owned());
            }
            RepositoryError::Database(e)
        })?;

        Ok(session)
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM commerce.session WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn mark_logged_out(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE commerce.session SET logged_out_at = $2 WHERE id = $1 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM commerce.session \
             WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id.as_i32())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }
}

/// `PostgreSQL`-backed order aggregate storage.
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a full aggregate: header plus items, addresses, and payment.
    async fn load_aggregate(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let header = sqlx::query(
            "SELECT id, user_id, order_number, order_date, status, subtotal, tax_total, \
                    shipping_total, grand_total, notes, created_at, updated_at \
             FROM commerce.orders WHERE id = $1",
        )
        .bind(id.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        let Some(header) = header else {
            return Ok(None);
        };

        let items = sqlx::query(
            "SELECT id, order_id, item_id, variant_id, name_en, name_fr, variant_name_en, \
                    variant_name_fr, quantity, unit_price, total_price, status, delivered_at, \
                    on_hold_reason \
             FROM commerce.order_item WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.as_i32())
        .fetch_all(&self.pool)
        .await?;

        let addresses = sqlx::query(
            "SELECT id, order_id, kind, recipient, line1, line2, city, province_code, \
                    postal_code, country_code, phone \
             FROM commerce.order_address WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.as_i32())
        .fetch_all(&self.pool)
        .await?;

        let payment = sqlx::query(
            "SELECT id, order_id, payment_method_id, amount, provider, provider_reference, \
                    paid_at \
             FROM commerce.order_payment WHERE order_id = $1",
        )
        .bind(id.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(Order {
            id: OrderId::new(header.try_get("id")?),
            user_id: UserId::new(header.try_get("user_id")?),
            order_number: OrderNumber::new(header.try_get("order_number")?),
            order_date: header.try_get("order_date")?,
            status: parse_order_status(&header.try_get::<String, _>("status")?)?,
            subtotal: Money::new(header.try_get::<Decimal, _>("subtotal")?),
            tax_total: Money::new(header.try_get::<Decimal, _>("tax_total")?),
            shipping_total: Money::new(header.try_get::<Decimal, _>("shipping_total")?),
            grand_total: Money::new(header.try_get::<Decimal, _>("grand_total")?),
            notes: header.try_get("notes")?,
            created_at: header.try_get("created_at")?,
            updated_at: header.try_get("updated_at")?,
            items: items.iter().map(item_from_row).collect::<Result<_, _>>()?,
            addresses: addresses
                .iter()
                .map(address_from_row)
                .collect::<Result<_, _>>()?,
            payment: payment.as_ref().map(payment_from_row).transpose()?,
        }))
    }
}

fn parse_order_status(raw: &str) -> Result<OrderStatus, RepositoryError> {
    raw.parse()
        .map_err(|e: String| RepositoryError::DataCorruption(e))
}

fn parse_item_status(raw: &str) -> Result<OrderItemStatus, RepositoryError> {
    raw.parse()
        .map_err(|e: String| RepositoryError::DataCorruption(e))
}

fn parse_address_kind(raw: &str) -> Result<AddressKind, RepositoryError> {
    raw.parse()
        .map_err(|e: String| RepositoryError::DataCorruption(e))
}

fn parse_quantity(raw: i32) -> Result<u32, RepositoryError> {
    u32::try_from(raw)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative quantity: {raw}")))
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, RepositoryError> {
    Ok(OrderItem {
        id: OrderItemId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        item_id: ItemId::new(row.try_get("item_id")?),
        variant_id: ItemVariantId::new(row.try_get("variant_id")?),
        name_en: row.try_get("name_en")?,
        name_fr: row.try_get("name_fr")?,
        variant_name_en: row.try_get("variant_name_en")?,
        variant_name_fr: row.try_get("variant_name_fr")?,
        quantity: parse_quantity(row.try_get("quantity")?)?,
        unit_price: Money::new(row.try_get::<Decimal, _>("unit_price")?),
        total_price: Money::new(row.try_get::<Decimal, _>("total_price")?),
        status: parse_item_status(&row.try_get::<String, _>("status")?)?,
        delivered_at: row.try_get("delivered_at")?,
        on_hold_reason: row.try_get("on_hold_reason")?,
    })
}

fn address_from_row(row: &PgRow) -> Result<OrderAddress, RepositoryError> {
    Ok(OrderAddress {
        id: OrderAddressId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        kind: parse_address_kind(&row.try_get::<String, _>("kind")?)?,
        recipient: row.try_get("recipient")?,
        line1: row.try_get("line1")?,
        line2: row.try_get("line2")?,
        city: row.try_get("city")?,
        province_code: row.try_get("province_code")?,
        postal_code: row.try_get("postal_code")?,
        country_code: row.try_get("country_code")?,
        phone: row.try_get("phone")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<OrderPayment, RepositoryError> {
    let payment_method_id: Option<i32> = row.try_get("payment_method_id")?;
    Ok(OrderPayment {
        id: OrderPaymentId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        payment_method_id: payment_method_id.map(PaymentMethodId::new),
        amount: Money::new(row.try_get::<Decimal, _>("amount")?),
        provider: row.try_get("provider")?,
        provider_reference: row.try_get("provider_reference")?,
        paid_at: row.try_get("paid_at")?,
    })
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, record: NewOrderRecord) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // order_number comes from commerce.order_number_seq via the column
        // default; the sequence serializes allocation across transactions.
        let order_id: i32 = sqlx::query_scalar(
            "INSERT INTO commerce.orders \
             (user_id, status, subtotal, tax_total, shipping_total, grand_total, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(record.user_id.as_i32())
        .bind(record.status.as_str())
        .bind(record.subtotal.amount())
        .bind(record.tax_total.amount())
        .bind(record.shipping_total.amount())
        .bind(record.grand_total.amount())
        .bind(record.notes.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        for item in &record.items {
            let quantity = i32::try_from(item.quantity).map_err(|_| {
                RepositoryError::DataCorruption(format!("quantity too large: {}", item.quantity))
            })?;
            sqlx::query(
                "INSERT INTO commerce.order_item \
                 (order_id, item_id, variant_id, name_en, name_fr, variant_name_en, \
                  variant_name_fr, quantity, unit_price, total_price, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(order_id)
            .bind(item.item_id.as_i32())
            .bind(item.variant_id.as_i32())
            .bind(&item.name_en)
            .bind(&item.name_fr)
            .bind(&item.variant_name_en)
            .bind(&item.variant_name_fr)
            .bind(quantity)
            .bind(item.unit_price.amount())
            .bind(item.total_price.amount())
            .bind(OrderItemStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for address in &record.addresses {
            sqlx::query(
                "INSERT INTO commerce.order_address \
                 (order_id, kind, recipient, line1, line2, city, province_code, postal_code, \
                  country_code, phone) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(order_id)
            .bind(address.kind.as_str())
            .bind(&address.recipient)
            .bind(&address.line1)
            .bind(address.line2.as_deref())
            .bind(&address.city)
            .bind(address.province_code.as_deref())
            .bind(&address.postal_code)
            .bind(&address.country_code)
            .bind(address.phone.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(payment) = &record.payment {
            sqlx::query(
                "INSERT INTO commerce.order_payment \
                 (order_id, payment_method_id, amount, provider) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order_id)
            .bind(payment.payment_method_id.map(|id| id.as_i32()))
            .bind(payment.amount.amount())
            .bind(&payment.provider)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.load_aggregate(OrderId::new(order_id))
            .await?
            .ok_or_else(|| {
                RepositoryError::DataCorruption("order vanished after insert".to_owned())
            })
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.load_aggregate(id).await
    }

    async fn get_by_number(
        &self,
        number: OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let id: Option<i32> =
            sqlx::query_scalar("SELECT id FROM commerce.orders WHERE order_number = $1")
                .bind(number.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        match id {
            Some(id) => self.load_aggregate(OrderId::new(id)).await,
            None => Ok(None),
        }
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            "SELECT id FROM commerce.orders WHERE user_id = $1 ORDER BY order_number DESC",
        )
        .bind(user_id.as_i32())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = self.load_aggregate(OrderId::new(id)).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn find_by_user_and_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, RepositoryError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            "SELECT id FROM commerce.orders \
             WHERE user_id = $1 AND status = $2 ORDER BY order_number DESC",
        )
        .bind(user_id.as_i32())
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = self.load_aggregate(OrderId::new(id)).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let result = sqlx::query(
            "UPDATE commerce.orders SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id.as_i32())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.load_aggregate(id).await
    }

    async fn update_item(
        &self,
        order_id: OrderId,
        item: OrderItem,
        expected_status: OrderItemStatus,
    ) -> Result<Order, RepositoryError> {
        // Compare-and-swap on the stored status: a concurrent writer that got
        // there first makes this a zero-row update.
        let result = sqlx::query(
            "UPDATE commerce.order_item \
             SET status = $4, delivered_at = $5, on_hold_reason = $6 \
             WHERE id = $1 AND order_id = $2 AND status = $3",
        )
        .bind(item.id.as_i32())
        .bind(order_id.as_i32())
        .bind(expected_status.as_str())
        .bind(item.status.as_str())
        .bind(item.delivered_at)
        .bind(item.on_hold_reason.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM commerce.order_item WHERE id = $1 AND order_id = $2)",
            )
            .bind(item.id.as_i32())
            .bind(order_id.as_i32())
            .fetch_one(&self.pool)
            .await?;

            return Err(if exists {
                RepositoryError::Conflict(format!(
                    "item status changed concurrently: expected {expected_status}"
                ))
            } else {
                RepositoryError::NotFound
            });
        }

        sqlx::query("UPDATE commerce.orders SET updated_at = now() WHERE id = $1")
            .bind(order_id.as_i32())
            .execute(&self.pool)
            .await?;

        self.load_aggregate(order_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        provider_reference: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE commerce.order_payment \
             SET paid_at = $2, provider_reference = $3 \
             WHERE order_id = $1 AND paid_at IS NULL",
        )
        .bind(order_id.as_i32())
        .bind(paid_at)
        .bind(provider_reference.as_deref())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM commerce.order_payment WHERE order_id = $1)",
            )
            .bind(order_id.as_i32())
            .fetch_one(&mut *tx)
            .await?;

            return Err(if exists {
                RepositoryError::Conflict("payment already recorded".to_owned())
            } else {
                RepositoryError::NotFound
            });
        }

        sqlx::query("UPDATE commerce.orders SET status = $2, updated_at = now() WHERE id = $1")
            .bind(order_id.as_i32())
            .bind(OrderStatus::Paid.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.load_aggregate(order_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }
}
