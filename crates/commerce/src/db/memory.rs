//! In-memory repository backend.
//!
//! Backs all tests and is usable for single-process deployments. State lives
//! in `RwLock`-protected maps; ID and order-number allocation happen under
//! the same write lock as the insert, which is what makes number assignment
//! atomic here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use maplecart_core::{
    OrderAddressId, OrderId, OrderItemId, OrderItemStatus, OrderNumber, OrderPaymentId,
    OrderStatus, SessionId, UserId,
};

use super::orders::{NewOrderRecord, OrderRepository};
use super::sessions::SessionRepository;
use super::RepositoryError;
use crate::models::{Order, OrderAddress, OrderItem, OrderPayment, Session};

/// In-memory session storage.
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl MemorySessionRepository {
    /// Create an empty session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert(&self, session: Session) -> Result<Session, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict("session id already exists".to_owned()));
        }
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn mark_logged_out(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) => {
                session.logged_out_at = Some(at);
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }
}

/// Mutable state behind the order repository lock.
#[derive(Debug, Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    ids_by_number: HashMap<OrderNumber, OrderId>,
    next_order_id: i32,
    next_child_id: i32,
    next_order_number: i64,
}

impl OrderState {
    fn next_order_id(&mut self) -> OrderId {
        self.next_order_id += 1;
        OrderId::new(self.next_order_id)
    }

    fn next_child_id(&mut self) -> i32 {
        self.next_child_id += 1;
        self.next_child_id
    }

    fn next_order_number(&mut self) -> OrderNumber {
        self.next_order_number += 1;
        OrderNumber::new(self.next_order_number)
    }
}

/// In-memory order aggregate storage.
#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    state: Arc<RwLock<OrderState>>,
}

impl MemoryOrderRepository {
    /// Create an empty order store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, record: NewOrderRecord) -> Result<Order, RepositoryError> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        // Number allocation and insert share the write lock, so concurrent
        // inserts serialize and numbers stay unique and monotonic.
        let order_id = state.next_order_id();
        let order_number = state.next_order_number();

        let items = record
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: OrderItemId::new(state.next_child_id()),
                order_id,
                item_id: item.item_id,
                variant_id: item.variant_id,
                name_en: item.name_en,
                name_fr: item.name_fr,
                variant_name_en: item.variant_name_en,
                variant_name_fr: item.variant_name_fr,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
                status: OrderItemStatus::Pending,
                delivered_at: None,
                on_hold_reason: None,
            })
            .collect();

        let addresses = record
            .addresses
            .into_iter()
            .map(|address| OrderAddress {
                id: OrderAddressId::new(state.next_child_id()),
                order_id,
                kind: address.kind,
                recipient: address.recipient,
                line1: address.line1,
                line2: address.line2,
                city: address.city,
                province_code: address.province_code,
                postal_code: address.postal_code,
                country_code: address.country_code,
                phone: address.phone,
            })
            .collect();

        let payment = record.payment.map(|payment| OrderPayment {
            id: OrderPaymentId::new(state.next_child_id()),
            order_id,
            payment_method_id: payment.payment_method_id,
            amount: payment.amount,
            provider: payment.provider,
            provider_reference: None,
            paid_at: None,
        });

        let order = Order {
            id: order_id,
            user_id: record.user_id,
            order_number,
            order_date: now,
            status: record.status,
            subtotal: record.subtotal,
            tax_total: record.tax_total,
            shipping_total: record.shipping_total,
            grand_total: record.grand_total,
            notes: record.notes,
            created_at: now,
            updated_at: now,
            items,
            addresses,
            payment,
        };

        state.ids_by_number.insert(order_number, order_id);
        state.orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn get_by_number(
        &self,
        number: OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .ids_by_number
            .get(&number)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.read().await;
        let mut found: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.order_number.cmp(&a.order_number));
        Ok(found)
    }

    async fn find_by_user_and_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.read().await;
        let mut found: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.order_number.cmp(&a.order_number));
        Ok(found)
    }

    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&id) {
            Some(order) => {
                order.status = status;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_item(
        &self,
        order_id: OrderId,
        item: OrderItem,
        expected_status: OrderItemStatus,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound)?;

        let stored = order
            .items
            .iter_mut()
            .find(|i| i.id == item.id)
            .ok_or(RepositoryError::NotFound)?;

        // Compare-and-swap: the caller decided the transition from a read of
        // `expected_status`; if another writer got there first, reject.
        if stored.status != expected_status {
            return Err(RepositoryError::Conflict(format!(
                "item status changed concurrently: expected {}, found {}",
                expected_status, stored.status
            )));
        }

        *stored = item;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        provider_reference: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound)?;

        let payment = order.payment.as_mut().ok_or(RepositoryError::NotFound)?;
        if payment.paid_at.is_some() {
            return Err(RepositoryError::Conflict(
                "payment already recorded".to_owned(),
            ));
        }

        payment.paid_at = Some(paid_at);
        payment.provider_reference = provider_reference;
        order.status = OrderStatus::Paid;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::orders::{NewOrderItemRecord, NewOrderPaymentRecord};
    use maplecart_core::{ItemId, ItemVariantId, Money, PaymentMethodId};
    use rust_decimal_macros::dec;

    fn new_record(user_id: UserId) -> NewOrderRecord {
        NewOrderRecord {
            user_id,
            status: OrderStatus::AwaitingPayment,
            subtotal: Money::new(dec!(20.00)),
            tax_total: Money::new(dec!(2.60)),
            shipping_total: Money::new(dec!(5.00)),
            grand_total: Money::new(dec!(27.60)),
            notes: None,
            items: vec![NewOrderItemRecord {
                item_id: ItemId::new(1),
                variant_id: ItemVariantId::new(1),
                name_en: "Toque".to_owned(),
                name_fr: "Tuque".to_owned(),
                variant_name_en: "Red".to_owned(),
                variant_name_fr: "Rouge".to_owned(),
                quantity: 2,
                unit_price: Money::new(dec!(10.00)),
                total_price: Money::new(dec!(20.00)),
            }],
            addresses: vec![],
            payment: Some(NewOrderPaymentRecord {
                payment_method_id: Some(PaymentMethodId::new(1)),
                amount: Money::new(dec!(27.60)),
                provider: "stripe".to_owned(),
            }),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_number() {
        let repo = MemoryOrderRepository::new();
        let user = UserId::new(1);

        let first = repo.insert(new_record(user)).await.unwrap();
        let second = repo.insert(new_record(user)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(first.order_number < second.order_number);
        assert_eq!(first.items.len(), 1);
        assert!(first.items.iter().all(|i| i.status == OrderItemStatus::Pending));
        assert!(first.payment.as_ref().unwrap().paid_at.is_none());
    }

    #[tokio::test]
    async fn test_get_by_number() {
        let repo = MemoryOrderRepository::new();
        let order = repo.insert(new_record(UserId::new(1))).await.unwrap();

        let found = repo.get_by_number(order.order_number).await.unwrap().unwrap();
        assert_eq!(found.id, order.id);

        let missing = repo.get_by_number(OrderNumber::new(999)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_distinct_sequential_numbers() {
        let repo = Arc::new(MemoryOrderRepository::new());
        let user = UserId::new(1);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.insert(new_record(user)).await })
            })
            .collect();

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap().order_number.as_i64());
        }
        numbers.sort_unstable();

        let expected: Vec<i64> = (1..=16).collect();
        assert_eq!(numbers, expected);
    }

    #[tokio::test]
    async fn test_update_item_cas_rejects_stale_status() {
        let repo = MemoryOrderRepository::new();
        let order = repo.insert(new_record(UserId::new(1))).await.unwrap();
        let mut item = order.items.first().unwrap().clone();
        item.status = OrderItemStatus::Processing;

        // First writer wins.
        repo.update_item(order.id, item.clone(), OrderItemStatus::Pending)
            .await
            .unwrap();

        // Second writer still believes the item is Pending.
        let mut stale = order.items.first().unwrap().clone();
        stale.status = OrderItemStatus::Cancelled;
        let err = repo
            .update_item(order.id, stale, OrderItemStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_record_payment_only_once() {
        let repo = MemoryOrderRepository::new();
        let order = repo.insert(new_record(UserId::new(1))).await.unwrap();
        let now = Utc::now();

        let paid = repo
            .record_payment(order.id, Some("ch_123".to_owned()), now)
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment.as_ref().unwrap().paid_at, Some(now));

        let err = repo
            .record_payment(order.id, Some("ch_456".to_owned()), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_by_user_scopes_and_sorts() {
        let repo = MemoryOrderRepository::new();
        let alice = UserId::new(1);
        let bob = UserId::new(2);
        repo.insert(new_record(alice)).await.unwrap();
        repo.insert(new_record(bob)).await.unwrap();
        let latest = repo.insert(new_record(alice)).await.unwrap();

        let orders = repo.find_by_user(alice).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders.first().unwrap().id, latest.id);
        assert!(orders.iter().all(|o| o.user_id == alice));
    }

    #[tokio::test]
    async fn test_session_logout_stamp() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let session = Session {
            id: SessionId::generate(),
            user_id: UserId::new(1),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            logged_out_at: None,
            user_agent: None,
            ip_address: None,
        };
        repo.insert(session.clone()).await.unwrap();

        let updated = repo
            .mark_logged_out(session.id, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.logged_out_at, Some(now));

        let missing = repo.mark_logged_out(SessionId::generate(), now).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_session_duplicate_insert_conflicts() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let session = Session {
            id: SessionId::generate(),
            user_id: UserId::new(1),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            logged_out_at: None,
            user_agent: None,
            ip_address: None,
        };
        repo.insert(session.clone()).await.unwrap();
        let err = repo.insert(session).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }
}
