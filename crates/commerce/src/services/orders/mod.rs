//! Order aggregate service.
//!
//! Single writer for orders and their children. Creation snapshots catalog
//! prices and names, computes the monetary totals, and persists the whole
//! aggregate atomically; item status changes go through the per-item state
//! machine with a compare-and-swap write so concurrent updates serialize.

mod error;

pub use error::OrderError;

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use maplecart_core::{
    AddressKind, ItemId, ItemVariantId, Money, OrderId, OrderItemId, OrderItemStatus, OrderNumber,
    OrderStatus, PaymentMethodId, UserId,
};

use crate::collaborators::{
    CatalogLookup, CollaboratorError, ShippingQuoter, ShippingQuoteRequest, TaxLookup,
};
use crate::db::{
    NewOrderAddressRecord, NewOrderItemRecord, NewOrderPaymentRecord, NewOrderRecord,
    OrderRepository, RepositoryError,
};
use crate::models::{Order, OrderItem};

/// One requested order line.
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    /// Catalog item to order.
    pub item_id: ItemId,
    /// Variant of the item.
    pub variant_id: ItemVariantId,
    /// Requested quantity.
    pub quantity: u32,
}

/// One requested address snapshot.
#[derive(Debug, Clone)]
pub struct NewOrderAddress {
    /// Which slot this address fills.
    pub kind: AddressKind,
    /// Recipient full name.
    pub recipient: String,
    /// Street address, first line.
    pub line1: String,
    /// Street address, second line.
    pub line2: Option<String>,
    /// City.
    pub city: String,
    /// Province or state code.
    pub province_code: Option<String>,
    /// Postal or ZIP code.
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    /// Contact phone number.
    pub phone: Option<String>,
}

/// Input for [`OrderService::create_order`].
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    /// Requested lines; at least one.
    pub lines: Vec<NewOrderLine>,
    /// Address snapshots; a shipping address is required, a billing address
    /// is optional, one per kind.
    pub addresses: Vec<NewOrderAddress>,
    /// Payment method chosen at checkout, if any.
    pub payment_method_id: Option<PaymentMethodId>,
    /// Provider that will settle the charge; required with a payment method.
    pub payment_provider: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
}

/// Per-item outcome of a bulk status update.
#[derive(Debug)]
pub struct ItemStatusResult {
    /// The item this outcome is for.
    pub item_id: OrderItemId,
    /// The status the item ended in, or why it was left unchanged.
    pub outcome: Result<OrderItemStatus, OrderError>,
}

/// Order lifecycle service.
pub struct OrderService {
    repo: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogLookup>,
    tax: Arc<dyn TaxLookup>,
    shipping: Arc<dyn ShippingQuoter>,
}

impl OrderService {
    /// Create an order service over a repository and the catalog, tax, and
    /// shipping collaborators.
    #[must_use]
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogLookup>,
        tax: Arc<dyn TaxLookup>,
        shipping: Arc<dyn ShippingQuoter>,
    ) -> Self {
        Self {
            repo,
            catalog,
            tax,
            shipping,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create an order with its line items, address snapshots, and payment
    /// record, atomically.
    ///
    /// Prices and names are snapshotted from the catalog at this instant and
    /// are immutable on the order afterwards. Totals always reconcile:
    /// `grand_total = subtotal + tax_total + shipping_total`. A missing tax
    /// rate for the destination means zero tax, not an error.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Validation` naming the offending line or address
    /// for bad input, unknown variants, or insufficient stock;
    /// `OrderError::Dependency` when a collaborator or persistence fails.
    #[instrument(skip(self, request), fields(user = %user_id, lines = request.lines.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        request: CreateOrderRequest,
    ) -> Result<Order, OrderError> {
        validate_request(&request)?;

        let mut items = Vec::with_capacity(request.lines.len());
        let mut subtotal = Money::ZERO;
        let mut total_quantity: u32 = 0;

        for (index, line) in request.lines.iter().enumerate() {
            let snapshot = self
                .catalog
                .get_item_variant(line.item_id, line.variant_id)
                .await
                .map_err(|e| dependency("catalog lookup", &e))?
                .ok_or_else(|| {
                    OrderError::Validation(format!("line {index}: unknown item or variant"))
                })?;

            if line.quantity > snapshot.stock {
                return Err(OrderError::Validation(format!(
                    "line {index}: quantity {} exceeds available stock {}",
                    line.quantity, snapshot.stock
                )));
            }

            let total_price = snapshot.unit_price.times(line.quantity);
            subtotal += total_price;
            total_quantity += line.quantity;

            items.push(NewOrderItemRecord {
                item_id: line.item_id,
                variant_id: line.variant_id,
                name_en: snapshot.name_en,
                name_fr: snapshot.name_fr,
                variant_name_en: snapshot.variant_name_en,
                variant_name_fr: snapshot.variant_name_fr,
                quantity: line.quantity,
                unit_price: snapshot.unit_price,
                total_price,
            });
        }

        // Tax is resolved for the shipping destination; no configured rate
        // means zero tax.
        let shipping_address = request
            .addresses
            .iter()
            .find(|a| a.kind == AddressKind::Shipping)
            .ok_or_else(|| OrderError::Validation("a shipping address is required".to_owned()))?;

        let tax_rate = self
            .tax
            .applicable_rate(
                &shipping_address.country_code,
                shipping_address.province_code.as_deref(),
            )
            .await
            .map_err(|e| dependency("tax lookup", &e))?;
        let tax_total = tax_rate.map_or(Money::ZERO, |rate| subtotal.apply_rate(rate));

        let shipping_total = self
            .shipping
            .quote(&ShippingQuoteRequest {
                country_code: shipping_address.country_code.clone(),
                province_code: shipping_address.province_code.clone(),
                postal_code: shipping_address.postal_code.clone(),
                total_quantity,
                subtotal,
            })
            .await
            .map_err(|e| dependency("shipping quote", &e))?
            .round_to_cents();

        let grand_total = subtotal + tax_total + shipping_total;

        let payment = request.payment_method_id.map(|method| NewOrderPaymentRecord {
            payment_method_id: Some(method),
            amount: grand_total,
            // Presence validated together with the method in validate_request.
            provider: request.payment_provider.clone().unwrap_or_default(),
        });

        let record = NewOrderRecord {
            user_id,
            status: OrderStatus::AwaitingPayment,
            subtotal,
            tax_total,
            shipping_total,
            grand_total,
            notes: request.notes,
            items,
            addresses: request
                .addresses
                .into_iter()
                .map(|a| NewOrderAddressRecord {
                    kind: a.kind,
                    recipient: a.recipient,
                    line1: a.line1,
                    line2: a.line2,
                    city: a.city,
                    province_code: a.province_code,
                    postal_code: a.postal_code,
                    country_code: a.country_code,
                    phone: a.phone,
                })
                .collect(),
            payment,
        };

        let order = self
            .repo
            .insert(record)
            .await
            .map_err(|e| repo_dependency("order insert", &e))?;

        info!(
            order = %order.id,
            order_number = %order.order_number,
            grand_total = %order.grand_total,
            "Created order"
        );
        Ok(order)
    }

    // =========================================================================
    // Status updates
    // =========================================================================

    /// Replace the order-level status.
    ///
    /// Order-level status is a separate vocabulary from item status; changing
    /// it cascades nowhere. A cancelled order accepts no further changes.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Forbidden` if the caller does not own the order,
    /// `OrderError::OrderCancelled` if the order is already cancelled.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn update_order_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<Order, OrderError> {
        let order = self.fetch_owned_for_write(user_id, order_id).await?;
        if order.status.is_terminal() {
            return Err(OrderError::OrderCancelled);
        }

        self.repo
            .update_status(order_id, new_status)
            .await
            .map_err(|e| repo_dependency("order status update", &e))?
            .ok_or(OrderError::NotFound)
    }

    /// Transition one line item's status, returning the refreshed order.
    ///
    /// The transition is validated against the allowed table and persisted
    /// with a compare-and-swap on the status the caller read, so two
    /// concurrent conflicting transitions cannot both win.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Transition` for a disallowed transition or
    /// missing hold reason, `OrderError::StaleItem` when a concurrent writer
    /// got there first.
    #[instrument(skip(self, on_hold_reason), fields(user = %user_id))]
    pub async fn update_order_item_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        item_id: OrderItemId,
        new_status: OrderItemStatus,
        on_hold_reason: Option<&str>,
    ) -> Result<Order, OrderError> {
        let order = self.fetch_owned_for_write(user_id, order_id).await?;
        self.transition_item(&order, item_id, new_status, on_hold_reason)
            .await
    }

    /// Apply one status transition to several items independently.
    ///
    /// Partial success is the normal shape of the result: each item gets its
    /// own outcome and a failure on one never blocks the others.
    ///
    /// # Errors
    ///
    /// Only fails as a whole on the ownership check; per-item failures are
    /// carried in the returned results.
    #[instrument(skip(self, item_ids, on_hold_reason), fields(user = %user_id, count = item_ids.len()))]
    pub async fn update_order_items_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        item_ids: &[OrderItemId],
        new_status: OrderItemStatus,
        on_hold_reason: Option<&str>,
    ) -> Result<Vec<ItemStatusResult>, OrderError> {
        let order = self.fetch_owned_for_write(user_id, order_id).await?;

        let mut results = Vec::with_capacity(item_ids.len());
        for &item_id in item_ids {
            let outcome = self
                .transition_item(&order, item_id, new_status, on_hold_reason)
                .await
                .map(|_| new_status);
            results.push(ItemStatusResult { item_id, outcome });
        }
        Ok(results)
    }

    /// Logically cancel an order.
    ///
    /// There is no hard delete: the order and its children stay on record
    /// with the order-level status set to `Cancelled`. Cancelling an already
    /// cancelled order is a no-op. Item statuses are left alone - the two
    /// status dimensions do not cascade.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Forbidden` if the caller does not own the order.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, OrderError> {
        let order = self.fetch_owned_for_write(user_id, order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }

        let cancelled = self
            .repo
            .update_status(order_id, OrderStatus::Cancelled)
            .await
            .map_err(|e| repo_dependency("order cancellation", &e))?
            .ok_or(OrderError::NotFound)?;

        info!(order = %order_id, "Cancelled order");
        Ok(cancelled)
    }

    /// Record settlement of the order's payment.
    ///
    /// Stamps `paid_at` exactly once and moves the order to `Paid`. The
    /// payment amount must still equal the order's grand total.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NoPayment` when the order was placed without a
    /// payment method, `OrderError::AlreadyPaid` on a repeat call,
    /// `OrderError::PaymentAmountMismatch` if the stored amount disagrees
    /// with the grand total.
    #[instrument(skip(self), fields(user = %user_id))]
    pub async fn record_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        provider_reference: Option<String>,
    ) -> Result<Order, OrderError> {
        let order = self.fetch_owned_for_write(user_id, order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(OrderError::OrderCancelled);
        }

        let payment = order.payment.as_ref().ok_or(OrderError::NoPayment)?;
        if payment.paid_at.is_some() {
            return Err(OrderError::AlreadyPaid);
        }
        if payment.amount != order.grand_total {
            return Err(OrderError::PaymentAmountMismatch);
        }

        let paid = self
            .repo
            .record_payment(order_id, provider_reference, Utc::now())
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => OrderError::AlreadyPaid,
                RepositoryError::NotFound => OrderError::NoPayment,
                other => repo_dependency("payment record", &other),
            })?;

        info!(order = %order_id, "Recorded payment");
        Ok(paid)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch an order the user owns.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` both when the order does not exist and
    /// when it belongs to someone else; reads never confirm another user's
    /// order exists.
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, OrderError> {
        let order = self
            .repo
            .get(order_id)
            .await
            .map_err(|e| repo_dependency("order fetch", &e))?;

        match order {
            Some(order) if order.user_id == user_id => Ok(order),
            _ => Err(OrderError::NotFound),
        }
    }

    /// Fetch an order the user owns, by order number.
    ///
    /// # Errors
    ///
    /// Same scoping as [`OrderService::get_order`].
    pub async fn get_order_by_number(
        &self,
        user_id: UserId,
        number: OrderNumber,
    ) -> Result<Order, OrderError> {
        let order = self
            .repo
            .get_by_number(number)
            .await
            .map_err(|e| repo_dependency("order fetch", &e))?;

        match order {
            Some(order) if order.user_id == user_id => Ok(order),
            _ => Err(OrderError::NotFound),
        }
    }

    /// All of the user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Dependency` if the query fails.
    pub async fn user_orders(&self, user_id: UserId) -> Result<Vec<Order>, OrderError> {
        self.repo
            .find_by_user(user_id)
            .await
            .map_err(|e| repo_dependency("order list", &e))
    }

    /// The user's orders with the given order-level status, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Dependency` if the query fails.
    pub async fn user_orders_by_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, OrderError> {
        self.repo
            .find_by_user_and_status(user_id, status)
            .await
            .map_err(|e| repo_dependency("order list", &e))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Fetch for mutation: missing order reads as `NotFound`, an order owned
    /// by someone else fails closed with `Forbidden`.
    async fn fetch_owned_for_write(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order, OrderError> {
        let order = self
            .repo
            .get(order_id)
            .await
            .map_err(|e| repo_dependency("order fetch", &e))?
            .ok_or(OrderError::NotFound)?;

        if order.user_id != user_id {
            return Err(OrderError::Forbidden);
        }
        Ok(order)
    }

    /// Validate and persist one item transition against a fetched aggregate.
    async fn transition_item(
        &self,
        order: &Order,
        item_id: OrderItemId,
        new_status: OrderItemStatus,
        on_hold_reason: Option<&str>,
    ) -> Result<Order, OrderError> {
        let mut item: OrderItem = order.item(item_id).cloned().ok_or(OrderError::NotFound)?;
        let expected = item.status;
        item.transition_to(new_status, on_hold_reason, Utc::now())?;

        match self.repo.update_item(order.id, item, expected).await {
            Ok(updated) => Ok(updated),
            Err(RepositoryError::Conflict(_)) => Err(OrderError::StaleItem),
            Err(RepositoryError::NotFound) => Err(OrderError::NotFound),
            Err(e) => Err(repo_dependency("order item update", &e)),
        }
    }
}

/// Shape checks that need no collaborator: line quantities, duplicate lines,
/// address slots, payment provider presence.
fn validate_request(request: &CreateOrderRequest) -> Result<(), OrderError> {
    if request.lines.is_empty() {
        return Err(OrderError::Validation("order has no lines".to_owned()));
    }

    for (index, line) in request.lines.iter().enumerate() {
        if line.quantity == 0 {
            return Err(OrderError::Validation(format!(
                "line {index}: quantity must be positive"
            )));
        }

        let duplicate = request
            .lines
            .iter()
            .take(index)
            .any(|other| other.item_id == line.item_id && other.variant_id == line.variant_id);
        if duplicate {
            return Err(OrderError::Validation(format!(
                "line {index}: duplicate of an earlier line"
            )));
        }
    }

    for (index, address) in request.addresses.iter().enumerate() {
        let duplicate = request
            .addresses
            .iter()
            .take(index)
            .any(|other| other.kind == address.kind);
        if duplicate {
            return Err(OrderError::Validation(format!(
                "address {index}: more than one {} address",
                address.kind
            )));
        }
    }

    if !request
        .addresses
        .iter()
        .any(|a| a.kind == AddressKind::Shipping)
    {
        return Err(OrderError::Validation(
            "a shipping address is required".to_owned(),
        ));
    }

    if request.payment_method_id.is_some()
        && request
            .payment_provider
            .as_deref()
            .is_none_or(|p| p.trim().is_empty())
    {
        return Err(OrderError::Validation(
            "a payment provider is required with a payment method".to_owned(),
        ));
    }

    Ok(())
}

/// Log a collaborator failure and collapse it to the generic dependency error.
fn dependency(what: &str, err: &CollaboratorError) -> OrderError {
    error!(error = %err, "{what} call failed");
    OrderError::Dependency
}

/// Log a repository failure and collapse it to the generic dependency error.
fn repo_dependency(what: &str, err: &RepositoryError) -> OrderError {
    error!(error = %err, "{what} failed");
    OrderError::Dependency
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::collaborators::VariantSnapshot;
    use crate::db::MemoryOrderRepository;

    struct StaticCatalog {
        variants: HashMap<(i32, i32), VariantSnapshot>,
    }

    #[async_trait]
    impl CatalogLookup for StaticCatalog {
        async fn get_item_variant(
            &self,
            item_id: ItemId,
            variant_id: ItemVariantId,
        ) -> Result<Option<VariantSnapshot>, CollaboratorError> {
            Ok(self
                .variants
                .get(&(item_id.as_i32(), variant_id.as_i32()))
                .cloned())
        }
    }

    struct FlatTax(Option<Decimal>);

    #[async_trait]
    impl TaxLookup for FlatTax {
        async fn applicable_rate(
            &self,
            _country_code: &str,
            _province_code: Option<&str>,
        ) -> Result<Option<Decimal>, CollaboratorError> {
            Ok(self.0)
        }
    }

    struct FlatShipping(Money);

    #[async_trait]
    impl ShippingQuoter for FlatShipping {
        async fn quote(&self, _request: &ShippingQuoteRequest) -> Result<Money, CollaboratorError> {
            Ok(self.0)
        }
    }

    fn variant(price: Decimal, stock: u32) -> VariantSnapshot {
        VariantSnapshot {
            unit_price: Money::new(price),
            stock,
            name_en: "Maple syrup".to_owned(),
            name_fr: "Sirop d'érable".to_owned(),
            variant_name_en: "500ml".to_owned(),
            variant_name_fr: "500 ml".to_owned(),
        }
    }

    fn service(tax_rate: Option<Decimal>, shipping: Money) -> OrderService {
        let mut variants = HashMap::new();
        variants.insert((1, 1), variant(dec!(10.00), 100));
        variants.insert((2, 2), variant(dec!(25.00), 3));

        OrderService::new(
            Arc::new(MemoryOrderRepository::new()),
            Arc::new(StaticCatalog { variants }),
            Arc::new(FlatTax(tax_rate)),
            Arc::new(FlatShipping(shipping)),
        )
    }

    fn shipping_address() -> NewOrderAddress {
        NewOrderAddress {
            kind: AddressKind::Shipping,
            recipient: "Marie Tremblay".to_owned(),
            line1: "12 Rue Principale".to_owned(),
            line2: None,
            city: "Gatineau".to_owned(),
            province_code: Some("QC".to_owned()),
            postal_code: "J8X 2A1".to_owned(),
            country_code: "CA".to_owned(),
            phone: None,
        }
    }

    fn request(lines: Vec<NewOrderLine>) -> CreateOrderRequest {
        CreateOrderRequest {
            lines,
            addresses: vec![shipping_address()],
            payment_method_id: Some(PaymentMethodId::new(1)),
            payment_provider: Some("stripe".to_owned()),
            notes: None,
        }
    }

    fn line(item: i32, variant: i32, quantity: u32) -> NewOrderLine {
        NewOrderLine {
            item_id: ItemId::new(item),
            variant_id: ItemVariantId::new(variant),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_create_order_totals() {
        // Two lines at 2x10.00 and 1x25.00, 13% tax, 5.00 shipping.
        let orders = service(Some(dec!(0.13)), Money::new(dec!(5.00)));
        let order = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 2), line(2, 2, 1)]))
            .await
            .unwrap();

        assert_eq!(order.subtotal, Money::new(dec!(45.00)));
        assert_eq!(order.tax_total, Money::new(dec!(5.85)));
        assert_eq!(order.shipping_total, Money::new(dec!(5.00)));
        assert_eq!(order.grand_total, Money::new(dec!(55.85)));
        assert!(order.totals_reconcile());
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert!(order.items.iter().all(|i| i.status == OrderItemStatus::Pending));
        assert_eq!(order.payment.as_ref().unwrap().amount, order.grand_total);
        assert!(order.payment.as_ref().unwrap().paid_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_tax_rate_means_zero_tax() {
        let orders = service(None, Money::new(dec!(5.00)));
        let order = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 1)]))
            .await
            .unwrap();

        assert_eq!(order.tax_total, Money::ZERO);
        assert_eq!(order.grand_total, Money::new(dec!(15.00)));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_variant() {
        let orders = service(None, Money::ZERO);
        let err = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 1), line(9, 9, 1)]))
            .await
            .unwrap_err();

        match err {
            OrderError::Validation(message) => assert!(message.starts_with("line 1:")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_insufficient_stock() {
        let orders = service(None, Money::ZERO);
        let err = orders
            .create_order(UserId::new(1), request(vec![line(2, 2, 4)]))
            .await
            .unwrap_err();

        match err {
            OrderError::Validation(message) => {
                assert!(message.contains("exceeds available stock"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_zero_quantity_and_duplicates() {
        let orders = service(None, Money::ZERO);

        let err = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));

        let err = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 1), line(1, 1, 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_requires_shipping_address() {
        let orders = service(None, Money::ZERO);
        let mut req = request(vec![line(1, 1, 1)]);
        req.addresses.clear();

        let err = orders.create_order(UserId::new(1), req).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_order_scopes_to_owner() {
        let orders = service(None, Money::ZERO);
        let order = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 1)]))
            .await
            .unwrap();

        // Another user's read is indistinguishable from a missing order.
        let err = orders.get_order(UserId::new(2), order.id).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound));

        let err = orders
            .get_order_by_number(UserId::new(2), order.order_number)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound));

        assert!(orders.get_order(UserId::new(1), order.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_by_non_owner_is_forbidden() {
        let orders = service(None, Money::ZERO);
        let order = orders
            .create_order(UserId::new(1), request(vec![line(1, 1, 1)]))
            .await
            .unwrap();

        let err = orders
            .update_order_status(UserId::new(2), order.id, OrderStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Forbidden));
    }

    #[tokio::test]
    async fn test_item_transition_path_to_delivered() {
        let orders = service(None, Money::ZERO);
        let user = UserId::new(1);
        let order = orders
            .create_order(user, request(vec![line(1, 1, 1)]))
            .await
            .unwrap();
        let item_id = order.items.first().unwrap().id;

        // Pending cannot jump straight to Delivered.
        let err = orders
            .update_order_item_status(user, order.id, item_id, OrderItemStatus::Delivered, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Transition(_)));

        for status in [
            OrderItemStatus::Processing,
            OrderItemStatus::Shipped,
            OrderItemStatus::Delivered,
        ] {
            orders
                .update_order_item_status(user, order.id, item_id, status, None)
                .await
                .unwrap();
        }

        let refreshed = orders.get_order(user, order.id).await.unwrap();
        let item = refreshed.item(item_id).unwrap();
        assert_eq!(item.status, OrderItemStatus::Delivered);
        assert!(item.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_bulk_update_is_partial_success() {
        let orders = service(None, Money::ZERO);
        let user = UserId::new(1);
        let order = orders
            .create_order(user, request(vec![line(1, 1, 1), line(2, 2, 1)]))
            .await
            .unwrap();
        let first = order.items.first().unwrap().id;
        let second = order.items.get(1).unwrap().id;

        // Move the second item along so Processing is no longer legal for it.
        orders
            .update_order_item_status(user, order.id, second, OrderItemStatus::Cancelled, None)
            .await
            .unwrap();

        let results = orders
            .update_order_items_status(
                user,
                order.id,
                &[first, second, OrderItemId::new(9999)],
                OrderItemStatus::Processing,
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.first().unwrap().outcome.is_ok());
        assert!(matches!(
            results.get(1).unwrap().outcome,
            Err(OrderError::Transition(_))
        ));
        assert!(matches!(
            results.get(2).unwrap().outcome,
            Err(OrderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_totals() {
        let orders = service(Some(dec!(0.13)), Money::new(dec!(5.00)));
        let user = UserId::new(1);
        let order = orders
            .create_order(user, request(vec![line(1, 1, 2), line(2, 2, 1)]))
            .await
            .unwrap();
        let item_id = order.items.first().unwrap().id;

        orders
            .update_order_item_status(user, order.id, item_id, OrderItemStatus::Cancelled, None)
            .await
            .unwrap();

        // No refund flow: cancelling an item does not rewrite the captured totals.
        let refreshed = orders.get_order(user, order.id).await.unwrap();
        assert_eq!(refreshed.subtotal, Money::new(dec!(45.00)));
        assert_eq!(refreshed.grand_total, Money::new(dec!(55.85)));
    }

    #[tokio::test]
    async fn test_cancel_order_is_logical_and_idempotent() {
        let orders = service(None, Money::ZERO);
        let user = UserId::new(1);
        let order = orders
            .create_order(user, request(vec![line(1, 1, 1)]))
            .await
            .unwrap();

        let cancelled = orders.cancel_order(user, order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        // Still readable, still the same number; repeat cancel is a no-op.
        let again = orders.cancel_order(user, order.id).await.unwrap();
        assert_eq!(again.status, OrderStatus::Cancelled);
        assert_eq!(again.order_number, order.order_number);

        let err = orders
            .update_order_status(user, order.id, OrderStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::OrderCancelled));
    }

    #[tokio::test]
    async fn test_record_payment_once() {
        let orders = service(Some(dec!(0.13)), Money::new(dec!(5.00)));
        let user = UserId::new(1);
        let order = orders
            .create_order(user, request(vec![line(1, 1, 1)]))
            .await
            .unwrap();

        let paid = orders
            .record_payment(user, order.id, Some("ch_42".to_owned()))
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        let payment = paid.payment.as_ref().unwrap();
        assert!(payment.paid_at.is_some());
        assert_eq!(payment.amount, paid.grand_total);
        assert_eq!(payment.provider_reference.as_deref(), Some("ch_42"));

        let err = orders
            .record_payment(user, order.id, Some("ch_43".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::AlreadyPaid));
    }

    #[tokio::test]
    async fn test_record_payment_without_method_is_rejected() {
        let orders = service(None, Money::ZERO);
        let user = UserId::new(1);
        let mut req = request(vec![line(1, 1, 1)]);
        req.payment_method_id = None;
        req.payment_provider = None;
        let order = orders.create_order(user, req).await.unwrap();

        let err = orders.record_payment(user, order.id, None).await.unwrap_err();
        assert!(matches!(err, OrderError::NoPayment));
    }

    #[tokio::test]
    async fn test_user_orders_by_status() {
        let orders = service(None, Money::ZERO);
        let user = UserId::new(1);
        let first = orders
            .create_order(user, request(vec![line(1, 1, 1)]))
            .await
            .unwrap();
        orders
            .create_order(user, request(vec![line(2, 2, 1)]))
            .await
            .unwrap();
        orders.cancel_order(user, first.id).await.unwrap();

        let awaiting = orders
            .user_orders_by_status(user, OrderStatus::AwaitingPayment)
            .await
            .unwrap();
        assert_eq!(awaiting.len(), 1);

        let cancelled = orders
            .user_orders_by_status(user, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled.first().unwrap().id, first.id);

        let all = orders.user_orders(user).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
