//! Order repository contract and insert records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use maplecart_core::{
    AddressKind, ItemId, ItemVariantId, Money, OrderId, OrderItemStatus, OrderNumber, OrderStatus,
    PaymentMethodId, UserId,
};

use super::RepositoryError;
use crate::models::{Order, OrderItem};

/// A validated order aggregate ready to persist.
///
/// The repository assigns every ID, the order number, and the timestamps;
/// the service supplies the already-computed totals and snapshots.
#[derive(Debug, Clone)]
pub struct NewOrderRecord {
    /// Owning user.
    pub user_id: UserId,
    /// Initial order-level status.
    pub status: OrderStatus,
    /// Sum of line totals.
    pub subtotal: Money,
    /// Tax amount.
    pub tax_total: Money,
    /// Shipping amount.
    pub shipping_total: Money,
    /// `subtotal + tax_total + shipping_total`.
    pub grand_total: Money,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Line item records, all starting `Pending`.
    pub items: Vec<NewOrderItemRecord>,
    /// Address snapshots, at most one per kind.
    pub addresses: Vec<NewOrderAddressRecord>,
    /// Payment record, when a payment method was supplied.
    pub payment: Option<NewOrderPaymentRecord>,
}

/// Line item portion of a [`NewOrderRecord`].
#[derive(Debug, Clone)]
pub struct NewOrderItemRecord {
    /// Catalog item reference.
    pub item_id: ItemId,
    /// Catalog variant reference.
    pub variant_id: ItemVariantId,
    /// English item name snapshot.
    pub name_en: String,
    /// French item name snapshot.
    pub name_fr: String,
    /// English variant name snapshot.
    pub variant_name_en: String,
    /// French variant name snapshot.
    pub variant_name_fr: String,
    /// Ordered quantity.
    pub quantity: u32,
    /// Unit price snapshot.
    pub unit_price: Money,
    /// `quantity * unit_price`.
    pub total_price: Money,
}

/// Address snapshot portion of a [`NewOrderRecord`].
#[derive(Debug, Clone)]
pub struct NewOrderAddressRecord {
    /// Which slot this snapshot fills.
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

/// Payment portion of a [`NewOrderRecord`].
#[derive(Debug, Clone)]
pub struct NewOrderPaymentRecord {
    /// Payment method chosen at checkout.
    pub payment_method_id: Option<PaymentMethodId>,
    /// Amount due; equals the order's grand total.
    pub amount: Money,
    /// Payment provider handling the charge.
    pub provider: String,
}

/// Storage for order aggregates.
///
/// Orders are always written and read as whole aggregates; children are never
/// independently addressable from outside this layer.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new order aggregate atomically.
    ///
    /// Assigns the order ID, all child IDs, and the next order number from a
    /// serialized sequence - two concurrent inserts can never observe the
    /// same number. If any child fails to persist, nothing of the order is
    /// visible to subsequent reads.
    async fn insert(&self, record: NewOrderRecord) -> Result<Order, RepositoryError>;

    /// Fetch an order aggregate by ID.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Fetch an order aggregate by its order number.
    async fn get_by_number(&self, number: OrderNumber) -> Result<Option<Order>, RepositoryError>;

    /// All orders for a user, newest first.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError>;

    /// Orders for a user filtered by order-level status, newest first.
    async fn find_by_user_and_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, RepositoryError>;

    /// Replace the order-level status, returning the updated aggregate.
    async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Persist a line item mutation with a status compare-and-swap.
    ///
    /// The write only applies while the stored item still has
    /// `expected_status`; a stale read loses with
    /// `RepositoryError::Conflict`. Returns the refreshed aggregate.
    ///
    /// # Errors
    ///
    /// `RepositoryError::NotFound` when the order or item does not exist,
    /// `RepositoryError::Conflict` when the status check fails.
    async fn update_item(
        &self,
        order_id: OrderId,
        item: OrderItem,
        expected_status: OrderItemStatus,
    ) -> Result<Order, RepositoryError>;

    /// Stamp the payment as settled and move the order to `Paid`, atomically.
    ///
    /// # Errors
    ///
    /// `RepositoryError::NotFound` when the order or its payment record does
    /// not exist, `RepositoryError::Conflict` when `paid_at` is already set.
    async fn record_payment(
        &self,
        order_id: OrderId,
        provider_reference: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> Result<Order, RepositoryError>;
}
