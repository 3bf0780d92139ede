//! Order aggregate domain types.
//!
//! An [`Order`] exclusively owns its line items, address snapshots, and
//! payment record; the whole aggregate is created atomically and always
//! fetched together. Monetary totals are fixed at creation: a later item
//! cancellation does not rewrite `subtotal` or `grand_total` (there is no
//! refund flow in this core).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use maplecart_core::{
    AddressKind, ItemId, ItemVariantId, Money, OrderAddressId, OrderId, OrderItemId, OrderItemStatus,
    OrderNumber, OrderPaymentId, OrderStatus, PaymentMethodId, UserId,
};

/// An order together with everything that shares its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID.
    pub id: OrderId,
    /// Owning user.
    pub user_id: UserId,
    /// Sequence-assigned order number, immutable after creation.
    pub order_number: OrderNumber,
    /// When the order was placed.
    pub order_date: DateTime<Utc>,
    /// Order-level status, independent of per-item statuses.
    pub status: OrderStatus,
    /// Sum of line item totals, captured at creation.
    pub subtotal: Money,
    /// Tax on the subtotal at the rate resolved for the shipping address.
    pub tax_total: Money,
    /// Shipping cost quoted at creation.
    pub shipping_total: Money,
    /// `subtotal + tax_total + shipping_total`.
    pub grand_total: Money,
    /// Free-form customer or merchant notes.
    pub notes: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Line items, in the order they were submitted.
    pub items: Vec<OrderItem>,
    /// Address snapshots, at most one per [`AddressKind`].
    pub addresses: Vec<OrderAddress>,
    /// Payment record, present when a payment method was supplied.
    pub payment: Option<OrderPayment>,
}

impl Order {
    /// Find a line item by ID.
    #[must_use]
    pub fn item(&self, item_id: OrderItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// The address snapshot of the given kind, if present.
    #[must_use]
    pub fn address(&self, kind: AddressKind) -> Option<&OrderAddress> {
        self.addresses.iter().find(|a| a.kind == kind)
    }

    /// Whether the stored totals reconcile against the line items.
    ///
    /// Holds for every persisted order: `grand_total` is the sum of the three
    /// components and `subtotal` is the sum of line totals as captured at
    /// creation.
    #[must_use]
    pub fn totals_reconcile(&self) -> bool {
        let item_sum: Money = self.items.iter().map(|i| i.total_price).sum();
        self.subtotal == item_sum
            && self.grand_total == self.subtotal + self.tax_total + self.shipping_total
    }
}

/// A single order line.
///
/// `unit_price` and the name fields are snapshots taken from the catalog at
/// order time; later catalog edits never change a placed order. Quantity and
/// price are immutable after creation - a quantity change is modeled as
/// cancel-and-recreate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Unique line item ID.
    pub id: OrderItemId,
    /// Owning order.
    pub order_id: OrderId,
    /// Catalog item this line was created from.
    pub item_id: ItemId,
    /// Catalog variant this line was created from.
    pub variant_id: ItemVariantId,
    /// English item name snapshot.
    pub name_en: String,
    /// French item name snapshot.
    pub name_fr: String,
    /// English variant name snapshot.
    pub variant_name_en: String,
    /// French variant name snapshot.
    pub variant_name_fr: String,
    /// Ordered quantity, always positive.
    pub quantity: u32,
    /// Unit price snapshot.
    pub unit_price: Money,
    /// `quantity * unit_price`.
    pub total_price: Money,
    /// Fulfillment status, mutated only through [`OrderItem::transition_to`].
    pub status: OrderItemStatus,
    /// Set exactly once, on entering `Delivered`.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Present exactly while the item is `OnHold`.
    pub on_hold_reason: Option<String>,
}

impl OrderItem {
    /// Apply a status transition with its side effects.
    ///
    /// Entering `Delivered` stamps `delivered_at`; entering `OnHold` requires
    /// a non-empty reason; leaving `OnHold` clears the reason. A rejected
    /// transition leaves status, `delivered_at`, and `on_hold_reason` all
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidTransition`] if the transition is not
    /// in the allowed table, or [`TransitionError::MissingHoldReason`] when
    /// entering `OnHold` without a reason.
    pub fn transition_to(
        &mut self,
        target: OrderItemStatus,
        on_hold_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        match target {
            OrderItemStatus::OnHold => {
                let reason = on_hold_reason
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(TransitionError::MissingHoldReason)?;
                self.on_hold_reason = Some(reason.to_owned());
            }
            OrderItemStatus::Delivered => {
                self.on_hold_reason = None;
                self.delivered_at = Some(now);
            }
            _ => {
                self.on_hold_reason = None;
            }
        }

        self.status = target;
        Ok(())
    }
}

/// Why a status transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The (from, to) pair is not in the allowed-transition table.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the item was in.
        from: OrderItemStatus,
        /// Status the caller asked for.
        to: OrderItemStatus,
    },

    /// Entering `OnHold` requires a non-empty reason.
    #[error("a reason is required to put an item on hold")]
    MissingHoldReason,
}

/// Immutable address snapshot taken at order creation.
///
/// Does not reference the user's saved address; later edits to the address
/// book never retroactively change a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAddress {
    /// Unique snapshot ID.
    pub id: OrderAddressId,
    /// Owning order.
    pub order_id: OrderId,
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
    /// Province or state code, if the country has them.
    pub province_code: Option<String>,
    /// Postal or ZIP code.
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    /// Contact phone number.
    pub phone: Option<String>,
}

/// Payment record for an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPayment {
    /// Unique payment record ID.
    pub id: OrderPaymentId,
    /// Owning order.
    pub order_id: OrderId,
    /// Payment method chosen at checkout, if any yet.
    pub payment_method_id: Option<PaymentMethodId>,
    /// Amount due; equals the order's grand total at payment time.
    pub amount: Money,
    /// Payment provider handling the charge.
    pub provider: String,
    /// Provider-side reference for the settled charge.
    pub provider_reference: Option<String>,
    /// When payment settled. Transitions from `None` exactly once.
    pub paid_at: Option<DateTime<Utc>>,
}
