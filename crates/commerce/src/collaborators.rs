//! Typed contracts for the external collaborators this core calls.
//!
//! Credential verification, token minting, catalog/tax/shipping lookups, and
//! user-record updates are owned by other components; the services here only
//! depend on these traits. Production wiring supplies real clients, tests
//! supply fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use maplecart_core::{ItemId, ItemVariantId, Money, UserId};

/// Failure of an external collaborator call.
///
/// The variant messages are for logs only; services surface a generic
/// dependency-failure message to callers instead.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached or timed out.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered but refused the request.
    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}

/// A verified user identity, as returned by the credential verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    /// The user's database ID.
    pub user_id: UserId,
    /// Canonical username for the identity.
    pub username: String,
}

/// Validates a username/password pair.
///
/// Hashing and storage of credentials are entirely the verifier's business.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Check the pair and return the identity on a match.
    ///
    /// `Ok(None)` means the pair did not match - deliberately without saying
    /// whether the account exists. Errors are reserved for infrastructure
    /// failures.
    async fn verify(
        &self,
        username_or_email: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, CollaboratorError>;
}

/// Mints opaque bearer credentials bound to an identity and a TTL.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Mint a token for the identity, valid for `ttl`.
    async fn issue(
        &self,
        identity: &UserIdentity,
        ttl: chrono::Duration,
    ) -> Result<String, CollaboratorError>;
}

/// User-record side effects owned by the identity subsystem.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Record a successful login. A failure here fails the whole login.
    async fn update_last_login(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError>;

    /// Record an identity-level logout. This is the authoritative logout
    /// signal; per-session bookkeeping is advisory on top of it.
    async fn mark_logged_out(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError>;
}

/// Catalog state for one item variant at a single instant.
///
/// Everything an order line snapshots comes from here; the snapshot is
/// immutable on the line afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSnapshot {
    /// Current unit price.
    pub unit_price: Money,
    /// Units currently available to order.
    pub stock: u32,
    /// English item name.
    pub name_en: String,
    /// French item name.
    pub name_fr: String,
    /// English variant name.
    pub variant_name_en: String,
    /// French variant name.
    pub variant_name_fr: String,
}

/// Read access to the live catalog.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Current price, stock, and names for a variant.
    ///
    /// `Ok(None)` when the item or variant does not exist or is deleted.
    async fn get_item_variant(
        &self,
        item_id: ItemId,
        variant_id: ItemVariantId,
    ) -> Result<Option<VariantSnapshot>, CollaboratorError>;
}

/// Resolves the tax rate for a destination.
#[async_trait]
pub trait TaxLookup: Send + Sync {
    /// Fractional rate (e.g. `0.13` for 13%) for the country and province.
    ///
    /// `Ok(None)` means no rate is configured for the destination; callers
    /// treat that as zero tax, not as an error.
    async fn applicable_rate(
        &self,
        country_code: &str,
        province_code: Option<&str>,
    ) -> Result<Option<Decimal>, CollaboratorError>;
}

/// What the shipping quoter needs to price an order draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingQuoteRequest {
    /// Destination country code.
    pub country_code: String,
    /// Destination province or state code, if any.
    pub province_code: Option<String>,
    /// Destination postal code.
    pub postal_code: String,
    /// Total units across all lines.
    pub total_quantity: u32,
    /// Merchandise subtotal before tax and shipping.
    pub subtotal: Money,
}

/// Prices shipping for an order draft.
#[async_trait]
pub trait ShippingQuoter: Send + Sync {
    /// Compute the shipping cost for the draft.
    async fn quote(&self, request: &ShippingQuoteRequest) -> Result<Money, CollaboratorError>;
}
