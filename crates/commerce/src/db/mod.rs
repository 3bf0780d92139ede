//! Repository layer for the commerce core.
//!
//! # Tables (logical layout)
//!
//! - `commerce.session` - Login sessions, keyed by session UUID; never deleted
//! - `commerce.orders` - Order headers with a unique, sequence-assigned number
//! - `commerce.order_item` - Line items, fetched with their parent order
//! - `commerce.order_address` - Address snapshots, fetched with their parent
//! - `commerce.order_payment` - At most one payment record per order
//!
//! Repositories expose explicit query methods (`find_by_user`,
//! `find_by_user_and_status`, ...) that a backend can push down to storage;
//! there are no predicate-closure queries that would force filtering in
//! memory after a full fetch.
//!
//! Two backends are provided: [`memory`] for tests and single-process use,
//! and [`postgres`] for production. Migrations for the latter are stored in
//! `crates/commerce/migrations/`.

pub mod memory;
pub mod orders;
pub mod postgres;
pub mod sessions;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use memory::{MemoryOrderRepository, MemorySessionRepository};
pub use orders::{
    NewOrderAddressRecord, NewOrderItemRecord, NewOrderPaymentRecord, NewOrderRecord,
    OrderRepository,
};
pub use postgres::{PgOrderRepository, PgSessionRepository};
pub use sessions::SessionRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., stale status on a compare-and-swap write).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
