//! Session repository contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use maplecart_core::{SessionId, UserId};

use super::RepositoryError;
use crate::models::Session;

/// Storage for session records.
///
/// There is deliberately no delete operation: a session only ever becomes
/// inactive by logout stamp or expiry, and the record itself is kept.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a fully-formed session record.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the session ID already exists.
    async fn insert(&self, session: Session) -> Result<Session, RepositoryError>;

    /// Fetch a session by ID, active or not.
    async fn get(&self, id: SessionId) -> Result<Option<Session>, RepositoryError>;

    /// Stamp `logged_out_at` on the session, returning the updated record.
    ///
    /// The stamp is written unconditionally when the record exists, even if
    /// one is already present; the session is inactive either way.
    async fn mark_logged_out(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;

    /// All sessions for a user, regardless of activity.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Session>, RepositoryError>;
}
