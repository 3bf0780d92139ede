//! Session service.
//!
//! Owns session issuance, liveness queries, and logout stamping over a
//! [`SessionRepository`] backend. Activity is always derived the same way:
//! no logout stamp and not yet past `expires_at`.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use maplecart_core::{SessionId, UserId};

use crate::db::{RepositoryError, SessionRepository};
use crate::error::ErrorKind;
use crate::models::{Session, SessionClient};

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No active session with that ID.
    ///
    /// Deliberately covers never-existed, expired, and logged-out alike, so
    /// callers cannot probe session lifetimes.
    #[error("session not found")]
    NotFound,

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

impl SessionError {
    /// Coarse classification for the embedding layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Repository(_) => ErrorKind::Dependency,
        }
    }
}

/// Session issuance and liveness service.
#[derive(Clone)]
pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
    ttl: Duration,
}

impl SessionService {
    /// Create a session service with the configured session TTL.
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepository>, ttl: Duration) -> Self {
        Self { repo, ttl }
    }

    /// Create and persist a new session for the user.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Repository` if persistence fails.
    #[instrument(skip(self, client), fields(user = %user_id))]
    pub async fn create_session(
        &self,
        user_id: UserId,
        client: SessionClient,
    ) -> Result<Session, SessionError> {
        let now = Utc::now();
        let session = Session {
            id: SessionId::generate(),
            user_id,
            created_at: now,
            expires_at: now + self.ttl,
            logged_out_at: None,
            user_agent: client.user_agent,
            ip_address: client.ip_address,
        };

        let session = self.repo.insert(session).await?;
        info!(session_id = %session.id, "Created session");
        Ok(session)
    }

    /// Fetch a session only if it is currently active.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for unknown, expired, and logged-out
    /// sessions alike.
    pub async fn get_active_session(&self, id: SessionId) -> Result<Session, SessionError> {
        match self.repo.get(id).await? {
            Some(session) if session.is_active() => Ok(session),
            _ => Err(SessionError::NotFound),
        }
    }

    /// Stamp the session as logged out.
    ///
    /// The stamp is written whenever the record exists, including when one is
    /// already present; the session was already inactive, so the effect of a
    /// repeat call is a no-op apart from the advancing timestamp.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` if no record with that ID exists.
    #[instrument(skip(self))]
    pub async fn logout_session(&self, id: SessionId) -> Result<Session, SessionError> {
        let session = self
            .repo
            .mark_logged_out(id, Utc::now())
            .await?
            .ok_or(SessionError::NotFound)?;
        info!(session_id = %session.id, user = %session.user_id, "Session logged out");
        Ok(session)
    }

    /// All currently-active sessions for a user.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Repository` if the query fails.
    pub async fn user_active_sessions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Session>, SessionError> {
        let sessions = self.repo.find_by_user(user_id).await?;
        Ok(sessions.into_iter().filter(Session::is_active).collect())
    }

    /// Whether a session is currently active.
    ///
    /// Pure read; calling it twice without an intervening mutation returns
    /// the same answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Repository` if the query fails.
    pub async fn is_session_active(&self, id: SessionId) -> Result<bool, SessionError> {
        let session = self.repo.get(id).await?;
        Ok(session.is_some_and(|s| s.is_active()))
    }
}
