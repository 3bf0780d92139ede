//! Login orchestration service.
//!
//! Coordinates credential verification, the last-login record update,
//! session creation, and token issuance into one login operation that either
//! fully succeeds or leaves nothing half-open. Token signing and password
//! checking stay behind the collaborator contracts; this service only
//! sequences them.

mod error;

pub use error::AuthError;

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, instrument, warn};

use maplecart_core::{SessionId, UserId};

use crate::collaborators::{CollaboratorError, CredentialVerifier, TokenIssuer, UserDirectory};
use crate::models::SessionClient;
use crate::services::sessions::SessionService;

/// Successful login result.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Opaque bearer token minted by the token issuer.
    pub token: String,
    /// The session created for this login.
    pub session_id: SessionId,
    /// The authenticated user.
    pub user_id: UserId,
}

/// Login/logout orchestrator.
pub struct LoginService {
    verifier: Arc<dyn CredentialVerifier>,
    tokens: Arc<dyn TokenIssuer>,
    directory: Arc<dyn UserDirectory>,
    sessions: SessionService,
    token_ttl: Duration,
}

impl LoginService {
    /// Create a login service with the configured token TTL.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn CredentialVerifier>,
        tokens: Arc<dyn TokenIssuer>,
        directory: Arc<dyn UserDirectory>,
        sessions: SessionService,
        token_ttl: Duration,
    ) -> Self {
        Self {
            verifier,
            tokens,
            directory,
            sessions,
            token_ttl,
        }
    }

    /// Log a user in.
    ///
    /// Steps, each short-circuiting on failure: credential check, last-login
    /// update (a hard dependency of login, not best-effort), session
    /// creation, token issuance. If token issuance fails after the session
    /// exists, the session is invalidated best-effort before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` on a credential mismatch -
    /// identically for an unknown account and a wrong password. Returns
    /// `AuthError::Dependency` when any collaborator fails.
    #[instrument(skip(self, password, client))]
    pub async fn login(
        &self,
        username_or_email: &str,
        password: &str,
        client: SessionClient,
    ) -> Result<LoginOutcome, AuthError> {
        let identity = self
            .verifier
            .verify(username_or_email, password)
            .await
            .map_err(|e| dependency("credential verifier", &e))?
            .ok_or(AuthError::InvalidCredentials)?;

        // Recording the login on the user record is part of the login
        // contract: if it cannot be written, the login fails closed. Doing it
        // before session creation keeps a failed login from leaving an
        // orphaned active session behind.
        self.directory
            .update_last_login(identity.user_id, Utc::now())
            .await
            .map_err(|e| dependency("last-login update", &e))?;

        let session = self
            .sessions
            .create_session(identity.user_id, client)
            .await
            .map_err(|e| {
                error!(error = %e, "Session creation failed during login");
                AuthError::Dependency
            })?;

        match self.tokens.issue(&identity, self.token_ttl).await {
            Ok(token) => {
                info!(user = %identity.user_id, session_id = %session.id, "Login succeeded");
                Ok(LoginOutcome {
                    token,
                    session_id: session.id,
                    user_id: identity.user_id,
                })
            }
            Err(e) => {
                error!(error = %e, "Token issuance failed after session creation");
                if let Err(cleanup) = self.sessions.logout_session(session.id).await {
                    warn!(
                        error = %cleanup,
                        session_id = %session.id,
                        "Failed to invalidate session after token failure"
                    );
                }
                Err(AuthError::Dependency)
            }
        }
    }

    /// Log a user out.
    ///
    /// The identity-level logout is authoritative and must succeed. When a
    /// session ID is supplied, that session is additionally invalidated
    /// best-effort: a failure there is logged and reported nowhere else.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Dependency` only when the identity-level logout
    /// fails.
    #[instrument(skip(self))]
    pub async fn logout(
        &self,
        user_id: UserId,
        session_id: Option<SessionId>,
    ) -> Result<(), AuthError> {
        self.directory
            .mark_logged_out(user_id, Utc::now())
            .await
            .map_err(|e| dependency("identity logout", &e))?;

        if let Some(id) = session_id {
            if let Err(e) = self.sessions.logout_session(id).await {
                warn!(error = %e, session_id = %id, "Session invalidation failed during logout");
            }
        }

        info!(user = %user_id, "Logout succeeded");
        Ok(())
    }
}

/// Log a collaborator failure and collapse it to the generic dependency error.
fn dependency(what: &str, err: &CollaboratorError) -> AuthError {
    error!(error = %err, "{what} call failed");
    AuthError::Dependency
}
