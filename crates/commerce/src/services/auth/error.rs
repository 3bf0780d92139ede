//! Authentication error types.

use thiserror::Error;

use crate::error::{DEPENDENCY_FAILURE_MESSAGE, ErrorKind};

/// Errors that can occur during login and logout.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid credentials.
    ///
    /// The same variant and message whether the account does not exist or
    /// the password is wrong, so a caller cannot enumerate accounts.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A collaborator (verifier, directory, session store, token issuer)
    /// failed. Details are logged, never surfaced.
    #[error("{}", DEPENDENCY_FAILURE_MESSAGE)]
    Dependency,
}

impl AuthError {
    /// Coarse classification for the embedding layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::Unauthorized,
            Self::Dependency => ErrorKind::Dependency,
        }
    }
}
