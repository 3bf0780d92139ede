//! Error classification shared by all commerce services.
//!
//! Service error enums stay specific (`AuthError`, `OrderError`,
//! `SessionError`); `ErrorKind` is the coarse classification the embedding
//! layer uses to pick a transport status code without matching on every
//! variant.

use serde::{Deserialize, Serialize};

/// Coarse classification of a service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape or values; the message is safe to surface verbatim.
    Validation,
    /// Credential check failed.
    Unauthorized,
    /// Authenticated but not authorized for this aggregate.
    Forbidden,
    /// Entity absent, or access-scoped away; must not confirm existence of
    /// another user's data.
    NotFound,
    /// Invalid state transition or duplicate unique key.
    Conflict,
    /// A collaborator (persistence, tax lookup, token issuer) failed; the
    /// message never carries collaborator internals.
    Dependency,
}

impl ErrorKind {
    /// Returns the kind name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Dependency => "dependency",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Only dependency failures are transient; every other kind reflects the
    /// request or aggregate state and will fail again until something changes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Dependency)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message surfaced for dependency failures in place of internal detail.
pub const DEPENDENCY_FAILURE_MESSAGE: &str = "service unavailable, try again";
