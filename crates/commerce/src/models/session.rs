//! Session domain types.
//!
//! A session record is written once at login and never deleted. It goes
//! inactive either explicitly (logout stamps `logged_out_at`) or passively
//! (the clock passes `expires_at`); no background cleanup is involved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use maplecart_core::{SessionId, UserId};

/// A persisted login session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID, generated at creation.
    pub id: SessionId,
    /// User this session belongs to.
    pub user_id: UserId,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session passively expires.
    pub expires_at: DateTime<Utc>,
    /// When the session was explicitly logged out. Terminal once set.
    pub logged_out_at: Option<DateTime<Utc>>,
    /// User agent reported at login, if any.
    pub user_agent: Option<String>,
    /// Client IP address reported at login, if any.
    pub ip_address: Option<String>,
}

impl Session {
    /// Whether the session is active at the given instant.
    ///
    /// Active means never logged out and not yet expired. A stamped
    /// `logged_out_at` keeps the session inactive forever, regardless of
    /// `expires_at`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.logged_out_at.is_none() && now < self.expires_at
    }

    /// Whether the session is active right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

/// Client metadata captured alongside a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionClient {
    /// User agent string, if the transport layer knows it.
    pub user_agent: Option<String>,
    /// Client IP address, if the transport layer knows it.
    pub ip_address: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(created_at: DateTime<Utc>, ttl_secs: i64) -> Session {
        Session {
            id: SessionId::generate(),
            user_id: UserId::new(1),
            created_at,
            expires_at: created_at + Duration::seconds(ttl_secs),
            logged_out_at: None,
            user_agent: None,
            ip_address: None,
        }
    }

    #[test]
    fn test_fresh_session_is_active() {
        let now = Utc::now();
        let s = session(now, 3600);
        assert!(s.is_active_at(now));
        assert!(s.is_active_at(now + Duration::seconds(3599)));
    }

    #[test]
    fn test_session_expires_passively() {
        let now = Utc::now();
        let s = session(now, 3600);
        assert!(!s.is_active_at(now + Duration::seconds(3600)));
        assert!(!s.is_active_at(now + Duration::days(30)));
    }

    #[test]
    fn test_logout_is_terminal_even_before_expiry() {
        let now = Utc::now();
        let mut s = session(now, 3600);
        s.logged_out_at = Some(now + Duration::seconds(10));
        assert!(!s.is_active_at(now + Duration::seconds(11)));
        // Inactive from the stamp's perspective no matter where the clock is.
        assert!(!s.is_active_at(now));
    }

    #[test]
    fn test_is_active_is_pure() {
        let now = Utc::now();
        let s = session(now, 3600);
        assert_eq!(s.is_active_at(now), s.is_active_at(now));
    }
}
