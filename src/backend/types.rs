use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Authenticated session as handed out by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix epoch seconds.
    pub expires_at: i64,
    pub user_id: String,
}

impl Session {
    /// Issue a session for `user_id` that expires `ttl` from now.
    pub fn issue(user_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            access_token: format!("access-{}", Uuid::new_v4()),
            refresh_token: format!("refresh-{}", Uuid::new_v4()),
            expires_at: Utc::now().timestamp() + ttl.as_secs() as i64,
            user_id: user_id.into(),
        }
    }

    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }

    /// Seconds until expiry; negative once expired.
    pub fn seconds_remaining(&self) -> i64 {
        self.expires_at - Utc::now().timestamp()
    }

    /// A session is usable iff it expires strictly after `now + grace`.
    pub fn is_valid_for(&self, grace: Duration) -> bool {
        self.seconds_remaining() > grace.as_secs() as i64
    }

    pub fn is_expired(&self) -> bool {
        self.seconds_remaining() <= 0
    }
}

/// Session persisted before suspend so recovery can restore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecoveryRecord {
    pub session: Session,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_validity_window() {
        let session = Session::issue("user-1", Duration::from_secs(120));

        assert!(session.is_valid_for(Duration::from_secs(60)));
        assert!(!session.is_valid_for(Duration::from_secs(600)));
        assert!(!session.is_expired());
        assert!(session.expires_at_datetime().is_some());
    }

    #[test]
    fn test_expired_session() {
        let mut session = Session::issue("user-1", Duration::from_secs(10));
        session.expires_at = Utc::now().timestamp() - 5;

        assert!(session.is_expired());
        assert!(!session.is_valid_for(Duration::ZERO));
        assert!(session.seconds_remaining() < 0);
    }
}
