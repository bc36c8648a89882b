//! Session snapshots and the surface's received copy.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// An immutable point-in-time copy of the host's session credentials.
///
/// Serialized with camelCase keys, which is also the `SESSION_TOKEN` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub access_token: String,
    pub subject_id: String,
    /// Milliseconds since the Unix epoch.
    pub expires_at: i64,
    pub provider_id: String,
}

impl SessionSnapshot {
    pub fn new(
        access_token: impl Into<String>,
        subject_id: impl Into<String>,
        expires_at: i64,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            subject_id: subject_id.into(),
            expires_at,
            provider_id: provider_id.into(),
        }
    }

    /// Whether the token is expired at `now`. Expiry is inclusive.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry as a datetime, `None` if the stored value is out of range.
    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expires_at).single()
    }
}

/// The surface's in-memory session copy.
///
/// Never the source of truth: the host replaces or clears it by message.
#[derive(Debug, Default, Clone)]
pub struct SurfaceSession {
    current: Option<SessionSnapshot>,
    last_error: Option<String>,
}

impl SurfaceSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the local copy. Applying the same snapshot twice is a no-op.
    pub fn apply(&mut self, snapshot: SessionSnapshot) {
        self.current = Some(snapshot);
        self.last_error = None;
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn current(&self) -> Option<&SessionSnapshot> {
        self.current.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A token is present and has not expired at `now`.
    pub fn is_authenticated(&self, now: DateTime<Utc>) -> bool {
        match &self.current {
            Some(snapshot) => !snapshot.access_token.is_empty() && !snapshot.is_expired_at(now),
            None => false,
        }
    }

    /// Missing tokens count as expired.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.current {
            Some(snapshot) => snapshot.is_expired_at(now),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot_expiring(at: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot::new("abc", "u1", at.timestamp_millis(), "google")
    }

    mod session_snapshot {
        use super::*;

        #[test]
        fn serializes_with_camel_case_keys() {
            let snapshot = SessionSnapshot::new("abc", "u1", 1_700_000_000_000, "google");
            let json = serde_json::to_value(&snapshot).unwrap();
            assert_eq!(json["accessToken"], "abc");
            assert_eq!(json["subjectId"], "u1");
            assert_eq!(json["expiresAt"], 1_700_000_000_000_i64);
            assert_eq!(json["providerId"], "google");
        }

        #[test]
        fn expiry_is_inclusive() {
            let now = Utc::now();
            let snapshot = snapshot_expiring(now);
            assert!(snapshot.is_expired_at(now));
            assert!(!snapshot.is_expired_at(now - Duration::seconds(1)));
        }

        #[test]
        fn expires_at_datetime_round_trips_millis() {
            let snapshot = SessionSnapshot::new("abc", "u1", 1_700_000_000_123, "google");
            let dt = snapshot.expires_at_datetime().unwrap();
            assert_eq!(dt.timestamp_millis(), 1_700_000_000_123);
        }
    }

    mod surface_session {
        use super::*;

        #[test]
        fn starts_empty_and_expired() {
            let session = SurfaceSession::new();
            let now = Utc::now();
            assert!(session.current().is_none());
            assert!(!session.is_authenticated(now));
            assert!(session.is_token_expired(now));
        }

        #[test]
        fn apply_then_clear() {
            let now = Utc::now();
            let mut session = SurfaceSession::new();
            session.apply(snapshot_expiring(now + Duration::hours(1)));
            assert!(session.is_authenticated(now));
            assert!(!session.is_token_expired(now));

            session.clear();
            assert!(session.current().is_none());
            assert!(!session.is_authenticated(now));
        }

        #[test]
        fn expired_copy_is_not_authenticated() {
            let now = Utc::now();
            let mut session = SurfaceSession::new();
            session.apply(snapshot_expiring(now - Duration::minutes(1)));
            assert!(!session.is_authenticated(now));
            assert!(session.is_token_expired(now));
        }

        #[test]
        fn apply_twice_is_idempotent() {
            let now = Utc::now();
            let snapshot = snapshot_expiring(now + Duration::hours(1));
            let mut session = SurfaceSession::new();
            session.apply(snapshot.clone());
            session.apply(snapshot.clone());
            assert_eq!(session.current(), Some(&snapshot));
        }

        #[test]
        fn apply_resets_last_error() {
            let mut session = SurfaceSession::new();
            session.record_error("login failed");
            assert_eq!(session.last_error(), Some("login failed"));

            session.apply(snapshot_expiring(Utc::now() + Duration::hours(1)));
            assert!(session.last_error().is_none());
        }
    }
}
