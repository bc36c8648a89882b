//! Host-side credential sources.
//!
//! The platform secure store is an opaque async key-value store. On top of it
//! [`SecureCredentialStore`] keeps the one authoritative [`SessionSnapshot`]
//! and broadcasts every change, which is what drives session pushes to the
//! surface. OAuth flows hide behind [`AuthProvider`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::broadcast;

use crate::error::{AuthError, CredentialError};
use crate::session::SessionSnapshot;

pub const KEY_ACCESS_TOKEN: &str = "auth_token";
pub const KEY_SUBJECT_ID: &str = "user_id";
pub const KEY_PROVIDER: &str = "auth_provider";
pub const KEY_EXPIRES_AT: &str = "token_expires_at";

const ALL_KEYS: [&str; 4] = [KEY_ACCESS_TOKEN, KEY_SUBJECT_ID, KEY_PROVIDER, KEY_EXPIRES_AT];

const CHANGE_CAPACITY: usize = 16;

/// Opaque platform secure storage.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;
    async fn delete(&self, key: &str) -> Result<(), CredentialError>;
}

/// In-memory [`SecureStore`].
///
/// Can be switched to an unavailable mode where every call fails, which is
/// how a locked keychain looks to the host.
#[derive(Default)]
pub struct MemorySecureStore {
    entries: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), CredentialError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CredentialError::Store("secure store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, CredentialError> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::Store("secure store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        self.check_available()?;
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.check_available()?;
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.check_available()?;
        self.entries()?.remove(key);
        Ok(())
    }
}

/// The host's source of truth for the current session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current session, `None` when signed out or expired.
    async fn get_session(&self) -> Result<Option<SessionSnapshot>, CredentialError>;

    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), CredentialError>;

    async fn sign_out(&self) -> Result<(), CredentialError>;

    /// Session changes from now on: `Some` after a save, `None` after sign-out.
    fn subscribe(&self) -> broadcast::Receiver<Option<SessionSnapshot>>;
}

/// [`CredentialStore`] persisted field-by-field in a [`SecureStore`].
pub struct SecureCredentialStore<S> {
    store: S,
    changes: broadcast::Sender<Option<SessionSnapshot>>,
}

impl<S: SecureStore> SecureCredentialStore<S> {
    pub fn new(store: S) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self { store, changes }
    }

    pub fn secure_store(&self) -> &S {
        &self.store
    }

    async fn delete_all(&self) -> Result<(), CredentialError> {
        for key in ALL_KEYS {
            self.store.delete(key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: SecureStore> CredentialStore for SecureCredentialStore<S> {
    async fn get_session(&self) -> Result<Option<SessionSnapshot>, CredentialError> {
        let access_token = self.store.get(KEY_ACCESS_TOKEN).await?;
        let subject_id = self.store.get(KEY_SUBJECT_ID).await?;
        let provider_id = self.store.get(KEY_PROVIDER).await?;
        let expires_at = self.store.get(KEY_EXPIRES_AT).await?;

        // A partial record is as good as none.
        let (Some(access_token), Some(subject_id), Some(provider_id), Some(expires_at)) =
            (access_token, subject_id, provider_id, expires_at)
        else {
            return Ok(None);
        };

        let expires_at: i64 = expires_at
            .trim()
            .parse()
            .map_err(|_| CredentialError::Corrupt(format!("{KEY_EXPIRES_AT}={expires_at}")))?;

        let snapshot = SessionSnapshot {
            access_token,
            subject_id,
            expires_at,
            provider_id,
        };

        if snapshot.is_expired() {
            log::info!("stored session for {} expired, clearing", snapshot.subject_id);
            self.delete_all().await?;
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    async fn save_session(&self, snapshot: &SessionSnapshot) -> Result<(), CredentialError> {
        self.store
            .set(KEY_ACCESS_TOKEN, &snapshot.access_token)
            .await?;
        self.store.set(KEY_SUBJECT_ID, &snapshot.subject_id).await?;
        self.store.set(KEY_PROVIDER, &snapshot.provider_id).await?;
        self.store
            .set(KEY_EXPIRES_AT, &snapshot.expires_at.to_string())
            .await?;

        log::debug!("saved session for {}", snapshot.subject_id);
        let _ = self.changes.send(Some(snapshot.clone()));
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        self.delete_all().await?;
        log::debug!("signed out of secure store");
        let _ = self.changes.send(None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<SessionSnapshot>> {
        self.changes.subscribe()
    }
}

/// Opaque login/refresh flows (OAuth or otherwise).
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login(&self, provider_id: &str) -> Result<SessionSnapshot, AuthError>;

    async fn refresh(&self, current: &SessionSnapshot) -> Result<SessionSnapshot, AuthError>;
}

/// [`AuthProvider`] that issues deterministic tokens without any network.
///
/// Used by the simulator and tests. Providers listed as rejected fail login.
pub struct StaticAuthProvider {
    subject_id: String,
    token_lifetime: Duration,
    rejected: Vec<String>,
    issued: AtomicU64,
}

impl StaticAuthProvider {
    pub fn new(subject_id: impl Into<String>, token_lifetime: Duration) -> Self {
        Self {
            subject_id: subject_id.into(),
            token_lifetime,
            rejected: Vec::new(),
            issued: AtomicU64::new(0),
        }
    }

    pub fn rejecting(mut self, provider_id: impl Into<String>) -> Self {
        self.rejected.push(provider_id.into());
        self
    }

    /// Number of tokens issued so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    fn issue(&self, provider_id: &str) -> SessionSnapshot {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let expires_at = (Utc::now() + self.token_lifetime).timestamp_millis();
        SessionSnapshot::new(
            format!("{provider_id}-token-{n}"),
            self.subject_id.clone(),
            expires_at,
            provider_id,
        )
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn login(&self, provider_id: &str) -> Result<SessionSnapshot, AuthError> {
        if self.rejected.iter().any(|p| p == provider_id) {
            return Err(AuthError::Failed(format!("{provider_id} rejected the login")));
        }
        Ok(self.issue(provider_id))
    }

    async fn refresh(&self, current: &SessionSnapshot) -> Result<SessionSnapshot, AuthError> {
        if self.rejected.iter().any(|p| *p == current.provider_id) {
            return Err(AuthError::Failed(format!(
                "{} rejected the refresh",
                current.provider_id
            )));
        }
        Ok(self.issue(&current.provider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_snapshot() -> SessionSnapshot {
        let expires_at = (Utc::now() + Duration::hours(1)).timestamp_millis();
        SessionSnapshot::new("abc", "u1", expires_at, "google")
    }

    mod memory_secure_store {
        use super::*;

        #[tokio::test]
        async fn set_get_delete() {
            let store = MemorySecureStore::new();
            store.set("k", "v").await.unwrap();
            assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

            store.delete("k").await.unwrap();
            assert_eq!(store.get("k").await.unwrap(), None);
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn unavailable_store_fails_every_call() {
            let store = MemorySecureStore::new();
            store.set_unavailable(true);
            assert!(store.get("k").await.is_err());
            assert!(store.set("k", "v").await.is_err());
            assert!(store.delete("k").await.is_err());
        }
    }

    mod secure_credential_store {
        use super::*;

        #[tokio::test]
        async fn empty_store_has_no_session() {
            let creds = SecureCredentialStore::new(MemorySecureStore::new());
            assert_eq!(creds.get_session().await.unwrap(), None);
        }

        #[tokio::test]
        async fn save_then_get() {
            let creds = SecureCredentialStore::new(MemorySecureStore::new());
            let snapshot = fresh_snapshot();
            creds.save_session(&snapshot).await.unwrap();

            assert_eq!(creds.get_session().await.unwrap(), Some(snapshot));
            assert_eq!(creds.secure_store().len(), 4);
        }

        #[tokio::test]
        async fn partial_record_reads_as_none() {
            let store = MemorySecureStore::new();
            store.set(KEY_ACCESS_TOKEN, "abc").await.unwrap();
            store.set(KEY_SUBJECT_ID, "u1").await.unwrap();
            let creds = SecureCredentialStore::new(store);

            assert_eq!(creds.get_session().await.unwrap(), None);
        }

        #[tokio::test]
        async fn expired_record_is_cleared() {
            let creds = SecureCredentialStore::new(MemorySecureStore::new());
            let mut snapshot = fresh_snapshot();
            snapshot.expires_at = (Utc::now() - Duration::minutes(5)).timestamp_millis();
            creds.save_session(&snapshot).await.unwrap();

            assert_eq!(creds.get_session().await.unwrap(), None);
            assert!(creds.secure_store().is_empty());
        }

        #[tokio::test]
        async fn corrupt_expiry_is_an_error() {
            let store = MemorySecureStore::new();
            store.set(KEY_ACCESS_TOKEN, "abc").await.unwrap();
            store.set(KEY_SUBJECT_ID, "u1").await.unwrap();
            store.set(KEY_PROVIDER, "google").await.unwrap();
            store.set(KEY_EXPIRES_AT, "soon").await.unwrap();
            let creds = SecureCredentialStore::new(store);

            let result = creds.get_session().await;
            assert!(matches!(result, Err(CredentialError::Corrupt(_))));
        }

        #[tokio::test]
        async fn unavailable_store_propagates_read_error() {
            let creds = SecureCredentialStore::new(MemorySecureStore::new());
            creds.secure_store().set_unavailable(true);
            assert!(matches!(
                creds.get_session().await,
                Err(CredentialError::Store(_))
            ));
        }

        #[tokio::test]
        async fn changes_are_broadcast() {
            let creds = SecureCredentialStore::new(MemorySecureStore::new());
            let mut rx = creds.subscribe();
            let snapshot = fresh_snapshot();

            creds.save_session(&snapshot).await.unwrap();
            creds.sign_out().await.unwrap();

            assert_eq!(rx.recv().await.unwrap(), Some(snapshot));
            assert_eq!(rx.recv().await.unwrap(), None);
            assert!(creds.secure_store().is_empty());
        }
    }

    mod static_auth_provider {
        use super::*;

        #[tokio::test]
        async fn login_issues_numbered_tokens() {
            let provider = StaticAuthProvider::new("u1", Duration::hours(1));
            let first = provider.login("google").await.unwrap();
            let second = provider.login("google").await.unwrap();

            assert_eq!(first.access_token, "google-token-1");
            assert_eq!(second.access_token, "google-token-2");
            assert_eq!(first.subject_id, "u1");
            assert!(!first.is_expired());
            assert_eq!(provider.issued(), 2);
        }

        #[tokio::test]
        async fn rejected_provider_fails() {
            let provider = StaticAuthProvider::new("u1", Duration::hours(1)).rejecting("kakao");
            assert!(matches!(
                provider.login("kakao").await,
                Err(AuthError::Failed(_))
            ));
        }

        #[tokio::test]
        async fn refresh_keeps_provider() {
            let provider = StaticAuthProvider::new("u1", Duration::hours(1));
            let current = provider.login("kakao").await.unwrap();
            let refreshed = provider.refresh(&current).await.unwrap();
            assert_eq!(refreshed.provider_id, "kakao");
            assert_ne!(refreshed.access_token, current.access_token);
        }
    }
}
