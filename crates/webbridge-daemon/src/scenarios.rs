//! Scripted host/surface scenarios.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use webbridge_core::credentials::{MemorySecureStore, StaticAuthProvider};
use webbridge_core::error::CredentialError;
use webbridge_core::{
    CredentialStore, HandshakeState, HostBridge, Loopback, LoopbackOptions, SecureCredentialStore,
    SessionSnapshot, SurfaceBridge, SurfaceSession,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Surface loads while the host already holds a session.
    Boot,
    /// The surface reloads and must get the session again.
    Reload,
    Login,
    Logout,
    Refresh,
    /// The page disappears before the push lands; the host degrades.
    LostPage,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Boot,
        Scenario::Reload,
        Scenario::Login,
        Scenario::Logout,
        Scenario::Refresh,
        Scenario::LostPage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Boot => "boot",
            Scenario::Reload => "reload",
            Scenario::Login => "login",
            Scenario::Logout => "logout",
            Scenario::Refresh => "refresh",
            Scenario::LostPage => "lost-page",
        }
    }
}

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("timed out waiting for {waiting_for} (handshake {state:?})")]
    Timeout {
        waiting_for: String,
        state: HandshakeState,
    },

    #[error("{0}")]
    Unexpected(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub options: LoopbackOptions,
    pub provider: String,
    pub subject: String,
    pub token_lifetime: chrono::Duration,
}

impl Settings {
    /// Longest a push may take to be synced or given up on, plus slack.
    fn sync_budget(&self) -> Duration {
        let handshake = &self.options.handshake;
        let ack_waits = handshake.ack_retry.total_for(handshake.max_push_attempts);
        handshake.push_delay + handshake.settle_delay + ack_waits + Duration::from_secs(1)
    }
}

struct Harness {
    loopback: Loopback,
    credentials: Arc<SecureCredentialStore<MemorySecureStore>>,
    stored: Option<SessionSnapshot>,
    budget: Duration,
}

impl Harness {
    fn new(settings: &Settings) -> Self {
        Self::with_credentials(
            settings,
            Arc::new(SecureCredentialStore::new(MemorySecureStore::new())),
        )
    }

    /// A harness whose host already holds a session when it starts.
    async fn with_stored_session(settings: &Settings) -> Result<Self, ScenarioError> {
        let credentials = Arc::new(SecureCredentialStore::new(MemorySecureStore::new()));
        let expires_at = (chrono::Utc::now() + settings.token_lifetime).timestamp_millis();
        let snapshot = SessionSnapshot::new(
            "stored-token",
            settings.subject.clone(),
            expires_at,
            settings.provider.clone(),
        );
        credentials.save_session(&snapshot).await?;
        let mut harness = Self::with_credentials(settings, credentials);
        harness.stored = Some(snapshot);
        Ok(harness)
    }

    fn with_credentials(
        settings: &Settings,
        credentials: Arc<SecureCredentialStore<MemorySecureStore>>,
    ) -> Self {
        let auth = Arc::new(StaticAuthProvider::new(
            settings.subject.clone(),
            settings.token_lifetime,
        ));
        let loopback = Loopback::new(
            credentials.clone(),
            auth,
            settings.options.clone(),
            Handle::current(),
        );
        Self {
            loopback,
            credentials,
            stored: None,
            budget: settings.sync_budget(),
        }
    }

    fn stored(&self) -> Result<&SessionSnapshot, ScenarioError> {
        self.stored
            .as_ref()
            .ok_or_else(|| ScenarioError::Unexpected("no stored session".to_string()))
    }

    fn host(&self) -> &Arc<HostBridge> {
        self.loopback.host()
    }

    async fn wait_for_state(&self, want: HandshakeState) -> Result<(), ScenarioError> {
        let mut states = self.host().handshake().watch();
        let reached = tokio::time::timeout(self.budget, states.wait_for(|s| *s == want))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        if reached {
            Ok(())
        } else {
            Err(ScenarioError::Timeout {
                waiting_for: format!("handshake {:?}", want),
                state: self.host().state(),
            })
        }
    }

    async fn wait_for_surface<F>(
        &self,
        page: &SurfaceBridge,
        what: &str,
        predicate: F,
    ) -> Result<SurfaceSession, ScenarioError>
    where
        F: FnMut(&SurfaceSession) -> bool,
    {
        let mut sessions = page.subscribe();
        let reached = tokio::time::timeout(self.budget, sessions.wait_for(predicate))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        if reached {
            Ok(page.session())
        } else {
            Err(ScenarioError::Timeout {
                waiting_for: what.to_string(),
                state: self.host().state(),
            })
        }
    }

    async fn login(&self, page: &SurfaceBridge, provider: &str) -> Result<SessionSnapshot, ScenarioError> {
        page.request_login(provider);
        let session = self
            .wait_for_surface(page, "login session", |s| s.current().is_some())
            .await?;
        self.wait_for_state(HandshakeState::Synced).await?;
        session
            .current()
            .cloned()
            .ok_or_else(|| ScenarioError::Unexpected("session vanished after login".to_string()))
    }
}

fn expect(condition: bool, message: impl Into<String>) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Unexpected(message.into()))
    }
}

pub async fn run(scenario: Scenario, settings: &Settings) -> Result<(), ScenarioError> {
    let harness = match scenario {
        Scenario::Boot | Scenario::Reload | Scenario::LostPage => {
            Harness::with_stored_session(settings).await?
        }
        Scenario::Login | Scenario::Logout | Scenario::Refresh => Harness::new(settings),
    };
    let result = match scenario {
        Scenario::Boot => boot(&harness).await,
        Scenario::Reload => reload(&harness).await,
        Scenario::Login => login(&harness, settings).await,
        Scenario::Logout => logout(&harness, settings).await,
        Scenario::Refresh => refresh(&harness, settings).await,
        Scenario::LostPage => lost_page(&harness).await,
    };
    harness.loopback.shutdown();
    result
}

async fn boot(harness: &Harness) -> Result<(), ScenarioError> {
    let stored = harness.stored()?;
    let page = harness.loopback.load_page();

    let session = harness
        .wait_for_surface(&page, "stored session", |s| s.current().is_some())
        .await?;
    expect(
        session.current() == Some(stored),
        "surface received a different session",
    )?;
    harness.wait_for_state(HandshakeState::Synced).await
}

async fn reload(harness: &Harness) -> Result<(), ScenarioError> {
    let stored = harness.stored()?;
    for load in 1..=2 {
        let page = harness.loopback.load_page();
        let session = harness
            .wait_for_surface(&page, "session after page load", |s| s.current().is_some())
            .await?;
        expect(
            session.current() == Some(stored),
            format!("page load {} received a different session", load),
        )?;
        harness.wait_for_state(HandshakeState::Synced).await?;
    }
    Ok(())
}

async fn login(harness: &Harness, settings: &Settings) -> Result<(), ScenarioError> {
    let page = harness.loopback.load_page();
    harness
        .wait_for_state(HandshakeState::NoSessionNeeded)
        .await?;
    expect(page.current_session().is_none(), "fresh page already has a session")?;

    let session = harness.login(&page, &settings.provider).await?;
    expect(
        session.provider_id == settings.provider,
        format!("logged in with {} instead of {}", session.provider_id, settings.provider),
    )?;
    expect(page.outbox().pending().is_empty(), "login command never acknowledged")
}

async fn logout(harness: &Harness, settings: &Settings) -> Result<(), ScenarioError> {
    let page = harness.loopback.load_page();
    harness.login(&page, &settings.provider).await?;

    page.request_logout();
    harness
        .wait_for_surface(&page, "cleared session", |s| s.current().is_none())
        .await?;
    harness
        .wait_for_state(HandshakeState::NoSessionNeeded)
        .await?;
    let stored = harness.credentials.get_session().await?;
    expect(stored.is_none(), "host still holds a session after logout")
}

async fn refresh(harness: &Harness, settings: &Settings) -> Result<(), ScenarioError> {
    let page = harness.loopback.load_page();
    let before = harness.login(&page, &settings.provider).await?;

    page.request_token_refresh();
    let session = harness
        .wait_for_surface(&page, "refreshed token", |s| {
            s.current()
                .map(|current| current.access_token != before.access_token)
                .unwrap_or(false)
        })
        .await?;
    harness.wait_for_state(HandshakeState::Synced).await?;

    let stored = harness.credentials.get_session().await?;
    expect(
        stored.as_ref() == session.current(),
        "surface and host disagree after refresh",
    )
}

async fn lost_page(harness: &Harness) -> Result<(), ScenarioError> {
    let page = harness.loopback.load_page();
    harness.loopback.unload_page();

    harness.wait_for_state(HandshakeState::SessionPushed).await?;
    harness.wait_for_state(HandshakeState::Degraded).await?;
    expect(page.current_session().is_none(), "unloaded page received a session")?;
    expect(!harness.host().is_syncing(), "degraded host still reports syncing")
}

#[cfg(test)]
mod tests {
    use super::*;
    use webbridge_core::{HandshakeConfig, OutboxConfig, RetryPolicy};

    fn fast_settings() -> Settings {
        let retry = RetryPolicy::new(200, 800);
        Settings {
            options: LoopbackOptions {
                handshake: HandshakeConfig::default()
                    .with_push_delay(Duration::from_millis(10))
                    .with_settle_delay(Duration::from_millis(50))
                    .with_ack_retry(retry)
                    .with_max_push_attempts(3),
                outbox: OutboxConfig::default().with_retry(retry),
                trace_dir: None,
            },
            provider: "google".to_string(),
            subject: "sim-user".to_string(),
            token_lifetime: chrono::Duration::hours(1),
        }
    }

    #[test]
    fn budget_covers_every_ack_wait() {
        let settings = fast_settings();
        // 10 + 50 + (200 + 400 + 800) + 1000
        assert_eq!(settings.sync_budget(), Duration::from_millis(2_460));
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = Scenario::ALL.iter().map(|s| s.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Scenario::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn every_scenario_passes() {
        let settings = fast_settings();
        for scenario in Scenario::ALL {
            if let Err(e) = run(scenario, &settings).await {
                panic!("{} failed: {}", scenario.name(), e);
            }
        }
    }
}
