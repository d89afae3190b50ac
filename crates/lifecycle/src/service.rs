//! Command and query facade used by the presentation layer.

use std::sync::Arc;
use std::time::Duration;

use worktrack_core::error::CoreError;
use worktrack_core::session::{SessionSummary, DEFAULT_SESSION_MINUTES};
use worktrack_core::store::SessionStore;
use worktrack_events::EventPublisher;

use crate::commands::{ChangeLabelOutcome, CommandCoordinator, ExtendOutcome, OutOutcome};
use crate::completion::CompletionCoordinator;
use crate::deadline::bounded;
use crate::expiration::{ExpirationManager, ReconcileReport};
use crate::join::{JoinCoordinator, JoinOutcome, JoinRequest};
use crate::queries::{QueryService, UserInfo};
use crate::timers::TimerRegistry;

/// Default deadline for a single storage step.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables shared by all coordinators.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    /// Planned length of a freshly joined session.
    pub default_duration: chrono::Duration,
    pub storage_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_duration: chrono::Duration::minutes(DEFAULT_SESSION_MINUTES),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }
}

/// All session commands and queries behind one handle.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    join: JoinCoordinator,
    commands: CommandCoordinator,
    queries: QueryService,
    expiration: Arc<ExpirationManager>,
    storage_timeout: Duration,
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("storage_timeout", &self.storage_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionService {
    /// Wire the coordinators around `store` and `publisher`.
    ///
    /// Fails with [`CoreError::InvalidDuration`] for a non-positive default duration.
    /// Timers are spawned on the current Tokio runtime.
    pub fn new(
        store: Arc<dyn SessionStore>,
        publisher: Arc<dyn EventPublisher>,
        settings: ServiceSettings,
    ) -> Result<Self, CoreError> {
        let timeout = settings.storage_timeout;
        let registry = Arc::new(TimerRegistry::new());

        let completion = Arc::new(CompletionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            registry.clone(),
            timeout,
        ));
        let expiration = ExpirationManager::new(
            registry,
            Arc::clone(&store),
            Arc::clone(&completion),
            timeout,
        );
        let join = JoinCoordinator::new(
            Arc::clone(&store),
            expiration.clone(),
            Arc::clone(&publisher),
            settings.default_duration,
            timeout,
        )?;
        let commands = CommandCoordinator::new(
            Arc::clone(&store),
            completion,
            expiration.clone(),
            publisher,
            timeout,
        );
        let queries = QueryService::new(Arc::clone(&store), timeout);

        Ok(Self {
            store,
            join,
            commands,
            queries,
            expiration,
            storage_timeout: timeout,
        })
    }

    pub async fn join(&self, request: &JoinRequest) -> Result<JoinOutcome, CoreError> {
        self.join.join(request).await
    }

    pub async fn out(&self, user_name: &str) -> Result<OutOutcome, CoreError> {
        self.commands.out(user_name).await
    }

    pub async fn extend(&self, user_name: &str, minutes: i64) -> Result<ExtendOutcome, CoreError> {
        self.commands.extend(user_name, minutes).await
    }

    pub async fn change_label(
        &self,
        user_name: &str,
        work_name: &str,
    ) -> Result<ChangeLabelOutcome, CoreError> {
        self.commands.change_label(user_name, work_name).await
    }

    pub async fn active_sessions(&self) -> Result<Vec<SessionSummary>, CoreError> {
        self.queries.active_sessions().await
    }

    pub async fn user_info(&self, user_name: &str) -> Result<UserInfo, CoreError> {
        self.queries.user_info(user_name).await
    }

    /// Startup reconciliation of expiration timers.
    pub async fn initialize_from_database(&self) -> Result<ReconcileReport, CoreError> {
        self.expiration.initialize_from_database().await
    }

    /// Store reachability, for health checks.
    pub async fn ping(&self) -> Result<(), CoreError> {
        Ok(bounded(self.storage_timeout, "ping", self.store.ping()).await?)
    }

    pub fn expiration(&self) -> &Arc<ExpirationManager> {
        &self.expiration
    }

    /// Cancel all timers. They are rebuilt by reconciliation on next start.
    pub fn shutdown(&self) -> usize {
        self.expiration.shutdown()
    }
}
