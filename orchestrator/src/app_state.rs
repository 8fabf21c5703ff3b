use chrono::Utc;
use ractor::{Actor, ActorRef};
use shared_types::{Escalation, OrganizationPolicy, RunFeedback, RunRecord, TaskInput};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::context::ContextAssembler;
use crate::external::{ExternalSystems, HttpPropertySystem};
use crate::guardrail::EscalationService;
use crate::notify::{LogNotifier, SharedNotifier};
use crate::reasoning::{HttpReasoningService, SharedReasoningService};
use crate::runner::{RunOutcome, Runner, RunnerConfig, RunnerError, RunnerParts};
use crate::store::{
    EscalationFilter, EscalationUpdate, MemoryStore, PropertySeed, RunFilter,
    SharedEscalationStore, SharedPropertyData, SharedRunLog, SqliteStore, StoreError, StoreResult,
};
use crate::tools::ToolDispatcher;
use crate::watcher::{WatcherActor, WatcherArguments, WatcherMsg};

/// Collaborators an [`AppState`] is assembled from
pub struct AppStateParts {
    pub data: SharedPropertyData,
    pub run_log: SharedRunLog,
    pub escalations: SharedEscalationStore,
    pub reasoner: SharedReasoningService,
    pub notifier: SharedNotifier,
    pub external: ExternalSystems,
    pub runner: RunnerConfig,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    data: SharedPropertyData,
    run_log: SharedRunLog,
    escalation_store: SharedEscalationStore,
    escalations: Arc<EscalationService>,
    runner_parts: RunnerParts,
    watcher: Mutex<Option<ActorRef<WatcherMsg>>>,
}

impl AppState {
    pub fn new(parts: AppStateParts) -> Self {
        let escalations = Arc::new(EscalationService::new(
            parts.escalations.clone(),
            parts.data.clone(),
            parts.notifier.clone(),
        ));
        let tools = Arc::new(
            ToolDispatcher::new(parts.data.clone(), parts.notifier)
                .with_external_systems(parts.external),
        );
        let runner_parts = RunnerParts {
            config: parts.runner,
            reasoner: parts.reasoner,
            tools,
            escalations: escalations.clone(),
            run_log: parts.run_log.clone(),
            context: Arc::new(ContextAssembler::new(parts.data.clone())),
        };

        Self {
            inner: Arc::new(AppStateInner {
                data: parts.data,
                run_log: parts.run_log,
                escalation_store: parts.escalations,
                escalations,
                runner_parts,
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Wire the production stack: SQLite run log, seeded property data,
    /// HTTP reasoning service and logging notifier.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let sqlite = Arc::new(SqliteStore::connect(&config.database_url).await?);

        let seed = PropertySeed::load(&config.property_data_path)?;
        tracing::info!(
            path = %config.property_data_path.display(),
            organizations = seed.organizations.len(),
            vendors = seed.vendors.len(),
            "Loaded property data"
        );
        let data = Arc::new(MemoryStore::from_seed(seed));

        let reasoner = HttpReasoningService::new(
            config.reasoning_base_url.clone(),
            config.reasoning_api_key(),
            config.reasoning_model.clone(),
            config.reasoning_timeout.as_millis() as u64,
        )?;

        let mut external = ExternalSystems::new();
        for system in &config.external_systems {
            external.register(
                system.organization_id.clone(),
                Arc::new(HttpPropertySystem::new(
                    system.base_url.clone(),
                    config.external_api_key(),
                )),
            );
        }

        Ok(Self::new(AppStateParts {
            data,
            run_log: sqlite.clone(),
            escalations: sqlite,
            reasoner: Arc::new(reasoner),
            notifier: Arc::new(LogNotifier),
            external,
            runner: RunnerConfig {
                max_iterations: config.max_iterations,
            },
        }))
    }

    pub fn escalation_service(&self) -> Arc<EscalationService> {
        self.inner.escalations.clone()
    }

    /// Runner carrying the organization's current policy. Unknown
    /// organizations get the default policy; their runs fail during
    /// context assembly.
    pub async fn runner_for(&self, organization_id: &str) -> StoreResult<Runner> {
        let policy = self
            .inner
            .data
            .organization(organization_id)
            .await?
            .map(|org| org.policy)
            .unwrap_or_else(OrganizationPolicy::default);
        Ok(Runner::new(self.inner.runner_parts.clone(), policy))
    }

    pub async fn run_task(&self, task: TaskInput) -> Result<RunOutcome, RunnerError> {
        let runner = self.runner_for(&task.organization_id).await?;
        runner.run(task).await
    }

    // ------------------------------------------------------------------
    // Run log surface
    // ------------------------------------------------------------------

    pub async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>> {
        self.inner.run_log.list_runs(filter).await
    }

    pub async fn run(&self, run_id: &str) -> StoreResult<RunRecord> {
        self.inner
            .run_log
            .run(run_id)
            .await?
            .ok_or_else(|| StoreError::not_found("run", run_id))
    }

    pub async fn add_feedback(
        &self,
        run_id: &str,
        rating: u8,
        notes: Option<String>,
    ) -> StoreResult<RunRecord> {
        self.inner
            .run_log
            .add_feedback(
                run_id,
                RunFeedback {
                    rating,
                    notes,
                    submitted_at: Utc::now(),
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Escalation surface
    // ------------------------------------------------------------------

    pub async fn list_escalations(&self, filter: &EscalationFilter) -> StoreResult<Vec<Escalation>> {
        self.inner.escalation_store.list_escalations(filter).await
    }

    pub async fn assign_escalation(&self, id: &str, assignee: &str) -> StoreResult<Escalation> {
        self.inner
            .escalation_store
            .update_escalation(
                id,
                EscalationUpdate::Assign {
                    assignee: assignee.to_string(),
                },
                Utc::now(),
            )
            .await
    }

    pub async fn resolve_escalation(
        &self,
        id: &str,
        resolution: &str,
        resolved_by: &str,
    ) -> StoreResult<Escalation> {
        self.inner
            .escalation_store
            .update_escalation(
                id,
                EscalationUpdate::Resolve {
                    resolution: resolution.to_string(),
                    resolved_by: resolved_by.to_string(),
                },
                Utc::now(),
            )
            .await
    }

    pub async fn dismiss_escalation(
        &self,
        id: &str,
        notes: Option<String>,
        dismissed_by: &str,
    ) -> StoreResult<Escalation> {
        self.inner
            .escalation_store
            .update_escalation(
                id,
                EscalationUpdate::Dismiss {
                    notes,
                    dismissed_by: dismissed_by.to_string(),
                },
                Utc::now(),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Watcher
    // ------------------------------------------------------------------

    pub async fn ensure_watcher(
        &self,
        poll_interval_ms: u64,
        stale_run_after: chrono::Duration,
    ) -> Result<ActorRef<WatcherMsg>, String> {
        let mut guard = self.inner.watcher.lock().await;
        if let Some(watcher) = guard.as_ref() {
            return Ok(watcher.clone());
        }

        let (watcher, _) = Actor::spawn(
            Some(format!("watcher:{}", ulid::Ulid::new())),
            WatcherActor,
            WatcherArguments {
                escalations: self.inner.escalations.clone(),
                run_log: self.inner.run_log.clone(),
                poll_interval_ms,
                stale_run_after,
            },
        )
        .await
        .map_err(|e| e.to_string())?;

        *guard = Some(watcher.clone());
        Ok(watcher)
    }
}
