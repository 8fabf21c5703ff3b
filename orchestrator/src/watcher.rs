//! WatcherActor - periodic sweeps outside any single run.
//!
//! On every tick the watcher:
//! - escalates EMERGENCY work orders stuck in vendor search past the SLA
//! - marks runs still RUNNING after the stale window as FAILED
//!
//! Both sweeps are idempotent; overlapping ticks cannot duplicate work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use shared_types::RunTermination;
use std::sync::Arc;
use std::time::Duration;

use crate::guardrail::{EscalationService, GuardrailError, ScanReport};
use crate::store::{RunLog, SharedRunLog, StoreError};

pub const ABANDONED_RUN_ERROR: &str = "run abandoned before reaching a terminal status";

#[derive(Clone)]
pub struct WatcherArguments {
    pub escalations: Arc<EscalationService>,
    pub run_log: SharedRunLog,
    pub poll_interval_ms: u64,
    pub stale_run_after: chrono::Duration,
}

pub struct WatcherState {
    escalations: Arc<EscalationService>,
    run_log: SharedRunLog,
    stale_run_after: chrono::Duration,
    last_sweep: Option<SweepReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub at: Option<DateTime<Utc>>,
    pub emergencies: ScanReport,
    /// Ids of runs marked FAILED this sweep
    pub reconciled_runs: Vec<String>,
}

#[derive(Debug)]
pub enum WatcherMsg {
    /// Internal trigger for a sweep.
    SweepNow,
    /// Run a sweep and reply with its report.
    Sweep {
        reply: RpcReplyPort<Result<SweepReport, String>>,
    },
    LastSweep {
        reply: RpcReplyPort<Option<SweepReport>>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("emergency scan failed: {0}")]
    Emergency(#[from] GuardrailError),
    #[error("stale run sweep failed: {0}")]
    RunLog(#[from] StoreError),
}

/// Fail every RUNNING run created before `cutoff`. Returns the ids changed.
///
/// A run that finishes between listing and update is skipped.
pub async fn reconcile_stale_runs(
    run_log: &dyn RunLog,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<String>, StoreError> {
    let termination = RunTermination::Failed {
        error: ABANDONED_RUN_ERROR.to_string(),
    };
    let mut reconciled = Vec::new();
    for run in run_log.stale_runs(cutoff).await? {
        match run_log.finish_run(&run.id, &termination, now).await {
            Ok(_) => {
                tracing::warn!(
                    run_id = %run.id,
                    org_id = %run.organization_id,
                    created_at = %run.created_at,
                    "Reconciled abandoned run as FAILED"
                );
                reconciled.push(run.id);
            }
            Err(StoreError::RunAlreadyTerminal(_)) => {
                tracing::debug!(run_id = %run.id, "Run finished before reconciliation");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(reconciled)
}

#[derive(Debug, Default)]
pub struct WatcherActor;

#[async_trait]
impl Actor for WatcherActor {
    type Msg = WatcherMsg;
    type State = WatcherState;
    type Arguments = WatcherArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let interval = Duration::from_millis(args.poll_interval_ms.max(500));
        let tick_ref = myself.clone();
        tokio::spawn(async move {
            // First sweep after one full interval, not at spawn.
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if tick_ref.cast(WatcherMsg::SweepNow).is_err() {
                    break;
                }
            }
        });

        tracing::info!(
            poll_interval_ms = interval.as_millis() as u64,
            stale_run_minutes = args.stale_run_after.num_minutes(),
            "Watcher started"
        );

        Ok(WatcherState {
            escalations: args.escalations,
            run_log: args.run_log,
            stale_run_after: args.stale_run_after,
            last_sweep: None,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WatcherMsg::SweepNow => {
                if let Err(err) = self.sweep(state, Utc::now()).await {
                    tracing::warn!(error = %err, "Watcher sweep failed");
                }
            }
            WatcherMsg::Sweep { reply } => {
                let result = self
                    .sweep(state, Utc::now())
                    .await
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            WatcherMsg::LastSweep { reply } => {
                let _ = reply.send(state.last_sweep.clone());
            }
        }
        Ok(())
    }
}

impl WatcherActor {
    async fn sweep(
        &self,
        state: &mut WatcherState,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, WatcherError> {
        let emergencies = state.escalations.scan_emergencies(now).await?;
        let reconciled_runs =
            reconcile_stale_runs(state.run_log.as_ref(), now - state.stale_run_after, now).await?;

        let report = SweepReport {
            at: Some(now),
            emergencies,
            reconciled_runs,
        };
        state.last_sweep = Some(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use shared_types::{RunRecord, RunStatus, TaskInput, TriggerKind, WorkflowType};

    #[tokio::test]
    async fn test_reconcile_only_touches_old_running_runs() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let task = TaskInput::new("org-1", TriggerKind::Manual);

        let mut old = RunRecord::start(&task, WorkflowType::General);
        old.created_at = now - ChronoDuration::hours(2);
        store.create_run(&old).await.unwrap();

        let mut old_done = RunRecord::start(&task, WorkflowType::General);
        old_done.created_at = now - ChronoDuration::hours(3);
        store.create_run(&old_done).await.unwrap();
        store
            .finish_run(
                &old_done.id,
                &RunTermination::Completed {
                    final_action: "done".to_string(),
                },
                now,
            )
            .await
            .unwrap();

        let fresh = RunRecord::start(&task, WorkflowType::General);
        store.create_run(&fresh).await.unwrap();

        let reconciled =
            reconcile_stale_runs(&store, now - ChronoDuration::minutes(30), now)
                .await
                .unwrap();
        assert_eq!(reconciled, vec![old.id.clone()]);

        let old = store.run(&old.id).await.unwrap().unwrap();
        assert_eq!(old.status, RunStatus::Failed);
        assert_eq!(old.error.as_deref(), Some(ABANDONED_RUN_ERROR));
        let fresh = store.run(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, RunStatus::Running);
        let done = store.run(&old_done.id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);

        let again = reconcile_stale_runs(&store, now - ChronoDuration::minutes(30), now)
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
