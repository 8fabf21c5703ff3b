//! Runs and escalations persisted in SQLite survive a reopen of the database.
//!
//! Run:
//!   cargo test -p orchestrator --test persistence_test

mod support;

use orchestrator::app_state::{AppState, AppStateParts};
use orchestrator::external::ExternalSystems;
use orchestrator::notify::RecordingNotifier;
use orchestrator::runner::RunnerConfig;
use orchestrator::store::{
    EscalationFilter, EscalationStore, MemoryStore, PropertySeed, RunFilter, RunLog, SqliteStore,
};
use serde_json::json;
use shared_types::{EscalationReason, RunStatus, TaskInput, TriggerKind};
use std::sync::Arc;
use support::{call, final_answer, tool_calls, ScriptedReasoner, ORG};

async fn sqlite_state(db: Arc<SqliteStore>, reasoner: ScriptedReasoner) -> AppState {
    let data = Arc::new(MemoryStore::new());
    support::seed(&data).await;
    AppState::new(AppStateParts {
        data,
        run_log: db.clone(),
        escalations: db,
        reasoner: Arc::new(reasoner),
        notifier: Arc::new(RecordingNotifier::new()),
        external: ExternalSystems::new(),
        runner: RunnerConfig::default(),
    })
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite:{}", dir.path().join("orchestrator.db").display())
}

#[tokio::test]
async fn test_completed_and_escalated_runs_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = database_url(&dir);

    let (completed_id, escalated_id, escalation_id) = {
        let db = Arc::new(SqliteStore::connect(&url).await.unwrap());

        let reasoner = ScriptedReasoner::new(vec![final_answer("All set.")]);
        let state = sqlite_state(db.clone(), reasoner).await;
        let completed = state
            .run_task(TaskInput::new(ORG, TriggerKind::Manual))
            .await
            .unwrap();

        let state = sqlite_state(
            db,
            ScriptedReasoner::new(vec![tool_calls(
                "Needs a person.",
                vec![call(
                    "c-1",
                    "escalate_to_human",
                    json!({"reason": "SAFETY_CONCERN", "description": "Gas smell reported"}),
                )],
            )]),
        )
        .await;
        let escalated = state
            .run_task(TaskInput::new(ORG, TriggerKind::PortalMessage))
            .await
            .unwrap();

        (
            completed.run_id,
            escalated.run_id,
            escalated.escalation_id.unwrap(),
        )
    };

    let db = SqliteStore::connect(&url).await.unwrap();

    let completed = db.run(&completed_id).await.unwrap().unwrap();
    assert_eq!(completed.status, RunStatus::Completed);
    assert_eq!(completed.final_action.as_deref(), Some("All set."));
    assert_eq!(completed.steps.len(), 1);

    let escalated = db.run(&escalated_id).await.unwrap().unwrap();
    assert_eq!(escalated.status, RunStatus::Escalated);
    assert_eq!(escalated.escalation_id.as_deref(), Some(escalation_id.as_str()));
    assert_eq!(escalated.steps[0].invocations[0].tool, "escalate_to_human");

    let escalation = db.escalation(&escalation_id).await.unwrap().unwrap();
    assert_eq!(escalation.reason, EscalationReason::SafetyConcern);
    assert_eq!(escalation.description, "Gas smell reported");
    assert_eq!(
        escalation.idempotency_key,
        format!("{escalated_id}:SAFETY_CONCERN:c-1")
    );

    let runs = db
        .list_runs(&RunFilter {
            organization_id: Some(ORG.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    // Newest first.
    assert_eq!(runs[0].id, escalated_id);

    let escalated_only = db
        .list_runs(&RunFilter {
            status: Some(RunStatus::Escalated),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(escalated_only.len(), 1);

    let open = db
        .list_escalations(&EscalationFilter {
            organization_id: Some(ORG.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
}

#[test]
fn test_bundled_property_data_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/property-data.toml");
    let seed = PropertySeed::load(&path).unwrap();
    assert_eq!(seed.organizations.len(), 1);
    assert_eq!(seed.organizations[0].staff.len(), 1);
    assert!(seed.vendors.iter().any(|v| v.trades.contains(&"plumbing".to_string())));
    assert_eq!(seed.compliance_tasks.len(), 1);
}
