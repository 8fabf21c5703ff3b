//! Escalation lifecycle: idempotent creation, the emergency SLA scan, the
//! watcher actor and human follow-up.
//!
//! Run:
//!   cargo test -p orchestrator --test escalation_test

mod support;

use chrono::{Duration, Utc};
use orchestrator::guardrail::{emergency_key, tool_call_key};
use orchestrator::store::{EscalationFilter, EscalationStore, PropertyData, RunLog, StoreError};
use orchestrator::watcher::{WatcherActor, WatcherArguments, WatcherMsg, ABANDONED_RUN_ERROR};
use ractor::Actor;
use serde_json::json;
use shared_types::{
    EscalationReason, EscalationStatus, NewEscalation, Priority, RunRecord, RunStatus, TaskInput,
    TriggerKind, WorkOrderStatus, WorkflowType,
};
use support::{work_order_created_at, Harness, ScriptedReasoner, ORG};

fn high_cost_request(key: &str) -> NewEscalation {
    NewEscalation {
        idempotency_key: key.to_string(),
        organization_id: ORG.to_string(),
        run_id: Some("run-1".to_string()),
        work_order_id: Some("wo-1".to_string()),
        reason: EscalationReason::HighCost,
        description: "Dispatch estimated at $900.00 exceeds the $500.00 auto-approval threshold"
            .to_string(),
        context: json!({"estimated_cost": 900}),
        suggested_action: Some("Approve or reassign".to_string()),
        priority: Priority::High,
    }
}

async fn idle_harness() -> Harness {
    Harness::new(ScriptedReasoner::new(Vec::new())).await
}

#[tokio::test]
async fn test_same_key_yields_one_escalation_and_one_notice() {
    let harness = idle_harness().await;
    let service = harness.state.escalation_service();
    let key = tool_call_key("run-1", EscalationReason::HighCost, "call-7");
    assert_eq!(key, "run-1:HIGH_COST:call-7");

    let first = service
        .open(high_cost_request(&key), Utc::now())
        .await
        .unwrap();
    let second = service
        .open(high_cost_request(&key), Utc::now())
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.escalation.id, second.escalation.id);
    assert_eq!(first.escalation.status, EscalationStatus::Open);

    let all = harness
        .store
        .list_escalations(&EscalationFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let notices = harness.notifier.sent_to("staff-coord").await;
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].subject.as_deref(),
        Some("[HIGH] Escalation: HIGH_COST")
    );
    assert!(notices[0].body.contains("Suggested: Approve or reassign"));
}

#[tokio::test]
async fn test_emergency_scan_escalates_overdue_vendor_search_once() {
    let harness = idle_harness().await;
    let now = Utc::now();
    let stale = now - Duration::hours(3);
    let store = &harness.store;

    store
        .save_work_order(&work_order_created_at(
            "wo-stuck",
            WorkOrderStatus::VendorSearch,
            Priority::Emergency,
            stale,
        ))
        .await
        .unwrap();
    store
        .save_work_order(&work_order_created_at(
            "wo-recent",
            WorkOrderStatus::VendorSearch,
            Priority::Emergency,
            now - Duration::minutes(30),
        ))
        .await
        .unwrap();
    store
        .save_work_order(&work_order_created_at(
            "wo-normal",
            WorkOrderStatus::VendorSearch,
            Priority::Normal,
            stale,
        ))
        .await
        .unwrap();
    store
        .save_work_order(&work_order_created_at(
            "wo-dispatched",
            WorkOrderStatus::Dispatched,
            Priority::Emergency,
            stale,
        ))
        .await
        .unwrap();

    let service = harness.state.escalation_service();
    let report = service.scan_emergencies(now).await.unwrap();
    assert_eq!(report.organizations, 1);
    assert_eq!(report.checked, 2);
    assert_eq!(report.escalated.len(), 1);
    assert_eq!(report.already_open, 0);

    let escalation = store
        .escalation(&report.escalated[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escalation.reason, EscalationReason::EmergencyUnresolved);
    assert_eq!(escalation.priority, Priority::Emergency);
    assert_eq!(escalation.work_order_id.as_deref(), Some("wo-stuck"));
    assert_eq!(escalation.idempotency_key, emergency_key("wo-stuck"));
    assert!(escalation.run_id.is_none());

    // The scan flags; it does not move the work order.
    let order = store.work_order("wo-stuck").await.unwrap().unwrap();
    assert_eq!(order.status, WorkOrderStatus::VendorSearch);

    let again = service.scan_emergencies(now).await.unwrap();
    assert!(again.escalated.is_empty());
    assert_eq!(again.already_open, 1);
    assert_eq!(harness.notifier.sent_to("staff-coord").await.len(), 1);
}

#[tokio::test]
async fn test_watcher_sweep_reports_and_reconciles() {
    let harness = idle_harness().await;
    let now = Utc::now();
    harness
        .store
        .save_work_order(&work_order_created_at(
            "wo-stuck",
            WorkOrderStatus::VendorSearch,
            Priority::Emergency,
            now - Duration::hours(5),
        ))
        .await
        .unwrap();

    let mut abandoned = RunRecord::start(
        &TaskInput::new(ORG, TriggerKind::Manual),
        WorkflowType::General,
    );
    abandoned.created_at = now - Duration::hours(2);
    harness.store.create_run(&abandoned).await.unwrap();

    let (watcher, handle) = Actor::spawn(
        None,
        WatcherActor,
        WatcherArguments {
            escalations: harness.state.escalation_service(),
            run_log: harness.store.clone(),
            poll_interval_ms: 3_600_000,
            stale_run_after: Duration::minutes(30),
        },
    )
    .await
    .unwrap();

    let report = ractor::call!(watcher, |reply| WatcherMsg::Sweep { reply })
        .unwrap()
        .unwrap();
    assert_eq!(report.emergencies.escalated.len(), 1);
    assert_eq!(report.reconciled_runs, vec![abandoned.id.clone()]);

    let last = ractor::call!(watcher, |reply| WatcherMsg::LastSweep { reply })
        .unwrap()
        .unwrap();
    assert_eq!(last.reconciled_runs, report.reconciled_runs);

    let run = harness.store.run(&abandoned.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some(ABANDONED_RUN_ERROR));

    watcher.stop(None);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_staff_assign_then_resolve() {
    let harness = idle_harness().await;
    let created = harness
        .state
        .escalation_service()
        .open(high_cost_request("run-1:HIGH_COST:c-1"), Utc::now())
        .await
        .unwrap();
    let id = created.escalation.id;

    let assigned = harness
        .state
        .assign_escalation(&id, "staff-coord")
        .await
        .unwrap();
    assert_eq!(assigned.status, EscalationStatus::InProgress);
    assert_eq!(assigned.assigned_to.as_deref(), Some("staff-coord"));

    let blank = harness.state.resolve_escalation(&id, "  ", "staff-coord").await;
    assert!(matches!(blank, Err(StoreError::InvalidEscalationUpdate(_))));

    let resolved = harness
        .state
        .resolve_escalation(&id, "Approved the $900 estimate", "staff-coord")
        .await
        .unwrap();
    assert_eq!(resolved.status, EscalationStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    let reopened = harness.state.dismiss_escalation(&id, None, "staff-coord").await;
    assert!(matches!(reopened, Err(StoreError::InvalidEscalationUpdate(_))));

    let open = harness
        .state
        .list_escalations(&EscalationFilter {
            status: Some(EscalationStatus::Open),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(open.is_empty());
}

#[tokio::test]
async fn test_dismiss_unknown_escalation_is_not_found() {
    let harness = idle_harness().await;
    let err = harness
        .state
        .dismiss_escalation("esc-missing", Some("dup".to_string()), "staff-coord")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}
