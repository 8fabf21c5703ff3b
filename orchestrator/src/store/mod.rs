//! Persistence seams for the orchestration core
//!
//! Three traits split the data layer by owner:
//! - [`PropertyData`]: domain entities the tools read and write
//! - [`RunLog`]: append-only audit record of every run
//! - [`EscalationStore`]: durable escalations with idempotent creation
//!
//! `MemoryStore` implements all three; `SqliteStore` backs the run log and
//! escalations with SQLite.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{
    BidRequest, ComplianceTask, Escalation, EscalationReason, EscalationStatus, LegalNotice,
    MessageRecord, NewEscalation, Organization, Priority, Property, RunFeedback, RunRecord,
    RunStatus, RunTermination, Step, Tenant, TimelineEvent, Vendor, WorkOrder, WorkOrderStatus,
    WorkflowType,
};
use std::sync::Arc;

pub use memory::{MemoryStore, PropertySeed};
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("run {0} is already terminal")]
    RunAlreadyTerminal(String),
    #[error("invalid escalation update: {0}")]
    InvalidEscalationUpdate(String),
    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Database(value.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedPropertyData = Arc<dyn PropertyData>;
pub type SharedRunLog = Arc<dyn RunLog>;
pub type SharedEscalationStore = Arc<dyn EscalationStore>;

// ============================================================================
// Property data
// ============================================================================

/// Domain entities read and written by tools. Writes are last-write-wins.
#[async_trait]
pub trait PropertyData: Send + Sync {
    async fn organization(&self, id: &str) -> StoreResult<Option<Organization>>;
    async fn organizations(&self) -> StoreResult<Vec<Organization>>;
    async fn property(&self, id: &str) -> StoreResult<Option<Property>>;

    async fn work_order(&self, id: &str) -> StoreResult<Option<WorkOrder>>;
    async fn save_work_order(&self, order: &WorkOrder) -> StoreResult<()>;
    /// Non-terminal work orders for a unit, oldest first.
    async fn open_work_orders_for_unit(
        &self,
        organization_id: &str,
        unit_id: &str,
    ) -> StoreResult<Vec<WorkOrder>>;
    async fn work_orders_with_status(
        &self,
        organization_id: &str,
        status: WorkOrderStatus,
    ) -> StoreResult<Vec<WorkOrder>>;
    async fn work_orders_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<WorkOrder>>;

    async fn vendors(&self, organization_id: &str) -> StoreResult<Vec<Vendor>>;
    async fn vendor(&self, id: &str) -> StoreResult<Option<Vendor>>;
    async fn tenant(&self, id: &str) -> StoreResult<Option<Tenant>>;

    async fn record_message(&self, message: &MessageRecord) -> StoreResult<()>;
    /// Most recent first.
    async fn messages_for_recipient(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<MessageRecord>>;

    async fn record_timeline_event(&self, event: &TimelineEvent) -> StoreResult<()>;
    async fn timeline(&self, work_order_id: &str) -> StoreResult<Vec<TimelineEvent>>;
    async fn save_bid_request(&self, request: &BidRequest) -> StoreResult<()>;

    async fn compliance_tasks(&self, property_id: &str) -> StoreResult<Vec<ComplianceTask>>;
    async fn compliance_task(&self, id: &str) -> StoreResult<Option<ComplianceTask>>;
    async fn save_compliance_task(&self, task: &ComplianceTask) -> StoreResult<()>;
    async fn save_legal_notice(&self, notice: &LegalNotice) -> StoreResult<()>;
}

// ============================================================================
// Run log
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub organization_id: Option<String>,
    pub workflow_type: Option<WorkflowType>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn matches(&self, run: &RunRecord) -> bool {
        self.organization_id
            .as_deref()
            .map_or(true, |org| run.organization_id == org)
            && self.workflow_type.map_or(true, |w| run.workflow_type == w)
            && self.status.map_or(true, |s| run.status == s)
    }
}

/// Durable record of runs. Status leaves RUNNING exactly once.
#[async_trait]
pub trait RunLog: Send + Sync {
    async fn create_run(&self, run: &RunRecord) -> StoreResult<()>;
    /// Replace the step list and token total of a RUNNING run in one write.
    async fn record_progress(
        &self,
        run_id: &str,
        steps: &[Step],
        total_tokens: u64,
    ) -> StoreResult<()>;
    /// Move a RUNNING run to its terminal status; fails if already terminal.
    async fn finish_run(
        &self,
        run_id: &str,
        termination: &RunTermination,
        now: DateTime<Utc>,
    ) -> StoreResult<RunRecord>;
    async fn run(&self, run_id: &str) -> StoreResult<Option<RunRecord>>;
    /// Newest first.
    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>>;
    async fn add_feedback(&self, run_id: &str, feedback: RunFeedback) -> StoreResult<RunRecord>;
    /// RUNNING runs created before `cutoff`.
    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<RunRecord>>;
}

pub(crate) fn validate_feedback(run: &RunRecord, feedback: &RunFeedback) -> StoreResult<()> {
    if !(1..=5).contains(&feedback.rating) {
        return Err(StoreError::InvalidFeedback(format!(
            "rating must be between 1 and 5, got {}",
            feedback.rating
        )));
    }
    if !run.status.is_terminal() {
        return Err(StoreError::InvalidFeedback(format!(
            "run {} is still running",
            run.id
        )));
    }
    Ok(())
}

pub(crate) fn apply_termination(
    run: &mut RunRecord,
    termination: &RunTermination,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    if run.status.is_terminal() {
        return Err(StoreError::RunAlreadyTerminal(run.id.clone()));
    }
    run.status = termination.status();
    run.completed_at = Some(now);
    match termination {
        RunTermination::Completed { final_action } => {
            run.final_action = Some(final_action.clone());
        }
        RunTermination::Escalated {
            escalation_id,
            final_action,
        } => {
            run.escalation_id = Some(escalation_id.clone());
            run.final_action = final_action.clone();
        }
        RunTermination::Failed { error } => {
            run.error = Some(error.clone());
        }
    }
    Ok(())
}

// ============================================================================
// Escalations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationFilter {
    pub organization_id: Option<String>,
    pub status: Option<EscalationStatus>,
    pub priority: Option<Priority>,
    pub reason: Option<EscalationReason>,
    pub assigned_to: Option<String>,
    pub limit: Option<usize>,
}

impl EscalationFilter {
    pub fn matches(&self, escalation: &Escalation) -> bool {
        self.organization_id
            .as_deref()
            .map_or(true, |org| escalation.organization_id == org)
            && self.status.map_or(true, |s| escalation.status == s)
            && self.priority.map_or(true, |p| escalation.priority == p)
            && self.reason.map_or(true, |r| escalation.reason == r)
            && self
                .assigned_to
                .as_deref()
                .map_or(true, |a| escalation.assigned_to.as_deref() == Some(a))
    }
}

/// Human actions on an escalation
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationUpdate {
    Assign {
        assignee: String,
    },
    Resolve {
        resolution: String,
        resolved_by: String,
    },
    Dismiss {
        notes: Option<String>,
        dismissed_by: String,
    },
}

impl EscalationUpdate {
    pub(crate) fn apply(self, escalation: &mut Escalation, now: DateTime<Utc>) -> StoreResult<()> {
        if escalation.status.is_closed() {
            return Err(StoreError::InvalidEscalationUpdate(format!(
                "escalation {} is already {}",
                escalation.id,
                escalation.status.as_str()
            )));
        }
        match self {
            Self::Assign { assignee } => {
                escalation.assigned_to = Some(assignee);
                escalation.status = EscalationStatus::InProgress;
            }
            Self::Resolve {
                resolution,
                resolved_by,
            } => {
                if resolution.trim().is_empty() {
                    return Err(StoreError::InvalidEscalationUpdate(
                        "resolution text is required".to_string(),
                    ));
                }
                escalation.status = EscalationStatus::Resolved;
                escalation.resolution = Some(resolution);
                escalation.resolved_by = Some(resolved_by);
                escalation.resolved_at = Some(now);
            }
            Self::Dismiss {
                notes,
                dismissed_by,
            } => {
                escalation.status = EscalationStatus::Dismissed;
                escalation.resolution = notes;
                escalation.resolved_by = Some(dismissed_by);
                escalation.resolved_at = Some(now);
            }
        }
        escalation.updated_at = now;
        Ok(())
    }
}

/// Outcome of an idempotent create
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationCreated {
    pub escalation: Escalation,
    /// False when an escalation with the same key already existed
    pub created: bool,
}

#[async_trait]
pub trait EscalationStore: Send + Sync {
    /// Create unless an escalation with the same idempotency key exists.
    async fn create_escalation(
        &self,
        new: NewEscalation,
        now: DateTime<Utc>,
    ) -> StoreResult<EscalationCreated>;
    async fn escalation(&self, id: &str) -> StoreResult<Option<Escalation>>;
    /// Newest first.
    async fn list_escalations(&self, filter: &EscalationFilter) -> StoreResult<Vec<Escalation>>;
    async fn update_escalation(
        &self,
        id: &str,
        update: EscalationUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Escalation>;
}
