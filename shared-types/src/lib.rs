//! Shared types between the orchestration core and operator tooling
//!
//! These types are used by:
//! - the orchestrator (runner, tools, guardrail engine, stores)
//! - operator tooling that lists runs and works escalations
//!
//! Serializable with serde for JSON persistence and transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Identifiers
// ============================================================================

/// New sortable identifier for runs, escalations and log records.
pub fn new_record_id() -> String {
    ulid::Ulid::new().to_string()
}

/// New identifier for domain entities created by tools.
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Priorities and Channels
// ============================================================================

/// Urgency shared by work orders and escalations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Emergency,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }

    /// Lenient parse used for tool arguments ("emergency", "High", ...).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_uppercase().as_str() {
            "EMERGENCY" | "URGENT" => Some(Self::Emergency),
            "HIGH" => Some(Self::High),
            "NORMAL" | "MEDIUM" => Some(Self::Normal),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Delivery channel for outbound communication
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Email,
    Sms,
    Portal,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Portal => "portal",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "email" => Some(Self::Email),
            "sms" | "text" => Some(Self::Sms),
            "portal" => Some(Self::Portal),
            _ => None,
        }
    }
}

// ============================================================================
// Organizations
// ============================================================================

/// Per-organization guardrail configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrganizationPolicy {
    /// Dispatches estimated above this amount need human approval
    pub auto_approve_threshold: f64,
    /// Hours an EMERGENCY work order may wait for a vendor before escalation
    pub emergency_sla_hours: f64,
}

impl Default for OrganizationPolicy {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 500.0,
            emergency_sla_hours: 2.0,
        }
    }
}

/// Longest emergency SLA window honored; anything above is clamped.
pub const MAX_EMERGENCY_SLA_HOURS: f64 = 24.0 * 365.0;

impl OrganizationPolicy {
    /// Both figures must be finite and not negative.
    pub fn validate(&self) -> Result<(), String> {
        if !self.auto_approve_threshold.is_finite() || self.auto_approve_threshold < 0.0 {
            return Err(format!(
                "auto_approve_threshold must be a non-negative amount, got {}",
                self.auto_approve_threshold
            ));
        }
        if !self.emergency_sla_hours.is_finite() || self.emergency_sla_hours < 0.0 {
            return Err(format!(
                "emergency_sla_hours must be a non-negative number of hours, got {}",
                self.emergency_sla_hours
            ));
        }
        Ok(())
    }

    /// SLA window clamped to `[0, MAX_EMERGENCY_SLA_HOURS]`; NaN counts as zero.
    pub fn emergency_sla(&self) -> chrono::Duration {
        let hours = if self.emergency_sla_hours.is_nan() {
            0.0
        } else {
            self.emergency_sla_hours.clamp(0.0, MAX_EMERGENCY_SLA_HOURS)
        };
        chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Owner,
    Admin,
    Coordinator,
    Member,
}

impl StaffRole {
    /// Roles that receive escalation notifications.
    pub fn handles_escalations(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Coordinator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffMember {
    pub id: String,
    pub name: String,
    pub role: StaffRole,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub preferred_channel: Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub policy: OrganizationPolicy,
    #[serde(default)]
    pub staff: Vec<StaffMember>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub address: String,
    pub zip: String,
}

// ============================================================================
// Tasks and Runs
// ============================================================================

/// What started a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[serde(alias = "inbound-message")]
    InboundMessage,
    #[serde(alias = "inbound-sms")]
    InboundSms,
    #[serde(alias = "portal-message")]
    PortalMessage,
    Scheduled,
    Webhook,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InboundMessage => "inbound_message",
            Self::InboundSms => "inbound_sms",
            Self::PortalMessage => "portal_message",
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "inbound_message" => Some(Self::InboundMessage),
            "inbound_sms" => Some(Self::InboundSms),
            "portal_message" => Some(Self::PortalMessage),
            "scheduled" => Some(Self::Scheduled),
            "webhook" => Some(Self::Webhook),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Kind of work a run performs; drives the system prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    MaintenanceRequest,
    EmergencyDispatch,
    VendorBidding,
    TenantCommunication,
    ComplianceCheck,
    IntegrationSync,
    General,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaintenanceRequest => "maintenance_request",
            Self::EmergencyDispatch => "emergency_dispatch",
            Self::VendorBidding => "vendor_bidding",
            Self::TenantCommunication => "tenant_communication",
            Self::ComplianceCheck => "compliance_check",
            Self::IntegrationSync => "integration_sync",
            Self::General => "general",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "maintenance_request" | "maintenance" => Some(Self::MaintenanceRequest),
            "emergency_dispatch" | "emergency" => Some(Self::EmergencyDispatch),
            "vendor_bidding" | "bidding" => Some(Self::VendorBidding),
            "tenant_communication" | "communication" => Some(Self::TenantCommunication),
            "compliance_check" | "compliance" => Some(Self::ComplianceCheck),
            "integration_sync" | "sync" => Some(Self::IntegrationSync),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Input handed to the runner by an external trigger. Never mutated by a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskInput {
    pub organization_id: String,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub trigger_id: Option<String>,
    #[serde(default)]
    pub workflow_hint: Option<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl TaskInput {
    pub fn new(organization_id: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            organization_id: organization_id.into(),
            trigger,
            trigger_id: None,
            workflow_hint: None,
            context: Map::new(),
        }
    }

    pub fn with_trigger_id(mut self, trigger_id: impl Into<String>) -> Self {
        self.trigger_id = Some(trigger_id.into());
        self
    }

    pub fn with_workflow_hint(mut self, hint: impl Into<String>) -> Self {
        self.workflow_hint = Some(hint.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// String value from the context map, if present.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Completed,
    Escalated,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Escalated => "ESCALATED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "ESCALATED" => Some(Self::Escalated),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One tool call and what it returned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool: String,
    pub input: Value,
    pub output: Value,
}

/// One completed iteration of the orchestration loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub iteration: u32,
    pub reasoning: String,
    pub invocations: Vec<ToolInvocation>,
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFeedback {
    pub rating: u8,
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Audit record of a single run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub organization_id: String,
    pub workflow_type: WorkflowType,
    pub trigger: TriggerKind,
    pub trigger_id: Option<String>,
    pub status: RunStatus,
    pub steps: Vec<Step>,
    pub total_tokens: u64,
    pub final_action: Option<String>,
    pub escalation_id: Option<String>,
    pub error: Option<String>,
    pub feedback: Option<RunFeedback>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn start(task: &TaskInput, workflow_type: WorkflowType) -> Self {
        Self {
            id: new_record_id(),
            organization_id: task.organization_id.clone(),
            workflow_type,
            trigger: task.trigger,
            trigger_id: task.trigger_id.clone(),
            status: RunStatus::Running,
            steps: Vec::new(),
            total_tokens: 0,
            final_action: None,
            escalation_id: None,
            error: None,
            feedback: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// How a run ended, applied to its record exactly once
#[derive(Debug, Clone, PartialEq)]
pub enum RunTermination {
    Completed { final_action: String },
    Escalated { escalation_id: String, final_action: Option<String> },
    Failed { error: String },
}

impl RunTermination {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed { .. } => RunStatus::Completed,
            Self::Escalated { .. } => RunStatus::Escalated,
            Self::Failed { .. } => RunStatus::Failed,
        }
    }
}

// ============================================================================
// Escalations
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationReason {
    HighCost,
    LegalRisk,
    HostileTenant,
    AiLowConfidence,
    EmergencyUnresolved,
    IterationBudgetExceeded,
    TenantRequest,
    SafetyConcern,
    Other,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighCost => "HIGH_COST",
            Self::LegalRisk => "LEGAL_RISK",
            Self::HostileTenant => "HOSTILE_TENANT",
            Self::AiLowConfidence => "AI_LOW_CONFIDENCE",
            Self::EmergencyUnresolved => "EMERGENCY_UNRESOLVED",
            Self::IterationBudgetExceeded => "ITERATION_BUDGET_EXCEEDED",
            Self::TenantRequest => "TENANT_REQUEST",
            Self::SafetyConcern => "SAFETY_CONCERN",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input
            .trim()
            .to_ascii_uppercase()
            .replace(['-', ' '], "_")
            .as_str()
        {
            "HIGH_COST" => Some(Self::HighCost),
            "LEGAL_RISK" => Some(Self::LegalRisk),
            "HOSTILE_TENANT" => Some(Self::HostileTenant),
            "AI_LOW_CONFIDENCE" | "LOW_CONFIDENCE" => Some(Self::AiLowConfidence),
            "EMERGENCY_UNRESOLVED" => Some(Self::EmergencyUnresolved),
            "ITERATION_BUDGET_EXCEEDED" => Some(Self::IterationBudgetExceeded),
            "TENANT_REQUEST" => Some(Self::TenantRequest),
            "SAFETY_CONCERN" => Some(Self::SafetyConcern),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    /// Priority an escalation gets when the trigger does not supply one.
    pub fn default_priority(&self) -> Priority {
        match self {
            Self::EmergencyUnresolved | Self::SafetyConcern => Priority::Emergency,
            Self::HighCost | Self::LegalRisk | Self::HostileTenant => Priority::High,
            Self::AiLowConfidence
            | Self::IterationBudgetExceeded
            | Self::TenantRequest
            | Self::Other => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationStatus {
    Open,
    InProgress,
    Resolved,
    Dismissed,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Dismissed => "DISMISSED",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Some(Self::Open),
            "IN_PROGRESS" => Some(Self::InProgress),
            "RESOLVED" => Some(Self::Resolved),
            "DISMISSED" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }
}

/// A situation that needs a human decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escalation {
    pub id: String,
    /// Unique per (run, reason, target); repeated creation returns the original
    pub idempotency_key: String,
    pub organization_id: String,
    pub run_id: Option<String>,
    pub work_order_id: Option<String>,
    pub reason: EscalationReason,
    pub description: String,
    pub context: Value,
    pub suggested_action: Option<String>,
    pub priority: Priority,
    pub status: EscalationStatus,
    pub assigned_to: Option<String>,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Everything needed to open an escalation
#[derive(Debug, Clone, PartialEq)]
pub struct NewEscalation {
    pub idempotency_key: String,
    pub organization_id: String,
    pub run_id: Option<String>,
    pub work_order_id: Option<String>,
    pub reason: EscalationReason,
    pub description: String,
    pub context: Value,
    pub suggested_action: Option<String>,
    pub priority: Priority,
}

impl NewEscalation {
    pub fn into_escalation(self, now: DateTime<Utc>) -> Escalation {
        Escalation {
            id: new_record_id(),
            idempotency_key: self.idempotency_key,
            organization_id: self.organization_id,
            run_id: self.run_id,
            work_order_id: self.work_order_id,
            reason: self.reason,
            description: self.description,
            context: self.context,
            suggested_action: self.suggested_action,
            priority: self.priority,
            status: EscalationStatus::Open,
            assigned_to: None,
            resolution: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }
}

// ============================================================================
// Work Orders
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    New,
    Triaged,
    VendorSearch,
    PendingBids,
    Dispatched,
    Scheduled,
    InProgress,
    PendingReview,
    Completed,
    Cancelled,
    Escalated,
    OnHold,
}

impl WorkOrderStatus {
    pub const ALL: [WorkOrderStatus; 12] = [
        Self::New,
        Self::Triaged,
        Self::VendorSearch,
        Self::PendingBids,
        Self::Dispatched,
        Self::Scheduled,
        Self::InProgress,
        Self::PendingReview,
        Self::Completed,
        Self::Cancelled,
        Self::Escalated,
        Self::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Triaged => "TRIAGED",
            Self::VendorSearch => "VENDOR_SEARCH",
            Self::PendingBids => "PENDING_BIDS",
            Self::Dispatched => "DISPATCHED",
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::PendingReview => "PENDING_REVIEW",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Escalated => "ESCALATED",
            Self::OnHold => "ON_HOLD",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkOrder {
    pub id: String,
    pub organization_id: String,
    pub property_id: String,
    pub unit_id: Option<String>,
    pub tenant_id: Option<String>,
    pub vendor_id: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub status: WorkOrderStatus,
    pub estimated_cost: Option<f64>,
    pub approved_cost: Option<f64>,
    pub actual_cost: Option<f64>,
    pub po_number: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit trail entry for a work order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEvent {
    pub id: String,
    pub work_order_id: String,
    pub kind: String,
    pub from_status: Option<WorkOrderStatus>,
    pub to_status: Option<WorkOrderStatus>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BidRequest {
    pub id: String,
    pub work_order_id: String,
    pub vendor_id: String,
    pub scope: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Vendors and Tenants
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorTier {
    Preferred,
    Standard,
    Backup,
    Suspended,
}

/// Rolling performance metrics, maintained outside the core
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct VendorMetrics {
    pub avg_response_hours: Option<f64>,
    pub avg_rating: Option<f64>,
    /// Fraction in 0.0..=1.0
    pub completion_rate: Option<f64>,
    #[serde(default)]
    pub jobs_completed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vendor {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub trades: Vec<String>,
    /// Served zip codes; empty means no restriction
    #[serde(default)]
    pub service_zips: Vec<String>,
    pub tier: VendorTier,
    #[serde(default = "default_true")]
    pub active: bool,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub preferred_channel: Channel,
    #[serde(default)]
    pub metrics: VendorMetrics,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub property_id: Option<String>,
    pub unit_id: Option<String>,
    #[serde(default)]
    pub preferred_channel: Channel,
    #[serde(default)]
    pub external_id: Option<String>,
}

// ============================================================================
// Communication
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Tenant,
    Vendor,
    Staff,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub organization_id: String,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
    pub channel: Channel,
    pub subject: Option<String>,
    pub body: String,
    pub direction: MessageDirection,
    pub work_order_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

// ============================================================================
// Compliance
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceTask {
    pub id: String,
    pub organization_id: String,
    pub property_id: String,
    pub title: String,
    pub category: String,
    pub due_date: DateTime<Utc>,
    pub status: ComplianceStatus,
    #[serde(default)]
    pub recurrence_days: Option<u32>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
}

impl ComplianceTask {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ComplianceStatus::Pending && self.due_date < now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegalNotice {
    pub id: String,
    pub organization_id: String,
    pub tenant_id: String,
    pub property_id: Option<String>,
    pub notice_type: String,
    pub body: String,
    /// Notices are drafts until a human sends them
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
