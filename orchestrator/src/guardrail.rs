//! Guardrail policy engine
//!
//! [`GuardrailEngine::check`] is a synchronous decision over one proposed tool
//! invocation. It never looks at what the reasoning service says about its
//! own confidence. Rules run in order and the first match wins:
//!
//! 1. `dispatch_vendor` whose cost is above the auto-approval threshold. The
//!    cost is the highest of the call's `estimated_cost` and the figures
//!    already stored on the target work order.
//! 2. `generate_legal_notice` for eviction, lease termination or cure-or-quit
//! 3. `send_tenant_message` while the inbound message scored as hostile
//! 4. `escalate_to_human`, always
//!
//! [`EscalationService`] turns a decision into a durable escalation, keyed so
//! the same condition never produces two records, and tells the people who
//! handle escalations. It also runs the periodic emergency SLA scan.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use shared_types::{
    EscalationReason, NewEscalation, Organization, OrganizationPolicy, Priority, RecipientKind,
    WorkOrder, WorkOrderStatus, WorkflowType,
};

use crate::notify::{resolve_address, Notification, SharedNotifier};
use crate::store::{EscalationCreated, SharedEscalationStore, SharedPropertyData, StoreError};
use crate::tools::compliance::is_high_risk_notice;
use crate::tools::{parse_cost, ToolName};

/// Hostility above this score routes tenant messaging to a human.
pub const HOSTILITY_THRESHOLD: f64 = 0.7;

#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the guardrail knows about the run making a call
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub organization_id: String,
    pub run_id: String,
    pub workflow_type: WorkflowType,
    /// Context map from the task input
    pub task_context: Map<String, Value>,
}

impl RunContext {
    /// `message_analysis.hostility_score` from the task context.
    pub fn hostility_score(&self) -> Option<f64> {
        self.task_context
            .get("message_analysis")
            .and_then(|analysis| analysis.get("hostility_score"))
            .and_then(Value::as_f64)
    }
}

/// Why a call must stop for a human
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationTrigger {
    pub reason: EscalationReason,
    pub description: String,
    pub suggested_action: Option<String>,
    pub priority: Priority,
    pub work_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailDecision {
    Proceed,
    Escalate(EscalationTrigger),
}

impl GuardrailDecision {
    pub fn escalates(&self) -> bool {
        matches!(self, Self::Escalate(_))
    }
}

#[derive(Debug, Clone)]
pub struct GuardrailEngine {
    policy: OrganizationPolicy,
}

fn text(input: &Value, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Highest known cost for a dispatch: the call's own figure or what the
/// work order already carries.
fn dispatch_cost(input: &Value, target: Option<&WorkOrder>) -> Option<f64> {
    let proposed = ["estimated_cost", "estimatedCost"]
        .iter()
        .find_map(|key| input.get(*key).and_then(parse_cost));
    let stored = target
        .into_iter()
        .flat_map(|order| [order.estimated_cost, order.approved_cost])
        .flatten()
        .filter(|c| c.is_finite());
    proposed.into_iter().chain(stored).reduce(f64::max)
}

impl GuardrailEngine {
    pub fn new(policy: OrganizationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &OrganizationPolicy {
        &self.policy
    }

    /// `target` is the stored work order the call names, if the caller
    /// loaded one.
    pub fn check(
        &self,
        tool: ToolName,
        input: &Value,
        run: &RunContext,
        target: Option<&WorkOrder>,
    ) -> GuardrailDecision {
        let work_order_id = text(input, "work_order_id");
        match tool {
            ToolName::DispatchVendor => {
                let threshold = self.policy.auto_approve_threshold;
                match dispatch_cost(input, target) {
                    Some(cost) if cost > threshold => {
                        GuardrailDecision::Escalate(EscalationTrigger {
                            reason: EscalationReason::HighCost,
                            description: format!(
                                "Dispatch estimated at ${cost:.2} exceeds the ${threshold:.2} auto-approval threshold"
                            ),
                            suggested_action: Some(
                                "Review the estimate and approve or reassign the dispatch".to_string(),
                            ),
                            priority: EscalationReason::HighCost.default_priority(),
                            work_order_id,
                        })
                    }
                    _ => GuardrailDecision::Proceed,
                }
            }
            ToolName::GenerateLegalNotice => match text(input, "notice_type") {
                Some(notice_type) if is_high_risk_notice(&notice_type) => {
                    GuardrailDecision::Escalate(EscalationTrigger {
                        reason: EscalationReason::LegalRisk,
                        description: format!(
                            "Legal notice of type '{notice_type}' requires human review"
                        ),
                        suggested_action: Some(
                            "Have staff or counsel prepare and approve the notice".to_string(),
                        ),
                        priority: EscalationReason::LegalRisk.default_priority(),
                        work_order_id,
                    })
                }
                _ => GuardrailDecision::Proceed,
            },
            ToolName::SendTenantMessage => match run.hostility_score() {
                Some(score) if score > HOSTILITY_THRESHOLD => {
                    GuardrailDecision::Escalate(EscalationTrigger {
                        reason: EscalationReason::HostileTenant,
                        description: format!(
                            "Tenant message scored {score:.2} for hostility; a person should reply"
                        ),
                        suggested_action: Some(
                            "Reply personally and de-escalate".to_string(),
                        ),
                        priority: EscalationReason::HostileTenant.default_priority(),
                        work_order_id,
                    })
                }
                _ => GuardrailDecision::Proceed,
            },
            ToolName::EscalateToHuman => {
                let reason = text(input, "reason")
                    .and_then(|r| EscalationReason::parse(&r))
                    .unwrap_or(EscalationReason::AiLowConfidence);
                let priority = text(input, "priority")
                    .and_then(|p| Priority::parse(&p))
                    .unwrap_or_else(|| reason.default_priority());
                GuardrailDecision::Escalate(EscalationTrigger {
                    reason,
                    description: text(input, "description")
                        .unwrap_or_else(|| "Assistant requested human review".to_string()),
                    suggested_action: text(input, "suggested_action"),
                    priority,
                    work_order_id,
                })
            }
            ToolName::CreateWorkOrder
            | ToolName::UpdateWorkOrder
            | ToolName::GetWorkOrder
            | ToolName::GetOpenWorkOrdersForUnit
            | ToolName::FindAvailableVendors
            | ToolName::RequestVendorBids
            | ToolName::SendVendorMessage
            | ToolName::GetTenantHistory
            | ToolName::CheckComplianceStatus
            | ToolName::LogComplianceCompletion
            | ToolName::SyncWorkOrderToExternal
            | ToolName::GetTenantFromExternal => GuardrailDecision::Proceed,
        }
    }
}

/// Idempotency key for an escalation raised by one tool call.
pub fn tool_call_key(run_id: &str, reason: EscalationReason, call_id: &str) -> String {
    format!("{run_id}:{}:{call_id}", reason.as_str())
}

/// Idempotency key for a run that ran out of iterations.
pub fn budget_key(run_id: &str) -> String {
    format!(
        "{run_id}:{}:run",
        EscalationReason::IterationBudgetExceeded.as_str()
    )
}

/// Idempotency key for an emergency work order past its SLA.
pub fn emergency_key(work_order_id: &str) -> String {
    format!(
        "scan:{}:{work_order_id}",
        EscalationReason::EmergencyUnresolved.as_str()
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub organizations: usize,
    pub checked: usize,
    /// Newly opened escalation ids
    pub escalated: Vec<String>,
    pub already_open: usize,
}

pub struct EscalationService {
    escalations: SharedEscalationStore,
    data: SharedPropertyData,
    notifier: SharedNotifier,
}

impl EscalationService {
    pub fn new(
        escalations: SharedEscalationStore,
        data: SharedPropertyData,
        notifier: SharedNotifier,
    ) -> Self {
        Self {
            escalations,
            data,
            notifier,
        }
    }

    /// Create the escalation unless its key exists; notify only on creation.
    pub async fn open(
        &self,
        request: NewEscalation,
        now: DateTime<Utc>,
    ) -> Result<EscalationCreated, GuardrailError> {
        let organization_id = request.organization_id.clone();
        let outcome = self.escalations.create_escalation(request, now).await?;

        if outcome.created {
            tracing::info!(
                org_id = %organization_id,
                escalation_id = %outcome.escalation.id,
                reason = outcome.escalation.reason.as_str(),
                priority = outcome.escalation.priority.as_str(),
                "Escalation opened"
            );
            self.notify_staff(&outcome).await;
        } else {
            tracing::debug!(
                escalation_id = %outcome.escalation.id,
                key = %outcome.escalation.idempotency_key,
                "Escalation already exists"
            );
        }
        Ok(outcome)
    }

    async fn notify_staff(&self, outcome: &EscalationCreated) {
        let escalation = &outcome.escalation;
        let organization = match self.data.organization(&escalation.organization_id).await {
            Ok(Some(org)) => org,
            Ok(None) => {
                tracing::warn!(
                    org_id = %escalation.organization_id,
                    "Escalation organization not found; nobody notified"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load organization for escalation notice");
                return;
            }
        };

        for member in organization
            .staff
            .iter()
            .filter(|m| m.role.handles_escalations())
        {
            let address = match resolve_address(
                &member.id,
                member.preferred_channel,
                member.email.as_deref(),
                member.phone.as_deref(),
            ) {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!(staff_id = %member.id, error = %e, "Cannot notify staff member");
                    continue;
                }
            };
            let notification = Notification {
                organization_id: organization.id.clone(),
                recipient_kind: RecipientKind::Staff,
                recipient_id: member.id.clone(),
                channel: member.preferred_channel,
                address,
                subject: Some(format!(
                    "[{}] Escalation: {}",
                    escalation.priority.as_str(),
                    escalation.reason.as_str()
                )),
                body: match &escalation.suggested_action {
                    Some(action) => format!("{}\n\nSuggested: {action}", escalation.description),
                    None => escalation.description.clone(),
                },
            };
            if let Err(e) = self.notifier.send(&notification).await {
                tracing::warn!(
                    staff_id = %member.id,
                    escalation_id = %escalation.id,
                    error = %e,
                    "Escalation notification failed"
                );
            }
        }
    }

    /// Escalate emergency work orders still in vendor search past their
    /// organization's SLA window.
    pub async fn scan_emergencies(&self, now: DateTime<Utc>) -> Result<ScanReport, GuardrailError> {
        let mut report = ScanReport::default();
        for organization in self.data.organizations().await? {
            report.organizations += 1;
            self.scan_organization(&organization, now, &mut report)
                .await?;
        }
        if !report.escalated.is_empty() {
            tracing::info!(
                escalated = report.escalated.len(),
                checked = report.checked,
                "Emergency scan opened escalations"
            );
        }
        Ok(report)
    }

    async fn scan_organization(
        &self,
        organization: &Organization,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> Result<(), GuardrailError> {
        let sla_hours = organization.policy.emergency_sla_hours;
        let window = organization.policy.emergency_sla();

        let waiting = self
            .data
            .work_orders_with_status(&organization.id, WorkOrderStatus::VendorSearch)
            .await?;
        for order in waiting
            .into_iter()
            .filter(|o| o.priority == Priority::Emergency)
        {
            report.checked += 1;
            let waited = now - order.created_at;
            if waited <= window {
                continue;
            }
            let request = NewEscalation {
                idempotency_key: emergency_key(&order.id),
                organization_id: organization.id.clone(),
                run_id: None,
                work_order_id: Some(order.id.clone()),
                reason: EscalationReason::EmergencyUnresolved,
                description: format!(
                    "Emergency work order '{}' has waited {:.1}h for a vendor (SLA {sla_hours}h)",
                    order.title,
                    waited.num_minutes() as f64 / 60.0
                ),
                context: json!({
                    "work_order": order,
                    "sla_hours": sla_hours,
                }),
                suggested_action: Some("Assign a vendor manually".to_string()),
                priority: Priority::Emergency,
            };
            let outcome = self.open(request, now).await?;
            if outcome.created {
                report.escalated.push(outcome.escalation.id);
            } else {
                report.already_open += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_context() -> RunContext {
        RunContext {
            organization_id: "org-1".to_string(),
            run_id: "run-1".to_string(),
            workflow_type: WorkflowType::MaintenanceRequest,
            task_context: Map::new(),
        }
    }

    fn stored_order(estimated: Option<f64>, approved: Option<f64>) -> WorkOrder {
        let now = Utc::now();
        WorkOrder {
            id: "wo-1".to_string(),
            organization_id: "org-1".to_string(),
            property_id: "prop-1".to_string(),
            unit_id: None,
            tenant_id: None,
            vendor_id: None,
            title: "Water heater replacement".to_string(),
            description: "Tank is leaking from the base".to_string(),
            category: "plumbing".to_string(),
            priority: Priority::High,
            status: WorkOrderStatus::VendorSearch,
            estimated_cost: estimated,
            approved_cost: approved,
            actual_cost: None,
            po_number: None,
            scheduled_for: None,
            dispatched_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn engine() -> GuardrailEngine {
        GuardrailEngine::new(OrganizationPolicy::default())
    }

    #[test]
    fn test_dispatch_over_threshold_escalates_high_cost() {
        let decision = engine().check(
            ToolName::DispatchVendor,
            &json!({"work_order_id": "wo-1", "vendor_id": "v-1", "estimatedCost": 800}),
            &run_context(),
            None,
        );
        match decision {
            GuardrailDecision::Escalate(trigger) => {
                assert_eq!(trigger.reason, EscalationReason::HighCost);
                assert_eq!(trigger.work_order_id.as_deref(), Some("wo-1"));
            }
            GuardrailDecision::Proceed => panic!("expected escalation"),
        }
    }

    #[test]
    fn test_dispatch_at_or_under_threshold_proceeds() {
        let engine = engine();
        for input in [
            json!({"estimated_cost": 500}),
            json!({"estimated_cost": "450.00"}),
            json!({}),
        ] {
            assert_eq!(
                engine.check(ToolName::DispatchVendor, &input, &run_context(), None),
                GuardrailDecision::Proceed
            );
        }
    }

    #[test]
    fn test_dispatch_without_cost_uses_stored_estimate() {
        let engine = engine();
        let input = json!({"work_order_id": "wo-1", "vendor_id": "v-1"});
        let mut order = stored_order(Some(800.0), None);
        assert!(engine
            .check(ToolName::DispatchVendor, &input, &run_context(), Some(&order))
            .escalates());

        order.estimated_cost = None;
        order.approved_cost = Some(650.0);
        assert!(engine
            .check(ToolName::DispatchVendor, &input, &run_context(), Some(&order))
            .escalates());

        // A lower figure on the call does not mask the stored estimate.
        let lowball = json!({"work_order_id": "wo-1", "vendor_id": "v-1", "estimated_cost": 200});
        let order = stored_order(Some(800.0), None);
        assert!(engine
            .check(ToolName::DispatchVendor, &lowball, &run_context(), Some(&order))
            .escalates());

        let cheap = stored_order(Some(120.0), None);
        assert_eq!(
            engine.check(ToolName::DispatchVendor, &input, &run_context(), Some(&cheap)),
            GuardrailDecision::Proceed
        );
    }

    #[test]
    fn test_threshold_comes_from_policy() {
        let strict = GuardrailEngine::new(OrganizationPolicy {
            auto_approve_threshold: 100.0,
            emergency_sla_hours: 2.0,
        });
        assert!(strict
            .check(
                ToolName::DispatchVendor,
                &json!({"estimated_cost": "$1,250"}),
                &run_context(),
                None
            )
            .escalates());
    }

    #[test]
    fn test_high_risk_notice_types() {
        let engine = engine();
        for notice in ["eviction", "Lease Termination", "cure-or-quit"] {
            assert!(engine
                .check(
                    ToolName::GenerateLegalNotice,
                    &json!({"tenant_id": "t-1", "notice_type": notice}),
                    &run_context(),
                    None
                )
                .escalates());
        }
        assert!(!engine
            .check(
                ToolName::GenerateLegalNotice,
                &json!({"tenant_id": "t-1", "notice_type": "entry"}),
                &run_context(),
                None
            )
            .escalates());
    }

    #[test]
    fn test_hostile_tenant_messaging() {
        let engine = engine();
        let mut run = run_context();
        let input = json!({"tenant_id": "t-1", "body": "On our way"});
        assert!(!engine.check(ToolName::SendTenantMessage, &input, &run, None).escalates());

        run.task_context.insert(
            "message_analysis".to_string(),
            json!({"hostility_score": 0.7}),
        );
        assert!(!engine.check(ToolName::SendTenantMessage, &input, &run, None).escalates());

        run.task_context.insert(
            "message_analysis".to_string(),
            json!({"hostility_score": 0.85}),
        );
        assert!(engine.check(ToolName::SendTenantMessage, &input, &run, None).escalates());
        // Hostility only gates tenant messaging.
        assert!(!engine
            .check(ToolName::SendVendorMessage, &json!({}), &run, None)
            .escalates());
    }

    #[test]
    fn test_self_escalation_always_honored() {
        let engine = engine();
        let GuardrailDecision::Escalate(default) =
            engine.check(ToolName::EscalateToHuman, &json!({}), &run_context(), None)
        else {
            panic!("expected escalation");
        };
        assert_eq!(default.reason, EscalationReason::AiLowConfidence);
        assert_eq!(default.priority, Priority::Normal);

        let GuardrailDecision::Escalate(safety) = engine.check(
            ToolName::EscalateToHuman,
            &json!({"reason": "SAFETY_CONCERN", "description": "gas smell"}),
            &run_context(),
            None,
        ) else {
            panic!("expected escalation");
        };
        assert_eq!(safety.reason, EscalationReason::SafetyConcern);
        assert_eq!(safety.priority, Priority::Emergency);
        assert_eq!(safety.description, "gas smell");
    }

    #[test]
    fn test_idempotency_keys() {
        assert_eq!(
            tool_call_key("run-1", EscalationReason::HighCost, "call-2"),
            "run-1:HIGH_COST:call-2"
        );
        assert_eq!(budget_key("run-1"), "run-1:ITERATION_BUDGET_EXCEEDED:run");
        assert_eq!(emergency_key("wo-9"), "scan:EMERGENCY_UNRESOLVED:wo-9");
    }
}
