//! Initial context assembly for a run
//!
//! Resolves the workflow, then builds the opening transcript: a system prompt
//! for the workflow and one user message carrying the organization profile,
//! the trigger and any domain entities the task context references.

use serde_json::{json, Map, Value};
use shared_types::{Organization, TaskInput, TriggerKind, WorkflowType};

use crate::reasoning::TranscriptMessage;
use crate::store::{SharedPropertyData, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("organization {0} not found")]
    OrganizationNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Workflow hint wins; otherwise the trigger decides.
pub fn resolve_workflow(task: &TaskInput) -> WorkflowType {
    if let Some(workflow) = task.workflow_hint.as_deref().and_then(WorkflowType::parse) {
        return workflow;
    }
    match task.trigger {
        TriggerKind::InboundMessage | TriggerKind::InboundSms | TriggerKind::PortalMessage => {
            WorkflowType::MaintenanceRequest
        }
        TriggerKind::Scheduled => WorkflowType::ComplianceCheck,
        TriggerKind::Webhook => WorkflowType::IntegrationSync,
        TriggerKind::Manual => WorkflowType::General,
    }
}

const BASE_PROMPT: &str = "You coordinate maintenance operations for a property management \
company. Act only through the provided tools. Look things up before changing them, never \
invent identifiers, and avoid duplicate work orders by checking open work orders for the unit \
first. When a tool reports an error, adjust and try another approach. If you are not confident, \
the tenant asks for a person, or safety is at risk, call escalate_to_human. When the task is \
done, reply without tool calls and summarize what you did in one or two sentences.";

fn workflow_guidance(workflow: WorkflowType) -> &'static str {
    match workflow {
        WorkflowType::MaintenanceRequest => {
            "A tenant reported a problem. Decide whether it needs a work order, classify trade \
             and priority, find a suitable vendor and dispatch, then confirm with the tenant."
        }
        WorkflowType::EmergencyDispatch => {
            "This is an emergency. Prioritize tenant safety and get the fastest qualified \
             vendor on site. Keep the tenant informed."
        }
        WorkflowType::VendorBidding => {
            "Collect competitive bids for non-urgent work from several qualified vendors."
        }
        WorkflowType::TenantCommunication => {
            "Answer the tenant clearly and courteously. Only promise what the records support."
        }
        WorkflowType::ComplianceCheck => {
            "Review compliance tasks, flag overdue items and arrange the work needed to close them."
        }
        WorkflowType::IntegrationSync => {
            "Reconcile records with the external property management system."
        }
        WorkflowType::General => "Handle the request using the tools available.",
    }
}

pub fn system_prompt(workflow: WorkflowType, organization: &Organization) -> String {
    format!(
        "{BASE_PROMPT}\n\nWorkflow: {}. {}\n\nOrganization: {} (timezone {}). Dispatches \
         estimated above ${:.2} require human approval.",
        workflow.as_str(),
        workflow_guidance(workflow),
        organization.name,
        organization.timezone,
        organization.policy.auto_approve_threshold,
    )
}

pub struct ContextAssembler {
    data: SharedPropertyData,
}

impl ContextAssembler {
    pub fn new(data: SharedPropertyData) -> Self {
        Self { data }
    }

    pub async fn organization(&self, organization_id: &str) -> Result<Organization, ContextError> {
        self.data
            .organization(organization_id)
            .await?
            .ok_or_else(|| ContextError::OrganizationNotFound(organization_id.to_string()))
    }

    /// Entities named in the task context, keyed by kind.
    async fn referenced_entities(
        &self,
        task: &TaskInput,
    ) -> Result<Map<String, Value>, ContextError> {
        let org = task.organization_id.as_str();
        let mut entities = Map::new();

        if let Some(id) = task.context_str("work_order_id") {
            if let Some(order) = self
                .data
                .work_order(id)
                .await?
                .filter(|o| o.organization_id == org)
            {
                entities.insert("work_order".to_string(), json!(order));
            }
        }
        if let Some(id) = task.context_str("tenant_id") {
            if let Some(tenant) = self
                .data
                .tenant(id)
                .await?
                .filter(|t| t.organization_id == org)
            {
                entities.insert("tenant".to_string(), json!(tenant));
            }
        }
        if let Some(id) = task.context_str("property_id") {
            if let Some(property) = self
                .data
                .property(id)
                .await?
                .filter(|p| p.organization_id == org)
            {
                entities.insert("property".to_string(), json!(property));
            }
        }
        Ok(entities)
    }

    pub async fn initial_transcript(
        &self,
        task: &TaskInput,
        workflow: WorkflowType,
    ) -> Result<Vec<TranscriptMessage>, ContextError> {
        let organization = self.organization(&task.organization_id).await?;
        let entities = self.referenced_entities(task).await?;

        let payload = json!({
            "organization": {
                "id": organization.id,
                "name": organization.name,
                "timezone": organization.timezone,
            },
            "trigger": {
                "kind": task.trigger.as_str(),
                "id": task.trigger_id,
            },
            "workflow": workflow.as_str(),
            "context": task.context,
            "entities": entities,
        });

        let pretty = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        Ok(vec![
            TranscriptMessage::system(system_prompt(workflow, &organization)),
            TranscriptMessage::user(format!("New task:\n{pretty}")),
        ])
    }
}
