//! In-process store backing all three persistence seams.
//!
//! Used by tests and by the binary for property data seeded from a TOML file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared_types::{
    BidRequest, ComplianceTask, Escalation, LegalNotice, MessageRecord, NewEscalation,
    Organization, Property, RunFeedback, RunRecord, RunStatus, RunTermination, Step, Tenant,
    TimelineEvent, Vendor, WorkOrder, WorkOrderStatus,
};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use super::{
    apply_termination, validate_feedback, EscalationCreated, EscalationFilter, EscalationStore,
    EscalationUpdate, PropertyData, RunFilter, RunLog, StoreError, StoreResult,
};

/// Initial property data, usually loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertySeed {
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub vendors: Vec<Vendor>,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub work_orders: Vec<WorkOrder>,
    #[serde(default)]
    pub compliance_tasks: Vec<ComplianceTask>,
}

impl PropertySeed {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let seed: Self =
            toml::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid property seed: {e}"))?;
        for org in &seed.organizations {
            org.policy
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid policy for organization {}: {e}", org.id))?;
        }
        Ok(seed)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Default)]
struct MemoryState {
    organizations: HashMap<String, Organization>,
    properties: HashMap<String, Property>,
    work_orders: HashMap<String, WorkOrder>,
    vendors: HashMap<String, Vendor>,
    tenants: HashMap<String, Tenant>,
    messages: Vec<MessageRecord>,
    timeline: Vec<TimelineEvent>,
    bid_requests: Vec<BidRequest>,
    compliance_tasks: HashMap<String, ComplianceTask>,
    legal_notices: Vec<LegalNotice>,
    runs: HashMap<String, RunRecord>,
    escalations: HashMap<String, Escalation>,
    escalation_keys: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: PropertySeed) -> Self {
        let mut state = MemoryState::default();
        for org in seed.organizations {
            state.organizations.insert(org.id.clone(), org);
        }
        for property in seed.properties {
            state.properties.insert(property.id.clone(), property);
        }
        for vendor in seed.vendors {
            state.vendors.insert(vendor.id.clone(), vendor);
        }
        for tenant in seed.tenants {
            state.tenants.insert(tenant.id.clone(), tenant);
        }
        for order in seed.work_orders {
            state.work_orders.insert(order.id.clone(), order);
        }
        for task in seed.compliance_tasks {
            state.compliance_tasks.insert(task.id.clone(), task);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn insert_organization(&self, org: Organization) {
        self.state
            .write()
            .await
            .organizations
            .insert(org.id.clone(), org);
    }

    pub async fn insert_property(&self, property: Property) {
        self.state
            .write()
            .await
            .properties
            .insert(property.id.clone(), property);
    }

    pub async fn insert_vendor(&self, vendor: Vendor) {
        self.state
            .write()
            .await
            .vendors
            .insert(vendor.id.clone(), vendor);
    }

    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.state
            .write()
            .await
            .tenants
            .insert(tenant.id.clone(), tenant);
    }

    pub async fn insert_compliance_task(&self, task: ComplianceTask) {
        self.state
            .write()
            .await
            .compliance_tasks
            .insert(task.id.clone(), task);
    }

    pub async fn bid_requests(&self, work_order_id: &str) -> Vec<BidRequest> {
        self.state
            .read()
            .await
            .bid_requests
            .iter()
            .filter(|b| b.work_order_id == work_order_id)
            .cloned()
            .collect()
    }

    pub async fn legal_notices(&self) -> Vec<LegalNotice> {
        self.state.read().await.legal_notices.clone()
    }
}

#[async_trait]
impl PropertyData for MemoryStore {
    async fn organization(&self, id: &str) -> StoreResult<Option<Organization>> {
        Ok(self.state.read().await.organizations.get(id).cloned())
    }

    async fn organizations(&self) -> StoreResult<Vec<Organization>> {
        let mut orgs: Vec<Organization> = self
            .state
            .read()
            .await
            .organizations
            .values()
            .cloned()
            .collect();
        orgs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(orgs)
    }

    async fn property(&self, id: &str) -> StoreResult<Option<Property>> {
        Ok(self.state.read().await.properties.get(id).cloned())
    }

    async fn work_order(&self, id: &str) -> StoreResult<Option<WorkOrder>> {
        Ok(self.state.read().await.work_orders.get(id).cloned())
    }

    async fn save_work_order(&self, order: &WorkOrder) -> StoreResult<()> {
        self.state
            .write()
            .await
            .work_orders
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn open_work_orders_for_unit(
        &self,
        organization_id: &str,
        unit_id: &str,
    ) -> StoreResult<Vec<WorkOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<WorkOrder> = state
            .work_orders
            .values()
            .filter(|wo| {
                wo.organization_id == organization_id
                    && wo.unit_id.as_deref() == Some(unit_id)
                    && !wo.status.is_terminal()
            })
            .cloned()
            .collect();
        orders.sort_by_key(|wo| wo.created_at);
        Ok(orders)
    }

    async fn work_orders_with_status(
        &self,
        organization_id: &str,
        status: WorkOrderStatus,
    ) -> StoreResult<Vec<WorkOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<WorkOrder> = state
            .work_orders
            .values()
            .filter(|wo| wo.organization_id == organization_id && wo.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|wo| wo.created_at);
        Ok(orders)
    }

    async fn work_orders_for_tenant(&self, tenant_id: &str) -> StoreResult<Vec<WorkOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<WorkOrder> = state
            .work_orders
            .values()
            .filter(|wo| wo.tenant_id.as_deref() == Some(tenant_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn vendors(&self, organization_id: &str) -> StoreResult<Vec<Vendor>> {
        let state = self.state.read().await;
        let mut vendors: Vec<Vendor> = state
            .vendors
            .values()
            .filter(|v| v.organization_id == organization_id)
            .cloned()
            .collect();
        vendors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vendors)
    }

    async fn vendor(&self, id: &str) -> StoreResult<Option<Vendor>> {
        Ok(self.state.read().await.vendors.get(id).cloned())
    }

    async fn tenant(&self, id: &str) -> StoreResult<Option<Tenant>> {
        Ok(self.state.read().await.tenants.get(id).cloned())
    }

    async fn record_message(&self, message: &MessageRecord) -> StoreResult<()> {
        self.state.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn messages_for_recipient(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<MessageRecord>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.recipient_id == recipient_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_timeline_event(&self, event: &TimelineEvent) -> StoreResult<()> {
        self.state.write().await.timeline.push(event.clone());
        Ok(())
    }

    async fn timeline(&self, work_order_id: &str) -> StoreResult<Vec<TimelineEvent>> {
        let state = self.state.read().await;
        Ok(state
            .timeline
            .iter()
            .filter(|e| e.work_order_id == work_order_id)
            .cloned()
            .collect())
    }

    async fn save_bid_request(&self, request: &BidRequest) -> StoreResult<()> {
        self.state.write().await.bid_requests.push(request.clone());
        Ok(())
    }

    async fn compliance_tasks(&self, property_id: &str) -> StoreResult<Vec<ComplianceTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<ComplianceTask> = state
            .compliance_tasks
            .values()
            .filter(|t| t.property_id == property_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.due_date);
        Ok(tasks)
    }

    async fn compliance_task(&self, id: &str) -> StoreResult<Option<ComplianceTask>> {
        Ok(self.state.read().await.compliance_tasks.get(id).cloned())
    }

    async fn save_compliance_task(&self, task: &ComplianceTask) -> StoreResult<()> {
        self.state
            .write()
            .await
            .compliance_tasks
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn save_legal_notice(&self, notice: &LegalNotice) -> StoreResult<()> {
        self.state.write().await.legal_notices.push(notice.clone());
        Ok(())
    }
}

#[async_trait]
impl RunLog for MemoryStore {
    async fn create_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.state
            .write()
            .await
            .runs
            .insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn record_progress(
        &self,
        run_id: &str,
        steps: &[Step],
        total_tokens: u64,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::not_found("run", run_id))?;
        if run.status != RunStatus::Running {
            return Err(StoreError::RunAlreadyTerminal(run_id.to_string()));
        }
        run.steps = steps.to_vec();
        run.total_tokens = total_tokens;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: &str,
        termination: &RunTermination,
        now: DateTime<Utc>,
    ) -> StoreResult<RunRecord> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::not_found("run", run_id))?;
        apply_termination(run, termination, now)?;
        Ok(run.clone())
    }

    async fn run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        Ok(self.state.read().await.runs.get(run_id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> StoreResult<Vec<RunRecord>> {
        let state = self.state.read().await;
        let mut runs: Vec<RunRecord> = state
            .runs
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn add_feedback(&self, run_id: &str, feedback: RunFeedback) -> StoreResult<RunRecord> {
        let mut state = self.state.write().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::not_found("run", run_id))?;
        validate_feedback(run, &feedback)?;
        run.feedback = Some(feedback);
        Ok(run.clone())
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<RunRecord>> {
        let state = self.state.read().await;
        Ok(state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Running && r.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EscalationStore for MemoryStore {
    async fn create_escalation(
        &self,
        new: NewEscalation,
        now: DateTime<Utc>,
    ) -> StoreResult<EscalationCreated> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .escalation_keys
            .get(&new.idempotency_key)
            .and_then(|id| state.escalations.get(id))
        {
            return Ok(EscalationCreated {
                escalation: existing.clone(),
                created: false,
            });
        }
        let escalation = new.into_escalation(now);
        state
            .escalation_keys
            .insert(escalation.idempotency_key.clone(), escalation.id.clone());
        state
            .escalations
            .insert(escalation.id.clone(), escalation.clone());
        Ok(EscalationCreated {
            escalation,
            created: true,
        })
    }

    async fn escalation(&self, id: &str) -> StoreResult<Option<Escalation>> {
        Ok(self.state.read().await.escalations.get(id).cloned())
    }

    async fn list_escalations(&self, filter: &EscalationFilter) -> StoreResult<Vec<Escalation>> {
        let state = self.state.read().await;
        let mut escalations: Vec<Escalation> = state
            .escalations
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        escalations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            escalations.truncate(limit);
        }
        Ok(escalations)
    }

    async fn update_escalation(
        &self,
        id: &str,
        update: EscalationUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Escalation> {
        let mut state = self.state.write().await;
        let escalation = state
            .escalations
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("escalation", id))?;
        update.apply(escalation, now)?;
        Ok(escalation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{EscalationReason, Priority, TaskInput, TriggerKind, WorkflowType};

    #[tokio::test]
    async fn test_run_finishes_exactly_once() {
        let store = MemoryStore::new();
        let run = RunRecord::start(
            &TaskInput::new("org-1", TriggerKind::Manual),
            WorkflowType::General,
        );
        store.create_run(&run).await.unwrap();

        let done = RunTermination::Completed {
            final_action: "done".to_string(),
        };
        let finished = store.finish_run(&run.id, &done, Utc::now()).await.unwrap();
        assert_eq!(finished.status, RunStatus::Completed);

        let again = RunTermination::Failed {
            error: "late".to_string(),
        };
        let err = store.finish_run(&run.id, &again, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::RunAlreadyTerminal(_)));

        let stored = store.run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(stored.error.is_none());

        let err = store.record_progress(&run.id, &[], 10).await.unwrap_err();
        assert!(matches!(err, StoreError::RunAlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_escalation_creation_is_idempotent_per_key() {
        let store = MemoryStore::new();
        let new = NewEscalation {
            idempotency_key: "run-1:HIGH_COST:call-1".to_string(),
            organization_id: "org-1".to_string(),
            run_id: Some("run-1".to_string()),
            work_order_id: Some("wo-1".to_string()),
            reason: EscalationReason::HighCost,
            description: "over threshold".to_string(),
            context: json!({"estimated_cost": 800}),
            suggested_action: None,
            priority: Priority::High,
        };
        let first = store
            .create_escalation(new.clone(), Utc::now())
            .await
            .unwrap();
        let second = store.create_escalation(new, Utc::now()).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.escalation.id, second.escalation.id);

        let all = store
            .list_escalations(&EscalationFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_seed_parses_from_toml() {
        let seed = PropertySeed::from_toml_str(
            r#"
            [[organizations]]
            id = "org-1"
            name = "Maple Property Group"

            [organizations.policy]
            auto_approve_threshold = 750.0
            emergency_sla_hours = 1.5

            [[vendors]]
            id = "v-1"
            organization_id = "org-1"
            name = "Rapid Rooter"
            trades = ["plumbing"]
            tier = "PREFERRED"

            [vendors.metrics]
            avg_response_hours = 1.2
            avg_rating = 4.7
            completion_rate = 0.95
            jobs_completed = 40
            "#,
        )
        .unwrap();
        assert_eq!(seed.organizations.len(), 1);
        assert_eq!(seed.organizations[0].policy.auto_approve_threshold, 750.0);
        assert_eq!(seed.organizations[0].timezone, "UTC");
        assert!(seed.vendors[0].active);
        assert!(seed.vendors[0].service_zips.is_empty());
    }

    #[test]
    fn test_seed_with_negative_sla_is_rejected() {
        let err = PropertySeed::from_toml_str(
            r#"
            [[organizations]]
            id = "org-1"
            name = "Maple Property Group"

            [organizations.policy]
            auto_approve_threshold = 500.0
            emergency_sla_hours = -4.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("emergency_sla_hours"));
        assert!(err.to_string().contains("org-1"));
    }
}
