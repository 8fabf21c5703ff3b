//! Tool catalog and dispatcher
//!
//! The reasoning service picks operations from a fixed menu. Every tool is a
//! [`ToolName`] variant; [`ToolDispatcher::execute`] maps it through an
//! exhaustive match to the handler in one of the submodules.
//!
//! Handlers report expected business conditions (unknown vendor, illegal
//! status change, missing contact details) inside their JSON result. Only
//! unexpected failures come back as [`ToolError`].

pub mod compliance;
pub mod integrations;
pub mod messaging;
pub mod vendors;
pub mod work_orders;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use shared_types::WorkOrder;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::external::{ExternalSystemError, ExternalSystems};
use crate::notify::SharedNotifier;
use crate::reasoning::ToolSpec;
use crate::store::{SharedPropertyData, StoreError};

/// Default bid window when the caller does not give one
pub const DEFAULT_BID_DEADLINE_HOURS: u32 = 48;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    CreateWorkOrder,
    UpdateWorkOrder,
    GetWorkOrder,
    GetOpenWorkOrdersForUnit,
    FindAvailableVendors,
    DispatchVendor,
    RequestVendorBids,
    SendTenantMessage,
    SendVendorMessage,
    GetTenantHistory,
    CheckComplianceStatus,
    GenerateLegalNotice,
    LogComplianceCompletion,
    SyncWorkOrderToExternal,
    GetTenantFromExternal,
    EscalateToHuman,
}

impl ToolName {
    /// Lookup by catalog name; `None` for anything outside the catalog.
    pub fn from_name(name: &str) -> Option<Self> {
        name.trim().parse().ok()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateWorkOrder => {
                "Create a work order for a maintenance issue. Check get_open_work_orders_for_unit \
                 first to avoid duplicates. New work orders are triaged on creation."
            }
            Self::UpdateWorkOrder => {
                "Update a work order's status, priority, costs or schedule. Status changes must \
                 follow the work order lifecycle."
            }
            Self::GetWorkOrder => "Fetch a work order with its timeline.",
            Self::GetOpenWorkOrdersForUnit => {
                "List work orders for a unit that are not completed or cancelled."
            }
            Self::FindAvailableVendors => {
                "Rank active vendors for a trade near a property. Returns up to five candidates \
                 with scores and reasons."
            }
            Self::DispatchVendor => {
                "Assign a vendor to a work order, issue a purchase order and notify the vendor \
                 and tenant. Costs above the organization's approval threshold need human sign-off."
            }
            Self::RequestVendorBids => {
                "Ask several vendors to bid on a work order before a deadline."
            }
            Self::SendTenantMessage => {
                "Send a message to a tenant. Uses the tenant's preferred channel unless one is given."
            }
            Self::SendVendorMessage => {
                "Send a message to a vendor. Uses the vendor's preferred channel unless one is given."
            }
            Self::GetTenantHistory => "Recent messages and work orders for a tenant.",
            Self::CheckComplianceStatus => {
                "List compliance tasks for a property with overdue and upcoming items."
            }
            Self::GenerateLegalNotice => {
                "Draft a legal notice for a tenant. Drafts are never sent automatically."
            }
            Self::LogComplianceCompletion => {
                "Mark a compliance task complete. Recurring tasks schedule their next occurrence."
            }
            Self::SyncWorkOrderToExternal => {
                "Push a work order to the organization's external property management system."
            }
            Self::GetTenantFromExternal => {
                "Look a tenant up in the organization's external property management system."
            }
            Self::EscalateToHuman => {
                "Hand the situation to a human coordinator. Use when unsure, when the tenant \
                 asks for a person, or when safety is at stake."
            }
        }
    }

    pub fn input_schema(&self) -> Value {
        let priority = json!({
            "type": "string",
            "enum": ["EMERGENCY", "HIGH", "NORMAL", "LOW"]
        });
        let channel = json!({"type": "string", "enum": ["email", "sms", "portal"]});

        match self {
            Self::CreateWorkOrder => json!({
                "type": "object",
                "properties": {
                    "property_id": {"type": "string"},
                    "unit_id": {"type": "string"},
                    "tenant_id": {"type": "string"},
                    "title": {"type": "string"},
                    "description": {"type": "string"},
                    "category": {"type": "string", "description": "Trade, e.g. plumbing, electrical, hvac"},
                    "priority": priority,
                    "estimated_cost": {"type": "number"}
                },
                "required": ["property_id", "title", "description", "category"]
            }),
            Self::UpdateWorkOrder => json!({
                "type": "object",
                "properties": {
                    "work_order_id": {"type": "string"},
                    "status": {"type": "string"},
                    "priority": priority,
                    "estimated_cost": {"type": "number"},
                    "approved_cost": {"type": "number"},
                    "actual_cost": {"type": "number"},
                    "scheduled_for": {"type": "string", "format": "date-time"},
                    "notes": {"type": "string"}
                },
                "required": ["work_order_id"]
            }),
            Self::GetWorkOrder | Self::SyncWorkOrderToExternal => json!({
                "type": "object",
                "properties": {"work_order_id": {"type": "string"}},
                "required": ["work_order_id"]
            }),
            Self::GetOpenWorkOrdersForUnit => json!({
                "type": "object",
                "properties": {"unit_id": {"type": "string"}},
                "required": ["unit_id"]
            }),
            Self::FindAvailableVendors => json!({
                "type": "object",
                "properties": {
                    "trade": {"type": "string"},
                    "property_id": {"type": "string"},
                    "zip": {"type": "string"},
                    "priority": priority
                },
                "required": ["trade"]
            }),
            Self::DispatchVendor => json!({
                "type": "object",
                "properties": {
                    "work_order_id": {"type": "string"},
                    "vendor_id": {"type": "string"},
                    "estimated_cost": {"type": "number"},
                    "scheduled_for": {"type": "string", "format": "date-time"},
                    "notes": {"type": "string"}
                },
                "required": ["work_order_id", "vendor_id"]
            }),
            Self::RequestVendorBids => json!({
                "type": "object",
                "properties": {
                    "work_order_id": {"type": "string"},
                    "vendor_ids": {"type": "array", "items": {"type": "string"}},
                    "scope": {"type": "string"},
                    "deadline_hours": {"type": "integer", "minimum": 1}
                },
                "required": ["work_order_id", "vendor_ids"]
            }),
            Self::SendTenantMessage => json!({
                "type": "object",
                "properties": {
                    "tenant_id": {"type": "string"},
                    "body": {"type": "string"},
                    "subject": {"type": "string"},
                    "channel": channel,
                    "work_order_id": {"type": "string"}
                },
                "required": ["tenant_id", "body"]
            }),
            Self::SendVendorMessage => json!({
                "type": "object",
                "properties": {
                    "vendor_id": {"type": "string"},
                    "body": {"type": "string"},
                    "subject": {"type": "string"},
                    "channel": channel,
                    "work_order_id": {"type": "string"}
                },
                "required": ["vendor_id", "body"]
            }),
            Self::GetTenantHistory => json!({
                "type": "object",
                "properties": {
                    "tenant_id": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1}
                },
                "required": ["tenant_id"]
            }),
            Self::CheckComplianceStatus => json!({
                "type": "object",
                "properties": {"property_id": {"type": "string"}},
                "required": ["property_id"]
            }),
            Self::GenerateLegalNotice => json!({
                "type": "object",
                "properties": {
                    "tenant_id": {"type": "string"},
                    "notice_type": {
                        "type": "string",
                        "description": "e.g. entry, late_rent, lease_violation, eviction, lease_termination, cure_or_quit"
                    },
                    "details": {"type": "string"}
                },
                "required": ["tenant_id", "notice_type"]
            }),
            Self::LogComplianceCompletion => json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string"},
                    "notes": {"type": "string"},
                    "document_url": {"type": "string"}
                },
                "required": ["task_id"]
            }),
            Self::GetTenantFromExternal => json!({
                "type": "object",
                "properties": {
                    "tenant_id": {"type": "string"},
                    "external_id": {"type": "string"},
                    "email": {"type": "string"}
                }
            }),
            Self::EscalateToHuman => json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "enum": ["AI_LOW_CONFIDENCE", "TENANT_REQUEST", "SAFETY_CONCERN", "LEGAL_RISK", "OTHER"]
                    },
                    "description": {"type": "string"},
                    "suggested_action": {"type": "string"},
                    "priority": priority,
                    "work_order_id": {"type": "string"}
                },
                "required": ["description"]
            }),
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// The full catalog, in declaration order.
pub fn list_tools() -> Vec<ToolSpec> {
    ToolName::iter().map(|tool| tool.spec()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: ToolName, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    External(#[from] ExternalSystemError),
}

impl ToolError {
    pub fn invalid(tool: ToolName, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool,
            message: message.into(),
        }
    }
}

/// Who is calling, and when
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub organization_id: String,
    pub run_id: Option<String>,
    pub now: DateTime<Utc>,
}

impl ToolContext {
    pub fn new(organization_id: impl Into<String>, run_id: Option<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            run_id,
            now: Utc::now(),
        }
    }
}

pub struct ToolDispatcher {
    pub(crate) data: SharedPropertyData,
    pub(crate) notifier: SharedNotifier,
    pub(crate) external: ExternalSystems,
}

impl ToolDispatcher {
    pub fn new(data: SharedPropertyData, notifier: SharedNotifier) -> Self {
        Self {
            data,
            notifier,
            external: ExternalSystems::new(),
        }
    }

    pub fn with_external_systems(mut self, external: ExternalSystems) -> Self {
        self.external = external;
        self
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        list_tools()
    }

    /// The stored work order a call names through `work_order_id`, if it
    /// belongs to `organization_id`.
    pub async fn target_work_order(
        &self,
        organization_id: &str,
        input: &Value,
    ) -> Result<Option<WorkOrder>, StoreError> {
        let Some(id) = input.get("work_order_id").and_then(Value::as_str) else {
            return Ok(None);
        };
        Ok(self
            .data
            .work_order(id.trim())
            .await?
            .filter(|order| order.organization_id == organization_id))
    }

    pub async fn execute(
        &self,
        tool: ToolName,
        input: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        match tool {
            ToolName::CreateWorkOrder => work_orders::create(self, parse_input(tool, input)?, ctx).await,
            ToolName::UpdateWorkOrder => work_orders::update(self, parse_input(tool, input)?, ctx).await,
            ToolName::GetWorkOrder => work_orders::get(self, parse_input(tool, input)?, ctx).await,
            ToolName::GetOpenWorkOrdersForUnit => {
                work_orders::open_for_unit(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::FindAvailableVendors => {
                vendors::find_available(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::DispatchVendor => {
                work_orders::dispatch_vendor(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::RequestVendorBids => {
                work_orders::request_bids(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::SendTenantMessage => {
                messaging::send_tenant_message(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::SendVendorMessage => {
                messaging::send_vendor_message(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::GetTenantHistory => {
                messaging::tenant_history(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::CheckComplianceStatus => {
                compliance::check_status(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::GenerateLegalNotice => {
                compliance::generate_legal_notice(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::LogComplianceCompletion => {
                compliance::log_completion(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::SyncWorkOrderToExternal => {
                integrations::sync_work_order(self, parse_input(tool, input)?, ctx).await
            }
            ToolName::GetTenantFromExternal => {
                integrations::tenant_from_external(self, parse_input(tool, input)?, ctx).await
            }
            // The guardrail engine intercepts every self-escalation before
            // dispatch; reaching here means it was called outside a run.
            ToolName::EscalateToHuman => Ok(json!({
                "acknowledged": true,
                "escalated": false,
                "message": "escalations are only opened from within a run"
            })),
        }
    }
}

fn parse_input<T: DeserializeOwned>(tool: ToolName, input: Value) -> Result<T, ToolError> {
    let input = if input.is_null() { json!({}) } else { input };
    serde_json::from_value(input).map_err(|e| ToolError::invalid(tool, e.to_string()))
}

/// Result for an expected failure the reasoning service should react to.
pub(crate) fn failure(message: impl Into<String>) -> Value {
    json!({"success": false, "error": message.into()})
}

pub(crate) fn not_found(kind: &str, id: &str) -> Value {
    json!({"success": false, "found": false, "error": format!("{kind} {id} not found")})
}

/// Dollar amount from a JSON number or a string like `"$1,250.00"`.
pub fn parse_cost(value: &Value) -> Option<f64> {
    let cost = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .trim()
            .parse()
            .ok(),
        _ => None,
    };
    cost.filter(|c: &f64| c.is_finite())
}

/// Serde adapter for optional cost fields, accepting what [`parse_cost`] does.
pub(crate) fn optional_cost<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_cost(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid cost: {value}"))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::notify::RecordingNotifier;
    use crate::store::{MemoryStore, PropertyData};
    use chrono::Duration;
    use shared_types::{
        Channel, Organization, OrganizationPolicy, Priority, Property, Tenant, Vendor,
        VendorMetrics, VendorTier, WorkOrder, WorkOrderStatus,
    };
    use std::sync::Arc;

    pub struct Fixture {
        pub store: Arc<MemoryStore>,
        pub notifier: Arc<RecordingNotifier>,
        pub dispatcher: ToolDispatcher,
        pub ctx: ToolContext,
    }

    pub fn vendor(id: &str, trade: &str, tier: VendorTier, response_hours: f64, rating: f64) -> Vendor {
        Vendor {
            id: id.to_string(),
            organization_id: "org-1".to_string(),
            name: format!("Vendor {id}"),
            trades: vec![trade.to_string()],
            service_zips: vec![],
            tier,
            active: true,
            email: Some(format!("{id}@vendors.example.com")),
            phone: None,
            preferred_channel: Channel::Email,
            metrics: VendorMetrics {
                avg_response_hours: Some(response_hours),
                avg_rating: Some(rating),
                completion_rate: Some(0.9),
                jobs_completed: 12,
            },
        }
    }

    pub fn work_order(id: &str, status: WorkOrderStatus) -> WorkOrder {
        let now = Utc::now() - Duration::hours(1);
        WorkOrder {
            id: id.to_string(),
            organization_id: "org-1".to_string(),
            property_id: "prop-1".to_string(),
            unit_id: Some("unit-4b".to_string()),
            tenant_id: Some("tenant-1".to_string()),
            vendor_id: None,
            title: "Leaking sink".to_string(),
            description: "Kitchen sink drips under the cabinet".to_string(),
            category: "plumbing".to_string(),
            priority: Priority::Normal,
            status,
            estimated_cost: None,
            approved_cost: None,
            actual_cost: None,
            po_number: None,
            scheduled_for: None,
            dispatched_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_organization(Organization {
                id: "org-1".to_string(),
                name: "Maple Property Group".to_string(),
                timezone: "UTC".to_string(),
                policy: OrganizationPolicy::default(),
                staff: vec![],
            })
            .await;
        store
            .insert_property(Property {
                id: "prop-1".to_string(),
                organization_id: "org-1".to_string(),
                name: "Maple Court".to_string(),
                address: "12 Maple Ct".to_string(),
                zip: "94110".to_string(),
            })
            .await;
        store
            .insert_tenant(Tenant {
                id: "tenant-1".to_string(),
                organization_id: "org-1".to_string(),
                name: "Dana Reyes".to_string(),
                email: Some("dana@example.com".to_string()),
                phone: Some("+15550100".to_string()),
                property_id: Some("prop-1".to_string()),
                unit_id: Some("unit-4b".to_string()),
                preferred_channel: Channel::Sms,
                external_id: Some("ext-77".to_string()),
            })
            .await;
        store
            .insert_vendor(vendor("v-1", "plumbing", VendorTier::Preferred, 0.5, 4.9))
            .await;

        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = ToolDispatcher::new(store.clone(), notifier.clone());
        Fixture {
            store,
            notifier,
            dispatcher,
            ctx: ToolContext::new("org-1", Some("run-1".to_string())),
        }
    }

    pub async fn seed_work_order(store: &MemoryStore, order: WorkOrder) {
        store.save_work_order(&order).await.unwrap();
    }
}
