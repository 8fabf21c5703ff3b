//! Shared fixtures for orchestrator integration tests.
//!
//! `ScriptedReasoner` replays a fixed queue of responses and records every
//! request it saw, so tests can assert on both the loop's behavior and what
//! it fed back to the reasoning service.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator::app_state::{AppState, AppStateParts};
use orchestrator::external::ExternalSystems;
use orchestrator::notify::RecordingNotifier;
use orchestrator::reasoning::{
    ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningService, TokenUsage,
    ToolCallRequest,
};
use orchestrator::runner::RunnerConfig;
use orchestrator::store::MemoryStore;
use serde_json::Value;
use shared_types::{
    Channel, Organization, OrganizationPolicy, Priority, Property, StaffMember, StaffRole, Tenant,
    Vendor, VendorMetrics, VendorTier, WorkOrder, WorkOrderStatus,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const ORG: &str = "org-1";

pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<ReasoningResponse, ReasoningError>>>,
    /// Returned once the script is exhausted; `None` fails the call instead
    repeat: Option<ReasoningResponse>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    pub fn new(script: Vec<ReasoningResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ReasoningError) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([Err(error)])),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with the same response.
    pub fn repeating(response: ReasoningResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        self.requests.lock().await.push(request.clone());
        match self.script.lock().await.pop_front() {
            Some(next) => next,
            None => self.repeat.clone().ok_or_else(|| {
                ReasoningError::InvalidResponse("script exhausted".to_string())
            }),
        }
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

pub fn tool_calls(text: &str, calls: Vec<ToolCallRequest>) -> ReasoningResponse {
    ReasoningResponse {
        text: Some(text.to_string()),
        tool_calls: calls,
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        },
        stop_reason: Some("tool_use".to_string()),
    }
}

pub fn final_answer(text: &str) -> ReasoningResponse {
    ReasoningResponse {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            input_tokens: 120,
            output_tokens: 30,
        },
        stop_reason: Some("end_turn".to_string()),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub reasoner: Arc<ScriptedReasoner>,
    pub state: AppState,
}

impl Harness {
    pub async fn new(reasoner: ScriptedReasoner) -> Self {
        Self::with_config(reasoner, RunnerConfig::default()).await
    }

    pub async fn with_config(reasoner: ScriptedReasoner, runner: RunnerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let notifier = Arc::new(RecordingNotifier::new());
        let reasoner = Arc::new(reasoner);
        let state = AppState::new(AppStateParts {
            data: store.clone(),
            run_log: store.clone(),
            escalations: store.clone(),
            reasoner: reasoner.clone(),
            notifier: notifier.clone(),
            external: ExternalSystems::new(),
            runner,
        });
        Self {
            store,
            notifier,
            reasoner,
            state,
        }
    }
}

pub fn vendor(id: &str, response_hours: f64, rating: f64) -> Vendor {
    Vendor {
        id: id.to_string(),
        organization_id: ORG.to_string(),
        name: format!("Vendor {id}"),
        trades: vec!["plumbing".to_string()],
        service_zips: vec!["94110".to_string()],
        tier: VendorTier::Standard,
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

pub fn work_order(id: &str, status: WorkOrderStatus, priority: Priority) -> WorkOrder {
    let now = Utc::now();
    WorkOrder {
        id: id.to_string(),
        organization_id: ORG.to_string(),
        property_id: "prop-1".to_string(),
        unit_id: Some("unit-4b".to_string()),
        tenant_id: Some("tenant-1".to_string()),
        vendor_id: None,
        title: "Kitchen sink leaking".to_string(),
        description: "Water pooling under the kitchen sink".to_string(),
        category: "plumbing".to_string(),
        priority,
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

pub fn work_order_created_at(
    id: &str,
    status: WorkOrderStatus,
    priority: Priority,
    created_at: DateTime<Utc>,
) -> WorkOrder {
    WorkOrder {
        created_at,
        updated_at: created_at,
        ..work_order(id, status, priority)
    }
}

pub async fn seed(store: &MemoryStore) {
    store
        .insert_organization(Organization {
            id: ORG.to_string(),
            name: "Maple Property Group".to_string(),
            timezone: "America/Denver".to_string(),
            policy: OrganizationPolicy {
                auto_approve_threshold: 500.0,
                emergency_sla_hours: 2.0,
            },
            staff: vec![
                StaffMember {
                    id: "staff-coord".to_string(),
                    name: "Jordan Alvarez".to_string(),
                    role: StaffRole::Coordinator,
                    email: Some("jordan@maple.example.com".to_string()),
                    phone: None,
                    preferred_channel: Channel::Email,
                },
                StaffMember {
                    id: "staff-member".to_string(),
                    name: "Sam Ito".to_string(),
                    role: StaffRole::Member,
                    email: Some("sam@maple.example.com".to_string()),
                    phone: None,
                    preferred_channel: Channel::Email,
                },
            ],
        })
        .await;
    store
        .insert_property(Property {
            id: "prop-1".to_string(),
            organization_id: ORG.to_string(),
            name: "Elm Street Apartments".to_string(),
            address: "412 Elm Street".to_string(),
            zip: "94110".to_string(),
        })
        .await;
    store
        .insert_tenant(Tenant {
            id: "tenant-1".to_string(),
            organization_id: ORG.to_string(),
            name: "Dana Reyes".to_string(),
            email: Some("dana@example.com".to_string()),
            phone: Some("+15550100".to_string()),
            property_id: Some("prop-1".to_string()),
            unit_id: Some("unit-4b".to_string()),
            preferred_channel: Channel::Sms,
            external_id: None,
        })
        .await;
    store.insert_vendor(vendor("v-fast", 0.5, 4.9)).await;
    store.insert_vendor(vendor("v-slow", 3.0, 4.0)).await;
}
