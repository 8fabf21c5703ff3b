//! Work order tools: create, update, read, dispatch and bid requests

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use shared_types::{
    new_entity_id, new_record_id, BidRequest, Priority, RecipientKind, TimelineEvent, Vendor,
    VendorTier, WorkOrder, WorkOrderStatus,
};

use super::messaging::{deliver, Delivery};
use super::{
    failure, not_found, optional_cost, ToolContext, ToolDispatcher, ToolError, ToolName,
    DEFAULT_BID_DEADLINE_HOURS,
};
use crate::work_order::{allowed_transitions, transition};

#[derive(Debug, Deserialize)]
pub struct CreateWorkOrderInput {
    pub property_id: String,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "estimatedCost", deserialize_with = "optional_cost")]
    pub estimated_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkOrderInput {
    pub work_order_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "estimatedCost", deserialize_with = "optional_cost")]
    pub estimated_cost: Option<f64>,
    #[serde(default, deserialize_with = "optional_cost")]
    pub approved_cost: Option<f64>,
    #[serde(default, deserialize_with = "optional_cost")]
    pub actual_cost: Option<f64>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkOrderRef {
    pub work_order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UnitRef {
    pub unit_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DispatchVendorInput {
    pub work_order_id: String,
    pub vendor_id: String,
    #[serde(default, alias = "estimatedCost", deserialize_with = "optional_cost")]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestBidsInput {
    pub work_order_id: String,
    pub vendor_ids: Vec<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub deadline_hours: Option<u32>,
}

pub(crate) fn summary(order: &WorkOrder) -> Value {
    json!({
        "id": order.id,
        "title": order.title,
        "category": order.category,
        "priority": order.priority.as_str(),
        "status": order.status.as_str(),
        "vendor_id": order.vendor_id,
        "unit_id": order.unit_id,
        "created_at": order.created_at,
    })
}

fn parse_priority(tool: ToolName, raw: Option<&str>) -> Result<Option<Priority>, ToolError> {
    raw.map(|p| {
        Priority::parse(p).ok_or_else(|| ToolError::invalid(tool, format!("unknown priority '{p}'")))
    })
    .transpose()
}

async fn load_order(
    dispatcher: &ToolDispatcher,
    id: &str,
    ctx: &ToolContext,
) -> Result<Option<WorkOrder>, ToolError> {
    Ok(dispatcher
        .data
        .work_order(id)
        .await?
        .filter(|o| o.organization_id == ctx.organization_id))
}

async fn record_events(
    dispatcher: &ToolDispatcher,
    events: &[TimelineEvent],
) -> Result<(), ToolError> {
    for event in events {
        dispatcher.data.record_timeline_event(event).await?;
    }
    Ok(())
}

fn event(order_id: &str, kind: &str, detail: String, at: DateTime<Utc>) -> TimelineEvent {
    TimelineEvent {
        id: new_record_id(),
        work_order_id: order_id.to_string(),
        kind: kind.to_string(),
        from_status: None,
        to_status: None,
        detail,
        at,
    }
}

fn transition_failure(order: &WorkOrder, message: String) -> Value {
    let allowed: Vec<&str> = allowed_transitions(order.status)
        .iter()
        .map(|s| s.as_str())
        .collect();
    json!({
        "success": false,
        "error": message,
        "current_status": order.status.as_str(),
        "allowed_transitions": allowed,
    })
}

pub(crate) async fn create(
    dispatcher: &ToolDispatcher,
    input: CreateWorkOrderInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let priority = parse_priority(ToolName::CreateWorkOrder, input.priority.as_deref())?
        .unwrap_or_default();

    let property = dispatcher
        .data
        .property(&input.property_id)
        .await?
        .filter(|p| p.organization_id == ctx.organization_id);
    let Some(property) = property else {
        return Ok(not_found("property", &input.property_id));
    };

    if let Some(tenant_id) = input.tenant_id.as_deref() {
        let tenant = dispatcher
            .data
            .tenant(tenant_id)
            .await?
            .filter(|t| t.organization_id == ctx.organization_id);
        if tenant.is_none() {
            return Ok(not_found("tenant", tenant_id));
        }
    }

    let mut order = WorkOrder {
        id: new_entity_id(),
        organization_id: ctx.organization_id.clone(),
        property_id: property.id.clone(),
        unit_id: input.unit_id,
        tenant_id: input.tenant_id,
        vendor_id: None,
        title: input.title,
        description: input.description,
        category: input.category.trim().to_ascii_lowercase(),
        priority,
        status: WorkOrderStatus::New,
        estimated_cost: input.estimated_cost,
        approved_cost: None,
        actual_cost: None,
        po_number: None,
        scheduled_for: None,
        dispatched_at: None,
        completed_at: None,
        created_at: ctx.now,
        updated_at: ctx.now,
    };

    let created = event(
        &order.id,
        "created",
        format!("Created as {} {}", priority.as_str(), order.category),
        ctx.now,
    );
    // Category and priority come from the caller's classification, which is triage.
    let triaged = match transition(&mut order, WorkOrderStatus::Triaged, ctx.now) {
        Ok(event) => event,
        Err(e) => return Ok(failure(e.to_string())),
    };

    dispatcher.data.save_work_order(&order).await?;
    record_events(dispatcher, &[created, triaged]).await?;

    tracing::info!(
        org_id = %ctx.organization_id,
        work_order_id = %order.id,
        priority = priority.as_str(),
        "Work order created"
    );

    Ok(json!({
        "success": true,
        "work_order_id": order.id,
        "status": order.status.as_str(),
        "priority": order.priority.as_str(),
        "property": property.name,
    }))
}

pub(crate) async fn update(
    dispatcher: &ToolDispatcher,
    input: UpdateWorkOrderInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let priority = parse_priority(ToolName::UpdateWorkOrder, input.priority.as_deref())?;
    let Some(mut order) = load_order(dispatcher, &input.work_order_id, ctx).await? else {
        return Ok(not_found("work order", &input.work_order_id));
    };

    let mut events = Vec::new();
    if let Some(raw) = input.status.as_deref() {
        let Some(target) = WorkOrderStatus::parse(raw) else {
            return Ok(transition_failure(
                &order,
                format!("unknown work order status '{raw}'"),
            ));
        };
        match transition(&mut order, target, ctx.now) {
            Ok(event) => events.push(event),
            Err(e) => return Ok(transition_failure(&order, e.to_string())),
        }
    }

    if let Some(priority) = priority {
        if priority != order.priority {
            events.push(event(
                &order.id,
                "priority_changed",
                format!("{} -> {}", order.priority.as_str(), priority.as_str()),
                ctx.now,
            ));
            order.priority = priority;
        }
    }
    if input.estimated_cost.is_some() {
        order.estimated_cost = input.estimated_cost;
    }
    if input.approved_cost.is_some() {
        order.approved_cost = input.approved_cost;
    }
    if input.actual_cost.is_some() {
        order.actual_cost = input.actual_cost;
    }
    if let Some(at) = input.scheduled_for {
        order.scheduled_for = Some(at);
        events.push(event(&order.id, "scheduled", format!("Scheduled for {at}"), ctx.now));
    }
    if let Some(notes) = input.notes.filter(|n| !n.trim().is_empty()) {
        events.push(event(&order.id, "note", notes, ctx.now));
    }
    order.updated_at = ctx.now;

    dispatcher.data.save_work_order(&order).await?;
    record_events(dispatcher, &events).await?;

    Ok(json!({
        "success": true,
        "work_order": summary(&order),
    }))
}

pub(crate) async fn get(
    dispatcher: &ToolDispatcher,
    input: WorkOrderRef,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let Some(order) = load_order(dispatcher, &input.work_order_id, ctx).await? else {
        return Ok(not_found("work order", &input.work_order_id));
    };
    let timeline = dispatcher.data.timeline(&order.id).await?;
    Ok(json!({
        "found": true,
        "work_order": order,
        "timeline": timeline,
    }))
}

pub(crate) async fn open_for_unit(
    dispatcher: &ToolDispatcher,
    input: UnitRef,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let orders = dispatcher
        .data
        .open_work_orders_for_unit(&ctx.organization_id, &input.unit_id)
        .await?;
    Ok(json!({
        "unit_id": input.unit_id,
        "count": orders.len(),
        "work_orders": orders.iter().map(summary).collect::<Vec<_>>(),
    }))
}

/// `PO-YYYYMMDD-XXXXXX`
pub fn purchase_order_number(now: DateTime<Utc>) -> String {
    let id = new_record_id();
    let suffix = &id[id.len().saturating_sub(6)..];
    format!("PO-{}-{}", now.format("%Y%m%d"), suffix)
}

fn dispatchable(vendor: &Vendor, ctx: &ToolContext) -> Result<(), String> {
    if vendor.organization_id != ctx.organization_id {
        return Err(format!("vendor {} not found", vendor.id));
    }
    if !vendor.active || vendor.tier == VendorTier::Suspended {
        return Err(format!("vendor {} is not available for dispatch", vendor.name));
    }
    Ok(())
}

pub(crate) async fn dispatch_vendor(
    dispatcher: &ToolDispatcher,
    input: DispatchVendorInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let Some(mut order) = load_order(dispatcher, &input.work_order_id, ctx).await? else {
        return Ok(not_found("work order", &input.work_order_id));
    };
    let Some(vendor) = dispatcher.data.vendor(&input.vendor_id).await? else {
        return Ok(not_found("vendor", &input.vendor_id));
    };
    if let Err(message) = dispatchable(&vendor, ctx) {
        return Ok(failure(message));
    }

    let original = order.clone();
    let mut events = Vec::new();
    // A triaged order passes through vendor search on the way to dispatch.
    let path: &[WorkOrderStatus] = if order.status == WorkOrderStatus::Triaged {
        &[WorkOrderStatus::VendorSearch, WorkOrderStatus::Dispatched]
    } else {
        &[WorkOrderStatus::Dispatched]
    };
    for next in path {
        match transition(&mut order, *next, ctx.now) {
            Ok(event) => events.push(event),
            Err(e) => return Ok(transition_failure(&original, e.to_string())),
        }
    }

    let po_number = purchase_order_number(ctx.now);
    order.vendor_id = Some(vendor.id.clone());
    order.po_number = Some(po_number.clone());
    if input.estimated_cost.is_some() {
        order.estimated_cost = input.estimated_cost;
        order.approved_cost = input.estimated_cost;
    }
    if input.scheduled_for.is_some() {
        order.scheduled_for = input.scheduled_for;
    }

    dispatcher.data.save_work_order(&order).await?;
    events.push(event(
        &order.id,
        "vendor_dispatched",
        format!("{} dispatched under {po_number}", vendor.name),
        ctx.now,
    ));
    record_events(dispatcher, &events).await?;

    let mut vendor_body = format!(
        "New work order {po_number}: {}\n{}",
        order.title, order.description
    );
    if let Some(notes) = input.notes.as_deref() {
        vendor_body.push_str(&format!("\nNotes: {notes}"));
    }
    let vendor_notice = deliver(
        dispatcher,
        ctx,
        Delivery {
            recipient_kind: RecipientKind::Vendor,
            recipient_id: &vendor.id,
            channel: vendor.preferred_channel,
            email: vendor.email.as_deref(),
            phone: vendor.phone.as_deref(),
            subject: Some(format!("Dispatch {po_number}")),
            body: vendor_body,
            work_order_id: Some(&order.id),
        },
    )
    .await?;

    let tenant_notice = match order.tenant_id.as_deref() {
        Some(tenant_id) => match dispatcher.data.tenant(tenant_id).await? {
            Some(tenant) => {
                deliver(
                    dispatcher,
                    ctx,
                    Delivery {
                        recipient_kind: RecipientKind::Tenant,
                        recipient_id: &tenant.id,
                        channel: tenant.preferred_channel,
                        email: tenant.email.as_deref(),
                        phone: tenant.phone.as_deref(),
                        subject: Some(format!("Update on: {}", order.title)),
                        body: format!(
                            "{} has been assigned to your request \"{}\".",
                            vendor.name, order.title
                        ),
                        work_order_id: Some(&order.id),
                    },
                )
                .await?
            }
            None => json!({"sent": false, "error": format!("tenant {tenant_id} not found")}),
        },
        None => Value::Null,
    };

    tracing::info!(
        org_id = %ctx.organization_id,
        work_order_id = %order.id,
        vendor_id = %vendor.id,
        po_number = %po_number,
        "Vendor dispatched"
    );

    Ok(json!({
        "success": true,
        "work_order_id": order.id,
        "vendor_id": vendor.id,
        "vendor_name": vendor.name,
        "po_number": po_number,
        "status": order.status.as_str(),
        "notifications": {
            "vendor": vendor_notice,
            "tenant": tenant_notice,
        },
    }))
}

pub(crate) async fn request_bids(
    dispatcher: &ToolDispatcher,
    input: RequestBidsInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    if input.vendor_ids.is_empty() {
        return Err(ToolError::invalid(
            ToolName::RequestVendorBids,
            "vendor_ids must not be empty",
        ));
    }
    let Some(mut order) = load_order(dispatcher, &input.work_order_id, ctx).await? else {
        return Ok(not_found("work order", &input.work_order_id));
    };

    let mut vendors = Vec::new();
    let mut skipped = Vec::new();
    for vendor_id in &input.vendor_ids {
        match dispatcher.data.vendor(vendor_id).await? {
            Some(vendor) if dispatchable(&vendor, ctx).is_ok() => vendors.push(vendor),
            _ => skipped.push(vendor_id.clone()),
        }
    }
    if vendors.is_empty() {
        return Ok(json!({
            "success": false,
            "error": "none of the requested vendors can bid",
            "skipped": skipped,
        }));
    }

    let status_event = match transition(&mut order, WorkOrderStatus::PendingBids, ctx.now) {
        Ok(event) => event,
        Err(e) => {
            return Ok(transition_failure(&order, e.to_string()));
        }
    };
    dispatcher.data.save_work_order(&order).await?;

    let hours = input.deadline_hours.unwrap_or(DEFAULT_BID_DEADLINE_HOURS).max(1);
    let deadline = ctx.now + Duration::hours(i64::from(hours));
    let scope = input
        .scope
        .unwrap_or_else(|| format!("{}\n{}", order.title, order.description));

    let mut requested = Vec::with_capacity(vendors.len());
    for vendor in &vendors {
        let request = BidRequest {
            id: new_record_id(),
            work_order_id: order.id.clone(),
            vendor_id: vendor.id.clone(),
            scope: scope.clone(),
            deadline,
            created_at: ctx.now,
        };
        dispatcher.data.save_bid_request(&request).await?;

        let notice = deliver(
            dispatcher,
            ctx,
            Delivery {
                recipient_kind: RecipientKind::Vendor,
                recipient_id: &vendor.id,
                channel: vendor.preferred_channel,
                email: vendor.email.as_deref(),
                phone: vendor.phone.as_deref(),
                subject: Some(format!("Bid request: {}", order.title)),
                body: format!("Please submit a bid by {deadline}.\n{scope}"),
                work_order_id: Some(&order.id),
            },
        )
        .await?;
        requested.push(json!({
            "vendor_id": vendor.id,
            "bid_request_id": request.id,
            "notification": notice,
        }));
    }

    record_events(
        dispatcher,
        &[
            status_event,
            event(
                &order.id,
                "bids_requested",
                format!("Bids requested from {} vendors", vendors.len()),
                ctx.now,
            ),
        ],
    )
    .await?;

    Ok(json!({
        "success": true,
        "work_order_id": order.id,
        "status": order.status.as_str(),
        "deadline": deadline,
        "requested": requested,
        "skipped": skipped,
    }))
}
