//! Tenant and vendor communication tools

use serde::Deserialize;
use serde_json::{json, Value};
use shared_types::{new_record_id, Channel, MessageDirection, MessageRecord, RecipientKind};

use super::work_orders::summary;
use super::{not_found, ToolContext, ToolDispatcher, ToolError, ToolName};
use crate::notify::{resolve_address, Notification};

const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct TenantMessageInput {
    pub tenant_id: String,
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub work_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VendorMessageInput {
    pub vendor_id: String,
    pub body: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub work_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TenantHistoryInput {
    pub tenant_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One outbound message to a known recipient
pub(crate) struct Delivery<'a> {
    pub recipient_kind: RecipientKind,
    pub recipient_id: &'a str,
    pub channel: Channel,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub subject: Option<String>,
    pub body: String,
    pub work_order_id: Option<&'a str>,
}

/// Send through the notifier and log the message on success.
///
/// Delivery problems are part of the result; only storage errors escape.
pub(crate) async fn deliver(
    dispatcher: &ToolDispatcher,
    ctx: &ToolContext,
    delivery: Delivery<'_>,
) -> Result<Value, ToolError> {
    let address = match resolve_address(
        delivery.recipient_id,
        delivery.channel,
        delivery.email,
        delivery.phone,
    ) {
        Ok(address) => address,
        Err(e) => {
            return Ok(json!({
                "sent": false,
                "channel": delivery.channel.as_str(),
                "error": e.to_string(),
            }))
        }
    };

    let notification = Notification {
        organization_id: ctx.organization_id.clone(),
        recipient_kind: delivery.recipient_kind,
        recipient_id: delivery.recipient_id.to_string(),
        channel: delivery.channel,
        address,
        subject: delivery.subject,
        body: delivery.body,
    };

    if let Err(e) = dispatcher.notifier.send(&notification).await {
        tracing::warn!(
            org_id = %ctx.organization_id,
            recipient_id = %notification.recipient_id,
            error = %e,
            "Notification delivery failed"
        );
        return Ok(json!({
            "sent": false,
            "channel": notification.channel.as_str(),
            "error": e.to_string(),
        }));
    }

    let record = MessageRecord {
        id: new_record_id(),
        organization_id: ctx.organization_id.clone(),
        recipient_kind: notification.recipient_kind,
        recipient_id: notification.recipient_id,
        channel: notification.channel,
        subject: notification.subject,
        body: notification.body,
        direction: MessageDirection::Outbound,
        work_order_id: delivery.work_order_id.map(str::to_string),
        sent_at: ctx.now,
    };
    dispatcher.data.record_message(&record).await?;

    Ok(json!({
        "sent": true,
        "channel": record.channel.as_str(),
        "message_id": record.id,
    }))
}

fn channel_override(tool: ToolName, raw: Option<&str>) -> Result<Option<Channel>, ToolError> {
    raw.map(|c| {
        Channel::parse(c).ok_or_else(|| ToolError::invalid(tool, format!("unknown channel '{c}'")))
    })
    .transpose()
}

pub(crate) async fn send_tenant_message(
    dispatcher: &ToolDispatcher,
    input: TenantMessageInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let channel = channel_override(ToolName::SendTenantMessage, input.channel.as_deref())?;
    let tenant = dispatcher
        .data
        .tenant(&input.tenant_id)
        .await?
        .filter(|t| t.organization_id == ctx.organization_id);
    let Some(tenant) = tenant else {
        return Ok(not_found("tenant", &input.tenant_id));
    };

    deliver(
        dispatcher,
        ctx,
        Delivery {
            recipient_kind: RecipientKind::Tenant,
            recipient_id: &tenant.id,
            channel: channel.unwrap_or(tenant.preferred_channel),
            email: tenant.email.as_deref(),
            phone: tenant.phone.as_deref(),
            subject: input.subject,
            body: input.body,
            work_order_id: input.work_order_id.as_deref(),
        },
    )
    .await
}

pub(crate) async fn send_vendor_message(
    dispatcher: &ToolDispatcher,
    input: VendorMessageInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let channel = channel_override(ToolName::SendVendorMessage, input.channel.as_deref())?;
    let vendor = dispatcher
        .data
        .vendor(&input.vendor_id)
        .await?
        .filter(|v| v.organization_id == ctx.organization_id);
    let Some(vendor) = vendor else {
        return Ok(not_found("vendor", &input.vendor_id));
    };

    deliver(
        dispatcher,
        ctx,
        Delivery {
            recipient_kind: RecipientKind::Vendor,
            recipient_id: &vendor.id,
            channel: channel.unwrap_or(vendor.preferred_channel),
            email: vendor.email.as_deref(),
            phone: vendor.phone.as_deref(),
            subject: input.subject,
            body: input.body,
            work_order_id: input.work_order_id.as_deref(),
        },
    )
    .await
}

pub(crate) async fn tenant_history(
    dispatcher: &ToolDispatcher,
    input: TenantHistoryInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let tenant = dispatcher
        .data
        .tenant(&input.tenant_id)
        .await?
        .filter(|t| t.organization_id == ctx.organization_id);
    let Some(tenant) = tenant else {
        return Ok(not_found("tenant", &input.tenant_id));
    };

    let limit = input.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let messages = dispatcher
        .data
        .messages_for_recipient(&tenant.id, limit)
        .await?;
    let work_orders = dispatcher.data.work_orders_for_tenant(&tenant.id).await?;

    Ok(json!({
        "found": true,
        "tenant": {
            "id": tenant.id,
            "name": tenant.name,
            "unit_id": tenant.unit_id,
            "preferred_channel": tenant.preferred_channel.as_str(),
        },
        "messages": messages.iter().map(|m| json!({
            "channel": m.channel.as_str(),
            "direction": m.direction,
            "subject": m.subject,
            "body": m.body,
            "sent_at": m.sent_at,
        })).collect::<Vec<_>>(),
        "work_orders": work_orders.iter().take(limit).map(summary).collect::<Vec<_>>(),
    }))
}
