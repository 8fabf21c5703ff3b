//! External property system tools

use serde::Deserialize;
use serde_json::{json, Value};
use shared_types::{new_record_id, TimelineEvent};

use super::{not_found, ToolContext, ToolDispatcher, ToolError, ToolName};
use crate::external::TenantLookup;

#[derive(Debug, Deserialize)]
pub struct SyncInput {
    pub work_order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ExternalTenantInput {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn not_configured() -> Value {
    json!({
        "configured": false,
        "message": "no external property system is configured for this organization",
    })
}

pub(crate) async fn sync_work_order(
    dispatcher: &ToolDispatcher,
    input: SyncInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let order = dispatcher
        .data
        .work_order(&input.work_order_id)
        .await?
        .filter(|o| o.organization_id == ctx.organization_id);
    let Some(order) = order else {
        return Ok(not_found("work order", &input.work_order_id));
    };
    let Some(connector) = dispatcher.external.connector(&ctx.organization_id) else {
        let mut result = not_configured();
        result["synced"] = json!(false);
        return Ok(result);
    };

    let receipt = connector.push_work_order(&order).await?;
    dispatcher
        .data
        .record_timeline_event(&TimelineEvent {
            id: new_record_id(),
            work_order_id: order.id.clone(),
            kind: "external_sync".to_string(),
            from_status: None,
            to_status: None,
            detail: format!(
                "Synced to {} as {}",
                connector.system_name(),
                receipt.external_id
            ),
            at: ctx.now,
        })
        .await?;

    Ok(json!({
        "configured": true,
        "synced": true,
        "system": connector.system_name(),
        "external_id": receipt.external_id,
        "url": receipt.url,
    }))
}

pub(crate) async fn tenant_from_external(
    dispatcher: &ToolDispatcher,
    input: ExternalTenantInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let mut lookup = TenantLookup {
        external_id: input.external_id,
        email: input.email,
        unit_id: None,
    };
    if let Some(tenant_id) = input.tenant_id.as_deref() {
        let tenant = dispatcher
            .data
            .tenant(tenant_id)
            .await?
            .filter(|t| t.organization_id == ctx.organization_id);
        let Some(tenant) = tenant else {
            return Ok(not_found("tenant", tenant_id));
        };
        lookup.external_id = lookup.external_id.or(tenant.external_id);
        lookup.email = lookup.email.or(tenant.email);
        lookup.unit_id = tenant.unit_id;
    }
    if lookup.is_empty() {
        return Err(ToolError::invalid(
            ToolName::GetTenantFromExternal,
            "one of tenant_id, external_id or email is required",
        ));
    }

    let Some(connector) = dispatcher.external.connector(&ctx.organization_id) else {
        let mut result = not_configured();
        result["found"] = json!(false);
        return Ok(result);
    };

    let tenant = connector.fetch_tenant(&lookup).await?;
    Ok(json!({
        "configured": true,
        "system": connector.system_name(),
        "found": tenant.is_some(),
        "tenant": tenant,
    }))
}
