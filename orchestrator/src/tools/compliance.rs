//! Compliance tracking and legal notice drafting

use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value};
use shared_types::{new_record_id, ComplianceStatus, ComplianceTask, LegalNotice};

use super::{failure, not_found, ToolContext, ToolDispatcher, ToolError, ToolName};

/// Notice types that always need a human decision.
pub const HIGH_RISK_NOTICE_TYPES: [&str; 3] = ["eviction", "lease_termination", "cure_or_quit"];

const UPCOMING_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct PropertyRef {
    pub property_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LegalNoticeInput {
    pub tenant_id: String,
    pub notice_type: String,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionInput {
    pub task_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
}

/// `"Cure-or-Quit"` and `"cure or quit"` both become `"cure_or_quit"`.
pub fn normalize_notice_type(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn is_high_risk_notice(raw: &str) -> bool {
    let normalized = normalize_notice_type(raw);
    HIGH_RISK_NOTICE_TYPES.contains(&normalized.as_str())
}

pub(crate) async fn check_status(
    dispatcher: &ToolDispatcher,
    input: PropertyRef,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let property = dispatcher
        .data
        .property(&input.property_id)
        .await?
        .filter(|p| p.organization_id == ctx.organization_id);
    let Some(property) = property else {
        return Ok(not_found("property", &input.property_id));
    };

    let tasks = dispatcher.data.compliance_tasks(&property.id).await?;
    let horizon = ctx.now + Duration::days(UPCOMING_WINDOW_DAYS);

    let mut overdue = 0;
    let mut upcoming = 0;
    let items: Vec<Value> = tasks
        .iter()
        .map(|task| {
            let is_overdue = task.is_overdue(ctx.now);
            let is_upcoming = task.status == ComplianceStatus::Pending
                && !is_overdue
                && task.due_date <= horizon;
            if is_overdue {
                overdue += 1;
            }
            if is_upcoming {
                upcoming += 1;
            }
            json!({
                "id": task.id,
                "title": task.title,
                "category": task.category,
                "status": task.status,
                "due_date": task.due_date,
                "days_until_due": (task.due_date - ctx.now).num_days(),
                "overdue": is_overdue,
            })
        })
        .collect();

    Ok(json!({
        "property_id": property.id,
        "property": property.name,
        "total": items.len(),
        "overdue_count": overdue,
        "upcoming_count": upcoming,
        "tasks": items,
    }))
}

pub(crate) async fn generate_legal_notice(
    dispatcher: &ToolDispatcher,
    input: LegalNoticeInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let notice_type = normalize_notice_type(&input.notice_type);
    if notice_type.is_empty() {
        return Err(ToolError::invalid(
            ToolName::GenerateLegalNotice,
            "notice_type must not be empty",
        ));
    }
    let tenant = dispatcher
        .data
        .tenant(&input.tenant_id)
        .await?
        .filter(|t| t.organization_id == ctx.organization_id);
    let Some(tenant) = tenant else {
        return Ok(not_found("tenant", &input.tenant_id));
    };

    let mut body = format!(
        "NOTICE ({})\n\nTo: {}\nDate: {}\n",
        notice_type.replace('_', " ").to_uppercase(),
        tenant.name,
        ctx.now.format("%Y-%m-%d"),
    );
    if let Some(details) = input.details.as_deref() {
        body.push('\n');
        body.push_str(details);
        body.push('\n');
    }

    let notice = LegalNotice {
        id: new_record_id(),
        organization_id: ctx.organization_id.clone(),
        tenant_id: tenant.id.clone(),
        property_id: tenant.property_id.clone(),
        notice_type: notice_type.clone(),
        body,
        status: "DRAFT".to_string(),
        created_at: ctx.now,
    };
    dispatcher.data.save_legal_notice(&notice).await?;

    Ok(json!({
        "success": true,
        "notice_id": notice.id,
        "notice_type": notice_type,
        "status": notice.status,
        "message": "Draft saved for staff review; it has not been sent.",
    }))
}

pub(crate) async fn log_completion(
    dispatcher: &ToolDispatcher,
    input: CompletionInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let task = dispatcher
        .data
        .compliance_task(&input.task_id)
        .await?
        .filter(|t| t.organization_id == ctx.organization_id);
    let Some(mut task) = task else {
        return Ok(not_found("compliance task", &input.task_id));
    };
    if task.status == ComplianceStatus::Completed {
        return Ok(failure(format!("compliance task {} is already completed", task.id)));
    }

    task.status = ComplianceStatus::Completed;
    task.completed_at = Some(ctx.now);
    if input.notes.is_some() {
        task.notes = input.notes;
    }
    if input.document_url.is_some() {
        task.document_url = input.document_url;
    }
    dispatcher.data.save_compliance_task(&task).await?;

    let next = match task.recurrence_days.filter(|days| *days > 0) {
        Some(days) => {
            let next = ComplianceTask {
                id: new_record_id(),
                organization_id: task.organization_id.clone(),
                property_id: task.property_id.clone(),
                title: task.title.clone(),
                category: task.category.clone(),
                due_date: task.due_date + Duration::days(i64::from(days)),
                status: ComplianceStatus::Pending,
                recurrence_days: task.recurrence_days,
                completed_at: None,
                notes: None,
                document_url: None,
            };
            dispatcher.data.save_compliance_task(&next).await?;
            Some(json!({"task_id": next.id, "due_date": next.due_date}))
        }
        None => None,
    };

    Ok(json!({
        "success": true,
        "task_id": task.id,
        "completed_at": task.completed_at,
        "next_occurrence": next,
    }))
}
