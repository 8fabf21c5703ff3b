//! Vendor shortlist ranking

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::{Priority, Vendor, VendorTier};

use super::{not_found, ToolContext, ToolDispatcher, ToolError, ToolName};

pub const SHORTLIST_SIZE: usize = 5;

#[derive(Debug, Deserialize)]
pub struct FindVendorsInput {
    pub trade: String,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedVendor {
    pub vendor_id: String,
    pub name: String,
    pub tier: VendorTier,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Tiers allowed to take work of a given priority.
pub fn eligible_tiers(priority: Priority) -> &'static [VendorTier] {
    match priority {
        Priority::Emergency | Priority::High => &[VendorTier::Preferred, VendorTier::Standard],
        Priority::Normal | Priority::Low => &[
            VendorTier::Preferred,
            VendorTier::Standard,
            VendorTier::Backup,
        ],
    }
}

fn response_points(hours: Option<f64>, priority: Priority) -> f64 {
    let Some(hours) = hours else {
        return 5.0;
    };
    if priority == Priority::Emergency {
        match hours {
            h if h <= 1.0 => 30.0,
            h if h <= 2.0 => 25.0,
            h if h <= 4.0 => 15.0,
            _ => 5.0,
        }
    } else {
        match hours {
            h if h <= 4.0 => 20.0,
            h if h <= 24.0 => 15.0,
            _ => 5.0,
        }
    }
}

fn job_count_bonus(jobs: u32) -> f64 {
    match jobs {
        j if j >= 50 => 10.0,
        j if j >= 20 => 7.0,
        j if j >= 5 => 4.0,
        _ => 0.0,
    }
}

/// Score in 0..=100 with the reasons that contributed.
pub fn score_vendor(vendor: &Vendor, priority: Priority) -> (f64, Vec<String>) {
    let metrics = &vendor.metrics;
    let mut reasons = Vec::new();

    let mut score = response_points(metrics.avg_response_hours, priority);
    if let Some(hours) = metrics.avg_response_hours {
        reasons.push(format!("{hours:.1}h avg response"));
    }

    if let Some(rating) = metrics.avg_rating {
        score += rating.clamp(0.0, 5.0) / 5.0 * 30.0;
        reasons.push(format!("{rating:.1}/5 rating"));
    }

    if let Some(rate) = metrics.completion_rate {
        let rate = rate.clamp(0.0, 1.0);
        score += rate * 20.0;
        reasons.push(format!("{:.0}% completion rate", rate * 100.0));
    }

    let bonus = job_count_bonus(metrics.jobs_completed);
    if bonus > 0.0 {
        score += bonus;
        reasons.push(format!("{} jobs completed", metrics.jobs_completed));
    }

    if vendor.tier == VendorTier::Preferred {
        score += 10.0;
        reasons.push("preferred vendor".to_string());
    }

    (score.min(100.0), reasons)
}

fn serves(vendor: &Vendor, trade: &str, zip: Option<&str>, tiers: &[VendorTier]) -> bool {
    vendor.active
        && tiers.contains(&vendor.tier)
        && vendor.trades.iter().any(|t| t.eq_ignore_ascii_case(trade))
        && match zip {
            Some(zip) => vendor.service_zips.is_empty() || vendor.service_zips.iter().any(|z| z == zip),
            None => true,
        }
}

/// Filter and rank candidates, best first, at most [`SHORTLIST_SIZE`].
pub fn rank_vendors(
    vendors: &[Vendor],
    trade: &str,
    zip: Option<&str>,
    priority: Priority,
) -> Vec<RankedVendor> {
    let trade = trade.trim();
    let tiers = eligible_tiers(priority);
    let mut ranked: Vec<RankedVendor> = vendors
        .iter()
        .filter(|v| serves(v, trade, zip, tiers))
        .map(|v| {
            let (score, reasons) = score_vendor(v, priority);
            RankedVendor {
                vendor_id: v.id.clone(),
                name: v.name.clone(),
                tier: v.tier,
                score: (score * 10.0).round() / 10.0,
                reasons,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(SHORTLIST_SIZE);
    ranked
}

pub(crate) async fn find_available(
    dispatcher: &ToolDispatcher,
    input: FindVendorsInput,
    ctx: &ToolContext,
) -> Result<Value, ToolError> {
    let priority = match input.priority.as_deref() {
        Some(raw) => Priority::parse(raw).ok_or_else(|| {
            ToolError::invalid(
                ToolName::FindAvailableVendors,
                format!("unknown priority '{raw}'"),
            )
        })?,
        None => Priority::Normal,
    };

    let zip = match (input.zip, input.property_id.as_deref()) {
        (Some(zip), _) => Some(zip),
        (None, Some(property_id)) => {
            let property = dispatcher
                .data
                .property(property_id)
                .await?
                .filter(|p| p.organization_id == ctx.organization_id);
            match property {
                Some(p) => Some(p.zip),
                None => return Ok(not_found("property", property_id)),
            }
        }
        (None, None) => None,
    };

    let vendors = dispatcher.data.vendors(&ctx.organization_id).await?;
    let ranked = rank_vendors(&vendors, &input.trade, zip.as_deref(), priority);

    tracing::debug!(
        org_id = %ctx.organization_id,
        trade = %input.trade,
        candidates = ranked.len(),
        "Ranked vendors"
    );

    Ok(json!({
        "trade": input.trade,
        "priority": priority.as_str(),
        "zip": zip,
        "count": ranked.len(),
        "vendors": ranked,
    }))
}
