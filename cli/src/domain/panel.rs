//! Summary panel computation: ownership, cost, and remaining lifetime per instance.
//!
//! Pure functions only: the render serializer gathers the inputs and
//! publishes the text.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use leasekeeper_common::{InstanceRecord, InstanceStatus};

use crate::domain::timer::format_remaining;

/// Providers bill monthly plans at 730 hours.
pub const HOURS_PER_MONTH: f64 = 730.0;

/// One line of the panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub region: String,
    pub status: InstanceStatus,
    pub ip: Option<String>,
    pub hourly_cost: f64,
    pub accrued_cost: f64,
    pub remaining: Option<chrono::Duration>,
    pub extended_count: u32,
}

/// The whole rendered view.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub generated_at: DateTime<Utc>,
    pub active: Vec<PanelRow>,
    pub recently_destroyed: Vec<PanelRow>,
    pub total_hourly: f64,
    pub total_accrued: f64,
}

/// Build the panel from registry records and plan prices (plan id → monthly cost).
#[must_use]
pub fn build_panel(
    records: &[InstanceRecord],
    monthly_costs: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> PanelView {
    let mut active = Vec::new();
    let mut recently_destroyed = Vec::new();
    for record in records {
        let row = row_for(record, monthly_costs, now);
        if record.is_active() {
            active.push(row);
        } else {
            recently_destroyed.push(row);
        }
    }
    active.sort_by_key(|r| (r.remaining.is_none(), r.remaining));
    let total_hourly = active.iter().map(|r| r.hourly_cost).sum();
    let total_accrued = active
        .iter()
        .chain(recently_destroyed.iter())
        .map(|r| r.accrued_cost)
        .sum();
    PanelView {
        generated_at: now,
        active,
        recently_destroyed,
        total_hourly,
        total_accrued,
    }
}

#[allow(clippy::cast_precision_loss)]
fn row_for(record: &InstanceRecord, monthly_costs: &HashMap<String, f64>, now: DateTime<Utc>) -> PanelRow {
    let hourly_cost = record
        .plan
        .as_deref()
        .and_then(|p| monthly_costs.get(p))
        .map_or(0.0, |monthly| monthly / HOURS_PER_MONTH);
    let end = record.destroyed_at.unwrap_or(now);
    let alive_secs = (end - record.created_at).num_seconds().max(0);
    PanelRow {
        id: record.id.clone(),
        name: record.display_name().to_string(),
        owner: record.creator.display_name.clone(),
        region: record.region.clone().unwrap_or_else(|| "?".to_string()),
        status: record.status,
        ip: record.ip.clone(),
        hourly_cost,
        accrued_cost: hourly_cost * alive_secs as f64 / 3600.0,
        remaining: record.self_destruct.as_ref().map(|t| t.remaining(now)),
        extended_count: record.self_destruct.as_ref().map_or(0, |t| t.extended_count),
    }
}

/// Plain-text rendering of the panel.
#[must_use]
pub fn render_text(view: &PanelView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Active instances ({})", view.active.len());
    if view.active.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for row in &view.active {
        let remaining = row
            .remaining
            .map_or_else(|| "no timer".to_string(), format_remaining);
        let _ = writeln!(
            out,
            "  {name:<24} {status:<9} {ip:<15} {region:<5} owner {owner:<16} ${hourly:.3}/h  ${accrued:.2}  {remaining}{ext}",
            name = row.name,
            status = row.status,
            ip = row.ip.as_deref().unwrap_or("-"),
            region = row.region,
            owner = row.owner,
            hourly = row.hourly_cost,
            accrued = row.accrued_cost,
            ext = if row.extended_count > 0 {
                format!(" (+{})", row.extended_count)
            } else {
                String::new()
            },
        );
    }
    if !view.recently_destroyed.is_empty() {
        let _ = writeln!(out, "Recently destroyed ({})", view.recently_destroyed.len());
        for row in &view.recently_destroyed {
            let _ = writeln!(
                out,
                "  {name:<24} owner {owner:<16} ${accrued:.2}",
                name = row.name,
                owner = row.owner,
                accrued = row.accrued_cost,
            );
        }
    }
    let _ = writeln!(
        out,
        "Burn rate ${:.3}/h, accrued ${:.2}. Updated {}",
        view.total_hourly,
        view.total_accrued,
        view.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    out
}
