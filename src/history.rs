//! Slate history aggregation.
//!
//! Loads persisted DAILY_SLATE artifacts and computes per-day and overall
//! pick statistics. Intentionally simple aggregation, no replay.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::models::DailySlate;
use crate::output::load_prior_slate;

/// Aggregates for a single slate file.
#[derive(Debug, Clone, Default)]
pub struct DayResult {
    pub date: String,
    pub total_picks: usize,
    pub primary_picks: usize,
    pub tight_picks: usize,
    pub near_miss_picks: usize,
    pub rejected_picks: usize,
    pub total_suggested_stake: f64,
}

/// Aggregates across all loaded slates.
#[derive(Debug, Clone, Default)]
pub struct HistorySummary {
    pub days_tested: usize,
    pub total_primary: usize,
    pub total_tight: usize,
    pub total_near_miss: usize,
    pub total_rejected: usize,
    pub avg_primary_per_day: f64,
    pub avg_ev_primary: f64,
    pub day_results: Vec<DayResult>,
}

fn analyze_slate(slate: &DailySlate) -> DayResult {
    let mut result = DayResult {
        date: slate.target_date_local.clone(),
        primary_picks: slate.picks_primary.len(),
        tight_picks: slate.picks_tight.len(),
        near_miss_picks: slate.picks_near_miss.len(),
        rejected_picks: slate.rejected.len(),
        ..Default::default()
    };
    result.total_picks =
        result.primary_picks + result.tight_picks + result.near_miss_picks + result.rejected_picks;

    for pick in slate.picks_primary.iter().chain(slate.picks_tight.iter()) {
        if let Some(allocation) = &pick.allocation {
            result.total_suggested_stake += allocation.suggested_stake_usd;
        }
    }

    result
}

/// Aggregate statistics over a set of saved slate JSON files.
pub fn summarize_slates(slate_paths: &[PathBuf]) -> HistorySummary {
    let mut summary = HistorySummary::default();
    let mut primary_evs: Vec<f64> = Vec::new();

    let mut paths = slate_paths.to_vec();
    paths.sort();

    for path in &paths {
        let Some(slate) = load_prior_slate(path) else {
            warn!("Skipping unreadable slate: {}", path.display());
            continue;
        };

        let result = analyze_slate(&slate);
        summary.days_tested += 1;
        summary.total_primary += result.primary_picks;
        summary.total_tight += result.tight_picks;
        summary.total_near_miss += result.near_miss_picks;
        summary.total_rejected += result.rejected_picks;
        summary.day_results.push(result);

        for pick in &slate.picks_primary {
            if let Some(fees_ev) = &pick.fees_ev {
                primary_evs.push(fees_ev.ev_net_est_cents_at_recommended_limit);
            }
        }
    }

    if summary.days_tested > 0 {
        summary.avg_primary_per_day = summary.total_primary as f64 / summary.days_tested as f64;
    }
    if !primary_evs.is_empty() {
        summary.avg_ev_primary = primary_evs.iter().sum::<f64>() / primary_evs.len() as f64;
    }

    summary
}

/// Collect every DAILY_SLATE_*.json under the output base directory.
pub fn collect_slate_paths(base_dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let Ok(dates) = std::fs::read_dir(base_dir) else {
        return paths;
    };
    for date_entry in dates.flatten() {
        let Ok(files) = std::fs::read_dir(date_entry.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("DAILY_SLATE_") && name.ends_with(".json") {
                paths.push(path);
            }
        }
    }
    paths.sort();
    paths
}

/// Plain-text rendering of the summary for the CLI.
pub fn format_summary(summary: &HistorySummary) -> String {
    let mut lines = vec![
        "=== SLATE HISTORY ===".to_string(),
        format!("Days: {}", summary.days_tested),
        format!(
            "PRIMARY {} | TIGHT {} | NEAR-MISS {} | REJECTED {}",
            summary.total_primary,
            summary.total_tight,
            summary.total_near_miss,
            summary.total_rejected
        ),
        format!("Avg PRIMARY per day: {:.2}", summary.avg_primary_per_day),
        format!("Avg PRIMARY EV: {:.2}c", summary.avg_ev_primary),
        String::new(),
    ];
    for day in &summary.day_results {
        lines.push(format!(
            "{}: {} picks ({} primary, {} tight), stake ${:.2}",
            day.date,
            day.total_picks,
            day.primary_picks,
            day.tight_picks,
            day.total_suggested_stake
        ));
    }
    lines.join("\n")
}
