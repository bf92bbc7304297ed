//! Multi-run orchestrator.
//!
//! Coordinates the selection-to-artifact pipeline for one invocation:
//! per-date artifact paths keyed off a run tag, prior-slate discovery,
//! stability enforcement against the prior run, and artifact persistence.
//! Scheduling itself is external (cron); a run must be correct standalone
//! and idempotent across identical invocations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::config::Config;
use crate::models::{Bucket, DailySlate, UnifiedCandidate};
use crate::output::{
    build_daily_slate, compute_delta, load_prior_slate, should_suppress_change,
    write_daily_slate_json, write_report_md,
};
use crate::selection::run_bucket_pipeline;

pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Filesystem-safe tag for a run-time label: colons dropped, spaces to
/// underscores. "2026-02-24 07:00 ET" -> "2026-02-24_0700_ET".
pub fn run_tag(run_time_et: &str) -> String {
    run_time_et.replace(':', "").replace(' ', "_")
}

/// Artifact directory for a target date: `<base>/<target_date>/`.
pub fn artifact_dir(target_date: &str, base_dir: &Path) -> Result<PathBuf> {
    let dir = base_dir.join(target_date);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir)
}

pub fn slate_path(target_date: &str, run_time_et: &str, base_dir: &Path) -> Result<PathBuf> {
    Ok(artifact_dir(target_date, base_dir)?
        .join(format!("DAILY_SLATE_{}.json", run_tag(run_time_et))))
}

pub fn report_path(target_date: &str, run_time_et: &str, base_dir: &Path) -> Result<PathBuf> {
    Ok(artifact_dir(target_date, base_dir)?.join(format!("REPORT_{}.md", run_tag(run_time_et))))
}

/// Find the most recent prior slate for the same target date: the latest
/// `DAILY_SLATE_*.json` whose tag sorts strictly below the current run's.
pub fn find_prior_slate(
    target_date: &str,
    current_run_time_et: &str,
    base_dir: &Path,
) -> Option<DailySlate> {
    let dir = base_dir.join(target_date);
    let entries = std::fs::read_dir(&dir).ok()?;

    let current_tag = run_tag(current_run_time_et);
    let mut tags: Vec<(String, PathBuf)> = entries
        .filter_map(|e| {
            let path = e.ok()?.path();
            let name = path.file_name()?.to_str()?.to_string();
            let tag = name
                .strip_prefix("DAILY_SLATE_")?
                .strip_suffix(".json")?
                .to_string();
            Some((tag, path))
        })
        .collect();
    tags.sort();

    let prior_path = tags
        .into_iter()
        .filter(|(tag, _)| *tag < current_tag)
        .next_back()
        .map(|(_, path)| path)?;

    load_prior_slate(&prior_path)
}

/// Apply the multi-run stability rule in place: if a candidate existed in
/// the prior run and its bucket changed without meeting the thresholds,
/// revert to the prior bucket and rewrite the reason.
pub fn apply_stability_rules(
    candidates: &mut [UnifiedCandidate],
    prior: Option<&DailySlate>,
    config: &Config,
) {
    let Some(prior) = prior else { return };

    let prior_map: HashMap<&str, &UnifiedCandidate> = prior
        .all_candidates()
        .map(|c| (c.market_ticker.as_str(), c))
        .collect();

    for curr in candidates.iter_mut() {
        let Some(prev) = prior_map.get(curr.market_ticker.as_str()) else {
            continue;
        };
        if curr.bucket != prev.bucket && should_suppress_change(curr, prev, config) {
            info!(
                "Stability: suppressing {} bucket change {} -> {}",
                curr.market_ticker,
                prev.bucket.as_str(),
                curr.bucket.as_str(),
            );
            curr.bucket = prev.bucket;
            curr.bucket_reason = format!(
                "Stability: kept {} (change suppressed — thresholds not met)",
                prev.bucket.as_str()
            );
        }
    }
}

/// Current time as a run-time label, e.g. "2026-02-24 07:00 ET".
pub fn current_run_time_et() -> String {
    Utc::now()
        .with_timezone(&chrono_tz::US::Eastern)
        .format("%Y-%m-%d %H:%M ET")
        .to_string()
}

/// Today's date in ET as YYYY-MM-DD.
pub fn target_date_et() -> String {
    Utc::now()
        .with_timezone(&chrono_tz::US::Eastern)
        .format("%Y-%m-%d")
        .to_string()
}

/// Whether the current ET hour matches a scheduled run hour.
pub fn is_scheduled_run_time(config: &Config) -> bool {
    let hour = chrono::Timelike::hour(&Utc::now().with_timezone(&chrono_tz::US::Eastern));
    config.schedule.run_hours_et.contains(&hour)
}

/// Run the full orchestration pipeline:
/// classify → load prior → stability → re-partition → slate → delta →
/// persist both artifacts. Returns the completed DailySlate.
#[allow(clippy::too_many_arguments)]
pub fn run_pipeline(
    candidates: Vec<UnifiedCandidate>,
    run_time_et: &str,
    target_date: &str,
    events_scanned: u32,
    brackets_scanned: u32,
    candidates_in_window: u32,
    base_dir: &Path,
    config: &Config,
) -> Result<DailySlate> {
    let (primary, tight, near_miss, rejected) = run_bucket_pipeline(candidates, config);

    let prior = find_prior_slate(target_date, run_time_et, base_dir);

    // Stability applies to the classified (non-rejected) candidates.
    let mut classified: Vec<UnifiedCandidate> = primary
        .into_iter()
        .chain(tight)
        .chain(near_miss)
        .collect();
    apply_stability_rules(&mut classified, prior.as_ref(), config);

    // Re-partition by post-stability bucket values. A candidate reverted
    // all the way to REJECTED joins the rejected list.
    let mut primary = Vec::new();
    let mut tight = Vec::new();
    let mut near_miss = Vec::new();
    let mut rejected = rejected;
    for c in classified {
        match c.bucket {
            Bucket::Primary => primary.push(c),
            Bucket::Tight => tight.push(c),
            Bucket::NearMiss => near_miss.push(c),
            Bucket::Rejected => rejected.push(c),
        }
    }

    let mut slate = build_daily_slate(
        run_time_et,
        target_date,
        primary,
        tight,
        near_miss,
        rejected,
        events_scanned,
        brackets_scanned,
        candidates_in_window,
        config,
    );

    let delta_notes = prior.as_ref().map(|p| compute_delta(&slate, p, config));
    if let Some(notes) = &delta_notes {
        slate.notes.extend(notes.iter().cloned());
    }

    let json_path = slate_path(target_date, run_time_et, base_dir)?;
    let md_path = report_path(target_date, run_time_et, base_dir)?;
    write_daily_slate_json(&slate, &json_path)?;
    write_report_md(&slate, delta_notes.as_deref(), &md_path)?;

    info!(
        "Pipeline complete: {} PRIMARY, {} TIGHT, {} NEAR-MISS, {} REJECTED",
        slate.picks_primary.len(),
        slate.picks_tight.len(),
        slate.picks_near_miss.len(),
        slate.rejected.len(),
    );

    Ok(slate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketType, OrderbookSnapshot};

    fn candidate(ticker: &str, ask: i64, room: i64) -> UnifiedCandidate {
        UnifiedCandidate {
            run_time_et: "2026-02-24 07:00 ET".to_string(),
            target_date_local: "2026-02-24".to_string(),
            city: "New York".to_string(),
            market_type: MarketType::HighTemp,
            event_name: "EVT".to_string(),
            market_ticker: ticker.to_string(),
            market_url: String::new(),
            bracket_definition: "40°F or above".to_string(),
            settlement_spec: None,
            orderbook_snapshot: OrderbookSnapshot {
                best_yes_bid_cents: Some(100 - ask),
                best_no_bid_cents: Some(ask - room),
                implied_best_no_ask_cents: Some(ask),
                implied_best_yes_ask_cents: Some(100 - (ask - room)),
                bid_room_cents: Some(room),
                top3_yes_bids: vec![[100 - ask, 30]],
                top3_no_bids: vec![[ask - room, 30]],
                depth_notes: String::new(),
            },
            model: None,
            fees_ev: None,
            manual_trade_plan: None,
            allocation: None,
            bucket: Bucket::Rejected,
            bucket_reason: String::new(),
            rank: None,
            warnings: vec![],
        }
    }

    #[test]
    fn test_run_tag_strips_colon_and_space() {
        assert_eq!(run_tag("2026-02-24 07:00 ET"), "2026-02-24_0700_ET");
    }

    #[test]
    fn test_find_prior_slate_picks_latest_older_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        for run_time in ["2026-02-24 07:00 ET", "2026-02-24 08:00 ET"] {
            run_pipeline(
                vec![candidate("A", 92, 3)],
                run_time,
                "2026-02-24",
                1,
                1,
                1,
                dir.path(),
                &config,
            )
            .unwrap();
        }

        // From the 09:00 vantage the 08:00 slate is the prior.
        let prior = find_prior_slate("2026-02-24", "2026-02-24 09:00 ET", dir.path()).unwrap();
        assert_eq!(prior.run_time_et, "2026-02-24 08:00 ET");

        // From 07:00 there is nothing older.
        assert!(find_prior_slate("2026-02-24", "2026-02-24 07:00 ET", dir.path()).is_none());
    }

    #[test]
    fn test_stability_suppression_reverts_bucket() {
        let config = Config::default();
        let mut prior_candidate = candidate("A", 92, 3);
        prior_candidate.bucket = Bucket::Primary;
        let prior = build_daily_slate(
            "2026-02-24 07:00 ET",
            "2026-02-24",
            vec![prior_candidate],
            vec![],
            vec![],
            vec![],
            1,
            1,
            1,
            &config,
        );

        // Same ask, bucket drifted to TIGHT: suppressed back to PRIMARY.
        let mut current = vec![candidate("A", 92, 1)];
        current[0].bucket = Bucket::Tight;
        apply_stability_rules(&mut current, Some(&prior), &config);
        assert_eq!(current[0].bucket, Bucket::Primary);
        assert!(current[0].bucket_reason.starts_with("Stability: kept PRIMARY"));

        // A 2c ask move lets the change through.
        let mut current = vec![candidate("A", 94, 1)];
        current[0].bucket = Bucket::Tight;
        apply_stability_rules(&mut current, Some(&prior), &config);
        assert_eq!(current[0].bucket, Bucket::Tight);
    }

    #[test]
    fn test_pipeline_idempotent_with_same_prior() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let first = run_pipeline(
            vec![candidate("A", 92, 3)],
            "2026-02-24 07:00 ET",
            "2026-02-24",
            1,
            1,
            1,
            dir.path(),
            &config,
        )
        .unwrap();

        // Second run at a later label against the identical inputs: no
        // bucket changes, single no-material-changes delta note.
        let second = run_pipeline(
            vec![candidate("A", 92, 3)],
            "2026-02-24 08:00 ET",
            "2026-02-24",
            1,
            1,
            1,
            dir.path(),
            &config,
        )
        .unwrap();

        assert_eq!(
            first.picks_primary[0].bucket,
            second.picks_primary[0].bucket
        );
        assert_eq!(
            second.notes,
            vec!["No material changes from prior run.".to_string()]
        );
    }

    #[test]
    fn test_pipeline_writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        run_pipeline(
            vec![candidate("A", 92, 3)],
            "2026-02-24 07:00 ET",
            "2026-02-24",
            1,
            1,
            1,
            dir.path(),
            &config,
        )
        .unwrap();

        let date_dir = dir.path().join("2026-02-24");
        assert!(date_dir.join("DAILY_SLATE_2026-02-24_0700_ET.json").exists());
        assert!(date_dir.join("REPORT_2026-02-24_0700_ET.md").exists());
    }
}
