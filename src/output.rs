//! Output generation and multi-run stability.
//!
//! Builds the DailySlate, computes delta notes against the prior run,
//! applies the stability suppression rule, and writes the JSON and
//! markdown artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::config::Config;
use crate::models::{DailySlate, ScanStats, UnifiedCandidate};

/// Assemble a DailySlate from selection pipeline output.
#[allow(clippy::too_many_arguments)]
pub fn build_daily_slate(
    run_time_et: &str,
    target_date_local: &str,
    primary: Vec<UnifiedCandidate>,
    tight: Vec<UnifiedCandidate>,
    near_miss: Vec<UnifiedCandidate>,
    rejected: Vec<UnifiedCandidate>,
    events_scanned: u32,
    brackets_scanned: u32,
    candidates_in_window: u32,
    config: &Config,
) -> DailySlate {
    let scan_stats = ScanStats {
        events_scanned,
        bracket_markets_scanned: brackets_scanned,
        candidates_in_88_95_window: candidates_in_window,
        primary_count: primary.len() as u32,
        tight_count: tight.len() as u32,
        near_miss_count: near_miss.len() as u32,
        rejected_count: rejected.len() as u32,
    };

    DailySlate {
        run_time_et: run_time_et.to_string(),
        target_date_local: target_date_local.to_string(),
        bankroll_usd: config.bankroll.total_usd,
        scan_stats,
        picks_primary: primary,
        picks_tight: tight,
        picks_near_miss: near_miss,
        rejected,
        notes: vec![],
    }
}

// ── Delta computation ────────────────────────────────────────────────

fn candidate_map(slate: &DailySlate) -> (Vec<&UnifiedCandidate>, HashMap<&str, &UnifiedCandidate>) {
    // Keep slate order for deterministic note output; the map is for lookup.
    let ordered: Vec<&UnifiedCandidate> = slate.all_candidates().collect();
    let map = ordered.iter().map(|c| (c.market_ticker.as_str(), *c)).collect();
    (ordered, map)
}

fn ev_of(c: &UnifiedCandidate) -> Option<f64> {
    c.fees_ev
        .as_ref()
        .map(|a| a.ev_net_est_cents_at_recommended_limit)
}

fn compare_candidates(
    curr: &UnifiedCandidate,
    prev: &UnifiedCandidate,
    min_move: i64,
) -> Vec<String> {
    let mut changes = Vec::new();

    if curr.bucket != prev.bucket {
        changes.push(format!(
            "bucket {} -> {}",
            prev.bucket.as_str(),
            curr.bucket.as_str()
        ));
    }

    if let (Some(curr_ask), Some(prev_ask)) = (
        curr.orderbook_snapshot.implied_best_no_ask_cents,
        prev.orderbook_snapshot.implied_best_no_ask_cents,
    ) {
        let diff = curr_ask - prev_ask;
        if diff.abs() >= min_move {
            changes.push(format!("ask moved {prev_ask}c -> {curr_ask}c ({diff:+}c)"));
        }
    }

    if let (Some(curr_ev), Some(prev_ev)) = (ev_of(curr), ev_of(prev)) {
        if (curr_ev > 0.0) != (prev_ev > 0.0) {
            changes.push(format!("EV flipped: {prev_ev:.1}c -> {curr_ev:.1}c"));
        }
    }

    if let (Some(curr_rank), Some(prev_rank)) = (curr.rank, prev.rank) {
        if curr_rank != prev_rank {
            changes.push(format!("rank {prev_rank} -> {curr_rank}"));
        }
    }

    changes
}

/// Compare the current run to a prior run and produce delta notes:
/// NEW / REMOVED candidates, bucket moves, price moves >= the stability
/// threshold, EV sign flips, rank changes, and count summaries.
pub fn compute_delta(current: &DailySlate, prior: &DailySlate, config: &Config) -> Vec<String> {
    let mut notes = Vec::new();
    let min_move = config.stability.min_price_move_cents;

    let (current_ordered, current_map) = candidate_map(current);
    let (prior_ordered, prior_map) = candidate_map(prior);

    for curr in &current_ordered {
        let ticker = curr.market_ticker.as_str();
        match prior_map.get(ticker) {
            None => notes.push(format!("NEW: {ticker} appeared (bucket: {})", curr.bucket.as_str())),
            Some(prev) => {
                for change in compare_candidates(curr, prev, min_move) {
                    notes.push(format!("{ticker}: {change}"));
                }
            }
        }
    }

    for prev in &prior_ordered {
        let ticker = prev.market_ticker.as_str();
        if !current_map.contains_key(ticker) {
            notes.push(format!("REMOVED: {ticker} (was {})", prev.bucket.as_str()));
        }
    }

    let (cs, ps) = (&current.scan_stats, &prior.scan_stats);
    if cs.primary_count != ps.primary_count {
        notes.push(format!(
            "PRIMARY count: {} -> {}",
            ps.primary_count, cs.primary_count
        ));
    }
    if cs.tight_count != ps.tight_count {
        notes.push(format!("TIGHT count: {} -> {}", ps.tight_count, cs.tight_count));
    }

    if notes.is_empty() {
        notes.push("No material changes from prior run.".to_string());
    }

    notes
}

/// Stability rule: a bucket change across runs is suppressed unless the
/// ask moved >= min_price_move_cents, the EV sign flipped, or the mapping
/// confidence changed.
pub fn should_suppress_change(
    curr: &UnifiedCandidate,
    prev: &UnifiedCandidate,
    config: &Config,
) -> bool {
    let min_move = config.stability.min_price_move_cents;

    if let (Some(curr_ask), Some(prev_ask)) = (
        curr.orderbook_snapshot.implied_best_no_ask_cents,
        prev.orderbook_snapshot.implied_best_no_ask_cents,
    ) {
        if (curr_ask - prev_ask).abs() >= min_move {
            return false;
        }
    }

    if let (Some(curr_ev), Some(prev_ev)) = (ev_of(curr), ev_of(prev)) {
        if (curr_ev > 0.0) != (prev_ev > 0.0) {
            return false;
        }
    }

    let curr_conf = curr.settlement_spec.as_ref().map(|s| s.mapping_confidence);
    let prev_conf = prev.settlement_spec.as_ref().map(|s| s.mapping_confidence);
    if curr_conf != prev_conf {
        return false;
    }

    true
}

/// Load a prior DailySlate from JSON; None if missing or malformed.
pub fn load_prior_slate(path: &Path) -> Option<DailySlate> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return None,
    };
    match serde_json::from_str(&raw) {
        Ok(slate) => Some(slate),
        Err(e) => {
            warn!("Failed to load prior slate from {}: {e}", path.display());
            None
        }
    }
}

// ── Artifact writers ─────────────────────────────────────────────────

/// Serialize the slate to pretty JSON on disk.
pub fn write_daily_slate_json(slate: &DailySlate, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(slate).context("failed to serialize slate")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn fmt_opt_cents(v: Option<i64>) -> String {
    v.map_or("-".to_string(), |c| c.to_string())
}

fn fmt_p_no(c: &UnifiedCandidate) -> String {
    c.model
        .as_ref()
        .map_or("-".to_string(), |m| format!("{:.2}%", m.p_no * 100.0))
}

fn fmt_edge(c: &UnifiedCandidate) -> String {
    c.fees_ev
        .as_ref()
        .map_or("-".to_string(), |a| format!("{:.1}%", a.edge_vs_implied_pct))
}

fn fmt_rec_limit(c: &UnifiedCandidate) -> String {
    c.manual_trade_plan
        .as_ref()
        .map_or("-".to_string(), |p| p.recommended_limit_no_cents.to_string())
}

fn fmt_max_buy(c: &UnifiedCandidate) -> String {
    c.fees_ev
        .as_ref()
        .map_or("-".to_string(), |a| a.max_buy_price_no_cents.to_string())
}

fn fmt_stake(c: &UnifiedCandidate) -> String {
    c.allocation
        .as_ref()
        .map_or("-".to_string(), |a| format!("${:.2}", a.suggested_stake_usd))
}

fn fmt_notes_short(c: &UnifiedCandidate) -> String {
    let mut parts = Vec::new();
    if let Some(model) = &c.model {
        if let Some(flag) = model.lock_in_flag_if_low {
            parts.push(format!("low:{}", flag.as_str()));
        }
        if let Some(flag) = model.high_lock_in_flag {
            parts.push(format!("high:{}", flag.as_str()));
        }
        parts.push(format!(
            "{:.1}h vol",
            model.hours_remaining_in_meaningful_volatility_window
        ));
    }
    if !c.warnings.is_empty() {
        parts.push(c.warnings.iter().take(2).cloned().collect::<Vec<_>>().join("; "));
    }
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

const PICK_TABLE_HEADER: &str = "| Rank | City | High/Low | Bracket | impl NO ask | best NO bid | bid room | p(NO) | Edge % | Rec Limit | Max Buy | Stake | Notes |\n|------|------|----------|---------|-------------|-------------|----------|-------|--------|-----------|---------|-------|-------|\n";

fn push_pick_table(out: &mut String, picks: &[UnifiedCandidate], empty_note: &str) {
    if picks.is_empty() {
        out.push_str(empty_note);
        out.push('\n');
        return;
    }
    out.push_str(PICK_TABLE_HEADER);
    for (i, p) in picks.iter().enumerate() {
        let ob = &p.orderbook_snapshot;
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            p.rank.map_or((i + 1).to_string(), |r| r.to_string()),
            p.city,
            p.market_type.as_str(),
            p.bracket_definition,
            fmt_opt_cents(ob.implied_best_no_ask_cents),
            fmt_opt_cents(ob.best_no_bid_cents),
            fmt_opt_cents(ob.bid_room_cents),
            fmt_p_no(p),
            fmt_edge(p),
            fmt_rec_limit(p),
            fmt_max_buy(p),
            fmt_stake(p),
            fmt_notes_short(p),
        ));
    }
}

/// Render REPORT.md and write it to disk.
pub fn write_report_md(
    slate: &DailySlate,
    delta_notes: Option<&[String]>,
    path: &Path,
) -> Result<PathBuf> {
    let stats = &slate.scan_stats;
    let mut out = String::with_capacity(8 * 1024);

    out.push_str(&format!(
        "# Kalshi Temperature \"Unlikely NO\" Slate — {}\n\n",
        slate.target_date_local
    ));
    out.push_str("## Run Metadata\n");
    out.push_str(&format!("- **run_time_et:** {}\n", slate.run_time_et));
    out.push_str(&format!("- **target_date_local:** {}\n", slate.target_date_local));
    out.push_str(&format!("- **bankroll_usd:** ${:.2}\n\n", slate.bankroll_usd));

    out.push_str("## Scan Coverage\n");
    out.push_str(&format!("- **events_scanned:** {}\n", stats.events_scanned));
    out.push_str(&format!(
        "- **bracket_markets_scanned:** {}\n",
        stats.bracket_markets_scanned
    ));
    out.push_str(&format!(
        "- **candidates_in_88_95_window:** {}\n",
        stats.candidates_in_88_95_window
    ));
    out.push_str(&format!("- **primary_count:** {}\n", stats.primary_count));
    out.push_str(&format!("- **tight_count:** {}\n", stats.tight_count));
    out.push_str(&format!("- **near_miss_count:** {}\n", stats.near_miss_count));
    out.push_str(&format!("- **rejected_count:** {}\n\n", stats.rejected_count));

    out.push_str("## PRIMARY Picks (Recommended)\n");
    push_pick_table(&mut out, &slate.picks_primary, "_No PRIMARY picks this run._");

    out.push_str("\n## TIGHT Picks\n");
    push_pick_table(&mut out, &slate.picks_tight, "_No TIGHT picks this run._");

    out.push_str("\n## NEAR-MISS Watchlist\n");
    push_pick_table(
        &mut out,
        &slate.picks_near_miss,
        "_No near-miss candidates this run._",
    );

    out.push_str("\n## REJECTED Summary\n");
    out.push_str(&format!("- **Total rejected:** {}\n", stats.rejected_count));
    if slate.rejected.is_empty() {
        out.push_str("_None._\n");
    } else {
        for r in &slate.rejected {
            out.push_str(&format!("- `{}` — {}\n", r.market_ticker, r.bucket_reason));
        }
    }

    out.push_str("\n## Manual Placement Checklist\n");
    out.push_str(
        "1. Log in to [Kalshi](https://kalshi.com) (do NOT use API for orders).\n\
         2. Navigate to each recommended market via the provided URL.\n\
         3. Select **NO** side.\n\
         4. Set limit price to the **Rec Limit** value shown above.\n\
         5. Set quantity based on the **Stake** column (contracts = stake / limit price).\n\
         6. Review order details, then submit.\n\
         7. Set a timer to check fills after 5-10 minutes.\n\
         8. If not filled within 15 min, consider adjusting limit by 1c toward the ask.\n\
         9. Do NOT chase — cancel if price moves outside your edge window.\n",
    );

    out.push_str("\n## Delta vs Previous Run\n");
    match delta_notes {
        Some(notes) if !notes.is_empty() => {
            for note in notes {
                out.push_str(&format!("- {note}\n"));
            }
        }
        _ => out.push_str("_No prior run available for comparison._\n"),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bucket, MarketType, OrderbookSnapshot};

    fn candidate(ticker: &str, bucket: Bucket, ask: i64, rank: Option<u32>) -> UnifiedCandidate {
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
                implied_best_no_ask_cents: Some(ask),
                bid_room_cents: Some(3),
                ..Default::default()
            },
            model: None,
            fees_ev: None,
            manual_trade_plan: None,
            allocation: None,
            bucket,
            bucket_reason: String::new(),
            rank,
            warnings: vec![],
        }
    }

    fn slate(primary: Vec<UnifiedCandidate>, tight: Vec<UnifiedCandidate>) -> DailySlate {
        let config = Config::default();
        build_daily_slate(
            "2026-02-24 08:00 ET",
            "2026-02-24",
            primary,
            tight,
            vec![],
            vec![],
            5,
            40,
            3,
            &config,
        )
    }

    #[test]
    fn test_delta_new_and_removed() {
        let config = Config::default();
        let current = slate(vec![candidate("A", Bucket::Primary, 92, Some(1))], vec![]);
        let prior = slate(vec![candidate("B", Bucket::Primary, 92, Some(1))], vec![]);

        let notes = compute_delta(&current, &prior, &config);
        assert!(notes.iter().any(|n| n.starts_with("NEW: A")));
        assert!(notes.iter().any(|n| n.starts_with("REMOVED: B")));
    }

    #[test]
    fn test_delta_price_move_threshold() {
        let config = Config::default();
        // 1c move: below threshold, no note.
        let current = slate(vec![candidate("A", Bucket::Primary, 93, Some(1))], vec![]);
        let prior = slate(vec![candidate("A", Bucket::Primary, 92, Some(1))], vec![]);
        let notes = compute_delta(&current, &prior, &config);
        assert!(!notes.iter().any(|n| n.contains("ask moved")));

        // 2c move: noted.
        let current = slate(vec![candidate("A", Bucket::Primary, 94, Some(1))], vec![]);
        let notes = compute_delta(&current, &prior, &config);
        assert!(notes.iter().any(|n| n.contains("ask moved 92c -> 94c")));
    }

    #[test]
    fn test_delta_no_changes_single_note() {
        let config = Config::default();
        let current = slate(vec![candidate("A", Bucket::Primary, 92, Some(1))], vec![]);
        let notes = compute_delta(&current, &current.clone(), &config);
        assert_eq!(notes, vec!["No material changes from prior run.".to_string()]);
    }

    #[test]
    fn test_delta_count_changes() {
        let config = Config::default();
        let current = slate(
            vec![candidate("A", Bucket::Primary, 92, Some(1))],
            vec![candidate("B", Bucket::Tight, 91, Some(1))],
        );
        let prior = slate(
            vec![
                candidate("A", Bucket::Primary, 92, Some(1)),
                candidate("B", Bucket::Primary, 91, Some(2)),
            ],
            vec![],
        );
        let notes = compute_delta(&current, &prior, &config);
        assert!(notes.iter().any(|n| n.contains("PRIMARY count: 2 -> 1")));
        assert!(notes.iter().any(|n| n.contains("TIGHT count: 0 -> 1")));
    }

    #[test]
    fn test_suppress_small_change() {
        let config = Config::default();
        let curr = candidate("A", Bucket::Tight, 93, Some(1));
        let prev = candidate("A", Bucket::Primary, 92, Some(1));
        // 1c move, no EV data, no confidence change: suppressed.
        assert!(should_suppress_change(&curr, &prev, &config));

        // 2c move: allowed through.
        let curr = candidate("A", Bucket::Tight, 94, Some(1));
        assert!(!should_suppress_change(&curr, &prev, &config));
    }

    #[test]
    fn test_artifacts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let current = slate(vec![candidate("A", Bucket::Primary, 92, Some(1))], vec![]);

        let json_path = dir.path().join("2026-02-24").join("DAILY_SLATE_test.json");
        write_daily_slate_json(&current, &json_path).unwrap();
        let loaded = load_prior_slate(&json_path).unwrap();
        assert_eq!(loaded.picks_primary.len(), 1);
        assert_eq!(loaded.picks_primary[0].market_ticker, "A");
        assert_eq!(loaded.scan_stats.events_scanned, 5);

        let report_path = dir.path().join("2026-02-24").join("REPORT_test.md");
        write_report_md(&current, Some(&["NEW: A appeared".to_string()]), &report_path).unwrap();
        let report = std::fs::read_to_string(&report_path).unwrap();
        assert!(report.contains("## PRIMARY Picks"));
        assert!(report.contains("NEW: A appeared"));
        assert!(report.contains("Manual Placement Checklist"));
    }

    #[test]
    fn test_load_prior_slate_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(load_prior_slate(&path).is_none());
        assert!(load_prior_slate(&dir.path().join("missing.json")).is_none());
    }
}
