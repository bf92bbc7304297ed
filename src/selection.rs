//! Selection pipeline: merge, hard rejects, buckets, ranking, caps.
//!
//! Hard rejects fire in a fixed order and the first match wins. Survivors
//! are classified into PRIMARY / TIGHT / NEAR_MISS / REJECTED by the
//! implied-NO-ask window and bid room, ranked within each bucket, run
//! through the correlation caps, and capped at the PRIMARY pick limit.

use crate::config::Config;
use crate::models::{
    Accounting, Bucket, ExecutionPlan, MappingConfidence, ModelOutput, RawCandidate,
    RiskRecommendation, SettlementSpec, UnifiedCandidate,
};
use crate::planner::{assess_spread, SpreadVerdict};
use crate::risk::{allocate_stakes, enforce_correlation_caps};

/// Combine all module outputs into a single UnifiedCandidate.
/// The default bucket is REJECTED until classification runs.
pub fn merge_candidate(
    raw: RawCandidate,
    settlement: Option<SettlementSpec>,
    model: Option<ModelOutput>,
    accounting: Option<Accounting>,
    execution: Option<ExecutionPlan>,
    risk: Option<RiskRecommendation>,
) -> UnifiedCandidate {
    UnifiedCandidate {
        run_time_et: raw.run_time_et,
        target_date_local: raw.target_date_local,
        city: raw.city,
        market_type: raw.market_type,
        event_name: raw.event_name,
        market_ticker: raw.market_ticker,
        market_url: raw.market_url,
        bracket_definition: raw.bracket_definition,
        settlement_spec: settlement,
        orderbook_snapshot: raw.orderbook_snapshot,
        model,
        fees_ev: accounting,
        manual_trade_plan: execution,
        allocation: risk,
        bucket: Bucket::Rejected,
        bucket_reason: String::new(),
        rank: None,
        warnings: vec![],
    }
}

/// Apply the hard reject gates in sequence; first match wins.
/// Returns the reject reason, or None if the candidate survives.
pub fn apply_hard_rejects(candidate: &UnifiedCandidate, config: &Config) -> Option<String> {
    let ob = &candidate.orderbook_snapshot;

    // 1. Mapping confidence must be HIGH.
    if let Some(spec) = &candidate.settlement_spec {
        if spec.mapping_confidence != MappingConfidence::High {
            return Some(format!(
                "Mapping confidence {} != HIGH",
                spec.mapping_confidence.as_str()
            ));
        }
    }

    // 2. Must have an implied NO ask (requires a best YES bid).
    if ob.implied_best_no_ask_cents.is_none() {
        return Some("Cannot compute implied_best_no_ask — missing best_yes_bid".to_string());
    }

    // 3. Spread sanity.
    let spread = assess_spread(ob, None, None, &config.spread);
    if spread.verdict == SpreadVerdict::Reject {
        return Some(format!("Spread reject: {}", spread.notes));
    }

    // 4. EV must be positive.
    if let Some(fees_ev) = &candidate.fees_ev {
        if let Some(reason) = &fees_ev.no_trade_reason_if_any {
            return Some(format!("EV reject: {reason}"));
        }
    }

    if let Some(model) = &candidate.model {
        let reject_thresh = config.lock_in.p_new_extreme_reject_threshold;

        // 5. LOW lock-in gate.
        if model.lock_in_flag_if_low == Some(crate::models::LockInFlag::Locking) {
            if let Some(p) = model.p_new_lower_low_after_now {
                if p < reject_thresh {
                    return Some("LOW lock-in: past sunrise+2h and P(new low) < 5%".to_string());
                }
            }
        }

        // 6. HIGH lock-in gate.
        if model.high_lock_in_flag == Some(crate::models::LockInFlag::Locking) {
            if let Some(p) = model.p_new_higher_high_after_now {
                if p < reject_thresh {
                    return Some("HIGH lock-in: past peak+2h and P(new high) < 5%".to_string());
                }
            }
        }
    }

    None
}

/// Classify a surviving candidate into a bucket.
///
/// PRIMARY: ask in [90, 93] with room >= 2; same window with less room is
/// TIGHT; [88, 89] and [94, 95] are NEAR_MISS; anything else REJECTED.
pub fn classify_bucket(candidate: &UnifiedCandidate, config: &Config) -> (Bucket, String) {
    let ob = &candidate.orderbook_snapshot;
    let pw = &config.price_window;

    let Some(ask) = ob.implied_best_no_ask_cents else {
        return (Bucket::Rejected, "No implied NO ask price".to_string());
    };

    let room = ob.bid_room_cents.unwrap_or(0);
    let min_room = config.spread.min_bid_room_primary;

    if pw.primary_low <= ask && ask <= pw.primary_high {
        let window = format!("[{},{}]", pw.primary_low, pw.primary_high);
        if room >= min_room {
            return (
                Bucket::Primary,
                format!("ask={ask}c in {window}, room={room}c >= {min_room}"),
            );
        }
        return (
            Bucket::Tight,
            format!("ask={ask}c in {window}, room={room}c < {min_room}"),
        );
    }

    let (lo_lo, lo_hi) = pw.near_miss_low_band;
    let (hi_lo, hi_hi) = pw.near_miss_high_band;
    if lo_lo <= ask && ask <= lo_hi {
        return (
            Bucket::NearMiss,
            format!("ask={ask}c in near-miss low band [{lo_lo},{lo_hi}]"),
        );
    }
    if hi_lo <= ask && ask <= hi_hi {
        return (
            Bucket::NearMiss,
            format!("ask={ask}c in near-miss high band [{hi_lo},{hi_hi}]"),
        );
    }

    (Bucket::Rejected, format!("ask={ask}c outside scan window"))
}

/// Ranking key, lexicographic ascending: higher EV first, then lower
/// uncertainty, lower knife-edge, more depth, more volatility-window time.
/// Floats are cent-scaled to integers for a total order.
fn rank_sort_key(candidate: &UnifiedCandidate) -> (i64, u8, u8, i64, i64) {
    let ev_centicents = candidate
        .fees_ev
        .as_ref()
        .map_or(0, |a| (a.ev_net_est_cents_at_recommended_limit * 100.0).round() as i64);

    let (uncertainty, knife_edge) = candidate
        .model
        .as_ref()
        .map_or((1, 1), |m| (m.uncertainty_level.rank(), m.knife_edge_risk.rank()));

    let depth = candidate.orderbook_snapshot.top3_depth();

    let hours_centi = candidate.model.as_ref().map_or(0, |m| {
        (m.hours_remaining_in_meaningful_volatility_window * 100.0).round() as i64
    });

    (-ev_centicents, uncertainty, knife_edge, -depth, -hours_centi)
}

/// Sort candidates by the ranking key and assign 1-based ranks.
pub fn rank_candidates(mut candidates: Vec<UnifiedCandidate>) -> Vec<UnifiedCandidate> {
    candidates.sort_by_key(rank_sort_key);
    for (i, c) in candidates.iter_mut().enumerate() {
        c.rank = Some(i as u32 + 1);
    }
    candidates
}

/// Enforce the PRIMARY pick limit. Overflow is demoted to TIGHT, keeping
/// its pre-demotion rank, and prepended so the ranking advantage shows.
pub fn enforce_pick_counts(
    mut primary: Vec<UnifiedCandidate>,
    tight: Vec<UnifiedCandidate>,
    config: &Config,
) -> (Vec<UnifiedCandidate>, Vec<UnifiedCandidate>) {
    let max_picks = config.picks.max_primary_picks;
    if primary.len() <= max_picks {
        return (primary, tight);
    }

    let mut demoted = primary.split_off(max_picks);
    for c in &mut demoted {
        c.bucket = Bucket::Tight;
        c.bucket_reason.push_str(" (demoted: exceeded pick limit)");
    }
    demoted.extend(tight);
    (primary, demoted)
}

/// Full selection pipeline. Returns (primary, tight, near_miss, rejected).
pub fn run_bucket_pipeline(
    candidates: Vec<UnifiedCandidate>,
    config: &Config,
) -> (
    Vec<UnifiedCandidate>,
    Vec<UnifiedCandidate>,
    Vec<UnifiedCandidate>,
    Vec<UnifiedCandidate>,
) {
    let mut primary = Vec::new();
    let mut tight = Vec::new();
    let mut near_miss = Vec::new();
    let mut rejected = Vec::new();

    for mut candidate in candidates {
        if let Some(reason) = apply_hard_rejects(&candidate, config) {
            candidate.bucket = Bucket::Rejected;
            candidate.bucket_reason = reason;
            rejected.push(candidate);
            continue;
        }

        let (bucket, reason) = classify_bucket(&candidate, config);
        candidate.bucket = bucket;
        candidate.bucket_reason = reason;

        match bucket {
            Bucket::Primary => primary.push(candidate),
            Bucket::Tight => tight.push(candidate),
            Bucket::NearMiss => near_miss.push(candidate),
            Bucket::Rejected => rejected.push(candidate),
        }
    }

    let primary = rank_candidates(primary);
    let tight = rank_candidates(tight);
    let near_miss = rank_candidates(near_miss);

    // Correlation and metro caps, walked in rank order. Capped picks land
    // in REJECTED with the cap reason.
    let (primary, cap_rejects) = enforce_correlation_caps(primary, &config.correlation);
    for (mut capped, reason) in cap_rejects {
        tracing::info!("Cap removed {}: {reason}", capped.market_ticker);
        capped.bucket = Bucket::Rejected;
        capped.bucket_reason = reason;
        capped.rank = None;
        rejected.push(capped);
    }

    let (mut primary, tight) = enforce_pick_counts(primary, tight, config);

    allocate_stakes(&mut primary, config.bankroll.total_usd);

    (primary, tight, near_miss, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KnifeEdgeRisk, LockInFlag, MarketType, OrderbookSnapshot, UncertaintyLevel};

    fn snapshot(ask: i64, room: i64) -> OrderbookSnapshot {
        OrderbookSnapshot {
            best_yes_bid_cents: Some(100 - ask),
            best_no_bid_cents: Some(ask - room),
            implied_best_no_ask_cents: Some(ask),
            implied_best_yes_ask_cents: Some(100 - (ask - room)),
            bid_room_cents: Some(room),
            top3_yes_bids: vec![[100 - ask, 30]],
            top3_no_bids: vec![[ask - room, 30]],
            depth_notes: String::new(),
        }
    }

    fn candidate(ticker: &str, city: &str, ask: i64, room: i64) -> UnifiedCandidate {
        let raw = RawCandidate {
            run_time_et: "2026-02-24 07:00 ET".to_string(),
            target_date_local: "2026-02-24".to_string(),
            city: city.to_string(),
            market_type: MarketType::HighTemp,
            event_name: "EVT".to_string(),
            market_ticker: ticker.to_string(),
            market_url: format!("https://kalshi.com/markets/{ticker}"),
            bracket_definition: "40°F or above".to_string(),
            orderbook_snapshot: snapshot(ask, room),
            market_status_notes: String::new(),
        };
        merge_candidate(raw, None, None, None, None, None)
    }

    fn with_model(mut c: UnifiedCandidate, ev: f64, uncertainty: UncertaintyLevel) -> UnifiedCandidate {
        c.model = Some(ModelOutput {
            market_ticker: c.market_ticker.clone(),
            p_yes: 0.05,
            p_no: 0.95,
            method: String::new(),
            signals_used: vec![],
            assumptions: vec![],
            uncertainty_level: uncertainty,
            local_time_at_station: String::new(),
            hours_remaining_until_cli_day_close: 10.0,
            hours_remaining_in_meaningful_volatility_window: 2.0,
            sunrise_estimate_local: None,
            p_new_lower_low_after_now: None,
            lock_in_flag_if_low: None,
            typical_peak_time_estimate_local: None,
            p_new_higher_high_after_now: None,
            high_lock_in_flag: None,
            knife_edge_risk: KnifeEdgeRisk::Low,
            model_notes: vec![],
        });
        c.fees_ev = Some(Accounting {
            market_ticker: c.market_ticker.clone(),
            implied_p_no_from_implied_ask: 0.92,
            fee_est_cents_per_contract: 1.0,
            ev_net_est_cents_at_recommended_limit: ev,
            max_buy_price_no_cents: 95,
            edge_vs_implied_pct: 3.0,
            accounting_notes: vec![],
            no_trade_reason_if_any: None,
        });
        c
    }

    #[test]
    fn test_hard_reject_low_mapping_confidence() {
        let mut c = candidate("T1", "New York", 92, 3);
        c.settlement_spec = Some(crate::stations::build_settlement_spec(
            "Nowhereville",
            MarketType::HighTemp,
            None,
        ));
        let reason = apply_hard_rejects(&c, &Config::default()).unwrap();
        assert!(reason.contains("Mapping confidence"));
    }

    #[test]
    fn test_hard_reject_missing_ask() {
        let mut c = candidate("T1", "New York", 92, 3);
        c.orderbook_snapshot.implied_best_no_ask_cents = None;
        let reason = apply_hard_rejects(&c, &Config::default()).unwrap();
        assert!(reason.contains("implied_best_no_ask"));
    }

    #[test]
    fn test_hard_reject_lock_in_threshold_is_strict() {
        let mut c = with_model(candidate("T1", "New York", 92, 3), 5.0, UncertaintyLevel::Low);
        {
            let m = c.model.as_mut().unwrap();
            m.lock_in_flag_if_low = Some(LockInFlag::Locking);
            m.p_new_lower_low_after_now = Some(0.05); // exactly at threshold: passes
        }
        assert!(apply_hard_rejects(&c, &Config::default()).is_none());

        c.model.as_mut().unwrap().p_new_lower_low_after_now = Some(0.049);
        let reason = apply_hard_rejects(&c, &Config::default()).unwrap();
        assert!(reason.contains("LOW lock-in"));
    }

    #[test]
    fn test_bucket_boundaries() {
        let config = Config::default();
        let cases = [
            (88, 3, Bucket::NearMiss),
            (89, 3, Bucket::NearMiss),
            (90, 3, Bucket::Primary),
            (93, 3, Bucket::Primary),
            (94, 3, Bucket::NearMiss),
            (95, 3, Bucket::NearMiss),
            (96, 3, Bucket::Rejected),
            (87, 3, Bucket::Rejected),
            (92, 1, Bucket::Tight),
            (92, 2, Bucket::Primary),
        ];
        for (ask, room, expected) in cases {
            let c = candidate("T", "New York", ask, room);
            let (bucket, _) = classify_bucket(&c, &config);
            assert_eq!(bucket, expected, "ask={ask} room={room}");
        }
    }

    #[test]
    fn test_ranking_prefers_higher_ev_then_lower_uncertainty() {
        let a = with_model(candidate("A", "Denver", 92, 3), 3.0, UncertaintyLevel::Low);
        let b = with_model(candidate("B", "Miami", 92, 3), 5.0, UncertaintyLevel::High);
        let c = with_model(candidate("C", "Boston", 92, 3), 3.0, UncertaintyLevel::High);

        let ranked = rank_candidates(vec![a, b, c]);
        let order: Vec<&str> = ranked.iter().map(|c| c.market_ticker.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert_eq!(ranked[0].rank, Some(1));
        assert_eq!(ranked[2].rank, Some(3));
    }

    #[test]
    fn test_pick_cap_demotes_eleventh() {
        let config = Config::default();
        // 11 PRIMARY candidates in distinct groups so caps don't interfere.
        let mut primary = Vec::new();
        for i in 0..11 {
            let mut c = with_model(
                candidate(&format!("T{i}"), "New York", 92, 3),
                10.0 - i as f64,
                UncertaintyLevel::Low,
            );
            c.bucket = Bucket::Primary;
            c.rank = Some(i as u32 + 1);
            primary.push(c);
        }
        let (primary, tight) = enforce_pick_counts(primary, vec![], &config);
        assert_eq!(primary.len(), 10);
        assert_eq!(tight.len(), 1);
        assert_eq!(tight[0].market_ticker, "T10");
        assert_eq!(tight[0].bucket, Bucket::Tight);
        // Demotion keeps the pre-demotion rank.
        assert_eq!(tight[0].rank, Some(11));
        assert!(tight[0].bucket_reason.contains("demoted: exceeded pick limit"));
    }

    #[test]
    fn test_demoted_prepended_to_tight() {
        let config = Config::default();
        let mut primary = Vec::new();
        for i in 0..11 {
            let mut c = with_model(
                candidate(&format!("P{i}"), "Denver", 92, 3),
                10.0,
                UncertaintyLevel::Low,
            );
            c.bucket = Bucket::Primary;
            primary.push(c);
        }
        let mut t = candidate("EXISTING_TIGHT", "Miami", 92, 1);
        t.bucket = Bucket::Tight;
        let (_, tight) = enforce_pick_counts(primary, vec![t], &config);
        assert_eq!(tight[0].market_ticker, "P10");
        assert_eq!(tight[1].market_ticker, "EXISTING_TIGHT");
    }

    #[test]
    fn test_full_pipeline_buckets_and_ranks() {
        let config = Config::default();
        let candidates = vec![
            with_model(candidate("PRIM", "New York", 92, 3), 5.0, UncertaintyLevel::Low),
            with_model(candidate("TIGHT", "Miami", 91, 1), 4.0, UncertaintyLevel::Low),
            with_model(candidate("NEAR", "Denver", 88, 3), 3.0, UncertaintyLevel::Low),
            with_model(candidate("OUT", "Boston", 80, 3), 2.0, UncertaintyLevel::Low),
        ];
        let (primary, tight, near_miss, rejected) = run_bucket_pipeline(candidates, &config);
        assert_eq!(primary.len(), 1);
        assert_eq!(tight.len(), 1);
        assert_eq!(near_miss.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(primary[0].market_ticker, "PRIM");
        assert_eq!(primary[0].rank, Some(1));
        // Stakes were allocated for the final PRIMARY picks.
        // (allocation is None here since no risk module ran — tolerated.)
        assert_eq!(rejected[0].market_ticker, "OUT");
        assert!(rejected[0].bucket_reason.contains("outside scan window"));
    }
}
