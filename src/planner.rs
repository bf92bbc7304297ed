//! Microstructure & manual execution planner.
//!
//! Assesses liquidity and spread, computes the recommended NO limit, and
//! generates the manual order checklist. Orders are never placed through
//! the API — the plan is instructions for a human.

use crate::config::{Config, SpreadConfig};
use crate::models::{ExecutionPlan, OrderbookSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityVerdict {
    Ok,
    Thin,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadVerdict {
    Ok,
    WideException,
    Reject,
}

#[derive(Debug, Clone)]
pub struct LiquidityAssessment {
    pub verdict: LiquidityVerdict,
    pub top_of_book_depth: i64,
    pub top3_depth: i64,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct SpreadAssessment {
    pub verdict: SpreadVerdict,
    pub spread_cents: Option<i64>,
    pub notes: String,
}

/// Evaluate orderbook liquidity.
///
/// Empty top-of-book or near-zero top-3 depth rejects outright; under 20
/// contracts across the top 3 levels is THIN.
pub fn assess_liquidity(ob: &OrderbookSnapshot) -> LiquidityAssessment {
    let yes_top = ob.top3_yes_bids.first().map_or(0, |l| l[1]);
    let no_top = ob.top3_no_bids.first().map_or(0, |l| l[1]);
    let top_of_book = yes_top + no_top;
    let top3 = ob.top3_depth();

    if top_of_book == 0 {
        return LiquidityAssessment {
            verdict: LiquidityVerdict::Reject,
            top_of_book_depth: 0,
            top3_depth: top3,
            notes: "No bids on either side — book is empty".to_string(),
        };
    }

    if top3 < 5 {
        return LiquidityAssessment {
            verdict: LiquidityVerdict::Reject,
            top_of_book_depth: top_of_book,
            top3_depth: top3,
            notes: format!("Top-3 depth too thin ({top3} contracts)"),
        };
    }

    if top3 < 20 {
        return LiquidityAssessment {
            verdict: LiquidityVerdict::Thin,
            top_of_book_depth: top_of_book,
            top3_depth: top3,
            notes: format!("Thin liquidity — top-3 depth {top3} contracts"),
        };
    }

    LiquidityAssessment {
        verdict: LiquidityVerdict::Ok,
        top_of_book_depth: top_of_book,
        top3_depth: top3,
        notes: format!("Adequate liquidity — top-3 depth {top3} contracts"),
    }
}

/// Check spread sanity.
///
/// A spread over `max_spread_cents` rejects unless depth is strong AND the
/// model edge is large, in which case it passes as WIDE_EXCEPTION.
pub fn assess_spread(
    ob: &OrderbookSnapshot,
    model_edge_pct: Option<f64>,
    liquidity: Option<&LiquidityAssessment>,
    spread_cfg: &SpreadConfig,
) -> SpreadAssessment {
    let Some(spread) = ob.bid_room_cents else {
        return SpreadAssessment {
            verdict: SpreadVerdict::Reject,
            spread_cents: None,
            notes: "Cannot compute spread — missing bid data".to_string(),
        };
    };

    if spread <= spread_cfg.max_spread_cents {
        return SpreadAssessment {
            verdict: SpreadVerdict::Ok,
            spread_cents: Some(spread),
            notes: format!(
                "Spread {spread}c within limit ({}c)",
                spread_cfg.max_spread_cents
            ),
        };
    }

    let strong_depth = liquidity.map_or(false, |l| l.verdict == LiquidityVerdict::Ok);
    let large_edge = model_edge_pct.map_or(false, |e| e > 3.0);

    if strong_depth && large_edge {
        let edge = model_edge_pct.unwrap_or(0.0);
        return SpreadAssessment {
            verdict: SpreadVerdict::WideException,
            spread_cents: Some(spread),
            notes: format!(
                "WIDE-SPREAD EXCEPTION: spread {spread}c > {}c but depth is strong and edge is {edge:.1}%",
                spread_cfg.max_spread_cents
            ),
        };
    }

    SpreadAssessment {
        verdict: SpreadVerdict::Reject,
        spread_cents: Some(spread),
        notes: format!(
            "Spread {spread}c exceeds limit ({}c) without qualifying for exception",
            spread_cfg.max_spread_cents
        ),
    }
}

/// Compute the recommended NO limit price.
///
/// Returns `(limit_cents, rationale, fill_probability_notes)`.
/// bid_room >= 2: improve 2-6c below the implied ask (midpoint target);
/// bid_room < 2: improve 1-3c (TIGHT). Improvement over 6c flags low fill
/// probability. Limit is clamped to [1, 99].
pub fn recommended_limit(ob: &OrderbookSnapshot) -> (i64, String, String) {
    let Some(ask) = ob.implied_best_no_ask_cents else {
        return (
            ob.best_no_bid_cents.unwrap_or(90),
            "No implied ask available — using best NO bid or default".to_string(),
            "UNKNOWN fill probability — no ask data".to_string(),
        );
    };

    let room = ob.bid_room_cents.unwrap_or(0);

    let (improvement, rationale, mut fill_notes) = if room >= 2 {
        let improvement = (room / 2).clamp(2, 6);
        (
            improvement,
            format!("bid_room={room}c >= 2: improving {improvement}c below implied ask {ask}c"),
            "NORMAL fill probability".to_string(),
        )
    } else {
        let improvement = room.max(1).clamp(1, 3);
        (
            improvement,
            format!("TIGHT: bid_room={room}c < 2: improving {improvement}c below implied ask {ask}c"),
            "MODERATE fill probability — tight spread".to_string(),
        )
    };

    if improvement > 6 {
        fill_notes = "LOW FILL PROBABILITY — improvement exceeds 6c".to_string();
    }

    let limit = (ask - improvement).clamp(1, 99);
    (limit, rationale, fill_notes)
}

/// Human-readable manual order placement steps.
pub fn manual_steps(
    market_ticker: &str,
    market_url: &str,
    limit_no_cents: i64,
    stake_usd: Option<f64>,
) -> Vec<String> {
    let contracts_note = match stake_usd {
        Some(stake) if limit_no_cents > 0 => {
            let max_contracts = (stake * 100.0 / limit_no_cents as f64) as i64;
            format!(" ({max_contracts} contracts at {limit_no_cents}c)")
        }
        _ => String::new(),
    };

    vec![
        format!("1. Navigate to {market_url}"),
        "2. Select the NO side".to_string(),
        "3. Set order type to LIMIT".to_string(),
        format!("4. Set limit price to {limit_no_cents}c ($0.{limit_no_cents:02})"),
        format!("5. Set quantity{contracts_note}"),
        format!("6. Review order summary — verify ticker is {market_ticker}"),
        "7. Submit order".to_string(),
        "8. Wait 5-10 minutes, then check fill status".to_string(),
    ]
}

/// Conditions under which the human should cancel or revise the order.
pub fn cancel_replace_rules(limit_no_cents: i64, implied_no_ask_cents: Option<i64>) -> Vec<String> {
    let mut rules = vec![
        format!(
            "CANCEL if implied NO ask moves above {}c (edge has evaporated)",
            limit_no_cents + 3
        ),
        "CANCEL if market status changes to closed/halted".to_string(),
        "CANCEL if not filled within 15 minutes and edge is shrinking".to_string(),
    ];

    if let Some(ask) = implied_no_ask_cents {
        rules.push(format!(
            "ADJUST +1c toward ask (to {}c) if not filled after 10 min and ask is still at {ask}c",
            limit_no_cents + 1
        ));
        rules.push(format!(
            "DO NOT chase above {}c",
            (limit_no_cents + 2).min(ask)
        ));
    }

    rules.push("NEVER place market orders — always use limits".to_string());
    rules
}

/// Build the complete ExecutionPlan for a candidate.
pub fn build_execution_plan(
    market_ticker: &str,
    market_url: &str,
    ob: &OrderbookSnapshot,
    stake_usd: Option<f64>,
    _config: &Config,
) -> ExecutionPlan {
    let (limit, rationale, fill_notes) = recommended_limit(ob);

    ExecutionPlan {
        market_ticker: market_ticker.to_string(),
        implied_best_no_ask_cents: ob.implied_best_no_ask_cents,
        best_no_bid_cents: ob.best_no_bid_cents,
        bid_room_cents: ob.bid_room_cents,
        recommended_limit_no_cents: limit,
        limit_rationale: rationale,
        manual_order_steps: manual_steps(market_ticker, market_url, limit, stake_usd),
        cancel_replace_rules: cancel_replace_rules(limit, ob.implied_best_no_ask_cents),
        fill_probability_notes: fill_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ob(ask: Option<i64>, no_bid: Option<i64>, top3_yes: Vec<[i64; 2]>, top3_no: Vec<[i64; 2]>) -> OrderbookSnapshot {
        let bid_room = match (ask, no_bid) {
            (Some(a), Some(b)) => Some(a - b),
            _ => None,
        };
        OrderbookSnapshot {
            best_yes_bid_cents: ask.map(|a| 100 - a),
            best_no_bid_cents: no_bid,
            implied_best_no_ask_cents: ask,
            implied_best_yes_ask_cents: no_bid.map(|b| 100 - b),
            bid_room_cents: bid_room,
            top3_yes_bids: top3_yes,
            top3_no_bids: top3_no,
            depth_notes: String::new(),
        }
    }

    #[test]
    fn test_liquidity_empty_book_rejects() {
        let snapshot = ob(Some(92), Some(89), vec![], vec![]);
        let a = assess_liquidity(&snapshot);
        assert_eq!(a.verdict, LiquidityVerdict::Reject);
        assert_eq!(a.top_of_book_depth, 0);
    }

    #[test]
    fn test_liquidity_boundaries_at_5_and_20() {
        // top3 = 4 -> REJECT
        let a = assess_liquidity(&ob(Some(92), Some(89), vec![[8, 2]], vec![[89, 2]]));
        assert_eq!(a.verdict, LiquidityVerdict::Reject);
        // top3 = 5 -> THIN
        let a = assess_liquidity(&ob(Some(92), Some(89), vec![[8, 3]], vec![[89, 2]]));
        assert_eq!(a.verdict, LiquidityVerdict::Thin);
        // top3 = 19 -> THIN
        let a = assess_liquidity(&ob(Some(92), Some(89), vec![[8, 10]], vec![[89, 9]]));
        assert_eq!(a.verdict, LiquidityVerdict::Thin);
        // top3 = 20 -> OK
        let a = assess_liquidity(&ob(Some(92), Some(89), vec![[8, 10]], vec![[89, 10]]));
        assert_eq!(a.verdict, LiquidityVerdict::Ok);
    }

    #[test]
    fn test_spread_boundaries_at_6_and_7() {
        let cfg = SpreadConfig::default();
        let a = assess_spread(&ob(Some(92), Some(86), vec![], vec![]), None, None, &cfg);
        assert_eq!(a.verdict, SpreadVerdict::Ok); // 6c exactly

        let a = assess_spread(&ob(Some(93), Some(86), vec![], vec![]), None, None, &cfg);
        assert_eq!(a.verdict, SpreadVerdict::Reject); // 7c, no exception
    }

    #[test]
    fn test_spread_wide_exception_needs_depth_and_edge() {
        let cfg = SpreadConfig::default();
        let snapshot = ob(Some(95), Some(87), vec![[8, 30]], vec![[87, 30]]);
        let liq = assess_liquidity(&snapshot);
        assert_eq!(liq.verdict, LiquidityVerdict::Ok);

        let a = assess_spread(&snapshot, Some(4.0), Some(&liq), &cfg);
        assert_eq!(a.verdict, SpreadVerdict::WideException);

        // Edge too small: rejected.
        let a = assess_spread(&snapshot, Some(2.0), Some(&liq), &cfg);
        assert_eq!(a.verdict, SpreadVerdict::Reject);
    }

    #[test]
    fn test_spread_missing_room_rejects() {
        let snapshot = ob(None, None, vec![], vec![]);
        let a = assess_spread(&snapshot, None, None, &SpreadConfig::default());
        assert_eq!(a.verdict, SpreadVerdict::Reject);
        assert!(a.spread_cents.is_none());
    }

    #[test]
    fn test_recommended_limit_normal_room() {
        // room=3: improvement clamp(1, 2, 6) = 2, limit = 90.
        let (limit, rationale, fill) = recommended_limit(&ob(Some(92), Some(89), vec![], vec![]));
        assert_eq!(limit, 90);
        assert!(rationale.contains("bid_room=3c"));
        assert!(fill.contains("NORMAL"));

        // room=10: improvement 5, limit 90.
        let (limit, _, _) = recommended_limit(&ob(Some(95), Some(85), vec![], vec![]));
        assert_eq!(limit, 90);
    }

    #[test]
    fn test_recommended_limit_tight_room() {
        // room=1: improvement 1, limit 91, TIGHT.
        let (limit, rationale, fill) = recommended_limit(&ob(Some(92), Some(91), vec![], vec![]));
        assert_eq!(limit, 91);
        assert!(rationale.starts_with("TIGHT"));
        assert!(fill.contains("MODERATE"));
    }

    #[test]
    fn test_recommended_limit_no_ask_falls_back() {
        let (limit, _, fill) = recommended_limit(&ob(None, Some(88), vec![], vec![]));
        assert_eq!(limit, 88);
        assert!(fill.contains("UNKNOWN"));

        let (limit, _, _) = recommended_limit(&ob(None, None, vec![], vec![]));
        assert_eq!(limit, 90);
    }

    #[test]
    fn test_execution_plan_carries_steps_and_rules() {
        let snapshot = ob(Some(92), Some(89), vec![[8, 30]], vec![[89, 20]]);
        let plan = build_execution_plan(
            "KXHIGHNY-TEST",
            "https://kalshi.com/markets/KXHIGHNY-TEST",
            &snapshot,
            Some(4.20),
            &Config::default(),
        );
        assert_eq!(plan.recommended_limit_no_cents, 90);
        assert_eq!(plan.manual_order_steps.len(), 8);
        assert!(plan.manual_order_steps[4].contains("contracts at 90c"));
        assert!(plan
            .cancel_replace_rules
            .iter()
            .any(|r| r.contains("NEVER place market orders")));
    }
}
