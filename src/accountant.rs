//! Fees & EV accounting.
//!
//! Kalshi fee schedule: fee = ceil(rate * contracts * P * (1 - P)) dollars,
//! P = price / 100, charged per trade on execution. Strategy rests limit
//! orders, so the reported fee and EV use the maker rate; the max-buy
//! search stays on the conservative taker rate.

use crate::config::FeeConfig;
use crate::models::{Accounting, ModelOutput, OrderbookSnapshot};

fn fee_cents(rate: f64, price_cents: i64, contracts: i64) -> i64 {
    let p = price_cents as f64 / 100.0;
    let raw = rate * contracts as f64 * p * (1.0 - p) * 100.0;
    // Small epsilon absorbs float noise (e.g. 1.7500000000000002) before
    // rounding up to the next cent.
    (raw - 1e-9).ceil().max(0.0) as i64
}

/// Taker fee in cents for `contracts` at `price_cents`.
pub fn taker_fee_cents(price_cents: i64, contracts: i64, fees: &FeeConfig) -> i64 {
    fee_cents(fees.taker_rate, price_cents, contracts)
}

/// Maker fee in cents (resting limit orders).
pub fn maker_fee_cents(price_cents: i64, contracts: i64, fees: &FeeConfig) -> i64 {
    fee_cents(fees.maker_rate, price_cents, contracts)
}

/// Net expected value in cents (per contract) of buying NO at a price.
///
/// If NO wins the payout is 100c, so EV = p_no * 100 - price - fee. The
/// taker fee is charged on execution.
pub fn ev_no_cents(buy_price_no_cents: i64, p_no: f64, contracts: i64, fees: &FeeConfig) -> f64 {
    let fee = taker_fee_cents(buy_price_no_cents, contracts, fees);
    let fee_per_contract = if contracts > 0 {
        fee as f64 / contracts as f64
    } else {
        0.0
    };

    let payout_if_win = 100.0 - buy_price_no_cents as f64;
    let ev = p_no * payout_if_win - (1.0 - p_no) * buy_price_no_cents as f64 - fee_per_contract;
    (ev * 100.0).round() / 100.0
}

/// Largest NO price in [1, 99] with EV >= 0 after fees; 0 if none.
/// EV is monotone in price, so the downward linear search stops at the
/// break-even point.
pub fn max_buy_price_no(p_no: f64, fees: &FeeConfig) -> i64 {
    for price in (1..=99).rev() {
        if ev_no_cents(price, p_no, 1, fees) >= 0.0 {
            return price;
        }
    }
    0
}

/// Edge as a percentage: (model - implied) / implied * 100.
/// Positive means the model thinks NO is more likely than the market does.
pub fn edge_vs_implied(p_no_model: f64, implied_p_no: f64) -> f64 {
    if implied_p_no <= 0.0 {
        return 0.0;
    }
    let edge = (p_no_model - implied_p_no) / implied_p_no * 100.0;
    (edge * 100.0).round() / 100.0
}

/// Produce the full Accounting record for a candidate at the planner's
/// recommended limit price.
pub fn compute_accounting(
    market_ticker: &str,
    orderbook: &OrderbookSnapshot,
    model: &ModelOutput,
    recommended_limit_no_cents: i64,
    fees: &FeeConfig,
) -> Accounting {
    let implied_no_ask = orderbook.implied_best_no_ask_cents;
    let implied_p_no = implied_no_ask.map_or(0.0, |a| a as f64 / 100.0);
    let p_no = model.p_no;

    let maker_fee = maker_fee_cents(recommended_limit_no_cents, 1, fees);
    let taker_fee = taker_fee_cents(recommended_limit_no_cents, 1, fees);

    // EV at the recommended limit, adjusted from taker to maker fee since
    // the order rests.
    let ev_taker = ev_no_cents(recommended_limit_no_cents, p_no, 1, fees);
    let ev_maker = ev_taker + (taker_fee - maker_fee) as f64;

    let max_buy = max_buy_price_no(p_no, fees);
    let edge = edge_vs_implied(p_no, implied_p_no);

    let mut notes: Vec<String> = Vec::new();
    let mut no_trade_reason = None;

    if ev_maker <= 0.0 {
        let reason = format!(
            "Negative EV at recommended limit {recommended_limit_no_cents}c: EV={ev_maker:.1}c"
        );
        notes.push(reason.clone());
        no_trade_reason = Some(reason);
    }

    if let Some(ask) = implied_no_ask {
        if recommended_limit_no_cents > ask {
            notes.push(format!(
                "WARNING: limit {recommended_limit_no_cents}c > implied ask {ask}c"
            ));
        }
    }

    notes.push(format!("Taker fee={taker_fee}c, Maker fee={maker_fee}c at limit"));
    notes.push(format!("Model p(NO)={p_no:.4}, Implied p(NO)={implied_p_no:.4}"));

    Accounting {
        market_ticker: market_ticker.to_string(),
        implied_p_no_from_implied_ask: implied_p_no,
        fee_est_cents_per_contract: maker_fee as f64,
        ev_net_est_cents_at_recommended_limit: ev_maker,
        max_buy_price_no_cents: max_buy,
        edge_vs_implied_pct: edge,
        accounting_notes: notes,
        no_trade_reason_if_any: no_trade_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KnifeEdgeRisk, UncertaintyLevel};

    fn fees() -> FeeConfig {
        FeeConfig::default()
    }

    fn model(p_no: f64) -> ModelOutput {
        ModelOutput {
            market_ticker: "T".to_string(),
            p_yes: 1.0 - p_no,
            p_no,
            method: "test".to_string(),
            signals_used: vec![],
            assumptions: vec![],
            uncertainty_level: UncertaintyLevel::Low,
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
        }
    }

    #[test]
    fn test_fee_at_90c_one_contract() {
        // taker: ceil(0.07 * 0.9 * 0.1 * 100) = ceil(0.63) = 1
        assert_eq!(taker_fee_cents(90, 1, &fees()), 1);
        // maker: ceil(0.1575) = 1
        assert_eq!(maker_fee_cents(90, 1, &fees()), 1);
    }

    #[test]
    fn test_fee_zero_at_price_bounds() {
        assert_eq!(taker_fee_cents(0, 10, &fees()), 0);
        assert_eq!(taker_fee_cents(100, 10, &fees()), 0);
        assert_eq!(maker_fee_cents(0, 10, &fees()), 0);
        assert_eq!(maker_fee_cents(100, 10, &fees()), 0);
    }

    #[test]
    fn test_taker_fee_dominates_maker() {
        for price in 1..=99 {
            for contracts in [1, 5, 100] {
                let taker = taker_fee_cents(price, contracts, &fees());
                let maker = maker_fee_cents(price, contracts, &fees());
                assert!(taker >= maker, "price={price} contracts={contracts}");
                assert!(maker >= 0);
            }
        }
    }

    #[test]
    fn test_ev_at_90c_with_96_pct() {
        // EV = 0.96 * 10 - 0.04 * 90 - 1 = 5.0 cents
        let ev = ev_no_cents(90, 0.96, 1, &fees());
        assert!((ev - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_buy_price_covers_break_even() {
        let max = max_buy_price_no(0.96, &fees());
        assert!(max >= 90, "p_no=0.96 supports at least 90c, got {max}");
        assert!(ev_no_cents(max, 0.96, 1, &fees()) >= 0.0);
        if max < 99 {
            assert!(ev_no_cents(max + 1, 0.96, 1, &fees()) < 0.0);
        }
        // A hopeless model supports no price.
        assert_eq!(max_buy_price_no(0.0, &fees()), 0);
    }

    #[test]
    fn test_edge_vs_implied() {
        assert!((edge_vs_implied(0.96, 0.92) - 4.35).abs() < 0.01);
        assert_eq!(edge_vs_implied(0.96, 0.0), 0.0);
        assert!(edge_vs_implied(0.90, 0.92) < 0.0);
    }

    #[test]
    fn test_accounting_positive_ev_has_no_reason() {
        let ob = OrderbookSnapshot {
            best_yes_bid_cents: Some(8),
            best_no_bid_cents: Some(89),
            implied_best_no_ask_cents: Some(92),
            implied_best_yes_ask_cents: Some(11),
            bid_room_cents: Some(3),
            ..Default::default()
        };
        let acct = compute_accounting("T", &ob, &model(0.97), 90, &fees());
        assert!(acct.ev_net_est_cents_at_recommended_limit > 0.0);
        assert!(acct.no_trade_reason_if_any.is_none());
        assert!(acct
            .accounting_notes
            .iter()
            .any(|n| n.contains("Taker fee")));
    }

    #[test]
    fn test_accounting_negative_ev_sets_reason() {
        let ob = OrderbookSnapshot {
            implied_best_no_ask_cents: Some(92),
            ..Default::default()
        };
        let acct = compute_accounting("T", &ob, &model(0.80), 90, &fees());
        assert!(acct.ev_net_est_cents_at_recommended_limit <= 0.0);
        assert!(acct.no_trade_reason_if_any.is_some());
    }

    #[test]
    fn test_accounting_warns_when_limit_exceeds_ask() {
        let ob = OrderbookSnapshot {
            implied_best_no_ask_cents: Some(89),
            ..Default::default()
        };
        let acct = compute_accounting("T", &ob, &model(0.97), 92, &fees());
        assert!(acct
            .accounting_notes
            .iter()
            .any(|n| n.starts_with("WARNING: limit")));
    }
}
