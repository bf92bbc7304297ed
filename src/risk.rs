//! Risk & portfolio management.
//!
//! Correlation groups and metro clusters, cap enforcement, per-candidate
//! risk multipliers, risk-flag aggregation, and bankroll allocation.
//! Cities in one group tend to share a regional weather regime, so their
//! settlement outcomes are correlated.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::config::{Config, CorrelationConfig};
use crate::models::{
    Accounting, KnifeEdgeRisk, LockInFlag, ModelOutput, RiskRecommendation, UncertaintyLevel,
    UnifiedCandidate,
};

static CORRELATION_GROUPS: &[(&str, &[&str])] = &[
    (
        "Northeast",
        &[
            "New York",
            "NYC",
            "New York City",
            "Boston",
            "Philadelphia",
            "Philly",
            "LaGuardia",
            "LGA",
        ],
    ),
    (
        "Mid-Atlantic",
        &["Washington", "Washington D.C.", "DC", "Washington DC", "Charlotte"],
    ),
    ("Southeast", &["Miami", "Jacksonville", "Tampa", "Atlanta"]),
    ("Great Lakes", &["Chicago", "Detroit", "Minneapolis"]),
    (
        "South Central",
        &[
            "Dallas",
            "Dallas-Fort Worth",
            "DFW",
            "Houston",
            "Austin",
            "San Antonio",
            "Oklahoma City",
            "OKC",
            "Nashville",
            "New Orleans",
        ],
    ),
    ("Mountain", &["Denver", "Phoenix", "Las Vegas"]),
    (
        "Pacific",
        &["Los Angeles", "LA", "San Francisco", "SF", "Seattle"],
    ),
];

// Metro clusters — cities sharing the same weather station area.
static METRO_CLUSTERS: &[(&str, &[&str])] = &[
    ("NYC Metro", &["New York", "NYC", "New York City", "LaGuardia", "LGA"]),
    ("Chicago Metro", &["Chicago"]),
    ("DFW Metro", &["Dallas", "Dallas-Fort Worth", "DFW"]),
    ("South Florida", &["Miami", "Tampa"]),
    ("Texas Triangle", &["Houston", "Austin", "San Antonio"]),
    ("SoCal", &["Los Angeles", "LA"]),
    ("NorCal", &["San Francisco", "SF"]),
];

lazy_static! {
    static ref CITY_TO_CORR_GROUP: HashMap<String, &'static str> = {
        let mut map = HashMap::new();
        for (group, cities) in CORRELATION_GROUPS {
            for city in *cities {
                map.insert(city.to_lowercase(), *group);
            }
        }
        map
    };
    static ref CITY_TO_METRO: HashMap<String, &'static str> = {
        let mut map = HashMap::new();
        for (cluster, cities) in METRO_CLUSTERS {
            for city in *cities {
                map.insert(city.to_lowercase(), *cluster);
            }
        }
        map
    };
}

/// Substring match requiring at least 4 chars on both sides, so "LA" never
/// matches inside "Atlanta".
fn safe_substring_match(key: &str, candidate: &str) -> bool {
    if key.len() < 4 || candidate.len() < 4 {
        return false;
    }
    key.contains(candidate) || candidate.contains(key)
}

fn classify(city: &str, index: &HashMap<String, &'static str>, fallback: &'static str) -> String {
    let key = city.trim().to_lowercase();
    if let Some(v) = index.get(&key) {
        return v.to_string();
    }
    for (idx_key, v) in index.iter() {
        if safe_substring_match(&key, idx_key) {
            return v.to_string();
        }
    }
    fallback.to_string()
}

/// Correlation group for a city, or "Other".
pub fn correlation_group(city: &str) -> String {
    classify(city, &CITY_TO_CORR_GROUP, "Other")
}

/// Metro cluster for a city, or "Standalone".
pub fn metro_cluster(city: &str) -> String {
    classify(city, &CITY_TO_METRO, "Standalone")
}

/// Enforce correlation-group and metro-cluster caps.
///
/// `picks` must already be ordered best-first (rank order). The walk keeps
/// a candidate unless its group or metro is at the cap; rejected picks come
/// back with their cap reason so the caller can re-bucket them.
pub fn enforce_correlation_caps(
    picks: Vec<UnifiedCandidate>,
    config: &CorrelationConfig,
) -> (Vec<UnifiedCandidate>, Vec<(UnifiedCandidate, String)>) {
    let mut corr_counts: HashMap<String, usize> = HashMap::new();
    let mut metro_counts: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::with_capacity(picks.len());
    let mut rejected = Vec::new();

    for pick in picks {
        let group = correlation_group(&pick.city);
        let metro = metro_cluster(&pick.city);

        if corr_counts.get(&group).copied().unwrap_or(0)
            >= config.max_picks_per_correlation_group
        {
            let reason = format!(
                "Correlation cap: {group} already has {} picks",
                config.max_picks_per_correlation_group
            );
            rejected.push((pick, reason));
            continue;
        }

        if metro_counts.get(&metro).copied().unwrap_or(0) >= config.max_picks_per_metro_cluster {
            let reason = format!(
                "Metro cap: {metro} already has {} picks",
                config.max_picks_per_metro_cluster
            );
            rejected.push((pick, reason));
            continue;
        }

        *corr_counts.entry(group).or_insert(0) += 1;
        *metro_counts.entry(metro).or_insert(0) += 1;
        kept.push(pick);
    }

    (kept, rejected)
}

/// Risk multiplier in [0.1, 1.0] for stake sizing.
pub fn risk_multiplier(
    uncertainty: UncertaintyLevel,
    knife_edge: KnifeEdgeRisk,
    hours_vol_remaining: f64,
    liquidity_thin: bool,
) -> f64 {
    let mut mult: f64 = 1.0;

    match uncertainty {
        UncertaintyLevel::High => mult *= 0.5,
        UncertaintyLevel::Med => mult *= 0.8,
        UncertaintyLevel::Low => {}
    }

    match knife_edge {
        KnifeEdgeRisk::High => mult *= 0.4,
        KnifeEdgeRisk::Med => mult *= 0.7,
        KnifeEdgeRisk::Low => {}
    }

    // Under an hour left the outcome is effectively locked, which is
    // safer, not riskier. A long window still carries weather risk.
    if hours_vol_remaining > 8.0 {
        mult *= 0.8;
    }

    if liquidity_thin {
        mult *= 0.6;
    }

    let mult = mult.max(0.1);
    (mult * 100.0).round() / 100.0
}

/// Collect the risk-flag vocabulary for a candidate.
pub fn aggregate_risk_flags(
    model: &ModelOutput,
    accounting: &Accounting,
    liquidity_thin: bool,
    spread_wide: bool,
) -> Vec<String> {
    let mut flags: Vec<String> = Vec::new();

    if model.uncertainty_level == UncertaintyLevel::High {
        flags.push("HIGH_UNCERTAINTY".to_string());
    }
    match model.knife_edge_risk {
        KnifeEdgeRisk::High => flags.push("KNIFE_EDGE_HIGH".to_string()),
        KnifeEdgeRisk::Med => flags.push("KNIFE_EDGE_MED".to_string()),
        KnifeEdgeRisk::Low => {}
    }

    if model.lock_in_flag_if_low == Some(LockInFlag::Locking) {
        flags.push("LOW_TEMP_LOCKING".to_string());
    }
    if model.high_lock_in_flag == Some(LockInFlag::Locking) {
        flags.push("HIGH_TEMP_LOCKING".to_string());
    }

    let hours_vol = model.hours_remaining_in_meaningful_volatility_window;
    if hours_vol > 8.0 {
        flags.push("LONG_VOL_WINDOW".to_string());
    }
    if hours_vol < 1.0 {
        flags.push("VOL_WINDOW_CLOSING".to_string());
    }

    if liquidity_thin {
        flags.push("THIN_LIQUIDITY".to_string());
    }
    if spread_wide {
        flags.push("WIDE_SPREAD".to_string());
    }

    if accounting.no_trade_reason_if_any.is_some() {
        flags.push("NEGATIVE_EV".to_string());
    }
    if accounting.edge_vs_implied_pct < 1.0 {
        flags.push("MINIMAL_EDGE".to_string());
    }

    flags
}

/// Build the complete RiskRecommendation for a candidate. The stake here
/// is a placeholder from an assumed ~10-pick slate; the real allocation
/// happens in `allocate_stakes` after cap enforcement.
pub fn build_risk_recommendation(
    market_ticker: &str,
    city: &str,
    model: &ModelOutput,
    accounting: &Accounting,
    liquidity_thin: bool,
    spread_wide: bool,
    config: &Config,
) -> RiskRecommendation {
    let flags = aggregate_risk_flags(model, accounting, liquidity_thin, spread_wide);
    let mult = risk_multiplier(
        model.uncertainty_level,
        model.knife_edge_risk,
        model.hours_remaining_in_meaningful_volatility_window,
        liquidity_thin,
    );

    let base_stake = (config.bankroll.total_usd * mult / 10.0).max(0.01);
    let base_stake = (base_stake * 100.0).round() / 100.0;

    let mut notes: Vec<String> = Vec::new();
    if mult < 0.5 {
        notes.push(format!("Heavily reduced stake (risk_mult={mult})"));
    }
    if flags.iter().any(|f| f == "NEGATIVE_EV") {
        notes.push("NO TRADE — negative EV".to_string());
    }
    if flags.iter().any(|f| f == "KNIFE_EDGE_HIGH") && flags.iter().any(|f| f == "HIGH_UNCERTAINTY")
    {
        notes.push("REJECT — knife-edge + high uncertainty combo".to_string());
    }

    RiskRecommendation {
        market_ticker: market_ticker.to_string(),
        suggested_stake_usd: base_stake,
        max_loss_usd: base_stake,
        risk_flags: flags,
        correlation_group: correlation_group(city),
        metro_cluster: metro_cluster(city),
        risk_notes: notes,
    }
}

/// Distribute the bankroll across the final picks: equal split scaled by
/// each pick's risk multiplier, clamped to [0.01, bankroll]. Max loss
/// equals the stake (the full NO buy is lost if YES settles).
pub fn allocate_stakes(picks: &mut [UnifiedCandidate], bankroll: f64) {
    if picks.is_empty() {
        return;
    }
    let base_stake = bankroll / picks.len() as f64;

    for pick in picks.iter_mut() {
        let thin = pick
            .allocation
            .as_ref()
            .map_or(false, |a| a.risk_flags.iter().any(|f| f == "THIN_LIQUIDITY"));
        let mult = pick.model.as_ref().map_or(0.5, |m| {
            risk_multiplier(
                m.uncertainty_level,
                m.knife_edge_risk,
                m.hours_remaining_in_meaningful_volatility_window,
                thin,
            )
        });

        let stake = (base_stake * mult).clamp(0.01, bankroll);
        let stake = (stake * 100.0).round() / 100.0;
        if let Some(allocation) = pick.allocation.as_mut() {
            allocation.suggested_stake_usd = stake;
            allocation.max_loss_usd = stake;
        }
    }
}
