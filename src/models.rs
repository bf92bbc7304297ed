//! Pipeline data models.
//!
//! Covers the per-module output schemas, the unified merged candidate,
//! and the DAILY_SLATE artifact structure. Enum serializations match the
//! artifact schema exactly, so a slate survives parse–render–parse.

use serde::{Deserialize, Serialize};

/// Whether a market settles on the daily high or the daily low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    HighTemp,
    LowTemp,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::HighTemp => "HIGH_TEMP",
            MarketType::LowTemp => "LOW_TEMP",
        }
    }
}

/// Confidence that a Kalshi city maps to the right settlement station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingConfidence {
    High,
    Med,
    Low,
}

impl MappingConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingConfidence::High => "HIGH",
            MappingConfidence::Med => "MED",
            MappingConfidence::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UncertaintyLevel {
    Low,
    Med,
    High,
}

impl UncertaintyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UncertaintyLevel::Low => "LOW",
            UncertaintyLevel::Med => "MED",
            UncertaintyLevel::High => "HIGH",
        }
    }

    /// Ordering for the ranking key: LOW < MED < HIGH.
    pub fn rank(&self) -> u8 {
        match self {
            UncertaintyLevel::Low => 0,
            UncertaintyLevel::Med => 1,
            UncertaintyLevel::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockInFlag {
    Locking,
    NotLocked,
    Unknown,
}

impl LockInFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockInFlag::Locking => "LOCKING",
            LockInFlag::NotLocked => "NOT_LOCKED",
            LockInFlag::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KnifeEdgeRisk {
    Low,
    Med,
    High,
}

impl KnifeEdgeRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnifeEdgeRisk::Low => "LOW",
            KnifeEdgeRisk::Med => "MED",
            KnifeEdgeRisk::High => "HIGH",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            KnifeEdgeRisk::Low => 0,
            KnifeEdgeRisk::Med => 1,
            KnifeEdgeRisk::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    Primary,
    Tight,
    NearMiss,
    Rejected,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Primary => "PRIMARY",
            Bucket::Tight => "TIGHT",
            Bucket::NearMiss => "NEAR_MISS",
            Bucket::Rejected => "REJECTED",
        }
    }
}

/// Settlement mapping for one (city, market type) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSpec {
    pub city: String,
    pub market_type: MarketType,
    pub issuedby: String,
    pub cli_url: String,
    pub what_to_read_in_cli: String,
    pub day_window_note: String,
    #[serde(default)]
    pub special_risks: Vec<String>,
    pub mapping_confidence: MappingConfidence,
    #[serde(default)]
    pub mapping_notes: Vec<String>,
}

/// Orderbook state at scan time. All prices are integer cents.
///
/// `implied_best_no_ask_cents` = 100 - best YES bid; `bid_room_cents` =
/// implied NO ask - best NO bid. Top-3 levels are `[price, qty]`, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub best_yes_bid_cents: Option<i64>,
    pub best_no_bid_cents: Option<i64>,
    pub implied_best_no_ask_cents: Option<i64>,
    pub implied_best_yes_ask_cents: Option<i64>,
    pub bid_room_cents: Option<i64>,
    #[serde(default)]
    pub top3_yes_bids: Vec<[i64; 2]>,
    #[serde(default)]
    pub top3_no_bids: Vec<[i64; 2]>,
    #[serde(default)]
    pub depth_notes: String,
}

impl OrderbookSnapshot {
    /// Aggregate top-3 depth across both sides (ranking and liquidity input).
    pub fn top3_depth(&self) -> i64 {
        self.top3_yes_bids.iter().map(|l| l[1]).sum::<i64>()
            + self.top3_no_bids.iter().map(|l| l[1]).sum::<i64>()
    }
}

/// A bracket market the scanner found inside the price window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidate {
    pub run_time_et: String,
    pub target_date_local: String,
    pub city: String,
    pub market_type: MarketType,
    pub event_name: String,
    pub market_ticker: String,
    pub market_url: String,
    pub bracket_definition: String,
    pub orderbook_snapshot: OrderbookSnapshot,
    #[serde(default)]
    pub market_status_notes: String,
}

/// Modeler output for one candidate. Only the lock-in fields relevant to
/// the market type are populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutput {
    pub market_ticker: String,
    pub p_yes: f64,
    pub p_no: f64,
    pub method: String,
    #[serde(default)]
    pub signals_used: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub uncertainty_level: UncertaintyLevel,
    pub local_time_at_station: String,
    pub hours_remaining_until_cli_day_close: f64,
    pub hours_remaining_in_meaningful_volatility_window: f64,
    pub sunrise_estimate_local: Option<String>,
    pub p_new_lower_low_after_now: Option<f64>,
    pub lock_in_flag_if_low: Option<LockInFlag>,
    pub typical_peak_time_estimate_local: Option<String>,
    pub p_new_higher_high_after_now: Option<f64>,
    pub high_lock_in_flag: Option<LockInFlag>,
    pub knife_edge_risk: KnifeEdgeRisk,
    #[serde(default)]
    pub model_notes: Vec<String>,
}

/// Fee-aware EV accounting for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accounting {
    pub market_ticker: String,
    pub implied_p_no_from_implied_ask: f64,
    pub fee_est_cents_per_contract: f64,
    pub ev_net_est_cents_at_recommended_limit: f64,
    pub max_buy_price_no_cents: i64,
    pub edge_vs_implied_pct: f64,
    #[serde(default)]
    pub accounting_notes: Vec<String>,
    pub no_trade_reason_if_any: Option<String>,
}

/// Manual execution plan (the venue is never traded through the API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub market_ticker: String,
    pub implied_best_no_ask_cents: Option<i64>,
    pub best_no_bid_cents: Option<i64>,
    pub bid_room_cents: Option<i64>,
    pub recommended_limit_no_cents: i64,
    pub limit_rationale: String,
    #[serde(default)]
    pub manual_order_steps: Vec<String>,
    #[serde(default)]
    pub cancel_replace_rules: Vec<String>,
    #[serde(default)]
    pub fill_probability_notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRecommendation {
    pub market_ticker: String,
    pub suggested_stake_usd: f64,
    pub max_loss_usd: f64,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    pub correlation_group: String,
    pub metro_cluster: String,
    #[serde(default)]
    pub risk_notes: Vec<String>,
}

/// The merged per-candidate record. Each enrichment module contributes an
/// optional section; bucket and rank are set by the selection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedCandidate {
    pub run_time_et: String,
    pub target_date_local: String,
    pub city: String,
    pub market_type: MarketType,
    pub event_name: String,
    pub market_ticker: String,
    pub market_url: String,
    pub bracket_definition: String,
    pub settlement_spec: Option<SettlementSpec>,
    pub orderbook_snapshot: OrderbookSnapshot,
    pub model: Option<ModelOutput>,
    pub fees_ev: Option<Accounting>,
    pub manual_trade_plan: Option<ExecutionPlan>,
    pub allocation: Option<RiskRecommendation>,
    pub bucket: Bucket,
    #[serde(default)]
    pub bucket_reason: String,
    pub rank: Option<u32>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanStats {
    #[serde(default)]
    pub events_scanned: u32,
    #[serde(default)]
    pub bracket_markets_scanned: u32,
    #[serde(default)]
    pub candidates_in_88_95_window: u32,
    #[serde(default)]
    pub primary_count: u32,
    #[serde(default)]
    pub tight_count: u32,
    #[serde(default)]
    pub near_miss_count: u32,
    #[serde(default)]
    pub rejected_count: u32,
}

/// One run's complete ranked output for a target date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySlate {
    pub run_time_et: String,
    pub target_date_local: String,
    pub bankroll_usd: f64,
    #[serde(default)]
    pub scan_stats: ScanStats,
    #[serde(default)]
    pub picks_primary: Vec<UnifiedCandidate>,
    #[serde(default)]
    pub picks_tight: Vec<UnifiedCandidate>,
    #[serde(default)]
    pub picks_near_miss: Vec<UnifiedCandidate>,
    #[serde(default)]
    pub rejected: Vec<UnifiedCandidate>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl DailySlate {
    /// All candidates across the four buckets, slate order.
    pub fn all_candidates(&self) -> impl Iterator<Item = &UnifiedCandidate> {
        self.picks_primary
            .iter()
            .chain(self.picks_tight.iter())
            .chain(self.picks_near_miss.iter())
            .chain(self.rejected.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_artifact_strings() {
        assert_eq!(
            serde_json::to_string(&MarketType::HighTemp).unwrap(),
            "\"HIGH_TEMP\""
        );
        assert_eq!(
            serde_json::to_string(&Bucket::NearMiss).unwrap(),
            "\"NEAR_MISS\""
        );
        assert_eq!(
            serde_json::to_string(&LockInFlag::NotLocked).unwrap(),
            "\"NOT_LOCKED\""
        );
        let b: Bucket = serde_json::from_str("\"PRIMARY\"").unwrap();
        assert_eq!(b, Bucket::Primary);
    }

    #[test]
    fn test_ordering_ranks() {
        assert!(UncertaintyLevel::Low.rank() < UncertaintyLevel::Med.rank());
        assert!(UncertaintyLevel::Med.rank() < UncertaintyLevel::High.rank());
        assert!(KnifeEdgeRisk::Low.rank() < KnifeEdgeRisk::High.rank());
    }

    #[test]
    fn test_top3_depth_sums_both_sides() {
        let ob = OrderbookSnapshot {
            top3_yes_bids: vec![[8, 50], [7, 10]],
            top3_no_bids: vec![[89, 30]],
            ..Default::default()
        };
        assert_eq!(ob.top3_depth(), 90);
    }

    #[test]
    fn test_slate_round_trips_through_json() {
        let slate = DailySlate {
            run_time_et: "2026-02-12 07:00 ET".to_string(),
            target_date_local: "2026-02-12".to_string(),
            bankroll_usd: 42.0,
            scan_stats: ScanStats {
                events_scanned: 3,
                candidates_in_88_95_window: 2,
                ..Default::default()
            },
            picks_primary: vec![],
            picks_tight: vec![],
            picks_near_miss: vec![],
            rejected: vec![],
            notes: vec!["No material changes from prior run.".to_string()],
        };
        let json = serde_json::to_string_pretty(&slate).unwrap();
        let back: DailySlate = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string_pretty(&back).unwrap();
        assert_eq!(json, json2);
    }
}
