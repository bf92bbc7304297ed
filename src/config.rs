//! Central configuration.
//!
//! Immutable value-type sub-configs aggregated into one `Config`, plus the
//! spike monitor knobs and environment-backed credentials.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy)]
pub struct BankrollConfig {
    pub total_usd: f64,
}

impl Default for BankrollConfig {
    fn default() -> Self {
        Self { total_usd: 42.00 }
    }
}

/// Implied-best-NO-ask cent windows for bucket classification.
#[derive(Debug, Clone, Copy)]
pub struct PriceWindowConfig {
    pub primary_low: i64,
    pub primary_high: i64,
    pub scan_low: i64,
    pub scan_high: i64,
    pub near_miss_low_band: (i64, i64),
    pub near_miss_high_band: (i64, i64),
}

impl Default for PriceWindowConfig {
    fn default() -> Self {
        Self {
            primary_low: 90,
            primary_high: 93,
            scan_low: 88,
            scan_high: 95,
            near_miss_low_band: (88, 89),
            near_miss_high_band: (94, 95),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpreadConfig {
    pub max_spread_cents: i64,
    pub min_bid_room_primary: i64,
}

impl Default for SpreadConfig {
    fn default() -> Self {
        Self {
            max_spread_cents: 6,
            min_bid_room_primary: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorrelationConfig {
    pub max_picks_per_correlation_group: usize,
    pub max_picks_per_metro_cluster: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            max_picks_per_correlation_group: 3,
            max_picks_per_metro_cluster: 2,
        }
    }
}

/// Thresholds for the LOW/HIGH temperature lock-in gates.
#[derive(Debug, Clone, Copy)]
pub struct LockInConfig {
    pub sunrise_buffer_hours: f64,
    pub peak_buffer_hours: f64,
    pub p_new_extreme_reject_threshold: f64,
}

impl Default for LockInConfig {
    fn default() -> Self {
        Self {
            sunrise_buffer_hours: 2.0,
            peak_buffer_hours: 2.0,
            p_new_extreme_reject_threshold: 0.05,
        }
    }
}

/// Multi-run stability thresholds (7 -> 8 -> 9 AM ET runs).
#[derive(Debug, Clone, Copy)]
pub struct StabilityConfig {
    pub min_price_move_cents: i64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            min_price_move_cents: 2,
        }
    }
}

/// Kalshi fee schedule.
///
/// fee = ceil(rate * contracts * P * (1 - P)) dollars, P = cents / 100,
/// charged per trade on execution (not settlement).
#[derive(Debug, Clone, Copy)]
pub struct FeeConfig {
    pub taker_rate: f64,
    pub maker_rate: f64,
    pub min_contract_price_cents: i64,
    pub max_contract_price_cents: i64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            taker_rate: 0.07,
            maker_rate: 0.0175,
            min_contract_price_cents: 1,
            max_contract_price_cents: 99,
        }
    }
}

/// Morning run hours in ET (24h).
#[derive(Debug, Clone)]
pub struct RunScheduleConfig {
    pub run_hours_et: Vec<u32>,
}

impl Default for RunScheduleConfig {
    fn default() -> Self {
        Self {
            run_hours_et: vec![7, 8, 9],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PickLimitsConfig {
    pub max_primary_picks: usize,
}

impl Default for PickLimitsConfig {
    fn default() -> Self {
        Self {
            max_primary_picks: 10,
        }
    }
}

/// Rate limiting and retry settings for outbound API clients.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub kalshi_requests_per_second: f64,
    pub nws_requests_per_second: f64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_seconds: f64,
    pub retry_max_delay_seconds: f64,
    pub retry_jitter_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            kalshi_requests_per_second: 5.0,
            nws_requests_per_second: 5.0,
            retry_max_attempts: 3,
            retry_base_delay_seconds: 1.0,
            retry_max_delay_seconds: 30.0,
            retry_jitter_seconds: 0.5,
        }
    }
}

/// Top-level configuration aggregating all sub-configs.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub bankroll: BankrollConfig,
    pub price_window: PriceWindowConfig,
    pub spread: SpreadConfig,
    pub correlation: CorrelationConfig,
    pub lock_in: LockInConfig,
    pub stability: StabilityConfig,
    pub fees: FeeConfig,
    pub schedule: RunScheduleConfig,
    pub picks: PickLimitsConfig,
    pub rate_limit: RateLimitConfig,
}

/// Spike monitor thresholds — all overridable via CLI flags.
#[derive(Debug, Clone)]
pub struct SpikeConfig {
    pub spike_threshold_cents: i64,
    pub window_seconds: u64,
    pub poll_interval_seconds: u64,
    pub burst_count: u32,
    pub burst_interval_seconds: u64,
    pub start_hour_est: u32,
    pub end_hour_est: u32,
    pub cooldown_seconds: u64,
    pub all_hours: bool,
    pub tracked_cities: Vec<&'static str>,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            spike_threshold_cents: 15,
            window_seconds: 420,
            poll_interval_seconds: 30,
            burst_count: 5,
            burst_interval_seconds: 60,
            start_hour_est: 8,
            end_hour_est: 23,
            cooldown_seconds: 600,
            all_hours: false,
            tracked_cities: vec![
                "Washington",
                "New Orleans",
                "Phoenix",
                "San Francisco",
                "Atlanta",
                "Minneapolis",
                "Boston",
                "Las Vegas",
                "Dallas",
                "Seattle",
                "Miami",
                "New York",
            ],
        }
    }
}

impl SpikeConfig {
    /// History entries older than this are dropped. The extra slack keeps
    /// the snapshot just outside the detection window available as the
    /// "oldest in window" anchor after clock jitter.
    pub fn prune_age_seconds(&self) -> u64 {
        self.window_seconds + 120
    }
}

/// Kalshi API credentials, loaded from the environment.
#[derive(Debug, Clone)]
pub struct KalshiCredentials {
    pub api_key_id: String,
    pub private_key_path: String,
}

impl KalshiCredentials {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let api_key_id = std::env::var("KALSHI_API_KEY_ID").unwrap_or_default();
        let private_key_path = std::env::var("KALSHI_PRIVATE_KEY_PATH").unwrap_or_default();
        if api_key_id.is_empty() || private_key_path.is_empty() {
            bail!(
                "Missing Kalshi credentials. Set KALSHI_API_KEY_ID and \
                 KALSHI_PRIVATE_KEY_PATH environment variables."
            );
        }
        Ok(Self {
            api_key_id,
            private_key_path,
        })
    }
}
