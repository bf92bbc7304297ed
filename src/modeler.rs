//! Probability modeler.
//!
//! Computes settlement-aware probabilities, lock-in metrics, time-remaining
//! fields, and knife-edge risk for each candidate. The settlement
//! temperature is modeled as N(forecast, sigma²) with a sigma that narrows
//! as the volatility window closes.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use crate::config::Config;
use crate::models::{
    KnifeEdgeRisk, LockInFlag, MarketType, ModelOutput, RawCandidate, UncertaintyLevel,
};
use crate::scrapers::weather_api::StationForecast;
use crate::stations::{cli_day_window, lookup_station};

/// Typical peak temperature hour (local) — generally 2-5 PM.
const DEFAULT_PEAK_HOUR: u32 = 15;

lazy_static! {
    // "40°F or above", "50 or below"
    static ref THRESHOLD_RE: Regex =
        Regex::new(r"(?i)(\d+)°?\s*F?\s+or\s+(above|below)").unwrap();
    // "Between 45°F and 49°F", "45 to 49"
    static ref RANGE_RE: Regex =
        Regex::new(r"(?i)(?:between\s+)?(\d+)°?\s*F?\s+(?:and|to)\s+(\d+)").unwrap();
    static ref ANY_NUMBER_RE: Regex = Regex::new(r"(\d+)").unwrap();
}

// ── Sunrise / peak-time helpers ──────────────────────────────────────

fn sin_d(deg: f64) -> f64 {
    deg.to_radians().sin()
}
fn cos_d(deg: f64) -> f64 {
    deg.to_radians().cos()
}
fn tan_d(deg: f64) -> f64 {
    deg.to_radians().tan()
}

/// Sunrise (UTC) for a location and date, via the standard almanac
/// approximation (official zenith 90°50'). None inside polar night.
pub fn sunrise_utc(lat: f64, lon: f64, date: NaiveDate) -> Option<DateTime<Utc>> {
    let zenith: f64 = 90.833;
    let n = date.ordinal() as f64;
    let lng_hour = lon / 15.0;
    let t = n + (6.0 - lng_hour) / 24.0;

    // Sun's mean anomaly and true longitude.
    let m = 0.9856 * t - 3.289;
    let l = (m + 1.916 * sin_d(m) + 0.020 * sin_d(2.0 * m) + 282.634).rem_euclid(360.0);

    // Right ascension, adjusted into the same quadrant as L, in hours.
    let mut ra = (0.91764 * tan_d(l)).atan().to_degrees().rem_euclid(360.0);
    let l_quadrant = (l / 90.0).floor() * 90.0;
    let ra_quadrant = (ra / 90.0).floor() * 90.0;
    ra = (ra + (l_quadrant - ra_quadrant)) / 15.0;

    let sin_dec = 0.39782 * sin_d(l);
    let cos_dec = sin_dec.asin().cos();

    let cos_h = (cos_d(zenith) - sin_dec * sin_d(lat)) / (cos_dec * cos_d(lat));
    if cos_h > 1.0 {
        return None; // sun never rises on this date
    }

    let h = (360.0 - cos_h.acos().to_degrees()) / 15.0;
    let t_mean = h + ra - 0.06571 * t - 6.622;
    let ut_hours = (t_mean - lng_hour).rem_euclid(24.0);

    let secs = (ut_hours * 3600.0).round() as i64;
    let naive = date.and_time(NaiveTime::MIN) + chrono::Duration::seconds(secs);
    Some(Utc.from_utc_datetime(&naive))
}

fn sunrise_local(city: &str, date: NaiveDate, tz: Tz) -> Option<DateTime<Tz>> {
    let entry = lookup_station(city)?;
    sunrise_utc(entry.lat, entry.lon, date).map(|u| u.with_timezone(&tz))
}

fn local_at_hour(tz: Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Tz>> {
    tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, 0, 0)
        .earliest()
}

// ── Probability estimation ───────────────────────────────────────────

/// Extract the numeric threshold from a bracket definition.
///
/// "40°F or above" -> 40.0; "Between 45°F and 49°F" -> 47.0 (midpoint);
/// falls back to the first integer found.
pub fn parse_bracket_threshold(bracket_def: &str) -> Option<f64> {
    if let Some(caps) = THRESHOLD_RE.captures(bracket_def) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = RANGE_RE.captures(bracket_def) {
        let lo: f64 = caps[1].parse().ok()?;
        let hi: f64 = caps[2].parse().ok()?;
        return Some((lo + hi) / 2.0);
    }
    ANY_NUMBER_RE
        .captures(bracket_def)
        .and_then(|caps| caps[1].parse().ok())
}

fn normal_cdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return if x >= mu { 1.0 } else { 0.0 };
    }
    match Normal::new(mu, sigma) {
        Ok(dist) => dist.cdf(x),
        Err(_) => {
            if x >= mu {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Estimate (p_yes, p_no) for a bracket, modeling the settlement
/// temperature as N(forecast, sigma²) with the half-integer continuity
/// correction at the bracket edges.
pub fn estimate_p_bracket(
    bracket_def: &str,
    forecast_temp_f: f64,
    uncertainty_sigma: f64,
) -> (f64, f64) {
    let Some(threshold) = parse_bracket_threshold(bracket_def) else {
        return (0.5, 0.5); // unparseable — maximum uncertainty
    };

    let lower = bracket_def.to_lowercase();

    if lower.contains("above") || lower.contains(">=") {
        let p_yes = 1.0 - normal_cdf(threshold - 0.5, forecast_temp_f, uncertainty_sigma);
        (p_yes, 1.0 - p_yes)
    } else if lower.contains("below") || lower.contains("<=") {
        let p_yes = normal_cdf(threshold + 0.5, forecast_temp_f, uncertainty_sigma);
        (p_yes, 1.0 - p_yes)
    } else if lower.contains("between") || lower.contains("to") {
        if let Some(caps) = RANGE_RE.captures(bracket_def) {
            let lo: f64 = caps[1].parse().unwrap_or(threshold);
            let hi: f64 = caps[2].parse().unwrap_or(threshold);
            let p_yes = normal_cdf(hi + 0.5, forecast_temp_f, uncertainty_sigma)
                - normal_cdf(lo - 0.5, forecast_temp_f, uncertainty_sigma);
            let p_yes = p_yes.max(0.001);
            (p_yes, 1.0 - p_yes)
        } else {
            (0.5, 0.5)
        }
    } else {
        // Ambiguous brackets read as "at or above".
        let p_yes = 1.0 - normal_cdf(threshold - 0.5, forecast_temp_f, uncertainty_sigma);
        (p_yes, 1.0 - p_yes)
    }
}

/// P(new lower-low / higher-high after now).
///
/// "Room" is how far the forecast extreme sits beyond the current extreme;
/// the base probability scales linearly over [0, 5]°F of room and decays
/// with the time remaining in the volatility window.
pub fn estimate_p_new_extreme(
    current_extreme_f: f64,
    forecast_extreme_f: f64,
    hours_remaining: f64,
    is_low: bool,
) -> f64 {
    if hours_remaining <= 0.0 {
        return 0.0;
    }

    let room = if is_low {
        current_extreme_f - forecast_extreme_f
    } else {
        forecast_extreme_f - current_extreme_f
    };

    let base_p = if room <= 0.0 {
        0.15
    } else if room >= 5.0 {
        0.85
    } else {
        0.15 + (room / 5.0) * 0.70
    };

    let time_factor = (hours_remaining / 6.0).min(1.0);
    round4((base_p * time_factor).min(0.99))
}

/// Knife-edge risk from the forecast's distance to the bracket boundary.
pub fn compute_knife_edge(bracket_def: &str, forecast_temp_f: f64, sigma: f64) -> KnifeEdgeRisk {
    let Some(threshold) = parse_bracket_threshold(bracket_def) else {
        return KnifeEdgeRisk::High;
    };
    let distance = (forecast_temp_f - threshold).abs();
    if distance <= 1.0 {
        KnifeEdgeRisk::High
    } else if distance <= sigma {
        KnifeEdgeRisk::Med
    } else {
        KnifeEdgeRisk::Low
    }
}

fn classify_uncertainty(
    hours_vol_window: f64,
    has_forecast: bool,
    knife_edge: KnifeEdgeRisk,
) -> UncertaintyLevel {
    if !has_forecast {
        return UncertaintyLevel::High;
    }
    if knife_edge == KnifeEdgeRisk::High {
        return UncertaintyLevel::High;
    }
    if hours_vol_window > 4.0 {
        return UncertaintyLevel::Med;
    }
    UncertaintyLevel::Low
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ── Main modeler function ────────────────────────────────────────────

/// Compute all model fields for a single candidate.
///
/// `forecast` and `current_obs_temp_f` are optional; missing inputs fall
/// back to the 0.5/0.5 maximum-uncertainty model.
pub fn model_candidate(
    candidate: &RawCandidate,
    forecast: Option<&StationForecast>,
    current_obs_temp_f: Option<f64>,
    now_utc: DateTime<Utc>,
    config: &Config,
) -> ModelOutput {
    let city = &candidate.city;
    let market_type = candidate.market_type;
    let bracket_def = &candidate.bracket_definition;

    let tz = crate::stations::station_timezone(city).unwrap_or(chrono_tz::America::New_York);
    let local_now = now_utc.with_timezone(&tz);
    let local_time_str = local_now.format("%Y-%m-%d %H:%M %Z").to_string();

    let target_date = NaiveDate::parse_from_str(&candidate.target_date_local, "%Y-%m-%d")
        .unwrap_or_else(|_| {
            warn!(
                "Unparseable target date '{}' for {} — using today",
                candidate.target_date_local, candidate.market_ticker
            );
            local_now.date_naive()
        });

    let (_, cli_end) = cli_day_window(target_date, tz);
    let hours_to_cli_close = ((cli_end - now_utc).num_seconds() as f64 / 3600.0).max(0.0);

    let sunrise = sunrise_local(city, target_date, tz);
    let peak = local_at_hour(tz, target_date, DEFAULT_PEAK_HOUR);

    let sunrise_str = sunrise.map(|s| s.format("%H:%M %Z").to_string());
    let peak_str = peak.map(|p| p.format("%H:%M %Z").to_string());

    // Hours remaining in the meaningful volatility window.
    let hours_vol = match market_type {
        MarketType::LowTemp => {
            let vol_end = sunrise
                .map(|s| s + chrono::Duration::seconds((config.lock_in.sunrise_buffer_hours * 3600.0) as i64))
                .or_else(|| local_at_hour(tz, local_now.date_naive(), 9));
            vol_end
                .map(|end| ((end - local_now).num_seconds() as f64 / 3600.0).max(0.0))
                .unwrap_or(0.0)
        }
        MarketType::HighTemp => peak
            .map(|p| {
                let end =
                    p + chrono::Duration::seconds((config.lock_in.peak_buffer_hours * 3600.0) as i64);
                ((end - local_now).num_seconds() as f64 / 3600.0).max(0.0)
            })
            .unwrap_or(0.0),
    };

    // Forecast temperature for the probability model.
    let forecast_temp = match (forecast, market_type) {
        (Some(f), MarketType::HighTemp) => f.forecast_high_f,
        (Some(f), MarketType::LowTemp) => f.forecast_low_f,
        (None, _) => None,
    };

    // Sigma narrows as the window closes.
    let sigma = if hours_vol < 1.0 {
        1.0
    } else if hours_vol < 3.0 {
        2.0
    } else {
        3.0
    };

    let (p_yes, p_no) = match forecast_temp {
        Some(t) => estimate_p_bracket(bracket_def, t, sigma),
        None => (0.5, 0.5),
    };

    let knife_edge = match forecast_temp {
        Some(t) => compute_knife_edge(bracket_def, t, sigma),
        None => KnifeEdgeRisk::High,
    };

    let mut signals: Vec<String> = Vec::new();
    let mut assumptions: Vec<String> = Vec::new();
    let mut model_notes: Vec<String> = Vec::new();

    let mut p_new_lower = None;
    let mut lock_in_low = None;
    let mut p_new_higher = None;
    let mut lock_in_high = None;

    let reject_thresh = config.lock_in.p_new_extreme_reject_threshold;

    match market_type {
        MarketType::LowTemp => {
            // Current observation is the best proxy for today's low so far.
            let forecast_low = forecast.and_then(|f| f.forecast_low_f);
            let p = match (current_obs_temp_f, forecast_low) {
                (Some(cur), Some(fc)) => {
                    signals.push(format!("current_obs={cur}F, forecast_low={fc}F"));
                    estimate_p_new_extreme(cur, fc, hours_vol, true)
                }
                _ => {
                    if hours_vol > 0.0 {
                        0.5
                    } else {
                        0.0
                    }
                }
            };
            p_new_lower = Some(p);

            let past_sunrise_buffer = sunrise
                .map(|s| {
                    local_now
                        > s + chrono::Duration::seconds(
                            (config.lock_in.sunrise_buffer_hours * 3600.0) as i64,
                        )
                })
                .unwrap_or(false);
            lock_in_low = Some(if past_sunrise_buffer && p < reject_thresh {
                model_notes.push("LOW lock-in: past sunrise+2h, P(new low) < 0.05".to_string());
                LockInFlag::Locking
            } else {
                LockInFlag::NotLocked
            });
        }
        MarketType::HighTemp => {
            let forecast_high = forecast.and_then(|f| f.forecast_high_f);
            let p = match (current_obs_temp_f, forecast_high) {
                (Some(cur), Some(fc)) => {
                    signals.push(format!("current_obs={cur}F, forecast_high={fc}F"));
                    estimate_p_new_extreme(cur, fc, hours_vol, false)
                }
                _ => {
                    if hours_vol > 0.0 {
                        0.5
                    } else {
                        0.0
                    }
                }
            };
            p_new_higher = Some(p);

            let past_peak_buffer = peak
                .map(|pk| {
                    local_now
                        > pk + chrono::Duration::seconds(
                            (config.lock_in.peak_buffer_hours * 3600.0) as i64,
                        )
                })
                .unwrap_or(false);
            lock_in_high = Some(if past_peak_buffer && p < reject_thresh {
                model_notes.push("HIGH lock-in: past peak+2h, P(new high) < 0.05".to_string());
                LockInFlag::Locking
            } else {
                LockInFlag::NotLocked
            });
        }
    }

    let method = match forecast_temp {
        Some(t) => {
            assumptions.push(format!("Forecast temp={t}F, sigma={sigma}"));
            format!("Normal CDF (sigma={sigma})")
        }
        None => {
            assumptions.push("No forecast available — using maximum uncertainty".to_string());
            "No-forecast fallback (p=0.5)".to_string()
        }
    };

    let uncertainty = classify_uncertainty(hours_vol, forecast_temp.is_some(), knife_edge);

    ModelOutput {
        market_ticker: candidate.market_ticker.clone(),
        p_yes: round4(p_yes),
        p_no: round4(p_no),
        method,
        signals_used: signals,
        assumptions,
        uncertainty_level: uncertainty,
        local_time_at_station: local_time_str,
        hours_remaining_until_cli_day_close: round2(hours_to_cli_close),
        hours_remaining_in_meaningful_volatility_window: round2(hours_vol),
        sunrise_estimate_local: sunrise_str,
        p_new_lower_low_after_now: p_new_lower,
        lock_in_flag_if_low: lock_in_low,
        typical_peak_time_estimate_local: if market_type == MarketType::HighTemp {
            peak_str
        } else {
            None
        },
        p_new_higher_high_after_now: p_new_higher,
        high_lock_in_flag: lock_in_high,
        knife_edge_risk: knife_edge,
        model_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderbookSnapshot;
    use chrono::Timelike;

    fn raw_candidate(city: &str, market_type: MarketType, bracket: &str) -> RawCandidate {
        RawCandidate {
            run_time_et: "2026-02-24 07:00 ET".to_string(),
            target_date_local: "2026-02-24".to_string(),
            city: city.to_string(),
            market_type,
            event_name: "KXHIGHNY-26FEB24".to_string(),
            market_ticker: "KXHIGHNY-26FEB24-B40".to_string(),
            market_url: "https://kalshi.com/markets/KXHIGHNY-26FEB24-B40".to_string(),
            bracket_definition: bracket.to_string(),
            orderbook_snapshot: OrderbookSnapshot::default(),
            market_status_notes: String::new(),
        }
    }

    #[test]
    fn test_threshold_parsing() {
        assert_eq!(parse_bracket_threshold("40°F or above"), Some(40.0));
        assert_eq!(parse_bracket_threshold("50 or below"), Some(50.0));
        assert_eq!(parse_bracket_threshold("Between 45°F and 49°F"), Some(47.0));
        assert_eq!(parse_bracket_threshold("45 to 49"), Some(47.0));
        assert_eq!(parse_bracket_threshold("about 62"), Some(62.0));
        assert_eq!(parse_bracket_threshold("no digits here"), None);
    }

    #[test]
    fn test_p_bracket_sums_to_one() {
        for bracket in ["40°F or above", "40°F or below", "Between 38°F and 42°F"] {
            let (p_yes, p_no) = estimate_p_bracket(bracket, 41.0, 3.0);
            assert!((p_yes + p_no - 1.0).abs() < 1e-3, "{bracket}");
            assert!(p_yes > 0.0 && p_yes < 1.0);
        }
    }

    #[test]
    fn test_p_bracket_directionality() {
        // Forecast well above the threshold: "or above" is near-certain.
        let (p_yes, _) = estimate_p_bracket("40°F or above", 50.0, 3.0);
        assert!(p_yes > 0.99);
        // And "or below" is near-zero.
        let (p_yes, _) = estimate_p_bracket("40°F or below", 50.0, 3.0);
        assert!(p_yes < 0.01);
    }

    #[test]
    fn test_p_bracket_unparseable_is_even() {
        assert_eq!(estimate_p_bracket("mystery bracket", 50.0, 3.0), (0.5, 0.5));
    }

    #[test]
    fn test_new_extreme_probability_scales_with_room() {
        // 5F of room, full time: base 0.85.
        assert!((estimate_p_new_extreme(50.0, 55.0, 6.0, false) - 0.85).abs() < 1e-9);
        // No room: base 0.15.
        assert!((estimate_p_new_extreme(55.0, 55.0, 6.0, false) - 0.15).abs() < 1e-9);
        // Half the time factor.
        assert!((estimate_p_new_extreme(50.0, 55.0, 3.0, false) - 0.425).abs() < 1e-9);
        // Window closed.
        assert_eq!(estimate_p_new_extreme(50.0, 55.0, 0.0, false), 0.0);
    }

    #[test]
    fn test_knife_edge_distance_bands() {
        assert_eq!(compute_knife_edge("40°F or above", 40.5, 3.0), KnifeEdgeRisk::High);
        assert_eq!(compute_knife_edge("40°F or above", 42.0, 3.0), KnifeEdgeRisk::Med);
        assert_eq!(compute_knife_edge("40°F or above", 48.0, 3.0), KnifeEdgeRisk::Low);
        assert_eq!(compute_knife_edge("???", 48.0, 3.0), KnifeEdgeRisk::High);
    }

    #[test]
    fn test_sunrise_plausible_for_nyc() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 24).unwrap();
        let sunrise = sunrise_utc(40.783, -73.967, date).unwrap();
        let local = sunrise.with_timezone(&chrono_tz::America::New_York);
        // Late February sunrise in NYC is around 06:30-07:00 local.
        assert!(local.hour() == 6 || local.hour() == 7, "got {local}");
    }

    #[test]
    fn test_model_no_forecast_falls_back() {
        let candidate = raw_candidate("New York", MarketType::HighTemp, "40°F or above");
        let now = Utc.with_ymd_and_hms(2026, 2, 24, 15, 0, 0).unwrap();
        let output = model_candidate(&candidate, None, None, now, &Config::default());
        assert_eq!(output.p_yes, 0.5);
        assert_eq!(output.p_no, 0.5);
        assert_eq!(output.uncertainty_level, UncertaintyLevel::High);
        assert_eq!(output.method, "No-forecast fallback (p=0.5)");
        // HIGH market: only the high lock-in side is populated.
        assert!(output.high_lock_in_flag.is_some());
        assert!(output.lock_in_flag_if_low.is_none());
    }

    #[test]
    fn test_high_lock_in_past_peak_with_low_p() {
        let candidate = raw_candidate("New York", MarketType::HighTemp, "40°F or above");
        let forecast = StationForecast {
            station_icao: "KNYC".to_string(),
            forecast_high_f: Some(41.0),
            forecast_low_f: Some(30.0),
            ..Default::default()
        };
        // 23:30 local — well past peak+2h; current already at forecast high,
        // so P(new high) = 0.15 * small time factor < 0.05.
        let now = Utc.with_ymd_and_hms(2026, 2, 25, 4, 30, 0).unwrap();
        let output = model_candidate(&candidate, Some(&forecast), Some(41.0), now, &Config::default());
        assert_eq!(output.high_lock_in_flag, Some(LockInFlag::Locking));
        assert!(output.p_new_higher_high_after_now.unwrap() < 0.05);
    }

    #[test]
    fn test_sigma_narrows_near_window_close() {
        let candidate = raw_candidate("New York", MarketType::HighTemp, "40°F or above");
        let forecast = StationForecast {
            station_icao: "KNYC".to_string(),
            forecast_high_f: Some(45.0),
            ..Default::default()
        };
        // 16:30 local: 0.5h left in the window (peak 15:00 + 2h) -> sigma 1.
        let now = Utc.with_ymd_and_hms(2026, 2, 24, 21, 30, 0).unwrap();
        let output = model_candidate(&candidate, Some(&forecast), Some(44.0), now, &Config::default());
        assert!(output.method.contains("sigma=1"));
        assert!(output.hours_remaining_in_meaningful_volatility_window < 1.0);
    }
}
