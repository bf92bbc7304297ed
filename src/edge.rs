//! Temperature edge analysis engine.
//!
//! Aggregates the four NWS sources for one city, tracks the running max
//! temperature, computes the rounding margin against the Kalshi bracket
//! boundaries, and generates a trading signal. The core edge: hourly
//! METARs show a rounded whole-°C value while the remarks carry tenths,
//! so the market can misprice the settlement integer.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::metar::{c_to_f_cli_rounded, c_to_f_precise, f_boundary_c, nws_round};
use crate::scrapers::nws_products::NwsProducts;
use crate::stations::{cli_day_window, lookup_station, StationEntry, STATION_DB};

/// Confidence in a temperature reading, by source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// CLI preliminary max
    Highest,
    /// T-group from METAR (tenths °C)
    High,
    /// Current conditions decimal °F
    MediumHigh,
    /// 6-hr / 24-hr extremes
    Medium,
    /// Observation history (rounded values)
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Highest => "HIGHEST",
            Confidence::High => "HIGH",
            Confidence::MediumHigh => "MEDIUM_HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        }
    }
}

/// How close the running max sits to a rounding boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginStatus {
    Comfortable,
    Moderate,
    Close,
    RazorThin,
}

impl MarginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginStatus::Comfortable => "COMFORTABLE",
            MarginStatus::Moderate => "MODERATE",
            MarginStatus::Close => "CLOSE",
            MarginStatus::RazorThin => "RAZOR_THIN",
        }
    }
}

/// Time-of-day risk that the temperature is still moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRisk {
    StillRising,
    NearPeak,
    PastPeak,
    Settled,
}

impl TimeRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRisk::StillRising => "STILL_RISING",
            TimeRisk::NearPeak => "NEAR_PEAK",
            TimeRisk::PastPeak => "PAST_PEAK",
            TimeRisk::Settled => "SETTLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
    Caution,
    NoEdge,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "STRONG_BUY",
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Caution => "CAUTION",
            Signal::NoEdge => "NO_EDGE",
        }
    }
}

/// A single temperature reading from any NWS source.
#[derive(Debug, Clone)]
pub struct TemperatureReading {
    pub source: &'static str,
    pub time_utc: Option<NaiveDateTime>,
    pub temp_c: f64,
    pub temp_f_precise: Option<f64>,
    pub cli_rounded_f: Option<i64>,
    pub confidence: Confidence,
    pub note: String,
}

/// How a temperature relates to the bracket rounding boundaries.
#[derive(Debug, Clone)]
pub struct BracketAnalysis {
    /// Predicted CLI integer °F.
    pub cli_rounded_f: i64,
    /// °C boundary below (rounds to cli_rounded_f).
    pub boundary_below_c: f64,
    /// °C boundary above (rounds to cli_rounded_f + 1).
    pub boundary_above_c: f64,
    /// Distance above the lower boundary (positive = safe).
    pub margin_below_c: f64,
    /// Distance below the upper boundary (positive = room).
    pub margin_above_c: f64,
    pub margin_status: MarginStatus,
}

/// Complete edge analysis for a single city.
#[derive(Debug, Clone)]
pub struct EdgeReport {
    pub city: String,
    pub station_icao: String,
    pub cli_code: String,
    pub timezone: chrono_tz::Tz,
    pub analysis_time_utc: DateTime<Utc>,
    pub readings: Vec<TemperatureReading>,
    pub running_max_c: Option<f64>,
    pub running_max_f_precise: Option<f64>,
    pub running_max_cli_f: Option<i64>,
    pub running_max_source: Option<&'static str>,
    /// What the hourly METAR shows (whole-degree rounded).
    pub metar_temp_f: Option<i64>,
    pub bracket: Option<BracketAnalysis>,
    pub time_risk: TimeRisk,
    pub hours_to_cli_close: Option<f64>,
    pub signal: Signal,
    pub signal_reason: String,
    /// From the preliminary CLI, when published.
    pub cli_max_f: Option<i64>,
    pub cli_is_preliminary: bool,
}

// ── Classification ───────────────────────────────────────────────────

/// Classify the margin distance above the lower rounding boundary.
///
/// One integer °F spans 5/9 ≈ 0.556°C, so the farthest a reading can sit
/// from its nearest boundary is ~0.278°C; thresholds are scaled to that
/// physical range.
pub fn classify_margin(margin_c: f64) -> MarginStatus {
    let abs_margin = margin_c.abs();
    if abs_margin >= 0.20 {
        MarginStatus::Comfortable
    } else if abs_margin >= 0.12 {
        MarginStatus::Moderate
    } else if abs_margin >= 0.06 {
        MarginStatus::Close
    } else {
        MarginStatus::RazorThin
    }
}

/// Classify time-of-day risk from the local hour (0-23).
pub fn classify_time_risk(local_hour: u32) -> TimeRisk {
    if local_hour < 15 {
        TimeRisk::StillRising
    } else if local_hour < 17 {
        TimeRisk::NearPeak
    } else if local_hour < 22 {
        TimeRisk::PastPeak
    } else {
        TimeRisk::Settled
    }
}

/// Bracket analysis for a temperature in °C.
pub fn compute_bracket_analysis(temp_c: f64) -> BracketAnalysis {
    let cli_f = c_to_f_cli_rounded(temp_c);

    // Lower boundary: where the CLI value steps up from cli_f - 1.
    let boundary_below_c = f_boundary_c(cli_f - 1);
    // Upper boundary: where it would step up to cli_f + 1.
    let boundary_above_c = f_boundary_c(cli_f);

    let margin_below = temp_c - boundary_below_c;
    let margin_above = boundary_above_c - temp_c;

    BracketAnalysis {
        cli_rounded_f: cli_f,
        boundary_below_c,
        boundary_above_c,
        margin_below_c: margin_below,
        margin_above_c: margin_above,
        margin_status: classify_margin(margin_below),
    }
}

// ── Signal generation ────────────────────────────────────────────────

/// Deterministic signal decision table over the collected evidence.
pub fn generate_signal(report: &EdgeReport) -> (Signal, String) {
    let (Some(_), Some(bracket)) = (report.running_max_c, report.bracket.as_ref()) else {
        return (Signal::NoEdge, "Insufficient data to analyze.".to_string());
    };

    let cli_f = bracket.cli_rounded_f;

    // Preliminary CLI already published beats everything else.
    if let Some(cli_max) = report.cli_max_f {
        if cli_max == cli_f {
            return (
                Signal::StrongBuy,
                format!("Preliminary CLI confirms {cli_f}F. Market should converge to this bracket."),
            );
        }
        if cli_max > cli_f {
            return (
                Signal::Caution,
                format!(
                    "Preliminary CLI shows {cli_max}F, higher than current running max predicts ({cli_f}F). CLI may be stale."
                ),
            );
        }
    }

    let metar_disagrees = report.metar_temp_f.map_or(false, |m| m != cli_f);

    if metar_disagrees {
        let metar_f = report.metar_temp_f.unwrap_or_default();
        // The core edge: METAR shows one value, precise data shows another.
        match bracket.margin_status {
            MarginStatus::Comfortable | MarginStatus::Moderate => {
                if matches!(report.time_risk, TimeRisk::PastPeak | TimeRisk::Settled) {
                    (
                        Signal::StrongBuy,
                        format!(
                            "Precise data shows {cli_f}F with {} margin. Hourly METARs show {metar_f}F — market likely underpricing. Time risk: {}.",
                            bracket.margin_status.as_str(),
                            report.time_risk.as_str(),
                        ),
                    )
                } else {
                    (
                        Signal::Buy,
                        format!(
                            "Precise data shows {cli_f}F (METAR shows {metar_f}F). Margin: {}. Still {} — could move further.",
                            bracket.margin_status.as_str(),
                            report.time_risk.as_str(),
                        ),
                    )
                }
            }
            MarginStatus::Close => (
                Signal::Caution,
                format!(
                    "Precise data shows {cli_f}F but margin is CLOSE ({:+.3}°C). Temperature could drift back across the boundary.",
                    bracket.margin_below_c
                ),
            ),
            MarginStatus::RazorThin => (
                Signal::Caution,
                format!(
                    "Precise data shows {cli_f}F but margin is RAZOR_THIN ({:+.3}°C). Very risky.",
                    bracket.margin_below_c
                ),
            ),
        }
    } else {
        // METAR agrees with the precise reading — less edge.
        match bracket.margin_status {
            MarginStatus::Comfortable => (
                Signal::NoEdge,
                format!(
                    "All sources agree on {cli_f}F with comfortable margin. Market likely already priced correctly."
                ),
            ),
            MarginStatus::Close | MarginStatus::RazorThin => (
                Signal::Caution,
                format!(
                    "Sources agree on {cli_f}F but margin is {}. Small temperature change could flip the bracket.",
                    bracket.margin_status.as_str()
                ),
            ),
            MarginStatus::Moderate => (
                Signal::Hold,
                format!("Sources agree on {cli_f}F. Moderate margin. No significant edge detected."),
            ),
        }
    }
}

// ── Main analysis ────────────────────────────────────────────────────

/// Run the full temperature edge analysis for one city: look up the
/// station, fan-in all four sources, pick the running max, compute the
/// bracket margin and time risk, and generate the signal.
pub async fn analyze_city(city: &str, scraper: &NwsProducts) -> Option<EdgeReport> {
    let entry = lookup_station(city)?;
    analyze_city_at(entry, scraper, Utc::now()).await
}

async fn analyze_city_at(
    entry: &'static StationEntry,
    scraper: &NwsProducts,
    now_utc: DateTime<Utc>,
) -> Option<EdgeReport> {
    let icao = entry.icao;
    let cli_code = entry.cli_code;
    let tz = entry.tz;
    let now_local = now_utc.with_timezone(&tz);

    let mut report = EdgeReport {
        city: entry.city.to_string(),
        station_icao: icao.to_string(),
        cli_code: cli_code.to_string(),
        timezone: tz,
        analysis_time_utc: now_utc,
        readings: Vec::new(),
        running_max_c: None,
        running_max_f_precise: None,
        running_max_cli_f: None,
        running_max_source: None,
        metar_temp_f: None,
        bracket: None,
        time_risk: TimeRisk::StillRising,
        hours_to_cli_close: None,
        signal: Signal::NoEdge,
        signal_reason: String::new(),
        cli_max_f: None,
        cli_is_preliminary: false,
    };

    // Fan-in: each source is independently optional.
    let metar_obs = scraper.get_raw_metar(icao).await;
    let current_cond = scraper.get_current_conditions(icao).await;
    let obs_history = scraper.get_observation_history(icao).await;
    let cli_report = scraper.get_preliminary_cli(cli_code).await;

    let mut readings: Vec<TemperatureReading> = Vec::new();

    if let Some(obs) = &metar_obs {
        if let Some(temp_c) = obs.temp_c_tenths {
            readings.push(TemperatureReading {
                source: "METAR T-group",
                time_utc: obs.observation_time_utc,
                temp_c,
                temp_f_precise: obs.temp_f_precise,
                cli_rounded_f: Some(c_to_f_cli_rounded(temp_c)),
                confidence: Confidence::High,
                note: format!("Raw METAR from {icao}"),
            });
        }
        if let Some(rounded_c) = obs.temp_c_rounded {
            report.metar_temp_f = Some(nws_round(c_to_f_precise(rounded_c as f64)));
        }
        if let Some(max_c) = obs.six_hr_max_c {
            readings.push(TemperatureReading {
                source: "METAR 6-hr max",
                time_utc: obs.observation_time_utc,
                temp_c: max_c,
                temp_f_precise: Some(c_to_f_precise(max_c)),
                cli_rounded_f: Some(c_to_f_cli_rounded(max_c)),
                confidence: Confidence::Medium,
                note: "6-hour maximum from METAR remarks".to_string(),
            });
        }
    }

    if let Some(cc) = &current_cond {
        if let Some(temp_f) = cc.temp_f {
            let temp_c = cc.temp_c.unwrap_or((temp_f - 32.0) * 5.0 / 9.0);
            readings.push(TemperatureReading {
                source: "Current Conditions",
                time_utc: Some(now_utc.naive_utc()),
                temp_c,
                temp_f_precise: Some(temp_f),
                cli_rounded_f: Some(nws_round(temp_f)),
                confidence: Confidence::MediumHigh,
                note: format!("NWS current conditions page for {icao}"),
            });
        }
    }

    if let Some(hist) = &obs_history {
        if let Some(max_f) = hist.max_temp_f {
            readings.push(TemperatureReading {
                source: "Observation History Max",
                time_utc: None,
                temp_c: (max_f - 32.0) * 5.0 / 9.0,
                temp_f_precise: Some(max_f),
                cli_rounded_f: Some(nws_round(max_f)),
                confidence: Confidence::Low,
                note: format!("Max from {} observations today", hist.entries.len()),
            });
        }
    }

    if let Some(cli) = &cli_report {
        if let Some(max_f) = cli.max_temp_f {
            report.cli_max_f = Some(max_f);
            report.cli_is_preliminary = cli.is_preliminary;
            let note = format!(
                "CLI {cli_code}: max {max_f}F{}{}",
                cli.max_temp_time
                    .as_ref()
                    .map(|t| format!(" at {t}"))
                    .unwrap_or_default(),
                if cli.is_preliminary { " (preliminary)" } else { "" },
            );
            readings.push(TemperatureReading {
                source: "Preliminary CLI",
                time_utc: None,
                temp_c: (max_f as f64 - 32.0) * 5.0 / 9.0,
                temp_f_precise: Some(max_f as f64),
                cli_rounded_f: Some(max_f),
                confidence: Confidence::Highest,
                note,
            });
        }
    }

    report.readings = readings;
    fill_derived_fields(&mut report, now_local.hour(), now_utc);
    Some(report)
}

/// Running max, bracket analysis, time risk, and signal — pure derivation
/// from the collected readings.
pub fn fill_derived_fields(report: &mut EdgeReport, local_hour: u32, now_utc: DateTime<Utc>) {
    // Running max: highest °C among the precise (non-LOW) readings.
    let best = report
        .readings
        .iter()
        .filter(|r| r.confidence != Confidence::Low)
        .max_by(|a, b| a.temp_c.partial_cmp(&b.temp_c).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(best) = best {
        report.running_max_c = Some(best.temp_c);
        report.running_max_f_precise = best.temp_f_precise;
        report.running_max_cli_f = best.cli_rounded_f;
        report.running_max_source = Some(best.source);
    }

    if let Some(max_c) = report.running_max_c {
        report.bracket = Some(compute_bracket_analysis(max_c));
    }

    report.time_risk = classify_time_risk(local_hour);

    let local_date = now_utc.with_timezone(&report.timezone).date_naive();
    let (_, cli_end) = cli_day_window(local_date, report.timezone);
    report.hours_to_cli_close =
        Some(((cli_end - now_utc).num_seconds() as f64 / 3600.0).max(0.0));

    let (signal, reason) = generate_signal(report);
    report.signal = signal;
    report.signal_reason = reason;
}

/// Run edge analysis for every city in the station database.
pub async fn analyze_all_cities(scraper: &NwsProducts) -> Vec<EdgeReport> {
    let mut reports = Vec::new();
    for entry in STATION_DB {
        if let Some(report) = analyze_city(entry.city, scraper).await {
            reports.push(report);
        }
    }
    reports
}

// ── Output formatters ────────────────────────────────────────────────

/// Detailed single-city edge report.
pub fn format_edge_report(report: &EdgeReport) -> String {
    let local_time = report.analysis_time_utc.with_timezone(&report.timezone);
    let time_str = local_time.format("%Y-%m-%d %H:%M %Z");

    let hours_str = report
        .hours_to_cli_close
        .map_or("unknown".to_string(), |h| format!("{h:.1} hours"));

    let mut lines = vec![
        format!(
            "=== TEMPERATURE EDGE: {} ({}) ===",
            report.city, report.station_icao
        ),
        format!("Time: {time_str} | CLI closes in {hours_str}"),
        String::new(),
        "--- PRECISE READINGS ---".to_string(),
    ];

    for r in &report.readings {
        let time_part = r
            .time_utc
            .map(|t| format!(" ({}Z)", t.format("%H:%M")))
            .unwrap_or_default();
        let mut temp_parts = vec![format!("{:.1}C", r.temp_c)];
        if let Some(f) = r.temp_f_precise {
            temp_parts.push(format!("= {f:.2}F"));
        }
        if let Some(cli) = r.cli_rounded_f {
            temp_parts.push(format!("-> CLI: {cli}F"));
        }

        let marker = if report.running_max_source == Some(r.source) && report.readings.len() > 1 {
            "  << HIGHEST"
        } else {
            ""
        };

        lines.push(format!("  {}{time_part}: {}{marker}", r.source, temp_parts.join(" ")));
        if !r.note.is_empty() {
            lines.push(format!("    ({})", r.note));
        }
    }

    lines.push(String::new());

    match (&report.running_max_c, &report.bracket) {
        (Some(max_c), Some(b)) => {
            lines.push(format!(
                "--- RUNNING MAX: {max_c:.1}C ({:.2}F) -> CLI: {}F ---",
                report.running_max_f_precise.unwrap_or_default(),
                b.cli_rounded_f
            ));
            lines.push(format!(
                "  Boundary {}/{}F: {:.3}C | Margin: {:+.3}C above ({})",
                b.cli_rounded_f - 1,
                b.cli_rounded_f,
                b.boundary_below_c,
                b.margin_below_c,
                b.margin_status.as_str(),
            ));
            lines.push(format!(
                "  Boundary {}/{}F: {:.3}C | Gap: {:+.3}C below (needs {:+.1}C more)",
                b.cli_rounded_f,
                b.cli_rounded_f + 1,
                b.boundary_above_c,
                -b.margin_above_c,
                b.margin_above_c,
            ));
        }
        _ => lines.push("--- NO PRECISE DATA AVAILABLE ---".to_string()),
    }

    lines.push(String::new());
    lines.push(format!("--- SIGNAL: {} ---", report.signal.as_str()));
    lines.push(format!("  Time risk: {}", report.time_risk.as_str()));
    lines.push(format!("  {}", report.signal_reason));

    lines.join("\n")
}

/// Multi-city summary table.
pub fn format_edge_summary(reports: &[EdgeReport]) -> String {
    let header = format!(
        "{:<15} | {:>5} | {:>7} | {:>5} | {:>8} | {:<11} | {}",
        "City", "METAR", "Precise", "CLI F", "Margin C", "Signal", "Time"
    );
    let sep = "-".repeat(header.len());

    let mut lines = vec![
        "=== TEMPERATURE EDGE SUMMARY ===".to_string(),
        String::new(),
        header,
        sep.clone(),
    ];

    for r in reports {
        let metar_str = r.metar_temp_f.map_or("—".to_string(), |v| v.to_string());
        let precise_str = r
            .running_max_f_precise
            .map_or("—".to_string(), |v| format!("{v:.1}"));
        let cli_str = r.running_max_cli_f.map_or("—".to_string(), |v| v.to_string());
        let margin_str = r
            .bracket
            .as_ref()
            .map_or("—".to_string(), |b| format!("{:+.2}", b.margin_below_c));

        lines.push(format!(
            "{:<15} | {metar_str:>5} | {precise_str:>7} | {cli_str:>5} | {margin_str:>8} | {:<11} | {}",
            r.city,
            r.signal.as_str(),
            r.time_risk.as_str(),
        ));
    }

    let strong = reports.iter().filter(|r| r.signal == Signal::StrongBuy).count();
    let buy = reports.iter().filter(|r| r.signal == Signal::Buy).count();
    let caution = reports.iter().filter(|r| r.signal == Signal::Caution).count();

    lines.push(sep);
    lines.push(format!(
        "Signals: {strong} STRONG_BUY, {buy} BUY, {caution} CAUTION, {} other",
        reports.len() - strong - buy - caution
    ));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(source: &'static str, temp_c: f64, confidence: Confidence) -> TemperatureReading {
        TemperatureReading {
            source,
            time_utc: None,
            temp_c,
            temp_f_precise: Some(c_to_f_precise(temp_c)),
            cli_rounded_f: Some(c_to_f_cli_rounded(temp_c)),
            confidence,
            note: String::new(),
        }
    }

    fn base_report() -> EdgeReport {
        EdgeReport {
            city: "New York".to_string(),
            station_icao: "KNYC".to_string(),
            cli_code: "NYC".to_string(),
            timezone: chrono_tz::America::New_York,
            analysis_time_utc: Utc.with_ymd_and_hms(2026, 2, 24, 23, 0, 0).unwrap(),
            readings: vec![],
            running_max_c: None,
            running_max_f_precise: None,
            running_max_cli_f: None,
            running_max_source: None,
            metar_temp_f: None,
            bracket: None,
            time_risk: TimeRisk::PastPeak,
            hours_to_cli_close: None,
            signal: Signal::NoEdge,
            signal_reason: String::new(),
            cli_max_f: None,
            cli_is_preliminary: false,
        }
    }

    #[test]
    fn test_margin_classification_bands() {
        assert_eq!(classify_margin(0.25), MarginStatus::Comfortable);
        assert_eq!(classify_margin(0.20), MarginStatus::Comfortable);
        assert_eq!(classify_margin(0.15), MarginStatus::Moderate);
        assert_eq!(classify_margin(0.12), MarginStatus::Moderate);
        assert_eq!(classify_margin(0.08), MarginStatus::Close);
        assert_eq!(classify_margin(0.06), MarginStatus::Close);
        assert_eq!(classify_margin(0.03), MarginStatus::RazorThin);
        // Sign does not matter.
        assert_eq!(classify_margin(-0.25), MarginStatus::Comfortable);
    }

    #[test]
    fn test_time_risk_bands() {
        assert_eq!(classify_time_risk(9), TimeRisk::StillRising);
        assert_eq!(classify_time_risk(14), TimeRisk::StillRising);
        assert_eq!(classify_time_risk(15), TimeRisk::NearPeak);
        assert_eq!(classify_time_risk(16), TimeRisk::NearPeak);
        assert_eq!(classify_time_risk(17), TimeRisk::PastPeak);
        assert_eq!(classify_time_risk(21), TimeRisk::PastPeak);
        assert_eq!(classify_time_risk(22), TimeRisk::Settled);
        assert_eq!(classify_time_risk(23), TimeRisk::Settled);
    }

    #[test]
    fn test_bracket_analysis_boundaries() {
        // 4.0C -> 39.2F -> CLI 39. Boundaries at 38.5F and 39.5F in °C.
        let b = compute_bracket_analysis(4.0);
        assert_eq!(b.cli_rounded_f, 39);
        assert!((b.boundary_below_c - f_boundary_c(38)).abs() < 1e-12);
        assert!((b.boundary_above_c - f_boundary_c(39)).abs() < 1e-12);
        assert!(b.margin_below_c > 0.0);
        assert!(b.margin_above_c > 0.0);
        // Margins partition the one-degree-F span (5/9 °C).
        assert!((b.margin_below_c + b.margin_above_c - 5.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_max_excludes_low_confidence() {
        let mut report = base_report();
        report.readings = vec![
            reading("METAR T-group", 4.4, Confidence::High),
            reading("Observation History Max", 6.0, Confidence::Low),
            reading("Current Conditions", 4.2, Confidence::MediumHigh),
        ];
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        // The 6.0C low-confidence reading must not win.
        assert_eq!(report.running_max_c, Some(4.4));
        assert_eq!(report.running_max_source, Some("METAR T-group"));
    }

    #[test]
    fn test_signal_cli_confirmation_is_strong_buy() {
        let mut report = base_report();
        report.readings = vec![reading("METAR T-group", 4.4, Confidence::High)];
        report.cli_max_f = Some(c_to_f_cli_rounded(4.4));
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        assert_eq!(report.signal, Signal::StrongBuy);
        assert!(report.signal_reason.contains("Preliminary CLI confirms"));
    }

    #[test]
    fn test_signal_cli_higher_is_caution() {
        let mut report = base_report();
        report.readings = vec![reading("METAR T-group", 4.4, Confidence::High)];
        report.cli_max_f = Some(c_to_f_cli_rounded(4.4) + 2);
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        assert_eq!(report.signal, Signal::Caution);
        assert!(report.signal_reason.contains("CLI may be stale"));
    }

    #[test]
    fn test_signal_metar_disagreement_past_peak() {
        // T-group 4.4C -> 39.92F -> CLI 40, comfortably above the 39/40
        // boundary (4.167C). Hourly METAR rounds whole 4C -> 39F.
        let mut report = base_report();
        report.readings = vec![reading("METAR T-group", 4.4, Confidence::High)];
        report.metar_temp_f = Some(39);
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        assert_eq!(report.bracket.as_ref().unwrap().cli_rounded_f, 40);
        assert_eq!(report.bracket.as_ref().unwrap().margin_status, MarginStatus::Comfortable);
        assert_eq!(report.signal, Signal::StrongBuy);

        // Same disagreement while still rising is only a BUY.
        fill_derived_fields(&mut report, 10, now);
        assert_eq!(report.signal, Signal::Buy);
    }

    #[test]
    fn test_signal_agreement_comfortable_is_no_edge() {
        let mut report = base_report();
        report.readings = vec![reading("METAR T-group", 4.4, Confidence::High)];
        report.metar_temp_f = Some(40);
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        assert_eq!(report.signal, Signal::NoEdge);
    }

    #[test]
    fn test_signal_razor_thin_is_caution() {
        // Just past the 39/40 boundary: margin below ~0.01C.
        let boundary = f_boundary_c(39);
        let mut report = base_report();
        report.readings = vec![reading("METAR T-group", boundary + 0.01, Confidence::High)];
        report.metar_temp_f = Some(39);
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        assert_eq!(report.bracket.as_ref().unwrap().margin_status, MarginStatus::RazorThin);
        assert_eq!(report.signal, Signal::Caution);
    }

    #[test]
    fn test_no_data_is_no_edge() {
        let mut report = base_report();
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        assert_eq!(report.signal, Signal::NoEdge);
        assert!(report.signal_reason.contains("Insufficient data"));
    }

    #[test]
    fn test_format_report_renders() {
        let mut report = base_report();
        report.readings = vec![reading("METAR T-group", 4.4, Confidence::High)];
        report.metar_temp_f = Some(39);
        let now = report.analysis_time_utc;
        fill_derived_fields(&mut report, 18, now);
        let text = format_edge_report(&report);
        assert!(text.contains("TEMPERATURE EDGE: New York (KNYC)"));
        assert!(text.contains("RUNNING MAX"));
        assert!(text.contains("SIGNAL: STRONG_BUY"));

        let summary = format_edge_summary(&[report]);
        assert!(summary.contains("New York"));
        assert!(summary.contains("STRONG_BUY"));
    }
}
