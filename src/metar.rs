//! METAR parser — extracts precise temperatures from raw METAR text.
//!
//! Parses the T-group (tenths of °C), 6-hr/24-hr extremes, and standard
//! METAR temperature fields, and implements NWS-style half-up rounding
//! for CLI settlement prediction. Extraction is lossless: the tenths
//! precision in the remarks section is preserved end to end.

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;

/// Parsed observation from a raw METAR text block.
#[derive(Debug, Clone)]
pub struct MetarObservation {
    pub station_icao: String,
    pub observation_time_utc: Option<NaiveDateTime>,
    pub raw_text: String,
    /// T-group temperature, e.g. 3.9
    pub temp_c_tenths: Option<f64>,
    /// T-group dewpoint, e.g. -10.6
    pub dewpoint_c_tenths: Option<f64>,
    /// Precise °F from the T-group, e.g. 39.02
    pub temp_f_precise: Option<f64>,
    /// Standard METAR whole-°C temperature, e.g. 4
    pub temp_c_rounded: Option<i64>,
    pub has_t_group: bool,
    pub six_hr_max_c: Option<f64>,
    pub six_hr_min_c: Option<f64>,
    pub twenty_four_hr_max_c: Option<f64>,
    pub twenty_four_hr_min_c: Option<f64>,
}

// ── Conversion helpers ───────────────────────────────────────────────

/// NWS-style rounding: half rounds UP, unlike the half-to-even default.
///
/// nws_round(39.5) == 40, nws_round(2.5) == 3.
pub fn nws_round(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Celsius to Fahrenheit with full precision.
pub fn c_to_f_precise(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Convert tenths-°C to °F the way the NWS ASOS pipeline does: precise
/// conversion, then half-up rounding to the nearest integer.
pub fn c_to_f_cli_rounded(c: f64) -> i64 {
    nws_round(c_to_f_precise(c))
}

/// The °C threshold where the CLI integer rounds UP from `n_f` to `n_f + 1`.
///
/// Exactly at the boundary the rounded value is `n_f + 1`; just below it,
/// `n_f`. Example: `f_boundary_c(39)` = 4.1667°C, the 39F/40F boundary.
pub fn f_boundary_c(n_f: i64) -> f64 {
    (n_f as f64 + 0.5 - 32.0) * 5.0 / 9.0
}

// ── METAR field parsers ──────────────────────────────────────────────

lazy_static! {
    // T-group in remarks: T then sign+3 digits (temp) and sign+3 digits
    // (dewpoint), tenths of °C. Sign digit: 0 = positive, 1 = negative.
    static ref T_GROUP_RE: Regex = Regex::new(r"\bT(\d)(\d{3})(\d)(\d{3})\b").unwrap();

    // 6-hour max: 1[sign][3 digits]  (reported at 00Z, 06Z, 12Z, 18Z)
    static ref SIX_HR_MAX_RE: Regex = Regex::new(r"\b1(\d)(\d{3})\b").unwrap();
    // 6-hour min: 2[sign][3 digits]
    static ref SIX_HR_MIN_RE: Regex = Regex::new(r"\b2(\d)(\d{3})\b").unwrap();
    // 24-hour max/min: 4[sign_max][3 digits][sign_min][3 digits]
    static ref TWENTY_FOUR_HR_RE: Regex = Regex::new(r"\b4(\d)(\d{3})(\d)(\d{3})\b").unwrap();

    // Standard METAR temperature: TT/DD with M prefix meaning negative,
    // e.g. "04/M11". The surrounding separator requirement keeps this from
    // matching date fragments like "02/24" inside the "2026/02/24 19:53"
    // header line (those are preceded by a digit or '/', never whitespace).
    static ref STANDARD_TEMP_RE: Regex =
        Regex::new(r"(?:^|\s)(M?\d{2})/(M?\d{2})(?:\s|$)").unwrap();

    // Observation time from the NWS METAR file header, e.g. "2026/02/24 20:53".
    static ref OBS_TIME_RE: Regex =
        Regex::new(r"(\d{4})/(\d{2})/(\d{2})\s+(\d{2}):(\d{2})").unwrap();
}

fn signed_tenths(sign: &str, digits: &str) -> Option<f64> {
    let val = digits.parse::<i64>().ok()? as f64 / 10.0;
    Some(if sign == "1" { -val } else { val })
}

/// Parse the T-group from METAR remarks.
/// Returns `(temp_c_tenths, dewpoint_c_tenths)`.
pub fn parse_t_group(remarks: &str) -> (Option<f64>, Option<f64>) {
    let Some(caps) = T_GROUP_RE.captures(remarks) else {
        return (None, None);
    };
    let temp = signed_tenths(&caps[1], &caps[2]);
    let dew = signed_tenths(&caps[3], &caps[4]);
    (temp, dew)
}

/// Parse 6-hour max (1sddd) and min (2sddd) from METAR remarks.
pub fn parse_6hr_extremes(remarks: &str) -> (Option<f64>, Option<f64>) {
    let max_c = SIX_HR_MAX_RE
        .captures(remarks)
        .and_then(|c| signed_tenths(&c[1], &c[2]));
    let min_c = SIX_HR_MIN_RE
        .captures(remarks)
        .and_then(|c| signed_tenths(&c[1], &c[2]));
    (max_c, min_c)
}

/// Parse the 24-hour max/min (4sdddsddd group) from METAR remarks.
pub fn parse_24hr_extremes(remarks: &str) -> (Option<f64>, Option<f64>) {
    let Some(caps) = TWENTY_FOUR_HR_RE.captures(remarks) else {
        return (None, None);
    };
    let max_c = signed_tenths(&caps[1], &caps[2]);
    let min_c = signed_tenths(&caps[3], &caps[4]);
    (max_c, min_c)
}

fn parse_m_prefixed(s: &str) -> Option<i64> {
    if let Some(rest) = s.strip_prefix('M') {
        rest.parse::<i64>().ok().map(|v| -v)
    } else {
        s.parse::<i64>().ok()
    }
}

/// Parse the standard METAR temperature and dewpoint (whole °C).
pub fn parse_standard_temp(metar: &str) -> (Option<i64>, Option<i64>) {
    let Some(caps) = STANDARD_TEMP_RE.captures(metar) else {
        return (None, None);
    };
    (parse_m_prefixed(&caps[1]), parse_m_prefixed(&caps[2]))
}

/// Extract the observation time from the NWS METAR text file header.
fn parse_obs_time(raw_text: &str) -> Option<NaiveDateTime> {
    let caps = OBS_TIME_RE.captures(raw_text)?;
    let dt = format!("{}-{}-{} {}:{}", &caps[1], &caps[2], &caps[3], &caps[4], &caps[5]);
    NaiveDateTime::parse_from_str(&dt, "%Y-%m-%d %H:%M").ok()
}

/// Parse a raw METAR text block (timestamp header line plus the METAR
/// string, as served by the NWS station files).
pub fn parse_raw_metar(raw_text: &str, station_icao: &str) -> MetarObservation {
    let obs_time = parse_obs_time(raw_text);

    let (temp_c_tenths, dewpoint_c_tenths) = parse_t_group(raw_text);
    let has_t_group = temp_c_tenths.is_some();
    let temp_f_precise = temp_c_tenths.map(c_to_f_precise);

    let (temp_c_rounded, _) = parse_standard_temp(raw_text);
    let (six_hr_max_c, six_hr_min_c) = parse_6hr_extremes(raw_text);
    let (twenty_four_hr_max_c, twenty_four_hr_min_c) = parse_24hr_extremes(raw_text);

    MetarObservation {
        station_icao: station_icao.to_string(),
        observation_time_utc: obs_time,
        raw_text: raw_text.to_string(),
        temp_c_tenths,
        dewpoint_c_tenths,
        temp_f_precise,
        temp_c_rounded,
        has_t_group,
        six_hr_max_c,
        six_hr_min_c,
        twenty_four_hr_max_c,
        twenty_four_hr_min_c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "2026/02/24 19:53\n\
        KNYC 241953Z 28011KT 10SM FEW250 04/M11 A3021 RMK AO2 SLP231 \
        T00391106 10044 21011 56015";

    #[test]
    fn test_nws_round_is_half_up_not_bankers() {
        assert_eq!(nws_round(39.5), 40);
        assert_eq!(nws_round(39.4999), 39);
        assert_eq!(nws_round(0.5), 1);
        // Banker's rounding would give 2 here; NWS must give 3.
        assert_eq!(nws_round(2.5), 3);
        assert_eq!(nws_round(-0.5), 0);
    }

    #[test]
    fn test_c_to_f_conversion() {
        assert!((c_to_f_precise(3.9) - 39.02).abs() < 1e-9);
        assert_eq!(c_to_f_cli_rounded(3.9), 39);
        assert_eq!(c_to_f_cli_rounded(0.0), 32);
    }

    #[test]
    fn test_boundary_rounds_up_exactly_at_threshold() {
        let b = f_boundary_c(39);
        assert!((b - 4.166666666666667).abs() < 1e-9);
        assert_eq!(c_to_f_cli_rounded(b), 40);
        assert_eq!(c_to_f_cli_rounded(b - 1e-6), 39);
    }

    #[test]
    fn test_t_group_positive_and_negative() {
        let (t, d) = parse_t_group("RMK AO2 T00391106");
        assert_eq!(t, Some(3.9));
        assert_eq!(d, Some(-10.6));

        let (t, d) = parse_t_group("RMK T11220044");
        assert_eq!(t, Some(-12.2));
        assert_eq!(d, Some(4.4));

        assert_eq!(parse_t_group("RMK AO2 SLP231"), (None, None));
    }

    #[test]
    fn test_6hr_extremes() {
        let (max_c, min_c) = parse_6hr_extremes("RMK 10044 21011");
        assert_eq!(max_c, Some(4.4));
        assert_eq!(min_c, Some(-1.1));
    }

    #[test]
    fn test_24hr_extremes() {
        let (max_c, min_c) = parse_24hr_extremes("RMK 401120084");
        assert_eq!(max_c, Some(11.2));
        assert_eq!(min_c, Some(8.4));

        let (max_c, min_c) = parse_24hr_extremes("RMK 411220056");
        assert_eq!(max_c, Some(-12.2));
        assert_eq!(min_c, Some(5.6));
    }

    #[test]
    fn test_standard_temp_with_m_prefix() {
        let (t, d) = parse_standard_temp("KNYC 241953Z 28011KT 04/M11 A3021");
        assert_eq!(t, Some(4));
        assert_eq!(d, Some(-11));
    }

    #[test]
    fn test_standard_temp_skips_date_header() {
        // "02/24" in the header must not parse as a temperature.
        let (t, d) = parse_standard_temp("2026/02/24 19:53\nKNYC 241953Z 04/M11");
        assert_eq!(t, Some(4));
        assert_eq!(d, Some(-11));

        let (t, _) = parse_standard_temp("2026/02/24 19:53\nKNYC 241953Z");
        assert_eq!(t, None);
    }

    #[test]
    fn test_obs_time_from_header() {
        let obs = parse_raw_metar(SAMPLE, "KNYC");
        let t = obs.observation_time_utc.unwrap();
        assert_eq!(t.format("%Y-%m-%d %H:%M").to_string(), "2026-02-24 19:53");
    }

    #[test]
    fn test_full_parse_is_lossless() {
        let obs = parse_raw_metar(SAMPLE, "KNYC");
        assert!(obs.has_t_group);
        assert_eq!(obs.temp_c_tenths, Some(3.9));
        assert_eq!(obs.dewpoint_c_tenths, Some(-10.6));
        assert!((obs.temp_f_precise.unwrap() - 39.02).abs() < 1e-9);
        assert_eq!(obs.temp_c_rounded, Some(4));
        assert_eq!(obs.six_hr_max_c, Some(4.4));
        assert_eq!(obs.six_hr_min_c, Some(-1.1));
    }
}
