//! NWS product scraper — precise temperature data from 4 text/HTML sources.
//!
//! Sources:
//!   1. Raw METAR text (tgftp.nws.noaa.gov) — T-group with tenths °C
//!   2. Current conditions HTML — decimal °F
//!   3. Observation history HTML table — all of today's observations
//!   4. Preliminary CLI product — official settlement max/min
//!
//! Every fetch is failure-tolerant: a source that is down or malformed
//! contributes `None` and the analysis continues without it.

use std::time::Duration;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Method, Response};
use tracing::{info, warn};

use crate::config::RateLimitConfig;
use crate::metar::{parse_raw_metar, MetarObservation};
use crate::transport::{request_with_retry, RateLimiter};

const USER_AGENT: &str = "(wxbot-scanner, ops@example.com)";

/// Parsed from the NWS current conditions HTML page.
#[derive(Debug, Clone, Default)]
pub struct CurrentConditions {
    pub station_icao: String,
    /// Decimal °F, e.g. 39.9
    pub temp_f: Option<f64>,
    pub temp_c: Option<f64>,
    pub six_hr_max_f: Option<f64>,
    pub six_hr_min_f: Option<f64>,
    pub twenty_four_hr_max_f: Option<f64>,
}

/// A single row from the observation history table.
#[derive(Debug, Clone, Default)]
pub struct ObsHistoryEntry {
    pub date_str: String,
    pub time_str: String,
    pub temp_f: Option<f64>,
    pub dewpoint_f: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ObservationHistory {
    pub station_icao: String,
    pub entries: Vec<ObsHistoryEntry>,
    pub max_temp_f: Option<f64>,
}

/// Parsed preliminary CLI (Climate Report).
#[derive(Debug, Clone, Default)]
pub struct CliReport {
    pub cli_code: String,
    pub max_temp_f: Option<i64>,
    pub max_temp_time: Option<String>,
    pub min_temp_f: Option<i64>,
    pub valid_as_of: Option<String>,
    pub is_preliminary: bool,
}

lazy_static! {
    // Current conditions: "Temperature: 39.9 F (4.4 C)"
    static ref TEMP_RE: Regex = Regex::new(
        r"(?i)Temperature[:\s]+(-?[\d.]+)\s*(?:&deg;|°)?\s*F\s*\(\s*(-?[\d.]+)\s*(?:&deg;|°)?\s*C\s*\)"
    ).unwrap();
    // Variant HTML formats drop the label.
    static ref TEMP_SIMPLE_RE: Regex = Regex::new(
        r"(-?[\d.]+)\s*(?:&deg;|°)\s*F\s*\(\s*(-?[\d.]+)\s*(?:&deg;|°)\s*C\s*\)"
    ).unwrap();

    static ref SIX_HR_MAX_F_RE: Regex = Regex::new(
        r"(?i)6[- ]?(?:hour|hr)\s+max(?:imum)?[:\s]+(-?[\d.]+)\s*(?:&deg;|°)?\s*F"
    ).unwrap();
    static ref SIX_HR_MIN_F_RE: Regex = Regex::new(
        r"(?i)6[- ]?(?:hour|hr)\s+min(?:imum)?[:\s]+(-?[\d.]+)\s*(?:&deg;|°)?\s*F"
    ).unwrap();
    static ref TWENTY_FOUR_HR_MAX_F_RE: Regex = Regex::new(
        r"(?i)24[- ]?(?:hour|hr)\s+max(?:imum)?[:\s]+(-?[\d.]+)\s*(?:&deg;|°)?\s*F"
    ).unwrap();

    // Observation history table row: date, time, a few variable columns,
    // then temperature and dewpoint cells.
    static ref OBS_ROW_RE: Regex = Regex::new(
        r"(?is)<tr[^>]*>\s*<td[^>]*>([^<]*)</td>\s*<td[^>]*>([^<]*)</td>\s*(?:<td[^>]*>[^<]*</td>\s*){2,5}<td[^>]*>\s*(-?[\d.]+)\s*</td>\s*<td[^>]*>\s*(-?[\d.]+)\s*</td>"
    ).unwrap();

    // CLI product fields.
    static ref CLI_MAX_RE: Regex = Regex::new(
        r"(?i)MAXIMUM\s+TEMPERATURE[^\n]*\n\s*(?:TODAY|YESTERDAY)?\s*(\d+)"
    ).unwrap();
    static ref CLI_MAX_TIME_RE: Regex = Regex::new(
        r"(?i)MAXIMUM\s+TEMPERATURE[^\n]*\n[^\n]*?(\d{1,2}:\d{2}\s*[AP]M)"
    ).unwrap();
    static ref CLI_MIN_RE: Regex = Regex::new(
        r"(?i)MINIMUM\s+TEMPERATURE[^\n]*\n\s*(?:TODAY|YESTERDAY)?\s*(\d+)"
    ).unwrap();
    static ref CLI_VALID_RE: Regex = Regex::new(r"(?i)(?:VALID|AS\s+OF)[:\s]+([^\n]+)").unwrap();
    static ref CLI_PRELIMINARY_RE: Regex = Regex::new(r"(?i)PRELIMINARY").unwrap();
}

fn cap_f64(caps: &regex::Captures<'_>, idx: usize) -> Option<f64> {
    caps.get(idx)?.as_str().parse().ok()
}

// ── Scraper ──────────────────────────────────────────────────────────

pub struct NwsProducts {
    client: Client,
    limiter: RateLimiter,
    retry: RateLimitConfig,
}

impl NwsProducts {
    pub fn new(retry: RateLimitConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("text/html, text/plain, */*"),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to create HTTP client")?;
        info!("NwsProducts scraper initialized");
        Ok(Self {
            client,
            limiter: RateLimiter::new(retry.nws_requests_per_second),
            retry,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp: Response = request_with_retry(
            &self.client,
            Method::GET,
            url,
            None,
            None,
            Some(&self.limiter),
            &self.retry,
        )
        .await?;
        Ok(resp.text().await?)
    }

    /// Source 1: raw METAR text with the tenths-°C T-group.
    pub async fn get_raw_metar(&self, icao: &str) -> Option<MetarObservation> {
        let url =
            format!("https://tgftp.nws.noaa.gov/data/observations/metar/stations/{icao}.TXT");
        match self.get_text(&url).await {
            Ok(raw) => Some(parse_raw_metar(&raw, icao)),
            Err(e) => {
                warn!("Failed to fetch raw METAR for {icao}: {e:#}");
                None
            }
        }
    }

    /// Source 2: current conditions HTML with decimal °F.
    pub async fn get_current_conditions(&self, icao: &str) -> Option<CurrentConditions> {
        let url = format!("https://tgftp.nws.noaa.gov/weather/current/{icao}.html");
        match self.get_text(&url).await {
            Ok(html) => Some(parse_current_conditions(&html, icao)),
            Err(e) => {
                warn!("Failed to fetch current conditions for {icao}: {e:#}");
                None
            }
        }
    }

    /// Source 3: observation history HTML table.
    pub async fn get_observation_history(&self, icao: &str) -> Option<ObservationHistory> {
        let url = format!("https://forecast.weather.gov/data/obhistory/{icao}.html");
        match self.get_text(&url).await {
            Ok(html) => Some(parse_observation_history(&html, icao)),
            Err(e) => {
                warn!("Failed to fetch observation history for {icao}: {e:#}");
                None
            }
        }
    }

    /// Source 4: latest CLI climate product for a station.
    pub async fn get_preliminary_cli(&self, cli_code: &str) -> Option<CliReport> {
        let url = format!(
            "https://forecast.weather.gov/product.php?site=NWS&product=CLI&issuedby={cli_code}"
        );
        match self.get_text(&url).await {
            Ok(text) => Some(parse_cli_product(&text, cli_code)),
            Err(e) => {
                warn!("Failed to fetch CLI for {cli_code}: {e:#}");
                None
            }
        }
    }
}

// ── Parsers (pure, unit-tested) ──────────────────────────────────────

pub fn parse_current_conditions(html: &str, icao: &str) -> CurrentConditions {
    let mut cc = CurrentConditions {
        station_icao: icao.to_string(),
        ..Default::default()
    };

    let caps = TEMP_RE.captures(html).or_else(|| TEMP_SIMPLE_RE.captures(html));
    if let Some(caps) = caps {
        cc.temp_f = cap_f64(&caps, 1);
        cc.temp_c = cap_f64(&caps, 2);
    }

    cc.six_hr_max_f = SIX_HR_MAX_F_RE.captures(html).and_then(|c| cap_f64(&c, 1));
    cc.six_hr_min_f = SIX_HR_MIN_F_RE.captures(html).and_then(|c| cap_f64(&c, 1));
    cc.twenty_four_hr_max_f = TWENTY_FOUR_HR_MAX_F_RE
        .captures(html)
        .and_then(|c| cap_f64(&c, 1));

    cc
}

pub fn parse_observation_history(html: &str, icao: &str) -> ObservationHistory {
    let mut entries = Vec::new();
    let mut max_temp: Option<f64> = None;

    for caps in OBS_ROW_RE.captures_iter(html) {
        let (Some(temp_f), Some(dew_f)) = (cap_f64(&caps, 3), cap_f64(&caps, 4)) else {
            continue;
        };
        entries.push(ObsHistoryEntry {
            date_str: caps[1].trim().to_string(),
            time_str: caps[2].trim().to_string(),
            temp_f: Some(temp_f),
            dewpoint_f: Some(dew_f),
        });
        max_temp = Some(max_temp.map_or(temp_f, |m: f64| m.max(temp_f)));
    }

    ObservationHistory {
        station_icao: icao.to_string(),
        entries,
        max_temp_f: max_temp,
    }
}

pub fn parse_cli_product(text: &str, cli_code: &str) -> CliReport {
    CliReport {
        cli_code: cli_code.to_string(),
        max_temp_f: CLI_MAX_RE
            .captures(text)
            .and_then(|c| c[1].parse::<i64>().ok()),
        max_temp_time: CLI_MAX_TIME_RE
            .captures(text)
            .map(|c| c[1].trim().to_string()),
        min_temp_f: CLI_MIN_RE
            .captures(text)
            .and_then(|c| c[1].parse::<i64>().ok()),
        valid_as_of: CLI_VALID_RE.captures(text).map(|c| c[1].trim().to_string()),
        is_preliminary: CLI_PRELIMINARY_RE.is_match(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_conditions_labeled_format() {
        let html = "<b>Temperature:</b> 39.9 &deg;F (4.4 &deg;C)";
        let cc = parse_current_conditions(html, "KNYC");
        assert_eq!(cc.temp_f, Some(39.9));
        assert_eq!(cc.temp_c, Some(4.4));
    }

    #[test]
    fn test_current_conditions_simple_format() {
        let html = "now 72.0&deg;F (22.2&deg;C) and sunny";
        let cc = parse_current_conditions(html, "KMIA");
        assert_eq!(cc.temp_f, Some(72.0));
        assert_eq!(cc.temp_c, Some(22.2));
    }

    #[test]
    fn test_current_conditions_extremes() {
        let html = "Temperature: 40.1 °F ( 4.5 °C)\n6 hour max: 41.0 °F\n6 hour min: 33.8 °F\n24 hour maximum: 42.1 °F";
        let cc = parse_current_conditions(html, "KNYC");
        assert_eq!(cc.six_hr_max_f, Some(41.0));
        assert_eq!(cc.six_hr_min_f, Some(33.8));
        assert_eq!(cc.twenty_four_hr_max_f, Some(42.1));
    }

    #[test]
    fn test_current_conditions_missing_data() {
        let cc = parse_current_conditions("<html>maintenance page</html>", "KSEA");
        assert!(cc.temp_f.is_none());
        assert!(cc.six_hr_max_f.is_none());
    }

    #[test]
    fn test_observation_history_rows_and_max() {
        let html = r#"
          <tr><td>24</td><td>19:53</td><td>NW 11</td><td>10.00</td><td>Fair</td>
              <td>39.0</td><td>12.9</td></tr>
          <tr><td>24</td><td>18:53</td><td>NW 9</td><td>10.00</td><td>Fair</td>
              <td>41.0</td><td>13.1</td></tr>
        "#;
        let hist = parse_observation_history(html, "KNYC");
        assert_eq!(hist.entries.len(), 2);
        assert_eq!(hist.entries[0].time_str, "19:53");
        assert_eq!(hist.max_temp_f, Some(41.0));
    }

    #[test]
    fn test_observation_history_empty() {
        let hist = parse_observation_history("<table></table>", "KNYC");
        assert!(hist.entries.is_empty());
        assert!(hist.max_temp_f.is_none());
    }

    #[test]
    fn test_cli_product_parse() {
        let text = "\
...PRELIMINARY CLIMATE REPORT...\n\
MAXIMUM TEMPERATURE (F)\n TODAY 41  2:46 PM\n\
MINIMUM TEMPERATURE (F)\n TODAY 28  6:51 AM\n\
VALID: 400 PM EST TUE FEB 24 2026\n";
        let report = parse_cli_product(text, "NYC");
        assert_eq!(report.max_temp_f, Some(41));
        assert_eq!(report.min_temp_f, Some(28));
        assert_eq!(report.max_temp_time.as_deref(), Some("2:46 PM"));
        assert!(report.is_preliminary);
        assert!(report.valid_as_of.is_some());
    }

    #[test]
    fn test_cli_product_final_report() {
        let text = "CLIMATE REPORT\nMAXIMUM TEMPERATURE (F)\n YESTERDAY 55  3:10 PM\n";
        let report = parse_cli_product(text, "LAX");
        assert_eq!(report.max_temp_f, Some(55));
        assert!(!report.is_preliminary);
        assert!(report.min_temp_f.is_none());
    }
}
