//! Market & orderbook scanner.
//!
//! Discovers today's U.S. temperature events, enumerates bracket
//! sub-markets, fetches orderbooks, computes implied prices, and keeps
//! only candidates whose implied NO ask falls inside the scan window.

use anyhow::Result;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{MarketType, OrderbookSnapshot, RawCandidate};
use crate::scrapers::kalshi_api::{EventInfo, KalshiClient, MarketInfo, OrderbookResponse, SeriesInfo};

const MARKET_URL_BASE: &str = "https://kalshi.com/markets/";

lazy_static! {
    // Kalshi temperature series: KXHIGH* = daily high, KXLOW* = daily low.
    static ref HIGH_SERIES_RE: Regex = Regex::new(r"(?i)^KXHIGH").unwrap();
    static ref LOW_SERIES_RE: Regex = Regex::new(r"(?i)^KXLOW").unwrap();

    // "Highest temperature in <City> on ..." event titles.
    static ref CITY_WITH_DATE_RE: Regex =
        Regex::new(r"(?i)(?:Highest|Lowest)\s+temperature\s+in\s+(.+?)\s+(?:on|today)").unwrap();
    static ref CITY_BARE_RE: Regex =
        Regex::new(r"(?i)(?:Highest|Lowest)\s+temperature\s+in\s+(.+?)$").unwrap();
}

/// Determine whether a series is HIGH_TEMP or LOW_TEMP from its ticker.
pub fn classify_series(series_ticker: &str) -> Option<MarketType> {
    if HIGH_SERIES_RE.is_match(series_ticker) {
        return Some(MarketType::HighTemp);
    }
    if LOW_SERIES_RE.is_match(series_ticker) {
        return Some(MarketType::LowTemp);
    }
    None
}

/// Best-effort city extraction from an event title, falling back to the
/// event ticker.
pub fn extract_city(event: &EventInfo) -> String {
    for re in [&*CITY_WITH_DATE_RE, &*CITY_BARE_RE] {
        if let Some(caps) = re.captures(&event.title) {
            return caps[1].trim().to_string();
        }
    }
    event.event_ticker.clone()
}

/// Whether an event targets today's date. Uses strike_date when present,
/// otherwise checks nested market close times.
pub fn is_today_event(event: &EventInfo, today_str: &str) -> bool {
    if let Some(strike) = &event.strike_date {
        // strike_date may be an ISO datetime or plain YYYY-MM-DD.
        return strike.get(..10) == Some(today_str);
    }

    event.markets.iter().any(|m| {
        m.close_time
            .as_deref()
            .and_then(|c| c.get(..10))
            .map_or(false, |date| date >= today_str)
    })
}

/// Parse a Kalshi orderbook response into an OrderbookSnapshot.
///
/// The API returns `yes`/`no` as `[price_cents, qty]` pairs sorted
/// ascending, so the best bid is the last element.
pub fn parse_orderbook(raw: &OrderbookResponse) -> OrderbookSnapshot {
    let yes_bids = raw.orderbook.yes.as_deref().unwrap_or(&[]);
    let no_bids = raw.orderbook.no.as_deref().unwrap_or(&[]);

    let best_yes_bid = yes_bids.last().map(|l| l[0]);
    let best_no_bid = no_bids.last().map(|l| l[0]);

    let implied_no_ask = best_yes_bid.map(|b| 100 - b);
    let implied_yes_ask = best_no_bid.map(|b| 100 - b);

    let bid_room = match (implied_no_ask, best_no_bid) {
        (Some(ask), Some(bid)) => Some(ask - bid),
        _ => None,
    };

    // Top-3 bids, highest first.
    let top3 = |bids: &[[i64; 2]]| -> Vec<[i64; 2]> {
        bids.iter().rev().take(3).copied().collect()
    };

    let mut depth_parts = Vec::new();
    if yes_bids.is_empty() {
        depth_parts.push("NO YES BIDS".to_string());
    }
    if no_bids.is_empty() {
        depth_parts.push("NO NO BIDS".to_string());
    }
    let total_yes: i64 = yes_bids.iter().map(|l| l[1]).sum();
    let total_no: i64 = no_bids.iter().map(|l| l[1]).sum();
    depth_parts.push(format!("yes_depth={total_yes}, no_depth={total_no}"));

    OrderbookSnapshot {
        best_yes_bid_cents: best_yes_bid,
        best_no_bid_cents: best_no_bid,
        implied_best_no_ask_cents: implied_no_ask,
        implied_best_yes_ask_cents: implied_yes_ask,
        bid_room_cents: bid_room,
        top3_yes_bids: top3(yes_bids),
        top3_no_bids: top3(no_bids),
        depth_notes: depth_parts.join("; "),
    }
}

fn market_is_tradable(market: &MarketInfo) -> bool {
    matches!(market.status.to_lowercase().as_str(), "active" | "open")
}

fn bracket_definition(market: &MarketInfo) -> String {
    if !market.yes_sub_title.is_empty() {
        return market.yes_sub_title.clone();
    }
    if !market.title.is_empty() {
        return market.title.clone();
    }
    market.ticker.clone()
}

/// Find all series that are temperature HIGH or LOW.
pub async fn discover_temperature_series(client: &KalshiClient) -> Result<Vec<SeriesInfo>> {
    let all_series = client.get_series_list(None, None).await?;
    let temp_series: Vec<SeriesInfo> = all_series
        .into_iter()
        .filter(|s| classify_series(&s.ticker).is_some())
        .collect();
    info!("Discovered {} temperature series", temp_series.len());
    Ok(temp_series)
}

/// Everything one scan produced, including coverage stats for the slate.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<RawCandidate>,
    pub events_scanned: u32,
    pub brackets_scanned: u32,
}

/// Full scan: series → today's events → brackets → orderbooks → filter.
///
/// Emits a RawCandidate for every tradable bracket whose implied NO ask
/// lies inside `[scan_low, scan_high]`. Per-market failures are logged
/// and skipped; they never abort the scan.
pub async fn scan_today_markets(
    client: &KalshiClient,
    config: &Config,
    run_time: Option<DateTime<Utc>>,
) -> Result<ScanOutcome> {
    let run_time = run_time.unwrap_or_else(Utc::now);
    let run_time_et = run_time.with_timezone(&chrono_tz::US::Eastern);
    let run_time_et_str = run_time_et.to_rfc3339();
    let today_str = run_time_et.format("%Y-%m-%d").to_string();

    let temp_series = discover_temperature_series(client).await?;
    if temp_series.is_empty() {
        warn!("No temperature series found");
        return Ok(ScanOutcome::default());
    }

    let mut outcome = ScanOutcome::default();

    for series in &temp_series {
        let Some(market_type) = classify_series(&series.ticker) else {
            continue;
        };

        let events = client
            .get_all_events(Some(&series.ticker), "open", true)
            .await?;

        for event in events {
            if !is_today_event(&event, &today_str) {
                continue;
            }
            outcome.events_scanned += 1;

            let city = extract_city(&event);
            let event_name = event.event_ticker.clone();

            for market in &event.markets {
                outcome.brackets_scanned += 1;
                let ticker = &market.ticker;

                if !market_is_tradable(market) {
                    debug!("Skipping {ticker} — non-tradable status: {}", market.status);
                    continue;
                }

                let raw_ob = match client.get_orderbook(ticker, 10).await {
                    Ok(ob) => ob,
                    Err(e) => {
                        warn!("Failed to fetch orderbook for {ticker}: {e:#}");
                        continue;
                    }
                };

                let ob = parse_orderbook(&raw_ob);

                let Some(ask) = ob.implied_best_no_ask_cents else {
                    continue;
                };
                if ask < config.price_window.scan_low || ask > config.price_window.scan_high {
                    continue;
                }

                info!(
                    "Candidate: {ticker}  implied_no_ask={ask}  bid_room={:?}",
                    ob.bid_room_cents
                );
                outcome.candidates.push(RawCandidate {
                    run_time_et: run_time_et_str.clone(),
                    target_date_local: today_str.clone(),
                    city: city.clone(),
                    market_type,
                    event_name: event_name.clone(),
                    market_ticker: ticker.clone(),
                    market_url: format!("{MARKET_URL_BASE}{ticker}"),
                    bracket_definition: bracket_definition(market),
                    orderbook_snapshot: ob,
                    market_status_notes: String::new(),
                });
            }
        }
    }

    info!(
        "Scan complete: {} events, {} brackets, {} candidates in [{},{}]",
        outcome.events_scanned,
        outcome.brackets_scanned,
        outcome.candidates.len(),
        config.price_window.scan_low,
        config.price_window.scan_high,
    );
    Ok(outcome)
}
