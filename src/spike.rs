//! Spike monitor — detects sudden Kalshi price movements and fires alert
//! bursts.
//!
//! State machine with two phases:
//!   MONITORING — polls event-level YES bids, detects windowed-delta
//!   spikes with per-ticker cooldowns
//!   BURST — N enriched alerts at a fixed interval, then back to
//!   MONITORING
//!
//! The price history and cooldown maps are owned exclusively by this
//! loop; nothing else mutates them. Timestamps come from the monotonic
//! clock. The loop only ends on external interrupt.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{Timelike, Utc};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::alerts::{build_spike_email_html, conviction_row, Mailer};
use crate::config::SpikeConfig;
use crate::edge::{analyze_city, EdgeReport, Signal};
use crate::scanner::{classify_series, extract_city, is_today_event, parse_orderbook};
use crate::models::MarketType;
use crate::scrapers::kalshi_api::KalshiClient;
use crate::scrapers::nws_products::NwsProducts;

// ── Price history ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PriceSnapshot {
    pub price_cents: i64,
    pub timestamp: Instant,
}

/// Rolling per-ticker price history, pruned to a max age.
#[derive(Debug, Default)]
pub struct PriceHistory {
    max_age: Duration,
    data: HashMap<String, VecDeque<PriceSnapshot>>,
}

impl PriceHistory {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            data: HashMap::new(),
        }
    }

    pub fn record(&mut self, ticker: &str, price_cents: i64, ts: Instant) {
        self.data
            .entry(ticker.to_string())
            .or_default()
            .push_back(PriceSnapshot {
                price_cents,
                timestamp: ts,
            });
    }

    /// Drop snapshots older than the max age.
    pub fn prune_all(&mut self, now: Instant) {
        for dq in self.data.values_mut() {
            while let Some(front) = dq.front() {
                if now.duration_since(front.timestamp) > self.max_age {
                    dq.pop_front();
                } else {
                    break;
                }
            }
        }
        self.data.retain(|_, dq| !dq.is_empty());
    }

    pub fn history(&self, ticker: &str) -> Vec<PriceSnapshot> {
        self.data
            .get(ticker)
            .map(|dq| dq.iter().copied().collect())
            .unwrap_or_default()
    }

    fn tickers(&self) -> impl Iterator<Item = (&String, &VecDeque<PriceSnapshot>)> {
        self.data.iter()
    }
}

// ── Spike detection ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpikeEvent {
    pub ticker: String,
    pub old_price: i64,
    pub new_price: i64,
    pub delta: i64,
    pub seconds_elapsed: f64,
}

/// Check all tracked tickers for a spike over the detection window.
///
/// For each ticker with at least two snapshots and no active cooldown,
/// the delta is latest price minus the oldest snapshot inside the window;
/// the largest qualifying delta wins.
pub fn detect_spike(
    history: &PriceHistory,
    config: &SpikeConfig,
    now: Instant,
    cooldowns: &HashMap<String, Instant>,
) -> Option<SpikeEvent> {
    let window = Duration::from_secs(config.window_seconds);
    let cooldown = Duration::from_secs(config.cooldown_seconds);
    let mut best: Option<SpikeEvent> = None;

    for (ticker, snapshots) in history.tickers() {
        if let Some(triggered_at) = cooldowns.get(ticker) {
            if now.duration_since(*triggered_at) < cooldown {
                continue;
            }
        }

        if snapshots.len() < 2 {
            continue;
        }

        let oldest_in_window = snapshots
            .iter()
            .find(|s| now.duration_since(s.timestamp) <= window);
        let Some(oldest) = oldest_in_window else {
            continue;
        };
        let Some(current) = snapshots.back() else {
            continue;
        };

        let delta = current.price_cents - oldest.price_cents;
        if delta >= config.spike_threshold_cents {
            let event = SpikeEvent {
                ticker: ticker.clone(),
                old_price: oldest.price_cents,
                new_price: current.price_cents,
                delta,
                seconds_elapsed: current
                    .timestamp
                    .duration_since(oldest.timestamp)
                    .as_secs_f64(),
            };
            if best.as_ref().map_or(true, |b| delta > b.delta) {
                best = Some(event);
            }
        }
    }

    best
}

// ── Monitor driver ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TickerMeta {
    city: String,
    bracket: String,
}

/// One sent (or pending) burst row for the conviction-trend table.
#[derive(Debug, Clone)]
pub struct ConvictionEntry {
    pub time_str: String,
    pub signal: Signal,
    pub temp_f: Option<f64>,
    pub price_cents: Option<i64>,
}

pub struct SpikeMonitor {
    client: KalshiClient,
    scraper: NwsProducts,
    mailer: Option<Mailer>,
    config: SpikeConfig,
    history: PriceHistory,
    cooldowns: HashMap<String, Instant>,
    ticker_meta: HashMap<String, TickerMeta>,
}

impl SpikeMonitor {
    pub fn new(
        client: KalshiClient,
        scraper: NwsProducts,
        mailer: Option<Mailer>,
        config: SpikeConfig,
    ) -> Self {
        let max_age = Duration::from_secs(config.prune_age_seconds());
        Self {
            client,
            scraper,
            mailer,
            config,
            history: PriceHistory::new(max_age),
            cooldowns: HashMap::new(),
            ticker_meta: HashMap::new(),
        }
    }

    fn in_operating_window(&self) -> bool {
        if self.config.all_hours {
            return true;
        }
        let hour = Utc::now().with_timezone(&chrono_tz::US::Eastern).hour();
        hour >= self.config.start_hour_est && hour <= self.config.end_hour_est
    }

    fn city_is_tracked(&self, city: &str) -> bool {
        let key = city.to_lowercase();
        self.config
            .tracked_cities
            .iter()
            .any(|c| c.to_lowercase() == key)
    }

    /// Run until externally interrupted. Outside the operating window the
    /// loop re-checks every minute; inside it, each poll either sleeps or
    /// enters a burst. Errors in a poll are logged and absorbed so a
    /// transient upstream outage never kills the process.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Spike monitor started (threshold={}c window={}s poll={}s burst={}x{}s cooldown={}s)",
            self.config.spike_threshold_cents,
            self.config.window_seconds,
            self.config.poll_interval_seconds,
            self.config.burst_count,
            self.config.burst_interval_seconds,
            self.config.cooldown_seconds,
        );

        loop {
            if !self.in_operating_window() {
                sleep(Duration::from_secs(60)).await;
                continue;
            }

            match self.poll_once().await {
                Ok(Some(spike)) => {
                    if let Err(e) = self.run_burst(&spike).await {
                        warn!("Burst for {} failed: {e:#}", spike.ticker);
                    }
                }
                Ok(None) => {
                    sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                }
                Err(e) => {
                    warn!("Poll iteration failed: {e:#}");
                    sleep(Duration::from_secs(self.config.poll_interval_seconds)).await;
                }
            }
        }
    }

    /// One MONITORING iteration: sample YES bids for today's tracked
    /// HIGH-temperature markets, prune, detect. On a trigger, arm the
    /// cooldown and hand the spike to the burst phase.
    async fn poll_once(&mut self) -> Result<Option<SpikeEvent>> {
        let now = Instant::now();
        let today = Utc::now()
            .with_timezone(&chrono_tz::US::Eastern)
            .format("%Y-%m-%d")
            .to_string();

        let events = self.client.get_all_events(None, "open", true).await?;

        for event in &events {
            if classify_series(&event.event_ticker) != Some(MarketType::HighTemp) {
                continue;
            }
            if !is_today_event(event, &today) {
                continue;
            }
            let city = extract_city(event);
            if !self.city_is_tracked(&city) {
                continue;
            }

            for market in &event.markets {
                let Some(yes_bid) = market.yes_bid else {
                    continue;
                };
                self.history.record(&market.ticker, yes_bid, now);
                self.ticker_meta.insert(
                    market.ticker.clone(),
                    TickerMeta {
                        city: city.clone(),
                        bracket: if market.yes_sub_title.is_empty() {
                            market.title.clone()
                        } else {
                            market.yes_sub_title.clone()
                        },
                    },
                );
            }
        }

        self.history.prune_all(now);

        let spike = detect_spike(&self.history, &self.config, now, &self.cooldowns);
        if let Some(spike) = &spike {
            info!(
                "SPIKE: {} {}c -> {}c (+{}c in {:.0}s)",
                spike.ticker, spike.old_price, spike.new_price, spike.delta, spike.seconds_elapsed
            );
            self.cooldowns.insert(spike.ticker.clone(), now);
        }
        Ok(spike)
    }

    /// BURST phase: N enriched alerts at the burst interval, each with a
    /// fresh edge analysis and orderbook read, then back to MONITORING.
    async fn run_burst(&mut self, spike: &SpikeEvent) -> Result<()> {
        let meta = self
            .ticker_meta
            .get(&spike.ticker)
            .cloned()
            .unwrap_or_else(|| TickerMeta {
                city: spike.ticker.clone(),
                bracket: String::new(),
            });

        let total = self.config.burst_count;
        let mut conviction: Vec<ConvictionEntry> = Vec::with_capacity(total as usize);

        for n in 1..=total {
            let report = analyze_city(&meta.city, &self.scraper).await;

            let current_price = match self.client.get_orderbook(&spike.ticker, 10).await {
                Ok(raw) => parse_orderbook(&raw).best_yes_bid_cents,
                Err(e) => {
                    warn!("Orderbook fetch failed during burst: {e:#}");
                    None
                }
            };

            let time_str = Utc::now()
                .with_timezone(&chrono_tz::US::Eastern)
                .format("%H:%M:%S ET")
                .to_string();
            conviction.push(ConvictionEntry {
                time_str: time_str.clone(),
                signal: report.as_ref().map_or(Signal::NoEdge, |r| r.signal),
                temp_f: report.as_ref().and_then(|r| r.running_max_f_precise),
                price_cents: current_price,
            });

            let subject = format!(
                "SPIKE {}/{}: {} {} ({}c -> {}c)",
                n, total, meta.city, meta.bracket, spike.old_price, spike.new_price
            );
            let html = render_burst_email(
                &meta.city,
                &meta.bracket,
                n,
                total,
                &time_str,
                spike,
                current_price,
                report.as_ref(),
                &conviction,
            );

            match &self.mailer {
                Some(mailer) => {
                    if let Err(e) = mailer.send(&subject, &html, None).await {
                        warn!("Failed to send spike alert: {e:#}");
                    }
                }
                None => info!("Spike alert (no mailer configured): {subject}"),
            }

            if n < total {
                sleep(Duration::from_secs(self.config.burst_interval_seconds)).await;
            }
        }

        info!("Burst complete for {} — back to monitoring", spike.ticker);
        Ok(())
    }
}

/// Render one burst email: market movement, precise readings, signal,
/// and the conviction trend with pending placeholders.
#[allow(clippy::too_many_arguments)]
fn render_burst_email(
    city: &str,
    bracket: &str,
    email_number: u32,
    email_total: u32,
    time_str: &str,
    spike: &SpikeEvent,
    current_price: Option<i64>,
    report: Option<&EdgeReport>,
    conviction: &[ConvictionEntry],
) -> String {
    let mut rows: Vec<String> = Vec::with_capacity(email_total as usize);
    for i in 1..=email_total {
        let entry = conviction.get(i as usize - 1);
        rows.push(conviction_row(
            i,
            email_total,
            entry.map(|e| e.time_str.as_str()).unwrap_or(""),
            entry.map(|e| e.signal),
            entry.and_then(|e| e.temp_f),
            entry.and_then(|e| e.price_cents),
            i == email_number,
        ));
    }

    build_spike_email_html(
        city,
        bracket,
        email_number,
        email_total,
        time_str,
        spike.old_price,
        spike.new_price,
        current_price.unwrap_or(spike.new_price),
        spike.delta,
        report.and_then(|r| r.metar_temp_f),
        report.and_then(|r| r.running_max_f_precise),
        report.and_then(|r| r.running_max_c),
        report.and_then(|r| r.running_max_source).unwrap_or("—"),
        report.and_then(|r| r.running_max_cli_f),
        report.and_then(|r| r.bracket.as_ref().map(|b| b.margin_below_c)),
        report
            .and_then(|r| r.bracket.as_ref().map(|b| b.margin_status.as_str()))
            .unwrap_or("—"),
        report.map_or(Signal::NoEdge, |r| r.signal),
        report.map_or("", |r| r.signal_reason.as_str()),
        report.map_or("STILL_RISING", |r| r.time_risk.as_str()),
        &rows,
    )
}
