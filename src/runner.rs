//! End-to-end scan runner.
//!
//! Wires the enrichment chain for each raw candidate (registry → weather
//! → modeler → planner → accountant → risk → merge) and drives the full
//! scan-to-slate pipeline. Enrichment failures skip the candidate and
//! never abort the run.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::accountant::compute_accounting;
use crate::config::Config;
use crate::models::{DailySlate, RawCandidate, UnifiedCandidate};
use crate::modeler::model_candidate;
use crate::orchestrator::{artifact_dir, run_pipeline};
use crate::planner::{assess_liquidity, build_execution_plan, LiquidityVerdict};
use crate::risk::build_risk_recommendation;
use crate::scanner::scan_today_markets;
use crate::scrapers::kalshi_api::KalshiClient;
use crate::scrapers::weather_api::WeatherApi;
use crate::selection::merge_candidate;
use crate::stations::{build_settlement_spec, station_icao};

/// Enrich a single raw candidate through every module, in order.
pub async fn enrich_candidate(
    raw: RawCandidate,
    weather: &WeatherApi,
    config: &Config,
) -> UnifiedCandidate {
    let city = raw.city.clone();
    let ob = raw.orderbook_snapshot.clone();

    // 1. Station lookup, then weather (observation + forecast). Missing
    // sources flow through as None.
    let icao = station_icao(&city);
    let mut current_temp_f = None;
    let mut forecast = None;
    if let Some(icao) = icao {
        if let Some(obs) = weather.get_current_obs(icao).await {
            current_temp_f = obs.temp_f;
        }
        forecast = weather.get_hourly_forecast(icao).await;
    } else {
        info!("No station for {city} — skipping weather enrichment");
    }

    // 2. Settlement spec.
    let target_date = NaiveDate::parse_from_str(&raw.target_date_local, "%Y-%m-%d").ok();
    let spec = build_settlement_spec(&city, raw.market_type, target_date);

    // 3. Model.
    let model = model_candidate(&raw, forecast.as_ref(), current_temp_f, Utc::now(), config);

    // 4. Execution plan.
    let plan = build_execution_plan(&raw.market_ticker, &raw.market_url, &ob, None, config);

    // 5. Accounting at the recommended limit.
    let accounting = compute_accounting(
        &raw.market_ticker,
        &ob,
        &model,
        plan.recommended_limit_no_cents,
        &config.fees,
    );

    // 6. Risk.
    let liquidity_thin = assess_liquidity(&ob).verdict == LiquidityVerdict::Thin;
    let risk = build_risk_recommendation(
        &raw.market_ticker,
        &city,
        &model,
        &accounting,
        liquidity_thin,
        false,
        config,
    );

    // 7. Merge.
    merge_candidate(raw, Some(spec), Some(model), Some(accounting), Some(plan), Some(risk))
}

/// Run the complete scan-to-slate pipeline. Returns the slate and the
/// directory its artifacts were written into.
pub async fn run_full_scan(
    client: &KalshiClient,
    weather: &WeatherApi,
    run_time_et: &str,
    target_date: &str,
    base_dir: &Path,
    config: &Config,
) -> Result<(DailySlate, PathBuf)> {
    info!("Starting full scan...");

    let outcome = scan_today_markets(client, config, None).await?;
    info!(
        "Scanner found {} candidates in price window",
        outcome.candidates.len()
    );

    let total = outcome.candidates.len();
    let mut unified: Vec<UnifiedCandidate> = Vec::with_capacity(total);
    for raw in outcome.candidates {
        unified.push(enrich_candidate(raw, weather, config).await);
    }
    info!("Enriched {} / {} candidates", unified.len(), total);

    let slate = run_pipeline(
        unified,
        run_time_et,
        target_date,
        outcome.events_scanned,
        outcome.brackets_scanned,
        total as u32,
        base_dir,
        config,
    )?;

    let out = artifact_dir(target_date, base_dir)?;
    info!("Full scan complete. Artifacts in {}", out.display());
    Ok((slate, out))
}
