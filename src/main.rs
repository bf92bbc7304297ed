//! wxbot CLI.
//!
//! Subcommands:
//!   scan    — full scan-to-slate pipeline (default)
//!   edge    — temperature edge analysis from NWS sources
//!   spike   — intraday spike monitor with alert bursts
//!   history — aggregate persisted slates
//!
//! Exit codes: 0 success, 1 credential or runtime failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wxbot_backend::alerts::Mailer;
use wxbot_backend::config::{Config, KalshiCredentials, SpikeConfig};
use wxbot_backend::edge::{analyze_all_cities, analyze_city, format_edge_report, format_edge_summary, Signal};
use wxbot_backend::history::{collect_slate_paths, format_summary, summarize_slates};
use wxbot_backend::orchestrator::{current_run_time_et, report_path, slate_path, target_date_et, DEFAULT_OUTPUT_DIR};
use wxbot_backend::runner::run_full_scan;
use wxbot_backend::scrapers::kalshi_api::{KalshiClient, PROD_BASE_URL};
use wxbot_backend::scrapers::nws_products::NwsProducts;
use wxbot_backend::scrapers::weather_api::WeatherApi;
use wxbot_backend::spike::SpikeMonitor;

#[derive(Parser)]
#[command(name = "wxbot", about = "Kalshi temperature-market scanner & edge bot")]
struct Cli {
    /// Output directory for run artifacts.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR, global = true)]
    out: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full scan pipeline (default).
    Scan,
    /// Temperature edge analysis from NWS sources.
    Edge {
        /// Analyze a single city (e.g. "Chicago"). Omit for all cities.
        #[arg(long)]
        city: Option<String>,
        /// Continuously poll at --interval seconds.
        #[arg(long)]
        watch: bool,
        /// Polling interval in seconds.
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
    /// Spike monitor: watch intraday price moves and send alert bursts.
    Spike {
        /// Spike threshold in cents.
        #[arg(long, default_value_t = 15)]
        threshold: i64,
        /// Lookback window in seconds.
        #[arg(long, default_value_t = 420)]
        window: u64,
        /// Poll interval in seconds.
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Number of alerts per burst.
        #[arg(long, default_value_t = 5)]
        burst: u32,
        /// Seconds between burst alerts.
        #[arg(long, default_value_t = 60)]
        burst_interval: u64,
        /// Operating window start hour (ET).
        #[arg(long, default_value_t = 8)]
        start_hour: u32,
        /// Operating window end hour (ET).
        #[arg(long, default_value_t = 23)]
        end_hour: u32,
        /// Ignore the operating window and run around the clock.
        #[arg(long)]
        all_hours: bool,
    },
    /// Aggregate statistics across persisted slates.
    History,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn kalshi_client() -> anyhow::Result<KalshiClient> {
    let creds = KalshiCredentials::from_env()?;
    KalshiClient::new(
        &creds.api_key_id,
        std::path::Path::new(&creds.private_key_path),
        PROD_BASE_URL,
        Config::default().rate_limit,
    )
}

async fn run_scan(out: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    let client = kalshi_client()?;
    let weather = WeatherApi::new(config.rate_limit)?;

    let run_time = current_run_time_et();
    let target_date = target_date_et();

    let (slate, _) = run_full_scan(&client, &weather, &run_time, &target_date, out, &config).await?;
    info!(
        "Scan complete: {} PRIMARY, {} TIGHT, {} NEAR-MISS, {} REJECTED",
        slate.picks_primary.len(),
        slate.picks_tight.len(),
        slate.picks_near_miss.len(),
        slate.rejected.len(),
    );

    // Email delivery is optional; a failure is logged, never fatal.
    if let Some(mailer) = Mailer::from_env() {
        let subject = format!(
            "Kalshi Weather — {} ({} picks)",
            slate.target_date_local,
            slate.picks_primary.len()
        );
        let md_path = report_path(&target_date, &run_time, out)?;
        let json_path = slate_path(&target_date, &run_time, out)?;
        let report_md = std::fs::read_to_string(&md_path).unwrap_or_default();
        let attachment = std::fs::read(&json_path).ok().map(|bytes| {
            (
                json_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "DAILY_SLATE.json".to_string()),
                bytes,
            )
        });
        if let Err(e) = mailer.send_report(&subject, &report_md, attachment).await {
            error!("Failed to send report email: {e:#}");
        }
    } else {
        info!("Email not configured — skipping (set EMAIL_TO, SMTP_FROM, SMTP_PASSWORD)");
    }

    Ok(())
}

async fn run_edge(city: Option<String>, watch: bool, interval: u64) -> anyhow::Result<()> {
    let config = Config::default();
    let scraper = NwsProducts::new(config.rate_limit)?;

    loop {
        match &city {
            Some(city) => {
                let Some(report) = analyze_city(city, &scraper).await else {
                    anyhow::bail!("Could not analyze city: {city}");
                };
                println!("{}", format_edge_report(&report));
            }
            None => {
                let reports = analyze_all_cities(&scraper).await;
                if reports.is_empty() {
                    anyhow::bail!("No cities could be analyzed");
                }
                println!("{}", format_edge_summary(&reports));

                // Detailed reports for cities with actionable signals.
                for report in &reports {
                    if matches!(report.signal, Signal::StrongBuy | Signal::Buy | Signal::Caution) {
                        println!("\n{}", format_edge_report(report));
                    }
                }
            }
        }

        if !watch {
            break;
        }
        info!("Watching — next update in {interval} seconds");
        tokio::time::sleep(Duration::from_secs(interval)).await;
        println!("\n{}\n", "=".repeat(60));
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_spike(
    threshold: i64,
    window: u64,
    interval: u64,
    burst: u32,
    burst_interval: u64,
    start_hour: u32,
    end_hour: u32,
    all_hours: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let spike_config = SpikeConfig {
        spike_threshold_cents: threshold,
        window_seconds: window,
        poll_interval_seconds: interval,
        burst_count: burst,
        burst_interval_seconds: burst_interval,
        start_hour_est: start_hour,
        end_hour_est: end_hour,
        all_hours,
        ..Default::default()
    };

    let client = kalshi_client()?;
    let scraper = NwsProducts::new(config.rate_limit)?;
    let mailer = Mailer::from_env();
    if mailer.is_none() {
        info!("Email not configured — spike alerts will only be logged");
    }

    let mut monitor = SpikeMonitor::new(client, scraper, mailer, spike_config);

    // The monitor runs until interrupted; ctrl-c cancels its sleeps and
    // unwinds cleanly.
    tokio::select! {
        result = monitor.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received — shutting down spike monitor");
            Ok(())
        }
    }
}

fn run_history(out: &PathBuf) -> anyhow::Result<()> {
    let paths = collect_slate_paths(out);
    let summary = summarize_slates(&paths);
    println!("{}", format_summary(&summary));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Scan) {
        Command::Scan => run_scan(&cli.out).await,
        Command::Edge {
            city,
            watch,
            interval,
        } => run_edge(city, watch, interval).await,
        Command::Spike {
            threshold,
            window,
            interval,
            burst,
            burst_interval,
            start_hour,
            end_hour,
            all_hours,
        } => {
            run_spike(
                threshold,
                window,
                interval,
                burst,
                burst_interval,
                start_hour,
                end_hour,
                all_hours,
            )
            .await
        }
        Command::History => run_history(&cli.out),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
