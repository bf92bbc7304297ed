//! NWS api.weather.gov client — station observations and hourly forecasts.
//!
//! Anonymous HTTPS; the API only asks for a descriptive User-Agent.
//! Forecast resolution is a two-hop lookup: station metadata gives the
//! coordinates, /points gives the grid, and the grid carries the
//! forecastHourly URL. Every fetch is failure-tolerant: a missing or
//! malformed source comes back as `None`, never as an error.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::RateLimitConfig;
use crate::transport::{request_with_retry, RateLimiter};

const BASE: &str = "https://api.weather.gov";
const USER_AGENT: &str = "(wxbot-scanner, ops@example.com)";

#[derive(Debug, Clone, Default)]
pub struct CurrentObs {
    pub station_icao: String,
    pub timestamp: String,
    pub temp_c: Option<f64>,
    pub temp_f: Option<f64>,
    pub text_description: String,
}

#[derive(Debug, Clone, Default)]
pub struct HourlyForecastPeriod {
    pub start_time: String,
    pub end_time: String,
    pub temp_f: Option<f64>,
    pub short_forecast: String,
}

#[derive(Debug, Clone, Default)]
pub struct StationForecast {
    pub station_icao: String,
    pub periods: Vec<HourlyForecastPeriod>,
    pub forecast_high_f: Option<f64>,
    pub forecast_low_f: Option<f64>,
}

// ── geo-json fragments ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct QuantValue {
    value: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ObsProperties {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    temperature: QuantValue,
    #[serde(rename = "textDescription", default)]
    text_description: String,
}

#[derive(Debug, Default, Deserialize)]
struct ObsResponse {
    #[serde(default)]
    properties: ObsProperties,
}

#[derive(Debug, Default, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct StationResponse {
    #[serde(default)]
    geometry: Geometry,
}

#[derive(Debug, Default, Deserialize)]
struct PointsProperties {
    #[serde(rename = "forecastHourly", default)]
    forecast_hourly: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PointsResponse {
    #[serde(default)]
    properties: PointsProperties,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastPeriod {
    #[serde(rename = "startTime", default)]
    start_time: String,
    #[serde(rename = "endTime", default)]
    end_time: String,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(rename = "shortForecast", default)]
    short_forecast: String,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Default, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    properties: ForecastProperties,
}

fn c_to_f(c: Option<f64>) -> Option<f64> {
    c.map(|v| ((v * 9.0 / 5.0 + 32.0) * 10.0).round() / 10.0)
}

// ── Client ───────────────────────────────────────────────────────────

pub struct WeatherApi {
    client: Client,
    limiter: RateLimiter,
    retry: RateLimitConfig,
}

impl WeatherApi {
    pub fn new(retry: RateLimitConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/geo+json"),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to create HTTP client")?;
        info!("WeatherApi initialized");
        Ok(Self {
            client,
            limiter: RateLimiter::new(retry.nws_requests_per_second),
            retry,
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        Ok(request_with_retry(
            &self.client,
            Method::GET,
            url,
            None,
            None,
            Some(&self.limiter),
            &self.retry,
        )
        .await?)
    }

    /// Latest observation for a station (e.g. "KNYC"), or None.
    pub async fn get_current_obs(&self, station_icao: &str) -> Option<CurrentObs> {
        let url = format!("{BASE}/stations/{station_icao}/observations/latest");
        let data: ObsResponse = match self.get(&url).await {
            Ok(resp) => match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Failed to parse obs for {station_icao}: {e}");
                    return None;
                }
            },
            Err(e) => {
                warn!("Failed to fetch obs for {station_icao}: {e}");
                return None;
            }
        };

        let temp_c = data.properties.temperature.value;
        Some(CurrentObs {
            station_icao: station_icao.to_string(),
            timestamp: data.properties.timestamp,
            temp_c,
            temp_f: c_to_f(temp_c),
            text_description: data.properties.text_description,
        })
    }

    /// Resolve a station ICAO to its gridpoint hourly-forecast URL.
    async fn gridpoint_url(&self, station_icao: &str) -> Option<String> {
        let url = format!("{BASE}/stations/{station_icao}");
        let station: StationResponse = match self.get(&url).await {
            Ok(resp) => resp.json().await.ok()?,
            Err(e) => {
                warn!("Failed to get station metadata for {station_icao}: {e}");
                return None;
            }
        };

        let coords = &station.geometry.coordinates;
        if coords.len() < 2 {
            return None;
        }
        let (lon, lat) = (coords[0], coords[1]);

        let points_url = format!("{BASE}/points/{lat},{lon}");
        let points: PointsResponse = match self.get(&points_url).await {
            Ok(resp) => resp.json().await.ok()?,
            Err(e) => {
                warn!("Failed to get points for {station_icao}: {e}");
                return None;
            }
        };
        points.properties.forecast_hourly
    }

    /// Hourly forecast for the grid point nearest a station, or None.
    pub async fn get_hourly_forecast(&self, station_icao: &str) -> Option<StationForecast> {
        let forecast_url = self.gridpoint_url(station_icao).await?;

        let data: ForecastResponse = match self.get(&forecast_url).await {
            Ok(resp) => match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Failed to parse hourly forecast for {station_icao}: {e}");
                    return None;
                }
            },
            Err(e) => {
                warn!("Failed to fetch hourly forecast for {station_icao}: {e}");
                return None;
            }
        };

        let mut periods = Vec::with_capacity(data.properties.periods.len());
        let mut temps = Vec::new();
        for p in data.properties.periods {
            if let Some(t) = p.temperature {
                temps.push(t);
            }
            periods.push(HourlyForecastPeriod {
                start_time: p.start_time,
                end_time: p.end_time,
                temp_f: p.temperature,
                short_forecast: p.short_forecast,
            });
        }

        let forecast_high = temps.iter().cloned().fold(None, |acc: Option<f64>, t| {
            Some(acc.map_or(t, |a| a.max(t)))
        });
        let forecast_low = temps.iter().cloned().fold(None, |acc: Option<f64>, t| {
            Some(acc.map_or(t, |a| a.min(t)))
        });

        Some(StationForecast {
            station_icao: station_icao.to_string(),
            periods,
            forecast_high_f: forecast_high,
            forecast_low_f: forecast_low,
        })
    }
}
