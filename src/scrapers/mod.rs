pub mod kalshi_api; // Read-only signed Kalshi client (series/events/markets/orderbook)
pub mod nws_products; // NWS text/HTML products: METAR, conditions, history, CLI
pub mod weather_api; // api.weather.gov observations + two-hop hourly forecast

pub use kalshi_api::KalshiClient;
pub use nws_products::NwsProducts;
pub use weather_api::WeatherApi;
