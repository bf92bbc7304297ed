//! wxbot backend library.
//!
//! Read-only Kalshi temperature-market scanner, edge analyzer, and spike
//! monitor. Exposes every pipeline module for the binary and tests.

pub mod accountant;
pub mod alerts;
pub mod config;
pub mod edge;
pub mod history;
pub mod metar;
pub mod modeler;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod planner;
pub mod risk;
pub mod runner;
pub mod scanner;
pub mod scrapers;
pub mod selection;
pub mod spike;
pub mod stations;
pub mod transport;

pub use config::Config;
pub use models::{Bucket, DailySlate, MarketType, UnifiedCandidate};
