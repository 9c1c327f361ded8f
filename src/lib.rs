//! stormwatch - A Rust library and service for following US severe weather products.
//!
//! This crate provides:
//! - An event engine that polls the NWS and SPC feeds and announces newly
//!   issued convective watches, mesoscale discussions and warnings
//! - nom-based parsers for SPC product text and KML
//! - One-shot fetches for convective outlooks, storm reports, archived
//!   watches, NHC tropical cyclones and disturbances, radar sites and SWPC
//!   space weather
//! - Statistics tracking with HDR histograms and a Prometheus endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stormwatch::{ClientConfig, Events, EventsConfig, LiveSource};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let source = LiveSource::new(ClientConfig::with_user_agent("(example.org, ops@example.org)"))?;
//! let events = Events::new(Arc::new(source), EventsConfig::default());
//!
//! events.on_warning_issued(|warning, status| {
//!     println!("{} ({}): {}", warning.name, status, warning.headline);
//!     Ok(())
//! });
//! events.enable()?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod iem;
pub mod kml;
pub mod metrics;
pub mod model;
pub mod nhc;
pub mod nws;
pub mod outlook;
pub mod parser;
pub mod radar;
pub mod reports;
pub mod source;
pub mod spc;
pub mod stats;
pub mod swpc;
pub mod tracker;

pub use client::{ClientConfig, FetchError, HttpClient, KmzError};
pub use config::Config;
pub use dispatch::{DispatchReport, Dispatcher, SubscriptionId};
pub use events::{EngineState, Events, EventsConfig};
pub use model::{
    AuroraForecast, AuroraPoint, Basin, CategoricalRisk, CountyInfo, Disturbance, ForecastPoint, KIndex,
    LifecycleStatus, MesoscaleDiscussion, OutlookKind, OutlookRisk, RadarStation, RadioFlux, ReportKind,
    ReportMagnitude, RiskArea, SolarWind, SpaceWeatherScales, StormReport, TropicalCyclone, Warning, WarningArea,
    WarningParameters, Watch, WatchBox, WatchHazard, WatchHazards, WatchKind,
};
pub use parser::ParseError;
pub use source::{DataSource, LiveSource};
pub use stats::{EngineStats, StatsSummary, Stream};
pub use tracker::Horizons;
