//! The data source seam between the event engine and the network.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use futures::future::join_all;
use tracing::warn;

use crate::client::{ClientConfig, FetchError, HttpClient};
use crate::model::{
    AuroraForecast, Basin, Disturbance, KIndex, MesoscaleDiscussion, OutlookKind, RadarStation, RadioFlux,
    ReportKind, RiskArea, SolarWind, SpaceWeatherScales, StormReport, TropicalCyclone, Warning, Watch, WatchBox,
    WatchHazards, WatchKind,
};
use crate::{iem, nhc, nws, outlook, radar, reports, spc, swpc};

/// Fetches the active products the event engine reconciles.
///
/// Implementations must be cheap to call repeatedly; the engine calls
/// them once per tick for each subscribed stream.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Active watches of one kind, fragments merged by number.
    async fn fetch_active_watches(&self, kind: WatchKind) -> Result<Vec<Watch>, FetchError>;

    /// Active watch boxes.
    async fn fetch_active_watch_boxes(&self) -> Result<Vec<WatchBox>, FetchError>;

    /// Active mesoscale discussions.
    async fn fetch_active_mesoscale_discussions(&self) -> Result<Vec<MesoscaleDiscussion>, FetchError>;

    /// Active alerts of the given event categories.
    async fn fetch_active_warnings(&self, filter: &[String]) -> Result<Vec<Warning>, FetchError>;

    /// Hazard probabilities of a watch. `None` when the page is missing
    /// or empty.
    async fn fetch_watch_risks(&self, number: u32, year: i32) -> Result<Option<WatchHazards>, FetchError>;
}

/// [`DataSource`] backed by the live NWS, SPC, NHC, IEM and SWPC services.
///
/// Besides the engine's feeds it offers one-shot fetches for products the
/// engine does not follow.
#[derive(Debug, Clone)]
pub struct LiveSource {
    client: HttpClient,
    custom_warning_names: bool,
}

impl LiveSource {
    pub fn new(config: ClientConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(config)?,
            custom_warning_names: true,
        })
    }

    /// Whether warnings get display names such as "Tornado Emergency".
    pub fn with_custom_warning_names(mut self, enabled: bool) -> Self {
        self.custom_warning_names = enabled;
        self
    }

    /// Archived watches for a day, or for one UTC hour of it.
    pub async fn fetch_archived_watch_boxes(&self, date: NaiveDate, hour: Option<u32>) -> Result<Vec<WatchBox>, FetchError> {
        iem::fetch_archived_watch_boxes(&self.client, date, hour, Utc::now().date_naive()).await
    }

    /// Current convective outlook risk areas for a day (1 to 8).
    pub async fn fetch_outlook(&self, day: u8, kind: OutlookKind) -> Result<Vec<RiskArea>, FetchError> {
        outlook::fetch_outlook(&self.client, day, kind).await
    }

    /// A past issuance of a day 1 to 3 convective outlook.
    pub async fn fetch_archived_outlook(
        &self,
        date: NaiveDate,
        day: u8,
        issuance: &str,
        kind: OutlookKind,
    ) -> Result<Vec<RiskArea>, FetchError> {
        outlook::fetch_archived_outlook(&self.client, date, day, issuance, kind, Utc::now().date_naive()).await
    }

    /// Storm reports of one category for a convective day, or for the
    /// current one.
    pub async fn fetch_storm_reports(&self, kind: ReportKind, date: Option<NaiveDate>) -> Result<Vec<StormReport>, FetchError> {
        reports::fetch_storm_reports(&self.client, kind, date, Utc::now()).await
    }

    /// Active tropical cyclones with their forecast cones and tracks.
    pub async fn fetch_active_tropical_cyclones(&self) -> Result<Vec<TropicalCyclone>, FetchError> {
        nhc::fetch_active_tropical_cyclones(&self.client).await
    }

    /// Disturbances in a basin's tropical weather outlook.
    pub async fn fetch_tropical_disturbances(&self, basin: Basin) -> Result<Vec<Disturbance>, FetchError> {
        nhc::fetch_tropical_disturbances(&self.client, basin).await
    }

    /// Every NWS radar site.
    pub async fn fetch_radar_stations(&self) -> Result<Vec<RadarStation>, FetchError> {
        radar::fetch_radar_stations(&self.client).await
    }

    /// The planetary K-index: the latest sample, or all samples by time.
    pub async fn fetch_k_index(&self, all: bool) -> Result<Vec<KIndex>, FetchError> {
        swpc::fetch_k_index(&self.client, all).await
    }

    /// The OVATION aurora forecast grid.
    pub async fn fetch_aurora_forecast(&self) -> Result<AuroraForecast, FetchError> {
        swpc::fetch_aurora_forecast(&self.client).await
    }

    /// Propagated solar wind: the latest sample, or all samples by time.
    pub async fn fetch_solar_wind(&self, all: bool) -> Result<Vec<SolarWind>, FetchError> {
        swpc::fetch_solar_wind(&self.client, all).await
    }

    /// 10.7 cm radio flux: the latest observation, or all by time.
    pub async fn fetch_radio_flux(&self, all: bool) -> Result<Vec<RadioFlux>, FetchError> {
        swpc::fetch_radio_flux(&self.client, all).await
    }

    /// Current geomagnetic, solar radiation and radio blackout levels.
    pub async fn fetch_space_weather_scales(&self) -> Result<SpaceWeatherScales, FetchError> {
        swpc::fetch_space_weather_scales(&self.client).await
    }
}

#[async_trait]
impl DataSource for LiveSource {
    async fn fetch_active_watches(&self, kind: WatchKind) -> Result<Vec<Watch>, FetchError> {
        let mut watches = nws::fetch_active_watches(&self.client, kind).await?;

        let hazards = join_all(
            watches
                .iter()
                .map(|w| self.fetch_watch_risks(w.number, w.sent.year())),
        )
        .await;

        for (watch, result) in watches.iter_mut().zip(hazards) {
            watch.hazards = match result {
                Ok(Some(hazards)) => hazards,
                Ok(None) => WatchHazards::pending(),
                Err(e) => {
                    warn!("No hazard probabilities for watch {}: {}", watch.number, e);
                    WatchHazards::pending()
                }
            };
        }
        Ok(watches)
    }

    async fn fetch_active_watch_boxes(&self) -> Result<Vec<WatchBox>, FetchError> {
        spc::fetch_active_watch_boxes(&self.client, Utc::now()).await
    }

    async fn fetch_active_mesoscale_discussions(&self) -> Result<Vec<MesoscaleDiscussion>, FetchError> {
        spc::fetch_active_mesoscale_discussions(&self.client).await
    }

    async fn fetch_active_warnings(&self, filter: &[String]) -> Result<Vec<Warning>, FetchError> {
        nws::fetch_active_warnings(&self.client, filter, self.custom_warning_names).await
    }

    async fn fetch_watch_risks(&self, number: u32, year: i32) -> Result<Option<WatchHazards>, FetchError> {
        spc::fetch_watch_risks(&self.client, number, year).await
    }
}
