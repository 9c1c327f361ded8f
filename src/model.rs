//! Data structures representing severe weather products.
//!
//! This module defines the records produced by the data source clients and
//! consumed by the event engine: watches, watch boxes, mesoscale
//! discussions and warnings, plus their supporting types.

use chrono::{DateTime, FixedOffset, Utc};
use geo_types::{Coord, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Lifecycle classification of an alert message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// A new issuance.
    #[default]
    NewIssue,
    /// An update to a previously issued product.
    Update,
    /// A cancellation.
    Cancel,
    /// An acknowledgment.
    Acknowledge,
    /// An error message correcting a previous product.
    Error,
}

impl LifecycleStatus {
    /// Map the NWS CAP `messageType` value onto a lifecycle status.
    ///
    /// Unknown values fall back to `NewIssue`.
    pub fn from_message_type(message_type: &str) -> Self {
        match message_type {
            "Update" => LifecycleStatus::Update,
            "Cancel" => LifecycleStatus::Cancel,
            "Ack" => LifecycleStatus::Acknowledge,
            "Error" => LifecycleStatus::Error,
            _ => LifecycleStatus::NewIssue,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleStatus::NewIssue => write!(f, "NEW"),
            LifecycleStatus::Update => write!(f, "UPDATE"),
            LifecycleStatus::Cancel => write!(f, "CANCEL"),
            LifecycleStatus::Acknowledge => write!(f, "ACK"),
            LifecycleStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// The kind of convective watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchKind {
    Tornado,
    SevereThunderstorm,
}

impl WatchKind {
    /// The NWS event name used to query the alerts API.
    pub fn event_name(&self) -> &'static str {
        match self {
            WatchKind::Tornado => "Tornado Watch",
            WatchKind::SevereThunderstorm => "Severe Thunderstorm Watch",
        }
    }

    /// Map an SPC/IEM watch type code ("TOR", "SVR") onto a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "TOR" | "TORNADO" => Some(WatchKind::Tornado),
            "SVR" | "SEVERE" | "SEVERE THUNDERSTORM" => Some(WatchKind::SevereThunderstorm),
            _ => None,
        }
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// A single hazard probability from a watch's probability table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchHazard {
    /// Probability in percent.
    pub chance: u8,
    /// Qualitative label ("Low", "Moderate", "High").
    pub label: String,
}

impl WatchHazard {
    pub fn new(chance: u8, label: impl Into<String>) -> Self {
        Self {
            chance,
            label: label.into(),
        }
    }
}

/// Hazard probabilities published with a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchHazards {
    /// Informational message, e.g. when details are not yet published.
    pub message: String,
    /// Particularly dangerous situation.
    pub is_pds: bool,
    pub tornadoes: WatchHazard,
    pub ef2_plus_tornadoes: WatchHazard,
    pub severe_wind: WatchHazard,
    pub wind_65kt_plus: WatchHazard,
    pub severe_hail: WatchHazard,
    pub hail_2in_plus: WatchHazard,
}

impl WatchHazards {
    /// Placeholder for a freshly issued watch whose detail page is empty.
    pub fn pending() -> Self {
        Self {
            message: "Newly issued. No details are available yet.".to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for WatchHazards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pds {
            write!(f, "PDS | ")?;
        }
        write!(
            f,
            "Tornadoes: {}% | EF2+ Tornadoes: {}% | Severe Wind: {}% | 65 kt+ Wind: {}% | Severe Hail: {}% | 2\"+ Hail: {}%",
            self.tornadoes.chance,
            self.ef2_plus_tornadoes.chance,
            self.severe_wind.chance,
            self.wind_65kt_plus.chance,
            self.severe_hail.chance,
            self.hail_2in_plus.chance
        )
    }
}

/// A county or forecast zone affected by a watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyInfo {
    pub id: String,
    pub name: String,
    pub state: String,
    pub forecast_offices: Vec<String>,
    pub time_zone: String,
    pub geometry: MultiPolygon<f64>,
}

impl fmt::Display for CountyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} county, {} - {} - {}",
            self.name, self.state, self.time_zone, self.id
        )
    }
}

/// A tornado or severe thunderstorm watch from the NWS alerts API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    /// Watch number, unique within a year.
    pub number: u32,
    pub kind: WatchKind,
    pub status: LifecycleStatus,
    pub sent: DateTime<Utc>,
    pub effective: Option<DateTime<Utc>>,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub ends: Option<DateTime<Utc>>,
    pub sender: String,
    pub headline: String,
    pub description: String,
    pub hazards: WatchHazards,
    pub counties: Vec<CountyInfo>,
    /// Mean of all county geometry points; `None` without geometry.
    pub centroid: Option<Coord<f64>>,
}

impl Watch {
    /// Create a watch with the required identity and timing fields.
    pub fn new(number: u32, kind: WatchKind, status: LifecycleStatus, sent: DateTime<Utc>) -> Self {
        Self {
            number,
            kind,
            status,
            sent,
            effective: None,
            onset: None,
            expires: None,
            ends: None,
            sender: String::new(),
            headline: String::new(),
            description: String::new(),
            hazards: WatchHazards::default(),
            counties: Vec::new(),
            centroid: None,
        }
    }

    /// Fold another fragment of the same watch into this one.
    pub fn merge(&mut self, other: Watch) {
        self.counties.extend(other.counties);
    }

    /// Recompute the centroid from the current county geometry.
    pub fn update_centroid(&mut self) {
        self.centroid = centroid(
            self.counties
                .iter()
                .flat_map(|c| c.geometry.0.iter())
                .flat_map(|p| p.exterior().coords().chain(p.interiors().iter().flat_map(|r| r.coords()))),
        );
    }
}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hazards.is_pds {
            write!(f, "PDS ")?;
        }
        write!(
            f,
            "{} {} [{}] | {} counties | {}",
            self.kind,
            self.number,
            self.status,
            self.counties.len(),
            self.hazards
        )
    }
}

/// The official polygon of an issued watch, from the SPC watch KMZ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchBox {
    pub number: u32,
    /// Watch type label as published ("TOR", "SVR" or the KML style name).
    pub watch_type: String,
    pub name: String,
    pub is_pds: bool,
    pub issued: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub polygon: Polygon<f64>,
    pub centroid: Option<Coord<f64>>,
    pub max_hail_size_inches: Option<f64>,
    pub max_wind_gust_mph: Option<f64>,
}

impl fmt::Display for WatchBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pds {
            write!(f, "PDS ")?;
        }
        write!(f, "{} {}", self.watch_type, self.number)?;
        if let Some(hail) = self.max_hail_size_inches {
            write!(f, " | Max Hail Size: {:.2} in", hail)?;
        }
        if let Some(gust) = self.max_wind_gust_mph {
            write!(f, " | Max Wind Gust: {:.0} mph", gust)?;
        }
        write!(f, " | Issued: {}", self.issued.format("%Y-%m-%d %H:%MZ"))
    }
}

/// An SPC mesoscale discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesoscaleDiscussion {
    /// Mesoscale discussion number, unique within a year.
    pub number: u32,
    pub full_name: String,
    pub url: String,
    /// Issue time with the local offset it was published in.
    pub issued: DateTime<FixedOffset>,
    /// Issue time as displayed, e.g. "05-06-2024 02:45 PM CDT".
    pub issued_display: String,
    pub areas_affected: String,
    /// What the discussion concerns ("Severe Potential", "Heavy Snow", ...).
    pub concerning: String,
    pub polygon: Polygon<f64>,
}

impl MesoscaleDiscussion {
    pub fn issued_utc(&self) -> DateTime<Utc> {
        self.issued.with_timezone(&Utc)
    }
}

impl fmt::Display for MesoscaleDiscussion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | Type: {} | Issued: {} | More at: {}",
            self.full_name, self.concerning, self.issued_display, self.url
        )
    }
}

/// Geometry attached to a warning, or the zones it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningArea {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
    Zones(Vec<String>),
}

/// An alert from the NWS alerts API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    /// Provider-issued alert id.
    pub id: String,
    /// NWS event name, e.g. "Tornado Warning".
    pub event: String,
    /// Display name; differs from `event` for custom warnings
    /// such as "Tornado Emergency".
    pub name: String,
    pub status: LifecycleStatus,
    pub sent: DateTime<Utc>,
    pub effective: Option<DateTime<Utc>>,
    pub onset: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub ends: Option<DateTime<Utc>>,
    pub sender: String,
    pub headline: String,
    pub nws_headline: String,
    pub description: String,
    pub instruction: String,
    pub parameters: WarningParameters,
    pub area: WarningArea,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.status)?;
        let p = &self.parameters;
        if let Some(detection) = &p.tornado_detection {
            write!(f, " | Tornado: {}", detection)?;
        }
        if let Some(gust) = p.max_wind_gust {
            write!(f, " | Max Wind Gust: {} {}", gust, p.max_wind_gust_units)?;
        }
        if let Some(hail) = p.max_hail_size {
            write!(f, " | Max Hail Size: {} in", hail)?;
        }
        if !self.nws_headline.is_empty() {
            write!(f, " | {}", self.nws_headline)?;
        }
        Ok(())
    }
}

/// Hazard parameters attached to an alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningParameters {
    pub wind_threat: Option<String>,
    pub max_wind_gust: Option<f64>,
    pub max_wind_gust_units: String,
    pub hail_threat: Option<String>,
    pub max_hail_size: Option<f64>,
    pub tornado_detection: Option<String>,
    pub waterspout_detection: Option<String>,
    pub tornado_damage_threat: Option<String>,
    pub thunderstorm_damage_threat: Option<String>,
    pub flash_flood_detection: Option<String>,
    pub flash_flood_damage_threat: Option<String>,
    pub event_motion: Option<String>,
    pub cmam_text: Option<String>,
    pub cmam_long_text: Option<String>,
}

/// A planetary K-index sample from SWPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KIndex {
    pub time_tag: DateTime<Utc>,
    pub kp_index: f64,
    pub estimated_kp: f64,
    pub kp: String,
}

/// Product family of an SPC convective outlook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlookKind {
    /// Categorical risk (TSTM through HIGH), days 1-3.
    Categorical,
    /// Tornado probabilities, days 1-2.
    Tornado,
    /// Damaging wind probabilities, days 1-2.
    Wind,
    /// Large hail probabilities, days 1-2.
    Hail,
    /// Total severe probabilities, days 3-8.
    Probabilistic,
    /// Significant severe probabilities, day 3.
    SignificantProbabilistic,
}

impl OutlookKind {
    /// Forecast days this product is issued for.
    pub fn days(&self) -> RangeInclusive<u8> {
        match self {
            OutlookKind::Categorical => 1..=3,
            OutlookKind::Tornado | OutlookKind::Wind | OutlookKind::Hail => 1..=2,
            OutlookKind::Probabilistic => 3..=8,
            OutlookKind::SignificantProbabilistic => 3..=3,
        }
    }

    /// File name suffix SPC uses for this product.
    pub fn suffix(&self) -> &'static str {
        match self {
            OutlookKind::Categorical => "cat",
            OutlookKind::Tornado => "torn",
            OutlookKind::Wind => "wind",
            OutlookKind::Hail => "hail",
            OutlookKind::Probabilistic => "prob",
            OutlookKind::SignificantProbabilistic => "sigprob",
        }
    }
}

impl FromStr for OutlookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cat" | "categorical" => Ok(OutlookKind::Categorical),
            "torn" | "tornado" => Ok(OutlookKind::Tornado),
            "wind" => Ok(OutlookKind::Wind),
            "hail" => Ok(OutlookKind::Hail),
            "prob" | "probabilistic" => Ok(OutlookKind::Probabilistic),
            "sigprob" | "significant" => Ok(OutlookKind::SignificantProbabilistic),
            other => Err(format!("unknown outlook kind '{}'", other)),
        }
    }
}

/// Categorical convective risk, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalRisk {
    GeneralThunderstorms,
    Marginal,
    Slight,
    Enhanced,
    Moderate,
    High,
}

impl CategoricalRisk {
    /// Map the `DN` value of a categorical outlook feature.
    pub fn from_dn(dn: u8) -> Option<Self> {
        match dn {
            2 => Some(CategoricalRisk::GeneralThunderstorms),
            3 => Some(CategoricalRisk::Marginal),
            4 => Some(CategoricalRisk::Slight),
            5 => Some(CategoricalRisk::Enhanced),
            6 => Some(CategoricalRisk::Moderate),
            8 => Some(CategoricalRisk::High),
            _ => None,
        }
    }

    /// Map the short label ("TSTM", "MRGL", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "TSTM" => Some(CategoricalRisk::GeneralThunderstorms),
            "MRGL" => Some(CategoricalRisk::Marginal),
            "SLGT" => Some(CategoricalRisk::Slight),
            "ENH" => Some(CategoricalRisk::Enhanced),
            "MDT" => Some(CategoricalRisk::Moderate),
            "HIGH" => Some(CategoricalRisk::High),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CategoricalRisk::GeneralThunderstorms => "TSTM",
            CategoricalRisk::Marginal => "MRGL",
            CategoricalRisk::Slight => "SLGT",
            CategoricalRisk::Enhanced => "ENH",
            CategoricalRisk::Moderate => "MDT",
            CategoricalRisk::High => "HIGH",
        }
    }
}

/// Risk carried by one outlook area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlookRisk {
    Categorical(CategoricalRisk),
    /// Probability in percent.
    Probability(u8),
    /// Hatched area of significant severe weather.
    Significant,
}

impl fmt::Display for OutlookRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlookRisk::Categorical(risk) => f.write_str(risk.label()),
            OutlookRisk::Probability(chance) => write!(f, "{}%", chance),
            OutlookRisk::Significant => f.write_str("SIGN"),
        }
    }
}

/// One risk area of an SPC convective outlook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskArea {
    pub kind: OutlookKind,
    pub risk: OutlookRisk,
    /// Short label as published, e.g. "SLGT" or "0.05".
    pub label: String,
    /// Long label, e.g. "Slight Risk".
    pub description: String,
    pub valid: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub issued: DateTime<Utc>,
    /// Stroke color as published, e.g. "#DDAA00".
    pub stroke: String,
    pub fill: String,
    pub area: MultiPolygon<f64>,
}

impl fmt::Display for RiskArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | Valid: {} | Expires: {} | Issued: {}",
            self.description,
            self.risk,
            self.valid.format("%Y-%m-%d %H:%MZ"),
            self.expires.format("%Y-%m-%d %H:%MZ"),
            self.issued.format("%Y-%m-%d %H:%MZ")
        )
    }
}

/// Category of an SPC local storm report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Tornado,
    Wind,
    Hail,
}

impl ReportKind {
    /// File name suffix SPC uses for this report category.
    pub fn suffix(&self) -> &'static str {
        match self {
            ReportKind::Tornado => "torn",
            ReportKind::Wind => "wind",
            ReportKind::Hail => "hail",
        }
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "torn" | "tornado" => Ok(ReportKind::Tornado),
            "wind" => Ok(ReportKind::Wind),
            "hail" => Ok(ReportKind::Hail),
            other => Err(format!("unknown report kind '{}'", other)),
        }
    }
}

/// Magnitude of a storm report; `None` values were reported as unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMagnitude {
    /// Damage rating, e.g. "EF2".
    Rating(Option<String>),
    WindMph(Option<u32>),
    HailInches(Option<f64>),
}

impl fmt::Display for ReportMagnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportMagnitude::Rating(Some(rating)) => f.write_str(rating),
            ReportMagnitude::WindMph(Some(mph)) => write!(f, "{} mph", mph),
            ReportMagnitude::HailInches(Some(inches)) => write!(f, "{:.2} in", inches),
            _ => f.write_str("UNK"),
        }
    }
}

/// A preliminary local storm report collected by SPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormReport {
    pub kind: ReportKind,
    pub time: DateTime<Utc>,
    pub magnitude: ReportMagnitude,
    pub location: String,
    pub county: String,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub comments: String,
}

impl fmt::Display for StormReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {} | {}, {} County, {} | {}",
            self.time.format("%Y-%m-%d %H:%MZ"),
            self.kind,
            self.magnitude,
            self.location,
            self.county,
            self.state,
            self.comments
        )
    }
}

/// An active tropical cyclone from the NHC active storms feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TropicalCyclone {
    /// ATCF identifier, e.g. "AL082023".
    pub id: String,
    pub name: String,
    /// Classification, e.g. "Hurricane" or "Tropical Storm".
    pub classification: String,
    /// Advisory wallet, e.g. "AT3".
    pub wallet: String,
    pub center: Option<Coord<f64>>,
    /// Advisory time as published, e.g. "11:00 AM AST Mon Aug 28".
    pub advisory_time: String,
    pub movement: String,
    pub min_pressure_mb: Option<u32>,
    pub max_sustained_wind_mph: Option<u32>,
    pub headline: String,
    /// Forecast cone of the latest advisory.
    pub cone: Option<Polygon<f64>>,
    pub forecast: Vec<ForecastPoint>,
}

impl fmt::Display for TropicalCyclone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.classification, self.name, self.id)?;
        if let Some(wind) = self.max_sustained_wind_mph {
            write!(f, " | Max Winds: {} mph", wind)?;
        }
        if let Some(pressure) = self.min_pressure_mb {
            write!(f, " | Min Pressure: {} mb", pressure)?;
        }
        if !self.movement.is_empty() {
            write!(f, " | Movement: {}", self.movement)?;
        }
        write!(f, " | {}", self.advisory_time)
    }
}

/// One point of an NHC forecast track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub position: Coord<f64>,
    /// Forecast classification derived from the point style.
    pub classification: String,
    /// Validity as published, e.g. "8:00 AM AST August 29".
    pub valid: String,
    pub max_wind_kt: Option<u32>,
    pub max_wind_mph: Option<u32>,
    pub gusts_kt: Option<u32>,
    pub gusts_mph: Option<u32>,
}

/// Ocean basin of the NHC tropical weather outlook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basin {
    Atlantic,
    EastPacific,
    CentralPacific,
}

impl Basin {
    /// Outlook file code.
    pub fn code(&self) -> &'static str {
        match self {
            Basin::Atlantic => "atl",
            Basin::EastPacific => "pac",
            Basin::CentralPacific => "cpac",
        }
    }
}

impl FromStr for Basin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "atl" | "atlantic" => Ok(Basin::Atlantic),
            "pac" | "epac" | "eastpacific" => Ok(Basin::EastPacific),
            "cpac" | "centralpacific" => Ok(Basin::CentralPacific),
            other => Err(format!("unknown basin '{}'", other)),
        }
    }
}

/// A disturbance from the NHC tropical weather outlook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Disturbance {
    pub index: u8,
    /// Formation chance within 48 hours, e.g. "60%".
    pub two_day_chance: String,
    pub two_day_category: String,
    /// Formation chance within 7 days.
    pub seven_day_chance: String,
    pub seven_day_category: String,
    pub discussion: String,
    pub position: Option<Coord<f64>>,
    pub area: Option<Polygon<f64>>,
}

impl fmt::Display for Disturbance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Disturbance {} - {} chance of cyclone formation in 48 hours - {} chance of cyclone formation in 7 days",
            self.index, self.two_day_chance, self.seven_day_chance
        )
    }
}

/// A weather radar site from the NWS API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarStation {
    /// Station identifier, e.g. "KTLX".
    pub id: String,
    pub name: String,
    /// Station type, e.g. "WSR-88D" or "TDWR".
    pub station_type: String,
    pub location: Coord<f64>,
    pub elevation: Option<f64>,
    /// Elevation unit code, e.g. "wmoUnit:m".
    pub elevation_unit: String,
    pub time_zone: String,
    /// Operating mode of the radar data acquisition unit, when reported.
    pub mode: Option<String>,
}

impl fmt::Display for RadarStation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) at {:.3}, {:.3}",
            self.id, self.name, self.station_type, self.location.y, self.location.x
        )?;
        if let Some(mode) = &self.mode {
            write!(f, " | Mode: {}", mode)?;
        }
        Ok(())
    }
}

/// One grid cell of the OVATION aurora forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuroraPoint {
    /// Degrees east, 0 to 359.
    pub longitude: f64,
    pub latitude: f64,
    /// Probability of visible aurora in percent.
    pub probability: u8,
}

/// The OVATION aurora forecast grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuroraForecast {
    pub observation_time: DateTime<Utc>,
    pub forecast_time: DateTime<Utc>,
    pub points: Vec<AuroraPoint>,
}

impl AuroraForecast {
    /// Probability at the grid cell nearest to a location. Longitudes west
    /// of Greenwich may be given as negative values.
    pub fn probability_at(&self, latitude: f64, longitude: f64) -> Option<u8> {
        let longitude = longitude.rem_euclid(360.0);
        let distance = |p: &AuroraPoint| {
            let dlon = (p.longitude - longitude).abs();
            let dlon = dlon.min(360.0 - dlon);
            dlon * dlon + (p.latitude - latitude).powi(2)
        };
        self.points
            .iter()
            .min_by(|a, b| distance(a).total_cmp(&distance(b)))
            .map(|p| p.probability)
    }
}

/// A propagated solar wind sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarWind {
    pub time_tag: DateTime<Utc>,
    /// Bulk speed in km/s.
    pub speed: Option<f64>,
    /// Proton density in p/cm3.
    pub density: Option<f64>,
    /// Temperature in K.
    pub temperature: Option<f64>,
}

/// A 10.7 cm solar radio flux observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioFlux {
    pub time_tag: DateTime<Utc>,
    /// Observing frequency in MHz.
    pub frequency: f64,
    /// Flux in solar flux units.
    pub flux: f64,
}

/// Current NOAA space weather scale levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceWeatherScales {
    pub kp_index: f64,
    /// Geomagnetic storm level ("G1".."G5", or a quiet level).
    pub geomagnetic_storm: String,
    /// >=10 MeV proton flux in pfu.
    pub proton_flux: f64,
    /// Solar radiation storm level ("S1".."S5" or "None").
    pub solar_radiation_storm: String,
    /// 0.1-0.8 nm X-ray flux in W/m2.
    pub xray_flux: f64,
    /// Radio blackout level ("R1".."R5" or "None").
    pub radio_blackout: String,
}

impl fmt::Display for SpaceWeatherScales {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Geomagnetic: {} (Kp {:.2}) | Solar Radiation: {} ({:.2} pfu) | Radio Blackout: {} ({:.1e} W/m2)",
            self.geomagnetic_storm,
            self.kp_index,
            self.solar_radiation_storm,
            self.proton_flux,
            self.radio_blackout,
            self.xray_flux
        )
    }
}

/// Mean of a set of points, `None` for an empty set.
pub fn centroid<'a>(points: impl IntoIterator<Item = &'a Coord<f64>>) -> Option<Coord<f64>> {
    let (sum_x, sum_y, count) = points
        .into_iter()
        .fold((0.0, 0.0, 0usize), |(x, y, n), c| (x + c.x, y + c.y, n + 1));
    if count == 0 {
        return None;
    }
    Some(Coord {
        x: sum_x / count as f64,
        y: sum_y / count as f64,
    })
}
