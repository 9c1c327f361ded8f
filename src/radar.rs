//! NWS weather radar sites.

use geo_types::Coord;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::model::RadarStation;

/// Path of the radar station collection.
pub const RADAR_STATIONS_PATH: &str = "/radar/stations";

#[derive(Debug, Deserialize)]
struct StationCollection {
    #[serde(default)]
    features: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StationFeature {
    geometry: PointGeometry,
    properties: StationProperties,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationProperties {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    station_type: String,
    #[serde(default)]
    elevation: Option<QuantitativeValue>,
    #[serde(default)]
    time_zone: String,
    #[serde(default)]
    rda: Option<Rda>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuantitativeValue {
    #[serde(default)]
    unit_code: String,
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Rda {
    #[serde(default)]
    properties: Option<RdaProperties>,
}

#[derive(Debug, Deserialize)]
struct RdaProperties {
    #[serde(default)]
    mode: Option<String>,
}

fn station(feature: StationFeature) -> Result<RadarStation, String> {
    let location = match feature.geometry.coordinates.as_slice() {
        [x, y, ..] => Coord { x: *x, y: *y },
        _ => return Err("point has fewer than two coordinates".to_string()),
    };
    let props = feature.properties;
    let (elevation, elevation_unit) = match props.elevation {
        Some(e) => (e.value, e.unit_code),
        None => (None, String::new()),
    };

    Ok(RadarStation {
        id: props.id,
        name: props.name,
        station_type: props.station_type,
        location,
        elevation,
        elevation_unit,
        time_zone: props.time_zone,
        mode: props.rda.and_then(|rda| rda.properties).and_then(|p| p.mode),
    })
}

/// Decode station features, skipping malformed ones. Stations are sorted
/// by identifier.
fn stations_from_features(url: &str, features: Vec<serde_json::Value>) -> Vec<RadarStation> {
    let mut stations: Vec<RadarStation> = features
        .into_iter()
        .filter_map(|feature| {
            serde_json::from_value::<StationFeature>(feature)
                .map_err(|e| e.to_string())
                .and_then(station)
                .map_err(|e| warn!("Skipping malformed radar station from {}: {}", url, e))
                .ok()
        })
        .collect();
    stations.sort_by(|a, b| a.id.cmp(&b.id));
    stations
}

/// Fetch every radar site the NWS publishes.
pub async fn fetch_radar_stations(client: &HttpClient) -> Result<Vec<RadarStation>, FetchError> {
    let url = format!("{}{}", client.config().nws_base_url, RADAR_STATIONS_PATH);
    let collection: StationCollection = client.get_json(&url).await?;
    let stations = stations_from_features(&url, collection.features);
    debug!("{} radar stations", stations.len());
    Ok(stations)
}
