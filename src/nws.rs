//! National Weather Service alerts API.
//!
//! Watches and warnings both come from `/alerts/active`. Watch alerts only
//! carry the numbers of the affected zones, so each zone is fetched
//! separately for its geometry. One watch is usually split across several
//! alerts (one per issuing office), and the fragments are merged by watch
//! number.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::classify;
use crate::client::{FetchError, HttpClient};
use crate::model::{
    CountyInfo, LifecycleStatus, Warning, WarningArea, WarningParameters, Watch, WatchKind,
};
use crate::parser::{extract_watch_number, parse_leading_number};

/// Warning categories requested by default.
pub const DEFAULT_WARNING_EVENTS: &[&str] = &[
    "tornado warning",
    "severe thunderstorm warning",
    "tornado watch",
    "severe thunderstorm watch",
    "special weather statement",
    "severe weather statement",
    "special marine warning",
    "marine weather statement",
    "ice storm warning",
    "snow squall warning",
];

/// GeoJSON geometry with the coordinates left undecoded until the type is
/// known.
#[derive(Debug, Deserialize)]
pub(crate) struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: serde_json::Value,
}

pub(crate) enum Geometry {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

fn ring(points: Vec<Vec<f64>>) -> LineString<f64> {
    points
        .into_iter()
        .filter(|p| p.len() >= 2)
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect()
}

fn polygon(mut rings: Vec<Vec<Vec<f64>>>) -> Option<Polygon<f64>> {
    if rings.is_empty() {
        return None;
    }
    let exterior = ring(rings.remove(0));
    Some(Polygon::new(exterior, rings.into_iter().map(ring).collect()))
}

impl RawGeometry {
    /// Decode polygonal geometry. Other geometry types yield `None`.
    pub(crate) fn decode(self) -> Result<Option<Geometry>, serde_json::Error> {
        match self.kind.as_str() {
            "Polygon" => {
                let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(self.coordinates)?;
                Ok(polygon(rings).map(Geometry::Polygon))
            }
            "MultiPolygon" => {
                let polygons: Vec<Vec<Vec<Vec<f64>>>> = serde_json::from_value(self.coordinates)?;
                Ok(Some(Geometry::MultiPolygon(MultiPolygon(
                    polygons.into_iter().filter_map(polygon).collect(),
                ))))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    geometry: Option<RawGeometry>,
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertProperties {
    #[serde(default)]
    id: String,
    #[serde(default)]
    event: String,
    sent: DateTime<Utc>,
    #[serde(default)]
    effective: Option<DateTime<Utc>>,
    #[serde(default)]
    onset: Option<DateTime<Utc>>,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(default)]
    ends: Option<DateTime<Utc>>,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    affected_zones: Vec<String>,
    #[serde(default)]
    parameters: HashMap<String, Vec<serde_json::Value>>,
}

impl AlertProperties {
    fn status(&self) -> LifecycleStatus {
        LifecycleStatus::from_message_type(self.message_type.as_deref().unwrap_or("Alert"))
    }

    fn parameter(&self, name: &str) -> Option<String> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct ZoneFeature {
    geometry: Option<RawGeometry>,
    properties: ZoneProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZoneProperties {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    forecast_offices: Vec<String>,
    #[serde(default)]
    time_zone: Vec<String>,
}

/// Build an `/alerts/active` URL for the given event names.
pub fn alerts_url(base_url: &str, events: &[String]) -> String {
    if events.is_empty() {
        return format!("{}/alerts/active", base_url);
    }
    let events: Vec<String> = events
        .iter()
        .map(|e| e.trim().to_lowercase().replace(' ', "%20"))
        .collect();
    format!("{}/alerts/active?event={}", base_url, events.join(","))
}

/// Decode the features of an alert collection, skipping malformed ones.
fn decode_alerts(url: &str, body: &str) -> Result<Vec<AlertFeature>, FetchError> {
    let collection: FeatureCollection = serde_json::from_str(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|feature| match serde_json::from_value::<AlertFeature>(feature) {
            Ok(alert) => Some(alert),
            Err(e) => {
                warn!("Skipping malformed alert from {}: {}", url, e);
                None
            }
        })
        .collect())
}

/// Decode a zone document into county information.
pub fn parse_zone(url: &str, body: &str) -> Result<CountyInfo, FetchError> {
    let zone: ZoneFeature = serde_json::from_str(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })?;

    let geometry = match zone.geometry {
        Some(raw) => raw.decode().map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })?,
        None => None,
    };
    let geometry = match geometry {
        Some(Geometry::Polygon(p)) => MultiPolygon(vec![p]),
        Some(Geometry::MultiPolygon(mp)) => mp,
        None => MultiPolygon(vec![]),
    };

    let props = zone.properties;
    Ok(CountyInfo {
        id: props.id,
        name: props.name,
        state: props.state.unwrap_or_default(),
        forecast_offices: props.forecast_offices,
        time_zone: props.time_zone.into_iter().next().unwrap_or_default(),
        geometry,
    })
}

async fn fetch_zone(client: &HttpClient, url: &str) -> Option<CountyInfo> {
    let result = match client.get_text(url).await {
        Ok(body) => parse_zone(url, &body),
        Err(e) => Err(e),
    };
    match result {
        Ok(county) => Some(county),
        Err(e) => {
            warn!("Failed to fetch zone {}: {}", url, e);
            None
        }
    }
}

/// Build one watch fragment from an alert and its county geometry.
async fn watch_fragment(client: &HttpClient, kind: WatchKind, alert: AlertFeature) -> Option<Watch> {
    let props = alert.properties;
    let description = props.description.clone().unwrap_or_default();
    let Some(number) = extract_watch_number(&description, kind) else {
        warn!("No {} number in alert {}", kind, props.id);
        return None;
    };

    let counties = join_all(props.affected_zones.iter().map(|zone| fetch_zone(client, zone))).await;

    let mut watch = Watch::new(number, kind, props.status(), props.sent);
    watch.effective = props.effective;
    watch.onset = props.onset;
    watch.expires = props.expires;
    watch.ends = props.ends;
    watch.sender = props.sender_name.unwrap_or_default();
    watch.headline = props.headline.unwrap_or_default();
    watch.description = description;
    watch.counties = counties.into_iter().flatten().collect();
    Some(watch)
}

/// Merge watch fragments by number and compute centroids.
pub fn reduce_fragments(fragments: impl IntoIterator<Item = Watch>) -> Vec<Watch> {
    let mut merged: BTreeMap<u32, Watch> = BTreeMap::new();
    for fragment in fragments {
        match merged.get_mut(&fragment.number) {
            Some(existing) => existing.merge(fragment),
            None => {
                merged.insert(fragment.number, fragment);
            }
        }
    }

    merged
        .into_values()
        .map(|mut watch| {
            watch.update_centroid();
            watch
        })
        .collect()
}

/// Fetch active watches of one kind, with county geometry.
///
/// Hazard probabilities are left at their defaults.
pub async fn fetch_active_watches(client: &HttpClient, kind: WatchKind) -> Result<Vec<Watch>, FetchError> {
    let url = alerts_url(&client.config().nws_base_url, &[kind.event_name().to_string()]);
    let body = client.get_text(&url).await?;
    let alerts = decode_alerts(&url, &body)?;
    debug!("{} {} alerts", alerts.len(), kind);

    let fragments = join_all(alerts.into_iter().map(|alert| watch_fragment(client, kind, alert))).await;
    Ok(reduce_fragments(fragments.into_iter().flatten()))
}

/// Split a `maxWindGust` value such as `"70 MPH"` into speed and units.
fn parse_wind_gust(value: &str) -> (Option<f64>, String) {
    let speed = parse_leading_number(value);
    let units = value
        .split_whitespace()
        .skip_while(|w| w.parse::<f64>().is_err())
        .nth(1)
        .map(|u| match u.to_ascii_uppercase().as_str() {
            "KT" | "KTS" | "KNOTS" => "kts".to_string(),
            other => other.to_lowercase(),
        })
        .unwrap_or_else(|| "mph".to_string());
    (speed, units)
}

fn warning_from_alert(alert: AlertFeature, custom_names: bool) -> Result<Warning, serde_json::Error> {
    let props = alert.properties;

    let area = match alert.geometry.map(RawGeometry::decode).transpose()?.flatten() {
        Some(Geometry::Polygon(p)) => WarningArea::Polygon(p),
        Some(Geometry::MultiPolygon(mp)) => WarningArea::MultiPolygon(mp),
        None => WarningArea::Zones(props.affected_zones.clone()),
    };

    let (max_wind_gust, max_wind_gust_units) = props
        .parameter("maxWindGust")
        .map(|v| parse_wind_gust(&v))
        .unwrap_or((None, "mph".to_string()));

    let parameters = WarningParameters {
        wind_threat: props.parameter("windThreat"),
        max_wind_gust,
        max_wind_gust_units,
        hail_threat: props.parameter("hailThreat"),
        max_hail_size: props.parameter("maxHailSize").and_then(|v| parse_leading_number(&v)),
        tornado_detection: props.parameter("tornadoDetection"),
        waterspout_detection: props.parameter("waterspoutDetection"),
        tornado_damage_threat: props.parameter("tornadoDamageThreat"),
        thunderstorm_damage_threat: props.parameter("thunderstormDamageThreat"),
        flash_flood_detection: props.parameter("flashFloodDetection"),
        flash_flood_damage_threat: props.parameter("flashFloodDamageThreat"),
        event_motion: props.parameter("eventMotionDescription"),
        cmam_text: props.parameter("CMAMtext"),
        cmam_long_text: props.parameter("CMAMlongtext"),
    };

    let mut warning = Warning {
        id: props.id.clone(),
        name: props.event.clone(),
        status: props.status(),
        sent: props.sent,
        effective: props.effective,
        onset: props.onset,
        expires: props.expires,
        ends: props.ends,
        nws_headline: props.parameter("NWSheadline").unwrap_or_default(),
        event: props.event,
        sender: props.sender_name.unwrap_or_default(),
        headline: props.headline.unwrap_or_default(),
        description: props.description.unwrap_or_default(),
        instruction: props.instruction.unwrap_or_default(),
        parameters,
        area,
    };

    if custom_names {
        if let Some(name) = classify::custom_name(&warning) {
            warning.name = name.to_string();
        }
    }
    Ok(warning)
}

/// Decode an alert collection into warnings, skipping malformed alerts.
pub fn parse_warnings(url: &str, body: &str, custom_names: bool) -> Result<Vec<Warning>, FetchError> {
    Ok(decode_alerts(url, body)?
        .into_iter()
        .filter_map(|alert| {
            let id = alert.properties.id.clone();
            match warning_from_alert(alert, custom_names) {
                Ok(warning) => Some(warning),
                Err(e) => {
                    warn!("Skipping alert {} with bad geometry: {}", id, e);
                    None
                }
            }
        })
        .collect())
}

/// Fetch active alerts of the given categories.
pub async fn fetch_active_warnings(
    client: &HttpClient,
    events: &[String],
    custom_names: bool,
) -> Result<Vec<Warning>, FetchError> {
    let url = alerts_url(&client.config().nws_base_url, events);
    let body = client.get_text(&url).await?;
    let warnings = parse_warnings(&url, &body, custom_names)?;
    debug!("{} active warnings", warnings.len());
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ALERTS: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {
          "type": "Feature",
          "geometry": {
            "type": "Polygon",
            "coordinates": [[[-97.5, 35.0], [-96.5, 35.0], [-96.5, 36.0], [-97.5, 35.0]]]
          },
          "properties": {
            "id": "urn:oid:2.49.0.1.840.0.abc",
            "event": "Tornado Warning",
            "sent": "2024-05-06T14:45:00-05:00",
            "effective": "2024-05-06T14:45:00-05:00",
            "expires": "2024-05-06T15:30:00-05:00",
            "ends": null,
            "senderName": "NWS Norman OK",
            "headline": "Tornado Warning issued May 6",
            "description": "...TORNADO EMERGENCY FOR MOORE...",
            "instruction": "TAKE COVER NOW!",
            "messageType": "Alert",
            "affectedZones": ["https://api.weather.gov/zones/county/OKC027"],
            "parameters": {
              "NWSheadline": ["TORNADO EMERGENCY FOR MOORE"],
              "tornadoDetection": ["OBSERVED"],
              "tornadoDamageThreat": ["CATASTROPHIC"],
              "maxHailSize": ["Up to 1.75"],
              "eventMotionDescription": ["2024-05-06T19:45:00-00:00...storm...245DEG...30KT...35.3,-97.4"]
            }
          }
        },
        {
          "type": "Feature",
          "geometry": null,
          "properties": {
            "id": "urn:oid:2.49.0.1.840.0.def",
            "event": "Severe Thunderstorm Warning",
            "sent": "2024-05-06T19:50:00+00:00",
            "messageType": "Update",
            "affectedZones": ["https://api.weather.gov/zones/county/OKC109"],
            "parameters": {
              "maxWindGust": ["60 MPH"],
              "windThreat": ["RADAR INDICATED"]
            }
          }
        },
        { "type": "Feature", "properties": { "id": "missing-sent" } }
      ]
    }"#;

    const ZONE: &str = r#"{
      "geometry": {
        "type": "MultiPolygon",
        "coordinates": [[[[-97.0, 35.0], [-96.0, 35.0], [-96.0, 36.0], [-97.0, 35.0]]]]
      },
      "properties": {
        "id": "OKC027",
        "name": "Cleveland",
        "state": "OK",
        "forecastOffices": ["https://api.weather.gov/offices/OUN"],
        "timeZone": ["America/Chicago"]
      }
    }"#;

    #[test]
    fn test_alerts_url() {
        let url = alerts_url(
            "https://api.weather.gov",
            &["Tornado Warning".to_string(), "snow squall warning".to_string()],
        );
        assert_eq!(
            url,
            "https://api.weather.gov/alerts/active?event=tornado%20warning,snow%20squall%20warning"
        );
        assert_eq!(alerts_url("http://x", &[]), "http://x/alerts/active");
    }

    #[test]
    fn test_parse_warnings() {
        let warnings = parse_warnings("test", ALERTS, true).unwrap();
        assert_eq!(warnings.len(), 2);

        let tor = &warnings[0];
        assert_eq!(tor.id, "urn:oid:2.49.0.1.840.0.abc");
        assert_eq!(tor.event, "Tornado Warning");
        assert_eq!(tor.name, "Tornado Emergency");
        assert_eq!(tor.status, LifecycleStatus::NewIssue);
        assert_eq!(tor.sent, Utc.with_ymd_and_hms(2024, 5, 6, 19, 45, 0).unwrap());
        assert_eq!(tor.ends, None);
        assert_eq!(tor.nws_headline, "TORNADO EMERGENCY FOR MOORE");
        assert_eq!(tor.parameters.max_hail_size, Some(1.75));
        assert_eq!(tor.parameters.tornado_detection.as_deref(), Some("OBSERVED"));
        assert!(matches!(tor.area, WarningArea::Polygon(_)));

        let svr = &warnings[1];
        assert_eq!(svr.status, LifecycleStatus::Update);
        assert_eq!(svr.name, "Severe Thunderstorm Warning");
        assert_eq!(svr.parameters.max_wind_gust, Some(60.0));
        assert_eq!(svr.parameters.max_wind_gust_units, "mph");
        assert_eq!(
            svr.area,
            WarningArea::Zones(vec!["https://api.weather.gov/zones/county/OKC109".to_string()])
        );
    }

    #[test]
    fn test_parse_warnings_without_custom_names() {
        let warnings = parse_warnings("test", ALERTS, false).unwrap();
        assert_eq!(warnings[0].name, "Tornado Warning");
    }

    #[test]
    fn test_parse_warnings_bad_document() {
        let err = parse_warnings("test", "not json", true).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[test]
    fn test_parse_zone() {
        let county = parse_zone("test", ZONE).unwrap();
        assert_eq!(county.id, "OKC027");
        assert_eq!(county.state, "OK");
        assert_eq!(county.time_zone, "America/Chicago");
        assert_eq!(county.forecast_offices.len(), 1);
        assert_eq!(county.geometry.0.len(), 1);
    }

    #[test]
    fn test_parse_wind_gust_units() {
        assert_eq!(parse_wind_gust("60 MPH"), (Some(60.0), "mph".to_string()));
        assert_eq!(parse_wind_gust("Up to 50 KTS"), (Some(50.0), "kts".to_string()));
    }

    #[test]
    fn test_reduce_fragments_merges_by_number() {
        let sent = Utc.with_ymd_and_hms(2024, 5, 6, 19, 0, 0).unwrap();
        let mut a = Watch::new(100, WatchKind::Tornado, LifecycleStatus::NewIssue, sent);
        a.counties = vec![parse_zone("test", ZONE).unwrap()];
        let mut b = a.clone();
        b.counties[0].id = "OKC109".to_string();
        let c = Watch::new(101, WatchKind::Tornado, LifecycleStatus::NewIssue, sent);

        let watches = reduce_fragments(vec![a, c, b]);
        assert_eq!(watches.len(), 2);
        assert_eq!(watches[0].number, 100);
        let ids: Vec<&str> = watches[0].counties.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["OKC027", "OKC109"]);
        assert!(watches[0].centroid.is_some());
        assert_eq!(watches[1].centroid, None);
    }
}
