//! Iowa Environmental Mesonet watch archive.
//!
//! `spcwatch.py` returns the watches valid at a given UTC timestamp as
//! GeoJSON. A whole day is covered by querying each hour.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::model::{WatchBox, WatchKind, centroid};
use crate::nws::{Geometry, RawGeometry};

const KNOTS_TO_MPH: f64 = 1.151;

#[derive(Debug, Deserialize)]
struct ArchiveCollection {
    #[serde(default)]
    features: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ArchiveFeature {
    geometry: Option<RawGeometry>,
    properties: ArchiveProperties,
}

#[derive(Debug, Deserialize)]
struct ArchiveProperties {
    #[serde(rename = "type")]
    kind: String,
    number: u32,
    #[serde(default)]
    is_pds: bool,
    #[serde(default)]
    max_hail_size: Option<f64>,
    #[serde(default)]
    max_wind_gust_knots: Option<f64>,
    issue: DateTime<Utc>,
    #[serde(default)]
    expire: Option<DateTime<Utc>>,
}

/// Parse a `YYYY-MM-DD` archive date.
pub fn parse_archive_date(date: &str) -> Result<NaiveDate, FetchError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| FetchError::InvalidRequest(format!("invalid date '{}': {}", date, e)))
}

/// URL of the archive snapshot at the top of the given hour.
pub fn archive_url(base_url: &str, date: NaiveDate, hour: u32) -> String {
    format!(
        "{}/json/spcwatch.py?ts={}{:02}00&fmt=geojson",
        base_url,
        date.format("%Y%m%d"),
        hour
    )
}

fn watch_box_from_feature(feature: ArchiveFeature) -> Result<WatchBox, String> {
    let props = feature.properties;
    let kind = WatchKind::from_code(&props.kind).ok_or_else(|| format!("unknown watch type '{}'", props.kind))?;

    let polygon = match feature.geometry {
        Some(raw) => match raw.decode().map_err(|e| e.to_string())? {
            Some(Geometry::Polygon(p)) => Some(p),
            Some(Geometry::MultiPolygon(mp)) => mp.0.into_iter().next(),
            None => None,
        },
        None => None,
    };
    let polygon = polygon.ok_or_else(|| format!("watch {} has no polygon", props.number))?;

    let pds = if props.is_pds { "PDS " } else { "" };
    Ok(WatchBox {
        number: props.number,
        watch_type: props.kind.clone(),
        name: format!("{}{} {}", pds, kind.event_name(), props.number),
        is_pds: props.is_pds,
        issued: props.issue,
        expires: props.expire,
        centroid: centroid(polygon.exterior().coords()),
        polygon,
        max_hail_size_inches: props.max_hail_size,
        max_wind_gust_mph: props.max_wind_gust_knots.map(|kt| kt * KNOTS_TO_MPH),
    })
}

/// Decode an archive snapshot, skipping malformed features.
pub fn parse_archive(url: &str, body: &str) -> Result<Vec<WatchBox>, FetchError> {
    let collection: ArchiveCollection = serde_json::from_str(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<ArchiveFeature>(value)
                .map_err(|e| e.to_string())
                .and_then(watch_box_from_feature);
            match parsed {
                Ok(watch_box) => Some(watch_box),
                Err(e) => {
                    warn!("Skipping archived watch from {}: {}", url, e);
                    None
                }
            }
        })
        .collect())
}

async fn fetch_snapshot(client: &HttpClient, date: NaiveDate, hour: u32) -> Result<Vec<WatchBox>, FetchError> {
    let url = archive_url(&client.config().iem_base_url, date, hour);
    let body = client.get_text(&url).await?;
    parse_archive(&url, &body)
}

/// Fetch archived watches for a day, or for one hour of it.
///
/// Without an hour, all 24 hourly snapshots are fetched concurrently and
/// de-duplicated by watch number.
pub async fn fetch_archived_watch_boxes(
    client: &HttpClient,
    date: NaiveDate,
    hour: Option<u32>,
    today: NaiveDate,
) -> Result<Vec<WatchBox>, FetchError> {
    if date > today {
        return Err(FetchError::InvalidRequest(format!("date {} is in the future", date)));
    }

    if let Some(hour) = hour {
        if hour > 23 {
            return Err(FetchError::InvalidRequest(format!("invalid hour {}", hour)));
        }
        return fetch_snapshot(client, date, hour).await;
    }

    let snapshots = join_all((0..24).map(|hour| fetch_snapshot(client, date, hour))).await;
    let mut unique: BTreeMap<u32, WatchBox> = BTreeMap::new();
    for (hour, snapshot) in snapshots.into_iter().enumerate() {
        match snapshot {
            Ok(boxes) => {
                for watch_box in boxes {
                    unique.entry(watch_box.number).or_insert(watch_box);
                }
            }
            Err(e) => warn!("Archive snapshot {} {:02}00Z failed: {}", date, hour, e),
        }
    }
    debug!("{} archived watches on {}", unique.len(), date);
    Ok(unique.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SNAPSHOT: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {
          "type": "Feature",
          "geometry": {
            "type": "MultiPolygon",
            "coordinates": [[[[-98.0, 35.0], [-96.0, 35.0], [-96.0, 37.0], [-98.0, 35.0]]]]
          },
          "properties": {
            "type": "TOR",
            "number": 123,
            "is_pds": true,
            "max_hail_size": 2.0,
            "max_wind_gust_knots": 60.0,
            "issue": "2024-05-06T18:45:00Z",
            "expire": "2024-05-07T02:00:00Z"
          }
        },
        {
          "type": "Feature",
          "geometry": null,
          "properties": { "type": "SVR", "number": 124, "issue": "2024-05-06T19:00:00Z" }
        }
      ]
    }"#;

    #[test]
    fn test_archive_url() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(
            archive_url("https://mesonet.agron.iastate.edu", date, 7),
            "https://mesonet.agron.iastate.edu/json/spcwatch.py?ts=202405060700&fmt=geojson"
        );
    }

    #[test]
    fn test_parse_archive() {
        let boxes = parse_archive("test", SNAPSHOT).unwrap();
        assert_eq!(boxes.len(), 1);

        let watch_box = &boxes[0];
        assert_eq!(watch_box.number, 123);
        assert_eq!(watch_box.name, "PDS Tornado Watch 123");
        assert_eq!(watch_box.watch_type, "TOR");
        assert_eq!(watch_box.issued, Utc.with_ymd_and_hms(2024, 5, 6, 18, 45, 0).unwrap());
        assert_eq!(watch_box.max_hail_size_inches, Some(2.0));
        assert!((watch_box.max_wind_gust_mph.unwrap() - 69.06).abs() < 1e-9);
        assert!(watch_box.centroid.is_some());
    }

    #[test]
    fn test_parse_archive_date() {
        assert_eq!(
            parse_archive_date("2024-05-06").unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
        );
        assert!(matches!(
            parse_archive_date("2024-13-01"),
            Err(FetchError::InvalidRequest(_))
        ));
    }
}
