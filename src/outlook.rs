//! SPC convective outlooks.
//!
//! Outlooks are published as GeoJSON, one feature collection per product
//! (categorical, tornado, wind, hail, probabilistic), each feature being
//! one risk level with its polygons. The latest issuance of each day lives
//! under `/products/outlook/`; days 4-8 under `/products/exper/day4-8/`.
//! Earlier issuances of days 1-3 are kept in a per-year archive.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geo_types::MultiPolygon;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::model::{CategoricalRisk, OutlookKind, OutlookRisk, RiskArea};
use crate::nws::{Geometry, RawGeometry};

/// First day SPC archived outlooks as GeoJSON.
pub fn first_archived_outlook() -> NaiveDate {
    NaiveDate::from_ymd_opt(2014, 10, 22).unwrap_or(NaiveDate::MIN)
}

/// Issuance times (UTC, `HHMM`) of the archived day 1-3 outlooks.
pub fn issuance_times(day: u8) -> &'static [&'static str] {
    match day {
        1 => &["0100", "1200", "1300", "1630", "2000"],
        2 => &["0600", "1730"],
        3 => &["0730"],
        _ => &[],
    }
}

#[derive(Debug, Deserialize)]
struct OutlookCollection {
    #[serde(default)]
    features: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OutlookFeature {
    geometry: Option<RawGeometry>,
    properties: OutlookProperties,
}

#[derive(Debug, Deserialize)]
struct OutlookProperties {
    #[serde(rename = "DN", default)]
    dn: f64,
    #[serde(rename = "VALID", deserialize_with = "deserialize_outlook_time")]
    valid: DateTime<Utc>,
    #[serde(rename = "EXPIRE", deserialize_with = "deserialize_outlook_time")]
    expire: DateTime<Utc>,
    #[serde(rename = "ISSUE", deserialize_with = "deserialize_outlook_time")]
    issue: DateTime<Utc>,
    #[serde(rename = "LABEL", default)]
    label: String,
    #[serde(rename = "LABEL2", default)]
    label2: String,
    #[serde(default)]
    stroke: String,
    #[serde(default)]
    fill: String,
}

/// Outlook times are `YYYYMMDDHHMM` in UTC; a few older products drop the
/// minutes.
fn deserialize_outlook_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_outlook_time(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid outlook time '{}'", raw)))
}

/// Parse an outlook timestamp such as `"202405061200"`.
pub fn parse_outlook_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let text = match raw.len() {
        12 => raw.to_string(),
        10 => format!("{}00", raw),
        _ => return None,
    };
    NaiveDateTime::parse_from_str(&text, "%Y%m%d%H%M")
        .ok()
        .map(|t| t.and_utc())
}

/// Resolve the risk an outlook feature carries.
///
/// Probabilistic labels are fractions ("0.05"), while `DN` is either the
/// same fraction or a whole percentage depending on the product.
fn risk_for(kind: OutlookKind, props: &OutlookProperties) -> Option<OutlookRisk> {
    let label = props.label.trim();
    if label.eq_ignore_ascii_case("SIGN") || label.to_ascii_uppercase().starts_with("CIG") {
        return Some(OutlookRisk::Significant);
    }

    if kind == OutlookKind::Categorical {
        return CategoricalRisk::from_label(label)
            .or_else(|| CategoricalRisk::from_dn(props.dn.round() as u8))
            .map(OutlookRisk::Categorical);
    }

    let fraction = label.parse::<f64>().ok().unwrap_or(props.dn);
    let percent = (if fraction < 1.0 { fraction * 100.0 } else { fraction }).round();
    if !(1.0..=100.0).contains(&percent) {
        return None;
    }
    Some(OutlookRisk::Probability(percent as u8))
}

fn risk_area_from_feature(kind: OutlookKind, feature: OutlookFeature) -> Result<Option<RiskArea>, String> {
    let props = feature.properties;
    let area = match feature.geometry {
        Some(raw) => match raw.decode().map_err(|e| e.to_string())? {
            Some(Geometry::Polygon(p)) => MultiPolygon(vec![p]),
            Some(Geometry::MultiPolygon(mp)) => mp,
            None => MultiPolygon(vec![]),
        },
        None => MultiPolygon(vec![]),
    };
    // "No thunder" days publish placeholder features without polygons.
    if area.0.is_empty() {
        return Ok(None);
    }

    let risk = risk_for(kind, &props).ok_or_else(|| format!("unknown risk '{}' (DN {})", props.label, props.dn))?;
    Ok(Some(RiskArea {
        kind,
        risk,
        label: props.label,
        description: props.label2,
        valid: props.valid,
        expires: props.expire,
        issued: props.issue,
        stroke: props.stroke,
        fill: props.fill,
        area,
    }))
}

/// Decode an outlook feature collection, skipping malformed features.
pub fn parse_outlook(url: &str, body: &str, kind: OutlookKind) -> Result<Vec<RiskArea>, FetchError> {
    let collection: OutlookCollection = serde_json::from_str(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<OutlookFeature>(value)
                .map_err(|e| e.to_string())
                .and_then(|feature| risk_area_from_feature(kind, feature));
            match parsed {
                Ok(area) => area,
                Err(e) => {
                    warn!("Skipping outlook area from {}: {}", url, e);
                    None
                }
            }
        })
        .collect())
}

fn check_day(day: u8, kind: OutlookKind) -> Result<(), FetchError> {
    if kind.days().contains(&day) {
        Ok(())
    } else {
        Err(FetchError::InvalidRequest(format!(
            "no day {} {:?} outlook (issued for days {}-{})",
            day,
            kind,
            kind.days().start(),
            kind.days().end()
        )))
    }
}

/// URL of the latest outlook for a forecast day.
pub fn outlook_url(base_url: &str, day: u8, kind: OutlookKind) -> Result<String, FetchError> {
    check_day(day, kind)?;
    if day >= 4 {
        return Ok(format!("{}/products/exper/day4-8/day{}prob.nolyr.geojson", base_url, day));
    }
    Ok(format!(
        "{}/products/outlook/day{}otlk_{}.nolyr.geojson",
        base_url,
        day,
        kind.suffix()
    ))
}

/// URL of an archived day 1-3 outlook issuance.
pub fn archived_outlook_url(
    base_url: &str,
    date: NaiveDate,
    day: u8,
    issuance: &str,
    kind: OutlookKind,
) -> Result<String, FetchError> {
    check_day(day, kind)?;
    if day > 3 {
        return Err(FetchError::InvalidRequest(format!("day {} outlooks are not archived", day)));
    }

    let first = first_archived_outlook();
    if date < first {
        return Err(FetchError::InvalidRequest(format!(
            "outlooks before {} are not archived as GeoJSON",
            first
        )));
    }

    let issuance = issuance.trim();
    if !issuance_times(day).contains(&issuance) {
        return Err(FetchError::InvalidRequest(format!(
            "no {}Z issuance of the day {} outlook (expected one of {:?})",
            issuance,
            day,
            issuance_times(day)
        )));
    }

    Ok(format!(
        "{}/products/outlook/archive/{}/day{}otlk_{}_{}_{}.nolyr.geojson",
        base_url,
        date.format("%Y"),
        day,
        date.format("%Y%m%d"),
        issuance,
        kind.suffix()
    ))
}

async fn fetch(client: &HttpClient, url: &str, kind: OutlookKind) -> Result<Vec<RiskArea>, FetchError> {
    let body = client.get_text(url).await?;
    let areas = parse_outlook(url, &body, kind)?;
    debug!("{} risk areas in {}", areas.len(), url);
    Ok(areas)
}

/// Fetch the latest outlook for a forecast day.
pub async fn fetch_outlook(client: &HttpClient, day: u8, kind: OutlookKind) -> Result<Vec<RiskArea>, FetchError> {
    let url = outlook_url(&client.config().spc_base_url, day, kind)?;
    fetch(client, &url, kind).await
}

/// Fetch an archived day 1-3 outlook issuance.
pub async fn fetch_archived_outlook(
    client: &HttpClient,
    date: NaiveDate,
    day: u8,
    issuance: &str,
    kind: OutlookKind,
    today: NaiveDate,
) -> Result<Vec<RiskArea>, FetchError> {
    if date > today {
        return Err(FetchError::InvalidRequest(format!("date {} is in the future", date)));
    }
    let url = archived_outlook_url(&client.config().spc_base_url, date, day, issuance, kind)?;
    fetch(client, &url, kind).await
}
