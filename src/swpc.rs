//! Space Weather Prediction Center feeds: planetary K-index, aurora
//! forecast, solar wind, 10.7 cm radio flux and the NOAA scales.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::model::{AuroraForecast, AuroraPoint, KIndex, RadioFlux, SolarWind, SpaceWeatherScales};

/// Path of the one-minute planetary K-index feed.
pub const K_INDEX_PATH: &str = "/json/planetary_k_index_1m.json";
/// Path of the OVATION aurora forecast.
pub const AURORA_PATH: &str = "/json/ovation_aurora_latest.json";
/// Path of the propagated solar wind feed.
pub const SOLAR_WIND_PATH: &str = "/products/geospace/propagated-solar-wind-1-hour.json";
/// Path of the 10.7 cm radio flux feed.
pub const RADIO_FLUX_PATH: &str = "/json/f107_cm_flux.json";
/// Path of the GOES integral proton flux feed.
pub const PROTON_FLUX_PATH: &str = "/json/goes/primary/integral-protons-6-hour.json";
/// Path of the GOES X-ray flux feed.
pub const XRAY_FLUX_PATH: &str = "/json/goes/primary/xrays-6-hour.json";

const PROTON_ENERGY: &str = ">=10 MeV";
const XRAY_BAND: &str = "0.1-0.8nm";

/// SWPC timestamps carry no offset and are UTC. Feeds differ in the date
/// separator and in fractional seconds.
fn parse_time_tag(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|t| t.and_utc())
}

fn deserialize_time_tag<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time_tag(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time tag '{}'", raw)))
}

fn decode<T: serde::de::DeserializeOwned>(url: &str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

fn latest_only<T>(mut samples: Vec<T>, all: bool) -> Vec<T> {
    if !all {
        samples = samples.pop().into_iter().collect();
    }
    samples
}

#[derive(Debug, Deserialize)]
struct KIndexSample {
    #[serde(deserialize_with = "deserialize_time_tag")]
    time_tag: DateTime<Utc>,
    kp_index: f64,
    #[serde(default)]
    estimated_kp: f64,
    #[serde(default)]
    kp: String,
}

/// Decode the K-index feed, sorted by time.
pub fn parse_k_index(url: &str, body: &str) -> Result<Vec<KIndex>, FetchError> {
    let samples: Vec<KIndexSample> = decode(url, body)?;

    let mut index: Vec<KIndex> = samples
        .into_iter()
        .map(|s| KIndex {
            time_tag: s.time_tag,
            kp_index: s.kp_index,
            estimated_kp: s.estimated_kp,
            kp: s.kp,
        })
        .collect();
    index.sort_by_key(|k| k.time_tag);
    Ok(index)
}

/// Fetch the planetary K-index: every sample when `all` is set, otherwise
/// only the latest.
pub async fn fetch_k_index(client: &HttpClient, all: bool) -> Result<Vec<KIndex>, FetchError> {
    let url = format!("{}{}", client.config().swpc_base_url, K_INDEX_PATH);
    let body = client.get_text(&url).await?;
    let index = parse_k_index(&url, &body)?;
    debug!("{} K-index samples", index.len());
    Ok(latest_only(index, all))
}

/// NOAA geomagnetic storm scale for a K-index value.
pub fn geomagnetic_storm_level(kp_index: f64) -> &'static str {
    match kp_index {
        k if k >= 9.0 => "G5",
        k if k >= 8.0 => "G4",
        k if k >= 7.0 => "G3",
        k if k >= 6.0 => "G2",
        k if k >= 5.0 => "G1",
        k if k >= 4.0 => "Active",
        k if k >= 2.0 => "Quiet",
        _ => "Very Quiet",
    }
}

/// NOAA solar radiation storm scale for a >=10 MeV proton flux in pfu.
pub fn solar_radiation_storm_level(proton_flux: f64) -> &'static str {
    match proton_flux {
        f if f >= 1e5 => "S5",
        f if f >= 1e4 => "S4",
        f if f >= 1e3 => "S3",
        f if f >= 1e2 => "S2",
        f if f >= 1e1 => "S1",
        _ => "None",
    }
}

/// NOAA radio blackout scale for a 0.1-0.8 nm X-ray flux in W/m2
/// (M1, M5, X1, X10 and X20 flares).
pub fn radio_blackout_level(xray_flux: f64) -> &'static str {
    match xray_flux {
        f if f >= 2e-3 => "R5",
        f if f >= 1e-3 => "R4",
        f if f >= 1e-4 => "R3",
        f if f >= 5e-5 => "R2",
        f if f >= 1e-5 => "R1",
        _ => "None",
    }
}

#[derive(Debug, Deserialize)]
struct AuroraFeed {
    #[serde(rename = "Observation Time", deserialize_with = "deserialize_time_tag")]
    observation_time: DateTime<Utc>,
    #[serde(rename = "Forecast Time", deserialize_with = "deserialize_time_tag")]
    forecast_time: DateTime<Utc>,
    /// `[longitude, latitude, probability]` triples.
    #[serde(default)]
    coordinates: Vec<Vec<f64>>,
}

/// Decode the OVATION aurora forecast. Malformed cells are skipped.
pub fn parse_aurora_forecast(url: &str, body: &str) -> Result<AuroraForecast, FetchError> {
    let feed: AuroraFeed = decode(url, body)?;
    let points = feed
        .coordinates
        .into_iter()
        .filter_map(|cell| match cell.as_slice() {
            [longitude, latitude, probability, ..] => Some(AuroraPoint {
                longitude: *longitude,
                latitude: *latitude,
                probability: (*probability).clamp(0.0, 100.0).round() as u8,
            }),
            _ => None,
        })
        .collect();

    Ok(AuroraForecast {
        observation_time: feed.observation_time,
        forecast_time: feed.forecast_time,
        points,
    })
}

/// Fetch the current aurora forecast grid.
pub async fn fetch_aurora_forecast(client: &HttpClient) -> Result<AuroraForecast, FetchError> {
    let url = format!("{}{}", client.config().swpc_base_url, AURORA_PATH);
    let body = client.get_text(&url).await?;
    let forecast = parse_aurora_forecast(&url, &body)?;
    debug!("{} aurora grid cells", forecast.points.len());
    Ok(forecast)
}

fn cell_number(cell: Option<&serde_json::Value>) -> Option<f64> {
    match cell? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decode the solar wind table, sorted by time.
///
/// The first row names the columns; values are strings or null. Rows
/// without a readable time are skipped.
pub fn parse_solar_wind(url: &str, body: &str) -> Result<Vec<SolarWind>, FetchError> {
    let rows: Vec<Vec<serde_json::Value>> = decode(url, body)?;
    let Some((header, rows)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let column = |name: &str| header.iter().position(|h| h.as_str() == Some(name));
    let (Some(time), speed, density, temperature) =
        (column("time_tag"), column("speed"), column("density"), column("temperature"))
    else {
        warn!("Solar wind table from {} has no time column", url);
        return Ok(Vec::new());
    };

    let mut samples: Vec<SolarWind> = rows
        .iter()
        .filter_map(|row| {
            let time_tag = row.get(time).and_then(|v| v.as_str()).and_then(parse_time_tag)?;
            let value = |index: Option<usize>| cell_number(index.and_then(|i| row.get(i)));
            Some(SolarWind {
                time_tag,
                speed: value(speed),
                density: value(density),
                temperature: value(temperature),
            })
        })
        .collect();
    samples.sort_by_key(|s| s.time_tag);
    Ok(samples)
}

/// Fetch propagated solar wind: every sample when `all` is set, otherwise
/// only the latest.
pub async fn fetch_solar_wind(client: &HttpClient, all: bool) -> Result<Vec<SolarWind>, FetchError> {
    let url = format!("{}{}", client.config().swpc_base_url, SOLAR_WIND_PATH);
    let body = client.get_text(&url).await?;
    let samples = parse_solar_wind(&url, &body)?;
    debug!("{} solar wind samples", samples.len());
    Ok(latest_only(samples, all))
}

#[derive(Debug, Deserialize)]
struct RadioFluxSample {
    #[serde(deserialize_with = "deserialize_time_tag")]
    time_tag: DateTime<Utc>,
    #[serde(default)]
    frequency: Option<f64>,
    #[serde(default)]
    flux: Option<f64>,
}

/// Fetch 10.7 cm radio flux observations: every observation when `all` is
/// set, otherwise only the latest. Observations without a flux value are
/// dropped.
pub async fn fetch_radio_flux(client: &HttpClient, all: bool) -> Result<Vec<RadioFlux>, FetchError> {
    let url = format!("{}{}", client.config().swpc_base_url, RADIO_FLUX_PATH);
    let samples: Vec<RadioFluxSample> = client.get_json(&url).await?;
    let mut flux: Vec<RadioFlux> = samples
        .into_iter()
        .filter_map(|s| {
            Some(RadioFlux {
                time_tag: s.time_tag,
                frequency: s.frequency.unwrap_or(2800.0),
                flux: s.flux?,
            })
        })
        .collect();
    flux.sort_by_key(|f| f.time_tag);
    debug!("{} radio flux observations", flux.len());
    Ok(latest_only(flux, all))
}

/// One GOES flux sample, shared by the proton and X-ray feeds.
#[derive(Debug, Deserialize)]
struct GoesSample {
    #[serde(deserialize_with = "deserialize_time_tag")]
    time_tag: DateTime<Utc>,
    #[serde(default)]
    flux: Option<f64>,
    #[serde(default)]
    energy: String,
}

/// The latest flux of one energy band, or zero when the band is absent.
fn latest_flux(samples: Vec<GoesSample>, energy: &str) -> f64 {
    samples
        .into_iter()
        .filter(|s| s.energy == energy)
        .filter_map(|s| Some((s.time_tag, s.flux?)))
        .max_by_key(|(time, _)| *time)
        .map(|(_, flux)| flux)
        .unwrap_or(0.0)
}

/// Fetch the current geomagnetic storm, solar radiation storm and radio
/// blackout levels.
pub async fn fetch_space_weather_scales(client: &HttpClient) -> Result<SpaceWeatherScales, FetchError> {
    let base_url = &client.config().swpc_base_url;
    let proton_url = format!("{}{}", base_url, PROTON_FLUX_PATH);
    let xray_url = format!("{}{}", base_url, XRAY_FLUX_PATH);

    let (k_index, protons, xrays) = tokio::join!(
        fetch_k_index(client, false),
        client.get_json::<Vec<GoesSample>>(&proton_url),
        client.get_json::<Vec<GoesSample>>(&xray_url),
    );

    let kp_index = k_index?.first().map(|k| k.kp_index).unwrap_or(0.0);
    let proton_flux = latest_flux(protons?, PROTON_ENERGY);
    let xray_flux = latest_flux(xrays?, XRAY_BAND);

    Ok(SpaceWeatherScales {
        kp_index,
        geomagnetic_storm: geomagnetic_storm_level(kp_index).to_string(),
        proton_flux,
        solar_radiation_storm: solar_radiation_storm_level(proton_flux).to_string(),
        xray_flux,
        radio_blackout: radio_blackout_level(xray_flux).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"[
      {"time_tag": "2024-05-10T17:01:00", "kp_index": 8, "estimated_kp": 8.33, "kp": "8P"},
      {"time_tag": "2024-05-10T17:00:00", "kp_index": 7, "estimated_kp": 7.67, "kp": "8M"}
    ]"#;

    #[test]
    fn test_parse_k_index_sorted() {
        let index = parse_k_index("test", FEED).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].time_tag, Utc.with_ymd_and_hms(2024, 5, 10, 17, 0, 0).unwrap());
        assert_eq!(index[1].kp, "8P");
        assert_eq!(index[1].kp_index, 8.0);
    }

    #[test]
    fn test_parse_k_index_bad_time() {
        let err = parse_k_index("test", r#"[{"time_tag": "yesterday", "kp_index": 1}]"#).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[test]
    fn test_geomagnetic_storm_level() {
        assert_eq!(geomagnetic_storm_level(0.3), "Very Quiet");
        assert_eq!(geomagnetic_storm_level(4.0), "Active");
        assert_eq!(geomagnetic_storm_level(5.67), "G1");
        assert_eq!(geomagnetic_storm_level(9.0), "G5");
    }

    #[test]
    fn test_solar_radiation_and_radio_blackout_levels() {
        assert_eq!(solar_radiation_storm_level(0.4), "None");
        assert_eq!(solar_radiation_storm_level(10.0), "S1");
        assert_eq!(solar_radiation_storm_level(2500.0), "S3");
        assert_eq!(solar_radiation_storm_level(1e5), "S5");

        assert_eq!(radio_blackout_level(3e-6), "None");
        assert_eq!(radio_blackout_level(1.2e-5), "R1");
        assert_eq!(radio_blackout_level(5e-5), "R2");
        assert_eq!(radio_blackout_level(1.5e-3), "R4");
        assert_eq!(radio_blackout_level(2.5e-3), "R5");
    }

    #[test]
    fn test_parse_time_tag_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 10, 16, 0, 0).unwrap();
        assert_eq!(parse_time_tag("2024-05-10 16:00:00.000"), Some(expected));
        assert_eq!(parse_time_tag("2024-05-10T16:00:00Z"), Some(expected));
        assert_eq!(parse_time_tag("2024-05-10T16:00:00"), Some(expected));
        assert_eq!(parse_time_tag("May 10"), None);
    }

    #[test]
    fn test_parse_aurora_forecast() {
        let body = r#"{
          "Observation Time": "2024-05-10T17:01:00Z",
          "Forecast Time": "2024-05-10T17:45:00Z",
          "Data Format": "[Longitude, Latitude, Aurora]",
          "coordinates": [[0, 60, 12], [262, 45, 80], [263, 45, 78], [1]]
        }"#;
        let forecast = parse_aurora_forecast("test", body).unwrap();
        assert_eq!(forecast.points.len(), 3);
        assert_eq!(forecast.forecast_time, Utc.with_ymd_and_hms(2024, 5, 10, 17, 45, 0).unwrap());
        assert_eq!(forecast.probability_at(45.0, -98.0), Some(80));
    }

    #[test]
    fn test_parse_solar_wind_table() {
        let body = r#"[
          ["time_tag", "speed", "density", "temperature", "bx"],
          ["2024-05-10 17:00:00.000", "702.1", "12.5", null, "1.2"],
          ["2024-05-10 16:00:00.000", "652.4", "8.31", "412345", "0.3"],
          [null, "1", "1", "1", "1"]
        ]"#;
        let samples = parse_solar_wind("test", body).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].speed, Some(652.4));
        assert_eq!(samples[1].temperature, None);
        assert_eq!(samples[1].density, Some(12.5));

        assert!(parse_solar_wind("test", "[]").unwrap().is_empty());
        assert!(parse_solar_wind("test", r#"[["speed"], ["1"]]"#).unwrap().is_empty());
    }

    #[test]
    fn test_latest_flux_picks_band() {
        let samples: Vec<GoesSample> = serde_json::from_str(
            r#"[
              {"time_tag": "2024-05-10T17:00:00Z", "flux": 15.0, "energy": ">=10 MeV"},
              {"time_tag": "2024-05-10T17:05:00Z", "flux": 120.0, "energy": ">=10 MeV"},
              {"time_tag": "2024-05-10T17:10:00Z", "flux": 9000.0, "energy": ">=100 MeV"},
              {"time_tag": "2024-05-10T17:10:00Z", "flux": null, "energy": ">=10 MeV"}
            ]"#,
        )
        .unwrap();
        assert_eq!(latest_flux(samples, PROTON_ENERGY), 120.0);
        assert_eq!(latest_flux(Vec::new(), XRAY_BAND), 0.0);
    }
}
