//! National Hurricane Center active storms and tropical weather outlooks.
//!
//! The active storms document has one folder per cyclone. Each folder
//! carries the advisory attributes as namespaced extended data and links to
//! per-storm KMZ products; the forecast cone and the forecast track are read
//! from those.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use futures::future::join_all;
use geo_types::{Coord, Polygon};
use regex::Regex;
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::kml::{self, NetworkLink, Placemark};
use crate::model::{Basin, Disturbance, ForecastPoint, TropicalCyclone};
use crate::parser::{parse_leading_number, strip_html};
use crate::spc::absolute_url;

/// Path of the active storms document.
pub const ACTIVE_STORMS_PATH: &str = "/gis/kml/nhc_active.kml";

const CONE_LINK: &str = "Cone of Uncertainty";
const TRACK_LINK: &str = "Track Forecast";

static VALID_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)Valid at:[ \t]*(.+?)[ \t]*$").expect("static regex is valid"));

static MAX_WIND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Maximum Wind:\s*(\d+)\s*knots\s*\(\s*(\d+)\s*mph\s*\)").expect("static regex is valid")
});

static WIND_GUSTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Wind Gusts:\s*(\d+)\s*knots\s*\(\s*(\d+)\s*mph\s*\)").expect("static regex is valid")
});

/// URL of a basin's graphical tropical weather outlook.
pub fn disturbances_url(base_url: &str, basin: Basin) -> String {
    format!("{}/xgtwo/gtwo_{}.kmz", base_url, basin.code())
}

/// A cyclone read from the active storms document with the product links
/// of its folder.
#[derive(Debug, Clone, PartialEq)]
pub struct StormFolder {
    pub cyclone: TropicalCyclone,
    pub links: Vec<NetworkLink>,
}

impl StormFolder {
    fn link(&self, name: &str) -> Option<&NetworkLink> {
        self.links.iter().find(|link| link.name.eq_ignore_ascii_case(name))
    }
}

fn leading_u32(value: &str) -> Option<u32> {
    parse_leading_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n.round() as u32)
}

fn cyclone_from_data(data: &[(String, String)]) -> Option<TropicalCyclone> {
    let value = |name: &str| {
        data.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    };
    let name = value("name").filter(|n| !n.is_empty())?;

    let center = match (
        value("centerLat").and_then(|v| v.parse::<f64>().ok()),
        value("centerLon").and_then(|v| v.parse::<f64>().ok()),
    ) {
        (Some(y), Some(x)) => Some(Coord { x, y }),
        _ => None,
    };

    Some(TropicalCyclone {
        id: value("atcfID").unwrap_or_default().to_string(),
        name: name.to_string(),
        classification: value("type").unwrap_or_default().to_string(),
        wallet: value("wallet").unwrap_or_default().to_string(),
        center,
        advisory_time: value("dateTime").unwrap_or_default().to_string(),
        movement: value("movement").unwrap_or_default().to_string(),
        min_pressure_mb: value("minimumPressure").and_then(leading_u32),
        max_sustained_wind_mph: value("maxSustainedWind").and_then(leading_u32),
        headline: value("headline").unwrap_or_default().to_string(),
        cone: None,
        forecast: Vec::new(),
    })
}

/// Read the storm folders of the active storms document.
///
/// Folders without a storm name are not storm folders and are skipped.
pub fn parse_active_storms(document: &str) -> Vec<StormFolder> {
    kml::folders(document)
        .into_iter()
        .filter_map(|folder| {
            let data = kml::extended_data(folder);
            let cyclone = cyclone_from_data(&data)?;
            Some(StormFolder {
                cyclone,
                links: kml::network_links(folder),
            })
        })
        .collect()
}

/// The forecast cone polygon of a cone document.
pub fn parse_cone(document: &str) -> Option<Polygon<f64>> {
    kml::placemarks(document)
        .into_iter()
        .find(Placemark::is_polygon)
        .map(|placemark| placemark.polygon())
}

/// Forecast classification for a track point style.
///
/// The initial point carries no intensity in its style, so its
/// classification comes from the storm title in the description.
pub fn forecast_classification(style_url: &str, description: &str) -> String {
    let classification = match style_url {
        "m_point" => "Major Hurricane",
        "h_point" => "Hurricane",
        "s_point" => "Tropical Storm",
        "d_point" => "Tropical Depression",
        "l_point" => "Low",
        "xm_point" | "xh_point" | "xs_point" | "xd_point" => "Post/Potential Tropical Cyclone",
        _ => {
            let title = description.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
            if title.contains("Hurricane") {
                "Hurricane"
            } else if title.contains("Storm") {
                "Tropical Storm"
            } else if title.contains("Depression") {
                "Tropical Depression"
            } else {
                ""
            }
        }
    };
    classification.to_string()
}

fn knots_and_mph(re: &Regex, text: &str) -> (Option<u32>, Option<u32>) {
    match re.captures(text) {
        Some(caps) => (caps[1].parse().ok(), caps[2].parse().ok()),
        None => (None, None),
    }
}

/// Forecast positions of a track forecast document, in document order.
///
/// Only point placemarks are read; the connecting line is ignored.
pub fn parse_forecast_track(document: &str) -> Vec<ForecastPoint> {
    kml::placemarks(document)
        .into_iter()
        .filter(|placemark| placemark.coordinates.len() == 1)
        .map(|placemark| {
            let text = strip_html(&placemark.description);
            let (max_wind_kt, max_wind_mph) = knots_and_mph(&MAX_WIND, &text);
            let (gusts_kt, gusts_mph) = knots_and_mph(&WIND_GUSTS, &text);
            ForecastPoint {
                position: placemark.coordinates[0],
                classification: forecast_classification(&placemark.style_url, &text),
                valid: VALID_AT
                    .captures(&text)
                    .map(|caps| caps[1].to_string())
                    .unwrap_or_default(),
                max_wind_kt,
                max_wind_mph,
                gusts_kt,
                gusts_mph,
            }
        })
        .collect()
}

/// Read the disturbances of a tropical weather outlook document.
///
/// A disturbance is published as a point placemark and an area placemark
/// sharing an index; both are merged into one entry. Placemarks without an
/// index (legends, labels) are skipped.
pub fn parse_disturbances(document: &str) -> Vec<Disturbance> {
    let mut by_index: BTreeMap<u8, Disturbance> = BTreeMap::new();

    for placemark in kml::placemarks(document) {
        let Some(raw_index) = placemark.value("Disturbance") else {
            continue;
        };
        let Ok(index) = raw_index.trim().parse::<u8>() else {
            warn!("Skipping disturbance with index '{}'", raw_index);
            continue;
        };

        let entry = by_index.entry(index).or_insert_with(|| Disturbance {
            index,
            ..Disturbance::default()
        });
        for (field, name) in [
            (&mut entry.two_day_chance, "2day_percentage"),
            (&mut entry.two_day_category, "2day_category"),
            (&mut entry.seven_day_chance, "7day_percentage"),
            (&mut entry.seven_day_category, "7day_category"),
            (&mut entry.discussion, "Discussion"),
        ] {
            if let Some(value) = placemark.value(name).map(str::trim)
                && !value.is_empty()
            {
                *field = value.to_string();
            }
        }

        if placemark.is_polygon() {
            entry.area = Some(placemark.polygon());
        } else if let Some(position) = placemark.coordinates.first() {
            entry.position = Some(*position);
        }
    }

    by_index.into_values().collect()
}

async fn linked_document(client: &HttpClient, link: Option<&NetworkLink>) -> Option<String> {
    let url = absolute_url(&client.config().nhc_base_url, &link?.href);
    match client.get_kmz_document(&url).await {
        Ok(document) => Some(document),
        Err(e) => {
            warn!("Failed to fetch {}: {}", url, e);
            None
        }
    }
}

async fn complete_cyclone(client: &HttpClient, folder: StormFolder) -> TropicalCyclone {
    let (cone, track) = tokio::join!(
        linked_document(client, folder.link(CONE_LINK)),
        linked_document(client, folder.link(TRACK_LINK)),
    );
    let mut cyclone = folder.cyclone;
    cyclone.cone = cone.as_deref().and_then(parse_cone);
    cyclone.forecast = track.as_deref().map(parse_forecast_track).unwrap_or_default();
    cyclone
}

/// Fetch the active tropical cyclones with their forecast cones and tracks.
///
/// A cyclone whose cone or track cannot be fetched is still returned,
/// without that product.
pub async fn fetch_active_tropical_cyclones(client: &HttpClient) -> Result<Vec<TropicalCyclone>, FetchError> {
    let url = format!("{}{}", client.config().nhc_base_url, ACTIVE_STORMS_PATH);
    let document = client.get_text(&url).await?;
    let folders = parse_active_storms(&document);
    debug!("{} active tropical cyclones", folders.len());

    Ok(join_all(folders.into_iter().map(|folder| complete_cyclone(client, folder))).await)
}

/// Fetch the disturbances of a basin's tropical weather outlook.
pub async fn fetch_tropical_disturbances(client: &HttpClient, basin: Basin) -> Result<Vec<Disturbance>, FetchError> {
    let url = disturbances_url(&client.config().nhc_base_url, basin);
    let document = client.get_kmz_document(&url).await?;
    let disturbances = parse_disturbances(&document);
    debug!("{} disturbances in {:?}", disturbances.len(), basin);
    Ok(disturbances)
}
