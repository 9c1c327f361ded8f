//! Storm Prediction Center products.
//!
//! Active watch boxes and mesoscale discussions are published as a KMZ
//! index whose links point at one KMZ per product. Watch hazard
//! probabilities are scraped from the per-watch HTML page.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use regex::Regex;
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::kml::{self, Placemark};
use crate::model::{MesoscaleDiscussion, WatchBox, WatchHazard, WatchHazards, centroid};
use crate::parser::{ParseError, ParseResult, parse_md_description, parse_watch_box_name};

/// Path of the active watch index.
pub const ACTIVE_WATCHES_PATH: &str = "/products/watch/ActiveWW.kmz";

/// Path of the active mesoscale discussion index.
pub const ACTIVE_MDS_PATH: &str = "/products/md/ActiveMD.kmz";

static RISK_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b([^>]*\bclass\s*=\s*["'][^"']*\bwblack\b[^"']*["'][^>]*)>"#)
        .expect("static regex is valid")
});

static TITLE_PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btitle\s*=\s*["']\s*(\d{1,3})\s*%"#).expect("static regex is valid")
});

static RISK_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<table\b[^>]*\bwidth\s*=\s*["']?529"#).expect("static regex is valid"));

const HAZARD_LABELS: [&str; 6] = [
    "Probability of 2 or more tornadoes",
    "Probability of 1 or more strong (EF2-EF5) tornadoes",
    "Probability of 10 or more severe wind events",
    "Probability of 1 or more wind events >= 65 knots",
    "Probability of 10 or more severe hail events",
    "Probability of 1 or more hailstones >= 2 inches",
];

/// Qualitative level SPC assigns to a watch probability.
pub fn risk_level(chance: u8) -> &'static str {
    match chance {
        0..=20 => "Low",
        21..=60 => "Moderate",
        _ => "High",
    }
}

/// URL of the watch probability page for a watch number and year.
pub fn watch_risks_url(base_url: &str, number: u32, year: i32) -> String {
    format!("{}/products/watch/{}/ww{:04}.html", base_url, year, number)
}

/// Parse a watch probability page.
///
/// Returns `None` for an empty page and the pending placeholder when the
/// probability table has not been published yet.
pub fn parse_watch_risks(html: &str) -> ParseResult<Option<WatchHazards>> {
    if html.trim().is_empty() {
        return Ok(None);
    }
    if !RISK_TABLE.is_match(html) {
        return Ok(Some(WatchHazards::pending()));
    }

    let chances = RISK_ANCHOR
        .captures_iter(html)
        .filter_map(|anchor| anchor.get(1).and_then(|attrs| TITLE_PERCENT.captures(attrs.as_str())))
        .map(|title| {
            title[1]
                .parse::<u8>()
                .map_err(|_| ParseError::InvalidFormat(format!("hazard chance '{}'", &title[1])))
        })
        .collect::<ParseResult<Vec<u8>>>()?;

    if chances.len() < HAZARD_LABELS.len() {
        return Err(ParseError::InvalidFormat(format!(
            "expected {} hazard probabilities, found {}",
            HAZARD_LABELS.len(),
            chances.len()
        )));
    }

    let hazard = |i: usize| WatchHazard::new(chances[i], format!("{}: {}", HAZARD_LABELS[i], risk_level(chances[i])));
    Ok(Some(WatchHazards {
        message: String::new(),
        is_pds: html.to_lowercase().contains("particularly dangerous situation"),
        tornadoes: hazard(0),
        ef2_plus_tornadoes: hazard(1),
        severe_wind: hazard(2),
        wind_65kt_plus: hazard(3),
        severe_hail: hazard(4),
        hail_2in_plus: hazard(5),
    }))
}

/// Fetch the hazard probabilities of a watch.
pub async fn fetch_watch_risks(client: &HttpClient, number: u32, year: i32) -> Result<Option<WatchHazards>, FetchError> {
    let url = watch_risks_url(&client.config().spc_base_url, number, year);
    let html = match client.get_text(&url).await {
        Ok(html) => html,
        Err(FetchError::Status { status: 404, .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    Ok(parse_watch_risks(&html)?)
}

pub(crate) fn absolute_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href.trim_start_matches('/'))
    }
}

/// Fetch an index KMZ and every product KMZ it links to.
///
/// Products that fail to download are logged and skipped.
async fn fetch_linked_documents(client: &HttpClient, index_path: &str) -> Result<Vec<String>, FetchError> {
    let base_url = &client.config().spc_base_url;
    let index = client.get_kmz_document(&format!("{}{}", base_url, index_path)).await?;
    let urls: Vec<String> = kml::link_hrefs(&index)
        .iter()
        .map(|href| absolute_url(base_url, href))
        .collect();
    debug!("{} linked products in {}", urls.len(), index_path);

    let documents = join_all(urls.iter().map(|url| client.get_kmz_document(url))).await;
    Ok(documents
        .into_iter()
        .zip(&urls)
        .filter_map(|(result, url)| match result {
            Ok(document) => Some(document),
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                None
            }
        })
        .collect())
}

fn watch_box_from_placemark(placemark: Placemark, now: DateTime<Utc>) -> ParseResult<WatchBox> {
    let name = parse_watch_box_name(&placemark.name, now)?;
    let issued = name.issued.ok_or(ParseError::MissingField("issued"))?;
    if placemark.coordinates.is_empty() {
        return Err(ParseError::MissingField("coordinates"));
    }

    Ok(WatchBox {
        number: name.number,
        watch_type: placemark.style_url.clone(),
        is_pds: name.is_pds,
        issued,
        expires: name.expires,
        centroid: centroid(&placemark.coordinates),
        polygon: placemark.polygon(),
        name: placemark.name,
        max_hail_size_inches: None,
        max_wind_gust_mph: None,
    })
}

/// Read watch boxes out of per-watch KML documents.
pub fn watch_boxes_from_documents(documents: &[String], now: DateTime<Utc>) -> Vec<WatchBox> {
    documents
        .iter()
        .flat_map(|document| kml::placemarks(document))
        .filter_map(|placemark| {
            let label = placemark.name.clone();
            match watch_box_from_placemark(placemark, now) {
                Ok(watch_box) => Some(watch_box),
                Err(e) => {
                    warn!("Skipping watch box '{}': {}", label, e);
                    None
                }
            }
        })
        .collect()
}

/// Fetch active watch boxes.
pub async fn fetch_active_watch_boxes(client: &HttpClient, now: DateTime<Utc>) -> Result<Vec<WatchBox>, FetchError> {
    let documents = fetch_linked_documents(client, ACTIVE_WATCHES_PATH).await?;
    Ok(watch_boxes_from_documents(&documents, now))
}

fn discussion_from_placemark(placemark: Placemark) -> ParseResult<MesoscaleDiscussion> {
    let parsed = parse_md_description(&placemark.description)?;
    Ok(MesoscaleDiscussion {
        number: parsed.number,
        full_name: parsed.full_name,
        url: parsed.url,
        issued: parsed.issued,
        issued_display: parsed.issued_display,
        areas_affected: parsed.areas_affected,
        concerning: parsed.concerning,
        polygon: placemark.polygon(),
    })
}

/// Read mesoscale discussions out of per-product KML documents.
pub fn discussions_from_documents(documents: &[String]) -> Vec<MesoscaleDiscussion> {
    documents
        .iter()
        .flat_map(|document| kml::placemarks(document))
        .filter_map(|placemark| {
            let label = placemark.name.clone();
            match discussion_from_placemark(placemark) {
                Ok(md) => Some(md),
                Err(e) => {
                    warn!("Skipping mesoscale discussion '{}': {}", label, e);
                    None
                }
            }
        })
        .collect()
}

/// Fetch active mesoscale discussions.
pub async fn fetch_active_mesoscale_discussions(client: &HttpClient) -> Result<Vec<MesoscaleDiscussion>, FetchError> {
    let documents = fetch_linked_documents(client, ACTIVE_MDS_PATH).await?;
    Ok(discussions_from_documents(&documents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn risk_page(chances: &[u8], pds: bool) -> String {
        let anchors: String = chances
            .iter()
            .map(|c| format!(r#"<td><a class="wblack" href="watch.html" title="{}% probability">{}</a></td>"#, c, risk_level(*c)))
            .collect();
        let banner = if pds { "<b>THIS IS A PARTICULARLY DANGEROUS SITUATION</b>" } else { "" };
        format!(
            r#"<html><body>{}<table width="529" cellspacing="0" cellpadding="0" align="center"><tr>{}</tr></table></body></html>"#,
            banner, anchors
        )
    }

    #[test]
    fn test_watch_risks_url() {
        assert_eq!(
            watch_risks_url("https://www.spc.noaa.gov", 42, 2024),
            "https://www.spc.noaa.gov/products/watch/2024/ww0042.html"
        );
    }

    #[test]
    fn test_parse_watch_risks() {
        let hazards = parse_watch_risks(&risk_page(&[80, 60, 30, 10, 50, 20], true)).unwrap().unwrap();
        assert!(hazards.is_pds);
        assert_eq!(hazards.tornadoes.chance, 80);
        assert_eq!(hazards.ef2_plus_tornadoes.chance, 60);
        assert_eq!(hazards.severe_wind.chance, 30);
        assert_eq!(hazards.wind_65kt_plus.chance, 10);
        assert_eq!(hazards.severe_hail.chance, 50);
        assert_eq!(hazards.hail_2in_plus.chance, 20);
        assert!(hazards.tornadoes.label.ends_with("High"));
        assert!(hazards.hail_2in_plus.label.ends_with("Low"));
    }

    const PUBLISHED_PAGE: &str = r#"<html>
<head><title>Storm Prediction Center Tornado Watch 174</title></head>
<body>
<table width="100%"><tr><td class="zz">Tornado Watch 174</td></tr></table>
<table width="529" border="0" cellspacing="0" cellpadding="2">
<tr><td class="wblack">Probability of 2 or more tornadoes</td>
<td class="wblack" align="right"><a class="wblack" href="/misc/about.html#Watch%20Probabilities" title="70% probability">High (70%)</a></td></tr>
<tr><td class="wblack">Probability of 1 or more strong (EF2-EF5) tornadoes</td>
<td class="wblack" align="right"><A HREF="/misc/about.html#Watch%20Probabilities" TITLE='40%' CLASS="wblack">Moderate (40%)</A></td></tr>
<tr><td class="wblack">Probability of 10 or more severe wind events</td>
<td class="wblack" align="right"><a
  class="wblack"
  href="/misc/about.html#Watch%20Probabilities"
  title="30%">Moderate (30%)</a></td></tr>
<tr><td class="wblack">Probability of 1 or more wind events &gt;= 65 knots</td>
<td class="wblack" align="right"><a class="wblack" href="/misc/about.html" title="10%">Low (10%)</a></td></tr>
<tr><td class="wblack">Probability of 10 or more severe hail events</td>
<td class="wblack" align="right"><a class="wblack" href="/misc/about.html" title="60%">Moderate (60%)</a></td></tr>
<tr><td class="wblack">Probability of 1 or more hailstones &gt;= 2 inches</td>
<td class="wblack" align="right"><a class="wblack" href="/misc/about.html" title="40%">Moderate (40%)</a></td></tr>
</table>
<a class="wblack" href="/products/watch/">Current watches</a>
</body></html>"#;

    #[test]
    fn test_parse_watch_risks_published_page() {
        let hazards = parse_watch_risks(PUBLISHED_PAGE).unwrap().unwrap();
        assert!(!hazards.is_pds);
        let chances = [
            hazards.tornadoes.chance,
            hazards.ef2_plus_tornadoes.chance,
            hazards.severe_wind.chance,
            hazards.wind_65kt_plus.chance,
            hazards.severe_hail.chance,
            hazards.hail_2in_plus.chance,
        ];
        assert_eq!(chances, [70, 40, 30, 10, 60, 40]);
        assert_eq!(
            hazards.ef2_plus_tornadoes.label,
            "Probability of 1 or more strong (EF2-EF5) tornadoes: Moderate"
        );
    }

    #[test]
    fn test_parse_watch_risks_empty_and_pending() {
        assert_eq!(parse_watch_risks("").unwrap(), None);
        assert_eq!(
            parse_watch_risks("<html><body>Watch 0123</body></html>").unwrap(),
            Some(WatchHazards::pending())
        );
    }

    #[test]
    fn test_parse_watch_risks_incomplete_table() {
        assert!(parse_watch_risks(&risk_page(&[80, 60], false)).is_err());
    }

    #[test]
    fn test_watch_boxes_from_documents() {
        let document = r##"<kml><Document><Placemark>
            <name>WW 0123 PDS TORNADO 061845Z-070200Z</name>
            <styleUrl>#TOR</styleUrl>
            <Polygon><outerBoundaryIs><LinearRing><coordinates>
              -98,35 -96,35 -96,37 -98,37 -98,35
            </coordinates></LinearRing></outerBoundaryIs></Polygon>
        </Placemark></Document></kml>"##
            .to_string();
        let broken = "<kml><Placemark><name>garbage</name></Placemark></kml>".to_string();
        let now = Utc.with_ymd_and_hms(2024, 5, 7, 0, 0, 0).unwrap();

        let boxes = watch_boxes_from_documents(&[document, broken], now);
        assert_eq!(boxes.len(), 1);
        let watch_box = &boxes[0];
        assert_eq!(watch_box.number, 123);
        assert_eq!(watch_box.watch_type, "TOR");
        assert!(watch_box.is_pds);
        assert_eq!(watch_box.issued, Utc.with_ymd_and_hms(2024, 5, 6, 18, 45, 0).unwrap());
        let center = watch_box.centroid.unwrap();
        assert!((center.x - -97.2).abs() < 1e-9);
        assert!((center.y - 35.8).abs() < 1e-9);
    }

    #[test]
    fn test_discussions_from_documents() {
        let document = r#"<kml><Document><Placemark>
            <name>MD 0612</name>
            <description><![CDATA[URL: https://www.spc.noaa.gov/products/md/md0612.html<br>
Mesoscale Discussion 0612
Issued: 0245 PM CDT Mon May 06 2024
Areas affected...Central Oklahoma
Concerning...Tornado Watch 123...]]></description>
            <Polygon><outerBoundaryIs><LinearRing><coordinates>
              -98,35 -96,35 -96,37 -98,35
            </coordinates></LinearRing></outerBoundaryIs></Polygon>
        </Placemark></Document></kml>"#
            .to_string();

        let mds = discussions_from_documents(&[document]);
        assert_eq!(mds.len(), 1);
        assert_eq!(mds[0].number, 612);
        assert_eq!(mds[0].concerning, "Concerning Tornado Watch 123");
        assert_eq!(mds[0].issued_utc(), Utc.with_ymd_and_hms(2024, 5, 6, 19, 45, 0).unwrap());
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("http://spc", "https://x/ww.kmz"), "https://x/ww.kmz");
        assert_eq!(absolute_url("http://spc/", "/products/ww.kmz"), "http://spc/products/ww.kmz");
    }
}
