//! Minimal KML scanning for SPC products.
//!
//! SPC publishes active watches and mesoscale discussions as KMZ archives: a
//! top-level document whose folders link to one KMZ per product, each
//! holding a single placemark with a name, an HTML description, a style
//! reference and a polygon. Only those elements are read.
//!
//! NHC feeds follow the same shape with one folder per storm, attributes in
//! `<ExtendedData>` and point placemarks for forecast positions.

use std::sync::LazyLock;

use geo_types::{Coord, LineString, Polygon};
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_until},
    character::complete::{char, multispace0, multispace1},
    combinator::opt,
    multi::separated_list0,
    number::complete::double,
};

use regex::Regex;

use crate::parser::{ParseError, ParseResult, parse_number_pair};

static DATA_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<Data\s+name\s*=\s*["']([^"']*)["'][^>]*>(.*?)</Data>"#).expect("static regex is valid")
});

static PREFIXED_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(\w+):(\w+)>(.*?)</(\w+):(\w+)>").expect("static regex is valid")
});

/// A placemark read from a KML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placemark {
    pub name: String,
    /// Description with any CDATA wrapper removed. May contain HTML.
    pub description: String,
    /// Style reference with the leading `#` trimmed.
    pub style_url: String,
    /// Outer boundary ring, or the single point of a point placemark
    /// (longitude, latitude).
    pub coordinates: Vec<Coord<f64>>,
    /// `<ExtendedData>` name/value pairs in document order.
    pub data: Vec<(String, String)>,
}

impl Placemark {
    /// Build a polygon from the outer boundary ring.
    pub fn polygon(&self) -> Polygon<f64> {
        Polygon::new(LineString::from(self.coordinates.clone()), vec![])
    }

    /// Whether the geometry is a polygon rather than a point or line.
    pub fn is_polygon(&self) -> bool {
        self.coordinates.len() >= 4
    }

    /// Look up an `<ExtendedData>` value by name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.data.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

/// A `<NetworkLink>` with its display name.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLink {
    pub name: String,
    pub href: String,
}

/// Parse the next `<name ...>...</name>` element, returning its inner text.
fn element<'a>(input: &'a str, name: &str) -> IResult<&'a str, &'a str> {
    let open = format!("<{}", name);
    let close = format!("</{}>", name);
    let mut input = input;

    loop {
        let (rest, _) = take_until(open.as_str()).parse(input)?;
        let (rest, _) = tag(open.as_str()).parse(rest)?;
        // Reject longer tag names sharing the prefix, e.g. <LinkSnippet>.
        match rest.chars().next() {
            Some(c) if c == '>' || c.is_whitespace() => {}
            _ => {
                input = rest;
                continue;
            }
        }
        let (rest, _) = take_until(">").parse(rest)?;
        let (rest, _) = tag(">").parse(rest)?;
        let (rest, inner) = take_until(close.as_str()).parse(rest)?;
        let (rest, _) = tag(close.as_str()).parse(rest)?;
        return Ok((rest, inner));
    }
}

/// All elements with the given tag name, in document order.
fn elements<'a>(input: &'a str, name: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut input = input;
    while let Ok((rest, inner)) = element(input, name) {
        found.push(inner);
        input = rest;
    }
    found
}

fn first_element<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    element(input, name).ok().map(|(_, inner)| inner)
}

fn strip_cdata(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
        .unwrap_or(trimmed)
}

/// Decode the handful of XML entities SPC emits.
fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn coordinate(input: &str) -> IResult<&str, Coord<f64>> {
    let (input, (x, y)) = parse_number_pair(input)?;
    let (input, _) = opt((char(','), double)).parse(input)?;
    Ok((input, Coord { x, y }))
}

/// Parse a KML `<coordinates>` body: whitespace-separated `lon,lat[,alt]`.
pub fn parse_coordinates(text: &str) -> ParseResult<Vec<Coord<f64>>> {
    let (rest, coords) = (multispace0, separated_list0(multispace1, coordinate))
        .parse(text)
        .map(|(rest, (_, coords))| (rest, coords))
        .map_err(|e| ParseError::InvalidFormat(format!("coordinates: {:?}", e)))?;

    if !rest.trim().is_empty() {
        return Err(ParseError::InvalidFormat(format!(
            "trailing data in coordinates: '{}'",
            rest.trim()
        )));
    }
    Ok(coords)
}

/// Parse every placemark in a KML document.
///
/// Placemarks whose coordinates cannot be parsed are returned with an
/// empty ring; callers decide whether that is fatal.
pub fn placemarks(document: &str) -> Vec<Placemark> {
    elements(document, "Placemark")
        .into_iter()
        .map(|body| {
            let name = first_element(body, "name").map(|n| unescape(strip_cdata(n))).unwrap_or_default();
            let description = first_element(body, "description")
                .map(|d| unescape(strip_cdata(d)))
                .unwrap_or_default();
            let style_url = first_element(body, "styleUrl")
                .map(|s| s.trim().trim_start_matches('#').to_string())
                .unwrap_or_default();
            let ring = first_element(body, "outerBoundaryIs").unwrap_or(body);
            let coordinates = first_element(ring, "coordinates")
                .and_then(|c| parse_coordinates(c).ok())
                .unwrap_or_default();
            let data = first_element(body, "ExtendedData").map(extended_data).unwrap_or_default();

            Placemark {
                name: name.trim().to_string(),
                description,
                style_url,
                coordinates,
                data,
            }
        })
        .collect()
}

/// The `href` of every `<Link>` in a KML document.
pub fn link_hrefs(document: &str) -> Vec<String> {
    elements(document, "Link")
        .into_iter()
        .filter_map(|link| first_element(link, "href"))
        .map(|href| unescape(href.trim()))
        .filter(|href| !href.is_empty())
        .collect()
}

/// The body of every `<Folder>` in a document. Nested folders are not
/// separated from their parent.
pub fn folders(document: &str) -> Vec<&str> {
    elements(document, "Folder")
}

/// Every `<NetworkLink>` in a document with its name and link target.
pub fn network_links(document: &str) -> Vec<NetworkLink> {
    elements(document, "NetworkLink")
        .into_iter()
        .filter_map(|body| {
            let href = first_element(body, "Link").and_then(|link| first_element(link, "href"))?;
            let name = first_element(body, "name").map(strip_cdata).unwrap_or_default();
            Some(NetworkLink {
                name: unescape(name.trim()),
                href: unescape(href.trim()),
            })
        })
        .filter(|link| !link.href.is_empty())
        .collect()
}

/// Name/value pairs from an `<ExtendedData>` body.
///
/// Both the standard `<Data name="..."><value>...</value></Data>` form and
/// namespaced elements such as `<tc:name>...</tc:name>` are read.
pub fn extended_data(body: &str) -> Vec<(String, String)> {
    let standard = DATA_ELEMENT.captures_iter(body).map(|caps| {
        let value = first_element(&caps[2], "value").unwrap_or("");
        (caps[1].to_string(), unescape(strip_cdata(value)))
    });
    let prefixed = PREFIXED_ELEMENT
        .captures_iter(body)
        .filter(|caps| caps[1] == caps[4] && caps[2] == caps[5])
        .map(|caps| (caps[2].to_string(), unescape(strip_cdata(&caps[3]))));
    standard.chain(prefixed).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
  <Folder>
    <name>Active Watches</name>
    <NetworkLink>
      <name>WW 0123</name>
      <Link><href>https://www.spc.noaa.gov/products/watch/ww0123.kmz</href></Link>
    </NetworkLink>
    <NetworkLink>
      <LinkSnippet>ignored</LinkSnippet>
      <Link id="l2">
        <href>https://www.spc.noaa.gov/products/watch/ww0124.kmz?a=1&amp;b=2</href>
      </Link>
    </NetworkLink>
  </Folder>
</Document>
</kml>"#;

    const PLACEMARK_DOC: &str = r##"<kml><Document>
<Placemark id="pm1">
  <name>WW 0123 TORNADO 061845Z-070200Z</name>
  <description><![CDATA[<b>Tornado Watch 123</b>]]></description>
  <styleUrl>#TOR</styleUrl>
  <Polygon>
    <outerBoundaryIs><LinearRing>
      <coordinates>
        -97.5,35.0,0 -96.5,35.0,0
        -96.5,36.0,0 -97.5,36.0,0 -97.5,35.0,0
      </coordinates>
    </LinearRing></outerBoundaryIs>
  </Polygon>
</Placemark>
</Document></kml>"##;

    #[test]
    fn test_link_hrefs() {
        let links = link_hrefs(NETWORK_DOC);
        assert_eq!(
            links,
            vec![
                "https://www.spc.noaa.gov/products/watch/ww0123.kmz".to_string(),
                "https://www.spc.noaa.gov/products/watch/ww0124.kmz?a=1&b=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_placemarks() {
        let marks = placemarks(PLACEMARK_DOC);
        assert_eq!(marks.len(), 1);
        let mark = &marks[0];
        assert_eq!(mark.name, "WW 0123 TORNADO 061845Z-070200Z");
        assert_eq!(mark.description, "<b>Tornado Watch 123</b>");
        assert_eq!(mark.style_url, "TOR");
        assert_eq!(mark.coordinates.len(), 5);
        assert_eq!(mark.coordinates[0], Coord { x: -97.5, y: 35.0 });
        assert_eq!(mark.polygon().exterior().0.len(), 5);
    }

    #[test]
    fn test_parse_coordinates_without_altitude() {
        let coords = parse_coordinates("-97.5,35.0 -96.5,35.25").unwrap();
        assert_eq!(coords, vec![Coord { x: -97.5, y: 35.0 }, Coord { x: -96.5, y: 35.25 }]);
    }

    #[test]
    fn test_parse_coordinates_garbage() {
        assert!(parse_coordinates("-97.5,35.0 north").is_err());
    }

    const STORM_DOC: &str = r##"<kml xmlns:tc="http://www.nhc.noaa.gov">
<Document>
<Folder id="at3">
  <name>Hurricane Idalia</name>
  <ExtendedData xmlns:tc="urn:nhc">
    <tc:type>Hurricane</tc:type>
    <tc:name>Idalia</tc:name>
    <tc:headline><![CDATA[...IDALIA STRENGTHENING...]]></tc:headline>
    <tc:movement>N at 14 mph</tc:movement>
  </ExtendedData>
  <NetworkLink>
    <name>Cone of Uncertainty</name>
    <Link><href>https://www.nhc.noaa.gov/storm_graphics/api/AL102023_CONE_latest.kmz</href></Link>
  </NetworkLink>
  <NetworkLink><name>Empty</name><Link><href> </href></Link></NetworkLink>
</Folder>
<Placemark>
  <name>Disturbance 1</name>
  <ExtendedData>
    <Data name="Disturbance"><value>1</value></Data>
    <Data name="Discussion"><value><![CDATA[Showers &amp; storms]]></value></Data>
  </ExtendedData>
  <Point><coordinates>-45.0,12.5,0</coordinates></Point>
</Placemark>
</Document></kml>"##;

    #[test]
    fn test_folders_and_network_links() {
        let folders = folders(STORM_DOC);
        assert_eq!(folders.len(), 1);
        let links = network_links(folders[0]);
        assert_eq!(
            links,
            vec![NetworkLink {
                name: "Cone of Uncertainty".to_string(),
                href: "https://www.nhc.noaa.gov/storm_graphics/api/AL102023_CONE_latest.kmz".to_string(),
            }]
        );
    }

    #[test]
    fn test_extended_data_forms() {
        let folder = folders(STORM_DOC)[0];
        let data = extended_data(first_element(folder, "ExtendedData").unwrap());
        assert_eq!(data[0], ("type".to_string(), "Hurricane".to_string()));
        assert_eq!(data[2], ("headline".to_string(), "...IDALIA STRENGTHENING...".to_string()));
        assert_eq!(data.len(), 4);

        let marks = placemarks(STORM_DOC);
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].value("Disturbance"), Some("1"));
        assert_eq!(marks[0].value("Discussion"), Some("Showers & storms"));
        assert_eq!(marks[0].coordinates, vec![Coord { x: -45.0, y: 12.5 }]);
        assert!(!marks[0].is_polygon());
    }

    #[test]
    fn test_no_placemarks() {
        assert!(placemarks("<kml></kml>").is_empty());
        assert!(link_hrefs("").is_empty());
    }
}
