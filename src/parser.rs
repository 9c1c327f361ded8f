//! Parsers for the free-text parts of SPC and NWS products.
//!
//! Most upstream data arrives as JSON and is decoded with serde, but a few
//! identity and timing fields only exist inside prose:
//!
//! - watch numbers inside NWS watch descriptions
//!   (`"...HAS ISSUED TORNADO WATCH 123 IN EFFECT UNTIL..."`)
//! - watch box placemark names (`"WW 0123 TORNADO 061845Z-070200Z"`)
//! - mesoscale discussion placemark descriptions:
//!
//! ```text
//! URL: https://www.spc.noaa.gov/products/md/md0612.html
//! Mesoscale Discussion 0612
//! Issued: 0245 PM CDT Mon May 06 2024
//! Areas affected...Central Oklahoma
//! Concerning...Severe potential...Watch likely
//! ```
//!
//! These are parsed with `nom`.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag_no_case, take_while_m_n},
    character::complete::{alpha1, char, digit1, multispace1, space0, space1},
    combinator::{all_consuming, map_res, value},
    sequence::terminated,
};
use regex::Regex;
use thiserror::Error;

use crate::model::WatchKind;

/// Errors that can occur during parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Unknown time zone: {0}")]
    UnknownTimeZone(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// UTC offsets for the zone abbreviations SPC uses in issue times.
const TIME_ZONE_OFFSETS: &[(&str, i32)] = &[
    ("UTC", 0),
    ("GMT", 0),
    ("AZOST", 0),
    ("AZOT", -1),
    ("CVT", -1),
    ("ADT", -3),
    ("AST", -4),
    ("EDT", -4),
    ("EST", -5),
    ("CDT", -5),
    ("CST", -6),
    ("MDT", -6),
    ("MST", -7),
    ("PDT", -7),
    ("PST", -8),
    ("AKDT", -8),
    ("AKST", -9),
    ("HST", -10),
];

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex is valid"));

/// Look up the UTC offset for a zone abbreviation.
pub fn time_zone_offset(abbreviation: &str) -> Option<FixedOffset> {
    TIME_ZONE_OFFSETS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(abbreviation))
        .and_then(|(_, hours)| FixedOffset::east_opt(hours * 3600))
}

/// Remove HTML tags from a text fragment.
pub fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, "").into_owned()
}

/// Parse `"tornado watch 123"` or `"severe thunderstorm watch 123"`.
fn parse_watch_phrase(input: &str, kind: WatchKind) -> IResult<&str, u32> {
    let (input, _) = match kind {
        WatchKind::Tornado => value((), tag_no_case("tornado")).parse(input)?,
        WatchKind::SevereThunderstorm => value(
            (),
            (tag_no_case("severe"), multispace1, tag_no_case("thunderstorm")),
        )
        .parse(input)?,
    };
    let (input, _) = (multispace1, tag_no_case("watch"), multispace1).parse(input)?;
    map_res(digit1, |s: &str| s.parse::<u32>()).parse(input)
}

/// Extract the watch number from an NWS watch description.
///
/// Phrases may wrap across lines. Returns `None` if no watch phrase of the
/// given kind is followed by a number.
///
/// # Example
///
/// ```
/// use stormwatch::model::WatchKind;
/// use stormwatch::parser::extract_watch_number;
///
/// let text = "THE NWS HAS ISSUED TORNADO WATCH 123 IN EFFECT UNTIL 9 PM";
/// assert_eq!(extract_watch_number(text, WatchKind::Tornado), Some(123));
/// ```
pub fn extract_watch_number(text: &str, kind: WatchKind) -> Option<u32> {
    text.char_indices()
        .filter(|&(i, c)| c.is_ascii_alphabetic() && !text[..i].ends_with(char::is_alphanumeric))
        .find_map(|(i, _)| parse_watch_phrase(&text[i..], kind).ok().map(|(_, n)| n))
}

/// Parse a `ddHHmmZ` day/time group into (day, hour, minute).
fn parse_day_time_group(input: &str) -> IResult<&str, (u32, u32, u32)> {
    let two_digits = || map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |s: &str| s.parse::<u32>());
    all_consuming(terminated((two_digits(), two_digits(), two_digits()), tag_no_case("Z"))).parse(input)
}

/// Resolve a day/time group against the current month.
///
/// A day that would land more than a day in the future is taken to belong
/// to the previous month.
pub fn resolve_day_time(now: DateTime<Utc>, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let in_month = |year: i32, month: u32| Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).single();

    match in_month(now.year(), now.month()) {
        Some(t) if t <= now + Duration::days(1) => Some(t),
        _ => {
            let (year, month) = if now.month() == 1 {
                (now.year() - 1, 12)
            } else {
                (now.year(), now.month() - 1)
            };
            in_month(year, month)
        }
    }
}

/// Identity and timing fields of an SPC watch box placemark name.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchBoxName {
    pub number: u32,
    /// The first `ddHHmmZ` group, resolved against `now`.
    pub issued: Option<DateTime<Utc>>,
    /// The second `ddHHmmZ` group, if present.
    pub expires: Option<DateTime<Utc>>,
    pub is_pds: bool,
}

fn parse_ww_number(input: &str) -> IResult<&str, u32> {
    let (input, _) = (tag_no_case("WW"), space0).parse(input)?;
    map_res(digit1, |s: &str| s.parse::<u32>()).parse(input)
}

/// Parse a watch box placemark name such as `"WW 0123 TORNADO 061845Z-070200Z"`.
pub fn parse_watch_box_name(name: &str, now: DateTime<Utc>) -> ParseResult<WatchBoxName> {
    let trimmed = name.trim();
    let (_, number) = parse_ww_number(trimmed)
        .map_err(|e| ParseError::InvalidFormat(format!("watch box name '{}': {:?}", trimmed, e)))?;

    let mut groups = trimmed
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter_map(|token| parse_day_time_group(token).ok())
        .map(|(_, (day, hour, minute))| resolve_day_time(now, day, hour, minute));
    let issued = groups.next().flatten();
    let expires = groups.next().flatten();

    let lower = trimmed.to_ascii_lowercase();
    let is_pds = lower.contains("pds") || lower.contains("particularly dangerous situation");

    Ok(WatchBoxName {
        number,
        issued,
        expires,
        is_pds,
    })
}

type IssuedParts<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, &'a str);

/// Split `"0245 PM CDT Mon May 06 2024"` into time, meridiem, zone, month,
/// day and year. The weekday is dropped.
fn parse_issued_parts(input: &str) -> IResult<&str, IssuedParts<'_>> {
    let (input, hhmm) = digit1(input)?;
    let (input, _) = space1(input)?;
    let (input, meridiem) = alt((tag_no_case("AM"), tag_no_case("PM"))).parse(input)?;
    let (input, _) = space1(input)?;
    let (input, zone) = alpha1(input)?;
    let (input, _) = space1(input)?;
    let (input, _weekday) = alpha1(input)?;
    let (input, _) = space1(input)?;
    let (input, month) = alpha1(input)?;
    let (input, _) = space1(input)?;
    let (input, day) = digit1(input)?;
    let (input, _) = space1(input)?;
    let (input, year) = digit1(input)?;
    Ok((input, (hhmm, meridiem, zone, month, day, year)))
}

/// Parse an SPC issue time such as `"0245 PM CDT Mon May 06 2024"`.
pub fn parse_spc_issued(input: &str) -> ParseResult<(DateTime<FixedOffset>, String)> {
    let input = input.trim();
    let (hhmm, meridiem, zone, month, day, year) = match parse_issued_parts(input) {
        Ok((_, parts)) => parts,
        Err(e) => return Err(ParseError::InvalidFormat(format!("issue time '{}': {:?}", input, e))),
    };

    if !(3..=4).contains(&hhmm.len()) {
        return Err(ParseError::InvalidTime(hhmm.to_string()));
    }
    let (hour_str, minute_str) = hhmm.split_at(hhmm.len() - 2);
    let hour12: u32 = hour_str.parse().map_err(|_| ParseError::InvalidTime(hhmm.to_string()))?;
    let minute: u32 = minute_str.parse().map_err(|_| ParseError::InvalidTime(hhmm.to_string()))?;
    if !(1..=12).contains(&hour12) {
        return Err(ParseError::InvalidTime(hhmm.to_string()));
    }
    let hour = match (hour12, meridiem.eq_ignore_ascii_case("PM")) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };

    let date = NaiveDate::parse_from_str(&format!("{} {} {}", day, month, year), "%d %b %Y")
        .map_err(|e| ParseError::InvalidTime(format!("{} {} {}: {}", day, month, year, e)))?;
    let local = date
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| ParseError::InvalidTime(hhmm.to_string()))?;
    let offset = time_zone_offset(zone).ok_or_else(|| ParseError::UnknownTimeZone(zone.to_string()))?;
    let issued = offset
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| ParseError::InvalidTime(input.to_string()))?;

    let display = format!("{} {}", issued.format("%m-%d-%Y %I:%M %p"), zone.to_ascii_uppercase());
    Ok((issued, display))
}

/// Fields of a mesoscale discussion placemark description.
#[derive(Debug, Clone, PartialEq)]
pub struct MdDescription {
    pub url: String,
    pub full_name: String,
    pub number: u32,
    pub issued: DateTime<FixedOffset>,
    pub issued_display: String,
    pub areas_affected: String,
    pub concerning: String,
}

/// Parse a mesoscale discussion placemark description (HTML allowed).
pub fn parse_md_description(description: &str) -> ParseResult<MdDescription> {
    let text = strip_html(description);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let url_line = lines.first().ok_or(ParseError::MissingField("url"))?;
    let url = url_line
        .split_whitespace()
        .find(|t| t.starts_with("http"))
        .or_else(|| url_line.split_whitespace().nth(1))
        .ok_or(ParseError::MissingField("url"))?
        .to_string();

    let full_name = lines.get(1).ok_or(ParseError::MissingField("name"))?.to_string();
    let number = full_name
        .split_whitespace()
        .nth(2)
        .and_then(|n| n.trim_matches(|c: char| !c.is_ascii_digit()).parse::<u32>().ok())
        .ok_or_else(|| ParseError::InvalidFormat(format!("discussion name '{}'", full_name)))?;

    let issued_line = lines.get(2).ok_or(ParseError::MissingField("issued"))?;
    let issued_text = issued_line
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(issued_line);
    let (issued, issued_display) = parse_spc_issued(issued_text)?;

    let areas_affected = lines.get(3).map(|s| s.to_string()).unwrap_or_default();
    let concerning = lines.get(4).map(|s| md_concerning(s)).unwrap_or_default();

    Ok(MdDescription {
        url,
        full_name,
        number,
        issued,
        issued_display,
        areas_affected,
        concerning,
    })
}

/// Summarize the "Concerning..." line of a mesoscale discussion.
pub fn md_concerning(line: &str) -> String {
    let lower = line.to_ascii_lowercase();
    let first_number = || {
        line.split(|c: char| !c.is_ascii_digit())
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    };

    if lower.contains("severe potential") {
        "Severe Potential".to_string()
    } else if lower.contains("tornado watch") {
        format!("Concerning Tornado Watch {}", first_number())
    } else if lower.contains("severe thunderstorm watch") {
        format!("Concerning Severe Thunderstorm Watch {}", first_number())
    } else if lower.contains("snow") {
        "Heavy Snow".to_string()
    } else if lower.contains("freezing rain") {
        "Freezing Rain".to_string()
    } else if lower.contains("blizzard") {
        "Blizzard".to_string()
    } else {
        String::new()
    }
}

/// Parse a leading number out of a hazard value such as `"70 MPH"` or
/// `"Up to 1.75 IN"`.
pub fn parse_leading_number(text: &str) -> Option<f64> {
    text.split_whitespace()
        .find_map(|word| word.trim_end_matches(['.', ',']).parse::<f64>().ok())
}

/// Parse a single `lon,lat` pair followed by optional altitude.
pub(crate) fn parse_number_pair(input: &str) -> IResult<&str, (f64, f64)> {
    let (input, x) = nom::number::complete::double(input)?;
    let (input, _) = char(',').parse(input)?;
    let (input, y) = nom::number::complete::double(input)?;
    Ok((input, (x, y)))
}
