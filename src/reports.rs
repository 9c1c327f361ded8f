//! SPC preliminary local storm reports.
//!
//! Reports are published as one CSV file per category and convective day.
//! A convective day runs from 12Z to 12Z, so a report time before 1200 UTC
//! falls on the calendar day after the one the file is named for.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use tracing::{debug, warn};

use crate::client::{FetchError, HttpClient};
use crate::model::{ReportKind, ReportMagnitude, StormReport};

/// Hour (UTC) a convective day starts.
const CONVECTIVE_DAY_START_HOUR: u32 = 12;

/// The convective day a moment falls in.
pub fn convective_day(now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    if now.hour() < CONVECTIVE_DAY_START_HOUR {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// URL of the report file for a convective day, or today's running file.
pub fn reports_url(base_url: &str, kind: ReportKind, date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!(
            "{}/climo/reports/{}_rpts_raw_{}.csv",
            base_url,
            date.format("%y%m%d"),
            kind.suffix()
        ),
        None => format!("{}/climo/reports/today_raw_{}.csv", base_url, kind.suffix()),
    }
}

fn is_unknown(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("UNK")
}

fn magnitude(kind: ReportKind, value: &str) -> Result<ReportMagnitude, String> {
    let value = value.trim();
    if is_unknown(value) {
        return Ok(match kind {
            ReportKind::Tornado => ReportMagnitude::Rating(None),
            ReportKind::Wind => ReportMagnitude::WindMph(None),
            ReportKind::Hail => ReportMagnitude::HailInches(None),
        });
    }
    match kind {
        ReportKind::Tornado => Ok(ReportMagnitude::Rating(Some(value.to_string()))),
        ReportKind::Wind => value
            .parse::<u32>()
            .map(|mph| ReportMagnitude::WindMph(Some(mph)))
            .map_err(|_| format!("invalid wind speed '{}'", value)),
        // Hail size is reported in hundredths of an inch.
        ReportKind::Hail => value
            .parse::<f64>()
            .map(|size| ReportMagnitude::HailInches(Some(size / 100.0)))
            .map_err(|_| format!("invalid hail size '{}'", value)),
    }
}

fn report_time(day: NaiveDate, hhmm: &str) -> Result<DateTime<Utc>, String> {
    let hhmm = hhmm.trim();
    let time = NaiveTime::parse_from_str(&format!("{:0>4}", hhmm), "%H%M")
        .map_err(|_| format!("invalid report time '{}'", hhmm))?;
    let date = if time.hour() < CONVECTIVE_DAY_START_HOUR {
        day + Duration::days(1)
    } else {
        day
    };
    Ok(date.and_time(time).and_utc())
}

fn parse_row(kind: ReportKind, day: NaiveDate, line: &str) -> Result<StormReport, String> {
    // Comments may themselves contain commas.
    let fields: Vec<&str> = line.splitn(8, ',').collect();
    if fields.len() < 7 {
        return Err(format!("expected 8 fields, found {}", fields.len()));
    }
    let coordinate = |i: usize, name: &str| {
        fields[i]
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid {} '{}'", name, fields[i].trim()))
    };

    Ok(StormReport {
        kind,
        time: report_time(day, fields[0])?,
        magnitude: magnitude(kind, fields[1])?,
        location: fields[2].trim().to_string(),
        county: fields[3].trim().to_string(),
        state: fields[4].trim().to_string(),
        latitude: coordinate(5, "latitude")?,
        longitude: coordinate(6, "longitude")?,
        comments: fields.get(7).map(|c| c.trim().to_string()).unwrap_or_default(),
    })
}

/// Parse a report file for the convective day starting on `day`.
///
/// Header lines (there is one per section in the daily files) and blank
/// lines are skipped; malformed rows are logged and skipped. Reports are
/// returned in time order.
pub fn parse_reports(kind: ReportKind, day: NaiveDate, body: &str) -> Vec<StormReport> {
    let mut reports: Vec<StormReport> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Time"))
        .filter_map(|line| match parse_row(kind, day, line) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Skipping {:?} report '{}': {}", kind, line, e);
                None
            }
        })
        .collect();
    reports.sort_by_key(|r| r.time);
    reports
}

/// Fetch the storm reports of one category for a convective day, or for
/// the current one when `date` is `None`.
pub async fn fetch_storm_reports(
    client: &HttpClient,
    kind: ReportKind,
    date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<Vec<StormReport>, FetchError> {
    let today = convective_day(now);
    if let Some(date) = date
        && date > today
    {
        return Err(FetchError::InvalidRequest(format!("date {} is in the future", date)));
    }
    // Today's running file is not published under its dated name.
    let date = date.filter(|d| *d != today);

    let url = reports_url(&client.config().spc_base_url, kind, date);
    let body = client.get_text(&url).await?;
    let reports = parse_reports(kind, date.unwrap_or(today), &body);
    debug!("{} {:?} reports in {}", reports.len(), kind, url);
    Ok(reports)
}
