//! Best-effort text classification of warnings.
//!
//! The NWS feed reports a message type per alert, but warnings that are
//! being downgraded, allowed to expire or cancelled are often still sent as
//! updates whose prose says so. These heuristics read the description to
//! recover the real transition, and pick display names for notable
//! variants of tornado and severe thunderstorm warnings.

use crate::model::{LifecycleStatus, Warning};

/// Event name of the special weather statements subject to re-announcement.
pub const SPECIAL_WEATHER_STATEMENT: &str = "Special Weather Statement";

const KNOTS_TO_MPH: f64 = 1.151;

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Resolve the lifecycle transition a warning represents.
///
/// Cancellation wording wins over downgrade wording; otherwise the status
/// reported by the feed is kept.
pub fn resolve_transition(warning: &Warning) -> LifecycleStatus {
    let description = warning.description.to_lowercase();
    if description.contains("canceled") || description.contains("cancelled") {
        LifecycleStatus::Cancel
    } else if description.contains("below severe limits") || description.contains("allowed to expire") {
        LifecycleStatus::Update
    } else {
        warning.status
    }
}

/// Whether a warning is a special weather statement about thunderstorms.
pub fn is_thunderstorm_special_statement(warning: &Warning) -> bool {
    warning.event == SPECIAL_WEATHER_STATEMENT && contains_ignore_case(&warning.description, "thunderstorm")
}

/// Storm speed in mph from an `eventMotionDescription` such as
/// `"2024-05-06T19:45:00-00:00...storm...245DEG...43KT...35.1,-97.2"`.
pub fn storm_speed_mph(event_motion: &str) -> Option<f64> {
    let field = event_motion.split("...").nth(3)?.trim();
    let upper = field.to_ascii_uppercase();
    if let Some(knots) = upper.strip_suffix("KT") {
        knots.trim().parse::<f64>().ok().map(|kt| kt * KNOTS_TO_MPH)
    } else {
        upper.trim_end_matches("MPH").trim().parse::<f64>().ok()
    }
}

fn is_derecho(warning: &Warning) -> bool {
    let params = &warning.parameters;
    let along_a_line = params
        .cmam_long_text
        .as_deref()
        .is_some_and(|text| contains_ignore_case(text, "along a line"));
    let strong_gusts = params.max_wind_gust.is_some_and(|gust| gust >= 70.0);
    let small_hail = params.max_hail_size.is_none_or(|size| size < 1.25);
    let fast_moving = params
        .event_motion
        .as_deref()
        .and_then(storm_speed_mph)
        .is_some_and(|mph| mph >= 50.0);

    along_a_line
        && strong_gusts
        && small_hail
        && fast_moving
        && contains_ignore_case(&warning.instruction, "widespread wind damage")
}

/// A display name for notable warnings, or `None` to keep the event name.
pub fn custom_name(warning: &Warning) -> Option<&'static str> {
    match warning.event.as_str() {
        "Tornado Warning" if contains_ignore_case(&warning.description, "tornado emergency") => {
            Some("Tornado Emergency")
        }
        "Tornado Warning" if contains_ignore_case(&warning.description, "particularly dangerous situation") => {
            Some("PDS Tornado Warning")
        }
        "Severe Thunderstorm Warning" if is_derecho(warning) => Some("Derecho Warning"),
        _ => None,
    }
}
