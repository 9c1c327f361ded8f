//! Identity and freshness tracking across polling cycles.
//!
//! Upstream feeds are snapshots: every poll returns everything that is
//! currently active, so an entity stays visible for hours after it was
//! issued. Each tracker remembers which identities it has observed and
//! decides which entries of a snapshot are genuinely new.
//!
//! Two rules apply everywhere:
//!
//! - anything issued at or before the moment listening started is recorded
//!   silently and never announced;
//! - an identity is announced at most once while it is remembered.
//!
//! Entries are forgotten by age. All methods take `now` explicitly so the
//! rules can be exercised without a clock.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::classify;
use crate::model::{LifecycleStatus, MesoscaleDiscussion, Warning, Watch, WatchBox};

/// Identities seen so far, with the timestamp recorded on first sight.
#[derive(Debug, Clone)]
pub struct SeenSet<K> {
    entries: HashMap<K, DateTime<Utc>>,
}

impl<K> Default for SeenSet<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> SeenSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Record a key. Returns `false` if it was already present, in which
    /// case the original timestamp is kept.
    pub fn record(&mut self, key: K, at: DateTime<Utc>) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, at);
        true
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Timestamp recorded for a key.
    pub fn recorded_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.entries.get(key).copied()
    }

    /// Drop every entry recorded before `cutoff`. Returns how many were
    /// dropped.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, at| *at >= cutoff);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Age limits applied by the trackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizons {
    /// Watches older than this are forgotten and never announced.
    pub watch_age: Duration,
    /// Watch boxes and mesoscale discussions older than this are forgotten
    /// and never announced.
    pub retention: Duration,
    /// Thunderstorm special weather statements older than this are
    /// forgotten on every poll.
    pub special_statement_refire: Duration,
}

impl Default for Horizons {
    fn default() -> Self {
        Self {
            watch_age: Duration::hours(24),
            retention: Duration::days(7),
            special_statement_refire: Duration::hours(6),
        }
    }
}

/// Tracks watches and watch boxes, which are reconciled together.
///
/// Watch numbers and watch box numbers live in separate seen-sets: a watch
/// and its box share a number but are announced independently.
#[derive(Debug, Clone, Default)]
pub struct WatchTracker {
    watches: SeenSet<u32>,
    boxes: SeenSet<u32>,
    horizons: Horizons,
}

impl WatchTracker {
    pub fn new(horizons: Horizons) -> Self {
        Self {
            horizons,
            ..Default::default()
        }
    }

    /// Forget watches and boxes past their age horizon.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let watches = self.watches.prune_before(now - self.horizons.watch_age);
        let boxes = self.boxes.prune_before(now - self.horizons.retention);
        if watches + boxes > 0 {
            debug!("Evicted {} watches and {} watch boxes", watches, boxes);
        }
    }

    /// Decide whether a watch is newly issued, recording it either way.
    ///
    /// A watch is new if its number has not been seen, it was sent after
    /// `start`, and it is a new issuance. Watches older than the age
    /// horizon are ignored entirely.
    pub fn admit_watch(&mut self, watch: &Watch, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if now - watch.sent > self.horizons.watch_age {
            return false;
        }
        let first_sight = self.watches.record(watch.number, watch.sent);
        first_sight && watch.sent > start && watch.status == LifecycleStatus::NewIssue
    }

    /// Decide whether a watch box is newly issued, recording it either way.
    pub fn admit_box(&mut self, watch_box: &WatchBox, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if now - watch_box.issued > self.horizons.retention {
            return false;
        }
        let first_sight = self.boxes.record(watch_box.number, watch_box.issued);
        first_sight && watch_box.issued > start
    }

    /// Admit a batch of watches, returning the new ones in feed order.
    pub fn admit_watches(&mut self, watches: Vec<Watch>, start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<Watch> {
        watches
            .into_iter()
            .filter(|w| self.admit_watch(w, start, now))
            .collect()
    }

    /// Admit a batch of watch boxes, returning the new ones in feed order.
    pub fn admit_boxes(&mut self, boxes: Vec<WatchBox>, start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<WatchBox> {
        boxes
            .into_iter()
            .filter(|b| self.admit_box(b, start, now))
            .collect()
    }

    pub fn seen_watches(&self) -> &SeenSet<u32> {
        &self.watches
    }

    pub fn seen_boxes(&self) -> &SeenSet<u32> {
        &self.boxes
    }
}

/// Tracks mesoscale discussions by number.
#[derive(Debug, Clone, Default)]
pub struct MdTracker {
    seen: SeenSet<u32>,
    horizons: Horizons,
}

impl MdTracker {
    pub fn new(horizons: Horizons) -> Self {
        Self {
            horizons,
            ..Default::default()
        }
    }

    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let evicted = self.seen.prune_before(now - self.horizons.retention);
        if evicted > 0 {
            debug!("Evicted {} mesoscale discussions", evicted);
        }
    }

    /// Decide whether a discussion is newly issued, recording it either way.
    pub fn admit(&mut self, md: &MesoscaleDiscussion, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let issued = md.issued_utc();
        if now - issued > self.horizons.retention {
            return false;
        }
        let first_sight = self.seen.record(md.number, issued);
        first_sight && issued > start
    }

    /// Admit a batch, returning the new discussions in feed order.
    pub fn admit_all(
        &mut self,
        mds: Vec<MesoscaleDiscussion>,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<MesoscaleDiscussion> {
        mds.into_iter().filter(|md| self.admit(md, start, now)).collect()
    }

    pub fn seen(&self) -> &SeenSet<u32> {
        &self.seen
    }
}

/// Tracks warnings by alert id.
#[derive(Debug, Clone, Default)]
pub struct WarningTracker {
    seen: SeenSet<String>,
    horizons: Horizons,
}

impl WarningTracker {
    pub fn new(horizons: Horizons) -> Self {
        Self {
            horizons,
            ..Default::default()
        }
    }

    /// Decide whether a warning should be announced, and as which
    /// transition.
    ///
    /// A thunderstorm special weather statement older than the refire
    /// horizon is forgotten first, so a statement that stays in the feed
    /// is announced again on every poll after that point.
    pub fn admit(&mut self, warning: &Warning, start: DateTime<Utc>, now: DateTime<Utc>) -> Option<LifecycleStatus> {
        if classify::is_thunderstorm_special_statement(warning)
            && now - warning.sent >= self.horizons.special_statement_refire
            && self.seen.remove(&warning.id)
        {
            debug!("Forgetting special weather statement {}", warning.id);
        }

        if warning.sent <= start {
            self.seen.record(warning.id.clone(), warning.sent);
            return None;
        }
        if !self.seen.record(warning.id.clone(), warning.sent) {
            return None;
        }
        Some(classify::resolve_transition(warning))
    }

    pub fn seen(&self) -> &SeenSet<String> {
        &self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{WarningArea, WarningParameters, WatchKind};
    use chrono::{FixedOffset, TimeZone};
    use geo_types::Polygon;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        start() + Duration::minutes(minutes)
    }

    fn tornado_watch(number: u32, sent: DateTime<Utc>, status: LifecycleStatus) -> Watch {
        Watch::new(number, WatchKind::Tornado, status, sent)
    }

    fn watch_box(number: u32, issued: DateTime<Utc>) -> WatchBox {
        WatchBox {
            number,
            watch_type: "TOR".to_string(),
            name: format!("WW {:04}", number),
            is_pds: false,
            issued,
            expires: None,
            polygon: Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)].into(), vec![]),
            centroid: None,
            max_hail_size_inches: None,
            max_wind_gust_mph: None,
        }
    }

    fn discussion(number: u32, issued: DateTime<Utc>) -> MesoscaleDiscussion {
        let cdt = FixedOffset::west_opt(5 * 3600).unwrap();
        MesoscaleDiscussion {
            number,
            full_name: format!("Mesoscale Discussion {:04}", number),
            url: String::new(),
            issued: issued.with_timezone(&cdt),
            issued_display: String::new(),
            areas_affected: String::new(),
            concerning: String::new(),
            polygon: Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)].into(), vec![]),
        }
    }

    fn warning(id: &str, event: &str, description: &str, sent: DateTime<Utc>) -> Warning {
        Warning {
            id: id.to_string(),
            event: event.to_string(),
            name: event.to_string(),
            status: LifecycleStatus::NewIssue,
            sent,
            effective: None,
            onset: None,
            expires: None,
            ends: None,
            sender: String::new(),
            headline: String::new(),
            nws_headline: String::new(),
            description: description.to_string(),
            instruction: String::new(),
            parameters: WarningParameters::default(),
            area: WarningArea::Zones(vec![]),
        }
    }

    #[test]
    fn test_seen_set_keeps_first_timestamp() {
        let mut seen = SeenSet::new();
        assert!(seen.record(1u32, at(5)));
        assert!(!seen.record(1u32, at(50)));
        assert_eq!(seen.recorded_at(&1), Some(at(5)));
        assert_eq!(seen.prune_before(at(6)), 1);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_watch_lifecycle_scenario() {
        let mut tracker = WatchTracker::default();
        let watch = tornado_watch(100, at(5), LifecycleStatus::NewIssue);

        // Tick 1: newly issued after listening started.
        tracker.sweep(at(6));
        assert!(tracker.admit_watch(&watch, start(), at(6)));

        // Tick 2: same snapshot.
        tracker.sweep(at(7));
        assert!(!tracker.admit_watch(&watch, start(), at(7)));

        // Tick 3: 25 hours later the stale entry is evicted but not re-announced.
        let later = at(5 + 25 * 60);
        tracker.sweep(later);
        assert!(!tracker.seen_watches().contains(&100));
        assert!(!tracker.admit_watch(&watch, start(), later));
        assert!(!tracker.seen_watches().contains(&100));
    }

    #[test]
    fn test_reissued_watch_number_is_new_after_eviction() {
        let mut tracker = WatchTracker::default();
        assert!(tracker.admit_watch(&tornado_watch(7, at(5), LifecycleStatus::NewIssue), start(), at(6)));

        let later = at(5 + 25 * 60);
        tracker.sweep(later);
        let reissued = tornado_watch(7, later - Duration::minutes(1), LifecycleStatus::NewIssue);
        assert!(tracker.admit_watch(&reissued, start(), later));
    }

    #[test]
    fn test_preexisting_watch_never_announced() {
        let mut tracker = WatchTracker::default();
        let old = tornado_watch(50, start() - Duration::minutes(30), LifecycleStatus::NewIssue);
        assert!(!tracker.admit_watch(&old, start(), at(1)));
        assert!(tracker.seen_watches().contains(&50));
        assert!(!tracker.admit_watch(&old, start(), at(2)));
    }

    #[test]
    fn test_update_status_absorbed_silently() {
        let mut tracker = WatchTracker::default();
        let update = tornado_watch(60, at(10), LifecycleStatus::Update);
        assert!(!tracker.admit_watch(&update, start(), at(11)));

        // A later NewIssue for the same number is still suppressed.
        let issue = tornado_watch(60, at(12), LifecycleStatus::NewIssue);
        assert!(!tracker.admit_watch(&issue, start(), at(13)));
    }

    #[test]
    fn test_watch_and_box_seen_sets_are_independent() {
        let mut tracker = WatchTracker::default();
        assert!(tracker.admit_watch(&tornado_watch(42, at(5), LifecycleStatus::NewIssue), start(), at(6)));
        assert!(tracker.admit_box(&watch_box(42, at(5)), start(), at(6)));
        assert!(!tracker.admit_box(&watch_box(42, at(5)), start(), at(7)));
    }

    #[test]
    fn test_box_rules() {
        let mut tracker = WatchTracker::default();
        assert!(!tracker.admit_box(&watch_box(1, start()), start(), at(1)));
        assert!(tracker.seen_boxes().contains(&1));

        let ancient = watch_box(2, start() - Duration::days(8));
        assert!(!tracker.admit_box(&ancient, start() - Duration::days(9), at(1)));
        assert!(!tracker.seen_boxes().contains(&2));

        let new = tracker.admit_boxes(vec![watch_box(3, at(2)), watch_box(3, at(2))], start(), at(3));
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn test_box_retention_sweep() {
        let mut tracker = WatchTracker::default();
        assert!(tracker.admit_box(&watch_box(3, at(2)), start(), at(3)));
        tracker.sweep(at(2) + Duration::days(7) + Duration::minutes(1));
        assert!(tracker.seen_boxes().is_empty());
    }

    #[test]
    fn test_md_rules() {
        let mut tracker = MdTracker::default();
        assert!(tracker.admit(&discussion(612, at(30)), start(), at(31)));
        assert!(!tracker.admit(&discussion(612, at(30)), start(), at(32)));
        assert!(!tracker.admit(&discussion(611, start()), start(), at(32)));
        assert!(tracker.seen().contains(&611));

        let new = tracker.admit_all(
            vec![discussion(612, at(30)), discussion(613, at(40)), discussion(614, at(41))],
            start(),
            at(42),
        );
        let numbers: Vec<u32> = new.iter().map(|md| md.number).collect();
        assert_eq!(numbers, vec![613, 614]);
    }

    #[test]
    fn test_warning_rules() {
        let mut tracker = WarningTracker::default();
        let tor = warning("A1", "Tornado Warning", "radar indicated", at(5));
        assert_eq!(tracker.admit(&tor, start(), at(6)), Some(LifecycleStatus::NewIssue));
        assert_eq!(tracker.admit(&tor, start(), at(7)), None);

        let old = warning("A0", "Tornado Warning", "radar indicated", start());
        assert_eq!(tracker.admit(&old, start(), at(7)), None);
        assert!(tracker.seen().contains(&"A0".to_string()));

        let cancel = warning("A2", "Tornado Warning", "The warning has been cancelled", at(8));
        assert_eq!(tracker.admit(&cancel, start(), at(9)), Some(LifecycleStatus::Cancel));
    }

    #[test]
    fn test_special_weather_statement_refires_after_six_hours() {
        let mut tracker = WarningTracker::default();
        let sws = warning("ABC123", "Special Weather Statement", "Strong thunderstorm near town", at(5));

        assert_eq!(tracker.admit(&sws, start(), at(5)), Some(LifecycleStatus::NewIssue));
        assert_eq!(tracker.admit(&sws, start(), at(5 + 60)), None);
        assert_eq!(
            tracker.admit(&sws, start(), at(5 + 7 * 60)),
            Some(LifecycleStatus::NewIssue)
        );
    }

    #[test]
    fn test_other_statements_retained() {
        let mut tracker = WarningTracker::default();
        let fog = warning("FOG1", "Special Weather Statement", "Dense fog", at(5));
        assert!(tracker.admit(&fog, start(), at(5)).is_some());
        assert_eq!(tracker.admit(&fog, start(), at(5 + 7 * 60)), None);
    }

    proptest! {
        #[test]
        fn prop_watch_announced_at_most_once(
            ticks in prop::collection::vec(
                prop::collection::vec((1u32..6, -120i64..3000, any::<bool>()), 0..6),
                1..40,
            )
        ) {
            let mut tracker = WatchTracker::default();
            let mut announced: HashSet<(u32, DateTime<Utc>)> = HashSet::new();

            for (tick, snapshot) in ticks.iter().enumerate() {
                let now = at(tick as i64 * 90);
                tracker.sweep(now);
                for &(number, sent_offset, new_issue) in snapshot {
                    let status = if new_issue { LifecycleStatus::NewIssue } else { LifecycleStatus::Update };
                    let watch = tornado_watch(number, at(sent_offset), status);
                    if tracker.admit_watch(&watch, start(), now) {
                        prop_assert!(watch.sent > start());
                        prop_assert!(announced.insert((number, watch.sent)));
                    }
                }
            }
        }

        #[test]
        fn prop_warning_announced_at_most_once(
            ticks in prop::collection::vec(
                prop::collection::vec((0u32..8, -60i64..600), 0..6),
                1..30,
            )
        ) {
            let mut tracker = WarningTracker::default();
            let mut announced: HashSet<String> = HashSet::new();

            for (tick, snapshot) in ticks.iter().enumerate() {
                let now = at(tick as i64 * 10);
                for &(id, sent_offset) in snapshot {
                    let w = warning(&format!("W{}", id), "Tornado Warning", "radar indicated", at(sent_offset));
                    if tracker.admit(&w, start(), now).is_some() {
                        prop_assert!(w.sent > start());
                        prop_assert!(announced.insert(w.id.clone()));
                    }
                }
            }
        }
    }
}
