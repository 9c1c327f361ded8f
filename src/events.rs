//! The polling engine.
//!
//! [`Events`] polls the active product feeds on a fixed interval, reconciles
//! each snapshot against its trackers and hands genuinely new products to
//! the registered observers.
//!
//! A tick runs up to three sub-routines concurrently: watches (with watch
//! boxes), mesoscale discussions and warnings. A sub-routine only runs when
//! somebody is subscribed to its notifications, and a failed fetch only
//! costs that sub-routine its tick.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::FetchError;
use crate::dispatch::{DispatchReport, Dispatcher, SubscriptionId};
use crate::model::{LifecycleStatus, MesoscaleDiscussion, Warning, Watch, WatchBox, WatchKind};
use crate::nws::DEFAULT_WARNING_EVENTS;
use crate::source::DataSource;
use crate::stats::{EngineStats, Stream};
use crate::tracker::{Horizons, MdTracker, WarningTracker, WatchTracker};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Tick as soon as the engine is enabled instead of after one interval.
    pub tick_on_start: bool,
    /// Alert event categories passed to the warning fetch.
    pub warning_filter: Vec<String>,
    pub horizons: Horizons,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            tick_on_start: true,
            warning_filter: DEFAULT_WARNING_EVENTS.iter().map(|e| e.to_string()).collect(),
            horizons: Horizons::default(),
        }
    }
}

/// Lifecycle of the periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never enabled.
    Stopped,
    /// Enabled before, currently not ticking.
    Disabled,
    /// Ticking.
    Enabled,
}

/// State shared between the handle and the periodic task.
struct Shared {
    source: Arc<dyn DataSource>,
    config: EventsConfig,
    dispatcher: Dispatcher,
    stats: Arc<EngineStats>,
    clock: Clock,
    start: OnceLock<DateTime<Utc>>,
    tick_lock: Mutex<()>,
    watches: Mutex<WatchTracker>,
    mds: Mutex<MdTracker>,
    warnings: Mutex<WarningTracker>,
}

/// Severe weather event engine.
///
/// Everything issued at or before the moment listening starts is treated
/// as history and never announced. Dropping the handle stops the periodic
/// task.
pub struct Events {
    shared: Arc<Shared>,
    state: watch::Sender<EngineState>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("dispatcher", &self.shared.dispatcher)
            .finish()
    }
}

impl Events {
    pub fn new(source: Arc<dyn DataSource>, config: EventsConfig) -> Self {
        Self::with_clock(source, config, Arc::new(Utc::now))
    }

    /// Create an engine that reads the time from `clock`.
    pub fn with_clock(source: Arc<dyn DataSource>, config: EventsConfig, clock: Clock) -> Self {
        let horizons = config.horizons;
        let (state, _) = watch::channel(EngineState::Stopped);
        Self {
            shared: Arc::new(Shared {
                source,
                config,
                dispatcher: Dispatcher::new(),
                stats: Arc::new(EngineStats::new()),
                clock,
                start: OnceLock::new(),
                tick_lock: Mutex::new(()),
                watches: Mutex::new(WatchTracker::new(horizons)),
                mds: Mutex::new(MdTracker::new(horizons)),
                warnings: Mutex::new(WarningTracker::new(horizons)),
            }),
            state,
            task: StdMutex::new(None),
        }
    }

    /// Start or resume ticking.
    ///
    /// The first call records the listening start time and spawns the
    /// periodic task on the current tokio runtime.
    pub fn enable(&self) -> Result<(), TryCurrentError> {
        let handle = Handle::try_current()?;
        let start = self.shared.start_time();

        // Must precede the spawn: the first tick reads it.
        if self.state.send_replace(EngineState::Enabled) != EngineState::Enabled {
            info!("Event engine enabled");
        }

        if let Ok(mut task) = self.task.lock()
            && task.is_none()
        {
            info!("Listening for severe weather events issued after {}", start);
            let shared = Arc::clone(&self.shared);
            let state = self.state.subscribe();
            *task = Some(handle.spawn(run(shared, state)));
        }
        Ok(())
    }

    /// Suspend ticking. Tracker state is kept.
    pub fn disable(&self) {
        if self.state() != EngineState::Enabled {
            return;
        }
        self.state.send_replace(EngineState::Disabled);
        info!("Event engine disabled");
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// When listening started, if it has.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.shared.start.get().copied()
    }

    /// Run one tick now, regardless of state.
    ///
    /// Records the listening start time if the engine was never enabled.
    /// Never overlaps with a periodic tick.
    pub async fn poll_once(&self) {
        self.shared.tick().await;
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Subscribe to newly issued watches. Each call receives the watches of
    /// one kind together with every watch box admitted in the same tick.
    pub fn on_watch_issued<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&[Watch], &[WatchBox]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_watch_issued(observer)
    }

    pub fn on_mesoscale_discussion_issued<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&[MesoscaleDiscussion]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_mesoscale_discussion_issued(observer)
    }

    /// Subscribe to warnings, delivered one at a time with the transition
    /// they represent.
    pub fn on_warning_issued<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&Warning, LifecycleStatus) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.on_warning_issued(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }
}

impl Drop for Events {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.task.lock()
            && let Some(task) = guard.take()
        {
            task.abort();
        }
    }
}

/// The periodic task.
async fn run(shared: Arc<Shared>, mut state: watch::Receiver<EngineState>) {
    let period = shared.config.interval;
    let mut interval = if shared.config.tick_on_start {
        tokio::time::interval(period)
    } else {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    };
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if *state.borrow_and_update() != EngineState::Enabled {
            // Park until re-enabled; the sender goes away with the handle.
            if state.wait_for(|s| *s == EngineState::Enabled).await.is_err() {
                return;
            }
            if shared.config.tick_on_start {
                interval.reset_immediately();
            } else {
                interval.reset();
            }
            continue;
        }

        shared.tick().await;
    }
}

impl Shared {
    fn start_time(&self) -> DateTime<Utc> {
        *self.start.get_or_init(|| (self.clock)())
    }

    async fn tick(&self) {
        let _guard = self.tick_lock.lock().await;
        let began = Instant::now();
        let start = self.start_time();
        let now = (self.clock)();

        tokio::join!(
            self.run_stream(Stream::Watches, self.reconcile_watches(start, now)),
            self.run_stream(Stream::MesoscaleDiscussions, self.reconcile_mds(start, now)),
            self.run_stream(Stream::Warnings, self.reconcile_warnings(start, now)),
        );

        let elapsed = began.elapsed();
        self.stats.record_tick(elapsed);
        debug!("Tick finished in {:?}", elapsed);
    }

    async fn run_stream(&self, stream: Stream, work: impl Future<Output = Result<(), FetchError>>) {
        if let Err(e) = work.await {
            self.stats.record_fetch_failure(stream);
            warn!("Skipping {} this tick: {}", stream, e);
        }
    }

    async fn reconcile_watches(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), FetchError> {
        if !self.dispatcher.has_watch_observers() {
            return Ok(());
        }

        let (severe, tornado, boxes) = tokio::join!(
            self.source.fetch_active_watches(WatchKind::SevereThunderstorm),
            self.source.fetch_active_watches(WatchKind::Tornado),
            self.source.fetch_active_watch_boxes(),
        );
        let (severe, tornado, boxes) = (severe?, tornado?, boxes?);

        let mut tracker = self.watches.lock().await;
        tracker.sweep(now);
        let new_boxes = tracker.admit_boxes(boxes, start, now);

        let mut report = DispatchReport::default();
        for (kind, watches) in [(WatchKind::SevereThunderstorm, severe), (WatchKind::Tornado, tornado)] {
            let new = tracker.admit_watches(watches, start, now);
            if new.is_empty() {
                continue;
            }

            let numbers: Vec<u32> = new.iter().map(|w| w.number).collect();
            info!("New {}: {:?} ({} watch boxes)", kind.event_name(), numbers, new_boxes.len());

            report.merge(self.dispatcher.dispatch_watches(&new, &new_boxes));
            self.stats.record_announced(Stream::Watches, new.len());
            self.stats
                .watch_boxes_announced
                .fetch_add(new_boxes.len() as u64, Ordering::Relaxed);
        }
        self.stats.record_dispatch(report);
        Ok(())
    }

    async fn reconcile_mds(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), FetchError> {
        if !self.dispatcher.has_md_observers() {
            return Ok(());
        }

        let mds = self.source.fetch_active_mesoscale_discussions().await?;

        let mut tracker = self.mds.lock().await;
        tracker.sweep(now);
        let new = tracker.admit_all(mds, start, now);
        if new.is_empty() {
            return Ok(());
        }

        let numbers: Vec<u32> = new.iter().map(|md| md.number).collect();
        info!("New mesoscale discussions: {:?}", numbers);

        let report = self.dispatcher.dispatch_mds(&new);
        self.stats.record_dispatch(report);
        self.stats.record_announced(Stream::MesoscaleDiscussions, new.len());
        Ok(())
    }

    async fn reconcile_warnings(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), FetchError> {
        if !self.dispatcher.has_warning_observers() {
            return Ok(());
        }

        let warnings = self.source.fetch_active_warnings(&self.config.warning_filter).await?;

        let mut tracker = self.warnings.lock().await;
        let mut report = DispatchReport::default();
        for warning in &warnings {
            let Some(status) = tracker.admit(warning, start, now) else {
                continue;
            };
            info!("{} ({}): {}", warning.name, status, warning.id);

            report.merge(self.dispatcher.dispatch_warning(warning, status));
            self.stats.record_announced(Stream::Warnings, 1);
        }
        self.stats.record_dispatch(report);
        Ok(())
    }
}
