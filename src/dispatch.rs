//! Notification delivery to registered observers.
//!
//! Observers are plain closures returning `anyhow::Result<()>`. Each one
//! runs in isolation: an error or a panic is logged and counted, and the
//! remaining observers still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use crate::model::{LifecycleStatus, MesoscaleDiscussion, Warning, Watch, WatchBox};

/// Callback for newly issued watches and the watch boxes admitted alongside.
pub type WatchObserver = Arc<dyn Fn(&[Watch], &[WatchBox]) -> anyhow::Result<()> + Send + Sync>;

/// Callback for newly issued mesoscale discussions.
pub type MdObserver = Arc<dyn Fn(&[MesoscaleDiscussion]) -> anyhow::Result<()> + Send + Sync>;

/// Callback for a single warning and the transition it represents.
pub type WarningObserver = Arc<dyn Fn(&Warning, LifecycleStatus) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of delivering one notification to every observer of its kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

type Registry<F> = RwLock<Vec<(SubscriptionId, F)>>;

/// Registered observers, partitioned by notification kind.
#[derive(Default)]
pub struct Dispatcher {
    next_id: AtomicU64,
    watch: Registry<WatchObserver>,
    md: Registry<MdObserver>,
    warning: Registry<WarningObserver>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("watch_observers", &count(&self.watch))
            .field("md_observers", &count(&self.md))
            .field("warning_observers", &count(&self.warning))
            .finish()
    }
}

fn count<F>(registry: &Registry<F>) -> usize {
    registry.read().map(|r| r.len()).unwrap_or(0)
}

fn snapshot<F: Clone>(registry: &Registry<F>) -> Vec<(SubscriptionId, F)> {
    registry.read().map(|r| r.clone()).unwrap_or_default()
}

/// Run one observer, turning errors and panics into a failed delivery.
fn deliver(kind: &str, id: SubscriptionId, call: impl FnOnce() -> anyhow::Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{} observer {:?} failed: {:#}", kind, id, e);
            false
        }
        Err(_) => {
            error!("{} observer {:?} panicked", kind, id);
            false
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register<F>(&self, registry: &Registry<F>, observer: F) -> SubscriptionId {
        let id = self.next_id();
        if let Ok(mut observers) = registry.write() {
            observers.push((id, observer));
        }
        id
    }

    pub fn on_watch_issued<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&[Watch], &[WatchBox]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(&self.watch, Arc::new(observer) as WatchObserver)
    }

    pub fn on_mesoscale_discussion_issued<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&[MesoscaleDiscussion]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(&self.md, Arc::new(observer) as MdObserver)
    }

    pub fn on_warning_issued<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&Warning, LifecycleStatus) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(&self.warning, Arc::new(observer) as WarningObserver)
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        fn remove<F>(registry: &Registry<F>, id: SubscriptionId) -> bool {
            match registry.write() {
                Ok(mut observers) => {
                    let before = observers.len();
                    observers.retain(|(existing, _)| *existing != id);
                    observers.len() != before
                }
                Err(_) => false,
            }
        }
        remove(&self.watch, id) || remove(&self.md, id) || remove(&self.warning, id)
    }

    pub fn has_watch_observers(&self) -> bool {
        count(&self.watch) > 0
    }

    pub fn has_md_observers(&self) -> bool {
        count(&self.md) > 0
    }

    pub fn has_warning_observers(&self) -> bool {
        count(&self.warning) > 0
    }

    /// Deliver a batch of watches of one kind with the new watch boxes.
    pub fn dispatch_watches(&self, watches: &[Watch], boxes: &[WatchBox]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, observer) in snapshot(&self.watch) {
            report.record(deliver("Watch", id, || observer(watches, boxes)));
        }
        report
    }

    /// Deliver a batch of mesoscale discussions.
    pub fn dispatch_mds(&self, mds: &[MesoscaleDiscussion]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, observer) in snapshot(&self.md) {
            report.record(deliver("Mesoscale discussion", id, || observer(mds)));
        }
        report
    }

    /// Deliver one warning.
    pub fn dispatch_warning(&self, warning: &Warning, status: LifecycleStatus) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, observer) in snapshot(&self.warning) {
            report.record(deliver("Warning", id, || observer(warning, status)));
        }
        report
    }
}

impl DispatchReport {
    fn record(&mut self, delivered: bool) {
        if delivered {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Fold another batch's outcome into this one.
    pub fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}
