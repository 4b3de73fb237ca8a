//! Cooperative scheduler that drives every [`Processor`] at a bounded tick
//! interval on a single background task (spec.md §4.2).
//!
//! The original engine ran one OS thread per `RTPGroup`, sleeping between
//! ticks and iterating its processor list with a generation counter so a
//! processor could attach or detach mid-iteration without invalidating the
//! list. This crate keeps that exact shape but runs the loop as a tokio
//! task instead of a dedicated thread, and uses a `listChanged` flag plus
//! a snapshot copy instead of raw index bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::config::RtpConfig;

/// Process-wide floor under every Group's tick interval. The original
/// engine let one slow consumer widen everyone else's sleep; clamping this
/// independently of any single Group's `def_sleep_ms` keeps that failure
/// mode from crossing Group boundaries. Clamped to [1, 20] ms on write.
static MIN_SLEEP_FLOOR_MS: AtomicU64 = AtomicU64::new(5);

/// Lower the process-wide minimum sleep floor, clamped to [1, 20] ms.
/// Only ever lowers the floor; raising it back up is not supported, matching
/// the original engine's one-directional tightening.
pub fn tighten_min_sleep_floor(requested_ms: u64) {
    let clamped = requested_ms.clamp(1, 20);
    let mut current = MIN_SLEEP_FLOOR_MS.load(Ordering::Relaxed);
    while clamped < current {
        match MIN_SLEEP_FLOOR_MS.compare_exchange_weak(
            current,
            clamped,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

fn min_sleep_floor() -> Duration {
    Duration::from_millis(MIN_SLEEP_FLOOR_MS.load(Ordering::Relaxed))
}

/// Something a [`Group`] can tick. Implemented by [`crate::transport::Transport`]
/// and [`crate::session::Session`]; a `Processor` never blocks and never
/// sleeps -- all pacing is the Group's job.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Called once per Group tick. `now` is the tick's wall-clock time so
    /// every processor in the same tick agrees on "now".
    async fn tick(&self, now: std::time::Instant);

    /// True once this processor has nothing left to do and can be dropped
    /// from the Group's list. Checked after every `tick`.
    fn is_finished(&self) -> bool {
        false
    }
}

struct Slot {
    processor: Arc<dyn Processor>,
}

/// A cooperative scheduler: ticks its processors in registration order at
/// a bounded interval and drops finished ones automatically.
pub struct Group {
    slots: Mutex<Vec<Slot>>,
    list_changed: std::sync::atomic::AtomicBool,
    sleep_ms: u64,
    handle: Mutex<Option<JoinHandle<()>>>,
    notify: Arc<Notify>,
}

impl Group {
    /// Create a new, unstarted Group. Call [`Group::join`] to add
    /// processors; the background task starts lazily on the first join,
    /// matching the original engine's auto-start behaviour.
    pub fn new(config: &RtpConfig) -> Arc<Self> {
        tighten_min_sleep_floor(config.min_sleep_ms);
        Arc::new(Self {
            slots: Mutex::new(Vec::new()),
            list_changed: std::sync::atomic::AtomicBool::new(false),
            sleep_ms: config.group_sleep_ms(),
            handle: Mutex::new(None),
            notify: Arc::new(Notify::new()),
        })
    }

    /// This Group's tick interval, clamped to the process-wide floor.
    fn effective_sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms).max(min_sleep_floor())
    }

    /// Attach a processor. Starts the background tick task if it is not
    /// already running.
    pub fn join(self: &Arc<Self>, processor: Arc<dyn Processor>) {
        self.slots.lock().push(Slot { processor });
        self.list_changed.store(true, Ordering::Release);
        self.ensure_running();
    }

    /// Detach a processor by identity, if present. Sets `list_changed` so
    /// any in-flight tick walk aborts and re-snapshots rather than ticking
    /// a processor the caller just removed.
    pub fn part(&self, processor: &Arc<dyn Processor>) {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|s| !Arc::ptr_eq(&s.processor, processor));
        if slots.len() != before {
            self.list_changed.store(true, Ordering::Release);
        }
    }

    fn ensure_running(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_none() {
            let this = Arc::clone(self);
            *handle = Some(tokio::spawn(async move { this.run().await }));
        }
    }

    #[instrument(skip(self), name = "group_run")]
    async fn run(self: Arc<Self>) {
        loop {
            let snapshot: Vec<Arc<dyn Processor>> = {
                let slots = self.slots.lock();
                if slots.is_empty() {
                    break;
                }
                slots.iter().map(|s| Arc::clone(&s.processor)).collect()
            };
            self.list_changed.store(false, Ordering::Release);

            let now = std::time::Instant::now();
            for processor in &snapshot {
                processor.tick(now).await;
                // A join/leave during this tick means the rest of the
                // snapshot may include a processor that just left, or miss
                // one that just joined; abort the walk and let the next
                // cycle re-snapshot rather than tick against a stale list.
                if self.list_changed.load(Ordering::Acquire) {
                    debug!("processor list changed mid-tick, aborting snapshot");
                    break;
                }
            }

            {
                let mut slots = self.slots.lock();
                slots.retain(|s| !s.processor.is_finished());
                if slots.is_empty() {
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.effective_sleep()) => {}
                _ = self.notify.notified() => {}
            }
        }
        debug!("group exiting, no processors remain");
    }

    /// Number of processors currently attached.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background task without waiting for processors to finish
    /// naturally. Used by tests and by orderly shutdown.
    pub async fn shutdown(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        } else {
            warn!("shutdown called on a Group with no running task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct CountingProcessor {
        ticks: AtomicUsize,
        finish_after: usize,
    }

    #[async_trait]
    impl Processor for CountingProcessor {
        async fn tick(&self, _now: std::time::Instant) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn is_finished(&self) -> bool {
            self.ticks.load(Ordering::SeqCst) >= self.finish_after
        }
    }

    #[tokio::test]
    async fn ticks_a_processor_until_finished() {
        let group = Group::new(&RtpConfig::builder().def_sleep_ms(1).build());
        let processor = Arc::new(CountingProcessor { ticks: AtomicUsize::new(0), finish_after: 3 });
        group.join(processor.clone());

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(processor.ticks.load(Ordering::SeqCst) >= 3);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(group.len(), 0);
    }

    #[tokio::test]
    async fn part_removes_a_processor_and_marks_list_changed() {
        let group = Group::new(&RtpConfig::builder().def_sleep_ms(1).build());
        let a: Arc<dyn Processor> = Arc::new(CountingProcessor { ticks: AtomicUsize::new(0), finish_after: usize::MAX });
        let b: Arc<dyn Processor> = Arc::new(CountingProcessor { ticks: AtomicUsize::new(0), finish_after: usize::MAX });
        group.join(a.clone());
        group.join(b.clone());
        assert_eq!(group.len(), 2);

        group.part(&a);
        assert_eq!(group.len(), 1);

        // Removing something already absent is a no-op.
        group.part(&a);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn min_sleep_floor_only_tightens() {
        tighten_min_sleep_floor(10);
        let tightened = min_sleep_floor();
        tighten_min_sleep_floor(50); // wider request ignored
        assert_eq!(min_sleep_floor(), tightened);
        tighten_min_sleep_floor(2);
        assert_eq!(min_sleep_floor(), Duration::from_millis(2));
    }
}
