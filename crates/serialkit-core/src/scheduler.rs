//! Named periodic timers with drift correction
//!
//! Timers are evaluated by [`Scheduler::tick`], either from the tokio driver
//! started with [`Scheduler::spawn_driver`] or directly by a caller that owns
//! its own clock. On each tick a timer whose interval has elapsed fires once
//! and its reference time advances by whole intervals, so the long-run
//! frequency stays accurate even when ticks arrive late or jittered.
//!
//! Once `stop`, `clear` or `clear_all` returns, the affected timers will not
//! fire again. Callbacks may themselves start or stop timers (including their
//! own). A callback must not block on a lock that another thread holds while
//! calling `stop`/`clear`.

use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::types::TimerCallback;

/// Default driver tick resolution
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(5);

struct TimerEntry {
    callback: TimerCallback,
    interval: Duration,
    last_fire: Instant,
    running: bool,
    generation: u64,
}

/// Registry of named periodic timers
pub struct Scheduler {
    timers: Mutex<HashMap<String, TimerEntry>>,
    /// Held while callbacks run and while timers are stopped or replaced.
    fire_guard: ReentrantMutex<()>,
    generation: AtomicU64,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            fire_guard: ReentrantMutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Start a timer, replacing any timer registered under the same id.
    ///
    /// The first firing happens one interval from now. Zero intervals are
    /// raised to one millisecond.
    pub fn start<F>(&self, id: impl Into<String>, interval: Duration, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = id.into();
        let interval = interval.max(Duration::from_millis(1));
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let _guard = self.fire_guard.lock();
        let mut timers = self.timers.lock();
        if timers.contains_key(&id) {
            tracing::debug!("Timer {} replaced", id);
        }
        timers.insert(
            id.clone(),
            TimerEntry {
                callback: Arc::new(callback),
                interval,
                last_fire: Instant::now(),
                running: true,
                generation,
            },
        );
        tracing::debug!("Timer {} started every {:?}", id, interval);
    }

    /// Stop a timer, keeping its registration. Unknown ids are ignored.
    ///
    /// Returns true if the timer was running.
    pub fn stop(&self, id: &str) -> bool {
        let _guard = self.fire_guard.lock();
        match self.timers.lock().get_mut(id) {
            Some(timer) if timer.running => {
                timer.running = false;
                tracing::debug!("Timer {} stopped", id);
                true
            }
            _ => false,
        }
    }

    /// Re-arm a stopped timer. Its reference time resets to now, so no
    /// backlog of missed firings is delivered.
    ///
    /// Returns true if the timer existed and was stopped.
    pub fn resume(&self, id: &str) -> bool {
        let _guard = self.fire_guard.lock();
        match self.timers.lock().get_mut(id) {
            Some(timer) if !timer.running => {
                timer.running = true;
                timer.last_fire = Instant::now();
                tracing::debug!("Timer {} resumed", id);
                true
            }
            _ => false,
        }
    }

    /// Stop and forget a timer. Returns true if it existed.
    pub fn clear(&self, id: &str) -> bool {
        let _guard = self.fire_guard.lock();
        let removed = self.timers.lock().remove(id).is_some();
        if removed {
            tracing::debug!("Timer {} cleared", id);
        }
        removed
    }

    /// Stop and forget every timer
    pub fn clear_all(&self) {
        let _guard = self.fire_guard.lock();
        let mut timers = self.timers.lock();
        tracing::debug!("Clearing {} timers", timers.len());
        timers.clear();
    }

    /// Whether a timer exists and is running
    pub fn is_running(&self, id: &str) -> bool {
        self.timers.lock().get(id).is_some_and(|t| t.running)
    }

    /// Whether a timer is registered, running or not
    pub fn contains(&self, id: &str) -> bool {
        self.timers.lock().contains_key(id)
    }

    /// Number of registered timers
    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    /// Whether no timers are registered
    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }

    /// Evaluate every running timer against `now`, firing those that are
    /// due. Returns the number of callbacks invoked.
    pub fn tick(&self, now: Instant) -> usize {
        let _guard = self.fire_guard.lock();

        let due: Vec<(String, u64, TimerCallback)> = {
            let mut timers = self.timers.lock();
            timers
                .iter_mut()
                .filter_map(|(id, timer)| {
                    if !timer.running {
                        return None;
                    }
                    let elapsed = now.saturating_duration_since(timer.last_fire);
                    if elapsed < timer.interval {
                        return None;
                    }
                    timer.last_fire = now - drift(elapsed, timer.interval);
                    Some((id.clone(), timer.generation, timer.callback.clone()))
                })
                .collect()
        };

        let mut fired = 0;
        for (id, generation, callback) in due {
            // An earlier callback in this tick may have stopped or replaced it.
            let live = self
                .timers
                .lock()
                .get(&id)
                .is_some_and(|t| t.running && t.generation == generation);
            if live {
                callback();
                fired += 1;
            }
        }
        fired
    }

    /// Drive this scheduler from a tokio task ticking every `resolution`.
    ///
    /// The task exits once the scheduler is dropped.
    pub fn spawn_driver(self: &Arc<Self>, resolution: Duration) -> JoinHandle<()> {
        let scheduler = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resolution);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                scheduler.tick(Instant::now());
            }
            tracing::debug!("Scheduler driver exited");
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("timers", &self.len())
            .finish()
    }
}

/// Part of `elapsed` past the last whole interval
fn drift(elapsed: Duration, interval: Duration) -> Duration {
    let rem = elapsed.as_nanos() % interval.as_nanos();
    Duration::from_nanos(rem as u64)
}
