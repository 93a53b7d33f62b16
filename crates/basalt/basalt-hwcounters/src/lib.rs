//! Optional OS performance counters.
//!
//! [`HwCounters::init`] tries to open each [`CounterKind`] on its own. A kind
//! that fails to open is logged and reads as zero from then on; the set is
//! considered available as long as at least one kind opened. On platforms
//! without `perf_event_open` the set is never available and callers fall back
//! to cycle-based estimation.

mod error;
mod sys;

pub use error::HwCounterError;

use std::fmt;

use sys::Counter;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// L1 data cache read misses.
    L1Miss = 0,
    /// L1 data cache read accesses.
    L1Access = 1,
    /// Last level cache read misses.
    LlcMiss = 2,
    Cycles = 3,
    Instructions = 4,
}

pub const NUM_KINDS: usize = 5;

impl CounterKind {
    pub const ALL: [CounterKind; NUM_KINDS] = [
        CounterKind::L1Miss,
        CounterKind::L1Access,
        CounterKind::LlcMiss,
        CounterKind::Cycles,
        CounterKind::Instructions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CounterKind::L1Miss => "L1 data cache miss",
            CounterKind::L1Access => "L1 data cache access",
            CounterKind::LlcMiss => "last level cache miss",
            CounterKind::Cycles => "CPU cycles",
            CounterKind::Instructions => "instructions",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Anything the cache classifier can pull counter deltas from.
///
/// `Send` so a profiling context built on a worker thread can be handed back
/// and merged.
///
/// Thread affinity: perf counters are opened for the calling thread only
/// (`pid = 0`), so `Send` moves the handle but not what it counts. Read a
/// hardware source on the thread that opened it. To move results, hand over
/// the finished table rather than a live source.
pub trait CounterSource: Send {
    fn is_available(&self) -> bool;

    /// Count accumulated since the previous reset, then zero the counter.
    /// Unopened kinds report 0.
    fn read_and_reset(&mut self, kind: CounterKind) -> u64;

    fn disable(&mut self) {}

    /// Releases the underlying handles; the source is unavailable afterwards.
    fn close(&mut self) {}
}

pub struct HwCounters {
    handles: [Option<Counter>; NUM_KINDS],
    available: bool,
}

impl HwCounters {
    /// Opens every counter kind independently. Never fails as a whole.
    pub fn init() -> Self {
        let mut handles: [Option<Counter>; NUM_KINDS] = Default::default();

        for kind in CounterKind::ALL {
            match Counter::open(kind) {
                Ok(counter) => {
                    tracing::debug!(%kind, "opened hardware counter");
                    handles[kind as usize] = Some(counter);
                }
                Err(err) => {
                    tracing::warn!(%kind, error = %err, "hardware counter unavailable");
                }
            }
        }

        let available = handles.iter().any(Option::is_some);
        if available {
            tracing::info!("hardware performance counters initialized");
        } else {
            tracing::info!("no hardware performance counters could be opened");
        }

        Self { handles, available }
    }

    /// A set with nothing opened, for hosts where counters are disabled.
    pub fn unavailable() -> Self {
        Self {
            handles: Default::default(),
            available: false,
        }
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn opened(&self) -> impl Iterator<Item = CounterKind> + '_ {
        CounterKind::ALL
            .into_iter()
            .filter(|&kind| self.handles[kind as usize].is_some())
    }

    pub fn enable(&mut self) {
        self.for_each_open("enable", Counter::enable);
    }

    pub fn disable(&mut self) {
        self.for_each_open("disable", Counter::disable);
    }

    pub fn reset_all(&mut self) {
        self.for_each_open("reset", Counter::reset);
    }

    /// Current count without resetting. Unopened kinds and read failures
    /// report 0.
    pub fn read(&mut self, kind: CounterKind) -> u64 {
        let Some(counter) = self.handles[kind as usize].as_mut() else {
            return 0;
        };
        match counter.read() {
            Ok(count) => count,
            Err(err) => {
                tracing::debug!(%kind, error = %err, "hardware counter read failed");
                0
            }
        }
    }

    /// Releases every handle. The set is unavailable afterwards.
    pub fn close(&mut self) {
        if !self.available {
            return;
        }
        for slot in self.handles.iter_mut() {
            slot.take();
        }
        self.available = false;
        tracing::debug!("hardware counters closed");
    }

    fn for_each_open(
        &mut self,
        op: &'static str,
        f: fn(&mut Counter) -> Result<(), HwCounterError>,
    ) {
        if !self.available {
            return;
        }
        for counter in self.handles.iter_mut().flatten() {
            if let Err(err) = f(counter) {
                tracing::warn!(op, error = %err, "hardware counter control failed");
            }
        }
    }
}

impl CounterSource for HwCounters {
    fn is_available(&self) -> bool {
        self.available
    }

    fn read_and_reset(&mut self, kind: CounterKind) -> u64 {
        let count = self.read(kind);
        if let Some(counter) = self.handles[kind as usize].as_mut() {
            if let Err(err) = counter.reset() {
                tracing::debug!(%kind, error = %err, "hardware counter reset failed");
            }
        }
        count
    }

    fn disable(&mut self) {
        HwCounters::disable(self);
    }

    fn close(&mut self) {
        HwCounters::close(self);
    }
}

impl Default for HwCounters {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl fmt::Debug for HwCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwCounters")
            .field("available", &self.available)
            .field("opened", &self.opened().collect::<Vec<_>>())
            .finish()
    }
}
