//! The profiling context and its scope guards.
//!
//! `Profiler` owns every table behind a `RefCell`, which makes it `!Sync`:
//! one context per thread, merged afterwards with [`Profiler::merge_from`].
//! Guards borrow the context only for the few instructions it takes to fold a
//! sample, so scopes nest freely.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use basalt_clock::{cycles_serialized, now_ns};
use basalt_config::{CalibrationConfig, ProfilerConfig};
use basalt_hwcounters::{CounterSource, HwCounters};

use crate::cache::{CacheClassifier, ClassifierMode, TierThresholds};
use crate::calibrate::CacheLatencyProfile;
use crate::event::{OutputKind, QueryValue, StatEvent};
use crate::host::HostInfo;
use crate::report::Report;
use crate::table::StatTable;
use crate::{CalibrationError, ProfilerError, SlotId};

/// Static identity of an instrumented call site. Build one with
/// [`callsite!`](crate::callsite).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub file: &'static str,
    pub function: &'static str,
    pub line: u32,
}

impl CallSite {
    pub const fn new(file: &'static str, function: &'static str, line: u32) -> Self {
        Self {
            file,
            function,
            line,
        }
    }
}

/// Path of the function a `callsite!` expanded in, given the type name of the
/// marker fn the macro declares there.
#[doc(hidden)]
pub fn enclosing_function(marker: &'static str) -> &'static str {
    let mut name = marker.strip_suffix("::__basalt_marker").unwrap_or(marker);
    while let Some(outer) = name.strip_suffix("::{{closure}}") {
        name = outer;
    }
    name
}

/// `CallSite` for the current file, line and enclosing function.
#[macro_export]
macro_rules! callsite {
    () => {{
        fn __basalt_marker() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::CallSite::new(
            file!(),
            $crate::enclosing_function(type_name_of(__basalt_marker)),
            line!(),
        )
    }};
}

/// Identity of the reserved slot that times the calibration run. Shared by
/// `init` and `calibrate` so the row merges across contexts.
const CALIBRATION_SITE: CallSite = CallSite::new(file!(), "basalt::calibrate", line!());

fn register_calibration_slot(table: &mut StatTable) -> SlotId {
    let site = CALIBRATION_SITE;
    table.register_reserved(site.file, site.function, site.line)
}

pub struct Profiler {
    table: RefCell<StatTable>,
    profile: CacheLatencyProfile,
    sites: RefCell<HashMap<CallSite, SlotId>>,
    calibration_slot: SlotId,
    host: HostInfo,
    ended: Cell<bool>,
}

impl Profiler {
    /// Empty tables, static thresholds, no counters and no calibration.
    pub fn new() -> Self {
        Self::from_parts(StatTable::new(), CacheLatencyProfile::default())
    }

    /// Zeroes the tables, opens hardware counters if allowed, calibrates if
    /// allowed, then fixes the cache classification policy for the lifetime of
    /// the context.
    ///
    /// Hardware counters count the calling thread only. A context in hardware
    /// mode should stay on the thread that created it: moved elsewhere, its
    /// cache deltas keep describing the original thread. Send results across
    /// threads with [`into_table`](Self::into_table) instead.
    pub fn init(config: &ProfilerConfig) -> Self {
        let mut table = StatTable::new();
        let calibration_slot = register_calibration_slot(&mut table);

        let mut profile = CacheLatencyProfile::default();
        if config.calibrate {
            // Failure is logged inside and leaves the profile uncalibrated.
            let _ =
                run_calibration(&mut table, calibration_slot, &mut profile, &config.calibration);
        }

        let mut counters = if config.hw_counters {
            HwCounters::init()
        } else {
            HwCounters::unavailable()
        };
        counters.enable();
        counters.reset_all();

        table.set_classifier(CacheClassifier::select(Box::new(counters), &profile));
        tracing::info!(
            mode = %table.classifier().mode(),
            calibrated = profile.calibrated,
            "profiler initialized"
        );

        let mut profiler = Self::from_parts(table, profile);
        profiler.calibration_slot = calibration_slot;
        profiler
    }

    /// Wraps a prepared table; its classifier is kept as-is.
    pub fn from_parts(table: StatTable, profile: CacheLatencyProfile) -> Self {
        Self {
            table: RefCell::new(table),
            profile,
            sites: RefCell::new(HashMap::new()),
            calibration_slot: SlotId::SENTINEL,
            host: HostInfo::query(),
            ended: Cell::new(false),
        }
    }

    pub fn register(&self, file: &str, function: &str, line: u32) -> SlotId {
        match self.table.try_borrow_mut() {
            Ok(mut table) => table.register(file, function, line),
            Err(_) => {
                tracing::warn!(file, function, line, "slot tables busy, call site not registered");
                SlotId::SENTINEL
            }
        }
    }

    /// Slot for `site`, registered on first use.
    pub fn slot_for(&self, site: &CallSite) -> SlotId {
        if let Some(&slot) = self.sites.borrow().get(site) {
            return slot;
        }
        let Ok(mut table) = self.table.try_borrow_mut() else {
            tracing::warn!(function = site.function, "slot tables busy, call site not registered");
            return SlotId::SENTINEL;
        };
        let slot = table.register(site.file, site.function, site.line);
        drop(table);
        // Sentinels are cached too, so a full table is reported once per site.
        self.sites.borrow_mut().insert(*site, slot);
        slot
    }

    /// Counts a call on `slot` and starts timing it. Cycles and time are
    /// folded in when the guard drops.
    ///
    /// An unregistered slot, or tables borrowed through [`with_table`],
    /// yield an inert guard that records nothing.
    ///
    /// [`with_table`]: Self::with_table
    pub fn enter(&self, slot: SlotId) -> Scope<'_> {
        if !self.record(StatEvent::CallTotal, slot, 1) {
            return Scope::inert(self);
        }
        Scope {
            profiler: self,
            slot,
            start_cycles: cycles_serialized(),
            start_ns: now_ns(),
        }
    }

    pub fn enter_site(&self, site: &CallSite) -> Scope<'_> {
        self.enter(self.slot_for(site))
    }

    /// Times a memory access region; the elapsed cycles go to the cache
    /// classifier when the guard drops.
    pub fn cache_scope(&self, slot: SlotId) -> CacheScope<'_> {
        let registered = self.table.try_borrow().is_ok_and(|t| t.is_registered(slot));
        let slot = if registered {
            slot
        } else {
            tracing::warn!(%slot, "cache scope on unregistered slot ignored");
            SlotId::SENTINEL
        };
        CacheScope {
            profiler: self,
            slot,
            start_cycles: cycles_serialized(),
        }
    }

    pub fn apply(&self, event: StatEvent, slot: SlotId, value: u64) -> Result<(), ProfilerError> {
        self.table
            .try_borrow_mut()
            .map_err(|_| ProfilerError::TableBusy)?
            .apply(event, slot, value)
    }

    pub fn apply_raw(&self, tag: u8, slot: SlotId, value: u64) {
        match self.table.try_borrow_mut() {
            Ok(mut table) => table.apply_raw(tag, slot, value),
            Err(_) => tracing::warn!(tag, %slot, "slot tables busy, raw event dropped"),
        }
    }

    pub fn query(&self, kind: OutputKind, slot: SlotId) -> QueryValue {
        self.table
            .try_borrow()
            .map_or(QueryValue::Undefined, |t| t.query(kind, slot))
    }

    pub fn query_raw(&self, tag: u8, slot: SlotId) -> QueryValue {
        self.table
            .try_borrow()
            .map_or(QueryValue::Undefined, |t| t.query_raw(tag, slot))
    }

    /// Calibrates now if init did not. On success a static-threshold
    /// classifier is upgraded to calibrated thresholds; a hardware classifier
    /// stays in place.
    pub fn calibrate(&mut self, config: &CalibrationConfig) -> Result<(), CalibrationError> {
        if self.profile.calibrated {
            return Ok(());
        }

        let table = self.table.get_mut();
        if self.calibration_slot.is_sentinel() {
            self.calibration_slot = register_calibration_slot(table);
        }
        run_calibration(table, self.calibration_slot, &mut self.profile, config)?;

        if table.classifier().mode() == ClassifierMode::Static {
            table.set_classifier(CacheClassifier::calibrated(TierThresholds::from_profile(
                &self.profile,
            )));
            tracing::info!("cache classifier switched to calibrated thresholds");
        }
        Ok(())
    }

    pub fn cache_profile(&self) -> CacheLatencyProfile {
        self.profile
    }

    pub fn classifier_mode(&self) -> ClassifierMode {
        self.table.borrow().classifier().mode()
    }

    pub fn host(&self) -> HostInfo {
        self.host
    }

    /// Read access to the tables. Scopes and events recorded from inside `f`
    /// are dropped with a warning.
    pub fn with_table<R>(&self, f: impl FnOnce(&StatTable) -> R) -> R {
        f(&self.table.borrow())
    }

    pub fn report(&self) -> Report {
        Report::new(&self.table.borrow(), self.profile, self.host)
    }

    /// Text dump of every registered slot, in allocation order.
    pub fn dump_all(&self) -> String {
        self.report().to_string()
    }

    pub fn print_all(&self) {
        print!("{}", self.report());
    }

    /// Folds another context's tables into this one.
    pub fn merge_from(&self, other: &Profiler) {
        if std::ptr::eq(self, other) {
            return;
        }
        match (self.table.try_borrow_mut(), other.table.try_borrow()) {
            (Ok(mut table), Ok(theirs)) => table.merge_from(&theirs),
            _ => tracing::warn!("slot tables busy, merge skipped"),
        }
    }

    /// Disables and closes hardware counters. Tables stay readable; calling it
    /// again does nothing.
    pub fn end(&self) {
        if self.ended.get() {
            return;
        }
        let Ok(mut table) = self.table.try_borrow_mut() else {
            tracing::warn!("slot tables busy, end deferred");
            return;
        };
        self.ended.set(true);
        if let Some(counters) = table.classifier_mut().counters_mut() {
            counters.disable();
            counters.close();
        }
        tracing::info!(slots = table.len(), "profiler ended");
    }

    /// Hands the tables back, e.g. from a worker thread to the thread that
    /// merges them.
    pub fn into_table(self) -> StatTable {
        self.table.into_inner()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }

    /// Applies one event, logging instead of failing. Returns whether it
    /// landed.
    fn record(&self, event: StatEvent, slot: SlotId, value: u64) -> bool {
        let result = match self.table.try_borrow_mut() {
            Ok(mut table) => table.apply(event, slot, value),
            Err(_) => Err(ProfilerError::TableBusy),
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%slot, error = %err, "stat event dropped");
                false
            }
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

fn run_calibration(
    table: &mut StatTable,
    slot: SlotId,
    profile: &mut CacheLatencyProfile,
    config: &CalibrationConfig,
) -> Result<(), CalibrationError> {
    let start_cycles = cycles_serialized();
    let start_ns = now_ns();
    let result = profile.calibrate(config);
    let elapsed_cycles = cycles_serialized().saturating_sub(start_cycles);
    let elapsed_ns = now_ns().saturating_sub(start_ns);

    let outcome = if result.is_ok() {
        StatEvent::CallSuccess
    } else {
        StatEvent::CallFailure
    };
    let recorded = table
        .apply(StatEvent::CallTotal, slot, 1)
        .and_then(|()| table.apply(outcome, slot, 1))
        .and_then(|()| table.record_call_end(slot, elapsed_cycles, elapsed_ns));
    if let Err(err) = recorded {
        tracing::warn!(error = %err, "calibration run not recorded");
    }
    result
}

/// Open call on one slot. Dropping it, on any exit path, records the elapsed
/// cycles and nanoseconds.
#[must_use = "the call is timed until this guard is dropped"]
pub struct Scope<'p> {
    profiler: &'p Profiler,
    slot: SlotId,
    start_cycles: u64,
    start_ns: u64,
}

impl<'p> Scope<'p> {
    fn inert(profiler: &'p Profiler) -> Self {
        Self {
            profiler,
            slot: SlotId::SENTINEL,
            start_cycles: 0,
            start_ns: 0,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn success(&self) {
        self.hint(StatEvent::CallSuccess);
    }

    pub fn failure(&self) {
        self.hint(StatEvent::CallFailure);
    }

    pub fn early_return(&self) {
        self.hint(StatEvent::CallEarlyReturn);
    }

    fn hint(&self, event: StatEvent) {
        if self.slot.in_bounds() {
            self.profiler.record(event, self.slot, 1);
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.slot.in_bounds() {
            return;
        }
        let elapsed_cycles = cycles_serialized().saturating_sub(self.start_cycles);
        let elapsed_ns = now_ns().saturating_sub(self.start_ns);
        let result = match self.profiler.table.try_borrow_mut() {
            Ok(mut table) => table.record_call_end(self.slot, elapsed_cycles, elapsed_ns),
            Err(_) => Err(ProfilerError::TableBusy),
        };
        if let Err(err) = result {
            tracing::warn!(slot = %self.slot, error = %err, "scope sample dropped");
        }
    }
}

#[must_use = "the access is timed until this guard is dropped"]
pub struct CacheScope<'p> {
    profiler: &'p Profiler,
    slot: SlotId,
    start_cycles: u64,
}

impl Drop for CacheScope<'_> {
    fn drop(&mut self) {
        if !self.slot.in_bounds() {
            return;
        }
        let elapsed = cycles_serialized().saturating_sub(self.start_cycles);
        self.profiler.record(StatEvent::CacheAccess, self.slot, elapsed);
    }
}
