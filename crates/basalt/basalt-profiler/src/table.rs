//! Fixed-capacity slot tables and the event accumulation protocol.
//!
//! Layout is struct-of-arrays: one flat array per record type, all indexed by
//! [`SlotId`]. The hot path (`apply`) touches only the array for the event it
//! handles, so a cycles update never drags cache statistics into L1.

use std::collections::HashMap;
use std::ops::Range;

use crate::cache::CacheClassifier;
use crate::event::{OutputKind, QueryValue, StatEvent};
use crate::slot::{CAPACITY, RESERVED_SLOTS, SlotHeader, SlotId};
use crate::stats::{CacheStat, CallStat, CpuStat, TimeStat};
use crate::{ProfilerError, Tier};

pub struct StatTable {
    headers: Box<[Option<SlotHeader>; CAPACITY]>,
    cpu: Box<[CpuStat; CAPACITY]>,
    time: Box<[TimeStat; CAPACITY]>,
    calls: Box<[CallStat; CAPACITY]>,
    cache: Box<[CacheStat; CAPACITY]>,

    // Slots are never released, so the first free index of each range only
    // moves forward and the scan starts from here instead of from zero.
    next_reserved: usize,
    next_user: usize,

    classifier: CacheClassifier,
}

impl StatTable {
    /// Empty tables with the static-threshold classifier.
    pub fn new() -> Self {
        Self::with_classifier(CacheClassifier::fallback())
    }

    pub fn with_classifier(classifier: CacheClassifier) -> Self {
        Self {
            headers: Box::new([None; CAPACITY]),
            cpu: Box::new([CpuStat::default(); CAPACITY]),
            time: Box::new([TimeStat::default(); CAPACITY]),
            calls: Box::new([CallStat::default(); CAPACITY]),
            cache: Box::new([CacheStat::default(); CAPACITY]),
            next_reserved: 0,
            next_user: RESERVED_SLOTS,
            classifier,
        }
    }

    // ─── Registry ───────────────────────────────────────────────────────────

    /// Claims the first free user slot for a call site.
    ///
    /// Returns [`SlotId::SENTINEL`] once all user slots are taken. Callers are
    /// expected to keep the returned id and register each site only once.
    pub fn register(&mut self, file: &str, function: &str, line: u32) -> SlotId {
        let range = self.next_user..CAPACITY;
        match self.claim(range, file, function, line) {
            Some(index) => {
                self.next_user = index + 1;
                SlotId(index as u32)
            }
            None => {
                tracing::warn!(file, function, line, "slot table full, call site not tracked");
                SlotId::SENTINEL
            }
        }
    }

    /// Same as [`register`](Self::register) but from the profiler's own
    /// reserved range.
    pub fn register_reserved(&mut self, file: &str, function: &str, line: u32) -> SlotId {
        let range = self.next_reserved..RESERVED_SLOTS;
        match self.claim(range, file, function, line) {
            Some(index) => {
                self.next_reserved = index + 1;
                SlotId(index as u32)
            }
            None => {
                tracing::warn!(function, "reserved slots exhausted");
                SlotId::SENTINEL
            }
        }
    }

    fn claim(
        &mut self,
        mut range: Range<usize>,
        file: &str,
        function: &str,
        line: u32,
    ) -> Option<usize> {
        let index = range.find(|&i| self.headers[i].is_none())?;
        self.headers[index] = Some(SlotHeader::new(SlotId(index as u32), file, function, line));
        Some(index)
    }

    #[inline]
    pub fn is_registered(&self, slot: SlotId) -> bool {
        slot.in_bounds() && self.headers[slot.index()].is_some()
    }

    pub fn header(&self, slot: SlotId) -> Option<&SlotHeader> {
        self.headers.get(slot.index())?.as_ref()
    }

    /// Registered headers in allocation-index order.
    pub fn registered(&self) -> impl Iterator<Item = &SlotHeader> + '_ {
        self.headers.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.registered().count()
    }

    pub fn is_empty(&self) -> bool {
        self.registered().next().is_none()
    }

    /// Slot already holding this (file, function, line), compared after the
    /// same truncation registration applies.
    pub fn find(&self, file: &str, function: &str, line: u32) -> Option<SlotId> {
        let wanted = SlotHeader::new(SlotId::SENTINEL, file, function, line);
        self.registered()
            .find(|h| h.key() == wanted.key())
            .map(SlotHeader::id)
    }

    // ─── Accumulation ───────────────────────────────────────────────────────

    /// Folds one event into `slot`.
    ///
    /// Only registered slots accept events. Anything else (the sentinel, an
    /// out-of-range id, a row no call site owns yet) is rejected and nothing
    /// is mutated, so a row is still zeroed when `register` hands it out.
    pub fn apply(
        &mut self,
        event: StatEvent,
        slot: SlotId,
        value: u64,
    ) -> Result<(), ProfilerError> {
        if !self.is_registered(slot) {
            return Err(ProfilerError::InvalidSlot(slot));
        }
        let i = slot.index();

        match event {
            StatEvent::CyclesTotal => self.cpu[i].add_total(value),
            StatEvent::CyclesMin => self.cpu[i].offer_min(value),
            StatEvent::CyclesMax => self.cpu[i].offer_max(value),

            StatEvent::TimeTotal => self.time[i].add_total(value),
            StatEvent::TimeMin => self.time[i].offer_min(value),
            StatEvent::TimeMax => self.time[i].offer_max(value),

            StatEvent::CallTotal => {
                self.calls[i].total = self.calls[i].total.saturating_add(value)
            }
            StatEvent::CallEarlyReturn => {
                self.calls[i].early_return = self.calls[i].early_return.saturating_add(value)
            }
            StatEvent::CallSuccess => {
                self.calls[i].success = self.calls[i].success.saturating_add(value)
            }
            StatEvent::CallFailure => {
                self.calls[i].failure = self.calls[i].failure.saturating_add(value)
            }

            StatEvent::CacheAccess => {
                self.classify(slot, value);
            }
        }
        Ok(())
    }

    /// Raw-tag entry point. Unknown tags and bad slots are logged and ignored.
    pub fn apply_raw(&mut self, tag: u8, slot: SlotId, value: u64) {
        let result = StatEvent::try_from(tag).and_then(|event| self.apply(event, slot, value));
        if let Err(err) = result {
            tracing::warn!(error = %err, "stat event dropped");
        }
    }

    /// Runs the cache classifier for one sample. `None` for hardware mode or
    /// an unregistered slot.
    pub fn classify(&mut self, slot: SlotId, elapsed_cycles: u64) -> Option<Tier> {
        if !self.is_registered(slot) {
            return None;
        }
        let stat = &mut self.cache[slot.index()];
        self.classifier.classify(stat, elapsed_cycles)
    }

    /// Convenience for a completed call: total, min and max for both cycles
    /// and time.
    pub fn record_call_end(
        &mut self,
        slot: SlotId,
        cycles: u64,
        ns: u64,
    ) -> Result<(), ProfilerError> {
        for (event, value) in [
            (StatEvent::CyclesTotal, cycles),
            (StatEvent::CyclesMin, cycles),
            (StatEvent::CyclesMax, cycles),
            (StatEvent::TimeTotal, ns),
            (StatEvent::TimeMin, ns),
            (StatEvent::TimeMax, ns),
        ] {
            self.apply(event, slot, value)?;
        }
        Ok(())
    }

    // ─── Queries ────────────────────────────────────────────────────────────

    pub fn query(&self, kind: OutputKind, slot: SlotId) -> QueryValue {
        if !self.is_registered(slot) {
            return QueryValue::Undefined;
        }
        let i = slot.index();
        let calls = self.calls[i].total;

        let avg = |v: Option<f64>| v.map_or(QueryValue::Undefined, QueryValue::Average);
        match kind {
            OutputKind::CyclesAvg => avg(self.cpu[i].average(calls)),
            OutputKind::TimeAvg => avg(self.time[i].average(calls)),
            OutputKind::L1Misses => QueryValue::Count(self.cache[i].l1_miss),
            OutputKind::L2Misses => QueryValue::Count(self.cache[i].l2_miss),
            OutputKind::L3Misses => QueryValue::Count(self.cache[i].l3_miss),
        }
    }

    pub fn query_raw(&self, tag: u8, slot: SlotId) -> QueryValue {
        match OutputKind::try_from(tag) {
            Ok(kind) => self.query(kind, slot),
            Err(err) => {
                tracing::warn!(error = %err, "query ignored");
                QueryValue::Undefined
            }
        }
    }

    pub fn cpu(&self, slot: SlotId) -> Option<&CpuStat> {
        self.cpu.get(slot.index())
    }

    pub fn time(&self, slot: SlotId) -> Option<&TimeStat> {
        self.time.get(slot.index())
    }

    pub fn calls(&self, slot: SlotId) -> Option<&CallStat> {
        self.calls.get(slot.index())
    }

    pub fn cache(&self, slot: SlotId) -> Option<&CacheStat> {
        self.cache.get(slot.index())
    }

    pub fn classifier(&self) -> &CacheClassifier {
        &self.classifier
    }

    pub fn classifier_mut(&mut self) -> &mut CacheClassifier {
        &mut self.classifier
    }

    pub fn set_classifier(&mut self, classifier: CacheClassifier) {
        self.classifier = classifier;
    }

    // ─── Merge ──────────────────────────────────────────────────────────────

    /// Folds `other` into this table, matching slots by (file, function, line).
    ///
    /// Call sites only present in `other` are registered here first, into the
    /// same range (reserved or user) they occupy there. Sites that no longer
    /// fit are skipped with a warning.
    pub fn merge_from(&mut self, other: &StatTable) {
        let mut by_key: HashMap<(String, String, u32), SlotId> = self
            .registered()
            .map(|h| ((h.file().to_owned(), h.function().to_owned(), h.line()), h.id()))
            .collect();

        for header in other.registered() {
            let key = (header.file().to_owned(), header.function().to_owned(), header.line());
            let target = match by_key.get(&key) {
                Some(&id) => id,
                None => {
                    let id = if header.id().is_reserved() {
                        self.register_reserved(header.file(), header.function(), header.line())
                    } else {
                        self.register(header.file(), header.function(), header.line())
                    };
                    if id.is_sentinel() {
                        continue;
                    }
                    by_key.insert(key, id);
                    id
                }
            };

            let (src, dst) = (header.id().index(), target.index());
            self.cpu[dst].merge(&other.cpu[src]);
            self.time[dst].merge(&other.time[src]);
            self.calls[dst].merge(&other.calls[src]);
            self.cache[dst].merge(&other.cache[src]);
        }
    }
}

impl Default for StatTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TierThresholds;
    use crate::cache::tests::FakeCounters;
    use crate::calibrate::CacheLatencyProfile;
    use crate::slot::MAX_USER_SLOTS;

    fn feed_cycles(table: &mut StatTable, slot: SlotId, samples: &[u64]) {
        for &v in samples {
            table.apply(StatEvent::CyclesTotal, slot, v).unwrap();
            table.apply(StatEvent::CyclesMin, slot, v).unwrap();
            table.apply(StatEvent::CyclesMax, slot, v).unwrap();
        }
    }

    #[test]
    fn first_user_slot_follows_reserved_range() {
        let mut table = StatTable::new();
        let a = table.register("a.rs", "a", 1);
        let b = table.register("b.rs", "b", 2);
        assert_eq!(a, SlotId(RESERVED_SLOTS as u32));
        assert_eq!(b, SlotId(RESERVED_SLOTS as u32 + 1));
        assert_eq!(table.header(a).unwrap().function(), "a");
    }

    #[test]
    fn reserved_registration_never_touches_user_range() {
        let mut table = StatTable::new();
        let r = table.register_reserved("basalt", "internal", 0);
        assert_eq!(r, SlotId(0));
        assert!(r.is_reserved());
        assert_eq!(table.register("u.rs", "u", 1), SlotId(RESERVED_SLOTS as u32));
    }

    #[test]
    fn capacity_boundary() {
        let mut table = StatTable::new();

        for i in 0..RESERVED_SLOTS {
            assert!(!table.register_reserved("internal", "r", i as u32).is_sentinel());
        }
        for i in 0..MAX_USER_SLOTS {
            assert!(!table.register("user.rs", "f", i as u32).is_sentinel());
        }
        assert_eq!(table.len(), CAPACITY);

        assert_eq!(table.register("user.rs", "overflow", 9999), SlotId::SENTINEL);
        assert_eq!(table.register_reserved("internal", "overflow", 9999), SlotId::SENTINEL);
        assert_eq!(table.len(), CAPACITY);
    }

    #[test]
    fn sentinel_slot_is_rejected_without_mutation() {
        let mut table = StatTable::new();
        assert_eq!(
            table.apply(StatEvent::CallTotal, SlotId::SENTINEL, 1),
            Err(ProfilerError::InvalidSlot(SlotId::SENTINEL))
        );
        assert_eq!(table.query(OutputKind::CyclesAvg, SlotId::SENTINEL), QueryValue::Undefined);
        assert_eq!(table.classify(SlotId::SENTINEL, 10), None);
    }

    #[test]
    fn min_max_total_for_cycle_sequence() {
        let mut table = StatTable::new();
        let slot = table.register("t.rs", "seq", 1);
        feed_cycles(&mut table, slot, &[50, 10, 80, 10]);

        let cpu = table.cpu(slot).unwrap();
        assert_eq!(cpu.min_cycles, 10);
        assert_eq!(cpu.max_cycles, 80);
        assert_eq!(cpu.total_cycles, 150);
    }

    #[test]
    fn min_max_total_for_time_sequence() {
        let mut table = StatTable::new();
        let slot = table.register("t.rs", "seq", 1);
        for v in [50, 10, 80, 10] {
            table.apply(StatEvent::TimeTotal, slot, v).unwrap();
            table.apply(StatEvent::TimeMin, slot, v).unwrap();
            table.apply(StatEvent::TimeMax, slot, v).unwrap();
        }

        let time = table.time(slot).unwrap();
        assert_eq!(time.min_ns, 10);
        assert_eq!(time.max_ns, 80);
        assert_eq!(time.total_ns, 150);
        assert_eq!(*table.cpu(slot).unwrap(), CpuStat::default());
    }

    #[test]
    fn unregistered_slot_rejects_events_and_registers_clean() {
        let mut table = StatTable::new();
        let unclaimed = SlotId(RESERVED_SLOTS as u32);
        for _ in 0..3 {
            assert_eq!(
                table.apply(StatEvent::CallFailure, unclaimed, 1),
                Err(ProfilerError::InvalidSlot(unclaimed))
            );
        }
        assert_eq!(
            table.record_call_end(unclaimed, 10, 10),
            Err(ProfilerError::InvalidSlot(unclaimed))
        );
        assert_eq!(table.classify(unclaimed, 10), None);

        let slot = table.register("new.rs", "fresh", 1);
        assert_eq!(slot, unclaimed);
        assert_eq!(*table.calls(slot).unwrap(), CallStat::default());
        assert_eq!(*table.cpu(slot).unwrap(), CpuStat::default());
        assert_eq!(*table.cache(slot).unwrap(), CacheStat::default());
    }

    /// Zero doubles as "unset" for minima, so [0, 5] reports 5. Kept as-is;
    /// this test exists to catch an accidental change in either direction.
    #[test]
    fn zero_then_five_reports_minimum_five() {
        let mut table = StatTable::new();
        let slot = table.register("t.rs", "zero", 1);
        feed_cycles(&mut table, slot, &[0, 5]);
        assert_eq!(table.cpu(slot).unwrap().min_cycles, 5);
    }

    #[test]
    fn call_counters_are_independent() {
        let mut table = StatTable::new();
        let slot = table.register("t.rs", "calls", 1);
        table.apply(StatEvent::CallTotal, slot, 3).unwrap();
        table.apply(StatEvent::CallSuccess, slot, 1).unwrap();
        table.apply(StatEvent::CallFailure, slot, 1).unwrap();
        table.apply(StatEvent::CallEarlyReturn, slot, 4).unwrap();

        assert_eq!(
            *table.calls(slot).unwrap(),
            CallStat {
                total: 3,
                early_return: 4,
                success: 1,
                failure: 1,
            }
        );
    }

    #[test]
    fn averages_and_zero_call_guard() {
        let mut table = StatTable::new();
        let slot = table.register("t.rs", "avg", 1);
        assert_eq!(table.query(OutputKind::CyclesAvg, slot), QueryValue::Undefined);
        assert_eq!(table.query(OutputKind::TimeAvg, slot), QueryValue::Undefined);

        table.apply(StatEvent::CyclesTotal, slot, 300).unwrap();
        assert_eq!(table.query(OutputKind::CyclesAvg, slot), QueryValue::Undefined);

        table.apply(StatEvent::CallTotal, slot, 3).unwrap();
        assert_eq!(table.query(OutputKind::CyclesAvg, slot), QueryValue::Average(100.0));
    }

    #[test]
    fn unknown_raw_tags_do_nothing() {
        let mut table = StatTable::new();
        let slot = table.register("t.rs", "raw", 1);
        table.apply_raw(StatEvent::CallTotal as u8, slot, 2);
        table.apply_raw(250, slot, 99);

        assert_eq!(table.calls(slot).unwrap().total, 2);
        assert_eq!(*table.cpu(slot).unwrap(), CpuStat::default());
        assert_eq!(table.query_raw(77, slot), QueryValue::Undefined);
        assert_eq!(table.query_raw(OutputKind::L1Misses as u8, slot), QueryValue::Count(0));
    }

    #[test]
    fn cache_events_go_through_classifier() {
        let profile = CacheLatencyProfile {
            l1_cycles: 8,
            l2_cycles: 20,
            l3_cycles: 60,
            dram_cycles: 200,
            calibrated: true,
        };
        let classifier = CacheClassifier::calibrated(TierThresholds::from_profile(&profile));
        let mut table = StatTable::with_classifier(classifier);
        let slot = table.register("t.rs", "cache", 1);

        for sample in [5, 15, 45, 100] {
            table.apply(StatEvent::CacheAccess, slot, sample).unwrap();
        }

        assert_eq!(table.query(OutputKind::L1Misses, slot), QueryValue::Count(1));
        assert_eq!(table.query(OutputKind::L2Misses, slot), QueryValue::Count(1));
        assert_eq!(table.query(OutputKind::L3Misses, slot), QueryValue::Count(1));
        let cache = table.cache(slot).unwrap();
        assert_eq!(
            (cache.l1_access, cache.l2_access, cache.l3_access, cache.dram_access),
            (1, 1, 1, 1)
        );
    }

    #[test]
    fn hardware_classifier_feeds_counter_deltas() {
        let classifier = CacheClassifier::select(
            Box::new(FakeCounters::with(2, 40, 1)),
            &CacheLatencyProfile::default(),
        );
        let mut table = StatTable::with_classifier(classifier);
        let slot = table.register("t.rs", "hw", 1);

        table.apply(StatEvent::CacheAccess, slot, 12345).unwrap();
        assert_eq!(table.query(OutputKind::L1Misses, slot), QueryValue::Count(2));
        assert_eq!(table.query(OutputKind::L3Misses, slot), QueryValue::Count(1));
        assert_eq!(table.cache(slot).unwrap().l1_access, 40);
    }

    #[test]
    fn find_matches_truncated_names() {
        let mut table = StatTable::new();
        let long = "m".repeat(400);
        let slot = table.register(&long, "f", 3);
        assert_eq!(table.find(&long, "f", 3), Some(slot));
        assert_eq!(table.find(&long, "f", 4), None);
    }

    #[test]
    fn merge_adds_matching_sites_and_registers_new_ones() {
        let mut main = StatTable::new();
        let shared = main.register("w.rs", "work", 10);
        feed_cycles(&mut main, shared, &[40]);
        main.apply(StatEvent::CallTotal, shared, 1).unwrap();

        let mut worker = StatTable::new();
        let only_worker = worker.register("w.rs", "helper", 20);
        let worker_shared = worker.register("w.rs", "work", 10);
        feed_cycles(&mut worker, worker_shared, &[10, 90]);
        worker.apply(StatEvent::CallTotal, worker_shared, 2).unwrap();
        worker.apply(StatEvent::CallTotal, only_worker, 5).unwrap();

        main.merge_from(&worker);

        let cpu = main.cpu(shared).unwrap();
        assert_eq!(cpu.total_cycles, 140);
        assert_eq!(cpu.min_cycles, 10);
        assert_eq!(cpu.max_cycles, 90);
        assert_eq!(main.calls(shared).unwrap().total, 3);

        let helper = main.find("w.rs", "helper", 20).unwrap();
        assert_eq!(main.calls(helper).unwrap().total, 5);
        assert_eq!(main.len(), 2);
    }
}
