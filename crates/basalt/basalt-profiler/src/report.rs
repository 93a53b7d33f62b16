//! Read-only views over a [`StatTable`].
//!
//! A [`Report`] is a detached copy: building one never mutates the table, and
//! the copy stays valid after the profiler that produced it has ended.

use serde::Serialize;
use std::fmt;

use crate::cache::{ClassifierMode, TierThresholds};
use crate::calibrate::CacheLatencyProfile;
use crate::host::{HostInfo, format_bytes};
use crate::stats::{CacheStat, CallStat, CpuStat, TimeStat};
use crate::table::StatTable;

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub id: u32,
    pub file: String,
    pub function: String,
    pub line: u32,
    pub reserved: bool,
    pub cpu: CpuStat,
    pub time: TimeStat,
    pub calls: CallStat,
    pub cache: CacheStat,
    /// `None` until the slot has counted a call.
    pub avg_cycles: Option<f64>,
    pub avg_ns: Option<f64>,
}

impl StatTable {
    /// Every registered slot, in allocation order.
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.registered()
            .map(|header| {
                let id = header.id();
                let cpu = self.cpu(id).copied().unwrap_or_default();
                let time = self.time(id).copied().unwrap_or_default();
                let calls = self.calls(id).copied().unwrap_or_default();
                SlotSnapshot {
                    id: id.0,
                    file: header.file().to_owned(),
                    function: header.function().to_owned(),
                    line: header.line(),
                    reserved: id.is_reserved(),
                    cpu,
                    time,
                    calls,
                    cache: self.cache(id).copied().unwrap_or_default(),
                    avg_cycles: cpu.average(calls.total),
                    avg_ns: time.average(calls.total),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub host: HostInfo,
    pub mode: ClassifierMode,
    pub thresholds: Option<TierThresholds>,
    pub profile: CacheLatencyProfile,
    pub slots: Vec<SlotSnapshot>,
}

impl Report {
    pub fn new(table: &StatTable, profile: CacheLatencyProfile, host: HostInfo) -> Self {
        Self {
            host,
            mode: table.classifier().mode(),
            thresholds: table.classifier().thresholds(),
            profile,
            slots: table.snapshot(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn slot(&self, function: &str) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.function == function)
    }
}

struct Avg(Option<f64>);

impl fmt::Display for Avg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.4}"),
            None => f.write_str("undefined"),
        }
    }
}

impl fmt::Display for SlotSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index: {}", self.id)?;
        writeln!(f, "File name: {}", self.file)?;
        writeln!(f, "Function name: {}", self.function)?;
        writeln!(f, "Line number: {}", self.line)?;
        writeln!(f)?;

        writeln!(f, "Total cycles: {}", self.cpu.total_cycles)?;
        writeln!(f, "Minimum cycles: {}", self.cpu.min_cycles)?;
        writeln!(f, "Maximum cycles: {}", self.cpu.max_cycles)?;
        writeln!(f, "Average cycles: {}", Avg(self.avg_cycles))?;
        writeln!(f)?;

        writeln!(f, "Total time (ns): {}", self.time.total_ns)?;
        writeln!(f, "Minimum time (ns): {}", self.time.min_ns)?;
        writeln!(f, "Maximum time (ns): {}", self.time.max_ns)?;
        writeln!(f, "Average time (ns): {}", Avg(self.avg_ns))?;
        writeln!(f)?;

        writeln!(f, "Total calls: {}", self.calls.total)?;
        writeln!(f, "Early returns: {}", self.calls.early_return)?;
        writeln!(f, "Successful returns: {}", self.calls.success)?;
        writeln!(f, "Failed returns: {}", self.calls.failure)?;
        writeln!(f)?;

        writeln!(f, "L1 accesses: {}", self.cache.l1_access)?;
        writeln!(f, "L2 accesses: {}", self.cache.l2_access)?;
        writeln!(f, "L3 accesses: {}", self.cache.l3_access)?;
        writeln!(f, "DRAM accesses: {}", self.cache.dram_access)?;
        writeln!(f, "L1 misses: {}", self.cache.l1_miss)?;
        writeln!(f, "L2 misses: {}", self.cache.l2_miss)?;
        write!(f, "L3 misses: {}", self.cache.l3_miss)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "─".repeat(RULE_WIDTH);

        writeln!(f, "{rule}")?;
        write!(
            f,
            "  host: {} logical cpus, {} memory",
            self.host.logical_cpus,
            format_bytes(self.host.total_memory_bytes)
        )?;
        if let Some(pct) = self.host.memory_used_pct() {
            write!(f, " ({pct:.0}% used)")?;
        }
        writeln!(f)?;

        write!(f, "  cache classifier: {}", self.mode)?;
        if let Some(t) = self.thresholds {
            write!(f, " (L1 <= {}, L2 <= {}, L3 <= {} cycles)", t.l1, t.l2, t.l3)?;
        }
        writeln!(f)?;
        if self.profile.calibrated {
            writeln!(
                f,
                "  measured latency: L1 {} / L2 {} / L3 {} / DRAM {} cycles",
                self.profile.l1_cycles,
                self.profile.l2_cycles,
                self.profile.l3_cycles,
                self.profile.dram_cycles
            )?;
        }
        writeln!(f, "{rule}")?;

        for slot in &self.slots {
            writeln!(f, "{slot}")?;
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StatEvent;

    fn host() -> HostInfo {
        HostInfo {
            logical_cpus: 8,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            available_memory_bytes: None,
        }
    }

    #[test]
    fn snapshot_follows_allocation_order() {
        let mut table = StatTable::new();
        table.register("a.rs", "first", 1);
        table.register("b.rs", "second", 2);
        table.register_reserved("basalt", "internal", 0);

        let names: Vec<_> = table.snapshot().into_iter().map(|s| s.function).collect();
        assert_eq!(names, ["internal", "first", "second"]);
    }

    #[test]
    fn text_dump_marks_zero_call_average_undefined() {
        let mut table = StatTable::new();
        let slot = table.register("idle.rs", "never_called", 12);
        table.apply(StatEvent::CyclesTotal, slot, 50).unwrap();

        let text = Report::new(&table, CacheLatencyProfile::default(), host()).to_string();
        assert!(text.contains("Function name: never_called"));
        assert!(text.contains("Line number: 12"));
        assert!(text.contains("Average cycles: undefined"));
        assert!(text.contains("static thresholds"));
        assert!(text.contains("16.0 GB"));
    }

    #[test]
    fn building_a_report_is_read_only() {
        let mut table = StatTable::new();
        let slot = table.register("r.rs", "busy", 1);
        table.apply(StatEvent::CallTotal, slot, 2).unwrap();
        table.apply(StatEvent::CyclesTotal, slot, 10).unwrap();

        let first = Report::new(&table, CacheLatencyProfile::default(), host());
        let second = Report::new(&table, CacheLatencyProfile::default(), host());
        assert_eq!(first.slots, second.slots);
        assert_eq!(first.slots[0].avg_cycles, Some(5.0));
    }
}
