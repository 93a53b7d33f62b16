//! Per-slot accumulator records.
//!
//! Totals and counters only grow (saturating). Minima use zero as the
//! "not yet set" marker, so a genuine zero observation is indistinguishable
//! from an empty slot and is overwritten by the next non-zero sample.

use serde::Serialize;
use std::fmt;

/// Zero means unset: any candidate replaces it, otherwise only a smaller one.
#[inline(always)]
fn offer_min(current: &mut u64, candidate: u64) {
    if *current == 0 || candidate < *current {
        *current = candidate;
    }
}

#[inline(always)]
fn offer_max(current: &mut u64, candidate: u64) {
    if candidate > *current {
        *current = candidate;
    }
}

/// Smaller of two minima where zero means "no observation".
fn merge_min(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, x) | (x, 0) => x,
        (a, b) => a.min(b),
    }
}

/// `total / calls`, or `None` when nothing was counted.
#[inline]
pub fn average(total: u64, calls: u64) -> Option<f64> {
    if calls == 0 {
        None
    } else {
        Some(total as f64 / calls as f64)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuStat {
    pub total_cycles: u64,
    pub min_cycles: u64,
    pub max_cycles: u64,
}

impl CpuStat {
    #[inline(always)]
    pub fn add_total(&mut self, cycles: u64) {
        self.total_cycles = self.total_cycles.saturating_add(cycles);
    }

    #[inline(always)]
    pub fn offer_min(&mut self, cycles: u64) {
        offer_min(&mut self.min_cycles, cycles);
    }

    #[inline(always)]
    pub fn offer_max(&mut self, cycles: u64) {
        offer_max(&mut self.max_cycles, cycles);
    }

    pub fn average(&self, calls: u64) -> Option<f64> {
        average(self.total_cycles, calls)
    }

    pub(crate) fn merge(&mut self, other: &CpuStat) {
        self.add_total(other.total_cycles);
        self.min_cycles = merge_min(self.min_cycles, other.min_cycles);
        self.offer_max(other.max_cycles);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TimeStat {
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl TimeStat {
    #[inline(always)]
    pub fn add_total(&mut self, ns: u64) {
        self.total_ns = self.total_ns.saturating_add(ns);
    }

    #[inline(always)]
    pub fn offer_min(&mut self, ns: u64) {
        offer_min(&mut self.min_ns, ns);
    }

    #[inline(always)]
    pub fn offer_max(&mut self, ns: u64) {
        offer_max(&mut self.max_ns, ns);
    }

    pub fn average(&self, calls: u64) -> Option<f64> {
        average(self.total_ns, calls)
    }

    pub(crate) fn merge(&mut self, other: &TimeStat) {
        self.add_total(other.total_ns);
        self.min_ns = merge_min(self.min_ns, other.min_ns);
        self.offer_max(other.max_ns);
    }
}

/// Outcome counters. Independent of each other: the instrumented code decides
/// which hints it reports, nothing here enforces that they sum to `total`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CallStat {
    pub total: u64,
    pub early_return: u64,
    pub success: u64,
    pub failure: u64,
}

impl CallStat {
    pub(crate) fn merge(&mut self, other: &CallStat) {
        self.total = self.total.saturating_add(other.total);
        self.early_return = self.early_return.saturating_add(other.early_return);
        self.success = self.success.saturating_add(other.success);
        self.failure = self.failure.saturating_add(other.failure);
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Tier {
    L1 = 0,
    L2 = 1,
    L3 = 2,
    Dram = 3,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::L1, Tier::L2, Tier::L3, Tier::Dram];

    pub fn name(self) -> &'static str {
        match self {
            Tier::L1 => "L1",
            Tier::L2 => "L2",
            Tier::L3 => "L3",
            Tier::Dram => "DRAM",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counter deltas pulled from hardware since the previous sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwCacheDelta {
    pub l1_miss: u64,
    pub l1_access: u64,
    pub llc_miss: u64,
}

/// Estimated (or, with hardware counters, measured) cache behaviour.
///
/// `l1_miss` counts L1→L2 misses, `l2_miss` L2→L3, `l3_miss` L3→DRAM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStat {
    pub l1_access: u64,
    pub l2_access: u64,
    pub l3_access: u64,
    pub dram_access: u64,

    pub l1_miss: u64,
    pub l2_miss: u64,
    pub l3_miss: u64,
}

impl CacheStat {
    /// One access served by `tier`; anything past L1 is also a miss one level up.
    #[inline]
    pub fn record_tier(&mut self, tier: Tier) {
        match tier {
            Tier::L1 => self.l1_access += 1,
            Tier::L2 => {
                self.l2_access += 1;
                self.l1_miss += 1;
            }
            Tier::L3 => {
                self.l3_access += 1;
                self.l2_miss += 1;
            }
            Tier::Dram => {
                self.dram_access += 1;
                self.l3_miss += 1;
            }
        }
    }

    /// Last level cache misses are booked as L3 misses.
    #[inline]
    pub fn record_hardware(&mut self, delta: HwCacheDelta) {
        self.l1_miss = self.l1_miss.saturating_add(delta.l1_miss);
        self.l1_access = self.l1_access.saturating_add(delta.l1_access);
        self.l3_miss = self.l3_miss.saturating_add(delta.llc_miss);
    }

    pub fn accesses(&self, tier: Tier) -> u64 {
        match tier {
            Tier::L1 => self.l1_access,
            Tier::L2 => self.l2_access,
            Tier::L3 => self.l3_access,
            Tier::Dram => self.dram_access,
        }
    }

    pub(crate) fn merge(&mut self, other: &CacheStat) {
        self.l1_access = self.l1_access.saturating_add(other.l1_access);
        self.l2_access = self.l2_access.saturating_add(other.l2_access);
        self.l3_access = self.l3_access.saturating_add(other.l3_access);
        self.dram_access = self.dram_access.saturating_add(other.dram_access);
        self.l1_miss = self.l1_miss.saturating_add(other.l1_miss);
        self.l2_miss = self.l2_miss.saturating_add(other.l2_miss);
        self.l3_miss = self.l3_miss.saturating_add(other.l3_miss);
    }
}
