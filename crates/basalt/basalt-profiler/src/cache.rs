//! Cache tier classification.
//!
//! Three policies, picked once when the classifier is built:
//!
//! | Policy     | Input used                        | Source of truth          |
//! |------------|-----------------------------------|--------------------------|
//! | Hardware   | perf counter deltas (sample unused) | L1 miss/access, LLC miss |
//! | Calibrated | elapsed cycles                    | measured tier latencies  |
//! | Static     | elapsed cycles                    | fixed thresholds         |
//!
//! The hardware path is exact but coarse: deltas cover everything the thread
//! ran since the previous sample, not just the marked region.

use basalt_hwcounters::{CounterKind, CounterSource};
use serde::Serialize;
use std::fmt;

use crate::calibrate::CacheLatencyProfile;
use crate::stats::{CacheStat, HwCacheDelta, Tier};

/// Upper bound (inclusive) in cycles for a sample to count as a hit in each
/// tier. Anything above `l3` is a DRAM access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TierThresholds {
    pub l1: u64,
    pub l2: u64,
    pub l3: u64,
}

impl TierThresholds {
    /// Used until (or unless) calibration succeeds.
    pub const STATIC: TierThresholds = TierThresholds {
        l1: 25,
        l2: 35,
        l3: 90,
    };

    /// Measured latency plus 12.5% headroom for L1 and 25% for L2/L3.
    pub fn from_profile(profile: &CacheLatencyProfile) -> Self {
        Self {
            l1: profile.l1_cycles + (profile.l1_cycles >> 3),
            l2: profile.l2_cycles + (profile.l2_cycles >> 2),
            l3: profile.l3_cycles + (profile.l3_cycles >> 2),
        }
    }

    /// Lowest tier whose threshold covers `elapsed`.
    #[inline]
    pub fn tier_for(&self, elapsed: u64) -> Tier {
        if elapsed <= self.l1 {
            Tier::L1
        } else if elapsed <= self.l2 {
            Tier::L2
        } else if elapsed <= self.l3 {
            Tier::L3
        } else {
            Tier::Dram
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    Hardware,
    Calibrated,
    Static,
}

impl fmt::Display for ClassifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClassifierMode::Hardware => "hardware counters",
            ClassifierMode::Calibrated => "calibrated thresholds",
            ClassifierMode::Static => "static thresholds",
        })
    }
}

enum Policy {
    Hardware(Box<dyn CounterSource>),
    Thresholds {
        mode: ClassifierMode,
        thresholds: TierThresholds,
    },
}

pub struct CacheClassifier {
    policy: Policy,
}

impl CacheClassifier {
    /// Hardware counters if any opened, calibrated thresholds if the profile
    /// is calibrated, static thresholds otherwise.
    pub fn select(counters: Box<dyn CounterSource>, profile: &CacheLatencyProfile) -> Self {
        if counters.is_available() {
            Self {
                policy: Policy::Hardware(counters),
            }
        } else if profile.calibrated {
            Self::calibrated(TierThresholds::from_profile(profile))
        } else {
            Self::fallback()
        }
    }

    pub fn fallback() -> Self {
        Self {
            policy: Policy::Thresholds {
                mode: ClassifierMode::Static,
                thresholds: TierThresholds::STATIC,
            },
        }
    }

    pub fn calibrated(thresholds: TierThresholds) -> Self {
        Self {
            policy: Policy::Thresholds {
                mode: ClassifierMode::Calibrated,
                thresholds,
            },
        }
    }

    pub fn mode(&self) -> ClassifierMode {
        match &self.policy {
            Policy::Hardware(_) => ClassifierMode::Hardware,
            Policy::Thresholds { mode, .. } => *mode,
        }
    }

    /// `None` in hardware mode.
    pub fn thresholds(&self) -> Option<TierThresholds> {
        match &self.policy {
            Policy::Hardware(_) => None,
            Policy::Thresholds { thresholds, .. } => Some(*thresholds),
        }
    }

    pub fn counters_mut(&mut self) -> Option<&mut (dyn CounterSource + 'static)> {
        match &mut self.policy {
            Policy::Hardware(counters) => Some(counters.as_mut()),
            Policy::Thresholds { .. } => None,
        }
    }

    /// Books one sample into `stat`. Returns the tier for threshold policies,
    /// `None` when hardware deltas were applied instead.
    pub fn classify(&mut self, stat: &mut CacheStat, elapsed_cycles: u64) -> Option<Tier> {
        match &mut self.policy {
            Policy::Hardware(counters) => {
                let delta = HwCacheDelta {
                    l1_miss: counters.read_and_reset(CounterKind::L1Miss),
                    llc_miss: counters.read_and_reset(CounterKind::LlcMiss),
                    l1_access: counters.read_and_reset(CounterKind::L1Access),
                };
                stat.record_hardware(delta);
                None
            }
            Policy::Thresholds { thresholds, .. } => {
                let tier = thresholds.tier_for(elapsed_cycles);
                stat.record_tier(tier);
                Some(tier)
            }
        }
    }
}

impl Default for CacheClassifier {
    fn default() -> Self {
        Self::fallback()
    }
}

impl fmt::Debug for CacheClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClassifier")
            .field("mode", &self.mode())
            .field("thresholds", &self.thresholds())
            .finish()
    }
}
