//! Memory latency self-calibration.
//!
//! For each tier a scratch buffer sized to sit in that level of the hierarchy
//! is turned into a single random cycle of indices and walked one dependent
//! load at a time. Randomising the order defeats the hardware prefetcher, and
//! because each load needs the previous result, the per-hop cost is the
//! round-trip latency of whichever level the buffer lives in.
//!
//! ```text
//!   idx:   0   1   2   3   4   5
//!   next: [3] [5] [0] [4] [1] [2]      0 → 3 → 4 → 1 → 5 → 2 → 0
//! ```

use basalt_clock::measure_cycles;
use basalt_config::{CalibrationConfig, TierProbe};
use rand::Rng;
use serde::Serialize;
use std::hint::black_box;

use crate::CalibrationError;
use crate::stats::Tier;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheLatencyProfile {
    pub l1_cycles: u64,
    pub l2_cycles: u64,
    pub l3_cycles: u64,
    pub dram_cycles: u64,
    pub calibrated: bool,
}

impl CacheLatencyProfile {
    pub fn latency(&self, tier: Tier) -> u64 {
        match tier {
            Tier::L1 => self.l1_cycles,
            Tier::L2 => self.l2_cycles,
            Tier::L3 => self.l3_cycles,
            Tier::Dram => self.dram_cycles,
        }
    }

    /// Measures every tier once. A no-op when already calibrated.
    ///
    /// Results are committed only after all four tiers succeed; on error the
    /// profile (latencies and flag) is left exactly as it was.
    pub fn calibrate(&mut self, config: &CalibrationConfig) -> Result<(), CalibrationError> {
        self.calibrate_with(config, &mut rand::thread_rng())
    }

    pub fn calibrate_with<R: Rng>(
        &mut self,
        config: &CalibrationConfig,
        rng: &mut R,
    ) -> Result<(), CalibrationError> {
        if self.calibrated {
            return Ok(());
        }

        tracing::info!("starting cache latency calibration");

        let probes = [
            (Tier::L1, config.l1),
            (Tier::L2, config.l2),
            (Tier::L3, config.l3),
            (Tier::Dram, config.dram),
        ];
        let mut measured = [0u64; 4];
        for (tier, probe) in probes {
            match measure_tier(tier, probe, rng) {
                Ok(cycles) => {
                    tracing::info!(%tier, bytes = probe.bytes, cycles, "tier latency");
                    measured[tier as usize] = cycles;
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "cache calibration aborted, keeping static thresholds"
                    );
                    return Err(err);
                }
            }
        }

        *self = CacheLatencyProfile {
            l1_cycles: measured[Tier::L1 as usize],
            l2_cycles: measured[Tier::L2 as usize],
            l3_cycles: measured[Tier::L3 as usize],
            dram_cycles: measured[Tier::Dram as usize],
            calibrated: true,
        };
        tracing::info!(
            l1 = self.l1_cycles,
            l2 = self.l2_cycles,
            l3 = self.l3_cycles,
            dram = self.dram_cycles,
            "cache latency calibration complete"
        );
        Ok(())
    }
}

fn measure_tier<R: Rng>(
    tier: Tier,
    probe: TierProbe,
    rng: &mut R,
) -> Result<u64, CalibrationError> {
    let cells = probe.bytes / std::mem::size_of::<usize>();
    if cells < 2 || probe.hops == 0 {
        return Err(CalibrationError::InvalidProbe {
            tier,
            bytes: probe.bytes,
            hops: probe.hops,
        });
    }

    let ring = build_ring(cells, rng).map_err(|source| CalibrationError::Alloc {
        tier,
        bytes: probe.bytes,
        source,
    })?;
    Ok(chase(&ring, probe.hops))
}

/// `ring[i]` is the index visited after `i`; following it from any start
/// visits every cell exactly once before returning.
///
/// Sattolo's variant of Fisher–Yates (`j < i`, never `j == i`) is what
/// guarantees a single cycle rather than a set of disjoint loops.
pub(crate) fn build_ring<R: Rng>(
    cells: usize,
    rng: &mut R,
) -> Result<Vec<usize>, std::collections::TryReserveError> {
    let mut ring = Vec::new();
    ring.try_reserve_exact(cells)?;
    ring.extend(0..cells);

    for i in (1..cells).rev() {
        let j = rng.gen_range(0..i);
        ring.swap(i, j);
    }
    Ok(ring)
}

/// Average serialized cycles per dependent hop.
fn chase(ring: &[usize], hops: u64) -> u64 {
    let (elapsed, last) = measure_cycles(|| {
        let mut current = 0usize;
        for _ in 0..hops {
            current = ring[current];
        }
        current
    });
    black_box(last);
    elapsed / hops
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tiny_config() -> CalibrationConfig {
        CalibrationConfig {
            l1: TierProbe::new(1024, 200),
            l2: TierProbe::new(4 * 1024, 100),
            l3: TierProbe::new(16 * 1024, 50),
            dram: TierProbe::new(64 * 1024, 25),
        }
    }

    #[test]
    fn ring_is_a_single_cycle() {
        let mut rng = StdRng::seed_from_u64(7);
        let ring = build_ring(1000, &mut rng).unwrap();

        let mut seen = vec![false; ring.len()];
        let mut at = 0usize;
        for _ in 0..ring.len() {
            assert!(!seen[at], "revisited {at} before covering the ring");
            seen[at] = true;
            at = ring[at];
        }
        assert_eq!(at, 0);
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn ring_has_no_fixed_points() {
        let mut rng = StdRng::seed_from_u64(42);
        let ring = build_ring(64, &mut rng).unwrap();
        assert!(ring.iter().enumerate().all(|(i, &next)| i != next));
    }

    #[test]
    fn calibrate_sets_flag_once() {
        let mut profile = CacheLatencyProfile::default();
        let mut rng = StdRng::seed_from_u64(1);
        profile.calibrate_with(&tiny_config(), &mut rng).unwrap();
        assert!(profile.calibrated);

        let first = profile;
        profile.calibrate_with(&tiny_config(), &mut rng).unwrap();
        assert_eq!(profile, first);
    }

    #[test]
    fn allocation_failure_leaves_profile_untouched() {
        let mut config = tiny_config();
        // The byte count overflows isize, so the reservation fails without
        // touching the allocator.
        config.l3 = TierProbe::new(usize::MAX, 10);

        let mut profile = CacheLatencyProfile::default();
        let err = profile.calibrate(&config).unwrap_err();

        assert!(matches!(err, CalibrationError::Alloc { .. }));
        assert_eq!(err.tier(), Tier::L3);
        assert_eq!(profile, CacheLatencyProfile::default());
    }

    #[test]
    fn degenerate_probe_is_rejected() {
        let mut config = tiny_config();
        config.l1 = TierProbe::new(8, 100);

        let mut profile = CacheLatencyProfile::default();
        let err = profile.calibrate(&config).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidProbe { tier: Tier::L1, .. }));
        assert!(!profile.calibrated);
    }
}
