//! Cycle and wall-clock sources for basalt instrumentation.
//!
//! Two cycle readers are exposed:
//!
//! - [`cycles`]: a plain timestamp-counter read. Cheapest, but the CPU may
//!   reorder it around neighbouring instructions.
//! - [`cycles_serialized`]: fenced on both sides so every earlier instruction
//!   has retired before the read and nothing later starts before it. Used for
//!   scope boundaries and latency calibration.
//!
//! On architectures without a user-readable cycle counter both functions fall
//! back to [`now_ns`], so callers always get a monotonic tick.

// ─── Wall clock ─────────────────────────────────────────────────────────────

#[cfg(target_os = "macos")]
#[inline(always)]
#[allow(deprecated)]
pub fn now_ns() -> u64 {
    use std::sync::OnceLock;
    static TIMEBASE: OnceLock<(u64, u64)> = OnceLock::new();
    let (numer, denom) = *TIMEBASE.get_or_init(|| {
        let mut info = libc::mach_timebase_info_data_t { numer: 0, denom: 0 };
        let rc = unsafe { libc::mach_timebase_info(&mut info) };
        if rc != 0 || info.denom == 0 {
            (1, 1)
        } else {
            (info.numer as u64, info.denom as u64)
        }
    });
    let t = unsafe { libc::mach_absolute_time() } as u128;
    ((t * numer as u128) / denom as u128) as u64
}

/// Monotonic nanoseconds. `CLOCK_MONOTONIC_RAW` on Linux so NTP slewing does
/// not leak into measured durations.
#[cfg(not(target_os = "macos"))]
#[inline(always)]
pub fn now_ns() -> u64 {
    #[cfg(target_os = "linux")]
    const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC_RAW;
    #[cfg(not(target_os = "linux"))]
    const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(CLOCK, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

// ─── Cycle counters ─────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn cycles() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn cycles_serialized() -> u64 {
    use core::arch::x86_64::{__rdtscp, _mm_lfence};
    let mut aux = 0u32;
    unsafe {
        _mm_lfence();
        let t = __rdtscp(&mut aux);
        _mm_lfence();
        t
    }
}

#[cfg(target_arch = "x86")]
#[inline(always)]
pub fn cycles() -> u64 {
    unsafe { core::arch::x86::_rdtsc() }
}

#[cfg(target_arch = "x86")]
#[inline(always)]
pub fn cycles_serialized() -> u64 {
    use core::arch::x86::{__rdtscp, _mm_lfence};
    let mut aux = 0u32;
    unsafe {
        _mm_lfence();
        let t = __rdtscp(&mut aux);
        _mm_lfence();
        t
    }
}

/// CNTVCT_EL0 ticks at a fixed frequency, not the core clock, but it is
/// readable from EL0 and monotonic across cores.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn cycles() -> u64 {
    let val: u64;
    unsafe {
        core::arch::asm!("mrs {}, cntvct_el0", out(reg) val);
    }
    val
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn cycles_serialized() -> u64 {
    let val: u64;
    unsafe {
        core::arch::asm!("isb", "mrs {}, cntvct_el0", "isb", out(reg) val);
    }
    val
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
#[inline(always)]
pub fn cycles() -> u64 {
    now_ns()
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
#[inline(always)]
pub fn cycles_serialized() -> u64 {
    now_ns()
}

/// Serialized cycles spent running `f`, alongside its result.
#[inline(always)]
pub fn measure_cycles<F, R>(f: F) -> (u64, R)
where
    F: FnOnce() -> R,
{
    let start = cycles_serialized();
    let result = f();
    let end = cycles_serialized();
    (end.saturating_sub(start), result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hint::black_box;

    #[test]
    fn now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn serialized_cycles_do_not_go_backwards_on_one_thread() {
        let a = cycles_serialized();
        let b = cycles_serialized();
        assert!(b >= a);
    }

    #[test]
    fn measure_cycles_returns_closure_result() {
        let (_elapsed, sum) = measure_cycles(|| {
            let mut acc = 0u64;
            for i in 0..1_000u64 {
                acc = black_box(acc.wrapping_add(i));
            }
            acc
        });
        assert_eq!(sum, 499_500);
    }
}
