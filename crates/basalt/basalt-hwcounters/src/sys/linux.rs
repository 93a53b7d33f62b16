use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd};

use perf_event_open_sys::bindings::{
    PERF_COUNT_HW_CACHE_L1D, PERF_COUNT_HW_CACHE_LL, PERF_COUNT_HW_CACHE_OP_READ,
    PERF_COUNT_HW_CACHE_RESULT_ACCESS, PERF_COUNT_HW_CACHE_RESULT_MISS, PERF_COUNT_HW_CPU_CYCLES,
    PERF_COUNT_HW_INSTRUCTIONS, PERF_FLAG_FD_CLOEXEC, PERF_TYPE_HARDWARE, PERF_TYPE_HW_CACHE,
    perf_event_attr,
};
use perf_event_open_sys::{ioctls, perf_event_open};

use crate::{CounterKind, HwCounterError};

/// One perf event file descriptor. Closed when dropped.
pub(crate) struct Counter {
    kind: CounterKind,
    file: File,
}

/// `config` encoding for `PERF_TYPE_HW_CACHE`: cache id | op << 8 | result << 16.
fn hw_cache_config(cache: u32, op: u32, result: u32) -> u64 {
    (cache as u64) | ((op as u64) << 8) | ((result as u64) << 16)
}

fn event_type_and_config(kind: CounterKind) -> (u32, u64) {
    match kind {
        CounterKind::L1Miss => (
            PERF_TYPE_HW_CACHE,
            hw_cache_config(
                PERF_COUNT_HW_CACHE_L1D,
                PERF_COUNT_HW_CACHE_OP_READ,
                PERF_COUNT_HW_CACHE_RESULT_MISS,
            ),
        ),
        CounterKind::L1Access => (
            PERF_TYPE_HW_CACHE,
            hw_cache_config(
                PERF_COUNT_HW_CACHE_L1D,
                PERF_COUNT_HW_CACHE_OP_READ,
                PERF_COUNT_HW_CACHE_RESULT_ACCESS,
            ),
        ),
        CounterKind::LlcMiss => (
            PERF_TYPE_HW_CACHE,
            hw_cache_config(
                PERF_COUNT_HW_CACHE_LL,
                PERF_COUNT_HW_CACHE_OP_READ,
                PERF_COUNT_HW_CACHE_RESULT_MISS,
            ),
        ),
        CounterKind::Cycles => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CPU_CYCLES as u64),
        CounterKind::Instructions => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_INSTRUCTIONS as u64),
    }
}

impl Counter {
    /// Opens a user-space-only counter for the calling thread on any CPU.
    /// The counter starts disabled.
    pub(crate) fn open(kind: CounterKind) -> Result<Self, HwCounterError> {
        let (type_, config) = event_type_and_config(kind);
        let mut attrs = perf_event_attr {
            size: std::mem::size_of::<perf_event_attr>() as u32,
            type_,
            config,
            ..perf_event_attr::default()
        };
        attrs.set_disabled(1);
        attrs.set_exclude_kernel(1);
        attrs.set_exclude_hv(1);
        attrs.set_exclude_idle(1);

        // Calling thread only, on whichever CPU it runs.
        let pid = 0;
        let cpu = -1;
        let group_fd = -1;
        let fd = unsafe {
            perf_event_open(&mut attrs, pid, cpu, group_fd, PERF_FLAG_FD_CLOEXEC as _)
        };
        if fd < 0 {
            return Err(HwCounterError::Open {
                kind,
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: fd was just returned by the kernel and nothing else owns it.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self { kind, file })
    }

    pub(crate) fn enable(&mut self) -> Result<(), HwCounterError> {
        self.ioctl(Ioctl::Enable)
    }

    pub(crate) fn disable(&mut self) -> Result<(), HwCounterError> {
        self.ioctl(Ioctl::Disable)
    }

    pub(crate) fn reset(&mut self) -> Result<(), HwCounterError> {
        self.ioctl(Ioctl::Reset)
    }

    /// Default `read_format` yields a single native-endian u64.
    pub(crate) fn read(&mut self) -> Result<u64, HwCounterError> {
        let mut buf = [0u8; 8];
        self.file
            .read_exact(&mut buf)
            .map_err(|source| HwCounterError::Read {
                kind: self.kind,
                source,
            })?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn ioctl(&mut self, op: Ioctl) -> Result<(), HwCounterError> {
        let fd = self.file.as_raw_fd();
        let rc = unsafe {
            match op {
                Ioctl::Enable => ioctls::ENABLE(fd, 0),
                Ioctl::Disable => ioctls::DISABLE(fd, 0),
                Ioctl::Reset => ioctls::RESET(fd, 0),
            }
        };
        if rc < 0 {
            return Err(HwCounterError::Ioctl {
                op: op.name(),
                kind: self.kind,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Ioctl {
    Enable,
    Disable,
    Reset,
}

impl Ioctl {
    fn name(self) -> &'static str {
        match self {
            Ioctl::Enable => "enable",
            Ioctl::Disable => "disable",
            Ioctl::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hw_cache_config_packs_fields() {
        assert_eq!(hw_cache_config(3, 0, 1), 3 | (1 << 16));
        assert_eq!(hw_cache_config(0, 1, 0), 1 << 8);
    }

    #[test]
    fn cache_kinds_use_hw_cache_type() {
        for kind in [CounterKind::L1Miss, CounterKind::L1Access, CounterKind::LlcMiss] {
            assert_eq!(event_type_and_config(kind).0, PERF_TYPE_HW_CACHE);
        }
        for kind in [CounterKind::Cycles, CounterKind::Instructions] {
            assert_eq!(event_type_and_config(kind).0, PERF_TYPE_HARDWARE);
        }
    }
}
