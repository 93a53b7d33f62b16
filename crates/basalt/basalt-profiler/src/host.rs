// ─── Host descriptor ────────────────────────────────────────────────────────

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub logical_cpus: u64,
    pub total_memory_bytes: u64,
    /// Only reported where the OS exposes it cheaply (Linux).
    pub available_memory_bytes: Option<u64>,
}

impl HostInfo {
    pub fn query() -> Self {
        let logical_cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u64)
            .unwrap_or(0);

        Self {
            logical_cpus,
            total_memory_bytes: total_memory_bytes().unwrap_or(0),
            available_memory_bytes: available_memory_bytes(),
        }
    }

    /// Share of physical memory in use, when both totals are known.
    pub fn memory_used_pct(&self) -> Option<f64> {
        let available = self.available_memory_bytes?;
        if self.total_memory_bytes == 0 {
            return None;
        }
        let used = self.total_memory_bytes.saturating_sub(available);
        Some(used as f64 / self.total_memory_bytes as f64 * 100.0)
    }
}

#[cfg(unix)]
fn sysconf(name: libc::c_int) -> Option<u64> {
    // -1 means unsupported or indeterminate.
    let value = unsafe { libc::sysconf(name) };
    (value > 0).then_some(value as u64)
}

#[cfg(unix)]
fn total_memory_bytes() -> Option<u64> {
    let pages = sysconf(libc::_SC_PHYS_PAGES)?;
    let page_size = sysconf(libc::_SC_PAGESIZE)?;
    pages.checked_mul(page_size)
}

#[cfg(not(unix))]
fn total_memory_bytes() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn available_memory_bytes() -> Option<u64> {
    let pages = sysconf(libc::_SC_AVPHYS_PAGES)?;
    let page_size = sysconf(libc::_SC_PAGESIZE)?;
    pages.checked_mul(page_size)
}

#[cfg(not(target_os = "linux"))]
fn available_memory_bytes() -> Option<u64> {
    None
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
