//! Process-level system probes for heartbeat reporting.
//!
//! Memory figures come from `/proc/self/statm` on Linux; other platforms
//! report zeros rather than failing the heartbeat.

/// Resident and virtual memory of this process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

/// Snapshot of this process's memory usage.
pub fn memory_usage() -> MemoryUsage {
    read_statm().unwrap_or_default()
}

#[cfg(target_os = "linux")]
fn read_statm() -> Option<MemoryUsage> {
    // statm reports pages: total program size first, resident set second.
    // Page size is 4 KiB on every supported deployment target.
    const PAGE_SIZE: u64 = 4096;

    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let virtual_pages: u64 = fields.next()?.parse().ok()?;
    let resident_pages: u64 = fields.next()?.parse().ok()?;

    Some(MemoryUsage {
        resident_bytes: resident_pages * PAGE_SIZE,
        virtual_bytes: virtual_pages * PAGE_SIZE,
    })
}

#[cfg(not(target_os = "linux"))]
fn read_statm() -> Option<MemoryUsage> {
    None
}
