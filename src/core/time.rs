//! Presentation clock.
//!
//! Frame timestamps use `CLOCK_MONOTONIC`, the clock advertised to clients
//! through wp_presentation.clock_id.

use std::time::Duration;

/// clockid advertised for presentation timestamps
pub const PRESENTATION_CLOCK_ID: u32 = libc::CLOCK_MONOTONIC as u32;

/// Read the presentation clock
pub fn presentation_clock() -> Duration {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
    // always available on the platforms we target.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        tracing::warn!("clock_gettime(CLOCK_MONOTONIC) failed: {}", std::io::Error::last_os_error());
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// Convert a hardware vsync timestamp (nanoseconds) into a duration
pub fn from_nanos(timestamp_ns: i64) -> Duration {
    Duration::from_nanos(timestamp_ns.max(0) as u64)
}
