//! CPU clock access.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("cpu clock unavailable: {0}")]
    CpuClockUnavailable(String),
}

/// Source of CPU time readings for the calling thread.
pub type CpuClock = fn() -> Result<Duration, RecorderError>;

/// CPU time consumed so far by the calling thread.
#[cfg(unix)]
pub fn thread_cpu_time() -> Result<Duration, RecorderError> {
    // SAFETY: timespec is plain old data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Err(RecorderError::CpuClockUnavailable(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
pub fn thread_cpu_time() -> Result<Duration, RecorderError> {
    Err(RecorderError::CpuClockUnavailable(
        "no thread cpu clock on this platform".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn thread_cpu_time_advances_under_load() {
        let before = thread_cpu_time().unwrap();
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        let after = thread_cpu_time().unwrap();
        assert!(after >= before);
    }
}
