//! Cycle-counter and wall-clock timers.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn monotonic_base() -> &'static Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    BASE.get_or_init(Instant::now)
}

/// Reads the hardware cycle counter: `rdtsc` on x86_64, the virtual counter
/// on aarch64, monotonic nanoseconds elsewhere.
pub fn gettsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: rdtsc is available on every x86_64 processor.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(target_arch = "aarch64")]
    {
        let ticks: u64;
        // SAFETY: cntvct_el0 is readable from EL0 on supported targets.
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks, options(nomem, nostack));
        }
        ticks
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        elapsed_nanos(*monotonic_base())
    }
}

/// Nanoseconds since the Unix epoch.
pub fn getutc() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| saturating_nanos(elapsed.as_nanos()))
        .unwrap_or(0)
}

/// Nanoseconds on a process-local monotonic clock.
pub fn monotonic_nanos() -> u64 {
    elapsed_nanos(*monotonic_base())
}

pub fn elapsed_nanos(start: Instant) -> u64 {
    saturating_nanos(start.elapsed().as_nanos())
}

fn saturating_nanos(nanos: u128) -> u64 {
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_advance() {
        let first = monotonic_nanos();
        let tsc = gettsc();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(monotonic_nanos() > first);
        assert!(gettsc() >= tsc);
    }

    #[test]
    fn utc_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(getutc() > 1_577_836_800_000_000_000);
    }
}
