//! Cross-process wait/wake on the flow commit counter.
//!
//! The counter is a `u64` in shared memory that only ever increases. Readers
//! sleep until it moves past a value they have already seen; the writer wakes
//! them after every commit. On Linux this is a raw futex on the low 32 bits
//! of the counter word — the counter is monotonic, so observing an unchanged
//! low word while holding an unchanged 64-bit snapshot is exact, and wakes
//! are edge-triggered on any change. Spurious wakeups are allowed everywhere;
//! callers re-check their own visibility condition after every return.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The counter moved past `seen`.
    Changed,
    /// The timeout elapsed with the counter still at `seen`.
    TimedOut,
}

/// Block until `counter != seen` or the timeout elapses.
///
/// `None` waits forever; `Some(Duration::ZERO)` is a non-blocking check.
pub fn wait_for_change(
    counter: &AtomicU64,
    seen: u64,
    timeout: Option<Duration>,
) -> WaitOutcome {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let current = counter.load(Ordering::Acquire);
        if current != seen {
            return WaitOutcome::Changed;
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return if counter.load(Ordering::Acquire) != seen {
                        WaitOutcome::Changed
                    } else {
                        WaitOutcome::TimedOut
                    };
                }
                Some(deadline - now)
            }
            None => None,
        };

        platform::wait(counter, current as u32, remaining);
    }
}

/// Wake every waiter blocked on the counter.
pub fn wake_all(counter: &AtomicU64) {
    platform::wake_all(counter);
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;

    /// Address of the 32-bit word the futex operates on: the low half of the
    /// counter, which changes on every increment.
    fn futex_word(counter: &AtomicU64) -> *mut u32 {
        let word = counter as *const AtomicU64 as *mut u32;
        if cfg!(target_endian = "big") {
            // SAFETY: a u64 always contains two in-bounds u32 words.
            unsafe { word.add(1) }
        } else {
            word
        }
    }

    pub(super) fn wait(counter: &AtomicU64, expected_low: u32, timeout: Option<Duration>) {
        let ts = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs() as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

        // No FUTEX_PRIVATE_FLAG: waiters live in other processes.
        // EAGAIN (value already changed), EINTR, and ETIMEDOUT all fall back
        // to the caller's re-check loop.
        // SAFETY: the futex word stays mapped for the duration of the call;
        // the timespec pointer is either null or valid.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                futex_word(counter),
                libc::FUTEX_WAIT,
                expected_low as libc::c_int,
                ts_ptr,
            );
        }
    }

    pub(super) fn wake_all(counter: &AtomicU64) {
        // SAFETY: the futex word stays mapped for the duration of the call.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                futex_word(counter),
                libc::FUTEX_WAKE,
                libc::c_int::MAX,
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::*;

    // Portable fallback: bounded sleep-poll. Wakes are implicit in the
    // caller's re-check loop, so wake_all has nothing to do.
    const POLL_INTERVAL: Duration = Duration::from_micros(500);

    pub(super) fn wait(_counter: &AtomicU64, _expected_low: u32, timeout: Option<Duration>) {
        let nap = timeout.map_or(POLL_INTERVAL, |t| t.min(POLL_INTERVAL));
        std::thread::sleep(nap);
    }

    pub(super) fn wake_all(_counter: &AtomicU64) {}
}
