//! TAI clock access and index ↔ timestamp conversions.
//!
//! All MXL timestamps are TAI nanoseconds since the Unix epoch. Conversions
//! between grain indices and timestamps round to nearest with 128-bit
//! intermediates so that `index -> timestamp -> index` is the identity for
//! every in-range index at every valid edit rate.
//!
//! Invalid input never panics; it yields the [`UNDEFINED_INDEX`] sentinel.

use std::time::Duration;

use crate::rational::Rational;

/// Sentinel returned by every conversion that receives invalid input or
/// would overflow. All-ones, and therefore never a valid index or timestamp.
pub const UNDEFINED_INDEX: u64 = u64::MAX;

/// Values beyond this (about 292 years of nanoseconds) are rejected before
/// they can overflow the 128-bit intermediates.
const MAX_REASONABLE_VALUE: u64 = u64::MAX / 2;

const NS_PER_SEC: i128 = 1_000_000_000;

#[cfg(target_os = "linux")]
const TAI_CLOCK: libc::clockid_t = libc::CLOCK_TAI;
#[cfg(not(target_os = "linux"))]
const TAI_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

fn is_valid_value(value: u64) -> bool {
    value != UNDEFINED_INDEX && value <= MAX_REASONABLE_VALUE
}

fn narrow(value: i128) -> u64 {
    if value < 0 || value > MAX_REASONABLE_VALUE as i128 {
        return UNDEFINED_INDEX;
    }
    value as u64
}

/// Current TAI time in nanoseconds since the Unix epoch.
///
/// Returns `0` when the clock cannot be read, so callers can distinguish
/// clock failure from any plausible timestamp.
pub fn now() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let rc = unsafe { libc::clock_gettime(TAI_CLOCK, &mut ts) };
    if rc != 0 || ts.tv_sec < 0 || ts.tv_nsec < 0 {
        return 0;
    }
    let ns = (ts.tv_sec as u64)
        .checked_mul(NS_PER_SEC as u64)
        .and_then(|s| s.checked_add(ts.tv_nsec as u64));
    match ns {
        Some(ns) if ns <= MAX_REASONABLE_VALUE => ns,
        _ => 0,
    }
}

/// Convert a TAI timestamp to the grain index active at that instant.
///
/// Computes `(timestamp * num + den * 5e8) / (den * 1e9)`, i.e. rounds to the
/// nearest index boundary.
pub fn timestamp_to_index(rate: Rational, timestamp: u64) -> u64 {
    if !rate.is_valid() || !is_valid_value(timestamp) {
        return UNDEFINED_INDEX;
    }
    let numerator = timestamp as i128 * rate.numerator as i128;
    let rounding = 500_000_000i128 * rate.denominator as i128;
    let denominator = NS_PER_SEC * rate.denominator as i128;
    narrow((numerator + rounding) / denominator)
}

/// Convert a grain index to the TAI timestamp of its edit-unit boundary.
pub fn index_to_timestamp(rate: Rational, index: u64) -> u64 {
    if !rate.is_valid() || !is_valid_value(index) {
        return UNDEFINED_INDEX;
    }
    let numerator = index as i128 * rate.denominator as i128 * NS_PER_SEC;
    let rounding = rate.numerator as i128 / 2;
    let denominator = rate.numerator as i128;
    narrow((numerator + rounding) / denominator)
}

/// The grain index at the current TAI time, or `UNDEFINED_INDEX` when the
/// rate is invalid or the clock failed.
pub fn current_index(rate: Rational) -> u64 {
    if !rate.is_valid() {
        return UNDEFINED_INDEX;
    }
    match now() {
        0 => UNDEFINED_INDEX,
        ns => timestamp_to_index(rate, ns),
    }
}

/// Nanoseconds from now until `index` begins. `0` when the boundary has
/// already passed; `UNDEFINED_INDEX` on invalid input or clock failure.
pub fn ns_until_index(index: u64, rate: Rational) -> u64 {
    if !rate.is_valid() || !is_valid_value(index) {
        return UNDEFINED_INDEX;
    }
    let target = index_to_timestamp(rate, index);
    if target == UNDEFINED_INDEX {
        return UNDEFINED_INDEX;
    }
    let now_ns = now();
    if now_ns == 0 {
        return UNDEFINED_INDEX;
    }
    if target < now_ns {
        return 0;
    }
    let diff = target - now_ns;
    if diff > MAX_REASONABLE_VALUE {
        return UNDEFINED_INDEX;
    }
    diff
}

/// Best-effort sleep for `ns` nanoseconds on the TAI clock.
pub fn sleep_for_ns(ns: u64) {
    if ns == 0 {
        return;
    }
    let ns = ns.min(i64::MAX as u64);

    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec {
            tv_sec: (ns / NS_PER_SEC as u64) as libc::time_t,
            tv_nsec: (ns % NS_PER_SEC as u64) as libc::c_long,
        };
        loop {
            let mut remaining = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            // SAFETY: both timespec pointers are valid for the call.
            let rc = unsafe { libc::clock_nanosleep(TAI_CLOCK, 0, &ts, &mut remaining) };
            if rc == libc::EINTR {
                ts = remaining;
                continue;
            }
            break;
        }
    }

    #[cfg(not(target_os = "linux"))]
    std::thread::sleep(Duration::from_nanos(ns));
}

/// Best-effort sleep until `index` begins.
///
/// Returns `false` without sleeping when the inputs are invalid.
pub fn sleep_until_index(index: u64, rate: Rational) -> bool {
    match ns_until_index(index, rate) {
        UNDEFINED_INDEX => false,
        ns => {
            sleep_for_ns(ns);
            true
        }
    }
}

/// Convenience: the duration of one edit unit at `rate`, truncated to whole
/// nanoseconds. Returns `None` for invalid rates.
pub fn edit_unit_duration(rate: Rational) -> Option<Duration> {
    if !rate.is_valid() {
        return None;
    }
    let ns = NS_PER_SEC as u64 * rate.denominator as u64 / rate.numerator as u64;
    Some(Duration::from_nanos(ns))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE_29_97: Rational = Rational::new(30_000, 1001);

    #[test]
    fn invalid_rates_yield_sentinel() {
        let now_ns = now();
        assert_eq!(timestamp_to_index(Rational::new(0, 0), now_ns), UNDEFINED_INDEX);
        assert_eq!(timestamp_to_index(Rational::new(0, 1001), now_ns), UNDEFINED_INDEX);
        assert_eq!(timestamp_to_index(Rational::new(30_000, 0), now_ns), UNDEFINED_INDEX);
        assert_ne!(timestamp_to_index(RATE_29_97, now_ns), UNDEFINED_INDEX);
    }

    #[test]
    fn first_two_indices() {
        let rate = RATE_29_97;
        let second = (rate.denominator as u64 * 1_000_000_000 + rate.numerator as u64 / 2)
            / rate.numerator as u64;

        assert_eq!(timestamp_to_index(rate, 0), 0);
        assert_eq!(timestamp_to_index(rate, second), 1);
        assert_eq!(index_to_timestamp(rate, 0), 0);
        assert_eq!(index_to_timestamp(rate, 1), second);
    }

    #[test]
    fn current_index_round_trips() {
        let current = current_index(RATE_29_97);
        assert_ne!(current, UNDEFINED_INDEX);

        let ts = index_to_timestamp(RATE_29_97, current);
        assert_eq!(timestamp_to_index(RATE_29_97, ts), current);

        let delta = now().abs_diff(ts);
        assert!(delta < 500_000_000, "index timestamp {delta}ns away from now");
        assert!(ns_until_index(current + 33, RATE_29_97) > 0);
    }

    #[test]
    fn round_trip_across_broadcast_rates() {
        let rates = [
            Rational::new(24_000, 1001),
            Rational::new(24, 1),
            Rational::new(25, 1),
            Rational::new(30_000, 1001),
            Rational::new(30, 1),
            Rational::new(50, 1),
            Rational::new(60_000, 1001),
            Rational::new(60, 1),
            Rational::new(100, 1),
            Rational::new(120, 1),
        ];
        for rate in rates {
            for index in (0..10).chain(1000..1010) {
                let ts = index_to_timestamp(rate, index);
                assert_ne!(ts, UNDEFINED_INDEX, "rate {rate} index {index}");
                assert_eq!(timestamp_to_index(rate, ts), index, "rate {rate}");
            }
        }
    }

    #[test]
    fn timestamp_round_trip_stays_within_half_unit() {
        let rate = RATE_29_97;
        let half_unit =
            (500_000_000u64 * rate.denominator as u64).div_ceil(rate.numerator as u64);
        for ts in [0u64, 1, 16_683_350, 1_000_000_000, 1_577_836_800_000_000_000] {
            let back = index_to_timestamp(rate, timestamp_to_index(rate, ts));
            assert!(back.abs_diff(ts) <= half_unit, "ts {ts} -> {back}");
        }
    }

    #[test]
    fn overflow_protection() {
        let rate = RATE_29_97;
        assert_eq!(timestamp_to_index(rate, u64::MAX), UNDEFINED_INDEX);
        assert_eq!(timestamp_to_index(rate, u64::MAX / 2 + 1), UNDEFINED_INDEX);
        assert_eq!(index_to_timestamp(rate, u64::MAX), UNDEFINED_INDEX);
        assert_eq!(index_to_timestamp(rate, u64::MAX / 2 + 1), UNDEFINED_INDEX);
        assert_eq!(ns_until_index(u64::MAX / 2 + 1, rate), UNDEFINED_INDEX);
        assert_eq!(
            index_to_timestamp(Rational::new(2_000_000_000, 1), 1000),
            UNDEFINED_INDEX
        );

        // Extreme but in-bounds ratios must not overflow either.
        assert_ne!(
            timestamp_to_index(Rational::new(999_999_999, 1), 1_000_000_000),
            UNDEFINED_INDEX
        );
        assert_ne!(
            timestamp_to_index(Rational::new(1, 999_999_999), 1_000_000_000),
            UNDEFINED_INDEX
        );
    }

    #[test]
    fn clock_is_sane_and_monotonic_enough() {
        let t1 = now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = now();
        assert!(t2 > t1);
        assert!(t2 - t1 >= 10_000_000);

        // After 2020, before 2100.
        assert!(t2 > 1_577_836_800 * 1_000_000_000);
        assert!(t2 < 4_102_444_800 * 1_000_000_000);
    }

    #[test]
    fn sleep_for_ns_is_best_effort() {
        let before = now();
        sleep_for_ns(10_000_000);
        let after = now();
        assert!(after - before >= 10_000_000);

        let before = now();
        sleep_for_ns(0);
        assert!(now() - before < 1_000_000);
    }

    #[test]
    fn ns_until_index_near_now() {
        let rate = RATE_29_97;
        let head = current_index(rate);
        let unit = edit_unit_duration(rate).unwrap().as_nanos() as u64;

        let ns = ns_until_index(head, rate);
        assert_ne!(ns, UNDEFINED_INDEX);
        assert!(ns < unit);

        let ns_next = ns_until_index(head + 1, rate);
        assert_ne!(ns_next, UNDEFINED_INDEX);
        assert!(ns_next <= unit * 2);

        assert_eq!(ns_until_index(0, Rational::new(0, 0)), UNDEFINED_INDEX);
    }
}
