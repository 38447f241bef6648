//! Exhaustive index round-trip at 30000/1001.
//!
//! The half-unit rounding with 128-bit intermediates must make
//! `timestamp_to_index(index_to_timestamp(i)) == i` exact for every index in
//! a thirty-million-frame window (about eleven days of 29.97 fps).

use mxl_core::time::{index_to_timestamp, timestamp_to_index};
use mxl_core::{Rational, UNDEFINED_INDEX};

#[test]
fn thirty_million_indices_round_trip_exactly() {
    let rate = Rational::new(30_000, 1001);

    for index in 30_000_000u64..60_000_000 {
        let ts = index_to_timestamp(rate, index);
        debug_assert_ne!(ts, UNDEFINED_INDEX);
        let back = timestamp_to_index(rate, ts);
        assert_eq!(back, index, "round trip diverged at index {index}");
    }
}

#[test]
fn second_index_boundary_matches_the_closed_form() {
    let rate = Rational::new(30_000, 1001);
    let expected =
        (rate.denominator as u64 * 1_000_000_000 + rate.numerator as u64 / 2) / rate.numerator as u64;
    assert_eq!(index_to_timestamp(rate, 1), expected);
}
