//! Human-readable duration/byte-size formatting for debug-mode config echoes,
//! adapted from the teacher's `common::pretty_util`.

use std::time::Duration;

use byte_unit::{Byte, UnitType};
use pretty_duration::pretty_duration;

pub fn to_duration_pretty(duration: &Duration) -> String {
    pretty_duration(duration, None)
}

pub fn to_bytes_len_pretty(len: u64) -> String {
    let byte = Byte::from_u64(len);
    let adjusted = byte.get_appropriate_unit(UnitType::Decimal);
    format!("{adjusted:.2}")
}
