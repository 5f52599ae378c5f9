//! Sub-platform address codec.
//!
//! Logical pin and bus ids are plain integers with one high bit reserved as
//! the sub-platform marker. Setting the bit redirects an id to the chained
//! expansion board's own table; clearing it yields the index into that table.
//! Only one level of chaining exists, so the codec is a single bit, not a
//! field.

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Bit position of the sub-platform marker.
pub const SUB_PLATFORM_SHIFT: u32 = 9;

/// Marker bit value (512). Ids below this are base-platform ids.
pub const SUB_PLATFORM_MASK: i32 = 1 << SUB_PLATFORM_SHIFT;

/// True iff the marker bit is set on `id`.
pub fn is_sub_platform(id: i32) -> bool {
    id & SUB_PLATFORM_MASK != 0
}

/// Set the marker bit on `id`, redirecting it to the sub-platform.
///
/// Fails with `InvalidArgument` if `id` is negative or already at or above
/// the marker value, since the encoded id would not round-trip.
pub fn use_sub_platform(id: i32) -> Result<i32> {
    if id < 0 || id >= SUB_PLATFORM_MASK {
        warn!(id, "id cannot carry the sub-platform bit");
        return Err(Error::InvalidArgument(format!(
            "id {id} is outside the sub-platform encodable range 0..{SUB_PLATFORM_MASK}"
        )));
    }
    Ok(id | SUB_PLATFORM_MASK)
}

/// Clear the marker bit, yielding the index into the sub-platform's table.
pub fn sub_platform_index(id: i32) -> i32 {
    id & !SUB_PLATFORM_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_round_trip() {
        for id in [0, 1, 3, 100, 511] {
            let encoded = use_sub_platform(id).unwrap();
            assert!(is_sub_platform(encoded));
            assert_eq!(sub_platform_index(encoded), id);
        }
    }

    #[test]
    fn test_plain_ids_are_not_sub_platform() {
        for id in [0, 1, 100, 511] {
            assert!(!is_sub_platform(id));
        }
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(use_sub_platform(-1).is_err());
        assert!(use_sub_platform(512).is_err());
        assert!(use_sub_platform(1000).is_err());
    }

    #[test]
    fn test_marker_bit_arithmetic() {
        assert_eq!(SUB_PLATFORM_MASK, 512);
        assert_eq!(use_sub_platform(3).unwrap(), 515);
        assert!(is_sub_platform(515));
        assert_eq!(sub_platform_index(515), 3);
    }
}
