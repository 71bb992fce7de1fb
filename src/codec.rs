//! Conversion between the desk's raw height unit and millimeters.
//!
//! The controller reports height as tenths of a millimeter above its lowest
//! physical position. That position sits [`BASE_OFFSET_MM`] above the floor.
//! Raw values are truncated to whole millimeters; the desk firmware does the
//! same, so the truncation must be kept as is.

/// Height of the desk top at raw value 0, in millimeters
pub const BASE_OFFSET_MM: i32 = 620;

/// Raw units per millimeter
pub const RAW_UNITS_PER_MM: i32 = 10;

/// Convert a raw device height to millimeters.
///
/// Integer division truncates toward zero, so `raw_to_mm(100)` and
/// `raw_to_mm(109)` both yield 630.
#[must_use]
pub const fn raw_to_mm(raw: i32) -> i32 {
    raw / RAW_UNITS_PER_MM + BASE_OFFSET_MM
}

/// Convert a height in millimeters to the raw device unit.
#[must_use]
pub const fn mm_to_raw(mm: i32) -> i32 {
    (mm - BASE_OFFSET_MM) * RAW_UNITS_PER_MM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_to_mm() {
        assert_eq!(raw_to_mm(0), 620);
        assert_eq!(raw_to_mm(100), 630);
        assert_eq!(raw_to_mm(2800), 900);
    }

    #[test]
    fn test_truncation() {
        for raw in 100..=109 {
            assert_eq!(raw_to_mm(raw), 630, "raw {raw}");
        }
        assert_eq!(raw_to_mm(110), 631);
    }

    #[test]
    fn test_truncates_toward_zero_below_base() {
        // 600 mm is below the base offset, so raw values go negative
        assert_eq!(mm_to_raw(600), -200);
        assert_eq!(raw_to_mm(-200), 600);
        assert_eq!(raw_to_mm(-205), 600);
    }

    #[test]
    fn test_mm_round_trip_over_valid_range() {
        for mm in (600..=1400).step_by(10) {
            assert_eq!(raw_to_mm(mm_to_raw(mm)), mm);
        }
    }

    #[test]
    fn test_raw_round_trip_is_lossy() {
        let raw = 1234;
        assert_eq!(mm_to_raw(raw_to_mm(raw)), 1230);
    }
}
