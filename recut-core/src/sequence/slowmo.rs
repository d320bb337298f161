//! Slow-motion flattening of video timestamps.
//!
//! High frame rate captures mark slow-motion segments that a player is
//! expected to stretch. Flattening bakes the stretch into the timestamps so
//! the output plays slowed down everywhere.

use crate::media::SlowMotionSegment;

#[derive(Debug, Clone, Default)]
pub struct SlowMotionFlattener {
    segments: Vec<SlowMotionSegment>,
}

impl SlowMotionFlattener {
    pub fn new(segments: &[SlowMotionSegment]) -> Self {
        let mut segments: Vec<SlowMotionSegment> = segments
            .iter()
            .copied()
            .filter(|s| s.end_us > s.start_us && s.speed_divisor > 1)
            .collect();
        segments.sort_by_key(|s| s.start_us);
        Self { segments }
    }

    pub fn is_identity(&self) -> bool {
        self.segments.is_empty()
    }

    /// Input timestamp to flattened timestamp.
    pub fn map(&self, timestamp_us: i64) -> i64 {
        let mut stretched = timestamp_us;
        for segment in &self.segments {
            if timestamp_us <= segment.start_us {
                break;
            }
            let inside = timestamp_us.min(segment.end_us) - segment.start_us;
            stretched += inside * (segment.speed_divisor as i64 - 1);
        }
        stretched
    }

    /// Flattened timestamp back to the input timestamp.
    pub fn unmap(&self, stretched_us: i64) -> i64 {
        let mut extra = 0i64;
        for segment in &self.segments {
            let divisor = segment.speed_divisor as i64;
            let start = segment.start_us + extra;
            if stretched_us <= start {
                break;
            }
            let length = segment.end_us - segment.start_us;
            if stretched_us < start + length * divisor {
                return segment.start_us + (stretched_us - start) / divisor;
            }
            extra += length * (divisor - 1);
        }
        stretched_us - extra
    }

    /// Flattened length of the input range `[start_us, end_us)`.
    pub fn duration_us(&self, start_us: i64, end_us: i64) -> i64 {
        self.map(end_us) - self.map(start_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flattener() -> SlowMotionFlattener {
        SlowMotionFlattener::new(&[SlowMotionSegment {
            start_us: 1_000_000,
            end_us: 2_000_000,
            speed_divisor: 4,
        }])
    }

    #[test]
    fn test_timestamps_before_segment_are_unchanged() {
        assert_eq!(flattener().map(500_000), 500_000);
    }

    #[test]
    fn test_segment_is_stretched() {
        let f = flattener();
        assert_eq!(f.map(1_500_000), 1_000_000 + 2_000_000);
        assert_eq!(f.map(2_500_000), 2_500_000 + 3_000_000);
        assert_eq!(f.duration_us(0, 3_000_000), 6_000_000);
    }

    #[test]
    fn test_unmap_inverts_map() {
        let f = flattener();
        for ts in [0, 999_999, 1_000_000, 1_400_000, 2_000_000, 2_750_000] {
            assert_eq!(f.unmap(f.map(ts)), ts);
        }
    }

    #[test]
    fn test_unit_divisor_is_ignored() {
        let f = SlowMotionFlattener::new(&[SlowMotionSegment {
            start_us: 0,
            end_us: 1_000,
            speed_divisor: 1,
        }]);
        assert!(f.is_identity());
    }
}
