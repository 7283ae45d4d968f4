use dubsync_engine::SyncConfig;
use dubsync_segment::SegmentRecord;

/// A clip may never be planned shorter than this share of its window.
const MIN_WINDOW_SHARE: f64 = 0.8;
/// The last segment has no neighbour and may run this much long.
const LAST_SEGMENT_STRETCH: f64 = 1.2;

/// How silence between segments is split into breathing room and buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapPolicy {
    pub breathing: f64,
    pub buffer: f64,
}

impl GapPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            breathing: config.preferred_breathing_gap,
            buffer: config.min_overlap_buffer,
        }
    }

    /// Part of a gap a clip may spill into.
    pub fn usable_gap(&self, gap: f64) -> f64 {
        let usable = if gap >= self.breathing + self.buffer {
            gap - self.breathing - self.buffer
        } else if gap >= 2.0 * self.buffer {
            // Whole gap goes to breathing room (70%) and buffer (30%).
            0.0
        } else if gap > 0.0 {
            gap - self.buffer
        } else {
            0.0
        };
        usable.max(0.0)
    }

    /// Longest clip that fits a segment of `target` seconds ending at `end`.
    pub fn max_duration(&self, target: f64, end: f64, next_start: Option<f64>) -> f64 {
        match next_start {
            Some(next) => (target + self.usable_gap(next - end)).max(target * MIN_WINDOW_SHARE),
            None => target * LAST_SEGMENT_STRETCH,
        }
    }
}

/// Longest clip each record can take without crowding its successor, in
/// input order. The successor is the earliest start after a record's end.
pub fn available_windows(records: &[SegmentRecord], policy: GapPolicy) -> Vec<f64> {
    records
        .iter()
        .map(|record| {
            let next_start = records
                .iter()
                .map(SegmentRecord::start)
                .filter(|start| *start > record.end())
                .min_by(f64::total_cmp);
            policy.max_duration(record.target_duration(), record.end(), next_start)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubsync_segment::{Cue, RateBounds};

    fn policy() -> GapPolicy {
        GapPolicy {
            breathing: 0.3,
            buffer: 0.05,
        }
    }

    #[test]
    fn test_usable_gap_bands() {
        let p = policy();
        assert!((p.usable_gap(1.0) - 0.65).abs() < 1e-9);
        assert_eq!(p.usable_gap(0.2), 0.0);
        assert!((p.usable_gap(0.08) - 0.03).abs() < 1e-9);
        assert_eq!(p.usable_gap(0.0), 0.0);
        assert_eq!(p.usable_gap(-1.0), 0.0);
    }

    #[test]
    fn test_max_duration() {
        let p = policy();
        assert!((p.max_duration(2.0, 5.0, Some(6.0)) - 2.65).abs() < 1e-9);
        assert!((p.max_duration(2.0, 5.0, Some(5.0)) - 2.0).abs() < 1e-9);
        assert!((p.max_duration(2.0, 5.0, None) - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_available_windows_find_successor() {
        let bounds = RateBounds::new(0.95, 1.15).unwrap();
        let record = |id: &str, start: f64, end: f64| {
            SegmentRecord::new(
                Cue {
                    id: id.into(),
                    start,
                    end,
                    source_text: String::new(),
                    translated_text: "x".into(),
                },
                bounds,
            )
            .unwrap()
        };
        // Out of order on purpose.
        let records = vec![record("b", 3.0, 4.0), record("a", 0.0, 2.0)];
        let windows = available_windows(&records, policy());
        assert!((windows[0] - 1.2).abs() < 1e-9);
        assert!((windows[1] - 2.65).abs() < 1e-9);
    }
}
