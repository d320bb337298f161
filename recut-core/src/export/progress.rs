//! Completion estimate derived from muxed timestamps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::ProgressState;
use crate::media::TrackType;

type Reporter = Box<dyn Fn(u8) + Send + Sync>;

struct TrackerState {
    /// `None` until the output timeline is known
    total_us: Option<i64>,
    /// Latest written timestamp per track; `None` once the track ended
    tracks: BTreeMap<TrackType, Option<i64>>,
    percent: u8,
    last_reported: Option<u8>,
}

impl TrackerState {
    fn estimate(&self) -> Option<u8> {
        let total_us = self.total_us.filter(|t| *t > 0)?;
        let slowest = self
            .tracks
            .values()
            .map(|written| match written {
                Some(timestamp_us) => (*timestamp_us * 100 / total_us).clamp(0, 99) as u8,
                None => 100,
            })
            .min()?;
        Some(slowest)
    }
}

/// Shared progress estimate of one export.
///
/// The estimate is the progress of the slowest unfinished track, so it never
/// runs ahead of the output. It never decreases and reaches 100 only when
/// every track has ended.
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<Mutex<TrackerState>>,
    min_step_percent: u8,
    reporter: Arc<Reporter>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("percent", &self.state.lock().percent)
            .field("min_step_percent", &self.min_step_percent)
            .finish()
    }
}

impl ProgressTracker {
    /// Creates a tracker that calls `reporter` whenever the estimate grows by
    /// at least `min_step_percent`.
    pub fn new(min_step_percent: u8, reporter: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState {
                total_us: None,
                tracks: BTreeMap::new(),
                percent: 0,
                last_reported: None,
            })),
            min_step_percent: min_step_percent.clamp(1, 100),
            reporter: Arc::new(Box::new(reporter)),
        }
    }

    /// Starts estimating against an output of `total_us` with `tracks`.
    ///
    /// A non-positive total makes progress unavailable.
    pub fn begin(&self, total_us: i64, tracks: &[TrackType]) {
        let mut state = self.state.lock();
        state.total_us = Some(total_us);
        state.tracks = tracks.iter().map(|t| (*t, Some(0))).collect();
    }

    pub fn on_sample_written(&self, track_type: TrackType, timestamp_us: i64) {
        let mut state = self.state.lock();
        if let Some(Some(written)) = state.tracks.get_mut(&track_type) {
            *written = (*written).max(timestamp_us);
        }
        self.update(&mut state);
    }

    pub fn on_track_ended(&self, track_type: TrackType) {
        let mut state = self.state.lock();
        if let Some(written) = state.tracks.get_mut(&track_type) {
            *written = None;
        }
        self.update(&mut state);
    }

    fn update(&self, state: &mut TrackerState) {
        let Some(estimate) = state.estimate() else {
            return;
        };
        if estimate <= state.percent && state.last_reported.is_some() {
            return;
        }
        state.percent = state.percent.max(estimate);

        let due = match state.last_reported {
            None => true,
            Some(last) => {
                state.percent == 100 || state.percent >= last.saturating_add(self.min_step_percent)
            }
        };
        if due {
            state.last_reported = Some(state.percent);
            (self.reporter)(state.percent);
        }
    }

    pub fn state(&self) -> ProgressState {
        let state = self.state.lock();
        match state.total_us {
            None => ProgressState::WaitingForAvailability,
            Some(total_us) if total_us <= 0 => ProgressState::Unavailable,
            Some(_) => ProgressState::Available(state.percent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(min_step: u8) -> (ProgressTracker, Arc<Mutex<Vec<u8>>>) {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let tracker = ProgressTracker::new(min_step, move |p| sink.lock().push(p));
        (tracker, reported)
    }

    #[test]
    fn test_waiting_until_begun() {
        let (tracker, _) = recording(1);
        assert_eq!(tracker.state(), ProgressState::WaitingForAvailability);
        tracker.on_sample_written(TrackType::Video, 1_000);
        assert_eq!(tracker.state(), ProgressState::WaitingForAvailability);
    }

    #[test]
    fn test_slowest_track_drives_progress() {
        let (tracker, reported) = recording(1);
        tracker.begin(1_000_000, &[TrackType::Audio, TrackType::Video]);

        tracker.on_sample_written(TrackType::Video, 500_000);
        assert_eq!(tracker.state(), ProgressState::Available(0));

        tracker.on_sample_written(TrackType::Audio, 250_000);
        assert_eq!(tracker.state(), ProgressState::Available(25));

        tracker.on_track_ended(TrackType::Audio);
        assert_eq!(tracker.state(), ProgressState::Available(50));

        tracker.on_track_ended(TrackType::Video);
        assert_eq!(tracker.state(), ProgressState::Available(100));
        assert_eq!(reported.lock().last(), Some(&100));
    }

    #[test]
    fn test_progress_is_monotonic_and_stepped() {
        let (tracker, reported) = recording(10);
        tracker.begin(1_000_000, &[TrackType::Video]);
        for timestamp_us in (0..1_000_000).step_by(10_000) {
            tracker.on_sample_written(TrackType::Video, timestamp_us);
        }
        // An older timestamp never moves the estimate back
        tracker.on_sample_written(TrackType::Video, 0);
        assert_eq!(tracker.state(), ProgressState::Available(99));

        let reported = reported.lock();
        assert!(reported.windows(2).all(|w| w[1] >= w[0] + 10 || w[1] == 100));
        assert_eq!(reported.first(), Some(&0));
    }

    #[test]
    fn test_oversized_step_reports_start_and_end() {
        let (tracker, reported) = recording(200);
        tracker.begin(1_000_000, &[TrackType::Video]);
        for timestamp_us in (0..1_000_000).step_by(100_000) {
            tracker.on_sample_written(TrackType::Video, timestamp_us);
        }
        tracker.on_track_ended(TrackType::Video);
        assert_eq!(*reported.lock(), vec![0, 100]);
    }

    #[test]
    fn test_unknown_duration_is_unavailable() {
        let (tracker, reported) = recording(1);
        tracker.begin(0, &[TrackType::Audio]);
        tracker.on_sample_written(TrackType::Audio, 10);
        assert_eq!(tracker.state(), ProgressState::Unavailable);
        assert!(reported.lock().is_empty());
    }
}
