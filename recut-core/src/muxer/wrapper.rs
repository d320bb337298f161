//! Single-writer muxer wrapper with track interleaving.
//!
//! Every track pipeline writes through one `Arc<MuxerWrapper>`. A sample is
//! held back until all expected track formats are added and until its
//! timestamp is within the write-ahead window of the slowest unfinished
//! track. The slowest track itself may always write, which keeps tracks
//! with large timestamp gaps from deadlocking each other.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::Muxer;
use crate::config::MuxerConfig;
use crate::error::{ErrorCode, ExportError, MuxerError};
use crate::export::progress::ProgressTracker;
use crate::media::{EncodedSample, TrackFormat, TrackType};

/// Statistics of one written track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub track_type: TrackType,
    pub format: TrackFormat,
    pub sample_count: u64,
    pub bytes_written: u64,
    pub first_timestamp_us: Option<i64>,
    pub last_timestamp_us: Option<i64>,
    pub duration_us: i64,
    pub average_bitrate: Option<u32>,
}

/// Statistics of the finished output.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxerSummary {
    pub tracks: Vec<TrackSummary>,
    pub duration_us: i64,
    pub file_size_bytes: Option<u64>,
}

impl MuxerSummary {
    pub fn track(&self, track_type: TrackType) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.track_type == track_type)
    }
}

#[derive(Debug)]
struct TrackState {
    index: usize,
    format: TrackFormat,
    sample_count: u64,
    bytes_written: u64,
    first_timestamp_us: Option<i64>,
    last_timestamp_us: Option<i64>,
    ended: bool,
    /// Added by a retained prefix and still open for a continuation
    appendable: bool,
}

impl TrackState {
    fn time_us(&self) -> i64 {
        self.last_timestamp_us.unwrap_or(0)
    }

    fn summary(&self, track_type: TrackType) -> TrackSummary {
        let duration_us = match (self.first_timestamp_us, self.last_timestamp_us) {
            (Some(first), Some(last)) if self.sample_count > 1 => {
                let span = last - first;
                span + span / (self.sample_count as i64 - 1)
            }
            _ => 0,
        };
        let average_bitrate = (duration_us > 0)
            .then(|| (self.bytes_written as i128 * 8 * 1_000_000 / duration_us as i128) as u32);
        TrackSummary {
            track_type,
            format: self.format.clone(),
            sample_count: self.sample_count,
            bytes_written: self.bytes_written,
            first_timestamp_us: self.first_timestamp_us,
            last_timestamp_us: self.last_timestamp_us,
            duration_us,
            average_bitrate,
        }
    }
}

struct WrapperState {
    muxer: Option<Box<dyn Muxer>>,
    track_count: usize,
    tracks: BTreeMap<TrackType, TrackState>,
    last_activity: Instant,
    aborted: bool,
}

impl WrapperState {
    fn muxer(&mut self) -> Result<&mut Box<dyn Muxer>, ExportError> {
        self.muxer
            .as_mut()
            .ok_or_else(|| ExportError::muxing(MuxerError::Released))
    }

    fn is_ready(&self) -> bool {
        self.tracks.len() == self.track_count
    }

    fn can_write(&self, track_type: TrackType, timestamp_us: i64, max_ahead_us: i64) -> bool {
        if !self.is_ready() {
            return false;
        }
        let live: Vec<&TrackState> = self.tracks.values().filter(|t| !t.ended).collect();
        if live.len() <= 1 {
            return true;
        }
        let min_track_time_us = live.iter().map(|t| t.time_us()).min().unwrap_or(0);
        let own_time_us = self.tracks.get(&track_type).map(TrackState::time_us).unwrap_or(0);
        timestamp_us - min_track_time_us <= max_ahead_us || own_time_us == min_track_time_us
    }

    /// Writes `sample` if interleaving allows it; `Ok(false)` means wait.
    fn try_write(&mut self, sample: &EncodedSample, max_ahead_us: i64) -> Result<bool, ExportError> {
        if self.aborted {
            return Err(ExportError::muxing(MuxerError::Released));
        }
        let track_type = sample.track_type;
        let Some(track) = self.tracks.get(&track_type) else {
            return Err(ExportError::new(
                ErrorCode::MuxingFailed,
                format!("sample for unregistered {track_type} track"),
            ));
        };
        if track.ended {
            return Err(ExportError::new(
                ErrorCode::MuxingFailed,
                format!("sample written after {track_type} track ended"),
            ));
        }
        if let Some(previous_us) = track.last_timestamp_us
            && sample.timestamp_us < previous_us
        {
            return Err(ExportError::muxing(MuxerError::TimestampOrder {
                track: track_type.to_string(),
                timestamp_us: sample.timestamp_us,
                previous_us,
            }));
        }
        if !self.can_write(track_type, sample.timestamp_us, max_ahead_us) {
            return Ok(false);
        }

        let index = track.index;
        self.muxer()?
            .write_sample(index, sample)
            .map_err(ExportError::muxing)?;

        if let Some(track) = self.tracks.get_mut(&track_type) {
            track.sample_count += 1;
            track.bytes_written += sample.data.len() as u64;
            track.first_timestamp_us.get_or_insert(sample.timestamp_us);
            track.last_timestamp_us = Some(sample.timestamp_us);
        }
        self.last_activity = Instant::now();
        Ok(true)
    }
}

/// Shared muxer access for all track pipelines of one export.
pub struct MuxerWrapper {
    state: Mutex<WrapperState>,
    changed: Notify,
    max_write_ahead_us: i64,
    output_path: PathBuf,
    progress: Option<ProgressTracker>,
}

impl MuxerWrapper {
    /// Wraps `muxer`, expecting `track_count` tracks before any sample is written.
    pub fn new(
        muxer: Box<dyn Muxer>,
        output_path: &Path,
        track_count: usize,
        config: &MuxerConfig,
        progress: Option<ProgressTracker>,
    ) -> Self {
        Self {
            state: Mutex::new(WrapperState {
                muxer: Some(muxer),
                track_count,
                tracks: BTreeMap::new(),
                last_activity: Instant::now(),
                aborted: false,
            }),
            changed: Notify::new(),
            max_write_ahead_us: config.max_track_write_ahead.as_micros() as i64,
            output_path: output_path.to_path_buf(),
            progress,
        }
    }

    /// Registers the format of a track.
    ///
    /// A track added by a retained prefix may be added once more by the
    /// continuation, provided the formats are append-compatible.
    ///
    /// # Errors
    /// - `ErrorCode::MuxingFailed` - Too many tracks, duplicate track type,
    ///   incompatible continuation format or a muxer failure
    pub fn add_track(&self, format: &TrackFormat) -> Result<(), ExportError> {
        let Some(track_type) = format.track_type() else {
            return Err(ExportError::muxing(MuxerError::UnsupportedMimeType {
                mime: format.mime.clone(),
            }));
        };

        let mut state = self.state.lock();
        if let Some(existing) = state.tracks.get_mut(&track_type) {
            if !existing.appendable {
                return Err(ExportError::new(
                    ErrorCode::MuxingFailed,
                    format!("{track_type} track added twice"),
                ));
            }
            if !existing.format.is_append_compatible(format) {
                return Err(ExportError::muxing(MuxerError::IncompatibleFormat {
                    reason: format!("{} cannot continue {}", format, existing.format),
                }));
            }
            existing.appendable = false;
            tracing::debug!("Continuing {} track with {}", track_type, format);
            return Ok(());
        }

        if state.tracks.len() >= state.track_count {
            return Err(ExportError::new(
                ErrorCode::MuxingFailed,
                format!("all {} tracks already added", state.track_count),
            ));
        }
        let index = state.muxer()?.add_track(format).map_err(ExportError::muxing)?;
        state.tracks.insert(
            track_type,
            TrackState {
                index,
                format: format.clone(),
                sample_count: 0,
                bytes_written: 0,
                first_timestamp_us: None,
                last_timestamp_us: None,
                ended: false,
                appendable: false,
            },
        );
        tracing::debug!("Added {} track {} ({})", track_type, index, format);
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Allows every track added so far to be continued by one more `add_track`.
    pub fn open_for_append(&self) {
        let mut state = self.state.lock();
        for track in state.tracks.values_mut() {
            track.appendable = true;
        }
    }

    /// Writes a sample once interleaving allows it.
    ///
    /// Waits on track registration and other tracks' progress without
    /// polling.
    ///
    /// # Errors
    /// - `ErrorCode::MuxingFailed` - Out-of-order timestamp, unknown or ended
    ///   track, aborted wrapper or a muxer failure
    pub async fn write_sample(&self, sample: EncodedSample) -> Result<(), ExportError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let written = {
                let mut state = self.state.lock();
                state.try_write(&sample, self.max_write_ahead_us)?
            };
            if written {
                tracing::trace!(
                    "Wrote {} sample at {}us ({} bytes)",
                    sample.track_type,
                    sample.timestamp_us,
                    sample.data.len()
                );
                self.changed.notify_waiters();
                if let Some(progress) = &self.progress {
                    progress.on_sample_written(sample.track_type, sample.timestamp_us);
                }
                return Ok(());
            }
            notified.await;
        }
    }

    /// Marks a track as finished; it no longer holds other tracks back.
    pub fn end_track(&self, track_type: TrackType) -> Option<TrackSummary> {
        let summary = {
            let mut state = self.state.lock();
            let track = state.tracks.get_mut(&track_type)?;
            track.ended = true;
            track.summary(track_type)
        };
        tracing::debug!(
            "Ended {} track: {} samples, {} bytes",
            track_type,
            summary.sample_count,
            summary.bytes_written
        );
        if let Some(progress) = &self.progress {
            progress.on_track_ended(track_type);
        }
        self.changed.notify_waiters();
        Some(summary)
    }

    pub fn add_metadata(&self, key: &str, value: &str) -> Result<(), ExportError> {
        let mut state = self.state.lock();
        state
            .muxer()?
            .add_metadata(key, value)
            .map_err(ExportError::muxing)
    }

    /// True once every expected track is added and ended.
    pub fn all_tracks_ended(&self) -> bool {
        let state = self.state.lock();
        state.is_ready() && state.tracks.values().all(|t| t.ended)
    }

    pub fn track_summary(&self, track_type: TrackType) -> Option<TrackSummary> {
        let state = self.state.lock();
        state.tracks.get(&track_type).map(|t| t.summary(track_type))
    }

    /// Time since the last sample was written.
    pub fn inactive_for(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Fails all pending and future writes.
    pub fn abort(&self) {
        self.state.lock().aborted = true;
        self.changed.notify_waiters();
    }

    /// Releases the muxer and summarizes the output.
    ///
    /// With `for_cancellation` the container is left unfinalized.
    ///
    /// # Errors
    /// - `ErrorCode::MuxingFailed` - The muxer failed to finalize
    pub fn release(&self, for_cancellation: bool) -> Result<MuxerSummary, ExportError> {
        let (muxer, tracks) = {
            let mut state = self.state.lock();
            state.aborted = true;
            let tracks: Vec<TrackSummary> = state
                .tracks
                .iter()
                .map(|(track_type, track)| track.summary(*track_type))
                .collect();
            (state.muxer.take(), tracks)
        };
        self.changed.notify_waiters();

        if let Some(mut muxer) = muxer {
            muxer.release(for_cancellation).map_err(ExportError::muxing)?;
        }

        let duration_us = tracks
            .iter()
            .filter_map(|t| t.first_timestamp_us.map(|first| first + t.duration_us))
            .max()
            .unwrap_or(0);
        let file_size_bytes = std::fs::metadata(&self.output_path).ok().map(|m| m.len());
        Ok(MuxerSummary {
            tracks,
            duration_us,
            file_size_bytes,
        })
    }
}
