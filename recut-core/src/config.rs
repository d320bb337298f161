//! Centralized configuration for Recut.
//!
//! All tunable parameters of the export pipeline are defined here to avoid
//! hard-coded values scattered through the stages.

use std::time::Duration;

use crate::media::mime;

/// Central configuration for all Recut components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct RecutConfig {
    pub pipeline: PipelineConfig,
    pub muxer: MuxerConfig,
    pub encoder: EncoderConfig,
    pub resume: ResumeConfig,
    pub progress: ProgressConfig,
}

/// Bounded queue sizes between pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage channel, in frames or samples
    pub stage_queue_capacity: usize,
    /// Number of output textures the frame processor may have in flight
    pub texture_pool_size: usize,
    /// Number of PCM frames per buffer when generating silence
    pub silence_buffer_frames: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_queue_capacity: 8,
            texture_pool_size: 4,
            silence_buffer_frames: 1024,
        }
    }
}

/// Muxer interleaving and watchdog settings.
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// How far one track may run ahead of the slowest unfinished track
    pub max_track_write_ahead: Duration,
    /// Maximum time without any sample being written before the export fails
    pub max_delay_between_samples: Duration,
    /// Interval at which the inactivity watchdog checks the muxer
    pub watchdog_interval: Duration,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            max_track_write_ahead: Duration::from_millis(500),
            max_delay_between_samples: Duration::from_secs(10),
            watchdog_interval: Duration::from_millis(250),
        }
    }
}

/// Encoder selection defaults.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Whether the capability resolver may alter the requested settings
    pub enable_fallback: bool,
    /// Frame rate assumed when the input does not report one
    pub default_frame_rate: f32,
    /// Interval between video key frames
    pub i_frame_interval: Duration,
    /// Video MIME type used when the input's one cannot be muxed
    pub default_video_mime: &'static str,
    /// Audio MIME type used when the input's one cannot be muxed
    pub default_audio_mime: &'static str,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            default_frame_rate: 30.0,
            i_frame_interval: Duration::from_secs(1),
            default_video_mime: mime::VIDEO_H264,
            default_audio_mime: mime::AUDIO_AAC,
        }
    }
}

/// Which key frame of a partial output becomes the resume boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeBoundaryPolicy {
    /// The last video key frame covered by every other track
    LastKeyFrame,
    /// Step back the given number of key frames from the last one
    KeyFramesBack(u32),
}

/// Resume behavior.
#[derive(Debug, Clone)]
pub struct ResumeConfig {
    pub boundary_policy: ResumeBoundaryPolicy,
    /// Keep the moved-aside partial file after a successful resume
    pub keep_partial_source: bool,
    /// Suffix appended to the output path when the partial file is moved aside
    pub partial_suffix: &'static str,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            boundary_policy: ResumeBoundaryPolicy::LastKeyFrame,
            keep_partial_source: false,
            partial_suffix: ".resume",
        }
    }
}

/// Progress reporting granularity.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Minimum increase in percent before listeners are notified again
    pub min_step_percent: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_step_percent: 1,
        }
    }
}

impl RecutConfig {
    /// Loads the default configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("RECUT_STAGE_QUEUE_CAPACITY")
            && let Ok(capacity) = capacity.parse::<usize>()
            && capacity > 0
        {
            config.pipeline.stage_queue_capacity = capacity;
        }

        if let Ok(pool) = std::env::var("RECUT_TEXTURE_POOL_SIZE")
            && let Ok(pool) = pool.parse::<usize>()
            && pool > 0
        {
            config.pipeline.texture_pool_size = pool;
        }

        if let Ok(timeout) = std::env::var("RECUT_MUXER_TIMEOUT_MS")
            && let Ok(millis) = timeout.parse::<u64>()
        {
            config.muxer.max_delay_between_samples = Duration::from_millis(millis);
        }

        if let Ok(enabled) = std::env::var("RECUT_ENABLE_FALLBACK") {
            config.encoder.enable_fallback = enabled.parse().unwrap_or(true);
        }

        if let Ok(steps) = std::env::var("RECUT_RESUME_KEY_FRAMES_BACK")
            && let Ok(steps) = steps.parse::<u32>()
        {
            config.resume.boundary_policy = if steps == 0 {
                ResumeBoundaryPolicy::LastKeyFrame
            } else {
                ResumeBoundaryPolicy::KeyFramesBack(steps)
            };
        }

        if let Ok(keep) = std::env::var("RECUT_KEEP_PARTIAL_SOURCE") {
            config.resume.keep_partial_source = keep.parse().unwrap_or(false);
        }

        config
    }

    /// Small queues and short timeouts for deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            pipeline: PipelineConfig {
                stage_queue_capacity: 2,
                texture_pool_size: 2,
                silence_buffer_frames: 1024,
            },
            muxer: MuxerConfig {
                max_delay_between_samples: Duration::from_secs(5),
                watchdog_interval: Duration::from_millis(50),
                ..MuxerConfig::default()
            },
            ..Default::default()
        }
    }

    /// Write-ahead window in microseconds.
    pub fn max_track_write_ahead_us(&self) -> i64 {
        self.muxer.max_track_write_ahead.as_micros() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_muxer_policy() {
        let config = RecutConfig::default();
        assert_eq!(config.max_track_write_ahead_us(), 500_000);
        assert_eq!(config.encoder.default_frame_rate, 30.0);
        assert!(config.encoder.enable_fallback);
        assert_eq!(
            config.resume.boundary_policy,
            ResumeBoundaryPolicy::LastKeyFrame
        );
    }

    #[test]
    fn test_testing_profile_keeps_queues_small() {
        let config = RecutConfig::for_testing();
        assert_eq!(config.pipeline.stage_queue_capacity, 2);
        assert!(config.muxer.watchdog_interval < config.muxer.max_delay_between_samples);
    }
}
