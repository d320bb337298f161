//! Partial container files for resume testing.
//!
//! Only available in tests or with the `test-utils` feature.

use std::path::PathBuf;

use bytes::Bytes;
use tempfile::TempDir;

use super::ContainerMuxer;
use crate::media::{EncodedSample, SampleFlags, TrackFormat, TrackType, mime};
use crate::muxer::Muxer;

/// Frame duration of fixture video (30 fps).
pub const FIXTURE_FRAME_US: i64 = 33_333;

/// Spacing of fixture audio packets.
pub const FIXTURE_AUDIO_PACKET_US: i64 = 21_333;

/// Layout of a partial output left behind by an interrupted export.
#[derive(Debug, Clone, Copy)]
pub struct PartialLayout {
    pub video_frames: i64,
    /// Frames between video key frames
    pub gop: i64,
    /// End of the audio data, `None` for a video-only file
    pub audio_end_us: Option<i64>,
}

/// Creates a temporary directory for fixture files.
///
/// # Panics
/// Panics if the directory cannot be created.
pub fn create_fixture_dir() -> TempDir {
    TempDir::new().expect("failed to create fixture directory")
}

/// Writes `partial.rcx` into `dir` without a trailer.
///
/// Video is 320x240 H.264 at 30 fps; audio is 48 kHz stereo AAC.
///
/// # Panics
/// Panics if the file cannot be written.
pub fn write_partial_container(dir: &TempDir, layout: PartialLayout) -> PathBuf {
    let path = dir.path().join("partial.rcx");
    let mut muxer = ContainerMuxer::create(&path).expect("failed to create fixture container");
    let video = muxer
        .add_track(&TrackFormat::video(mime::VIDEO_H264, 320, 240, 30.0))
        .expect("failed to add fixture video track");
    let audio = layout.audio_end_us.map(|end_us| {
        let track = muxer
            .add_track(&TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2))
            .expect("failed to add fixture audio track");
        (track, end_us)
    });

    for frame in 0..layout.video_frames {
        let flags = if frame % layout.gop.max(1) == 0 {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        let sample = EncodedSample::new(
            TrackType::Video,
            frame * FIXTURE_FRAME_US,
            flags,
            Bytes::from_static(b"v"),
        );
        muxer
            .write_sample(video, &sample)
            .expect("failed to write fixture video");
    }
    if let Some((track, end_us)) = audio {
        for timestamp_us in (0..end_us).step_by(FIXTURE_AUDIO_PACKET_US as usize) {
            let sample = EncodedSample::new(
                TrackType::Audio,
                timestamp_us,
                SampleFlags::KEY_FRAME,
                Bytes::from_static(b"a"),
            );
            muxer
                .write_sample(track, &sample)
                .expect("failed to write fixture audio");
        }
    }
    muxer.release(true).expect("failed to close fixture container");
    path
}
