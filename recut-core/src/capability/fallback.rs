//! Merges per-track finalized requests into a single fallback report.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::media::{TrackType, TransformationRequest};

/// Original request and what the device actually does instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub original: TransformationRequest,
    pub fallback: TransformationRequest,
}

/// Collects the finalized request of every output track.
///
/// Audio tracks contribute the audio MIME type; video tracks contribute the
/// video MIME type, output height and HDR mode. Once every track has reported,
/// a single [`FallbackEvent`] is produced if the merged request differs from
/// the original.
#[derive(Debug)]
pub struct FallbackListener {
    original: TransformationRequest,
    merged: TransformationRequest,
    expected_tracks: usize,
    reported: HashSet<TrackType>,
    emitted: bool,
}

impl FallbackListener {
    pub fn new(original: TransformationRequest, expected_tracks: usize) -> Self {
        Self {
            merged: original.clone(),
            original,
            expected_tracks,
            reported: HashSet::new(),
            emitted: false,
        }
    }

    /// Records `finalized` for `track_type`; returns the fallback once all
    /// tracks have reported and the merged request changed.
    pub fn on_request_finalized(
        &mut self,
        track_type: TrackType,
        finalized: &TransformationRequest,
    ) -> Option<FallbackEvent> {
        if !self.reported.insert(track_type) {
            tracing::warn!("{} track finalized its request twice", track_type);
            return None;
        }

        match track_type {
            TrackType::Audio => {
                if finalized.audio_mime != self.original.audio_mime {
                    self.merged.audio_mime = finalized.audio_mime.clone();
                }
            }
            TrackType::Video => {
                if finalized.video_mime != self.original.video_mime {
                    self.merged.video_mime = finalized.video_mime.clone();
                }
                if finalized.output_height != self.original.output_height {
                    self.merged.output_height = finalized.output_height;
                }
                if finalized.hdr_mode != self.original.hdr_mode {
                    self.merged.hdr_mode = finalized.hdr_mode;
                }
            }
        }

        if self.emitted || self.reported.len() < self.expected_tracks {
            return None;
        }
        self.emitted = true;
        (self.merged != self.original).then(|| FallbackEvent {
            original: self.original.clone(),
            fallback: self.merged.clone(),
        })
    }

    pub fn merged(&self) -> &TransformationRequest {
        &self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{HdrMode, mime};

    #[test]
    fn test_no_event_when_unchanged() {
        let original = TransformationRequest::default();
        let mut listener = FallbackListener::new(original.clone(), 2);
        assert!(listener.on_request_finalized(TrackType::Audio, &original).is_none());
        assert!(listener.on_request_finalized(TrackType::Video, &original).is_none());
    }

    #[test]
    fn test_event_waits_for_all_tracks_and_fires_once() {
        let original = TransformationRequest::default();
        let mut listener = FallbackListener::new(original.clone(), 2);

        let video = original.clone().with_hdr_mode(HdrMode::ToneMapUsingOpenGl);
        assert!(listener.on_request_finalized(TrackType::Video, &video).is_none());

        let audio = original.clone().with_audio_mime(mime::AUDIO_AAC);
        let event = listener
            .on_request_finalized(TrackType::Audio, &audio)
            .expect("fallback event");
        assert_eq!(event.original, original);
        assert_eq!(event.fallback.hdr_mode, HdrMode::ToneMapUsingOpenGl);
        assert_eq!(event.fallback.audio_mime.as_deref(), Some(mime::AUDIO_AAC));

        assert!(listener.on_request_finalized(TrackType::Audio, &audio).is_none());
    }

    #[test]
    fn test_audio_track_cannot_change_video_fields() {
        let original = TransformationRequest::default();
        let mut listener = FallbackListener::new(original.clone(), 1);
        let bogus = original.clone().with_output_height(480);
        assert!(listener.on_request_finalized(TrackType::Audio, &bogus).is_none());
    }

    #[test]
    fn test_video_mime_change_is_reported() {
        let original = TransformationRequest::default().with_video_mime(mime::VIDEO_H264);
        let mut listener = FallbackListener::new(original.clone(), 1);
        let hevc = original.clone().with_video_mime(mime::VIDEO_H265);
        let event = listener
            .on_request_finalized(TrackType::Video, &hevc)
            .expect("fallback event");
        assert_eq!(event.fallback.video_mime.as_deref(), Some(mime::VIDEO_H265));
    }
}
