//! Export result record.
//!
//! Built incrementally while an export runs and frozen when it reaches a
//! terminal state. A resumed export reports the retained prefix as its first
//! processed input, without decoder or encoder names since it was remuxed.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::capability::FallbackEvent;
use crate::error::ExportError;
use crate::media::{ColorInfo, TrackType};
use crate::muxer::MuxerSummary;
use crate::sequence::ItemReport;

/// Where a processed input came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSource {
    /// Samples copied from a previous partial output
    RetainedPrefix { path: String },
    Item {
        sequence: usize,
        item: usize,
        uri: String,
    },
}

/// Statistics of one processed input segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedInput {
    pub source: InputSource,
    pub duration_us: i64,
    /// `None` when the track was transmuxed, generated or absent
    pub audio_decoder_name: Option<String>,
    pub video_decoder_name: Option<String>,
}

/// Final record of an export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportResult {
    pub processed_inputs: Vec<ProcessedInput>,
    pub audio_encoder_name: Option<String>,
    pub video_encoder_name: Option<String>,
    pub video_frame_count: u64,
    pub audio_sample_count: u64,
    pub duration_ms: i64,
    pub file_size_bytes: Option<u64>,
    pub average_audio_bitrate: Option<u32>,
    pub average_video_bitrate: Option<u32>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    pub color_info: Option<ColorInfo>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fallback_event: Option<FallbackEvent>,
    #[serde(skip)]
    pub export_error: Option<ExportError>,
}

impl ExportResult {
    pub fn is_resumed(&self) -> bool {
        self.processed_inputs
            .first()
            .is_some_and(|i| matches!(i.source, InputSource::RetainedPrefix { .. }))
    }
}

/// Accumulates an [`ExportResult`].
#[derive(Debug, Default)]
pub struct ExportResultBuilder {
    prefix: Option<ProcessedInput>,
    items: BTreeMap<(usize, usize), ProcessedInput>,
    result: ExportResult,
}

impl ExportResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the remuxed prefix of a resumed export.
    pub fn add_retained_prefix(&mut self, path: &str, duration_us: i64) {
        self.prefix = Some(ProcessedInput {
            source: InputSource::RetainedPrefix {
                path: path.to_string(),
            },
            duration_us,
            audio_decoder_name: None,
            video_decoder_name: None,
        });
    }

    /// Merges the per-track reports of sequence items.
    pub fn add_item_reports(&mut self, reports: &[ItemReport]) {
        for report in reports {
            let input = self
                .items
                .entry((report.sequence, report.index))
                .or_insert_with(|| ProcessedInput {
                    source: InputSource::Item {
                        sequence: report.sequence,
                        item: report.index,
                        uri: report.uri.clone(),
                    },
                    duration_us: report.duration_us,
                    audio_decoder_name: None,
                    video_decoder_name: None,
                });
            input.duration_us = input.duration_us.max(report.duration_us);
            match report.track_type {
                TrackType::Audio => input.audio_decoder_name = report.decoder_name.clone(),
                TrackType::Video => input.video_decoder_name = report.decoder_name.clone(),
            }
        }
    }

    pub fn set_encoder_name(&mut self, track_type: TrackType, name: &str) {
        let slot = match track_type {
            TrackType::Audio => &mut self.result.audio_encoder_name,
            TrackType::Video => &mut self.result.video_encoder_name,
        };
        *slot = Some(name.to_string());
    }

    pub fn set_fallback_event(&mut self, event: FallbackEvent) {
        self.result.fallback_event = Some(event);
    }

    /// Takes output statistics from the released muxer.
    pub fn apply_muxer_summary(&mut self, summary: &MuxerSummary) {
        let result = &mut self.result;
        result.duration_ms = summary.duration_us / 1000;
        result.file_size_bytes = summary.file_size_bytes;
        if let Some(video) = summary.track(TrackType::Video) {
            result.video_frame_count = video.sample_count;
            result.average_video_bitrate = video.average_bitrate;
            result.width = Some(video.format.width);
            result.height = Some(video.format.height);
            result.color_info = Some(video.format.color_or_default());
        }
        if let Some(audio) = summary.track(TrackType::Audio) {
            result.audio_sample_count = audio.sample_count;
            result.average_audio_bitrate = audio.average_bitrate;
            result.channel_count = Some(audio.format.channel_count);
            result.sample_rate = Some(audio.format.sample_rate);
        }
    }

    pub fn set_error(&mut self, error: ExportError) {
        self.result.export_error = Some(error);
    }

    pub fn build(self) -> ExportResult {
        let mut result = self.result;
        result.processed_inputs = self.prefix.into_iter().chain(self.items.into_values()).collect();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(sequence: usize, index: usize, track_type: TrackType, decoder: Option<&str>) -> ItemReport {
        ItemReport {
            sequence,
            index,
            uri: format!("synthetic://clip{index}"),
            track_type,
            decoder_name: decoder.map(str::to_string),
            duration_us: 1_000_000,
        }
    }

    #[test]
    fn test_prefix_comes_first_and_items_are_ordered() {
        let mut builder = ExportResultBuilder::new();
        builder.add_item_reports(&[
            report(0, 1, TrackType::Video, Some("sim.avc.decoder")),
            report(0, 0, TrackType::Video, Some("sim.avc.decoder")),
        ]);
        builder.add_item_reports(&[report(0, 0, TrackType::Audio, Some("sim.aac.decoder"))]);
        builder.add_retained_prefix("/tmp/out.rcx.resume", 2_000_000);

        let result = builder.build();
        assert!(result.is_resumed());
        assert_eq!(result.processed_inputs.len(), 3);
        assert_eq!(result.processed_inputs[0].video_decoder_name, None);
        assert_eq!(
            result.processed_inputs[1].source,
            InputSource::Item {
                sequence: 0,
                item: 0,
                uri: "synthetic://clip0".to_string()
            }
        );
        assert_eq!(
            result.processed_inputs[1].audio_decoder_name.as_deref(),
            Some("sim.aac.decoder")
        );
        assert_eq!(result.processed_inputs[2].audio_decoder_name, None);
    }

    #[test]
    fn test_transmuxed_tracks_have_no_encoder() {
        let mut builder = ExportResultBuilder::new();
        builder.add_item_reports(&[report(0, 0, TrackType::Video, None)]);
        builder.set_encoder_name(TrackType::Audio, "sim.aac.encoder");
        let result = builder.build();
        assert_eq!(result.video_encoder_name, None);
        assert_eq!(result.audio_encoder_name.as_deref(), Some("sim.aac.encoder"));
        assert!(!result.is_resumed());
    }
}
