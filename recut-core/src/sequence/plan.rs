//! Export planning: probing items, laying out timelines and choosing
//! transmux or transcode per output track.
//!
//! Planning reads the inputs' track formats and durations but opens no
//! codec. Everything it rejects is reported as a configuration error.

use std::collections::BTreeMap;

use super::slowmo::SlowMotionFlattener;
use crate::error::ExportError;
use crate::export::TransformerSettings;
use crate::extractor::ExtractorFactory;
use crate::media::{Composition, EditedMediaItem, HdrMode, TrackFormat, TrackType};
use crate::muxer::MuxerFactory;
use crate::pipeline::ClipWindow;

/// Adjustments for planning a resume continuation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Output timestamp at which the first item of every sequence starts
    pub timeline_start_us: i64,
    /// Transcode every track regardless of what the inputs would allow
    pub force_transcode: bool,
}

/// An item placed on its sequence's output timeline.
#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub sequence: usize,
    pub index: usize,
    pub item: EditedMediaItem,
    /// Input range that reaches the output
    pub window: ClipWindow,
    pub offset_us: i64,
    pub duration_us: i64,
    /// Input tracks that are not removed
    pub formats: BTreeMap<TrackType, TrackFormat>,
    pub key_frame_at_start: bool,
}

impl PlannedItem {
    pub fn format(&self, track_type: TrackType) -> Option<&TrackFormat> {
        self.formats.get(&track_type)
    }

    pub fn end_us(&self) -> i64 {
        self.offset_us + self.duration_us
    }

    pub fn uri(&self) -> &str {
        self.item.uri()
    }

    /// Timestamp flattening applied to the item's video.
    pub fn flattener(&self) -> SlowMotionFlattener {
        match self.format(TrackType::Video) {
            Some(format) if self.item.flatten_for_slow_motion => {
                SlowMotionFlattener::new(&format.slow_motion_segments)
            }
            _ => SlowMotionFlattener::default(),
        }
    }

    /// Cuts the item so that it ends at `end_us` on the output timeline.
    fn truncate(&mut self, end_us: i64) {
        let duration_us = end_us - self.offset_us;
        if duration_us >= self.duration_us {
            return;
        }
        let flattener = self.flattener();
        let stretched_end =
            flattener.map(self.window.start_us) + self.item.input_offset_us(duration_us);
        self.window.end_us = flattener.unmap(stretched_end).min(self.window.end_us);
        self.duration_us = duration_us;
    }
}

#[derive(Debug, Clone)]
pub struct PlannedSequence {
    pub index: usize,
    pub items: Vec<PlannedItem>,
}

impl PlannedSequence {
    pub fn end_us(&self, timeline_start_us: i64) -> i64 {
        self.items
            .last()
            .map(PlannedItem::end_us)
            .unwrap_or(timeline_start_us)
    }

    pub fn has_track(&self, track_type: TrackType) -> bool {
        self.items.iter().any(|i| i.formats.contains_key(&track_type))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    Transmux,
    Transcode,
}

/// One output track and the sequences feeding it.
#[derive(Debug, Clone)]
pub struct PlannedTrack {
    pub track_type: TrackType,
    pub mode: TrackMode,
    /// Contributing sequences; the first one drives output timing
    pub sequences: Vec<usize>,
    /// Format of the first input of the leading sequence
    pub input_format: TrackFormat,
    pub transcode_reasons: Vec<&'static str>,
}

impl PlannedTrack {
    pub fn is_transcoded(&self) -> bool {
        self.mode == TrackMode::Transcode
    }

    pub fn lead_sequence(&self) -> usize {
        self.sequences[0]
    }
}

#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub sequences: Vec<PlannedSequence>,
    pub tracks: Vec<PlannedTrack>,
    pub timeline_start_us: i64,
    pub end_us: i64,
}

impl ExportPlan {
    pub fn track(&self, track_type: TrackType) -> Option<&PlannedTrack> {
        self.tracks.iter().find(|t| t.track_type == track_type)
    }

    pub fn track_types(&self) -> Vec<TrackType> {
        self.tracks.iter().map(|t| t.track_type).collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &PlannedItem> {
        self.sequences.iter().flat_map(|s| s.items.iter())
    }
}

/// External collaborators planning consults.
pub struct PlanContext<'a> {
    pub extractors: &'a dyn ExtractorFactory,
    pub muxer: &'a dyn MuxerFactory,
    pub settings: &'a TransformerSettings,
}

struct Probe {
    formats: Vec<TrackFormat>,
    duration_us: i64,
    key_frame_at_start: bool,
}

fn probe_item(context: &PlanContext<'_>, item: &EditedMediaItem) -> Result<Probe, ExportError> {
    let uri = item.uri();
    let mut extractor = context
        .extractors
        .open(uri)
        .map_err(|e| ExportError::io_unavailable(uri, e))?;
    let start_us = item.clipping().start_us;
    let key_frame_at_start = item.clipping().starts_at_key_frame
        || start_us == 0
        || extractor
            .seek_to(start_us)
            .map_err(|e| ExportError::io_unavailable(uri, e))?
            == start_us;
    Ok(Probe {
        formats: extractor.track_formats().to_vec(),
        duration_us: extractor.duration_us(),
        key_frame_at_start,
    })
}

/// Plans the export of `composition`.
///
/// # Errors
/// - `ErrorCode::InvalidComposition` - Structural problems, clips past the
///   end of their input, items without usable tracks, or a video sequence
///   with an item that has no video
/// - `ErrorCode::IoFileUnavailable` - An input cannot be opened
pub fn plan_export(
    composition: &Composition,
    context: &PlanContext<'_>,
    options: PlanOptions,
) -> Result<ExportPlan, ExportError> {
    composition.validate()?;

    let mut sequences = Vec::with_capacity(composition.sequences.len());
    for (s, sequence) in composition.sequences.iter().enumerate() {
        let mut offset_us = options.timeline_start_us;
        let mut items = Vec::with_capacity(sequence.items.len());
        for (i, item) in sequence.items.iter().enumerate() {
            let probe = probe_item(context, item)?;
            let start_us = item.clipping().start_us;
            let end_us = item
                .clipping()
                .end_us
                .map_or(probe.duration_us, |end| end.min(probe.duration_us));
            if end_us <= start_us {
                return Err(ExportError::invalid_composition(format!(
                    "sequence {s} item {i}: clip starts at {start_us}us but the input ends at {}us",
                    probe.duration_us
                )));
            }

            let formats: BTreeMap<TrackType, TrackFormat> = probe
                .formats
                .into_iter()
                .filter_map(|f| {
                    let track_type = f.track_type()?;
                    (!item.is_removed(track_type)).then_some((track_type, f))
                })
                .collect();
            if formats.is_empty() {
                return Err(ExportError::invalid_composition(format!(
                    "sequence {s} item {i}: no usable audio or video track"
                )));
            }

            let mut planned = PlannedItem {
                sequence: s,
                index: i,
                item: item.clone(),
                window: ClipWindow::new(start_us, end_us),
                offset_us,
                duration_us: 0,
                formats,
                key_frame_at_start: probe.key_frame_at_start,
            };
            let flattened_us = planned.flattener().duration_us(start_us, end_us);
            planned.duration_us = item.timeline_duration_us(flattened_us);
            offset_us += planned.duration_us;
            items.push(planned);
        }
        sequences.push(PlannedSequence { index: s, items });
    }

    let primary = composition.primary_sequence;
    let end_us = match composition.duration_us {
        Some(duration_us) => options.timeline_start_us + duration_us,
        None => sequences
            .get(primary)
            .map_or(options.timeline_start_us, |s| s.end_us(options.timeline_start_us)),
    };
    for sequence in &mut sequences {
        sequence.items.retain(|i| i.offset_us < end_us);
        for item in &mut sequence.items {
            item.truncate(end_us);
        }
    }

    let mut tracks = Vec::new();
    for track_type in TrackType::ALL {
        if let Some(track) = plan_track(track_type, &sequences, composition, context, options)? {
            tracks.push(track);
        }
    }
    if tracks.is_empty() {
        return Err(ExportError::invalid_composition("composition has no output tracks"));
    }

    for track in &tracks {
        match track.mode {
            TrackMode::Transmux => tracing::info!("{} track will be transmuxed", track.track_type),
            TrackMode::Transcode => tracing::info!(
                "{} track will be transcoded: {}",
                track.track_type,
                track.transcode_reasons.join(", ")
            ),
        }
    }

    Ok(ExportPlan {
        sequences,
        tracks,
        timeline_start_us: options.timeline_start_us,
        end_us,
    })
}

fn plan_track(
    track_type: TrackType,
    sequences: &[PlannedSequence],
    composition: &Composition,
    context: &PlanContext<'_>,
    options: PlanOptions,
) -> Result<Option<PlannedTrack>, ExportError> {
    let mut contributors: Vec<usize> = sequences
        .iter()
        .filter(|s| s.has_track(track_type))
        .map(|s| s.index)
        .collect();
    if contributors.is_empty() {
        return Ok(None);
    }
    if let Some(position) = contributors.iter().position(|s| *s == composition.primary_sequence) {
        contributors.swap(0, position);
    }

    if track_type == TrackType::Video {
        for s in &contributors {
            if let Some(item) = sequences[*s].items.iter().find(|i| i.format(track_type).is_none()) {
                return Err(ExportError::invalid_composition(format!(
                    "sequence {s} item {} has no video track but its sequence contributes video",
                    item.index
                )));
            }
        }
    }

    let items: Vec<&PlannedItem> = contributors
        .iter()
        .flat_map(|s| sequences[*s].items.iter())
        .collect();
    let Some(input_format) = items.iter().find_map(|i| i.format(track_type)).cloned() else {
        return Ok(None);
    };

    let settings = context.settings;
    let mut reasons = Vec::new();
    if options.force_transcode {
        reasons.push("resume continuation");
    }
    if contributors.len() > 1 {
        reasons.push("multiple sequences");
    }
    if composition.effects.has_effects_for(track_type) {
        reasons.push("composition effects");
    }
    if items.iter().any(|i| i.item.effects.has_effects_for(track_type)) {
        reasons.push("item effects");
    }
    if items.iter().any(|i| match i.format(track_type) {
        Some(format) => !input_format.is_append_compatible(format),
        None => false,
    }) {
        reasons.push("format changes between items");
    }
    if !context
        .muxer
        .supported_mime_types(track_type)
        .contains(&input_format.mime)
    {
        reasons.push("input MIME type not supported by the muxer");
    }

    match track_type {
        TrackType::Audio => {
            if items.iter().any(|i| i.format(track_type).is_none() || i.item.mute_audio) {
                reasons.push("silence generation");
            }
            if settings
                .audio_mime
                .as_ref()
                .is_some_and(|mime| *mime != input_format.mime)
            {
                reasons.push("audio MIME type change");
            }
        }
        TrackType::Video => {
            if items.iter().any(|i| !i.key_frame_at_start) {
                reasons.push("clip does not start at a key frame");
            }
            if items.iter().any(|i| !i.flattener().is_identity()) {
                reasons.push("slow motion flattening");
            }
            if settings
                .video_mime
                .as_ref()
                .is_some_and(|mime| *mime != input_format.mime)
            {
                reasons.push("video MIME type change");
            }
            if settings
                .output_height
                .is_some_and(|height| height != input_format.height)
            {
                reasons.push("resolution change");
            }
            if !settings.video_encoder_settings.is_default() {
                reasons.push("video encoder settings");
            }
            if composition.hdr_mode != HdrMode::KeepHdr
                && items
                    .iter()
                    .any(|i| i.format(track_type).is_some_and(TrackFormat::is_hdr))
            {
                reasons.push("HDR conversion");
            }
        }
    }

    let mode = if reasons.is_empty() {
        TrackMode::Transmux
    } else {
        TrackMode::Transcode
    };
    Ok(Some(PlannedTrack {
        track_type,
        mode,
        sequences: contributors,
        input_format,
        transcode_reasons: reasons,
    }))
}
