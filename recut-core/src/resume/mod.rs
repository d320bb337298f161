//! Resume / muxer-state management.
//!
//! A partial output left behind by a cancelled or crashed export is inspected
//! to find the last safe point: a video key frame that every other track has
//! already covered. Samples before that boundary are remuxed into the new
//! output; the composition is clipped to start at the boundary and the rest
//! is transcoded and appended.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::ResumeBoundaryPolicy;
use crate::container::ContainerReader;
use crate::error::ExportError;
use crate::media::{ClippingConfiguration, Composition, EncodedSample, TrackType};
use crate::muxer::MuxerWrapper;
use crate::sequence::ExportPlan;

/// Retained prefix and the composition that continues after it.
#[derive(Debug, Clone)]
pub struct ResumePoint {
    /// Output timestamp where the continuation starts
    pub boundary_us: i64,
    pub continuation: Composition,
    /// Items dropped from the front of each sequence
    pub skipped_items: Vec<usize>,
    pub prefix: ContainerReader,
    pub source: PathBuf,
}

#[derive(Debug, Clone)]
pub enum ResumeDecision {
    /// Nothing worth keeping; export from scratch
    Restart { reason: String },
    Resume(Box<ResumePoint>),
}

fn restart(reason: impl Into<String>) -> ResumeDecision {
    let reason = reason.into();
    tracing::info!("Restarting export instead of resuming: {}", reason);
    ResumeDecision::Restart { reason }
}

/// Decides how to continue from the partial output at `existing`.
///
/// `plan` is the plan of the full `composition`; it supplies the item
/// layout used to clip the continuation.
pub fn compute_resume_state(
    existing: &Path,
    composition: &Composition,
    plan: &ExportPlan,
    policy: ResumeBoundaryPolicy,
) -> ResumeDecision {
    let prefix = match ContainerReader::open(existing) {
        Ok(reader) => reader,
        Err(e) => return restart(format!("{} is unreadable: {e}", existing.display())),
    };

    let written: BTreeSet<TrackType> = prefix.tracks().iter().filter_map(|t| t.track_type()).collect();
    let expected: BTreeSet<TrackType> = plan.track_types().into_iter().collect();
    if written != expected {
        return restart(format!(
            "partial output has tracks {written:?}, composition produces {expected:?}"
        ));
    }

    let Some(boundary_us) = select_boundary(&prefix, policy).filter(|b| *b > 0) else {
        return restart("partial output holds nothing before its first key frame");
    };
    if boundary_us >= plan.end_us {
        return restart("partial output already covers the whole composition");
    }

    let (continuation, skipped_items) =
        match continuation_composition(composition, plan, boundary_us) {
            Ok(continuation) => continuation,
            Err(reason) => return restart(reason),
        };

    tracing::info!(
        "Resuming {} at {}us ({} items skipped)",
        existing.display(),
        boundary_us,
        skipped_items.iter().sum::<usize>()
    );
    ResumeDecision::Resume(Box::new(ResumePoint {
        boundary_us,
        continuation,
        skipped_items,
        prefix,
        source: existing.to_path_buf(),
    }))
}

/// Picks the resume boundary of a partial output.
///
/// With video, the boundary is a video key frame no later than the end of
/// any other track's data, stepped back per `policy`. Audio-only outputs
/// resume at their last audio sample.
pub fn select_boundary(prefix: &ContainerReader, policy: ResumeBoundaryPolicy) -> Option<i64> {
    let Some(video) = prefix.track_index(TrackType::Video) else {
        let audio = prefix.track_index(TrackType::Audio)?;
        return prefix.samples(audio).last().map(|s| s.timestamp_us);
    };

    let covered_us = prefix
        .track_index(TrackType::Audio)
        .map_or(i64::MAX, |audio| prefix.track_end_us(audio));
    let key_frames: Vec<i64> = prefix
        .samples(video)
        .iter()
        .filter(|s| s.flags.is_key_frame() && s.timestamp_us <= covered_us)
        .map(|s| s.timestamp_us)
        .collect();

    let steps_back = match policy {
        ResumeBoundaryPolicy::LastKeyFrame => 0,
        ResumeBoundaryPolicy::KeyFramesBack(steps) => steps as usize,
    };
    let chosen = key_frames.len().checked_sub(1 + steps_back)?;
    key_frames.get(chosen).copied()
}

/// Clips `composition` so that every sequence starts at `boundary_us`.
///
/// Returns the continuation and the number of items dropped from the front
/// of each sequence.
fn continuation_composition(
    composition: &Composition,
    plan: &ExportPlan,
    boundary_us: i64,
) -> Result<(Composition, Vec<usize>), String> {
    let mut continuation = composition.clone();
    let mut skipped_items = Vec::with_capacity(plan.sequences.len());

    for (planned, sequence) in plan.sequences.iter().zip(continuation.sequences.iter_mut()) {
        let remaining: Vec<_> = planned
            .items
            .iter()
            .filter(|i| i.end_us() > boundary_us)
            .collect();
        let Some(first) = remaining.first() else {
            return Err(format!("sequence {} ends before the resume point", planned.index));
        };

        let mut items = Vec::with_capacity(remaining.len());
        for planned_item in &remaining {
            let mut item = sequence.items[planned_item.index].clone();
            let clipping = ClippingConfiguration {
                start_us: planned_item.window.start_us,
                end_us: Some(planned_item.window.end_us),
                starts_at_key_frame: false,
            };
            item.media_item.clipping = clipping;
            items.push(item);
        }

        if first.offset_us < boundary_us {
            let flattener = first.flattener();
            let stretched = flattener.map(first.window.start_us)
                + first.item.input_offset_us(boundary_us - first.offset_us);
            items[0].media_item.clipping.start_us = flattener.unmap(stretched);
        }

        skipped_items.push(first.index);
        sequence.items = items;
    }

    if let Some(duration_us) = composition.duration_us {
        continuation.duration_us = Some(duration_us - (boundary_us - plan.timeline_start_us));
    }
    Ok((continuation, skipped_items))
}

/// Copies the samples of `prefix` before `boundary_us` into `muxer`.
///
/// Registers every prefix track, writes the samples in timestamp order and
/// leaves the tracks open for the continuation. Returns the number of
/// samples copied.
///
/// # Errors
/// - `ErrorCode::MuxingFailed` - The muxer rejected a track or sample
pub async fn remux_prefix(
    prefix: &ContainerReader,
    boundary_us: i64,
    muxer: &MuxerWrapper,
) -> Result<u64, ExportError> {
    let mut samples = Vec::new();
    for track_type in TrackType::ALL {
        let Some(index) = prefix.track_index(track_type) else {
            continue;
        };
        muxer.add_track(&prefix.tracks()[index])?;
        samples.extend(
            prefix
                .samples(index)
                .iter()
                .filter(|s| s.timestamp_us < boundary_us)
                .map(|s| (s.timestamp_us, track_type, s)),
        );
    }
    samples.sort_by_key(|(timestamp_us, track_type, _)| (*timestamp_us, *track_type));

    let count = samples.len() as u64;
    for (timestamp_us, track_type, entry) in samples {
        muxer
            .write_sample(EncodedSample::new(
                track_type,
                timestamp_us,
                entry.flags,
                entry.data.clone(),
            ))
            .await?;
    }
    muxer.open_for_append();
    tracing::debug!("Remuxed {} prefix samples before {}us", count, boundary_us);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::test_fixtures::{
        FIXTURE_FRAME_US as FRAME_US, PartialLayout, create_fixture_dir, write_partial_container,
    };
    use crate::media::{TrackFormat, mime};

    fn layout(video_frames: i64, gop: i64, audio_end_us: Option<i64>) -> PartialLayout {
        PartialLayout {
            video_frames,
            gop,
            audio_end_us,
        }
    }

    #[test]
    fn test_boundary_is_last_covered_key_frame() {
        let dir = create_fixture_dir();
        let path = write_partial_container(&dir, layout(100, 30, None));
        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(
            select_boundary(&reader, ResumeBoundaryPolicy::LastKeyFrame),
            Some(90 * FRAME_US)
        );
        assert_eq!(
            select_boundary(&reader, ResumeBoundaryPolicy::KeyFramesBack(2)),
            Some(30 * FRAME_US)
        );
        assert_eq!(select_boundary(&reader, ResumeBoundaryPolicy::KeyFramesBack(4)), None);
    }

    #[test]
    fn test_lagging_audio_limits_boundary() {
        let dir = create_fixture_dir();
        let path = write_partial_container(&dir, layout(100, 30, Some(1_500_000)));
        let reader = ContainerReader::open(&path).unwrap();
        // Audio ends near 1.5 s, so the key frame at 2 s is not safe
        assert_eq!(
            select_boundary(&reader, ResumeBoundaryPolicy::LastKeyFrame),
            Some(30 * FRAME_US)
        );
    }

    #[tokio::test]
    async fn test_remux_prefix_stops_at_boundary() {
        use crate::config::MuxerConfig;
        use crate::container::ContainerMuxerFactory;
        use crate::muxer::MuxerFactory;

        let dir = create_fixture_dir();
        let path = write_partial_container(&dir, layout(100, 30, Some(3_400_000)));
        let reader = ContainerReader::open(&path).unwrap();

        let output = dir.path().join("resumed.rcx");
        let muxer = ContainerMuxerFactory.create(&output).unwrap();
        let wrapper = MuxerWrapper::new(muxer, &output, 2, &MuxerConfig::default(), None);
        let copied = remux_prefix(&reader, 60 * FRAME_US, &wrapper).await.unwrap();

        let video = wrapper.track_summary(TrackType::Video).unwrap();
        assert_eq!(video.sample_count, 60);
        assert_eq!(video.last_timestamp_us, Some(59 * FRAME_US));
        let audio = wrapper.track_summary(TrackType::Audio).unwrap();
        assert!(audio.last_timestamp_us.unwrap() < 60 * FRAME_US);
        assert_eq!(copied, video.sample_count + audio.sample_count);

        // The continuation may add each track once more
        wrapper
            .add_track(&TrackFormat::video(mime::VIDEO_H264, 320, 240, 30.0))
            .unwrap();
        assert!(
            wrapper
                .add_track(&TrackFormat::audio(mime::AUDIO_AAC, 44_100, 2))
                .is_err()
        );
    }
}
