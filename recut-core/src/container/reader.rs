//! Container reader and the extractor built on it.

use std::path::Path;

use bytes::{Buf, Bytes};

use super::{ContainerError, MAGIC, RECORD_HEADER_LEN, RecordTag, SAMPLE_HEADER_LEN, VERSION};
use crate::error::ExtractorError;
use crate::extractor::Extractor;
use crate::media::{EncodedSample, SampleFlags, TrackFormat, TrackType};

/// One sample as stored in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub timestamp_us: i64,
    pub flags: SampleFlags,
    pub data: Bytes,
}

/// Parsed container file.
#[derive(Debug, Clone)]
pub struct ContainerReader {
    tracks: Vec<TrackFormat>,
    samples: Vec<Vec<SampleEntry>>,
    metadata: Vec<(String, String)>,
    finalized: bool,
    truncated: bool,
}

impl ContainerReader {
    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    /// - `ContainerError::Io` - The file cannot be read
    /// - `ContainerError::BadMagic` - The file is not a container
    pub fn open(path: &Path) -> Result<Self, ContainerError> {
        let data = std::fs::read(path)?;
        Self::parse(Bytes::from(data))
    }

    /// Parses an in-memory container, stopping at the first incomplete record.
    ///
    /// # Errors
    /// - `ContainerError::BadMagic` / `UnsupportedVersion` - Bad header
    /// - `ContainerError::InvalidRecord` - A complete record is malformed
    pub fn parse(mut data: Bytes) -> Result<Self, ContainerError> {
        let total = data.len();
        if data.len() < MAGIC.len() + 1 || &data[..MAGIC.len()] != MAGIC {
            return Err(ContainerError::BadMagic);
        }
        data.advance(MAGIC.len());
        let version = data.get_u8();
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion { version });
        }

        let mut reader = Self {
            tracks: Vec::new(),
            samples: Vec::new(),
            metadata: Vec::new(),
            finalized: false,
            truncated: false,
        };

        while data.has_remaining() {
            let offset = total - data.remaining();
            if data.remaining() < RECORD_HEADER_LEN {
                reader.truncated = true;
                break;
            }
            let tag = data.get_u8();
            let len = data.get_u32() as usize;
            if data.remaining() < len {
                reader.truncated = true;
                break;
            }
            let payload = data.split_to(len);
            let invalid = |reason: &str| ContainerError::InvalidRecord {
                offset,
                reason: reason.to_string(),
            };

            match RecordTag::from_byte(tag) {
                Some(RecordTag::Track) => {
                    let format: TrackFormat = serde_json::from_slice(&payload)?;
                    reader.tracks.push(format);
                    reader.samples.push(Vec::new());
                }
                Some(RecordTag::Sample) => {
                    let mut payload = payload;
                    if payload.len() < SAMPLE_HEADER_LEN {
                        return Err(invalid("sample record too short"));
                    }
                    let track = payload.get_u8() as usize;
                    let timestamp_us = payload.get_i64();
                    let flags = SampleFlags::from_bits(payload.get_u8());
                    let samples = reader
                        .samples
                        .get_mut(track)
                        .ok_or_else(|| invalid("sample for unknown track"))?;
                    samples.push(SampleEntry {
                        timestamp_us,
                        flags,
                        data: payload,
                    });
                }
                Some(RecordTag::Metadata) => {
                    let value: serde_json::Value = serde_json::from_slice(&payload)?;
                    let key = value["key"].as_str().unwrap_or_default().to_string();
                    let value = value["value"].as_str().unwrap_or_default().to_string();
                    reader.metadata.push((key, value));
                }
                Some(RecordTag::Trailer) => {
                    reader.finalized = true;
                }
                None => return Err(invalid("unknown record tag")),
            }
        }

        if reader.truncated {
            tracing::debug!("Container truncated after {} tracks", reader.tracks.len());
        }
        Ok(reader)
    }

    pub fn tracks(&self) -> &[TrackFormat] {
        &self.tracks
    }

    pub fn samples(&self, track: usize) -> &[SampleEntry] {
        self.samples.get(track).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the first track of `track_type`.
    pub fn track_index(&self, track_type: TrackType) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.track_type() == Some(track_type))
    }

    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    /// Whether the writer finalized the file.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether the file ends in an incomplete record.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// End of a track: last timestamp plus the mean sample spacing.
    pub fn track_end_us(&self, track: usize) -> i64 {
        let samples = self.samples(track);
        match samples {
            [] => 0,
            [only] => only.timestamp_us,
            [first, .., last] => {
                let spacing = (last.timestamp_us - first.timestamp_us) / (samples.len() as i64 - 1);
                last.timestamp_us + spacing
            }
        }
    }

    pub fn duration_us(&self) -> i64 {
        (0..self.tracks.len())
            .map(|t| self.track_end_us(t))
            .max()
            .unwrap_or(0)
    }
}

/// [`Extractor`] over a container file, one cursor per track type.
#[derive(Debug)]
pub struct ContainerExtractor {
    reader: ContainerReader,
    formats: Vec<TrackFormat>,
    cursors: Vec<(TrackType, usize, usize)>,
}

impl ContainerExtractor {
    pub fn open(path: &Path) -> Result<Self, ExtractorError> {
        Ok(Self::new(ContainerReader::open(path)?))
    }

    pub fn new(reader: ContainerReader) -> Self {
        let mut formats = Vec::new();
        let mut cursors = Vec::new();
        for track_type in TrackType::ALL {
            if let Some(index) = reader.track_index(track_type) {
                let mut format = reader.tracks()[index].clone();
                format.duration_us = Some(reader.track_end_us(index));
                formats.push(format);
                cursors.push((track_type, index, 0));
            }
        }
        Self {
            reader,
            formats,
            cursors,
        }
    }

    pub fn reader(&self) -> &ContainerReader {
        &self.reader
    }
}

impl Extractor for ContainerExtractor {
    fn track_formats(&self) -> &[TrackFormat] {
        &self.formats
    }

    fn duration_us(&self) -> i64 {
        self.reader.duration_us()
    }

    fn seek_to(&mut self, timestamp_us: i64) -> Result<i64, ExtractorError> {
        let mut sync_us = timestamp_us;
        if let Some(video) = self.reader.track_index(TrackType::Video) {
            sync_us = self
                .reader
                .samples(video)
                .iter()
                .filter(|s| s.flags.is_key_frame() && s.timestamp_us <= timestamp_us)
                .map(|s| s.timestamp_us)
                .next_back()
                .unwrap_or(0);
        }
        for (track_type, index, cursor) in &mut self.cursors {
            let samples = self.reader.samples(*index);
            let target = match track_type {
                TrackType::Video => sync_us,
                TrackType::Audio => timestamp_us,
            };
            // Last sample at or before the target, so audio covers the start
            let after = samples.partition_point(|s| s.timestamp_us <= target);
            *cursor = after.saturating_sub(1);
            if *track_type == TrackType::Video {
                *cursor = samples.partition_point(|s| s.timestamp_us < sync_us);
            }
        }
        Ok(sync_us)
    }

    fn read_sample(&mut self, track_type: TrackType) -> Result<Option<EncodedSample>, ExtractorError> {
        let Some((_, index, cursor)) = self.cursors.iter_mut().find(|(t, _, _)| *t == track_type)
        else {
            return Ok(None);
        };
        let Some(entry) = self.reader.samples(*index).get(*cursor) else {
            return Ok(None);
        };
        *cursor += 1;
        Ok(Some(EncodedSample::new(
            track_type,
            entry.timestamp_us,
            entry.flags,
            entry.data.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::container::ContainerMuxer;
    use crate::media::mime;
    use crate::muxer::Muxer;

    fn write_sample_file(path: &Path, finalize: bool) {
        let mut muxer = ContainerMuxer::create(path).unwrap();
        let video = muxer
            .add_track(&TrackFormat::video(mime::VIDEO_H264, 320, 240, 30.0))
            .unwrap();
        let audio = muxer
            .add_track(&TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2))
            .unwrap();
        for i in 0..10i64 {
            let flags = if i % 5 == 0 {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            };
            let sample = EncodedSample::new(TrackType::Video, i * 33_333, flags, Bytes::from(vec![i as u8; 16]));
            muxer.write_sample(video, &sample).unwrap();
            let sample = EncodedSample::new(
                TrackType::Audio,
                i * 21_333,
                SampleFlags::KEY_FRAME,
                Bytes::from_static(&[1, 2, 3]),
            );
            muxer.write_sample(audio, &sample).unwrap();
        }
        muxer.add_metadata("encoder", "recut").unwrap();
        muxer.release(!finalize).unwrap();
    }

    #[test]
    fn test_reads_back_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.rcx");
        write_sample_file(&path, true);

        let reader = ContainerReader::open(&path).unwrap();
        assert!(reader.is_finalized());
        assert!(!reader.is_truncated());
        assert_eq!(reader.tracks().len(), 2);
        assert_eq!(reader.samples(0).len(), 10);
        assert_eq!(reader.samples(0)[3].data, Bytes::from(vec![3u8; 16]));
        assert_eq!(reader.metadata()[0], ("encoder".to_string(), "recut".to_string()));
        assert_eq!(reader.track_end_us(0), 10 * 33_333);
    }

    #[test]
    fn test_truncated_tail_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.rcx");
        write_sample_file(&path, false);

        let mut data = std::fs::read(&path).unwrap();
        data.truncate(data.len() - 7);
        let reader = ContainerReader::parse(Bytes::from(data)).unwrap();
        assert!(!reader.is_finalized());
        assert!(reader.is_truncated());
        assert_eq!(reader.samples(0).len(), 10);
        assert_eq!(reader.samples(1).len(), 10);
        assert!(reader.metadata().is_empty());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        assert!(matches!(
            ContainerReader::parse(Bytes::from_static(b"MP4?xxxx")),
            Err(ContainerError::BadMagic)
        ));
        assert!(matches!(
            ContainerReader::parse(Bytes::new()),
            Err(ContainerError::BadMagic)
        ));
    }

    #[test]
    fn test_extractor_seeks_to_previous_key_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.rcx");
        write_sample_file(&path, true);

        let mut extractor = ContainerExtractor::open(&path).unwrap();
        let sync = extractor.seek_to(8 * 33_333).unwrap();
        assert_eq!(sync, 5 * 33_333);

        let first_video = extractor.read_sample(TrackType::Video).unwrap().unwrap();
        assert_eq!(first_video.timestamp_us, 5 * 33_333);
        assert!(first_video.is_key_frame());

        let first_audio = extractor.read_sample(TrackType::Audio).unwrap().unwrap();
        assert!(first_audio.timestamp_us <= 8 * 33_333);
    }
}
