//! Container writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use super::{MAGIC, RECORD_HEADER_LEN, RecordTag, SAMPLE_HEADER_LEN, VERSION};
use crate::error::MuxerError;
use crate::media::{EncodedSample, TrackFormat, TrackType, mime};
use crate::muxer::{Muxer, MuxerFactory};

/// Writes the reference container to a file.
pub struct ContainerMuxer {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    tracks: Vec<TrackFormat>,
    sample_counts: Vec<u64>,
}

impl ContainerMuxer {
    /// Creates the file and writes the header.
    ///
    /// # Errors
    /// - `MuxerError::Io` - The file cannot be created
    pub fn create(path: &Path) -> Result<Self, MuxerError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION])?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            tracks: Vec::new(),
            sample_counts: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, tag: RecordTag, payload: &[u8]) -> Result<(), MuxerError> {
        let writer = self.writer.as_mut().ok_or(MuxerError::Released)?;
        let len = u32::try_from(payload.len()).map_err(|_| MuxerError::Encoding {
            reason: format!("record of {} bytes is too large", payload.len()),
        })?;
        let mut header = BytesMut::with_capacity(RECORD_HEADER_LEN);
        header.put_u8(tag as u8);
        header.put_u32(len);
        writer.write_all(&header)?;
        writer.write_all(payload)?;
        Ok(())
    }
}

impl Muxer for ContainerMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, MuxerError> {
        if format.track_type().is_none() {
            return Err(MuxerError::UnsupportedMimeType {
                mime: format.mime.clone(),
            });
        }
        let json = serde_json::to_vec(format).map_err(|e| MuxerError::Encoding {
            reason: e.to_string(),
        })?;
        self.write_record(RecordTag::Track, &json)?;
        self.tracks.push(format.clone());
        self.sample_counts.push(0);
        Ok(self.tracks.len() - 1)
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<(), MuxerError> {
        if track >= self.tracks.len() {
            return Err(MuxerError::InvalidTrack { index: track });
        }
        let mut payload = BytesMut::with_capacity(SAMPLE_HEADER_LEN + sample.data.len());
        payload.put_u8(track as u8);
        payload.put_i64(sample.timestamp_us);
        payload.put_u8(sample.flags.bits());
        payload.put_slice(&sample.data);
        self.write_record(RecordTag::Sample, &payload)?;
        self.sample_counts[track] += 1;
        Ok(())
    }

    fn add_metadata(&mut self, key: &str, value: &str) -> Result<(), MuxerError> {
        let json = serde_json::json!({ "key": key, "value": value }).to_string();
        self.write_record(RecordTag::Metadata, json.as_bytes())
    }

    fn release(&mut self, for_cancellation: bool) -> Result<(), MuxerError> {
        if self.writer.is_none() {
            return Ok(());
        }
        if !for_cancellation {
            let mut trailer = BytesMut::with_capacity(4 + 8 * self.sample_counts.len());
            trailer.put_u32(self.sample_counts.len() as u32);
            for count in &self.sample_counts {
                trailer.put_u64(*count);
            }
            self.write_record(RecordTag::Trailer, &trailer)?;
        }
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        tracing::debug!(
            "Container {} released (cancelled: {})",
            self.path.display(),
            for_cancellation
        );
        Ok(())
    }
}

impl Drop for ContainerMuxer {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Creates [`ContainerMuxer`]s.
#[derive(Debug, Clone, Default)]
pub struct ContainerMuxerFactory;

impl MuxerFactory for ContainerMuxerFactory {
    fn create(&self, path: &Path) -> Result<Box<dyn Muxer>, MuxerError> {
        Ok(Box::new(ContainerMuxer::create(path)?))
    }

    fn supported_mime_types(&self, track_type: TrackType) -> Vec<String> {
        let mimes: &[&str] = match track_type {
            TrackType::Video => &[mime::VIDEO_H264, mime::VIDEO_H265, mime::VIDEO_AV1],
            TrackType::Audio => &[mime::AUDIO_AAC, mime::AUDIO_OPUS],
        };
        mimes.iter().map(|m| m.to_string()).collect()
    }
}
