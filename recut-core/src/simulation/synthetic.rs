//! Synthetic media sources addressed by `synthetic://` URIs.
//!
//! ```text
//! synthetic://<name>?duration_ms=5000&fps=30&width=640&height=480&gop=30
//!                   &audio=1&sample_rate=44100&channels=2&hdr=pq
//!                   &slowmo=1000:2000:4
//! ```
//!
//! Every parameter is optional. Video samples carry a packed RGB thumbnail;
//! audio samples carry a little-endian `u16` frame count followed by tone
//! parameters the simulated decoder expands into PCM.

use bytes::{BufMut, Bytes, BytesMut};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use url::Url;

use super::{AUDIO_FRAMES_PER_PACKET, THUMBNAIL_BYTES};
use crate::capability::suggested_bitrate;
use crate::error::ExtractorError;
use crate::extractor::Extractor;
use crate::media::{
    AudioFormat, ColorInfo, EncodedSample, SampleFlags, SlowMotionSegment, TrackFormat, TrackType,
    mime,
};

pub const SYNTHETIC_SCHEME: &str = "synthetic://";

const DEFAULT_AUDIO_BITRATE: u32 = 128_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticVideo {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    /// Frames per group of pictures
    pub gop: u32,
    pub color: ColorInfo,
    pub slow_motion: Vec<SlowMotionSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticAudio {
    pub mime: String,
    pub sample_rate: u32,
    pub channel_count: u16,
}

/// Description of a synthetic input; round-trips through its URI.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    pub name: String,
    pub duration_us: i64,
    pub video: Option<SyntheticVideo>,
    pub audio: Option<SyntheticAudio>,
    pub seed: u64,
}

fn name_seed(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn invalid(name: &str, reason: impl Into<String>) -> ExtractorError {
    ExtractorError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ExtractorError> {
    value
        .parse()
        .map_err(|_| invalid(name, format!("'{value}' is not a number")))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ExtractorError> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(invalid(name, format!("'{other}' is not a boolean"))),
    }
}

fn parse_slow_motion(value: &str) -> Result<SlowMotionSegment, ExtractorError> {
    let parts: Vec<&str> = value.split(':').collect();
    let [start, end, divisor] = parts[..] else {
        return Err(invalid("slowmo", "expected start_ms:end_ms:divisor"));
    };
    let start_ms: i64 = parse_number("slowmo", start)?;
    let end_ms: i64 = parse_number("slowmo", end)?;
    let speed_divisor: u32 = parse_number("slowmo", divisor)?;
    if end_ms <= start_ms || speed_divisor == 0 {
        return Err(invalid("slowmo", format!("empty segment '{value}'")));
    }
    Ok(SlowMotionSegment {
        start_us: start_ms * 1_000,
        end_us: end_ms * 1_000,
        speed_divisor,
    })
}

impl SyntheticSource {
    /// One second of 640x480 30 fps video with 44.1 kHz stereo audio.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            duration_us: 1_000_000,
            video: Some(SyntheticVideo {
                mime: mime::VIDEO_H264.to_string(),
                width: 640,
                height: 480,
                frame_rate: 30.0,
                gop: 30,
                color: ColorInfo::SDR_BT709_LIMITED,
                slow_motion: Vec::new(),
            }),
            audio: Some(SyntheticAudio {
                mime: mime::AUDIO_AAC.to_string(),
                sample_rate: 44_100,
                channel_count: 2,
            }),
            seed: name_seed(name),
        }
    }

    pub fn duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_us = duration_ms * 1_000;
        self
    }

    pub fn fps(mut self, frame_rate: f32) -> Self {
        if let Some(video) = &mut self.video {
            video.frame_rate = frame_rate;
        }
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        if let Some(video) = &mut self.video {
            video.width = width;
            video.height = height;
        }
        self
    }

    pub fn gop(mut self, gop: u32) -> Self {
        if let Some(video) = &mut self.video {
            video.gop = gop.max(1);
        }
        self
    }

    pub fn color(mut self, color: ColorInfo) -> Self {
        if let Some(video) = &mut self.video {
            video.color = color;
        }
        self
    }

    pub fn video_mime(mut self, mime: &str) -> Self {
        if let Some(video) = &mut self.video {
            video.mime = mime.to_string();
        }
        self
    }

    pub fn slow_motion(mut self, start_ms: i64, end_ms: i64, speed_divisor: u32) -> Self {
        if let Some(video) = &mut self.video {
            video.slow_motion.push(SlowMotionSegment {
                start_us: start_ms * 1_000,
                end_us: end_ms * 1_000,
                speed_divisor,
            });
        }
        self
    }

    pub fn audio(mut self, sample_rate: u32, channel_count: u16) -> Self {
        let mime = self
            .audio
            .take()
            .map(|a| a.mime)
            .unwrap_or_else(|| mime::AUDIO_AAC.to_string());
        self.audio = Some(SyntheticAudio {
            mime,
            sample_rate,
            channel_count,
        });
        self
    }

    pub fn without_video(mut self) -> Self {
        self.video = None;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = None;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn uri(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("duration_ms", &(self.duration_us / 1_000).to_string());
        query.append_pair("seed", &self.seed.to_string());
        match &self.video {
            Some(video) => {
                query
                    .append_pair("video_mime", &video.mime)
                    .append_pair("width", &video.width.to_string())
                    .append_pair("height", &video.height.to_string())
                    .append_pair("fps", &video.frame_rate.to_string())
                    .append_pair("gop", &video.gop.to_string());
                if video.color == ColorInfo::HDR10_PQ {
                    query.append_pair("hdr", "pq");
                } else if video.color == ColorInfo::HLG {
                    query.append_pair("hdr", "hlg");
                }
                for segment in &video.slow_motion {
                    query.append_pair(
                        "slowmo",
                        &format!(
                            "{}:{}:{}",
                            segment.start_us / 1_000,
                            segment.end_us / 1_000,
                            segment.speed_divisor
                        ),
                    );
                }
            }
            None => {
                query.append_pair("video", "0");
            }
        }
        match &self.audio {
            Some(audio) => {
                query
                    .append_pair("audio_mime", &audio.mime)
                    .append_pair("sample_rate", &audio.sample_rate.to_string())
                    .append_pair("channels", &audio.channel_count.to_string());
            }
            None => {
                query.append_pair("audio", "0");
            }
        }
        format!("{SYNTHETIC_SCHEME}{}?{}", self.name, query.finish())
    }

    /// Parses a `synthetic://` URI.
    ///
    /// # Errors
    /// - `ExtractorError::UnsupportedUri` - Not a synthetic URI
    /// - `ExtractorError::InvalidParameter` - A query parameter is malformed
    pub fn parse(uri: &str) -> Result<Self, ExtractorError> {
        let unsupported = || ExtractorError::UnsupportedUri {
            uri: uri.to_string(),
        };
        if !uri.starts_with(SYNTHETIC_SCHEME) {
            return Err(unsupported());
        }
        let url = Url::parse(uri).map_err(|_| unsupported())?;
        let name = url.host_str().filter(|h| !h.is_empty()).ok_or_else(unsupported)?;

        let mut source = SyntheticSource::new(name);
        for (key, value) in url.query_pairs() {
            let value = value.as_ref();
            match key.as_ref() {
                "duration_ms" => {
                    source.duration_us = parse_number::<i64>("duration_ms", value)? * 1_000;
                }
                "seed" => source.seed = parse_number("seed", value)?,
                "video" if !parse_flag("video", value)? => source.video = None,
                "audio" if !parse_flag("audio", value)? => source.audio = None,
                "video" | "audio" => {}
                "video_mime" => source = source.video_mime(value),
                "width" => {
                    if let Some(video) = &mut source.video {
                        video.width = parse_number("width", value)?;
                    }
                }
                "height" => {
                    if let Some(video) = &mut source.video {
                        video.height = parse_number("height", value)?;
                    }
                }
                "fps" => source = source.fps(parse_number("fps", value)?),
                "gop" => source = source.gop(parse_number("gop", value)?),
                "hdr" => {
                    let color = match value {
                        "pq" => ColorInfo::HDR10_PQ,
                        "hlg" => ColorInfo::HLG,
                        "none" | "sdr" => ColorInfo::SDR_BT709_LIMITED,
                        other => return Err(invalid("hdr", format!("unknown transfer '{other}'"))),
                    };
                    source = source.color(color);
                }
                "slowmo" => {
                    let segment = parse_slow_motion(value)?;
                    if let Some(video) = &mut source.video {
                        video.slow_motion.push(segment);
                    }
                }
                "audio_mime" => {
                    if let Some(audio) = &mut source.audio {
                        audio.mime = value.to_string();
                    }
                }
                "sample_rate" => {
                    if let Some(audio) = &mut source.audio {
                        audio.sample_rate = parse_number("sample_rate", value)?;
                    }
                }
                "channels" => {
                    if let Some(audio) = &mut source.audio {
                        audio.channel_count = parse_number("channels", value)?;
                    }
                }
                other => return Err(invalid(other, "unknown parameter")),
            }
        }

        if source.duration_us <= 0 {
            return Err(invalid("duration_ms", "must be positive"));
        }
        if let Some(video) = &source.video
            && (video.frame_rate <= 0.0 || video.width == 0 || video.height == 0)
        {
            return Err(invalid("fps", "video needs a positive size and frame rate"));
        }
        if let Some(audio) = &source.audio
            && (audio.sample_rate == 0 || audio.channel_count == 0)
        {
            return Err(invalid("sample_rate", "audio needs a sample rate and channels"));
        }
        Ok(source)
    }

    /// Number of video frames in the source.
    pub fn video_frame_count(&self) -> u64 {
        self.video.as_ref().map_or(0, |video| {
            (self.duration_us as f64 * video.frame_rate as f64 / 1_000_000.0).ceil() as u64
        })
    }

    pub fn video_timestamp_us(&self, index: u64) -> i64 {
        self.video.as_ref().map_or(0, |video| {
            (index as f64 * 1_000_000.0 / video.frame_rate as f64).round() as i64
        })
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.audio
            .as_ref()
            .map(|a| AudioFormat::new(a.sample_rate, a.channel_count))
    }

    fn audio_packet_count(&self) -> u64 {
        self.audio_format().map_or(0, |format| {
            format
                .us_to_frames(self.duration_us)
                .div_ceil(AUDIO_FRAMES_PER_PACKET as u64)
        })
    }

    fn track_formats(&self) -> Vec<TrackFormat> {
        let mut formats = Vec::with_capacity(2);
        if let Some(video) = &self.video {
            let mut format =
                TrackFormat::video(&video.mime, video.width, video.height, video.frame_rate)
                    .with_color(video.color)
                    .with_bitrate(suggested_bitrate(video.width, video.height, video.frame_rate));
            format.duration_us = Some(self.duration_us);
            format.slow_motion_segments = video.slow_motion.clone();
            formats.push(format);
        }
        if let Some(audio) = &self.audio {
            let mut format = TrackFormat::audio(&audio.mime, audio.sample_rate, audio.channel_count)
                .with_bitrate(DEFAULT_AUDIO_BITRATE);
            format.duration_us = Some(self.duration_us);
            formats.push(format);
        }
        formats
    }

    fn rng(&self, track_type: TrackType, index: u64) -> ChaCha8Rng {
        let salt = match track_type {
            TrackType::Video => 0x9e37_79b9_7f4a_7c15,
            TrackType::Audio => 0xc2b2_ae3d_27d4_eb4f,
        };
        ChaCha8Rng::seed_from_u64(self.seed ^ index.wrapping_mul(salt))
    }

    fn video_sample(&self, index: u64) -> EncodedSample {
        let gop = self.video.as_ref().map_or(1, |v| v.gop.max(1)) as u64;
        let flags = if index % gop == 0 {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        let mut thumbnail = vec![0u8; THUMBNAIL_BYTES];
        self.rng(TrackType::Video, index).fill_bytes(&mut thumbnail);
        EncodedSample::new(
            TrackType::Video,
            self.video_timestamp_us(index),
            flags,
            Bytes::from(thumbnail),
        )
    }

    fn audio_sample(&self, format: AudioFormat, index: u64) -> EncodedSample {
        let total_frames = format.us_to_frames(self.duration_us);
        let first_frame = index * AUDIO_FRAMES_PER_PACKET as u64;
        let frames = (total_frames - first_frame).min(AUDIO_FRAMES_PER_PACKET as u64);
        let mut tone = [0u8; 2];
        self.rng(TrackType::Audio, index).fill_bytes(&mut tone);

        let mut data = BytesMut::with_capacity(4);
        data.put_u16_le(frames as u16);
        data.put_slice(&tone);
        EncodedSample::new(
            TrackType::Audio,
            format.frames_to_us(first_frame),
            SampleFlags::KEY_FRAME,
            data.freeze(),
        )
    }
}

/// Extractor over a [`SyntheticSource`].
#[derive(Debug)]
pub struct SyntheticExtractor {
    source: SyntheticSource,
    formats: Vec<TrackFormat>,
    next_video: u64,
    next_audio: u64,
}

impl SyntheticExtractor {
    /// # Errors
    /// - `ExtractorError::UnsupportedUri` / `InvalidParameter` - See
    ///   [`SyntheticSource::parse`]
    pub fn open(uri: &str) -> Result<Self, ExtractorError> {
        Ok(Self::new(SyntheticSource::parse(uri)?))
    }

    pub fn new(source: SyntheticSource) -> Self {
        Self {
            formats: source.track_formats(),
            source,
            next_video: 0,
            next_audio: 0,
        }
    }

    pub fn source(&self) -> &SyntheticSource {
        &self.source
    }
}

impl Extractor for SyntheticExtractor {
    fn track_formats(&self) -> &[TrackFormat] {
        &self.formats
    }

    fn duration_us(&self) -> i64 {
        self.source.duration_us
    }

    fn seek_to(&mut self, timestamp_us: i64) -> Result<i64, ExtractorError> {
        let target = timestamp_us.clamp(0, self.source.duration_us);
        let mut sync_us = None;

        if let Some(video) = &self.source.video {
            let last = self.source.video_frame_count().saturating_sub(1);
            let mut index = ((target as f64 * video.frame_rate as f64 / 1_000_000.0).floor()
                as u64)
                .min(last);
            while index > 0 && self.source.video_timestamp_us(index) > target {
                index -= 1;
            }
            let key = index - index % video.gop.max(1) as u64;
            self.next_video = key;
            sync_us = Some(self.source.video_timestamp_us(key));
        }
        if let Some(format) = self.source.audio_format() {
            let packet = format.us_to_frames(target) / AUDIO_FRAMES_PER_PACKET as u64;
            self.next_audio = packet.min(self.source.audio_packet_count().saturating_sub(1));
            let packet_us = format.frames_to_us(self.next_audio * AUDIO_FRAMES_PER_PACKET as u64);
            sync_us.get_or_insert(packet_us);
        }
        Ok(sync_us.unwrap_or(0))
    }

    fn read_sample(&mut self, track_type: TrackType) -> Result<Option<EncodedSample>, ExtractorError> {
        match track_type {
            TrackType::Video => {
                if self.source.video.is_none() || self.next_video >= self.source.video_frame_count() {
                    return Ok(None);
                }
                let sample = self.source.video_sample(self.next_video);
                self.next_video += 1;
                Ok(Some(sample))
            }
            TrackType::Audio => {
                let Some(format) = self.source.audio_format() else {
                    return Ok(None);
                };
                if self.next_audio >= self.source.audio_packet_count() {
                    return Ok(None);
                }
                let sample = self.source.audio_sample(format, self.next_audio);
                self.next_audio += 1;
                Ok(Some(sample))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_round_trips_through_parse() {
        let source = SyntheticSource::new("beach")
            .duration_ms(2_500)
            .fps(24.0)
            .size(1280, 720)
            .color(ColorInfo::HDR10_PQ)
            .slow_motion(500, 1_000, 4)
            .audio(48_000, 1);
        assert_eq!(SyntheticSource::parse(&source.uri()).unwrap(), source);
    }

    #[test]
    fn test_unknown_parameter_is_rejected() {
        let result = SyntheticSource::parse("synthetic://clip?bogus=1");
        assert!(matches!(result, Err(ExtractorError::InvalidParameter { .. })));
    }

    #[test]
    fn test_five_seconds_at_thirty_fps_has_150_frames() {
        let uri = SyntheticSource::new("clip").duration_ms(5_000).uri();
        let mut extractor = SyntheticExtractor::open(&uri).unwrap();
        let mut count = 0;
        let mut last = -1;
        while let Some(sample) = extractor.read_sample(TrackType::Video).unwrap() {
            assert!(sample.timestamp_us > last);
            last = sample.timestamp_us;
            count += 1;
        }
        assert_eq!(count, 150);
    }

    #[test]
    fn test_seek_lands_on_previous_key_frame() {
        let uri = SyntheticSource::new("clip").duration_ms(3_000).gop(30).uri();
        let mut extractor = SyntheticExtractor::open(&uri).unwrap();
        assert_eq!(extractor.seek_to(1_500_000).unwrap(), 1_000_000);
        let sample = extractor.read_sample(TrackType::Video).unwrap().unwrap();
        assert!(sample.is_key_frame());
        assert_eq!(sample.timestamp_us, 1_000_000);
        assert_eq!(extractor.seek_to(2_000_000).unwrap(), 2_000_000);
    }

    #[test]
    fn test_payloads_are_deterministic() {
        let uri = SyntheticSource::new("clip").uri();
        let mut a = SyntheticExtractor::open(&uri).unwrap();
        let mut b = SyntheticExtractor::open(&uri).unwrap();
        for _ in 0..5 {
            assert_eq!(
                a.read_sample(TrackType::Video).unwrap(),
                b.read_sample(TrackType::Video).unwrap()
            );
        }
    }

    #[test]
    fn test_audio_packets_cover_duration() {
        let uri = SyntheticSource::new("tone").without_video().audio(48_000, 2).uri();
        let mut extractor = SyntheticExtractor::open(&uri).unwrap();
        let mut frames = 0u64;
        while let Some(sample) = extractor.read_sample(TrackType::Audio).unwrap() {
            frames += u16::from_le_bytes([sample.data[0], sample.data[1]]) as u64;
        }
        assert_eq!(frames, 48_000);
    }
}
