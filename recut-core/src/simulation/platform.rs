//! Simulated codec catalogue with failure injection.

use super::codec::{SimulatedDecoder, SimulatedEncoder};
use crate::codec::{CodecPlatform, Decoder, DecoderInfo, DecoderOptions, Encoder, EncoderInfo, EncoderSpec};
use crate::error::CodecError;
use crate::media::{BitrateMode, ColorTransfer, TrackFormat, mime};

const DEFAULT_SLOTS: usize = 4;

fn video_encoder(name: &str, mime: &str) -> EncoderInfo {
    EncoderInfo {
        name: name.to_string(),
        mime: mime.to_string(),
        hardware_accelerated: false,
        width_range: (16, 3840),
        height_range: (16, 2160),
        width_alignment: 2,
        height_alignment: 2,
        bitrate_range: (64_000, 40_000_000),
        bitrate_modes: vec![BitrateMode::Vbr, BitrateMode::Cbr],
        profile_levels: Vec::new(),
        hdr_editing_transfers: Vec::new(),
        max_sample_rate: 0,
        max_channels: 0,
    }
}

fn audio_encoder(name: &str, mime: &str) -> EncoderInfo {
    EncoderInfo {
        name: name.to_string(),
        mime: mime.to_string(),
        hardware_accelerated: false,
        width_range: (0, 0),
        height_range: (0, 0),
        width_alignment: 1,
        height_alignment: 1,
        bitrate_range: (8_000, 320_000),
        bitrate_modes: vec![BitrateMode::Vbr],
        profile_levels: Vec::new(),
        hdr_editing_transfers: Vec::new(),
        max_sample_rate: 48_000,
        max_channels: 2,
    }
}

fn decoder(name: &str, mime: &str, hdr_transfers: Vec<ColorTransfer>) -> DecoderInfo {
    DecoderInfo {
        name: name.to_string(),
        mime: mime.to_string(),
        hardware_accelerated: false,
        hdr_transfers,
        supports_tone_mapping: false,
    }
}

/// Deterministic stand-in for a device's codecs.
///
/// The default catalogue has H.264, H.265 and AAC software codecs, HDR
/// decoding on H.265, no HDR editing and GPU tone-mapping available.
#[derive(Debug, Clone)]
pub struct SimulatedPlatform {
    encoders: Vec<EncoderInfo>,
    decoders: Vec<DecoderInfo>,
    gpu_tone_mapping: bool,
    failing_encoders: Vec<String>,
    encoder_stall_after: Option<u64>,
    decoder_failure_after: Option<u64>,
    slots: usize,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        let hdr = vec![ColorTransfer::Pq, ColorTransfer::Hlg];
        Self {
            encoders: vec![
                video_encoder("sim.avc.encoder", mime::VIDEO_H264),
                video_encoder("sim.hevc.encoder", mime::VIDEO_H265),
                audio_encoder("sim.aac.encoder", mime::AUDIO_AAC),
            ],
            decoders: vec![
                decoder("sim.avc.decoder", mime::VIDEO_H264, Vec::new()),
                decoder("sim.hevc.decoder", mime::VIDEO_H265, hdr),
                decoder("sim.aac.decoder", mime::AUDIO_AAC, Vec::new()),
            ],
            gpu_tone_mapping: true,
            failing_encoders: Vec::new(),
            encoder_stall_after: None,
            decoder_failure_after: None,
            slots: DEFAULT_SLOTS,
        }
    }
}

impl SimulatedPlatform {
    /// Lets every video encoder keep PQ and HLG content.
    pub fn with_hdr_editing(mut self) -> Self {
        for encoder in &mut self.encoders {
            if mime::is_video(&encoder.mime) {
                encoder.hdr_editing_transfers = vec![ColorTransfer::Pq, ColorTransfer::Hlg];
            }
        }
        self
    }

    pub fn with_gpu_tone_mapping(mut self, enabled: bool) -> Self {
        self.gpu_tone_mapping = enabled;
        self
    }

    /// Lets HDR-capable video decoders tone-map to SDR.
    pub fn with_decoder_tone_mapping(mut self) -> Self {
        for decoder in &mut self.decoders {
            if !decoder.hdr_transfers.is_empty() {
                decoder.supports_tone_mapping = true;
            }
        }
        self
    }

    pub fn with_encoder(mut self, info: EncoderInfo) -> Self {
        self.encoders.retain(|e| e.name != info.name);
        self.encoders.push(info);
        self
    }

    pub fn without_encoder(mut self, name: &str) -> Self {
        self.encoders.retain(|e| e.name != name);
        self
    }

    /// Makes opening encoder `name` fail.
    pub fn with_failing_encoder(mut self, name: &str) -> Self {
        self.failing_encoders.push(name.to_string());
        self
    }

    /// Encoders stop accepting input after `frames` inputs.
    pub fn with_encoder_stall_after(mut self, frames: u64) -> Self {
        self.encoder_stall_after = Some(frames);
        self
    }

    /// Decoders fail after decoding `samples` samples.
    pub fn with_decoder_failure_after(mut self, samples: u64) -> Self {
        self.decoder_failure_after = Some(samples);
        self
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots.max(1);
        self
    }

    pub fn supports_gpu_tone_mapping(&self) -> bool {
        self.gpu_tone_mapping
    }
}

fn configuration_failed(name: &str, reason: impl Into<String>) -> CodecError {
    CodecError::ConfigurationFailed {
        name: name.to_string(),
        reason: reason.into(),
    }
}

impl CodecPlatform for SimulatedPlatform {
    fn encoder_infos(&self) -> Vec<EncoderInfo> {
        self.encoders.clone()
    }

    fn decoder_infos(&self) -> Vec<DecoderInfo> {
        self.decoders.clone()
    }

    fn open_decoder(
        &self,
        info: &DecoderInfo,
        format: &TrackFormat,
        options: DecoderOptions,
    ) -> Result<Box<Decoder>, CodecError> {
        if !self.decoders.iter().any(|d| d.name == info.name) {
            return Err(configuration_failed(&info.name, "unknown decoder"));
        }
        if info.mime != format.mime {
            return Err(configuration_failed(
                &info.name,
                format!("cannot decode {}", format.mime),
            ));
        }
        if options.tone_map_to_sdr && format.is_hdr() && !info.supports_tone_mapping {
            return Err(configuration_failed(&info.name, "tone-mapping unsupported"));
        }
        Ok(Box::new(SimulatedDecoder::new(
            &info.name,
            format,
            options.tone_map_to_sdr,
            self.slots,
            self.decoder_failure_after,
        )))
    }

    fn open_encoder(&self, info: &EncoderInfo, spec: &EncoderSpec) -> Result<Box<Encoder>, CodecError> {
        if self.failing_encoders.contains(&info.name) {
            return Err(configuration_failed(&info.name, "injected configuration failure"));
        }
        if info.mime != spec.format.mime {
            return Err(configuration_failed(
                &info.name,
                format!("cannot encode {}", spec.format.mime),
            ));
        }
        if spec.format.is_hdr() && !info.supports_hdr_editing(spec.format.color_or_default().transfer) {
            return Err(configuration_failed(&info.name, "HDR editing unsupported"));
        }
        Ok(Box::new(SimulatedEncoder::new(
            &info.name,
            &spec.format,
            spec.i_frame_interval_us,
            self.slots,
            self.encoder_stall_after,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ColorInfo;

    #[test]
    fn test_default_catalogue() {
        let platform = SimulatedPlatform::default();
        assert_eq!(platform.encoder_infos().len(), 3);
        assert!(platform.supports_gpu_tone_mapping());
        assert!(platform
            .encoder_infos()
            .iter()
            .all(|e| e.hdr_editing_transfers.is_empty()));
    }

    #[test]
    fn test_failing_encoder_refuses_to_open() {
        let platform = SimulatedPlatform::default().with_failing_encoder("sim.avc.encoder");
        let info = platform.encoder_infos()[0].clone();
        let spec = EncoderSpec {
            format: TrackFormat::video(mime::VIDEO_H264, 640, 480, 30.0),
            bitrate_mode: BitrateMode::Vbr,
            profile_level: None,
            i_frame_interval_us: 1_000_000,
        };
        assert!(matches!(
            platform.open_encoder(&info, &spec),
            Err(CodecError::ConfigurationFailed { .. })
        ));
    }

    #[test]
    fn test_catalogue_edits() {
        let mut small = video_encoder("sim.small.encoder", mime::VIDEO_H264);
        small.width_range = (16, 720);
        let platform = SimulatedPlatform::default()
            .without_encoder("sim.hevc.encoder")
            .with_encoder(small)
            .with_slots(0);

        let names: Vec<String> = platform.encoder_infos().into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec!["sim.avc.encoder", "sim.aac.encoder", "sim.small.encoder"]
        );
        assert_eq!(platform.slots, 1);
    }

    #[test]
    fn test_tone_mapping_decoder_requires_capability() {
        let format = TrackFormat::video(mime::VIDEO_H265, 640, 480, 30.0).with_color(ColorInfo::HLG);
        let options = DecoderOptions {
            tone_map_to_sdr: true,
        };
        let platform = SimulatedPlatform::default();
        let info = platform.decoder_infos()[1].clone();
        assert!(platform.open_decoder(&info, &format, options).is_err());

        let platform = platform.with_decoder_tone_mapping();
        let info = platform.decoder_infos()[1].clone();
        assert!(platform.open_decoder(&info, &format, options).is_ok());
    }
}
