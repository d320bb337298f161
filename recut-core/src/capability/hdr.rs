//! HDR mode resolution.
//!
//! Degradation order for HDR inputs: `KeepHdr`, then GPU tone-mapping, then
//! decoder tone-mapping, then failure. An explicit GPU tone-mapping request
//! may still degrade to decoder tone-mapping; an explicit decoder
//! tone-mapping request never degrades.

use crate::effects::ColorConversion;
use crate::error::{ErrorCode, ExportError};
use crate::media::{ColorInfo, HdrMode};

/// What the device can do with the HDR input at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdrCapabilities {
    /// Some encoder can keep the input transfer function
    pub encoder_can_keep_hdr: bool,
    /// The frame processor can tone-map
    pub processor_can_tone_map: bool,
    /// Some decoder for the input can tone-map
    pub decoder_can_tone_map: bool,
}

/// Effective HDR handling for a video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdrResolution {
    pub mode: HdrMode,
    pub decoder_tone_map: bool,
    pub conversion: ColorConversion,
    /// Colour the encoder is configured with
    pub output_color: ColorInfo,
}

/// Resolves the HDR mode for an input of colour `input_color`.
///
/// SDR inputs keep the requested mode untouched.
///
/// # Errors
/// - `ErrorCode::HdrEncodingUnsupported` - `KeepHdr` requested and no
///   tone-mapping path exists either
/// - `ErrorCode::DecodingFormatUnsupported` - Tone-mapping explicitly
///   requested and unavailable
pub fn resolve_hdr_mode(
    requested: HdrMode,
    input_color: ColorInfo,
    capabilities: &HdrCapabilities,
) -> Result<HdrResolution, ExportError> {
    let passthrough = HdrResolution {
        mode: requested,
        decoder_tone_map: false,
        conversion: ColorConversion::None,
        output_color: input_color,
    };
    if !input_color.is_transfer_hdr() {
        return Ok(passthrough);
    }

    let gl = HdrResolution {
        mode: HdrMode::ToneMapUsingOpenGl,
        decoder_tone_map: false,
        conversion: ColorConversion::ToneMapToSdr,
        output_color: ColorInfo::SDR_BT709_GAMMA22,
    };
    let media_codec = HdrResolution {
        mode: HdrMode::ToneMapUsingMediaCodec,
        decoder_tone_map: true,
        conversion: ColorConversion::None,
        output_color: ColorInfo::SDR_BT709_GAMMA22,
    };

    let resolution = match requested {
        HdrMode::KeepHdr if capabilities.encoder_can_keep_hdr => Some(passthrough),
        HdrMode::KeepHdr | HdrMode::ToneMapUsingOpenGl if capabilities.processor_can_tone_map => {
            Some(gl)
        }
        HdrMode::KeepHdr | HdrMode::ToneMapUsingOpenGl | HdrMode::ToneMapUsingMediaCodec
            if capabilities.decoder_can_tone_map =>
        {
            Some(media_codec)
        }
        HdrMode::ForceInterpretHdrAsSdr => Some(HdrResolution {
            mode: HdrMode::ForceInterpretHdrAsSdr,
            decoder_tone_map: false,
            conversion: ColorConversion::InterpretAsSdr,
            output_color: ColorInfo::SDR_BT709_LIMITED,
        }),
        _ => None,
    };

    if let Some(resolution) = resolution {
        if resolution.mode != requested {
            tracing::info!(
                "HDR mode {} unavailable, falling back to {}",
                requested,
                resolution.mode
            );
        }
        return Ok(resolution);
    }

    Err(match requested {
        HdrMode::KeepHdr => ExportError::new(
            ErrorCode::HdrEncodingUnsupported,
            "HDR editing and tone-mapping are both unsupported",
        ),
        _ => ExportError::new(
            ErrorCode::DecodingFormatUnsupported,
            format!("{requested} is not supported on this device"),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ColorTransfer;

    const NOTHING: HdrCapabilities = HdrCapabilities {
        encoder_can_keep_hdr: false,
        processor_can_tone_map: false,
        decoder_can_tone_map: false,
    };

    #[test]
    fn test_sdr_input_keeps_requested_mode() {
        let resolution =
            resolve_hdr_mode(HdrMode::KeepHdr, ColorInfo::SDR_BT709_LIMITED, &NOTHING).unwrap();
        assert_eq!(resolution.mode, HdrMode::KeepHdr);
        assert_eq!(resolution.conversion, ColorConversion::None);
    }

    #[test]
    fn test_keep_hdr_degrades_in_order() {
        let all = HdrCapabilities {
            encoder_can_keep_hdr: true,
            processor_can_tone_map: true,
            decoder_can_tone_map: true,
        };
        let keep = resolve_hdr_mode(HdrMode::KeepHdr, ColorInfo::HDR10_PQ, &all).unwrap();
        assert_eq!(keep.mode, HdrMode::KeepHdr);
        assert_eq!(keep.output_color, ColorInfo::HDR10_PQ);

        let no_encoder = HdrCapabilities {
            encoder_can_keep_hdr: false,
            ..all
        };
        let gl = resolve_hdr_mode(HdrMode::KeepHdr, ColorInfo::HDR10_PQ, &no_encoder).unwrap();
        assert_eq!(gl.mode, HdrMode::ToneMapUsingOpenGl);
        assert_eq!(gl.output_color.transfer, ColorTransfer::Gamma22);

        let decoder_only = HdrCapabilities {
            decoder_can_tone_map: true,
            ..NOTHING
        };
        let mc = resolve_hdr_mode(HdrMode::KeepHdr, ColorInfo::HLG, &decoder_only).unwrap();
        assert_eq!(mc.mode, HdrMode::ToneMapUsingMediaCodec);
        assert!(mc.decoder_tone_map);

        let error = resolve_hdr_mode(HdrMode::KeepHdr, ColorInfo::HLG, &NOTHING).unwrap_err();
        assert_eq!(error.code, ErrorCode::HdrEncodingUnsupported);
    }

    #[test]
    fn test_explicit_media_codec_never_degrades() {
        let gl_only = HdrCapabilities {
            processor_can_tone_map: true,
            ..NOTHING
        };
        let error =
            resolve_hdr_mode(HdrMode::ToneMapUsingMediaCodec, ColorInfo::HDR10_PQ, &gl_only)
                .unwrap_err();
        assert_eq!(error.code, ErrorCode::DecodingFormatUnsupported);
    }

    #[test]
    fn test_force_interpret_always_succeeds() {
        let resolution =
            resolve_hdr_mode(HdrMode::ForceInterpretHdrAsSdr, ColorInfo::HLG, &NOTHING).unwrap();
        assert_eq!(resolution.output_color, ColorInfo::SDR_BT709_LIMITED);
        assert_eq!(resolution.conversion, ColorConversion::InterpretAsSdr);
    }
}
