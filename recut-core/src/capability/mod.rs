//! Capability & fallback resolution.
//!
//! Consulted at configuration time to pick decoders, encoders and the HDR
//! handling mode against what the device reports, and again when an encoder
//! fails to open. Every alteration of the caller's request ends up in a
//! single [`FallbackEvent`] produced by the [`FallbackListener`].

pub mod encoder;
pub mod fallback;
pub mod hdr;

pub use encoder::{
    AudioEncoderRequest, EncoderSelection, VideoEncoderRequest, select_audio_encoder,
    select_video_encoder, suggested_bitrate, supported_resolution,
};
pub use fallback::{FallbackEvent, FallbackListener};
pub use hdr::{HdrCapabilities, HdrResolution, resolve_hdr_mode};

use crate::codec::{DecoderInfo, DecoderOptions};
use crate::error::{ErrorCode, ExportError};
use crate::media::TrackFormat;

/// Picks the first decoder able to decode `format` with `options`.
///
/// # Errors
/// - `ErrorCode::DecodingFormatUnsupported` - No decoder for the MIME type, or
///   none able to tone-map when tone-mapping is requested
/// - `ErrorCode::HdrDecodingUnsupported` - No decoder outputs the input's HDR
///   transfer function
pub fn select_decoder(
    infos: &[DecoderInfo],
    format: &TrackFormat,
    options: DecoderOptions,
) -> Result<DecoderInfo, ExportError> {
    let candidates: Vec<&DecoderInfo> = infos.iter().filter(|d| d.mime == format.mime).collect();
    if candidates.is_empty() {
        return Err(ExportError::new(
            ErrorCode::DecodingFormatUnsupported,
            format!("no decoder for {}", format.mime),
        ));
    }

    if options.tone_map_to_sdr {
        return candidates
            .into_iter()
            .find(|d| d.supports_tone_mapping)
            .cloned()
            .ok_or_else(|| {
                ExportError::new(
                    ErrorCode::DecodingFormatUnsupported,
                    format!("no {} decoder can tone-map HDR to SDR", format.mime),
                )
            });
    }

    if let Some(color) = format.color
        && color.is_transfer_hdr()
    {
        return candidates
            .into_iter()
            .find(|d| d.hdr_transfers.contains(&color.transfer))
            .cloned()
            .ok_or_else(|| {
                ExportError::new(
                    ErrorCode::HdrDecodingUnsupported,
                    format!("no {} decoder supports {:?}", format.mime, color.transfer),
                )
            });
    }

    Ok(candidates[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ColorInfo, ColorTransfer, mime};

    fn avc_decoder(hdr: bool, tone_map: bool) -> DecoderInfo {
        DecoderInfo {
            name: "c2.test.avc.decoder".to_string(),
            mime: mime::VIDEO_H264.to_string(),
            hardware_accelerated: true,
            hdr_transfers: if hdr {
                vec![ColorTransfer::Pq, ColorTransfer::Hlg]
            } else {
                vec![]
            },
            supports_tone_mapping: tone_map,
        }
    }

    #[test]
    fn test_unknown_mime_is_unsupported() {
        let format = TrackFormat::video(mime::VIDEO_AV1, 640, 480, 30.0);
        let error = select_decoder(&[avc_decoder(true, true)], &format, DecoderOptions::default())
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::DecodingFormatUnsupported);
    }

    #[test]
    fn test_hdr_input_needs_hdr_decoder() {
        let format =
            TrackFormat::video(mime::VIDEO_H264, 640, 480, 30.0).with_color(ColorInfo::HDR10_PQ);
        let error = select_decoder(&[avc_decoder(false, false)], &format, DecoderOptions::default())
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::HdrDecodingUnsupported);

        assert!(select_decoder(&[avc_decoder(true, false)], &format, DecoderOptions::default()).is_ok());
    }

    #[test]
    fn test_tone_mapping_decoder_required() {
        let format =
            TrackFormat::video(mime::VIDEO_H264, 640, 480, 30.0).with_color(ColorInfo::HLG);
        let options = DecoderOptions {
            tone_map_to_sdr: true,
        };
        assert!(select_decoder(&[avc_decoder(true, false)], &format, options).is_err());
        assert!(select_decoder(&[avc_decoder(true, true)], &format, options).is_ok());
    }
}
