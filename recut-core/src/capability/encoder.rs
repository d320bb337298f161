//! Encoder selection with resolution, bitrate and MIME fallback.
//!
//! Selection narrows the device encoders in a fixed order: MIME type (trying
//! alternative MIME types in caller order), HDR editing support, closest
//! supported resolution, bitrate range, then bitrate mode. Resolution is
//! preserved in preference to bitrate: the bitrate is clamped to the chosen
//! encoder's range, never the other way round.

use crate::codec::{EncoderInfo, EncoderSpec};
use crate::error::{ErrorCode, ExportError};
use crate::media::{BitrateMode, ColorInfo, TrackFormat};

/// Scale factors tried, in order, when an encoder rejects a resolution.
const RESOLUTION_REDUCTION_FACTORS: [f64; 13] = [
    0.95,
    0.9,
    0.85,
    0.8,
    0.75,
    0.7,
    2.0 / 3.0,
    0.6,
    0.55,
    0.5,
    0.4,
    1.0 / 3.0,
    0.25,
];

const DEFAULT_AUDIO_BITRATE: u32 = 128_000;

/// Requested video encoder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderRequest {
    /// MIME types to try, most preferred first
    pub mime_candidates: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub rotation_degrees: u32,
    pub color: ColorInfo,
    pub bitrate: Option<u32>,
    pub bitrate_mode: BitrateMode,
    pub profile_level: Option<(u32, u32)>,
    pub i_frame_interval_us: i64,
}

/// Requested audio encoder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderRequest {
    pub mime_candidates: Vec<String>,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bitrate: Option<u32>,
}

/// Chosen encoder and the configuration it will be opened with.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSelection {
    pub info: EncoderInfo,
    pub spec: EncoderSpec,
}

/// Bitrate estimate for a stream without a requested or known bitrate.
pub fn suggested_bitrate(width: u32, height: u32, frame_rate: f32) -> u32 {
    (width as f64 * height as f64 * frame_rate as f64 * 0.07 * 2.0) as u32
}

fn align(value: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    ((value + alignment / 2) / alignment * alignment).max(alignment)
}

/// Closest resolution `encoder` supports for the requested size.
///
/// Aligns the request first, then walks the reduction factors, then clamps to
/// the encoder's maximum width preserving the aspect ratio.
pub fn supported_resolution(encoder: &EncoderInfo, width: u32, height: u32) -> Option<(u32, u32)> {
    let (wa, ha) = (encoder.width_alignment, encoder.height_alignment);
    let aligned = (align(width, wa), align(height, ha));
    if encoder.supports_size(aligned.0, aligned.1) {
        return Some(aligned);
    }

    for factor in RESOLUTION_REDUCTION_FACTORS {
        let candidate = (
            align((width as f64 * factor).round() as u32, wa),
            align((height as f64 * factor).round() as u32, ha),
        );
        if encoder.supports_size(candidate.0, candidate.1) {
            return Some(candidate);
        }
    }

    let clamped_width = align(width.min(encoder.width_range.1), wa);
    let clamped_height = align(
        (clamped_width as f64 * height as f64 / width.max(1) as f64).round() as u32,
        ha,
    );
    if encoder.supports_size(clamped_width, clamped_height) {
        return Some((clamped_width, clamped_height));
    }
    let clamped_height = align(height.min(encoder.height_range.1), ha);
    let clamped_width = align(
        (clamped_height as f64 * width as f64 / height.max(1) as f64).round() as u32,
        wa,
    );
    encoder
        .supports_size(clamped_width, clamped_height)
        .then_some((clamped_width, clamped_height))
}

fn bitrate_distance(encoder: &EncoderInfo, bitrate: u32) -> u32 {
    let (low, high) = encoder.bitrate_range;
    if bitrate < low {
        low - bitrate
    } else {
        bitrate.saturating_sub(high)
    }
}

fn unsupported(hdr: bool, what: String) -> ExportError {
    if hdr {
        ExportError::new(ErrorCode::HdrEncodingUnsupported, what)
    } else {
        ExportError::new(ErrorCode::EncodingFormatUnsupported, what)
    }
}

/// Selects a video encoder for `request`.
///
/// `excluded` names encoders that already failed to open. Without fallback
/// only the first MIME candidate at the exact requested size is accepted.
///
/// # Errors
/// - `ErrorCode::HdrEncodingUnsupported` - HDR requested and no encoder can
///   keep the transfer function
/// - `ErrorCode::EncodingFormatUnsupported` - No encoder supports any MIME
///   candidate (or the exact request when fallback is disabled)
pub fn select_video_encoder(
    infos: &[EncoderInfo],
    request: &VideoEncoderRequest,
    enable_fallback: bool,
    excluded: &[String],
) -> Result<EncoderSelection, ExportError> {
    let hdr = request.color.is_transfer_hdr();
    let mimes = if enable_fallback {
        &request.mime_candidates[..]
    } else {
        &request.mime_candidates[..request.mime_candidates.len().min(1)]
    };

    for mime in mimes {
        let encoders: Vec<&EncoderInfo> = infos
            .iter()
            .filter(|e| &e.mime == mime && !excluded.contains(&e.name))
            .filter(|e| !hdr || e.supports_hdr_editing(request.color.transfer))
            .collect();
        if encoders.is_empty() {
            continue;
        }

        if !enable_fallback {
            let Some(encoder) = encoders
                .into_iter()
                .find(|e| e.supports_size(request.width, request.height))
            else {
                break;
            };
            let bitrate = request
                .bitrate
                .unwrap_or_else(|| suggested_bitrate(request.width, request.height, request.frame_rate));
            return Ok(video_selection(encoder, request, (request.width, request.height), bitrate));
        }

        // Closest supported resolution, by area
        let requested_area = request.width as i64 * request.height as i64;
        let sized: Vec<(&EncoderInfo, (u32, u32))> = encoders
            .into_iter()
            .filter_map(|e| supported_resolution(e, request.width, request.height).map(|r| (e, r)))
            .collect();
        let Some(best_area_diff) = sized
            .iter()
            .map(|(_, (w, h))| (requested_area - *w as i64 * *h as i64).abs())
            .min()
        else {
            continue;
        };
        let sized: Vec<(&EncoderInfo, (u32, u32))> = sized
            .into_iter()
            .filter(|(_, (w, h))| (requested_area - *w as i64 * *h as i64).abs() == best_area_diff)
            .collect();

        let (_, resolution) = sized[0];
        let bitrate = request
            .bitrate
            .unwrap_or_else(|| suggested_bitrate(resolution.0, resolution.1, request.frame_rate));

        // Closest bitrate range
        let best_bitrate_diff = sized
            .iter()
            .map(|(e, _)| bitrate_distance(e, bitrate))
            .min()
            .unwrap_or(0);
        let by_bitrate: Vec<(&EncoderInfo, (u32, u32))> = sized
            .into_iter()
            .filter(|(e, _)| bitrate_distance(e, bitrate) == best_bitrate_diff)
            .collect();

        let (encoder, resolution) = by_bitrate
            .iter()
            .find(|(e, _)| e.bitrate_modes.contains(&request.bitrate_mode))
            .copied()
            .unwrap_or(by_bitrate[0]);

        return Ok(video_selection(encoder, request, resolution, bitrate));
    }

    Err(unsupported(
        hdr,
        format!(
            "no encoder for {:?} at {}x{}{}",
            mimes,
            request.width,
            request.height,
            if hdr { " keeping HDR" } else { "" }
        ),
    ))
}

fn video_selection(
    encoder: &EncoderInfo,
    request: &VideoEncoderRequest,
    (width, height): (u32, u32),
    bitrate: u32,
) -> EncoderSelection {
    let bitrate_mode = if encoder.bitrate_modes.contains(&request.bitrate_mode) {
        request.bitrate_mode
    } else {
        encoder
            .bitrate_modes
            .first()
            .copied()
            .unwrap_or(BitrateMode::Vbr)
    };
    let profile_level = request
        .profile_level
        .filter(|pl| encoder.profile_levels.contains(pl));

    let mut format = TrackFormat::video(&encoder.mime, width, height, request.frame_rate)
        .with_color(request.color)
        .with_bitrate(encoder.clamp_bitrate(bitrate));
    format.rotation_degrees = request.rotation_degrees;

    EncoderSelection {
        info: encoder.clone(),
        spec: EncoderSpec {
            format,
            bitrate_mode,
            profile_level,
            i_frame_interval_us: request.i_frame_interval_us,
        },
    }
}

/// Selects an audio encoder for `request`.
///
/// # Errors
/// - `ErrorCode::EncodingFormatUnsupported` - No encoder supports any MIME
///   candidate
pub fn select_audio_encoder(
    infos: &[EncoderInfo],
    request: &AudioEncoderRequest,
    enable_fallback: bool,
    excluded: &[String],
) -> Result<EncoderSelection, ExportError> {
    let mimes = if enable_fallback {
        &request.mime_candidates[..]
    } else {
        &request.mime_candidates[..request.mime_candidates.len().min(1)]
    };

    for mime in mimes {
        let encoders: Vec<&EncoderInfo> = infos
            .iter()
            .filter(|e| &e.mime == mime && !excluded.contains(&e.name))
            .collect();
        let exact = encoders.iter().find(|e| {
            e.max_sample_rate >= request.sample_rate && e.max_channels >= request.channel_count
        });
        let encoder = match exact {
            Some(encoder) => *encoder,
            None if enable_fallback && !encoders.is_empty() => encoders[0],
            None => continue,
        };

        let sample_rate = request.sample_rate.min(encoder.max_sample_rate);
        let channel_count = request.channel_count.min(encoder.max_channels);
        let bitrate = encoder.clamp_bitrate(request.bitrate.unwrap_or(DEFAULT_AUDIO_BITRATE));
        return Ok(EncoderSelection {
            info: encoder.clone(),
            spec: EncoderSpec {
                format: TrackFormat::audio(&encoder.mime, sample_rate, channel_count)
                    .with_bitrate(bitrate),
                bitrate_mode: BitrateMode::Vbr,
                profile_level: None,
                i_frame_interval_us: 0,
            },
        });
    }

    Err(unsupported(
        false,
        format!(
            "no audio encoder for {:?} at {}Hz/{}ch",
            mimes, request.sample_rate, request.channel_count
        ),
    ))
}
