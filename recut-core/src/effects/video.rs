//! Video effects.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::EffectError;
use crate::media::{ColorInfo, VideoFrame};

/// Largest width or height any effect may produce.
pub const MAX_DIMENSION: u32 = 16_384;

/// Per-frame video effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoEffect {
    /// Scale to `height`, preserving the aspect ratio
    Presentation { height: u32 },
    ScaleAndRotate {
        scale_x: f32,
        scale_y: f32,
        rotation_degrees: f32,
    },
    /// Normalized device coordinates in `[-1, 1]`
    Crop {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
    },
    RgbAdjustment { red: f32, green: f32, blue: f32 },
    /// Solid colour blended over the frame
    Overlay { color: [u8; 3], alpha: f32 },
    FrameDrop { target_frame_rate: f32 },
    SpeedChange { speed: f64 },
}

/// Geometry, rate and colour of a video stream between effects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoStreamFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub color: ColorInfo,
}

impl VideoEffect {
    pub fn name(&self) -> &'static str {
        match self {
            VideoEffect::Presentation { .. } => "Presentation",
            VideoEffect::ScaleAndRotate { .. } => "ScaleAndRotate",
            VideoEffect::Crop { .. } => "Crop",
            VideoEffect::RgbAdjustment { .. } => "RgbAdjustment",
            VideoEffect::Overlay { .. } => "Overlay",
            VideoEffect::FrameDrop { .. } => "FrameDrop",
            VideoEffect::SpeedChange { .. } => "SpeedChange",
        }
    }

    /// Speed factor if this effect changes playback speed.
    pub fn speed(&self) -> Option<f64> {
        match self {
            VideoEffect::SpeedChange { speed } => Some(*speed),
            _ => None,
        }
    }

    /// Checks parameters that do not depend on the input format.
    pub fn validate(&self) -> Result<(), EffectError> {
        let invalid = |reason: &str| EffectError::InvalidParameter {
            effect: self.name(),
            reason: reason.to_string(),
        };
        match self {
            VideoEffect::Presentation { height } => {
                if *height == 0 || *height > MAX_DIMENSION {
                    return Err(invalid("height out of range"));
                }
            }
            VideoEffect::ScaleAndRotate {
                scale_x,
                scale_y,
                rotation_degrees,
            } => {
                if !(scale_x.is_finite() && *scale_x > 0.0 && scale_y.is_finite() && *scale_y > 0.0)
                {
                    return Err(invalid("scale factors must be positive"));
                }
                if !rotation_degrees.is_finite() {
                    return Err(invalid("rotation must be finite"));
                }
            }
            VideoEffect::Crop {
                left,
                right,
                bottom,
                top,
            } => {
                let in_range = |v: f32| (-1.0..=1.0).contains(&v);
                if !(in_range(*left) && in_range(*right) && in_range(*bottom) && in_range(*top)) {
                    return Err(invalid("crop bounds must lie in [-1, 1]"));
                }
                if left >= right || bottom >= top {
                    return Err(invalid("crop bounds are inverted"));
                }
            }
            VideoEffect::RgbAdjustment { red, green, blue } => {
                if [red, green, blue].iter().any(|v| !v.is_finite() || **v < 0.0) {
                    return Err(invalid("channel factors must be non-negative"));
                }
            }
            VideoEffect::Overlay { alpha, .. } => {
                if !(0.0..=1.0).contains(alpha) {
                    return Err(invalid("alpha must lie in [0, 1]"));
                }
            }
            VideoEffect::FrameDrop { target_frame_rate } => {
                if !(target_frame_rate.is_finite() && *target_frame_rate > 0.0) {
                    return Err(invalid("target frame rate must be positive"));
                }
            }
            VideoEffect::SpeedChange { speed } => {
                if !(speed.is_finite() && *speed > 0.0) {
                    return Err(invalid("speed must be positive"));
                }
            }
        }
        Ok(())
    }

    /// Format this effect produces for `input`.
    pub fn output_format(&self, input: &VideoStreamFormat) -> Result<VideoStreamFormat, EffectError> {
        self.validate()?;
        let mut output = *input;
        match self {
            VideoEffect::Presentation { height } => {
                if input.height == 0 {
                    return Err(self.incompatible("input has no height"));
                }
                if *height != input.height {
                    let width = input.width as f64 * *height as f64 / input.height as f64;
                    output.width = round_to_even(width);
                    output.height = *height;
                }
            }
            VideoEffect::ScaleAndRotate {
                scale_x,
                scale_y,
                rotation_degrees,
            } => {
                let width = input.width as f64 * *scale_x as f64;
                let height = input.height as f64 * *scale_y as f64;
                let radians = (*rotation_degrees as f64).rem_euclid(360.0).to_radians();
                let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
                output.width = (width * cos + height * sin).round() as u32;
                output.height = (width * sin + height * cos).round() as u32;
            }
            VideoEffect::Crop {
                left,
                right,
                bottom,
                top,
            } => {
                output.width = (input.width as f32 * (right - left) / 2.0).round() as u32;
                output.height = (input.height as f32 * (top - bottom) / 2.0).round() as u32;
            }
            VideoEffect::FrameDrop { target_frame_rate } => {
                if input.frame_rate > 0.0 {
                    output.frame_rate = input.frame_rate.min(*target_frame_rate);
                } else {
                    output.frame_rate = *target_frame_rate;
                }
            }
            VideoEffect::RgbAdjustment { .. }
            | VideoEffect::Overlay { .. }
            | VideoEffect::SpeedChange { .. } => {}
        }
        if output.width == 0 || output.height == 0 {
            return Err(self.incompatible("output would be empty"));
        }
        if output.width > MAX_DIMENSION || output.height > MAX_DIMENSION {
            return Err(self.incompatible("output exceeds the maximum dimension"));
        }
        Ok(output)
    }

    fn incompatible(&self, reason: &str) -> EffectError {
        EffectError::IncompatibleInput {
            effect: self.name(),
            reason: reason.to_string(),
        }
    }
}

fn round_to_even(value: f64) -> u32 {
    let rounded = value.round() as u32;
    rounded + rounded % 2
}

/// Colour conversion applied before the user effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorConversion {
    #[default]
    None,
    /// HDR to SDR gamma 2.2 in the frame processor
    ToneMapToSdr,
    /// Relabel HDR frames as SDR without touching pixels
    InterpretAsSdr,
}

#[derive(Debug)]
enum Step {
    ToneMap,
    InterpretAsSdr,
    Geometry { width: u32, height: u32 },
    Rgb([f32; 3]),
    Overlay { color: [u8; 3], alpha: f32 },
    FrameDrop { interval_us: f64, next_us: Option<f64> },
    Speed(f64),
}

/// Effect chain configured for one input stream.
#[derive(Debug)]
pub struct VideoEffectChain {
    steps: Vec<Step>,
    output: VideoStreamFormat,
}

impl VideoEffectChain {
    /// Configures `effects` in declaration order against `input`.
    ///
    /// # Errors
    /// - `EffectError::IncompatibleInput` - An effect cannot accept the format
    ///   produced by the effect before it
    /// - `EffectError::InvalidParameter` - An effect parameter is out of range
    pub fn configure(
        effects: &[VideoEffect],
        input: VideoStreamFormat,
        conversion: ColorConversion,
    ) -> Result<Self, EffectError> {
        let mut steps = Vec::with_capacity(effects.len() + 1);
        let mut format = input;

        match conversion {
            ColorConversion::None => {}
            ColorConversion::ToneMapToSdr => {
                if !format.color.is_transfer_hdr() {
                    return Err(EffectError::IncompatibleInput {
                        effect: "ToneMap",
                        reason: "input is not HDR".to_string(),
                    });
                }
                format.color = ColorInfo::SDR_BT709_GAMMA22;
                steps.push(Step::ToneMap);
            }
            ColorConversion::InterpretAsSdr => {
                format.color = ColorInfo::SDR_BT709_LIMITED;
                steps.push(Step::InterpretAsSdr);
            }
        }

        for effect in effects {
            let next = effect.output_format(&format)?;
            let step = match effect {
                VideoEffect::Presentation { .. }
                | VideoEffect::ScaleAndRotate { .. }
                | VideoEffect::Crop { .. } => Step::Geometry {
                    width: next.width,
                    height: next.height,
                },
                VideoEffect::RgbAdjustment { red, green, blue } => Step::Rgb([*red, *green, *blue]),
                VideoEffect::Overlay { color, alpha } => Step::Overlay {
                    color: *color,
                    alpha: *alpha,
                },
                VideoEffect::FrameDrop { target_frame_rate } => Step::FrameDrop {
                    interval_us: 1_000_000.0 / *target_frame_rate as f64,
                    next_us: None,
                },
                VideoEffect::SpeedChange { speed } => Step::Speed(*speed),
            };
            steps.push(step);
            format = next;
        }

        Ok(Self {
            steps,
            output: format,
        })
    }

    pub fn output_format(&self) -> &VideoStreamFormat {
        &self.output
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs one frame through the chain; `None` when a step drops it.
    pub fn apply(&mut self, mut frame: VideoFrame) -> Option<VideoFrame> {
        for step in &mut self.steps {
            match step {
                Step::ToneMap => {
                    frame.color = ColorInfo::SDR_BT709_GAMMA22;
                    frame.pixels = map_pixels(&frame.pixels, |_, p| {
                        let p = p as u32;
                        (p * 2 * 255 / (p + 255)) as u8
                    });
                }
                Step::InterpretAsSdr => frame.color = ColorInfo::SDR_BT709_LIMITED,
                Step::Geometry { width, height } => {
                    frame.width = *width;
                    frame.height = *height;
                }
                Step::Rgb(factors) => {
                    frame.pixels = map_pixels(&frame.pixels, |channel, p| {
                        (p as f32 * factors[channel]).round().clamp(0.0, 255.0) as u8
                    });
                }
                Step::Overlay { color, alpha } => {
                    frame.pixels = map_pixels(&frame.pixels, |channel, p| {
                        let blended = p as f32 * (1.0 - *alpha) + color[channel] as f32 * *alpha;
                        blended.round().clamp(0.0, 255.0) as u8
                    });
                }
                Step::FrameDrop {
                    interval_us,
                    next_us,
                } => {
                    let timestamp = frame.timestamp_us as f64;
                    let next = next_us.get_or_insert(timestamp);
                    // 1us tolerance for integer timestamp truncation
                    if timestamp + 1.0 < *next {
                        return None;
                    }
                    while *next <= timestamp + 1.0 {
                        *next += *interval_us;
                    }
                }
                Step::Speed(speed) => {
                    frame.timestamp_us = (frame.timestamp_us as f64 / *speed).round() as i64;
                }
            }
        }
        Some(frame)
    }
}

fn map_pixels(pixels: &Bytes, f: impl Fn(usize, u8) -> u8) -> Bytes {
    pixels
        .iter()
        .enumerate()
        .map(|(i, p)| f(i % 3, *p))
        .collect::<Vec<u8>>()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ColorTransfer;

    fn hd() -> VideoStreamFormat {
        VideoStreamFormat {
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            color: ColorInfo::SDR_BT709_LIMITED,
        }
    }

    fn frame(timestamp_us: i64) -> VideoFrame {
        VideoFrame {
            timestamp_us,
            width: 1920,
            height: 1080,
            color: ColorInfo::SDR_BT709_LIMITED,
            pixels: Bytes::from_static(&[100, 150, 200, 10, 20, 30]),
        }
    }

    #[test]
    fn test_presentation_preserves_aspect_ratio() {
        let output = VideoEffect::Presentation { height: 720 }
            .output_format(&hd())
            .unwrap();
        assert_eq!((output.width, output.height), (1280, 720));
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let output = VideoEffect::ScaleAndRotate {
            scale_x: 1.0,
            scale_y: 1.0,
            rotation_degrees: 90.0,
        }
        .output_format(&hd())
        .unwrap();
        assert_eq!((output.width, output.height), (1080, 1920));
    }

    #[test]
    fn test_chain_output_equals_sequential_configuration() {
        let a = VideoEffect::Crop {
            left: -0.5,
            right: 0.5,
            bottom: -1.0,
            top: 1.0,
        };
        let b = VideoEffect::Presentation { height: 480 };

        let chained = VideoEffectChain::configure(&[a.clone(), b.clone()], hd(), ColorConversion::None)
            .unwrap();
        let step = a.output_format(&hd()).unwrap();
        let sequential = b.output_format(&step).unwrap();
        assert_eq!(*chained.output_format(), sequential);
    }

    #[test]
    fn test_crop_to_nothing_is_rejected() {
        let input = VideoStreamFormat {
            width: 2,
            height: 2,
            ..hd()
        };
        let result = VideoEffectChain::configure(
            &[VideoEffect::Crop {
                left: 0.0,
                right: 0.1,
                bottom: 0.0,
                top: 0.1,
            }],
            input,
            ColorConversion::None,
        );
        assert!(matches!(result, Err(EffectError::IncompatibleInput { .. })));
    }

    #[test]
    fn test_frame_drop_halves_rate() {
        let mut chain = VideoEffectChain::configure(
            &[VideoEffect::FrameDrop {
                target_frame_rate: 15.0,
            }],
            hd(),
            ColorConversion::None,
        )
        .unwrap();
        assert_eq!(chain.output_format().frame_rate, 15.0);

        let kept = (0..30)
            .map(|i| frame(i * 1_000_000 / 30))
            .filter_map(|f| chain.apply(f))
            .count();
        assert_eq!(kept, 15);
    }

    #[test]
    fn test_speed_change_compresses_timestamps() {
        let mut chain = VideoEffectChain::configure(
            &[VideoEffect::SpeedChange { speed: 2.0 }],
            hd(),
            ColorConversion::None,
        )
        .unwrap();
        assert_eq!(chain.apply(frame(1_000_000)).unwrap().timestamp_us, 500_000);
    }

    #[test]
    fn test_tone_map_requires_hdr_and_outputs_gamma22() {
        assert!(VideoEffectChain::configure(&[], hd(), ColorConversion::ToneMapToSdr).is_err());

        let hdr = VideoStreamFormat {
            color: ColorInfo::HDR10_PQ,
            ..hd()
        };
        let mut chain = VideoEffectChain::configure(&[], hdr, ColorConversion::ToneMapToSdr).unwrap();
        assert_eq!(chain.output_format().color.transfer, ColorTransfer::Gamma22);

        let mut input = frame(0);
        input.color = ColorInfo::HDR10_PQ;
        let output = chain.apply(input).unwrap();
        assert!(!output.color.is_transfer_hdr());
        assert_eq!(output.pixels[0], (100u32 * 2 * 255 / 355) as u8);
    }

    #[test]
    fn test_rgb_adjustment_scales_channels() {
        let mut chain = VideoEffectChain::configure(
            &[VideoEffect::RgbAdjustment {
                red: 0.0,
                green: 1.0,
                blue: 2.0,
            }],
            hd(),
            ColorConversion::None,
        )
        .unwrap();
        let output = chain.apply(frame(0)).unwrap();
        assert_eq!(&output.pixels[..], &[0, 150, 255, 0, 20, 60]);
    }
}
