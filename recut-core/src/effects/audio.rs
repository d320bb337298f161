//! Audio effects over interleaved 16-bit PCM.

use serde::{Deserialize, Serialize};

use crate::error::EffectError;
use crate::media::AudioFormat;

/// Per-buffer audio effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioEffect {
    Volume { gain: f32 },
    /// Mono/stereo conversion
    ChannelMix { output_channels: u16 },
    Resample { sample_rate: u32 },
    SpeedChange { speed: f64 },
}

impl AudioEffect {
    pub fn name(&self) -> &'static str {
        match self {
            AudioEffect::Volume { .. } => "Volume",
            AudioEffect::ChannelMix { .. } => "ChannelMix",
            AudioEffect::Resample { .. } => "Resample",
            AudioEffect::SpeedChange { .. } => "SpeedChange",
        }
    }

    pub fn speed(&self) -> Option<f64> {
        match self {
            AudioEffect::SpeedChange { speed } => Some(*speed),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), EffectError> {
        let invalid = |reason: &str| EffectError::InvalidParameter {
            effect: self.name(),
            reason: reason.to_string(),
        };
        match self {
            AudioEffect::Volume { gain } if !gain.is_finite() || *gain < 0.0 => {
                Err(invalid("gain must be non-negative"))
            }
            AudioEffect::ChannelMix { output_channels } if !(1..=2).contains(output_channels) => {
                Err(invalid("only mono and stereo outputs are supported"))
            }
            AudioEffect::Resample { sample_rate } if !(8_000..=192_000).contains(sample_rate) => {
                Err(invalid("sample rate out of range"))
            }
            AudioEffect::SpeedChange { speed } if !speed.is_finite() || *speed <= 0.0 => {
                Err(invalid("speed must be positive"))
            }
            _ => Ok(()),
        }
    }

    pub fn output_format(&self, input: &AudioFormat) -> Result<AudioFormat, EffectError> {
        self.validate()?;
        match self {
            AudioEffect::ChannelMix { output_channels } => {
                if input.channel_count != *output_channels && !(1..=2).contains(&input.channel_count)
                {
                    return Err(EffectError::IncompatibleInput {
                        effect: self.name(),
                        reason: format!("cannot mix {} channels", input.channel_count),
                    });
                }
                Ok(AudioFormat::new(input.sample_rate, *output_channels))
            }
            AudioEffect::Resample { sample_rate } => {
                Ok(AudioFormat::new(*sample_rate, input.channel_count))
            }
            AudioEffect::Volume { .. } | AudioEffect::SpeedChange { .. } => Ok(*input),
        }
    }
}

/// Linear-interpolating rate converter that carries its phase across buffers.
#[derive(Debug)]
struct RateConverter {
    /// Input frames consumed per output frame
    step: f64,
    position: f64,
    previous: Vec<i16>,
}

impl RateConverter {
    fn new(step: f64, channels: usize) -> Self {
        Self {
            step,
            position: 0.0,
            previous: vec![0; channels],
        }
    }

    fn process(&mut self, input: &[i16], channels: usize) -> Vec<i16> {
        let frames = input.len() / channels;
        let mut output = Vec::with_capacity(((frames as f64 / self.step) as usize + 1) * channels);
        // Position is relative to the current buffer; -1 addresses `previous`
        while self.position < frames as f64 - 1.0 || (frames > 0 && self.position < 0.0) {
            let index = self.position.floor();
            let fraction = self.position - index;
            for channel in 0..channels {
                let a = if index < 0.0 {
                    self.previous[channel]
                } else {
                    input[index as usize * channels + channel]
                };
                let b = input[(index + 1.0) as usize * channels + channel];
                output.push((a as f64 + (b as f64 - a as f64) * fraction).round() as i16);
            }
            self.position += self.step;
        }
        if frames > 0 {
            self.previous
                .copy_from_slice(&input[(frames - 1) * channels..frames * channels]);
            self.position -= frames as f64;
        }
        output
    }
}

#[derive(Debug)]
enum Step {
    Volume(f32),
    Mix { from: usize, to: usize },
    Rate(RateConverter),
}

/// Audio effect chain configured for one input stream.
#[derive(Debug)]
pub struct AudioEffectChain {
    steps: Vec<(Step, usize)>,
    output: AudioFormat,
}

impl AudioEffectChain {
    /// Configures `effects` against `input`, then converts to `target` when
    /// given so the chain's output matches the encoder input format.
    ///
    /// # Errors
    /// - `EffectError::IncompatibleInput` - An effect cannot accept its input
    /// - `EffectError::InvalidParameter` - An effect parameter is out of range
    pub fn configure(
        effects: &[AudioEffect],
        input: AudioFormat,
        target: Option<AudioFormat>,
    ) -> Result<Self, EffectError> {
        let mut steps = Vec::new();
        let mut format = input;

        let mut conversion = Vec::new();
        if let Some(target) = target {
            if target.channel_count != 0 {
                conversion.push(AudioEffect::ChannelMix {
                    output_channels: target.channel_count,
                });
            }
            conversion.push(AudioEffect::Resample {
                sample_rate: target.sample_rate,
            });
        }

        for effect in effects.iter().chain(conversion.iter()) {
            let identity = match effect {
                AudioEffect::ChannelMix { output_channels } => *output_channels == format.channel_count,
                AudioEffect::Resample { sample_rate } => *sample_rate == format.sample_rate,
                _ => false,
            };
            if identity {
                continue;
            }
            let next = effect.output_format(&format)?;
            let channels = format.channel_count as usize;
            let step = match effect {
                AudioEffect::Volume { gain } => Step::Volume(*gain),
                AudioEffect::ChannelMix { output_channels } => Step::Mix {
                    from: channels,
                    to: *output_channels as usize,
                },
                AudioEffect::Resample { sample_rate } => Step::Rate(RateConverter::new(
                    format.sample_rate as f64 / *sample_rate as f64,
                    channels,
                )),
                AudioEffect::SpeedChange { speed } => {
                    Step::Rate(RateConverter::new(*speed, channels))
                }
            };
            steps.push((step, channels));
            format = next;
        }

        Ok(Self {
            steps,
            output: format,
        })
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    /// Processes one buffer of interleaved samples.
    pub fn apply(&mut self, samples: &[i16]) -> Vec<i16> {
        let mut current = samples.to_vec();
        for (step, channels) in &mut self.steps {
            current = match step {
                Step::Volume(gain) => current
                    .iter()
                    .map(|s| (*s as f32 * *gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                    .collect(),
                Step::Mix { from, to } => mix_channels(&current, *from, *to),
                Step::Rate(converter) => converter.process(&current, *channels),
            };
        }
        current
    }
}

fn mix_channels(samples: &[i16], from: usize, to: usize) -> Vec<i16> {
    match (from, to) {
        (1, 2) => samples.iter().flat_map(|s| [*s, *s]).collect(),
        (2, 1) => samples
            .chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect(),
        _ => samples.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_clamps() {
        let mut chain =
            AudioEffectChain::configure(&[AudioEffect::Volume { gain: 2.0 }], AudioFormat::new(44_100, 1), None)
                .unwrap();
        assert_eq!(chain.apply(&[100, 20_000, -20_000]), vec![200, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_conversion_to_target_format() {
        let mut chain = AudioEffectChain::configure(
            &[],
            AudioFormat::new(48_000, 1),
            Some(AudioFormat::new(24_000, 2)),
        )
        .unwrap();
        assert_eq!(chain.output_format(), AudioFormat::new(24_000, 2));

        let input: Vec<i16> = (0..480).map(|i| i as i16).collect();
        let output = chain.apply(&input);
        // Half the frames, two channels each
        assert!((output.len() as i64 - 480).abs() <= 4);
        assert_eq!(output[0], output[1]);
    }

    #[test]
    fn test_speed_change_shortens_stream() {
        let mut chain = AudioEffectChain::configure(
            &[AudioEffect::SpeedChange { speed: 2.0 }],
            AudioFormat::new(44_100, 2),
            None,
        )
        .unwrap();
        let total: usize = (0..10)
            .map(|_| chain.apply(&vec![1000; 2048]).len())
            .sum();
        assert!((total as i64 - 10_240).abs() <= 4, "got {total}");
    }

    #[test]
    fn test_matching_target_adds_no_conversion() {
        let format = AudioFormat::new(4_000, 1);
        let mut chain = AudioEffectChain::configure(&[], format, Some(format)).unwrap();
        assert_eq!(chain.output_format(), format);
        assert_eq!(chain.apply(&[1, 2, 3]), vec![1, 2, 3]);

        let result = AudioEffectChain::configure(&[], format, Some(AudioFormat::new(6_000, 1)));
        assert!(matches!(result, Err(EffectError::InvalidParameter { .. })));
    }

    #[test]
    fn test_invalid_mix_is_rejected() {
        let result = AudioEffectChain::configure(
            &[AudioEffect::ChannelMix { output_channels: 2 }],
            AudioFormat::new(48_000, 6),
            None,
        );
        assert!(matches!(result, Err(EffectError::IncompatibleInput { .. })));
    }
}
