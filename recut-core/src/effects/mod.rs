//! Effect definitions and their configured, stateful chains.
//!
//! Effects are closed enums of plain parameters. A chain is configured
//! against the format of the stream it will process; configuration walks the
//! effects in declaration order and feeds each effect's output format into
//! the next one, so format errors surface before any frame is processed.

pub mod audio;
pub mod video;

pub use audio::{AudioEffect, AudioEffectChain};
pub use video::{ColorConversion, VideoEffect, VideoEffectChain, VideoStreamFormat};
