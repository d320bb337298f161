//! Deterministic simulated device for development and testing.
//!
//! [`SyntheticExtractor`] produces reproducible media for `synthetic://`
//! URIs, and [`SimulatedPlatform`] provides software codecs with
//! configurable capabilities and failure injection. Same URI, same bytes:
//! payloads come from a ChaCha8 stream seeded by the source name.
//!
//! # Example
//!
//! ```rust
//! use recut_core::simulation::SyntheticSource;
//!
//! let uri = SyntheticSource::new("clip").duration_ms(5_000).fps(30.0).uri();
//! assert!(uri.starts_with("synthetic://clip?"));
//! ```

pub mod codec;
pub mod platform;
pub mod synthetic;

pub use codec::{SimulatedDecoder, SimulatedEncoder};
pub use platform::SimulatedPlatform;
pub use synthetic::{SYNTHETIC_SCHEME, SyntheticExtractor, SyntheticSource};

/// PCM frames per encoded audio packet.
pub const AUDIO_FRAMES_PER_PACKET: usize = 1024;

/// Bytes in the packed RGB thumbnail carried by simulated video samples.
pub const THUMBNAIL_BYTES: usize = 48;
