// mod.rs - Channel mixer

//! Multi-channel sound mixer on top of a callback-mode playback device.
//!
//! - `types` - constants, effect signatures and [`MixerError`]
//! - `chunk` - decoded sounds and music tracks
//! - `channel` - per-channel playback state
//! - `mix` - the [`Mixer`] and its device callback
//!
//! # Example
//!
//! ```rust,ignore
//! use audiodev::audio::{AudioFormat, AudioSubsystem};
//! use audiodev::mixer::Mixer;
//!
//! let audio = AudioSubsystem::with_driver("dummy")?;
//! let mixer = Mixer::open(&audio, 48000, AudioFormat::S16SYS, 2, 1024)?;
//! let chunk = mixer.load_wav(&std::fs::read("boom.wav")?)?;
//! mixer.play_channel(None, &chunk, 0)?;
//! ```

mod channel;
pub mod chunk;
pub mod mix;
pub mod types;

pub use chunk::{Chunk, Music};
pub use mix::Mixer;
pub use types::{Effect, MixerError, PostMix, Result, MAX_PANNING, MAX_VOLUME, MIX_CHANNELS};
