// types.rs - Mixer constants and errors

//! Constants and the error type shared by the mixer modules.

use thiserror::Error;

use crate::audio::AudioError;

/// Channels allocated when a mixer opens
pub const MIX_CHANNELS: usize = 8;

/// Full volume for chunks, channels and music
pub const MAX_VOLUME: u8 = 128;

/// Full panning gain for one side
pub const MAX_PANNING: u8 = 255;

/// Per-channel effect, called with the channel number and the channel's
/// interleaved samples for one callback period
pub type Effect = Box<dyn FnMut(usize, &mut [f32]) + Send + 'static>;

/// Final-mix hook, called with the interleaved mix before clamping
pub type PostMix = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MixerError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("channel {0} does not exist")]
    InvalidChannel(usize),

    #[error("no free channel")]
    NoFreeChannel,

    #[error("chunk is {chunk_channels} ch at {chunk_freq} Hz, mixer is {channels} ch at {freq} Hz")]
    LayoutMismatch {
        chunk_channels: u8,
        chunk_freq: u32,
        channels: u8,
        freq: u32,
    },

    #[error("mixer is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, MixerError>;

/// Volume as a linear gain
pub(crate) fn volume_gain(volume: u8) -> f32 {
    f32::from(volume.min(MAX_VOLUME)) / f32::from(MAX_VOLUME)
}

/// Milliseconds at `freq` as whole frames
pub(crate) fn ms_to_frames(ms: u32, freq: u32) -> usize {
    (u64::from(ms) * u64::from(freq) / 1000) as usize
}
