// spec.rs - Audio specifications and negotiation flags

//! Desired and obtained audio specifications.
//!
//! A caller describes what it wants with a [`DesiredSpec`]; opening a device
//! returns the [`AudioSpec`] the device was actually opened with.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::error::{AudioError, Result};
use super::format::AudioFormat;

/// Maximum channel count accepted anywhere in the crate
pub const MAX_CHANNELS: u8 = 8;

/// Largest buffer, in frames, a spec may ask for
pub const MAX_SAMPLES: u16 = 32768;

/// Fill/drain callback invoked on the device thread.
///
/// Playback callbacks must fill the whole slice; capture callbacks receive
/// freshly captured bytes.
pub type AudioCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// Audio specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    /// Frames per second
    pub freq: u32,
    /// Sample format
    pub format: AudioFormat,
    /// Interleaved channels
    pub channels: u8,
    /// Frames per device buffer
    pub samples: u16,
    /// Silence byte for the format
    pub silence: u8,
    /// Bytes per device buffer
    pub size: u32,
}

impl AudioSpec {
    /// Build a spec, deriving `silence` and `size`
    pub fn new(freq: u32, format: AudioFormat, channels: u8, samples: u16) -> Self {
        let mut spec = AudioSpec {
            freq,
            format,
            channels,
            samples,
            silence: 0,
            size: 0,
        };
        spec.recalculate();
        spec
    }

    /// Recompute the derived fields after a field was changed
    pub fn recalculate(&mut self) {
        self.silence = self.format.silence_byte();
        self.size = self.samples as u32 * self.frame_size() as u32;
    }

    /// Bytes per frame
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Duration of one device buffer
    pub fn buffer_duration(&self) -> std::time::Duration {
        if self.freq == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples as f64 / self.freq as f64)
    }

    /// Reject specs no device could ever satisfy
    pub fn validate(&self) -> Result<()> {
        if self.freq == 0 {
            return Err(AudioError::InvalidSpec("frequency must be positive".into()));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(AudioError::InvalidSpec(format!(
                "channel count {} out of range 1..={}",
                self.channels, MAX_CHANNELS
            )));
        }
        if self.samples > MAX_SAMPLES {
            return Err(AudioError::InvalidSpec(format!(
                "sample count {} above {}",
                self.samples, MAX_SAMPLES
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AudioSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}, {} ch, {} samples",
            self.freq, self.format, self.channels, self.samples
        )
    }
}

/// Caller-authored specification
pub struct DesiredSpec {
    pub spec: AudioSpec,
    pub callback: Option<AudioCallback>,
}

impl DesiredSpec {
    /// Queue-driven spec (no callback)
    pub fn new(spec: AudioSpec) -> Self {
        DesiredSpec {
            spec,
            callback: None,
        }
    }

    /// Attach a fill/drain callback
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut [u8]) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for DesiredSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesiredSpec")
            .field("spec", &self.spec)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl From<AudioSpec> for DesiredSpec {
    fn from(spec: AudioSpec) -> Self {
        DesiredSpec::new(spec)
    }
}

/// Axes the negotiation may change away from the desired spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllowedChanges(u32);

impl AllowedChanges {
    pub const NONE: AllowedChanges = AllowedChanges(0);
    pub const FREQUENCY: AllowedChanges = AllowedChanges(0x1);
    pub const FORMAT: AllowedChanges = AllowedChanges(0x2);
    pub const CHANNELS: AllowedChanges = AllowedChanges(0x4);
    pub const SAMPLES: AllowedChanges = AllowedChanges(0x8);
    pub const ANY: AllowedChanges = AllowedChanges(0xF);

    pub fn from_bits(bits: u32) -> Self {
        AllowedChanges(bits & Self::ANY.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: AllowedChanges) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for AllowedChanges {
    type Output = AllowedChanges;

    fn bitor(self, rhs: AllowedChanges) -> AllowedChanges {
        AllowedChanges(self.0 | rhs.0)
    }
}

impl BitOrAssign for AllowedChanges {
    fn bitor_assign(&mut self, rhs: AllowedChanges) {
        self.0 |= rhs.0;
    }
}

/// Device run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    Stopped,
    Playing,
    Paused,
}
