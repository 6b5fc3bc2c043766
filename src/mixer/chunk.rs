// chunk.rs - Decoded sounds ready for mixing

//! Sound effects ([`Chunk`]) and music tracks ([`Music`]).
//!
//! Both are decoded once, at load time, to interleaved `f32` at the mixer's
//! output rate and channel count, so mixing never converts.

use std::sync::Arc;

use crate::audio::convert::{self, AudioCvt};
use crate::audio::{load_wav, AudioFormat, AudioSpec};

use super::types::{Result, MAX_VOLUME};

#[derive(Debug, Clone)]
pub struct Chunk {
    samples: Arc<[f32]>,
    channels: u8,
    freq: u32,
    volume: u8,
}

impl Chunk {
    /// Decode a WAV file image for a mixer producing `target`
    pub fn from_wav(bytes: &[u8], target: &AudioSpec) -> Result<Chunk> {
        let (spec, pcm) = load_wav(bytes)?;
        Self::from_raw(&spec, &pcm, target)
    }

    /// Convert raw PCM described by `spec` for a mixer producing `target`.
    ///
    /// A trailing partial frame is ignored.
    pub fn from_raw(spec: &AudioSpec, pcm: &[u8], target: &AudioSpec) -> Result<Chunk> {
        let cvt = AudioCvt::build(
            spec.format,
            spec.channels,
            spec.freq,
            AudioFormat::F32SYS,
            target.channels,
            target.freq,
        )?;
        let whole = pcm.len() - pcm.len() % cvt.src_frame_size();
        let converted = cvt.convert(&pcm[..whole])?;

        let mut samples = Vec::new();
        convert::decode(AudioFormat::F32SYS, &converted, &mut samples);
        log::debug!(
            "chunk: {} frames from {} ({} bytes)",
            samples.len() / target.channels as usize,
            spec,
            pcm.len()
        );

        Ok(Chunk {
            samples: samples.into(),
            channels: target.channels,
            freq: target.freq,
            volume: MAX_VOLUME,
        })
    }

    /// Chunk from interleaved samples already at `target`'s rate and
    /// channel count. A trailing partial frame is dropped.
    pub fn from_samples(mut samples: Vec<f32>, target: &AudioSpec) -> Chunk {
        let channels = target.channels.max(1);
        samples.truncate(samples.len() - samples.len() % channels as usize);
        Chunk {
            samples: samples.into(),
            channels,
            freq: target.freq,
            volume: MAX_VOLUME,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Rate the samples were prepared for
    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Set the chunk volume (clamped to 128), returning the previous one.
    ///
    /// Channels already playing the chunk keep the volume they started with.
    pub fn set_volume(&mut self, volume: u8) -> u8 {
        std::mem::replace(&mut self.volume, volume.min(MAX_VOLUME))
    }

    pub(crate) fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }
}

/// A music track; only one plays at a time
#[derive(Debug, Clone)]
pub struct Music {
    chunk: Chunk,
}

impl Music {
    pub fn from_wav(bytes: &[u8], target: &AudioSpec) -> Result<Music> {
        Ok(Music {
            chunk: Chunk::from_wav(bytes, target)?,
        })
    }

    pub fn from_raw(spec: &AudioSpec, pcm: &[u8], target: &AudioSpec) -> Result<Music> {
        Ok(Music {
            chunk: Chunk::from_raw(spec, pcm, target)?,
        })
    }

    pub fn frames(&self) -> usize {
        self.chunk.frames()
    }

    pub(crate) fn chunk(&self) -> &Chunk {
        &self.chunk
    }
}

impl From<Chunk> for Music {
    fn from(chunk: Chunk) -> Self {
        Music { chunk }
    }
}
