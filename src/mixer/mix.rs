// mix.rs - The mixer and its audio callback

//! [`Mixer`] owns a callback-mode playback device and a set of channels.
//!
//! Mixer state sits behind one `parking_lot::Mutex` shared with the device
//! callback. Control calls lock it briefly; the callback holds it for one
//! period while it renders. Effects and the post-mix hook run inside the
//! callback and must not call back into the mixer.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::convert;
use crate::audio::{
    AllowedChanges, AudioDevice, AudioFormat, AudioSpec, AudioSubsystem, DesiredSpec,
};

use super::channel::{Channel, FadeKind};
use super::chunk::{Chunk, Music};
use super::types::{ms_to_frames, Effect, MixerError, PostMix, Result, MIX_CHANNELS};

// ============================================================================
// Mixer state
// ============================================================================

/// Everything the callback touches
pub(crate) struct MixerState {
    format: AudioFormat,
    channels: usize,
    freq: u32,
    voices: Vec<Channel>,
    music: Channel,
    postmix: Option<PostMix>,
    mix: Vec<f32>,
    block: Vec<f32>,
    encoded: Vec<u8>,
}

impl MixerState {
    pub(crate) fn new(spec: &AudioSpec, channel_count: usize) -> Self {
        MixerState {
            format: spec.format,
            channels: spec.channels as usize,
            freq: spec.freq,
            voices: (0..channel_count).map(|_| Channel::default()).collect(),
            music: Channel::default(),
            postmix: None,
            mix: Vec::new(),
            block: Vec::new(),
            encoded: Vec::new(),
        }
    }

    fn channel(&mut self, index: usize) -> Result<&mut Channel> {
        self.voices
            .get_mut(index)
            .ok_or(MixerError::InvalidChannel(index))
    }

    fn frames(&self, ms: u32) -> usize {
        ms_to_frames(ms, self.freq)
    }

    /// Fill one device buffer
    pub(crate) fn mix_into(&mut self, out: &mut [u8]) {
        let width = self.format.bytes_per_sample();
        let samples = out.len() / width;
        let frames = samples / self.channels;

        self.mix.clear();
        self.mix.resize(frames * self.channels, 0.0);
        self.block.resize(frames * self.channels, 0.0);

        for (index, channel) in self.voices.iter_mut().enumerate() {
            if !channel.is_active() {
                continue;
            }
            self.block.fill(0.0);
            let written = channel.render(&mut self.block, self.channels);
            if written == 0 && channel.is_paused() {
                continue;
            }
            channel.apply_effects(index, &mut self.block);
            if !channel.is_active() {
                log::trace!("channel {} finished", index);
                channel.clear_effects();
            }
            for (m, b) in self.mix.iter_mut().zip(&self.block) {
                *m += b;
            }
        }

        if self.music.is_active() {
            self.block.fill(0.0);
            self.music.render(&mut self.block, self.channels);
            for (m, b) in self.mix.iter_mut().zip(&self.block) {
                *m += b;
            }
        }

        if let Some(postmix) = self.postmix.as_mut() {
            postmix(&mut self.mix);
        }
        for sample in &mut self.mix {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.encoded.clear();
        convert::encode(self.format, &self.mix, &mut self.encoded);
        let n = self.encoded.len();
        out[..n].copy_from_slice(&self.encoded);
        self.format.fill_silence(&mut out[n..]);
    }
}

// ============================================================================
// Mixer
// ============================================================================

pub struct Mixer {
    device: AudioDevice,
    spec: AudioSpec,
    state: Arc<Mutex<MixerState>>,
}

impl Mixer {
    /// Open the default playback device and start mixing.
    ///
    /// Any spec change the device needs is accepted; [`spec`](Self::spec)
    /// reports what was obtained. Chunks must be loaded for that spec.
    pub fn open(
        audio: &AudioSubsystem,
        freq: u32,
        format: AudioFormat,
        channels: u8,
        chunk_samples: u16,
    ) -> Result<Mixer> {
        Self::open_device(audio, None, freq, format, channels, chunk_samples)
    }

    /// Like [`open`](Self::open) but on a named device
    pub fn open_device(
        audio: &AudioSubsystem,
        device: Option<&str>,
        freq: u32,
        format: AudioFormat,
        channels: u8,
        chunk_samples: u16,
    ) -> Result<Mixer> {
        let wanted = AudioSpec::new(freq, format, channels, chunk_samples);

        // the real spec is only known after open; the callback waits for it
        let pending: Arc<Mutex<Option<Arc<Mutex<MixerState>>>>> = Arc::new(Mutex::new(None));
        let desired = {
            let pending = Arc::clone(&pending);
            DesiredSpec::new(wanted).with_callback(move |buf| match pending.lock().as_ref() {
                Some(state) => state.lock().mix_into(buf),
                None => buf.fill(0),
            })
        };

        let (device, spec) = audio.open_device(device, false, desired, AllowedChanges::ANY)?;
        let state = Arc::new(Mutex::new(MixerState::new(&spec, MIX_CHANNELS)));
        *pending.lock() = Some(Arc::clone(&state));

        device.unpause()?;
        log::debug!("mixer opened on '{}': {}", device.name(), spec);
        Ok(Mixer {
            device,
            spec,
            state,
        })
    }

    /// The spec the device was opened with
    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    pub fn device(&self) -> &AudioDevice {
        &self.device
    }

    /// Load a WAV file image as a chunk for this mixer
    pub fn load_wav(&self, bytes: &[u8]) -> Result<Chunk> {
        Chunk::from_wav(bytes, &self.spec)
    }

    /// Load a WAV file image as music for this mixer
    pub fn load_music(&self, bytes: &[u8]) -> Result<Music> {
        Music::from_wav(bytes, &self.spec)
    }

    fn check_open(&self) -> Result<()> {
        if self.device.is_closed() {
            Err(MixerError::Closed)
        } else {
            Ok(())
        }
    }

    /// Chunks must be prepared for this mixer's rate and channel count
    fn check_layout(&self, chunk: &Chunk) -> Result<()> {
        if chunk.channels() == self.spec.channels && chunk.freq() == self.spec.freq {
            return Ok(());
        }
        Err(MixerError::LayoutMismatch {
            chunk_channels: chunk.channels(),
            chunk_freq: chunk.freq(),
            channels: self.spec.channels,
            freq: self.spec.freq,
        })
    }

    // ------------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------------

    /// Resize the channel set, halting channels that are removed.
    ///
    /// Returns the new channel count.
    pub fn allocate_channels(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        state.voices.truncate(count);
        state.voices.resize_with(count, Channel::default);
        count
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Play `chunk` on `channel`, or on the first idle channel when None.
    ///
    /// The chunk plays `loops + 1` times; -1 loops forever. Returns the
    /// channel used.
    pub fn play_channel(&self, channel: Option<usize>, chunk: &Chunk, loops: i32) -> Result<usize> {
        self.start(channel, chunk, loops, None)
    }

    /// Like [`play_channel`](Self::play_channel), fading in over `ms`
    pub fn fade_in_channel(
        &self,
        channel: Option<usize>,
        chunk: &Chunk,
        loops: i32,
        ms: u32,
    ) -> Result<usize> {
        self.start(channel, chunk, loops, Some(ms))
    }

    fn start(&self, channel: Option<usize>, chunk: &Chunk, loops: i32, fade_ms: Option<u32>) -> Result<usize> {
        self.check_open()?;
        self.check_layout(chunk)?;
        let mut state = self.state.lock();
        let index = match channel {
            Some(index) => index,
            None => state
                .voices
                .iter()
                .position(|c| !c.is_active())
                .ok_or(MixerError::NoFreeChannel)?,
        };
        let frames = fade_ms.map(|ms| state.frames(ms));
        let ch = state.channel(index)?;
        ch.play(chunk, loops);
        if let Some(frames) = frames {
            ch.start_fade(FadeKind::In, frames);
        }
        log::trace!("channel {}: playing {} frames, loops {}", index, chunk.frames(), loops);
        Ok(index)
    }

    /// Fade `channel` out over `ms`, then halt it
    pub fn fade_out_channel(&self, channel: usize, ms: u32) -> Result<()> {
        let mut state = self.state.lock();
        let frames = state.frames(ms);
        let ch = state.channel(channel)?;
        ch.start_fade(FadeKind::Out, frames);
        if !ch.is_active() {
            ch.clear_effects();
        }
        Ok(())
    }

    /// Stop `channel` and drop its effects
    pub fn halt_channel(&self, channel: usize) -> Result<()> {
        self.state.lock().channel(channel)?.finish();
        Ok(())
    }

    /// Stop every channel
    pub fn halt_all(&self) {
        for channel in &mut self.state.lock().voices {
            channel.finish();
        }
    }

    /// Halt `channel` after `ms`; None cancels a pending expiry
    pub fn expire_channel(&self, channel: usize, ms: Option<u32>) -> Result<()> {
        let mut state = self.state.lock();
        let frames = ms.map(|ms| state.frames(ms));
        state.channel(channel)?.set_expire(frames);
        Ok(())
    }

    pub fn pause(&self, channel: usize) -> Result<()> {
        self.state.lock().channel(channel)?.set_paused(true);
        Ok(())
    }

    pub fn resume(&self, channel: usize) -> Result<()> {
        self.state.lock().channel(channel)?.set_paused(false);
        Ok(())
    }

    /// Whether `channel` has a sound assigned, paused or not
    pub fn is_playing(&self, channel: usize) -> Result<bool> {
        Ok(self.state.lock().channel(channel)?.is_active())
    }

    pub fn is_paused(&self, channel: usize) -> Result<bool> {
        Ok(self.state.lock().channel(channel)?.is_paused())
    }

    /// Channels with a sound assigned
    pub fn playing_count(&self) -> usize {
        self.state.lock().voices.iter().filter(|c| c.is_active()).count()
    }

    /// Set the channel volume (0..=128) when `volume` is given.
    ///
    /// Returns the volume before the call.
    pub fn volume(&self, channel: usize, volume: Option<u8>) -> Result<u8> {
        let mut state = self.state.lock();
        let ch = state.channel(channel)?;
        Ok(match volume {
            Some(v) => ch.set_volume(v),
            None => ch.volume(),
        })
    }

    /// Per-side gain, 0..=255, for stereo and wider output
    pub fn set_panning(&self, channel: usize, left: u8, right: u8) -> Result<()> {
        self.state.lock().channel(channel)?.set_panning(left, right);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    /// Add an effect to `channel`; effects run in registration order and
    /// are dropped when the channel finishes playing
    pub fn register_effect(&self, channel: usize, effect: Effect) -> Result<()> {
        self.state.lock().channel(channel)?.add_effect(effect);
        Ok(())
    }

    pub fn unregister_all_effects(&self, channel: usize) -> Result<()> {
        self.state.lock().channel(channel)?.clear_effects();
        Ok(())
    }

    /// Install or remove the hook run over the final mix
    pub fn set_postmix(&self, postmix: Option<PostMix>) {
        self.state.lock().postmix = postmix;
    }

    // ------------------------------------------------------------------------
    // Music
    // ------------------------------------------------------------------------

    /// Start `music`, replacing the current track
    pub fn play_music(&self, music: &Music, loops: i32) -> Result<()> {
        self.check_open()?;
        self.check_layout(music.chunk())?;
        self.state.lock().music.play(music.chunk(), loops);
        Ok(())
    }

    pub fn fade_in_music(&self, music: &Music, loops: i32, ms: u32) -> Result<()> {
        self.check_open()?;
        self.check_layout(music.chunk())?;
        let mut state = self.state.lock();
        let frames = state.frames(ms);
        state.music.play(music.chunk(), loops);
        state.music.start_fade(FadeKind::In, frames);
        Ok(())
    }

    pub fn fade_out_music(&self, ms: u32) {
        let mut state = self.state.lock();
        let frames = state.frames(ms);
        state.music.start_fade(FadeKind::Out, frames);
    }

    pub fn halt_music(&self) {
        self.state.lock().music.halt();
    }

    pub fn pause_music(&self) {
        self.state.lock().music.set_paused(true);
    }

    pub fn resume_music(&self) {
        self.state.lock().music.set_paused(false);
    }

    /// Set the music volume when given; returns the previous volume
    pub fn volume_music(&self, volume: Option<u8>) -> u8 {
        let mut state = self.state.lock();
        match volume {
            Some(v) => state.music.set_volume(v),
            None => state.music.volume(),
        }
    }

    /// Whether a track is assigned, paused or not
    pub fn playing_music(&self) -> bool {
        self.state.lock().music.is_active()
    }

    pub fn paused_music(&self) -> bool {
        self.state.lock().music.is_paused()
    }

    /// Close the device; the callback has stopped when this returns
    pub fn close(&self) {
        if !self.device.is_closed() {
            log::debug!("mixer closing device {}", self.device.id());
        }
        self.device.close();
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.close();
    }
}
