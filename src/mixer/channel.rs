// channel.rs - Per-channel playback state

//! One mixing channel: the sound it plays, its volume, panning, fade and
//! expiry, and the effects registered on it.
//!
//! Channels render into a caller-provided block of interleaved samples in
//! the mixer's output layout; the mixer sums the blocks.

use std::sync::Arc;

use super::chunk::Chunk;
use super::types::{volume_gain, Effect, MAX_PANNING, MAX_VOLUME};

/// Sound currently assigned to a channel
struct Voice {
    samples: Arc<[f32]>,
    volume: u8,
    /// Next sample index
    pos: usize,
    /// Repeats left; -1 repeats forever
    loops: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FadeKind {
    In,
    Out,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    kind: FadeKind,
    total: usize,
    done: usize,
}

impl Fade {
    fn gain(&self) -> f32 {
        let t = self.done as f32 / self.total as f32;
        match self.kind {
            FadeKind::In => t,
            FadeKind::Out => 1.0 - t,
        }
    }
}

pub(crate) struct Channel {
    voice: Option<Voice>,
    paused: bool,
    volume: u8,
    left: u8,
    right: u8,
    fade: Option<Fade>,
    /// Frames until the channel halts
    expire: Option<usize>,
    effects: Vec<Effect>,
}

impl Default for Channel {
    fn default() -> Self {
        Channel {
            voice: None,
            paused: false,
            volume: MAX_VOLUME,
            left: MAX_PANNING,
            right: MAX_PANNING,
            fade: None,
            expire: None,
            effects: Vec::new(),
        }
    }
}

impl Channel {
    /// Start `chunk`, replacing whatever was playing
    pub(crate) fn play(&mut self, chunk: &Chunk, loops: i32) {
        self.voice = Some(Voice {
            samples: chunk.shared_samples(),
            volume: chunk.volume(),
            pos: 0,
            loops: loops.max(-1),
        });
        self.paused = false;
        self.fade = None;
        self.expire = None;
    }

    /// Fade the current sound over `frames`; a fade-out halts when done
    pub(crate) fn start_fade(&mut self, kind: FadeKind, frames: usize) {
        if self.voice.is_none() {
            return;
        }
        if frames == 0 {
            self.fade = None;
            if kind == FadeKind::Out {
                self.halt();
            }
            return;
        }
        self.fade = Some(Fade {
            kind,
            total: frames,
            done: 0,
        });
    }

    pub(crate) fn set_expire(&mut self, frames: Option<usize>) {
        self.expire = frames;
    }

    /// Stop playback, keeping volume, panning and effects
    pub(crate) fn halt(&mut self) {
        self.voice = None;
        self.paused = false;
        self.fade = None;
        self.expire = None;
    }

    /// Stop playback and drop the channel's effects
    pub(crate) fn finish(&mut self) {
        self.halt();
        self.effects.clear();
    }

    pub(crate) fn is_active(&self) -> bool {
        self.voice.is_some()
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.voice.is_some() && self.paused
    }

    pub(crate) fn is_fading(&self) -> Option<FadeKind> {
        self.fade.map(|f| f.kind)
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused && self.voice.is_some();
    }

    pub(crate) fn volume(&self) -> u8 {
        self.volume
    }

    pub(crate) fn set_volume(&mut self, volume: u8) -> u8 {
        std::mem::replace(&mut self.volume, volume.min(MAX_VOLUME))
    }

    pub(crate) fn set_panning(&mut self, left: u8, right: u8) {
        self.left = left;
        self.right = right;
    }

    pub(crate) fn add_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub(crate) fn clear_effects(&mut self) {
        self.effects.clear();
    }

    /// Render up to one block into `out` (zeroed by the caller).
    ///
    /// Returns the frames written; fewer than the block means the sound
    /// ended, was faded out or expired.
    pub(crate) fn render(&mut self, out: &mut [f32], channels: usize) -> usize {
        if self.paused {
            return 0;
        }

        let pan = if channels >= 2 {
            [
                f32::from(self.left) / f32::from(MAX_PANNING),
                f32::from(self.right) / f32::from(MAX_PANNING),
            ]
        } else {
            [1.0, 1.0]
        };
        let channel_gain = volume_gain(self.volume);

        let mut written = 0;
        for frame in out.chunks_exact_mut(channels) {
            if self.expire == Some(0) {
                self.halt();
                break;
            }
            let fade_gain = self.fade.map_or(1.0, |f| f.gain());

            let Some(voice) = self.voice.as_mut() else {
                break;
            };
            if voice.pos + channels > voice.samples.len() {
                if voice.loops == 0 || voice.samples.len() < channels {
                    self.halt();
                    break;
                }
                if voice.loops > 0 {
                    voice.loops -= 1;
                }
                voice.pos = 0;
            }

            let gain = volume_gain(voice.volume) * channel_gain * fade_gain;
            let src = &voice.samples[voice.pos..voice.pos + channels];
            for (c, (dst, s)) in frame.iter_mut().zip(src).enumerate() {
                *dst = s * gain * pan[c % 2];
            }
            voice.pos += channels;
            written += 1;

            self.advance();
        }
        written
    }

    /// Step expiry and fade by one frame
    fn advance(&mut self) {
        if let Some(left) = self.expire.as_mut() {
            *left = left.saturating_sub(1);
        }
        if let Some(fade) = self.fade.as_mut() {
            fade.done += 1;
            if fade.done >= fade.total {
                let kind = fade.kind;
                self.fade = None;
                if kind == FadeKind::Out {
                    self.halt();
                }
            }
        }
    }

    /// Run the channel's effects over a rendered block
    pub(crate) fn apply_effects(&mut self, index: usize, block: &mut [f32]) {
        for effect in &mut self.effects {
            effect(index, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, AudioSpec};

    fn layout(channels: u8) -> AudioSpec {
        AudioSpec::new(1000, AudioFormat::F32SYS, channels, 64)
    }

    fn ramp(frames: usize) -> Chunk {
        Chunk::from_samples((0..frames).map(|i| i as f32 / 10.0).collect(), &layout(1))
    }

    fn render(channel: &mut Channel, frames: usize, channels: usize) -> (Vec<f32>, usize) {
        let mut out = vec![0.0; frames * channels];
        let n = channel.render(&mut out, channels);
        (out, n)
    }

    #[test]
    fn test_plays_once() {
        let mut ch = Channel::default();
        ch.play(&ramp(3), 0);
        let (out, n) = render(&mut ch, 5, 1);
        assert_eq!(n, 3);
        assert_eq!(out, vec![0.0, 0.1, 0.2, 0.0, 0.0]);
        assert!(!ch.is_active());
    }

    #[test]
    fn test_loops() {
        let mut ch = Channel::default();
        ch.play(&ramp(2), 1);
        let (out, n) = render(&mut ch, 5, 1);
        assert_eq!(n, 4);
        assert_eq!(out, vec![0.0, 0.1, 0.0, 0.1, 0.0]);
        assert!(!ch.is_active());

        ch.play(&ramp(2), -1);
        let (_, n) = render(&mut ch, 100, 1);
        assert_eq!(n, 100);
        assert!(ch.is_active());
    }

    #[test]
    fn test_volume_and_panning() {
        let mut ch = Channel::default();
        let chunk = Chunk::from_samples(vec![1.0, 1.0], &layout(2));
        ch.play(&chunk, 0);
        assert_eq!(ch.set_volume(64), MAX_VOLUME);
        ch.set_panning(255, 0);
        let (out, n) = render(&mut ch, 1, 2);
        assert_eq!(n, 1);
        assert_eq!(out, vec![0.5, 0.0]);
    }

    #[test]
    fn test_pause_outputs_nothing() {
        let mut ch = Channel::default();
        ch.play(&ramp(4), 0);
        ch.set_paused(true);
        assert!(ch.is_paused());
        assert_eq!(render(&mut ch, 4, 1).1, 0);
        ch.set_paused(false);
        assert_eq!(render(&mut ch, 4, 1).1, 4);
    }

    #[test]
    fn test_fade_out_halts() {
        let mut ch = Channel::default();
        ch.play(&Chunk::from_samples(vec![1.0; 10], &layout(1)), 0);
        ch.start_fade(FadeKind::Out, 4);
        assert_eq!(ch.is_fading(), Some(FadeKind::Out));
        let (out, n) = render(&mut ch, 10, 1);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[1.0, 0.75, 0.5, 0.25]);
        assert!(!ch.is_active());
    }

    #[test]
    fn test_fade_in_completes() {
        let mut ch = Channel::default();
        ch.play(&Chunk::from_samples(vec![1.0; 10], &layout(1)), 0);
        ch.start_fade(FadeKind::In, 2);
        let (out, _) = render(&mut ch, 4, 1);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.0]);
        assert_eq!(ch.is_fading(), None);
    }

    #[test]
    fn test_expire() {
        let mut ch = Channel::default();
        ch.play(&ramp(2), -1);
        ch.set_expire(Some(3));
        let (_, n) = render(&mut ch, 10, 1);
        assert_eq!(n, 3);
        assert!(!ch.is_active());
    }

    #[test]
    fn test_finish_drops_effects() {
        let mut ch = Channel::default();
        ch.add_effect(Box::new(|_, block| block.fill(1.0)));
        ch.play(&ramp(2), 0);
        ch.halt();
        let mut block = [0.0; 2];
        ch.apply_effects(0, &mut block);
        assert_eq!(block, [1.0, 1.0]);

        ch.finish();
        let mut block = [0.0; 2];
        ch.apply_effects(0, &mut block);
        assert_eq!(block, [0.0, 0.0]);
    }
}
