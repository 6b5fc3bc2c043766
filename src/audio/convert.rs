// convert.rs - Format conversion plans

//! One-shot format/channel/rate conversion.
//!
//! [`AudioCvt::build`] computes a conversion plan for a (source, destination)
//! pair. The plan is a fixed-order list of stages:
//!
//! - `Decode`   - source samples to normalized `f32`
//! - `Remix`    - channel up/down-mix
//! - `Resample` - rate conversion (linear interpolation)
//! - `Encode`   - `f32` to destination samples
//!
//! A change of byte order alone uses a single `ByteSwap` stage.

use super::error::{AudioError, Result};
use super::format::AudioFormat;
use super::resample::LinearResampler;
use super::spec::{AudioSpec, MAX_CHANNELS};

/// One step of a conversion plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ByteSwap { width: usize },
    Decode(AudioFormat),
    Remix { from: u8, to: u8 },
    Resample { from: u32, to: u32 },
    Encode(AudioFormat),
}

/// Conversion plan
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCvt {
    needed: bool,
    src_format: AudioFormat,
    src_channels: u8,
    src_rate: u32,
    dst_format: AudioFormat,
    dst_channels: u8,
    dst_rate: u32,
    len_mult: usize,
    len_ratio: f64,
    stages: Vec<Stage>,
}

impl AudioCvt {
    /// Build a plan converting between two sample layouts
    pub fn build(
        src_format: AudioFormat,
        src_channels: u8,
        src_rate: u32,
        dst_format: AudioFormat,
        dst_channels: u8,
        dst_rate: u32,
    ) -> Result<AudioCvt> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(AudioError::InvalidSpec("sample rate must be positive".into()));
        }
        for channels in [src_channels, dst_channels] {
            if channels == 0 || channels > MAX_CHANNELS {
                return Err(AudioError::InvalidSpec(format!(
                    "channel count {} out of range 1..={}",
                    channels, MAX_CHANNELS
                )));
            }
        }

        let mut cvt = AudioCvt {
            needed: false,
            src_format,
            src_channels,
            src_rate,
            dst_format,
            dst_channels,
            dst_rate,
            len_mult: 1,
            len_ratio: 1.0,
            stages: Vec::new(),
        };

        let same_layout = src_channels == dst_channels && src_rate == dst_rate;
        if same_layout && src_format == dst_format {
            return Ok(cvt);
        }

        if src_channels != dst_channels
            && !(can_remix(src_channels) && can_remix(dst_channels))
        {
            return Err(AudioError::UnsupportedConversion(format!(
                "cannot remix {} channels to {}",
                src_channels, dst_channels
            )));
        }

        if same_layout && src_format.is_byte_swap_of(dst_format) {
            cvt.stages.push(Stage::ByteSwap {
                width: src_format.bytes_per_sample(),
            });
        } else {
            cvt.stages.push(Stage::Decode(src_format));
            if src_channels != dst_channels {
                cvt.stages.push(Stage::Remix {
                    from: src_channels,
                    to: dst_channels,
                });
            }
            if src_rate != dst_rate {
                cvt.stages.push(Stage::Resample {
                    from: src_rate,
                    to: dst_rate,
                });
            }
            cvt.stages.push(Stage::Encode(dst_format));
        }

        let src_frame = src_channels as usize * src_format.bytes_per_sample();
        let dst_frame = dst_channels as usize * dst_format.bytes_per_sample();
        let rate_mult = (dst_rate as usize).div_ceil(src_rate as usize).max(1);
        let frame_mult = dst_frame.div_ceil(src_frame).max(1);

        cvt.needed = true;
        cvt.len_mult = rate_mult * frame_mult;
        cvt.len_ratio = (dst_rate as f64 * dst_frame as f64) / (src_rate as f64 * src_frame as f64);

        log::trace!(
            "conversion plan {}/{}ch/{}Hz -> {}/{}ch/{}Hz: {:?}",
            src_format,
            src_channels,
            src_rate,
            dst_format,
            dst_channels,
            dst_rate,
            cvt.stages
        );

        Ok(cvt)
    }

    /// Build a plan between two specs (buffer sizes are ignored)
    pub fn from_specs(src: &AudioSpec, dst: &AudioSpec) -> Result<AudioCvt> {
        Self::build(
            src.format,
            src.channels,
            src.freq,
            dst.format,
            dst.channels,
            dst.freq,
        )
    }

    /// False when source and destination are identical
    pub fn needed(&self) -> bool {
        self.needed
    }

    /// Worst-case output/input byte ratio
    pub fn len_mult(&self) -> usize {
        self.len_mult
    }

    /// Actual output/input byte ratio
    pub fn len_ratio(&self) -> f64 {
        self.len_ratio
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn src_format(&self) -> AudioFormat {
        self.src_format
    }

    pub fn src_channels(&self) -> u8 {
        self.src_channels
    }

    pub fn src_rate(&self) -> u32 {
        self.src_rate
    }

    pub fn dst_format(&self) -> AudioFormat {
        self.dst_format
    }

    pub fn dst_channels(&self) -> u8 {
        self.dst_channels
    }

    pub fn dst_rate(&self) -> u32 {
        self.dst_rate
    }

    /// Bytes per source frame
    pub fn src_frame_size(&self) -> usize {
        self.src_channels as usize * self.src_format.bytes_per_sample()
    }

    /// Bytes per destination frame
    pub fn dst_frame_size(&self) -> usize {
        self.dst_channels as usize * self.dst_format.bytes_per_sample()
    }

    /// Convert a whole buffer of source frames
    pub fn convert(&self, input: &[u8]) -> Result<Vec<u8>> {
        let frame = self.src_frame_size();
        if input.len() % frame != 0 {
            return Err(AudioError::InvalidLength {
                len: input.len(),
                frame,
            });
        }
        if !self.needed {
            return Ok(input.to_vec());
        }

        let mut out = Vec::with_capacity(input.len() * self.len_mult);
        let mut pipeline = Pipeline::new(self);
        pipeline.process(input, &mut out);
        pipeline.flush(&mut out);
        Ok(out)
    }
}

/// Channel counts the remixer knows a speaker layout for
fn can_remix(channels: u8) -> bool {
    matches!(channels, 1 | 2 | 4 | 6 | 8)
}

/// Fold one frame down to stereo
///
/// Layouts: 4 = FL FR BL BR, 6 = FL FR FC LFE BL BR,
/// 8 = FL FR FC LFE BL BR SL SR. LFE is dropped.
fn to_stereo(frame: &[f32]) -> [f32; 2] {
    match frame.len() {
        1 => [frame[0], frame[0]],
        2 => [frame[0], frame[1]],
        4 => [(frame[0] + frame[2]) * 0.5, (frame[1] + frame[3]) * 0.5],
        6 => {
            let center = frame[2] * 0.5;
            [
                (frame[0] + center + frame[4]) / 2.5,
                (frame[1] + center + frame[5]) / 2.5,
            ]
        }
        _ => {
            let center = frame[2] * 0.5;
            [
                (frame[0] + center + frame[4] + frame[6]) / 3.5,
                (frame[1] + center + frame[5] + frame[7]) / 3.5,
            ]
        }
    }
}

/// Spread a stereo frame to `channels`
fn from_stereo(left: f32, right: f32, channels: u8, out: &mut Vec<f32>) {
    let mid = (left + right) * 0.5;
    match channels {
        1 => out.push(mid),
        2 => out.extend_from_slice(&[left, right]),
        4 => out.extend_from_slice(&[left, right, left, right]),
        6 => out.extend_from_slice(&[left, right, mid, 0.0, left, right]),
        _ => out.extend_from_slice(&[left, right, mid, 0.0, left, right, left, right]),
    }
}

pub(crate) fn remix(from: u8, to: u8, input: &[f32], out: &mut Vec<f32>) {
    out.reserve(input.len() / from as usize * to as usize);
    for frame in input.chunks_exact(from as usize) {
        let [left, right] = to_stereo(frame);
        from_stereo(left, right, to, out);
    }
}

pub(crate) fn decode(format: AudioFormat, input: &[u8], out: &mut Vec<f32>) {
    let width = format.bytes_per_sample();
    out.reserve(input.len() / width);
    for sample in input.chunks_exact(width) {
        out.push(format.read_sample(sample));
    }
}

pub(crate) fn encode(format: AudioFormat, input: &[f32], out: &mut Vec<u8>) {
    let width = format.bytes_per_sample();
    let start = out.len();
    out.resize(start + input.len() * width, 0);
    for (sample, dst) in input.iter().zip(out[start..].chunks_exact_mut(width)) {
        format.write_sample(*sample, dst);
    }
}

/// Runs a plan over successive whole-frame blocks, carrying resampler state
#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    cvt: AudioCvt,
    swap_width: Option<usize>,
    resampler: Option<LinearResampler>,
    work: Vec<f32>,
    scratch: Vec<f32>,
}

impl Pipeline {
    pub(crate) fn new(cvt: &AudioCvt) -> Self {
        let mut swap_width = None;
        let mut resampler = None;
        for stage in cvt.stages() {
            match *stage {
                Stage::ByteSwap { width } => swap_width = Some(width),
                Stage::Resample { from, to } => {
                    resampler = Some(LinearResampler::new(cvt.dst_channels as usize, from, to))
                }
                _ => {}
            }
        }
        Pipeline {
            cvt: cvt.clone(),
            swap_width,
            resampler,
            work: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub(crate) fn cvt(&self) -> &AudioCvt {
        &self.cvt
    }

    /// Convert whole source frames, appending to `out`
    pub(crate) fn process(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if !self.cvt.needed {
            out.extend_from_slice(input);
            return;
        }
        if let Some(width) = self.swap_width {
            out.reserve(input.len());
            for sample in input.chunks_exact(width) {
                out.extend(sample.iter().rev());
            }
            return;
        }

        let mut samples = std::mem::take(&mut self.work);
        samples.clear();
        decode(self.cvt.src_format, input, &mut samples);

        if self.cvt.src_channels != self.cvt.dst_channels {
            let mut mixed = std::mem::take(&mut self.scratch);
            mixed.clear();
            remix(self.cvt.src_channels, self.cvt.dst_channels, &samples, &mut mixed);
            std::mem::swap(&mut samples, &mut mixed);
            self.scratch = mixed;
        }

        if let Some(resampler) = self.resampler.as_mut() {
            let mut resampled = std::mem::take(&mut self.scratch);
            resampled.clear();
            resampler.process(&samples, &mut resampled);
            std::mem::swap(&mut samples, &mut resampled);
            self.scratch = resampled;
        }

        encode(self.cvt.dst_format, &samples, out);
        self.work = samples;
    }

    /// Emit whatever the resampler is still holding back
    pub(crate) fn flush(&mut self, out: &mut Vec<u8>) {
        if let Some(resampler) = self.resampler.as_mut() {
            let mut tail = Vec::new();
            resampler.flush(&mut tail);
            encode(self.cvt.dst_format, &tail, out);
        }
    }

    pub(crate) fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn s16le(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn read_s16le(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn test_noop_plan() {
        let cvt = AudioCvt::build(
            AudioFormat::S16LSB, 2, 44100,
            AudioFormat::S16LSB, 2, 44100,
        )
        .unwrap();
        assert!(!cvt.needed());
        assert_eq!(cvt.len_mult(), 1);
        assert_eq!(cvt.len_ratio(), 1.0);
        assert!(cvt.stages().is_empty());

        let input = s16le(&[1, -2, 3, -4]);
        assert_eq!(cvt.convert(&input).unwrap(), input);
    }

    #[test]
    fn test_rate_change_plan() {
        let cvt = AudioCvt::build(
            AudioFormat::S16LSB, 2, 44100,
            AudioFormat::S16LSB, 2, 48000,
        )
        .unwrap();
        assert!(cvt.needed());
        assert!(cvt.len_mult() as f64 >= 48000.0 / 44100.0);
        assert!((cvt.len_ratio() - 48000.0 / 44100.0).abs() < 1e-12);
        assert_eq!(
            cvt.stages(),
            &[
                Stage::Decode(AudioFormat::S16LSB),
                Stage::Resample { from: 44100, to: 48000 },
                Stage::Encode(AudioFormat::S16LSB),
            ]
        );
    }

    #[test]
    fn test_widen_u8_to_s16() {
        let cvt = AudioCvt::build(AudioFormat::U8, 1, 8000, AudioFormat::S16LSB, 1, 8000).unwrap();
        let out = cvt.convert(&[0x80, 0xFF, 0x00, 0x81]).unwrap();
        assert_eq!(read_s16le(&out), vec![0, 127 * 256, -32768, 256]);
        assert_eq!(cvt.len_mult(), 2);
    }

    #[test]
    fn test_widen_then_narrow_is_exact() {
        let original: Vec<u8> = (0..=255).collect();
        let up = AudioCvt::build(AudioFormat::U8, 1, 8000, AudioFormat::S16MSB, 1, 8000).unwrap();
        let down = AudioCvt::build(AudioFormat::S16MSB, 1, 8000, AudioFormat::U8, 1, 8000).unwrap();
        let wide = up.convert(&original).unwrap();
        assert_eq!(down.convert(&wide).unwrap(), original);
    }

    #[test]
    fn test_narrow_quantization() {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 1, 8000, AudioFormat::S8, 1, 8000).unwrap();
        let out = cvt.convert(&s16le(&[0, 127, 128, 383, i16::MAX, i16::MIN])).unwrap();
        let out: Vec<i8> = out.iter().map(|&b| b as i8).collect();
        assert_eq!(out, vec![0, 0, 1, 1, 127, -128]);
    }

    #[test]
    fn test_byte_swap_plan() {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 2, 8000, AudioFormat::S16MSB, 2, 8000).unwrap();
        assert_eq!(cvt.stages(), &[Stage::ByteSwap { width: 2 }]);
        assert_eq!(cvt.convert(&[1, 2, 3, 4]).unwrap(), vec![2, 1, 4, 3]);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 1, 8000, AudioFormat::S16LSB, 2, 8000).unwrap();
        let out = cvt.convert(&s16le(&[100, -200])).unwrap();
        assert_eq!(read_s16le(&out), vec![100, 100, -200, -200]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 2, 8000, AudioFormat::S16LSB, 1, 8000).unwrap();
        let out = cvt.convert(&s16le(&[100, 300, -50, 50])).unwrap();
        assert_eq!(read_s16le(&out), vec![200, 0]);
    }

    #[test]
    fn test_surround_downmix_preserves_uniform_level() {
        let cvt = AudioCvt::build(AudioFormat::F32LSB, 6, 8000, AudioFormat::F32LSB, 2, 8000).unwrap();
        let frame: Vec<u8> = [0.5f32; 6].iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = cvt.convert(&frame).unwrap();
        let left = f32::from_le_bytes([out[0], out[1], out[2], out[3]]);
        assert!((left - 0.5).abs() < 1e-6);
    }

    #[rstest]
    #[case(3, 2)]
    #[case(2, 5)]
    #[case(7, 1)]
    fn test_unsupported_remix(#[case] from: u8, #[case] to: u8) {
        let result = AudioCvt::build(AudioFormat::S16LSB, from, 8000, AudioFormat::S16LSB, to, 8000);
        assert!(matches!(result, Err(AudioError::UnsupportedConversion(_))));
    }

    #[test]
    fn test_odd_layout_passthrough_is_allowed() {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 3, 8000, AudioFormat::F32LSB, 3, 16000);
        assert!(cvt.is_ok());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(AudioCvt::build(AudioFormat::U8, 0, 8000, AudioFormat::U8, 1, 8000).is_err());
        assert!(AudioCvt::build(AudioFormat::U8, 1, 0, AudioFormat::U8, 1, 8000).is_err());
        assert!(AudioCvt::build(AudioFormat::U8, 1, 8000, AudioFormat::U8, 9, 8000).is_err());
    }

    #[test]
    fn test_partial_frame_rejected() {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 2, 8000, AudioFormat::U8, 2, 8000).unwrap();
        assert_eq!(
            cvt.convert(&[0, 0, 0]),
            Err(AudioError::InvalidLength { len: 3, frame: 4 })
        );
    }

    #[rstest]
    #[case(AudioFormat::U8, 1, 11025, AudioFormat::F32LSB, 8, 48000)]
    #[case(AudioFormat::S16LSB, 2, 44100, AudioFormat::S16LSB, 2, 48000)]
    #[case(AudioFormat::F32MSB, 6, 96000, AudioFormat::S8, 1, 8000)]
    #[case(AudioFormat::S32LSB, 4, 22050, AudioFormat::U16MSB, 2, 44100)]
    fn test_len_mult_bounds_output(
        #[case] sf: AudioFormat,
        #[case] sc: u8,
        #[case] sr: u32,
        #[case] df: AudioFormat,
        #[case] dc: u8,
        #[case] dr: u32,
    ) {
        let cvt = AudioCvt::build(sf, sc, sr, df, dc, dr).unwrap();
        for frames in [1usize, 2, 3, 100, 1023] {
            let input = vec![0u8; frames * cvt.src_frame_size()];
            let out = cvt.convert(&input).unwrap();
            assert!(out.len() <= input.len() * cvt.len_mult());
            assert_eq!(out.len() % cvt.dst_frame_size(), 0);
        }
    }
}
