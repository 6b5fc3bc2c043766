// resample.rs - Sample-rate conversion

//! Streaming linear-interpolation resampler.
//!
//! Output frame `k` is taken at input position `k * src_rate / dst_rate`,
//! computed with exact integer arithmetic so that feeding the input in
//! pieces never drifts. One input frame of history is kept between calls.

/// Linear resampler over interleaved `f32` frames
#[derive(Debug, Clone)]
pub struct LinearResampler {
    channels: usize,
    src_rate: u64,
    dst_rate: u64,
    /// Input frames consumed so far
    frames_in: u64,
    /// Output frames emitted so far
    frames_out: u64,
    /// Last input frame seen
    last: Vec<f32>,
}

impl LinearResampler {
    pub fn new(channels: usize, src_rate: u32, dst_rate: u32) -> Self {
        LinearResampler {
            channels,
            src_rate: src_rate as u64,
            dst_rate: dst_rate as u64,
            frames_in: 0,
            frames_out: 0,
            last: vec![0.0; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Upper bound on the frames one `process` + `flush` of `input_frames` can emit
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        let n = (input_frames as u64 + 1) * self.dst_rate;
        (n.div_ceil(self.src_rate) + 1) as usize
    }

    /// Input index and interpolation fraction of output frame `k`
    fn position(&self, k: u64) -> (u64, f32) {
        let num = k as u128 * self.src_rate as u128;
        let dst = self.dst_rate as u128;
        let idx = (num / dst) as u64;
        let frac = (num % dst) as f64 / dst as f64;
        (idx, frac as f32)
    }

    /// Resample `input`, appending every frame whose right neighbour is known
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let ch = self.channels;
        let n = input.len() / ch;
        if n == 0 {
            return;
        }

        let base = self.frames_in;
        let total = base + n as u64;

        let mut emitted = self.frames_out;
        loop {
            let (idx, frac) = self.position(emitted);
            if idx + 1 >= total {
                break;
            }
            let a = frame_at(&self.last, input, base, ch, idx);
            let b = frame_at(&self.last, input, base, ch, idx + 1);
            for c in 0..ch {
                out.push(a[c] + (b[c] - a[c]) * frac);
            }
            emitted += 1;
        }

        self.frames_out = emitted;
        self.last.copy_from_slice(&input[(n - 1) * ch..n * ch]);
        self.frames_in = total;
    }

    /// Emit the frames still waiting on a right neighbour, then reset
    pub fn flush(&mut self, out: &mut Vec<f32>) {
        if self.frames_in == 0 {
            return;
        }
        loop {
            let (idx, _) = self.position(self.frames_out);
            if idx >= self.frames_in {
                break;
            }
            // only the held last frame is left to interpolate against
            out.extend_from_slice(&self.last);
            self.frames_out += 1;
        }
        self.reset();
    }

    /// Drop history and phase
    pub fn reset(&mut self) {
        self.frames_in = 0;
        self.frames_out = 0;
        self.last.fill(0.0);
    }
}

/// Frame `i` of the virtual sequence `[history] ++ input`
fn frame_at<'a>(last: &'a [f32], input: &'a [f32], base: u64, ch: usize, i: u64) -> &'a [f32] {
    if i < base {
        last
    } else {
        let at = (i - base) as usize * ch;
        &input[at..at + ch]
    }
}

/// Resample a complete block in one go
pub fn resample_block(channels: usize, src_rate: u32, dst_rate: u32, input: &[f32]) -> Vec<f32> {
    let mut resampler = LinearResampler::new(channels, src_rate, dst_rate);
    let frames = input.len() / channels.max(1);
    let mut out = Vec::with_capacity(resampler.max_output_frames(frames) * channels);
    resampler.process(input, &mut out);
    resampler.flush(&mut out);
    out
}
