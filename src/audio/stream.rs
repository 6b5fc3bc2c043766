// stream.rs - Incremental conversion stream

//! Streaming counterpart of [`AudioCvt`].
//!
//! Input may arrive in arbitrary pieces, including partial frames. Whole
//! frames are converted as soon as they are complete and the result is
//! accumulated until drained with [`AudioStream::get`].
//!
//! Converting piecewise is not guaranteed to be byte-identical to
//! converting the concatenated input in one call.

use super::convert::{AudioCvt, Pipeline};
use super::error::Result;
use super::format::AudioFormat;
use super::queue::DataQueue;
use super::spec::AudioSpec;

/// Conversion stream bound to one plan
#[derive(Debug)]
pub struct AudioStream {
    pipeline: Pipeline,
    /// Bytes of an incomplete source frame
    staged: Vec<u8>,
    /// Scratch for one `put`
    converted: Vec<u8>,
    output: DataQueue,
}

impl AudioStream {
    pub fn new(
        src_format: AudioFormat,
        src_channels: u8,
        src_rate: u32,
        dst_format: AudioFormat,
        dst_channels: u8,
        dst_rate: u32,
    ) -> Result<AudioStream> {
        let cvt = AudioCvt::build(
            src_format,
            src_channels,
            src_rate,
            dst_format,
            dst_channels,
            dst_rate,
        )?;
        Ok(Self::with_plan(&cvt))
    }

    pub fn from_specs(src: &AudioSpec, dst: &AudioSpec) -> Result<AudioStream> {
        Ok(Self::with_plan(&AudioCvt::from_specs(src, dst)?))
    }

    /// Stream running an existing plan
    pub fn with_plan(cvt: &AudioCvt) -> AudioStream {
        AudioStream {
            pipeline: Pipeline::new(cvt),
            staged: Vec::with_capacity(cvt.src_frame_size()),
            converted: Vec::new(),
            output: DataQueue::new(),
        }
    }

    /// The plan this stream runs
    pub fn plan(&self) -> &AudioCvt {
        self.pipeline.cvt()
    }

    /// Convert `data` and append the result to the output buffer
    pub fn put(&mut self, mut data: &[u8]) -> Result<()> {
        let frame = self.plan().src_frame_size();
        self.converted.clear();

        // complete a frame left over from the previous put
        if !self.staged.is_empty() {
            let need = frame - self.staged.len();
            let take = need.min(data.len());
            self.staged.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.staged.len() < frame {
                return Ok(());
            }
            let staged = std::mem::take(&mut self.staged);
            self.pipeline.process(&staged, &mut self.converted);
            self.staged = staged;
            self.staged.clear();
        }

        let whole = data.len() - data.len() % frame;
        if whole > 0 {
            self.pipeline.process(&data[..whole], &mut self.converted);
        }
        self.staged.extend_from_slice(&data[whole..]);

        self.output.push(&self.converted);
        log::trace!(
            "stream put: {} bytes in, {} bytes out, {} staged",
            whole,
            self.converted.len(),
            self.staged.len()
        );
        Ok(())
    }

    /// Bytes ready for `get`
    pub fn available(&self) -> usize {
        self.output.len()
    }

    /// Drain up to `buf.len()` converted bytes
    pub fn get(&mut self, buf: &mut [u8]) -> usize {
        self.output.pull(buf)
    }

    /// Push out whatever the converter is holding back.
    ///
    /// Staged bytes of an incomplete source frame are discarded.
    pub fn flush(&mut self) -> Result<()> {
        if !self.staged.is_empty() {
            log::debug!("stream flush: dropping {} bytes of a partial frame", self.staged.len());
            self.staged.clear();
        }
        self.converted.clear();
        self.pipeline.flush(&mut self.converted);
        self.output.push(&self.converted);
        Ok(())
    }

    /// Discard all buffered input, output and filter history
    pub fn clear(&mut self) {
        self.staged.clear();
        self.output.clear();
        self.pipeline.reset();
    }

    /// Release the stream
    pub fn dispose(self) {}
}
