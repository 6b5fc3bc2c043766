// loopback.rs - Playback-to-capture loopback backend

//! Backend whose capture device hears exactly what its playback device plays.
//!
//! Buffers travel over a bounded `crossbeam` channel. When nobody captures
//! and the channel is full, further playback is dropped, the way an
//! unattended hardware loopback overruns.
//!
//! Bytes are forwarded unchanged; open both ends with the same spec.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::dummy::Pacer;
use super::{AudioBackend, BackendDevice, DeviceCaps, DeviceInfo};
use crate::audio::error::{AudioError, Result};
use crate::audio::format::AudioFormat;
use crate::audio::spec::AudioSpec;

pub const NAME: &str = "loopback";

pub const OUTPUT_NAME: &str = "Loopback Output";
pub const INPUT_NAME: &str = "Loopback Input";

/// Buffers in flight before playback starts dropping
const LINK_DEPTH: usize = 256;

#[derive(Debug)]
pub struct LoopbackBackend {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(LINK_DEPTH);
        LoopbackBackend { tx, rx }
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn caps() -> DeviceCaps {
    DeviceCaps {
        frequencies: vec![8000, 11025, 16000, 22050, 32000, 44100, 48000],
        formats: AudioFormat::ALL.to_vec(),
        channels: (1..=8).collect(),
        min_samples: 64,
        max_samples: 8192,
    }
}

impl AudioBackend for LoopbackBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&self) -> Result<()> {
        // stale buffers from a previous session
        while self.rx.try_recv().is_ok() {}
        Ok(())
    }

    fn detect_devices(&self, is_capture: bool) -> Result<Vec<DeviceInfo>> {
        let name = if is_capture { INPUT_NAME } else { OUTPUT_NAME };
        Ok(vec![DeviceInfo {
            name: name.to_string(),
            is_capture,
            spec: AudioSpec::new(48000, AudioFormat::S16LSB, 2, 1024),
            caps: caps(),
        }])
    }

    fn open(&self, info: &DeviceInfo, spec: &AudioSpec) -> Result<Box<dyn BackendDevice>> {
        let pacer = Pacer::new(spec.buffer_duration());
        match info.name.as_str() {
            OUTPUT_NAME => Ok(Box::new(LoopbackOutput {
                tx: self.tx.clone(),
                pacer,
                dropped: 0,
            })),
            INPUT_NAME => Ok(Box::new(LoopbackInput {
                rx: self.rx.clone(),
                timeout: pacer.period().max(Duration::from_millis(1)),
                pending: Vec::new(),
            })),
            other => Err(AudioError::DeviceNotFound(other.to_string())),
        }
    }
}

struct LoopbackOutput {
    tx: Sender<Vec<u8>>,
    pacer: Pacer,
    dropped: usize,
}

impl BackendDevice for LoopbackOutput {
    fn play(&mut self, buf: &[u8]) -> Result<()> {
        if self.tx.try_send(buf.to_vec()).is_err() {
            self.dropped += buf.len();
        }
        self.pacer.wait();
        Ok(())
    }

    fn capture(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(AudioError::WrongDirection("playback"))
    }

    fn close(&mut self) {
        if self.dropped > 0 {
            log::debug!("loopback output dropped {} bytes with no listener", self.dropped);
        }
    }
}

struct LoopbackInput {
    rx: Receiver<Vec<u8>>,
    timeout: Duration,
    /// Tail of a received buffer that did not fit the last capture
    pending: Vec<u8>,
}

impl BackendDevice for LoopbackInput {
    fn play(&mut self, _buf: &[u8]) -> Result<()> {
        Err(AudioError::WrongDirection("capture"))
    }

    fn capture(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(data) => self.pending = data,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::Backend("loopback link closed".into()))
                }
            }
        }

        let mut filled = 0;
        loop {
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            filled += n;
            if filled == buf.len() {
                break;
            }
            match self.rx.try_recv() {
                Ok(data) => self.pending = data,
                Err(_) => break,
            }
        }
        Ok(filled)
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_delivers_in_order() {
        let backend = LoopbackBackend::new();
        backend.init().unwrap();
        let spec = AudioSpec::new(48000, AudioFormat::U8, 1, 64);
        let out_info = backend.default_device(false).unwrap();
        let in_info = backend.default_device(true).unwrap();

        let mut output = backend.open(&out_info, &spec).unwrap();
        let mut input = backend.open(&in_info, &spec).unwrap();

        output.play(&[1, 2, 3, 4]).unwrap();
        output.play(&[5, 6]).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(input.capture(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(input.capture(&mut buf).unwrap(), 3);
        assert_eq!(buf, [4, 5, 6]);
        assert_eq!(input.capture(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_loopback_wrong_direction() {
        let backend = LoopbackBackend::new();
        let spec = AudioSpec::new(48000, AudioFormat::U8, 1, 64);
        let mut output = backend.open(&backend.default_device(false).unwrap(), &spec).unwrap();
        let mut buf = [0u8; 4];
        assert!(output.capture(&mut buf).is_err());
    }
}
