// dummy.rs - Silent backend

//! Backend with one silent playback and one silent capture device.
//!
//! Both devices are paced by wall-clock time so the device thread runs at
//! the same cadence it would against real hardware.

use std::thread;
use std::time::{Duration, Instant};

use super::{AudioBackend, BackendDevice, DeviceCaps, DeviceInfo};
use crate::audio::error::{AudioError, Result};
use crate::audio::format::AudioFormat;
use crate::audio::spec::AudioSpec;

pub const NAME: &str = "dummy";

pub const OUTPUT_NAME: &str = "Dummy Output";
pub const INPUT_NAME: &str = "Dummy Input";

const FREQUENCY: u32 = 48000;

#[derive(Debug, Default)]
pub struct DummyBackend;

impl DummyBackend {
    pub fn new() -> Self {
        DummyBackend
    }
}

fn caps() -> DeviceCaps {
    DeviceCaps {
        frequencies: vec![FREQUENCY],
        formats: AudioFormat::ALL.to_vec(),
        channels: (1..=8).collect(),
        min_samples: 64,
        max_samples: 8192,
    }
}

impl AudioBackend for DummyBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn detect_devices(&self, is_capture: bool) -> Result<Vec<DeviceInfo>> {
        let name = if is_capture { INPUT_NAME } else { OUTPUT_NAME };
        Ok(vec![DeviceInfo {
            name: name.to_string(),
            is_capture,
            spec: AudioSpec::new(FREQUENCY, AudioFormat::S16LSB, 2, 1024),
            caps: caps(),
        }])
    }

    fn open(&self, info: &DeviceInfo, spec: &AudioSpec) -> Result<Box<dyn BackendDevice>> {
        if info.name != OUTPUT_NAME && info.name != INPUT_NAME {
            return Err(AudioError::DeviceNotFound(info.name.clone()));
        }
        Ok(Box::new(DummyDevice {
            clock: Pacer::new(spec.buffer_duration()),
            format: spec.format,
        }))
    }
}

/// Sleeps so that successive calls are one period apart on average
#[derive(Debug)]
pub(crate) struct Pacer {
    period: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(period: Duration) -> Self {
        Pacer { period, next: None }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn wait(&mut self) {
        let now = Instant::now();
        let next = self.next.unwrap_or(now) + self.period;
        if next > now {
            thread::sleep(next - now);
            self.next = Some(next);
        } else {
            // fell behind, don't try to catch up
            self.next = Some(now);
        }
    }
}

struct DummyDevice {
    clock: Pacer,
    format: AudioFormat,
}

impl BackendDevice for DummyDevice {
    fn play(&mut self, _buf: &[u8]) -> Result<()> {
        self.clock.wait();
        Ok(())
    }

    fn capture(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.clock.wait();
        self.format.fill_silence(buf);
        Ok(buf.len())
    }

    fn close(&mut self) {}
}
