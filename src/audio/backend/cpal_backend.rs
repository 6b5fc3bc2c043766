// cpal_backend.rs - System audio through cpal

//! Backend for real hardware, built on `cpal`.
//!
//! `cpal::Stream` is not `Send`, so each opened device keeps its stream on
//! a dedicated holder thread for its whole life. The stream callback and
//! the device thread exchange bytes through a shared [`DataQueue`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig, SupportedBufferSize};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use super::{direction, AudioBackend, BackendDevice, DeviceCaps, DeviceInfo};
use crate::audio::error::{AudioError, Result};
use crate::audio::format::AudioFormat;
use crate::audio::queue::DataQueue;
use crate::audio::spec::{AudioSpec, MAX_SAMPLES};

pub const NAME: &str = "cpal";

const STANDARD_RATES: [u32; 9] = [8000, 11025, 16000, 22050, 32000, 44100, 48000, 88200, 96000];

/// Buffer range assumed when the host does not report one
const FALLBACK_SAMPLES: (u16, u16) = (64, 8192);

#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        CpalBackend
    }
}

fn backend_err(context: &str, e: impl std::fmt::Display) -> AudioError {
    AudioError::Backend(format!("{}: {}", context, e))
}

fn to_format(sample: SampleFormat) -> Option<AudioFormat> {
    match sample {
        SampleFormat::U8 => Some(AudioFormat::U8),
        SampleFormat::I8 => Some(AudioFormat::S8),
        SampleFormat::I16 => Some(AudioFormat::S16SYS),
        SampleFormat::U16 => Some(AudioFormat::U16SYS),
        SampleFormat::I32 => Some(AudioFormat::S32SYS),
        SampleFormat::F32 => Some(AudioFormat::F32SYS),
        _ => None,
    }
}

fn to_sample_format(format: AudioFormat) -> Option<SampleFormat> {
    match format {
        AudioFormat::U8 => Some(SampleFormat::U8),
        AudioFormat::S8 => Some(SampleFormat::I8),
        AudioFormat::S16SYS => Some(SampleFormat::I16),
        AudioFormat::U16SYS => Some(SampleFormat::U16),
        AudioFormat::S32SYS => Some(SampleFormat::I32),
        AudioFormat::F32SYS => Some(SampleFormat::F32),
        _ => None,
    }
}

fn find_device(is_capture: bool, name: &str) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = if is_capture {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| backend_err("enumerating devices", e))?;

    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

fn supported_configs(device: &cpal::Device, is_capture: bool) -> Vec<cpal::SupportedStreamConfigRange> {
    let configs = if is_capture {
        device.supported_input_configs().map(|c| c.collect::<Vec<_>>())
    } else {
        device.supported_output_configs().map(|c| c.collect::<Vec<_>>())
    };
    configs.unwrap_or_default()
}

/// Union of the buffer ranges the host reports, in frames
fn buffer_range(configs: &[cpal::SupportedStreamConfigRange]) -> Option<(u16, u16)> {
    configs
        .iter()
        .filter_map(|range| match *range.buffer_size() {
            SupportedBufferSize::Range { min, max } => Some((min, max)),
            SupportedBufferSize::Unknown => None,
        })
        .reduce(|(lo, hi), (min, max)| (lo.min(min), hi.max(max)))
        .map(|(min, max)| {
            let max = max.min(u32::from(MAX_SAMPLES)) as u16;
            (min.clamp(1, u32::from(max.max(1))) as u16, max)
        })
}

/// Fixed size when the host accepts `samples`, host default otherwise
fn stream_buffer_size(configs: &[cpal::SupportedStreamConfigRange], samples: u16) -> BufferSize {
    let fits = configs.iter().any(|range| match *range.buffer_size() {
        SupportedBufferSize::Range { min, max } => (min..=max).contains(&u32::from(samples)),
        SupportedBufferSize::Unknown => false,
    });
    if fits {
        BufferSize::Fixed(u32::from(samples))
    } else {
        BufferSize::Default
    }
}

fn describe(device: &cpal::Device, is_capture: bool) -> Option<DeviceInfo> {
    let name = device.name().ok()?;
    let default = if is_capture {
        device.default_input_config().ok()?
    } else {
        device.default_output_config().ok()?
    };
    let configs = supported_configs(device, is_capture);
    let (min_samples, max_samples) = buffer_range(&configs).unwrap_or(FALLBACK_SAMPLES);

    let mut caps = DeviceCaps {
        frequencies: Vec::new(),
        formats: Vec::new(),
        channels: Vec::new(),
        min_samples,
        max_samples,
    };
    for range in &configs {
        if let Some(format) = to_format(range.sample_format()) {
            if !caps.formats.contains(&format) {
                caps.formats.push(format);
            }
        }
        if let Ok(channels) = u8::try_from(range.channels()) {
            if !caps.channels.contains(&channels) {
                caps.channels.push(channels);
            }
        }
        for rate in STANDARD_RATES {
            if (range.min_sample_rate().0..=range.max_sample_rate().0).contains(&rate)
                && !caps.frequencies.contains(&rate)
            {
                caps.frequencies.push(rate);
            }
        }
    }
    caps.frequencies.sort_unstable();
    caps.channels.sort_unstable();

    let format = to_format(default.sample_format())?;
    let channels = u8::try_from(default.channels()).ok()?;
    Some(DeviceInfo {
        name,
        is_capture,
        spec: AudioSpec::new(default.sample_rate().0, format, channels, 1024),
        caps,
    })
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&self) -> Result<()> {
        let host = cpal::default_host();
        log::debug!("cpal host: {:?}", host.id());
        Ok(())
    }

    fn detect_devices(&self, is_capture: bool) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let devices = if is_capture {
            host.input_devices()
        } else {
            host.output_devices()
        }
        .map_err(|e| backend_err("enumerating devices", e))?;
        Ok(devices.filter_map(|d| describe(&d, is_capture)).collect())
    }

    fn default_device(&self, is_capture: bool) -> Result<DeviceInfo> {
        let host = cpal::default_host();
        let device = if is_capture {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        device
            .and_then(|d| describe(&d, is_capture))
            .ok_or_else(|| {
                AudioError::DeviceNotFound(format!("no default {} device", direction(is_capture)))
            })
    }

    fn open(&self, info: &DeviceInfo, spec: &AudioSpec) -> Result<Box<dyn BackendDevice>> {
        let sample_format = to_sample_format(spec.format).ok_or_else(|| {
            AudioError::InvalidSpec(format!("cpal cannot stream {}", spec.format))
        })?;

        let fifo = Arc::new(Mutex::new(DataQueue::new()));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = channel::bounded::<Result<()>>(1);

        let name = info.name.clone();
        let is_capture = info.is_capture;
        let silence = spec.format;
        let spec = *spec;
        let stream_fifo = Arc::clone(&fifo);

        let holder = thread::Builder::new()
            .name(format!("audiodev-cpal-{}", direction(is_capture)))
            .spawn(move || {
                let stream = find_device(is_capture, &name).and_then(|device| {
                    let configs = supported_configs(&device, is_capture);
                    let config = StreamConfig {
                        channels: u16::from(spec.channels),
                        sample_rate: cpal::SampleRate(spec.freq),
                        buffer_size: stream_buffer_size(&configs, spec.samples),
                    };
                    log::debug!("cpal '{}': {:?}", name, config.buffer_size);
                    let err_fn = |e: cpal::StreamError| log::warn!("cpal stream error: {}", e);
                    let built = if is_capture {
                        device.build_input_stream_raw(
                            &config,
                            sample_format,
                            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                                stream_fifo.lock().push(data.bytes());
                            },
                            err_fn,
                            None,
                        )
                    } else {
                        device.build_output_stream_raw(
                            &config,
                            sample_format,
                            move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                                let out = data.bytes_mut();
                                let n = stream_fifo.lock().pull(out);
                                silence.fill_silence(&mut out[n..]);
                            },
                            err_fn,
                            None,
                        )
                    };
                    let stream = built.map_err(|e| backend_err("building stream", e))?;
                    stream.play().map_err(|e| backend_err("starting stream", e))?;
                    Ok(stream)
                });

                match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| backend_err("spawning stream thread", e))?;

        let ready = ready_rx
            .recv()
            .map_err(|e| backend_err("stream thread exited", e))?;
        if let Err(e) = ready {
            let _ = holder.join();
            return Err(e);
        }

        Ok(Box::new(CpalDevice {
            fifo,
            period: spec.buffer_duration(),
            high_water: spec.size as usize * 2,
            stop: Some(stop_tx),
            holder: Some(holder),
        }))
    }
}

struct CpalDevice {
    fifo: Arc<Mutex<DataQueue>>,
    period: Duration,
    /// Playback blocks while this many bytes are already buffered
    high_water: usize,
    stop: Option<Sender<()>>,
    holder: Option<JoinHandle<()>>,
}

impl BackendDevice for CpalDevice {
    fn play(&mut self, buf: &[u8]) -> Result<()> {
        let nap = (self.period / 4).max(Duration::from_millis(1));
        while self.fifo.lock().len() >= self.high_water {
            thread::sleep(nap);
        }
        self.fifo.lock().push(buf);
        Ok(())
    }

    fn capture(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.period;
        loop {
            let n = self.fifo.lock().pull(buf);
            if n > 0 || Instant::now() >= deadline {
                return Ok(n);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(holder) = self.holder.take() {
            let _ = holder.join();
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
