// mod.rs - Platform backend seam

//! Platform audio backends.
//!
//! A backend enumerates devices and opens them for raw buffer I/O. The
//! device thread in [`crate::audio::device`] drives the opened device; the
//! backend never sees callbacks or queues.
//!
//! Compiled backends, in preference order:
//! - `cpal` (cargo feature `cpal`) - system audio
//! - `dummy` - silent, paced by wall-clock time
//! - `loopback` - playback is captured back in order

use std::fmt;
use std::sync::Arc;

use super::error::{AudioError, Result};
use super::format::AudioFormat;
use super::spec::{AllowedChanges, AudioSpec};

#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod dummy;
pub mod loopback;

/// What a device can be opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    pub frequencies: Vec<u32>,
    pub formats: Vec<AudioFormat>,
    pub channels: Vec<u8>,
    pub min_samples: u16,
    pub max_samples: u16,
}

impl DeviceCaps {
    /// Power-of-two buffer sizes inside the device range
    pub fn supports_samples(&self, samples: u16) -> bool {
        samples.is_power_of_two() && (self.min_samples..=self.max_samples).contains(&samples)
    }

    /// Nearest supported buffer size at or above `samples`, or the largest
    /// one when `samples` is past the range
    fn fit_samples(&self, samples: u16) -> Option<u16> {
        let max = self.max_samples as u32;
        let mut fit = (samples.max(self.min_samples) as u32).next_power_of_two();
        if fit > max {
            if max == 0 {
                return None;
            }
            fit = 1 << (31 - max.leading_zeros());
        }
        let fit = fit as u16;
        self.supports_samples(fit).then_some(fit)
    }
}

/// An enumerated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_capture: bool,
    /// Preferred spec of the device
    pub spec: AudioSpec,
    pub caps: DeviceCaps,
}

/// A driver able to enumerate and open devices
pub trait AudioBackend: Send + Sync + fmt::Debug {
    /// Driver name, e.g. "dummy"
    fn name(&self) -> &'static str;

    /// Bring the driver up. Called once when the subsystem selects it.
    fn init(&self) -> Result<()>;

    /// List devices of one direction
    fn detect_devices(&self, is_capture: bool) -> Result<Vec<DeviceInfo>>;

    /// The device used when no name is given
    fn default_device(&self, is_capture: bool) -> Result<DeviceInfo> {
        self.detect_devices(is_capture)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AudioError::DeviceNotFound(format!(
                    "no default {} device",
                    direction(is_capture)
                ))
            })
    }

    /// Open `info` with an already negotiated spec
    fn open(&self, info: &DeviceInfo, spec: &AudioSpec) -> Result<Box<dyn BackendDevice>>;
}

/// An opened device
pub trait BackendDevice: Send {
    /// Hand one buffer to the device, blocking for about one buffer period
    fn play(&mut self, buf: &[u8]) -> Result<()>;

    /// Fill `buf` with captured bytes, waiting at most one buffer period.
    /// Returns the byte count written.
    fn capture(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn close(&mut self);
}

pub(crate) fn direction(is_capture: bool) -> &'static str {
    if is_capture {
        "capture"
    } else {
        "playback"
    }
}

/// Names of the compiled backends, most preferred first
pub fn available_backends() -> Vec<&'static str> {
    let mut names = Vec::new();
    #[cfg(feature = "cpal")]
    names.push(cpal_backend::NAME);
    names.push(dummy::NAME);
    names.push(loopback::NAME);
    names
}

/// Instantiate a backend by name (case-insensitive)
pub fn create_backend(name: &str) -> Result<Arc<dyn AudioBackend>> {
    let backend: Arc<dyn AudioBackend> = match name.to_ascii_lowercase().as_str() {
        #[cfg(feature = "cpal")]
        cpal_backend::NAME => Arc::new(cpal_backend::CpalBackend::new()),
        dummy::NAME => Arc::new(dummy::DummyBackend::new()),
        loopback::NAME => Arc::new(loopback::LoopbackBackend::new()),
        _ => return Err(AudioError::UnknownDriver(name.to_string())),
    };
    Ok(backend)
}

/// Settle on the spec a device will be opened with.
///
/// Each axis keeps the desired value when the device supports it. Otherwise
/// the device's preferred value is used if that axis is in `allowed`, and
/// the open fails if it is not.
pub fn negotiate(desired: &AudioSpec, info: &DeviceInfo, allowed: AllowedChanges) -> Result<AudioSpec> {
    let caps = &info.caps;
    let native = &info.spec;

    let freq = pick(
        "frequency",
        desired.freq,
        native.freq,
        &caps.frequencies,
        allowed.contains(AllowedChanges::FREQUENCY),
    )?;
    let format = pick(
        "format",
        desired.format,
        native.format,
        &caps.formats,
        allowed.contains(AllowedChanges::FORMAT),
    )?;
    let channels = pick(
        "channels",
        desired.channels,
        native.channels,
        &caps.channels,
        allowed.contains(AllowedChanges::CHANNELS),
    )?;

    let samples = if desired.samples == 0 {
        native.samples
    } else if caps.supports_samples(desired.samples) {
        desired.samples
    } else if allowed.contains(AllowedChanges::SAMPLES) {
        caps.fit_samples(desired.samples).unwrap_or(native.samples)
    } else {
        return Err(AudioError::Negotiation {
            axis: "samples",
            desired: desired.samples.to_string(),
            supported: format!("powers of two in {}..={}", caps.min_samples, caps.max_samples),
        });
    };

    let obtained = AudioSpec::new(freq, format, channels, samples);
    if obtained != AudioSpec::new(desired.freq, desired.format, desired.channels, desired.samples) {
        log::debug!("negotiated {} for '{}' (wanted {})", obtained, info.name, desired);
    }
    Ok(obtained)
}

fn pick<T>(axis: &'static str, desired: T, native: T, supported: &[T], may_change: bool) -> Result<T>
where
    T: Copy + PartialEq + fmt::Display,
{
    if supported.contains(&desired) {
        Ok(desired)
    } else if may_change {
        Ok(native)
    } else {
        let list: Vec<String> = supported.iter().map(|v| v.to_string()).collect();
        Err(AudioError::Negotiation {
            axis,
            desired: desired.to_string(),
            supported: format!("[{}]", list.join(", ")),
        })
    }
}
