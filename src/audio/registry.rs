// registry.rs - Driver and device enumeration

//! Driver list and cached device lists.
//!
//! Device lists are enumerated from the active driver on first use and
//! cached until [`DeviceRegistry::refresh`]. Hot-plugged devices are not
//! noticed otherwise.

use std::sync::Arc;

use super::backend::{self, AudioBackend, DeviceInfo};
use super::error::{AudioError, Result};
use super::spec::AudioSpec;

#[derive(Debug)]
pub struct DeviceRegistry {
    drivers: Vec<&'static str>,
    backend: Option<Arc<dyn AudioBackend>>,
    playback: Option<Vec<DeviceInfo>>,
    capture: Option<Vec<DeviceInfo>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry {
            drivers: backend::available_backends(),
            backend: None,
            playback: None,
            capture: None,
        }
    }

    /// Compiled driver names, most preferred first
    pub fn drivers(&self) -> &[&'static str] {
        &self.drivers
    }

    /// Make `backend` the active driver
    pub fn activate(&mut self, backend: Arc<dyn AudioBackend>) {
        self.backend = Some(backend);
        self.refresh();
    }

    pub fn deactivate(&mut self) {
        self.backend = None;
        self.refresh();
    }

    pub fn backend(&self) -> Result<&Arc<dyn AudioBackend>> {
        self.backend.as_ref().ok_or(AudioError::NotInitialized)
    }

    /// Name of the active driver
    pub fn current_driver(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Forget cached device lists
    pub fn refresh(&mut self) {
        self.playback = None;
        self.capture = None;
    }

    fn cached(&mut self, is_capture: bool) -> Result<&[DeviceInfo]> {
        let backend = Arc::clone(self.backend()?);
        let slot = if is_capture {
            &mut self.capture
        } else {
            &mut self.playback
        };
        if slot.is_none() {
            let devices = backend.detect_devices(is_capture)?;
            log::debug!(
                "{}: {} {} device(s)",
                backend.name(),
                devices.len(),
                backend::direction(is_capture)
            );
            *slot = Some(devices);
        }
        Ok(slot.as_deref().unwrap_or_default())
    }

    /// Devices of one direction on the active driver
    pub fn devices(&mut self, is_capture: bool) -> Result<Vec<DeviceInfo>> {
        Ok(self.cached(is_capture)?.to_vec())
    }

    /// Number of devices of one direction
    pub fn device_count(&mut self, is_capture: bool) -> Result<usize> {
        Ok(self.cached(is_capture)?.len())
    }

    /// Name of the device at `index`
    pub fn device_name(&mut self, index: usize, is_capture: bool) -> Result<String> {
        self.cached(is_capture)?
            .get(index)
            .map(|d| d.name.clone())
            .ok_or_else(|| AudioError::DeviceNotFound(format!("index {}", index)))
    }

    /// Look a device up by name, or take the default when `name` is None
    pub fn find(&mut self, name: Option<&str>, is_capture: bool) -> Result<DeviceInfo> {
        match name {
            Some(name) => self
                .cached(is_capture)?
                .iter()
                .find(|d| d.name == name)
                .cloned()
                .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
            None => self.backend()?.default_device(is_capture),
        }
    }

    /// Name and preferred spec of the default device
    pub fn default_device(&mut self, is_capture: bool) -> Result<(String, AudioSpec)> {
        let info = self.backend()?.default_device(is_capture)?;
        Ok((info.name, info.spec))
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
