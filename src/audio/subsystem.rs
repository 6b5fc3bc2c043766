// subsystem.rs - Audio subsystem entry point

//! The audio subsystem: driver selection, enumeration and device opening.
//!
//! Several subsystems may coexist (tests create one each); every device
//! belongs to the subsystem that opened it and is closed by its `quit`.

use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{self, negotiate, DeviceInfo};
use super::device::{AudioDevice, DeviceTable, SharedTable};
use super::error::{AudioError, Result};
use super::registry::DeviceRegistry;
use super::spec::{AllowedChanges, AudioSpec, DesiredSpec};
use crate::config::ENV_DRIVER;

pub struct AudioSubsystem {
    registry: Mutex<DeviceRegistry>,
    table: SharedTable,
    last_error: Mutex<Option<String>>,
}

impl AudioSubsystem {
    /// Uninitialized subsystem; call [`init`](Self::init) before use
    pub fn new() -> Self {
        AudioSubsystem {
            registry: Mutex::new(DeviceRegistry::new()),
            table: Arc::new(Mutex::new(DeviceTable::default())),
            last_error: Mutex::new(None),
        }
    }

    /// New subsystem already running `driver`
    pub fn with_driver(driver: &str) -> Result<Self> {
        let subsystem = Self::new();
        subsystem.init(Some(driver))?;
        Ok(subsystem)
    }

    /// Start a driver, shutting down the current one first.
    ///
    /// With no name, `AUDIODEV_DRIVER` is used if set; otherwise the first
    /// compiled driver that starts wins.
    pub fn init(&self, driver: Option<&str>) -> Result<()> {
        self.quit();

        let requested = driver
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_DRIVER).ok().filter(|s| !s.is_empty()));

        let result = match requested {
            Some(name) => backend::create_backend(&name).and_then(|b| {
                b.init()?;
                Ok(b)
            }),
            None => {
                let mut last = Err(AudioError::UnknownDriver("no drivers compiled in".into()));
                for name in backend::available_backends() {
                    last = backend::create_backend(name).and_then(|b| {
                        b.init()?;
                        Ok(b)
                    });
                    if last.is_ok() {
                        break;
                    }
                }
                last
            }
        };

        let backend = self.record(result)?;
        log::debug!("audio driver '{}' initialized", backend.name());
        self.registry.lock().activate(backend);
        Ok(())
    }

    /// Close every open device and stop the driver
    pub fn quit(&self) {
        let devices = self.table.lock().live();
        for device in &devices {
            device.close();
        }
        drop(devices);

        let mut registry = self.registry.lock();
        if let Some(name) = registry.current_driver() {
            log::debug!("audio driver '{}' shut down", name);
        }
        registry.deactivate();
    }

    pub fn is_initialized(&self) -> bool {
        self.registry.lock().current_driver().is_some()
    }

    /// Compiled driver names, most preferred first
    pub fn drivers(&self) -> Vec<&'static str> {
        self.registry.lock().drivers().to_vec()
    }

    pub fn current_driver(&self) -> Option<&'static str> {
        self.registry.lock().current_driver()
    }

    pub fn devices(&self, is_capture: bool) -> Result<Vec<DeviceInfo>> {
        let result = self.registry.lock().devices(is_capture);
        self.record(result)
    }

    pub fn device_count(&self, is_capture: bool) -> Result<usize> {
        let result = self.registry.lock().device_count(is_capture);
        self.record(result)
    }

    pub fn device_name(&self, index: usize, is_capture: bool) -> Result<String> {
        let result = self.registry.lock().device_name(index, is_capture);
        self.record(result)
    }

    /// Name and preferred spec of the default device
    pub fn default_device(&self, is_capture: bool) -> Result<(String, AudioSpec)> {
        let result = self.registry.lock().default_device(is_capture);
        self.record(result)
    }

    /// Re-enumerate devices on next use
    pub fn refresh_devices(&self) {
        self.registry.lock().refresh();
    }

    /// Open a device by name, or the default device when `name` is None.
    ///
    /// Returns the device, initially paused, and the spec it was opened with.
    pub fn open_device(
        &self,
        name: Option<&str>,
        is_capture: bool,
        desired: DesiredSpec,
        allowed: AllowedChanges,
    ) -> Result<(AudioDevice, AudioSpec)> {
        let result = self.try_open(name, is_capture, desired, allowed);
        self.record(result)
    }

    fn try_open(
        &self,
        name: Option<&str>,
        is_capture: bool,
        desired: DesiredSpec,
        allowed: AllowedChanges,
    ) -> Result<(AudioDevice, AudioSpec)> {
        let (backend, info) = {
            let mut registry = self.registry.lock();
            let backend = Arc::clone(registry.backend()?);
            let info = registry.find(name, is_capture)?;
            (backend, info)
        };
        desired.spec.validate()?;

        let obtained = negotiate(&desired.spec, &info, allowed)?;
        let device = AudioDevice::open(&backend, &info, obtained, desired.callback, &self.table)?;
        Ok((device, obtained))
    }

    /// Handle to an open device by id
    pub fn device(&self, id: u32) -> Option<AudioDevice> {
        let table = self.table.lock();
        table.get(id)
    }

    /// Number of open devices
    pub fn open_device_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Message of the most recent failure
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.lock() = None;
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            *self.last_error.lock() = Some(e.to_string());
        }
        result
    }
}

impl Default for AudioSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioSubsystem {
    fn drop(&mut self) {
        self.quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::dummy;
    use crate::audio::format::AudioFormat;
    use crate::audio::spec::AudioStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn small_spec() -> AudioSpec {
        AudioSpec::new(48000, AudioFormat::S16LSB, 2, 256)
    }

    #[test]
    fn test_not_initialized() {
        let audio = AudioSubsystem::new();
        assert!(!audio.is_initialized());
        assert_eq!(audio.current_driver(), None);
        assert_eq!(audio.devices(false), Err(AudioError::NotInitialized));

        let result = audio.open_device(None, false, small_spec().into(), AllowedChanges::NONE);
        assert!(matches!(result, Err(AudioError::NotInitialized)));
        assert!(audio.last_error().unwrap().contains("not initialized"));
    }

    #[test]
    fn test_init_unknown_driver() {
        let audio = AudioSubsystem::new();
        assert!(matches!(audio.init(Some("bogus")), Err(AudioError::UnknownDriver(_))));
        assert!(!audio.is_initialized());
    }

    #[test]
    fn test_open_and_close() {
        let audio = AudioSubsystem::with_driver("dummy").unwrap();
        assert_eq!(audio.current_driver(), Some("dummy"));

        let (device, obtained) = audio
            .open_device(None, false, small_spec().into(), AllowedChanges::NONE)
            .unwrap();
        assert_eq!(obtained, small_spec());
        assert_eq!(device.id(), 1);
        assert_eq!(device.name(), dummy::OUTPUT_NAME);
        assert_eq!(device.status(), AudioStatus::Paused);

        device.unpause().unwrap();
        assert_eq!(device.status(), AudioStatus::Playing);

        device.close();
        assert_eq!(device.status(), AudioStatus::Stopped);
        assert_eq!(device.pause(), Err(AudioError::DeviceClosed(1)));
        assert!(audio.device(1).is_none());
        device.close();
    }

    #[test]
    fn test_ids_are_lowest_free() {
        let audio = AudioSubsystem::with_driver("dummy").unwrap();
        let open = || {
            audio
                .open_device(None, false, small_spec().into(), AllowedChanges::NONE)
                .unwrap()
                .0
        };
        let a = open();
        let b = open();
        assert_eq!((a.id(), b.id()), (1, 2));
        a.close();
        let c = open();
        assert_eq!(c.id(), 1);
        assert_eq!(audio.open_device_count(), 2);
    }

    #[test]
    fn test_callback_runs_on_named_thread() {
        let audio = AudioSubsystem::with_driver("dummy").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let on_thread = Arc::new(Mutex::new(None));

        let desired = {
            let calls = Arc::clone(&calls);
            let on_thread = Arc::clone(&on_thread);
            DesiredSpec::new(small_spec()).with_callback(move |buf| {
                buf.fill(0);
                *on_thread.lock() = std::thread::current().name().map(str::to_string);
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let (device, _) = audio
            .open_device(None, false, desired, AllowedChanges::NONE)
            .unwrap();
        assert_eq!(device.queue_audio(&[0; 4]), Err(AudioError::CallbackDevice));

        device.unpause().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(on_thread.lock().as_deref(), Some("audiodev-1"));

        device.pause().unwrap();
        let after_pause = calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), after_pause);
    }

    #[test]
    fn test_quit_closes_devices() {
        let audio = AudioSubsystem::with_driver("dummy").unwrap();
        let (device, _) = audio
            .open_device(None, true, small_spec().into(), AllowedChanges::NONE)
            .unwrap();
        audio.quit();
        assert!(device.is_closed());
        assert!(!audio.is_initialized());
        assert_eq!(audio.open_device_count(), 0);
    }
}
