// ffi.rs - C FFI bindings for the audio subsystem

//! C FFI bindings.
//!
//! The C side sees one process-wide subsystem and refers to devices by id.
//! Devices opened here stay open until `audiodev_close_device` or
//! `audiodev_quit`. Only queue-mode devices can be opened from C.

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};

use parking_lot::Mutex;

use super::device::AudioDevice;
use super::error::AudioError;
use super::format::AudioFormat;
use super::spec::{AllowedChanges, AudioSpec, AudioStatus, DesiredSpec};
use super::subsystem::AudioSubsystem;

/// C mirror of [`AudioSpec`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudiodevSpec {
    pub freq: c_int,
    pub format: u16,
    pub channels: u8,
    pub silence: u8,
    pub samples: u16,
    pub padding: u16,
    pub size: u32,
}

impl From<AudioSpec> for AudiodevSpec {
    fn from(spec: AudioSpec) -> Self {
        AudiodevSpec {
            freq: spec.freq as c_int,
            format: spec.format.raw(),
            channels: spec.channels,
            silence: spec.silence,
            samples: spec.samples,
            padding: 0,
            size: spec.size,
        }
    }
}

impl TryFrom<AudiodevSpec> for AudioSpec {
    type Error = AudioError;

    fn try_from(spec: AudiodevSpec) -> Result<Self, Self::Error> {
        let format = AudioFormat::from_raw(spec.format)
            .ok_or_else(|| AudioError::InvalidSpec(format!("unknown format {:#06x}", spec.format)))?;
        let freq = u32::try_from(spec.freq)
            .map_err(|_| AudioError::InvalidSpec(format!("negative frequency {}", spec.freq)))?;
        Ok(AudioSpec::new(freq, format, spec.channels, spec.samples))
    }
}

struct FfiState {
    audio: AudioSubsystem,
    devices: HashMap<u32, AudioDevice>,
}

static STATE: Mutex<Option<FfiState>> = Mutex::new(None);
static LAST_ERROR: Mutex<Option<CString>> = Mutex::new(None);

fn set_error(message: &str) {
    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
    *LAST_ERROR.lock() = Some(text);
}

fn fail<T>(err: AudioError, value: T) -> T {
    set_error(&err.to_string());
    value
}

/// Run `f` on an open device, recording failures
fn with_device<T>(id: u32, on_error: T, f: impl FnOnce(&AudioDevice) -> Result<T, AudioError>) -> T {
    let device = {
        let state = STATE.lock();
        match state.as_ref() {
            Some(state) => state.devices.get(&id).cloned(),
            None => return fail(AudioError::NotInitialized, on_error),
        }
    };
    match device {
        Some(device) => f(&device).unwrap_or_else(|e| fail(e, on_error)),
        None => fail(AudioError::DeviceClosed(id), on_error),
    }
}

/// Initialize the subsystem with the named driver, or the default driver if
/// `driver` is null. Returns 0 on success, -1 on failure.
///
/// # Safety
/// `driver` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn audiodev_init(driver: *const c_char) -> c_int {
    let name = if driver.is_null() {
        None
    } else {
        match CStr::from_ptr(driver).to_str() {
            Ok(s) => Some(s.to_string()),
            Err(_) => {
                set_error("driver name is not valid UTF-8");
                return -1;
            }
        }
    };

    audiodev_quit();

    let audio = AudioSubsystem::new();
    match audio.init(name.as_deref()) {
        Ok(()) => {
            *STATE.lock() = Some(FfiState {
                audio,
                devices: HashMap::new(),
            });
            0
        }
        Err(e) => fail(e, -1),
    }
}

/// Close every device and shut the subsystem down
#[no_mangle]
pub extern "C" fn audiodev_quit() {
    let state = STATE.lock().take();
    if let Some(state) = state {
        for device in state.devices.values() {
            device.close();
        }
        state.audio.quit();
    }
}

/// Message of the most recent failure, or an empty string.
///
/// The pointer stays valid until the next failing call.
#[no_mangle]
pub extern "C" fn audiodev_get_error() -> *const c_char {
    match LAST_ERROR.lock().as_ref() {
        Some(message) => message.as_ptr(),
        None => b"\0".as_ptr() as *const c_char,
    }
}

/// Number of devices of one direction, or -1 on failure
#[no_mangle]
pub extern "C" fn audiodev_get_num_devices(iscapture: c_int) -> c_int {
    let state = STATE.lock();
    let Some(state) = state.as_ref() else {
        return fail(AudioError::NotInitialized, -1);
    };
    match state.audio.device_count(iscapture != 0) {
        Ok(n) => n as c_int,
        Err(e) => fail(e, -1),
    }
}

/// Open a queue-mode device. Returns its id, or 0 on failure.
///
/// # Safety
/// `device` must be null or a valid NUL-terminated string, `desired` must
/// point to a valid spec and `obtained` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn audiodev_open_device(
    device: *const c_char,
    iscapture: c_int,
    desired: *const AudiodevSpec,
    obtained: *mut AudiodevSpec,
    allowed_changes: c_int,
) -> u32 {
    if desired.is_null() {
        return fail(AudioError::InvalidSpec("desired spec is null".into()), 0);
    }
    let name = if device.is_null() {
        None
    } else {
        match CStr::from_ptr(device).to_str() {
            Ok(s) => Some(s),
            Err(_) => return fail(AudioError::DeviceNotFound("<invalid UTF-8>".into()), 0),
        }
    };
    let spec = match AudioSpec::try_from(*desired) {
        Ok(spec) => spec,
        Err(e) => return fail(e, 0),
    };
    let allowed = AllowedChanges::from_bits(allowed_changes as u32);

    let mut state = STATE.lock();
    let Some(state) = state.as_mut() else {
        return fail(AudioError::NotInitialized, 0);
    };

    match state
        .audio
        .open_device(name, iscapture != 0, DesiredSpec::new(spec), allowed)
    {
        Ok((dev, got)) => {
            if !obtained.is_null() {
                *obtained = got.into();
            }
            let id = dev.id();
            state.devices.insert(id, dev);
            id
        }
        Err(e) => fail(e, 0),
    }
}

/// Close a device; unknown ids are ignored
#[no_mangle]
pub extern "C" fn audiodev_close_device(id: u32) {
    let device = STATE.lock().as_mut().and_then(|s| s.devices.remove(&id));
    if let Some(device) = device {
        device.close();
    }
}

/// Pause (non-zero) or resume (zero) a device
#[no_mangle]
pub extern "C" fn audiodev_pause_device(id: u32, pause_on: c_int) {
    with_device(id, (), |d| d.set_paused(pause_on != 0));
}

/// 0 = stopped, 1 = playing, 2 = paused
#[no_mangle]
pub extern "C" fn audiodev_get_device_status(id: u32) -> c_int {
    with_device(id, 0, |d| {
        Ok(match d.status() {
            AudioStatus::Stopped => 0,
            AudioStatus::Playing => 1,
            AudioStatus::Paused => 2,
        })
    })
}

/// Queue `len` bytes for playback. Returns 0 on success, -1 on failure.
///
/// # Safety
/// `data` must be valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn audiodev_queue_audio(id: u32, data: *const c_void, len: u32) -> c_int {
    if len == 0 {
        return 0;
    }
    if data.is_null() {
        return fail(AudioError::InvalidSpec("data is null".into()), -1);
    }
    let bytes = std::slice::from_raw_parts(data as *const u8, len as usize);
    with_device(id, -1, |d| d.queue_audio(bytes).map(|_| 0))
}

/// Dequeue up to `len` captured bytes, returning the count copied
///
/// # Safety
/// `data` must be valid for writes of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn audiodev_dequeue_audio(id: u32, data: *mut c_void, len: u32) -> u32 {
    if len == 0 || data.is_null() {
        return 0;
    }
    let buf = std::slice::from_raw_parts_mut(data as *mut u8, len as usize);
    with_device(id, 0, |d| d.dequeue_audio(buf).map(|n| n as u32))
}

/// Bytes queued on a device
#[no_mangle]
pub extern "C" fn audiodev_get_queued_audio_size(id: u32) -> u32 {
    with_device(id, 0, |d| d.queued_audio_size().map(|n| n as u32))
}

/// Drop everything queued on a device
#[no_mangle]
pub extern "C" fn audiodev_clear_queued_audio(id: u32) {
    with_device(id, (), |d| d.clear_queued_audio());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::ptr;

    fn error_text() -> String {
        unsafe { CStr::from_ptr(audiodev_get_error()) }
            .to_string_lossy()
            .into_owned()
    }

    fn desired() -> AudiodevSpec {
        AudioSpec::new(48000, AudioFormat::S16LSB, 2, 256).into()
    }

    #[test]
    #[serial]
    fn test_init_and_quit() {
        let driver = CString::new("dummy").unwrap();
        assert_eq!(unsafe { audiodev_init(driver.as_ptr()) }, 0);
        assert_eq!(audiodev_get_num_devices(0), 1);
        assert_eq!(audiodev_get_num_devices(1), 1);
        audiodev_quit();
        assert_eq!(audiodev_get_num_devices(0), -1);
        assert!(error_text().contains("not initialized"));
    }

    #[test]
    #[serial]
    fn test_unknown_driver() {
        let driver = CString::new("nonexistent").unwrap();
        assert_eq!(unsafe { audiodev_init(driver.as_ptr()) }, -1);
        assert!(error_text().contains("nonexistent"));
    }

    #[test]
    #[serial]
    fn test_open_queue_close() {
        let driver = CString::new("dummy").unwrap();
        assert_eq!(unsafe { audiodev_init(driver.as_ptr()) }, 0);

        let want = desired();
        let mut got = AudiodevSpec::default();
        let id = unsafe { audiodev_open_device(ptr::null(), 0, &want, &mut got, 0) };
        assert_ne!(id, 0);
        assert_eq!(got, want);
        assert_eq!(audiodev_get_device_status(id), 2);

        let data = [1u8; 64];
        assert_eq!(unsafe { audiodev_queue_audio(id, data.as_ptr() as *const c_void, 64) }, 0);
        assert_eq!(audiodev_get_queued_audio_size(id), 64);
        audiodev_clear_queued_audio(id);
        assert_eq!(audiodev_get_queued_audio_size(id), 0);

        // not a whole frame
        assert_eq!(unsafe { audiodev_queue_audio(id, data.as_ptr() as *const c_void, 3) }, -1);

        audiodev_close_device(id);
        assert_eq!(audiodev_get_queued_audio_size(id), 0);
        assert!(error_text().contains("closed"));
        audiodev_quit();
    }

    #[test]
    #[serial]
    fn test_open_failure_returns_zero() {
        let driver = CString::new("dummy").unwrap();
        assert_eq!(unsafe { audiodev_init(driver.as_ptr()) }, 0);

        let mut want = desired();
        want.freq = 44100;
        let id = unsafe { audiodev_open_device(ptr::null(), 0, &want, ptr::null_mut(), 0) };
        assert_eq!(id, 0);
        assert!(error_text().contains("frequency"));

        let id = unsafe {
            audiodev_open_device(ptr::null(), 0, &want, ptr::null_mut(), AllowedChanges::ANY.bits() as c_int)
        };
        assert_ne!(id, 0);
        audiodev_quit();
    }

    #[test]
    fn test_spec_conversion() {
        let spec = AudioSpec::new(22050, AudioFormat::F32MSB, 6, 512);
        let c: AudiodevSpec = spec.into();
        assert_eq!(c.size, 512 * 6 * 4);
        assert_eq!(AudioSpec::try_from(c).unwrap(), spec);

        let bad = AudiodevSpec {
            format: 0x1234,
            ..c
        };
        assert!(AudioSpec::try_from(bad).is_err());
    }
}
