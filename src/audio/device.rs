// device.rs - Opened audio devices and their threads

//! Opened audio devices.
//!
//! Every open device owns one thread, named `audiodev-<id>`, that moves
//! buffers between the backend and either the device's callback or its
//! byte queue. The thread only touches the callback and the queue while
//! holding the device lock, which is the same lock [`AudioDevice::lock`]
//! hands out.
//!
//! # Lifecycle
//!
//! Devices start paused. [`AudioDevice::pause`] is a barrier: when it
//! returns no callback is running and none will start until unpaused.
//! [`AudioDevice::close`] stops and joins the thread before returning,
//! and the device is also closed when its last handle is dropped. Any
//! operation on a closed device fails with [`AudioError::DeviceClosed`].

use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use super::backend::{direction, AudioBackend, BackendDevice, DeviceInfo};
use super::error::{AudioError, Result};
use super::queue::DataQueue;
use super::spec::{AudioCallback, AudioSpec, AudioStatus};

// ============================================================================
// Device table
// ============================================================================

/// Open devices by id, without keeping them alive
#[derive(Debug, Default)]
pub(crate) struct DeviceTable {
    slots: HashMap<u32, Weak<DeviceInner>>,
}

impl DeviceTable {
    /// Lowest id not in use; never 0
    fn free_id(&self) -> u32 {
        (1..).find(|id| !self.slots.contains_key(id)).unwrap_or(u32::MAX)
    }

    pub(crate) fn get(&self, id: u32) -> Option<AudioDevice> {
        self.slots
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|inner| AudioDevice { inner })
    }

    /// Handles to every live device, lowest id first
    pub(crate) fn live(&self) -> Vec<AudioDevice> {
        let mut ids: Vec<u32> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn remove(&mut self, id: u32, inner: *const DeviceInner) {
        if let Some(slot) = self.slots.get(&id) {
            if std::ptr::eq(slot.as_ptr(), inner) {
                self.slots.remove(&id);
            }
        }
    }
}

pub(crate) type SharedTable = Arc<Mutex<DeviceTable>>;

// ============================================================================
// Device state
// ============================================================================

/// State the device thread reads and writes under the device lock
struct DeviceState {
    callback: Option<AudioCallback>,
    queue: DataQueue,
}

/// Shared between the handle side and the device thread
struct Shared {
    lock: ReentrantMutex<RefCell<DeviceState>>,
    paused: AtomicBool,
    closed: AtomicBool,
}

pub(crate) struct DeviceInner {
    id: u32,
    is_capture: bool,
    has_callback: bool,
    spec: AudioSpec,
    name: String,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    table: Weak<Mutex<DeviceTable>>,
}

impl DeviceInner {
    fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("closing audio device {} ('{}')", self.id, self.name);

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // closed from inside the callback; the loop exits on its own
                log::debug!("audio device {} closed from its own thread", self.id);
            } else if handle.join().is_err() {
                log::warn!("audio device {} thread panicked", self.id);
            }
        }

        {
            let guard = self.shared.lock.lock();
            // busy when the last handle is dropped inside the callback;
            // the thread then drops the callback as it exits
            if let Ok(mut state) = guard.try_borrow_mut() {
                state.callback = None;
                state.queue.clear();
            };
        }

        if let Some(table) = self.table.upgrade() {
            table.lock().remove(self.id, self as *const DeviceInner);
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to an open device. Clones share the device.
#[derive(Clone)]
pub struct AudioDevice {
    inner: Arc<DeviceInner>,
}

/// Holds the device lock; the device thread is blocked while it lives
pub struct DeviceLockGuard<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<DeviceState>>,
}

impl fmt::Debug for DeviceLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceLockGuard")
    }
}

impl AudioDevice {
    /// Open `info` on `backend` with an already negotiated spec
    pub(crate) fn open(
        backend: &Arc<dyn AudioBackend>,
        info: &DeviceInfo,
        spec: AudioSpec,
        callback: Option<AudioCallback>,
        table: &SharedTable,
    ) -> Result<AudioDevice> {
        let mut hw = backend.open(info, &spec)?;

        let has_callback = callback.is_some();
        let shared = Arc::new(Shared {
            lock: ReentrantMutex::new(RefCell::new(DeviceState {
                callback,
                queue: DataQueue::new(),
            })),
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });

        let device = {
            let mut slots = table.lock();
            let id = slots.free_id();
            let inner = Arc::new(DeviceInner {
                id,
                is_capture: info.is_capture,
                has_callback,
                spec,
                name: info.name.clone(),
                shared: Arc::clone(&shared),
                thread: Mutex::new(None),
                table: Arc::downgrade(table),
            });
            slots.slots.insert(id, Arc::downgrade(&inner));
            AudioDevice { inner }
        };

        let id = device.inner.id;
        let is_capture = info.is_capture;
        let thread_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("audiodev-{}", id))
            .spawn(move || {
                log::debug!("audio device {} thread started", id);
                if is_capture {
                    run_capture(&thread_shared, hw.as_mut(), &spec);
                } else {
                    run_playback(&thread_shared, hw.as_mut(), &spec);
                }
                hw.close();
                log::debug!("audio device {} thread stopped", id);
            });

        match spawned {
            Ok(handle) => {
                *device.inner.thread.lock() = Some(handle);
            }
            Err(e) => {
                // dropping the handle unregisters the id
                return Err(AudioError::Backend(format!("spawning device thread: {}", e)));
            }
        }

        log::debug!(
            "opened {} device {} ('{}'): {}",
            direction(is_capture),
            id,
            info.name,
            spec
        );
        Ok(device)
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.shared.closed.load(Ordering::Acquire) {
            Err(AudioError::DeviceClosed(self.inner.id))
        } else {
            Ok(())
        }
    }

    /// Non-zero device id, unique among open devices
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn is_capture(&self) -> bool {
        self.inner.is_capture
    }

    /// Name of the underlying device
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The obtained spec
    pub fn spec(&self) -> AudioSpec {
        self.inner.spec
    }

    pub fn status(&self) -> AudioStatus {
        if self.inner.shared.closed.load(Ordering::Acquire) {
            AudioStatus::Stopped
        } else if self.inner.shared.paused.load(Ordering::Acquire) {
            AudioStatus::Paused
        } else {
            AudioStatus::Playing
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::Acquire)
    }

    /// Pause or resume. Waits for a running callback to return.
    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.check_open()?;
        let _guard = self.inner.shared.lock.lock();
        let was = self.inner.shared.paused.swap(paused, Ordering::AcqRel);
        if was != paused {
            log::debug!(
                "audio device {} {}",
                self.inner.id,
                if paused { "paused" } else { "unpaused" }
            );
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.set_paused(true)
    }

    pub fn unpause(&self) -> Result<()> {
        self.set_paused(false)
    }

    /// Append PCM bytes in the obtained format to the playback queue
    pub fn queue_audio(&self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.inner.is_capture {
            return Err(AudioError::WrongDirection("capture"));
        }
        if self.inner.has_callback {
            return Err(AudioError::CallbackDevice);
        }
        let frame = self.inner.spec.frame_size();
        if data.len() % frame != 0 {
            return Err(AudioError::InvalidLength {
                len: data.len(),
                frame,
            });
        }
        self.with_state(|state| state.queue.push(data))
    }

    /// Take up to `buf.len()` captured bytes; never blocks
    pub fn dequeue_audio(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if !self.inner.is_capture {
            return Err(AudioError::WrongDirection("playback"));
        }
        if self.inner.has_callback {
            return Err(AudioError::CallbackDevice);
        }
        self.with_state(|state| state.queue.pull(buf))
    }

    /// Bytes waiting to be played, or captured bytes waiting to be dequeued
    pub fn queued_audio_size(&self) -> Result<usize> {
        self.check_open()?;
        if self.inner.has_callback {
            return Ok(0);
        }
        self.with_state(|state| state.queue.len())
    }

    /// Drop everything in the queue
    pub fn clear_queued_audio(&self) -> Result<()> {
        self.check_open()?;
        if self.inner.has_callback {
            return Ok(());
        }
        self.with_state(|state| state.queue.clear())
    }

    /// Block the device thread until the guard is dropped.
    ///
    /// The lock is reentrant, so other methods of this device may be
    /// called while holding it. A callback must not call the queue
    /// methods of its own device.
    pub fn lock(&self) -> Result<DeviceLockGuard<'_>> {
        self.check_open()?;
        Ok(DeviceLockGuard {
            _guard: self.inner.shared.lock.lock(),
        })
    }

    /// Stop the device thread and release the device. Idempotent.
    ///
    /// Must not be called while a [`DeviceLockGuard`] of this device is held.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// True if both handles refer to the same open device
    pub fn ptr_eq(&self, other: &AudioDevice) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` on the device state; fails when called from inside the
    /// device's own callback
    fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> Result<R> {
        let guard = self.inner.shared.lock.lock();
        let result = match guard.try_borrow_mut() {
            Ok(mut state) => Ok(f(&mut state)),
            Err(_) => Err(AudioError::DeviceBusy(self.inner.id)),
        };
        result
    }
}

impl fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDevice")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("capture", &self.inner.is_capture)
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// Device thread
// ============================================================================

fn borrow_state<'a>(guard: &'a ReentrantMutexGuard<'_, RefCell<DeviceState>>) -> Option<RefMut<'a, DeviceState>> {
    // a callback that reenters the device while the loop holds the state
    // would otherwise panic on the second borrow
    guard.try_borrow_mut().ok()
}

fn run_playback(shared: &Shared, hw: &mut dyn BackendDevice, spec: &AudioSpec) {
    let mut buf = vec![0u8; spec.size as usize];
    while !shared.closed.load(Ordering::Acquire) {
        {
            let guard = shared.lock.lock();
            spec.format.fill_silence(&mut buf);
            if !shared.paused.load(Ordering::Acquire) {
                if let Some(mut state) = borrow_state(&guard) {
                    match state.callback.as_mut() {
                        Some(callback) => callback(&mut buf),
                        None => {
                            let n = state.queue.pull(&mut buf);
                            if n > 0 {
                                log::trace!("played {} queued bytes", n);
                            }
                            spec.format.fill_silence(&mut buf[n..]);
                        }
                    }
                }
            }
        }

        if let Err(e) = hw.play(&buf) {
            log::warn!("playback stopped: {}", e);
            break;
        }
    }
}

fn run_capture(shared: &Shared, hw: &mut dyn BackendDevice, spec: &AudioSpec) {
    let mut buf = vec![0u8; spec.size as usize];
    while !shared.closed.load(Ordering::Acquire) {
        let n = match hw.capture(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("capture stopped: {}", e);
                break;
            }
        };
        if n == 0 {
            continue;
        }

        let guard = shared.lock.lock();
        if shared.paused.load(Ordering::Acquire) {
            continue;
        }
        if let Some(mut state) = borrow_state(&guard) {
            match state.callback.as_mut() {
                Some(callback) => callback(&mut buf[..n]),
                None => state.queue.push(&buf[..n]),
            }
        };
    }
}
