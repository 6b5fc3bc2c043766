// mod.rs - Audio module root

//! Audio devices and format conversion.
//!
//! - [`format`], [`spec`] - sample formats and device specifications
//! - [`convert`], [`resample`], [`stream`] - one-shot and streaming conversion
//! - [`backend`], [`registry`], [`device`], [`subsystem`] - drivers and devices
//! - [`wav`] - WAV files
//! - [`ffi`] - C bindings

pub mod backend;
pub mod convert;
pub mod device;
pub mod error;
pub mod ffi;
pub mod format;
pub mod queue;
pub mod registry;
pub mod resample;
pub mod spec;
pub mod stream;
pub mod subsystem;
pub mod wav;

pub use backend::{available_backends, DeviceCaps, DeviceInfo};
pub use convert::AudioCvt;
pub use device::{AudioDevice, DeviceLockGuard};
pub use error::{AudioError, Result};
pub use format::AudioFormat;
pub use spec::{AllowedChanges, AudioCallback, AudioSpec, AudioStatus, DesiredSpec};
pub use stream::AudioStream;
pub use subsystem::AudioSubsystem;
pub use wav::{load_wav, load_wav_file, write_wav};
