// audiodev library
// Audio devices, format conversion and mixing

pub mod audio;
pub mod cli;
pub mod config;
pub mod logging;
pub mod mixer;

pub use audio::{AudioDevice, AudioError, AudioFormat, AudioSpec, AudioStream, AudioSubsystem};
pub use config::AudioConfig;
pub use logging::LogLevel;
pub use mixer::Mixer;
