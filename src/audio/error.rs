// error.rs - Error type for the audio core

//! Uniform error type returned by every fallible audio operation.
//!
//! Backend failures are translated into [`AudioError::Backend`] at the
//! boundary; nothing in this crate retries on the caller's behalf.

use thiserror::Error;

/// Audio error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// No audio driver is active
    #[error("Audio subsystem not initialized")]
    NotInitialized,

    /// The requested driver is not compiled in or failed to start
    #[error("Unknown audio driver: {0}")]
    UnknownDriver(String),

    /// No device with this name on the active driver
    #[error("No such audio device: {0}")]
    DeviceNotFound(String),

    /// Operation on a device that has already been closed
    #[error("Audio device {0} is closed")]
    DeviceClosed(u32),

    /// Malformed specification or parameter
    #[error("Invalid audio spec: {0}")]
    InvalidSpec(String),

    /// The desired spec cannot be met under the allowed-changes mask
    #[error("Cannot negotiate {axis}: wanted {desired}, device supports {supported}")]
    Negotiation {
        axis: &'static str,
        desired: String,
        supported: String,
    },

    /// No conversion path between the two formats/layouts
    #[error("Unsupported conversion: {0}")]
    UnsupportedConversion(String),

    /// Buffer length is not a whole number of frames
    #[error("Buffer length {len} is not a multiple of the frame size {frame}")]
    InvalidLength { len: usize, frame: usize },

    /// Queue/dequeue used on a device of the wrong direction
    #[error("Operation not valid on a {0} device")]
    WrongDirection(&'static str),

    /// Queueing is not allowed when a callback drives the device
    #[error("Audio device has a callback, queueing not allowed")]
    CallbackDevice,

    /// Device state re-entered from inside its own callback
    #[error("Audio device {0} is busy in its callback")]
    DeviceBusy(u32),

    /// Failure reported by the platform backend
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// Malformed WAV data
    #[error("WAV error: {0}")]
    Wav(String),
}

/// Result type for audio operations
pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AudioError::NotInitialized.to_string(),
            "Audio subsystem not initialized"
        );
        assert_eq!(
            AudioError::DeviceClosed(3).to_string(),
            "Audio device 3 is closed"
        );

        let err = AudioError::Negotiation {
            axis: "frequency",
            desired: "44100".to_string(),
            supported: "[48000]".to_string(),
        };
        assert!(err.to_string().contains("frequency"));
        assert!(err.to_string().contains("44100"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AudioError>();
    }
}
