use anyhow::{Context, Result};

use crate::audio::{AudioFormat, AudioSpec};
use crate::logging::LogLevel;

pub const ENV_DRIVER: &str = "AUDIODEV_DRIVER";
pub const ENV_DEVICE: &str = "AUDIODEV_DEVICE";
pub const ENV_FREQUENCY: &str = "AUDIODEV_FREQUENCY";
pub const ENV_FORMAT: &str = "AUDIODEV_FORMAT";
pub const ENV_CHANNELS: &str = "AUDIODEV_CHANNELS";
pub const ENV_SAMPLES: &str = "AUDIODEV_SAMPLES";
pub const ENV_LOG: &str = "AUDIODEV_LOG";

pub const DEFAULT_FREQUENCY: u32 = 48000;
pub const DEFAULT_CHANNELS: u8 = 2;
pub const DEFAULT_SAMPLES: u16 = 1024;

/// Device settings that can be set via environment or command line
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub driver: Option<String>,
    pub device: Option<String>,
    pub frequency: u32,
    pub format: AudioFormat,
    pub channels: u8,
    pub samples: u16,
    pub log_level: LogLevel,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            driver: None,
            device: None,
            frequency: DEFAULT_FREQUENCY,
            format: AudioFormat::S16SYS,
            channels: DEFAULT_CHANNELS,
            samples: DEFAULT_SAMPLES,
            log_level: LogLevel::Warning,
        }
    }
}

impl AudioConfig {
    /// Defaults overridden by the `AUDIODEV_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.driver = get(ENV_DRIVER);
        config.device = get(ENV_DEVICE);
        if let Some(v) = get(ENV_FREQUENCY) {
            config.frequency = parse_frequency(&v).with_context(|| format!("{}={}", ENV_FREQUENCY, v))?;
        }
        if let Some(v) = get(ENV_FORMAT) {
            config.format = parse_format(&v).with_context(|| format!("{}={}", ENV_FORMAT, v))?;
        }
        if let Some(v) = get(ENV_CHANNELS) {
            config.channels = parse_channels(&v).with_context(|| format!("{}={}", ENV_CHANNELS, v))?;
        }
        if let Some(v) = get(ENV_SAMPLES) {
            config.samples = parse_samples(&v).with_context(|| format!("{}={}", ENV_SAMPLES, v))?;
        }
        if let Some(v) = get(ENV_LOG) {
            config.log_level = v.parse().with_context(|| format!("{}={}", ENV_LOG, v))?;
        }
        Ok(config)
    }

    /// Spec to request when opening a device
    pub fn desired_spec(&self) -> AudioSpec {
        AudioSpec::new(self.frequency, self.format, self.channels, self.samples)
    }
}

/// Parse a sample rate in Hz
pub fn parse_frequency(s: &str) -> Result<u32> {
    let freq: u32 = s.trim().parse().context("Invalid frequency value")?;
    if freq == 0 {
        anyhow::bail!("Frequency must be positive");
    }
    Ok(freq)
}

/// Parse a channel count (1-8)
pub fn parse_channels(s: &str) -> Result<u8> {
    let channels: u8 = s.trim().parse().context("Invalid channel count")?;
    if !(1..=crate::audio::spec::MAX_CHANNELS).contains(&channels) {
        anyhow::bail!("Channel count must be between 1 and 8");
    }
    Ok(channels)
}

/// Parse a buffer size in sample frames: a power of two from 64 to 32768
pub fn parse_samples(s: &str) -> Result<u16> {
    let samples: u16 = s.trim().parse().context("Invalid sample count")?;
    if !(64..=32768).contains(&samples) || !samples.is_power_of_two() {
        anyhow::bail!("Sample count must be a power of two between 64 and 32768");
    }
    Ok(samples)
}

/// Parse a sample format name such as `s16le` or `f32`
pub fn parse_format(s: &str) -> Result<AudioFormat> {
    s.parse::<AudioFormat>().context("Invalid sample format")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.frequency, 48000);
        assert_eq!(config.format, AudioFormat::S16SYS);
        assert_eq!(config.channels, 2);
        assert_eq!(config.samples, 1024);
        assert!(config.driver.is_none());

        let spec = config.desired_spec();
        assert_eq!(spec.size, 1024 * 2 * 2);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = AudioConfig::from_lookup(lookup(&[
            (ENV_DRIVER, "loopback"),
            (ENV_FREQUENCY, "44100"),
            (ENV_FORMAT, "f32le"),
            (ENV_CHANNELS, "6"),
            (ENV_SAMPLES, "512"),
            (ENV_LOG, "debug"),
        ]))
        .unwrap();
        assert_eq!(config.driver.as_deref(), Some("loopback"));
        assert_eq!(config.device, None);
        assert_eq!(config.frequency, 44100);
        assert_eq!(config.format, AudioFormat::F32LSB);
        assert_eq!(config.channels, 6);
        assert_eq!(config.samples, 512);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_from_lookup_empty_is_unset() {
        let config = AudioConfig::from_lookup(lookup(&[(ENV_DRIVER, ""), (ENV_SAMPLES, " ")])).unwrap();
        assert_eq!(config, AudioConfig::default());
    }

    #[test]
    fn test_from_lookup_reports_variable() {
        let err = AudioConfig::from_lookup(lookup(&[(ENV_CHANNELS, "9")])).unwrap_err();
        assert!(format!("{:#}", err).contains("AUDIODEV_CHANNELS=9"));
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency("22050").unwrap(), 22050);
        assert!(parse_frequency("0").is_err());
        assert!(parse_frequency("fast").is_err());
    }

    #[test]
    fn test_parse_channels() {
        assert_eq!(parse_channels("1").unwrap(), 1);
        assert_eq!(parse_channels("8").unwrap(), 8);
        assert!(parse_channels("0").is_err());
        assert!(parse_channels("9").is_err());
    }

    #[test]
    fn test_parse_samples() {
        assert_eq!(parse_samples("64").unwrap(), 64);
        assert_eq!(parse_samples("32768").unwrap(), 32768);
        assert!(parse_samples("32").is_err());
        assert!(parse_samples("1000").is_err());
        assert!(parse_samples("65536").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("u8").unwrap(), AudioFormat::U8);
        assert_eq!(parse_format("s16be").unwrap(), AudioFormat::S16MSB);
        assert!(parse_format("s24").is_err());
    }
}
