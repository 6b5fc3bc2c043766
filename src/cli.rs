use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::audio::backend::loopback;
use crate::audio::convert;
use crate::audio::{
    available_backends, load_wav_file, write_wav, AllowedChanges, AudioFormat, AudioSpec, AudioStream,
    AudioSubsystem, DesiredSpec,
};
use crate::config::{parse_channels, parse_format, parse_frequency, parse_samples, AudioConfig};
use crate::logging::LogLevel;

/// Audio device and format conversion toolbox
#[derive(Parser, Debug)]
#[command(name = "audiodev-cli")]
#[command(version)]
#[command(about = "Inspect audio drivers, play test tones and convert WAV files", long_about = None)]
pub struct Cli {
    /// More logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Audio driver (dummy, loopback, cpal)
    #[arg(short, long, value_name = "DRIVER", global = true)]
    pub driver: Option<String>,

    /// Device name; the default device when omitted
    #[arg(long, value_name = "NAME", global = true)]
    pub device: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List compiled audio drivers
    Drivers,

    /// List the devices of a driver
    Devices {
        /// List capture devices instead of playback devices
        #[arg(short, long)]
        capture: bool,
    },

    /// Play a sine tone
    Tone {
        /// Tone pitch in Hz
        #[arg(long, value_name = "HZ", default_value_t = 440.0)]
        freq: f32,

        /// Duration in seconds
        #[arg(long, value_name = "S", default_value_t = 1.0)]
        seconds: f32,

        /// Device sample rate
        #[arg(long, value_name = "HZ")]
        rate: Option<String>,

        /// Device buffer size in sample frames
        #[arg(long, value_name = "FRAMES")]
        samples: Option<String>,
    },

    /// Convert a WAV file
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// Output sample rate
        #[arg(long, value_name = "HZ")]
        rate: Option<String>,

        /// Output channel count
        #[arg(long, value_name = "N")]
        channels: Option<String>,

        /// Output sample format (u8, s16le, f32le, ...)
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,
    },

    /// Play a pattern through the loopback driver and check it is captured in order
    Loopback {
        /// Pattern length in bytes
        #[arg(long, value_name = "BYTES", default_value_t = 4096)]
        bytes: usize,
    },
}

impl Cli {
    /// Apply command line options on top of `config`
    pub fn merge_into_config(&self, mut config: AudioConfig) -> Result<AudioConfig> {
        if let Some(driver) = &self.driver {
            config.driver = Some(driver.clone());
        }
        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }
        if self.verbose > 0 {
            config.log_level = config.log_level.max(LogLevel::from_verbosity(self.verbose));
        }
        if let Command::Tone { rate, samples, .. } = &self.command {
            if let Some(rate) = rate {
                config.frequency = parse_frequency(rate)?;
            }
            if let Some(samples) = samples {
                config.samples = parse_samples(samples)?;
            }
        }
        Ok(config)
    }

    pub fn run(&self, config: &AudioConfig) -> Result<()> {
        match &self.command {
            Command::Drivers => list_drivers(),
            Command::Devices { capture } => list_devices(config, *capture),
            Command::Tone { freq, seconds, .. } => play_tone(config, *freq, *seconds),
            Command::Convert {
                input,
                output,
                rate,
                channels,
                format,
            } => convert_file(input, output, rate.as_deref(), channels.as_deref(), format.as_deref()),
            Command::Loopback { bytes } => check_loopback(*bytes),
        }
    }
}

fn start(config: &AudioConfig) -> Result<AudioSubsystem> {
    let audio = AudioSubsystem::new();
    audio
        .init(config.driver.as_deref())
        .context("Failed to start audio driver")?;
    Ok(audio)
}

fn list_drivers() -> Result<()> {
    for name in available_backends() {
        let status = match AudioSubsystem::with_driver(name) {
            Ok(_) => "available",
            Err(_) => "unavailable",
        };
        println!("{:<10} {}", name, status);
    }
    Ok(())
}

fn list_devices(config: &AudioConfig, capture: bool) -> Result<()> {
    let audio = start(config)?;
    let default = audio.default_device(capture).ok().map(|(name, _)| name);
    for info in audio.devices(capture)? {
        let marker = if Some(&info.name) == default.as_ref() { "*" } else { " " };
        println!("{} {}  [{}]", marker, info.name, info.spec);
    }
    Ok(())
}

fn play_tone(config: &AudioConfig, pitch: f32, seconds: f32) -> Result<()> {
    if !(pitch > 0.0 && seconds > 0.0) {
        anyhow::bail!("Tone pitch and duration must be positive");
    }
    let audio = start(config)?;
    let desired = DesiredSpec::new(config.desired_spec());
    let (device, spec) = audio
        .open_device(config.device.as_deref(), false, desired, AllowedChanges::ANY)
        .context("Failed to open playback device")?;
    log::info!("playing {} Hz for {} s on '{}' ({})", pitch, seconds, device.name(), spec);

    let frames = (seconds * spec.freq as f32) as usize;
    let channels = spec.channels as usize;
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = i as f32 / spec.freq as f32;
        let v = (t * pitch * std::f32::consts::TAU).sin() * 0.25;
        samples.extend(std::iter::repeat(v).take(channels));
    }
    let mut pcm = Vec::new();
    convert::encode(spec.format, &samples, &mut pcm);

    device.queue_audio(&pcm)?;
    device.unpause()?;

    let deadline = Instant::now() + Duration::from_secs_f32(seconds) + Duration::from_secs(2);
    while device.queued_audio_size()? > 0 {
        if Instant::now() > deadline {
            anyhow::bail!("Device stopped consuming audio");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(spec.buffer_duration());
    device.close();
    Ok(())
}

fn convert_file(
    input: &Path,
    output: &Path,
    rate: Option<&str>,
    channels: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    let (src, pcm) =
        load_wav_file(input).with_context(|| format!("Failed to load {}", input.display()))?;

    let dst_rate = rate.map(parse_frequency).transpose()?.unwrap_or(src.freq);
    let dst_channels = channels.map(parse_channels).transpose()?.unwrap_or(src.channels);
    let dst_format = format.map(parse_format).transpose()?.unwrap_or(src.format);
    let dst = AudioSpec::new(dst_rate, dst_format, dst_channels, src.samples);

    let mut stream = AudioStream::from_specs(&src, &dst).context("Unsupported conversion")?;
    let mut converted = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    for piece in pcm.chunks(src.size as usize) {
        stream.put(piece)?;
        while stream.available() > 0 {
            let n = stream.get(&mut buf);
            converted.extend_from_slice(&buf[..n]);
        }
    }
    stream.flush()?;
    while stream.available() > 0 {
        let n = stream.get(&mut buf);
        converted.extend_from_slice(&buf[..n]);
    }

    let wav = write_wav(&dst, &converted)?;
    std::fs::write(output, wav).with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "{}: {} -> {}: {} ({} bytes)",
        input.display(),
        src,
        output.display(),
        dst,
        converted.len()
    );
    Ok(())
}

/// Pattern bytes never equal the U8 silence value
fn loopback_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 127) as u8 + 1).collect()
}

fn check_loopback(len: usize) -> Result<()> {
    let audio = AudioSubsystem::with_driver(loopback::NAME)?;
    let spec = AudioSpec::new(48000, AudioFormat::U8, 1, 256);
    let silence = spec.silence;

    let (input, _) = audio.open_device(None, true, spec.into(), AllowedChanges::NONE)?;
    input.unpause()?;
    let (output, _) = audio.open_device(None, false, spec.into(), AllowedChanges::NONE)?;

    let pattern = loopback_pattern(len);
    output.queue_audio(&pattern)?;
    output.unpause()?;

    let mut heard = Vec::with_capacity(len);
    let mut buf = vec![0u8; spec.size as usize];
    let deadline = Instant::now() + Duration::from_secs(10);
    while heard.len() < len && Instant::now() < deadline {
        let n = input.dequeue_audio(&mut buf)?;
        heard.extend(buf[..n].iter().copied().filter(|b| *b != silence));
        if n == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    output.close();
    input.close();

    if heard != pattern {
        anyhow::bail!("Loopback mismatch: sent {} bytes, captured {}", pattern.len(), heard.len());
    }
    println!("loopback: {} bytes captured in order", len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["audiodev-cli", "-vv", "devices", "--capture"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Devices { capture: true }));

        let cli = Cli::try_parse_from(["audiodev-cli", "tone", "--freq", "880", "--driver", "dummy"]).unwrap();
        assert_eq!(cli.driver.as_deref(), Some("dummy"));
        match cli.command {
            Command::Tone { freq, seconds, .. } => {
                assert_eq!(freq, 880.0);
                assert_eq!(seconds, 1.0);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["audiodev-cli"]).is_err());
        assert!(Cli::try_parse_from(["audiodev-cli", "convert", "in.wav"]).is_err());
    }

    #[test]
    fn test_merge_into_config() {
        let cli = Cli::try_parse_from([
            "audiodev-cli",
            "-v",
            "--driver",
            "loopback",
            "tone",
            "--rate",
            "22050",
            "--samples",
            "256",
        ])
        .unwrap();
        let config = cli.merge_into_config(AudioConfig::default()).unwrap();
        assert_eq!(config.driver.as_deref(), Some("loopback"));
        assert_eq!(config.frequency, 22050);
        assert_eq!(config.samples, 256);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_merge_rejects_bad_samples() {
        let cli = Cli::try_parse_from(["audiodev-cli", "tone", "--samples", "100"]).unwrap();
        assert!(cli.merge_into_config(AudioConfig::default()).is_err());
    }

    #[test]
    fn test_loopback_pattern_avoids_silence() {
        let pattern = loopback_pattern(1000);
        assert!(pattern.iter().all(|b| *b != 0x80 && *b != 0));
    }

    #[test]
    fn test_tone_on_dummy() {
        let config = AudioConfig {
            driver: Some("dummy".into()),
            samples: 256,
            ..AudioConfig::default()
        };
        play_tone(&config, 440.0, 0.05).unwrap();
    }

    #[test]
    fn test_convert_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        let spec = AudioSpec::new(22050, AudioFormat::S16LSB, 1, 4096);
        let pcm: Vec<u8> = (0..2205i16).flat_map(|i| (i * 8).to_le_bytes()).collect();
        std::fs::write(&input, write_wav(&spec, &pcm).unwrap()).unwrap();

        convert_file(&input, &output, Some("44100"), Some("2"), Some("f32le")).unwrap();

        let (dst, data) = load_wav_file(&output).unwrap();
        assert_eq!(dst.freq, 44100);
        assert_eq!(dst.channels, 2);
        assert_eq!(dst.format, AudioFormat::F32LSB);
        let frames = data.len() / dst.frame_size();
        assert!((4400..=4420).contains(&frames), "{}", frames);
    }
}
