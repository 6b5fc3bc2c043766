// wav.rs - RIFF WAVE loading and writing

//! WAV (RIFF WAVE) loading.
//!
//! Supports:
//! - PCM (format 1) 8, 16 and 32-bit
//! - IEEE float (format 3) 32-bit
//! - WAVE_FORMAT_EXTENSIBLE wrapping either of the above
//! - 1 to 8 channels, any sample rate
//!
//! 8-bit data is unsigned; everything else is little-endian and signed.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use super::error::{AudioError, Result};
use super::format::AudioFormat;
use super::spec::{AudioSpec, MAX_CHANNELS};

// little-endian chunk ids
const RIFF_ID: u32 = 0x46464952; // "RIFF"
const WAVE_ID: u32 = 0x45564157; // "WAVE"
const FMT_ID: u32 = 0x20746d66; // "fmt "
const DATA_ID: u32 = 0x61746164; // "data"

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Buffer size reported in the spec of a loaded file
pub const WAV_SAMPLES: u16 = 4096;

#[derive(Debug, Default)]
struct FormatChunk {
    tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn wav_err(msg: impl Into<String>) -> AudioError {
    AudioError::Wav(msg.into())
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| wav_err(format!("truncated header: {}", e)))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| wav_err(format!("truncated header: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

fn skip(cursor: &mut Cursor<&[u8]>, bytes: u64) -> Result<()> {
    cursor
        .seek(SeekFrom::Current(bytes as i64))
        .map_err(|e| wav_err(format!("failed to skip chunk: {}", e)))?;
    Ok(())
}

fn parse_format(cursor: &mut Cursor<&[u8]>, size: u32) -> Result<FormatChunk> {
    if size < 16 {
        return Err(wav_err("format chunk too small"));
    }

    let mut tag = read_u16(cursor)?;
    let channels = read_u16(cursor)?;
    let sample_rate = read_u32(cursor)?;
    let _byte_rate = read_u32(cursor)?;
    let _block_align = read_u16(cursor)?;
    let bits_per_sample = read_u16(cursor)?;
    let mut consumed = 16u32;

    if tag == WAVE_FORMAT_EXTENSIBLE && size >= 40 {
        let _cb_size = read_u16(cursor)?;
        let _valid_bits = read_u16(cursor)?;
        let _channel_mask = read_u32(cursor)?;
        // first two bytes of the sub-format GUID carry the real tag
        tag = read_u16(cursor)?;
        consumed += 10;
    }

    skip(cursor, (size - consumed) as u64)?;

    Ok(FormatChunk {
        tag,
        channels,
        sample_rate,
        bits_per_sample,
    })
}

fn audio_format(fmt: &FormatChunk) -> Result<AudioFormat> {
    match (fmt.tag, fmt.bits_per_sample) {
        (WAVE_FORMAT_PCM, 8) => Ok(AudioFormat::U8),
        (WAVE_FORMAT_PCM, 16) => Ok(AudioFormat::S16LSB),
        (WAVE_FORMAT_PCM, 32) => Ok(AudioFormat::S32LSB),
        (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(AudioFormat::F32LSB),
        (WAVE_FORMAT_PCM | WAVE_FORMAT_IEEE_FLOAT, bits) => {
            Err(wav_err(format!("unsupported bits per sample: {}", bits)))
        }
        (tag, _) => Err(wav_err(format!("unsupported WAV format: {:#x}", tag))),
    }
}

/// Parse an in-memory WAV file into its spec and raw sample bytes
pub fn load_wav(data: &[u8]) -> Result<(AudioSpec, Vec<u8>)> {
    let mut cursor = Cursor::new(data);

    if read_u32(&mut cursor)? != RIFF_ID {
        return Err(wav_err("not a RIFF file"));
    }
    let _riff_size = read_u32(&mut cursor)?;
    if read_u32(&mut cursor)? != WAVE_ID {
        return Err(wav_err("not a WAVE file"));
    }

    let mut fmt: Option<FormatChunk> = None;
    let mut samples: Option<&[u8]> = None;

    while (cursor.position() as usize) + 8 <= data.len() {
        let id = read_u32(&mut cursor)?;
        let size = read_u32(&mut cursor)?;
        // chunks are padded to an even length
        let padded = size as u64 + (size as u64 & 1);

        match id {
            FMT_ID => fmt = Some(parse_format(&mut cursor, size)?),
            DATA_ID => {
                let start = cursor.position() as usize;
                let end = start.saturating_add(size as usize).min(data.len());
                samples = Some(&data[start..end]);
                break;
            }
            _ => skip(&mut cursor, padded)?,
        }
        if id == FMT_ID && size & 1 == 1 {
            skip(&mut cursor, 1)?;
        }
    }

    let fmt = fmt.ok_or_else(|| wav_err("no format chunk found"))?;
    let samples = samples.ok_or_else(|| wav_err("no data chunk found"))?;

    if fmt.channels == 0 || fmt.channels > MAX_CHANNELS as u16 {
        return Err(wav_err(format!("unsupported channel count: {}", fmt.channels)));
    }
    if fmt.sample_rate == 0 {
        return Err(wav_err("sample rate is zero"));
    }
    let format = audio_format(&fmt)?;

    let spec = AudioSpec::new(fmt.sample_rate, format, fmt.channels as u8, WAV_SAMPLES);
    let frame = spec.frame_size();
    let whole = samples.len() - samples.len() % frame;
    if whole != samples.len() {
        log::debug!("WAV data ends in a partial frame, dropping {} bytes", samples.len() - whole);
    }

    Ok((spec, samples[..whole].to_vec()))
}

/// Load a WAV file from disk
pub fn load_wav_file(path: impl AsRef<Path>) -> Result<(AudioSpec, Vec<u8>)> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| wav_err(format!("{}: {}", path.display(), e)))?;
    load_wav(&data)
}

/// Serialize samples in `spec`'s format as a WAV file.
///
/// Formats WAV cannot hold natively are converted first: signed 8-bit
/// to unsigned and big-endian or unsigned 16-bit to S16LSB.
pub fn write_wav(spec: &AudioSpec, data: &[u8]) -> Result<Vec<u8>> {
    let target = match spec.format {
        AudioFormat::U8 | AudioFormat::S8 => AudioFormat::U8,
        f if f.bit_size() == 16 => AudioFormat::S16LSB,
        f if f.is_float() => AudioFormat::F32LSB,
        _ => AudioFormat::S32LSB,
    };
    let samples = if target == spec.format {
        data.to_vec()
    } else {
        super::convert::AudioCvt::build(
            spec.format,
            spec.channels,
            spec.freq,
            target,
            spec.channels,
            spec.freq,
        )?
        .convert(data)?
    };

    let tag = if target.is_float() {
        WAVE_FORMAT_IEEE_FLOAT
    } else {
        WAVE_FORMAT_PCM
    };
    let channels = spec.channels as u16;
    let bits = target.bit_size() as u16;
    let block_align = channels * bits / 8;
    let byte_rate = spec.freq * block_align as u32;

    let mut out = Vec::with_capacity(44 + samples.len() + 1);
    out.extend_from_slice(&RIFF_ID.to_le_bytes());
    out.extend_from_slice(&((36 + samples.len() + samples.len() % 2) as u32).to_le_bytes());
    out.extend_from_slice(&WAVE_ID.to_le_bytes());

    out.extend_from_slice(&FMT_ID.to_le_bytes());
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&spec.freq.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());

    out.extend_from_slice(&DATA_ID.to_le_bytes());
    out.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    out.extend_from_slice(&samples);
    if samples.len() % 2 == 1 {
        out.push(0);
    }
    Ok(out)
}
