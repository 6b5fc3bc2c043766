// format.rs - PCM format descriptor and sample codec

//! PCM sample format descriptor.
//!
//! The format is an opaque 16-bit tag:
//! bits 0-7 = bits per sample, bit 8 = float, bit 12 = big endian,
//! bit 15 = signed. Only the well-known constants can be constructed.

use std::fmt;
use std::str::FromStr;

use super::error::AudioError;

const MASK_BITSIZE: u16 = 0xFF;
const MASK_DATATYPE: u16 = 1 << 8;
const MASK_ENDIAN: u16 = 1 << 12;
const MASK_SIGNED: u16 = 1 << 15;

/// PCM sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat(u16);

impl AudioFormat {
    /// Unsigned 8-bit
    pub const U8: AudioFormat = AudioFormat(0x0008);
    /// Signed 8-bit
    pub const S8: AudioFormat = AudioFormat(0x8008);
    /// Unsigned 16-bit little-endian
    pub const U16LSB: AudioFormat = AudioFormat(0x0010);
    /// Signed 16-bit little-endian
    pub const S16LSB: AudioFormat = AudioFormat(0x8010);
    /// Unsigned 16-bit big-endian
    pub const U16MSB: AudioFormat = AudioFormat(0x1010);
    /// Signed 16-bit big-endian
    pub const S16MSB: AudioFormat = AudioFormat(0x9010);
    /// Signed 32-bit little-endian
    pub const S32LSB: AudioFormat = AudioFormat(0x8020);
    /// Signed 32-bit big-endian
    pub const S32MSB: AudioFormat = AudioFormat(0x9020);
    /// 32-bit float little-endian
    pub const F32LSB: AudioFormat = AudioFormat(0x8120);
    /// 32-bit float big-endian
    pub const F32MSB: AudioFormat = AudioFormat(0x9120);

    #[cfg(target_endian = "little")]
    pub const U16SYS: AudioFormat = AudioFormat::U16LSB;
    #[cfg(target_endian = "little")]
    pub const S16SYS: AudioFormat = AudioFormat::S16LSB;
    #[cfg(target_endian = "little")]
    pub const S32SYS: AudioFormat = AudioFormat::S32LSB;
    #[cfg(target_endian = "little")]
    pub const F32SYS: AudioFormat = AudioFormat::F32LSB;

    #[cfg(target_endian = "big")]
    pub const U16SYS: AudioFormat = AudioFormat::U16MSB;
    #[cfg(target_endian = "big")]
    pub const S16SYS: AudioFormat = AudioFormat::S16MSB;
    #[cfg(target_endian = "big")]
    pub const S32SYS: AudioFormat = AudioFormat::S32MSB;
    #[cfg(target_endian = "big")]
    pub const F32SYS: AudioFormat = AudioFormat::F32MSB;

    /// Every constructible format
    pub const ALL: [AudioFormat; 10] = [
        AudioFormat::U8,
        AudioFormat::S8,
        AudioFormat::U16LSB,
        AudioFormat::S16LSB,
        AudioFormat::U16MSB,
        AudioFormat::S16MSB,
        AudioFormat::S32LSB,
        AudioFormat::S32MSB,
        AudioFormat::F32LSB,
        AudioFormat::F32MSB,
    ];

    /// Look up a well-known format by its raw tag
    pub fn from_raw(raw: u16) -> Option<AudioFormat> {
        Self::ALL.iter().copied().find(|f| f.0 == raw)
    }

    /// Raw 16-bit tag
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Bits per sample (8, 16 or 32)
    pub fn bit_size(self) -> u32 {
        (self.0 & MASK_BITSIZE) as u32
    }

    /// Bytes per sample
    pub fn bytes_per_sample(self) -> usize {
        (self.bit_size() / 8) as usize
    }

    pub fn is_float(self) -> bool {
        self.0 & MASK_DATATYPE != 0
    }

    pub fn is_int(self) -> bool {
        !self.is_float()
    }

    pub fn is_big_endian(self) -> bool {
        self.0 & MASK_ENDIAN != 0
    }

    pub fn is_little_endian(self) -> bool {
        !self.is_big_endian()
    }

    pub fn is_signed(self) -> bool {
        self.0 & MASK_SIGNED != 0
    }

    pub fn is_unsigned(self) -> bool {
        !self.is_signed()
    }

    /// True when the two formats differ only in byte order
    pub fn is_byte_swap_of(self, other: AudioFormat) -> bool {
        self.bit_size() > 8 && self.0 ^ other.0 == MASK_ENDIAN
    }

    /// Single-byte silence value (0x80 for U8, 0 otherwise)
    pub fn silence_byte(self) -> u8 {
        if self == AudioFormat::U8 {
            0x80
        } else {
            0
        }
    }

    /// Fill a buffer with the true mid-scale value of this format
    pub fn fill_silence(self, buf: &mut [u8]) {
        let width = self.bytes_per_sample();
        let mut pattern = [0u8; 4];
        self.write_sample(0.0, &mut pattern[..width]);

        let mut chunks = buf.chunks_exact_mut(width);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&pattern[..width]);
        }
        for byte in chunks.into_remainder() {
            *byte = self.silence_byte();
        }
    }

    /// Decode one sample into a normalized float.
    ///
    /// Integer samples of N bits map to `v / 2^(N-1)`, exact up to 16 bits.
    pub fn read_sample(self, b: &[u8]) -> f32 {
        match self.bit_size() {
            8 => {
                if self.is_signed() {
                    b[0] as i8 as f32 / 128.0
                } else {
                    (b[0] as f32 - 128.0) / 128.0
                }
            }
            16 => {
                let bytes = [b[0], b[1]];
                let raw = if self.is_big_endian() {
                    u16::from_be_bytes(bytes)
                } else {
                    u16::from_le_bytes(bytes)
                };
                if self.is_signed() {
                    raw as i16 as f32 / 32768.0
                } else {
                    (raw as f32 - 32768.0) / 32768.0
                }
            }
            _ => {
                let bytes = [b[0], b[1], b[2], b[3]];
                let raw = if self.is_big_endian() {
                    u32::from_be_bytes(bytes)
                } else {
                    u32::from_le_bytes(bytes)
                };
                if self.is_float() {
                    f32::from_bits(raw)
                } else {
                    (raw as i32 as f64 / 2_147_483_648.0) as f32
                }
            }
        }
    }

    /// Encode one normalized float sample.
    ///
    /// Integer targets round to nearest (ties away from zero) and clamp.
    pub fn write_sample(self, v: f32, out: &mut [u8]) {
        match self.bit_size() {
            8 => {
                let q = quantize(v, 8);
                out[0] = if self.is_signed() {
                    q as i8 as u8
                } else {
                    (q + 128) as u8
                };
            }
            16 => {
                let q = quantize(v, 16);
                let raw = if self.is_signed() {
                    q as i16 as u16
                } else {
                    (q + 32768) as u16
                };
                let bytes = if self.is_big_endian() {
                    raw.to_be_bytes()
                } else {
                    raw.to_le_bytes()
                };
                out[..2].copy_from_slice(&bytes);
            }
            _ => {
                let raw = if self.is_float() {
                    v.to_bits()
                } else {
                    quantize(v, 32) as i32 as u32
                };
                let bytes = if self.is_big_endian() {
                    raw.to_be_bytes()
                } else {
                    raw.to_le_bytes()
                };
                out[..4].copy_from_slice(&bytes);
            }
        }
    }

    /// Short canonical name, e.g. `s16le`
    pub fn name(self) -> &'static str {
        match self {
            AudioFormat::U8 => "u8",
            AudioFormat::S8 => "s8",
            AudioFormat::U16LSB => "u16le",
            AudioFormat::S16LSB => "s16le",
            AudioFormat::U16MSB => "u16be",
            AudioFormat::S16MSB => "s16be",
            AudioFormat::S32LSB => "s32le",
            AudioFormat::S32MSB => "s32be",
            AudioFormat::F32LSB => "f32le",
            _ => "f32be",
        }
    }
}

fn quantize(v: f32, bits: u32) -> i64 {
    let scale = (1i64 << (bits - 1)) as f64;
    let s = (v as f64 * scale).round();
    s.clamp(-scale, scale - 1.0) as i64
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioFormat {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let format = match lower.as_str() {
            "u16" => AudioFormat::U16SYS,
            "s16" => AudioFormat::S16SYS,
            "s32" => AudioFormat::S32SYS,
            "f32" => AudioFormat::F32SYS,
            name => AudioFormat::ALL
                .iter()
                .copied()
                .find(|f| f.name() == name)
                .ok_or_else(|| AudioError::InvalidSpec(format!("unknown sample format '{}'", s)))?,
        };
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AudioFormat::U8, 8, false, false, false)]
    #[case(AudioFormat::S8, 8, false, false, true)]
    #[case(AudioFormat::U16LSB, 16, false, false, false)]
    #[case(AudioFormat::S16MSB, 16, false, true, true)]
    #[case(AudioFormat::S32LSB, 32, false, false, true)]
    #[case(AudioFormat::F32MSB, 32, true, true, true)]
    fn test_format_bits(
        #[case] format: AudioFormat,
        #[case] bits: u32,
        #[case] float: bool,
        #[case] big: bool,
        #[case] signed: bool,
    ) {
        assert_eq!(format.bit_size(), bits);
        assert_eq!(format.is_float(), float);
        assert_eq!(format.is_int(), !float);
        assert_eq!(format.is_big_endian(), big);
        assert_eq!(format.is_little_endian(), !big);
        assert_eq!(format.is_signed(), signed);
        assert_eq!(format.is_unsigned(), !signed);
    }

    #[test]
    fn test_float_formats_are_signed() {
        for format in AudioFormat::ALL {
            if format.is_float() {
                assert!(format.is_signed());
            }
        }
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(AudioFormat::from_raw(0x8010), Some(AudioFormat::S16LSB));
        assert_eq!(AudioFormat::from_raw(0x1234), None);
    }

    #[test]
    fn test_byte_swap_detection() {
        assert!(AudioFormat::S16LSB.is_byte_swap_of(AudioFormat::S16MSB));
        assert!(AudioFormat::F32MSB.is_byte_swap_of(AudioFormat::F32LSB));
        assert!(!AudioFormat::S16LSB.is_byte_swap_of(AudioFormat::U16MSB));
        assert!(!AudioFormat::U8.is_byte_swap_of(AudioFormat::S8));
    }

    #[test]
    fn test_silence() {
        let mut buf = [0xAAu8; 5];
        AudioFormat::U16LSB.fill_silence(&mut buf);
        assert_eq!(buf, [0x00, 0x80, 0x00, 0x80, 0x00]);

        let mut buf = [0xAAu8; 4];
        AudioFormat::U16MSB.fill_silence(&mut buf);
        assert_eq!(buf, [0x80, 0x00, 0x80, 0x00]);

        let mut buf = [0u8; 3];
        AudioFormat::U8.fill_silence(&mut buf);
        assert_eq!(buf, [0x80; 3]);

        let mut buf = [0xFFu8; 8];
        AudioFormat::F32LSB.fill_silence(&mut buf);
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn test_sample_codec_8bit() {
        assert_eq!(AudioFormat::U8.read_sample(&[128]), 0.0);
        assert_eq!(AudioFormat::U8.read_sample(&[0]), -1.0);
        assert_eq!(AudioFormat::S8.read_sample(&[0x80]), -1.0);

        let mut out = [0u8];
        AudioFormat::U8.write_sample(0.5, &mut out);
        assert_eq!(out[0], 192);
        AudioFormat::U8.write_sample(2.0, &mut out);
        assert_eq!(out[0], 255);
        AudioFormat::S8.write_sample(-2.0, &mut out);
        assert_eq!(out[0] as i8, -128);
    }

    #[test]
    fn test_sample_codec_16bit() {
        let mut out = [0u8; 2];
        AudioFormat::S16LSB.write_sample(-0.5, &mut out);
        assert_eq!(i16::from_le_bytes(out), -16384);
        assert_eq!(AudioFormat::S16LSB.read_sample(&out), -0.5);

        AudioFormat::S16MSB.write_sample(1.0, &mut out);
        assert_eq!(i16::from_be_bytes(out), i16::MAX);

        AudioFormat::U16LSB.write_sample(0.0, &mut out);
        assert_eq!(u16::from_le_bytes(out), 0x8000);
    }

    #[test]
    fn test_sample_codec_32bit() {
        let mut out = [0u8; 4];
        AudioFormat::F32MSB.write_sample(0.25, &mut out);
        assert_eq!(f32::from_be_bytes(out), 0.25);
        assert_eq!(AudioFormat::F32MSB.read_sample(&out), 0.25);

        AudioFormat::S32LSB.write_sample(-1.0, &mut out);
        assert_eq!(i32::from_le_bytes(out), i32::MIN);
        assert_eq!(AudioFormat::S32LSB.read_sample(&out), -1.0);
    }

    #[test]
    fn test_rounding_ties_away_from_zero() {
        let mut out = [0u8; 1];
        // 1.5 / 128 sits exactly between 1 and 2
        AudioFormat::S8.write_sample(1.5 / 128.0, &mut out);
        assert_eq!(out[0] as i8, 2);
        AudioFormat::S8.write_sample(-1.5 / 128.0, &mut out);
        assert_eq!(out[0] as i8, -2);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("s16le".parse::<AudioFormat>().unwrap(), AudioFormat::S16LSB);
        assert_eq!("F32BE".parse::<AudioFormat>().unwrap(), AudioFormat::F32MSB);
        assert_eq!("s16".parse::<AudioFormat>().unwrap(), AudioFormat::S16SYS);
        assert!("pcm24".parse::<AudioFormat>().is_err());

        for format in AudioFormat::ALL {
            assert_eq!(format.to_string().parse::<AudioFormat>().unwrap(), format);
        }
    }
}
