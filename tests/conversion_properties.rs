//! Property tests for conversion plans and streams

use audiodev::audio::{AudioCvt, AudioFormat, AudioStream};
use proptest::prelude::*;

fn any_format() -> impl Strategy<Value = AudioFormat> {
    prop::sample::select(AudioFormat::ALL.to_vec())
}

fn layout_channels() -> impl Strategy<Value = u8> {
    prop::sample::select(vec![1u8, 2, 4, 6, 8])
}

fn any_rate() -> impl Strategy<Value = u32> {
    prop::sample::select(vec![8000u32, 11025, 22050, 44100, 48000, 96000])
}

proptest! {
    #[test]
    fn noop_plan_is_identity(
        format in any_format(),
        channels in 1u8..=8,
        rate in any_rate(),
        frames in 0usize..64,
        seed in any::<u8>(),
    ) {
        let cvt = AudioCvt::build(format, channels, rate, format, channels, rate).unwrap();
        prop_assert!(!cvt.needed());
        prop_assert_eq!(cvt.len_mult(), 1);

        let len = frames * cvt.src_frame_size();
        let input: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        prop_assert_eq!(cvt.convert(&input).unwrap(), input);
    }

    #[test]
    fn len_mult_bounds_output(
        src_format in any_format(),
        dst_format in any_format(),
        src_channels in layout_channels(),
        dst_channels in layout_channels(),
        src_rate in any_rate(),
        dst_rate in any_rate(),
        frames in 0usize..300,
    ) {
        let cvt = AudioCvt::build(src_format, src_channels, src_rate, dst_format, dst_channels, dst_rate).unwrap();
        let input = vec![0x11u8; frames * cvt.src_frame_size()];
        let output = cvt.convert(&input).unwrap();
        prop_assert!(output.len() <= input.len() * cvt.len_mult());
        prop_assert_eq!(output.len() % cvt.dst_frame_size(), 0);
    }

    #[test]
    fn u8_widen_then_narrow_is_exact(samples in prop::collection::vec(any::<u8>(), 0..256)) {
        let widen = AudioCvt::build(AudioFormat::U8, 1, 22050, AudioFormat::S16LSB, 1, 22050).unwrap();
        let narrow = AudioCvt::build(AudioFormat::S16LSB, 1, 22050, AudioFormat::U8, 1, 22050).unwrap();
        let wide = widen.convert(&samples).unwrap();
        prop_assert_eq!(wide.len(), samples.len() * 2);
        prop_assert_eq!(narrow.convert(&wide).unwrap(), samples);
    }

    #[test]
    fn s16_narrow_then_widen_within_one_step(samples in prop::collection::vec(any::<i16>(), 0..256)) {
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let narrow = AudioCvt::build(AudioFormat::S16LSB, 2, 48000, AudioFormat::S8, 2, 48000).unwrap();
        let widen = AudioCvt::build(AudioFormat::S8, 2, 48000, AudioFormat::S16LSB, 2, 48000).unwrap();

        let whole = pcm.len() - pcm.len() % 4;
        let back = widen.convert(&narrow.convert(&pcm[..whole]).unwrap()).unwrap();
        for (orig, got) in pcm[..whole].chunks_exact(2).zip(back.chunks_exact(2)) {
            let orig = i16::from_le_bytes([orig[0], orig[1]]) as i32;
            let got = i16::from_le_bytes([got[0], got[1]]) as i32;
            prop_assert!((orig - got).abs() <= 256, "{} -> {}", orig, got);
        }
    }

    #[test]
    fn noop_stream_drains_everything(
        format in any_format(),
        channels in 1u8..=8,
        frames in 0usize..200,
        pieces in prop::collection::vec(1usize..97, 1..8),
    ) {
        let mut stream = AudioStream::new(format, channels, 44100, format, channels, 44100).unwrap();
        let frame = stream.plan().src_frame_size();
        let input: Vec<u8> = (0..frames * frame).map(|i| i as u8).collect();

        let mut at = 0;
        let mut sizes = pieces.iter().cycle();
        while at < input.len() {
            let n = (*sizes.next().unwrap()).min(input.len() - at);
            stream.put(&input[at..at + n]).unwrap();
            at += n;
        }
        stream.flush().unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 61];
        while stream.available() > 0 {
            let n = stream.get(&mut buf);
            output.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(output.len(), input.len());
        prop_assert_eq!(output, input);
    }

    #[test]
    fn resampling_stream_tracks_one_shot_length(
        frames in 1usize..400,
        split in 1usize..400,
    ) {
        let cvt = AudioCvt::build(AudioFormat::S16LSB, 2, 44100, AudioFormat::S16LSB, 2, 48000).unwrap();
        let input = vec![0u8; frames * 4];
        let whole = cvt.convert(&input).unwrap();

        let mut stream = AudioStream::with_plan(&cvt);
        let cut = split.min(frames) * 4;
        stream.put(&input[..cut]).unwrap();
        stream.put(&input[cut..]).unwrap();
        stream.flush().unwrap();
        prop_assert_eq!(stream.available(), whole.len());
    }
}
