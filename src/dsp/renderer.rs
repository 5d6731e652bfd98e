//! Offline bounce: renders a context to a WAV byte buffer.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::context::AudioContext;
use crate::dsp::Frame;
use crate::error::Result;

/// Render `seconds` of `ctx` from its current time and encode the result as
/// 16-bit stereo PCM. The context clock advances as if played live.
pub fn render_wav(ctx: &AudioContext, seconds: f64) -> Result<Vec<u8>> {
    let frames = ctx.render_seconds(seconds);
    encode_wav(&frames, ctx.config().sample_rate)
}

/// Encode stereo frames to a WAV byte buffer.
pub fn encode_wav(frames: &[Frame], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + frames.len() * 4));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for frame in frames {
            writer.write_sample(to_i16(frame.left))?;
            writer.write_sample(to_i16(frame.right))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
