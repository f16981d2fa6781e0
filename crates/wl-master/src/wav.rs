//! WAV encoding for 16-bit stereo PCM.

use std::io::Write;

use wl_engine::frames;
use wl_ir::AudioBuffer;

const CHANNELS: u16 = 2;
const BITS_PER_SAMPLE: u16 = 16;

/// Write `buffer` as a 16-bit stereo WAV file. Mono buffers are written
/// to both channels.
pub fn write_wav(w: &mut impl Write, buffer: &AudioBuffer, sample_rate: u32) -> std::io::Result<()> {
    let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
    let data_size = buffer.frames() as u32 * block_align as u32;

    write_riff_header(w, data_size)?;
    write_fmt_chunk(w, sample_rate, block_align)?;
    write_data_chunk(w, buffer, data_size)
}

pub fn buffer_to_wav(buffer: &AudioBuffer, sample_rate: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(44 + buffer.frames() * 4);
    // writing into a Vec cannot fail
    let _ = write_wav(&mut bytes, buffer, sample_rate);
    bytes
}

fn write_riff_header(w: &mut impl Write, data_size: u32) -> std::io::Result<()> {
    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_size).to_le_bytes())?;
    w.write_all(b"WAVE")
}

fn write_fmt_chunk(w: &mut impl Write, sample_rate: u32, block_align: u16) -> std::io::Result<()> {
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?;
    w.write_all(&CHANNELS.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&(sample_rate * block_align as u32).to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&BITS_PER_SAMPLE.to_le_bytes())
}

fn write_data_chunk(w: &mut impl Write, buffer: &AudioBuffer, data_size: u32) -> std::io::Result<()> {
    w.write_all(b"data")?;
    w.write_all(&data_size.to_le_bytes())?;
    for frame in frames(buffer) {
        let (left, right) = frame.to_i16();
        w.write_all(&left.to_le_bytes())?;
        w.write_all(&right.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn header_describes_stereo_pcm16() {
        let bytes = buffer_to_wav(&AudioBuffer::stereo(10), 44100);
        assert_eq!(bytes.len(), 44 + 40);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), 36 + 40);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(&bytes, 24), 44100);
        assert_eq!(u32_at(&bytes, 28), 44100 * 4);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 40);
    }

    #[test]
    fn samples_are_interleaved() {
        let mut buffer = AudioBuffer::stereo(1);
        buffer.channel_mut(0)[0] = 1.0;
        buffer.channel_mut(1)[0] = -1.0;
        let bytes = buffer_to_wav(&buffer, 8000);
        assert_eq!(i16::from_le_bytes([bytes[44], bytes[45]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[46], bytes[47]]), -32767);
    }
}
