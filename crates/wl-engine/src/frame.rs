//! Interleaved stereo frame, the unit handed to output devices and files.

use wl_ir::AudioBuffer;

/// One stereo output frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Frame {
    pub left: f32,
    pub right: f32,
}

impl Frame {
    pub const fn silence() -> Self {
        Self { left: 0.0, right: 0.0 }
    }

    /// Same value on both sides.
    pub const fn mono(value: f32) -> Self {
        Self { left: value, right: value }
    }

    /// Frame `index` of `buffer`. Mono buffers are duplicated to both sides.
    pub fn from_buffer(buffer: &AudioBuffer, index: usize) -> Self {
        let (left, right) = buffer.frame(index);
        Self { left, right }
    }

    /// 16-bit PCM, clipped.
    pub fn to_i16(self) -> (i16, i16) {
        (to_pcm16(self.left), to_pcm16(self.right))
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Interleave a whole buffer into frames.
pub fn frames(buffer: &AudioBuffer) -> impl Iterator<Item = Frame> + '_ {
    (0..buffer.frames()).map(move |i| Frame::from_buffer(buffer, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_conversion_clips() {
        assert_eq!(Frame { left: 2.0, right: -2.0 }.to_i16(), (32767, -32767));
        assert_eq!(Frame::silence().to_i16(), (0, 0));
        assert_eq!(Frame::mono(0.5).to_i16(), (16383, 16383));
    }

    #[test]
    fn mono_buffers_are_duplicated() {
        let mut buf = AudioBuffer::new(1, 2);
        buf.channel_mut(0)[1] = 0.25;
        let out: Vec<Frame> = frames(&buf).collect();
        assert_eq!(out, vec![Frame::silence(), Frame::mono(0.25)]);
    }
}
