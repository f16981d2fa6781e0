//! Block and render buffers shared by the graph, contexts and exporters.

use alloc::vec;
use alloc::vec::Vec;

/// Number of frames rendered per graph block.
pub const BLOCK_SIZE: usize = 256;

/// Planar f32 audio: one contiguous run of `frames` samples per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: u16,
    frames: usize,
}

impl AudioBuffer {
    pub fn new(channels: u16, frames: usize) -> Self {
        Self {
            data: vec![0.0; channels as usize * frames],
            channels,
            frames,
        }
    }

    pub fn stereo(frames: usize) -> Self {
        Self::new(2, frames)
    }

    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Length in frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, ch: u16) -> &[f32] {
        let start = ch as usize * self.frames;
        &self.data[start..start + self.frames]
    }

    pub fn channel_mut(&mut self, ch: u16) -> &mut [f32] {
        let start = ch as usize * self.frames;
        let len = self.frames;
        &mut self.data[start..start + len]
    }

    /// Left/right pair at `frame`. Mono buffers return the same value twice.
    pub fn frame(&self, frame: usize) -> (f32, f32) {
        let left = self.channel(0)[frame];
        let right = if self.channels > 1 { self.channel(1)[frame] } else { left };
        (left, right)
    }

    pub fn mix_from(&mut self, source: &AudioBuffer) {
        self.mix_from_scaled(source, 1.0);
    }

    /// Add `source · gain` into this buffer. Only the channels and frames
    /// both buffers have are touched.
    pub fn mix_from_scaled(&mut self, source: &AudioBuffer, gain: f32) {
        for ch in 0..self.channels.min(source.channels) {
            for (d, s) in self.channel_mut(ch).iter_mut().zip(source.channel(ch)) {
                *d += s * gain;
            }
        }
    }

    /// Copy `source` into this buffer starting at frame `offset`.
    ///
    /// Frames that would land past the end are dropped. Returns the number
    /// of frames written.
    pub fn write_at(&mut self, offset: usize, source: &AudioBuffer) -> usize {
        if offset >= self.frames {
            return 0;
        }
        let count = source.frames.min(self.frames - offset);
        let chs = self.channels.min(source.channels);
        for ch in 0..chs {
            let src = &source.channel(ch)[..count];
            self.channel_mut(ch)[offset..offset + count].copy_from_slice(src);
        }
        count
    }

    pub fn apply_gain(&mut self, gain: f32) {
        self.data.iter_mut().for_each(|s| *s *= gain);
    }

    /// Largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |acc, s| acc.max(libm::fabsf(*s)))
    }
}
