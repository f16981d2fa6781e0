//! Sample data types.

use alloc::vec::Vec;
use arrayvec::ArrayString;

/// A sample definition.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Sample name
    pub name: ArrayString<26>,
    /// Audio data
    pub data: SampleData,
    /// Loop descriptor (in frames)
    pub loop_: SampleLoop,
    /// Finetune. Amiga pitch reads -8..7, linear pitch reads -128..127.
    pub finetune: i8,
    /// Default volume (0-64)
    pub volume: u8,
    /// Default panning (-64 to +64, 0 = center)
    pub panning: i8,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            data: SampleData::Mono8(Vec::new()),
            loop_: SampleLoop::default(),
            finetune: 0,
            volume: 64,
            panning: 0,
        }
    }
}

impl Sample {
    /// Create a new empty sample.
    pub fn new(name: &str) -> Self {
        let mut sample = Self::default();
        let _ = sample.name.try_push_str(name);
        sample
    }

    /// Get the length of the sample in frames.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the sample has no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the sample loop should be honoured at playback.
    ///
    /// Loops of two frames or less are treated as "no loop": MOD files use
    /// them as a placeholder for one-shot samples.
    pub fn has_loop(&self) -> bool {
        self.loop_.enabled && self.loop_.length > 2
    }
}

/// Sample loop region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleLoop {
    pub enabled: bool,
    /// First looped frame
    pub start: u32,
    /// Loop length in frames
    pub length: u32,
}

impl SampleLoop {
    pub fn new(start: u32, length: u32) -> Self {
        Self { enabled: true, start, length }
    }

    /// One past the last looped frame.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.length)
    }
}

/// Sample audio data.
#[derive(Clone, Debug)]
pub enum SampleData {
    /// 8-bit mono samples
    Mono8(Vec<i8>),
    /// 16-bit mono samples
    Mono16(Vec<i16>),
}

impl SampleData {
    /// Get the number of sample frames.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Mono8(v) => v.len(),
            SampleData::Mono16(v) => v.len(),
        }
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bits per stored sample.
    pub fn bit_depth(&self) -> u8 {
        match self {
            SampleData::Mono8(_) => 8,
            SampleData::Mono16(_) => 16,
        }
    }

    /// Get a sample value at position (as i16).
    pub fn get_mono(&self, pos: usize) -> i16 {
        match self {
            SampleData::Mono8(v) => v.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Mono16(v) => v.get(pos).copied().unwrap_or(0),
        }
    }

    /// Read a frame as f32 in -1.0..1.0.
    pub fn read_f32(&self, pos: usize) -> f32 {
        self.get_mono(pos) as f32 / 32768.0
    }

    /// Convert the whole sample to f32 frames.
    pub fn to_f32(&self) -> Vec<f32> {
        (0..self.len()).map(|i| self.read_f32(i)).collect()
    }
}
