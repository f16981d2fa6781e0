//! Instrument, envelope and auto-vibrato types.

use alloc::vec::Vec;
use arrayvec::{ArrayString, ArrayVec};

use crate::sample::Sample;

/// Envelope point limit (FastTracker 2 stores 12).
pub const MAX_ENVELOPE_POINTS: usize = 12;

/// An instrument definition.
#[derive(Clone, Debug)]
pub struct Instrument {
    /// Instrument name
    pub name: ArrayString<26>,
    /// Samples owned by this instrument
    pub samples: Vec<Sample>,
    /// Sample mapping: note (0-119) -> index into `samples`
    pub sample_map: [u8; 120],
    /// Volume envelope
    pub volume_envelope: Envelope,
    /// Panning envelope
    pub panning_envelope: Envelope,
    /// Auto-vibrato settings
    pub vibrato: Option<AutoVibrato>,
    /// Fadeout speed after release (0 = no fade)
    pub fadeout: u16,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            samples: Vec::new(),
            sample_map: [0; 120],
            volume_envelope: Envelope::default(),
            panning_envelope: Envelope::default(),
            vibrato: None,
            fadeout: 0,
        }
    }
}

impl Instrument {
    /// Create a new instrument with default settings.
    pub fn new(name: &str) -> Self {
        let mut inst = Self::default();
        let _ = inst.name.try_push_str(name);
        inst
    }

    /// Create an instrument that plays `sample` for every note.
    pub fn with_sample(name: &str, sample: Sample) -> Self {
        let mut inst = Self::new(name);
        inst.samples.push(sample);
        inst
    }

    /// Set all notes to map to a single sample.
    pub fn set_single_sample(&mut self, sample_index: u8) {
        self.sample_map.fill(sample_index);
    }

    /// The sample that plays for `note`, falling back to the first sample
    /// for notes outside the map (including the note-off sentinel).
    pub fn sample_for_note(&self, note: u8) -> Option<&Sample> {
        let index = self.sample_map.get(note as usize).copied().unwrap_or(0);
        self.samples
            .get(index as usize)
            .or_else(|| self.samples.first())
    }

    /// Whether a note of this instrument needs per-note modulation nodes.
    pub fn has_modulation(&self) -> bool {
        self.volume_envelope.is_active()
            || self.panning_envelope.is_active()
            || self.vibrato.is_some_and(|v| v.is_active())
    }
}

/// A breakpoint envelope (volume or panning).
///
/// Values are 0-64. Volume envelopes map 64 to full gain; panning
/// envelopes map 32 to centre.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    /// Envelope points, ordered by tick
    pub points: ArrayVec<EnvelopePoint, MAX_ENVELOPE_POINTS>,
    /// Hold at this point index until the note is released
    pub sustain_point: Option<u8>,
    /// Loop between two point indices
    pub loop_range: Option<EnvelopeLoop>,
    /// Is the envelope enabled?
    pub enabled: bool,
}

impl Envelope {
    /// Create a new empty envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an enabled envelope from `(tick, value)` pairs.
    /// Points past `MAX_ENVELOPE_POINTS` are dropped.
    pub fn from_points(points: &[(u16, u8)]) -> Self {
        let mut env = Self { enabled: true, ..Self::default() };
        for &(tick, value) in points {
            env.add_point(tick, value);
        }
        env
    }

    /// Add a point to the envelope. Returns false when the envelope is full.
    pub fn add_point(&mut self, tick: u16, value: u8) -> bool {
        self.points
            .try_push(EnvelopePoint { tick, value: value.min(64) })
            .is_ok()
    }

    /// Enabled with at least one point.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.points.is_empty()
    }

    /// The sustain point, if it refers to an existing point.
    pub fn sustain(&self) -> Option<usize> {
        self.sustain_point
            .map(usize::from)
            .filter(|&i| i < self.points.len())
    }

    /// The loop range, if both ends refer to existing points in order.
    pub fn loop_points(&self) -> Option<(usize, usize)> {
        let range = self.loop_range?;
        let (start, end) = (range.start as usize, range.end as usize);
        (start < end && end < self.points.len()).then_some((start, end))
    }

    /// Get the interpolated value at a given tick.
    pub fn value_at(&self, tick: u16) -> u8 {
        let Some(first) = self.points.first() else {
            return 0;
        };

        let mut prev = first;
        for point in &self.points {
            if point.tick > tick {
                if point.tick == prev.tick {
                    return point.value;
                }
                let t = (tick - prev.tick) as i32;
                let d = (point.tick - prev.tick) as i32;
                let v = prev.value as i32 + (point.value as i32 - prev.value as i32) * t / d;
                return v as u8;
            }
            prev = point;
        }

        prev.value
    }
}

/// A point in an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopePoint {
    /// Tick position
    pub tick: u16,
    /// Value (0-64)
    pub value: u8,
}

/// Envelope loop region as point indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeLoop {
    pub start: u8,
    pub end: u8,
}

/// Auto-vibrato settings for an instrument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutoVibrato {
    pub waveform: VibratoWaveform,
    /// Phase advance per tick (256 = one cycle)
    pub speed: u8,
    /// Peak period deviation, in period units
    pub depth: u8,
    /// Ticks to reach full depth (0 = immediate)
    pub sweep: u8,
}

impl AutoVibrato {
    pub fn is_active(&self) -> bool {
        self.speed > 0 && self.depth > 0
    }
}

/// Auto-vibrato waveform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VibratoWaveform {
    #[default]
    Sine,
    Square,
    RampDown,
    RampUp,
}

impl VibratoWaveform {
    /// Waveform value in -1.0..=1.0 at `phase` (256 steps per cycle).
    pub fn value_at(self, phase: u8) -> f32 {
        let p = phase as f32 / 256.0;
        match self {
            VibratoWaveform::Sine => libm::sinf(p * core::f32::consts::TAU),
            VibratoWaveform::Square => {
                if phase < 128 {
                    1.0
                } else {
                    -1.0
                }
            }
            VibratoWaveform::RampDown => 1.0 - 2.0 * p,
            VibratoWaveform::RampUp => 2.0 * p - 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_interpolation() {
        let env = Envelope::from_points(&[(0, 64), (100, 0)]);

        assert_eq!(env.value_at(0), 64);
        assert_eq!(env.value_at(50), 32);
        assert_eq!(env.value_at(100), 0);
        assert_eq!(env.value_at(200), 0);
    }

    #[test]
    fn envelope_rejects_thirteenth_point() {
        let mut env = Envelope::new();
        for i in 0..MAX_ENVELOPE_POINTS as u16 {
            assert!(env.add_point(i * 10, 32));
        }
        assert!(!env.add_point(500, 0));
        assert_eq!(env.points.len(), MAX_ENVELOPE_POINTS);
    }

    #[test]
    fn loop_points_validate_indices() {
        let mut env = Envelope::from_points(&[(0, 0), (10, 64), (20, 32)]);
        env.loop_range = Some(EnvelopeLoop { start: 1, end: 2 });
        assert_eq!(env.loop_points(), Some((1, 2)));
        env.loop_range = Some(EnvelopeLoop { start: 2, end: 5 });
        assert_eq!(env.loop_points(), None);
        env.sustain_point = Some(7);
        assert_eq!(env.sustain(), None);
    }

    #[test]
    fn sample_for_note_falls_back_to_first() {
        let mut inst = Instrument::with_sample("lead", Sample::new("a"));
        inst.samples.push(Sample::new("b"));
        inst.sample_map[60] = 1;
        assert_eq!(inst.sample_for_note(60).map(|s| s.name.as_str()), Some("b"));
        assert_eq!(inst.sample_for_note(61).map(|s| s.name.as_str()), Some("a"));
        assert_eq!(inst.sample_for_note(200).map(|s| s.name.as_str()), Some("a"));
    }

    #[test]
    fn modulation_requires_enabled_envelope_or_vibrato() {
        let mut inst = Instrument::new("plain");
        assert!(!inst.has_modulation());
        inst.volume_envelope = Envelope::from_points(&[(0, 64)]);
        assert!(inst.has_modulation());
        inst.volume_envelope.enabled = false;
        inst.vibrato = Some(AutoVibrato { speed: 4, depth: 8, ..Default::default() });
        assert!(inst.has_modulation());
    }

    #[test]
    fn waveforms_span_unit_range() {
        assert!(VibratoWaveform::Sine.value_at(0).abs() < 1e-6);
        assert!((VibratoWaveform::Sine.value_at(64) - 1.0).abs() < 1e-6);
        assert_eq!(VibratoWaveform::Square.value_at(200), -1.0);
        assert_eq!(VibratoWaveform::RampDown.value_at(0), 1.0);
        assert_eq!(VibratoWaveform::RampUp.value_at(0), -1.0);
    }
}
