//! Biquad filter node (shelves, peaking band, resonant low-pass).

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use tracing::trace;
use wl_ir::AudioBuffer;

use super::param::AudioParam;
use super::BlockClock;

/// Lowest centre/cutoff frequency accepted by the filter.
const MIN_FREQUENCY: f32 = 10.0;

/// Centre/cutoff ceiling as a fraction of the sample rate.
const MAX_FREQUENCY_RATIO: f32 = 0.49;

const MIN_Q: f32 = 0.0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterShape {
    LowPass,
    HighShelf,
    Peaking,
    LowShelf,
}

impl FilterShape {
    fn biquad_type(self, gain_db: f32) -> Type<f32> {
        match self {
            FilterShape::LowPass => Type::LowPass,
            FilterShape::HighShelf => Type::HighShelf(gain_db),
            FilterShape::Peaking => Type::PeakingEQ(gain_db),
            FilterShape::LowShelf => Type::LowShelf(gain_db),
        }
    }
}

/// A stereo biquad. Coefficients follow the parameters at block rate.
#[derive(Clone, Debug)]
pub struct BiquadFilter {
    shape: FilterShape,
    pub frequency: AudioParam,
    pub q: AudioParam,
    pub gain_db: AudioParam,
    current: Option<(f32, f32, f32)>,
    left: DirectForm2Transposed<f32>,
    right: DirectForm2Transposed<f32>,
}

fn passthrough() -> Coefficients<f32> {
    Coefficients { a1: 0.0, a2: 0.0, b0: 1.0, b1: 0.0, b2: 0.0 }
}

impl BiquadFilter {
    pub fn new(shape: FilterShape, frequency: f32, q: f32, gain_db: f32) -> Self {
        Self {
            shape,
            frequency: AudioParam::new(frequency),
            q: AudioParam::new(q),
            gain_db: AudioParam::new(gain_db),
            current: None,
            left: DirectForm2Transposed::<f32>::new(passthrough()),
            right: DirectForm2Transposed::<f32>::new(passthrough()),
        }
    }

    pub fn shape(&self) -> FilterShape {
        self.shape
    }

    fn refresh(&mut self, clock: BlockClock) {
        let fs = clock.sample_rate as f32;
        let f0 = self
            .frequency
            .value_at(clock.start())
            .clamp(MIN_FREQUENCY, fs * MAX_FREQUENCY_RATIO);
        let q = self.q.value_at(clock.start()).max(MIN_Q);
        let gain = self.gain_db.value_at(clock.start());
        if self.current == Some((f0, q, gain)) {
            return;
        }
        match Coefficients::<f32>::from_params(self.shape.biquad_type(gain), fs.hz(), f0.hz(), q) {
            Ok(coeffs) => {
                self.left.update_coefficients(coeffs);
                self.right.update_coefficients(coeffs);
                self.current = Some((f0, q, gain));
            }
            Err(e) => trace!(?e, f0, q, "biquad coefficients rejected, keeping previous"),
        }
    }

    pub(crate) fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, clock: BlockClock) {
        self.refresh(clock);
        for ch in 0..output.channels().min(input.channels()) {
            let state = if ch == 0 { &mut self.left } else { &mut self.right };
            let src = input.channel(ch);
            for (o, &x) in output.channel_mut(ch).iter_mut().zip(src) {
                *o = state.run(x);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, frames: usize) -> AudioBuffer {
        let mut buf = AudioBuffer::stereo(frames);
        for ch in 0..2 {
            for (i, s) in buf.channel_mut(ch).iter_mut().enumerate() {
                *s = libm::sinf(core::f32::consts::TAU * freq * i as f32 / sr as f32);
            }
        }
        buf
    }

    fn tail_peak(buf: &AudioBuffer) -> f32 {
        buf.channel(0)[buf.frames() / 2..]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn lowpass_attenuates_above_cutoff() {
        let clock = BlockClock { frame: 0, sample_rate: 44100 };
        let mut filter = BiquadFilter::new(FilterShape::LowPass, 500.0, 0.7071, 0.0);
        let input = sine(8000.0, 44100, 2048);
        let mut out = AudioBuffer::stereo(2048);
        filter.process(&input, &mut out, clock);
        assert!(tail_peak(&out) < 0.05, "peak {}", tail_peak(&out));
    }

    #[test]
    fn flat_shelf_is_transparent() {
        let clock = BlockClock { frame: 0, sample_rate: 44100 };
        let mut filter = BiquadFilter::new(FilterShape::HighShelf, 3200.0, 0.7071, 0.0);
        let input = sine(5000.0, 44100, 1024);
        let mut out = AudioBuffer::stereo(1024);
        filter.process(&input, &mut out, clock);
        let diff = input
            .channel(1)
            .iter()
            .zip(out.channel(1))
            .fold(0.0f32, |acc, (a, b)| acc.max((a - b).abs()));
        assert!(diff < 1e-3, "diff {}", diff);
    }

    #[test]
    fn cutoff_above_nyquist_is_clamped() {
        let clock = BlockClock { frame: 0, sample_rate: 8000 };
        let mut filter = BiquadFilter::new(FilterShape::LowPass, 20_000.0, 1.0, 0.0);
        let input = sine(100.0, 8000, 256);
        let mut out = AudioBuffer::stereo(256);
        filter.process(&input, &mut out, clock);
        assert!(filter.current.is_some());
        assert!(out.channel(0).iter().all(|s| s.is_finite()));
    }
}
