//! Small stateless-ish processors: gain, stereo panner, waveshaper and
//! the Amiga output filter.

use core::f32::consts::{FRAC_PI_2, TAU};

use wl_ir::AudioBuffer;

use super::param::AudioParam;
use super::BlockClock;

/// Per-sample gain.
#[derive(Clone, Debug)]
pub struct Gain {
    pub gain: AudioParam,
}

impl Gain {
    pub fn new(value: f32) -> Self {
        Self { gain: AudioParam::new(value) }
    }

    pub(crate) fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, clock: BlockClock) {
        for i in 0..output.frames() {
            let g = self.gain.value_at(clock.time_at(i));
            for ch in 0..output.channels().min(input.channels()) {
                output.channel_mut(ch)[i] = input.channel(ch)[i] * g;
            }
        }
    }
}

/// Equal-power stereo panner. `pan` is -1.0 (left) ..= 1.0 (right).
#[derive(Clone, Debug)]
pub struct StereoPanner {
    pub pan: AudioParam,
}

impl StereoPanner {
    pub fn new(pan: f32) -> Self {
        Self { pan: AudioParam::new(pan) }
    }

    pub(crate) fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, clock: BlockClock) {
        if output.channels() < 2 || input.channels() < 2 {
            output.silence();
            output.mix_from(input);
            return;
        }
        for i in 0..output.frames() {
            let pan = self.pan.value_at(clock.time_at(i)).clamp(-1.0, 1.0);
            let (l, r) = input.frame(i);
            let (out_l, out_r) = if pan <= 0.0 {
                let x = (pan + 1.0) * FRAC_PI_2;
                (l + r * libm::cosf(x), r * libm::sinf(x))
            } else {
                let x = pan * FRAC_PI_2;
                (l * libm::cosf(x), r + l * libm::sinf(x))
            };
            output.channel_mut(0)[i] = out_l;
            output.channel_mut(1)[i] = out_r;
        }
    }
}

/// `tanh` soft clipper, normalised so a full-scale input stays full scale.
#[derive(Clone, Debug)]
pub struct Waveshaper {
    pub drive: AudioParam,
}

impl Waveshaper {
    pub fn new(drive: f32) -> Self {
        Self { drive: AudioParam::new(drive) }
    }

    pub(crate) fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, clock: BlockClock) {
        let k = 1.0 + 20.0 * self.drive.value_at(clock.start()).clamp(0.0, 1.0);
        let norm = 1.0 / libm::tanhf(k);
        for ch in 0..output.channels().min(input.channels()) {
            let src = input.channel(ch);
            for (o, &x) in output.channel_mut(ch).iter_mut().zip(src) {
                *o = libm::tanhf(k * x) * norm;
            }
        }
    }
}

/// Cutoff of the Amiga's fixed output RC filter.
pub const AMIGA_CUTOFF_HZ: f32 = 4410.0;

/// One-pole RC low-pass: `y = y_prev + alpha * (x - y_prev)`.
///
/// Disabled, it passes audio through untouched and tracks the input so
/// that switching it on does not click.
#[derive(Clone, Debug)]
pub struct OnePoleLowPass {
    prev_left: f32,
    prev_right: f32,
    cutoff_hz: f32,
    enabled: bool,
}

impl OnePoleLowPass {
    pub fn new(cutoff_hz: f32, enabled: bool) -> Self {
        Self { prev_left: 0.0, prev_right: 0.0, cutoff_hz, enabled }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn alpha(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 1.0;
        }
        (TAU * self.cutoff_hz / sample_rate as f32).min(1.0)
    }

    pub(crate) fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, clock: BlockClock) {
        output.silence();
        output.mix_from(input);
        if !self.enabled {
            let last = input.frames().saturating_sub(1);
            if input.frames() > 0 {
                (self.prev_left, self.prev_right) = input.frame(last);
            }
            return;
        }

        let alpha = self.alpha(clock.sample_rate);
        let mut prev_l = self.prev_left;
        let mut prev_r = self.prev_right;
        let stereo = output.channels() > 1;
        for i in 0..output.frames() {
            prev_l += alpha * (output.channel(0)[i] - prev_l);
            output.channel_mut(0)[i] = prev_l;
            if stereo {
                prev_r += alpha * (output.channel(1)[i] - prev_r);
                output.channel_mut(1)[i] = prev_r;
            }
        }
        self.prev_left = prev_l;
        self.prev_right = prev_r;
    }
}
