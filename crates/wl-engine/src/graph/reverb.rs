//! Freeverb-style room reverb used as a channel send.
//!
//! Parallel damped comb filters followed by series allpasses, one bank per
//! side. The node outputs the wet signal only; the channel chain mixes it
//! back in.

use wl_ir::AudioBuffer;

const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const ROOM_FEEDBACK: f32 = 0.84;
const DAMPING: f32 = 0.2;
const ALLPASS_FEEDBACK: f32 = 0.5;
const INPUT_GAIN: f32 = 0.015;
const WET_GAIN: f32 = 3.0;

#[derive(Clone, Debug)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    store: f32,
}

impl Comb {
    fn new(size: usize) -> Self {
        Self { buffer: vec![0.0; size.max(1)], index: 0, store: 0.0 }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let out = self.buffer[self.index];
        self.store = out * (1.0 - DAMPING) + self.store * DAMPING;
        self.buffer[self.index] = input + self.store * ROOM_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }
}

#[derive(Clone, Debug)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(size: usize) -> Self {
        Self { buffer: vec![0.0; size.max(1)], index: 0 }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        self.buffer[self.index] = input + delayed * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        delayed - input
    }
}

#[derive(Clone, Debug)]
struct Side {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Side {
    fn new(scale: f64, spread: usize) -> Self {
        let size = |t: usize| (t as f64 * scale) as usize + spread;
        Self {
            combs: COMB_TUNING.iter().map(|&t| Comb::new(size(t))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&t| Allpass::new(size(t))).collect(),
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let mut out = self.combs.iter_mut().map(|c| c.process(input)).sum::<f32>();
        for ap in &mut self.allpasses {
            out = ap.process(out);
        }
        out
    }
}

#[derive(Clone, Debug)]
pub struct Reverb {
    left: Side,
    right: Side,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Self {
        let scale = sample_rate as f64 / 44100.0;
        Self { left: Side::new(scale, 0), right: Side::new(scale, STEREO_SPREAD) }
    }

    pub(crate) fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) {
        let stereo = output.channels() > 1;
        for i in 0..output.frames() {
            let (l, r) = input.frame(i);
            let mono_in = (l + r) * INPUT_GAIN;
            output.channel_mut(0)[i] = self.left.process(mono_in) * WET_GAIN;
            if stereo {
                output.channel_mut(1)[i] = self.right.process(mono_in) * WET_GAIN;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_produces_a_tail() {
        let mut reverb = Reverb::new(44100);
        let mut input = AudioBuffer::stereo(4096);
        input.channel_mut(0)[0] = 1.0;
        input.channel_mut(1)[0] = 1.0;
        let mut out = AudioBuffer::stereo(4096);
        reverb.process(&input, &mut out);

        // nothing before the shortest comb delay
        assert!(out.channel(0)[..200].iter().all(|&s| s == 0.0));
        assert!(out.channel(0)[2000..].iter().any(|&s| s != 0.0));
        assert!(out.peak() < 1.0);
    }

    #[test]
    fn silence_in_silence_out() {
        let mut reverb = Reverb::new(22050);
        let input = AudioBuffer::stereo(512);
        let mut out = AudioBuffer::stereo(512);
        reverb.process(&input, &mut out);
        assert_eq!(out.peak(), 0.0);
    }
}
