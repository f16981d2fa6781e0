//! One-shot sample player node.

use std::sync::Arc;

use wl_ir::AudioBuffer;

use super::param::AudioParam;
use super::BlockClock;

/// Plays a mono frame buffer at a variable rate, once.
///
/// The buffer is at the context's sample rate, so a playback rate of 1.0
/// plays it back unchanged. Loop points and the start offset are given in
/// seconds and converted with the context rate when playback begins.
#[derive(Clone, Debug)]
pub struct BufferSource {
    buffer: Arc<[f32]>,
    pub playback_rate: AudioParam,
    loop_secs: Option<(f64, f64)>,
    start_at: Option<f64>,
    offset_secs: f64,
    stop_at: Option<f64>,
    position: f64,
    playing: bool,
    ended: bool,
}

impl BufferSource {
    pub fn new(buffer: Arc<[f32]>, playback_rate: f32) -> Self {
        Self {
            buffer,
            playback_rate: AudioParam::new(playback_rate),
            loop_secs: None,
            start_at: None,
            offset_secs: 0.0,
            stop_at: None,
            position: 0.0,
            playing: false,
            ended: false,
        }
    }

    /// Length of the buffer in frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    /// Loop between `start` and `end` seconds once playback reaches `end`.
    pub fn set_loop(&mut self, start: f64, end: f64) {
        self.loop_secs = (end > start).then_some((start, end));
    }

    pub fn loop_region(&self) -> Option<(f64, f64)> {
        self.loop_secs
    }

    /// Start at context time `when`, `offset` seconds into the buffer.
    pub fn start(&mut self, when: f64, offset: f64) {
        if self.playing || self.ended {
            return;
        }
        self.start_at = Some(when);
        self.offset_secs = offset.max(0.0);
    }

    /// Stop at context time `when`. An earlier stop wins.
    pub fn stop(&mut self, when: f64) {
        self.stop_at = Some(self.stop_at.map_or(when, |t| t.min(when)));
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_at
    }

    pub fn offset(&self) -> f64 {
        self.offset_secs
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn process(&mut self, output: &mut AudioBuffer, clock: BlockClock) {
        let rate = self.playback_rate.value_at(clock.start()) as f64;
        let sr = clock.sample_rate as f64;
        let len = self.buffer.len() as f64;
        let looped = self
            .loop_secs
            .map(|(s, e)| ((s * sr).min(len), (e * sr).min(len)))
            .filter(|(s, e)| e > s);

        for i in 0..output.frames() {
            let value = self.next_frame(clock.time_at(i), rate, sr, len, looped);
            for ch in 0..output.channels() {
                output.channel_mut(ch)[i] = value;
            }
        }
    }

    fn next_frame(&mut self, t: f64, rate: f64, sr: f64, len: f64, looped: Option<(f64, f64)>) -> f32 {
        if self.ended {
            return 0.0;
        }
        let Some(start) = self.start_at else {
            return 0.0;
        };
        if t < start {
            return 0.0;
        }
        if self.stop_at.is_some_and(|stop| t >= stop) {
            self.ended = true;
            return 0.0;
        }
        if !self.playing {
            self.playing = true;
            self.position = self.offset_secs * sr;
        }

        match looped {
            Some((ls, le)) if self.position >= le => {
                self.position = ls + (self.position - ls) % (le - ls);
            }
            None if self.position >= len => {
                self.ended = true;
                return 0.0;
            }
            _ => {}
        }

        let idx = self.position as usize;
        let frac = (self.position - idx as f64) as f32;
        let s0 = self.buffer.get(idx).copied().unwrap_or(0.0);
        let next = idx + 1;
        let s1 = match looped {
            Some((ls, le)) if next as f64 >= le => self.buffer.get(ls as usize).copied(),
            _ => self.buffer.get(next).copied(),
        }
        .unwrap_or(0.0);

        self.position += rate;
        s0 + (s1 - s0) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(start: f64) -> BlockClock {
        BlockClock { frame: (start * 10.0) as u64, sample_rate: 10 }
    }

    fn ramp(n: usize) -> Arc<[f32]> {
        (0..n).map(|i| i as f32).collect::<Vec<_>>().into()
    }

    #[test]
    fn silent_until_started() {
        let mut src = BufferSource::new(ramp(4), 1.0);
        let mut out = AudioBuffer::stereo(4);
        src.process(&mut out, clock(0.0));
        assert!(out.channel(0).iter().all(|&s| s == 0.0));
        assert!(!src.is_ended());
    }

    #[test]
    fn plays_once_then_ends() {
        let mut src = BufferSource::new(ramp(4), 1.0);
        src.start(0.0, 0.0);
        let mut out = AudioBuffer::stereo(6);
        src.process(&mut out, clock(0.0));
        assert_eq!(out.channel(0), &[0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(out.channel(1), out.channel(0));
        assert!(src.is_ended());
    }

    #[test]
    fn start_offset_and_delay() {
        let mut src = BufferSource::new(ramp(8), 1.0);
        // 2 frames of delay, 0.3 s offset at 10 Hz = frame 3
        src.start(0.2, 0.3);
        let mut out = AudioBuffer::new(1, 4);
        src.process(&mut out, clock(0.0));
        assert_eq!(out.channel(0), &[0.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn loop_wraps_back() {
        let mut src = BufferSource::new(ramp(6), 1.0);
        src.set_loop(0.2, 0.5);
        src.start(0.0, 0.0);
        let mut out = AudioBuffer::new(1, 9);
        src.process(&mut out, clock(0.0));
        assert_eq!(out.channel(0), &[0.0, 1.0, 2.0, 3.0, 4.0, 2.0, 3.0, 4.0, 2.0]);
        assert!(!src.is_ended());
    }

    #[test]
    fn half_rate_interpolates() {
        let mut src = BufferSource::new(ramp(4), 0.5);
        src.start(0.0, 0.0);
        let mut out = AudioBuffer::new(1, 3);
        src.process(&mut out, clock(0.0));
        assert_eq!(out.channel(0), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn stop_ends_playback() {
        let mut src = BufferSource::new(ramp(8), 1.0);
        src.start(0.0, 0.0);
        src.stop(0.2);
        let mut out = AudioBuffer::new(1, 4);
        src.process(&mut out, clock(0.0));
        assert_eq!(out.channel(0), &[0.0, 1.0, 0.0, 0.0]);
        assert!(src.is_ended());
    }
}
