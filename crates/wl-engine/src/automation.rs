//! Turns instrument envelopes and auto-vibrato into parameter automation.
//!
//! Envelopes are tick-based. One tick lasts `2.5 / bpm` seconds, so an
//! envelope point at tick `n` becomes a ramp target at `start + n * tick`.
//! Looping envelopes are written out up to [`AUTOMATION_HORIZON`] seconds
//! ahead; a sustain point stops the schedule until the note is released.

use wl_ir::{AutoVibrato, Envelope};

use crate::graph::AudioParam;
use crate::pitch::PitchModel;

/// How far ahead looping envelopes and vibrato are scheduled, in seconds.
pub const AUTOMATION_HORIZON: f64 = 8.0;

/// Fadeout units per tick are subtracted from this (FastTracker 2).
const FADEOUT_RANGE: f64 = 65536.0;

/// Seconds per tick at `bpm`.
pub fn tick_duration(bpm: f32) -> f64 {
    2.5 / bpm.max(1.0) as f64
}

/// Volume envelope value → gain.
pub fn volume_level(value: u8) -> f32 {
    value.min(64) as f32 / 64.0
}

/// Panning envelope value → pan (-1.0..=1.0, 32 = centre).
pub fn pan_level(value: u8) -> f32 {
    ((value.min(64) as f32 - 32.0) / 32.0).clamp(-1.0, 1.0)
}

/// What got scheduled for one envelope.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EnvelopeSchedule {
    /// Holding at the sustain point until release
    Sustaining { point: usize },
    /// Repeating its loop up to the horizon
    Looping,
    /// Runs to its last point and holds that value
    Finite,
}

/// Schedule `env` on `param` from `start`.
pub fn schedule_envelope(
    param: &mut AudioParam,
    env: &Envelope,
    start: f64,
    tick: f64,
    level: impl Fn(u8) -> f32,
) -> EnvelopeSchedule {
    let points = &env.points;
    let Some(first) = points.first() else {
        return EnvelopeSchedule::Finite;
    };
    param.set_value_at_time(level(first.value), start + first.tick as f64 * tick);

    let last = env.sustain().unwrap_or(points.len() - 1);
    for p in points.iter().take(last + 1).skip(1) {
        param.linear_ramp_to_value_at_time(level(p.value), start + p.tick as f64 * tick);
    }
    if let Some(point) = env.sustain() {
        return EnvelopeSchedule::Sustaining { point };
    }

    match env.loop_points() {
        Some((ls, le)) => {
            schedule_loop(param, env, start, tick, ls, le, &level);
            EnvelopeSchedule::Looping
        }
        None => EnvelopeSchedule::Finite,
    }
}

/// Continue `env` after release at `release`, from its sustain point.
///
/// The remaining points keep their spacing relative to the sustain point.
pub fn schedule_release(
    param: &mut AudioParam,
    env: &Envelope,
    release: f64,
    tick: f64,
    level: impl Fn(u8) -> f32,
) {
    let Some(sustain) = env.sustain() else {
        return;
    };
    param.cancel_and_hold_at_time(release);
    let origin = release - env.points[sustain].tick as f64 * tick;
    for p in env.points.iter().skip(sustain + 1) {
        param.linear_ramp_to_value_at_time(level(p.value), origin + p.tick as f64 * tick);
    }
    if let Some((ls, le)) = env.loop_points().filter(|&(_, le)| le > sustain) {
        schedule_loop(param, env, origin, tick, ls, le, &level);
    }
}

/// Repeat points `ls..=le` after the first pass through `le`.
fn schedule_loop(
    param: &mut AudioParam,
    env: &Envelope,
    start: f64,
    tick: f64,
    ls: usize,
    le: usize,
    level: &impl Fn(u8) -> f32,
) {
    let points = &env.points;
    let span = points[le].tick.saturating_sub(points[ls].tick) as f64 * tick;
    if span <= 0.0 {
        return;
    }
    let horizon = start + AUTOMATION_HORIZON;
    let mut offset = span;
    while start + points[ls].tick as f64 * tick + offset < horizon {
        // the loop start is reached at the same time the loop end is
        param.set_value_at_time(level(points[ls].value), start + points[ls].tick as f64 * tick + offset);
        for p in points.iter().take(le + 1).skip(ls + 1) {
            param.linear_ramp_to_value_at_time(level(p.value), start + p.tick as f64 * tick + offset);
        }
        offset += span;
    }
}

/// Ramp `param` to silence over the instrument fadeout after `release`.
///
/// FastTracker 2 takes `65536 / fadeout` ticks to fade out fully. A zero
/// fadeout cuts the note over `fallback` seconds instead. Returns the
/// fade length in seconds.
pub fn schedule_fadeout(param: &mut AudioParam, fadeout: u16, release: f64, tick: f64, fallback: f64) -> f64 {
    let duration = if fadeout == 0 {
        fallback
    } else {
        FADEOUT_RANGE / fadeout as f64 * tick
    };
    param.cancel_and_hold_at_time(release);
    param.linear_ramp_to_value_at_time(0.0, release + duration);
    duration
}

/// Schedule auto-vibrato on a source's playback rate.
///
/// The pitch swings around the nearest semitone to `period`, once per tick,
/// for `duration` seconds (capped at the horizon).
#[allow(clippy::too_many_arguments)]
pub fn schedule_vibrato(
    param: &mut AudioParam,
    vibrato: &AutoVibrato,
    pitch: &dyn PitchModel,
    period: f32,
    finetune: i8,
    sample_rate: u32,
    start: f64,
    tick: f64,
    duration: f64,
) -> usize {
    if !vibrato.is_active() || tick <= 0.0 {
        return 0;
    }
    let base = pitch.nearest_semitone(period, finetune);
    let ticks = (duration.min(AUTOMATION_HORIZON) / tick).ceil() as usize;
    let depth = vibrato.depth as f32;

    for k in 0..=ticks {
        let phase = (k.wrapping_mul(vibrato.speed as usize) & 0xFF) as u8;
        let sweep = if vibrato.sweep == 0 {
            1.0
        } else {
            (k as f32 / vibrato.sweep as f32).min(1.0)
        };
        let offset = vibrato.waveform.value_at(phase) * depth * sweep;
        let rate = pitch.playback_rate(base + offset, sample_rate);
        let at = start + k as f64 * tick;
        if k == 0 {
            param.set_value_at_time(rate, at);
        } else {
            param.linear_ramp_to_value_at_time(rate, at);
        }
    }
    ticks + 1
}

#[cfg(test)]
mod tests {
    use wl_ir::{EnvelopeLoop, VibratoWaveform};

    use super::*;
    use crate::pitch::TrackerMode;

    const TICK: f64 = 0.02;

    #[test]
    fn tick_length_follows_tempo() {
        assert!((tick_duration(125.0) - 0.02).abs() < 1e-12);
        assert!((tick_duration(150.0) - 2.5 / 150.0).abs() < 1e-12);
    }

    #[test]
    fn level_mappings() {
        assert_eq!(volume_level(64), 1.0);
        assert_eq!(volume_level(32), 0.5);
        assert_eq!(pan_level(32), 0.0);
        assert_eq!(pan_level(0), -1.0);
        assert_eq!(pan_level(64), 1.0);
    }

    #[test]
    fn finite_envelope_ramps_through_points() {
        let env = Envelope::from_points(&[(0, 64), (10, 32), (20, 0)]);
        let mut p = AudioParam::new(1.0);
        let kind = schedule_envelope(&mut p, &env, 1.0, TICK, volume_level);
        assert_eq!(kind, EnvelopeSchedule::Finite);
        assert_eq!(p.value_at(1.0), 1.0);
        assert!((p.value_at(1.1) - 0.75).abs() < 1e-5);
        assert!((p.value_at(1.2) - 0.5).abs() < 1e-5);
        assert_eq!(p.value_at(2.0), 0.0);
    }

    #[test]
    fn sustain_holds_until_release() {
        let mut env = Envelope::from_points(&[(0, 0), (5, 64), (10, 48), (30, 0)]);
        env.sustain_point = Some(2);
        let mut p = AudioParam::new(0.0);
        let kind = schedule_envelope(&mut p, &env, 0.0, TICK, volume_level);
        assert_eq!(kind, EnvelopeSchedule::Sustaining { point: 2 });
        assert_eq!(p.value_at(5.0), 0.75);

        schedule_release(&mut p, &env, 5.0, TICK, volume_level);
        assert_eq!(p.value_at(5.0), 0.75);
        assert!((p.value_at(5.2) - 0.375).abs() < 1e-5);
        assert_eq!(p.value_at(5.5), 0.0);
    }

    #[test]
    fn loop_repeats_until_horizon() {
        let mut env = Envelope::from_points(&[(0, 64), (10, 0), (20, 64)]);
        env.loop_range = Some(EnvelopeLoop { start: 1, end: 2 });
        let mut p = AudioParam::new(1.0);
        let kind = schedule_envelope(&mut p, &env, 0.0, TICK, volume_level);
        assert_eq!(kind, EnvelopeSchedule::Looping);
        // loop span is 10 ticks = 0.2 s: 0 at 0.2, 1 at 0.4, 0 at 0.4 again...
        assert!((p.value_at(0.5) - 0.5).abs() < 1e-4);
        assert!((p.value_at(4.5) - 0.5).abs() < 1e-4);
        assert_eq!(p.value_at(AUTOMATION_HORIZON + 5.0), p.final_value());
    }

    #[test]
    fn fadeout_length_follows_ft2() {
        let mut p = AudioParam::new(1.0);
        let duration = schedule_fadeout(&mut p, 4096, 1.0, TICK, 0.01);
        assert!((duration - 0.32).abs() < 1e-9);
        assert!((p.value_at(1.16) - 0.5).abs() < 1e-4);
        assert!(p.value_at(1.33).abs() < 1e-5);

        let mut cut = AudioParam::new(1.0);
        schedule_fadeout(&mut cut, 0, 1.0, TICK, 0.01);
        assert_eq!(cut.value_at(1.02), 0.0);
    }

    #[test]
    fn vibrato_swings_around_the_semitone() {
        let pitch = TrackerMode::ProTracker.pitch_model();
        let vib = AutoVibrato { waveform: VibratoWaveform::Square, speed: 64, depth: 8, sweep: 0 };
        let mut p = AudioParam::new(0.0);
        let n = schedule_vibrato(&mut p, &vib, pitch.as_ref(), 430.0, 0, 44100, 0.0, TICK, 1.0);
        assert_eq!(n, 51);

        let centre = pitch.playback_rate(428.0, 44100);
        let high = pitch.playback_rate(420.0, 44100);
        let low = pitch.playback_rate(436.0, 44100);
        // square: phases 0 and 64 are +1, 128 and 192 are -1
        assert_eq!(p.value_at(0.0), pitch.playback_rate(436.0, 44100));
        assert!(p.value_at(0.05) > centre);
        assert_eq!(p.value_at(2.0 * TICK), pitch.playback_rate(420.0, 44100));
        assert!(low < centre && centre < high);
    }

    #[test]
    fn inactive_vibrato_schedules_nothing() {
        let pitch = TrackerMode::ProTracker.pitch_model();
        let vib = AutoVibrato::default();
        let mut p = AudioParam::new(1.0);
        assert_eq!(schedule_vibrato(&mut p, &vib, pitch.as_ref(), 428.0, 0, 44100, 0.0, TICK, 1.0), 0);
        assert!(!p.has_automation());
    }
}
