//! Note scheduling: turns a trigger request into a timed per-note chain.
//!
//! Each note gets its own short-lived nodes, wired into its channel's
//! filter chain:
//!
//! ```text
//! source → volume → [volume env] → [panning env] → fade-in → [panner] → chain input
//! ```
//!
//! All per-note nodes are transient, so the graph reaps them once the
//! source has ended or been stopped.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use wl_ir::{InstrumentBank, InstrumentKey, NoteTriggerRequest, Sample};

use crate::automation::{
    pan_level, schedule_envelope, schedule_fadeout, schedule_release, schedule_vibrato, volume_level,
    EnvelopeSchedule, AUTOMATION_HORIZON,
};
use crate::context::RenderMode;
use crate::engine::{AudioEngine, EngineEvent};
use crate::error::EngineError;
use crate::graph::{BufferSource, NodeId, NodeKind, Param};
use crate::registry::VolumeControl;

/// Fade-in applied to every note, in seconds.
pub const FADE_IN: f64 = 0.01;

/// Ramp used when a note's volume changes or it is cut, in seconds.
pub const NOTE_RAMP: f64 = 0.01;

/// Longest buffer an unrolled loop is written out to, in frames.
pub const UNROLL_LIMIT: usize = 1 << 18;

/// A scheduled note: the nodes that make it up and how it was resolved.
///
/// Node ids are only meaningful in the context the note was scheduled in
/// (see [`ActiveNoteHandle::context`]).
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveNoteHandle {
    pub source: NodeId,
    /// Note volume control
    pub volume: NodeId,
    pub volume_envelope: Option<NodeId>,
    pub panning_envelope: Option<NodeId>,
    pub fade_in: NodeId,
    /// Per-note panner, absent in mono contexts
    pub panning: Option<NodeId>,
    pub instrument: InstrumentKey,
    pub note: u8,
    /// Period as requested
    pub start_period: f32,
    /// Period after finetune and clamping
    pub current_period: f32,
    pub finetune: i8,
    pub playback_rate: f32,
    pub sample_rate: u32,
    pub channel: usize,
    /// Start time in context seconds
    pub time: f64,
    /// Volume in device units (0-100)
    pub volume_value: f32,
    /// Id of the context the nodes live in
    pub context: u64,
    pub envelope: Option<EnvelopeSchedule>,
}

impl AudioEngine {
    /// Schedule a note. Returns `None` (and logs) if it cannot be played.
    ///
    /// A `NOTE_OFF` request goes through the same path at zero volume.
    pub fn trigger_note(
        &mut self,
        bank: &InstrumentBank,
        request: &NoteTriggerRequest,
    ) -> Option<ActiveNoteHandle> {
        match self.schedule_note(bank, request) {
            Ok(handle) => {
                if self.context.mode() == RenderMode::Live {
                    self.publish(EngineEvent::NoteTriggered(handle.clone()));
                }
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, note = request.note, "note not triggered");
                None
            }
        }
    }

    fn resolve_channel(&self, requested: Option<usize>) -> Result<usize, EngineError> {
        let count = self.chains.len();
        if count == 0 {
            return Err(EngineError::MissingDependency("filter chains"));
        }
        let index = requested.unwrap_or(self.edit_channel);
        if index >= count {
            let err = EngineError::ChannelOutOfRange { index, count };
            warn!(error = %err, "using the last channel");
            return Ok(count - 1);
        }
        Ok(index)
    }

    fn schedule_note(
        &mut self,
        bank: &InstrumentBank,
        request: &NoteTriggerRequest,
    ) -> Result<ActiveNoteHandle, EngineError> {
        let instrument = bank
            .get(request.instrument)
            .ok_or(EngineError::UnknownInstrument(request.instrument))?;
        let sample = instrument
            .sample_for_note(request.note)
            .ok_or(EngineError::InvalidSampleState("instrument has no samples"))?;
        let channel = self.resolve_channel(request.channel)?;
        let input = self.chains[channel]
            .input()
            .ok_or(EngineError::MissingDependency("filter chain"))?;

        let volume = if request.is_note_off() {
            0.0
        } else {
            request.volume.unwrap_or(sample.volume as f32 * 100.0 / 64.0)
        }
        .clamp(0.0, 100.0);
        let panning = request
            .panning
            .unwrap_or(sample.panning as f32 / 64.0)
            .clamp(-1.0, 1.0);

        let finetune = sample.finetune;
        let period = if finetune != 0 {
            self.pitch.apply_finetune(request.period, finetune)
        } else {
            request.period
        };
        let period = self.pitch.clamp_period(period);
        let sample_rate = self.context.sample_rate();
        let rate = self.pitch.playback_rate(period, sample_rate);
        let sr = sample_rate.max(1) as f64;

        let (mut source, looping) = build_source(sample, rate, sr, self.config.unroll_loops);

        let mut graph = self.context.graph();
        let now = graph.current_time();
        let time = request.time.map_or(now, |t| t.max(now));

        // an unrolled buffer runs past the sample end; offsets stop at the end
        let offset = request
            .effects
            .sample_offset
            .map_or(0, |frames| (frames as usize).min(sample.len()).min(source.len()));
        source.start(time, offset as f64 / sr);

        if let Some(vibrato) = instrument.vibrato.filter(|v| v.is_active()) {
            let duration = if looping || rate <= 0.0 {
                AUTOMATION_HORIZON
            } else {
                (source.len() - offset) as f64 / sr / rate as f64
            };
            let points = schedule_vibrato(
                &mut source.playback_rate,
                &vibrato,
                self.pitch.as_ref(),
                period,
                finetune,
                sample_rate,
                time,
                self.tick,
                duration,
            );
            trace!(points, "auto-vibrato scheduled");
        }

        let source_id = graph.add_transient(NodeKind::Source(source));
        let volume_id = graph.add_transient(NodeKind::gain(volume / 100.0));
        if let Some(gain) = graph.param_mut(volume_id, Param::Gain) {
            gain.set_value_at_time(volume / 100.0, time);
        }
        graph.connect(source_id, volume_id);
        let mut tail = volume_id;

        let mut envelope = None;
        let volume_envelope = if instrument.volume_envelope.is_active() {
            let node = graph.add_transient(NodeKind::gain(1.0));
            if let Some(gain) = graph.param_mut(node, Param::Gain) {
                envelope = Some(schedule_envelope(gain, &instrument.volume_envelope, time, self.tick, volume_level));
            }
            graph.connect(tail, node);
            tail = node;
            Some(node)
        } else {
            None
        };

        let stereo = graph.channels() > 1;
        let panning_envelope = if stereo && instrument.panning_envelope.is_active() {
            let node = graph.add_transient(NodeKind::panner(0.0));
            if let Some(pan) = graph.param_mut(node, Param::Pan) {
                schedule_envelope(pan, &instrument.panning_envelope, time, self.tick, pan_level);
            }
            graph.connect(tail, node);
            tail = node;
            Some(node)
        } else {
            None
        };

        let fade_in = graph.add_transient(NodeKind::gain(0.0));
        if let Some(gain) = graph.param_mut(fade_in, Param::Gain) {
            gain.set_value_at_time(0.0, time);
            gain.linear_ramp_to_value_at_time(1.0, time + FADE_IN);
        }
        graph.connect(tail, fade_in);
        tail = fade_in;

        let panner = if stereo {
            let node = graph.add_transient(NodeKind::panner(panning));
            graph.connect(tail, node);
            tail = node;
            Some(node)
        } else {
            if !self.mono_warned {
                let err = EngineError::UnsupportedCapability("stereo panning");
                warn!(error = %err, "notes will play unpanned");
                self.mono_warned = true;
            }
            None
        };
        graph.connect(tail, input);
        drop(graph);

        self.registry.record(VolumeControl { gain: volume_id, source: source_id });
        debug!(channel, period, rate, volume, time, "note scheduled");

        Ok(ActiveNoteHandle {
            source: source_id,
            volume: volume_id,
            volume_envelope,
            panning_envelope,
            fade_in,
            panning: panner,
            instrument: request.instrument,
            note: request.note,
            start_period: request.period,
            current_period: period,
            finetune,
            playback_rate: rate,
            sample_rate,
            channel,
            time,
            volume_value: volume,
            context: self.context.id(),
            envelope,
        })
    }

    fn owns(&self, handle: &ActiveNoteHandle) -> bool {
        if handle.context != self.context.id() {
            debug!(context = handle.context, "note belongs to another render context");
            return false;
        }
        true
    }

    /// Key-off: let the envelopes run past their sustain point and fade the
    /// note out. Notes without a volume envelope are cut.
    pub fn release_note(&mut self, bank: &InstrumentBank, handle: &ActiveNoteHandle, time: Option<f64>) {
        if !self.owns(handle) {
            return;
        }
        let Some(instrument) = bank.get(handle.instrument) else {
            warn!(error = %EngineError::UnknownInstrument(handle.instrument), "cannot release note");
            return;
        };
        let tick = self.tick;
        let mut graph = self.context.graph();
        let now = graph.current_time();
        let release = time.map_or(now, |t| t.max(now));

        let env = &instrument.volume_envelope;
        let fade_end = match handle.volume_envelope {
            Some(node) if env.is_active() => {
                if let Some(gain) = graph.param_mut(node, Param::Gain) {
                    schedule_release(gain, env, release, tick, volume_level);
                }
                if instrument.fadeout == 0 {
                    None
                } else {
                    graph
                        .param_mut(handle.fade_in, Param::Gain)
                        .map(|gain| release + schedule_fadeout(gain, instrument.fadeout, release, tick, NOTE_RAMP))
                }
            }
            _ => graph
                .param_mut(handle.fade_in, Param::Gain)
                .map(|gain| release + schedule_fadeout(gain, 0, release, tick, NOTE_RAMP)),
        };

        if let Some(node) = handle.panning_envelope {
            if let Some(pan) = graph.param_mut(node, Param::Pan) {
                schedule_release(pan, &instrument.panning_envelope, release, tick, pan_level);
            }
        }
        if let (Some(end), Some(source)) = (fade_end, graph.source_mut(handle.source)) {
            source.stop(end);
        }
    }

    /// Ramp a note to `volume` (device units) from `time`.
    ///
    /// Returns false if the note has already been reaped.
    pub fn set_note_volume(&mut self, handle: &ActiveNoteHandle, volume: f32, time: Option<f64>) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let target = volume.clamp(0.0, 100.0) / 100.0;
        let mut graph = self.context.graph();
        let now = graph.current_time();
        let at = time.map_or(now, |t| t.max(now));
        let Some(gain) = graph.param_mut(handle.volume, Param::Gain) else {
            return false;
        };
        gain.cancel_and_hold_at_time(at);
        gain.linear_ramp_to_value_at_time(target, at + NOTE_RAMP);
        true
    }

    /// Retune a playing note from `time`. Scheduled vibrato after that
    /// point is dropped.
    pub fn set_note_period(&mut self, handle: &mut ActiveNoteHandle, period: f32, time: Option<f64>) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let period = self.pitch.clamp_period(period);
        let rate = self.pitch.playback_rate(period, handle.sample_rate);
        let mut graph = self.context.graph();
        let now = graph.current_time();
        let at = time.map_or(now, |t| t.max(now));
        let Some(param) = graph.param_mut(handle.source, Param::PlaybackRate) else {
            return false;
        };
        param.cancel_scheduled_values(at);
        param.set_value_at_time(rate, at);
        handle.current_period = period;
        handle.playback_rate = rate;
        true
    }

    /// Fade a single note out over a few milliseconds and stop it.
    pub fn mute_note(&mut self, handle: &ActiveNoteHandle, time: Option<f64>) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let mut graph = self.context.graph();
        let now = graph.current_time();
        let at = time.map_or(now, |t| t.max(now));
        let Some(gain) = graph.param_mut(handle.volume, Param::Gain) else {
            return false;
        };
        gain.cancel_and_hold_at_time(at);
        gain.linear_ramp_to_value_at_time(0.0, at + NOTE_RAMP);
        if let Some(source) = graph.source_mut(handle.source) {
            source.stop(at + NOTE_RAMP);
        }
        true
    }
}

/// Sample frames as a playable source, loop applied, and whether it loops.
///
/// Empty samples play one silent frame. Loops are either set on the
/// source in seconds or written out into the buffer.
fn build_source(sample: &Sample, rate: f32, sr: f64, unroll: bool) -> (BufferSource, bool) {
    let mut data = sample.data.to_f32();
    let looped = loop_frames(sample, data.len());
    if data.is_empty() {
        debug!(sample = %sample.name, "empty sample, playing a silent frame");
        data.push(0.0);
    }

    let source = match looped {
        Some((start, end)) if unroll => BufferSource::new(Arc::from(unroll_loop(&data, start, end)), rate),
        Some((start, end)) => {
            let mut source = BufferSource::new(Arc::from(data), rate);
            source.set_loop(start as f64 / sr, end as f64 / sr);
            source
        }
        None => BufferSource::new(Arc::from(data), rate),
    };
    (source, looped.is_some())
}

/// Loop bounds in frames, limited to the data actually present.
fn loop_frames(sample: &Sample, len: usize) -> Option<(usize, usize)> {
    if !sample.has_loop() {
        return None;
    }
    let start = sample.loop_.start as usize;
    let end = (sample.loop_.end() as usize).min(len);
    (start < end).then_some((start, end))
}

/// The sample up to the loop end, then the loop body repeated until the
/// buffer reaches [`UNROLL_LIMIT`] frames.
fn unroll_loop(data: &[f32], start: usize, end: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(UNROLL_LIMIT.max(end));
    out.extend_from_slice(&data[..end]);
    let body = &data[start..end];
    while out.len() < UNROLL_LIMIT {
        let n = body.len().min(UNROLL_LIMIT - out.len());
        out.extend_from_slice(&body[..n]);
    }
    out
}
