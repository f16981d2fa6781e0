//! The audio engine: master bus, channel chains and render mode switching.
//!
//! ```text
//! chain 0 ─┐
//! chain 1 ─┼→ low-pass → master volume → cutoff gate → destination
//! chain n ─┘
//! ```
//!
//! The bus and the chains are rebuilt from stored settings every time the
//! engine moves between the live context and an offline render, so an
//! export never changes what the user hears afterwards.

use std::collections::VecDeque;
use std::mem;

use tracing::{debug, info, trace, warn};

use crate::automation::tick_duration;
use crate::chain::{ChannelFilterChain, Stage, StageValue};
use crate::config::{EngineConfig, StereoSeparation};
use crate::context::{LiveContext, LiveRenderer, OfflineContext, PendingRender, RenderContext, RenderMode};
use crate::error::EngineError;
use crate::graph::{Graph, NodeId, NodeKind, OnePoleLowPass, Param, AMIGA_CUTOFF_HZ};
use crate::pitch::{PitchModel, TrackerMode};
use crate::registry::ScheduledNoteRegistry;
use crate::scheduler::ActiveNoteHandle;

/// Master gain applied on top of the user volume.
pub const MASTER_HEADROOM: f32 = 0.7;

/// Smoothing for master volume changes and the cutoff gate, in seconds.
pub const MASTER_RAMP: f64 = 0.02;

/// Undrained events kept before the oldest are dropped.
pub const EVENT_QUEUE_LIMIT: usize = 1024;

/// Notifications for the UI layer, collected until drained.
///
/// The queue keeps the newest [`EVENT_QUEUE_LIMIT`] events; callers that
/// care about every event drain it at least that often.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    NoteTriggered(ActiveNoteHandle),
    ChannelCountChanged(usize),
    FilterChainCountChanged(usize),
}

#[derive(Clone, Copy, Debug)]
struct MasterBus {
    low_pass: NodeId,
    master_volume: NodeId,
    cutoff: NodeId,
}

pub struct AudioEngine {
    pub(crate) config: EngineConfig,
    pub(crate) pitch: Box<dyn PitchModel>,
    pub(crate) context: RenderContext,
    retained_live: Option<LiveContext>,
    live_renderer: LiveRenderer,
    bus: Option<MasterBus>,
    pub(crate) chains: Vec<ChannelFilterChain>,
    pub(crate) registry: ScheduledNoteRegistry,
    channel_count: usize,
    pub(crate) edit_channel: usize,
    master_volume: f32,
    gate_open: bool,
    pub(crate) tick: f64,
    events: VecDeque<EngineEvent>,
    pub(crate) mono_warned: bool,
}

impl AudioEngine {
    /// Create an engine on a fresh live context. Call [`init`](Self::init)
    /// before triggering notes.
    pub fn new(config: EngineConfig) -> Self {
        let live = LiveContext::new(config.sample_rate, config.stereo_panning);
        let live_renderer = live.renderer();
        let chains = (0..config.channel_count)
            .map(|i| ChannelFilterChain::new(i, config.default_stages))
            .collect();
        Self {
            pitch: config.tracker_mode.pitch_model(),
            context: RenderContext::Live(live),
            retained_live: None,
            live_renderer,
            bus: None,
            chains,
            registry: ScheduledNoteRegistry::new(),
            channel_count: config.channel_count,
            edit_channel: 0,
            master_volume: config.master_volume.max(0.0),
            gate_open: true,
            tick: tick_duration(config.bpm),
            events: VecDeque::new(),
            mono_warned: false,
            config,
        }
    }

    /// Build the master bus and connect every channel chain to it.
    pub fn init(&mut self) {
        if self.bus.is_some() {
            debug!("engine already initialized");
            return;
        }
        self.rebuild();
        let count = self.chains.len();
        self.apply_separation(0..count);
        info!(
            sample_rate = self.config.sample_rate,
            channels = self.channel_count,
            mode = ?self.config.tracker_mode,
            "audio engine initialized"
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.bus.is_some()
    }

    /// Build the bus in the current context and attach every chain to it.
    fn rebuild(&mut self) {
        let mut graph = self.context.graph();
        let bus = build_bus(&mut graph, self.master_volume, self.gate_open, self.config.amiga_filter);
        for chain in &mut self.chains {
            chain.detach();
            chain.attach(&mut graph, bus.low_pass);
        }
        drop(graph);
        self.bus = Some(bus);
    }

    fn bus(&self) -> Result<MasterBus, EngineError> {
        self.bus.ok_or(EngineError::MissingDependency("master bus"))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn render_mode(&self) -> RenderMode {
        self.context.mode()
    }

    /// Identity of the active context. Changes on every mode switch.
    pub fn context_id(&self) -> u64 {
        self.context.id()
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate()
    }

    pub fn current_time(&self) -> f64 {
        self.context.current_time()
    }

    /// Frames the pending offline render will produce.
    pub fn offline_length(&self) -> Option<usize> {
        match &self.context {
            RenderContext::Offline(c) => Some(c.length()),
            RenderContext::Live(_) => None,
        }
    }

    /// Pull handle for the audio driver. Stays valid across mode switches.
    pub fn live_renderer(&self) -> LiveRenderer {
        self.live_renderer.clone()
    }

    pub fn pitch(&self) -> &dyn PitchModel {
        self.pitch.as_ref()
    }

    pub fn tracker_mode(&self) -> TrackerMode {
        self.config.tracker_mode
    }

    pub fn registry(&self) -> &ScheduledNoteRegistry {
        &self.registry
    }

    /// Called by the playback clock to age out old note handles.
    pub fn rotate_registry(&mut self) {
        self.registry.rotate();
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    /// Events waiting to be drained.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn publish(&mut self, event: EngineEvent) {
        if self.events.len() == EVENT_QUEUE_LIMIT {
            self.events.pop_front();
            trace!("event queue full, dropped the oldest event");
        }
        self.events.push_back(event);
    }

    // --- Cutoff gate ---

    /// Open the cutoff gate with a short fade-in.
    pub fn enable(&mut self) {
        self.gate_open = true;
        let Ok(bus) = self.bus() else {
            return;
        };
        let mut graph = self.context.graph();
        let now = graph.current_time();
        if let Some(gate) = graph.param_mut(bus.cutoff, Param::Gain) {
            gate.cancel_and_hold_at_time(now);
            gate.linear_ramp_to_value_at_time(1.0, now + MASTER_RAMP);
        }
    }

    /// Close the gate at once and silence every registered note.
    pub fn disable(&mut self) {
        self.gate_open = false;
        let Ok(bus) = self.bus() else {
            self.registry.clear();
            return;
        };
        let mut graph = self.context.graph();
        if let Some(gate) = graph.param_mut(bus.cutoff, Param::Gain) {
            gate.cancel_scheduled_values(f64::NEG_INFINITY);
            gate.set_value(0.0);
        }
        self.registry.mute_all(&mut graph);
    }

    pub fn is_enabled(&self) -> bool {
        self.gate_open
    }

    // --- Master volume ---

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Set the master volume, ramping from the previous value over 20 ms
    /// starting at `time` (default now).
    pub fn set_master_volume(&mut self, value: f32, time: Option<f64>) {
        let previous = self.master_volume;
        self.master_volume = value.max(0.0);
        let bus = match self.bus() {
            Ok(bus) => bus,
            Err(e) => {
                debug!(error = %e, value, "master volume stored until init");
                return;
            }
        };
        let mut graph = self.context.graph();
        let at = time.unwrap_or_else(|| graph.current_time());
        if let Some(gain) = graph.param_mut(bus.master_volume, Param::Gain) {
            gain.set_value_at_time(previous * MASTER_HEADROOM, at);
            gain.linear_ramp_to_value_at_time(self.master_volume * MASTER_HEADROOM, at + MASTER_RAMP);
        }
    }

    /// Slide the master volume so it reaches `value` at `time`.
    pub fn slide_master_volume(&mut self, value: f32, time: f64) {
        self.master_volume = value.max(0.0);
        let bus = match self.bus() {
            Ok(bus) => bus,
            Err(e) => {
                debug!(error = %e, value, "master volume slide skipped, stored until init");
                return;
            }
        };
        let mut graph = self.context.graph();
        let now = graph.current_time();
        if let Some(gain) = graph.param_mut(bus.master_volume, Param::Gain) {
            gain.cancel_and_hold_at_time(now);
            gain.linear_ramp_to_value_at_time(self.master_volume * MASTER_HEADROOM, time.max(now));
        }
    }

    // --- Channels ---

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn filter_chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn filter_chain(&self, index: usize) -> Option<&ChannelFilterChain> {
        self.chains.get(index)
    }

    /// Change the tracker channel count. Filter chains are added as needed
    /// but never removed.
    pub fn set_channel_count(&mut self, count: usize) {
        self.channel_count = count;
        self.publish(EngineEvent::ChannelCountChanged(count));

        let existing = self.chains.len();
        if count <= existing {
            return;
        }
        let bus = self.bus;
        let mut graph = self.context.graph();
        for index in existing..count {
            let mut chain = ChannelFilterChain::new(index, self.config.default_stages);
            if let Some(bus) = bus {
                chain.attach(&mut graph, bus.low_pass);
            }
            self.chains.push(chain);
        }
        drop(graph);
        self.apply_separation(existing..count);
        debug!(from = existing, to = count, "filter chains added");
        self.publish(EngineEvent::FilterChainCountChanged(count));
    }

    pub fn edit_channel(&self) -> usize {
        self.edit_channel
    }

    /// Channel used by requests that do not name one.
    pub fn set_edit_channel(&mut self, channel: usize) {
        self.edit_channel = channel;
    }

    pub fn stereo_separation(&self) -> StereoSeparation {
        self.config.stereo_separation
    }

    /// Pan channels Amiga style: 0 and 3 of every four to the left, 1 and
    /// 2 to the right. FastTracker modes keep every channel centred.
    pub fn set_stereo_separation(&mut self, separation: StereoSeparation) {
        self.config.stereo_separation = separation;
        let count = self.chains.len();
        self.apply_separation(0..count);
    }

    fn apply_separation(&mut self, channels: std::ops::Range<usize>) {
        let amount = if self.config.tracker_mode.is_fasttracker_family() {
            0.0
        } else {
            self.config.stereo_separation.amount()
        };
        let mut graph = self.context.graph();
        for chain in self.chains.get_mut(channels).into_iter().flatten() {
            let pan = separation_pan(chain.index(), amount);
            chain.set_stage_value(&mut graph, StageValue::Panning(pan));
        }
    }

    pub fn set_stage_enabled(&mut self, channel: usize, stage: Stage, enabled: bool) {
        let count = self.chains.len();
        let Some(chain) = self.chains.get_mut(channel) else {
            warn!(channel, count, "no filter chain for channel");
            return;
        };
        chain.set_stage_enabled(&mut self.context.graph(), stage, enabled);
    }

    pub fn set_stage_value(&mut self, channel: usize, value: StageValue) {
        let count = self.chains.len();
        let Some(chain) = self.chains.get_mut(channel) else {
            warn!(channel, count, "no filter chain for channel");
            return;
        };
        chain.set_stage_value(&mut self.context.graph(), value);
    }

    // --- Global settings ---

    /// Switch pitch model. Channel panning follows the new mode.
    pub fn set_tracker_mode(&mut self, mode: TrackerMode) {
        if mode == self.config.tracker_mode {
            return;
        }
        self.config.tracker_mode = mode;
        self.pitch = mode.pitch_model();
        let count = self.chains.len();
        self.apply_separation(0..count);
        debug!(?mode, "tracker mode changed");
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.config.bpm = bpm;
        self.tick = tick_duration(bpm);
    }

    pub fn amiga_filter(&self) -> bool {
        self.config.amiga_filter
    }

    /// Switch the Amiga LED filter on the master bus.
    pub fn set_amiga_filter(&mut self, enabled: bool) {
        self.config.amiga_filter = enabled;
        let Ok(bus) = self.bus() else {
            return;
        };
        if let Some(filter) = self.context.graph().low_pass_mut(bus.low_pass) {
            filter.set_enabled(enabled);
        }
    }

    // --- Render mode ---

    /// Route everything into a new offline context of `seconds` length.
    ///
    /// The live graph is emptied; notes scheduled on it are dropped. Stage
    /// settings carry over to the offline graph.
    pub fn start_offline_render(&mut self, seconds: f64) -> Result<(), EngineError> {
        if self.render_mode() == RenderMode::Offline {
            let err = EngineError::ConcurrentRenderConflict("an offline render is already in progress");
            warn!(error = %err, "offline render rejected");
            return Err(err);
        }
        self.bus()?;

        let offline = OfflineContext::new(self.config.sample_rate, seconds, self.config.stereo_panning);
        let frames = offline.length();
        if let RenderContext::Live(live) = mem::replace(&mut self.context, RenderContext::Offline(offline)) {
            live.teardown();
            self.retained_live = Some(live);
        }
        self.registry.clear();
        self.rebuild();
        info!(seconds, frames, "offline render started");
        Ok(())
    }

    /// Start rendering the offline graph and return to live playback.
    ///
    /// The render runs on a worker thread; the returned future resolves
    /// with the buffer and cancels the render if dropped.
    pub fn finish_offline_render(&mut self) -> Result<PendingRender, EngineError> {
        if self.render_mode() != RenderMode::Offline {
            let err = EngineError::ConcurrentRenderConflict("no offline render in progress");
            warn!(error = %err, "finish rejected");
            return Err(err);
        }
        let Some(live) = self.retained_live.take() else {
            return Err(EngineError::MissingDependency("retained live context"));
        };

        let previous = mem::replace(&mut self.context, RenderContext::Live(live));
        self.registry.clear();
        self.rebuild();

        match previous {
            RenderContext::Offline(offline) => {
                debug!(frames = offline.length(), "offline render handed to worker");
                Ok(offline.start_rendering())
            }
            RenderContext::Live(_) => Err(EngineError::ConcurrentRenderConflict("no offline render in progress")),
        }
    }
}

fn build_bus(graph: &mut Graph, master_volume: f32, gate_open: bool, amiga_filter: bool) -> MasterBus {
    let low_pass = graph.add(NodeKind::LowPass(OnePoleLowPass::new(AMIGA_CUTOFF_HZ, amiga_filter)));
    let master = graph.add(NodeKind::gain(master_volume * MASTER_HEADROOM));
    let cutoff = graph.add(NodeKind::gain(if gate_open { 1.0 } else { 0.0 }));
    let destination = graph.destination();
    graph.connect(low_pass, master);
    graph.connect(master, cutoff);
    graph.connect(cutoff, destination);
    MasterBus { low_pass, master_volume: master, cutoff }
}

/// Pan for `channel` at separation `amount`.
pub fn separation_pan(channel: usize, amount: f32) -> f32 {
    match channel % 4 {
        0 | 3 => -amount,
        _ => amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AudioEngine {
        let mut engine = AudioEngine::new(EngineConfig { sample_rate: 1000, ..EngineConfig::default() });
        engine.init();
        engine
    }

    fn gain_at(engine: &AudioEngine, node: NodeId, time: f64) -> f32 {
        engine.context.graph().param(node, Param::Gain).map(|p| p.value_at(time)).unwrap_or(f32::NAN)
    }

    #[test]
    fn init_builds_bus_and_chains() {
        let engine = engine();
        assert!(engine.is_initialized());
        assert_eq!(engine.filter_chain_count(), 4);
        let bus = engine.bus.unwrap();
        let graph = engine.context.graph();
        assert!(graph.is_connected(bus.low_pass, bus.master_volume));
        assert!(graph.is_connected(bus.cutoff, graph.destination()));
        for chain in &engine.chains {
            assert!(graph.is_connected(chain.output().unwrap(), bus.low_pass));
        }
    }

    #[test]
    fn uninitialized_engine_has_no_bus() {
        let mut engine = AudioEngine::new(EngineConfig::default());
        assert!(!engine.is_initialized());
        assert!(matches!(
            engine.start_offline_render(1.0),
            Err(EngineError::MissingDependency(_))
        ));
        engine.disable();
        engine.enable();
    }

    #[test]
    fn master_volume_ramps_with_headroom() {
        let mut engine = engine();
        let bus = engine.bus.unwrap();
        engine.set_master_volume(0.5, Some(1.0));
        assert!((gain_at(&engine, bus.master_volume, 1.0) - 0.7).abs() < 1e-6);
        assert!((gain_at(&engine, bus.master_volume, 1.01) - 0.525).abs() < 1e-5);
        assert!((gain_at(&engine, bus.master_volume, 1.02) - 0.35).abs() < 1e-6);
        assert_eq!(engine.master_volume(), 0.5);
    }

    #[test]
    fn master_volume_before_init_applies_at_init() {
        let mut engine = AudioEngine::new(EngineConfig::default());
        engine.set_master_volume(0.5, None);
        engine.slide_master_volume(0.25, 1.0);
        assert_eq!(engine.master_volume(), 0.25);

        engine.init();
        let bus = engine.bus.unwrap();
        assert!((gain_at(&engine, bus.master_volume, 0.0) - 0.25 * MASTER_HEADROOM).abs() < 1e-6);
    }

    #[test]
    fn slide_reaches_target_at_time() {
        let mut engine = engine();
        let bus = engine.bus.unwrap();
        engine.slide_master_volume(0.0, 2.0);
        assert!((gain_at(&engine, bus.master_volume, 1.0) - 0.35).abs() < 1e-5);
        assert_eq!(gain_at(&engine, bus.master_volume, 2.0), 0.0);
    }

    #[test]
    fn gate_closes_at_once_and_reopens_smoothly() {
        let mut engine = engine();
        let bus = engine.bus.unwrap();
        engine.disable();
        assert!(!engine.is_enabled());
        assert_eq!(gain_at(&engine, bus.cutoff, 0.0), 0.0);

        engine.enable();
        assert_eq!(gain_at(&engine, bus.cutoff, 0.0), 0.0);
        assert!((gain_at(&engine, bus.cutoff, 0.01) - 0.5).abs() < 1e-5);
        assert_eq!(gain_at(&engine, bus.cutoff, 0.05), 1.0);
    }

    #[test]
    fn channel_count_only_grows_chains() {
        let mut engine = engine();
        engine.set_channel_count(8);
        assert_eq!(engine.filter_chain_count(), 8);
        assert!(engine.filter_chain(7).unwrap().is_attached());
        engine.set_channel_count(2);
        assert_eq!(engine.channel_count(), 2);
        assert_eq!(engine.filter_chain_count(), 8);
        assert_eq!(
            engine.drain_events(),
            vec![
                EngineEvent::ChannelCountChanged(8),
                EngineEvent::FilterChainCountChanged(8),
                EngineEvent::ChannelCountChanged(2),
            ]
        );
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn undrained_events_keep_the_newest() {
        let mut engine = engine();
        engine.drain_events();
        for n in 0..EVENT_QUEUE_LIMIT + 10 {
            engine.set_channel_count(n % 4);
        }
        assert_eq!(engine.pending_events(), EVENT_QUEUE_LIMIT);

        let events = engine.drain_events();
        assert_eq!(events.first(), Some(&EngineEvent::ChannelCountChanged(10 % 4)));
        assert_eq!(events.last(), Some(&EngineEvent::ChannelCountChanged((EVENT_QUEUE_LIMIT + 9) % 4)));
        assert_eq!(engine.pending_events(), 0);
    }

    #[test]
    fn new_chains_get_separation() {
        let mut engine = engine();
        engine.set_stereo_separation(StereoSeparation::Full);
        engine.set_channel_count(6);
        assert_eq!(engine.filter_chain(4).unwrap().panning_value(), -1.0);
        assert_eq!(engine.filter_chain(5).unwrap().panning_value(), 1.0);
    }

    #[test]
    fn balanced_separation_by_default() {
        let engine = engine();
        let pans: Vec<f32> = engine.chains.iter().map(|c| c.panning_value()).collect();
        assert_eq!(pans, vec![-0.5, 0.5, 0.5, -0.5]);
    }

    #[test]
    fn fasttracker_modes_centre_channels() {
        let mut engine = engine();
        engine.set_stereo_separation(StereoSeparation::Full);
        engine.set_tracker_mode(TrackerMode::FastTrackerLinear);
        assert!(engine.chains.iter().all(|c| c.panning_value() == 0.0));
        assert_eq!(engine.pitch().mode(), TrackerMode::FastTrackerLinear);

        engine.set_tracker_mode(TrackerMode::ProTracker);
        assert_eq!(engine.filter_chain(0).unwrap().panning_value(), -1.0);
    }

    #[test]
    fn amiga_filter_toggles_bus_low_pass() {
        let mut engine = engine();
        let bus = engine.bus.unwrap();
        engine.set_amiga_filter(true);
        assert!(engine.amiga_filter());
        assert!(engine.context.graph().low_pass_mut(bus.low_pass).unwrap().is_enabled());
        engine.set_amiga_filter(false);
        assert!(!engine.context.graph().low_pass_mut(bus.low_pass).unwrap().is_enabled());
    }

    #[test]
    fn offline_switch_rebuilds_in_new_context() {
        let mut engine = engine();
        engine.set_stage_enabled(1, Stage::LowPass, true);
        engine.set_stage_value(1, StageValue::LowPassCutoff(0.25));
        let live_id = engine.context_id();

        engine.start_offline_render(0.5).unwrap();
        assert_eq!(engine.render_mode(), RenderMode::Offline);
        assert_ne!(engine.context_id(), live_id);
        assert_eq!(engine.offline_length(), Some(500));
        assert!(engine.filter_chain(1).unwrap().is_enabled(Stage::LowPass));
        assert_eq!(engine.filter_chain(1).unwrap().params().cutoff, 0.25);

        let offline_id = engine.context_id();
        assert!(engine.start_offline_render(1.0).is_err());
        assert_eq!(engine.context_id(), offline_id);

        let pending = engine.finish_offline_render().unwrap();
        assert_eq!(engine.render_mode(), RenderMode::Live);
        assert_eq!(engine.context_id(), live_id);
        let buffer = pollster::block_on(pending).unwrap();
        assert_eq!(buffer.frames(), 500);
        assert!(engine.finish_offline_render().is_err());
    }

    #[test]
    fn separation_pattern() {
        assert_eq!(separation_pan(0, 1.0), -1.0);
        assert_eq!(separation_pan(1, 1.0), 1.0);
        assert_eq!(separation_pan(2, 1.0), 1.0);
        assert_eq!(separation_pan(3, 1.0), -1.0);
        assert_eq!(separation_pan(7, 0.5), -0.5);
    }
}
