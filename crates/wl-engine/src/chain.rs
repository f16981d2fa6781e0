//! Per-channel effect chain.
//!
//! Each channel owns a fixed-order series of optional stages between its
//! input and its volume node:
//!
//! ```text
//! input → high → mid → low → lowpass ─┬──────────────→ panning → volume → bus
//!                                     ├→ reverb send ──┤
//!                                     └→ distortion ───┘
//! ```
//!
//! Disabled stages are skipped when wiring. Stage nodes are created the
//! first time a stage is enabled and kept afterwards so toggling is cheap
//! and keeps its settings. The volume node is the chain's output and is
//! never disconnected from the bus.

use heapless::Vec as StageVec;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::graph::{FilterShape, Graph, NodeId, NodeKind, Param};

/// Shelf/peak gain at a stage value of ±1.0.
pub const EQ_RANGE_DB: f32 = 20.0;
pub const HIGH_SHELF_HZ: f32 = 3200.0;
pub const MID_PEAK_HZ: f32 = 1000.0;
pub const MID_PEAK_Q: f32 = 0.5;
pub const LOW_SHELF_HZ: f32 = 320.0;
/// Lowest cutoff the low-pass stage sweeps down to.
pub const LOWPASS_MIN_HZ: f32 = 40.0;
/// Resonance value to Q scale.
pub const RESONANCE_Q_SCALE: f32 = 30.0;
const MIN_Q: f32 = 0.0001;
const SHELF_Q: f32 = core::f32::consts::FRAC_1_SQRT_2;

/// One effect stage, in chain order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    High,
    Mid,
    Low,
    LowPass,
    Reverb,
    Distortion,
    Panning,
    Volume,
}

impl Stage {
    /// Every stage in canonical chain order.
    pub const ALL: [Stage; 8] = [
        Stage::High,
        Stage::Mid,
        Stage::Low,
        Stage::LowPass,
        Stage::Reverb,
        Stage::Distortion,
        Stage::Panning,
        Stage::Volume,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Sends that branch off the serial path and rejoin it.
    pub fn is_parallel(self) -> bool {
        matches!(self, Stage::Reverb | Stage::Distortion)
    }
}

/// A set of stages, stored as a bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<Stage>")]
pub struct StageSet(u8);

impl StageSet {
    pub const EMPTY: StageSet = StageSet(0);

    pub fn contains(self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    pub fn remove(&mut self, stage: Stage) {
        self.0 &= !stage.bit();
    }

    pub fn with(mut self, stage: Stage) -> Self {
        self.insert(stage);
        self
    }

    pub fn union(self, other: StageSet) -> Self {
        StageSet(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |&s| self.contains(s))
    }
}

/// Volume and panning.
impl Default for StageSet {
    fn default() -> Self {
        StageSet::EMPTY.with(Stage::Volume).with(Stage::Panning)
    }
}

impl From<Vec<Stage>> for StageSet {
    fn from(stages: Vec<Stage>) -> Self {
        stages.into_iter().fold(StageSet::EMPTY, StageSet::with)
    }
}

/// A value change aimed at one stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StageValue {
    /// -1.0..=1.0 → ±20 dB high shelf
    High(f32),
    /// -1.0..=1.0 → ±20 dB peak at 1 kHz
    Mid(f32),
    /// -1.0..=1.0 → ±20 dB low shelf
    Low(f32),
    /// 0.0..=1.0, exponential from 40 Hz to Nyquist
    LowPassCutoff(f32),
    /// 0.0..=1.0, Q = value · 30
    LowPassResonance(f32),
    /// Reverb send level 0.0..=1.0
    Reverb(f32),
    /// Distortion send level 0.0..=1.0
    Distortion(f32),
    /// -1.0..=1.0
    Panning(f32),
    /// Linear gain
    Volume(f32),
}

impl StageValue {
    pub fn stage(&self) -> Stage {
        match self {
            StageValue::High(_) => Stage::High,
            StageValue::Mid(_) => Stage::Mid,
            StageValue::Low(_) => Stage::Low,
            StageValue::LowPassCutoff(_) | StageValue::LowPassResonance(_) => Stage::LowPass,
            StageValue::Reverb(_) => Stage::Reverb,
            StageValue::Distortion(_) => Stage::Distortion,
            StageValue::Panning(_) => Stage::Panning,
            StageValue::Volume(_) => Stage::Volume,
        }
    }
}

/// Last values applied to each stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StageParams {
    pub high: f32,
    pub mid: f32,
    pub low: f32,
    pub cutoff: f32,
    pub resonance: f32,
    pub reverb: f32,
    pub distortion: f32,
    pub panning: f32,
    pub volume: f32,
}

impl Default for StageParams {
    fn default() -> Self {
        Self {
            high: 0.0,
            mid: 0.0,
            low: 0.0,
            cutoff: 1.0,
            resonance: SHELF_Q / RESONANCE_Q_SCALE,
            reverb: 0.3,
            distortion: 0.3,
            panning: 0.0,
            volume: 1.0,
        }
    }
}

impl StageParams {
    fn apply(&mut self, value: StageValue) {
        match value {
            StageValue::High(v) => self.high = v.clamp(-1.0, 1.0),
            StageValue::Mid(v) => self.mid = v.clamp(-1.0, 1.0),
            StageValue::Low(v) => self.low = v.clamp(-1.0, 1.0),
            StageValue::LowPassCutoff(v) => self.cutoff = v.clamp(0.0, 1.0),
            StageValue::LowPassResonance(v) => self.resonance = v.clamp(0.0, 1.0),
            StageValue::Reverb(v) => self.reverb = v.clamp(0.0, 1.0),
            StageValue::Distortion(v) => self.distortion = v.clamp(0.0, 1.0),
            StageValue::Panning(v) => self.panning = v.clamp(-1.0, 1.0),
            StageValue::Volume(v) => self.volume = v.max(0.0),
        }
    }
}

/// Low-pass cutoff in Hz for a 0..=1 control value.
pub fn cutoff_hz(value: f32, sample_rate: u32) -> f32 {
    let max = sample_rate as f32 / 2.0;
    let octaves = libm::log2f(max / LOWPASS_MIN_HZ);
    max * libm::exp2f(octaves * (value - 1.0))
}

/// Filter Q for a 0..=1 resonance value.
pub fn resonance_q(value: f32) -> f32 {
    (value * RESONANCE_Q_SCALE).max(MIN_Q)
}

/// Nodes implementing one stage. Serial stages use the same node for both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StageNodes {
    entry: NodeId,
    exit: NodeId,
}

impl StageNodes {
    fn single(node: NodeId) -> Self {
        Self { entry: node, exit: node }
    }
}

#[derive(Clone, Debug)]
struct ChainNodes {
    input: NodeId,
    stages: [Option<StageNodes>; 8],
}

impl ChainNodes {
    fn get(&self, stage: Stage) -> Option<StageNodes> {
        self.stages[stage as usize]
    }
}

/// Enabled stages and their values: everything that survives a context switch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChainState {
    pub enabled: StageSet,
    pub params: StageParams,
}

#[derive(Debug)]
pub struct ChannelFilterChain {
    index: usize,
    enabled: StageSet,
    materialized: StageSet,
    params: StageParams,
    nodes: Option<ChainNodes>,
}

impl ChannelFilterChain {
    pub fn new(index: usize, stages: StageSet) -> Self {
        Self {
            index,
            enabled: stages.with(Stage::Volume),
            materialized: StageSet::EMPTY,
            params: StageParams::default(),
            nodes: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Where notes for this channel connect.
    pub fn input(&self) -> Option<NodeId> {
        self.nodes.as_ref().map(|n| n.input)
    }

    /// The volume node feeding the bus.
    pub fn output(&self) -> Option<NodeId> {
        self.nodes.as_ref()?.get(Stage::Volume).map(|n| n.exit)
    }

    pub fn is_attached(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.enabled.contains(stage)
    }

    pub fn is_materialized(&self, stage: Stage) -> bool {
        self.materialized.contains(stage)
    }

    pub fn params(&self) -> &StageParams {
        &self.params
    }

    pub fn panning_value(&self) -> f32 {
        self.params.panning
    }

    pub fn state(&self) -> ChainState {
        ChainState { enabled: self.enabled, params: self.params }
    }

    /// Build this chain's nodes in `graph`, feeding `bus_input`.
    ///
    /// Every stage that is enabled or was ever materialized gets a node,
    /// initialised from the stored values.
    pub fn attach(&mut self, graph: &mut Graph, bus_input: NodeId) {
        let input = graph.add(NodeKind::gain(1.0));
        let volume = graph.add(NodeKind::gain(self.params.volume));
        graph.connect(volume, bus_input);

        let mut nodes = ChainNodes { input, stages: [None; 8] };
        nodes.stages[Stage::Volume as usize] = Some(StageNodes::single(volume));

        self.materialized = self.materialized.union(self.enabled);
        for stage in self.materialized.iter().filter(|&s| s != Stage::Volume) {
            nodes.stages[stage as usize] = Some(build_stage(graph, stage, &self.params));
        }
        self.nodes = Some(nodes);
        self.rewire(graph);
    }

    /// Forget the nodes of the current context. Values and flags stay.
    pub fn detach(&mut self) {
        self.nodes = None;
    }

    pub fn set_stage_enabled(&mut self, graph: &mut Graph, stage: Stage, enabled: bool) {
        if stage == Stage::Volume && !enabled {
            warn!(channel = self.index, "the volume stage cannot be disabled");
            return;
        }
        if self.enabled.contains(stage) == enabled {
            return;
        }
        if enabled {
            self.enabled.insert(stage);
        } else {
            self.enabled.remove(stage);
        }

        let Some(nodes) = self.nodes.as_mut() else {
            return;
        };
        if enabled && nodes.get(stage).is_none() {
            nodes.stages[stage as usize] = Some(build_stage(graph, stage, &self.params));
            self.materialized.insert(stage);
            debug!(channel = self.index, ?stage, "stage materialized");
        }
        self.rewire(graph);
    }

    pub fn set_stage_value(&mut self, graph: &mut Graph, value: StageValue) {
        let stage = value.stage();
        if !self.enabled.contains(stage) {
            if !self.materialized.contains(stage) {
                debug!(channel = self.index, ?stage, "value for a stage that was never enabled");
            }
            return;
        }
        self.params.apply(value);

        let Some(stage_nodes) = self.nodes.as_ref().and_then(|n| n.get(stage)) else {
            return;
        };
        let sample_rate = graph.sample_rate();
        let (node, param, v) = match value {
            StageValue::High(v) | StageValue::Mid(v) | StageValue::Low(v) => {
                (stage_nodes.entry, Param::FilterGain, v.clamp(-1.0, 1.0) * EQ_RANGE_DB)
            }
            StageValue::LowPassCutoff(v) => {
                (stage_nodes.entry, Param::Frequency, cutoff_hz(v.clamp(0.0, 1.0), sample_rate))
            }
            StageValue::LowPassResonance(v) => {
                (stage_nodes.entry, Param::Q, resonance_q(v.clamp(0.0, 1.0)))
            }
            StageValue::Reverb(v) | StageValue::Distortion(v) => {
                (stage_nodes.entry, Param::Gain, v.clamp(0.0, 1.0))
            }
            StageValue::Panning(v) => (stage_nodes.entry, Param::Pan, v.clamp(-1.0, 1.0)),
            StageValue::Volume(v) => (stage_nodes.entry, Param::Gain, v.max(0.0)),
        };
        if let Some(p) = graph.param_mut(node, param) {
            p.set_value(v);
        }
    }

    /// Re-run the canonical walk: disconnect everything but the volume
    /// node, then connect enabled stages in order.
    fn rewire(&self, graph: &mut Graph) {
        let Some(nodes) = self.nodes.as_ref() else {
            return;
        };
        graph.disconnect(nodes.input);
        for stage in Stage::ALL.into_iter().filter(|&s| s != Stage::Volume) {
            if let Some(n) = nodes.get(stage) {
                graph.disconnect(n.entry);
                graph.disconnect(n.exit);
            }
        }

        let mut serial: StageVec<NodeId, 8> = StageVec::new();
        let mut sends: StageVec<StageNodes, 2> = StageVec::new();
        let mut tap = 0;
        let _ = serial.push(nodes.input);
        for stage in self.enabled.iter() {
            let Some(n) = nodes.get(stage) else {
                continue;
            };
            if stage.is_parallel() {
                if sends.is_empty() {
                    tap = serial.len() - 1;
                }
                let _ = sends.push(n);
            } else {
                let _ = serial.push(n.entry);
            }
        }

        for pair in serial.windows(2) {
            graph.connect(pair[0], pair[1]);
        }
        if let (Some(&from), Some(&to)) = (serial.get(tap), serial.get(tap + 1)) {
            for send in &sends {
                graph.connect(from, send.entry);
                if send.entry != send.exit {
                    graph.connect(send.entry, send.exit);
                }
                graph.connect(send.exit, to);
            }
        }
    }
}

fn build_stage(graph: &mut Graph, stage: Stage, params: &StageParams) -> StageNodes {
    let sample_rate = graph.sample_rate();
    match stage {
        Stage::High => StageNodes::single(graph.add(NodeKind::filter(
            FilterShape::HighShelf,
            HIGH_SHELF_HZ,
            SHELF_Q,
            params.high * EQ_RANGE_DB,
        ))),
        Stage::Mid => StageNodes::single(graph.add(NodeKind::filter(
            FilterShape::Peaking,
            MID_PEAK_HZ,
            MID_PEAK_Q,
            params.mid * EQ_RANGE_DB,
        ))),
        Stage::Low => StageNodes::single(graph.add(NodeKind::filter(
            FilterShape::LowShelf,
            LOW_SHELF_HZ,
            SHELF_Q,
            params.low * EQ_RANGE_DB,
        ))),
        Stage::LowPass => StageNodes::single(graph.add(NodeKind::filter(
            FilterShape::LowPass,
            cutoff_hz(params.cutoff, sample_rate),
            resonance_q(params.resonance),
            0.0,
        ))),
        Stage::Reverb => {
            let send = graph.add(NodeKind::gain(params.reverb));
            let reverb = graph.add(NodeKind::reverb(sample_rate));
            StageNodes { entry: send, exit: reverb }
        }
        Stage::Distortion => {
            let send = graph.add(NodeKind::gain(params.distortion));
            let shaper = graph.add(NodeKind::shaper(0.5));
            StageNodes { entry: send, exit: shaper }
        }
        Stage::Panning => StageNodes::single(graph.add(NodeKind::panner(params.panning))),
        Stage::Volume => StageNodes::single(graph.add(NodeKind::gain(params.volume))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(stages: StageSet) -> (Graph, NodeId, ChannelFilterChain) {
        let mut graph = Graph::new(44100, 2);
        let bus = graph.add(NodeKind::gain(1.0));
        let mut chain = ChannelFilterChain::new(0, stages);
        chain.attach(&mut graph, bus);
        (graph, bus, chain)
    }

    /// Follow single outgoing edges from the chain input.
    fn serial_path(graph: &Graph, chain: &ChannelFilterChain, bus: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut at = chain.input().unwrap();
        while at != bus {
            path.push(at);
            let outs: Vec<_> = graph.outputs_of(at).collect();
            at = *outs.iter().find(|&&n| !is_send(chain, n)).unwrap();
        }
        path
    }

    fn is_send(chain: &ChannelFilterChain, node: NodeId) -> bool {
        [Stage::Reverb, Stage::Distortion]
            .iter()
            .any(|&s| chain.nodes.as_ref().unwrap().get(s).is_some_and(|n| n.entry == node))
    }

    fn node_of(chain: &ChannelFilterChain, stage: Stage) -> NodeId {
        chain.nodes.as_ref().unwrap().get(stage).unwrap().entry
    }

    #[test]
    fn default_chain_is_input_panning_volume() {
        let (graph, bus, chain) = attached(StageSet::default());
        let path = serial_path(&graph, &chain, bus);
        assert_eq!(
            path,
            vec![chain.input().unwrap(), node_of(&chain, Stage::Panning), chain.output().unwrap()]
        );
    }

    #[test]
    fn volume_is_forced_on() {
        let chain = ChannelFilterChain::new(3, StageSet::EMPTY.with(Stage::High));
        assert!(chain.is_enabled(Stage::Volume));
        assert!(chain.is_enabled(Stage::High));
        assert!(!chain.is_enabled(Stage::Panning));
    }

    #[test]
    fn enabled_stages_follow_canonical_order() {
        let stages = StageSet::EMPTY
            .with(Stage::LowPass)
            .with(Stage::High)
            .with(Stage::Panning);
        let (graph, bus, chain) = attached(stages);
        let path = serial_path(&graph, &chain, bus);
        assert_eq!(
            path,
            vec![
                chain.input().unwrap(),
                node_of(&chain, Stage::High),
                node_of(&chain, Stage::LowPass),
                node_of(&chain, Stage::Panning),
                chain.output().unwrap(),
            ]
        );
    }

    #[test]
    fn toggling_rewires_and_keeps_nodes() {
        let (mut graph, bus, mut chain) = attached(StageSet::default());
        chain.set_stage_enabled(&mut graph, Stage::Mid, true);
        let mid = node_of(&chain, Stage::Mid);
        assert!(serial_path(&graph, &chain, bus).contains(&mid));

        chain.set_stage_enabled(&mut graph, Stage::Mid, false);
        assert!(!serial_path(&graph, &chain, bus).contains(&mid));
        assert!(graph.contains(mid));
        assert!(chain.is_materialized(Stage::Mid));
        assert_eq!(graph.outputs_of(mid).count(), 0);

        chain.set_stage_enabled(&mut graph, Stage::Mid, true);
        assert_eq!(node_of(&chain, Stage::Mid), mid);
    }

    #[test]
    fn volume_node_stays_on_the_bus() {
        let (mut graph, bus, mut chain) = attached(StageSet::default());
        let volume = chain.output().unwrap();
        chain.set_stage_enabled(&mut graph, Stage::Volume, false);
        chain.set_stage_enabled(&mut graph, Stage::Panning, false);
        chain.set_stage_enabled(&mut graph, Stage::High, true);
        assert!(chain.is_enabled(Stage::Volume));
        assert!(graph.is_connected(volume, bus));
    }

    #[test]
    fn sends_branch_after_lowpass_and_rejoin_before_panning() {
        let stages = StageSet::default().with(Stage::LowPass).with(Stage::Reverb);
        let (graph, _bus, chain) = attached(stages);
        let nodes = chain.nodes.as_ref().unwrap().get(Stage::Reverb).unwrap();
        let lowpass = node_of(&chain, Stage::LowPass);
        let panning = node_of(&chain, Stage::Panning);
        assert!(graph.is_connected(lowpass, nodes.entry));
        assert!(graph.is_connected(nodes.entry, nodes.exit));
        assert!(graph.is_connected(nodes.exit, panning));
        assert!(graph.is_connected(lowpass, panning));
    }

    #[test]
    fn values_for_disabled_stages_are_ignored() {
        let (mut graph, _bus, mut chain) = attached(StageSet::default());
        chain.set_stage_value(&mut graph, StageValue::High(0.5));
        assert_eq!(chain.params().high, 0.0);
        assert!(!chain.is_materialized(Stage::High));
    }

    #[test]
    fn values_reach_nodes() {
        let (mut graph, _bus, mut chain) = attached(StageSet::default().with(Stage::High).with(Stage::LowPass));
        chain.set_stage_value(&mut graph, StageValue::High(-0.5));
        chain.set_stage_value(&mut graph, StageValue::LowPassCutoff(1.0));
        chain.set_stage_value(&mut graph, StageValue::Panning(0.25));

        let high = node_of(&chain, Stage::High);
        let lp = node_of(&chain, Stage::LowPass);
        let pan = node_of(&chain, Stage::Panning);
        assert_eq!(graph.param(high, Param::FilterGain).unwrap().value_at(0.0), -10.0);
        assert_eq!(graph.param(lp, Param::Frequency).unwrap().value_at(0.0), 22050.0);
        assert_eq!(graph.param(pan, Param::Pan).unwrap().value_at(0.0), 0.25);
        assert_eq!(chain.panning_value(), 0.25);
    }

    #[test]
    fn reattach_restores_state() {
        let (mut graph, _bus, mut chain) = attached(StageSet::default());
        chain.set_stage_enabled(&mut graph, Stage::Low, true);
        chain.set_stage_value(&mut graph, StageValue::Low(0.4));
        chain.set_stage_enabled(&mut graph, Stage::Low, false);
        let before = chain.state();

        chain.detach();
        let mut other = Graph::new(48000, 2);
        let bus = other.add(NodeKind::gain(1.0));
        chain.attach(&mut other, bus);

        assert_eq!(chain.state(), before);
        assert!(chain.is_materialized(Stage::Low));
        let low = node_of(&chain, Stage::Low);
        assert!((other.param(low, Param::FilterGain).unwrap().value_at(0.0) - 8.0).abs() < 1e-5);
        assert!(!serial_path(&other, &chain, bus).contains(&low));
    }

    #[test]
    fn cutoff_mapping_is_monotonic() {
        let mut last = 0.0;
        for i in 0..=100 {
            let hz = cutoff_hz(i as f32 / 100.0, 44100);
            assert!(hz > last);
            last = hz;
        }
        assert!((cutoff_hz(0.0, 44100) - LOWPASS_MIN_HZ).abs() < 0.01);
        assert!((cutoff_hz(1.0, 44100) - 22050.0).abs() < 0.01);
    }

    #[test]
    fn resonance_floor() {
        assert_eq!(resonance_q(0.0), MIN_Q);
        assert!((resonance_q(StageParams::default().resonance) - SHELF_Q).abs() < 1e-6);
    }

    #[test]
    fn stage_set_from_config_list() {
        let set = StageSet::from(vec![Stage::Reverb, Stage::Volume]);
        assert!(set.contains(Stage::Reverb));
        assert!(!set.contains(Stage::Panning));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Stage::Reverb, Stage::Volume]);
    }
}
