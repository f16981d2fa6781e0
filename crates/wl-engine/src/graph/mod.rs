//! Render graph: nodes with automatable parameters, pulled in blocks.
//!
//! Nodes live in a slot map and are wired by a flat connection list. Each
//! block is rendered in topological order (Kahn), every node summing the
//! outputs of its inputs before processing. After a block, finished
//! sources are removed along with any transient node left without inputs,
//! so per-note nodes clean themselves up.

mod effects;
mod filter;
mod param;
mod reverb;
mod source;

use std::collections::VecDeque;

use slotmap::{SecondaryMap, SlotMap};
use wl_ir::{AudioBuffer, BLOCK_SIZE};

pub use effects::{Gain, OnePoleLowPass, StereoPanner, Waveshaper, AMIGA_CUTOFF_HZ};
pub use filter::{BiquadFilter, FilterShape};
pub use param::AudioParam;
pub use reverb::Reverb;
pub use source::BufferSource;

slotmap::new_key_type! {
    /// Handle to a node in a [`Graph`].
    pub struct NodeId;
}

/// Timing of the block being rendered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockClock {
    /// Context frame of the first frame in the block
    pub frame: u64,
    pub sample_rate: u32,
}

impl BlockClock {
    /// Context time of the first frame.
    pub fn start(&self) -> f64 {
        self.time_at(0)
    }

    pub fn time_at(&self, offset: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.frame + offset as u64) as f64 / self.sample_rate as f64
    }
}

/// Processing behaviour of a node.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Source(BufferSource),
    Gain(Gain),
    Filter(BiquadFilter),
    Panner(StereoPanner),
    Reverb(Box<Reverb>),
    Shaper(Waveshaper),
    LowPass(OnePoleLowPass),
    Destination,
}

impl NodeKind {
    pub fn gain(value: f32) -> Self {
        NodeKind::Gain(Gain::new(value))
    }

    pub fn filter(shape: FilterShape, frequency: f32, q: f32, gain_db: f32) -> Self {
        NodeKind::Filter(BiquadFilter::new(shape, frequency, q, gain_db))
    }

    pub fn panner(pan: f32) -> Self {
        NodeKind::Panner(StereoPanner::new(pan))
    }

    pub fn reverb(sample_rate: u32) -> Self {
        NodeKind::Reverb(Box::new(Reverb::new(sample_rate)))
    }

    pub fn shaper(drive: f32) -> Self {
        NodeKind::Shaper(Waveshaper::new(drive))
    }

    fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer, clock: BlockClock) {
        match self {
            NodeKind::Source(n) => n.process(output, clock),
            NodeKind::Gain(n) => n.process(input, output, clock),
            NodeKind::Filter(n) => n.process(input, output, clock),
            NodeKind::Panner(n) => n.process(input, output, clock),
            NodeKind::Reverb(n) => n.process(input, output),
            NodeKind::Shaper(n) => n.process(input, output, clock),
            NodeKind::LowPass(n) => n.process(input, output, clock),
            NodeKind::Destination => {
                output.silence();
                output.mix_from(input);
            }
        }
    }

    fn prune(&mut self, now: f64) {
        for param in self.params_mut() {
            param.prune(now);
        }
    }

    fn params_mut(&mut self) -> Vec<&mut AudioParam> {
        match self {
            NodeKind::Source(n) => vec![&mut n.playback_rate],
            NodeKind::Gain(n) => vec![&mut n.gain],
            NodeKind::Filter(n) => vec![&mut n.frequency, &mut n.q, &mut n.gain_db],
            NodeKind::Panner(n) => vec![&mut n.pan],
            NodeKind::Shaper(n) => vec![&mut n.drive],
            NodeKind::Reverb(_) | NodeKind::LowPass(_) | NodeKind::Destination => Vec::new(),
        }
    }
}

/// Addressable automatable parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Gain,
    PlaybackRate,
    Frequency,
    Q,
    FilterGain,
    Pan,
    Drive,
}

/// A node plus its lifetime policy.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// Removed once it has no inputs left (per-note nodes)
    pub transient: bool,
}

/// A directed edge between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
}

/// Node graph bound to one sample rate and channel layout.
#[derive(Debug)]
pub struct Graph {
    sample_rate: u32,
    channels: u16,
    frame: u64,
    nodes: SlotMap<NodeId, Node>,
    connections: Vec<Connection>,
    destination: NodeId,
    outputs: SecondaryMap<NodeId, AudioBuffer>,
    scratch: AudioBuffer,
}

impl Graph {
    /// An empty graph holding only its destination node.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let mut nodes = SlotMap::with_key();
        let destination = nodes.insert(Node { kind: NodeKind::Destination, transient: false });
        Self {
            sample_rate,
            channels: channels.clamp(1, 2),
            frame: 0,
            nodes,
            connections: Vec::new(),
            destination,
            outputs: SecondaryMap::new(),
            scratch: AudioBuffer::new(channels.clamp(1, 2), 0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Frames rendered so far.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame as f64 / self.sample_rate as f64
    }

    pub fn add(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(Node { kind, transient: false })
    }

    /// Add a node that is reaped once nothing feeds it.
    pub fn add_transient(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(Node { kind, transient: true })
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node)
    }

    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connect `from` → `to`. Returns false if either node is gone.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        let conn = Connection { from, to };
        if !self.connections.contains(&conn) {
            self.connections.push(conn);
        }
        true
    }

    /// Remove every outgoing edge of `from`.
    pub fn disconnect(&mut self, from: NodeId) {
        self.connections.retain(|c| c.from != from);
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.connections.contains(&Connection { from, to })
    }

    pub fn outputs_of(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.connections.iter().filter(move |c| c.from == node).map(|c| c.to)
    }

    pub fn inputs_of(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.connections.iter().filter(move |c| c.to == node).map(|c| c.from)
    }

    /// Remove a node and all edges touching it. The destination stays.
    pub fn remove(&mut self, node: NodeId) {
        if node == self.destination {
            return;
        }
        self.nodes.remove(node);
        self.outputs.remove(node);
        self.connections.retain(|c| c.from != node && c.to != node);
    }

    /// Drop every node but the destination.
    pub fn clear(&mut self) {
        let destination = self.destination;
        self.nodes.retain(|id, _| id == destination);
        self.connections.clear();
        self.outputs.clear();
    }

    pub fn param(&self, node: NodeId, param: Param) -> Option<&AudioParam> {
        match (&self.nodes.get(node)?.kind, param) {
            (NodeKind::Gain(n), Param::Gain) => Some(&n.gain),
            (NodeKind::Source(n), Param::PlaybackRate) => Some(&n.playback_rate),
            (NodeKind::Filter(n), Param::Frequency) => Some(&n.frequency),
            (NodeKind::Filter(n), Param::Q) => Some(&n.q),
            (NodeKind::Filter(n), Param::FilterGain) => Some(&n.gain_db),
            (NodeKind::Panner(n), Param::Pan) => Some(&n.pan),
            (NodeKind::Shaper(n), Param::Drive) => Some(&n.drive),
            _ => None,
        }
    }

    pub fn param_mut(&mut self, node: NodeId, param: Param) -> Option<&mut AudioParam> {
        match (&mut self.nodes.get_mut(node)?.kind, param) {
            (NodeKind::Gain(n), Param::Gain) => Some(&mut n.gain),
            (NodeKind::Source(n), Param::PlaybackRate) => Some(&mut n.playback_rate),
            (NodeKind::Filter(n), Param::Frequency) => Some(&mut n.frequency),
            (NodeKind::Filter(n), Param::Q) => Some(&mut n.q),
            (NodeKind::Filter(n), Param::FilterGain) => Some(&mut n.gain_db),
            (NodeKind::Panner(n), Param::Pan) => Some(&mut n.pan),
            (NodeKind::Shaper(n), Param::Drive) => Some(&mut n.drive),
            _ => None,
        }
    }

    pub fn source(&self, node: NodeId) -> Option<&BufferSource> {
        match &self.nodes.get(node)?.kind {
            NodeKind::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn source_mut(&mut self, node: NodeId) -> Option<&mut BufferSource> {
        match &mut self.nodes.get_mut(node)?.kind {
            NodeKind::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn low_pass_mut(&mut self, node: NodeId) -> Option<&mut OnePoleLowPass> {
        match &mut self.nodes.get_mut(node)?.kind {
            NodeKind::LowPass(f) => Some(f),
            _ => None,
        }
    }

    /// Render `frames` frames from the destination, advancing the clock.
    pub fn render(&mut self, frames: usize) -> AudioBuffer {
        let mut out = AudioBuffer::new(self.channels, frames);
        let mut offset = 0;
        while offset < frames {
            let n = BLOCK_SIZE.min(frames - offset);
            self.render_block(n);
            if let Some(block) = self.outputs.get(self.destination) {
                out.write_at(offset, block);
            }
            offset += n;
        }
        out
    }

    fn render_block(&mut self, frames: usize) {
        let clock = BlockClock { frame: self.frame, sample_rate: self.sample_rate };
        let order = topological_sort(&self.nodes, &self.connections);

        for id in self.nodes.keys() {
            let fits = self.outputs.get(id).is_some_and(|b| b.frames() == frames);
            if !fits {
                self.outputs.insert(id, AudioBuffer::new(self.channels, frames));
            } else if let Some(buf) = self.outputs.get_mut(id) {
                buf.silence();
            }
        }
        if self.scratch.frames() != frames {
            self.scratch = AudioBuffer::new(self.channels, frames);
        }

        for id in order {
            gather_inputs(&self.connections, &self.outputs, id, &mut self.scratch);
            let (Some(node), Some(output)) = (self.nodes.get_mut(id), self.outputs.get_mut(id)) else {
                continue;
            };
            node.kind.process(&self.scratch, output, clock);
        }

        self.frame += frames as u64;
        let now = self.current_time();
        for node in self.nodes.values_mut() {
            node.kind.prune(now);
        }
        self.reap();
    }

    /// Remove finished sources, then transient nodes left without inputs.
    fn reap(&mut self) {
        let ended: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches!(&n.kind, NodeKind::Source(s) if s.is_ended()))
            .map(|(id, _)| id)
            .collect();
        for id in ended {
            self.remove(id);
        }

        loop {
            let orphans: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|(id, n)| {
                    n.transient
                        && !matches!(n.kind, NodeKind::Source(_))
                        && !self.connections.iter().any(|c| c.to == *id)
                })
                .map(|(id, _)| id)
                .collect();
            if orphans.is_empty() {
                break;
            }
            for id in orphans {
                self.remove(id);
            }
        }
    }
}

/// Topological sort via Kahn's algorithm.
///
/// Nodes caught in a cycle are left out and render silence.
fn topological_sort(nodes: &SlotMap<NodeId, Node>, connections: &[Connection]) -> Vec<NodeId> {
    let mut in_degree: SecondaryMap<NodeId, u32> = nodes.keys().map(|id| (id, 0)).collect();
    for conn in connections {
        if let Some(d) = in_degree.get_mut(conn.to) {
            *d += 1;
        }
    }

    let mut queue: VecDeque<NodeId> =
        in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| id).collect();
    let mut result = Vec::with_capacity(nodes.len());

    while let Some(id) = queue.pop_front() {
        result.push(id);
        for conn in connections.iter().filter(|c| c.from == id) {
            if let Some(d) = in_degree.get_mut(conn.to) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(conn.to);
                }
            }
        }
    }
    result
}

/// Sum the outputs feeding `node` into `scratch`.
fn gather_inputs(
    connections: &[Connection],
    outputs: &SecondaryMap<NodeId, AudioBuffer>,
    node: NodeId,
    scratch: &mut AudioBuffer,
) {
    scratch.silence();
    for conn in connections.iter().filter(|c| c.to == node) {
        if let Some(src) = outputs.get(conn.from) {
            scratch.mix_from(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn dc_source(len: usize) -> NodeKind {
        let mut src = BufferSource::new(vec![0.5; len].into(), 1.0);
        src.start(0.0, 0.0);
        NodeKind::Source(src)
    }

    #[test]
    fn destination_only_renders_silence() {
        let mut graph = Graph::new(44100, 2);
        let out = graph.render(300);
        assert_eq!(out.frames(), 300);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(graph.current_frame(), 300);
    }

    #[test]
    fn chain_topology_orders_sources_first() {
        let mut graph = Graph::new(44100, 2);
        let a = graph.add(NodeKind::gain(1.0));
        let b = graph.add(NodeKind::gain(1.0));
        graph.connect(a, b);
        graph.connect(b, graph.destination());

        let order = topological_sort(&graph.nodes, &graph.connections);
        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert_eq!(order.len(), 3);
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(graph.destination()));
    }

    #[test]
    fn cycle_nodes_are_skipped() {
        let mut graph = Graph::new(44100, 2);
        let a = graph.add(NodeKind::gain(1.0));
        let b = graph.add(NodeKind::gain(1.0));
        graph.connect(a, b);
        graph.connect(b, a);
        let order = topological_sort(&graph.nodes, &graph.connections);
        assert_eq!(order, vec![graph.destination()]);
    }

    #[test]
    fn source_through_gain_reaches_destination() {
        let mut graph = Graph::new(100, 2);
        let src = graph.add_transient(dc_source(1000));
        let gain = graph.add(NodeKind::gain(0.5));
        graph.connect(src, gain);
        graph.connect(gain, graph.destination());

        let out = graph.render(10);
        assert!((out.channel(0)[5] - 0.25).abs() < 1e-6);
        assert!((out.channel(1)[9] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn fan_in_sums() {
        let mut graph = Graph::new(100, 1);
        for _ in 0..3 {
            let src = graph.add_transient(dc_source(1000));
            graph.connect(src, graph.destination());
        }
        let out = graph.render(4);
        assert!((out.channel(0)[0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn finished_notes_are_reaped_in_cascade() {
        let mut graph = Graph::new(100, 2);
        let bus = graph.add(NodeKind::gain(1.0));
        graph.connect(bus, graph.destination());
        let src = graph.add_transient(dc_source(20));
        let vol = graph.add_transient(NodeKind::gain(1.0));
        let pan = graph.add_transient(NodeKind::panner(0.0));
        graph.connect(src, vol);
        graph.connect(vol, pan);
        graph.connect(pan, bus);

        graph.render(10);
        assert!(graph.contains(src));

        graph.render(BLOCK_SIZE);
        assert!(!graph.contains(src));
        assert!(!graph.contains(vol));
        assert!(!graph.contains(pan));
        assert!(graph.contains(bus));
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn remove_keeps_destination() {
        let mut graph = Graph::new(44100, 2);
        let dest = graph.destination();
        graph.remove(dest);
        assert!(graph.contains(dest));
        let g = graph.add(NodeKind::gain(1.0));
        graph.clear();
        assert!(!graph.contains(g));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn param_lookup_matches_node_kind() {
        let mut graph = Graph::new(44100, 2);
        let g = graph.add(NodeKind::gain(0.3));
        let src = graph.add(NodeKind::Source(BufferSource::new(Arc::from(vec![0.0f32]), 2.0)));
        assert_eq!(graph.param(g, Param::Gain).map(|p| p.value_at(0.0)), Some(0.3));
        assert!(graph.param(g, Param::Pan).is_none());
        assert_eq!(graph.param(src, Param::PlaybackRate).map(|p| p.value_at(0.0)), Some(2.0));
        graph.remove(g);
        assert!(graph.param_mut(g, Param::Gain).is_none());
    }

    #[test]
    fn automation_is_pruned_as_time_passes() {
        let mut graph = Graph::new(100, 2);
        let g = graph.add(NodeKind::gain(0.0));
        if let Some(p) = graph.param_mut(g, Param::Gain) {
            p.set_value_at_time(1.0, 0.5);
        }
        graph.render(100);
        let p = graph.param(g, Param::Gain).unwrap();
        assert!(!p.has_automation());
        assert_eq!(p.value_at(graph.current_time()), 1.0);
    }
}
