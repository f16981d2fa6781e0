//! Registry of volume controls for notes that may still be sounding.
//!
//! Controls land in the bucket under the cursor. The playback clock
//! rotates the cursor periodically and the bucket it moves onto is
//! emptied, so a control is forgotten after two to three rotations
//! without any per-note bookkeeping. Forgotten notes keep playing; the
//! registry only exists so [`ScheduledNoteRegistry::mute_all`] can silence
//! everything that was scheduled recently.

use tracing::debug;

use crate::graph::{Graph, NodeId, Param};

pub const BUCKET_COUNT: usize = 3;

/// The pair of nodes needed to silence one note.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeControl {
    /// Note volume gain
    pub gain: NodeId,
    /// The note's sample source
    pub source: NodeId,
}

#[derive(Debug, Default)]
pub struct ScheduledNoteRegistry {
    buckets: [Vec<VolumeControl>; BUCKET_COUNT],
    cursor: usize,
}

impl ScheduledNoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a control in the current bucket.
    pub fn record(&mut self, control: VolumeControl) {
        self.buckets[self.cursor].push(control);
    }

    /// Advance the cursor and empty the bucket it lands on.
    pub fn rotate(&mut self) {
        self.cursor = (self.cursor + 1) % BUCKET_COUNT;
        self.buckets[self.cursor].clear();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn bucket(&self, index: usize) -> &[VolumeControl] {
        self.buckets.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn contains(&self, control: &VolumeControl) -> bool {
        self.buckets.iter().any(|b| b.contains(control))
    }

    /// Forget every control without touching the graph.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    /// Silence every recorded note immediately: automation is cancelled,
    /// the gain is set to zero and the source stopped. Empties the registry.
    pub fn mute_all(&mut self, graph: &mut Graph) {
        let now = graph.current_time();
        let mut muted = 0usize;
        for control in self.buckets.iter().flatten() {
            if let Some(gain) = graph.param_mut(control.gain, Param::Gain) {
                gain.cancel_scheduled_values(f64::NEG_INFINITY);
                gain.set_value(0.0);
                muted += 1;
            }
            if let Some(source) = graph.source_mut(control.source) {
                source.stop(now);
            }
        }
        debug!(muted, total = self.len(), "muted scheduled notes");
        self.clear();
    }
}
