//! Note-trigger requests issued by the tracker/editor layer.

use slotmap::SlotMap;

use crate::instrument::Instrument;

slotmap::new_key_type! {
    /// Key for referencing instruments in the song's instrument bank.
    pub struct InstrumentKey;
}

/// Instruments owned by the song model, addressed by key.
pub type InstrumentBank = SlotMap<InstrumentKey, Instrument>;

/// Reserved note index meaning "note off" (FastTracker 2 key-off).
pub const NOTE_OFF: u8 = 97;

/// Effect parameters that influence how a note starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoteEffects {
    /// Start playback this many frames into the sample (9xx).
    pub sample_offset: Option<u32>,
}

/// Request to start one note. Consumed synchronously by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteTriggerRequest {
    /// Instrument to play
    pub instrument: InstrumentKey,
    /// Requested period (Amiga period or linear period, per tracker mode)
    pub period: f32,
    /// Note index (0-119), or `NOTE_OFF`
    pub note: u8,
    /// Volume in device units (0-100); defaults to the sample volume
    pub volume: Option<f32>,
    /// Panning (-1.0..=1.0); defaults to the sample panning
    pub panning: Option<f32>,
    /// Target channel; defaults to the current edit channel
    pub channel: Option<usize>,
    /// Effect parameters
    pub effects: NoteEffects,
    /// Start time in context seconds; defaults to "now"
    pub time: Option<f64>,
}

impl NoteTriggerRequest {
    /// Create a request with every optional field left to its default.
    pub fn new(instrument: InstrumentKey, period: f32, note: u8) -> Self {
        Self {
            instrument,
            period,
            note,
            volume: None,
            panning: None,
            channel: None,
            effects: NoteEffects::default(),
            time: None,
        }
    }

    /// A note-off for `channel`, scheduled at `time`.
    pub fn note_off(instrument: InstrumentKey, channel: usize, time: Option<f64>) -> Self {
        Self {
            channel: Some(channel),
            time,
            ..Self::new(instrument, 0.0, NOTE_OFF)
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_panning(mut self, panning: f32) -> Self {
        self.panning = Some(panning);
        self
    }

    pub fn on_channel(mut self, channel: usize) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn at(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_sample_offset(mut self, frames: u32) -> Self {
        self.effects.sample_offset = Some(frames);
        self
    }

    pub fn is_note_off(&self) -> bool {
        self.note == NOTE_OFF
    }
}
