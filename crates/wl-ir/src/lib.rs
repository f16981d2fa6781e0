//! Core data types for the waveloom tracker audio engine.
//!
//! The song model owns instruments and samples; the engine only reads them
//! when a note is triggered. Everything here is plain data and stays
//! `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod audio_buffer;
mod instrument;
mod request;
mod sample;

pub use audio_buffer::{AudioBuffer, BLOCK_SIZE};
pub use instrument::{
    AutoVibrato, Envelope, EnvelopeLoop, EnvelopePoint, Instrument, VibratoWaveform,
    MAX_ENVELOPE_POINTS,
};
pub use request::{InstrumentBank, InstrumentKey, NoteEffects, NoteTriggerRequest, NOTE_OFF};
pub use sample::{Sample, SampleData, SampleLoop};
