//! Engine error types.
//!
//! Most engine operations recover locally: they log the error and leave
//! state untouched. The types are still returned by internal helpers so
//! the recovery happens at one place per operation.

use thiserror::Error;
use wl_ir::InstrumentKey;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A collaborator (master bus, filter chains) was used before `init`.
    #[error("{0} is not initialized")]
    MissingDependency(&'static str),

    /// The render context cannot do what was asked (e.g. stereo panning).
    #[error("render context does not support {0}")]
    UnsupportedCapability(&'static str),

    /// Sample data could not be played as-is.
    #[error("unusable sample: {0}")]
    InvalidSampleState(&'static str),

    /// Offline render requested while one is already in progress, or
    /// finished while none is.
    #[error("render mode conflict: {0}")]
    ConcurrentRenderConflict(&'static str),

    /// A pitch table lookup found no entry.
    #[error("no table entry for {0}")]
    LookupMiss(String),

    #[error("instrument {0:?} does not exist")]
    UnknownInstrument(InstrumentKey),

    #[error("channel {index} out of range ({count} filter chains)")]
    ChannelOutOfRange { index: usize, count: usize },
}

/// Failure delivering an offline render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("offline render was cancelled")]
    Cancelled,

    #[error("offline render worker stopped without a result")]
    WorkerLost,

    #[error("could not start offline render worker: {0}")]
    Spawn(String),
}
