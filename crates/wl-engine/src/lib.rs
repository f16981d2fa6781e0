//! Playback engine for waveloom.
//!
//! Schedules tracker notes into a render graph: per-note sample chains,
//! per-channel effect chains and a shared master bus, rendered live for a
//! device or offline for export.

mod automation;
pub mod chain;
mod config;
mod context;
mod engine;
mod error;
mod frame;
pub mod graph;
pub mod pitch;
mod registry;
mod scheduler;

pub use automation::{tick_duration, EnvelopeSchedule, AUTOMATION_HORIZON};
pub use chain::{ChainState, ChannelFilterChain, Stage, StageSet, StageValue};
pub use config::{ConfigError, EngineConfig, StereoSeparation};
pub use context::{LiveRenderer, PendingRender, RenderContext, RenderMode};
pub use engine::{separation_pan, AudioEngine, EngineEvent, EVENT_QUEUE_LIMIT, MASTER_HEADROOM, MASTER_RAMP};
pub use error::{EngineError, RenderError};
pub use frame::{frames, Frame};
pub use pitch::{PitchModel, TrackerMode};
pub use registry::{ScheduledNoteRegistry, VolumeControl, BUCKET_COUNT};
pub use scheduler::{ActiveNoteHandle, FADE_IN, NOTE_RAMP, UNROLL_LIMIT};
