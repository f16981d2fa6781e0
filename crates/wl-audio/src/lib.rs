//! Audio output backends for waveloom.

mod cpal_backend;
mod driver;
mod traits;

pub use cpal_backend::CpalOutput;
pub use driver::LiveDriver;
pub use traits::{AudioError, AudioOutput};
