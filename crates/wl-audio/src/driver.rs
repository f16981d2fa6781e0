//! Live driver: a thread that pulls blocks from the engine's live context
//! and feeds them to the output device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use wl_engine::{frames, Frame, LiveRenderer};
use wl_ir::BLOCK_SIZE;

use crate::cpal_backend::CpalOutput;
use crate::traits::{AudioError, AudioOutput};

/// Back-off when the device buffer is full.
const FULL_BUFFER_WAIT: Duration = Duration::from_millis(1);

pub struct LiveDriver {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl LiveDriver {
    /// Open the default device and start rendering `renderer` into it.
    ///
    /// The device is opened on the driver thread; this waits until it is
    /// ready or has failed.
    pub fn start(renderer: LiveRenderer) -> Result<Self, AudioError> {
        let engine_rate = renderer.sample_rate();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("audio-driver".into())
            .spawn(move || {
                let mut output = match open_output() {
                    Ok(output) => {
                        let _ = ready_tx.send(Ok(output.sample_rate()));
                        output
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                pump(&mut output, &renderer, &thread_stop);
                if let Err(e) = output.stop() {
                    warn!(error = %e, "failed to stop output");
                }
            })
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => return Err(AudioError::ThreadLost),
        };
        if sample_rate != engine_rate {
            warn!(device = sample_rate, engine = engine_rate, "device and engine sample rates differ");
        }
        debug!(sample_rate, "live driver running");
        Ok(Self { stop, thread: Some(thread), sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LiveDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_output() -> Result<CpalOutput, AudioError> {
    let (mut output, consumer) = CpalOutput::new()?;
    output.build_stream(consumer)?;
    output.start()?;
    Ok(output)
}

/// Render blocks and push them to `output` until `stop` is raised.
fn pump<O: AudioOutput>(output: &mut O, renderer: &LiveRenderer, stop: &AtomicBool) {
    let mut pending: Vec<Frame> = Vec::with_capacity(BLOCK_SIZE);
    while !stop.load(Ordering::Relaxed) {
        if pending.is_empty() {
            let block = renderer.render(BLOCK_SIZE);
            pending.extend(frames(&block));
        }
        let written = output.write(&pending);
        pending.drain(..written);
        if written == 0 {
            thread::sleep(FULL_BUFFER_WAIT);
        }
    }
}
