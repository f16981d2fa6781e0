//! Render contexts: the live device graph and one-shot offline renders.
//!
//! Both wrap a [`Graph`] behind a mutex. The engine builds and edits the
//! graph from the control thread; the audio driver (live) or a worker
//! thread (offline) pulls blocks from it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use tracing::{debug, warn};
use wl_ir::{AudioBuffer, BLOCK_SIZE};

use crate::error::RenderError;
use crate::graph::Graph;

pub type SharedGraph = Arc<Mutex<Graph>>;

/// Frames rendered between cancellation checks on the offline worker.
const OFFLINE_CHUNK: usize = BLOCK_SIZE * 16;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lock a shared graph, recovering it if a render thread panicked.
pub fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, Graph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Live,
    Offline,
}

/// The device-facing context. Lives for the whole engine lifetime.
#[derive(Debug)]
pub struct LiveContext {
    id: u64,
    graph: SharedGraph,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
}

impl LiveContext {
    pub fn new(sample_rate: u32, stereo: bool) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            graph: Arc::new(Mutex::new(Graph::new(sample_rate, if stereo { 2 } else { 1 }))),
            clock: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    /// Handle for the audio driver to pull blocks with.
    pub fn renderer(&self) -> LiveRenderer {
        LiveRenderer {
            graph: Arc::clone(&self.graph),
            clock: Arc::clone(&self.clock),
            sample_rate: self.sample_rate,
        }
    }

    /// Drop every node but the destination.
    pub fn teardown(&self) {
        lock_graph(&self.graph).clear();
    }
}

/// Pull side of a [`LiveContext`], handed to the audio thread.
#[derive(Clone, Debug)]
pub struct LiveRenderer {
    graph: SharedGraph,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
}

impl LiveRenderer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn position(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    /// Render the next `frames` frames.
    pub fn render(&self, frames: usize) -> AudioBuffer {
        let mut graph = lock_graph(&self.graph);
        let block = graph.render(frames);
        self.clock.store(graph.current_frame(), Ordering::Relaxed);
        block
    }
}

/// A context that renders a fixed length as fast as possible.
#[derive(Debug)]
pub struct OfflineContext {
    id: u64,
    graph: SharedGraph,
    sample_rate: u32,
    length: usize,
}

impl OfflineContext {
    pub fn new(sample_rate: u32, seconds: f64, stereo: bool) -> Self {
        let length = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            graph: Arc::new(Mutex::new(Graph::new(sample_rate, if stereo { 2 } else { 1 }))),
            sample_rate,
            length,
        }
    }

    /// Total frames the render will produce.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Render the whole graph on a worker thread.
    pub fn start_rendering(self) -> PendingRender {
        let slot = Arc::new(Mutex::new(RenderSlot::default()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let pending = PendingRender { slot: Arc::clone(&slot), cancelled: Arc::clone(&cancelled) };

        let worker_slot = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name("offline-render".into())
            .spawn(move || {
                let mut delivery = Delivery { slot: worker_slot, result: None };
                delivery.result = Some(self.render_all(&cancelled));
            });

        if let Err(e) = spawned {
            warn!(error = %e, "offline render worker failed to start");
            fill_slot(&slot, Err(RenderError::Spawn(e.to_string())));
        }
        pending
    }

    fn render_all(&self, cancelled: &AtomicBool) -> Result<AudioBuffer, RenderError> {
        let mut graph = lock_graph(&self.graph);
        let mut out = AudioBuffer::new(graph.channels(), self.length);
        let mut offset = 0;
        while offset < self.length {
            if cancelled.load(Ordering::Relaxed) {
                debug!(offset, "offline render cancelled");
                return Err(RenderError::Cancelled);
            }
            let n = OFFLINE_CHUNK.min(self.length - offset);
            let chunk = graph.render(n);
            out.write_at(offset, &chunk);
            offset += n;
        }
        debug!(frames = self.length, "offline render complete");
        Ok(out)
    }
}

/// The context the engine is currently routing into.
#[derive(Debug)]
pub enum RenderContext {
    Live(LiveContext),
    Offline(OfflineContext),
}

impl RenderContext {
    pub fn mode(&self) -> RenderMode {
        match self {
            RenderContext::Live(_) => RenderMode::Live,
            RenderContext::Offline(_) => RenderMode::Offline,
        }
    }

    /// Unique per context instance.
    pub fn id(&self) -> u64 {
        match self {
            RenderContext::Live(c) => c.id,
            RenderContext::Offline(c) => c.id,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            RenderContext::Live(c) => c.sample_rate,
            RenderContext::Offline(c) => c.sample_rate,
        }
    }

    fn shared(&self) -> &SharedGraph {
        match self {
            RenderContext::Live(c) => &c.graph,
            RenderContext::Offline(c) => &c.graph,
        }
    }

    pub fn graph(&self) -> MutexGuard<'_, Graph> {
        lock_graph(self.shared())
    }

    /// Whether nodes can place audio in a stereo field.
    pub fn supports_panning(&self) -> bool {
        self.graph().channels() > 1
    }

    /// Current context time in seconds.
    pub fn current_time(&self) -> f64 {
        match self {
            RenderContext::Live(c) if c.sample_rate > 0 => {
                c.clock.load(Ordering::Relaxed) as f64 / c.sample_rate as f64
            }
            _ => self.graph().current_time(),
        }
    }
}

#[derive(Debug, Default)]
struct RenderSlot {
    result: Option<Result<AudioBuffer, RenderError>>,
    waker: Option<Waker>,
}

fn fill_slot(slot: &Mutex<RenderSlot>, result: Result<AudioBuffer, RenderError>) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    slot.result = Some(result);
    if let Some(waker) = slot.waker.take() {
        waker.wake();
    }
}

/// Hands the worker's result to the slot, even if the worker panics.
struct Delivery {
    slot: Arc<Mutex<RenderSlot>>,
    result: Option<Result<AudioBuffer, RenderError>>,
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or(Err(RenderError::WorkerLost));
        fill_slot(&self.slot, result);
    }
}

/// Completion of an offline render.
///
/// Resolves once with the rendered buffer. Dropping it cancels the render.
#[derive(Debug)]
pub struct PendingRender {
    slot: Arc<Mutex<RenderSlot>>,
    cancelled: Arc<AtomicBool>,
}

impl PendingRender {
    /// Whether the result is ready to be taken.
    pub fn is_finished(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .result
            .is_some()
    }
}

impl Future for PendingRender {
    type Output = Result<AudioBuffer, RenderError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl Drop for PendingRender {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
