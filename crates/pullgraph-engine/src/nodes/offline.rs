//! Faster-than-real-time rendering on a background thread.

use crate::node::{Node, NodeArgs, NodeKind};
use parking_lot::Mutex;
use pullgraph_core::{Frames, PcmBuffer, PcmBufferError, Time};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Slice size used when none is given
pub const DEFAULT_FRAMES_PER_SLICE: Frames = 1024;

/// What the render callback wants after a slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineAction {
    Continue,
    Stop,
}

/// How an offline render ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineCompletion {
    /// The render length was reached or the callback asked to stop
    Finished { frames: u64 },
    /// Stopped from outside
    Cancelled { frames: u64 },
}

impl OfflineCompletion {
    #[must_use]
    pub const fn frames(&self) -> u64 {
        match *self {
            Self::Finished { frames } | Self::Cancelled { frames } => frames,
        }
    }
}

/// Offline output errors
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error("Offline render is already running")]
    AlreadyRunning,

    #[error("Offline output has no input connection")]
    NotConnected,

    #[error("Failed to allocate render buffer: {0}")]
    Buffer(#[from] PcmBufferError),

    #[error("Failed to spawn offline render thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct OfflineTask {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Graph sink that renders its input bus on a dedicated thread.
///
/// Each slice pulls `frames_per_slice` frames (fewer for the final slice of
/// a bounded render) and hands them to the render callback. Sample time
/// starts at zero and advances by the frames rendered.
pub struct OfflineOutputNode {
    node: Arc<Node>,
    frames_per_slice: Frames,
    render_length: Mutex<Option<u64>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<OfflineTask>>,
}

impl OfflineOutputNode {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_frames_per_slice(DEFAULT_FRAMES_PER_SLICE)
    }

    #[must_use]
    pub fn with_frames_per_slice(frames_per_slice: Frames) -> Arc<Self> {
        Arc::new(Self {
            node: Node::new(NodeArgs::new(1, 0).kind(NodeKind::OfflineOutput)),
            frames_per_slice: frames_per_slice.max(1),
            render_length: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    #[must_use]
    pub const fn node(&self) -> &Arc<Node> {
        &self.node
    }

    #[must_use]
    pub const fn frames_per_slice(&self) -> Frames {
        self.frames_per_slice
    }

    /// Total frames to render; `None` renders until stopped
    pub fn set_render_length(&self, frames: Option<u64>) {
        *self.render_length.lock() = frames;
    }

    #[must_use]
    pub fn render_length(&self) -> Option<u64> {
        *self.render_length.lock()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the render thread.
    ///
    /// `render` receives each slice on that thread; `completion` is called
    /// there exactly once when the render ends.
    pub(crate) fn start<R, C>(&self, render: R, completion: C) -> Result<(), OfflineError>
    where
        R: FnMut(&mut PcmBuffer<'_>, &Time) -> OfflineAction + Send + 'static,
        C: FnOnce(OfflineCompletion) + Send + 'static,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(OfflineError::AlreadyRunning);
        }

        let prepared = self
            .node
            .input_format(0)
            .ok_or(OfflineError::NotConnected)
            .and_then(|format| {
                PcmBuffer::new(format, self.frames_per_slice).map_err(OfflineError::from)
            });
        let buffer = match prepared {
            Ok(buffer) => buffer,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let job = OfflineJob {
            node: Arc::clone(&self.node),
            buffer,
            render_length: self.render_length(),
            cancel: Arc::clone(&cancel),
            running: Arc::clone(&self.running),
        };

        let spawned = thread::Builder::new()
            .name("pullgraph-offline".to_string())
            .spawn(move || job.run(render, completion));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        tracing::debug!(
            "Offline render started ({} frames per slice, length {:?})",
            self.frames_per_slice,
            self.render_length()
        );
        *self.task.lock() = Some(OfflineTask { cancel, handle });
        Ok(())
    }

    /// Cancel the render and wait for the thread, unless called from it
    pub(crate) fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        task.cancel.store(true, Ordering::Release);
        if task.handle.thread().id() == thread::current().id() {
            return;
        }
        if task.handle.join().is_err() {
            tracing::error!("Offline render thread panicked");
        }
    }
}

impl Drop for OfflineOutputNode {
    fn drop(&mut self) {
        self.stop();
    }
}

struct OfflineJob {
    node: Arc<Node>,
    buffer: PcmBuffer<'static>,
    render_length: Option<u64>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl OfflineJob {
    fn run<R, C>(mut self, mut render: R, completion: C)
    where
        R: FnMut(&mut PcmBuffer<'_>, &Time) -> OfflineAction,
        C: FnOnce(OfflineCompletion),
    {
        let sample_rate = self.buffer.format().sample_rate();
        let slice = u64::from(self.buffer.frame_capacity());
        let mut position: u64 = 0;

        let outcome = loop {
            if self.cancel.load(Ordering::Acquire) {
                break OfflineCompletion::Cancelled { frames: position };
            }

            let frames = match self.render_length {
                Some(total) if position >= total => {
                    break OfflineCompletion::Finished { frames: position };
                }
                Some(total) => (total - position).min(slice),
                None => slice,
            };
            if self.buffer.set_frame_length(frames as Frames).is_err() {
                break OfflineCompletion::Cancelled { frames: position };
            }

            let when = Time::from_sample_time(position as i64, sample_rate);
            self.node.mark_rendered(&when);
            self.node.pull_input(0, &mut self.buffer, &when);
            position += frames;

            if render(&mut self.buffer, &when) == OfflineAction::Stop {
                break OfflineCompletion::Finished { frames: position };
            }
        };

        tracing::debug!("Offline render ended: {:?}", outcome);
        self.running.store(false, Ordering::Release);
        completion(outcome);
    }
}
