//! Per-node callback scheduling.
//!
//! Transport threads never run user code: every inbound sample is wrapped in
//! a job and pushed onto the owning node's spinner queue, which a single
//! dedicated thread drains in arrival order.

use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, trace};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Stop,
}

/// Cloneable submission side of a [`Spinner`].
#[derive(Clone)]
pub struct SpinnerHandle {
    tx: flume::Sender<Command>,
}

impl SpinnerHandle {
    /// Queues `job`; returns `false` once the spinner has stopped.
    pub fn dispatch(&self, job: Job) -> bool {
        self.tx.send(Command::Run(job)).is_ok()
    }
}

pub struct Spinner {
    handle: SpinnerHandle,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Spinner {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = flume::unbounded::<Command>();
        let thread = thread::Builder::new()
            .name(format!("spin:{}", name))
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        Command::Run(job) => job(),
                        Command::Stop => break,
                    }
                }
                trace!("[SPIN] Spinner loop exited");
            })?;
        debug!("[SPIN] Spinner started for {}", name);
        Ok(Self {
            handle: SpinnerHandle { tx },
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> SpinnerHandle {
        self.handle.clone()
    }

    pub fn dispatch(&self, job: Job) -> bool {
        self.handle.dispatch(job)
    }

    /// Stops the loop after the jobs already queued.
    ///
    /// Joins the spinner thread unless called from that very thread.
    pub fn stop(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.handle.tx.send(Command::Stop);
        if thread::current().id() != self.thread_id {
            let _ = thread.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}
