//! One pipeline stage per OS thread.
//!
//! Every stage runs the same driving loop:
//!
//! ```text
//! while running {
//!     pull (hardware or channel, bounded wait)
//!       ├─ nothing / transient error ─► next iteration
//!       ├─ upstream closed and drained ─► exit
//!       └─ unit ─► deliver (push downstream or write to sink)
//! }
//! finish (drain + release what the stage still holds)
//! ```
//!
//! Cancellation is cooperative: the run flag is checked once per iteration,
//! so every pull must use a bounded wait or be unblocked by closing its
//! channel.

use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;

pub enum Pull<T> {
    Ready(T),
    /// Nothing this time (timeout, empty, transient device error).
    Idle,
    /// Upstream is finished for good.
    Closed,
}

pub trait Stage: Send + 'static {
    type Unit: Send;

    fn pull(&mut self) -> Pull<Self::Unit>;

    /// Process one unit and hand it on. Failures are handled here; the unit
    /// is dropped if it cannot be delivered.
    fn deliver(&mut self, unit: Self::Unit);

    /// Called once after the loop exits.
    fn finish(&mut self) {}
}

pub struct StageWorker {
    name: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl StageWorker {
    /// Run `stage` on a new thread named `name` until `cancel` fires or the
    /// stage reports its upstream closed.
    pub fn spawn<S: Stage>(name: &str, mut stage: S, cancel: CancellationToken) -> anyhow::Result<Self> {
        let thread_name = name.to_string();
        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                log::debug!("{} stage started", thread_name);
                let iterations = run_stage(&mut stage, &thread_cancel);
                stage.finish();
                log::info!("{} stage finished after {} iterations", thread_name, iterations);
            })
            .map_err(|e| anyhow::anyhow!("failed to spawn {} thread: {}", name, e))?;

        Ok(Self {
            name: name.to_string(),
            cancel,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Wait for the thread to exit. The caller must already have cancelled
    /// the run flag or closed the stage's channels.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::debug!("joining {} stage", self.name);
            if let Err(e) = handle.join() {
                log::error!("{} stage panicked: {:?}", self.name, e);
            }
        }
    }
}

impl Drop for StageWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::debug!("{} worker dropped while running, stopping", self.name);
            self.cancel.cancel();
            self.join();
        }
    }
}

fn run_stage<S: Stage>(stage: &mut S, cancel: &CancellationToken) -> u64 {
    let mut iterations = 0u64;
    while !cancel.is_cancelled() {
        iterations += 1;
        match stage.pull() {
            Pull::Ready(unit) => stage.deliver(unit),
            Pull::Idle => continue,
            Pull::Closed => break,
        }
    }
    iterations
}
