use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering},
};

use serde::Serialize;

use crate::{channel::FrameChannel, frame::BufferLedger};

/// Log the first and then every Nth occurrence of a hot-path event.
pub const LOG_INTERVAL: u64 = 120;

pub(crate) fn should_log(count: u64) -> bool {
    count % LOG_INTERVAL == 1
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Created,
    Running,
    Draining,
    Stopped,
}

#[derive(Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> PipelineState {
        match self.0.load(Ordering::Acquire) {
            0 => PipelineState::Created,
            1 => PipelineState::Running,
            2 => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }

    pub(crate) fn set(&self, state: PipelineState) {
        let v = match state {
            PipelineState::Created => 0,
            PipelineState::Running => 1,
            PipelineState::Draining => 2,
            PipelineState::Stopped => 3,
        };
        self.0.store(v, Ordering::Release);
    }
}

#[derive(Default)]
pub struct StreamMetrics {
    pub captured: AtomicU64,
    pub capture_dropped: AtomicU64,
    pub encoded: AtomicU64,
    pub encode_dropped: AtomicU64,
    pub pushed: AtomicU64,
    pub bytes_pushed: AtomicU64,
    pub sink_errors: AtomicU64,
    pub hardware_errors: AtomicU64,
    pub alloc_failures: AtomicU64,
    pub drained: AtomicU64,
    pub pts_resyncs: AtomicU64,
    pub last_timestamp: AtomicI64,
}

impl StreamMetrics {
    /// Increment `counter` and return the new value.
    pub(crate) fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StreamSnapshot {
    pub id: u32,
    pub name: String,
    pub state: PipelineState,
    pub raw_queued: Option<usize>,
    pub encoded_queued: usize,
    pub encoded_capacity: usize,
    pub captured: u64,
    pub encoded: u64,
    pub pushed: u64,
    pub dropped: u64,
    pub bytes_pushed: u64,
    pub sink_errors: u64,
    pub hardware_errors: u64,
    pub alloc_failures: u64,
    pub drained: u64,
    pub pts_resyncs: u64,
    pub last_timestamp: i64,
    pub live_buffers: usize,
    pub live_bytes: usize,
}

/// Read-only view of a running pipeline for diagnostics.
///
/// Queue depths are point-in-time samples; nothing should branch on them.
#[derive(Clone)]
pub struct StreamProbe {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) state: Arc<StateCell>,
    pub(crate) raw: Option<Arc<FrameChannel>>,
    pub(crate) encoded: Arc<FrameChannel>,
    pub(crate) metrics: Arc<StreamMetrics>,
    pub(crate) ledger: BufferLedger,
}

impl StreamProbe {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let m = &self.metrics;
        StreamSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: self.state.get(),
            raw_queued: self.raw.as_ref().map(|c| c.len()),
            encoded_queued: self.encoded.len(),
            encoded_capacity: self.encoded.capacity(),
            captured: m.captured.load(Ordering::Relaxed),
            encoded: m.encoded.load(Ordering::Relaxed),
            pushed: m.pushed.load(Ordering::Relaxed),
            dropped: m.encode_dropped.load(Ordering::Relaxed)
                + m.capture_dropped.load(Ordering::Relaxed),
            bytes_pushed: m.bytes_pushed.load(Ordering::Relaxed),
            sink_errors: m.sink_errors.load(Ordering::Relaxed),
            hardware_errors: m.hardware_errors.load(Ordering::Relaxed),
            alloc_failures: m.alloc_failures.load(Ordering::Relaxed),
            drained: m.drained.load(Ordering::Relaxed),
            pts_resyncs: m.pts_resyncs.load(Ordering::Relaxed),
            last_timestamp: m.last_timestamp.load(Ordering::Relaxed),
            live_buffers: self.ledger.live(),
            live_bytes: self.ledger.live_bytes(),
        }
    }
}
