//! One video stream: encoder → encoded channel → sink, plus an optional
//! software capture stage feeding the encoder through a raw channel.
//!
//! ```text
//! [capture-N] ─raw─► [venc-N] ─encoded─► [push-N] ─► sink
//! ```
//!
//! Stopping is ordered so nothing is leaked: cancel, close both channels
//! (wakes any blocked push/pop), then join capture, encode and push. Each
//! stage drains what is left in its input before exiting.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::{
    channel::FrameChannel,
    config::{CaptureMode, StreamConfig},
    device::StreamParts,
    frame::BufferLedger,
    metrics::{PipelineState, StateCell, StreamMetrics, StreamProbe},
    stage::{CaptureStage, EncodeStage, PushStage},
    timestamp::{SystemClock, TimestampRebaser},
    worker::StageWorker,
};

pub struct StreamPipeline {
    config: StreamConfig,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    raw: Option<Arc<FrameChannel>>,
    encoded: Arc<FrameChannel>,
    capture: Option<StageWorker>,
    encode: Option<StageWorker>,
    push: Option<StageWorker>,
    metrics: Arc<StreamMetrics>,
    ledger: BufferLedger,
}

impl StreamPipeline {
    /// Allocate the channels of one stream. Cancelling `parent` stops it.
    pub fn new(config: StreamConfig, parent: &CancellationToken) -> anyhow::Result<Self> {
        config.validate()?;
        let raw = match config.capture {
            CaptureMode::Software => Some(Arc::new(
                FrameChannel::new(config.raw_capacity)
                    .with_context(|| format!("stream {} raw channel", config.id))?,
            )),
            CaptureMode::Bound => None,
        };
        let encoded = Arc::new(
            FrameChannel::new(config.encoded_capacity)
                .with_context(|| format!("stream {} encoded channel", config.id))?,
        );

        Ok(Self {
            config,
            cancel: parent.child_token(),
            state: Arc::new(StateCell::default()),
            raw,
            encoded,
            capture: None,
            encode: None,
            push: None,
            metrics: Arc::new(StreamMetrics::default()),
            ledger: BufferLedger::new(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    pub fn probe(&self) -> StreamProbe {
        StreamProbe {
            id: self.config.id,
            name: self.config.name.clone(),
            state: Arc::clone(&self.state),
            raw: self.raw.clone(),
            encoded: Arc::clone(&self.encoded),
            metrics: Arc::clone(&self.metrics),
            ledger: self.ledger.clone(),
        }
    }

    /// Spawn the stage threads. A pipeline runs at most once; on failure the
    /// stages already started are stopped again.
    pub fn start(&mut self, parts: StreamParts) -> anyhow::Result<()> {
        if self.state() != PipelineState::Created {
            anyhow::bail!("stream {} already started ({:?})", self.config.id, self.state());
        }
        if let Err(e) = self.spawn_stages(parts) {
            log::error!("stream {} failed to start: {:#}", self.config.id, e);
            self.stop();
            return Err(e);
        }
        self.state.set(PipelineState::Running);
        log::info!(
            "stream {} ({}) running: {}x{}@{} {:?}, {:?} capture",
            self.config.id,
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.fps,
            self.config.codec,
            self.config.capture
        );
        Ok(())
    }

    fn spawn_stages(&mut self, parts: StreamParts) -> anyhow::Result<()> {
        let id = self.config.id;
        let StreamParts {
            encoder,
            capture,
            sink,
            clock,
        } = parts;

        let capture = match (&self.raw, capture) {
            (Some(_), None) => anyhow::bail!("stream {}: software capture needs a capture device", id),
            (None, Some(_)) => {
                log::warn!("stream {}: capture bound in hardware, capture device unused", id);
                None
            }
            (_, capture) => capture,
        };

        self.encode = Some(StageWorker::spawn(
            &format!("venc-{}", id),
            EncodeStage {
                stream_id: id,
                encoder,
                raw: self.raw.clone(),
                raw_closed: false,
                out: Arc::clone(&self.encoded),
                ledger: self.ledger.clone(),
                metrics: Arc::clone(&self.metrics),
                poll_timeout: self.config.poll_timeout(),
                push_timeout: self.config.push_timeout(),
            },
            self.cancel.clone(),
        )?);

        self.push = Some(StageWorker::spawn(
            &format!("push-{}", id),
            PushStage {
                stream_id: id,
                input: Arc::clone(&self.encoded),
                sink,
                rebaser: TimestampRebaser::new(self.config.timestamp_policy),
                clock: clock.unwrap_or_else(|| Box::new(SystemClock)),
                metrics: Arc::clone(&self.metrics),
                pop_timeout: self.config.pop_timeout(),
            },
            self.cancel.clone(),
        )?);

        if let (Some(raw), Some(capture)) = (&self.raw, capture) {
            self.capture = Some(StageWorker::spawn(
                &format!("capture-{}", id),
                CaptureStage {
                    stream_id: id,
                    capture,
                    out: Arc::clone(raw),
                    metrics: Arc::clone(&self.metrics),
                    capture_timeout: self.config.poll_timeout(),
                    push_timeout: self.config.push_timeout(),
                },
                self.cancel.clone(),
            )?);
        }
        Ok(())
    }

    /// Stop all stages and wait for them. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.state() == PipelineState::Stopped {
            return;
        }
        self.state.set(PipelineState::Draining);
        log::debug!("stopping stream {}", self.config.id);

        self.cancel.cancel();
        if let Some(raw) = &self.raw {
            raw.close();
        }
        self.encoded.close();

        for worker in [&mut self.capture, &mut self.encode, &mut self.push] {
            if let Some(mut w) = worker.take() {
                w.join();
            }
        }

        // anything a stage did not get to drain goes now
        let mut left = self.encoded.drain().len();
        if let Some(raw) = &self.raw {
            left += raw.drain().len();
        }
        if left > 0 {
            self.metrics
                .drained
                .fetch_add(left as u64, std::sync::atomic::Ordering::Relaxed);
        }

        self.state.set(PipelineState::Stopped);
        log::info!(
            "stream {} stopped, {} live buffers",
            self.config.id,
            self.ledger.live()
        );
    }
}

impl Drop for StreamPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
