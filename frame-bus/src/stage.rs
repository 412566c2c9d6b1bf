//! The concrete stages of a stream pipeline: capture, encode and push.

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use crate::{
    channel::{ChannelError, FrameChannel, Timeout},
    device::{CaptureDevice, EncoderDevice},
    frame::{BufferLedger, FrameUnit},
    metrics::{StreamMetrics, should_log},
    sink::Sink,
    timestamp::{TimestampRebaser, WallClock},
    worker::{Pull, Stage},
};

/// Software capture: raw frames from the capture device into the raw channel.
pub(crate) struct CaptureStage {
    pub(crate) stream_id: u32,
    pub(crate) capture: Box<dyn CaptureDevice>,
    pub(crate) out: Arc<FrameChannel>,
    pub(crate) metrics: Arc<StreamMetrics>,
    pub(crate) capture_timeout: Duration,
    pub(crate) push_timeout: Timeout,
}

impl Stage for CaptureStage {
    type Unit = FrameUnit;

    fn pull(&mut self) -> Pull<FrameUnit> {
        match self.capture.capture_frame(self.capture_timeout) {
            Ok(Some(frame)) => {
                StreamMetrics::bump(&self.metrics.captured);
                Pull::Ready(frame)
            }
            Ok(None) => Pull::Idle,
            Err(e) => {
                let n = StreamMetrics::bump(&self.metrics.hardware_errors);
                if should_log(n) {
                    log::warn!("stream {} capture error: {} ({} total)", self.stream_id, e, n);
                }
                Pull::Idle
            }
        }
    }

    fn deliver(&mut self, frame: FrameUnit) {
        if let Err(e) = self.out.push(frame, self.push_timeout) {
            let n = StreamMetrics::bump(&self.metrics.capture_dropped);
            if e.error() != ChannelError::Closed && should_log(n) {
                log::warn!(
                    "stream {} raw queue {}, dropped {} frames (back-pressure)",
                    self.stream_id,
                    e.error(),
                    n
                );
            }
        }
    }
}

/// Pulls encoded packets out of the encoder, copies them into owned buffers
/// and queues them for the push stage. With software capture it also feeds
/// raw frames from the raw channel into the encoder.
pub(crate) struct EncodeStage {
    pub(crate) stream_id: u32,
    pub(crate) encoder: Box<dyn EncoderDevice>,
    pub(crate) raw: Option<Arc<FrameChannel>>,
    pub(crate) raw_closed: bool,
    pub(crate) out: Arc<FrameChannel>,
    pub(crate) ledger: BufferLedger,
    pub(crate) metrics: Arc<StreamMetrics>,
    pub(crate) poll_timeout: Duration,
    pub(crate) push_timeout: Timeout,
}

impl EncodeStage {
    fn feed_encoder(&mut self, raw: &FrameChannel) {
        if self.raw_closed {
            return;
        }
        match raw.pop(Timeout::from(self.poll_timeout)) {
            Ok(frame) => {
                if let Err(e) = self.encoder.submit_frame(frame) {
                    let n = StreamMetrics::bump(&self.metrics.hardware_errors);
                    if should_log(n) {
                        log::warn!("stream {} submit frame error: {} ({} total)", self.stream_id, e, n);
                    }
                }
            }
            Err(ChannelError::Closed) => {
                log::debug!("stream {} raw queue closed", self.stream_id);
                self.raw_closed = true;
            }
            Err(_) => {}
        }
    }
}

impl Stage for EncodeStage {
    type Unit = FrameUnit;

    fn pull(&mut self) -> Pull<FrameUnit> {
        let timeout = match self.raw.clone() {
            Some(raw) => {
                self.feed_encoder(&raw);
                Duration::ZERO
            }
            None => self.poll_timeout,
        };

        let (handle, copied) = match self.encoder.poll_packet(timeout) {
            Ok(Some(packet)) => {
                let copied = if packet.data.is_empty() {
                    None
                } else {
                    Some(
                        self.ledger
                            .copy_from_slice(packet.data)
                            .map(|buf| FrameUnit::encoded(buf, packet.pts, packet.is_keyframe)),
                    )
                };
                (packet.handle, copied)
            }
            Ok(None) if self.raw_closed => return Pull::Closed,
            Ok(None) => return Pull::Idle,
            Err(e) => {
                let n = StreamMetrics::bump(&self.metrics.hardware_errors);
                if should_log(n) {
                    log::warn!("stream {} get stream error: {} ({} total)", self.stream_id, e, n);
                }
                return Pull::Idle;
            }
        };

        // the encoder's buffer is not touched past this point
        if let Err(e) = self.encoder.release_packet(handle) {
            let n = StreamMetrics::bump(&self.metrics.hardware_errors);
            if should_log(n) {
                log::warn!("stream {} release stream error: {}", self.stream_id, e);
            }
        }

        match copied {
            Some(Ok(unit)) => {
                StreamMetrics::bump(&self.metrics.encoded);
                Pull::Ready(unit)
            }
            Some(Err(e)) => {
                let n = StreamMetrics::bump(&self.metrics.alloc_failures);
                log::error!(
                    "stream {} packet copy failed: {} ({} total), dropped",
                    self.stream_id,
                    e,
                    n
                );
                Pull::Idle
            }
            None => Pull::Idle,
        }
    }

    fn deliver(&mut self, unit: FrameUnit) {
        if let Err(e) = self.out.push(unit, self.push_timeout) {
            let n = StreamMetrics::bump(&self.metrics.encode_dropped);
            match e.error() {
                ChannelError::Closed => {
                    log::debug!("stream {} encoded queue closed, packet dropped", self.stream_id)
                }
                err if should_log(n) => log::warn!(
                    "stream {} encoded queue {}, dropped {} packets (back-pressure)",
                    self.stream_id,
                    err,
                    n
                ),
                _ => {}
            }
        }
    }

    fn finish(&mut self) {
        if let Some(raw) = &self.raw {
            let left = raw.drain();
            if !left.is_empty() {
                self.metrics
                    .drained
                    .fetch_add(left.len() as u64, Ordering::Relaxed);
                log::debug!("stream {} released {} queued raw frames", self.stream_id, left.len());
            }
        }
    }
}

/// Pops encoded packets, rebases their timestamps and writes them to the sink.
pub(crate) struct PushStage {
    pub(crate) stream_id: u32,
    pub(crate) input: Arc<FrameChannel>,
    pub(crate) sink: Box<dyn Sink>,
    pub(crate) rebaser: TimestampRebaser,
    pub(crate) clock: Box<dyn WallClock>,
    pub(crate) metrics: Arc<StreamMetrics>,
    pub(crate) pop_timeout: Duration,
}

impl Stage for PushStage {
    type Unit = FrameUnit;

    fn pull(&mut self) -> Pull<FrameUnit> {
        match self.input.pop(Timeout::from(self.pop_timeout)) {
            Ok(unit) => Pull::Ready(unit),
            Err(ChannelError::Closed) => Pull::Closed,
            Err(_) => Pull::Idle,
        }
    }

    fn deliver(&mut self, unit: FrameUnit) {
        let timestamp = self.rebaser.rebase(unit.pts(), self.clock.as_ref());
        self.metrics
            .pts_resyncs
            .store(self.rebaser.resyncs(), Ordering::Relaxed);
        self.metrics
            .last_timestamp
            .store(timestamp, Ordering::Relaxed);

        let data = unit.data().unwrap_or_default();
        match self
            .sink
            .write(self.stream_id, data, timestamp, unit.is_keyframe())
        {
            Ok(()) => {
                StreamMetrics::bump(&self.metrics.pushed);
                self.metrics
                    .bytes_pushed
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                let n = StreamMetrics::bump(&self.metrics.sink_errors);
                if should_log(n) {
                    log::warn!(
                        "stream {} sink {} write error: {:#} ({} total)",
                        self.stream_id,
                        self.sink.name(),
                        e,
                        n
                    );
                }
            }
        }
    }

    fn finish(&mut self) {
        let left = self.input.drain();
        if !left.is_empty() {
            self.metrics
                .drained
                .fetch_add(left.len() as u64, Ordering::Relaxed);
            log::debug!("stream {} released {} queued packets", self.stream_id, left.len());
        }
        if let Err(e) = self.sink.flush() {
            log::warn!("stream {} sink flush error: {:#}", self.stream_id, e);
        }
    }
}
