//! Software stand-ins for the camera's capture and encoder blocks.
//!
//! They pace output at the stream's frame rate and lend buffers from small
//! fixed pools like the real hardware does, so a caller that forgets to
//! release a packet or frame runs dry and sees [`HardwareError::Busy`].

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    config::StreamConfig,
    device::{CaptureDevice, EncoderDevice, HardwareError, PacketHandle, PacketRef},
    frame::{FrameUnit, HardwareBuffer},
};

/// Packet buffers per encoder channel.
pub const STREAM_BUF_COUNT: usize = 5;
/// Raw frame buffers in the capture pool.
pub const CAPTURE_BUF_COUNT: usize = 4;

#[derive(Clone, Default)]
pub struct DeviceStats {
    inner: Arc<DeviceCounters>,
}

#[derive(Default)]
struct DeviceCounters {
    produced: AtomicU64,
    outstanding: AtomicUsize,
}

impl DeviceStats {
    /// Packets or frames handed out so far.
    pub fn produced(&self) -> u64 {
        self.inner.produced.load(Ordering::SeqCst)
    }

    /// Buffers currently lent out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }
}

struct Pacer {
    interval: Duration,
    next_due: Instant,
}

impl Pacer {
    fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_micros(1_000_000 / fps.max(1) as u64),
            next_due: Instant::now(),
        }
    }

    /// Sleep until the next frame is due or `timeout` passes.
    fn wait(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        if now < self.next_due {
            thread::sleep(timeout.min(self.next_due - now));
        }
        Instant::now() >= self.next_due
    }

    fn advance(&mut self) {
        self.next_due += self.interval;
        let now = Instant::now();
        // a stalled consumer should not cause a burst on resume
        if self.next_due + self.interval < now {
            self.next_due = now;
        }
    }
}

enum Feed {
    /// Capture bound in hardware: frames arrive on their own.
    Paced(Pacer),
    /// Frames submitted by the application, pts of each.
    Submitted(VecDeque<i64>),
}

struct Slot {
    data: Vec<u8>,
    in_use: bool,
}

pub struct SyntheticEncoder {
    feed: Feed,
    slots: Vec<Slot>,
    start_pts: i64,
    pts_step: i64,
    gop: u64,
    packet_size: usize,
    frame_index: u64,
    frame_limit: Option<u64>,
    fail_every: Option<u64>,
    polls: u64,
    stats: DeviceStats,
}

impl SyntheticEncoder {
    /// Encoder fed by capture bound in hardware.
    pub fn bound(config: &StreamConfig) -> Self {
        Self::with_feed(config, Feed::Paced(Pacer::new(config.fps)))
    }

    /// Encoder that only produces packets for frames given to `submit_frame`.
    pub fn software(config: &StreamConfig) -> Self {
        Self::with_feed(config, Feed::Submitted(VecDeque::new()))
    }

    fn with_feed(config: &StreamConfig, feed: Feed) -> Self {
        let packet_size = (config.bitrate as usize / 8 / config.fps.max(1) as usize).max(16);
        Self {
            feed,
            slots: (0..STREAM_BUF_COUNT)
                .map(|_| Slot {
                    data: Vec::new(),
                    in_use: false,
                })
                .collect(),
            start_pts: 0,
            pts_step: config.frame_interval_us(),
            gop: config.gop.max(1) as u64,
            packet_size,
            frame_index: 0,
            frame_limit: None,
            fail_every: None,
            polls: 0,
            stats: DeviceStats::default(),
        }
    }

    /// Stop producing after `limit` packets.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Fail every `n`th poll with a transient error.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn with_start_pts(mut self, pts: i64) -> Self {
        self.start_pts = pts;
        self
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }

    fn fill(&mut self, slot: usize, is_keyframe: bool) {
        let size = if is_keyframe {
            self.packet_size * 3
        } else {
            self.packet_size
        };
        let nal = if is_keyframe { 0x65 } else { 0x41 };
        let data = &mut self.slots[slot].data;
        data.clear();
        data.extend_from_slice(&[0, 0, 0, 1, nal]);
        data.resize(size.max(5), self.frame_index as u8);
    }
}

impl EncoderDevice for SyntheticEncoder {
    fn poll_packet(&mut self, timeout: Duration) -> Result<Option<PacketRef<'_>>, HardwareError> {
        self.polls += 1;
        if self.fail_every.is_some_and(|n| self.polls % n == 0) {
            return Err(HardwareError::Failed {
                op: "get_stream",
                code: -1,
            });
        }
        if self.frame_limit.is_some_and(|limit| self.frame_index >= limit) {
            thread::sleep(timeout);
            return Ok(None);
        }

        let pts = match &mut self.feed {
            Feed::Paced(pacer) => {
                if !pacer.wait(timeout) {
                    return Ok(None);
                }
                self.start_pts + self.frame_index as i64 * self.pts_step
            }
            Feed::Submitted(pending) => match pending.front() {
                Some(pts) => *pts,
                None => {
                    thread::sleep(timeout);
                    return Ok(None);
                }
            },
        };

        let slot = self
            .slots
            .iter()
            .position(|s| !s.in_use)
            .ok_or(HardwareError::Busy)?;

        match &mut self.feed {
            Feed::Paced(pacer) => pacer.advance(),
            Feed::Submitted(pending) => {
                pending.pop_front();
            }
        }
        let is_keyframe = self.frame_index % self.gop == 0;
        self.fill(slot, is_keyframe);
        self.slots[slot].in_use = true;
        self.frame_index += 1;
        self.stats.inner.produced.fetch_add(1, Ordering::SeqCst);
        self.stats.inner.outstanding.fetch_add(1, Ordering::SeqCst);

        Ok(Some(PacketRef {
            handle: PacketHandle(slot as u64),
            data: &self.slots[slot].data,
            pts,
            is_keyframe,
        }))
    }

    fn release_packet(&mut self, handle: PacketHandle) -> Result<(), HardwareError> {
        match self.slots.get_mut(handle.0 as usize) {
            Some(slot) if slot.in_use => {
                slot.in_use = false;
                self.stats.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(HardwareError::Failed {
                op: "release_stream",
                code: -2,
            }),
        }
    }

    fn submit_frame(&mut self, frame: FrameUnit) -> Result<(), HardwareError> {
        match &mut self.feed {
            Feed::Submitted(pending) if pending.len() < STREAM_BUF_COUNT => {
                pending.push_back(frame.pts());
                Ok(())
            }
            Feed::Submitted(_) => Err(HardwareError::Busy),
            Feed::Paced(_) => Err(HardwareError::Unsupported("submit_frame")),
        }
    }
}

struct PooledFrame {
    stats: DeviceStats,
    len: usize,
}

impl HardwareBuffer for PooledFrame {
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        self.stats.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Raw NV12 frames backed by a fixed pool of capture buffers.
pub struct SyntheticCapture {
    pacer: Pacer,
    width: u32,
    height: u32,
    pts_step: i64,
    frame_index: u64,
    frame_limit: Option<u64>,
    stats: DeviceStats,
}

impl SyntheticCapture {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            pacer: Pacer::new(config.fps),
            width: config.width,
            height: config.height,
            pts_step: config.frame_interval_us(),
            frame_index: 0,
            frame_limit: None,
            stats: DeviceStats::default(),
        }
    }

    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }
}

impl CaptureDevice for SyntheticCapture {
    fn capture_frame(&mut self, timeout: Duration) -> Result<Option<FrameUnit>, HardwareError> {
        if self.frame_limit.is_some_and(|limit| self.frame_index >= limit) {
            thread::sleep(timeout);
            return Ok(None);
        }
        if !self.pacer.wait(timeout) {
            return Ok(None);
        }
        if self.stats.outstanding() >= CAPTURE_BUF_COUNT {
            return Err(HardwareError::Busy);
        }
        self.pacer.advance();

        self.stats.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        self.stats.inner.produced.fetch_add(1, Ordering::SeqCst);
        let buffer = PooledFrame {
            stats: self.stats.clone(),
            len: (self.width * self.height * 3 / 2) as usize,
        };
        let pts = self.frame_index as i64 * self.pts_step;
        self.frame_index += 1;

        Ok(Some(FrameUnit::raw_hardware(
            Box::new(buffer),
            self.width,
            self.height,
            pts,
        )))
    }
}
