//! Interfaces to the capture/encode hardware.
//!
//! Real devices (VI/VENC channels of a vendor SDK) live outside this crate;
//! the pipeline only needs to poll encoded packets, give them back, and in
//! the software-capture configuration feed raw frames to the encoder.

use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use crate::{config::StreamConfig, frame::FrameUnit, sink::Sink, timestamp::WallClock};

/// Identifies a packet buffer lent out by an encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PacketHandle(pub u64);

/// Encoded packet still living in the encoder's own buffer.
///
/// Borrowing the device keeps the caller from polling again before the
/// bytes are copied out and the handle released.
pub struct PacketRef<'a> {
    pub handle: PacketHandle,
    pub data: &'a [u8],
    pub pts: i64,
    pub is_keyframe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// All buffers are in use; retry later.
    Busy,
    /// An SDK call returned an error code.
    Failed { op: &'static str, code: i32 },
    /// The device does not support this operation in its current mode.
    Unsupported(&'static str),
}

impl Display for HardwareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareError::Busy => write!(f, "device busy"),
            HardwareError::Failed { op, code } => write!(f, "{} failed: {:#x}", op, code),
            HardwareError::Unsupported(op) => write!(f, "{} not supported", op),
        }
    }
}

impl std::error::Error for HardwareError {}

pub trait EncoderDevice: Send {
    /// Wait up to `timeout` for the next encoded packet.
    fn poll_packet(&mut self, timeout: Duration) -> Result<Option<PacketRef<'_>>, HardwareError>;

    /// Return a packet buffer obtained from `poll_packet`.
    fn release_packet(&mut self, handle: PacketHandle) -> Result<(), HardwareError>;

    /// Feed a raw frame. Only used when capture is not bound to the encoder
    /// in hardware.
    fn submit_frame(&mut self, frame: FrameUnit) -> Result<(), HardwareError> {
        drop(frame);
        Err(HardwareError::Unsupported("submit_frame"))
    }
}

pub trait CaptureDevice: Send {
    /// Wait up to `timeout` for the next raw frame.
    fn capture_frame(&mut self, timeout: Duration) -> Result<Option<FrameUnit>, HardwareError>;
}

/// Everything one stream pipeline needs from the outside world.
pub struct StreamParts {
    pub encoder: Box<dyn EncoderDevice>,
    pub capture: Option<Box<dyn CaptureDevice>>,
    pub sink: Box<dyn Sink>,
    pub clock: Option<Box<dyn WallClock>>,
}

impl StreamParts {
    pub fn new(encoder: Box<dyn EncoderDevice>, sink: Box<dyn Sink>) -> Self {
        Self {
            encoder,
            capture: None,
            sink,
            clock: None,
        }
    }

    pub fn with_capture(mut self, capture: Box<dyn CaptureDevice>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn WallClock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

/// Owner of the hardware shared by all streams.
pub trait StreamBackend: Send {
    /// Bring up the shared capture path. Called once before any stream opens.
    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Create the devices and sinks of one stream.
    fn open(&mut self, config: &StreamConfig) -> anyhow::Result<StreamParts>;

    /// Tear down per-stream hardware once its pipeline has stopped.
    fn close(&mut self, _config: &StreamConfig) {}

    /// Release the shared capture path.
    fn shutdown(&mut self) {}
}
