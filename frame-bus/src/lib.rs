//! Frame transport and stream lifecycle for a camera's capture → encode →
//! publish path.
//!
//! Stages run on their own OS threads and exchange [`frame::FrameUnit`]s
//! through bounded channels; a [`supervisor::PipelineSupervisor`] owns the
//! per-stream pipelines and the shared hardware.

pub mod channel;
pub mod config;
pub mod device;
pub mod frame;
pub mod metrics;
pub mod pipeline;
pub mod sink;
mod stage;
pub mod supervisor;
pub mod synthetic;
pub mod timestamp;
pub mod worker;

pub use channel::{BoundedChannel, ChannelError, FrameChannel, PushError, Timeout};
pub use config::{CaptureMode, Codec, SinkConfig, StreamConfig, SupervisorConfig};
pub use device::{CaptureDevice, EncoderDevice, HardwareError, StreamBackend, StreamParts};
pub use frame::{BufferLedger, FrameKind, FrameUnit, OwnedBuffer};
pub use metrics::{PipelineState, StreamProbe, StreamSnapshot};
pub use pipeline::StreamPipeline;
pub use sink::{FileSink, Sink, SinkSet};
pub use supervisor::PipelineSupervisor;
pub use timestamp::{RegressionPolicy, SystemClock, TimestampRebaser, WallClock};
