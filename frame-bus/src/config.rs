use std::{collections::HashSet, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{channel::Timeout, timestamp::RegressionPolicy};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
}

/// Where raw frames come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Capture is bound to the encoder in hardware; no raw frames reach
    /// the application.
    #[default]
    Bound,
    /// Raw frames are captured by a stage thread and queued for the encoder.
    Software,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub rtsp_url: Option<String>,
    pub rtmp_url: Option<String>,
    pub file_path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    // bps
    pub bitrate: u32,
    pub gop: u32,
    pub codec: Codec,
    pub capture: CaptureMode,
    pub raw_capacity: usize,
    pub encoded_capacity: usize,
    /// How long the encode stage waits on the encoder per iteration.
    pub poll_timeout_ms: u64,
    /// Push into the encoded channel: -1 forever, 0 no wait, >0 ms.
    pub push_timeout_ms: i64,
    /// How long the push stage waits for an encoded packet per iteration.
    pub pop_timeout_ms: u64,
    pub timestamp_policy: RegressionPolicy,
    pub sinks: SinkConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::main()
    }
}

impl StreamConfig {
    pub fn main() -> Self {
        Self {
            id: 0,
            name: "main".to_string(),
            enabled: true,
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 4_000_000,
            gop: 60,
            codec: Codec::H264,
            capture: CaptureMode::Bound,
            raw_capacity: 4,
            encoded_capacity: 16,
            poll_timeout_ms: 1000,
            push_timeout_ms: 40,
            pop_timeout_ms: 200,
            timestamp_policy: RegressionPolicy::Resync,
            sinks: SinkConfig {
                file_path: Some(PathBuf::from("/tmp/rv_demo.h264")),
                ..Default::default()
            },
        }
    }

    pub fn sub() -> Self {
        Self {
            id: 1,
            name: "sub".to_string(),
            enabled: false,
            width: 704,
            height: 576,
            bitrate: 1_000_000,
            sinks: SinkConfig::default(),
            ..Self::main()
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn push_timeout(&self) -> Timeout {
        Timeout::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    /// Microseconds between two frames at the configured rate.
    pub fn frame_interval_us(&self) -> i64 {
        1_000_000 / self.fps.max(1) as i64
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("stream {}: invalid size {}x{}", self.id, self.width, self.height);
        }
        if self.fps == 0 {
            anyhow::bail!("stream {}: fps must be positive", self.id);
        }
        // stage loops must block on each pull or they spin
        if self.poll_timeout_ms == 0 || self.pop_timeout_ms == 0 {
            anyhow::bail!(
                "stream {}: poll_timeout_ms ({}) and pop_timeout_ms ({}) must be positive",
                self.id,
                self.poll_timeout_ms,
                self.pop_timeout_ms
            );
        }
        if self.encoded_capacity == 0 {
            anyhow::bail!("stream {}: encoded_capacity must be positive", self.id);
        }
        if self.capture == CaptureMode::Software {
            if self.raw_capacity == 0 {
                anyhow::bail!("stream {}: raw_capacity must be positive", self.id);
            }
            if self.encoded_capacity <= self.raw_capacity {
                anyhow::bail!(
                    "stream {}: encoded_capacity ({}) must exceed raw_capacity ({})",
                    self.id,
                    self.encoded_capacity,
                    self.raw_capacity
                );
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_streams: usize,
    /// The first entry is the main stream and is always started.
    pub streams: Vec<StreamConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_streams: 2,
            streams: vec![StreamConfig::main(), StreamConfig::sub()],
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.streams.is_empty() {
            anyhow::bail!("no stream configured");
        }
        if self.streams.len() > self.max_streams {
            anyhow::bail!(
                "{} streams configured, at most {} supported",
                self.streams.len(),
                self.max_streams
            );
        }
        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !ids.insert(stream.id) {
                anyhow::bail!("duplicate stream id {}", stream.id);
            }
            stream.validate()?;
        }
        Ok(())
    }

    /// Streams to start, in start order.
    pub fn active_streams(&self) -> impl Iterator<Item = &StreamConfig> {
        self.streams
            .iter()
            .enumerate()
            .filter(|(i, s)| *i == 0 || s.enabled)
            .map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_camera_profile() {
        let main = StreamConfig::main();
        assert_eq!((main.width, main.height, main.fps), (1920, 1080, 30));
        assert_eq!(main.bitrate, 4_000_000);
        assert_eq!(main.gop, 60);
        assert_eq!(main.frame_interval_us(), 33_333);
        assert_eq!(main.push_timeout(), Timeout::After(Duration::from_millis(40)));

        let sub = StreamConfig::sub();
        assert_eq!(sub.id, 1);
        assert!(!sub.enabled);
        assert!(sub.sinks.file_path.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: StreamConfig = serde_json::from_str(
            r#"{"id": 3, "name": "aux", "capture": "software", "codec": "h265",
                "sinks": {"rtsp_url": "rtsp://0.0.0.0/live/aux"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.id, 3);
        assert_eq!(cfg.capture, CaptureMode::Software);
        assert_eq!(cfg.codec, Codec::H265);
        assert_eq!(cfg.fps, 30);
        assert_eq!(cfg.sinks.rtsp_url.as_deref(), Some("rtsp://0.0.0.0/live/aux"));
        assert!(cfg.sinks.file_path.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_capacities() {
        let mut cfg = StreamConfig::main();
        cfg.encoded_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamConfig::main();
        cfg.capture = CaptureMode::Software;
        cfg.raw_capacity = 16;
        cfg.encoded_capacity = 16;
        assert!(cfg.validate().is_err());

        let mut cfg = StreamConfig::main();
        cfg.fps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_stage_timeouts() {
        let cfg = StreamConfig {
            poll_timeout_ms: 0,
            ..StreamConfig::main()
        };
        assert!(cfg.validate().is_err());

        let cfg = StreamConfig {
            pop_timeout_ms: 0,
            ..StreamConfig::main()
        };
        assert!(cfg.validate().is_err());

        // push may still be non-blocking: it drops instead of waiting
        let cfg = StreamConfig {
            push_timeout_ms: 0,
            ..StreamConfig::main()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_supervisor_config_limits() {
        let mut cfg = SupervisorConfig::default();
        cfg.validate().unwrap();

        cfg.max_streams = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = SupervisorConfig::default();
        cfg.streams[1].id = 0;
        assert!(cfg.validate().is_err());

        let cfg = SupervisorConfig {
            max_streams: 4,
            streams: Vec::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_main_always_active() {
        let mut cfg = SupervisorConfig::default();
        cfg.streams[0].enabled = false;
        let ids: Vec<u32> = cfg.active_streams().map(|s| s.id).collect();
        assert_eq!(ids, vec![0]);

        cfg.streams[1].enabled = true;
        let ids: Vec<u32> = cfg.active_streams().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
