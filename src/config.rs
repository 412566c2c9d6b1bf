use std::{net::SocketAddr, path::Path};

use anyhow::Context;
use frame_bus::{StreamConfig, SupervisorConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Status API address; no API server when unset.
    pub api_addr: Option<SocketAddr>,
    /// Seconds between two performance reports, 0 disables them.
    pub stats_interval_secs: u64,
    pub max_streams: usize,
    pub streams: Vec<StreamConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let supervisor = SupervisorConfig::default();
        Self {
            api_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            stats_interval_secs: 10,
            max_streams: supervisor.max_streams,
            streams: supervisor.streams,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.supervisor().validate()?;
        for stream in &config.streams {
            let sinks = &stream.sinks;
            if let Some(url) = sinks.rtsp_url.as_ref().or(sinks.rtmp_url.as_ref()) {
                anyhow::bail!(
                    "stream {}: no publisher for {}, only file_path is supported",
                    stream.id,
                    url
                );
            }
        }
        Ok(config)
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_streams: self.max_streams,
            streams: self.streams.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use frame_bus::{CaptureMode, RegressionPolicy};

    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let cfg = AppConfig::parse("{}").unwrap();
        assert_eq!(cfg.stats_interval_secs, 10);
        assert_eq!(cfg.max_streams, 2);
        assert_eq!(cfg.streams.len(), 2);
        assert_eq!(cfg.api_addr.map(|a| a.port()), Some(8080));
    }

    #[test]
    fn test_stream_overrides() {
        let cfg = AppConfig::parse(
            r#"{
                "api_addr": null,
                "streams": [
                    {"id": 0, "fps": 25, "timestamp_policy": "propagate"},
                    {"id": 1, "enabled": true, "capture": "software", "raw_capacity": 2}
                ]
            }"#,
        )
        .unwrap();
        assert!(cfg.api_addr.is_none());
        assert_eq!(cfg.streams[0].fps, 25);
        assert_eq!(cfg.streams[0].timestamp_policy, RegressionPolicy::Propagate);
        assert_eq!(cfg.streams[1].capture, CaptureMode::Software);
        // unset fields of an explicit stream take the main profile
        assert_eq!(cfg.streams[1].width, 1920);
        assert_eq!(cfg.supervisor().active_streams().count(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(AppConfig::parse(r#"{"max_streams": 1}"#).is_err());
        assert!(AppConfig::parse(r#"{"streams": [{"id": 0}, {"id": 0}]}"#).is_err());
        assert!(AppConfig::parse("not json").is_err());
    }

    #[test]
    fn test_network_sinks_rejected() {
        let err = AppConfig::parse(
            r#"{"streams": [{"id": 0, "sinks": {"rtsp_url": "rtsp://0.0.0.0:554/live/main"}}]}"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("rtsp://0.0.0.0:554/live/main"));

        assert!(
            AppConfig::parse(r#"{"streams": [{"id": 0, "sinks": {"rtmp_url": "rtmp://host/live"}}]}"#)
                .is_err()
        );
        let cfg = AppConfig::parse(r#"{"streams": [{"id": 0, "sinks": {"file_path": "/tmp/a.h264"}}]}"#)
            .unwrap();
        assert!(cfg.streams[0].sinks.file_path.is_some());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/ipc.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/ipc.json"));
    }
}
