use frame_bus::{
    CaptureMode, FileSink, SinkSet, StreamBackend, StreamConfig, StreamParts,
    synthetic::{SyntheticCapture, SyntheticEncoder},
};

/// Backend driven by the synthetic capture and encoder devices.
#[derive(Default)]
pub struct SyntheticBackend {
    prepared: bool,
    open_streams: Vec<u32>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn build_sinks(config: &StreamConfig) -> anyhow::Result<SinkSet> {
    let mut sinks = SinkSet::new();
    if let Some(path) = &config.sinks.file_path {
        sinks.push(Box::new(FileSink::create(path)?));
    }
    for url in [&config.sinks.rtsp_url, &config.sinks.rtmp_url]
        .into_iter()
        .flatten()
    {
        log::warn!("stream {}: no publisher for {}, skipped", config.id, url);
    }
    if sinks.is_empty() {
        log::warn!("stream {}: no sink configured, packets are discarded", config.id);
    }
    Ok(sinks)
}

impl StreamBackend for SyntheticBackend {
    fn prepare(&mut self) -> anyhow::Result<()> {
        log::info!("synthetic capture ready");
        self.prepared = true;
        Ok(())
    }

    fn open(&mut self, config: &StreamConfig) -> anyhow::Result<StreamParts> {
        if !self.prepared {
            anyhow::bail!("capture not prepared");
        }
        let sinks = build_sinks(config)?;
        let parts = match config.capture {
            CaptureMode::Bound => StreamParts::new(
                Box::new(SyntheticEncoder::bound(config)),
                Box::new(sinks),
            ),
            CaptureMode::Software => StreamParts::new(
                Box::new(SyntheticEncoder::software(config)),
                Box::new(sinks),
            )
            .with_capture(Box::new(SyntheticCapture::new(config))),
        };
        self.open_streams.push(config.id);
        log::info!(
            "stream {} opened: {:?} {}x{}@{} {} kbps gop {}",
            config.id,
            config.codec,
            config.width,
            config.height,
            config.fps,
            config.bitrate / 1000,
            config.gop
        );
        Ok(parts)
    }

    fn close(&mut self, config: &StreamConfig) {
        self.open_streams.retain(|id| *id != config.id);
        log::info!("stream {} closed", config.id);
    }

    fn shutdown(&mut self) {
        if !self.open_streams.is_empty() {
            log::warn!("shutdown with open streams {:?}", self.open_streams);
        }
        self.prepared = false;
        log::info!("synthetic capture released");
    }
}
