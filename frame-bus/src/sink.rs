use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

/// Destination of an encoded stream (RTSP/RTMP publisher, file, ...).
///
/// Errors are reported per unit; the pipeline logs them and keeps going.
pub trait Sink: Send {
    fn name(&self) -> &str;

    fn write(
        &mut self,
        stream_id: u32,
        data: &[u8],
        timestamp: i64,
        is_keyframe: bool,
    ) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Raw elementary-stream dump.
pub struct FileSink {
    name: String,
    path: PathBuf,
    file: File,
    bytes_written: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| anyhow::anyhow!("failed to open output file {}: {}", path.display(), e))?;
        log::info!("file sink writing to {}", path.display());
        Ok(Self {
            name: format!("file:{}", path.display()),
            path,
            file,
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(
        &mut self,
        _stream_id: u32,
        data: &[u8],
        _timestamp: i64,
        _is_keyframe: bool,
    ) -> anyhow::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.file.write_all(data)?;
        // flushed per packet so a killed process leaves a playable dump
        self.file.flush()?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Fans each unit out to every configured sink.
///
/// A write succeeds if at least one sink accepted the unit; failing sinks
/// are logged individually.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn Sink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Box<dyn Sink>) -> Self {
        self.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Sink for SinkSet {
    fn name(&self) -> &str {
        "sink-set"
    }

    fn write(
        &mut self,
        stream_id: u32,
        data: &[u8],
        timestamp: i64,
        is_keyframe: bool,
    ) -> anyhow::Result<()> {
        if self.sinks.is_empty() {
            return Ok(());
        }
        let mut last_err = None;
        let mut delivered = 0;
        for sink in self.sinks.iter_mut() {
            match sink.write(stream_id, data, timestamp, is_keyframe) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::debug!("stream {} sink {} write error: {:#}", stream_id, sink.name(), e);
                    last_err = Some(e);
                }
            }
        }
        match (delivered, last_err) {
            (0, Some(e)) => Err(e.context("all sinks failed")),
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.flush() {
                log::warn!("sink {} flush error: {:#}", sink.name(), e);
            }
        }
        Ok(())
    }
}
