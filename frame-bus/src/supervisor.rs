//! Owns the shared hardware and every stream pipeline.
//!
//! Start order: validate the configuration, bring up the shared capture
//! path, then open and start each active stream. Stop runs the same steps
//! backwards. A failure during start rolls back whatever was already up.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SupervisorConfig, device::StreamBackend, metrics::StreamProbe,
    pipeline::StreamPipeline,
};

pub struct PipelineSupervisor {
    config: SupervisorConfig,
    backend: Box<dyn StreamBackend>,
    cancel: CancellationToken,
    pipelines: Vec<StreamPipeline>,
    prepared: bool,
}

impl PipelineSupervisor {
    pub fn new(config: SupervisorConfig, backend: Box<dyn StreamBackend>) -> Self {
        Self {
            config,
            backend,
            cancel: CancellationToken::new(),
            pipelines: Vec::new(),
            prepared: false,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.prepared
    }

    /// Token cancelled when the supervisor stops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn probes(&self) -> Vec<StreamProbe> {
        self.pipelines.iter().map(|p| p.probe()).collect()
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.prepared {
            anyhow::bail!("supervisor already running");
        }
        self.config.validate()?;
        self.cancel = CancellationToken::new();

        self.backend.prepare().context("failed to prepare capture")?;
        self.prepared = true;

        if let Err(e) = self.start_streams() {
            log::error!("start failed, rolling back: {:#}", e);
            self.stop();
            return Err(e);
        }
        log::info!("{} stream(s) running", self.pipelines.len());
        Ok(())
    }

    fn start_streams(&mut self) -> anyhow::Result<()> {
        let streams: Vec<_> = self.config.active_streams().cloned().collect();
        for stream in streams {
            let id = stream.id;
            let mut pipeline = StreamPipeline::new(stream, &self.cancel)?;
            let parts = match self.backend.open(pipeline.config()) {
                Ok(parts) => parts,
                Err(e) => {
                    // nothing was opened for this stream, nothing to close
                    return Err(e.context(format!("failed to open stream {}", id)));
                }
            };
            if let Err(e) = pipeline.start(parts) {
                self.backend.close(pipeline.config());
                return Err(e);
            }
            self.pipelines.push(pipeline);
        }
        Ok(())
    }

    /// Stop every stream, then release the shared hardware. Idempotent.
    pub fn stop(&mut self) {
        if !self.prepared {
            return;
        }
        self.cancel.cancel();
        while let Some(mut pipeline) = self.pipelines.pop() {
            pipeline.stop();
            let live = pipeline.ledger().live();
            if live > 0 {
                log::warn!("stream {} stopped with {} live buffers", pipeline.id(), live);
            }
            self.backend.close(pipeline.config());
        }
        self.backend.shutdown();
        self.prepared = false;
        log::info!("all streams stopped");
    }
}

impl Drop for PipelineSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
