use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use frame_bus::{StreamProbe, StreamSnapshot};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ApiState {
    probes: Arc<Vec<StreamProbe>>,
}

impl ApiState {
    pub fn new(probes: Vec<StreamProbe>) -> Self {
        Self {
            probes: Arc::new(probes),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/streams", get(list_streams))
        .route("/streams/{id}", get(get_stream))
        .with_state(state)
}

pub(crate) async fn start_api_server(
    addr: SocketAddr,
    state: ApiState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
    log::info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server error: {}", e);
        }
    });
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("shutting down API server");
}

async fn index() -> &'static str {
    "ipc-streamer"
}

async fn list_streams(State(state): State<ApiState>) -> Json<Vec<StreamSnapshot>> {
    Json(state.probes.iter().map(|p| p.snapshot()).collect())
}

async fn get_stream(
    State(state): State<ApiState>,
    Path(id): Path<u32>,
) -> Result<Json<StreamSnapshot>, (StatusCode, String)> {
    state
        .probes
        .iter()
        .find(|p| p.id() == id)
        .map(|p| Json(p.snapshot()))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("stream {} not found", id)))
}

#[cfg(test)]
mod tests {
    use frame_bus::{PipelineState, StreamConfig, StreamPipeline};

    use super::*;

    fn pipeline(id: u32) -> StreamPipeline {
        let cfg = StreamConfig {
            id,
            name: format!("cam{}", id),
            ..StreamConfig::main()
        };
        StreamPipeline::new(cfg, &CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn test_list_and_get_streams() {
        let pipelines = [pipeline(0), pipeline(1)];
        let state = ApiState::new(pipelines.iter().map(|p| p.probe()).collect());

        let Json(all) = list_streams(State(state.clone())).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].name, "cam1");
        assert_eq!(all[0].state, PipelineState::Created);
        assert_eq!(all[0].encoded_capacity, 16);

        let Json(one) = get_stream(State(state.clone()), Path(1)).await.unwrap();
        assert_eq!(one.id, 1);

        let (status, _) = get_stream(State(state), Path(7)).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let p = pipeline(0);
        let Json(all) = list_streams(State(ApiState::new(vec![p.probe()]))).await;
        let value = serde_json::to_value(&all).unwrap();
        assert_eq!(value[0]["state"], "Created");
        assert_eq!(value[0]["raw_queued"], serde_json::Value::Null);
        assert_eq!(value[0]["live_buffers"], 0);
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        start_api_server(addr, ApiState::new(Vec::new()), cancel.clone())
            .await
            .unwrap();
        cancel.cancel();
        assert_eq!(index().await, "ipc-streamer");
    }
}
