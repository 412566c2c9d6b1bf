use std::{path::PathBuf, time::Duration};

use clap::Parser;
use frame_bus::PipelineSupervisor;
use tokio_util::sync::CancellationToken;

mod api;
mod backend;
mod config;
mod monitor;

#[derive(Parser)]
#[command(name = "ipc-streamer")]
#[command(about = "Camera capture, encode and publish pipeline")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 0: error, 1: warn, 2: info, 3: debug
    #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u8).range(0..=3))]
    log_level: u8,

    /// Override the status API address
    #[arg(long)]
    api_addr: Option<std::net::SocketAddr>,
}

fn level_filter(level: u8) -> log::LevelFilter {
    match level {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    }
}

fn init_logging(level: u8) {
    env_logger::Builder::from_default_env()
        .filter_level(level_filter(level))
        .filter_module("frame_bus", level_filter(level))
        .filter_module("hyper", log::LevelFilter::Warn)
        .init();
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            log::warn!("failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut app = match &args.config {
        Some(path) => config::AppConfig::load(path)?,
        None => config::AppConfig::default(),
    };
    if args.api_addr.is_some() {
        app.api_addr = args.api_addr;
    }

    let mut supervisor = PipelineSupervisor::new(
        app.supervisor(),
        Box::new(backend::SyntheticBackend::new()),
    );
    let mut supervisor = tokio::task::spawn_blocking(move || {
        supervisor.start().map(|_| supervisor)
    })
    .await??;

    let cancel = CancellationToken::new();
    let probes = supervisor.probes();
    if let Some(addr) = app.api_addr {
        let state = api::ApiState::new(probes.clone());
        if let Err(e) = api::start_api_server(addr, state, cancel.clone()).await {
            log::error!("{:#}", e);
        }
    }
    monitor::start_monitor(
        probes,
        Duration::from_secs(app.stats_interval_secs),
        cancel.clone(),
    );

    let pipelines = supervisor.cancel_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("SIGINT received"),
        _ = terminate() => log::info!("SIGTERM received"),
        _ = pipelines.cancelled() => log::warn!("pipelines cancelled"),
    }

    cancel.cancel();
    tokio::task::spawn_blocking(move || supervisor.stop()).await?;
    log::info!("bye");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.log_level);

    if let Err(e) = run(args).await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_flag() {
        let args = Args::parse_from(["ipc-streamer", "-l", "3", "-c", "/etc/ipc.json"]);
        assert_eq!(level_filter(args.log_level), log::LevelFilter::Debug);
        assert_eq!(args.config, Some(PathBuf::from("/etc/ipc.json")));

        let args = Args::parse_from(["ipc-streamer"]);
        assert_eq!(level_filter(args.log_level), log::LevelFilter::Info);
        assert!(Args::try_parse_from(["ipc-streamer", "-l", "4"]).is_err());
    }
}
