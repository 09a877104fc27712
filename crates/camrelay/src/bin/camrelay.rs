//! Camrelay
//!
//! Dashboard backend for a PTZ IP camera.
//!
//! - `POST /api/proxy` turns dashboard commands into ISAPI continuous moves
//! - `GET /api/video` and `GET /api/thermal` relay live MJPEG from ffmpeg

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use argh::FromArgs;
use camrelay::{run_http_server, AppState, Config};
use tokio::sync::watch;

#[derive(FromArgs)]
/// Camrelay - PTZ command proxy and MJPEG relay for IP cameras
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// address to listen on (overrides config and CAMRELAY_LISTEN)
    #[argh(option, short = 'l')]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args: Args = argh::from_env();

    log::info!("Starting camrelay...");

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = args.listen {
        config.listen = listen;
        config.validate()?;
    }
    let addr = config.listen_addr()?;

    log::info!("PTZ endpoint: {}", config.camera.ptz_url);
    for (name, source) in &config.streams {
        log::info!("  - stream {}: {}", name, source.redacted_url());
    }
    if config.streams.is_empty() {
        log::warn!("No video streams configured");
    }

    let state = AppState::new(Arc::new(config)).context("failed to build camera client")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    ctrlc::set_handler({
        let shutdown_tx = shutdown_tx.clone();
        move || {
            log::info!("Received Ctrl+C, shutting down gracefully...");
            shutdown_tx.send(()).ok();
        }
    })?;

    log::info!("Camrelay running. Press Ctrl+C to exit.");

    run_http_server(state, addr, shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    log::info!("Camrelay stopped.");

    Ok(())
}
