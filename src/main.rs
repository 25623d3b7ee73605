//! Personal media server HLS streaming pipeline.
//!
//! On-demand segment generation, encoder detection, adaptive playlists,
//! range-addressable direct streaming, subtitle extraction, and trickplay
//! sprites, fronted by a minimal filesystem-backed catalogue so the binary
//! runs standalone.

mod cache;
mod catalogue;
mod cleanup;
mod config;
mod encoder;
mod error;
mod http;
mod playlist;
mod probe;
mod settings;
mod state;
mod tier;
mod transcode;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::create_router;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "hls-server";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load().unwrap_or_else(|e| {
        eprintln!("failed to load configuration: {e}, using defaults");
        ServerConfig::default()
    });

    init_logging(&config.logging.level);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!(?config, "configuration loaded");

    let state = Arc::new(AppState::build(config.clone()).await);
    state.cleanup.clone().start();

    let app = create_router(state.clone());

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| crate::error::HlsError::Config(format!("invalid bind address: {e}")))?;
    tracing::info!("starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(default_level: &str) {
    let filter_str = format!("hls_server={default_level},tower_http={default_level}");
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_str.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    /// Binds the real router to a loopback socket and drives it with an
    /// actual HTTP client, exercising auth, 404 mapping, and the debug
    /// surface end to end rather than just unit-testing handlers in
    /// isolation. Does not require `ffmpeg`/`ffprobe` on PATH: the media id
    /// used here is never found, so no process is spawned.
    #[tokio::test]
    async fn http_surface_smoke_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.media.root = dir.path().to_path_buf();
        config.hls_cache.path = dir.path().join("cache");

        let state = Arc::new(AppState::build(config).await);
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();

        let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
        assert_eq!(health.status(), 200);

        let unauthorised = client
            .get(format!("http://{addr}/hls/movie/master.m3u8"))
            .send()
            .await
            .unwrap();
        assert_eq!(unauthorised.status(), 401);

        let missing = client
            .get(format!("http://{addr}/hls/nope/master.m3u8?token=abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let bad_quality = client
            .get(format!("http://{addr}/hls/nope/4k.m3u8?token=abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_quality.status(), 400);

        let stats = client.get(format!("http://{addr}/debug/cache")).send().await.unwrap();
        assert_eq!(stats.status(), 200);
        let body: serde_json::Value = stats.json().await.unwrap();
        assert_eq!(body["totalBytes"], 0);
    }
}
