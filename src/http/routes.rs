//! Axum router configuration.
//!
//! CORS/TraceLayer construction and the health/version/debug endpoints are
//! carried over from the teacher's `http/routes.rs`; the dynamic
//! catch-all dispatch is replaced with explicit routes matching the
//! spec's exact endpoint list (§4.6).

use axum::{
    http::{header, Method},
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{
    cache_stats, direct_audio, direct_video, health_check, hls_master, hls_qualities, hls_segment, hls_variant,
    purge_media_cache, subtitles, trickplay_metadata, trickplay_sprite, version_check,
};

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS, Method::HEAD])
        .allow_headers([header::ACCEPT, header::RANGE, header::CONTENT_TYPE, header::ORIGIN, header::AUTHORIZATION])
        .allow_private_network(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/debug/cache", get(cache_stats))
        .route("/video/{id}", get(direct_video))
        .route("/audio/{id}", get(direct_audio))
        .route("/subtitles/{id}", get(subtitles))
        .route("/trickplay/{id}", get(trickplay_metadata))
        .route("/trickplay/{id}/{width}/{index}", get(trickplay_sprite))
        .route("/hls/{id}/master.m3u8", get(hls_master))
        .route("/hls/{id}/qualities", get(hls_qualities))
        .route("/hls/{id}/{quality}.m3u8", get(hls_variant))
        .route("/hls/{id}/{quality}/{segment}", get(hls_segment))
        .route("/cache/{id}", delete(purge_media_cache))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn router_builds_with_default_state() {
        let state = Arc::new(AppState::build(ServerConfig::default()).await);
        let _router = create_router(state);
    }

    /// CORS pre-flight OPTIONS request, grounded on the teacher's own
    /// `test_cors_options` (`http/routes.rs`): a `tower::util::ServiceExt::oneshot`
    /// call through the router without binding a real socket.
    #[tokio::test]
    async fn cors_preflight_allows_range_header() {
        use axum::body::Body;
        use axum::http::{header, Method, Request, StatusCode};
        use tower::util::ServiceExt;

        let state = Arc::new(AppState::build(ServerConfig::default()).await);
        let app = create_router(state);

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/hls/movie/master.m3u8")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "range")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
