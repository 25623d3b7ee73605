//! Streaming HTTP handlers (Component F, §4.6).
//!
//! Handler signature and error-mapping style grounded on
//! `hls-vod-server`'s `http/handlers.rs` (`Result<Response, HttpError>`
//! returns, manual `HeaderMap` construction, cache-then-generate-then-serve
//! flow); `/debug/cache`, `/health`, `/version` carried over from the
//! teacher's `http/routes.rs` debug surface.

use axum::body::Body;
use axum::extract::{Path as AxPath, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{GenerationContext, SegmentKey};
use crate::catalogue::{MediaHandle, Principal};
use crate::error::{HlsError, Result};
use crate::playlist;
use crate::state::AppState;
use crate::tier::Tier;

fn bearer_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    query.get("token").cloned()
}

async fn authorize(state: &AppState, headers: &HeaderMap, query: &HashMap<String, String>) -> Result<Principal> {
    let token = bearer_token(headers, query).ok_or(HlsError::Unauthorised)?;
    state.catalogue.verify_bearer(&token).await
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

pub async fn health_check() -> impl IntoResponse {
    "OK"
}

pub async fn version_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "encoder": format!("{:?}", state.encoder_registry.active(&state.settings.get().await.unwrap_or_default())),
    }))
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.segment_cache.stats().await;
    axum::Json(serde_json::json!({
        "totalBytes": stats.total_bytes,
        "mediaCount": stats.media_count,
        "segmentCount": stats.segment_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AudioTrackQuery {
    #[serde(rename = "audioTrack")]
    pub audio_track: Option<String>,
    pub token: Option<String>,
}

fn audio_tag(q: &AudioTrackQuery) -> String {
    q.audio_track.clone().unwrap_or_else(|| "default".to_string())
}

fn audio_stream_index(tag: &str) -> Option<i64> {
    if tag == "default" {
        None
    } else {
        tag.parse().ok()
    }
}

// ---- HLS master / variant / segment / qualities ----

pub async fn hls_master(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Query(q): Query<AudioTrackQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let query_map = HashMap::from_iter(q.token.iter().map(|t| ("token".to_string(), t.clone())));
    authorize(&state, &headers, &query_map).await?;

    let media = state.catalogue.get_video(&id).await?;
    let settings = state.settings.get().await?;
    let body = playlist::generate_master_playlist(&media, &audio_tag(&q), &settings);
    Ok(playlist_response(body))
}

pub async fn hls_variant(
    State(state): State<Arc<AppState>>,
    AxPath((id, quality)): AxPath<(String, String)>,
    Query(q): Query<AudioTrackQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let query_map = HashMap::from_iter(q.token.iter().map(|t| ("token".to_string(), t.clone())));
    authorize(&state, &headers, &query_map).await?;

    let tier = Tier::parse(&quality).ok_or_else(|| HlsError::InvalidQuality(format!("unknown quality '{quality}'")))?;
    let media = state.catalogue.get_video(&id).await?;
    let settings = state.settings.get().await?;
    let body = playlist::generate_variant_playlist(&media, &audio_tag(&q), tier, settings.segment_duration_sec);
    Ok(playlist_response(body))
}

pub async fn hls_qualities(State(state): State<Arc<AppState>>) -> Result<Response> {
    let settings = state.settings.get().await?;
    Ok(axum::Json(playlist::list_qualities(&settings)).into_response())
}

pub async fn hls_segment(
    State(state): State<Arc<AppState>>,
    AxPath((id, quality, segment)): AxPath<(String, String, String)>,
    Query(q): Query<AudioTrackQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let query_map = HashMap::from_iter(q.token.iter().map(|t| ("token".to_string(), t.clone())));
    authorize(&state, &headers, &query_map).await?;

    let tier = Tier::parse(&quality).ok_or_else(|| HlsError::InvalidQuality(format!("unknown quality '{quality}'")))?;
    let index: u64 = segment
        .strip_suffix(".ts")
        .unwrap_or(&segment)
        .parse()
        .map_err(|_| HlsError::InvalidIndex(format!("invalid segment index '{segment}'")))?;

    let media = state.catalogue.get_video(&id).await?;
    let tag = audio_tag(&q);
    let key = SegmentKey {
        media_id: id.clone(),
        audio_track_tag: tag.clone(),
        tier,
        index,
    };
    let ctx = GenerationContext {
        source_path: &media.path,
        duration_secs: media.duration_secs,
        audio_stream_index: audio_stream_index(&tag),
    };

    let path = state.segment_cache.get_or_generate(&key, ctx).await?;
    let bytes = tokio::fs::read(&path).await?;
    let mut response = bytes.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp2t"));
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
    Ok(response)
}

fn playlist_response(body: String) -> Response {
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/vnd.apple.mpegurl"));
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

// ---- Direct video / audio ----

#[derive(Debug, Deserialize)]
pub struct DirectVideoQuery {
    pub start: Option<u64>,
    #[serde(rename = "audioTrack")]
    pub audio_track: Option<String>,
    pub token: Option<String>,
}

pub async fn direct_video(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Query(q): Query<DirectVideoQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let query_map = HashMap::from_iter(q.token.iter().map(|t| ("token".to_string(), t.clone())));
    authorize(&state, &headers, &query_map).await?;

    let media = state.catalogue.get_video(&id).await?;

    if media.supports_stream_copy() && q.audio_track.is_none() {
        return serve_range(&media, &headers).await;
    }

    live_remux(&media, q.start, q.audio_track.as_deref()).await
}

pub async fn direct_audio(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
    Query(q): Query<DirectVideoQuery>,
) -> Result<Response> {
    let query_map = HashMap::from_iter(q.token.iter().map(|t| ("token".to_string(), t.clone())));
    authorize(&state, &headers, &query_map).await?;
    let audio = state.catalogue.get_audio(&id).await?;
    let media = MediaHandle {
        id: audio.id,
        path: audio.path,
        duration_secs: 0,
        thumbs_root: None,
    };
    serve_range(&media, &headers).await
}

async fn serve_range(media: &MediaHandle, headers: &HeaderMap) -> Result<Response> {
    let meta = tokio::fs::metadata(&media.path)
        .await
        .map_err(|_| HlsError::MediaNotFound(media.id.clone()))?;
    let total_len = meta.len();
    let content_type = content_type_for_extension(&media.container_hint());

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let (start, end) = match range.and_then(parse_range) {
        Some((s, e)) => (s, e.unwrap_or(total_len.saturating_sub(1)).min(total_len.saturating_sub(1))),
        None => (0, total_len.saturating_sub(1)),
    };

    use tokio::io::{AsyncReadExt, AsyncSeekExt};
    let mut file = tokio::fs::File::open(&media.path).await?;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let len = (end + 1).saturating_sub(start);
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;

    let mut response = if range.is_some() {
        let mut r = buf.into_response();
        *r.status_mut() = StatusCode::PARTIAL_CONTENT;
        r.headers_mut().insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{total_len}")).unwrap(),
        );
        r
    } else {
        buf.into_response()
    };
    response.headers_mut().insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
    Ok(response)
}

fn parse_range(header_value: &str) -> Option<(u64, Option<u64>)> {
    let spec = header_value.strip_prefix("bytes=")?;
    let mut parts = spec.splitn(2, '-');
    let start: u64 = parts.next()?.parse().ok()?;
    let end = parts.next().filter(|s| !s.is_empty()).and_then(|s| s.parse().ok());
    Some((start, end))
}

async fn live_remux(media: &MediaHandle, start: Option<u64>, audio_track: Option<&str>) -> Result<Response> {
    let mut args: Vec<String> = Vec::new();
    if let Some(s) = start {
        args.push("-ss".into());
        args.push(s.to_string());
    }
    args.push("-i".into());
    args.push(media.path.display().to_string());

    let audio_stream_index = audio_track.and_then(|t| if t == "default" { None } else { t.parse().ok() });

    args.push("-map".into());
    args.push("0:v:0".into());
    match audio_stream_index {
        Some(idx) => {
            args.push("-map".into());
            args.push(format!("0:{idx}"));
        }
        None => {
            args.push("-map".into());
            args.push("0:a:0".into());
        }
    }

    if media.supports_stream_copy() {
        args.push("-c:v".into());
        args.push("copy".into());
        args.push("-c:a".into());
        args.push("copy".into());
    } else {
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("ultrafast".into());
        args.push("-tune".into());
        args.push("zerolatency".into());
        args.push("-c:a".into());
        args.push("aac".into());
    }

    args.push("-avoid_negative_ts".into());
    args.push("make_zero".into());
    args.push("-movflags".into());
    args.push("frag_keyframe+empty_moov+faststart".into());
    args.push("-f".into());
    args.push("mp4".into());
    args.push("-".into());

    let (guard, stream) = crate::transcode::Transcoder::new().spawn_streaming(&args)?;
    let body = Body::from_stream(GuardedStream { _guard: guard, inner: stream });
    let mut response = body.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    Ok(response)
}

/// Wraps the piped ffmpeg byte stream together with its owning
/// [`crate::transcode::ChildGuard`] so the child process is killed the
/// moment the response body is dropped (client disconnect, §4.6).
struct GuardedStream {
    _guard: crate::transcode::ChildGuard,
    inner: std::pin::Pin<Box<dyn futures::Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
}

impl futures::Stream for GuardedStream {
    type Item = std::io::Result<bytes::Bytes>;
    fn poll_next(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

// ---- Subtitles ----

#[derive(Debug, Deserialize)]
pub struct SubtitleQuery {
    #[serde(rename = "streamIndex")]
    pub stream_index: Option<i64>,
    pub token: Option<String>,
}

pub async fn subtitles(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Query(q): Query<SubtitleQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let query_map = HashMap::from_iter(q.token.iter().map(|t| ("token".to_string(), t.clone())));
    authorize(&state, &headers, &query_map).await?;

    let stream_index = q.stream_index.ok_or(HlsError::MissingParameter("streamIndex"))?;
    let media = state.catalogue.get_video(&id).await?;

    let probe = state.prober.probe(&media.path).await;
    let is_subtitle_stream = probe
        .streams
        .iter()
        .any(|s| s.stream_index == stream_index && s.kind == crate::probe::StreamKind::Subtitle);
    if !is_subtitle_stream {
        return Err(HlsError::SubtitleStreamNotFound(format!("{id}:{stream_index}")));
    }

    let args = vec![
        "-i".to_string(),
        media.path.display().to_string(),
        "-map".to_string(),
        format!("0:{stream_index}"),
        "-c:s".to_string(),
        "webvtt".to_string(),
        "-f".to_string(),
        "webvtt".to_string(),
        "-".to_string(),
    ];

    let (guard, stream) = crate::transcode::Transcoder::new().spawn_streaming(&args)?;
    let body = Body::from_stream(GuardedStream { _guard: guard, inner: stream });
    let mut response = body.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/vtt"));
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
    Ok(response)
}

// ---- Trickplay ----

fn resolution_regex() -> Regex {
    Regex::new(r"^(\d+)\s*-\s*(\d+)x(\d+)$").unwrap()
}

pub async fn trickplay_metadata(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response> {
    authorize(&state, &headers, &q).await?;
    let media = state.catalogue.get_video(&id).await?;
    let Some(thumbs_root) = media.thumbs_root else {
        return Err(HlsError::TrickplayNotFound(id));
    };
    let re = resolution_regex();
    let mut resolutions = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&thumbs_root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(caps) = re.captures(name) else { continue };
            let width: u32 = caps[1].parse().unwrap_or(0);
            let cols: u32 = caps[2].parse().unwrap_or(0);
            let rows: u32 = caps[3].parse().unwrap_or(0);
            let dir = entry.path();
            let count = std::fs::read_dir(&dir)
                .map(|d| d.flatten().filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jpg")).count())
                .unwrap_or(0);
            let (tile_width, tile_height) = sprite_tile_dimensions(&dir, cols, rows).unwrap_or_else(|| (width, width * 9 / 16));
            resolutions.push(serde_json::json!({
                "width": tile_width,
                "height": tile_height,
                "cols": cols,
                "rows": rows,
                "count": count,
                "intervalSecs": 10,
            }));
        }
    }
    Ok(axum::Json(serde_json::json!({ "resolutions": resolutions })).into_response())
}

/// Inspects the first sprite sheet in `dir` and divides its real pixel
/// dimensions by the grid layout to get a single tile's width/height.
/// Returns `None` if the directory has no readable sprite or the image
/// header can't be decoded, so the caller falls back to a 16:9 assumption.
fn sprite_tile_dimensions(dir: &std::path::Path, cols: u32, rows: u32) -> Option<(u32, u32)> {
    if cols == 0 || rows == 0 {
        return None;
    }
    let first = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jpg"))
        .map(|e| e.path())
        .min()?;
    let (sheet_width, sheet_height) = image::image_dimensions(&first).ok()?;
    Some((sheet_width / cols, sheet_height / rows))
}

pub async fn trickplay_sprite(
    State(state): State<Arc<AppState>>,
    AxPath((id, width, index)): AxPath<(String, String, String)>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response> {
    authorize(&state, &headers, &q).await?;
    let media = state.catalogue.get_video(&id).await?;
    let Some(thumbs_root) = media.thumbs_root else {
        return Err(HlsError::TrickplayNotFound(id));
    };

    let re = resolution_regex();
    let mut resolution_dir = None;
    if let Ok(entries) = std::fs::read_dir(&thumbs_root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = re.captures(name) {
                if &caps[1] == width {
                    resolution_dir = Some(entry.path());
                    break;
                }
            }
        }
    }
    let dir = resolution_dir.ok_or_else(|| HlsError::TrickplayNotFound(format!("{id}/{width}")))?;
    let sprite_path = dir.join(format!("{index}.jpg"));
    let bytes = tokio::fs::read(&sprite_path)
        .await
        .map_err(|_| HlsError::TrickplayNotFound(format!("{id}/{width}/{index}")))?;

    let mut response = bytes.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));
    Ok(response)
}

// ---- Cache invalidation ----

/// Purges a media item's cached segments (the `InvalidateMediaCache(mediaId)`
/// contract, §6). A catalogue-backed deployment would call this from its own
/// deletion/rescan hook; bundled standalone, it's exposed directly so an
/// operator (or the catalogue process) can trigger it over HTTP.
pub async fn purge_media_cache(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Response> {
    authorize(&state, &headers, &q).await?;
    state.segment_cache.purge_media(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_handles_open_and_closed_ranges() {
        assert_eq!(parse_range("bytes=0-499"), Some((0, Some(499))));
        assert_eq!(parse_range("bytes=500-"), Some((500, None)));
        assert_eq!(parse_range("not-a-range"), None);
    }

    #[test]
    fn content_type_maps_known_extensions() {
        assert_eq!(content_type_for_extension("mp4"), "video/mp4");
        assert_eq!(content_type_for_extension("mp3"), "audio/mpeg");
        assert_eq!(content_type_for_extension("xyz"), "application/octet-stream");
    }

    #[test]
    fn resolution_regex_matches_spec_format() {
        let re = resolution_regex();
        let caps = re.captures("320 - 10x10").unwrap();
        assert_eq!(&caps[1], "320");
        assert_eq!(&caps[2], "10");
        assert_eq!(&caps[3], "10");
        assert!(re.captures("not-a-resolution").is_none());
    }
}
