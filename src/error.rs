//! Error taxonomy (spec §7) and its mapping onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Main error type for the HLS pipeline.
///
/// Variants map onto the four-kind taxonomy from the design: `NotFound`,
/// `Invalid`, `Unauthorised`, `GenerationFailed`. `Io`/`Ffmpeg` are internal
/// detail carried for logging only — their `Display` text must never reach
/// a client response body.
#[derive(Error, Debug)]
pub enum HlsError {
    #[error("media not found: {0}")]
    MediaNotFound(String),

    #[error("segment not found: media={media_id} tier={tier} index={index}")]
    SegmentNotFound {
        media_id: String,
        tier: String,
        index: u64,
    },

    #[error("subtitle stream not found: {0}")]
    SubtitleStreamNotFound(String),

    #[error("trickplay resource not found: {0}")]
    TrickplayNotFound(String),

    #[error("invalid quality: {0}")]
    InvalidQuality(String),

    #[error("invalid segment index: {0}")]
    InvalidIndex(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("unauthorised")]
    Unauthorised,

    #[error("segment generation failed: {0}")]
    GenerationFailed(String),

    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Transcoder/probe process failures, nested under [`HlsError::Ffmpeg`].
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} exited with status {status}: {stderr}")]
    NonZeroExit {
        binary: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("{binary} timed out after {secs}s")]
    Timeout { binary: &'static str, secs: u64 },

    #[error("failed to parse probe output: {0}")]
    ProbeParse(String),

    #[error("no usable encoder found")]
    NoEncoder,
}

pub type Result<T> = std::result::Result<T, HlsError>;

impl HlsError {
    fn status(&self) -> StatusCode {
        match self {
            HlsError::MediaNotFound(_)
            | HlsError::SegmentNotFound { .. }
            | HlsError::SubtitleStreamNotFound(_)
            | HlsError::TrickplayNotFound(_) => StatusCode::NOT_FOUND,
            HlsError::InvalidQuality(_) | HlsError::InvalidIndex(_) | HlsError::MissingParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            HlsError::Unauthorised => StatusCode::UNAUTHORIZED,
            HlsError::GenerationFailed(_) | HlsError::Ffmpeg(_) | HlsError::Io(_) | HlsError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to a client. Internal variants are collapsed
    /// to a generic label; stderr and io::Error text are logged, not served.
    fn public_message(&self) -> String {
        match self {
            HlsError::MediaNotFound(_) => "media not found".to_string(),
            HlsError::SegmentNotFound { .. } => "segment not found".to_string(),
            HlsError::SubtitleStreamNotFound(_) => "subtitle stream not found".to_string(),
            HlsError::TrickplayNotFound(_) => "trickplay resource not found".to_string(),
            HlsError::InvalidQuality(m) | HlsError::InvalidIndex(m) => m.clone(),
            HlsError::MissingParameter(p) => format!("missing required parameter: {p}"),
            HlsError::Unauthorised => "unauthorised".to_string(),
            HlsError::GenerationFailed(_) | HlsError::Ffmpeg(_) | HlsError::Io(_) | HlsError::Config(_) => {
                "internal error".to_string()
            }
        }
    }
}

impl IntoResponse for HlsError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        let status = self.status();
        let body = json!({ "error": self.public_message() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = HlsError::MediaNotFound("abc".into());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn generation_failure_hides_internals() {
        let err = HlsError::GenerationFailed("ffmpeg stderr leak".into());
        assert_eq!(err.public_message(), "internal error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_quality_is_400_and_keeps_message() {
        let err = HlsError::InvalidQuality("unknown tier 'xyz'".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "unknown tier 'xyz'");
    }
}
