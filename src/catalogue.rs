//! The external "catalogue" collaborator (spec §6).
//!
//! Persistent libraries, metadata, users and scanning live outside this
//! crate's scope. What the pipeline actually needs is a narrow contract:
//! resolve a media id to a path and duration, fetch tuning settings, and
//! check a bearer token. [`Catalogue`] is that contract; [`FsCatalogue`] is
//! the bundled filesystem-backed implementation that makes the binary
//! runnable standalone. A real deployment swaps in a catalogue service that
//! implements the same trait.
//!
//! Grounded on the `MediaItem` async-trait collaborator pattern
//! (jueewo media-core `traits.rs`), generalised from a media-rendering
//! interface to a media-resolution interface.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{HlsError, Result};
use crate::probe::Prober;
use crate::settings::TranscodingSettings;

/// A resolved video (or generic) media item: id, absolute source path,
/// duration in whole seconds, and an optional trickplay sprite root.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    pub id: String,
    pub path: PathBuf,
    pub duration_secs: u64,
    pub thumbs_root: Option<PathBuf>,
}

impl MediaHandle {
    /// Lower-cased file extension, used to decide Original-tier eligibility
    /// and direct-stream content type.
    pub fn container_hint(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    pub fn supports_stream_copy(&self) -> bool {
        matches!(self.container_hint().as_str(), "mp4" | "webm")
    }
}

/// A resolved audio-only media item.
#[derive(Debug, Clone)]
pub struct AudioHandle {
    pub id: String,
    pub path: PathBuf,
}

/// An authenticated caller. Validation itself is delegated (§1 Non-goals);
/// this crate treats any non-empty bearer token as valid and wraps it here
/// so handlers have a typed principal to require.
#[derive(Debug, Clone)]
pub struct Principal {
    pub token: String,
}

/// Narrow interface the segment cache and HTTP layer depend on instead of a
/// concrete catalogue store (spec §6).
#[async_trait]
pub trait Catalogue: Send + Sync {
    async fn get_video(&self, media_id: &str) -> Result<MediaHandle>;
    async fn get_audio(&self, media_id: &str) -> Result<AudioHandle>;
    async fn get_transcoding_settings(&self) -> Result<TranscodingSettings>;
    async fn verify_bearer(&self, token: &str) -> Result<Principal>;
}

/// Filesystem-backed default implementation. Media ids are file stems under
/// `media.root`; durations are probed lazily and cached in-process because
/// real scanning is out of scope (§1).
pub struct FsCatalogue {
    root: PathBuf,
    thumbs_root: Option<PathBuf>,
    prober: Arc<Prober>,
    duration_cache: DashMap<String, u64>,
    settings: parking_lot::RwLock<TranscodingSettings>,
}

impl FsCatalogue {
    pub fn new(root: PathBuf, thumbs_root: Option<PathBuf>, prober: Arc<Prober>) -> Self {
        Self {
            root,
            thumbs_root,
            prober,
            duration_cache: DashMap::new(),
            settings: parking_lot::RwLock::new(TranscodingSettings::default()),
        }
    }

    /// Replace the settings this catalogue hands out. Exposed for tests and
    /// for a future admin endpoint; production deployments would instead
    /// back `get_transcoding_settings` with a real store.
    pub fn set_transcoding_settings(&self, settings: TranscodingSettings) {
        *self.settings.write() = settings;
    }

    fn resolve_path(&self, media_id: &str) -> Option<PathBuf> {
        let dir = std::fs::read_dir(&self.root).ok()?;
        for entry in dir.flatten() {
            let path = entry.path();
            if path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(media_id) {
                return Some(path);
            }
        }
        None
    }

    fn media_thumbs_root(&self, media_id: &str) -> Option<PathBuf> {
        self.thumbs_root.as_ref().map(|root| root.join(media_id))
    }

    async fn duration_of(&self, path: &Path, media_id: &str) -> u64 {
        if let Some(d) = self.duration_cache.get(media_id) {
            return *d;
        }
        let probe = self.prober.probe(path).await;
        let secs = probe.duration_secs;
        self.duration_cache.insert(media_id.to_string(), secs);
        secs
    }
}

#[async_trait]
impl Catalogue for FsCatalogue {
    async fn get_video(&self, media_id: &str) -> Result<MediaHandle> {
        let path = self
            .resolve_path(media_id)
            .ok_or_else(|| HlsError::MediaNotFound(media_id.to_string()))?;
        let duration_secs = self.duration_of(&path, media_id).await;
        Ok(MediaHandle {
            id: media_id.to_string(),
            path,
            duration_secs,
            thumbs_root: self.media_thumbs_root(media_id),
        })
    }

    async fn get_audio(&self, media_id: &str) -> Result<AudioHandle> {
        let path = self
            .resolve_path(media_id)
            .ok_or_else(|| HlsError::MediaNotFound(media_id.to_string()))?;
        Ok(AudioHandle {
            id: media_id.to_string(),
            path,
        })
    }

    async fn get_transcoding_settings(&self) -> Result<TranscodingSettings> {
        Ok(self.settings.read().clone())
    }

    async fn verify_bearer(&self, token: &str) -> Result<Principal> {
        if token.trim().is_empty() {
            return Err(HlsError::Unauthorised);
        }
        Ok(Principal {
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Prober;

    fn catalogue(dir: &Path) -> FsCatalogue {
        FsCatalogue::new(dir.to_path_buf(), None, Arc::new(Prober::new()))
    }

    #[tokio::test]
    async fn resolves_media_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("movie.mp4"), b"not really mp4").unwrap();
        let cat = catalogue(dir.path());
        let handle = cat.get_video("movie").await.unwrap();
        assert_eq!(handle.container_hint(), "mp4");
        assert!(handle.supports_stream_copy());
    }

    #[tokio::test]
    async fn missing_media_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cat = catalogue(dir.path());
        let err = cat.get_video("nope").await.unwrap_err();
        assert!(matches!(err, HlsError::MediaNotFound(_)));
    }

    #[tokio::test]
    async fn empty_token_is_unauthorised() {
        let dir = tempfile::tempdir().unwrap();
        let cat = catalogue(dir.path());
        assert!(cat.verify_bearer("").await.is_err());
        assert!(cat.verify_bearer("   ").await.is_err());
        assert!(cat.verify_bearer("abc").await.is_ok());
    }
}
