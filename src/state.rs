//! `AppState`: the long-lived service value every handler shares (§9's
//! translation of the source's implicit process-wide globals into explicit
//! dependency injection). Grounded on the teacher's `state.rs` `AppState`
//! struct (itself a `DashMap`-backed registry of `ffmpeg_next`-typed
//! stream indices); every field here plays the same "process-wide
//! singleton, shared via `Arc`" role but typed around process invocation
//! instead of library bindings.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::SegmentCache;
use crate::catalogue::{Catalogue, FsCatalogue};
use crate::cleanup::CleanupSupervisor;
use crate::config::ServerConfig;
use crate::encoder::EncoderRegistry;
use crate::probe::Prober;
use crate::settings::SettingsCache;

pub struct AppState {
    pub catalogue: Arc<dyn Catalogue>,
    pub segment_cache: Arc<SegmentCache>,
    pub encoder_registry: Arc<EncoderRegistry>,
    pub settings: Arc<SettingsCache>,
    pub cleanup: Arc<CleanupSupervisor>,
    /// Shared with the catalogue's own prober so handlers (subtitle stream
    /// validation, §4.6) can probe a media item without going through the
    /// narrower `Catalogue` contract.
    pub prober: Arc<Prober>,
    pub config: ServerConfig,
}

impl AppState {
    /// Builds the full service graph from configuration. Runs encoder
    /// detection once (§4.2) so every request handler sees the same
    /// cached descriptor.
    pub async fn build(config: ServerConfig) -> Self {
        let prober = Arc::new(Prober::new());
        let catalogue: Arc<dyn Catalogue> = Arc::new(FsCatalogue::new(
            config.media.root.clone(),
            config.media.thumbs_root.clone(),
            prober.clone(),
        ));
        let settings = Arc::new(SettingsCache::new(catalogue.clone()));
        let encoder_registry = Arc::new(EncoderRegistry::detect().await);
        let segment_cache = Arc::new(SegmentCache::new(
            config.hls_cache.path.clone(),
            encoder_registry.clone(),
            settings.clone(),
        ));
        let cleanup = Arc::new(CleanupSupervisor::new(
            config.hls_cache.path.clone(),
            config.hls_cache.segment_ttl_hours,
        ));

        Self {
            catalogue,
            segment_cache,
            encoder_registry,
            settings,
            cleanup,
            prober,
            config,
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.config.hls_cache.path.clone()
    }
}
