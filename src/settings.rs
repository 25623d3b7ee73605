//! Transcoding tuning knobs (spec §3) and the 30-second settings cache
//! fronting the catalogue's settings accessor (Component G, §4.7).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::catalogue::Catalogue;
use crate::error::Result;

const SETTINGS_TTL: Duration = Duration::from_secs(30);

/// Mutable tuning knobs consumed by the encoder registry and segment cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodingSettings {
    pub bitrate_1080p: u32,
    pub bitrate_720p: u32,
    pub bitrate_480p: u32,
    pub bitrate_360p: u32,
    pub segment_duration_sec: u64,
    pub prefetch_segments: u32,
    pub enable_hardware_accel: bool,
    pub preset: String,
    pub enable_low_latency: bool,
    pub thread_count: u32,
}

impl Default for TranscodingSettings {
    fn default() -> Self {
        Self {
            bitrate_1080p: 8000,
            bitrate_720p: 5000,
            bitrate_480p: 2500,
            bitrate_360p: 1000,
            segment_duration_sec: 6,
            prefetch_segments: 2,
            enable_hardware_accel: true,
            preset: "veryfast".to_string(),
            enable_low_latency: false,
            thread_count: 0,
        }
    }
}

struct CachedSettings {
    value: TranscodingSettings,
    fetched_at: Instant,
}

/// Single-entry, TTL-bounded cache in front of `Catalogue::get_transcoding_settings`.
///
/// A reader within the TTL window gets the cached value with no catalogue
/// round-trip; the first reader after expiry refreshes it. Staleness of up
/// to 30 seconds is accepted (§4.7).
pub struct SettingsCache {
    catalogue: Arc<dyn Catalogue>,
    cached: Mutex<Option<CachedSettings>>,
}

impl SettingsCache {
    pub fn new(catalogue: Arc<dyn Catalogue>) -> Self {
        Self {
            catalogue,
            cached: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<TranscodingSettings> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < SETTINGS_TTL {
                return Ok(cached.value.clone());
            }
        }
        let fresh = self.catalogue.get_transcoding_settings().await?;
        *guard = Some(CachedSettings {
            value: fresh.clone(),
            fetched_at: Instant::now(),
        });
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{AudioHandle, MediaHandle, Principal};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCatalogue {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Catalogue for CountingCatalogue {
        async fn get_video(&self, _media_id: &str) -> Result<MediaHandle> {
            unimplemented!()
        }
        async fn get_audio(&self, _media_id: &str) -> Result<AudioHandle> {
            unimplemented!()
        }
        async fn get_transcoding_settings(&self) -> Result<TranscodingSettings> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TranscodingSettings::default())
        }
        async fn verify_bearer(&self, token: &str) -> Result<Principal> {
            Ok(Principal {
                token: token.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn repeated_reads_within_ttl_hit_cache_once() {
        let catalogue = Arc::new(CountingCatalogue {
            calls: AtomicUsize::new(0),
        });
        let cache = SettingsCache::new(catalogue.clone());
        for _ in 0..5 {
            cache.get().await.unwrap();
        }
        assert_eq!(catalogue.calls.load(Ordering::SeqCst), 1);
    }
}
