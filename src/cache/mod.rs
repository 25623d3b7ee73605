//! On-disk HLS segment cache (Component D, §4.4) — the core of this crate.
//!
//! Single-flights concurrent requests for the same segment key, prefetches
//! upcoming segments in a distinct in-flight namespace, touches access
//! times on read, and writes through a temp-file-then-rename so a reader
//! never observes a partial segment. Grounded on the teacher's
//! `http/cache.rs` `DashMap`-based `SegmentCache`, restructured from an
//! in-memory LRU `Bytes` cache to an on-disk, singleflight,
//! TTL(atime)-evicted cache per the design notes (§9).

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::encoder::EncoderRegistry;
use crate::error::{HlsError, Result};
use crate::settings::SettingsCache;
use crate::tier::Tier;
use crate::transcode::Transcoder;

/// Addresses one cached segment (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub media_id: String,
    pub audio_track_tag: String,
    pub tier: Tier,
    pub index: u64,
}

impl SegmentKey {
    fn rel_dir(&self) -> PathBuf {
        PathBuf::from(&self.media_id)
            .join(format!("a{}", self.audio_track_tag))
            .join(self.tier.name())
    }
}

/// Distinguishes request-driven generation from background prefetch so a
/// prefetch never blocks behind (or is blocked by) a concurrent direct
/// request for the same segment (§9 open question on prefetch keying).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Namespace {
    Request,
    Prefetch,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InflightKey {
    key: SegmentKey,
    namespace: Namespace,
}

type GenerationOutcome = Result<(), String>;

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_bytes: u64,
    pub media_count: u64,
    pub segment_count: u64,
}

/// What the caller must supply to materialise a segment: the source media's
/// path and duration, plus the audio stream to map (absolute index, or
/// `None` for "first audio stream").
pub struct GenerationContext<'a> {
    pub source_path: &'a Path,
    pub duration_secs: u64,
    pub audio_stream_index: Option<i64>,
}

pub struct SegmentCache {
    cache_root: PathBuf,
    inflight: DashMap<InflightKey, broadcast::Sender<GenerationOutcome>>,
    transcoder: Transcoder,
    encoder_registry: Arc<EncoderRegistry>,
    settings: Arc<SettingsCache>,
}

impl SegmentCache {
    pub fn new(cache_root: PathBuf, encoder_registry: Arc<EncoderRegistry>, settings: Arc<SettingsCache>) -> Self {
        Self {
            cache_root,
            inflight: DashMap::new(),
            transcoder: Transcoder::new(),
            encoder_registry,
            settings,
        }
    }

    fn abs_path(&self, key: &SegmentKey) -> PathBuf {
        self.cache_root.join(key.rel_dir()).join(format!("{}.ts", key.index))
    }

    fn tmp_path(&self, key: &SegmentKey) -> PathBuf {
        self.cache_root.join(key.rel_dir()).join(format!("{}.ts.tmp", key.index))
    }

    /// Read path (§4.4). Returns the absolute path of a materialised
    /// segment, generating it (possibly waiting on an in-flight generation)
    /// if necessary, and schedules prefetch of upcoming segments.
    ///
    /// Takes `self` via `Arc` because successful reads spawn detached
    /// prefetch tasks that must outlive the originating request (§9).
    pub async fn get_or_generate(self: &Arc<Self>, key: &SegmentKey, ctx: GenerationContext<'_>) -> Result<PathBuf> {
        let last_index = last_segment_index(ctx.duration_secs, self.segment_duration().await);
        if key.index > last_index {
            return Err(HlsError::InvalidIndex(format!(
                "segment index {} out of range (last valid index {})",
                key.index, last_index
            )));
        }

        self.ensure_fresh(key).await?;

        if !self.file_present(key).await {
            self.drive_generation(key, &ctx, Namespace::Request).await?;
            if !self.file_present(key).await {
                return Err(HlsError::GenerationFailed(format!(
                    "segment {} did not materialise after generation",
                    key.index
                )));
            }
        }

        touch(&self.abs_path(key)).await;
        self.schedule_prefetch(key, ctx, last_index).await;
        Ok(self.abs_path(key))
    }

    /// Deletes a zero-byte file left by a crashed generation, if present.
    async fn ensure_fresh(&self, key: &SegmentKey) -> Result<()> {
        let path = self.abs_path(key);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.len() == 0 {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }

    async fn file_present(&self, key: &SegmentKey) -> bool {
        match tokio::fs::metadata(self.abs_path(key)).await {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Runs or awaits generation for `key` in the given namespace,
    /// guaranteeing at-most-one concurrent transcoder invocation per
    /// `(key, namespace)` pair.
    async fn drive_generation(&self, key: &SegmentKey, ctx: &GenerationContext<'_>, namespace: Namespace) -> Result<()> {
        let inflight_key = InflightKey { key: key.clone(), namespace };

        let (is_owner, mut receiver) = {
            match self.inflight.entry(inflight_key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(e) => (false, e.get().subscribe()),
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    let (tx, rx) = broadcast::channel(1);
                    v.insert(tx);
                    (true, rx)
                }
            }
        };

        if is_owner {
            let outcome = self.generate(key, ctx).await;
            let outcome_for_broadcast = outcome.as_ref().map(|_| ()).map_err(|e| e.to_string());
            if let Some((_, sender)) = self.inflight.remove(&inflight_key) {
                let _ = sender.send(outcome_for_broadcast);
            }
            return outcome;
        }

        match receiver.recv().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => Err(HlsError::GenerationFailed(msg)),
            Err(_) => {
                // Sender dropped without a send (owner task aborted); treat
                // as a generation failure rather than hanging.
                Err(HlsError::GenerationFailed("generation task was aborted".to_string()))
            }
        }
    }

    async fn segment_duration(&self) -> u64 {
        self.settings.get().await.map(|s| s.segment_duration_sec).unwrap_or(6)
    }

    async fn generate(&self, key: &SegmentKey, ctx: &GenerationContext<'_>) -> Result<()> {
        let segment_duration = self.segment_duration().await;
        let start = key.index * segment_duration;
        if start >= ctx.duration_secs {
            return Err(HlsError::InvalidIndex(format!("segment start {start}s at/past duration {}s", ctx.duration_secs)));
        }
        let clipped_len = segment_duration.min(ctx.duration_secs - start);

        let settings = self.settings.get().await?;
        let out_dir = self.cache_root.join(key.rel_dir());
        tokio::fs::create_dir_all(&out_dir).await?;
        let tmp_path = self.tmp_path(key);
        let final_path = self.abs_path(key);

        let args = build_ffmpeg_args(
            key,
            ctx,
            start,
            clipped_len,
            segment_duration,
            &settings,
            self.encoder_registry.as_ref(),
            &tmp_path,
        );

        let gen_timeout = Duration::from_secs(5 * segment_duration + 30);
        let result = self.transcoder.run_to_completion(&args, gen_timeout).await;

        match result {
            Ok(()) => {
                tokio::fs::rename(&tmp_path, &final_path).await?;
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(e)
            }
        }
    }

    async fn schedule_prefetch(self: &Arc<Self>, key: &SegmentKey, ctx: GenerationContext<'_>, last_index: u64) {
        let prefetch_n = self.settings.get().await.map(|s| s.prefetch_segments as u64).unwrap_or(0);
        let source_path = ctx.source_path.to_path_buf();
        for k in 1..=prefetch_n {
            let idx = key.index + k;
            if idx > last_index {
                break;
            }
            let next_key = SegmentKey {
                media_id: key.media_id.clone(),
                audio_track_tag: key.audio_track_tag.clone(),
                tier: key.tier,
                index: idx,
            };
            if self.file_present(&next_key).await {
                continue;
            }
            let inflight_key = InflightKey { key: next_key.clone(), namespace: Namespace::Prefetch };
            if self.inflight.contains_key(&inflight_key) {
                continue;
            }
            let cache = Arc::clone(self);
            let next_ctx_path = source_path.clone();
            let duration_secs = ctx.duration_secs;
            let audio_stream_index = ctx.audio_stream_index;
            tokio::spawn(async move {
                let ctx = GenerationContext {
                    source_path: &next_ctx_path,
                    duration_secs,
                    audio_stream_index,
                };
                if let Err(e) = cache.drive_generation(&next_key, &ctx, Namespace::Prefetch).await {
                    tracing::warn!(media_id = %next_key.media_id, index = next_key.index, error = %e, "prefetch failed");
                }
            });
        }
    }

    /// Removes the entire on-disk subtree for `media_id` (explicit purge,
    /// §4.4), e.g. when the catalogue deletes a media item.
    pub async fn purge_media(&self, media_id: &str) -> Result<()> {
        let dir = self.cache_root.join(media_id);
        if tokio::fs::metadata(&dir).await.is_ok() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Best-effort walk of the cache root; does not hold any lock (§4.4).
    pub async fn stats(&self) -> CacheStats {
        let root = self.cache_root.clone();
        tokio::task::spawn_blocking(move || walk_stats(&root)).await.unwrap_or_default()
    }
}

fn walk_stats(root: &Path) -> CacheStats {
    let mut stats = CacheStats::default();
    let Ok(top) = std::fs::read_dir(root) else {
        return stats;
    };
    for media_dir in top.flatten() {
        if !media_dir.path().is_dir() {
            continue;
        }
        stats.media_count += 1;
        let mut stack = vec![media_dir.path()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("ts") {
                    stats.segment_count += 1;
                    if let Ok(meta) = entry.metadata() {
                        stats.total_bytes += meta.len();
                    }
                }
            }
        }
    }
    stats
}

/// Bumps `path`'s atime to now so the TTL sweep (`cleanup.rs`) sees this as
/// a live read. `relatime`-mounted volumes only refresh atime once per day
/// (or when older than mtime), so relying on an incidental read to move it
/// would miss same-day re-reads; set it explicitly instead.
async fn touch(path: &Path) {
    let path = path.to_path_buf();
    let _ = tokio::task::spawn_blocking(move || filetime::set_file_atime(&path, filetime::FileTime::now())).await;
}

pub fn last_segment_index(duration_secs: u64, segment_duration_secs: u64) -> u64 {
    if duration_secs == 0 {
        return 0;
    }
    ((duration_secs + segment_duration_secs - 1) / segment_duration_secs).saturating_sub(1)
}

#[allow(clippy::too_many_arguments)]
fn build_ffmpeg_args(
    key: &SegmentKey,
    ctx: &GenerationContext<'_>,
    start: u64,
    clipped_len: u64,
    segment_duration: u64,
    settings: &crate::settings::TranscodingSettings,
    encoders: &EncoderRegistry,
    out_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let stream_copy = matches!(key.tier, Tier::Original);

    if stream_copy {
        // Accurate seek: after -i, plus -copyts/-output_ts_offset so
        // timestamps stay globally consistent across segments (§4.4).
        args.push("-i".into());
        args.push(ctx.source_path.display().to_string());
        args.push("-ss".into());
        args.push(start.to_string());
        args.push("-copyts".into());
        args.push("-output_ts_offset".into());
        args.push(start.to_string());
    } else {
        // Fast seek: before -i.
        args.push("-ss".into());
        args.push(start.to_string());
        args.push("-i".into());
        args.push(ctx.source_path.display().to_string());
        args.push("-output_ts_offset".into());
        args.push(start.to_string());
    }

    args.push("-t".into());
    args.push(clipped_len.to_string());

    args.push("-map".into());
    args.push("0:v:0".into());
    match ctx.audio_stream_index {
        Some(idx) => {
            args.push("-map".into());
            args.push(format!("0:{idx}"));
        }
        None => {
            args.push("-map".into());
            args.push("0:a:0".into());
        }
    }

    if stream_copy {
        args.push("-c:v".into());
        args.push("copy".into());
        args.push("-c:a".into());
        args.push("copy".into());
    } else {
        let profile = key.tier.profile(settings).expect("transcoded tiers have a profile");
        let encoder = encoders.active(settings);
        args.extend(EncoderRegistry::video_args(encoder, &profile, settings));
        args.push("-c:a".into());
        args.push("aac".into());
        args.push("-b:a".into());
        args.push(format!("{}k", profile.audio_bitrate_kbps));
        args.push("-ac".into());
        args.push("2".into());
        args.push("-force_key_frames".into());
        args.push(format!("expr:gte(t,n_forced*{segment_duration})"));
    }

    args.push("-f".into());
    args.push("mpegts".into());
    args.push("-mpegts_copyts".into());
    args.push("1".into());
    args.push("-avoid_negative_ts".into());
    args.push("disabled".into());
    args.push("-y".into());
    args.push(out_path.display().to_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_advances_atime_past_a_stale_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.ts");
        std::fs::write(&path, b"data").unwrap();

        let stale = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_atime(&path, stale).unwrap();

        touch(&path).await;

        let meta = std::fs::metadata(&path).unwrap();
        let atime = filetime::FileTime::from_last_access_time(&meta);
        assert!(atime.seconds() > stale.seconds());
    }

    #[test]
    fn last_index_covers_full_and_partial_tail() {
        assert_eq!(last_segment_index(18, 6), 2);
        assert_eq!(last_segment_index(20, 6), 3);
        assert_eq!(last_segment_index(6, 6), 0);
        assert_eq!(last_segment_index(0, 6), 0);
    }

    #[test]
    fn segment_key_rel_dir_layout() {
        let key = SegmentKey {
            media_id: "m".into(),
            audio_track_tag: "default".into(),
            tier: Tier::P720,
            index: 3,
        };
        assert_eq!(key.rel_dir(), PathBuf::from("m/adefault/720p"));
    }

    #[test]
    fn stream_copy_uses_accurate_seek_after_input() {
        let settings = crate::settings::TranscodingSettings::default();
        let key = SegmentKey {
            media_id: "m".into(),
            audio_track_tag: "default".into(),
            tier: Tier::Original,
            index: 1,
        };
        let ctx = GenerationContext {
            source_path: Path::new("/src/movie.mp4"),
            duration_secs: 20,
            audio_stream_index: None,
        };
        // We can't easily build an EncoderRegistry without async detect();
        // use a dummy struct via transmute-free path: copy branch never
        // touches the registry, so constructing an unused reference is
        // unnecessary — build args directly through the copy branch by
        // calling the private function with a registry built synchronously.
        let registry = futures::executor::block_on(EncoderRegistry::detect());
        let args = build_ffmpeg_args(&key, &ctx, 6, 6, 6, &settings, &registry, Path::new("/tmp/out.ts"));
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        assert!(ss_pos > i_pos, "accurate seek must place -ss after -i");
        assert!(args.iter().any(|a| a == "-copyts"));
    }

    #[test]
    fn transcoded_tier_uses_fast_seek_before_input() {
        let settings = crate::settings::TranscodingSettings::default();
        let key = SegmentKey {
            media_id: "m".into(),
            audio_track_tag: "default".into(),
            tier: Tier::P480,
            index: 1,
        };
        let ctx = GenerationContext {
            source_path: Path::new("/src/movie.mkv"),
            duration_secs: 20,
            audio_stream_index: None,
        };
        let registry = futures::executor::block_on(EncoderRegistry::detect());
        let args = build_ffmpeg_args(&key, &ctx, 6, 6, 6, &settings, &registry, Path::new("/tmp/out.ts"));
        let i_pos = args.iter().position(|a| a == "-i").unwrap();
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        assert!(ss_pos < i_pos, "fast seek must place -ss before -i");
    }
}
