//! HLS master/variant playlist generator and quality listing
//! (Component E, §4.5).
//!
//! String-builder style grounded on the teacher's `playlist/variant.rs`
//! (`#EXTM3U`/`#EXT-X-TARGETDURATION`/`#EXTINF` assembly via `push_str`),
//! cut down from the teacher's fMP4/CMAF multi-track playlist to the
//! spec's single-video-track MPEG-TS VOD playlist, and its master-playlist
//! header conventions borrowed from `hls-vod-lib`'s `playlist/master.rs`,
//! simplified to the fixed Original+4-preset variant set this spec needs.

use crate::cache::last_segment_index;
use crate::catalogue::MediaHandle;
use crate::settings::TranscodingSettings;
use crate::tier::Tier;

const HLS_VERSION: u32 = 3;

/// Emits the master playlist: an `Original` entry (only for MP4/WebM
/// sources) plus all four presets, descending by resolution.
pub fn generate_master_playlist(media: &MediaHandle, audio_track: &str, settings: &TranscodingSettings) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str(&format!("#EXT-X-VERSION:{HLS_VERSION}\n"));

    if media.supports_stream_copy() {
        out.push_str("#EXT-X-STREAM-INF:BANDWIDTH=20000000\n");
        out.push_str(&format!("original.m3u8?audioTrack={audio_track}\n"));
    }

    for tier in Tier::PRESETS_DESCENDING {
        let profile = tier.profile(settings).expect("presets always have a profile");
        let bandwidth = (profile.video_bitrate_kbps + profile.audio_bitrate_kbps) * 1000;
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},RESOLUTION={}x{}\n",
            profile.width, profile.height
        ));
        out.push_str(&format!("{}.m3u8?audioTrack={audio_track}\n", tier.name()));
    }

    out
}

/// Emits a single variant playlist for `tier` (§4.5).
pub fn generate_variant_playlist(media: &MediaHandle, audio_track: &str, tier: Tier, segment_duration_secs: u64) -> String {
    let duration = media.duration_secs;
    let n = last_segment_index(duration, segment_duration_secs) + 1;
    let target_duration = segment_duration_secs + 1;

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str(&format!("#EXT-X-VERSION:{HLS_VERSION}\n"));
    out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");

    for i in 0..n {
        let start = i * segment_duration_secs;
        let remaining = duration.saturating_sub(start);
        let seg_len = remaining.min(segment_duration_secs);
        out.push_str(&format!("#EXTINF:{:.3},\n", seg_len as f64));
        out.push_str(&format!("{}/{}.ts?audioTrack={audio_track}\n", tier.name(), i));
    }

    out.push_str("#EXT-X-ENDLIST\n");
    out
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QualityInfo {
    pub name: &'static str,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

/// Enumerates the supported tiers with their current (settings-applied)
/// dimensions and bitrate, for `GET /hls/{id}/qualities`.
pub fn list_qualities(settings: &TranscodingSettings) -> Vec<QualityInfo> {
    let mut out = vec![QualityInfo {
        name: Tier::Original.name(),
        width: None,
        height: None,
        bitrate_kbps: None,
    }];
    for tier in Tier::PRESETS_DESCENDING {
        let profile = tier.profile(settings).expect("presets always have a profile");
        out.push(QualityInfo {
            name: tier.name(),
            width: Some(profile.width),
            height: Some(profile.height),
            bitrate_kbps: Some(profile.video_bitrate_kbps + profile.audio_bitrate_kbps),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn media(duration_secs: u64, ext: &str) -> MediaHandle {
        MediaHandle {
            id: "m".into(),
            path: PathBuf::from(format!("movie.{ext}")),
            duration_secs,
            thumbs_root: None,
        }
    }

    #[test]
    fn variant_playlist_counts_segments_and_final_duration() {
        let playlist = generate_variant_playlist(&media(18, "mp4"), "default", Tier::P720, 6);
        assert_eq!(playlist.matches("#EXTINF").count(), 3);
        assert!(playlist.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn variant_playlist_final_segment_is_clipped() {
        let playlist = generate_variant_playlist(&media(20, "mp4"), "default", Tier::P720, 6);
        // 20s / 6s -> segments 0,1,2 full (6s), segment 3 clipped to 2s.
        assert_eq!(playlist.matches("#EXTINF").count(), 4);
        assert!(playlist.contains("#EXTINF:2.000,"));
    }

    #[test]
    fn master_playlist_excludes_original_for_unsupported_container() {
        let settings = TranscodingSettings::default();
        let playlist = generate_master_playlist(&media(18, "mkv"), "default", &settings);
        assert!(!playlist.contains("original.m3u8"));
        assert!(playlist.contains("1080p.m3u8"));
    }

    #[test]
    fn master_playlist_includes_original_for_mp4() {
        let settings = TranscodingSettings::default();
        let playlist = generate_master_playlist(&media(18, "mp4"), "default", &settings);
        assert!(playlist.contains("original.m3u8"));
    }

    #[test]
    fn qualities_reflect_bitrate_overrides() {
        let mut settings = TranscodingSettings::default();
        settings.bitrate_720p = 3000;
        let qualities = list_qualities(&settings);
        let p720 = qualities.iter().find(|q| q.name == "720p").unwrap();
        assert_eq!(p720.bitrate_kbps, Some(3000 + 128));
    }
}
