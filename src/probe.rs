//! Media probe (Component A, §4.1).
//!
//! Invokes `ffprobe` as an external process and normalises its JSON output.
//! Grounded on `Dastari-librarian`'s `Transcoder::probe`, generalised to the
//! full stream-descriptor shape §3 requires and bounded with a timeout so a
//! hung probe cannot wedge a request handler.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub stream_index: i64,
    pub kind: StreamKind,
    pub codec_short: String,
    pub codec_long: String,
    pub language: Option<String>,
    pub title: Option<String>,
    pub is_default: bool,
    pub is_forced: bool,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub sample_rate_hz: Option<u32>,
    pub bit_rate_bps: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub duration_secs: u64,
    pub streams: Vec<StreamDescriptor>,
}

impl ProbeResult {
    pub fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn audio_stream(&self, stream_index: Option<i64>) -> Option<&StreamDescriptor> {
        match stream_index {
            Some(idx) => self
                .streams
                .iter()
                .find(|s| s.kind == StreamKind::Audio && s.stream_index == idx),
            None => self.streams.iter().find(|s| s.kind == StreamKind::Audio),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: i64,
    codec_type: String,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    codec_long_name: Option<String>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
    #[serde(default)]
    disposition: Option<FfprobeDisposition>,
    #[serde(default)]
    channels: Option<u32>,
    #[serde(default)]
    channel_layout: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeTags {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeDisposition {
    #[serde(default)]
    default: i32,
    #[serde(default)]
    forced: i32,
}

fn parse_fraction(s: &str) -> Option<f64> {
    let mut parts = s.splitn(2, '/');
    let num: f64 = parts.next()?.parse().ok()?;
    let den: f64 = parts.next()?.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some((num / den * 1000.0).round() / 1000.0)
    }
}

/// Invokes `ffprobe`. Stateless; safe to share across tasks.
pub struct Prober;

impl Prober {
    pub fn new() -> Self {
        Self
    }

    /// Probes `path`. On any process, parse, or timeout failure, returns a
    /// degraded result (duration 0, no streams) rather than propagating an
    /// error — callers treat this as "unknown layout" (§4.1).
    pub async fn probe(&self, path: &Path) -> ProbeResult {
        match timeout(PROBE_TIMEOUT, self.run(path)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "probe failed, using degraded result");
                ProbeResult::default()
            }
            Err(_) => {
                tracing::warn!(path = %path.display(), "probe timed out, using degraded result");
                ProbeResult::default()
            }
        }
    }

    async fn run(&self, path: &Path) -> std::io::Result<ProbeResult> {
        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;

        let parsed: FfprobeOutput = match serde_json::from_slice(&output.stdout) {
            Ok(v) => v,
            Err(e) => {
                return Ok({
                    tracing::warn!(error = %e, "malformed ffprobe json");
                    ProbeResult::default()
                })
            }
        };

        let duration_secs = parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d.round() as u64)
            .unwrap_or(0);

        let streams = parsed
            .streams
            .into_iter()
            .filter_map(|s| {
                let kind = match s.codec_type.as_str() {
                    "video" => StreamKind::Video,
                    "audio" => StreamKind::Audio,
                    "subtitle" => StreamKind::Subtitle,
                    _ => return None,
                };
                let frame_rate = s
                    .r_frame_rate
                    .as_deref()
                    .and_then(parse_fraction)
                    .or_else(|| s.avg_frame_rate.as_deref().and_then(parse_fraction));
                Some(StreamDescriptor {
                    stream_index: s.index,
                    kind,
                    codec_short: s.codec_name.unwrap_or_default(),
                    codec_long: s.codec_long_name.unwrap_or_default(),
                    language: s.tags.as_ref().and_then(|t| t.language.clone()),
                    title: s.tags.as_ref().and_then(|t| t.title.clone()),
                    is_default: s.disposition.as_ref().map(|d| d.default != 0).unwrap_or(false),
                    is_forced: s.disposition.as_ref().map(|d| d.forced != 0).unwrap_or(false),
                    channels: s.channels,
                    channel_layout: s.channel_layout,
                    sample_rate_hz: s.sample_rate.and_then(|s| s.parse().ok()),
                    bit_rate_bps: s.bit_rate.and_then(|s| s.parse().ok()),
                    width: s.width,
                    height: s.height,
                    frame_rate,
                })
            })
            .collect();

        Ok(ProbeResult { duration_secs, streams })
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_parses_and_rounds() {
        assert_eq!(parse_fraction("30000/1001"), Some(29.97));
        assert_eq!(parse_fraction("25/1"), Some(25.0));
        assert_eq!(parse_fraction("0/0"), None);
    }

    #[tokio::test]
    async fn missing_file_degrades_instead_of_erroring() {
        let prober = Prober::new();
        let result = prober.probe(Path::new("/nonexistent/does-not-exist.mp4")).await;
        assert_eq!(result.duration_secs, 0);
        assert!(result.streams.is_empty());
    }
}
