//! H.264 encoder capability detection and argument-vector emission
//! (Component B, §4.2).
//!
//! No teacher module covers hardware encoder selection (the teacher only
//! wraps a library AAC audio encoder); this is built fresh against the
//! spec's table, using the `Vec<String>` argument-builder idiom from
//! `Dastari-librarian`'s `TranscodeProfile::video_args`.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::settings::TranscodingSettings;

const ENUMERATE_TIMEOUT: Duration = Duration::from_secs(5);
const SELFTEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Hardware,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Nvenc,
    Qsv,
    Amf,
    Vaapi,
    VideoToolbox,
    X264,
}

impl Encoder {
    const CANDIDATES_IN_PRIORITY_ORDER: [Encoder; 6] = [
        Encoder::Nvenc,
        Encoder::Qsv,
        Encoder::Amf,
        Encoder::Vaapi,
        Encoder::VideoToolbox,
        Encoder::X264,
    ];

    pub fn kind(&self) -> EncoderKind {
        match self {
            Encoder::X264 => EncoderKind::Software,
            _ => EncoderKind::Hardware,
        }
    }

    /// The `-c:v` argument ffmpeg expects for this encoder.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Encoder::Nvenc => "h264_nvenc",
            Encoder::Qsv => "h264_qsv",
            Encoder::Amf => "h264_amf",
            Encoder::Vaapi => "h264_vaapi",
            Encoder::VideoToolbox => "h264_videotoolbox",
            Encoder::X264 => "libx264",
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            Encoder::Nvenc => 1,
            Encoder::Qsv => 2,
            Encoder::Amf => 3,
            Encoder::Vaapi => 4,
            Encoder::VideoToolbox => 5,
            Encoder::X264 => 100,
        }
    }
}

/// One quality tier's target dimensions and bitrates.
#[derive(Debug, Clone, Copy)]
pub struct TierProfile {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

/// Detects and caches the best usable encoder at startup, then emits
/// per-tier argument vectors on demand.
pub struct EncoderRegistry {
    detected: Encoder,
}

impl EncoderRegistry {
    /// Probes the transcoder binary for available encoders and self-tests
    /// hardware candidates in priority order, falling back to software
    /// x264 if nothing else passes.
    pub async fn detect() -> Self {
        let listed = Self::list_encoders().await.unwrap_or_default();
        for candidate in Encoder::CANDIDATES_IN_PRIORITY_ORDER {
            if candidate == Encoder::X264 {
                break;
            }
            if !listed.iter().any(|name| name == candidate.ffmpeg_name()) {
                continue;
            }
            if Self::selftest(candidate).await {
                tracing::info!(encoder = candidate.ffmpeg_name(), "selected hardware encoder");
                return Self { detected: candidate };
            }
            tracing::warn!(encoder = candidate.ffmpeg_name(), "self-test failed, trying next candidate");
        }
        tracing::info!("falling back to software x264 encoder");
        Self { detected: Encoder::X264 }
    }

    async fn list_encoders() -> std::io::Result<Vec<String>> {
        let fut = Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();
        let output = match timeout(ENUMERATE_TIMEOUT, fut).await {
            Ok(result) => result?,
            Err(_) => return Ok(Vec::new()),
        };
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| {
                let mut parts = line.trim_start().splitn(2, char::is_whitespace);
                let flags = parts.next()?;
                if !flags.starts_with('V') {
                    return None;
                }
                parts.next().map(|rest| rest.trim_start().split_whitespace().next().unwrap_or("").to_string())
            })
            .collect())
    }

    async fn selftest(encoder: Encoder) -> bool {
        let fut = Command::new("ffmpeg")
            .args(["-hide_banner", "-f", "lavfi", "-i", "color=c=black:s=64x64:d=1:r=1"])
            .args(["-frames:v", "1"])
            .args(["-c:v", encoder.ffmpeg_name()])
            .args(["-f", "null", "-"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match timeout(SELFTEST_TIMEOUT, fut).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }

    /// The encoder to use for the next generation: the detected one, unless
    /// settings disable hardware acceleration and it is hardware.
    pub fn active(&self, settings: &TranscodingSettings) -> Encoder {
        if self.detected.kind() == EncoderKind::Hardware && !settings.enable_hardware_accel {
            Encoder::X264
        } else {
            self.detected
        }
    }

    /// Emits the video-encoding flag sequence for `encoder` targeting
    /// `profile`, per the table in §4.2.
    pub fn video_args(encoder: Encoder, profile: &TierProfile, settings: &TranscodingSettings) -> Vec<String> {
        let b = profile.video_bitrate_kbps;
        let maxrate = (b as f64 * 1.5) as u32;
        let bufsize = b * 2;
        let mut args: Vec<String> = vec!["-c:v".into(), encoder.ffmpeg_name().into()];

        match encoder {
            Encoder::Nvenc => {
                args.extend(["-preset".into(), "p4".into()]);
                args.extend(["-tune".into(), "hq".into()]);
                args.extend(["-profile:v".into(), "high".into()]);
                args.extend(["-level".into(), "4.1".into()]);
                args.extend(["-rc".into(), "vbr".into()]);
            }
            Encoder::Qsv => {
                args.extend(["-preset".into(), "faster".into()]);
                args.extend(["-profile:v".into(), "high".into()]);
            }
            Encoder::Amf => {
                args.extend(["-quality".into(), "balanced".into()]);
                args.extend(["-rc".into(), "vbr_peak".into()]);
            }
            Encoder::Vaapi => {}
            Encoder::VideoToolbox => {
                args.extend(["-profile:v".into(), "high".into()]);
            }
            Encoder::X264 => {
                args.extend(["-preset".into(), settings.preset.clone()]);
                if settings.enable_low_latency {
                    args.extend(["-tune".into(), "zerolatency".into()]);
                }
                args.extend(["-profile:v".into(), "high".into()]);
                args.extend(["-level".into(), "4.1".into()]);
                let threads = if settings.thread_count == 0 { "0".into() } else { settings.thread_count.to_string() };
                args.extend(["-threads".into(), threads]);
                args.extend(["-x264opts".into(), "sliced-threads=1".into()]);
            }
        }

        args.extend(["-b:v".into(), format!("{b}k")]);
        args.extend(["-maxrate".into(), format!("{maxrate}k")]);
        args.extend(["-bufsize".into(), format!("{bufsize}k")]);

        let (w, h) = (profile.width, profile.height);
        args.extend([
            "-vf".into(),
            format!("scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"),
        ]);

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> TierProfile {
        TierProfile {
            width: 1280,
            height: 720,
            video_bitrate_kbps: 5000,
            audio_bitrate_kbps: 128,
        }
    }

    #[test]
    fn x264_args_apply_preset_and_thread_count() {
        let mut settings = TranscodingSettings::default();
        settings.preset = "fast".into();
        settings.thread_count = 4;
        let args = EncoderRegistry::video_args(Encoder::X264, &profile(), &settings);
        assert!(args.windows(2).any(|w| w == ["-preset".to_string(), "fast".to_string()]));
        assert!(args.windows(2).any(|w| w == ["-threads".to_string(), "4".to_string()]));
        assert!(!args.iter().any(|a| a == "zerolatency"));
    }

    #[test]
    fn low_latency_adds_zerolatency_tune() {
        let mut settings = TranscodingSettings::default();
        settings.enable_low_latency = true;
        let args = EncoderRegistry::video_args(Encoder::X264, &profile(), &settings);
        assert!(args.iter().any(|a| a == "zerolatency"));
    }

    #[test]
    fn bitrate_caps_follow_15x_and_2x_rule() {
        let settings = TranscodingSettings::default();
        let args = EncoderRegistry::video_args(Encoder::X264, &profile(), &settings);
        assert!(args.iter().any(|a| a == "7500k"));
        assert!(args.iter().any(|a| a == "10000k"));
    }

    #[test]
    fn active_demotes_hardware_when_disabled() {
        let registry = EncoderRegistry { detected: Encoder::Nvenc };
        let mut settings = TranscodingSettings::default();
        settings.enable_hardware_accel = false;
        assert_eq!(registry.active(&settings), Encoder::X264);
        settings.enable_hardware_accel = true;
        assert_eq!(registry.active(&settings), Encoder::Nvenc);
    }

    #[test]
    fn priority_order_matches_spec() {
        let mut sorted = Encoder::CANDIDATES_IN_PRIORITY_ORDER;
        sorted.sort_by_key(|e| e.priority());
        assert_eq!(sorted, Encoder::CANDIDATES_IN_PRIORITY_ORDER);
    }
}
