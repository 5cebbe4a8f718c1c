//! Media metadata probing through `ffprobe`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tilecast_common::error::{TilecastError, TilecastResult};
use tokio::process::Command;

/// Intrinsic properties of a media input. Every field may be unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaProbe {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
    pub fps: Option<f64>,
    /// Video stream bitrate (bits/sec).
    pub video_bitrate: Option<u64>,
    /// Audio stream bitrate (bits/sec).
    pub audio_bitrate: Option<u64>,
    pub has_audio: bool,
    pub has_video: bool,
}

impl MediaProbe {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Run `ffprobe` on `input` (path or URL), bounded by `timeout`.
pub async fn probe_media(
    ffprobe: &Path,
    input: &str,
    timeout: Duration,
) -> TilecastResult<MediaProbe> {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(input)
    .stdin(Stdio::null())
    .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| TilecastError::probe(input, format!("ffprobe timed out after {timeout:?}")))?
        .map_err(|e| TilecastError::probe(input, format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(TilecastError::probe(
            input,
            format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    let probe = parse_probe_json(&raw).map_err(|e| TilecastError::probe(input, e))?;
    tracing::debug!(input, ?probe, "Probed media");
    Ok(probe)
}

/// Parse `ffprobe -print_format json` output.
pub fn parse_probe_json(raw: &str) -> Result<MediaProbe, String> {
    let parsed: ProbeOutput =
        serde_json::from_str(raw).map_err(|e| format!("Unreadable ffprobe output: {e}"))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let format_duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_positive_f64);
    let stream_duration = video
        .and_then(|s| s.duration.as_deref())
        .and_then(parse_positive_f64);

    let fps = video.and_then(|s| {
        s.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_frame_rate))
    });

    let video_bitrate = video
        .and_then(|s| s.bit_rate.as_deref())
        .and_then(parse_positive_u64)
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|f| f.bit_rate.as_deref())
                .and_then(parse_positive_u64)
        });

    Ok(MediaProbe {
        width: video.and_then(|s| s.width).filter(|w| *w > 0),
        height: video.and_then(|s| s.height).filter(|h| *h > 0),
        duration_secs: format_duration.or(stream_duration),
        fps,
        video_bitrate,
        audio_bitrate: audio
            .and_then(|s| s.bit_rate.as_deref())
            .and_then(parse_positive_u64),
        has_audio: audio.is_some(),
        has_video: video.is_some(),
    })
}

/// Parse `"30000/1001"` or `"25"`; zero denominators and zero rates are unknown.
pub fn parse_frame_rate(value: &str) -> Option<f64> {
    let fps = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse::<f64>().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_positive_f64(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_positive_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|v| *v > 0)
}
