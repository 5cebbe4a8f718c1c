//! Export settings, presets, and render-job records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Caller-supplied export overrides. Every `None` falls through to the
/// reference clip and then to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    pub fps: Option<f64>,

    pub duration_secs: Option<f64>,

    /// Video bitrate target (bits/sec).
    pub video_bitrate: Option<u64>,

    /// Audio bitrate target (bits/sec).
    pub audio_bitrate: Option<u64>,

    /// Long edge of the output in pixels.
    pub max_dimension: Option<u32>,

    /// `"W:H"` override; `None` uses the project's aspect ratio.
    pub aspect_ratio: Option<String>,
}

/// Where a render job executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    /// Live capture loop.
    Browser,
    /// Headless filter-graph pipeline.
    Server,
}

/// Built-in export presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportPreset {
    StillPng,
    VideoMp4,
}

impl ExportPreset {
    pub fn id(self) -> &'static str {
        match self {
            Self::StillPng => "still-png",
            Self::VideoMp4 => "video-mp4",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "still-png" => Some(Self::StillPng),
            "video-mp4" => Some(Self::VideoMp4),
            _ => None,
        }
    }

    pub fn is_still(self) -> bool {
        matches!(self, Self::StillPng)
    }

    /// File extension for a produced mime type (`video/webm;codecs=vp9` -> `webm`).
    pub fn extension_for_mime(mime: &str) -> &'static str {
        let base = mime.split(';').next().unwrap_or_default().trim();
        match base {
            "image/png" => "png",
            "video/webm" => "webm",
            "video/mp4" => "mp4",
            _ => "bin",
        }
    }
}

/// Download label `<title>.<ext>` with filesystem-hostile characters replaced.
pub fn download_label(title: &str, extension: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let stem = stem.trim_matches('-');
    let stem = if stem.is_empty() { "collage" } else { stem };
    format!("{stem}.{extension}")
}

/// Lifecycle state of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderJobStatus {
    Idle,
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl RenderJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Ephemeral record of one export attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub id: String,
    pub project_id: String,
    pub preset: ExportPreset,
    pub target: ExecutionTarget,
    pub status: RenderJobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub mime_type: Option<String>,
    pub extension: Option<String>,
    pub download_label: Option<String>,
    /// Written output, once succeeded.
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

impl RenderJob {
    pub fn new(project_id: impl Into<String>, preset: ExportPreset, target: ExecutionTarget) -> Self {
        Self {
            id: crate::project::generate_id("job"),
            project_id: project_id.into(),
            preset,
            target,
            status: RenderJobStatus::Queued,
            progress: 0.0,
            mime_type: None,
            extension: None,
            download_label: None,
            output: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_ids_round_trip() {
        for preset in [ExportPreset::StillPng, ExportPreset::VideoMp4] {
            assert_eq!(ExportPreset::from_id(preset.id()), Some(preset));
        }
        assert_eq!(ExportPreset::from_id("gif"), None);
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(ExportPreset::extension_for_mime("image/png"), "png");
        assert_eq!(
            ExportPreset::extension_for_mime("video/mp4;codecs=avc1.42E01E,mp4a.40.2"),
            "mp4"
        );
        assert_eq!(ExportPreset::extension_for_mime("video/webm;codecs=vp9"), "webm");
    }

    #[test]
    fn test_download_label_sanitizes_title() {
        assert_eq!(download_label("My Collage!", "png"), "My-Collage.png");
        assert_eq!(download_label("   ", "mp4"), "collage.mp4");
    }

    #[test]
    fn test_settings_deserialize_partial() {
        let settings: ExportSettings = serde_json::from_str(r#"{"fps":24,"durationSecs":2}"#).unwrap();
        assert_eq!(settings.fps, Some(24.0));
        assert_eq!(settings.duration_secs, Some(2.0));
        assert_eq!(settings.max_dimension, None);
    }
}
