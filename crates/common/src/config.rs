//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Export defaults and runtime limits.
    pub export: ExportDefaults,

    /// External tool locations.
    pub tools: ToolsConfig,

    /// Batch generator settings.
    pub generator: GeneratorConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters used when neither the caller nor the
/// reference clip supplies a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Fallback frame rate.
    pub fps: f64,

    /// Fallback duration in seconds.
    pub duration_secs: f64,

    /// Long edge of still exports.
    pub still_max_dimension: u32,

    /// Long edge of video exports.
    pub video_max_dimension: u32,

    /// Video bitrate for the live capture path (bits/sec).
    pub video_bitrate_bps: u64,

    /// Audio bitrate used when any input carries audio (bits/sec).
    pub audio_bitrate_bps: u64,

    /// Upper bound for best-effort metadata probes.
    pub probe_timeout_ms: u64,

    /// Largest raster surface (in pixels) the compositor will allocate.
    pub max_surface_pixels: u64,

    /// Animation clock rate of the live capture loop.
    pub refresh_rate_hz: f64,
}

/// Locations of external binaries and resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,

    /// TrueType/OpenType font used for labels and metadata overlays.
    pub font: Option<PathBuf>,
}

/// Batch generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Directory scanned for `.mp4` clips.
    pub input_dir: PathBuf,

    /// Output file name written next to the clips.
    pub output_name: String,

    /// Allowed fps deviation before the post-export check warns.
    pub fps_tolerance: f64,

    /// Allowed duration deviation (seconds) before the post-export check warns.
    pub duration_tolerance_secs: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tilecast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30.0,
            duration_secs: 3.0,
            still_max_dimension: 2048,
            video_max_dimension: 1920,
            video_bitrate_bps: 8_000_000,
            audio_bitrate_bps: 192_000,
            probe_timeout_ms: 1000,
            max_surface_pixels: 268_435_456,
            refresh_rate_hz: 60.0,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            font: None,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("clips"),
            output_name: "collage.mp4".to_string(),
            fps_tolerance: 0.5,
            duration_tolerance_secs: 0.25,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("tilecast").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"export":{"fps":24.0},"tools":{"font":"/tmp/f.ttf"}}"#)
                .unwrap();
        assert!((parsed.export.fps - 24.0).abs() < 1e-9);
        assert!((parsed.export.duration_secs - 3.0).abs() < 1e-9);
        assert_eq!(parsed.tools.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(parsed.tools.font, Some(PathBuf::from("/tmp/f.ttf")));
        assert_eq!(parsed.logging.level, "info");
    }
}
