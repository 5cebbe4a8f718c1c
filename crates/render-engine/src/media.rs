//! Media loading: resolves asset references into decoded, ready-to-sample
//! handles.
//!
//! A failed load only ever affects its own cell. [`MediaLoader::preload`]
//! logs each failure and leaves the asset out of the returned set, so the
//! compositor falls back to a placeholder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use image::RgbaImage;
use percent_encoding::percent_decode_str;
use tilecast_common::config::AppConfig;
use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::project::{Asset, AssetKind, Project};
use tokio::process::Command;
use url::Url;

use crate::probe::{probe_media, MediaProbe};

/// Where an asset's bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// Local filesystem path (plain or from a `file://` URL).
    Path(PathBuf),
    /// Inline `data:` URI payload.
    Inline { mime: String, bytes: Vec<u8> },
    /// Remote URL handed to ffmpeg as-is.
    Remote(String),
}

impl MediaSource {
    /// Classify an asset source locator.
    pub fn parse(src: &str) -> Result<Self, String> {
        let src = src.trim();
        if let Some(rest) = src.strip_prefix("data:") {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| "data URI without payload".to_string())?;
            let mime = header.split(';').next().unwrap_or_default().to_string();
            let bytes = if header.ends_with(";base64") {
                base64::engine::general_purpose::STANDARD
                    .decode(payload.trim())
                    .map_err(|e| format!("invalid base64 in data URI: {e}"))?
            } else {
                percent_decode_str(payload).collect()
            };
            return Ok(Self::Inline { mime, bytes });
        }
        if let Some(path) = file_url_to_path(src) {
            return Ok(Self::Path(path));
        }
        if src.starts_with("http://") || src.starts_with("https://") {
            return Ok(Self::Remote(src.to_string()));
        }
        Ok(Self::Path(PathBuf::from(src)))
    }

    /// Locally addressable path, if any.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// Convert a `file://` URL into a path, decoding percent escapes.
pub fn file_url_to_path(src: &str) -> Option<PathBuf> {
    let url = Url::parse(src).ok().filter(|url| url.scheme() == "file")?;
    url.to_file_path().ok()
}

/// A decoded still.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub asset_id: String,
    pub bitmap: Arc<RgbaImage>,
    pub width: u32,
    pub height: u32,
}

/// A video ready for playback.
#[derive(Debug, Clone)]
pub struct VideoHandle {
    pub asset_id: String,
    /// Path or URL handed to ffmpeg.
    pub input: String,
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
    /// Best-effort; `None` when the probe could not tell.
    pub fps: Option<f64>,
    /// Best-effort; `None` when the probe could not tell.
    pub audio_bitrate: Option<u64>,
    pub has_audio: bool,
    /// Size frames are decoded at (intrinsic size capped to the decode limit).
    pub decode_width: u32,
    pub decode_height: u32,
    /// First frame, available before playback starts.
    pub poster: Arc<RgbaImage>,
}

/// A loaded visual asset.
#[derive(Debug, Clone)]
pub enum LoadedMedia {
    Image(ImageHandle),
    Video(VideoHandle),
}

impl LoadedMedia {
    pub fn asset_id(&self) -> &str {
        match self {
            Self::Image(h) => &h.asset_id,
            Self::Video(h) => &h.asset_id,
        }
    }

    /// Intrinsic pixel size used for fit computations.
    pub fn intrinsic_size(&self) -> (u32, u32) {
        match self {
            Self::Image(h) => (h.width, h.height),
            Self::Video(h) => (h.width, h.height),
        }
    }

    /// The still bitmap, or the video's first frame.
    pub fn still_frame(&self) -> Arc<RgbaImage> {
        match self {
            Self::Image(h) => Arc::clone(&h.bitmap),
            Self::Video(h) => Arc::clone(&h.poster),
        }
    }
}

/// Loaded media keyed by asset id.
pub type MediaSet = HashMap<String, LoadedMedia>;

/// Resolves assets into [`LoadedMedia`].
#[derive(Debug, Clone)]
pub struct MediaLoader {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
    max_decode_dimension: u32,
}

impl MediaLoader {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            probe_timeout: Duration::from_millis(1000),
            max_decode_dimension: 1920,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg: config.tools.ffmpeg.clone(),
            ffprobe: config.tools.ffprobe.clone(),
            probe_timeout: Duration::from_millis(config.export.probe_timeout_ms.max(1)),
            max_decode_dimension: config.export.video_max_dimension.max(16),
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Resolve one asset. Audio assets have no visual handle and yield `None`.
    pub async fn resolve(&self, asset: &Asset) -> TilecastResult<Option<LoadedMedia>> {
        match asset.kind {
            AssetKind::Audio => Ok(None),
            AssetKind::Image | AssetKind::Logo => {
                self.load_image(asset).await.map(|h| Some(LoadedMedia::Image(h)))
            }
            AssetKind::Video => self.load_video(asset).await.map(|h| Some(LoadedMedia::Video(h))),
        }
    }

    /// Load every asset referenced by a track that passes `filter`, in
    /// parallel. Failures are logged and omitted from the result.
    pub async fn preload<F>(&self, project: &Project, filter: F) -> MediaSet
    where
        F: Fn(&Asset) -> bool,
    {
        let mut seen = std::collections::HashSet::new();
        let assets: Vec<&Asset> = project
            .bindings()
            .into_iter()
            .map(|binding| binding.asset)
            .filter(|asset| filter(asset) && seen.insert(asset.id.clone()))
            .collect();

        let results =
            futures::future::join_all(assets.iter().map(|asset| self.resolve(asset))).await;

        let mut media = MediaSet::new();
        for (asset, result) in assets.iter().zip(results) {
            match result {
                Ok(Some(loaded)) => {
                    media.insert(asset.id.clone(), loaded);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        asset_id = %asset.id,
                        asset = %asset.name,
                        error = %e,
                        "Asset failed to load; cell will render as a placeholder"
                    );
                }
            }
        }
        tracing::info!(requested = assets.len(), loaded = media.len(), "Media preloaded");
        media
    }

    async fn load_image(&self, asset: &Asset) -> TilecastResult<ImageHandle> {
        let source = MediaSource::parse(&asset.src)
            .map_err(|e| TilecastError::asset_load(&asset.id, e))?;
        let asset_id = asset.id.clone();
        let decoded = tokio::task::spawn_blocking(move || decode_still(source))
            .await
            .map_err(|e| TilecastError::asset_load(&asset_id, format!("decode task failed: {e}")))?
            .map_err(|e| TilecastError::asset_load(&asset_id, e))?;

        let (mut width, mut height) = decoded.dimensions();
        if width == 0 || height == 0 {
            (width, height) = asset.stored_dimensions().ok_or_else(|| {
                TilecastError::asset_load(&asset.id, "decoded image has no dimensions")
            })?;
        }

        Ok(ImageHandle {
            asset_id: asset.id.clone(),
            bitmap: Arc::new(decoded),
            width,
            height,
        })
    }

    async fn load_video(&self, asset: &Asset) -> TilecastResult<VideoHandle> {
        let source = MediaSource::parse(&asset.src)
            .map_err(|e| TilecastError::asset_load(&asset.id, e))?;
        let input = match &source {
            MediaSource::Path(path) => {
                if !path.exists() {
                    return Err(TilecastError::asset_load(
                        &asset.id,
                        format!("{} does not exist", path.display()),
                    ));
                }
                path.display().to_string()
            }
            MediaSource::Remote(url) => url.clone(),
            MediaSource::Inline { .. } => {
                return Err(TilecastError::asset_load(
                    &asset.id,
                    "inline video sources are not playable",
                ))
            }
        };

        // Metadata is best-effort: a failed probe falls back to stored values.
        let probe = match probe_media(&self.ffprobe, &input, self.probe_timeout).await {
            Ok(probe) => probe,
            Err(e) => {
                tracing::debug!(asset_id = %asset.id, error = %e, "Video probe failed");
                MediaProbe::default()
            }
        };

        let (width, height) = probe
            .dimensions()
            .or_else(|| asset.stored_dimensions())
            .ok_or_else(|| TilecastError::asset_load(&asset.id, "video size is unknown"))?;
        let (decode_width, decode_height) = decode_size(width, height, self.max_decode_dimension);

        let poster = self
            .first_frame(&input, decode_width, decode_height)
            .await
            .map_err(|e| TilecastError::asset_load(&asset.id, e))?;

        Ok(VideoHandle {
            asset_id: asset.id.clone(),
            input,
            width,
            height,
            duration_secs: probe.duration_secs.or(asset.duration),
            fps: probe.fps,
            audio_bitrate: probe.audio_bitrate,
            has_audio: probe.has_audio,
            decode_width,
            decode_height,
            poster: Arc::new(poster),
        })
    }

    /// Decode the first frame as RGBA at the given size.
    async fn first_frame(&self, input: &str, width: u32, height: u32) -> Result<RgbaImage, String> {
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i", input, "-frames:v", "1", "-vf"])
            .arg(format!("scale={width}:{height}"))
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run ffmpeg: {e}"))?;

        if !output.status.success() {
            return Err(format!(
                "first frame decode failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let expected = (width as usize) * (height as usize) * 4;
        if output.stdout.len() < expected {
            return Err(format!(
                "first frame truncated ({} of {expected} bytes)",
                output.stdout.len()
            ));
        }
        let mut bytes = output.stdout;
        bytes.truncate(expected);
        RgbaImage::from_raw(width, height, bytes).ok_or_else(|| "invalid frame buffer".to_string())
    }
}

/// Intrinsic size scaled down (never up) so the long edge fits `max`, with
/// even dimensions for the decoder.
pub fn decode_size(width: u32, height: u32, max: u32) -> (u32, u32) {
    let long = width.max(height).max(1) as f64;
    let scale = (max as f64 / long).min(1.0);
    let even = |v: f64| ((v.round() as u32) / 2 * 2).max(2);
    (even(width as f64 * scale), even(height as f64 * scale))
}

fn decode_still(source: MediaSource) -> Result<RgbaImage, String> {
    let decoded = match source {
        MediaSource::Path(path) => {
            image::open(&path).map_err(|e| format!("{}: {e}", path.display()))?
        }
        MediaSource::Inline { bytes, .. } => {
            image::load_from_memory(&bytes).map_err(|e| format!("inline image: {e}"))?
        }
        MediaSource::Remote(url) => {
            return Err(format!("remote images are not supported: {url}"));
        }
    };
    Ok(decoded.to_rgba8())
}
