//! Export contract, progress reporting and strategy selection.
//!
//! Both video strategies take a project plus [`ExportSettings`] and return an
//! [`ExportedVideo`]. Which one runs is decided once, here, by a capability
//! check; the rendering code itself never branches on the environment.

use tilecast_common::config::{AppConfig, ExportDefaults};
use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::export::ExportSettings;
use tilecast_project_model::project::Project;

use crate::batch::export_batch;
use crate::font::FontFace;
use crate::interactive::{CaptureRuntime, FrameScheduler, IntervalScheduler, InteractiveExport};
use crate::media::MediaLoader;

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Export progress report.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Encoding,
    Finalizing,
    Complete,
    Failed,
}

/// An encoded video and what was actually produced.
#[derive(Debug, Clone)]
pub struct ExportedVideo {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub extension: String,
    /// Achieved frame rate.
    pub fps: f64,
    /// Achieved duration.
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// Shared resources for exports.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub defaults: ExportDefaults,
    pub loader: MediaLoader,
    pub font: Option<FontFace>,
}

impl ExportContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            defaults: config.export.clone(),
            loader: MediaLoader::from_config(config),
            font: FontFace::discover(config.tools.font.as_deref()),
        }
    }

    /// Drop the font so output does not depend on installed system fonts.
    pub fn without_font(mut self) -> Self {
        self.font = None;
        self
    }
}

/// How a video export runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStrategy {
    /// Live render loop feeding a capture runtime.
    Interactive,
    /// Headless filter graph (video-only compositions).
    Batch,
}

impl ExportStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Batch => "batch",
        }
    }
}

/// Interactive whenever a capture runtime is available; otherwise batch for
/// video-only projects.
pub fn select_strategy(runtime_available: bool, project: &Project) -> TilecastResult<ExportStrategy> {
    if runtime_available {
        Ok(ExportStrategy::Interactive)
    } else if project.is_video_only() {
        Ok(ExportStrategy::Batch)
    } else {
        Err(TilecastError::environment(
            "No capture runtime available and the composition is not video-only",
        ))
    }
}

/// Export a video with whichever strategy the environment supports.
pub async fn export_video(
    project: &Project,
    settings: &ExportSettings,
    context: &ExportContext,
    runtime: Option<&dyn CaptureRuntime>,
    progress: Option<&ProgressCallback>,
) -> TilecastResult<ExportedVideo> {
    let available = match runtime {
        Some(runtime) => {
            runtime.warm_up().await;
            runtime.is_available()
        }
        None => false,
    };
    let strategy = select_strategy(available, project)?;
    tracing::info!(
        project = %project.title,
        strategy = strategy.as_str(),
        cells = project.bindings().len(),
        "Starting video export"
    );

    match (strategy, runtime) {
        (ExportStrategy::Interactive, Some(runtime)) => {
            let mut scheduler = IntervalScheduler::new(context.defaults.refresh_rate_hz);
            export_interactive(project, settings, context, runtime, &mut scheduler, progress).await
        }
        _ => export_batch(project, settings, context, progress).await,
    }
}

/// Run the interactive path with an explicit frame scheduler.
pub async fn export_interactive(
    project: &Project,
    settings: &ExportSettings,
    context: &ExportContext,
    runtime: &dyn CaptureRuntime,
    scheduler: &mut dyn FrameScheduler,
    progress: Option<&ProgressCallback>,
) -> TilecastResult<ExportedVideo> {
    InteractiveExport::new(project, settings, context, runtime)
        .run(scheduler, progress)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecast_project_model::project::{Asset, AssetKind};

    fn project_with(kind: AssetKind) -> Project {
        let mut project = Project::new("strategy");
        let asset = Asset::new("a", kind, "/tmp/a");
        let id = asset.id.clone();
        project.add_asset(asset);
        project.assign(&id, 0).unwrap();
        project
    }

    #[test]
    fn test_runtime_always_wins() {
        let project = project_with(AssetKind::Image);
        assert_eq!(select_strategy(true, &project).unwrap(), ExportStrategy::Interactive);
    }

    #[test]
    fn test_video_only_falls_back_to_batch() {
        let project = project_with(AssetKind::Video);
        assert_eq!(select_strategy(false, &project).unwrap(), ExportStrategy::Batch);
    }

    #[test]
    fn test_mixed_without_runtime_is_environment_error() {
        for project in [project_with(AssetKind::Image), Project::new("empty")] {
            let err = select_strategy(false, &project).unwrap_err();
            assert!(matches!(err, TilecastError::Environment { .. }));
        }
    }

    #[tokio::test]
    async fn test_export_without_runtime_fails_before_work() {
        let project = project_with(AssetKind::Logo);
        let context = ExportContext::from_config(&AppConfig::default()).without_font();
        let err = export_video(&project, &ExportSettings::default(), &context, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TilecastError::Environment { .. }));
    }

    #[tokio::test]
    async fn test_missing_recorder_binary_is_environment_error() {
        let project = project_with(AssetKind::Image);
        let context = ExportContext::from_config(&AppConfig::default()).without_font();
        let runtime = crate::recorder::FfmpegPipeRuntime::new("/nonexistent/ffmpeg");
        let err = export_video(
            &project,
            &ExportSettings::default(),
            &context,
            Some(&runtime),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TilecastError::Environment { .. }));
    }
}
