//! Render a project to video.

use std::path::PathBuf;

use tilecast_common::config::AppConfig;
use tilecast_project_model::export::ExportSettings;
use tilecast_project_model::project::Project;
use tilecast_render_engine::export::{export_video, ExportContext, ExportProgress};
use tilecast_render_engine::interactive::CaptureRuntime;
use tilecast_render_engine::recorder::FfmpegPipeRuntime;

pub async fn run(
    config: &AppConfig,
    path: PathBuf,
    output: Option<PathBuf>,
    settings: ExportSettings,
    headless: bool,
) -> anyhow::Result<()> {
    println!("Exporting project at: {}", path.display());

    let project =
        Project::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let context = ExportContext::from_config(config);

    let runtime = FfmpegPipeRuntime::new(&config.tools.ffmpeg);
    let runtime: Option<&dyn CaptureRuntime> = if headless { None } else { Some(&runtime) };

    let progress_cb: Box<dyn Fn(ExportProgress) + Send + Sync> = Box::new(|p| {
        print!(
            "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
            p.progress * 100.0,
            p.frames_rendered,
            p.total_frames,
            p.eta_secs,
        );
    });

    let video = export_video(&project, &settings, &context, runtime, Some(&progress_cb)).await?;
    println!();

    let output_path = output
        .map(|p| p.with_extension(&video.extension))
        .unwrap_or_else(|| path.with_extension(&video.extension));
    std::fs::write(&output_path, &video.bytes)?;

    println!("Export complete: {}", output_path.display());
    println!("  Format: {}", video.mime_type);
    println!("  Resolution: {}x{}", video.width, video.height);
    println!("  Timing: {:.3} fps, {:.2}s", video.fps, video.duration_secs);
    Ok(())
}
