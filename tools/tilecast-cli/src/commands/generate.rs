//! Batch generator: stitch a directory of clips into one grid video.

use std::path::{Path, PathBuf};

use tilecast_common::clock::TimingDrift;
use tilecast_common::config::AppConfig;
use tilecast_project_model::export::ExportSettings;
use tilecast_project_model::project::{Asset, AssetKind, Grid, Project};
use tilecast_render_engine::batch::export_batch;
use tilecast_render_engine::export::{ExportContext, ExportProgress};
use tilecast_render_engine::probe::{probe_media, MediaProbe};

pub struct GenerateOptions {
    pub input_dir: PathBuf,
    pub output_name: String,
    pub aspect: Option<String>,
    pub max_dimension: Option<u32>,
}

pub async fn run(config: &AppConfig, options: GenerateOptions) -> anyhow::Result<()> {
    match generate(config, &options).await {
        Ok(path) => {
            println!("Collage written: {}", path.display());
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Collage generation failed");
            Err(e)
        }
    }
}

async fn generate(config: &AppConfig, options: &GenerateOptions) -> anyhow::Result<PathBuf> {
    if let Some(aspect) = &options.aspect {
        if !is_valid_aspect(aspect) {
            anyhow::bail!("Invalid aspect ratio {aspect:?}; expected W:H with positive numbers");
        }
    }

    let clips = list_clips(&options.input_dir, &options.output_name)?;
    if clips.is_empty() {
        anyhow::bail!("No .mp4 clips found in {}", options.input_dir.display());
    }
    println!("Found {} clip(s) in {}", clips.len(), options.input_dir.display());

    let context = ExportContext::from_config(config);
    let timeout = context.loader.probe_timeout();
    let ffprobe = context.loader.ffprobe();
    let probes = probe_clips(ffprobe, &clips, timeout).await?;

    let project = build_project(&clips, &probes, options.aspect.as_deref());
    println!(
        "  Grid: {}x{} (aspect {})",
        project.composition.grid.cols, project.composition.grid.rows, project.composition.aspect_ratio
    );

    let settings = ExportSettings {
        max_dimension: options.max_dimension,
        ..Default::default()
    };
    let progress_cb: Box<dyn Fn(ExportProgress) + Send + Sync> = Box::new(|p| {
        print!("\r  Progress: {:.1}% (ETA: {:.0}s)  ", p.progress * 100.0, p.eta_secs);
    });

    let video = export_batch(&project, &settings, &context, Some(&progress_cb)).await?;
    println!();

    let output = options.input_dir.join(&options.output_name);
    std::fs::write(&output, &video.bytes)?;
    tracing::info!(
        path = %output.display(),
        width = video.width,
        height = video.height,
        bytes = video.bytes.len(),
        "Collage written"
    );

    check_timing(config, &output, video.fps, video.duration_secs).await;
    Ok(output)
}

async fn probe_clips(
    ffprobe: &Path,
    clips: &[PathBuf],
    timeout: std::time::Duration,
) -> anyhow::Result<Vec<MediaProbe>> {
    let probes = futures::future::join_all(clips.iter().map(|clip| {
        let input = clip.display().to_string();
        async move { probe_media(ffprobe, &input, timeout).await }
    }))
    .await;
    Ok(probes.into_iter().collect::<Result<Vec<_>, _>>()?)
}

/// Sorted `.mp4` files, skipping dot-files and the output itself.
fn list_clips(dir: &Path, output_name: &str) -> anyhow::Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", dir.display()))?;
    let mut clips: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_clip(path, output_name))
        .collect();
    clips.sort();
    Ok(clips)
}

fn is_clip(path: &Path, output_name: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && name != output_name
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mp4"))
}

fn is_valid_aspect(value: &str) -> bool {
    let Some((w, h)) = value.split_once(':') else {
        return false;
    };
    matches!(
        (w.trim().parse::<f64>(), h.trim().parse::<f64>()),
        (Ok(w), Ok(h)) if w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0
    )
}

/// One video per cell in a near-square grid; aspect follows the grid shape
/// unless overridden.
fn build_project(clips: &[PathBuf], probes: &[MediaProbe], aspect: Option<&str>) -> Project {
    let grid = Grid::near_square(clips.len());
    let mut project = Project::new("Collage");
    project.set_grid(grid.rows, grid.cols);
    project.composition.aspect_ratio = aspect
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", grid.cols, grid.rows));

    for (index, (clip, probe)) in clips.iter().zip(probes).enumerate() {
        let name = clip
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("clip")
            .to_string();
        let mut asset = Asset::new(name, AssetKind::Video, clip.display().to_string());
        asset.size_bytes = std::fs::metadata(clip).map(|m| m.len()).unwrap_or(0);
        asset.width = probe.dimensions().map(|(w, _)| w);
        asset.height = probe.dimensions().map(|(_, h)| h);
        asset.duration = probe.duration_secs;
        asset.fps = probe.fps;
        asset.audio_bitrate = probe.audio_bitrate;

        let id = asset.id.clone();
        project.add_asset(asset);
        if let Err(e) = project.assign(&id, index) {
            tracing::warn!(clip = %clip.display(), error = %e, "Clip left out of the grid");
        }
    }
    project
}

/// Compare the written file against the requested timing. Drift is a
/// warning only.
async fn check_timing(config: &AppConfig, output: &Path, fps: f64, duration_secs: f64) {
    let timeout = std::time::Duration::from_millis(config.export.probe_timeout_ms);
    let probe = match probe_media(&config.tools.ffprobe, &output.display().to_string(), timeout).await
    {
        Ok(probe) => probe,
        Err(e) => {
            tracing::warn!(error = %e, "Could not verify output timing");
            return;
        }
    };

    let drift = TimingDrift {
        requested_fps: fps,
        achieved_fps: probe.fps.unwrap_or(0.0),
        requested_duration_secs: duration_secs,
        achieved_duration_secs: probe.duration_secs.unwrap_or(0.0),
    };
    if drift.exceeds(
        config.generator.fps_tolerance,
        config.generator.duration_tolerance_secs,
    ) {
        tracing::warn!(
            requested_fps = drift.requested_fps,
            achieved_fps = drift.achieved_fps,
            requested_duration_secs = drift.requested_duration_secs,
            achieved_duration_secs = drift.achieved_duration_secs,
            "Output timing drifted from the request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(duration: f64) -> MediaProbe {
        MediaProbe {
            width: Some(1280),
            height: Some(720),
            duration_secs: Some(duration),
            fps: Some(30.0),
            has_video: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_clip_filter() {
        assert!(is_clip(Path::new("/c/a.mp4"), "collage.mp4"));
        assert!(is_clip(Path::new("/c/B.MP4"), "collage.mp4"));
        assert!(!is_clip(Path::new("/c/.hidden.mp4"), "collage.mp4"));
        assert!(!is_clip(Path::new("/c/collage.mp4"), "collage.mp4"));
        assert!(!is_clip(Path::new("/c/notes.txt"), "collage.mp4"));
    }

    #[test]
    fn test_aspect_validation() {
        assert!(is_valid_aspect("16:9"));
        assert!(is_valid_aspect("1.5:1"));
        for bad in ["", "16", "abc", "4:0", "-1:2"] {
            assert!(!is_valid_aspect(bad), "{bad}");
        }
    }

    #[test]
    fn test_project_uses_near_square_grid_and_grid_aspect() {
        let clips: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("/c/{i}.mp4"))).collect();
        let probes: Vec<MediaProbe> = (0..5).map(|i| probe(2.0 + i as f64)).collect();
        let project = build_project(&clips, &probes, None);

        assert_eq!(project.composition.grid.cols, 3);
        assert_eq!(project.composition.grid.rows, 2);
        assert_eq!(project.composition.aspect_ratio, "3:2");
        assert!(project.is_video_only());
        assert_eq!(project.bindings().len(), 5);
        assert_eq!(project.assets[4].duration, Some(6.0));
    }

    #[test]
    fn test_aspect_override() {
        let clips = vec![PathBuf::from("/c/a.mp4")];
        let project = build_project(&clips, &[probe(1.0)], Some("9:16"));
        assert_eq!(project.composition.aspect_ratio, "9:16");
    }

    #[test]
    fn test_list_clips_sorted() {
        let dir = std::env::temp_dir().join(format!("tilecast-gen-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["b.mp4", "a.mp4", ".c.mp4", "collage.mp4", "d.mov"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
        let clips = list_clips(&dir, "collage.mp4").unwrap();
        let names: Vec<_> = clips
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);
        std::fs::remove_dir_all(dir).ok();
    }
}
