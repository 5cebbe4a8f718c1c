//! Batch video export: one ffmpeg invocation driven by a filter graph.
//!
//! Each video is scaled to cover its cell and cropped to the exact cell
//! size, the cells are stacked at their pixel offsets, and the stack is
//! padded out to the canvas. Pan, scale and contain are not applied here.
//!
//! ```text
//! [0:v] scale+crop ─┐
//! [1:v] scale+crop ─┼─► xstack ─► pad ─► yuv420p ─► libx264 ─► output.mp4
//! color (empty)  ───┘
//! [n:a] volume ─────────────────────────────────────► aac
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::export::ExportSettings;
use tilecast_project_model::project::{AssetKind, Project};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::color::Color;
use crate::export::{ExportContext, ExportProgress, ExportStage, ExportedVideo, ProgressCallback};
use crate::layout::{calculate_layout_with_aspect, AspectRatio, Layout};
use crate::media::MediaSource;
use crate::probe::{probe_media, MediaProbe};
use crate::timing::{first_positive, resolve_timing, ReferenceTiming, ResolvedTiming, TimingFallbacks};

const MIME_TYPE: &str = "video/mp4";
const OUTPUT_NAME: &str = "output.mp4";

/// A video input resolved to a local file and probed.
#[derive(Debug, Clone)]
pub struct ProbedInput {
    pub cell_index: usize,
    pub path: PathBuf,
    pub probe: MediaProbe,
}

/// Integer pixel placement of one cell inside the padded area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What fills a cell in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFill {
    /// ffmpeg input index.
    Input(usize),
    /// Solid background.
    Empty,
}

/// The audio stream to map and its gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMapping {
    pub input: usize,
    pub gain_db: f64,
}

/// Everything needed to run the encoder.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub inputs: Vec<ProbedInput>,
    pub trims: Vec<f64>,
    pub layout: Layout,
    pub timing: ResolvedTiming,
    pub audio: Option<AudioMapping>,
    pub filter_graph: String,
}

/// Resolve an asset source to a local file. `data:` URIs are written into
/// the scratch directory.
pub fn resolve_local_path(src: &str, scratch: &Path, ordinal: usize) -> TilecastResult<PathBuf> {
    let source = MediaSource::parse(src).map_err(|e| TilecastError::probe(src, e))?;
    let path = match source {
        MediaSource::Path(path) => path,
        MediaSource::Inline { mime, bytes } => {
            let ext = mime.rsplit('/').next().filter(|e| !e.is_empty()).unwrap_or("bin");
            let path = scratch.join(format!("inline-{ordinal}.{ext}"));
            std::fs::write(&path, bytes)?;
            path
        }
        MediaSource::Remote(url) => {
            return Err(TilecastError::probe(url, "input is not locally addressable"));
        }
    };
    if !path.is_file() {
        return Err(TilecastError::probe(&path, "input file does not exist"));
    }
    Ok(path)
}

/// Pixel boxes for every cell, relative to the padded area. Sizes are
/// floored to even values for the yuv420p output.
pub fn cell_boxes(layout: &Layout) -> Vec<CellBox> {
    (0..layout.cell_count())
        .filter_map(|index| layout.cell_rect(index))
        .map(|rect| CellBox {
            x: (rect.x - layout.padding).max(0.0).round() as u32,
            y: (rect.y - layout.padding).max(0.0).round() as u32,
            width: even_floor(rect.width),
            height: even_floor(rect.height),
        })
        .collect()
}

fn even_floor(value: f64) -> u32 {
    ((value.max(0.0).floor() as u32) / 2 * 2).max(2)
}

/// Build the `-filter_complex` graph. The output video pad is `[vout]`,
/// the output audio pad (when mapped) is `[aout]`.
pub fn build_filter_graph(
    layout: &Layout,
    fills: &[CellFill],
    fps: f64,
    duration_secs: f64,
    background: Color,
    inner_background: Color,
    audio: Option<AudioMapping>,
) -> String {
    let boxes = cell_boxes(layout);
    let mut parts = Vec::with_capacity(boxes.len() + 3);

    for (cell, cell_box) in boxes.iter().enumerate() {
        let (w, h) = (cell_box.width, cell_box.height);
        match fills.get(cell).copied().unwrap_or(CellFill::Empty) {
            CellFill::Input(input) => parts.push(format!(
                "[{input}:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps:.3}[c{cell}]"
            )),
            CellFill::Empty => parts.push(format!(
                "color=c={color}:s={w}x{h}:r={fps:.3}:d={duration_secs:.3}[c{cell}]",
                color = inner_background.ffmpeg()
            )),
        }
    }

    let labels: String = (0..boxes.len()).map(|cell| format!("[c{cell}]")).collect();
    if boxes.len() > 1 {
        let positions = boxes
            .iter()
            .map(|b| format!("{}_{}", b.x, b.y))
            .collect::<Vec<_>>()
            .join("|");
        parts.push(format!(
            "{labels}xstack=inputs={}:layout={positions}:fill={}[stack]",
            boxes.len(),
            inner_background.ffmpeg()
        ));
    } else {
        parts.push(format!("{labels}null[stack]"));
    }

    let offset = layout.padding.round() as u32;
    parts.push(format!(
        "[stack]pad={}:{}:{offset}:{offset}:color={},format=yuv420p[vout]",
        layout.canvas_width,
        layout.canvas_height,
        background.ffmpeg()
    ));

    if let Some(audio) = audio {
        parts.push(format!(
            "[{}:a]volume={:.2}dB[aout]",
            audio.input, audio.gain_db
        ));
    }

    parts.join(";")
}

/// Resolve timing, layout and the filter graph from probed inputs.
pub fn plan_batch(
    project: &Project,
    settings: &ExportSettings,
    context: &ExportContext,
    inputs: Vec<ProbedInput>,
) -> TilecastResult<BatchPlan> {
    let composition = &project.composition;
    let trims: Vec<f64> = inputs
        .iter()
        .map(|input| {
            project
                .track_for_cell(input.cell_index)
                .map(|t| t.trim_in.max(0.0))
                .unwrap_or(0.0)
        })
        .collect();

    let audio = inputs.iter().enumerate().find_map(|(index, input)| {
        if !input.probe.has_audio {
            return None;
        }
        let track = project.track_for_cell(input.cell_index)?;
        let gain_db = project.audio.mix_gain_db(track)?;
        Some(AudioMapping {
            input: index,
            gain_db,
        })
    });

    let reference = inputs
        .iter()
        .min_by_key(|input| input.cell_index)
        .and_then(|input| {
            let binding = project.binding(input.cell_index)?;
            Some(ReferenceTiming {
                fps: first_positive([input.probe.fps, binding.asset.fps]),
                duration_secs: first_positive([
                    Some(binding.track.usable_duration()),
                    input.probe.duration_secs.map(|d| d - binding.track.trim_in),
                    binding.asset.duration,
                ]),
                video_bitrate: input.probe.video_bitrate,
                audio_bitrate: input.probe.audio_bitrate.or(binding.asset.audio_bitrate),
            })
        })
        .unwrap_or_default();

    let timing = resolve_timing(
        settings,
        &reference,
        &TimingFallbacks::batch(&context.defaults, inputs.len()),
        audio.is_some(),
    );
    timing.target_duration()?;

    let aspect = AspectRatio::parse(
        settings
            .aspect_ratio
            .as_deref()
            .unwrap_or(&composition.aspect_ratio),
    );
    let layout = calculate_layout_with_aspect(composition, aspect, timing.max_dimension)?
        .with_even_canvas();

    let mut fills = vec![CellFill::Empty; layout.cell_count()];
    for (index, input) in inputs.iter().enumerate() {
        if let Some(fill) = fills.get_mut(input.cell_index) {
            *fill = CellFill::Input(index);
        }
    }

    let background = Color::opaque(&composition.style.background_color);
    let inner_background = composition
        .background_color
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(Color::opaque)
        .unwrap_or(background);
    let filter_graph = build_filter_graph(
        &layout,
        &fills,
        timing.fps,
        timing.duration_secs,
        background,
        inner_background,
        audio,
    );

    Ok(BatchPlan {
        inputs,
        trims,
        layout,
        timing,
        audio,
        filter_graph,
    })
}

/// Encoder arguments for a plan.
pub fn build_ffmpeg_args(plan: &BatchPlan, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
    ];
    for (input, trim) in plan.inputs.iter().zip(&plan.trims) {
        if *trim > 0.0 {
            args.push("-ss".to_string());
            args.push(format!("{trim:.3}"));
        }
        args.push("-i".to_string());
        args.push(input.path.display().to_string());
    }

    args.push("-filter_complex".to_string());
    args.push(plan.filter_graph.clone());
    args.push("-map".to_string());
    args.push("[vout]".to_string());
    if plan.audio.is_some() {
        args.push("-map".to_string());
        args.push("[aout]".to_string());
    }
    args.push("-r".to_string());
    args.push(format!("{:.3}", plan.timing.fps));
    args.push("-t".to_string());
    args.push(format!("{:.3}", plan.timing.duration_secs));

    args.extend(
        [
            "-c:v", "libx264", "-preset", "medium", "-profile:v", "high", "-pix_fmt", "yuv420p",
            "-b:v",
        ]
        .map(String::from),
    );
    args.push(plan.timing.video_bitrate.to_string());
    if let Some(audio_bitrate) = plan.timing.audio_bitrate {
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push(audio_bitrate.to_string());
    } else {
        args.push("-an".to_string());
    }
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(output.display().to_string());
    args
}

/// Export a video-only project through ffmpeg.
pub async fn export_batch(
    project: &Project,
    settings: &ExportSettings,
    context: &ExportContext,
    progress: Option<&ProgressCallback>,
) -> TilecastResult<ExportedVideo> {
    if !project.is_video_only() {
        return Err(TilecastError::unsupported(
            "Batch export requires every populated cell to hold a video",
        ));
    }
    report(progress, ExportStage::Preparing, 0.0, 0, 0, 0.0);

    // Removed on every exit path when dropped.
    let scratch = tempfile::Builder::new()
        .prefix("tilecast-batch")
        .tempdir()
        .map_err(|e| TilecastError::environment(format!("Failed to create scratch directory: {e}")))?;

    let bindings: Vec<_> = project
        .bindings()
        .into_iter()
        .filter(|binding| binding.asset.kind == AssetKind::Video)
        .collect();
    let mut paths = Vec::with_capacity(bindings.len());
    for (ordinal, binding) in bindings.iter().enumerate() {
        paths.push(resolve_local_path(&binding.asset.src, scratch.path(), ordinal)?);
    }

    let timeout = context.loader.probe_timeout();
    let ffprobe = context.loader.ffprobe();
    let probes = futures::future::join_all(paths.iter().map(|path| {
        let input = path.display().to_string();
        async move { probe_media(ffprobe, &input, timeout).await }
    }))
    .await;

    let mut inputs = Vec::with_capacity(bindings.len());
    for ((binding, path), probe) in bindings.iter().zip(paths).zip(probes) {
        let probe = probe?;
        if !probe.has_video {
            return Err(TilecastError::probe(&path, "input has no video stream"));
        }
        inputs.push(ProbedInput {
            cell_index: binding.cell_index,
            path,
            probe,
        });
    }

    let plan = plan_batch(project, settings, context, inputs)?;
    let output = scratch.path().join(OUTPUT_NAME);
    let args = build_ffmpeg_args(&plan, &output);
    tracing::info!(
        inputs = plan.inputs.len(),
        width = plan.layout.canvas_width,
        height = plan.layout.canvas_height,
        fps = plan.timing.fps,
        duration_secs = plan.timing.duration_secs,
        video_bitrate = plan.timing.video_bitrate,
        audio = plan.audio.is_some(),
        "Batch export plan built"
    );

    run_ffmpeg(context.loader.ffmpeg(), &args, &plan.timing, progress).await?;

    let bytes = tokio::fs::read(&output).await.map_err(|e| {
        TilecastError::encoding(format!("Failed to read {}: {e}", output.display()))
    })?;
    if bytes.is_empty() {
        return Err(TilecastError::encoding("Encoder produced an empty file"));
    }

    Ok(ExportedVideo {
        bytes,
        mime_type: MIME_TYPE.to_string(),
        extension: "mp4".to_string(),
        fps: plan.timing.fps,
        duration_secs: plan.timing.duration_secs,
        width: plan.layout.canvas_width,
        height: plan.layout.canvas_height,
    })
}

async fn run_ffmpeg(
    ffmpeg: &Path,
    args: &[String],
    timing: &ResolvedTiming,
    progress: Option<&ProgressCallback>,
) -> TilecastResult<()> {
    tracing::debug!(args = ?args, "Running ffmpeg");
    let mut child = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TilecastError::environment(format!("Failed to start ffmpeg: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TilecastError::encoding("Failed to capture ffmpeg stdout"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| TilecastError::encoding("Failed to capture ffmpeg stderr"))?;

    // Drain stderr concurrently to avoid ffmpeg blocking on a full pipe.
    let stderr_task = tokio::spawn(async move {
        let mut output = String::new();
        match stderr.read_to_string(&mut output).await {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    });

    let start = Instant::now();
    let total_frames = (timing.duration_secs * timing.fps).ceil() as u64;
    let mut state = ProgressState::default();
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| TilecastError::encoding(format!("Failed reading ffmpeg progress: {e}")))?
    {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        state.update(key, value);
        if key == "progress" {
            if let Some(cb) = progress {
                cb(progress_report(
                    &state,
                    total_frames,
                    timing.duration_secs,
                    start.elapsed().as_secs_f64(),
                ));
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| TilecastError::encoding(format!("Failed to wait on ffmpeg: {e}")))?;
    let diagnostics = stderr_task
        .await
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    if !status.success() {
        return Err(TilecastError::encoding_with_output(
            format!("ffmpeg export failed (status {status})"),
            diagnostics.trim(),
        ));
    }

    report(
        progress,
        ExportStage::Complete,
        1.0,
        total_frames,
        total_frames,
        0.0,
    );
    tracing::info!(elapsed_secs = start.elapsed().as_secs_f64(), "ffmpeg finished");
    Ok(())
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }
}

fn progress_report(
    state: &ProgressState,
    total_frames: u64,
    expected_duration_secs: f64,
    elapsed_secs: f64,
) -> ExportProgress {
    let progress = if expected_duration_secs <= 0.0 {
        0.0
    } else {
        (state.out_time_secs / expected_duration_secs).clamp(0.0, 1.0)
    };
    let eta_secs = if progress > 0.0 {
        (elapsed_secs / progress) - elapsed_secs
    } else {
        0.0
    }
    .max(0.0);

    ExportProgress {
        progress: if state.complete { 1.0 } else { progress },
        frames_rendered: (progress * total_frames as f64).round() as u64,
        total_frames,
        eta_secs,
        stage: if state.complete {
            ExportStage::Finalizing
        } else {
            ExportStage::Encoding
        },
    }
}

fn report(
    progress: Option<&ProgressCallback>,
    stage: ExportStage,
    fraction: f64,
    frames_rendered: u64,
    total_frames: u64,
    eta_secs: f64,
) {
    if let Some(cb) = progress {
        cb(ExportProgress {
            progress: fraction,
            frames_rendered,
            total_frames,
            eta_secs,
            stage,
        });
    }
}
