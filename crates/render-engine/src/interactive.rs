//! Interactive video export: a live render loop feeding a recorder.
//!
//! Video sources play in real time while the compositor redraws the
//! surface on animation-frame ticks, never faster than the negotiated
//! capture rate. The recorder receives every drawn frame with its wall-clock
//! timestamp and produces the encoded container when stopped.
//!
//! ```text
//! idle ─► loading-media ─► capturing ─► encoding ─► done
//!              │                │            │
//!              └────────────────┴────────────┴─────► failed
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbaImage;
use tilecast_common::clock::{CaptureClock, FramePacer};
use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::export::{ExportPreset, ExportSettings};
use tilecast_project_model::project::{AssetKind, Project};
use tokio::time::MissedTickBehavior;

use crate::compositor::{CellFrames, Compositor, MediaFrame, RenderTarget};
use crate::export::{ExportContext, ExportProgress, ExportStage, ExportedVideo, ProgressCallback};
use crate::layout::{calculate_layout_with_aspect, cover_footprint, AspectRatio, Layout};
use crate::media::{LoadedMedia, MediaSet, MediaSource};
use crate::playback::VideoPlayback;
use crate::surface::Surface;
use crate::timing::{first_positive, resolve_timing, ReferenceTiming, ResolvedTiming, TimingFallbacks};

/// Container/codec combinations in order of preference.
pub const MIME_CANDIDATES: [&str; 4] = [
    "video/mp4;codecs=avc1.42E01E,mp4a.40.2",
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm",
];

/// Lifecycle of one interactive export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    LoadingMedia,
    Capturing,
    Encoding,
    Done,
    Failed,
}

impl CapturePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LoadingMedia => "loading-media",
            Self::Capturing => "capturing",
            Self::Encoding => "encoding",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// An audio input mixed into the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSource {
    /// Path or URL handed to the recorder.
    pub input: String,
    /// Media time to start from (track trim-in).
    pub start_secs: f64,
    /// Track gain combined with the master bus.
    pub gain_db: f64,
}

/// Parameters for opening a capture stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub mime_type: String,
    pub video_bitrate: u64,
    pub audio_bitrate: Option<u64>,
    pub duration_secs: f64,
    pub audio: Vec<AudioSource>,
}

/// A capture/record capability.
#[async_trait]
pub trait CaptureRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Gather whatever capability information `is_available` and
    /// `supports_mime` read, off the async executor. Called before either.
    async fn warm_up(&self) {}

    /// Whether capture and recording can run at all.
    fn is_available(&self) -> bool;

    fn supports_mime(&self, mime: &str) -> bool;

    /// Open a capture stream and start recording.
    async fn open(&self, request: &CaptureRequest) -> TilecastResult<Box<dyn CaptureSession>>;
}

/// A running capture stream plus recorder.
#[async_trait]
pub trait CaptureSession: Send {
    /// Apply an exact frame-rate constraint and read back the rate actually
    /// negotiated, which may differ from the request.
    fn apply_frame_rate(&mut self, fps: f64) -> TilecastResult<f64>;

    /// Submit the current surface contents.
    fn push_frame(&mut self, frame: &RgbaImage, timestamp: Duration) -> TilecastResult<()>;

    /// A runtime error reported by the recorder since the last call.
    fn take_error(&mut self) -> Option<String>;

    /// Stop recording and return the recorded data chunks.
    async fn stop(self: Box<Self>) -> TilecastResult<Vec<Vec<u8>>>;
}

/// Source of animation-frame ticks.
#[async_trait]
pub trait FrameScheduler: Send {
    /// Wait for the next animation frame and return its timestamp.
    async fn next_frame(&mut self) -> Instant;
}

/// Animation frames from a tokio interval at the display refresh rate.
/// Missed ticks are skipped, not replayed.
#[derive(Debug)]
pub struct IntervalScheduler {
    interval: tokio::time::Interval,
}

impl IntervalScheduler {
    /// Must be called from within a tokio runtime.
    pub fn new(refresh_rate_hz: f64) -> Self {
        let hz = if refresh_rate_hz.is_finite() && refresh_rate_hz > 0.0 {
            refresh_rate_hz
        } else {
            60.0
        };
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl FrameScheduler for IntervalScheduler {
    async fn next_frame(&mut self) -> Instant {
        self.interval.tick().await.into_std()
    }
}

/// First candidate the runtime supports.
pub fn select_mime(runtime: &dyn CaptureRuntime) -> Option<&'static str> {
    MIME_CANDIDATES
        .iter()
        .copied()
        .find(|mime| runtime.supports_mime(mime))
}

/// Still frames and live playbacks for the duration of one export. Dropping
/// it pauses and rewinds every playback, whatever the exit path.
struct LiveSources {
    stills: CellFrames,
    videos: Vec<(usize, VideoPlayback)>,
}

impl LiveSources {
    fn frames(&self) -> CellFrames {
        let mut frames = self.stills.clone();
        for (cell, playback) in &self.videos {
            frames.insert(
                *cell,
                MediaFrame::new(playback.current_frame(), playback.intrinsic_size()),
            );
        }
        frames
    }

    fn play_all(&mut self) {
        for (cell, playback) in &mut self.videos {
            if let Err(e) = playback.play() {
                tracing::warn!(
                    cell = *cell,
                    asset_id = playback.asset_id(),
                    error = %e,
                    "Playback failed to start; cell shows its first frame"
                );
            }
        }
    }
}

impl Drop for LiveSources {
    fn drop(&mut self) {
        for (_, playback) in &mut self.videos {
            playback.pause();
            playback.rewind();
        }
    }
}

/// One interactive export run.
pub struct InteractiveExport<'a> {
    project: &'a Project,
    settings: &'a ExportSettings,
    context: &'a ExportContext,
    runtime: &'a dyn CaptureRuntime,
    phase: CapturePhase,
}

impl<'a> InteractiveExport<'a> {
    pub fn new(
        project: &'a Project,
        settings: &'a ExportSettings,
        context: &'a ExportContext,
        runtime: &'a dyn CaptureRuntime,
    ) -> Self {
        Self {
            project,
            settings,
            context,
            runtime,
            phase: CapturePhase::Idle,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    /// Run the export to completion.
    pub async fn run(
        &mut self,
        scheduler: &mut dyn FrameScheduler,
        progress: Option<&ProgressCallback>,
    ) -> TilecastResult<ExportedVideo> {
        let result = self.capture(scheduler, progress).await;
        match &result {
            Ok(video) => {
                self.set_phase(CapturePhase::Done);
                tracing::info!(
                    bytes = video.bytes.len(),
                    mime = %video.mime_type,
                    fps = video.fps,
                    "Interactive export finished"
                );
            }
            Err(e) => {
                self.set_phase(CapturePhase::Failed);
                tracing::error!(error = %e, "Interactive export failed");
                report(progress, ExportStage::Failed, 0.0, 0, 0);
            }
        }
        result
    }

    fn set_phase(&mut self, phase: CapturePhase) {
        tracing::debug!(from = self.phase.as_str(), to = phase.as_str(), "Capture phase");
        self.phase = phase;
    }

    async fn capture(
        &mut self,
        scheduler: &mut dyn FrameScheduler,
        progress: Option<&ProgressCallback>,
    ) -> TilecastResult<ExportedVideo> {
        self.runtime.warm_up().await;
        if !self.runtime.is_available() {
            return Err(TilecastError::environment(format!(
                "Capture runtime '{}' is not available",
                self.runtime.name()
            )));
        }
        let mime = select_mime(self.runtime).ok_or_else(|| {
            TilecastError::environment(format!(
                "Capture runtime '{}' supports none of the output formats",
                self.runtime.name()
            ))
        })?;

        self.set_phase(CapturePhase::LoadingMedia);
        report(progress, ExportStage::Preparing, 0.0, 0, 0);
        let project = self.project;
        let media = self
            .context
            .loader
            .preload(project, |asset| asset.kind.is_visual())
            .await;

        let audio = audio_sources(project, &media);
        let timing = resolve_timing(
            self.settings,
            &reference_timing(project, &media),
            &TimingFallbacks::interactive(&self.context.defaults),
            !audio.is_empty(),
        );
        let target = timing.target_duration()?;
        let layout = self.widened_layout(&media, timing.max_dimension)?;
        let mut surface = Surface::allocate(
            layout.canvas_width,
            layout.canvas_height,
            self.context.defaults.max_surface_pixels,
        )?;

        let mut sources = self.live_sources(&media);
        sources.play_all();

        let request = CaptureRequest {
            width: layout.canvas_width,
            height: layout.canvas_height,
            fps: timing.fps,
            mime_type: mime.to_string(),
            video_bitrate: timing.video_bitrate,
            audio_bitrate: timing.audio_bitrate,
            duration_secs: timing.duration_secs,
            audio,
        };
        let mut session = self.runtime.open(&request).await?;
        let negotiated = session.apply_frame_rate(timing.fps)?;
        let effective_fps = if negotiated.is_finite() && negotiated > 0.0 {
            negotiated
        } else {
            timing.fps
        };
        if (effective_fps - timing.fps).abs() > f64::EPSILON {
            tracing::info!(
                requested_fps = timing.fps,
                effective_fps,
                "Capture negotiated a different frame rate"
            );
        }

        tracing::info!(
            width = layout.canvas_width,
            height = layout.canvas_height,
            fps = effective_fps,
            duration_secs = timing.duration_secs,
            mime,
            runtime = self.runtime.name(),
            "Capture started"
        );
        self.set_phase(CapturePhase::Capturing);
        let compositor =
            Compositor::new(RenderTarget::Video).with_font(self.context.font.clone());
        let frames_drawn = capture_loop(
            &mut *session,
            scheduler,
            &compositor,
            &mut surface,
            project,
            &layout,
            &sources,
            &timing,
            target,
            effective_fps,
            progress,
        )
        .await?;

        self.set_phase(CapturePhase::Encoding);
        let total = (timing.duration_secs * effective_fps).ceil() as u64;
        report(progress, ExportStage::Encoding, 1.0, frames_drawn, total);
        let chunks = session.stop().await?;
        drop(sources);

        let bytes = chunks.concat();
        if bytes.is_empty() {
            return Err(TilecastError::encoding("Recorder produced no data"));
        }
        report(progress, ExportStage::Complete, 1.0, frames_drawn, total);

        Ok(ExportedVideo {
            bytes,
            mime_type: mime.to_string(),
            extension: ExportPreset::extension_for_mime(mime).to_string(),
            fps: effective_fps,
            duration_secs: timing.duration_secs,
            width: layout.canvas_width,
            height: layout.canvas_height,
        })
    }

    /// Uniform layout with rows and columns grown to the cover footprint of
    /// their loaded media, on an even canvas.
    fn widened_layout(&self, media: &MediaSet, max_dimension: u32) -> TilecastResult<Layout> {
        let composition = &self.project.composition;
        let aspect = AspectRatio::parse(
            self.settings
                .aspect_ratio
                .as_deref()
                .unwrap_or(&composition.aspect_ratio),
        );
        let base = calculate_layout_with_aspect(composition, aspect, max_dimension)?;
        let footprints: Vec<Option<(f64, f64)>> = (0..base.cell_count())
            .map(|index| {
                let binding = self.project.binding(index)?;
                let (w, h) = media.get(&binding.asset.id)?.intrinsic_size();
                cover_footprint((w as f64, h as f64), (base.cell_width, base.cell_height))
            })
            .collect();
        Ok(base.widened(&footprints).with_even_canvas())
    }

    fn live_sources(&self, media: &MediaSet) -> LiveSources {
        let mut stills = CellFrames::new();
        let mut videos = Vec::new();
        for binding in self.project.bindings() {
            match media.get(&binding.asset.id) {
                Some(LoadedMedia::Image(image)) => {
                    stills.insert(
                        binding.cell_index,
                        MediaFrame::new(image.bitmap.clone(), (image.width, image.height)),
                    );
                }
                Some(LoadedMedia::Video(video)) => videos.push((
                    binding.cell_index,
                    VideoPlayback::new(
                        self.context.loader.ffmpeg(),
                        video.clone(),
                        binding.track.trim_in,
                    ),
                )),
                None => {}
            }
        }
        LiveSources { stills, videos }
    }
}

#[allow(clippy::too_many_arguments)]
async fn capture_loop(
    session: &mut dyn CaptureSession,
    scheduler: &mut dyn FrameScheduler,
    compositor: &Compositor,
    surface: &mut Surface,
    project: &Project,
    layout: &Layout,
    sources: &LiveSources,
    timing: &ResolvedTiming,
    target: Duration,
    effective_fps: f64,
    progress: Option<&ProgressCallback>,
) -> TilecastResult<u64> {
    let total_frames = (timing.duration_secs * effective_fps).ceil() as u64;
    let mut pacer = FramePacer::new(effective_fps);

    let epoch = scheduler.next_frame().await;
    let clock = CaptureClock::from_epoch(epoch);
    let mut now = epoch;
    loop {
        let elapsed = clock.elapsed_at(now);
        if elapsed >= target {
            break;
        }
        if let Some(message) = session.take_error() {
            return Err(TilecastError::encoding(format!("Recorder failed: {message}")));
        }
        if pacer.should_draw(elapsed) {
            compositor.render_frame(surface, project, layout, &sources.frames());
            session.push_frame(surface.pixels(), elapsed)?;
            let fraction = elapsed.as_secs_f64() / target.as_secs_f64().max(1e-9);
            report(
                progress,
                ExportStage::Rendering,
                fraction,
                pacer.frames_drawn(),
                total_frames,
            );
        }
        now = scheduler.next_frame().await;
    }

    let frames = pacer.frames_drawn();
    let achieved = frames as f64 / timing.duration_secs.max(1e-9);
    tracing::debug!(frames, achieved_fps = achieved, "Capture loop finished");
    Ok(frames)
}

/// Timing values from the populated cell with the lowest index.
fn reference_timing(project: &Project, media: &MediaSet) -> ReferenceTiming {
    let Some(binding) = project.reference_binding() else {
        return ReferenceTiming::default();
    };
    let video = match media.get(&binding.asset.id) {
        Some(LoadedMedia::Video(video)) => Some(video),
        _ => None,
    };
    ReferenceTiming {
        fps: first_positive([video.and_then(|v| v.fps), binding.asset.fps]),
        duration_secs: first_positive([
            Some(binding.track.usable_duration()),
            video.and_then(|v| v.duration_secs),
            binding.asset.duration,
        ]),
        video_bitrate: None,
        audio_bitrate: video
            .and_then(|v| v.audio_bitrate)
            .or(binding.asset.audio_bitrate),
    }
}

/// Audible inputs: videos with an audio stream and audio assets, skipping
/// muted tracks and a muted bus.
fn audio_sources(project: &Project, media: &MediaSet) -> Vec<AudioSource> {
    project
        .bindings()
        .into_iter()
        .filter_map(|binding| {
            let gain_db = project.audio.mix_gain_db(binding.track)?;
            let input = match (binding.asset.kind, media.get(&binding.asset.id)) {
                (AssetKind::Video, Some(LoadedMedia::Video(video))) if video.has_audio => {
                    video.input.clone()
                }
                (AssetKind::Audio, _) => match MediaSource::parse(&binding.asset.src).ok()? {
                    MediaSource::Path(path) => path.display().to_string(),
                    MediaSource::Remote(url) => url,
                    MediaSource::Inline { .. } => return None,
                },
                _ => return None,
            };
            Some(AudioSource {
                input,
                start_secs: binding.track.trim_in,
                gain_db,
            })
        })
        .collect()
}

fn report(
    progress: Option<&ProgressCallback>,
    stage: ExportStage,
    fraction: f64,
    frames_rendered: u64,
    total_frames: u64,
) {
    if let Some(cb) = progress {
        cb(ExportProgress {
            progress: fraction.clamp(0.0, 1.0),
            frames_rendered,
            total_frames,
            eta_secs: 0.0,
            stage,
        });
    }
}
