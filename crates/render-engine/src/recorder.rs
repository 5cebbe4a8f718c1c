//! ffmpeg-backed capture runtime.
//!
//! Frames are written as raw RGBA to ffmpeg's stdin by a writer thread and
//! timestamped from the wall clock on arrival, then resampled to a constant
//! rate on output. Audio inputs are mixed with their track gains.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use tempfile::TempDir;
use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::export::ExportPreset;

use crate::interactive::{AudioSource, CaptureRequest, CaptureRuntime, CaptureSession};


/// Frames buffered between the render loop and the encoder before new
/// frames are dropped.
const FRAME_QUEUE_DEPTH: usize = 4;

/// Highest frame rate the recorder accepts.
const MAX_CAPTURE_FPS: f64 = 120.0;

/// Live recorder that pipes frames into ffmpeg.
#[derive(Debug)]
pub struct FfmpegPipeRuntime {
    ffmpeg: PathBuf,
    encoders: OnceLock<String>,
}

impl FfmpegPipeRuntime {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            encoders: OnceLock::new(),
        }
    }

    /// Run `ffmpeg -encoders` without blocking the executor and cache the
    /// result. Later capability checks read the cache.
    pub async fn query_encoders(&self) {
        if self.encoders.get().is_some() {
            return;
        }
        let listing = tokio::process::Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).into_owned())
            .unwrap_or_default();
        let _ = self.encoders.set(listing);
    }

    /// `ffmpeg -encoders` output, queried once. Blocks when
    /// [`query_encoders`](Self::query_encoders) has not run yet.
    fn encoders(&self) -> &str {
        self.encoders.get_or_init(|| {
            Command::new(&self.ffmpeg)
                .args(["-hide_banner", "-encoders"])
                .stdin(Stdio::null())
                .output()
                .ok()
                .filter(|output| output.status.success())
                .map(|output| String::from_utf8_lossy(&output.stdout).into_owned())
                .unwrap_or_default()
        })
    }

    fn has_encoder(&self, name: &str) -> bool {
        self.encoders()
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(name))
    }
}

/// Video and audio codec arguments for a candidate mime type.
pub fn codec_args_for_mime(mime: &str, video_bitrate: u64, audio_bitrate: Option<u64>) -> Vec<String> {
    let video_kbps = format!("{}k", (video_bitrate / 1000).max(100));
    let audio_kbps = format!("{}k", (audio_bitrate.unwrap_or(128_000) / 1000).max(32));
    let (video_codec, audio_codec, extra): (&str, &str, &[&str]) = if mime.starts_with("video/mp4") {
        (
            "libx264",
            "aac",
            &["-preset", "veryfast", "-movflags", "+faststart"],
        )
    } else if mime.contains("vp8") {
        ("libvpx", "libopus", &["-deadline", "realtime"])
    } else {
        ("libvpx-vp9", "libopus", &["-deadline", "realtime"])
    };

    let mut args: Vec<String> = vec![
        "-c:v".into(),
        video_codec.into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-b:v".into(),
        video_kbps,
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    if audio_bitrate.is_some() {
        args.extend(["-c:a".into(), audio_codec.into(), "-b:a".into(), audio_kbps]);
    }
    args
}

/// Audio filter mixing every source with its gain into `[aout]`.
pub fn audio_mix_filter(sources: &[AudioSource], first_input: usize) -> Option<String> {
    if sources.is_empty() {
        return None;
    }
    let mut graph = String::new();
    let mut labels = String::new();
    for (offset, source) in sources.iter().enumerate() {
        let input = first_input + offset;
        graph.push_str(&format!(
            "[{input}:a]volume={gain:.2}dB[a{offset}];",
            gain = source.gain_db
        ));
        labels.push_str(&format!("[a{offset}]"));
    }
    graph.push_str(&format!(
        "{labels}amix=inputs={}:duration=longest:normalize=0[aout]",
        sources.len()
    ));
    Some(graph)
}

fn recorder_args(request: &CaptureRequest, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", request.width, request.height),
        "-use_wallclock_as_timestamps".into(),
        "1".into(),
        "-i".into(),
        "pipe:0".into(),
    ];
    for source in &request.audio {
        args.extend([
            "-ss".into(),
            format!("{:.3}", source.start_secs.max(0.0)),
            "-stream_loop".into(),
            "-1".into(),
            "-i".into(),
            source.input.clone(),
        ]);
    }
    args.push("-map".into());
    args.push("0:v".into());
    if let Some(filter) = audio_mix_filter(&request.audio, 1) {
        args.extend([
            "-filter_complex".into(),
            filter,
            "-map".into(),
            "[aout]".into(),
        ]);
    }
    args.extend([
        "-fps_mode".into(),
        "cfr".into(),
        "-r".into(),
        format!("{:.3}", request.fps),
        "-t".into(),
        format!("{:.3}", request.duration_secs),
    ]);
    let audio_bitrate = (!request.audio.is_empty()).then_some(request.audio_bitrate).flatten();
    args.extend(codec_args_for_mime(
        &request.mime_type,
        request.video_bitrate,
        audio_bitrate,
    ));
    args.push(output.display().to_string());
    args
}

#[async_trait]
impl CaptureRuntime for FfmpegPipeRuntime {
    fn name(&self) -> &str {
        "ffmpeg-pipe"
    }

    async fn warm_up(&self) {
        self.query_encoders().await;
    }

    fn is_available(&self) -> bool {
        !self.encoders().is_empty()
    }

    fn supports_mime(&self, mime: &str) -> bool {
        if mime.starts_with("video/mp4") {
            self.has_encoder("libx264") && self.has_encoder("aac")
        } else if mime.contains("vp9") {
            self.has_encoder("libvpx-vp9")
        } else if mime.contains("vp8") {
            self.has_encoder("libvpx")
        } else if mime.starts_with("video/webm") {
            self.has_encoder("libvpx-vp9") || self.has_encoder("libvpx")
        } else {
            false
        }
    }

    async fn open(&self, request: &CaptureRequest) -> TilecastResult<Box<dyn CaptureSession>> {
        let scratch = tempfile::Builder::new()
            .prefix("tilecast-capture")
            .tempdir()
            .map_err(|e| {
                TilecastError::environment(format!("Failed to create scratch directory: {e}"))
            })?;
        let output = scratch
            .path()
            .join(format!("capture.{}", ExportPreset::extension_for_mime(&request.mime_type)));
        let args = recorder_args(request, &output);
        tracing::debug!(args = ?args, "Starting recorder");

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TilecastError::environment(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TilecastError::encoding("Failed to open recorder stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TilecastError::encoding("Failed to capture recorder stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let diagnostics = Arc::new(Mutex::new(String::new()));
        let stderr_task = {
            let diagnostics = Arc::clone(&diagnostics);
            std::thread::spawn(move || {
                let mut output = String::new();
                let mut stderr = stderr;
                let _ = stderr.read_to_string(&mut output);
                if let Ok(mut slot) = diagnostics.lock() {
                    *slot = output;
                }
            })
        };

        let error = Arc::new(Mutex::new(None));
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(FRAME_QUEUE_DEPTH);
        let writer = {
            let error = Arc::clone(&error);
            std::thread::spawn(move || write_frames(stdin, receiver, error))
        };

        tracing::info!(
            pid = child.id(),
            width = request.width,
            height = request.height,
            audio_inputs = request.audio.len(),
            "Recorder started"
        );

        Ok(Box::new(PipeSession {
            child: Some(child),
            sender: Some(sender),
            writer: Some(writer),
            stderr_task: Some(stderr_task),
            error,
            diagnostics,
            frame_len: request.width as usize * request.height as usize * 4,
            dropped_frames: 0,
            output,
            scratch: Some(scratch),
        }))
    }
}

fn write_frames(
    mut stdin: ChildStdin,
    receiver: mpsc::Receiver<Vec<u8>>,
    error: Arc<Mutex<Option<String>>>,
) {
    for frame in receiver {
        if let Err(e) = stdin.write_all(&frame) {
            if let Ok(mut slot) = error.lock() {
                slot.get_or_insert_with(|| format!("recorder input closed: {e}"));
            }
            return;
        }
    }
}

struct PipeSession {
    child: Option<Child>,
    sender: Option<SyncSender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    error: Arc<Mutex<Option<String>>>,
    diagnostics: Arc<Mutex<String>>,
    frame_len: usize,
    dropped_frames: u64,
    output: PathBuf,
    scratch: Option<TempDir>,
}

impl PipeSession {
    fn diagnostics(&self) -> String {
        self.diagnostics
            .lock()
            .map(|d| d.trim().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CaptureSession for PipeSession {
    fn apply_frame_rate(&mut self, fps: f64) -> TilecastResult<f64> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(TilecastError::encoding(format!("Invalid frame rate {fps}")));
        }
        // The pipe carries wall-clock timestamps; rates are quantized to
        // the millihertz precision passed to `-r`.
        Ok((fps.min(MAX_CAPTURE_FPS) * 1000.0).round() / 1000.0)
    }

    fn push_frame(&mut self, frame: &RgbaImage, _timestamp: Duration) -> TilecastResult<()> {
        if frame.as_raw().len() != self.frame_len {
            return Err(TilecastError::encoding("Frame size does not match the capture stream"));
        }
        let Some(sender) = &self.sender else {
            return Err(TilecastError::encoding("Recorder already stopped"));
        };
        match sender.try_send(frame.as_raw().clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped_frames += 1;
                tracing::debug!(dropped = self.dropped_frames, "Recorder busy, frame dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(TilecastError::encoding_with_output(
                "Recorder stopped accepting frames",
                self.diagnostics(),
            )),
        }
    }

    fn take_error(&mut self) -> Option<String> {
        if let Some(message) = self.error.lock().ok().and_then(|mut slot| slot.take()) {
            return Some(message);
        }
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(format!("recorder exited early ({status})")),
            Ok(None) => None,
            Err(e) => Some(format!("recorder status unavailable: {e}")),
        }
    }

    async fn stop(mut self: Box<Self>) -> TilecastResult<Vec<Vec<u8>>> {
        // Closing the channel ends the writer thread, which closes stdin.
        self.sender.take();
        let writer = self.writer.take();
        let stderr_task = self.stderr_task.take();
        let child = self.child.take();
        let status = tokio::task::spawn_blocking(move || {
            if let Some(writer) = writer {
                let _ = writer.join();
            }
            let status = child.map(|mut child| child.wait());
            if let Some(task) = stderr_task {
                let _ = task.join();
            }
            status
        })
        .await
        .map_err(|e| TilecastError::encoding(format!("Recorder shutdown failed: {e}")))?;

        match status {
            Some(Ok(status)) if status.success() => {}
            Some(Ok(status)) => {
                return Err(TilecastError::encoding_with_output(
                    format!("Recorder exited with {status}"),
                    self.diagnostics(),
                ))
            }
            Some(Err(e)) => {
                return Err(TilecastError::encoding(format!("Failed to wait on recorder: {e}")))
            }
            None => return Err(TilecastError::encoding("Recorder was not running")),
        }

        if self.dropped_frames > 0 {
            tracing::warn!(dropped = self.dropped_frames, "Frames dropped while recording");
        }
        let bytes = tokio::fs::read(&self.output).await.map_err(|e| {
            TilecastError::encoding(format!(
                "Failed to read recording {}: {e}",
                self.output.display()
            ))
        })?;
        self.scratch.take();
        Ok(vec![bytes])
    }
}

impl Drop for PipeSession {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(audio: Vec<AudioSource>) -> CaptureRequest {
        CaptureRequest {
            width: 640,
            height: 360,
            fps: 29.97,
            mime_type: "video/mp4;codecs=avc1.42E01E,mp4a.40.2".into(),
            video_bitrate: 8_000_000,
            audio_bitrate: Some(192_000),
            duration_secs: 3.0,
            audio,
        }
    }

    #[test]
    fn test_codec_args_follow_mime() {
        let mp4 = codec_args_for_mime("video/mp4", 8_000_000, Some(192_000));
        assert!(mp4.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(mp4.windows(2).any(|w| w == ["-b:a", "192k"]));

        let vp8 = codec_args_for_mime("video/webm;codecs=vp8,opus", 2_000_000, None);
        assert!(vp8.windows(2).any(|w| w == ["-c:v", "libvpx"]));
        assert!(!vp8.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn test_audio_mix_filter() {
        let sources = vec![
            AudioSource {
                input: "a.mp4".into(),
                start_secs: 0.0,
                gain_db: -6.0,
            },
            AudioSource {
                input: "b.mp3".into(),
                start_secs: 1.5,
                gain_db: 3.0,
            },
        ];
        assert_eq!(
            audio_mix_filter(&sources, 1).unwrap(),
            "[1:a]volume=-6.00dB[a0];[2:a]volume=3.00dB[a1];[a0][a1]amix=inputs=2:duration=longest:normalize=0[aout]"
        );
        assert!(audio_mix_filter(&[], 1).is_none());
    }

    #[test]
    fn test_recorder_args_without_audio() {
        let args = recorder_args(&request(Vec::new()), Path::new("/tmp/out.mp4"));
        assert!(args.windows(2).any(|w| w == ["-s", "640x360"]));
        assert!(args.windows(2).any(|w| w == ["-use_wallclock_as_timestamps", "1"]));
        assert!(args.windows(2).any(|w| w == ["-r", "29.970"]));
        assert!(!args.iter().any(|a| a == "-filter_complex"));
        assert!(!args.iter().any(|a| a == "-c:a"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_recorder_args_seek_audio_to_trim() {
        let args = recorder_args(
            &request(vec![AudioSource {
                input: "clip.mp4".into(),
                start_secs: 2.0,
                gain_db: 0.0,
            }]),
            Path::new("/tmp/out.mp4"),
        );
        assert!(args.windows(2).any(|w| w == ["-ss", "2.000"]));
        assert!(args.windows(2).any(|w| w == ["-map", "[aout]"]));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let runtime = FfmpegPipeRuntime::new("/nonexistent/ffmpeg");
        assert!(!runtime.is_available());
        assert!(!runtime.supports_mime("video/webm"));
    }

    #[tokio::test]
    async fn test_warm_up_fills_encoder_cache() {
        let runtime = FfmpegPipeRuntime::new("/nonexistent/ffmpeg");
        assert!(runtime.encoders.get().is_none());
        runtime.warm_up().await;
        assert_eq!(runtime.encoders.get().map(String::as_str), Some(""));
        assert!(!runtime.is_available());
    }

    #[test]
    fn test_negotiated_rate_is_quantized() {
        let mut session = PipeSession {
            child: None,
            sender: None,
            writer: None,
            stderr_task: None,
            error: Arc::default(),
            diagnostics: Arc::default(),
            frame_len: 4,
            dropped_frames: 0,
            output: PathBuf::from("/tmp/none"),
            scratch: None,
        };
        assert_eq!(session.apply_frame_rate(30000.0 / 1001.0).unwrap(), 29.97);
        assert_eq!(session.apply_frame_rate(240.0).unwrap(), 120.0);
        assert!(session.apply_frame_rate(0.0).is_err());
    }
}
