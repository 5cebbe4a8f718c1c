//! Real-time video playback for the live capture loop.
//!
//! Each [`VideoPlayback`] runs an ffmpeg decoder paced at native speed
//! (`-re`) that loops the source and writes raw RGBA frames to a pipe. A
//! reader thread keeps only the most recent frame, which the render loop
//! samples whenever it draws.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use image::RgbaImage;
use tilecast_common::error::{TilecastError, TilecastResult};

use crate::media::VideoHandle;

#[derive(Debug)]
struct SharedFrame {
    frame: Arc<RgbaImage>,
    frames_decoded: u64,
}

#[derive(Debug)]
struct Decoder {
    child: Child,
    reader: JoinHandle<()>,
    started_at_secs: f64,
}

/// One video source playing in real time.
#[derive(Debug)]
pub struct VideoPlayback {
    ffmpeg: PathBuf,
    handle: VideoHandle,
    start_secs: f64,
    position_secs: f64,
    shared: Arc<Mutex<SharedFrame>>,
    decoder: Option<Decoder>,
}

impl VideoPlayback {
    /// Prepare playback starting at `start_secs` (the track's trim-in).
    /// Until [`play`](Self::play) is called the poster frame is shown.
    pub fn new(ffmpeg: impl Into<PathBuf>, handle: VideoHandle, start_secs: f64) -> Self {
        let start_secs = start_secs.max(0.0);
        let shared = Arc::new(Mutex::new(SharedFrame {
            frame: Arc::clone(&handle.poster),
            frames_decoded: 0,
        }));
        Self {
            ffmpeg: ffmpeg.into(),
            handle,
            start_secs,
            position_secs: start_secs,
            shared,
            decoder: None,
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.handle.asset_id
    }

    pub fn is_playing(&self) -> bool {
        self.decoder.is_some()
    }

    /// Media time of the next frame to be decoded.
    pub fn position_secs(&self) -> f64 {
        match &self.decoder {
            Some(decoder) => decoder.started_at_secs + self.decoded_secs(),
            None => self.position_secs,
        }
    }

    /// Start (or resume) decoding from the current position.
    pub fn play(&mut self) -> TilecastResult<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        let (width, height) = (self.handle.decode_width, self.handle.decode_height);
        let frame_len = width as usize * height as usize * 4;
        let seek = self.position_secs;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-re"])
            .args(["-stream_loop", "-1", "-ss"])
            .arg(format!("{seek:.3}"))
            .args(["-i", &self.handle.input, "-an", "-vf"])
            .arg(format!("scale={width}:{height}"))
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                TilecastError::asset_load(
                    &self.handle.asset_id,
                    format!("Failed to start playback decoder: {e}"),
                )
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TilecastError::asset_load(&self.handle.asset_id, "Playback decoder has no stdout")
        })?;

        {
            let mut shared = lock(&self.shared);
            shared.frames_decoded = 0;
        }
        let shared = Arc::clone(&self.shared);
        let reader = std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut buffer = vec![0u8; frame_len];
                if reader.read_exact(&mut buffer).is_err() {
                    break;
                }
                let Some(frame) = RgbaImage::from_raw(width, height, buffer) else {
                    break;
                };
                let mut shared = lock(&shared);
                shared.frame = Arc::new(frame);
                shared.frames_decoded += 1;
            }
        });

        tracing::debug!(
            asset_id = %self.handle.asset_id,
            start_secs = seek,
            width,
            height,
            "Playback started"
        );
        self.decoder = Some(Decoder {
            child,
            reader,
            started_at_secs: seek,
        });
        Ok(())
    }

    /// Stop decoding and remember the position reached.
    pub fn pause(&mut self) {
        let Some(mut decoder) = self.decoder.take() else {
            return;
        };
        self.position_secs = decoder.started_at_secs + self.decoded_secs();
        if let Some(duration) = self.handle.duration_secs.filter(|d| *d > 0.0) {
            self.position_secs %= duration;
        }
        // Errors here mean the decoder already exited.
        let _ = decoder.child.kill();
        let _ = decoder.child.wait();
        let _ = decoder.reader.join();
    }

    /// Seek back to the start position and show the poster frame.
    pub fn rewind(&mut self) {
        let was_playing = self.is_playing();
        self.pause();
        self.position_secs = self.start_secs;
        {
            let mut shared = lock(&self.shared);
            shared.frame = Arc::clone(&self.handle.poster);
            shared.frames_decoded = 0;
        }
        if was_playing {
            if let Err(e) = self.play() {
                tracing::debug!(error = %e, "Playback did not restart after rewind");
            }
        }
    }

    /// Most recently decoded frame.
    pub fn current_frame(&self) -> Arc<RgbaImage> {
        Arc::clone(&lock(&self.shared).frame)
    }

    /// Intrinsic size of the source.
    pub fn intrinsic_size(&self) -> (u32, u32) {
        (self.handle.width, self.handle.height)
    }

    fn decoded_secs(&self) -> f64 {
        let fps = self.handle.fps.filter(|f| *f > 0.0).unwrap_or(30.0);
        lock(&self.shared).frames_decoded as f64 / fps
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }
}

impl Drop for VideoPlayback {
    fn drop(&mut self) {
        self.pause();
    }
}

fn lock(shared: &Mutex<SharedFrame>) -> std::sync::MutexGuard<'_, SharedFrame> {
    // A poisoned lock only means the reader thread panicked mid-update.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn handle() -> VideoHandle {
        VideoHandle {
            asset_id: "asset_1".to_string(),
            input: "/nonexistent/clip.mp4".to_string(),
            width: 640,
            height: 360,
            duration_secs: Some(4.0),
            fps: Some(30.0),
            audio_bitrate: None,
            has_audio: false,
            decode_width: 64,
            decode_height: 36,
            poster: Arc::new(RgbaImage::from_pixel(64, 36, Rgba([1, 2, 3, 255]))),
        }
    }

    #[test]
    fn test_poster_is_shown_before_play() {
        let playback = VideoPlayback::new("ffmpeg", handle(), 1.5);
        assert!(!playback.is_playing());
        assert_eq!(playback.current_frame().get_pixel(0, 0).0, [1, 2, 3, 255]);
        assert_eq!(playback.position_secs(), 1.5);
    }

    #[test]
    fn test_missing_decoder_binary_fails_to_play() {
        let mut playback = VideoPlayback::new("/nonexistent/ffmpeg", handle(), 0.0);
        let err = playback.play().unwrap_err();
        assert!(err.is_recoverable());
        assert!(!playback.is_playing());
    }

    #[test]
    fn test_pause_and_rewind_are_idempotent_when_stopped() {
        let mut playback = VideoPlayback::new("ffmpeg", handle(), 0.75);
        playback.pause();
        playback.rewind();
        assert_eq!(playback.position_secs(), 0.75);
        assert!(!playback.is_playing());
    }
}
