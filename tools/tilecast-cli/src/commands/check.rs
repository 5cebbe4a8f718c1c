//! Check external tool availability.

use std::path::Path;

use tilecast_common::config::AppConfig;
use tilecast_render_engine::font::FontFace;
use tilecast_render_engine::interactive::{select_mime, CaptureRuntime, MIME_CANDIDATES};
use tilecast_render_engine::recorder::FfmpegPipeRuntime;
use tokio::process::Command;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Tilecast System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg_ok = report_tool("ffmpeg", &config.tools.ffmpeg).await;
    let ffprobe_ok = report_tool("ffprobe", &config.tools.ffprobe).await;

    match FontFace::discover(config.tools.font.as_deref()) {
        Some(face) => println!("[OK] Font: {}", face.path().display()),
        None => println!("[WARN] Font: none found (text overlays disabled)"),
    }

    println!();
    let runtime = FfmpegPipeRuntime::new(&config.tools.ffmpeg);
    runtime.warm_up().await;
    if runtime.is_available() {
        println!("Capture runtime: {}", runtime.name());
        for mime in MIME_CANDIDATES {
            let mark = if runtime.supports_mime(mime) { "OK" } else { "--" };
            println!("  [{mark}] {mime}");
        }
        match select_mime(&runtime) {
            Some(mime) => println!("  Interactive exports will use {mime}"),
            None => println!("  [WARN] No supported container; interactive exports will fail"),
        }
    } else {
        println!("[WARN] Capture runtime unavailable; only video-only projects can export");
    }

    println!();
    if ffmpeg_ok && ffprobe_ok {
        println!("All required tools are available. Tilecast is ready.");
    } else {
        println!("Some required tools are missing. Install ffmpeg or set tools paths in the config.");
    }

    Ok(())
}

async fn report_tool(label: &str, binary: &Path) -> bool {
    match Command::new(binary).arg("-version").output().await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout.lines().next().unwrap_or_default().trim().to_string();
            println!("[OK] {label}: {version}");
            true
        }
        Ok(output) => {
            println!("[FAIL] {label}: exited with {}", output.status);
            false
        }
        Err(e) => {
            println!("[FAIL] {label}: {} ({e})", binary.display());
            false
        }
    }
}
