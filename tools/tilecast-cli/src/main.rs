//! Tilecast CLI: generate, render, and inspect grid collages.
//!
//! Usage:
//!   tilecast generate [OPTIONS]      Stitch a directory of .mp4 clips into one video
//!   tilecast still <PROJECT>         Render a project to PNG
//!   tilecast export <PROJECT>        Render a project to video
//!   tilecast info <PROJECT>          Show project information
//!   tilecast check                   Check external tool availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilecast_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "tilecast",
    about = "Tiled video and image collages",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stitch every .mp4 clip in a directory into one grid video
    Generate {
        /// Output aspect ratio as W:H (default: grid columns:rows)
        #[arg(long)]
        aspect: Option<String>,

        /// Long edge of the output in pixels
        #[arg(long)]
        max_dimension: Option<u32>,

        /// Output file name, written into the input directory
        #[arg(short, long)]
        output: Option<String>,

        /// Directory holding the clips
        #[arg(long)]
        input_dir: Option<PathBuf>,
    },

    /// Render a project to a PNG still
    Still {
        /// Path to the project JSON
        path: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a project to video
    Export {
        /// Path to the project JSON
        path: PathBuf,

        /// Output file path (extension follows the produced container)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target frame rate
        #[arg(long)]
        fps: Option<f64>,

        /// Target duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Long edge of the output in pixels
        #[arg(long)]
        max_dimension: Option<u32>,

        /// Skip the live capture runtime and use the ffmpeg filter graph
        #[arg(long)]
        headless: bool,
    },

    /// Show project information
    Info {
        /// Path to the project JSON
        path: PathBuf,
    },

    /// Check external tool availability
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    tilecast_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Generate {
            aspect,
            max_dimension,
            output,
            input_dir,
        } => {
            let options = commands::generate::GenerateOptions {
                input_dir: input_dir.unwrap_or_else(|| config.generator.input_dir.clone()),
                output_name: output.unwrap_or_else(|| config.generator.output_name.clone()),
                aspect,
                max_dimension,
            };
            commands::generate::run(&config, options).await
        }
        Commands::Still { path, output } => commands::still::run(&config, path, output).await,
        Commands::Export {
            path,
            output,
            fps,
            duration,
            max_dimension,
            headless,
        } => {
            let settings = tilecast_project_model::export::ExportSettings {
                fps,
                duration_secs: duration,
                max_dimension,
                ..Default::default()
            };
            commands::export::run(&config, path, output, settings, headless).await
        }
        Commands::Info { path } => commands::info::run(path),
        Commands::Check => commands::check::run(&config).await,
    }
}
