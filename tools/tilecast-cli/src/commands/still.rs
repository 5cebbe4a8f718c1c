//! Render a project to a PNG still.

use std::path::PathBuf;

use tilecast_common::config::AppConfig;
use tilecast_project_model::project::Project;
use tilecast_render_engine::export::ExportContext;
use tilecast_render_engine::still::export_still;

pub async fn run(config: &AppConfig, path: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let project =
        Project::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let output_path = output.unwrap_or_else(|| path.with_extension("png"));

    println!("Rendering still for: {}", project.title);
    let context = ExportContext::from_config(config);
    let still = export_still(&project, &context).await?;
    std::fs::write(&output_path, &still.bytes)?;

    println!(
        "Still complete: {} ({}x{}, {} bytes)",
        output_path.display(),
        still.width,
        still.height,
        still.bytes.len()
    );
    Ok(())
}
