//! Show project information.

use std::path::PathBuf;

use tilecast_project_model::project::Project;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let project =
        Project::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let composition = &project.composition;
    let style = &composition.style;

    println!("Project: {}", project.title);
    println!("  ID: {}", project.id);
    println!("  Created: {}", project.created_at);
    println!("  Modified: {}", project.updated_at);
    println!();

    println!("Composition:");
    println!(
        "  Grid: {}x{} ({} cells), aspect {}",
        composition.grid.cols,
        composition.grid.rows,
        composition.grid.cell_count(),
        composition.aspect_ratio
    );
    println!(
        "  Style: gap {} padding {} radius {} border {} {}",
        style.gap, style.padding, style.corner_radius, style.border_width, style.border_color
    );
    if let Err(e) = composition.validate() {
        println!("  [WARN] {e}");
    }
    println!();

    println!("Cells:");
    for binding in project.bindings() {
        let track = binding.track;
        println!(
            "  [{}] {} ({}, {:.1}s usable, {:?}, {})",
            binding.cell_index,
            binding.asset.name,
            binding.asset.kind.as_str(),
            track.usable_duration(),
            track.fit,
            if track.muted {
                "muted".to_string()
            } else {
                format!("{:+.1} dB", track.volume)
            }
        );
    }
    let dangling = project
        .tracks
        .iter()
        .filter(|t| project.asset(&t.asset_id).is_none())
        .count();
    if dangling > 0 {
        println!("  {dangling} track(s) reference missing assets");
    }
    println!();

    println!("Export:");
    println!(
        "  Video path: {}",
        if project.is_video_only() {
            "interactive or batch"
        } else {
            "interactive only"
        }
    );
    println!(
        "  Audio bus: {:+.1} dB{}",
        project.audio.volume,
        if project.audio.muted { " (muted)" } else { "" }
    );

    Ok(())
}
