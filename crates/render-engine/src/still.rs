//! Still export: one composited frame encoded as PNG.

use tilecast_common::error::TilecastResult;
use tilecast_project_model::project::Project;

use crate::compositor::{CellFrames, Compositor, MediaFrame, RenderTarget};
use crate::export::ExportContext;
use crate::layout::calculate_layout;
use crate::media::LoadedMedia;
use crate::surface::Surface;

pub const PNG_MIME_TYPE: &str = "image/png";

/// An encoded still.
#[derive(Debug, Clone)]
pub struct StillImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub extension: String,
    pub width: u32,
    pub height: u32,
}

/// Render the composition once at the still base resolution.
///
/// Image and logo assets are preloaded in parallel; an asset that fails to
/// load leaves its cell as a placeholder. Video cells show a placeholder.
pub async fn export_still(project: &Project, context: &ExportContext) -> TilecastResult<StillImage> {
    let layout = calculate_layout(&project.composition, context.defaults.still_max_dimension)?;
    let mut surface = Surface::allocate(
        layout.canvas_width,
        layout.canvas_height,
        context.defaults.max_surface_pixels,
    )?;

    let media = context
        .loader
        .preload(project, |asset| asset.kind.is_still())
        .await;

    let mut frames = CellFrames::new();
    for binding in project.bindings() {
        if let Some(LoadedMedia::Image(image)) = media.get(&binding.asset.id) {
            frames.insert(
                binding.cell_index,
                MediaFrame::new(image.bitmap.clone(), (image.width, image.height)),
            );
        }
    }

    Compositor::new(RenderTarget::Still)
        .with_font(context.font.clone())
        .render_frame(&mut surface, project, &layout, &frames);

    let bytes = surface.encode_png()?;
    tracing::info!(
        width = layout.canvas_width,
        height = layout.canvas_height,
        cells = frames.len(),
        bytes = bytes.len(),
        "Still exported"
    );
    Ok(StillImage {
        bytes,
        mime_type: PNG_MIME_TYPE.to_string(),
        extension: "png".to_string(),
        width: layout.canvas_width,
        height: layout.canvas_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tilecast_common::config::AppConfig;
    use tilecast_common::error::TilecastError;
    use tilecast_project_model::project::{Asset, AssetKind};

    fn context(still_max: u32) -> ExportContext {
        let mut config = AppConfig::default();
        config.export.still_max_dimension = still_max;
        ExportContext::from_config(&config).without_font()
    }

    #[tokio::test]
    async fn test_oversized_surface_is_environment_error() {
        let mut config = AppConfig::default();
        config.export.max_surface_pixels = 1_000;
        let context = ExportContext::from_config(&config).without_font();
        let err = export_still(&Project::new("big"), &context).await.unwrap_err();
        assert!(matches!(err, TilecastError::Environment { .. }));
    }

    #[tokio::test]
    async fn test_padding_too_large_is_size_error() {
        let mut project = Project::new("tight");
        project.composition.style.padding = 200.0;
        let err = export_still(&project, &context(256)).await.unwrap_err();
        assert!(matches!(err, TilecastError::Size { .. }));
    }

    #[tokio::test]
    async fn test_image_pixels_reach_the_png() {
        let path = std::env::temp_dir().join("tilecast_still_blue.png");
        RgbaImage::from_pixel(16, 16, Rgba([0, 0, 255, 255]))
            .save(&path)
            .unwrap();
        let mut project = Project::new("blue");
        let asset = Asset::new("blue", AssetKind::Image, path.display().to_string());
        let id = asset.id.clone();
        project.add_asset(asset);
        project.assign(&id, 3).unwrap();

        let still = export_still(&project, &context(256)).await.unwrap();
        let decoded = image::load_from_memory(&still.bytes).unwrap().to_rgba8();
        let layout = calculate_layout(&project.composition, 256).unwrap();
        let (cx, cy) = layout.cell_rect(3).unwrap().center();
        assert_eq!(decoded.get_pixel(cx as u32, cy as u32).0, [0, 0, 255, 255]);
        std::fs::remove_file(path).ok();
    }
}
