use std::path::PathBuf;

use image::{Rgba, RgbaImage};
use tilecast_common::config::AppConfig;
use tilecast_project_model::project::{Asset, AssetKind, Project};
use tilecast_render_engine::export::ExportContext;
use tilecast_render_engine::layout::calculate_layout;
use tilecast_render_engine::still::{export_still, PNG_MIME_TYPE};

const COLORS: [[u8; 4]; 4] = [
    [255, 0, 0, 255],
    [0, 255, 0, 255],
    [0, 0, 255, 255],
    [255, 255, 0, 255],
];

fn fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tilecast-it-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("fixture dir should be creatable");
    dir
}

fn solid_png(dir: &PathBuf, name: &str, color: [u8; 4], width: u32, height: u32) -> String {
    let path = dir.join(name);
    RgbaImage::from_pixel(width, height, Rgba(color))
        .save(&path)
        .expect("fixture png should be writable");
    path.display().to_string()
}

fn context() -> ExportContext {
    let mut config = AppConfig::default();
    config.export.still_max_dimension = 512;
    ExportContext::from_config(&config).without_font()
}

fn four_image_project(dir: &PathBuf) -> Project {
    let mut project = Project::new("Four Colors");
    for (index, color) in COLORS.iter().enumerate() {
        // Non-square sources so cover has to crop.
        let src = solid_png(dir, &format!("cell{index}.png"), *color, 40, 24);
        let asset = Asset::new(format!("cell{index}"), AssetKind::Image, src);
        let id = asset.id.clone();
        project.add_asset(asset);
        project.assign(&id, index).expect("cell should exist");
    }
    project
}

fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes)
        .expect("still should decode")
        .to_rgba8()
}

#[tokio::test]
async fn two_by_two_cover_still_fills_every_cell() {
    let dir = fixture_dir("cover");
    let project = four_image_project(&dir);

    let still = export_still(&project, &context()).await.unwrap();
    let layout = calculate_layout(&project.composition, 512).unwrap();

    assert_eq!(still.mime_type, PNG_MIME_TYPE);
    assert_eq!(still.extension, "png");
    assert_eq!((still.width, still.height), (layout.canvas_width, layout.canvas_height));

    let decoded = decode(&still.bytes);
    assert_eq!(decoded.dimensions(), (layout.canvas_width, layout.canvas_height));
    for (index, color) in COLORS.iter().enumerate() {
        let cell = layout.cell_rect(index).unwrap();
        // Cover leaves no letterbox: sample near the short edges as well as the center.
        for (x, y) in [
            cell.center(),
            (cell.x + cell.width / 2.0, cell.y + cell.height * 0.2),
            (cell.x + cell.width * 0.2, cell.y + cell.height / 2.0),
        ] {
            assert_eq!(decoded.get_pixel(x as u32, y as u32).0, *color, "cell {index}");
        }
    }

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn saved_project_renders_identically() {
    let dir = fixture_dir("roundtrip");
    let project = four_image_project(&dir);
    let path = dir.join("project.json");
    project.save(&path).unwrap();
    let loaded = Project::load(&path).unwrap();

    let context = context();
    let original = export_still(&project, &context).await.unwrap();
    let reloaded = export_still(&loaded, &context).await.unwrap();
    assert_eq!(decode(&original.bytes), decode(&reloaded.bytes));

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn missing_asset_leaves_placeholder_and_still_succeeds() {
    let dir = fixture_dir("missing");
    let mut project = four_image_project(&dir);
    let broken = Asset::new(
        "gone",
        AssetKind::Image,
        dir.join("does-not-exist.png").display().to_string(),
    );
    let broken_id = broken.id.clone();
    project.add_asset(broken);
    project.assign(&broken_id, 1).unwrap();

    let still = export_still(&project, &context()).await.unwrap();
    let layout = calculate_layout(&project.composition, 512).unwrap();
    let decoded = decode(&still.bytes);

    let (x, y) = layout.cell_rect(0).unwrap().center();
    assert_eq!(decoded.get_pixel(x as u32, y as u32).0, COLORS[0]);
    let (x, y) = layout.cell_rect(1).unwrap().center();
    assert_ne!(decoded.get_pixel(x as u32, y as u32).0, COLORS[1]);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn video_cell_renders_as_placeholder_in_still() {
    let dir = fixture_dir("video-cell");
    let mut project = four_image_project(&dir);
    let clip = Asset::new(
        "clip",
        AssetKind::Video,
        dir.join("clip.mp4").display().to_string(),
    );
    let clip_id = clip.id.clone();
    project.add_asset(clip);
    project.assign(&clip_id, 2).unwrap();

    let still = export_still(&project, &context()).await.unwrap();
    let layout = calculate_layout(&project.composition, 512).unwrap();
    let decoded = decode(&still.bytes);

    for index in [0, 1, 3] {
        let (x, y) = layout.cell_rect(index).unwrap().center();
        assert_eq!(decoded.get_pixel(x as u32, y as u32).0, COLORS[index]);
    }
    let (x, y) = layout.cell_rect(2).unwrap().center();
    assert_ne!(decoded.get_pixel(x as u32, y as u32).0, COLORS[2]);

    std::fs::remove_dir_all(dir).ok();
}
