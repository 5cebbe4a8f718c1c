//! Project metadata and composition types.
//!
//! A project is the top-level container that ties together imported assets,
//! the grid composition, and the per-cell tracks that bind assets to cells.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Current schema version written by [`Project::new`].
pub const PROJECT_VERSION: &str = "1.0";

/// Lower bound of the per-track volume range (dB).
pub const MIN_VOLUME_DB: f64 = -24.0;

/// Upper bound of the per-track volume range (dB).
pub const MAX_VOLUME_DB: f64 = 12.0;

/// Top-level project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique project identifier.
    pub id: String,

    /// Human-readable project title.
    pub title: String,

    /// Imported media, in import order.
    #[serde(default)]
    pub assets: Vec<Asset>,

    /// Grid geometry and styling.
    pub composition: Composition,

    /// Per-cell asset bindings, in creation order.
    #[serde(default)]
    pub tracks: Vec<Track>,

    /// Master audio settings applied to the mixed export audio.
    #[serde(default)]
    pub audio: AudioBusSettings,

    /// Creation timestamp (ISO 8601).
    pub created_at: String,

    /// Last modified timestamp (ISO 8601).
    pub updated_at: String,

    /// Schema version.
    pub version: String,
}

/// Kind of imported media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Video,
    Image,
    Logo,
    Audio,
}

impl AssetKind {
    /// Whether the asset has pixels to draw (audio is drawn as a placeholder).
    pub fn is_visual(self) -> bool {
        !matches!(self, Self::Audio)
    }

    /// Whether the asset decodes to a still bitmap.
    pub fn is_still(self) -> bool {
        matches!(self, Self::Image | Self::Logo)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Logo => "logo",
            Self::Audio => "audio",
        }
    }
}

/// An imported media reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: AssetKind,

    /// URL, `data:` URI, `file://` URL, or filesystem path.
    pub src: String,

    #[serde(default)]
    pub size_bytes: u64,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    /// Duration in seconds.
    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default)]
    pub fps: Option<f64>,

    /// Audio bitrate in bits/sec.
    #[serde(default)]
    pub audio_bitrate: Option<u64>,

    #[serde(default)]
    pub metadata: Option<AssetMetadata>,

    pub created_at: String,
}

/// Free-form descriptive metadata attached to generated media.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssetMetadata {
    /// Generator tool tag(s).
    pub ai_tools: Vec<String>,

    pub prompt: Option<String>,

    pub prompt_format: Option<String>,

    pub tags: Vec<String>,
}

impl AssetMetadata {
    /// Whether there is anything worth drawing in an overlay.
    pub fn has_content(&self) -> bool {
        !self.ai_tools.is_empty()
            || self.prompt.as_deref().is_some_and(|p| !p.trim().is_empty())
            || self.prompt_format.as_deref().is_some_and(|f| !f.trim().is_empty())
            || !self.tags.is_empty()
    }
}

impl Asset {
    /// Create an asset with no intrinsic metadata.
    pub fn new(name: impl Into<String>, kind: AssetKind, src: impl Into<String>) -> Self {
        Self {
            id: generate_id("asset"),
            name: name.into(),
            kind,
            src: src.into(),
            size_bytes: 0,
            width: None,
            height: None,
            duration: None,
            fps: None,
            audio_bitrate: None,
            metadata: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Stored intrinsic size, if both axes are known and non-zero.
    pub fn stored_dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

/// Grid geometry and styling of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub id: String,

    pub title: String,

    /// `"W:H"`; malformed values fall back to 1:1 at layout time.
    pub aspect_ratio: String,

    pub grid: Grid,

    pub style: CompositionStyle,

    /// Fill of the padded inner area, drawn over the canvas background.
    #[serde(default)]
    pub background_color: Option<String>,
}

/// Grid dimensions plus the row-major cell list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
    pub cells: Vec<GridCell>,
}

/// One grid position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub id: String,
    pub row: u32,
    pub col: u32,
}

/// Visual styling in output pixels (opacity in `[0, 1]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositionStyle {
    pub gap: f64,
    pub padding: f64,
    pub corner_radius: f64,
    pub border_width: f64,
    /// Hex color, with or without a leading `#`.
    pub border_color: String,
    pub border_opacity: f64,
    /// Canvas background as hex color.
    pub background_color: String,
}

impl Default for CompositionStyle {
    fn default() -> Self {
        Self {
            gap: 12.0,
            padding: 24.0,
            corner_radius: 16.0,
            border_width: 0.0,
            border_color: "#ffffff".to_string(),
            border_opacity: 1.0,
            background_color: "#111111".to_string(),
        }
    }
}

impl Grid {
    /// Build a row-major grid of `rows x cols` cells.
    pub fn new(rows: u32, cols: u32) -> Self {
        let mut cells = Vec::with_capacity((rows * cols) as usize);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(GridCell {
                    id: format!("cell-{row}-{col}"),
                    row,
                    col,
                });
            }
        }
        Self { rows, cols, cells }
    }

    pub fn cell_count(&self) -> usize {
        (self.rows as usize) * (self.cols as usize)
    }

    /// `(row, col)` of a row-major cell index.
    pub fn position(&self, index: usize) -> Option<(u32, u32)> {
        if index >= self.cell_count() || self.cols == 0 {
            return None;
        }
        let cols = self.cols as usize;
        Some(((index / cols) as u32, (index % cols) as u32))
    }

    /// Smallest grid that holds `count` cells while staying close to square.
    pub fn near_square(count: usize) -> Self {
        let count = count.max(1);
        let cols = (count as f64).sqrt().ceil() as u32;
        let rows = (count as u32).div_ceil(cols);
        Self::new(rows, cols)
    }
}

impl Composition {
    /// Square composition with the default style.
    pub fn new(title: impl Into<String>, rows: u32, cols: u32) -> Self {
        Self {
            id: generate_id("composition"),
            title: title.into(),
            aspect_ratio: "1:1".to_string(),
            grid: Grid::new(rows, cols),
            style: CompositionStyle::default(),
            background_color: None,
        }
    }

    /// Rebuild the cell list for new grid dimensions.
    pub fn resize_grid(&mut self, rows: u32, cols: u32) {
        self.grid = Grid::new(rows, cols);
    }

    /// Check the row-major cell invariant and style ranges.
    pub fn validate(&self) -> Result<(), ProjectError> {
        let grid = &self.grid;
        if grid.rows == 0 || grid.cols == 0 {
            return Err(ProjectError::ValidationError {
                message: format!("grid must have at least one cell ({}x{})", grid.rows, grid.cols),
            });
        }
        if grid.cells.len() != grid.cell_count() {
            return Err(ProjectError::ValidationError {
                message: format!(
                    "grid has {} cells, expected {}",
                    grid.cells.len(),
                    grid.cell_count()
                ),
            });
        }
        for (index, cell) in grid.cells.iter().enumerate() {
            if grid.position(index) != Some((cell.row, cell.col)) {
                return Err(ProjectError::ValidationError {
                    message: format!(
                        "cell {index} ({}) is at row {} col {}, not in row-major order",
                        cell.id, cell.row, cell.col
                    ),
                });
            }
        }
        let style = &self.style;
        for (name, value) in [
            ("gap", style.gap),
            ("padding", style.padding),
            ("cornerRadius", style.corner_radius),
            ("borderWidth", style.border_width),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ProjectError::ValidationError {
                    message: format!("style.{name} must be a non-negative number, got {value}"),
                });
            }
        }
        if !(0.0..=1.0).contains(&style.border_opacity) {
            return Err(ProjectError::ValidationError {
                message: format!(
                    "style.borderOpacity must be within [0, 1], got {}",
                    style.border_opacity
                ),
            });
        }
        Ok(())
    }
}

/// How an asset is placed in its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the cell, cropping overflow.
    #[default]
    Cover,
    /// Fit entirely inside the cell.
    Contain,
}

/// Binding of one asset to one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,

    pub asset_id: String,

    pub cell_index: usize,

    /// Trim in point (seconds).
    #[serde(default)]
    pub trim_in: f64,

    /// Trim out point (seconds).
    #[serde(default)]
    pub trim_out: f64,

    /// Usable length of the asset (seconds).
    #[serde(default)]
    pub duration: f64,

    /// Gain in dB, within [`MIN_VOLUME_DB`]..=[`MAX_VOLUME_DB`].
    #[serde(default)]
    pub volume: f64,

    #[serde(default)]
    pub muted: bool,

    #[serde(default)]
    pub fit: FitMode,

    /// Pixel offset applied after centering.
    #[serde(default)]
    pub pan_x: f64,

    #[serde(default)]
    pub pan_y: f64,

    /// Multiplier applied on top of the fit scale.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Track {
    /// Create an untrimmed, untransformed track for `asset` in `cell_index`.
    pub fn new(asset: &Asset, cell_index: usize) -> Self {
        let duration = asset.duration.unwrap_or(0.0).max(0.0);
        Self {
            id: generate_id("track"),
            asset_id: asset.id.clone(),
            cell_index,
            trim_in: 0.0,
            trim_out: duration,
            duration,
            volume: 0.0,
            muted: false,
            fit: FitMode::Cover,
            pan_x: 0.0,
            pan_y: 0.0,
            scale: 1.0,
        }
    }

    /// Set trim points, clamped to `0 <= in <= out <= duration`.
    pub fn set_trim(&mut self, trim_in: f64, trim_out: f64) {
        let duration = self.duration.max(0.0);
        let trim_in = trim_in.clamp(0.0, duration);
        self.trim_in = trim_in;
        self.trim_out = trim_out.clamp(trim_in, duration);
    }

    /// Set gain, clamped to the supported range.
    pub fn set_volume(&mut self, volume_db: f64) {
        self.volume = volume_db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
    }

    /// Seconds between trim in and trim out.
    pub fn usable_duration(&self) -> f64 {
        (self.trim_out - self.trim_in).max(0.0)
    }

    /// Effective gain in dB, or `None` when the track is silent.
    pub fn gain_db(&self) -> Option<f64> {
        if self.muted {
            None
        } else {
            Some(self.volume.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB))
        }
    }
}

/// Master audio settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioBusSettings {
    /// Master gain in dB.
    pub volume: f64,
    pub muted: bool,
}

impl Default for AudioBusSettings {
    fn default() -> Self {
        Self {
            volume: 0.0,
            muted: false,
        }
    }
}

impl AudioBusSettings {
    /// Combine a track gain with the master gain; `None` when silent.
    pub fn mix_gain_db(&self, track: &Track) -> Option<f64> {
        if self.muted {
            return None;
        }
        track
            .gain_db()
            .map(|gain| gain + self.volume.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB))
    }
}

/// A track resolved against its asset.
#[derive(Debug, Clone, Copy)]
pub struct CellBinding<'a> {
    pub cell_index: usize,
    pub track: &'a Track,
    pub asset: &'a Asset,
}

impl Project {
    /// Create an empty project with a 2x2 square composition.
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: generate_id("project"),
            composition: Composition::new(title.clone(), 2, 2),
            title,
            assets: Vec::new(),
            tracks: Vec::new(),
            audio: AudioBusSettings::default(),
            created_at: now.clone(),
            updated_at: now,
            version: PROJECT_VERSION.to_string(),
        }
    }

    /// Load a project from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save the project as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.id == id)
    }

    /// The track bound to `cell_index`; the first one in list order wins.
    pub fn track_for_cell(&self, cell_index: usize) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|track| track.cell_index == cell_index)
    }

    /// Track and asset for a cell, or `None` when empty or the asset is gone.
    pub fn binding(&self, cell_index: usize) -> Option<CellBinding<'_>> {
        let track = self.track_for_cell(cell_index)?;
        let asset = self.asset(&track.asset_id)?;
        Some(CellBinding {
            cell_index,
            track,
            asset,
        })
    }

    /// Resolved bindings for every populated cell, in row-major order.
    pub fn bindings(&self) -> Vec<CellBinding<'_>> {
        (0..self.composition.grid.cell_count())
            .filter_map(|index| self.binding(index))
            .collect()
    }

    /// The binding whose asset drives implicit export timing: the populated
    /// cell with the lowest index.
    pub fn reference_binding(&self) -> Option<CellBinding<'_>> {
        self.bindings().into_iter().next()
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.push(asset);
        self.touch();
    }

    /// Remove an asset. Tracks that reference it are left in place and
    /// render as empty cells.
    pub fn remove_asset(&mut self, id: &str) -> Option<Asset> {
        let index = self.assets.iter().position(|asset| asset.id == id)?;
        self.touch();
        Some(self.assets.remove(index))
    }

    /// Bind an asset to a cell, replacing whatever was there.
    pub fn assign(&mut self, asset_id: &str, cell_index: usize) -> Result<&Track, ProjectError> {
        if cell_index >= self.composition.grid.cell_count() {
            return Err(ProjectError::ValidationError {
                message: format!(
                    "cell {cell_index} is outside the {}x{} grid",
                    self.composition.grid.rows, self.composition.grid.cols
                ),
            });
        }
        let asset = self
            .asset(asset_id)
            .ok_or_else(|| ProjectError::ValidationError {
                message: format!("unknown asset {asset_id}"),
            })?;
        let track = Track::new(asset, cell_index);
        self.tracks.retain(|t| t.cell_index != cell_index);
        self.tracks.push(track);
        self.touch();
        Ok(&self.tracks[self.tracks.len() - 1])
    }

    /// Resize the grid, dropping tracks that no longer have a cell.
    pub fn set_grid(&mut self, rows: u32, cols: u32) {
        self.composition.resize_grid(rows, cols);
        let cell_count = self.composition.grid.cell_count();
        self.tracks.retain(|track| track.cell_index < cell_count);
        self.touch();
    }

    /// Whether every populated cell holds a video asset.
    pub fn is_video_only(&self) -> bool {
        let bindings = self.bindings();
        !bindings.is_empty()
            && bindings
                .iter()
                .all(|binding| binding.asset.kind == AssetKind::Video)
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}

/// Generate a prefixed identifier without an external UUID dependency.
pub fn generate_id(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{nanos:016x}-{seq:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn project_with_assets(count: usize) -> Project {
        let mut project = Project::new("Test");
        for i in 0..count {
            let mut asset = Asset::new(format!("clip{i}"), AssetKind::Video, format!("/tmp/{i}.mp4"));
            asset.duration = Some(4.0);
            project.add_asset(asset);
        }
        project
    }

    #[test]
    fn test_project_creation() {
        let project = Project::new("Test Collage");
        assert_eq!(project.title, "Test Collage");
        assert_eq!(project.composition.grid.cells.len(), 4);
        assert!(project.composition.validate().is_ok());
        assert_eq!(project.version, PROJECT_VERSION);
    }

    #[test]
    fn test_project_serialization_uses_camel_case() {
        let mut project = project_with_assets(1);
        let asset_id = project.assets[0].id.clone();
        project.assign(&asset_id, 0).unwrap();

        let json = serde_json::to_string_pretty(&project).unwrap();
        assert!(json.contains("\"assetId\""));
        assert!(json.contains("\"cellIndex\""));
        assert!(json.contains("\"type\": \"video\""));

        let parsed: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, project);
    }

    #[test]
    fn test_grid_is_row_major() {
        let grid = Grid::new(2, 3);
        assert_eq!(grid.cells.len(), 6);
        for (i, cell) in grid.cells.iter().enumerate() {
            assert_eq!(cell.row, (i / 3) as u32);
            assert_eq!(cell.col, (i % 3) as u32);
        }
        assert_eq!(grid.position(4), Some((1, 1)));
        assert_eq!(grid.position(6), None);
    }

    #[test]
    fn test_near_square_grid() {
        let cases = [(1, 1, 1), (2, 1, 2), (3, 2, 2), (4, 2, 2), (5, 2, 3), (7, 3, 3), (10, 3, 4)];
        for (count, rows, cols) in cases {
            let grid = Grid::near_square(count);
            assert_eq!((grid.rows, grid.cols), (rows, cols), "count={count}");
            assert!(grid.cell_count() >= count);
        }
    }

    #[test]
    fn test_validate_rejects_bad_cells() {
        let mut composition = Composition::new("c", 2, 2);
        composition.grid.cells.swap(0, 1);
        assert!(composition.validate().is_err());

        let mut composition = Composition::new("c", 2, 2);
        composition.grid.cells.pop();
        assert!(composition.validate().is_err());

        let mut composition = Composition::new("c", 2, 2);
        composition.style.gap = -1.0;
        assert!(composition.validate().is_err());
    }

    #[test]
    fn test_first_track_wins_for_conflicting_cells() {
        let mut project = project_with_assets(2);
        let first = Track::new(&project.assets[0], 1);
        let second = Track::new(&project.assets[1], 1);
        project.tracks = vec![first.clone(), second];

        assert_eq!(project.track_for_cell(1).unwrap().id, first.id);
        assert_eq!(project.bindings().len(), 1);
    }

    #[test]
    fn test_dangling_asset_reference_is_an_empty_cell() {
        let mut project = project_with_assets(1);
        let asset_id = project.assets[0].id.clone();
        project.assign(&asset_id, 0).unwrap();
        project.remove_asset(&asset_id);

        assert!(project.track_for_cell(0).is_some());
        assert!(project.binding(0).is_none());
        assert!(project.reference_binding().is_none());
    }

    #[test]
    fn test_assign_replaces_cell_and_rejects_out_of_range() {
        let mut project = project_with_assets(2);
        let a = project.assets[0].id.clone();
        let b = project.assets[1].id.clone();
        project.assign(&a, 2).unwrap();
        project.assign(&b, 2).unwrap();
        assert_eq!(project.tracks.len(), 1);
        assert_eq!(project.track_for_cell(2).unwrap().asset_id, b);
        assert!(project.assign(&a, 4).is_err());
        assert!(project.assign("missing", 0).is_err());
    }

    #[test]
    fn test_shrinking_grid_drops_tracks() {
        let mut project = project_with_assets(1);
        let a = project.assets[0].id.clone();
        project.assign(&a, 3).unwrap();
        project.assign(&a, 0).unwrap();
        project.set_grid(1, 2);
        assert_eq!(project.tracks.len(), 1);
        assert_eq!(project.tracks[0].cell_index, 0);
    }

    #[test]
    fn test_reference_binding_is_lowest_populated_cell() {
        let mut project = project_with_assets(2);
        let a = project.assets[0].id.clone();
        let b = project.assets[1].id.clone();
        project.assign(&a, 3).unwrap();
        project.assign(&b, 1).unwrap();
        assert_eq!(project.reference_binding().unwrap().asset.id, b);
    }

    #[test]
    fn test_track_clamps() {
        let project = project_with_assets(1);
        let mut track = Track::new(&project.assets[0], 0);
        track.set_trim(3.0, 1.0);
        assert_eq!((track.trim_in, track.trim_out), (3.0, 3.0));
        track.set_trim(-1.0, 10.0);
        assert_eq!((track.trim_in, track.trim_out), (0.0, 4.0));
        assert!((track.usable_duration() - 4.0).abs() < 1e-9);

        track.set_volume(40.0);
        assert_eq!(track.volume, MAX_VOLUME_DB);
        track.muted = true;
        assert_eq!(track.gain_db(), None);
    }

    #[test]
    fn test_audio_bus_gain() {
        let project = project_with_assets(1);
        let mut track = Track::new(&project.assets[0], 0);
        track.set_volume(-6.0);
        let bus = AudioBusSettings {
            volume: 3.0,
            muted: false,
        };
        assert_eq!(bus.mix_gain_db(&track), Some(-3.0));
        let muted_bus = AudioBusSettings {
            volume: 0.0,
            muted: true,
        };
        assert_eq!(muted_bus.mix_gain_db(&track), None);
    }

    #[test]
    fn test_project_save_and_load() {
        let path = std::env::temp_dir()
            .join("tilecast_test_project")
            .join("project.json");
        let _ = std::fs::remove_file(&path);

        let mut project = project_with_assets(1);
        project.assets[0].metadata = Some(AssetMetadata {
            ai_tools: vec!["sora".to_string()],
            prompt: Some("a cat".to_string()),
            prompt_format: Some("text".to_string()),
            tags: vec!["pets".to_string()],
        });
        project.save(&path).unwrap();

        let loaded = Project::load(&path).unwrap();
        assert_eq!(loaded, project);
        assert!(loaded.assets[0].metadata.as_ref().unwrap().has_content());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_video_only_detection() {
        let mut project = project_with_assets(1);
        assert!(!project.is_video_only());
        let a = project.assets[0].id.clone();
        project.assign(&a, 0).unwrap();
        assert!(project.is_video_only());

        let image = Asset::new("still", AssetKind::Image, "/tmp/a.png");
        let image_id = image.id.clone();
        project.add_asset(image);
        project.assign(&image_id, 1).unwrap();
        assert!(!project.is_video_only());
    }

    proptest! {
        #[test]
        fn prop_grid_cells_are_row_major(rows in 0u32..12, cols in 0u32..12) {
            let grid = Grid::new(rows, cols);
            prop_assert_eq!(grid.cells.len(), grid.cell_count());
            for (index, cell) in grid.cells.iter().enumerate() {
                prop_assert_eq!(grid.position(index), Some((cell.row, cell.col)));
                prop_assert_eq!(index, (cell.row * cols + cell.col) as usize);
            }
            prop_assert_eq!(grid.position(grid.cell_count()), None);
        }

        #[test]
        fn prop_near_square_holds_every_clip(count in 0usize..400) {
            let grid = Grid::near_square(count);
            prop_assert!(grid.cell_count() >= count.max(1));
            prop_assert!(grid.rows <= grid.cols);
            // dropping a row would no longer fit
            prop_assert!(((grid.rows - 1) * grid.cols) < count.max(1) as u32);
        }

        #[test]
        fn prop_shrinking_grid_drops_out_of_range_tracks(
            cells in 1usize..9,
            rows in 1u32..4,
            cols in 1u32..4,
        ) {
            let mut project = Project::new("Resize");
            project.set_grid(3, 3);
            for index in 0..cells {
                let asset = Asset::new(format!("clip{index}"), AssetKind::Video, "/tmp/a.mp4");
                let id = asset.id.clone();
                project.add_asset(asset);
                project.assign(&id, index).unwrap();
            }
            project.set_grid(rows, cols);
            let count = project.composition.grid.cell_count();
            prop_assert!(project.tracks.iter().all(|t| t.cell_index < count));
            prop_assert_eq!(project.tracks.len(), cells.min(count));
        }
    }
}
