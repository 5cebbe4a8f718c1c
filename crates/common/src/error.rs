//! Error types shared across Tilecast crates.

use std::path::PathBuf;

/// Top-level error type for Tilecast operations.
///
/// `AssetLoad` is the only non-fatal category: exporters log it and render
/// the affected cell as a placeholder. Every other variant aborts the export.
#[derive(Debug, thiserror::Error)]
pub enum TilecastError {
    /// A required runtime capability (raster surface, recorder, encoder) is absent.
    #[error("Environment error: {message}")]
    Environment { message: String },

    /// Composition geometry resolved to a non-positive drawable area.
    #[error("Size error: {message}")]
    Size { message: String },

    #[error("Asset load error ({asset_id}): {message}")]
    AssetLoad { asset_id: String, message: String },

    #[error("Probe error for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Encoding error: {message}")]
    Encoding {
        message: String,
        /// Encoder output or the recorder's underlying error, when available.
        diagnostics: Option<String>,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Project error: {message}")]
    Project { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using TilecastError.
pub type TilecastResult<T> = Result<T, TilecastError>;

impl TilecastError {
    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment {
            message: msg.into(),
        }
    }

    pub fn size(msg: impl Into<String>) -> Self {
        Self::Size {
            message: msg.into(),
        }
    }

    pub fn asset_load(asset_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::AssetLoad {
            asset_id: asset_id.into(),
            message: msg.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding {
            message: msg.into(),
            diagnostics: None,
        }
    }

    pub fn encoding_with_output(msg: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Encoding {
            message: msg.into(),
            diagnostics: Some(output.into()),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Self::Project {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether the error is absorbed by exporters instead of aborting them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AssetLoad { .. })
    }

    /// Encoder diagnostics attached to an [`TilecastError::Encoding`] error.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::Encoding { diagnostics, .. } => diagnostics.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_asset_load_is_recoverable() {
        assert!(TilecastError::asset_load("a1", "decode failed").is_recoverable());
        assert!(!TilecastError::size("padding too large").is_recoverable());
        assert!(!TilecastError::encoding("recorder crashed").is_recoverable());
    }

    #[test]
    fn test_encoding_diagnostics_are_exposed() {
        let err = TilecastError::encoding_with_output("ffmpeg failed", "Invalid argument");
        assert_eq!(err.diagnostics(), Some("Invalid argument"));
        assert!(err.to_string().contains("ffmpeg failed"));
    }
}
