//! Export timing and bitrate resolution.
//!
//! Every value is chosen by the same priority chain: an explicit export
//! setting, then the reference clip (the populated cell with the lowest
//! index), then a fallback. The first finite, positive candidate wins.

use std::time::Duration;

use tilecast_common::config::ExportDefaults;
use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::export::ExportSettings;

/// Per-cell bitrate used to size the batch fallback (bits/sec).
pub const BATCH_BITRATE_PER_CELL: u64 = 5_000_000;

/// First candidate that is finite and positive.
pub fn first_positive<I>(candidates: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    candidates
        .into_iter()
        .flatten()
        .find(|v| v.is_finite() && *v > 0.0)
}

fn first_positive_u64<I>(candidates: I) -> Option<u64>
where
    I: IntoIterator<Item = Option<u64>>,
{
    candidates.into_iter().flatten().find(|v| *v > 0)
}

/// Values contributed by the reference clip. Any field may be unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceTiming {
    pub fps: Option<f64>,
    pub duration_secs: Option<f64>,
    pub video_bitrate: Option<u64>,
    pub audio_bitrate: Option<u64>,
}

/// Last-resort values when neither settings nor the reference clip know.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingFallbacks {
    pub fps: f64,
    pub duration_secs: f64,
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
    pub max_dimension: u32,
}

impl TimingFallbacks {
    /// Fallbacks for the live capture path.
    pub fn interactive(defaults: &ExportDefaults) -> Self {
        Self {
            fps: defaults.fps,
            duration_secs: defaults.duration_secs,
            video_bitrate: defaults.video_bitrate_bps,
            audio_bitrate: defaults.audio_bitrate_bps,
            max_dimension: defaults.video_max_dimension,
        }
    }

    /// Fallbacks for the filter-graph path: video bitrate scales with the
    /// number of populated cells.
    pub fn batch(defaults: &ExportDefaults, cell_count: usize) -> Self {
        Self {
            video_bitrate: batch_video_bitrate(cell_count),
            ..Self::interactive(defaults)
        }
    }
}

/// `5 Mbps × max(1, cells)`.
pub fn batch_video_bitrate(cell_count: usize) -> u64 {
    BATCH_BITRATE_PER_CELL * cell_count.max(1) as u64
}

/// Fully resolved export parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTiming {
    pub fps: f64,
    pub duration_secs: f64,
    pub video_bitrate: u64,
    /// `None` when the output carries no audio.
    pub audio_bitrate: Option<u64>,
    pub max_dimension: u32,
}

impl ResolvedTiming {
    /// Target duration as a `Duration`. Values too large to represent are
    /// rejected instead of overflowing.
    pub fn target_duration(&self) -> TilecastResult<Duration> {
        Duration::try_from_secs_f64(self.duration_secs).map_err(|_| {
            TilecastError::unsupported(format!(
                "Export duration {} s is out of range",
                self.duration_secs
            ))
        })
    }
}

/// Resolve export parameters. `has_audio` gates the audio bitrate.
pub fn resolve_timing(
    settings: &ExportSettings,
    reference: &ReferenceTiming,
    fallbacks: &TimingFallbacks,
    has_audio: bool,
) -> ResolvedTiming {
    let fps = first_positive([settings.fps, reference.fps]).unwrap_or(fallbacks.fps);
    let duration_secs = first_positive([settings.duration_secs, reference.duration_secs])
        .unwrap_or(fallbacks.duration_secs);
    let video_bitrate = first_positive_u64([settings.video_bitrate, reference.video_bitrate])
        .unwrap_or(fallbacks.video_bitrate);
    let audio_bitrate = has_audio.then(|| {
        first_positive_u64([settings.audio_bitrate, reference.audio_bitrate])
            .unwrap_or(fallbacks.audio_bitrate)
    });
    let max_dimension = settings
        .max_dimension
        .filter(|d| *d > 0)
        .unwrap_or(fallbacks.max_dimension);

    ResolvedTiming {
        fps,
        duration_secs,
        video_bitrate,
        audio_bitrate,
        max_dimension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ExportDefaults {
        ExportDefaults::default()
    }

    #[test]
    fn test_first_positive_skips_unknown_and_invalid() {
        assert_eq!(first_positive([None, Some(0.0), Some(f64::NAN), Some(24.0)]), Some(24.0));
        assert_eq!(first_positive([None, Some(-1.0)]), None);
    }

    #[test]
    fn test_explicit_beats_reference() {
        let settings = ExportSettings {
            fps: Some(24.0),
            duration_secs: Some(2.0),
            ..Default::default()
        };
        let reference = ReferenceTiming {
            fps: Some(30.0),
            duration_secs: Some(8.0),
            ..Default::default()
        };
        let resolved = resolve_timing(
            &settings,
            &reference,
            &TimingFallbacks::interactive(&defaults()),
            false,
        );
        assert_eq!(resolved.fps, 24.0);
        assert_eq!(resolved.duration_secs, 2.0);
    }

    #[test]
    fn test_reference_beats_fallback() {
        let reference = ReferenceTiming {
            fps: Some(25.0),
            duration_secs: Some(6.5),
            video_bitrate: Some(4_000_000),
            audio_bitrate: Some(96_000),
        };
        let resolved = resolve_timing(
            &ExportSettings::default(),
            &reference,
            &TimingFallbacks::interactive(&defaults()),
            true,
        );
        assert_eq!(resolved.fps, 25.0);
        assert_eq!(resolved.duration_secs, 6.5);
        assert_eq!(resolved.video_bitrate, 4_000_000);
        assert_eq!(resolved.audio_bitrate, Some(96_000));
    }

    #[test]
    fn test_fallbacks_when_nothing_known() {
        let resolved = resolve_timing(
            &ExportSettings::default(),
            &ReferenceTiming::default(),
            &TimingFallbacks::interactive(&defaults()),
            false,
        );
        assert_eq!(resolved.fps, 30.0);
        assert_eq!(resolved.duration_secs, 3.0);
        assert_eq!(resolved.audio_bitrate, None);
    }

    #[test]
    fn test_unrepresentable_duration_is_an_error() {
        let settings = ExportSettings {
            duration_secs: Some(1e300),
            ..Default::default()
        };
        let resolved = resolve_timing(
            &settings,
            &ReferenceTiming::default(),
            &TimingFallbacks::interactive(&defaults()),
            false,
        );
        assert!(matches!(
            resolved.target_duration(),
            Err(TilecastError::Unsupported { .. })
        ));

        let resolved = resolve_timing(
            &ExportSettings::default(),
            &ReferenceTiming::default(),
            &TimingFallbacks::interactive(&defaults()),
            false,
        );
        assert_eq!(resolved.target_duration().unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_batch_bitrate_scales_with_cells() {
        let resolved = resolve_timing(
            &ExportSettings::default(),
            &ReferenceTiming::default(),
            &TimingFallbacks::batch(&defaults(), 3),
            false,
        );
        assert_eq!(resolved.video_bitrate, 15_000_000);
        assert_eq!(batch_video_bitrate(0), 5_000_000);
    }

    #[test]
    fn test_audio_bitrate_only_with_audio() {
        let fallbacks = TimingFallbacks::batch(&defaults(), 1);
        let with = resolve_timing(&ExportSettings::default(), &ReferenceTiming::default(), &fallbacks, true);
        assert_eq!(with.audio_bitrate, Some(defaults().audio_bitrate_bps));
        let without = resolve_timing(&ExportSettings::default(), &ReferenceTiming::default(), &fallbacks, false);
        assert_eq!(without.audio_bitrate, None);
    }
}
