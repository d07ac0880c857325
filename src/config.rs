// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline configuration surface.

use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};

/// Finest-level alignment tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TileSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl TileSize {
    /// Get all variants for UI iteration.
    pub const ALL: [TileSize; 3] = [TileSize::Small, TileSize::Medium, TileSize::Large];

    pub fn display_name(&self) -> &'static str {
        match self {
            TileSize::Small => "Small",
            TileSize::Medium => "Medium",
            TileSize::Large => "Large",
        }
    }

    /// Finest-level tile size in pixels.
    pub fn pixels(&self) -> u32 {
        match self {
            TileSize::Small => 16,
            TileSize::Medium => 32,
            TileSize::Large => 64,
        }
    }
}

/// Pyramid depth control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchDistance {
    Small,
    #[default]
    Medium,
    Large,
}

impl SearchDistance {
    pub const ALL: [SearchDistance; 3] = [
        SearchDistance::Small,
        SearchDistance::Medium,
        SearchDistance::Large,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            SearchDistance::Small => "Small",
            SearchDistance::Medium => "Medium",
            SearchDistance::Large => "Large",
        }
    }

    /// Coarsest-level pixel distance the pyramid must downscale past
    /// (§3 Pyramid: "smallest L such that min(W,H)/∏factors ≤ search_distance").
    pub fn coarsest_dimension(&self) -> u32 {
        match self {
            SearchDistance::Small => 2,
            SearchDistance::Medium => 4,
            SearchDistance::Large => 6,
        }
    }

    /// Per-level search radius used by the aligner's cost window.
    pub fn search_radius(&self) -> i32 {
        2
    }
}

/// Which merge engine (C5 vs C6) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergingAlgorithm {
    #[default]
    Fast,
    HigherQuality,
}

impl MergingAlgorithm {
    pub const ALL: [MergingAlgorithm; 2] =
        [MergingAlgorithm::Fast, MergingAlgorithm::HigherQuality];

    pub fn display_name(&self) -> &'static str {
        match self {
            MergingAlgorithm::Fast => "Fast",
            MergingAlgorithm::HigherQuality => "Higher Quality",
        }
    }
}

/// Post-merge exposure correction mode (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExposureControl {
    #[default]
    Off,
    Linear2X,
    LinearFullRange,
    Curve0EV,
    Curve1EV,
}

impl ExposureControl {
    pub const ALL: [ExposureControl; 5] = [
        ExposureControl::Off,
        ExposureControl::Linear2X,
        ExposureControl::LinearFullRange,
        ExposureControl::Curve0EV,
        ExposureControl::Curve1EV,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ExposureControl::Off => "Off",
            ExposureControl::Linear2X => "Linear 2x",
            ExposureControl::LinearFullRange => "Linear (full range)",
            ExposureControl::Curve0EV => "Curve (0 EV)",
            ExposureControl::Curve1EV => "Curve (+1 EV)",
        }
    }

    pub fn is_tone_mapped(&self) -> bool {
        matches!(self, ExposureControl::Curve0EV | ExposureControl::Curve1EV)
    }
}

/// Output quantization at emit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputBitDepth {
    #[default]
    Native,
    SixteenBit,
}

impl OutputBitDepth {
    pub const ALL: [OutputBitDepth; 2] = [OutputBitDepth::Native, OutputBitDepth::SixteenBit];

    pub fn display_name(&self) -> &'static str {
        match self {
            OutputBitDepth::Native => "Native",
            OutputBitDepth::SixteenBit => "16-bit",
        }
    }
}

/// Pipeline configuration (§6 Config surface table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub tile_size: TileSize,
    pub search_distance: SearchDistance,
    pub merging_algorithm: MergingAlgorithm,
    /// Robustness slider, valid range 1..=23 (§4.5).
    pub noise_reduction: u8,
    pub exposure_control: ExposureControl,
    pub output_bit_depth: OutputBitDepth,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tile_size: TileSize::default(),
            search_distance: SearchDistance::default(),
            merging_algorithm: MergingAlgorithm::default(),
            noise_reduction: 13,
            exposure_control: ExposureControl::default(),
            output_bit_depth: OutputBitDepth::default(),
        }
    }
}

impl Config {
    /// Validate the config surface at the §7 `InvalidArgument` boundary.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if !(1..=23).contains(&self.noise_reduction) {
            return Err(ErrorKind::invalid_argument(format!(
                "noise_reduction must be in 1..=23, got {}",
                self.noise_reduction
            )));
        }
        Ok(())
    }

    /// Robustness norm `r` derived from `noise_reduction` (§4.5).
    ///
    /// `r = 0.12 * 1.3^((36 - round(noise_reduction)) / 2) - 0.4529822`
    pub fn robustness(&self) -> f32 {
        let nr = self.noise_reduction as f32;
        0.12 * 1.3f32.powf((36.0 - nr) / 2.0) - 0.4529822
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(
            config.validate().is_ok(),
            "default config should pass validation"
        );
    }

    #[test]
    fn noise_reduction_out_of_range_is_invalid_argument() {
        let mut config = Config::default();
        config.noise_reduction = 0;
        assert!(matches!(
            config.validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));

        config.noise_reduction = 24;
        assert!(matches!(
            config.validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn robustness_is_monotonically_decreasing_in_noise_reduction() {
        let mut last = f32::INFINITY;
        for nr in 1..=23u8 {
            let config = Config {
                noise_reduction: nr,
                ..Config::default()
            };
            let r = config.robustness();
            assert!(
                r < last,
                "robustness should strictly decrease as noise_reduction increases: nr={nr} r={r} last={last}"
            );
            last = r;
        }
    }

    #[test]
    fn tile_size_pixels_match_spec_table() {
        assert_eq!(TileSize::Small.pixels(), 16);
        assert_eq!(TileSize::Medium.pixels(), 32);
        assert_eq!(TileSize::Large.pixels(), 64);
    }
}
