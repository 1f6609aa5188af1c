// src/config.rs
// -------------
// Global config knobs for the terrain clipmap.
//
// The constants are defaults; the engine itself only ever reads a `TerrainConfig`
// handed to it by the caller, so tools and tests can run several differently
// configured terrains side by side.

use std::time::Duration;

use crate::error::TerrainError;

// -----------------------------------------------------------------------------
// Clipmap
// -----------------------------------------------------------------------------

pub const CLIPMAP_LEVELS: u32 = 6;

// Texture resolution per level (square). Must be a power of two: toroidal
// addressing is `coord & (CLIPMAP_RES - 1)`.
pub const CLIPMAP_RES: u32 = 256;

// World size of one level-0 texel (meters). Level i texel = TEXEL_SIZE_M * 2^i.
pub const TEXEL_SIZE_M: f32 = 0.05;

// Edge length of a cached height tile, in level-global samples.
pub const TILE_DIM: u32 = 64;

// Must match @workgroup_size in `shaders/normals.wgsl`.
pub const NORMAL_WORKGROUP: u32 = 8;

// Upper bound for any fence wait. Only a deadlock diagnostic.
pub const FENCE_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_SEED: u32 = 12345;

// The coarsest level's coordinate is `c >> (levels - 1)`; past this the
// world span of one texel stops fitting the i32 grid comfortably.
pub const MAX_LEVELS: u32 = 16;

// -----------------------------------------------------------------------------
// Noise
// -----------------------------------------------------------------------------
//
// (frequency in 1/m, amplitude). Ridge-multiplier amplitudes sum to < 1 so the
// multiplier `1 + sum` stays inside [0, 2].

pub const RIDGE_MULT_OCTAVES: &[(f64, f64)] = &[(0.0015, 0.65), (0.0045, 0.3)];
pub const RIDGE_OCTAVES: &[(f64, f64)] = &[(0.004, 24.0), (0.011, 9.0), (0.027, 3.5), (0.063, 1.2)];
pub const WHITE_OCTAVES: &[(f64, f64)] = &[(0.21, 0.25), (0.83, 0.06), (3.1, 0.015)];
pub const BASE_HEIGHT_M: f32 = -12.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Octave {
    pub frequency: f64,
    pub amplitude: f64,
}

fn octaves(table: &[(f64, f64)]) -> Vec<Octave> {
    table
        .iter()
        .map(|&(frequency, amplitude)| Octave { frequency, amplitude })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct NoiseConfig {
    pub ridge_mult: Vec<Octave>,
    pub ridge: Vec<Octave>,
    pub white: Vec<Octave>,
    pub base_height: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            ridge_mult: octaves(RIDGE_MULT_OCTAVES),
            ridge: octaves(RIDGE_OCTAVES),
            white: octaves(WHITE_OCTAVES),
            base_height: BASE_HEIGHT_M,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TerrainConfig {
    pub levels: u32,
    pub dimension: u32,
    pub texel_size: f32,
    pub tile_dim: u32,
    pub seed: u32,
    pub noise: NoiseConfig,
    pub fence_timeout: Duration,

    /// Debug tunable: ignore viewpoint motion (no level scrolls). Edits still upload.
    pub freeze_recentre: bool,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            levels: CLIPMAP_LEVELS,
            dimension: CLIPMAP_RES,
            texel_size: TEXEL_SIZE_M,
            tile_dim: TILE_DIM,
            seed: DEFAULT_SEED,
            noise: NoiseConfig::default(),
            fence_timeout: FENCE_TIMEOUT,
            freeze_recentre: false,
        }
    }
}

impl TerrainConfig {
    pub fn validate(&self) -> Result<(), TerrainError> {
        let bad = |msg: String| Err(TerrainError::InvalidConfig(msg));

        if self.levels == 0 || self.levels > MAX_LEVELS {
            return bad(format!("levels must be in 1..={MAX_LEVELS}, got {}", self.levels));
        }
        if !self.dimension.is_power_of_two() {
            return bad(format!("dimension must be a power of two, got {}", self.dimension));
        }
        if self.dimension < NORMAL_WORKGROUP {
            return bad(format!(
                "dimension {} is smaller than the normal workgroup ({NORMAL_WORKGROUP})",
                self.dimension
            ));
        }
        if !self.tile_dim.is_power_of_two() {
            return bad(format!("tile_dim must be a power of two, got {}", self.tile_dim));
        }
        if self.texel_size <= 0.0 || !self.texel_size.is_finite() {
            return bad(format!("texel_size must be positive, got {}", self.texel_size));
        }
        Ok(())
    }

    /// World size of one texel at `level`.
    #[inline]
    pub fn level_texel_size(&self, level: u32) -> f32 {
        self.texel_size * (1u32 << level) as f32
    }

    /// World edge length covered by one level's texture.
    #[inline]
    pub fn level_coverage(&self, level: u32) -> f32 {
        self.level_texel_size(level) * self.dimension as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TerrainConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_dimension() {
        let cfg = TerrainConfig { dimension: 200, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(TerrainError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_dimension_below_workgroup() {
        let cfg = TerrainConfig { dimension: 4, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_levels_and_texel_size() {
        assert!(TerrainConfig { levels: 0, ..Default::default() }.validate().is_err());
        assert!(TerrainConfig { levels: 17, ..Default::default() }.validate().is_err());
        assert!(TerrainConfig { texel_size: 0.0, ..Default::default() }.validate().is_err());
        assert!(TerrainConfig { tile_dim: 48, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn coverage_doubles_per_level() {
        let cfg = TerrainConfig::default();
        let c0 = cfg.level_coverage(0);
        assert!((c0 - 12.8).abs() < 1e-4);
        assert!((cfg.level_coverage(3) - c0 * 8.0).abs() < 1e-3);
    }
}
