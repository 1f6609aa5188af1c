// src/clipmap/mod.rs
//
// GPU clipmap of terrain heights (nested levels around the viewpoint).
//
// - Level i covers `dim x dim` samples of the level-i grid (`c >> i`), centred on
//   the level-0 recentring offset shifted down by i.
// - Textures are toroidal: level-global coord `c` lives at texel `c & (dim - 1)`,
//   so scrolling only restages the band that became resident.
// - Edits restage the dirty AABB (clipped to what is resident) at every level.

pub mod level;
pub mod normals;
pub mod region;
pub mod updater;

use glam::IVec2;

use crate::config::TerrainConfig;
use crate::error::GpuError;
use crate::gpu::{ClipLevelGpu, ClipmapParamsGpu, TerrainGpu};
use crate::world::{to_level, DirtyRegion, TerrainHeights};

pub use level::{ClipmapLevel, LevelPhase};
pub use region::{recentre_bands, toroidal_pieces, window, wrap_coord, wrap_coords, Rect};
pub use updater::{plan_recentre, plan_region, ClipmapUpdater, LevelPlan, Pass, UpdateStats};

pub struct Clipmap {
    levels: Vec<ClipmapLevel>,
    updater: ClipmapUpdater,
    dim: u32,
    texel_size: f32,

    /// Level-0 target of the last `build` or `update`. Levels moved on their
    /// own by `update_level` may differ; each level keeps its own offset.
    offset: IVec2,
}

impl Clipmap {
    /// Allocate every level's textures and staging buffer. Nothing is uploaded.
    pub fn create<G: TerrainGpu>(gpu: &mut G, cfg: &TerrainConfig) -> Result<Self, GpuError> {
        let mut levels = Vec::with_capacity(cfg.levels as usize);
        for l in 0..cfg.levels {
            let res = gpu.create_level_resources(l, cfg.dimension)?;
            levels.push(ClipmapLevel::new(l, cfg.dimension, cfg.level_texel_size(l), res));
        }
        log::info!(
            "clipmap: {} levels of {}^2, level-0 texel {} m, coarsest covers {:.1} m",
            cfg.levels,
            cfg.dimension,
            cfg.texel_size,
            cfg.level_coverage(cfg.levels - 1)
        );

        Ok(Self {
            levels,
            updater: ClipmapUpdater::new(cfg.fence_timeout),
            dim: cfg.dimension,
            texel_size: cfg.texel_size,
            offset: IVec2::ZERO,
        })
    }

    #[inline]
    pub fn offset(&self) -> IVec2 {
        self.offset
    }

    #[inline]
    pub fn dim(&self) -> u32 {
        self.dim
    }

    #[inline]
    pub fn levels(&self) -> &[ClipmapLevel] {
        &self.levels
    }

    #[inline]
    pub fn level(&self, level: u32) -> &ClipmapLevel {
        &self.levels[level as usize]
    }

    /// Fill every level around `offset` from scratch. All copies go on the
    /// upload queue; the returned pass carries its fence value.
    pub fn build<G: TerrainGpu>(
        &mut self,
        gpu: &mut G,
        heights: &TerrainHeights,
        offset: IVec2,
    ) -> Result<Pass, GpuError> {
        let plans: Vec<LevelPlan> = (0..self.levels.len() as u32)
            .map(|l| LevelPlan {
                edit: None,
                bands: vec![window(to_level(offset, l), self.dim)],
            })
            .collect();

        let pass = self.updater.run(gpu, heights, &mut self.levels, &plans)?;
        self.move_all(offset);
        Ok(pass)
    }

    /// One frame: restage `dirty` against the windows the levels hold now, then
    /// scroll every level to `target`, all in a single pass.
    pub fn update<G: TerrainGpu>(
        &mut self,
        gpu: &mut G,
        heights: &TerrainHeights,
        dirty: Option<DirtyRegion>,
        target: IVec2,
    ) -> Result<Pass, GpuError> {
        let dim = self.dim;
        let plans: Vec<LevelPlan> = self
            .levels
            .iter()
            .map(|lvl| LevelPlan {
                edit: dirty.and_then(|d| plan_region(lvl.index, d, lvl.offset, dim)),
                bands: plan_recentre(lvl.index, lvl.offset, target, dim),
            })
            .collect();

        let pass = self.updater.run(gpu, heights, &mut self.levels, &plans)?;
        self.move_all(target);
        Ok(pass)
    }

    /// Scroll a single level from level-0 offset `old` to `new`. Other levels
    /// keep their windows; the next `update` brings them along.
    pub fn update_level<G: TerrainGpu>(
        &mut self,
        gpu: &mut G,
        heights: &TerrainHeights,
        level: u32,
        old: IVec2,
        new: IVec2,
    ) -> Result<Pass, GpuError> {
        let held = self.held(level, old);
        let plans = self.single(level, LevelPlan {
            edit: None,
            bands: plan_recentre(level, held, new, self.dim),
        });
        let pass = self.updater.run(gpu, heights, &mut self.levels, &plans)?;
        self.levels[level as usize].offset = to_level(new, level);
        Ok(pass)
    }

    /// Restage the part of `dirty` resident at `level`, whose window sits
    /// around level-0 `offset`.
    pub fn upload_region<G: TerrainGpu>(
        &mut self,
        gpu: &mut G,
        heights: &TerrainHeights,
        level: u32,
        dirty: DirtyRegion,
        offset: IVec2,
    ) -> Result<Pass, GpuError> {
        let held = self.held(level, offset);
        let plans = self.single(level, LevelPlan {
            edit: plan_region(level, dirty, held, self.dim),
            bands: Vec::new(),
        });
        self.updater.run(gpu, heights, &mut self.levels, &plans)
    }

    /// The level's held window offset; `offset` (level-0) must agree with it.
    fn held(&self, level: u32, offset: IVec2) -> IVec2 {
        assert!((level as usize) < self.levels.len(), "clip level {level} out of range");
        let held = self.levels[level as usize].offset;
        assert_eq!(
            to_level(offset, level),
            held,
            "level {level} holds the window at {held}, not at level-0 offset {offset}"
        );
        held
    }

    fn single(&self, level: u32, plan: LevelPlan) -> Vec<LevelPlan> {
        let mut plans = vec![LevelPlan::default(); self.levels.len()];
        plans[level as usize] = plan;
        plans
    }

    fn move_all(&mut self, offset: IVec2) {
        for lvl in &mut self.levels {
            lvl.offset = to_level(offset, lvl.index);
        }
        self.offset = offset;
    }

    /// Uniform block describing the resident windows, for the terrain shader.
    pub fn params(&self) -> ClipmapParamsGpu {
        let mut p = ClipmapParamsGpu {
            levels: self.levels.len() as u32,
            dim: self.dim,
            texel_size: self.texel_size,
            ..Default::default()
        };
        for (slot, lvl) in p.level.iter_mut().zip(&self.levels) {
            *slot = ClipLevelGpu {
                offset: lvl.offset.to_array(),
                window_min: lvl.window().min.to_array(),
                texel_world: lvl.texel_world,
                inv_dim: 1.0 / self.dim as f32,
                _pad: [0; 2],
            };
        }
        p
    }
}
