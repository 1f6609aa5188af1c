// src/terrain.rs
//
// The terrain system as the frame loop sees it.
//
// Per frame:
//   1) retire the build upload if its fence has passed (never blocks)
//   2) one clipmap pass: pending edit region at the old offset, then recentring
//   3) bind the per-level window parameters for the terrain shader
//
// Edits only touch the tile caches; their region is picked up by the next pass.

use glam::{IVec2, Vec2, Vec3};

use crate::clipmap::{Clipmap, UpdateStats};
use crate::config::TerrainConfig;
use crate::error::TerrainError;
use crate::gpu::{ClipmapParamsGpu, FenceValue, QueueKind, TerrainGpu};
use crate::world::{self, DirtyRegion, TerrainHeights};

pub struct Terrain<G: TerrainGpu> {
    cfg: TerrainConfig,
    gpu: G,
    heights: TerrainHeights,
    clipmap: Option<Clipmap>,

    /// Level-0 offset the next `build` centres on.
    build_offset: IVec2,
    dirty: Option<DirtyRegion>,
    /// Upload-queue fence of the last build; 0 once retired.
    upload_fence: FenceValue,
}

impl<G: TerrainGpu> Terrain<G> {
    pub fn new(cfg: TerrainConfig, gpu: G) -> Result<Self, TerrainError> {
        cfg.validate()?;
        let heights = TerrainHeights::new(&cfg);
        Ok(Self {
            cfg,
            gpu,
            heights,
            clipmap: None,
            build_offset: IVec2::ZERO,
            dirty: None,
            upload_fence: 0,
        })
    }

    /// Allocate GPU resources for every level. Fails if any allocation does.
    pub fn init(&mut self) -> Result<(), TerrainError> {
        let clipmap = Clipmap::create(&mut self.gpu, &self.cfg)?;
        self.clipmap = Some(clipmap);
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.clipmap.is_some()
    }

    /// Level-0 coordinate containing world position `p` (xz).
    #[inline]
    pub fn offset_for(&self, p: Vec3) -> IVec2 {
        let ts = self.cfg.texel_size;
        IVec2::new((p.x / ts).floor() as i32, (p.z / ts).floor() as i32)
    }

    /// Place the window for the next `build`. No GPU work.
    pub fn set_viewpoint(&mut self, p: Vec3) {
        self.build_offset = self.offset_for(p);
    }

    /// Regenerate every level around the build offset.
    pub fn build(&mut self) -> Result<UpdateStats, TerrainError> {
        let clipmap = self.clipmap.as_mut().ok_or(TerrainError::NotInitialized)?;
        let pass = clipmap.build(&mut self.gpu, &self.heights, self.build_offset)?;

        // The full rebuild already carries every edit.
        self.dirty = None;
        self.upload_fence = pass.upload_fence;

        log::info!(
            "terrain build at {}: {} texels over {} levels (upload fence {})",
            self.build_offset,
            pass.stats.texels_staged,
            pass.stats.levels_updated,
            self.upload_fence
        );
        Ok(pass.stats)
    }

    /// Clear the build fence once the GPU has passed it. Returns true when no
    /// build upload is outstanding.
    pub fn poll_uploads(&mut self) -> bool {
        if self.upload_fence != 0 && self.gpu.completed(QueueKind::Upload) >= self.upload_fence {
            log::debug!("build upload {} retired", self.upload_fence);
            self.upload_fence = 0;
        }
        self.upload_fence == 0
    }

    /// One frame of clipmap maintenance for a viewpoint at world position `viewpoint`.
    pub fn update_clipmap_textures(&mut self, viewpoint: Vec3) -> Result<UpdateStats, TerrainError> {
        if self.clipmap.is_none() {
            return Err(TerrainError::NotInitialized);
        }
        self.poll_uploads();

        let wanted = self.offset_for(viewpoint);
        let clipmap = self.clipmap.as_mut().ok_or(TerrainError::NotInitialized)?;
        let target = if self.cfg.freeze_recentre {
            clipmap.offset()
        } else {
            wanted
        };

        // A failed pass leaves the region pending.
        let pass = clipmap.update(&mut self.gpu, &self.heights, self.dirty, target)?;
        self.dirty = None;
        self.build_offset = clipmap.offset();
        Ok(pass.stats)
    }

    /// Update, then bind the resident windows for this frame's terrain draw.
    pub fn render(&mut self, viewpoint: Vec3) -> Result<ClipmapParamsGpu, TerrainError> {
        self.update_clipmap_textures(viewpoint)?;
        self.bind_params()
    }

    /// Bind the windows the textures currently hold, without updating.
    pub fn bind_params(&mut self) -> Result<ClipmapParamsGpu, TerrainError> {
        let params = self.clipmap.as_ref().ok_or(TerrainError::NotInitialized)?.params();
        self.gpu.bind_clipmap(&params);
        Ok(params)
    }

    /// Raise terrain around `pos` (world xz). The touched region uploads on
    /// the next update.
    ///
    /// Panics if a build upload is still in flight or the previous edit has not
    /// been consumed by an update yet.
    pub fn raise_area_rounded(&mut self, pos: Vec2, radius: f32, amount: f32) -> Option<DirtyRegion> {
        self.poll_uploads();
        assert!(
            self.upload_fence == 0,
            "terrain edit while the build upload (fence {}) is in flight",
            self.upload_fence
        );
        assert!(
            self.dirty.is_none(),
            "terrain edit before the pending dirty region {:?} was uploaded",
            self.dirty
        );

        let region = world::raise_area_rounded(&mut self.heights, self.cfg.texel_size, pos, radius, amount);
        if let Some(r) = region {
            log::info!(
                "edit at ({:.2}, {:.2}) r={radius} amount={amount}: [{}..={}]",
                pos.x,
                pos.y,
                r.min,
                r.max
            );
        }
        self.dirty = region;
        region
    }

    #[inline]
    pub fn config(&self) -> &TerrainConfig {
        &self.cfg
    }

    #[inline]
    pub fn heights(&self) -> &TerrainHeights {
        &self.heights
    }

    #[inline]
    pub fn clipmap(&self) -> Option<&Clipmap> {
        self.clipmap.as_ref()
    }

    #[inline]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    #[inline]
    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    #[inline]
    pub fn pending_dirty(&self) -> Option<DirtyRegion> {
        self.dirty
    }

    #[inline]
    pub fn upload_fence(&self) -> FenceValue {
        self.upload_fence
    }

    /// Level-0 offset the textures are centred on (the build offset before `init`).
    #[inline]
    pub fn offset(&self) -> IVec2 {
        self.clipmap
            .as_ref()
            .map_or(self.build_offset, |c| c.offset())
    }
}
