// src/clipmap/updater.rs
//
// Stage -> copy -> recompute normals, for any set of stale rectangles.
//
// A pass runs in two phases so that all copies of all levels land in one
// submission:
//   1) per level: wait until the staging buffer is free, write every stale rect
//      through a mapped view, flush the written rows, record the copies.
//   2) per level: barrier the height texture, dispatch normals for every rect.
//
// Recentring passes copy on the upload queue and make the compute queue wait on
// it. Edit-only passes keep copy and compute on the compute queue, ordered by
// the barrier alone.

use std::ops::AddAssign;
use std::time::Duration;

use glam::IVec2;
use rayon::prelude::*;

use crate::clipmap::level::{ClipmapLevel, LevelPhase};
use crate::clipmap::normals;
use crate::clipmap::region::{recentre_bands, toroidal_pieces, window, Rect};
use crate::error::GpuError;
use crate::gpu::{FenceValue, HeightCopy, QueueKind, TerrainGpu};
use crate::world::{to_level, DirtyRegion, TerrainHeights};

/// What one level has to refresh in one pass, in execution order: the edit
/// rectangle first (against the pre-move window), then recentring bands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelPlan {
    pub edit: Option<Rect>,
    pub bands: Vec<Rect>,
}

impl LevelPlan {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.edit.is_none() && self.bands.is_empty()
    }

    pub fn rects(&self) -> impl Iterator<Item = &Rect> + '_ {
        self.edit.iter().chain(self.bands.iter())
    }
}

/// Bands level `level` must restage to move from the level-global window
/// offset `held` to level-0 target `target`. Empty when the target does not
/// change the level's own (shifted) offset.
pub fn plan_recentre(level: u32, held: IVec2, target: IVec2, dim: u32) -> Vec<Rect> {
    let n = to_level(target, level);
    if n == held {
        return Vec::new();
    }
    recentre_bands(held, n, dim)
}

/// The part of `dirty` resident at `level` in the window around level-global
/// offset `held`.
pub fn plan_region(level: u32, dirty: DirtyRegion, held: IVec2, dim: u32) -> Option<Rect> {
    if dirty.is_empty() {
        return None;
    }
    let d = dirty.at_level(level);
    let clipped = Rect::from_inclusive(d.min, d.max).intersect(&window(held, dim));
    (!clipped.is_empty()).then_some(clipped)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub levels_updated: u32,
    pub texels_staged: u64,
    pub rows_flushed: u64,
    pub bytes_flushed: u64,
    pub copies: u32,
    pub normal_dispatches: u32,
    pub staging_waits: u32,
}

impl AddAssign for UpdateStats {
    fn add_assign(&mut self, o: Self) {
        self.levels_updated += o.levels_updated;
        self.texels_staged += o.texels_staged;
        self.rows_flushed += o.rows_flushed;
        self.bytes_flushed += o.bytes_flushed;
        self.copies += o.copies;
        self.normal_dispatches += o.normal_dispatches;
        self.staging_waits += o.staging_waits;
    }
}

/// Result of one pass. Fence values are 0 when that queue got no work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pass {
    pub stats: UpdateStats,
    pub upload_fence: FenceValue,
    pub compute_fence: FenceValue,
}

pub struct ClipmapUpdater {
    timeout: Duration,
}

impl ClipmapUpdater {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn run<G: TerrainGpu>(
        &self,
        gpu: &mut G,
        heights: &TerrainHeights,
        levels: &mut [ClipmapLevel],
        plans: &[LevelPlan],
    ) -> Result<Pass, GpuError> {
        debug_assert_eq!(levels.len(), plans.len());

        let mut pass = Pass::default();
        let active: Vec<usize> = (0..plans.len()).filter(|&i| !plans[i].is_empty()).collect();
        if active.is_empty() {
            return Ok(pass);
        }

        let recentring = active.iter().any(|&i| !plans[i].bands.is_empty());
        let copy_queue = if recentring { QueueKind::Upload } else { QueueKind::Compute };

        // Nothing is recorded until every staging buffer is free.
        for &i in &active {
            self.reuse_staging(gpu, &levels[i], &mut pass.stats)?;
        }

        for &i in &active {
            let level = &mut levels[i];
            let plan = &plans[i];

            level.advance(LevelPhase::Staging);
            pass.stats.texels_staged += stage(heights, level, plan);
            flush(gpu, level, &mut pass.stats);

            level.advance(LevelPhase::Copying);
            for rect in plan.rects() {
                for piece in toroidal_pieces(*rect, level.dim) {
                    log::trace!("level {}: copy {:?} on {:?}", level.index, piece, copy_queue);
                    gpu.copy_staging_to_height(
                        copy_queue,
                        &HeightCopy {
                            staging: level.resources.staging,
                            height: level.resources.height,
                            dim: level.dim,
                            rect: piece,
                        },
                    );
                    pass.stats.copies += 1;
                }
            }
        }

        if recentring {
            pass.upload_fence = gpu.submit(QueueKind::Upload);
            gpu.queue_wait(QueueKind::Compute, QueueKind::Upload, pass.upload_fence);
        }

        for &i in &active {
            let level = &mut levels[i];
            level.advance(LevelPhase::RecomputingNormals);
            gpu.height_barrier(QueueKind::Compute, level.resources.height);
            for rect in plans[i].rects() {
                gpu.dispatch_normals(&normals::dispatch_for(*rect, level));
                pass.stats.normal_dispatches += 1;
            }
        }

        pass.compute_fence = gpu.submit(QueueKind::Compute);
        for &i in &active {
            levels[i].fence = pass.compute_fence;
            levels[i].advance(LevelPhase::Stable);
        }
        pass.stats.levels_updated = active.len() as u32;

        log::debug!(
            "clipmap pass: {} levels, {} texels, {} copies, {} dispatches (upload fence {}, compute fence {})",
            pass.stats.levels_updated,
            pass.stats.texels_staged,
            pass.stats.copies,
            pass.stats.normal_dispatches,
            pass.upload_fence,
            pass.compute_fence
        );

        Ok(pass)
    }

    /// The previous copy out of this level's staging buffer must have executed
    /// before the buffer is written again.
    fn reuse_staging<G: TerrainGpu>(
        &self,
        gpu: &mut G,
        level: &ClipmapLevel,
        stats: &mut UpdateStats,
    ) -> Result<(), GpuError> {
        if level.fence > gpu.completed(QueueKind::Compute) {
            log::debug!("level {}: staging busy, waiting for compute fence {}", level.index, level.fence);
            stats.staging_waits += 1;
            gpu.wait(QueueKind::Compute, level.fence, self.timeout)?;
        }
        Ok(())
    }
}

/// Write every texel of the plan's rects into the level's staging buffer.
/// Rows are evaluated in parallel; the mapped view is written on this thread.
fn stage(heights: &TerrainHeights, level: &mut ClipmapLevel, plan: &LevelPlan) -> u64 {
    let (l, dim) = (level.index, level.dim);
    let mut view = level.staging.map();

    for rect in plan.rects() {
        let rows: Vec<Vec<f32>> = (rect.min.y..rect.max.y)
            .into_par_iter()
            .map(|z| {
                (rect.min.x..rect.max.x)
                    .map(|x| heights.get_height(IVec2::new(x, z), l))
                    .collect()
            })
            .collect();

        for (z, row) in (rect.min.y..).zip(rows) {
            for (x, h) in (rect.min.x..).zip(row) {
                view.write(crate::clipmap::region::wrap_coords(IVec2::new(x, z), dim), h);
            }
        }
    }

    view.texels()
}

fn flush<G: TerrainGpu>(gpu: &mut G, level: &mut ClipmapLevel, stats: &mut UpdateStats) {
    let row_bytes = level.dim as u64 * 4;
    for (first, count) in level.staging.take_flush_ranges() {
        let bytes: &[u8] = bytemuck::cast_slice(level.staging.rows(first, count));
        gpu.write_staging(level.resources.staging, first as u64 * row_bytes, bytes);
        stats.rows_flushed += count as u64;
        stats.bytes_flushed += bytes.len() as u64;
    }
}
