// src/clipmap/level.rs
//
// One clip level: its GPU texture pair, the CPU staging copy, and where it is
// in the per-frame update cycle.

use glam::{IVec2, UVec2};

use crate::clipmap::region::{window, wrap_coords, Rect};
use crate::gpu::{FenceValue, LevelResources};

/// Per-level update cycle. Every frame that touches a level walks the full
/// loop back to `Stable` before the next one may start staging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelPhase {
    Stable,
    Staging,
    Copying,
    RecomputingNormals,
}

impl LevelPhase {
    #[inline]
    fn next(self) -> LevelPhase {
        match self {
            LevelPhase::Stable => LevelPhase::Staging,
            LevelPhase::Staging => LevelPhase::Copying,
            LevelPhase::Copying => LevelPhase::RecomputingNormals,
            LevelPhase::RecomputingNormals => LevelPhase::Stable,
        }
    }
}

/// CPU-side staging memory, `dim x dim` f32, toroidally addressed like the texture.
pub struct StagingBuffer {
    dim: u32,
    data: Vec<f32>,
    pending_rows: Vec<bool>,
    mapped: bool,
}

impl StagingBuffer {
    pub fn new(dim: u32) -> Self {
        Self {
            dim,
            data: vec![0.0; (dim * dim) as usize],
            pending_rows: vec![false; dim as usize],
            mapped: false,
        }
    }

    /// Scoped write access. Rows written through the view become pending for
    /// flush when the view drops.
    pub fn map(&mut self) -> MappedStaging<'_> {
        assert!(!self.mapped, "staging buffer mapped twice");
        self.mapped = true;
        let dim = self.dim as usize;
        MappedStaging {
            buf: self,
            written: vec![false; dim],
            texels: 0,
        }
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    #[inline]
    pub fn texel(&self, t: UVec2) -> f32 {
        self.data[(t.y * self.dim + t.x) as usize]
    }

    /// Contiguous runs of pending rows as `(first_row, row_count)`; clears them.
    pub fn take_flush_ranges(&mut self) -> Vec<(u32, u32)> {
        debug_assert!(!self.mapped, "flush while mapped");
        let mut out = Vec::new();
        let mut run: Option<u32> = None;

        for (y, pending) in self.pending_rows.iter_mut().enumerate() {
            let y = y as u32;
            match (*pending, run) {
                (true, None) => run = Some(y),
                (false, Some(start)) => {
                    out.push((start, y - start));
                    run = None;
                }
                _ => {}
            }
            *pending = false;
        }
        if let Some(start) = run {
            out.push((start, self.dim - start));
        }
        out
    }

    /// Raw rows `[first, first + count)` as a flat slice.
    #[inline]
    pub fn rows(&self, first: u32, count: u32) -> &[f32] {
        let a = (first * self.dim) as usize;
        let b = ((first + count) * self.dim) as usize;
        &self.data[a..b]
    }
}

/// Mapped view of a staging buffer; unmapped on drop.
pub struct MappedStaging<'a> {
    buf: &'a mut StagingBuffer,
    written: Vec<bool>,
    texels: u64,
}

impl MappedStaging<'_> {
    #[inline]
    pub fn write(&mut self, t: UVec2, h: f32) {
        let dim = self.buf.dim;
        debug_assert!(t.x < dim && t.y < dim);
        self.buf.data[(t.y * dim + t.x) as usize] = h;
        self.written[t.y as usize] = true;
        self.texels += 1;
    }

    /// Texels written through this view so far.
    #[inline]
    pub fn texels(&self) -> u64 {
        self.texels
    }
}

impl Drop for MappedStaging<'_> {
    fn drop(&mut self) {
        for (p, w) in self.buf.pending_rows.iter_mut().zip(&self.written) {
            *p |= *w;
        }
        self.buf.mapped = false;
    }
}

pub struct ClipmapLevel {
    pub index: u32,
    pub dim: u32,
    pub texel_world: f32,
    pub resources: LevelResources,
    pub staging: StagingBuffer,

    /// Level-global recentring offset of the window the textures hold.
    pub offset: IVec2,

    phase: LevelPhase,
    /// Compute-queue fence value that retires this level's last update.
    pub fence: FenceValue,
}

impl ClipmapLevel {
    pub fn new(index: u32, dim: u32, texel_world: f32, resources: LevelResources) -> Self {
        assert!(dim.is_power_of_two(), "clip level dimension {dim} is not a power of two");
        Self {
            index,
            dim,
            texel_world,
            resources,
            staging: StagingBuffer::new(dim),
            offset: IVec2::ZERO,
            phase: LevelPhase::Stable,
            fence: 0,
        }
    }

    #[inline]
    pub fn phase(&self) -> LevelPhase {
        self.phase
    }

    #[inline]
    pub fn advance(&mut self, to: LevelPhase) {
        debug_assert_eq!(
            self.phase.next(),
            to,
            "level {}: illegal phase change {:?} -> {:?}",
            self.index,
            self.phase,
            to
        );
        self.phase = to;
    }

    /// Level-global coordinates resident in the textures.
    #[inline]
    pub fn window(&self) -> Rect {
        window(self.offset, self.dim)
    }

    #[inline]
    pub fn wrap(&self, c: IVec2) -> UVec2 {
        wrap_coords(c, self.dim)
    }
}
