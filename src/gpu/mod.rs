//! The renderer seam.
//!
//! The terrain core never touches a graphics API directly. It records work
//! through [`TerrainGpu`]: staging writes, staging->texture copies, normal
//! dispatches, queue submission with fence values, and waits. `WgpuGpu` is the
//! real implementation; `SoftGpu` runs the same contract on the CPU.

pub mod gpu_types;
pub mod soft;
pub mod wgpu_backend;

use std::time::Duration;

use glam::{IVec2, UVec2};

use crate::error::GpuError;

pub use gpu_types::{ClipLevelGpu, ClipmapParamsGpu, NormalParamsGpu};
pub use soft::SoftGpu;
pub use wgpu_backend::WgpuGpu;

/// Monotonic per-queue counter. 0 means "nothing submitted yet".
pub type FenceValue = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Upload,
    Compute,
}

impl QueueKind {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            QueueKind::Upload => 0,
            QueueKind::Compute => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// GPU objects backing one clip level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelResources {
    pub height: TextureHandle,
    pub normals: TextureHandle,
    pub staging: BufferHandle,
}

/// A rectangle that is contiguous in texture space (no wrap inside it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl TexRect {
    #[inline]
    pub fn texels(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

/// Staging buffer -> height texture. The staging buffer is laid out exactly
/// like the texture (dim x dim, toroidally addressed), so source and
/// destination rectangles coincide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeightCopy {
    pub staging: BufferHandle,
    pub height: TextureHandle,
    pub dim: u32,
    pub rect: TexRect,
}

impl HeightCopy {
    /// Byte offset of the rect's first texel inside the staging buffer.
    #[inline]
    pub fn staging_offset(&self) -> u64 {
        (self.rect.y as u64 * self.dim as u64 + self.rect.x as u64) * 4
    }

    #[inline]
    pub fn bytes_per_row(&self) -> u32 {
        self.dim * 4
    }
}

/// One normal-recompute dispatch. `origin` is in unwrapped level-global
/// coordinates; the kernel wraps each invocation itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalDispatch {
    pub height: TextureHandle,
    pub normals: TextureHandle,
    pub dim: u32,
    pub origin: IVec2,
    pub size: UVec2,
    pub texel_world: f32,
}

impl NormalDispatch {
    #[inline]
    pub fn params(&self) -> NormalParamsGpu {
        NormalParamsGpu {
            origin: self.origin.to_array(),
            size: self.size.to_array(),
            dim: self.dim,
            texel_world: self.texel_world,
            _pad: [0; 2],
        }
    }
}

pub trait TerrainGpu {
    fn create_level_resources(&mut self, level: u32, dim: u32) -> Result<LevelResources, GpuError>;

    /// Push a flushed byte range of a mapped staging view to GPU-visible memory.
    fn write_staging(&mut self, staging: BufferHandle, byte_offset: u64, bytes: &[u8]);

    fn copy_staging_to_height(&mut self, queue: QueueKind, copy: &HeightCopy);

    /// Transition a height texture from copy destination to shader read on `queue`.
    fn height_barrier(&mut self, queue: QueueKind, height: TextureHandle);

    /// Always recorded on the compute queue.
    fn dispatch_normals(&mut self, dispatch: &NormalDispatch);

    fn bind_clipmap(&mut self, params: &ClipmapParamsGpu);

    /// Submit everything recorded on `queue`; returns the fence value signalled
    /// when it completes.
    fn submit(&mut self, queue: QueueKind) -> FenceValue;

    /// GPU-side wait: later work on `waiter` starts after `signaler` reaches `value`.
    fn queue_wait(&mut self, waiter: QueueKind, signaler: QueueKind, value: FenceValue);

    /// Highest fence value known complete on `queue`.
    fn completed(&self, queue: QueueKind) -> FenceValue;

    /// Block until `queue` reaches `value`. The timeout is a deadlock diagnostic.
    fn wait(&mut self, queue: QueueKind, value: FenceValue, timeout: Duration) -> Result<(), GpuError>;
}

/// Workgroup count along one axis, rounding up.
#[inline]
pub fn groups_for(texels: u32, workgroup: u32) -> u32 {
    texels.div_ceil(workgroup)
}
