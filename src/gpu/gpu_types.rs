// src/gpu/gpu_types.rs
use bytemuck::{Pod, Zeroable};

use crate::config::MAX_LEVELS;

/// Per-dispatch constants for `normals.wgsl` (mirrors `NormalParams`).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
pub struct NormalParamsGpu {
    pub origin: [i32; 2], // unwrapped level-global coords of invocation (0,0)
    pub size: [u32; 2],   // texels covered, <= dim
    pub dim: u32,
    pub texel_world: f32,
    pub _pad: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default, PartialEq)]
pub struct ClipLevelGpu {
    pub offset: [i32; 2],     // level-global recentring offset
    pub window_min: [i32; 2], // first resident level-global coord
    pub texel_world: f32,
    pub inv_dim: f32,
    pub _pad: [u32; 2],
}

/// Uniform block the terrain consumer binds each frame.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ClipmapParamsGpu {
    pub levels: u32,
    pub dim: u32,
    pub texel_size: f32,
    pub _pad0: u32,
    pub level: [ClipLevelGpu; MAX_LEVELS as usize],
}

impl Default for ClipmapParamsGpu {
    fn default() -> Self {
        Self::zeroed()
    }
}
