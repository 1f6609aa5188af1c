// src/clipmap/normals.rs
//
// Normal recompute region math, plus the finite-difference kernel shared by the
// CPU backend. `shaders/normals.wgsl` implements the same kernel.

use glam::{IVec2, UVec2, Vec3};

use crate::clipmap::level::ClipmapLevel;
use crate::clipmap::region::Rect;
use crate::gpu::{groups_for, NormalDispatch};

/// Origin/size of a dispatch covering `rect` grown by one texel (a height
/// change moves its neighbours' normals), capped at one full wrap per axis.
///
/// The origin stays where the grown rect starts, off the workgroup grid. The
/// group count rounds up (`groups`) and invocations past `size` exit early.
pub fn covering(rect: Rect, dim: u32) -> (IVec2, UVec2) {
    let r = rect.expand(1);
    let span = UVec2::new(r.width() as u32, r.height() as u32).min(UVec2::splat(dim));
    (r.min, span)
}

/// Workgroups needed for `size` invocations, rounded up per axis.
#[inline]
pub fn groups(size: UVec2, workgroup: u32) -> UVec2 {
    UVec2::new(groups_for(size.x, workgroup), groups_for(size.y, workgroup))
}

pub fn dispatch_for(rect: Rect, level: &ClipmapLevel) -> NormalDispatch {
    let (origin, size) = covering(rect, level.dim);
    NormalDispatch {
        height: level.resources.height,
        normals: level.resources.normals,
        dim: level.dim,
        origin,
        size,
        texel_world: level.texel_world,
    }
}

/// Central-difference normal (y up) from the four axis neighbours.
#[inline]
pub fn normal_from_neighbours(h_xm: f32, h_xp: f32, h_zm: f32, h_zp: f32, texel_world: f32) -> Vec3 {
    Vec3::new(h_xm - h_xp, 2.0 * texel_world, h_zm - h_zp).normalize()
}
