// src/clipmap/region.rs
//
// Integer rectangle math for the toroidal window.
//
// All rectangles here are in level-global coordinates (unwrapped). Only
// `toroidal_pieces` leaves that space and produces texture-space rects.

use glam::{IVec2, UVec2};

use crate::gpu::TexRect;

/// Half-open rectangle of level-global coordinates (`y` is world z).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub min: IVec2,
    pub max: IVec2,
}

impl Rect {
    #[inline]
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_inclusive(min: IVec2, max: IVec2) -> Self {
        Self { min, max: max + IVec2::ONE }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    #[inline]
    pub fn width(&self) -> i32 {
        (self.max.x - self.min.x).max(0)
    }

    #[inline]
    pub fn height(&self) -> i32 {
        (self.max.y - self.min.y).max(0)
    }

    #[inline]
    pub fn texels(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    #[inline]
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    #[inline]
    pub fn expand(&self, n: i32) -> Rect {
        Rect {
            min: self.min - IVec2::splat(n),
            max: self.max + IVec2::splat(n),
        }
    }

    #[inline]
    pub fn contains(&self, c: IVec2) -> bool {
        c.x >= self.min.x && c.x < self.max.x && c.y >= self.min.y && c.y < self.max.y
    }
}

/// Texture coordinate of a level-global coordinate. `dim` must be a power of two.
#[inline(always)]
pub fn wrap_coord(c: i32, dim: u32) -> u32 {
    debug_assert!(dim.is_power_of_two());
    (c & (dim as i32 - 1)) as u32
}

#[inline(always)]
pub fn wrap_coords(c: IVec2, dim: u32) -> UVec2 {
    UVec2::new(wrap_coord(c.x, dim), wrap_coord(c.y, dim))
}

/// The `dim x dim` window of level-global coordinates resident for `offset`.
#[inline]
pub fn window(offset: IVec2, dim: u32) -> Rect {
    let half = IVec2::splat((dim / 2) as i32);
    Rect::new(offset - half, offset + half)
}

/// Split `[lo, lo + len)` into at most two runs that are contiguous in texture space.
fn split_axis(lo: i32, len: i32, dim: u32) -> Vec<(u32, u32)> {
    if len <= 0 {
        return Vec::new();
    }
    if len as u32 >= dim {
        return vec![(0, dim)];
    }
    let start = wrap_coord(lo, dim);
    let len = len as u32;
    if start + len <= dim {
        vec![(start, len)]
    } else {
        let first = dim - start;
        vec![(start, first), (0, len - first)]
    }
}

/// Texture-space pieces of `rect`: 1, 2 or 4 depending on which wrap seams it straddles.
pub fn toroidal_pieces(rect: Rect, dim: u32) -> Vec<TexRect> {
    let xs = split_axis(rect.min.x, rect.width(), dim);
    let ys = split_axis(rect.min.y, rect.height(), dim);

    let mut out = Vec::with_capacity(xs.len() * ys.len());
    for &(y, h) in &ys {
        for &(x, w) in &xs {
            out.push(TexRect { x, y, w, h });
        }
    }
    out
}

/// Parts of the new window that were not resident in the old one, as at most
/// two disjoint bands: a column band (full new height) for the x move, then a
/// row band over the remaining columns for the z move. A move of a full
/// dimension or more along an axis refreshes the whole window along it.
pub fn recentre_bands(old: IVec2, new: IVec2, dim: u32) -> Vec<Rect> {
    let nw = window(new, dim);
    let ow = window(old, dim);
    let d = new - old;
    let mut bands = Vec::with_capacity(2);

    let (x_lo, x_hi) = if d.x == 0 {
        (nw.min.x, nw.min.x)
    } else if d.x.unsigned_abs() >= dim {
        (nw.min.x, nw.max.x)
    } else if d.x > 0 {
        (ow.max.x, nw.max.x)
    } else {
        (nw.min.x, ow.min.x)
    };
    if x_hi > x_lo {
        bands.push(Rect::new(IVec2::new(x_lo, nw.min.y), IVec2::new(x_hi, nw.max.y)));
    }

    if d.y != 0 {
        let (z_lo, z_hi) = if d.y.unsigned_abs() >= dim {
            (nw.min.y, nw.max.y)
        } else if d.y > 0 {
            (ow.max.y, nw.max.y)
        } else {
            (nw.min.y, ow.min.y)
        };

        // Columns the x band did not already cover.
        let (c_lo, c_hi) = if d.x > 0 {
            (nw.min.x, x_lo)
        } else if d.x < 0 {
            (x_hi, nw.max.x)
        } else {
            (nw.min.x, nw.max.x)
        };

        let band = Rect::new(IVec2::new(c_lo, z_lo), IVec2::new(c_hi, z_hi));
        if !band.is_empty() {
            bands.push(band);
        }
    }

    bands
}
