// src/world/edits.rs
//
// Height edits. An edit writes level-0 tiles, then rebuilds the overlapping
// part of every coarser level as a 2x2 box filter of the level below, one level
// at a time. The caller gets back the touched level-0 AABB to re-upload.

use glam::{IVec2, Vec2};

use crate::world::heights::TerrainHeights;
use crate::world::tiles::TileKey;
use crate::world::to_level;

/// Inclusive AABB in level-0 coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRegion {
    pub min: IVec2,
    pub max: IVec2,
}

impl DirtyRegion {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    /// The same region in level-global coordinates (still inclusive).
    #[inline]
    pub fn at_level(&self, level: u32) -> DirtyRegion {
        DirtyRegion {
            min: to_level(self.min, level),
            max: to_level(self.max, level),
        }
    }
}

/// Tiles overlapping `region`, each with the part of `region` it owns.
fn tiles_in(region: DirtyRegion, tile_dim: u32) -> impl Iterator<Item = (TileKey, DirtyRegion)> {
    let t0 = TileKey::containing(region.min, tile_dim);
    let t1 = TileKey::containing(region.max, tile_dim);
    let last = tile_dim as i32 - 1;

    (t0.z..=t1.z).flat_map(move |tz| {
        (t0.x..=t1.x).map(move |tx| {
            let key = TileKey::new(tx, tz);
            let origin = key.origin(tile_dim);
            let clip = DirtyRegion {
                min: region.min.max(origin),
                max: region.max.min(origin + IVec2::splat(last)),
            };
            (key, clip)
        })
    })
}

/// Raise terrain around `pos` (world xz, meters) by a parabolic bump:
/// `amount * max(radius^2 - d^2, 0)`. Peak is `amount * radius^2`, zero at the rim.
///
/// Returns the touched level-0 AABB, or `None` if the footprint holds no samples.
pub fn raise_area_rounded(
    heights: &mut TerrainHeights,
    texel_size: f32,
    pos: Vec2,
    radius: f32,
    amount: f32,
) -> Option<DirtyRegion> {
    if radius <= 0.0 {
        return None;
    }

    let ts = texel_size as f64;
    let (px, pz, r) = (pos.x as f64, pos.y as f64, radius as f64);
    let r2 = r * r;
    let amount = amount as f64;

    let region = DirtyRegion {
        min: IVec2::new(((px - r) / ts).ceil() as i32, ((pz - r) / ts).ceil() as i32),
        max: IVec2::new(((px + r) / ts).floor() as i32, ((pz + r) / ts).floor() as i32),
    };
    if region.is_empty() {
        return None;
    }

    // Level 0: the actual edit.
    let tile_dim = heights.tile_dim();
    for (key, clip) in tiles_in(region, tile_dim) {
        let field = heights.field();
        let positions: Vec<(IVec2, f64)> = (clip.min.y..=clip.max.y)
            .flat_map(|z| (clip.min.x..=clip.max.x).map(move |x| IVec2::new(x, z)))
            .map(|c| {
                let (wx, wz) = field.sample_position(c, 0);
                let d2 = (wx - px) * (wx - px) + (wz - pz) * (wz - pz);
                (c, amount * (r2 - d2).max(0.0))
            })
            .collect();

        let tile = heights.get_or_create_tile(key, 0);
        for (c, dh) in positions {
            if dh != 0.0 {
                tile.add(c, dh as f32);
            }
        }
    }

    // Coarser levels: box-filter the already-updated level below.
    for level in 1..heights.levels() {
        let footprint = region.at_level(level);
        for (key, clip) in tiles_in(footprint, tile_dim) {
            let below: &TerrainHeights = heights;
            let values: Vec<(IVec2, f32)> = (clip.min.y..=clip.max.y)
                .flat_map(|z| (clip.min.x..=clip.max.x).map(move |x| IVec2::new(x, z)))
                .map(|c| (c, downsample(below, c, level)))
                .collect();

            let tile = heights.get_or_create_tile(key, level);
            for (c, h) in values {
                tile.set(c, h);
            }
        }
    }

    log::debug!(
        "raise_area_rounded: pos=({:.2},{:.2}) r={radius} amount={} -> [{}..={}]",
        pos.x,
        pos.y,
        amount,
        region.min,
        region.max
    );

    Some(region)
}

/// Average of the 4 level-(L-1) samples under level-L coordinate `c`.
#[inline]
pub fn downsample(heights: &TerrainHeights, c: IVec2, level: u32) -> f32 {
    debug_assert!(level > 0);
    let f = c * 2;
    let h00 = heights.get_height(f, level - 1);
    let h10 = heights.get_height(f + IVec2::new(1, 0), level - 1);
    let h01 = heights.get_height(f + IVec2::new(0, 1), level - 1);
    let h11 = heights.get_height(f + IVec2::new(1, 1), level - 1);
    (h00 + h10 + h01 + h11) * 0.25
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerrainConfig;

    fn cfg() -> TerrainConfig {
        TerrainConfig {
            levels: 4,
            dimension: 64,
            tile_dim: 16,
            ..Default::default()
        }
    }

    #[test]
    fn peak_rises_by_amount_times_radius_squared() {
        let cfg = cfg();
        let mut heights = TerrainHeights::new(&cfg);
        let base = heights.generate_height(IVec2::ZERO, 0);

        let region = raise_area_rounded(&mut heights, cfg.texel_size, Vec2::ZERO, 3.0, 0.002);
        assert!(region.is_some());

        let h = heights.get_height(IVec2::ZERO, 0);
        assert!((h - base - 0.018).abs() < 1e-5, "got +{}", h - base);
    }

    #[test]
    fn outside_radius_is_untouched() {
        let cfg = TerrainConfig { texel_size: 1.0, ..cfg() };
        let mut heights = TerrainHeights::new(&cfg);
        let pos = Vec2::new(10.3, -4.6);
        let region = raise_area_rounded(&mut heights, 1.0, pos, 5.0, 0.5).unwrap();

        for z in region.min.y - 3..=region.max.y + 3 {
            for x in region.min.x - 3..=region.max.x + 3 {
                let c = IVec2::new(x, z);
                let d = (Vec2::new(x as f32, z as f32) - pos).length();
                if d > 5.0 {
                    assert_eq!(heights.get_height(c, 0), heights.generate_height(c, 0), "{c}");
                } else if d < 4.9 {
                    assert!(heights.get_height(c, 0) > heights.generate_height(c, 0), "{c}");
                }
            }
        }
    }

    #[test]
    fn edit_spanning_tiles_touches_each_tile() {
        let cfg = TerrainConfig { texel_size: 1.0, ..cfg() };
        let mut heights = TerrainHeights::new(&cfg);
        // Centred on a tile corner: 4 level-0 tiles.
        raise_area_rounded(&mut heights, 1.0, Vec2::new(0.0, 0.0), 3.0, 1.0).unwrap();
        let cache = heights.cache(0);
        for key in [TileKey::new(0, 0), TileKey::new(-1, 0), TileKey::new(0, -1), TileKey::new(-1, -1)] {
            assert!(cache.get(key).is_some(), "{key:?} not materialized");
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn coarse_levels_are_box_filtered() {
        let cfg = TerrainConfig { texel_size: 0.5, ..cfg() };
        let mut heights = TerrainHeights::new(&cfg);
        let region =
            raise_area_rounded(&mut heights, 0.5, Vec2::new(7.0, -3.0), 6.0, 0.1).unwrap();

        for level in 1..cfg.levels {
            let fp = region.at_level(level);
            for z in fp.min.y..=fp.max.y {
                for x in fp.min.x..=fp.max.x {
                    let c = IVec2::new(x, z);
                    let f = c * 2;
                    let expect = (heights.get_height(f, level - 1)
                        + heights.get_height(f + IVec2::new(1, 0), level - 1)
                        + heights.get_height(f + IVec2::new(0, 1), level - 1)
                        + heights.get_height(f + IVec2::new(1, 1), level - 1))
                        * 0.25;
                    assert_eq!(heights.get_height(c, level), expect, "level {level} {c}");
                }
            }
        }
    }

    #[test]
    fn repeated_edits_keep_mips_consistent() {
        let cfg = TerrainConfig { texel_size: 1.0, ..cfg() };
        let mut heights = TerrainHeights::new(&cfg);
        let a = raise_area_rounded(&mut heights, 1.0, Vec2::new(0.0, 0.0), 9.0, 0.01).unwrap();
        let b = raise_area_rounded(&mut heights, 1.0, Vec2::new(6.0, 5.0), 7.0, -0.02).unwrap();

        for region in [a, b] {
            for level in 1..cfg.levels {
                let fp = region.at_level(level);
                for z in fp.min.y..=fp.max.y {
                    for x in fp.min.x..=fp.max.x {
                        let c = IVec2::new(x, z);
                        let got = heights.get_height(c, level);
                        assert_eq!(got, downsample(&heights, c, level), "level {level} {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn zero_radius_is_a_no_op() {
        let cfg = cfg();
        let mut heights = TerrainHeights::new(&cfg);
        assert_eq!(raise_area_rounded(&mut heights, cfg.texel_size, Vec2::ZERO, 0.0, 1.0), None);
        assert_eq!(heights.tile_count(), 0);
    }

    #[test]
    fn dirty_region_scales_down_per_level() {
        let r = DirtyRegion::new(IVec2::new(-5, 3), IVec2::new(9, 17));
        assert_eq!(r.at_level(1), DirtyRegion::new(IVec2::new(-3, 1), IVec2::new(4, 8)));
        assert_eq!(r.at_level(3), DirtyRegion::new(IVec2::new(-1, 0), IVec2::new(1, 2)));
        assert!(!r.is_empty());
        assert!(DirtyRegion::new(IVec2::new(1, 0), IVec2::new(0, 5)).is_empty());
    }
}
