// src/world/tiles.rs
//
// Sparse per-level cache of authored height tiles.
//
// A tile, once it exists, is the authority for its coordinates at its level:
// reads never fall through to the procedural field again. Tiles are created
// fully populated (from the procedural field) and are never evicted.

use std::hash::{Hash, Hasher};

use glam::IVec2;
use rustc_hash::FxHashMap as HashMap;

use crate::world::generator::HeightField;
use crate::world::hash::xor_combine;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileKey {
    pub x: i32,
    pub z: i32,
}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // See `xor_combine` for why this is not collision resistant.
        state.write_u32(xor_combine(self.x, self.z));
    }
}

impl TileKey {
    #[inline]
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile owning level-global coordinate `c`.
    #[inline]
    pub fn containing(c: IVec2, tile_dim: u32) -> Self {
        let td = tile_dim as i32;
        Self {
            x: c.x.div_euclid(td),
            z: c.y.div_euclid(td),
        }
    }

    /// First level-global coordinate covered by this tile.
    #[inline]
    pub fn origin(self, tile_dim: u32) -> IVec2 {
        let td = tile_dim as i32;
        IVec2::new(self.x * td, self.z * td)
    }
}

pub struct Tile {
    pub key: TileKey,
    dim: u32,
    samples: Box<[f32]>,
}

impl Tile {
    fn generate(key: TileKey, dim: u32, level: u32, field: &HeightField) -> Self {
        let origin = key.origin(dim);
        let mut samples = Vec::with_capacity((dim * dim) as usize);
        for z in 0..dim as i32 {
            for x in 0..dim as i32 {
                samples.push(field.generate_height(origin + IVec2::new(x, z), level));
            }
        }
        Self {
            key,
            dim,
            samples: samples.into_boxed_slice(),
        }
    }

    #[inline(always)]
    fn local_index(&self, c: IVec2) -> usize {
        let origin = self.key.origin(self.dim);
        let l = c - origin;
        debug_assert!(
            l.x >= 0 && l.y >= 0 && (l.x as u32) < self.dim && (l.y as u32) < self.dim,
            "coordinate {c} outside tile {:?}",
            self.key
        );
        (l.y as u32 * self.dim + l.x as u32) as usize
    }

    /// Sample at level-global coordinate `c` (must lie inside the tile).
    #[inline]
    pub fn get(&self, c: IVec2) -> f32 {
        self.samples[self.local_index(c)]
    }

    #[inline]
    pub fn set(&mut self, c: IVec2, h: f32) {
        let i = self.local_index(c);
        self.samples[i] = h;
    }

    #[inline]
    pub fn add(&mut self, c: IVec2, dh: f32) {
        let i = self.local_index(c);
        self.samples[i] += dh;
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

pub struct TileCache {
    level: u32,
    tile_dim: u32,
    tiles: HashMap<TileKey, Tile>,
}

impl TileCache {
    pub fn new(level: u32, tile_dim: u32) -> Self {
        debug_assert!(tile_dim.is_power_of_two());
        Self {
            level,
            tile_dim,
            tiles: HashMap::default(),
        }
    }

    #[inline]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[inline]
    pub fn tile_dim(&self) -> u32 {
        self.tile_dim
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    #[inline]
    pub fn get(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(&key)
    }

    /// Cached sample for `c`, if its tile has been materialized.
    #[inline]
    pub fn sample(&self, c: IVec2) -> Option<f32> {
        let key = TileKey::containing(c, self.tile_dim);
        self.tiles.get(&key).map(|t| t.get(c))
    }

    pub fn get_or_create_tile(&mut self, key: TileKey, field: &HeightField) -> &mut Tile {
        let (dim, level) = (self.tile_dim, self.level);
        self.tiles
            .entry(key)
            .or_insert_with(|| Tile::generate(key, dim, level, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseConfig;

    fn field() -> HeightField {
        HeightField::new(99, 0.05, &NoiseConfig::default())
    }

    #[test]
    fn key_containing_handles_negative_coords() {
        assert_eq!(TileKey::containing(IVec2::new(0, 0), 64), TileKey::new(0, 0));
        assert_eq!(TileKey::containing(IVec2::new(63, 64), 64), TileKey::new(0, 1));
        assert_eq!(TileKey::containing(IVec2::new(-1, -64), 64), TileKey::new(-1, -1));
        assert_eq!(TileKey::containing(IVec2::new(-65, 5), 64), TileKey::new(-2, 0));
        assert_eq!(TileKey::new(-2, 3).origin(64), IVec2::new(-128, 192));
    }

    #[test]
    fn created_tile_is_fully_generated() {
        let f = field();
        let mut cache = TileCache::new(1, 16);
        let key = TileKey::new(-1, 2);
        let tile = cache.get_or_create_tile(key, &f);
        assert_eq!(tile.samples().len(), 256);

        let origin = key.origin(16);
        for z in 0..16 {
            for x in 0..16 {
                let c = origin + IVec2::new(x, z);
                assert_eq!(cache.sample(c), Some(f.generate_height(c, 1)));
            }
        }
    }

    #[test]
    fn get_or_create_returns_the_same_tile() {
        let f = field();
        let mut cache = TileCache::new(0, 8);
        let c = IVec2::new(3, 4);
        cache.get_or_create_tile(TileKey::containing(c, 8), &f).add(c, 1.5);
        let h = cache.get_or_create_tile(TileKey::containing(c, 8), &f).get(c);
        assert_eq!(h, f.generate_height(c, 0) + 1.5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_tiles_do_not_answer() {
        let cache = TileCache::new(0, 8);
        assert!(cache.is_empty());
        assert_eq!(cache.sample(IVec2::new(1, 1)), None);
    }
}
