// src/world/heights.rs
//
// The read path every staging write goes through: tile cache first, procedural
// field on a miss.

use glam::IVec2;

use crate::config::TerrainConfig;
use crate::world::generator::HeightField;
use crate::world::tiles::{Tile, TileCache, TileKey};

pub struct TerrainHeights {
    field: HeightField,
    caches: Vec<TileCache>,
}

impl TerrainHeights {
    pub fn new(cfg: &TerrainConfig) -> Self {
        let field = HeightField::new(cfg.seed, cfg.texel_size, &cfg.noise);
        let caches = (0..cfg.levels).map(|l| TileCache::new(l, cfg.tile_dim)).collect();
        Self { field, caches }
    }

    #[inline]
    pub fn levels(&self) -> u32 {
        self.caches.len() as u32
    }

    #[inline]
    pub fn tile_dim(&self) -> u32 {
        self.caches[0].tile_dim()
    }

    #[inline]
    pub fn field(&self) -> &HeightField {
        &self.field
    }

    #[inline]
    pub fn cache(&self, level: u32) -> &TileCache {
        self.check_level(level);
        &self.caches[level as usize]
    }

    #[inline(always)]
    fn check_level(&self, level: u32) {
        assert!(
            (level as usize) < self.caches.len(),
            "clip level {level} out of range (levels = {})",
            self.caches.len()
        );
    }

    #[inline]
    pub fn generate_height(&self, c: IVec2, level: u32) -> f32 {
        self.field.generate_height(c, level)
    }

    #[inline]
    pub fn get_height(&self, c: IVec2, level: u32) -> f32 {
        self.check_level(level);
        match self.caches[level as usize].sample(c) {
            Some(h) => h,
            None => self.field.generate_height(c, level),
        }
    }

    pub fn get_or_create_tile(&mut self, key: TileKey, level: u32) -> &mut Tile {
        self.check_level(level);
        let Self { field, caches } = self;
        caches[level as usize].get_or_create_tile(key, field)
    }

    /// Total materialized tiles across all levels.
    pub fn tile_count(&self) -> usize {
        self.caches.iter().map(TileCache::len).sum()
    }
}
