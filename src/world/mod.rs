pub mod edits;
pub mod generator;
pub mod hash;
pub mod heights;
pub mod tiles;

pub use edits::{raise_area_rounded, DirtyRegion};
pub use generator::HeightField;
pub use heights::TerrainHeights;
pub use tiles::{Tile, TileCache, TileKey};

use glam::IVec2;

/// Level-0 coordinate -> level-global coordinate (floor division by 2^level).
#[inline(always)]
pub fn to_level(c: IVec2, level: u32) -> IVec2 {
    IVec2::new(c.x >> level, c.y >> level)
}
