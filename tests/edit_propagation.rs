// Edits flow from the tile caches to every resident clip level.

use glam::{IVec2, Vec2, Vec3};

use clipterrain::clipmap::wrap_coords;
use clipterrain::world::edits::downsample;
use clipterrain::{SoftGpu, Terrain, TerrainConfig};

fn terrain(cfg: TerrainConfig) -> Terrain<SoftGpu> {
    let mut t = Terrain::new(cfg, SoftGpu::new()).unwrap();
    t.init().unwrap();
    t.build().unwrap();
    t
}

fn resident_height(t: &Terrain<SoftGpu>, level: u32, c: IVec2) -> f32 {
    let cm = t.clipmap().unwrap();
    let lvl = cm.level(level);
    t.gpu().height_at(lvl.resources.height, wrap_coords(c, cm.dim()))
}

#[test]
fn raised_peak_reaches_the_textures() {
    let mut t = terrain(TerrainConfig {
        levels: 3,
        ..Default::default()
    });
    let base = t.heights().generate_height(IVec2::ZERO, 0);
    assert_eq!(resident_height(&t, 0, IVec2::ZERO), base);

    let region = t.raise_area_rounded(Vec2::ZERO, 3.0, 0.002).unwrap();
    // 3 m at 5 cm texels, symmetric about the origin.
    assert_eq!(region.min, -region.max);
    assert!((59..=60).contains(&region.max.x));

    // Not visible on the GPU until the next update.
    assert_eq!(resident_height(&t, 0, IVec2::ZERO), base);
    t.update_clipmap_textures(Vec3::ZERO).unwrap();

    let peak = resident_height(&t, 0, IVec2::ZERO);
    assert!((peak - base - 0.018).abs() < 1e-5, "peak rose by {}", peak - base);
}

#[test]
fn coarse_levels_hold_the_box_filtered_edit() {
    let mut t = terrain(TerrainConfig {
        levels: 4,
        dimension: 64,
        texel_size: 1.0,
        tile_dim: 16,
        ..Default::default()
    });

    let edits = [
        (Vec2::new(0.0, 0.0), 9.0, 0.01),
        (Vec2::new(6.0, 5.0), 7.0, -0.02),
        (Vec2::new(-20.0, 11.0), 4.0, 0.05),
    ];
    let mut regions = Vec::new();
    for (pos, radius, amount) in edits {
        regions.push(t.raise_area_rounded(pos, radius, amount).unwrap());
        t.update_clipmap_textures(Vec3::ZERO).unwrap();
    }

    for region in regions {
        for level in 1..4 {
            let fp = region.at_level(level);
            for z in fp.min.y..=fp.max.y {
                for x in fp.min.x..=fp.max.x {
                    let c = IVec2::new(x, z);
                    let expect = downsample(t.heights(), c, level);
                    assert_eq!(t.heights().get_height(c, level), expect, "cache level {level} {c}");
                    assert_eq!(resident_height(&t, level, c), expect, "texture level {level} {c}");
                }
            }
        }
    }
}

#[test]
fn edit_survives_scrolling_away_and_back() {
    let mut t = terrain(TerrainConfig {
        levels: 2,
        dimension: 64,
        texel_size: 1.0,
        tile_dim: 16,
        ..Default::default()
    });
    let c = IVec2::new(3, -2);
    t.raise_area_rounded(Vec2::new(3.0, -2.0), 2.0, 1.0).unwrap();
    t.update_clipmap_textures(Vec3::ZERO).unwrap();
    let edited = t.heights().get_height(c, 0);
    assert!(edited > t.heights().generate_height(c, 0));

    // Far enough that level 0 is fully replaced, then back.
    t.update_clipmap_textures(Vec3::new(1000.5, 0.0, 0.5)).unwrap();
    assert_eq!(t.offset(), IVec2::new(1000, 0));
    t.update_clipmap_textures(Vec3::new(0.5, 0.0, 0.5)).unwrap();

    assert_eq!(resident_height(&t, 0, c), edited);
}

#[test]
fn edit_outside_every_window_only_touches_the_cache() {
    let mut t = terrain(TerrainConfig {
        levels: 2,
        dimension: 64,
        texel_size: 1.0,
        tile_dim: 16,
        ..Default::default()
    });
    // Level 1 covers [-64, 64) in level-0 texels.
    t.raise_area_rounded(Vec2::new(500.0, 500.0), 3.0, 1.0).unwrap();
    let stats = t.update_clipmap_textures(Vec3::ZERO).unwrap();
    assert_eq!(stats.texels_staged, 0);
    assert_eq!(stats.levels_updated, 0);
    assert_eq!(t.pending_dirty(), None);

    // It shows up once the window gets there.
    t.update_clipmap_textures(Vec3::new(500.5, 0.0, 500.5)).unwrap();
    let c = IVec2::new(500, 500);
    assert_eq!(resident_height(&t, 0, c), t.heights().get_height(c, 0));
    assert!(resident_height(&t, 0, c) > t.heights().generate_height(c, 0));
}
