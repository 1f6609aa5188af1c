// End-to-end clipmap behaviour on the CPU backend: what gets staged, copied and
// dispatched per frame, and that the resident textures always agree with the
// height read path.

use glam::{IVec2, UVec2, Vec2, Vec3};

use clipterrain::clipmap::normals::normal_from_neighbours;
use clipterrain::clipmap::wrap_coords;
use clipterrain::gpu::soft::SoftCommand;
use clipterrain::gpu::{NormalDispatch, TexRect};
use clipterrain::world::{self, to_level};
use clipterrain::{
    Clipmap, GpuError, QueueKind, SoftGpu, Terrain, TerrainConfig, TerrainError, TerrainHeights, UpdateStats,
};

fn cfg(levels: u32, dimension: u32, texel_size: f32) -> TerrainConfig {
    TerrainConfig {
        levels,
        dimension,
        texel_size,
        tile_dim: 16,
        ..Default::default()
    }
}

fn built(cfg: TerrainConfig) -> Terrain<SoftGpu> {
    let mut t = Terrain::new(cfg, SoftGpu::new()).unwrap();
    t.init().unwrap();
    t.build().unwrap();
    t.gpu_mut().take_log();
    t
}

/// World position at the centre of level-0 texel `c`.
fn at_texel(c: IVec2, texel: f32) -> Vec3 {
    Vec3::new((c.x as f32 + 0.5) * texel, 0.0, (c.y as f32 + 0.5) * texel)
}

fn copies(log: &[SoftCommand]) -> Vec<(QueueKind, TexRect)> {
    log.iter()
        .filter_map(|c| match c {
            SoftCommand::Copy { queue, copy } => Some((*queue, copy.rect)),
            _ => None,
        })
        .collect()
}

fn dispatches(log: &[SoftCommand]) -> Vec<NormalDispatch> {
    log.iter()
        .filter_map(|c| match c {
            SoftCommand::Dispatch(d) => Some(*d),
            _ => None,
        })
        .collect()
}

/// Every resident height texel equals the read path; every interior normal
/// equals the finite difference of the read path. The advertised windows must
/// be the ones the textures hold.
fn assert_clipmap_matches(cm: &Clipmap, gpu: &SoftGpu, heights: &TerrainHeights) {
    let dim = cm.dim();
    let params = cm.params();

    for lvl in cm.levels() {
        let l = lvl.index;
        let w = lvl.window();
        assert_eq!(params.level[l as usize].offset, lvl.offset.to_array(), "level {l} params");
        assert_eq!(params.level[l as usize].window_min, w.min.to_array(), "level {l} params");

        for z in w.min.y..w.max.y {
            for x in w.min.x..w.max.x {
                let c = IVec2::new(x, z);
                assert_eq!(
                    gpu.height_at(lvl.resources.height, wrap_coords(c, dim)),
                    heights.get_height(c, l),
                    "level {l} height at {c}"
                );
            }
        }

        let inner = w.expand(-1);
        for z in inner.min.y..inner.max.y {
            for x in inner.min.x..inner.max.x {
                let c = IVec2::new(x, z);
                let h = |d: IVec2| heights.get_height(c + d, l);
                let expect = normal_from_neighbours(h(-IVec2::X), h(IVec2::X), h(-IVec2::Y), h(IVec2::Y), lvl.texel_world);
                let got = gpu.normal_at(lvl.resources.normals, wrap_coords(c, dim));
                assert!((got - expect).length() < 1e-5, "level {l} normal at {c}: {got} vs {expect}");
            }
        }
    }
}

fn assert_resident_matches(t: &Terrain<SoftGpu>) {
    let cm = t.clipmap().unwrap();
    for lvl in cm.levels() {
        assert_eq!(lvl.offset, to_level(cm.offset(), lvl.index));
    }
    assert_clipmap_matches(cm, t.gpu(), t.heights());
}

/// A bare clipmap built around the origin, for the single-level entry points.
fn bare(cfg: &TerrainConfig) -> (Clipmap, SoftGpu, TerrainHeights) {
    let mut gpu = SoftGpu::new();
    let heights = TerrainHeights::new(cfg);
    let mut cm = Clipmap::create(&mut gpu, cfg).unwrap();
    cm.build(&mut gpu, &heights, IVec2::ZERO).unwrap();
    gpu.take_log();
    (cm, gpu, heights)
}

#[test]
fn ten_texel_move_east_restages_one_column_band() {
    let texel = 0.05;
    let mut t = built(cfg(1, 256, texel));

    let stats = t.update_clipmap_textures(at_texel(IVec2::new(10, 0), texel)).unwrap();
    assert_eq!(t.offset(), IVec2::new(10, 0));

    // Window [-128, 128) -> [-118, 138): columns 128..138 became resident.
    assert_eq!(stats.texels_staged, 10 * 256);
    assert_eq!(stats.rows_flushed, 256);
    assert_eq!(stats.copies, 1);
    assert_eq!(stats.normal_dispatches, 1);

    let log = t.gpu_mut().take_log();
    assert_eq!(
        copies(&log),
        vec![(QueueKind::Upload, TexRect { x: 128, y: 0, w: 10, h: 256 })]
    );

    let d = dispatches(&log);
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].origin, IVec2::new(127, -129));
    assert_eq!(d[0].size, UVec2::new(12, 256));

    // Copy on upload, compute waits for it, then barrier and normals.
    let order: Vec<&SoftCommand> = log
        .iter()
        .filter(|c| !matches!(c, SoftCommand::WriteStaging { .. }))
        .collect();
    assert!(matches!(order[0], SoftCommand::Copy { queue: QueueKind::Upload, .. }));
    let SoftCommand::Submit { queue: QueueKind::Upload, value } = *order[1] else {
        panic!("expected upload submit, got {:?}", order[1]);
    };
    assert_eq!(
        *order[2],
        SoftCommand::QueueWait {
            waiter: QueueKind::Compute,
            signaler: QueueKind::Upload,
            value
        }
    );
    assert!(matches!(order[3], SoftCommand::Barrier { queue: QueueKind::Compute, .. }));
    assert!(matches!(order[4], SoftCommand::Dispatch(_)));
    assert!(matches!(order[5], SoftCommand::Submit { queue: QueueKind::Compute, .. }));
    assert_eq!(order.len(), 6);

    assert_resident_matches(&t);
}

#[test]
fn idle_frame_does_no_gpu_work() {
    let mut t = built(cfg(3, 64, 1.0));
    let p = at_texel(IVec2::new(3, -2), 1.0);
    t.update_clipmap_textures(p).unwrap();
    t.gpu_mut().take_log();

    let stats = t.update_clipmap_textures(p).unwrap();
    assert_eq!(stats, UpdateStats::default());
    assert!(t.gpu().log().is_empty());
}

#[test]
fn coarse_levels_update_less_often() {
    let mut t = built(cfg(4, 64, 1.0));

    // 0 -> 1: only level 0 moves (1 >> 1 == 0).
    let s = t.update_clipmap_textures(at_texel(IVec2::new(1, 0), 1.0)).unwrap();
    assert_eq!(s.levels_updated, 1);

    // 1 -> 2: levels 0 and 1.
    let s = t.update_clipmap_textures(at_texel(IVec2::new(2, 0), 1.0)).unwrap();
    assert_eq!(s.levels_updated, 2);

    // 2 -> 8: everything down to level 3.
    let s = t.update_clipmap_textures(at_texel(IVec2::new(8, 0), 1.0)).unwrap();
    assert_eq!(s.levels_updated, 4);
    assert_resident_matches(&t);
}

#[test]
fn textures_track_the_read_path_through_moves_and_teleports() {
    let mut t = built(cfg(3, 64, 1.0));
    assert_resident_matches(&t);

    for c in [
        IVec2::new(5, 0),
        IVec2::new(5, -7),
        IVec2::new(-20, 13),
        IVec2::new(-21, 45),
        IVec2::new(300, -250),
        IVec2::new(301, -250),
        IVec2::new(-1000, 999),
    ] {
        t.update_clipmap_textures(at_texel(c, 1.0)).unwrap();
        assert_eq!(t.offset(), c);
        assert_resident_matches(&t);
    }
}

#[test]
fn teleport_refreshes_whole_levels() {
    let mut t = built(cfg(2, 64, 1.0));
    let s = t.update_clipmap_textures(at_texel(IVec2::new(500, 500), 1.0)).unwrap();
    assert_eq!(s.texels_staged, 2 * 64 * 64);

    let log = t.gpu_mut().take_log();
    let c = copies(&log);
    assert_eq!(c.len(), 2);
    for (q, r) in c {
        assert_eq!(q, QueueKind::Upload);
        assert_eq!(r, TexRect { x: 0, y: 0, w: 64, h: 64 });
    }
    assert_resident_matches(&t);
}

#[test]
fn edit_upload_clears_the_dirty_region() {
    let mut t = built(cfg(3, 64, 1.0));
    let region = t.raise_area_rounded(Vec2::new(10.0, -4.0), 3.0, 0.5).unwrap();
    assert_eq!(t.pending_dirty(), Some(region));

    let s = t.update_clipmap_textures(Vec3::ZERO).unwrap();
    assert!(s.texels_staged > 0);
    assert_eq!(t.pending_dirty(), None);

    // No recentring: copies stay on the compute queue, nothing on upload.
    let log = t.gpu_mut().take_log();
    assert!(copies(&log).iter().all(|(q, _)| *q == QueueKind::Compute));
    assert!(!log
        .iter()
        .any(|c| matches!(c, SoftCommand::Submit { queue: QueueKind::Upload, .. })));
    assert_resident_matches(&t);

    // Second consecutive frame with no new edit: no staging at all.
    let s = t.update_clipmap_textures(Vec3::ZERO).unwrap();
    assert_eq!(s.texels_staged, 0);
    assert_eq!(s, UpdateStats::default());
}

#[test]
fn edit_across_both_seams_splits_into_four_copies() {
    let mut t = built(cfg(1, 64, 1.0));
    // [-3..=3] on both axes straddles texel 0 on both axes.
    t.raise_area_rounded(Vec2::ZERO, 3.0, 0.1).unwrap();
    let s = t.update_clipmap_textures(Vec3::ZERO).unwrap();
    assert_eq!(s.texels_staged, 49);

    let log = t.gpu_mut().take_log();
    let c = copies(&log);
    assert_eq!(
        c.iter().map(|(_, r)| *r).collect::<Vec<_>>(),
        vec![
            TexRect { x: 61, y: 61, w: 3, h: 3 },
            TexRect { x: 0, y: 61, w: 4, h: 3 },
            TexRect { x: 61, y: 0, w: 3, h: 4 },
            TexRect { x: 0, y: 0, w: 4, h: 4 },
        ]
    );
    assert_resident_matches(&t);
}

#[test]
fn edit_outside_the_window_is_a_no_op_for_that_level() {
    let mut t = built(cfg(3, 64, 1.0));
    // Level-0 window is [-32, 32); level 2 covers [-128, 128).
    t.raise_area_rounded(Vec2::new(100.0, 0.0), 2.0, 1.0).unwrap();
    let s = t.update_clipmap_textures(Vec3::ZERO).unwrap();
    assert_eq!(s.levels_updated, 1);
    assert_eq!(t.pending_dirty(), None);
    assert_resident_matches(&t);
}

#[test]
fn edit_and_move_share_one_pass() {
    let mut t = built(cfg(2, 64, 1.0));
    t.raise_area_rounded(Vec2::new(-30.0, 0.0), 4.0, 0.3).unwrap();

    // The edit sits at the west edge; moving east scrolls part of it out.
    let s = t.update_clipmap_textures(at_texel(IVec2::new(6, 0), 1.0)).unwrap();
    assert!(s.texels_staged > 6 * 64);

    let log = t.gpu_mut().take_log();
    let submits: Vec<_> = log
        .iter()
        .filter(|c| matches!(c, SoftCommand::Submit { .. }))
        .collect();
    assert_eq!(submits.len(), 2, "one upload and one compute submit: {submits:?}");
    assert!(copies(&log).iter().all(|(q, _)| *q == QueueKind::Upload));
    assert_resident_matches(&t);
}

#[test]
fn staging_reuse_waits_for_the_previous_pass() {
    let mut t = Terrain::new(cfg(2, 64, 1.0), SoftGpu::new()).unwrap();
    t.init().unwrap();
    t.gpu_mut().set_hold_completion(true);
    t.build().unwrap();

    let s = t.update_clipmap_textures(at_texel(IVec2::new(4, 4), 1.0)).unwrap();
    // Both levels share the build's compute fence: one wait retires it.
    assert_eq!(s.levels_updated, 2);
    assert_eq!(s.staging_waits, 1);
    assert_resident_matches(&t);
}

#[test]
fn stalled_gpu_surfaces_a_fence_timeout() {
    let mut t = Terrain::new(cfg(1, 64, 1.0), SoftGpu::new()).unwrap();
    t.init().unwrap();
    t.gpu_mut().set_hold_completion(true);
    t.build().unwrap();
    t.gpu_mut().set_stalled(true);

    let err = t.update_clipmap_textures(at_texel(IVec2::new(9, 0), 1.0)).unwrap_err();
    assert!(
        matches!(err, TerrainError::Gpu(GpuError::FenceTimeout { queue: QueueKind::Compute, .. })),
        "{err}"
    );
}

#[test]
fn render_binds_the_resident_windows() {
    let mut t = built(cfg(3, 64, 1.0));
    let params = t.render(at_texel(IVec2::new(-9, 20), 1.0)).unwrap();
    assert_eq!(t.gpu().bound_clipmap(), Some(&params));

    assert_eq!(params.levels, 3);
    assert_eq!(params.dim, 64);
    assert_eq!(params.level[0].offset, [-9, 20]);
    assert_eq!(params.level[0].window_min, [-41, -12]);
    assert_eq!(params.level[1].offset, [-5, 10]);
    assert_eq!(params.level[2].offset, [-3, 5]);
    assert_eq!(params.level[2].texel_world, 4.0);
}

#[test]
fn set_viewpoint_places_the_first_build() {
    let mut t = Terrain::new(cfg(2, 64, 1.0), SoftGpu::new()).unwrap();
    t.set_viewpoint(at_texel(IVec2::new(700, -30), 1.0));
    t.init().unwrap();
    t.build().unwrap();
    assert_eq!(t.offset(), IVec2::new(700, -30));
    assert_resident_matches(&t);
}

#[test]
#[should_panic(expected = "in flight")]
fn edit_during_build_upload_panics() {
    let mut t = Terrain::new(cfg(1, 64, 1.0), SoftGpu::new()).unwrap();
    t.init().unwrap();
    t.gpu_mut().set_hold_completion(true);
    t.build().unwrap();
    t.raise_area_rounded(Vec2::ZERO, 1.0, 1.0);
}

#[test]
#[should_panic(expected = "pending dirty region")]
fn second_edit_before_upload_panics() {
    let mut t = built(cfg(1, 64, 1.0));
    t.raise_area_rounded(Vec2::ZERO, 1.0, 1.0);
    t.raise_area_rounded(Vec2::new(5.0, 5.0), 1.0, 1.0);
}

#[test]
fn update_level_scrolls_one_level_and_records_its_window() {
    let cfg = cfg(2, 64, 1.0);
    let (mut cm, mut gpu, heights) = bare(&cfg);

    let pass = cm.update_level(&mut gpu, &heights, 0, IVec2::ZERO, IVec2::new(10, 0)).unwrap();
    assert_eq!(pass.stats.levels_updated, 1);
    assert_eq!(pass.stats.texels_staged, 10 * 64);

    // [-32, 32) -> [-22, 42): columns 32..42.
    let log = gpu.take_log();
    assert_eq!(
        copies(&log),
        vec![(QueueKind::Upload, TexRect { x: 32, y: 0, w: 10, h: 64 })]
    );
    assert_eq!(cm.level(0).offset, IVec2::new(10, 0));
    assert_eq!(cm.level(1).offset, IVec2::ZERO);
    assert_clipmap_matches(&cm, &gpu, &heights);

    // The full update only has level 1 left to move.
    let pass = cm.update(&mut gpu, &heights, None, IVec2::new(10, 0)).unwrap();
    assert_eq!(pass.stats.levels_updated, 1);
    assert_eq!(pass.stats.texels_staged, 5 * 64);
    assert_eq!(cm.level(1).offset, IVec2::new(5, 0));
    assert_clipmap_matches(&cm, &gpu, &heights);
}

#[test]
fn upload_region_restages_only_that_level() {
    let cfg = cfg(2, 64, 1.0);
    let (mut cm, mut gpu, mut heights) = bare(&cfg);
    let region = world::raise_area_rounded(&mut heights, 1.0, Vec2::ZERO, 3.0, 0.5).unwrap();

    // Level 1 footprint [-2..=1] straddles both seams.
    let pass = cm.upload_region(&mut gpu, &heights, 1, region, IVec2::ZERO).unwrap();
    assert_eq!(pass.stats.texels_staged, 16);
    assert_eq!(pass.upload_fence, 0);
    let log = gpu.take_log();
    let c = copies(&log);
    assert_eq!(c.len(), 4);
    assert!(c.iter().all(|(q, _)| *q == QueueKind::Compute));

    // Level 0 is still stale at the edit.
    let l0 = cm.level(0);
    assert_ne!(
        gpu.height_at(l0.resources.height, wrap_coords(IVec2::ZERO, 64)),
        heights.get_height(IVec2::ZERO, 0)
    );

    cm.upload_region(&mut gpu, &heights, 0, region, IVec2::ZERO).unwrap();
    assert_clipmap_matches(&cm, &gpu, &heights);
}

#[test]
fn upload_region_follows_a_level_moved_on_its_own() {
    let cfg = cfg(2, 64, 1.0);
    let (mut cm, mut gpu, mut heights) = bare(&cfg);
    cm.update_level(&mut gpu, &heights, 0, IVec2::ZERO, IVec2::new(40, 0)).unwrap();

    // Resident only in level 0's moved window [8, 72).
    let region = world::raise_area_rounded(&mut heights, 1.0, Vec2::new(60.0, 0.0), 2.0, 1.0).unwrap();
    let pass = cm.upload_region(&mut gpu, &heights, 0, region, IVec2::new(40, 0)).unwrap();
    assert_eq!(pass.stats.texels_staged, 25);

    // Level 1 still holds [-32, 32); the edit at level-1 x 29..=31 is inside it.
    cm.upload_region(&mut gpu, &heights, 1, region, IVec2::ZERO).unwrap();
    assert_clipmap_matches(&cm, &gpu, &heights);
}

#[test]
#[should_panic(expected = "holds the window")]
fn single_level_calls_must_name_the_held_window() {
    let cfg = cfg(1, 64, 1.0);
    let (mut cm, mut gpu, heights) = bare(&cfg);
    cm.update_level(&mut gpu, &heights, 0, IVec2::new(3, 0), IVec2::new(9, 0)).unwrap();
}

#[test]
#[should_panic(expected = "out of range")]
fn single_level_calls_check_the_level() {
    let cfg = cfg(2, 64, 1.0);
    let (mut cm, mut gpu, heights) = bare(&cfg);
    cm.update_level(&mut gpu, &heights, 2, IVec2::ZERO, IVec2::new(1, 0)).unwrap();
}
