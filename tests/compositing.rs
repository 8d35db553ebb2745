//! End-to-end tests over a threaded multi-rank world.
//!
//! Every test spins up an in-process fabric, drives one rank per thread and
//! checks the image (or collective result) the group produces.

use sortlast::comm::{ParallelContext, TAG_FIRST};
use sortlast::{
    Compositor, CompositorConfig, DepthOrder, Extents, Rgba, StrategyKind, Tile, OPAQUE_BLACK,
};

fn with_world<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ParallelContext) -> T + Sync,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let contexts = ParallelContext::local_world(n);
    std::thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| scope.spawn(move || f(ctx)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn solid(extents: Extents, color: Rgba, depth: f32) -> Tile {
    let mut pixels = vec![0.0; extents.area() * 4];
    for px in pixels.chunks_exact_mut(4) {
        px.copy_from_slice(&color);
    }
    Tile::new(pixels, extents, depth)
}

fn pixel(image: &[f32], width: usize, x: usize, y: usize) -> [f32; 4] {
    let i = (y * width + x) * 4;
    [image[i], image[i + 1], image[i + 2], image[i + 3]]
}

/// Blend the same global tile set on one rank, front-to-back. The region
/// strategies apply the identical scalar kernel in the identical depth
/// order, so their output must match this bitwise.
fn reference_image(tiles: impl IntoIterator<Item = Tile>, width: u32, height: u32) -> Vec<f32> {
    let world = ParallelContext::local_world(1).pop().unwrap();
    let mut engine = Compositor::new(
        StrategyKind::SingleProcess,
        world,
        OPAQUE_BLACK,
        DepthOrder::FrontToBack,
        &CompositorConfig::default(),
    )
    .unwrap();
    engine.init(width, height).unwrap();
    for tile in tiles {
        engine.submit_tile(tile).unwrap();
    }
    let mut image = Vec::new();
    assert!(engine.composite(&mut image).unwrap());
    image
}

fn run_strategy(
    kind: StrategyKind,
    ranks: usize,
    width: u32,
    height: u32,
    order: DepthOrder,
    tiles_for_rank: impl Fn(usize) -> Vec<Tile> + Sync,
) -> Vec<f32> {
    let results = with_world(ranks, |ctx| {
        let r = ctx.rank().unwrap();
        let mut engine = Compositor::new(
            kind,
            ctx,
            OPAQUE_BLACK,
            order,
            &CompositorConfig::default(),
        )
        .unwrap();
        engine.init(width, height).unwrap();
        for tile in tiles_for_rank(r) {
            engine.submit_tile(tile).unwrap();
        }
        let mut image = Vec::new();
        engine.composite(&mut image).unwrap().then_some(image)
    });
    let mut images: Vec<_> = results.into_iter().flatten().collect();
    assert_eq!(images.len(), 1, "exactly one rank must hold the result");
    images.pop().unwrap()
}

// =============================================================================
// Collectives
// =============================================================================

#[test]
fn test_reductions_and_broadcasts() {
    with_world(4, |ctx| {
        let r = ctx.rank().unwrap();

        let mut sums = vec![r as u32, 10 + r as u32];
        ctx.sum_array_u32(&mut sums).unwrap();
        assert_eq!(sums, vec![6, 46]);

        let mut hi = vec![r as f32];
        ctx.unify_max_array_f32(&mut hi).unwrap();
        assert_eq!(hi, vec![3.0]);

        let mut lo = vec![-(r as f32)];
        ctx.unify_min_array_f32(&mut lo).unwrap();
        assert_eq!(lo, vec![-3.0]);

        assert_eq!(ctx.broadcast_u32(2, r as u32 * 100).unwrap(), 200);

        let seed = if r == 0 { b"palette".to_vec() } else { Vec::new() };
        assert_eq!(ctx.broadcast_bytes(0, seed).unwrap(), b"palette");
        assert!(ctx.broadcast_bytes(1, Vec::new()).unwrap().is_empty());

        ctx.barrier().unwrap();
    });
}

#[test]
fn test_alltoall_exchanges_per_rank_records() {
    with_world(3, |ctx| {
        let my = ctx.rank().unwrap() as u32;
        let send: Vec<u32> = (0..3).flat_map(|dst| [my * 10 + dst, my]).collect();
        let got = ctx.alltoall_u32(&send, 2).unwrap();
        for s in 0..3u32 {
            assert_eq!(&got[s as usize * 2..][..2], &[s * 10 + my, s]);
        }
    });
}

#[test]
fn test_tag_allocation_is_lock_step() {
    with_world(3, |ctx| {
        let a = ctx.unique_tags(2).unwrap();
        let b = ctx.unique_tags(1).unwrap();
        assert_eq!(a, vec![TAG_FIRST, TAG_FIRST + 1]);
        assert_eq!(b, vec![TAG_FIRST + 2]);
    });
}

#[test]
fn test_group_subdivision() {
    with_world(6, |ctx| {
        let my = ctx.rank().unwrap();

        let parity = ctx.split(my as u32 % 2, 2).unwrap();
        assert_eq!(parity.size(), 3);
        assert_eq!(parity.rank(), Some(my / 2));
        let mut v = vec![my as u32];
        parity.sum_array_u32(&mut v).unwrap();
        assert_eq!(v[0], if my % 2 == 0 { 6 } else { 9 });

        let (block, index, count) = ctx.create_groups_of_n(4).unwrap();
        assert_eq!(count, 2);
        assert_eq!(index, my / 4);
        assert_eq!(block.size(), if my < 4 { 4 } else { 2 });
        assert_eq!(block.rank(), Some(my % 4));

        let edges = ctx.create_subgroup(&[0, 5]).unwrap();
        let mut ones = vec![1u32];
        edges.sum_array_u32(&mut ones).unwrap();
        if my == 0 || my == 5 {
            assert!(edges.is_member());
            assert_eq!(ones[0], 2);
        } else {
            // collectives on a group this rank is outside are no-ops
            assert!(!edges.is_member());
            assert_eq!(ones[0], 1);
        }
    });
}

// =============================================================================
// Strategies
// =============================================================================

#[test]
fn test_serial_assembles_disjoint_columns() {
    let colors: [Rgba; 4] = [
        [1.0, 0.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
        [0.0, 0.0, 1.0, 1.0],
        [1.0, 1.0, 1.0, 1.0],
    ];
    let image = run_strategy(
        StrategyKind::SerialDirectSend,
        4,
        64,
        64,
        DepthOrder::BackToFront,
        |r| {
            let x0 = 16 * r as i32;
            vec![solid(
                Extents::new(x0, x0 + 16, 0, 64),
                colors[r],
                (r + 1) as f32,
            )]
        },
    );
    for (r, color) in colors.iter().enumerate() {
        assert_eq!(pixel(&image, 64, 16 * r + 8, 32), *color, "column {r}");
    }
}

#[test]
fn test_serial_nearest_opaque_patch_occludes() {
    let image = run_strategy(
        StrategyKind::SerialDirectSend,
        3,
        16,
        16,
        DepthOrder::BackToFront,
        |r| {
            let colors: [Rgba; 3] = [
                [1.0, 0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
            ];
            vec![solid(Extents::full(16, 16), colors[r], (3 - r) as f32)]
        },
    );
    // rank 2 rendered the nearest patch
    assert_eq!(pixel(&image, 16, 8, 8), [0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_direct_send_matches_single_process() {
    let tile_for = |r: usize| {
        let shades: [Rgba; 3] = [
            [0.6, 0.0, 0.0, 0.6],
            [0.0, 0.45, 0.0, 0.45],
            [0.0, 0.0, 0.3, 0.3],
        ];
        solid(Extents::full(48, 48), shades[r], (r + 1) as f32)
    };

    let image = run_strategy(
        StrategyKind::DirectSend,
        3,
        48,
        48,
        DepthOrder::FrontToBack,
        |r| vec![tile_for(r)],
    );
    let reference = reference_image((0..3).map(tile_for), 48, 48);
    assert_eq!(image, reference);
}

#[test]
fn test_direct_send_reconstructs_disjoint_bands() {
    // Opaque row bands that exactly tile the screen must come back verbatim.
    let band = |r: usize| {
        let y0 = 8 * r as i32;
        solid(
            Extents::new(0, 32, y0, y0 + 8),
            [0.25 * (r + 1) as f32, 0.0, 0.0, 1.0],
            1.0 + r as f32,
        )
    };
    let image = run_strategy(
        StrategyKind::DirectSend,
        4,
        32,
        32,
        DepthOrder::FrontToBack,
        |r| vec![band(r)],
    );
    for r in 0..4 {
        let px = pixel(&image, 32, 16, 8 * r + 4);
        assert_eq!(px, [0.25 * (r + 1) as f32, 0.0, 0.0, 1.0], "band {r}");
    }
}

#[test]
fn test_overlapping_opaque_bands_reproduce_the_image() {
    // Splitting a solid fully-opaque image into overlapping row bands must
    // reproduce it exactly: the overlap regions blend identical pixels.
    let color: Rgba = [0.3, 0.7, 0.1, 1.0];
    let band = |r: usize| {
        // bands of 12 rows starting every 8, so neighbors overlap by 4
        let y0 = (8 * r) as i32;
        solid(
            Extents::new(0, 32, y0, (y0 + 12).min(32)),
            color,
            1.0 + r as f32,
        )
    };

    for kind in [StrategyKind::DirectSend, StrategyKind::MultiPatch] {
        let image = run_strategy(kind, 4, 32, 32, DepthOrder::FrontToBack, |r| {
            vec![band(r)]
        });
        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(pixel(&image, 32, x, y), color, "{kind:?} pixel ({x},{y})");
            }
        }
    }
}

#[test]
fn test_multi_patch_matches_single_process() {
    // Two patches per rank, distinct depths, some partially off-screen.
    let patches_for = |r: usize| -> Vec<Tile> {
        let base = r as i32 * 7 - 4;
        vec![
            solid(
                Extents::new(base, base + 20, 3 * r as i32, 3 * r as i32 + 18),
                [0.5, 0.1 * r as f32, 0.0, 0.5],
                10.0 * (r + 1) as f32,
            ),
            solid(
                Extents::new(12, 44, base + 10, base + 30),
                [0.0, 0.4, 0.2, 0.6],
                10.0 * (r + 1) as f32 + 5.0,
            ),
        ]
    };

    let image = run_strategy(
        StrategyKind::MultiPatch,
        3,
        40,
        40,
        DepthOrder::FrontToBack,
        |r| patches_for(r),
    );
    let reference = reference_image((0..3).flat_map(patches_for), 40, 40);
    assert_eq!(image, reference);
}

#[test]
fn test_multi_patch_is_deterministic_with_duplicate_depths() {
    // Equal depths exercise the (depth, owner, patch) tie-break.
    let run = || {
        run_strategy(
            StrategyKind::MultiPatch,
            4,
            32,
            32,
            DepthOrder::FrontToBack,
            |r| {
                vec![
                    solid(Extents::full(32, 32), [0.3, 0.1 * r as f32, 0.2, 0.4], 5.0),
                    solid(
                        Extents::new(4, 28, 4, 28),
                        [0.1 * r as f32, 0.3, 0.0, 0.35],
                        5.0,
                    ),
                ]
            },
        )
    };
    let first = run();
    let second = run();
    assert_eq!(first, second);
}

#[test]
fn test_more_ranks_than_rows() {
    // 6 ranks over a 4-row screen leaves some ranks with empty strips.
    let image = run_strategy(
        StrategyKind::MultiPatch,
        6,
        8,
        4,
        DepthOrder::FrontToBack,
        |r| {
            if r == 2 {
                vec![solid(Extents::full(8, 4), [0.0, 1.0, 0.0, 1.0], 1.0)]
            } else {
                Vec::new()
            }
        },
    );
    assert_eq!(pixel(&image, 8, 3, 3), [0.0, 1.0, 0.0, 1.0]);
}

#[test]
fn test_empty_pass_yields_background() {
    let image = run_strategy(
        StrategyKind::DirectSend,
        3,
        16,
        8,
        DepthOrder::FrontToBack,
        |_| Vec::new(),
    );
    for y in 0..8 {
        for x in 0..16 {
            assert_eq!(pixel(&image, 16, x, y), OPAQUE_BLACK);
        }
    }
}

#[test]
fn test_stats_accumulate() {
    let reports = with_world(2, |ctx| {
        let mut engine = Compositor::new(
            StrategyKind::SerialDirectSend,
            ctx,
            OPAQUE_BLACK,
            DepthOrder::BackToFront,
            &CompositorConfig::default(),
        )
        .unwrap();
        engine.init(8, 8).unwrap();
        engine
            .submit_tile(solid(Extents::full(8, 8), [1.0, 0.0, 0.0, 1.0], 1.0))
            .unwrap();
        let mut image = Vec::new();
        engine.composite(&mut image).unwrap();
        *engine.stats()
    });
    for stats in &reports {
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.tiles_submitted, 1);
        assert!(stats.last_worker_count >= 1);
    }
    // rank 0 blended both tiles, rank 1 blended none
    let blended: Vec<u64> = reports.iter().map(|s| s.fragments_blended).collect();
    assert!(blended.contains(&2) && blended.contains(&0));
}
