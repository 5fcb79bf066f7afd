use mosaic_engine::gpu::{GraphicsDrawCommand, TextureHandle};
use mosaic_engine::grid::CollisionGrid;
use mosaic_engine::utils::{Point, Rectangle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn command(id: &str, x: f32, y: f32, w: f32, h: f32) -> GraphicsDrawCommand {
    GraphicsDrawCommand {
        id: id.into(),
        texture: TextureHandle(1),
        src: Rectangle::new(0.0, 0.0, w, h),
        dst: Rectangle::new(x, y, w, h),
    }
}

fn ids(hits: Vec<&GraphicsDrawCommand>) -> Vec<&str> {
    hits.into_iter().map(|c| c.id.as_str()).collect()
}

#[test]
fn query_edges_are_half_open() {
    let grid = CollisionGrid::build_with_cell_size(
        vec![
            command("a", 0.0, 0.0, 40.0, 40.0),
            command("b", 1950.0, 1950.0, 40.0, 40.0),
            command("c", 1960.0, 1960.0, 40.0, 40.0),
        ],
        500.0,
    );
    assert_eq!(grid.dimensions(), (4, 4));

    let lower = grid.collisions_rect(&Rectangle::new(0.0, 0.0, 1000.0, 1000.0));
    assert_eq!(ids(lower), vec!["a"]);

    let upper = grid.collisions_rect(&Rectangle::new(1000.0, 1000.0, 1000.0, 1000.0));
    assert_eq!(ids(upper), vec!["b", "c"]);

    let inner = grid.collisions_rect(&Rectangle::new(1000.0, 1000.0, 500.0, 500.0));
    assert!(inner.is_empty());

    let spill = grid.collisions_rect(&Rectangle::new(1000.0, 1000.0, 500.5, 500.5));
    assert_eq!(ids(spill), vec!["b", "c"]);
}

/// Every command overlapping a modest query is reported, and only once.
#[test]
fn small_queries_cover_every_overlap() {
    let mut rng = StdRng::seed_from_u64(42);
    let commands: Vec<_> = (0..300)
        .map(|i| {
            command(
                &format!("img{i}"),
                rng.gen_range(0.0..5000.0),
                rng.gen_range(0.0..5000.0),
                rng.gen_range(1.0..150.0),
                rng.gen_range(1.0..150.0),
            )
        })
        .collect();
    let grid = CollisionGrid::build(commands.clone());
    let (cell_w, _) = grid.cell_size();

    for _ in 0..200 {
        let query = Rectangle::new(
            rng.gen_range(0.0..5000.0),
            rng.gen_range(0.0..5000.0),
            rng.gen_range(1.0..cell_w * 2.0),
            rng.gen_range(1.0..cell_w * 2.0),
        );
        let hits = ids(grid.collisions_rect(&query));

        let mut unique = hits.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), hits.len(), "duplicates for {query:?}");

        for c in commands.iter().filter(|c| c.dst.intersects(&query)) {
            assert!(hits.contains(&c.id.as_str()), "{} missing for {query:?}", c.id);
        }
    }
}

/// Largest f32 below a positive `v`.
fn just_below(v: f32) -> f32 {
    f32::from_bits(v.to_bits() - 1)
}

/// Points on a command, down to the last representable value before its far
/// edges, find that command.
#[test]
fn points_inside_a_command_always_find_it() {
    let mut rng = StdRng::seed_from_u64(7);
    let commands: Vec<_> = (0..3000)
        .map(|i| {
            command(
                &format!("img{i}"),
                rng.gen_range(0.0..5000.0),
                rng.gen_range(0.0..5000.0),
                rng.gen_range(1.0..150.0),
                rng.gen_range(1.0..150.0),
            )
        })
        .collect();
    let grid = CollisionGrid::build(commands.clone());

    for c in &commands {
        let far = c.dst.offset_point();
        let points = [
            c.dst.base_point(),
            c.dst.center(),
            Point::new(just_below(far.x), just_below(far.y)),
            Point::new(c.dst.x(), just_below(far.y)),
            Point::new(just_below(far.x), c.dst.y()),
        ];
        for p in points {
            assert!(c.dst.contains_coord(p));
            let hits = ids(grid.collisions_coord(p));
            assert!(hits.contains(&c.id.as_str()), "{} missing at {p:?}", c.id);
        }
    }
}

#[test]
fn point_queries_match_containment() {
    let grid = CollisionGrid::build(vec![
        command("left", 0.0, 0.0, 100.0, 100.0),
        command("right", 100.0, 0.0, 100.0, 100.0),
    ]);
    assert_eq!(ids(grid.collisions_coord(Point::new(99.9, 50.0))), vec!["left"]);
    assert_eq!(ids(grid.collisions_coord(Point::new(100.0, 50.0))), vec!["right"]);
    assert!(grid.collisions_coord(Point::new(-1.0, 50.0)).is_empty());
}
