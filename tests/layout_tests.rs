use mosaic_engine::api::ImageMeta;
use mosaic_engine::layout::{create_grid_layout, create_simple_grid_layout, GridLayoutParams};
use mosaic_engine::utils::Rectangle;

fn meta(id: &str, width: u32, height: u32) -> ImageMeta {
    ImageMeta {
        id: id.into(),
        width,
        height,
    }
}

#[test]
fn four_images_land_on_a_two_by_two_grid() {
    let images = [
        meta("square", 100, 100),
        meta("wide", 200, 100),
        meta("tall", 100, 200),
        meta("small", 50, 50),
    ];
    let refs: Vec<&ImageMeta> = images.iter().collect();
    let layout = create_simple_grid_layout(&refs, &GridLayoutParams::default());

    let placed: Vec<(&str, Rectangle)> = layout.iter().map(|c| (c.id.as_str(), c.dst)).collect();
    assert_eq!(
        placed,
        vec![
            ("square", Rectangle::new(0.0, 0.0, 100.0, 100.0)),
            ("wide", Rectangle::new(110.0, 0.0, 100.0, 50.0)),
            ("tall", Rectangle::new(0.0, 110.0, 50.0, 100.0)),
            ("small", Rectangle::new(110.0, 110.0, 100.0, 100.0)),
        ]
    );
}

#[test]
fn empty_cells_leave_gaps() {
    let wide = meta("wide", 200, 100);
    let tall = meta("tall", 100, 200);
    let rows = vec![vec![None, Some(&wide)], vec![Some(&tall), None]];

    let layout = create_grid_layout(&rows, &GridLayoutParams::default());
    assert_eq!(layout.len(), 2);
    assert_eq!(layout[0].dst, Rectangle::new(110.0, 0.0, 100.0, 50.0));
    assert_eq!(layout[1].dst, Rectangle::new(0.0, 110.0, 50.0, 100.0));
}
