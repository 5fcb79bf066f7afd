use mosaic_engine::texture_atlas::{pack_bitmaps, Bitmap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn packed_rectangles_never_overlap() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..20 {
        let n = rng.gen_range(1..60);
        let images: Vec<(String, Bitmap)> = (0..n)
            .map(|i| {
                let w = rng.gen_range(1..120);
                let h = rng.gen_range(1..120);
                (format!("img{i}"), Bitmap::new(w, h))
            })
            .collect();
        let sizes: Vec<(String, (u32, u32))> = images
            .iter()
            .map(|(id, b)| (id.clone(), b.dimensions()))
            .collect();

        let packed = pack_bitmaps(images);
        assert_eq!(packed.len(), n, "round {round}: every image is placed");

        let rects: Vec<_> = packed.atlas_mapping.values().collect();
        for (i, a) in rects.iter().enumerate() {
            assert!(a.x() >= 0.0 && a.y() >= 0.0);
            assert!(a.x() + a.w() <= packed.width as f32);
            assert!(a.y() + a.h() <= packed.height as f32);
            for b in &rects[i + 1..] {
                assert!(!a.intersects(b), "round {round}: {a:?} overlaps {b:?}");
            }
        }
        for (id, (w, h)) in sizes {
            let rect = packed.atlas_mapping[&id];
            assert_eq!((rect.w() as u32, rect.h() as u32), (w, h));
            assert_eq!(packed.pixel_mapping[&id].dimensions(), (w, h));
        }
    }
}

#[test]
fn single_image_atlas_is_its_own_size() {
    let packed = pack_bitmaps(vec![("only".into(), Bitmap::new(33, 17))]);
    assert_eq!((packed.width, packed.height), (33, 17));
}
