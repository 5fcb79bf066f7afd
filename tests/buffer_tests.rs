use std::collections::HashSet;

use mosaic_engine::gpu::{plan_draw, update_buffers, GraphicsDrawCommand, TextureRegistry};
use mosaic_engine::mock_backend::RecordingBackend;
use mosaic_engine::utils::Rectangle;

#[test]
fn unchanged_geometry_is_not_uploaded_twice() {
    let mut backend = RecordingBackend::new();
    let mut registry = TextureRegistry::new();
    let first = registry.allocate(&mut backend, 64, 64).unwrap();
    let second = registry.allocate(&mut backend, 64, 64).unwrap();

    let commands: Vec<_> = (0..10)
        .map(|i| GraphicsDrawCommand {
            id: format!("img{i}"),
            texture: if i % 2 == 0 { first } else { second },
            src: Rectangle::new(0.0, 0.0, 8.0, 8.0),
            dst: Rectangle::new(i as f32 * 10.0, 0.0, 8.0, 8.0),
        })
        .collect();

    let updated = update_buffers(&mut backend, &mut registry, &commands).unwrap();
    assert_eq!(updated, vec![first, second]);
    assert_eq!(backend.buffer_uploads(), 2);

    backend.clear_calls();
    let updated = update_buffers(&mut backend, &mut registry, &commands).unwrap();
    assert!(updated.is_empty());
    assert_eq!(backend.buffer_uploads(), 0);

    // Moving one quad only touches its texture.
    let mut moved = commands.clone();
    moved[1].dst = Rectangle::new(500.0, 500.0, 8.0, 8.0);
    let updated = update_buffers(&mut backend, &mut registry, &moved).unwrap();
    assert_eq!(updated, vec![second]);
    assert_eq!(backend.buffer_uploads(), 1);

    let batches = plan_draw(&registry, &HashSet::new());
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.index_count == 30));
}
