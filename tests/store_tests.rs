use std::sync::Arc;

use mosaic_engine::api::{
    ApiLayout, BulkImageRequest, Collection, ImageMeta, ImageSource, LayoutRequest, StaticAtlas,
};
use mosaic_engine::config::EngineConfig;
use mosaic_engine::error::Result;
use mosaic_engine::gpu::DrawCommand;
use mosaic_engine::mock_backend::RecordingBackend;
use mosaic_engine::store::TextureStore;
use mosaic_engine::texture_atlas::{pack_bitmaps, Bitmap, PackedAtlas};
use mosaic_engine::utils::Rectangle;
use mosaic_engine::worker::{AtlasWorker, Reply};

/// Serves no images at all.
struct Empty;

impl ImageSource for Empty {
    fn fetch_collections(&self) -> Result<Vec<Collection>> {
        Ok(Vec::new())
    }
    fn fetch_image_metadata(&self, _: &str) -> Result<Vec<ImageMeta>> {
        Ok(Vec::new())
    }
    fn fetch_bulk_images(&self, _: &str, r: &[BulkImageRequest]) -> Result<Vec<Option<Bitmap>>> {
        Ok(vec![None; r.len()])
    }
    fn fetch_static_atlas(&self, _: &str) -> Result<Vec<StaticAtlas>> {
        Ok(Vec::new())
    }
    fn fetch_layout(&self, _: &str, _: &LayoutRequest) -> Result<ApiLayout> {
        Ok(ApiLayout::Sort(Vec::new()))
    }
}

fn packed(id: &str, size: u32) -> PackedAtlas {
    pack_bitmaps(vec![(id.to_string(), Bitmap::new(size, size))])
}

/// The newest atlas wins even when it holds a smaller copy: a late
/// placeholder reply replaces a sharper image already on screen.
#[test]
fn later_atlas_shadows_earlier_resolution() {
    let mut store = TextureStore::new(&EngineConfig::default());
    let mut backend = RecordingBackend::new();
    let worker = AtlasWorker::inline(Arc::new(Empty), f64::INFINITY);

    store.set_collection(&mut backend, Some("c".into()));
    store.set_layout(
        &worker,
        Arc::from(vec![DrawCommand {
            id: "a".into(),
            dst: Rectangle::new(0.0, 0.0, 10.0, 10.0),
        }]),
    );
    while let Some(reply) = worker.try_recv() {
        store.handle_reply(&mut backend, &worker, reply);
    }

    let ticket = store.generation();
    for size in [64, 8] {
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::Atlas {
                ticket,
                packed: packed("a", size),
            },
        );
        store.step_uploads(&mut backend);
    }

    let (texture, src) = store.lookup("a").unwrap();
    assert_eq!(src.w(), 8.0);
    assert_eq!(backend.texture_size(texture), Some((8, 8)));
    assert_eq!(store.atlas_count(), 1);
    assert_eq!(store.graphics_draw_commands()[0].src, src);
}

#[test]
fn closing_a_collection_frees_the_gpu() {
    let mut store = TextureStore::new(&EngineConfig::default());
    let mut backend = RecordingBackend::new();
    let worker = AtlasWorker::inline(Arc::new(Empty), f64::INFINITY);
    store.set_collection(&mut backend, Some("c".into()));
    store.set_layout(
        &worker,
        Arc::from(vec![DrawCommand {
            id: "a".into(),
            dst: Rectangle::new(0.0, 0.0, 10.0, 10.0),
        }]),
    );
    let ticket = store.generation();
    store.handle_reply(
        &mut backend,
        &worker,
        Reply::Atlas {
            ticket,
            packed: packed("a", 4),
        },
    );
    store.step_uploads(&mut backend);
    store.sync_buffers(&mut backend).unwrap();
    assert_eq!(backend.live_textures(), 1);
    assert_eq!(backend.live_buffer_sets(), 1);

    store.set_collection(&mut backend, None);
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_buffer_sets(), 0);
    assert!(store.collection().is_none());
    assert!(store.graphics_draw_commands().is_empty());
}
