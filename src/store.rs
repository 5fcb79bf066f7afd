//! Texture Store.
//!
//! Owns every loaded atlas and resolves each placement of the current layout
//! to the best (texture, source rectangle) known for its id. Viewport moves
//! drive visibility queries against the collision grid, and visible images
//! drawn much larger than their loaded size are re-fetched at higher
//! resolution through the atlas worker.
//!
//! Every worker job carries the collection generation it was issued under;
//! replies from an older generation are dropped on arrival.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::api::{BulkImageRequest, ImageMeta, StaticAtlas};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::EventQueue;
use crate::gpu::{
    update_buffers, DrawCommand, GpuBackend, GraphicsDrawCommand, TextureHandle, TextureRegistry,
    DEFAULT_MAX_TEXTURE_DIMENSION,
};
use crate::grid::CollisionGrid;
use crate::texture_atlas::{split_to_fit, Bitmap, PackedAtlas, TextureAtlas};
use crate::timing::{measure_time, Clock, Throttle};
use crate::utils::Rectangle;
use crate::viewport::Viewport;
use crate::worker::{AtlasWorker, Job, Reply, Ticket};

/// Position of an atlas in arrival order.
pub type AtlasId = u64;

#[derive(Debug, Clone)]
pub enum StoreEvent {
    AtlasesChanged,
    DrawCommandsChanged,
    VisibleChanged,
    CollisionGridChanged(Arc<CollisionGrid>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaticAtlasState {
    NotRequested,
    Requested,
    Done,
}

/// A packed atlas whose texture exists but is still being filled.
struct PendingAtlas {
    atlas: TextureAtlas,
    uploads: Vec<(String, Bitmap)>,
}

pub struct TextureStore {
    config: EngineConfig,

    collection: Option<String>,
    generation: Ticket,
    images: HashMap<String, ImageMeta>,

    layout: Arc<[DrawCommand]>,
    layout_ids: HashSet<String>,
    layout_generation: u64,
    placeholders_requested_for: Option<u64>,

    registry: TextureRegistry,
    max_texture_dimension: u32,
    atlases: BTreeMap<AtlasId, TextureAtlas>,
    next_atlas_id: AtlasId,
    /// Image id to the atlas currently serving it. The latest arrival wins.
    atlas_cache: HashMap<String, AtlasId>,
    pending: VecDeque<PendingAtlas>,
    static_atlas: StaticAtlasState,
    is_downloading: bool,

    graphics_draw_commands: Vec<GraphicsDrawCommand>,
    buffers_dirty: bool,
    grid: Arc<CollisionGrid>,

    visible: Vec<GraphicsDrawCommand>,
    visible_textures: HashSet<TextureHandle>,
    visible_stale: bool,
    load_stale: bool,
    visible_throttle: Throttle,
    load_throttle: Throttle,

    pub(crate) events: EventQueue<StoreEvent>,
}

impl TextureStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            collection: None,
            generation: 0,
            images: HashMap::new(),
            layout: Arc::from(Vec::new()),
            layout_ids: HashSet::new(),
            layout_generation: 0,
            placeholders_requested_for: None,
            registry: TextureRegistry::new(),
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            atlases: BTreeMap::new(),
            next_atlas_id: 0,
            atlas_cache: HashMap::new(),
            pending: VecDeque::new(),
            static_atlas: StaticAtlasState::NotRequested,
            is_downloading: false,
            graphics_draw_commands: Vec::new(),
            buffers_dirty: false,
            grid: Arc::new(CollisionGrid::empty()),
            visible: Vec::new(),
            visible_textures: HashSet::new(),
            visible_stale: false,
            load_stale: false,
            visible_throttle: Throttle::new(config.visible_throttle()),
            load_throttle: Throttle::new(config.load_throttle()),
            events: EventQueue::new(),
        }
    }

    /// Drops everything loaded for the previous collection and starts a new
    /// generation. `None` closes the collection.
    pub fn set_collection(&mut self, backend: &mut impl GpuBackend, collection: Option<String>) {
        self.release_all(backend);
        self.generation += 1;
        self.collection = collection;
        self.images.clear();
        self.static_atlas = StaticAtlasState::NotRequested;
        self.is_downloading = false;
        self.placeholders_requested_for = None;
        self.layout = Arc::from(Vec::new());
        self.layout_ids.clear();
        self.update_graphics_draw_commands();
        self.events.emit(StoreEvent::AtlasesChanged);
    }

    /// Longest atlas edge the backend accepts. Packed atlases above it are
    /// split, and upgrade requests never ask for more.
    pub fn set_max_texture_dimension(&mut self, max: u32) {
        self.max_texture_dimension = max.max(1);
    }

    /// Forgets jobs that will never be answered after the worker died.
    pub fn worker_lost(&mut self) {
        self.is_downloading = false;
        if self.static_atlas == StaticAtlasState::Requested {
            self.static_atlas = StaticAtlasState::Done;
        }
    }

    /// Native sizes, used to stop upgrading an image once it is fully loaded.
    pub fn set_images(&mut self, images: &[ImageMeta]) {
        self.images = images
            .iter()
            .map(|image| (image.id.clone(), image.clone()))
            .collect();
    }

    /// Replaces the layout wholesale.
    ///
    /// The first non-empty layout of a collection fetches the static atlas;
    /// placements still unresolved afterwards get one placeholder request per
    /// layout.
    pub fn set_layout(&mut self, worker: &AtlasWorker, layout: Arc<[DrawCommand]>) {
        self.layout_generation += 1;
        self.layout_ids = layout.iter().map(|c| c.id.clone()).collect();
        self.layout = layout;

        if !self.layout.is_empty() {
            if self.static_atlas == StaticAtlasState::NotRequested && self.atlases.is_empty() {
                self.request_static_atlas(worker);
            } else {
                self.request_placeholders(worker);
            }
        }

        let _clock = Clock::start("updating draw commands", self.config.timing_threshold_ms);
        self.update_graphics_draw_commands();
    }

    fn request_static_atlas(&mut self, worker: &AtlasWorker) {
        let Some(collection) = self.collection.clone() else {
            return;
        };
        let job = Job::StaticAtlas {
            ticket: self.generation,
            collection,
        };
        match worker.submit(job) {
            Ok(()) => self.static_atlas = StaticAtlasState::Requested,
            Err(e) => {
                log::error!("could not request static atlas: {e}");
                self.static_atlas = StaticAtlasState::Done;
                self.request_placeholders(worker);
            }
        }
    }

    /// Requests every unresolved placement at placeholder size, once per
    /// layout generation.
    fn request_placeholders(&mut self, worker: &AtlasWorker) {
        if self.static_atlas == StaticAtlasState::Requested
            || self.placeholders_requested_for == Some(self.layout_generation)
        {
            return;
        }

        let size = self.config.placeholder_size;
        let mut seen = HashSet::new();
        let request: Vec<BulkImageRequest> = self
            .layout
            .iter()
            .filter(|c| !self.atlas_cache.contains_key(&c.id) && seen.insert(c.id.as_str()))
            .map(|c| BulkImageRequest {
                id: c.id.clone(),
                width: size,
                height: size,
            })
            .collect();

        if request.is_empty() || self.load_atlas(worker, request) {
            self.placeholders_requested_for = Some(self.layout_generation);
        }
    }

    /// Starts a fetch-and-pack job unless one is already running. Requests
    /// arriving while busy are dropped; they are re-derived on the next
    /// visibility pass.
    fn load_atlas(&mut self, worker: &AtlasWorker, request: Vec<BulkImageRequest>) -> bool {
        if self.is_downloading || request.is_empty() {
            return false;
        }
        let Some(collection) = self.collection.clone() else {
            return false;
        };
        log::debug!("requesting {} images", request.len());
        let job = Job::BulkAtlas {
            ticket: self.generation,
            collection,
            request,
            batch_size: self.config.atlas_batch_size,
        };
        match worker.submit(job) {
            Ok(()) => {
                self.is_downloading = true;
                true
            }
            Err(e) => {
                log::error!("could not submit atlas job: {e}");
                false
            }
        }
    }

    /// Folds a worker reply into the store. Replies from an older collection
    /// generation are ignored.
    pub fn handle_reply(
        &mut self,
        backend: &mut impl GpuBackend,
        worker: &AtlasWorker,
        reply: Reply,
    ) {
        match reply {
            Reply::StaticAtlas { ticket, result } => {
                if self.is_stale(ticket, "static atlas") {
                    return;
                }
                self.static_atlas = StaticAtlasState::Done;
                match result {
                    Ok(atlases) => self.apply_static_atlases(backend, atlases),
                    Err(e) => log::warn!("static atlas unavailable: {e}"),
                }
                self.request_placeholders(worker);
            }
            Reply::Atlas { ticket, packed } => {
                if self.is_stale(ticket, "atlas") {
                    return;
                }
                for part in split_to_fit(packed, self.max_texture_dimension) {
                    if let Err(e) = self.begin_atlas_upload(backend, part) {
                        log::error!("could not allocate atlas texture: {e}");
                    }
                }
            }
            Reply::AtlasFinished { ticket } => {
                if self.is_stale(ticket, "atlas completion") {
                    return;
                }
                self.is_downloading = false;
                self.request_placeholders(worker);
                self.load_stale = true;
            }
            Reply::Metadata { .. } | Reply::Layout { .. } => {
                log::debug!("texture store ignoring unrelated reply");
            }
        }
    }

    fn is_stale(&self, ticket: Ticket, what: &str) -> bool {
        let stale = ticket != self.generation;
        if stale {
            log::debug!(
                "discarding {what} from generation {ticket}, current is {}",
                self.generation
            );
        }
        stale
    }

    fn apply_static_atlases(&mut self, backend: &mut impl GpuBackend, atlases: Vec<StaticAtlas>) {
        let _clock = Clock::start("static atlas", self.config.timing_threshold_ms);
        let mut applied = 0;
        for StaticAtlas { bitmap, mapping } in atlases {
            let handle = match self.registry.allocate_with(backend, &bitmap) {
                Ok(handle) => handle,
                Err(e) => {
                    log::error!("static atlas upload failed: {e}");
                    continue;
                }
            };
            let mut atlas = TextureAtlas::new(handle, bitmap.width(), bitmap.height());
            for entry in &mapping {
                match entry.rect() {
                    Some(rect) => {
                        atlas.mapping.insert(entry.id.clone(), rect);
                    }
                    None => log::warn!("static atlas entry {} has no extent", entry.id),
                }
            }
            self.insert_atlas(atlas);
            applied += 1;
        }
        if applied > 0 {
            self.reclaim_shadowed(backend);
            self.events.emit(StoreEvent::AtlasesChanged);
            self.update_graphics_draw_commands();
        }
    }

    /// Allocates and clears the texture for `packed`; its images are copied in
    /// by [`TextureStore::step_uploads`].
    fn begin_atlas_upload(&mut self, backend: &mut impl GpuBackend, packed: PackedAtlas) -> Result<()> {
        let PackedAtlas {
            atlas_mapping,
            mut pixel_mapping,
            width,
            height,
        } = packed;

        let mut uploads = Vec::new();
        let mut mapping = HashMap::new();
        for (id, rect) in atlas_mapping {
            if !self.layout_ids.contains(&id) {
                continue;
            }
            if let Some(bitmap) = pixel_mapping.remove(&id) {
                uploads.push((id.clone(), bitmap));
                mapping.insert(id, rect);
            }
        }
        if uploads.is_empty() {
            log::debug!("packed atlas holds no image of the current layout");
            return Ok(());
        }

        let threshold = self.config.timing_threshold_ms;
        let handle = measure_time("clearing texture", threshold, || -> Result<TextureHandle> {
            let handle = self.registry.allocate(backend, width, height)?;
            if let Err(e) = backend.clear_texture(handle) {
                let _ = self.registry.release(backend, handle);
                return Err(e);
            }
            Ok(handle)
        })?;

        let mut atlas = TextureAtlas::new(handle, width, height);
        atlas.mapping = mapping;
        self.pending.push_back(PendingAtlas { atlas, uploads });
        Ok(())
    }

    /// Copies at most `uploads_per_frame` images into pending atlases and
    /// publishes each atlas once it is complete.
    pub fn step_uploads(&mut self, backend: &mut impl GpuBackend) {
        if self.pending.is_empty() {
            return;
        }
        let _clock = Clock::start("uploading textures", self.config.timing_threshold_ms);
        let mut budget = self.config.uploads_per_frame;
        let mut published = false;

        while budget > 0 {
            let Some(front) = self.pending.front_mut() else {
                break;
            };
            match front.uploads.pop() {
                Some((id, bitmap)) => {
                    budget -= 1;
                    let Some(rect) = front.atlas.source_rect(&id) else {
                        continue;
                    };
                    if let Err(e) = backend.upload_sub_texture(
                        front.atlas.texture,
                        &bitmap,
                        rect.x() as u32,
                        rect.y() as u32,
                    ) {
                        log::warn!("upload of {id} failed: {e}");
                        front.atlas.mapping.remove(&id);
                    }
                }
                None => {
                    if let Some(done) = self.pending.pop_front() {
                        log::debug!("atlas with {} images complete", done.atlas.mapping.len());
                        self.insert_atlas(done.atlas);
                        published = true;
                    }
                }
            }
        }

        // Publish an atlas whose last upload used up the budget.
        while self.pending.front().is_some_and(|p| p.uploads.is_empty()) {
            if let Some(done) = self.pending.pop_front() {
                self.insert_atlas(done.atlas);
                published = true;
            }
        }

        if published {
            self.reclaim_shadowed(backend);
            self.events.emit(StoreEvent::AtlasesChanged);
            self.update_graphics_draw_commands();
        }
    }

    /// Registers an atlas and points every id it holds at it.
    fn insert_atlas(&mut self, atlas: TextureAtlas) {
        let id = self.next_atlas_id;
        self.next_atlas_id += 1;
        for image_id in atlas.mapping.keys() {
            self.atlas_cache.insert(image_id.clone(), id);
        }
        self.atlases.insert(id, atlas);
    }

    /// Destroys atlases that no id resolves to any more.
    fn reclaim_shadowed(&mut self, backend: &mut impl GpuBackend) {
        let live: HashSet<AtlasId> = self.atlas_cache.values().copied().collect();
        let dead: Vec<AtlasId> = self
            .atlases
            .keys()
            .copied()
            .filter(|id| !live.contains(id))
            .collect();
        for id in dead {
            if let Some(atlas) = self.atlases.remove(&id) {
                log::info!("reclaiming shadowed atlas {id}");
                if let Err(e) = self.registry.release(backend, atlas.texture) {
                    log::warn!("reclaiming atlas {id}: {e}");
                }
            }
        }
    }

    pub(crate) fn release_all(&mut self, backend: &mut impl GpuBackend) {
        if !self.atlases.is_empty() || !self.pending.is_empty() {
            log::info!(
                "releasing {} atlases and {} pending",
                self.atlases.len(),
                self.pending.len()
            );
        }
        self.registry.release_all(backend);
        self.atlases.clear();
        self.atlas_cache.clear();
        self.pending.clear();
    }

    /// Best known texture and source rectangle for `id`.
    pub fn lookup(&self, id: &str) -> Option<(TextureHandle, Rectangle)> {
        let atlas = self.atlases.get(self.atlas_cache.get(id)?)?;
        Some((atlas.texture, atlas.source_rect(id)?))
    }

    /// Resolves the layout against the atlases and rebuilds the grid.
    fn update_graphics_draw_commands(&mut self) {
        self.graphics_draw_commands = self
            .layout
            .iter()
            .filter_map(|c| {
                let (texture, src) = self.lookup(&c.id)?;
                Some(GraphicsDrawCommand {
                    id: c.id.clone(),
                    texture,
                    src,
                    dst: c.dst,
                })
            })
            .collect();
        self.buffers_dirty = true;
        self.events.emit(StoreEvent::DrawCommandsChanged);

        let commands = self.graphics_draw_commands.clone();
        let grid = measure_time("updating collision grid", self.config.timing_threshold_ms, || {
            CollisionGrid::build(commands)
        });
        self.grid = Arc::new(grid);
        self.events
            .emit(StoreEvent::CollisionGridChanged(self.grid.clone()));
        self.visible_stale = true;
    }

    /// Pushes pending geometry to the backend.
    pub fn sync_buffers(&mut self, backend: &mut impl GpuBackend) -> Result<()> {
        if !self.buffers_dirty {
            return Ok(());
        }
        let threshold = self.config.timing_threshold_ms;
        let updated = measure_time("updating buffers", threshold, || {
            update_buffers(backend, &mut self.registry, &self.graphics_draw_commands)
        })?;
        self.buffers_dirty = false;
        if !updated.is_empty() {
            log::debug!("re-uploaded geometry of {} textures", updated.len());
        }
        Ok(())
    }

    /// Marks the visible set for recomputation after a viewport change.
    pub fn viewport_moved(&mut self) {
        self.visible_stale = true;
    }

    /// Recomputes the visible set and plans upgrades, each rate limited.
    /// Work skipped by a throttle stays pending for a later call.
    pub fn refresh(&mut self, viewport: &Viewport, worker: &AtlasWorker, now: Instant) {
        if self.visible_stale && self.visible_throttle.ready(now) {
            self.update_visible(viewport.rect());
        }
        if self.load_stale && self.load_throttle.ready(now) {
            self.load_stale = false;
            self.load_visible(viewport, worker);
        }
    }

    fn update_visible(&mut self, rect: Rectangle) {
        self.visible_stale = false;
        self.visible = self
            .grid
            .collisions_rect(&rect)
            .into_iter()
            .cloned()
            .collect();
        self.visible_textures = self.visible.iter().map(|c| c.texture).collect();
        self.load_stale = true;
        self.events.emit(StoreEvent::VisibleChanged);
    }

    /// Requests a higher resolution for every visible image shown at least
    /// `load_size_threshold` times larger than loaded, unless already native.
    fn load_visible(&mut self, viewport: &Viewport, worker: &AtlasWorker) {
        let request = self.plan_upgrades(viewport);
        if !request.is_empty() {
            self.load_atlas(worker, request);
        }
    }

    /// Requested sizes are capped at the native size and at the texture limit.
    pub fn plan_upgrades(&self, viewport: &Viewport) -> Vec<BulkImageRequest> {
        let threshold = self.config.load_size_threshold;
        let factor = self.config.load_size_factor;
        let limit = self.max_texture_dimension;

        self.visible
            .iter()
            .filter_map(|c| {
                let on_screen = viewport.viewport_to_screen_rect(&c.dst);
                if on_screen.w() / c.src.w() < threshold || on_screen.h() / c.src.h() < threshold {
                    return None;
                }
                let native = self.images.get(&c.id)?;
                if c.src.w() >= native.width as f32 && c.src.h() >= native.height as f32 {
                    return None;
                }
                let cap = |wanted: f32, native: u32| -> u32 {
                    // `as` saturates, so huge on-screen sizes land on the cap
                    ((wanted * factor).ceil() as u32).min(native).min(limit).max(1)
                };
                Some(BulkImageRequest {
                    id: c.id.clone(),
                    width: cap(on_screen.w(), native.width),
                    height: cap(on_screen.h(), native.height),
                })
            })
            .collect()
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Ticket carried by jobs issued for the current collection.
    pub fn generation(&self) -> Ticket {
        self.generation
    }

    pub fn layout(&self) -> &[DrawCommand] {
        &self.layout
    }

    pub fn graphics_draw_commands(&self) -> &[GraphicsDrawCommand] {
        &self.graphics_draw_commands
    }

    pub fn grid(&self) -> Arc<CollisionGrid> {
        self.grid.clone()
    }

    pub fn visible(&self) -> &[GraphicsDrawCommand] {
        &self.visible
    }

    pub fn visible_textures(&self) -> &HashSet<TextureHandle> {
        &self.visible_textures
    }

    pub fn registry(&self) -> &TextureRegistry {
        &self.registry
    }

    pub fn atlases(&self) -> impl Iterator<Item = (AtlasId, &TextureAtlas)> {
        self.atlases.iter().map(|(id, atlas)| (*id, atlas))
    }

    pub fn atlas_count(&self) -> usize {
        self.atlases.len()
    }

    pub fn pending_uploads(&self) -> usize {
        self.pending.iter().map(|p| p.uploads.len()).sum()
    }

    pub fn is_downloading(&self) -> bool {
        self.is_downloading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiLayout, Collection, ImageSource, LayoutRequest};
    use crate::mock_backend::RecordingBackend;
    use crate::texture_atlas::pack_bitmaps;
    use crate::utils::Size;

    struct Offline;

    impl ImageSource for Offline {
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

    fn setup(config: &EngineConfig) -> (TextureStore, RecordingBackend, AtlasWorker) {
        let mut store = TextureStore::new(config);
        let mut backend = RecordingBackend::new();
        let worker = AtlasWorker::inline(Arc::new(Offline), f64::INFINITY);
        store.set_collection(&mut backend, Some("c".into()));
        let layout: Arc<[DrawCommand]> = Arc::from(vec![
            DrawCommand {
                id: "a".into(),
                dst: Rectangle::new(0.0, 0.0, 10.0, 10.0),
            },
            DrawCommand {
                id: "b".into(),
                dst: Rectangle::new(20.0, 0.0, 10.0, 10.0),
            },
        ]);
        store.set_layout(&worker, layout);
        while let Some(reply) = worker.try_recv() {
            store.handle_reply(&mut backend, &worker, reply);
        }
        (store, backend, worker)
    }

    fn packed(ids: &[(&str, u32)]) -> PackedAtlas {
        pack_bitmaps(
            ids.iter()
                .map(|(id, size)| (id.to_string(), Bitmap::new(*size, *size)))
                .collect(),
        )
    }

    #[test]
    fn uploads_respect_frame_budget() {
        let config = EngineConfig {
            uploads_per_frame: 1,
            ..EngineConfig::default()
        };
        let (mut store, mut backend, worker) = setup(&config);
        let ticket = store.generation();
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::Atlas {
                ticket,
                packed: packed(&[("a", 4), ("b", 4)]),
            },
        );
        assert_eq!(store.pending_uploads(), 2);

        store.step_uploads(&mut backend);
        assert_eq!(backend.sub_texture_uploads(), 1);
        assert!(store.lookup("a").is_none());

        store.step_uploads(&mut backend);
        assert_eq!(backend.sub_texture_uploads(), 2);
        assert!(store.lookup("a").is_some());
        assert_eq!(store.graphics_draw_commands().len(), 2);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let (mut store, mut backend, worker) = setup(&EngineConfig::default());
        let old = store.generation();
        store.set_collection(&mut backend, Some("d".into()));
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::Atlas {
                ticket: old,
                packed: packed(&[("a", 4)]),
            },
        );
        assert_eq!(store.pending_uploads(), 0);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn ids_outside_layout_are_not_uploaded() {
        let (mut store, mut backend, worker) = setup(&EngineConfig::default());
        let ticket = store.generation();
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::Atlas {
                ticket,
                packed: packed(&[("a", 4), ("zzz", 4)]),
            },
        );
        assert_eq!(store.pending_uploads(), 1);
    }

    #[test]
    fn fully_shadowed_atlases_are_reclaimed() {
        let (mut store, mut backend, worker) = setup(&EngineConfig::default());
        let ticket = store.generation();
        for size in [4, 8] {
            store.handle_reply(
                &mut backend,
                &worker,
                Reply::Atlas {
                    ticket,
                    packed: packed(&[("a", size), ("b", size)]),
                },
            );
            store.step_uploads(&mut backend);
        }
        assert_eq!(store.atlas_count(), 1);
        assert_eq!(backend.live_textures(), 1);
        assert_eq!(store.lookup("a").unwrap().1.w(), 8.0);
    }

    #[test]
    fn upgrades_only_when_drawn_large_and_below_native() {
        let (mut store, mut backend, worker) = setup(&EngineConfig::default());
        let native = |size| {
            [ImageMeta {
                id: "a".into(),
                width: size,
                height: size,
            }]
        };
        store.set_images(&native(1000));
        let ticket = store.generation();
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::Atlas {
                ticket,
                packed: packed(&[("a", 4), ("b", 4)]),
            },
        );
        store.step_uploads(&mut backend);

        // 5 world units across 100 pixels: "a" is drawn 200px wide
        let mut viewport = Viewport::new(Size::new(100.0, 100.0), &EngineConfig::default());
        viewport.set_rect(Rectangle::new(0.0, 0.0, 5.0, 5.0));
        store.update_visible(viewport.rect());
        assert_eq!(store.visible().len(), 1);

        let plan = store.plan_upgrades(&viewport);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id, "a");
        assert_eq!((plan[0].width, plan[0].height), (1000, 1000));

        store.set_images(&native(4000));
        let plan = store.plan_upgrades(&viewport);
        assert_eq!((plan[0].width, plan[0].height), (1600, 1600));

        store.set_images(&native(100_000));
        store.set_max_texture_dimension(1024);
        let plan = store.plan_upgrades(&viewport);
        assert_eq!((plan[0].width, plan[0].height), (1024, 1024));

        store.set_images(&native(4));
        assert!(store.plan_upgrades(&viewport).is_empty());
    }

    #[test]
    fn atlases_above_the_texture_limit_are_split() {
        let (mut store, _, worker) = setup(&EngineConfig::default());
        let mut backend = RecordingBackend::new().with_texture_limit(16);
        store.set_max_texture_dimension(backend.max_texture_dimension());
        let ticket = store.generation();
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::Atlas {
                ticket,
                packed: packed(&[("a", 12), ("b", 12)]),
            },
        );
        assert_eq!(store.pending_uploads(), 2);
        store.step_uploads(&mut backend);

        assert_eq!(store.atlas_count(), 2);
        assert_eq!(backend.live_textures(), 2);
        assert!(store.atlases().all(|(_, atlas)| atlas.width <= 16 && atlas.height <= 16));
        assert!(store.lookup("a").is_some() && store.lookup("b").is_some());
    }

    #[test]
    fn oversized_static_atlas_is_skipped() {
        let (mut store, _, worker) = setup(&EngineConfig::default());
        let mut backend = RecordingBackend::new().with_texture_limit(16);
        let ticket = store.generation();
        let entry = |id: &str| crate::api::AtlasMappingEntry {
            id: id.into(),
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        store.handle_reply(
            &mut backend,
            &worker,
            Reply::StaticAtlas {
                ticket,
                result: Ok(vec![
                    StaticAtlas {
                        bitmap: Bitmap::new(64, 4),
                        mapping: vec![entry("a")],
                    },
                    StaticAtlas {
                        bitmap: Bitmap::new(8, 8),
                        mapping: vec![entry("b")],
                    },
                ]),
            },
        );
        assert_eq!(store.atlas_count(), 1);
        assert!(store.lookup("a").is_none());
        assert!(store.lookup("b").is_some());
    }
}
