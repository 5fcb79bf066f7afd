pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod gpu;
pub mod grid;
pub mod layout;
pub mod mock_backend;
pub mod selector;
pub mod source;
pub mod store;
pub mod texture_atlas;
pub mod timing;
pub mod utils;
pub mod viewport;
pub mod worker;

#[cfg(feature = "backend-wgpu")]
pub mod app;
#[cfg(feature = "backend-wgpu")]
pub mod wgpu_backend;

use std::sync::Arc;
use std::time::Instant;

use api::{Collection, ImageSource, LayoutFilter, LayoutRequest};
use config::EngineConfig;
use error::{MosaicError, Result};
use events::EventQueue;
use gpu::{plan_draw, GpuBackend};
use layout::{GridLayoutParams, LayoutDescriptor, Organizer, OrganizerEvent};
use selector::{Selector, SelectorEvent};
use store::{StoreEvent, TextureStore};
use utils::{Point, Rectangle, Size, TransformUniform};
use viewport::{NavKey, Viewport, ViewportEvent};
use worker::{AtlasWorker, Job, Reply};

/// What the host application hears about.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    CollectionChanged(Option<Collection>),
    LayoutChanged { placements: usize },
    /// Id of the clicked image, `None` when the click hit nothing.
    SelectionChanged(Option<String>),
}

/// Wires the viewport, organizer, texture store and selector to one GPU
/// backend and one image source. Drive it by calling [`MosaicEngine::frame`]
/// once per displayed frame.
pub struct MosaicEngine<B: GpuBackend> {
    backend: B,
    source: Arc<dyn ImageSource>,
    worker: AtlasWorker,
    config: EngineConfig,
    viewport: Viewport,
    organizer: Organizer,
    store: TextureStore,
    selector: Selector,
    collection: Option<Collection>,
    notifications: EventQueue<EngineNotification>,
}

impl<B: GpuBackend> MosaicEngine<B> {
    /// Builds the engine with a background atlas worker.
    pub fn new(
        backend: B,
        source: Arc<dyn ImageSource>,
        config: EngineConfig,
        canvas: Size,
    ) -> Result<Self> {
        config.validate()?;
        let worker = AtlasWorker::spawn(source.clone(), config.timing_threshold_ms)?;
        Ok(Self::from_parts(backend, source, worker, config, canvas))
    }

    /// Builds the engine with a worker that runs jobs synchronously on the
    /// calling thread, so every reply is available on the next frame.
    pub fn inline(
        backend: B,
        source: Arc<dyn ImageSource>,
        config: EngineConfig,
        canvas: Size,
    ) -> Result<Self> {
        config.validate()?;
        let worker = AtlasWorker::inline(source.clone(), config.timing_threshold_ms);
        Ok(Self::from_parts(backend, source, worker, config, canvas))
    }

    fn from_parts(
        backend: B,
        source: Arc<dyn ImageSource>,
        worker: AtlasWorker,
        config: EngineConfig,
        canvas: Size,
    ) -> Self {
        let mut store = TextureStore::new(&config);
        store.set_max_texture_dimension(backend.max_texture_dimension());
        Self {
            viewport: Viewport::new(canvas, &config),
            organizer: Organizer::new(GridLayoutParams::default()),
            store,
            selector: Selector::new(),
            backend,
            source,
            worker,
            config,
            collection: None,
            notifications: EventQueue::new(),
        }
    }

    /// Lists the source's collections. Blocks on the source.
    pub fn collections(&self) -> Result<Vec<Collection>> {
        self.source.fetch_collections()
    }

    /// Drops everything loaded so far and starts fetching `collection`.
    pub fn open_collection(&mut self, collection: Collection) -> Result<()> {
        log::info!("opening collection {} ({})", collection.name, collection.id);
        self.store
            .set_collection(&mut self.backend, Some(collection.id.clone()));
        self.organizer.clear();
        self.selector.clear();
        self.collection = Some(collection.clone());
        self.notifications
            .emit(EngineNotification::CollectionChanged(Some(collection.clone())));
        self.worker.submit(Job::Metadata {
            ticket: self.store.generation(),
            collection: collection.id,
        })
    }

    pub fn close_collection(&mut self) {
        if self.collection.take().is_none() {
            return;
        }
        self.store.set_collection(&mut self.backend, None);
        self.organizer.clear();
        self.selector.clear();
        self.notifications
            .emit(EngineNotification::CollectionChanged(None));
    }

    pub fn set_layout_descriptor(&mut self, descriptor: LayoutDescriptor) -> Result<()> {
        match self.organizer.set_descriptor(descriptor) {
            Some(request) => self.request_layout(request),
            None => Ok(()),
        }
    }

    pub fn set_filter(&mut self, filter: LayoutFilter) -> Result<()> {
        match self.organizer.set_filter(filter) {
            Some(request) => self.request_layout(request),
            None => Ok(()),
        }
    }

    fn request_layout(&mut self, request: LayoutRequest) -> Result<()> {
        let collection = self
            .store
            .collection()
            .ok_or(MosaicError::NoCollection)?
            .to_owned();
        self.worker.submit(Job::Layout {
            ticket: self.organizer.generation(),
            collection,
            request,
        })
    }

    pub fn key_down(&mut self, key: NavKey) {
        self.viewport.key_down(key);
    }

    pub fn key_up(&mut self, key: NavKey) {
        self.viewport.key_up(key);
    }

    /// Selects whatever lies under canvas pixel `screen` (origin top left).
    pub fn click(&mut self, screen: Point) {
        self.viewport.click(screen);
        self.dispatch_events();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.backend.resize(width, height);
        self.viewport.resize(width as f32, height as f32);
    }

    /// Runs one frame: folds in worker replies, spends the upload budget,
    /// moves the viewport, settles all events and draws.
    ///
    /// Fails with [`MosaicError::Worker`] on every call once the atlas worker
    /// has died, since nothing new can load after that.
    pub fn frame(&mut self, now: Instant) -> Result<()> {
        self.poll_worker()?;
        self.store.step_uploads(&mut self.backend);
        self.viewport.advance(now);
        self.dispatch_events();

        self.store.refresh(&self.viewport, &self.worker, now);
        self.dispatch_events();

        self.store.sync_buffers(&mut self.backend)?;
        let batches = plan_draw(self.store.registry(), self.store.visible_textures());
        let transform = TransformUniform::orthographic(self.viewport.rect());
        timing::measure_time("draw", self.config.timing_threshold_ms, || {
            self.backend
                .draw(&transform, self.config.clear_color, &batches)
        })
    }

    fn poll_worker(&mut self) -> Result<()> {
        while let Some(reply) = self.worker.try_recv() {
            match reply {
                Reply::Metadata { ticket, result } => {
                    if ticket != self.store.generation() {
                        log::debug!("discarding metadata of generation {ticket}");
                        continue;
                    }
                    match result {
                        Ok(images) => {
                            log::info!("collection has {} images", images.len());
                            self.store.set_images(&images);
                            if let Some(request) = self.organizer.set_images(images) {
                                if let Err(e) = self.request_layout(request) {
                                    log::error!("could not request layout: {e}");
                                }
                            }
                        }
                        Err(e) => log::warn!("image metadata unavailable: {e}"),
                    }
                }
                Reply::Layout { ticket, result } => match result {
                    Ok(layout) => {
                        self.organizer.apply_server_layout(ticket, &layout);
                    }
                    Err(e) => log::warn!("layout request failed: {e}"),
                },
                other => self
                    .store
                    .handle_reply(&mut self.backend, &self.worker, other),
            }
        }
        if self.worker.is_disconnected() {
            self.store.worker_lost();
            return Err(MosaicError::Worker("atlas worker disconnected".into()));
        }
        Ok(())
    }

    /// Routes component events until every queue is empty.
    fn dispatch_events(&mut self) {
        loop {
            let mut idle = true;

            while let Some(event) = self.organizer.events.pop() {
                idle = false;
                let OrganizerEvent::LayoutChanged(layout) = event;
                self.selector.clear();
                self.notifications.emit(EngineNotification::LayoutChanged {
                    placements: layout.len(),
                });
                if self.config.fit_on_layout_change {
                    if let Some(bounds) = Rectangle::bounding(layout.iter().map(|c| &c.dst)) {
                        self.viewport.fit_to_bounds(bounds);
                    }
                }
                self.store.set_layout(&self.worker, layout);
            }

            while let Some(event) = self.viewport.events.pop() {
                idle = false;
                match event {
                    ViewportEvent::Moved(_) => self.store.viewport_moved(),
                    ViewportEvent::Resized(size) => {
                        log::debug!("canvas resized to {}x{}", size.width, size.height)
                    }
                    ViewportEvent::Clicked(world) => self.selector.click(world),
                }
            }

            while let Some(event) = self.store.events.pop() {
                idle = false;
                match event {
                    StoreEvent::CollisionGridChanged(grid) => self.selector.set_grid(grid),
                    StoreEvent::AtlasesChanged
                    | StoreEvent::DrawCommandsChanged
                    | StoreEvent::VisibleChanged => {}
                }
            }

            while let Some(event) = self.selector.events.pop() {
                idle = false;
                let SelectorEvent::SelectionChanged(selected) = event;
                self.notifications
                    .emit(EngineNotification::SelectionChanged(selected.map(|c| c.id)));
            }

            if idle {
                break;
            }
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<EngineNotification> {
        self.notifications.drain()
    }

    pub fn collection(&self) -> Option<&Collection> {
        self.collection.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn store(&self) -> &TextureStore {
        &self.store
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn organizer(&self) -> &Organizer {
        &self.organizer
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

impl<B: GpuBackend> Drop for MosaicEngine<B> {
    fn drop(&mut self) {
        self.worker.stop();
        self.store.release_all(&mut self.backend);
    }
}
