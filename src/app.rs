use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::config::EngineConfig;
use crate::error::{MosaicError, Result};
use crate::source::DirectorySource;
use crate::utils::{Point, Size};
use crate::viewport::NavKey;
use crate::wgpu_backend::WgpuBackend;
use crate::{EngineNotification, MosaicEngine};

pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Mosaic".to_string(),
            width: 1280,
            height: 800,
        }
    }
}

/// WASD pans, E/Q zoom; arrow keys pan as well.
fn nav_key(key: &Key) -> Option<NavKey> {
    match key {
        Key::Character(c) => match c.to_lowercase().as_str() {
            "w" => Some(NavKey::PanUp),
            "s" => Some(NavKey::PanDown),
            "a" => Some(NavKey::PanLeft),
            "d" => Some(NavKey::PanRight),
            "e" => Some(NavKey::ZoomIn),
            "q" => Some(NavKey::ZoomOut),
            _ => None,
        },
        Key::Named(NamedKey::ArrowUp) => Some(NavKey::PanUp),
        Key::Named(NamedKey::ArrowDown) => Some(NavKey::PanDown),
        Key::Named(NamedKey::ArrowLeft) => Some(NavKey::PanLeft),
        Key::Named(NamedKey::ArrowRight) => Some(NavKey::PanRight),
        _ => None,
    }
}

pub struct MosaicApp {
    engine: Option<MosaicEngine<WgpuBackend<'static>>>,
    window: Option<Arc<Window>>,
    source: Arc<DirectorySource>,
    config: EngineConfig,
    window_config: WindowConfig,
    cursor: Option<Point>,
    error: Option<MosaicError>,
}

impl MosaicApp {
    pub fn new(source: DirectorySource, config: EngineConfig, window_config: WindowConfig) -> Self {
        Self {
            engine: None,
            window: None,
            source: Arc::new(source),
            config,
            window_config,
            cursor: None,
            error: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let attributes = Window::default_attributes()
            .with_title(&self.window_config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.window_config.width,
                self.window_config.height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|e| MosaicError::UnsupportedEnvironment(e.to_string()))?,
        );
        let size = window.inner_size();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| MosaicError::UnsupportedEnvironment(e.to_string()))?;
        let backend = WgpuBackend::new(surface, &instance, size.width, size.height)?;

        let mut engine = MosaicEngine::new(
            backend,
            self.source.clone(),
            self.config.clone(),
            Size::new(size.width as f32, size.height as f32),
        )?;
        engine.open_collection(self.source.collection().clone())?;

        window.request_redraw();
        self.engine = Some(engine);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: MosaicError) {
        log::error!("{err}");
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler<()> for MosaicApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(engine) = &mut self.engine else {
            return;
        };
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let Some(key) = nav_key(&event.logical_key) {
                    match event.state {
                        ElementState::Pressed => engine.key_down(key),
                        ElementState::Released => engine.key_up(key),
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Some(Point::new(position.x as f32, position.y as f32));
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                if let Some(cursor) = self.cursor {
                    engine.click(cursor);
                }
            }
            WindowEvent::RedrawRequested => {
                match engine.frame(Instant::now()) {
                    Ok(()) => {}
                    Err(MosaicError::Surface(reason)) => log::warn!("frame skipped: {reason}"),
                    Err(e) => {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                for notification in engine.drain_notifications() {
                    match notification {
                        EngineNotification::SelectionChanged(Some(id)) => {
                            log::info!("selected {id}")
                        }
                        other => log::debug!("{other:?}"),
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::Resized(new_size) => {
                engine.resize(new_size.width, new_size.height);
            }
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            _ => (),
        }
    }
}

/// Opens `source` in a window and runs until it is closed.
pub fn run_app(source: DirectorySource, config: EngineConfig) -> Result<()> {
    let window_config = WindowConfig {
        title: format!("Mosaic: {}", source.collection().name),
        ..WindowConfig::default()
    };
    let event_loop =
        EventLoop::new().map_err(|e| MosaicError::UnsupportedEnvironment(e.to_string()))?;
    let mut app = MosaicApp::new(source, config, window_config);

    event_loop
        .run_app(&mut app)
        .map_err(|e| MosaicError::UnsupportedEnvironment(e.to_string()))?;
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
