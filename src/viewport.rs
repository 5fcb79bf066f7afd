use std::collections::HashSet;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::events::EventQueue;
use crate::utils::{Point, Rectangle, Size};

/// Navigation intents a held key can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavKey {
    PanLeft,
    PanRight,
    PanUp,
    PanDown,
    ZoomIn,
    ZoomOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewportEvent {
    Moved(Rectangle),
    Resized(Size),
    /// World-space position of a canvas click.
    Clicked(Point),
}

/// The visible world rectangle and its mapping onto the canvas.
///
/// World space has its origin at the bottom left; canvas (screen) space has it
/// at the top left, which only matters for clicks.
#[derive(Debug)]
pub struct Viewport {
    rect: Rectangle,
    canvas: Size,
    keys_held: HashSet<NavKey>,
    last_tick: Option<Instant>,
    move_step: f32,
    zoom_base: f32,
    min_extent: f32,
    max_extent: f32,
    pub(crate) events: EventQueue<ViewportEvent>,
}

impl Viewport {
    /// Starts with a world rectangle the size of the canvas, at the origin.
    pub fn new(canvas: Size, config: &EngineConfig) -> Self {
        let canvas = Size::new(canvas.width.max(1.0), canvas.height.max(1.0));
        Self {
            rect: Rectangle::new(0.0, 0.0, canvas.width, canvas.height),
            canvas,
            keys_held: HashSet::new(),
            last_tick: None,
            move_step: config.move_step,
            zoom_base: config.zoom_base,
            min_extent: config.min_extent,
            max_extent: config.max_extent,
            events: EventQueue::new(),
        }
    }

    pub fn rect(&self) -> Rectangle {
        self.rect
    }

    pub fn canvas(&self) -> Size {
        self.canvas
    }

    pub fn set_rect(&mut self, rect: Rectangle) {
        self.rect = rect;
        self.events.emit(ViewportEvent::Moved(rect));
    }

    pub fn key_down(&mut self, key: NavKey) {
        self.keys_held.insert(key);
    }

    pub fn key_up(&mut self, key: NavKey) {
        self.keys_held.remove(&key);
    }

    pub fn is_held(&self, key: NavKey) -> bool {
        self.keys_held.contains(&key)
    }

    /// Integrates held keys over the wall-clock time since the last call.
    pub fn advance(&mut self, now: Instant) -> bool {
        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last_tick = Some(now);
        self.advance_by(delta)
    }

    /// Integrates held keys over `delta` seconds. Returns whether the view moved.
    pub fn advance_by(&mut self, delta: f32) -> bool {
        let axis = |pos: NavKey, neg: NavKey| -> f32 {
            (self.is_held(pos) as i32 - self.is_held(neg) as i32) as f32
        };
        let dx = axis(NavKey::PanRight, NavKey::PanLeft);
        let dy = axis(NavKey::PanUp, NavKey::PanDown);
        let zoom = axis(NavKey::ZoomIn, NavKey::ZoomOut);

        if (dx == 0.0 && dy == 0.0 && zoom == 0.0) || delta <= 0.0 {
            return false;
        }

        let center = self.rect.center().translate(
            dx * self.move_step * self.rect.w() * delta,
            dy * self.move_step * self.rect.h() * delta,
        );
        let factor = if zoom == 0.0 {
            1.0
        } else {
            // zoom stops once the short side reaches min_extent or the long
            // side reaches max_extent
            let zoom_in_limit = self.rect.w().min(self.rect.h()) / self.min_extent;
            let zoom_out_limit = self.rect.w().max(self.rect.h()) / self.max_extent;
            self.zoom_base
                .powf(zoom * delta)
                .max(zoom_out_limit)
                .min(zoom_in_limit)
        };
        if dx == 0.0 && dy == 0.0 && (factor - 1.0).abs() < 1e-6 {
            return false;
        }

        let (w, h) = (self.rect.w() / factor, self.rect.h() / factor);
        match Rectangle::try_new(center.x - w / 2.0, center.y - h / 2.0, w, h) {
            Ok(rect) if rect.x().is_finite() && rect.y().is_finite() => {
                self.set_rect(rect);
                true
            }
            _ => {
                log::debug!("viewport motion out of range, staying at {:?}", self.rect);
                false
            }
        }
    }

    /// Rescales the view so the world extent per canvas pixel stays the same.
    pub fn resize(&mut self, width: f32, height: f32) {
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        let prev = self.canvas;
        self.canvas = Size::new(width, height);
        self.rect = Rectangle::from_center(
            self.rect.center(),
            self.rect.w() * width / prev.width,
            self.rect.h() * height / prev.height,
        );
        self.events.emit(ViewportEvent::Resized(self.canvas));
        self.events.emit(ViewportEvent::Moved(self.rect));
    }

    /// Centers on `bounds` and scales so it fits, keeping the canvas aspect ratio.
    pub fn fit_to_bounds(&mut self, bounds: Rectangle) {
        let aspect = self.canvas.aspect();
        let (w, h) = if bounds.w() / bounds.h() > aspect {
            (bounds.w(), bounds.w() / aspect)
        } else {
            (bounds.h() * aspect, bounds.h())
        };
        self.set_rect(Rectangle::from_center(bounds.center(), w, h));
    }

    /// Records a click at canvas pixel `screen` (origin top left).
    pub fn click(&mut self, screen: Point) -> Point {
        let flipped = Point::new(screen.x, self.canvas.height - screen.y);
        let world = self.screen_to_viewport_coord(flipped);
        self.events.emit(ViewportEvent::Clicked(world));
        world
    }

    pub fn viewport_to_screen_coord(&self, p: Point) -> Point {
        let base = self.rect.base_point();
        p.translate(-base.x, -base.y).scale(
            self.canvas.width / self.rect.w(),
            self.canvas.height / self.rect.h(),
        )
    }

    pub fn viewport_to_screen_rect(&self, r: &Rectangle) -> Rectangle {
        Rectangle::from_opposite_corners(
            self.viewport_to_screen_coord(r.base_point()),
            self.viewport_to_screen_coord(r.offset_point()),
        )
    }

    pub fn screen_to_viewport_coord(&self, p: Point) -> Point {
        let base = self.rect.base_point();
        p.scale(
            self.rect.w() / self.canvas.width,
            self.rect.h() / self.canvas.height,
        )
        .translate(base.x, base.y)
    }

    pub fn screen_to_viewport_rect(&self, r: &Rectangle) -> Rectangle {
        Rectangle::from_opposite_corners(
            self.screen_to_viewport_coord(r.base_point()),
            self.screen_to_viewport_coord(r.offset_point()),
        )
    }
}
