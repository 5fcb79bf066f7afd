use std::sync::Arc;

use crate::events::EventQueue;
use crate::gpu::GraphicsDrawCommand;
use crate::grid::CollisionGrid;
use crate::utils::Point;

#[derive(Debug, Clone, PartialEq)]
pub enum SelectorEvent {
    SelectionChanged(Option<GraphicsDrawCommand>),
}

/// Click-to-select against the most recently published collision grid.
#[derive(Debug, Default)]
pub struct Selector {
    selected: Option<GraphicsDrawCommand>,
    grid: Option<Arc<CollisionGrid>>,
    pub(crate) events: EventQueue<SelectorEvent>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&GraphicsDrawCommand> {
        self.selected.as_ref()
    }

    pub fn set_grid(&mut self, grid: Arc<CollisionGrid>) {
        self.grid = Some(grid);
    }

    /// Selects the first command under `world`, or clears the selection.
    /// Clicks before any grid exists are ignored.
    pub fn click(&mut self, world: Point) {
        let Some(grid) = &self.grid else { return };
        self.selected = grid.collisions_coord(world).first().map(|c| (*c).clone());
        if let Some(selected) = &self.selected {
            log::debug!("selected {}", selected.id);
        }
        self.events
            .emit(SelectorEvent::SelectionChanged(self.selected.clone()));
    }

    /// A new layout invalidates whatever was picked from the old one. Hosts
    /// hear about it only when something was selected.
    pub fn clear(&mut self) {
        if self.selected.take().is_some() {
            self.events.emit(SelectorEvent::SelectionChanged(None));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TextureHandle;
    use crate::utils::Rectangle;

    fn grid() -> Arc<CollisionGrid> {
        Arc::new(CollisionGrid::build(vec![GraphicsDrawCommand {
            id: "a".into(),
            texture: TextureHandle(1),
            src: Rectangle::new(0.0, 0.0, 10.0, 10.0),
            dst: Rectangle::new(0.0, 0.0, 100.0, 100.0),
        }]))
    }

    #[test]
    fn click_selects_then_clears() {
        let mut selector = Selector::new();
        selector.click(Point::new(5.0, 5.0));
        assert!(selector.events.is_empty());

        selector.set_grid(grid());
        selector.click(Point::new(5.0, 5.0));
        assert_eq!(selector.selected().map(|c| c.id.as_str()), Some("a"));

        selector.click(Point::new(500.0, 5.0));
        assert!(selector.selected().is_none());
        let events = selector.events.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SelectorEvent::SelectionChanged(None));
    }

    #[test]
    fn clearing_a_selection_is_announced_once() {
        let mut selector = Selector::new();
        selector.set_grid(grid());
        selector.clear();
        assert!(selector.events.is_empty());

        selector.click(Point::new(5.0, 5.0));
        selector.events.drain();
        selector.clear();
        selector.clear();
        assert_eq!(
            selector.events.drain(),
            vec![SelectorEvent::SelectionChanged(None)]
        );
        assert!(selector.selected().is_none());
    }
}
