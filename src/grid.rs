//! Uniform-grid spatial index over resolved draw commands.
//!
//! The grid is rebuilt from scratch whenever the resolved command set changes
//! and is read-only afterwards; the store publishes it behind an `Arc` so a
//! reader always sees one consistent build.

use crate::gpu::GraphicsDrawCommand;
use crate::utils::{Point, Rectangle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellRange {
    cols: (usize, usize),
    rows: (usize, usize),
}

impl CellRange {
    fn count(&self) -> usize {
        (self.cols.1 - self.cols.0) * (self.rows.1 - self.rows.0)
    }
}

#[derive(Debug, Default)]
pub struct CollisionGrid {
    root: Option<Rectangle>,
    cell_w: f32,
    cell_h: f32,
    cols: usize,
    rows: usize,
    commands: Vec<GraphicsDrawCommand>,
    /// Row-major, each cell lists indices into `commands`.
    cells: Vec<Vec<u32>>,
}

impl CollisionGrid {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds over the bounding box of `commands` with cells of
    /// `sqrt(max(box_w, box_h))` world units.
    pub fn build(commands: Vec<GraphicsDrawCommand>) -> Self {
        let Some(root) = Rectangle::bounding(commands.iter().map(|c| &c.dst)) else {
            return Self::empty();
        };
        let cell = root.w().max(root.h()).sqrt();
        Self::build_with_cell_size(commands, cell)
    }

    pub fn build_with_cell_size(commands: Vec<GraphicsDrawCommand>, cell_size: f32) -> Self {
        let Some(root) = Rectangle::bounding(commands.iter().map(|c| &c.dst)) else {
            return Self::empty();
        };
        let cell = if cell_size > 0.0 { cell_size } else { 1.0 };
        let cols = ((root.w() / cell).ceil() as usize).max(1);
        let rows = ((root.h() / cell).ceil() as usize).max(1);

        let mut grid = Self {
            root: Some(root),
            cell_w: cell,
            cell_h: cell,
            cols,
            rows,
            commands: Vec::new(),
            cells: vec![Vec::new(); cols * rows],
        };

        for (index, command) in commands.iter().enumerate() {
            let Some(range) = grid.registration_range(&command.dst) else {
                continue;
            };
            for row in range.rows.0..range.rows.1 {
                for col in range.cols.0..range.cols.1 {
                    grid.cells[row * cols + col].push(index as u32);
                }
            }
        }
        grid.commands = commands;
        log::debug!(
            "collision grid {}x{} cells of {:.1} over {} commands",
            cols,
            rows,
            cell,
            grid.commands.len()
        );
        grid
    }

    /// Half-open cell range `[floor(lo / cell), ceil(hi / cell))` clamped to
    /// the grid. `None` when `rect` lies outside the root box.
    fn cell_range(&self, rect: &Rectangle) -> Option<CellRange> {
        self.cell_range_with(rect, f32::ceil)
    }

    /// Registration range: the far end is `floor(hi / cell) + 1`, the same
    /// rounding [`CollisionGrid::collisions_coord`] uses, so every point a
    /// command contains maps to a cell that lists it.
    fn registration_range(&self, rect: &Rectangle) -> Option<CellRange> {
        self.cell_range_with(rect, |end| end.floor() + 1.0)
    }

    fn cell_range_with(&self, rect: &Rectangle, far: fn(f32) -> f32) -> Option<CellRange> {
        let root = self.root?;
        let axis = |lo: f32, hi: f32, origin: f32, cell: f32, n: usize| -> Option<(usize, usize)> {
            let start = ((lo - origin) / cell).floor();
            let end = far((hi - origin) / cell);
            if end <= 0.0 || start >= n as f32 {
                return None;
            }
            let start = start.max(0.0) as usize;
            let end = (end.min(n as f32) as usize).max(start + 1);
            Some((start, end))
        };
        let base = rect.base_point();
        let offset = rect.offset_point();
        Some(CellRange {
            cols: axis(base.x, offset.x, root.x(), self.cell_w, self.cols)?,
            rows: axis(base.y, offset.y, root.y(), self.cell_h, self.rows)?,
        })
    }

    /// Commands registered in any cell overlapping `rect`, deduplicated and in
    /// build order.
    ///
    /// This is a broad-phase answer at cell granularity. When the query covers
    /// more than `sqrt(total cells)` cells the result is empty: callers trade
    /// under-reporting on extreme zoom-out for a bounded per-frame cost.
    pub fn collisions_rect(&self, rect: &Rectangle) -> Vec<&GraphicsDrawCommand> {
        let Some(range) = self.cell_range(rect) else {
            return Vec::new();
        };
        let limit = ((self.cols * self.rows) as f64).sqrt();
        if range.count() as f64 > limit {
            log::trace!(
                "collision query over {} cells exceeds limit {:.1}",
                range.count(),
                limit
            );
            return Vec::new();
        }

        let mut hits: Vec<u32> = Vec::new();
        for row in range.rows.0..range.rows.1 {
            for col in range.cols.0..range.cols.1 {
                hits.extend_from_slice(&self.cells[row * self.cols + col]);
            }
        }
        hits.sort_unstable();
        hits.dedup();
        hits.into_iter()
            .map(|i| &self.commands[i as usize])
            .collect()
    }

    /// Commands whose destination contains `p` (half-open on the far edges).
    pub fn collisions_coord(&self, p: Point) -> Vec<&GraphicsDrawCommand> {
        let Some(root) = self.root else {
            return Vec::new();
        };
        if !root.contains_coord(p) {
            return Vec::new();
        }
        let col = (((p.x - root.x()) / self.cell_w).floor() as usize).min(self.cols - 1);
        let row = (((p.y - root.y()) / self.cell_h).floor() as usize).min(self.rows - 1);
        self.cells[row * self.cols + col]
            .iter()
            .map(|&i| &self.commands[i as usize])
            .filter(|c| c.dst.contains_coord(p))
            .collect()
    }

    pub fn root(&self) -> Option<Rectangle> {
        self.root
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    pub fn cell_size(&self) -> (f32, f32) {
        (self.cell_w, self.cell_h)
    }

    pub fn commands(&self) -> &[GraphicsDrawCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TextureHandle;

    fn command(id: &str, x: f32, y: f32, w: f32, h: f32) -> GraphicsDrawCommand {
        GraphicsDrawCommand {
            id: id.to_string(),
            texture: TextureHandle(1),
            src: Rectangle::new(0.0, 0.0, 1.0, 1.0),
            dst: Rectangle::new(x, y, w, h),
        }
    }

    #[test]
    fn default_cell_size_is_sqrt_of_extent() {
        let grid = CollisionGrid::build(vec![command("a", 0.0, 0.0, 400.0, 100.0)]);
        assert_eq!(grid.cell_size(), (20.0, 20.0));
        assert_eq!(grid.dimensions(), (20, 5));
    }

    #[test]
    fn straddling_command_is_reported_once() {
        let grid = CollisionGrid::build_with_cell_size(
            vec![
                command("wide", 0.0, 0.0, 100.0, 10.0),
                command("corner", 90.0, 90.0, 10.0, 10.0),
            ],
            10.0,
        );
        let hits = grid.collisions_rect(&Rectangle::new(0.0, 0.0, 30.0, 5.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "wide");
    }

    #[test]
    fn oversized_query_returns_nothing() {
        let grid = CollisionGrid::build_with_cell_size(
            vec![
                command("a", 0.0, 0.0, 10.0, 10.0),
                command("b", 90.0, 90.0, 10.0, 10.0),
            ],
            10.0,
        );
        // 100 cells, limit 10
        assert!(grid
            .collisions_rect(&Rectangle::new(0.0, 0.0, 100.0, 100.0))
            .is_empty());
        assert_eq!(
            grid.collisions_rect(&Rectangle::new(0.0, 0.0, 20.0, 20.0)).len(),
            1
        );
    }

    #[test]
    fn coord_query_filters_by_containment() {
        let grid = CollisionGrid::build_with_cell_size(
            vec![
                command("a", 0.0, 0.0, 4.0, 4.0),
                command("b", 5.0, 5.0, 5.0, 5.0),
            ],
            10.0,
        );
        let hit = grid.collisions_coord(Point::new(6.0, 6.0));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].id, "b");
        assert!(grid.collisions_coord(Point::new(4.5, 4.5)).is_empty());
        assert!(grid.collisions_coord(Point::new(-1.0, 0.0)).is_empty());
    }

    #[test]
    fn empty_grid_answers_empty() {
        let grid = CollisionGrid::build(Vec::new());
        assert!(grid.is_empty());
        assert!(grid.root().is_none());
        assert!(grid
            .collisions_rect(&Rectangle::new(0.0, 0.0, 1.0, 1.0))
            .is_empty());
        assert!(grid.collisions_coord(Point::new(0.0, 0.0)).is_empty());
    }
}
