//! Turning image collections into placements.
//!
//! The grid and line layouts run locally; everything else is computed by the
//! server and converted here. [`Organizer`] owns the current descriptor and
//! filter and publishes each new layout as a whole.

use std::collections::HashMap;
use std::sync::Arc;

use crate::api::{ApiLayout, ImageMeta, LayoutFilter, LayoutOptions, LayoutRequest};
use crate::events::EventQueue;
use crate::gpu::DrawCommand;
use crate::utils::{Point, Rectangle};

/// Server `pos` coordinates are normalised; this maps them to world units.
const POS_SCALE: f32 = 100_000.0;
const POS_MIN_SPACING: f32 = 10.0;
const POS_SIZE_FACTOR: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayoutParams {
    pub width: f32,
    pub height: f32,
    pub spacing: f32,
}

impl Default for GridLayoutParams {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 100.0,
            spacing: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineDirection {
    #[default]
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LineLayoutParams {
    pub direction: LineDirection,
    pub cell: GridLayoutParams,
}

/// Fits an image into a `width`×`height` cell keeping its aspect ratio.
fn fit_into_cell(image: &ImageMeta, width: f32, height: f32) -> Option<(f32, f32)> {
    if image.width == 0 || image.height == 0 {
        log::warn!("image {} has no extent, leaving it out", image.id);
        return None;
    }
    let wh = image.width as f32 / image.height as f32;
    if wh > 1.0 {
        Some((width, height / wh))
    } else {
        Some((width * wh, height))
    }
}

/// Places `rows[i][j]` at `((w + s) * j, (h + s) * i)`; empty cells stay empty.
pub fn create_grid_layout(
    rows: &[Vec<Option<&ImageMeta>>],
    params: &GridLayoutParams,
) -> Vec<DrawCommand> {
    let mut commands = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        for (j, image) in row.iter().enumerate() {
            let Some(image) = image else { continue };
            let Some((w, h)) = fit_into_cell(image, params.width, params.height) else {
                continue;
            };
            commands.push(DrawCommand {
                id: image.id.clone(),
                dst: Rectangle::new(
                    (params.width + params.spacing) * j as f32,
                    (params.height + params.spacing) * i as f32,
                    w,
                    h,
                ),
            });
        }
    }
    commands
}

/// Square-ish grid with `ceil(sqrt(n))` images per row.
pub fn create_simple_grid_layout(images: &[&ImageMeta], params: &GridLayoutParams) -> Vec<DrawCommand> {
    if images.is_empty() {
        return Vec::new();
    }
    let per_row = (images.len() as f64).sqrt().ceil() as usize;
    let rows: Vec<Vec<Option<&ImageMeta>>> = images
        .chunks(per_row)
        .map(|chunk| chunk.iter().copied().map(Some).collect())
        .collect();
    create_grid_layout(&rows, params)
}

pub fn create_line_layout(images: &[&ImageMeta], params: &LineLayoutParams) -> Vec<DrawCommand> {
    let cell = &params.cell;
    images
        .iter()
        .enumerate()
        .filter_map(|(i, image)| {
            let (w, h) = fit_into_cell(image, cell.width, cell.height)?;
            let step = i as f32;
            let (x, y) = match params.direction {
                LineDirection::Horizontal => (step * (cell.width + cell.spacing), 0.0),
                LineDirection::Vertical => (0.0, step * (cell.height + cell.spacing)),
            };
            Some(DrawCommand {
                id: image.id.clone(),
                dst: Rectangle::new(x, y, w, h),
            })
        })
        .collect()
}

/// Square placements centred on scaled server positions, sized from the
/// distance to the nearest neighbour on either axis.
fn create_pos_layout(points: &[(String, f32, f32)]) -> Vec<DrawCommand> {
    let scaled: Vec<(f32, f32)> = points
        .iter()
        .map(|(_, x, y)| (x * POS_SCALE, y * POS_SCALE))
        .collect();

    points
        .iter()
        .enumerate()
        .map(|(i, (id, _, _))| {
            let (xi, yi) = scaled[i];
            let nearest = scaled
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, (xj, yj))| (xi - xj).abs().min((yi - yj).abs()))
                .fold(f32::INFINITY, f32::min);
            let spacing = if nearest.is_finite() {
                nearest.max(POS_MIN_SPACING)
            } else {
                POS_MIN_SPACING
            };
            let size = spacing * POS_SIZE_FACTOR;
            DrawCommand {
                id: id.clone(),
                dst: Rectangle::from_center(Point::new(xi, yi), size, size),
            }
        })
        .collect()
}

/// Converts a server layout into placements, dropping ids the collection
/// does not know.
pub fn layout_from_server(
    layout: &ApiLayout,
    images: &HashMap<String, ImageMeta>,
    params: &GridLayoutParams,
) -> Vec<DrawCommand> {
    match layout {
        ApiLayout::Sort(ids) => {
            let ordered: Vec<&ImageMeta> = ids.iter().filter_map(|id| images.get(id)).collect();
            create_line_layout(
                &ordered,
                &LineLayoutParams {
                    direction: LineDirection::Horizontal,
                    cell: *params,
                },
            )
        }
        ApiLayout::Grid(rows) => {
            let rows: Vec<Vec<Option<&ImageMeta>>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|id| id.as_ref().and_then(|id| images.get(id)))
                        .collect()
                })
                .collect();
            create_grid_layout(&rows, params)
        }
        ApiLayout::Pos(points) => {
            let known: Vec<(String, f32, f32)> = points
                .iter()
                .filter(|(id, x, y)| images.contains_key(id) && x.is_finite() && y.is_finite())
                .cloned()
                .collect();
            create_pos_layout(&known)
        }
    }
}

/// Which layout the organizer produces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LayoutDescriptor {
    /// Local square grid.
    #[default]
    Grid,
    /// Computed by the server.
    Server(LayoutOptions),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrganizerEvent {
    LayoutChanged(Arc<[DrawCommand]>),
}

/// Holds the collection's images and regenerates the layout whenever they,
/// the descriptor or the filter change.
#[derive(Debug)]
pub struct Organizer {
    images: Vec<ImageMeta>,
    by_id: HashMap<String, ImageMeta>,
    descriptor: LayoutDescriptor,
    filter: LayoutFilter,
    params: GridLayoutParams,
    layout: Arc<[DrawCommand]>,
    generation: u64,
    pub(crate) events: EventQueue<OrganizerEvent>,
}

impl Organizer {
    pub fn new(params: GridLayoutParams) -> Self {
        Self {
            images: Vec::new(),
            by_id: HashMap::new(),
            descriptor: LayoutDescriptor::default(),
            filter: LayoutFilter::default(),
            params,
            layout: Arc::from(Vec::new()),
            generation: 0,
            events: EventQueue::new(),
        }
    }

    pub fn images(&self) -> &[ImageMeta] {
        &self.images
    }

    pub fn image(&self, id: &str) -> Option<&ImageMeta> {
        self.by_id.get(id)
    }

    pub fn layout(&self) -> Arc<[DrawCommand]> {
        self.layout.clone()
    }

    pub fn descriptor(&self) -> &LayoutDescriptor {
        &self.descriptor
    }

    pub fn filter(&self) -> &LayoutFilter {
        &self.filter
    }

    /// Bumped on every regeneration; server replies carry the value they were
    /// requested under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_images(&mut self, images: Vec<ImageMeta>) -> Option<LayoutRequest> {
        self.by_id = images
            .iter()
            .map(|image| (image.id.clone(), image.clone()))
            .collect();
        self.images = images;
        self.regenerate()
    }

    pub fn set_filter(&mut self, filter: LayoutFilter) -> Option<LayoutRequest> {
        self.filter = filter;
        self.regenerate()
    }

    pub fn set_descriptor(&mut self, descriptor: LayoutDescriptor) -> Option<LayoutRequest> {
        self.descriptor = descriptor;
        self.regenerate()
    }

    /// Drops all images and publishes an empty layout.
    pub fn clear(&mut self) {
        self.images.clear();
        self.by_id.clear();
        self.generation += 1;
        self.publish(Vec::new());
    }

    /// Local layouts are published immediately. Server layouts return the
    /// request to send; the reply goes to [`Organizer::apply_server_layout`].
    pub fn regenerate(&mut self) -> Option<LayoutRequest> {
        self.generation += 1;
        match &self.descriptor {
            LayoutDescriptor::Grid => {
                let limit = self.filter.limit.unwrap_or(usize::MAX);
                let images: Vec<&ImageMeta> = self.images.iter().take(limit).collect();
                let layout = create_simple_grid_layout(&images, &self.params);
                self.publish(layout);
                None
            }
            LayoutDescriptor::Server(options) => {
                if self.images.is_empty() {
                    self.publish(Vec::new());
                    return None;
                }
                Some(LayoutRequest {
                    options: options.clone(),
                    filter: (!self.filter.is_empty()).then(|| self.filter.clone()),
                })
            }
        }
    }

    /// Publishes a server layout unless a newer regeneration superseded it.
    pub fn apply_server_layout(&mut self, generation: u64, layout: &ApiLayout) -> bool {
        if generation != self.generation {
            log::debug!(
                "discarding layout for generation {generation}, current is {}",
                self.generation
            );
            return false;
        }
        let commands = layout_from_server(layout, &self.by_id, &self.params);
        self.publish(commands);
        true
    }

    fn publish(&mut self, commands: Vec<DrawCommand>) {
        log::info!("layout with {} placements", commands.len());
        self.layout = Arc::from(commands);
        self.events
            .emit(OrganizerEvent::LayoutChanged(self.layout.clone()));
    }
}
