use std::collections::HashMap;

use crate::gpu::TextureHandle;
use crate::utils::Rectangle;

/// Decoded RGBA8 pixels as they travel from the worker to the GPU.
pub type Bitmap = image::RgbaImage;

/// Output of one shelf-packing pass.
///
/// `atlas_mapping` rectangles are in atlas pixel space with the origin at the
/// top-left texel (row 0 is the first row of pixel data).
#[derive(Debug, Default)]
pub struct PackedAtlas {
    pub atlas_mapping: HashMap<String, Rectangle>,
    pub pixel_mapping: HashMap<String, Bitmap>,
    pub width: u32,
    pub height: u32,
}

impl PackedAtlas {
    pub fn is_empty(&self) -> bool {
        self.atlas_mapping.is_empty()
    }

    pub fn len(&self) -> usize {
        self.atlas_mapping.len()
    }
}

/// Packs bitmaps into shelves.
///
/// Images are sorted by descending height (stable, so equal heights keep their
/// input order) and laid out left to right. A new shelf starts whenever the
/// next image would run past `floor(sqrt(total_area))`; an image wider than
/// that row width still gets a shelf of its own. Empty bitmaps are dropped.
pub fn pack_bitmaps(images: Vec<(String, Bitmap)>) -> PackedAtlas {
    let mut images: Vec<(String, Bitmap)> = images
        .into_iter()
        .filter(|(id, bitmap)| {
            let keep = bitmap.width() > 0 && bitmap.height() > 0;
            if !keep {
                log::debug!("dropping empty bitmap for {id}");
            }
            keep
        })
        .collect();

    let mut packed = PackedAtlas::default();
    if images.is_empty() {
        return packed;
    }

    images.sort_by(|(_, a), (_, b)| b.height().cmp(&a.height()));

    let total_area: u64 = images
        .iter()
        .map(|(_, b)| b.width() as u64 * b.height() as u64)
        .sum();
    let row_width = (total_area as f64).sqrt().floor() as u32;

    // Cursor within the current shelf
    let mut x = 0u32;
    let mut y = 0u32;
    let mut shelf_height = 0u32;
    let mut width = 0u32;

    for (id, bitmap) in images {
        let (w, h) = (bitmap.width(), bitmap.height());
        if x > 0 && x + w > row_width {
            y += shelf_height;
            x = 0;
            shelf_height = 0;
        }

        packed
            .atlas_mapping
            .insert(id.clone(), Rectangle::new(x as f32, y as f32, w as f32, h as f32));
        packed.pixel_mapping.insert(id, bitmap);

        x += w;
        width = width.max(x);
        shelf_height = shelf_height.max(h);
    }

    packed.width = width;
    packed.height = y + shelf_height;
    packed
}

/// Repacks `packed` into atlases no larger than `max_dimension` per edge by
/// halving its image set until every part fits. An image that exceeds the
/// limit on its own is dropped.
pub fn split_to_fit(packed: PackedAtlas, max_dimension: u32) -> Vec<PackedAtlas> {
    if packed.width <= max_dimension && packed.height <= max_dimension {
        return vec![packed];
    }
    let mut images: Vec<(String, Bitmap)> = packed.pixel_mapping.into_iter().collect();
    if images.len() <= 1 {
        for (id, bitmap) in &images {
            log::warn!(
                "dropping {id}: {}x{} exceeds the texture limit {max_dimension}",
                bitmap.width(),
                bitmap.height()
            );
        }
        return Vec::new();
    }
    images.sort_by(|(a, _), (b, _)| a.cmp(b));
    let upper = images.split_off(images.len() / 2);
    log::debug!(
        "atlas of {}x{} over the limit, splitting {} images",
        packed.width,
        packed.height,
        images.len() + upper.len()
    );
    [images, upper]
        .into_iter()
        .flat_map(|half| split_to_fit(pack_bitmaps(half), max_dimension))
        .collect()
}

/// A packed texture on the GPU plus the sub-rectangle of every id it holds.
#[derive(Debug, Clone)]
pub struct TextureAtlas {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub mapping: HashMap<String, Rectangle>,
}

impl TextureAtlas {
    pub fn new(texture: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            texture,
            width,
            height,
            mapping: HashMap::new(),
        }
    }

    pub fn source_rect(&self, id: &str) -> Option<Rectangle> {
        self.mapping.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.mapping.contains_key(id)
    }
}
