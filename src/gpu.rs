//! Backend-agnostic GPU resource layer.
//!
//! Textures and buffer sets live inside a [`GpuBackend`] and are addressed by
//! opaque handles the backend issues. The engine keeps one [`Texture`] record
//! per handle holding the geometry last uploaded for it, so identical geometry
//! never reaches the GPU twice.

use std::collections::{BTreeMap, HashSet};

use crate::error::{MosaicError, Result};
use crate::texture_atlas::Bitmap;
use crate::utils::{Rectangle, TransformUniform, Vertex};

/// Hardware-friendly cap on indices per buffer set. With six indices and four
/// vertices per quad this keeps every vertex index within `u16`.
pub const INDICES_PER_BUFFER_SET: usize = 98_304;
pub const QUADS_PER_BUFFER_SET: usize = INDICES_PER_BUFFER_SET / INDICES_PER_QUAD;
const INDICES_PER_QUAD: usize = 6;
const VERTICES_PER_QUAD: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferSetHandle(pub u32);

/// One image placement produced by a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub id: String,
    pub dst: Rectangle,
}

/// A [`DrawCommand`] resolved against a loaded atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsDrawCommand {
    pub id: String,
    pub texture: TextureHandle,
    /// Sub-rectangle in atlas pixel space.
    pub src: Rectangle,
    /// Placement in world space.
    pub dst: Rectangle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub src: Rectangle,
    pub dst: Rectangle,
}

/// Engine-side record of a backend texture.
#[derive(Debug, Clone)]
pub struct Texture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub buffers: Vec<BufferSetHandle>,
    /// Geometry of the last upload.
    pub instances: Vec<Instance>,
}

impl Texture {
    pub fn new(handle: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            handle,
            width,
            height,
            buffers: Vec::new(),
            instances: Vec::new(),
        }
    }
}

/// One indexed draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBatch {
    pub texture: TextureHandle,
    pub buffer_set: BufferSetHandle,
    pub index_count: u32,
}

/// Texture edge limit every wgpu device supports without raised limits.
pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// The operations the engine needs from a graphics API.
///
/// Initialization failures belong to the backend's constructor; once built, a
/// backend only fails on operations referencing handles it never issued or on
/// lost devices.
pub trait GpuBackend {
    /// Longest texture edge the device accepts. Storage requests beyond it
    /// fail with [`MosaicError::TextureTooLarge`].
    fn max_texture_dimension(&self) -> u32 {
        DEFAULT_MAX_TEXTURE_DIMENSION
    }

    fn create_texture(&mut self) -> Result<TextureHandle>;
    /// Allocates `width`×`height` storage without pixel data.
    fn init_empty_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()>;
    /// Makes every texel fully transparent.
    fn clear_texture(&mut self, texture: TextureHandle) -> Result<()>;
    /// Replaces storage and contents with `bitmap`.
    fn upload_texture(&mut self, texture: TextureHandle, bitmap: &Bitmap) -> Result<()>;
    /// Overwrites the region at `(x, y)` with `bitmap`.
    fn upload_sub_texture(
        &mut self,
        texture: TextureHandle,
        bitmap: &Bitmap,
        x: u32,
        y: u32,
    ) -> Result<()>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_buffer_set(&mut self) -> Result<BufferSetHandle>;
    fn upload_buffer_set(
        &mut self,
        set: BufferSetHandle,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> Result<()>;
    fn destroy_buffer_set(&mut self, set: BufferSetHandle);

    fn draw(
        &mut self,
        transform: &TransformUniform,
        clear_color: [f64; 4],
        batches: &[DrawBatch],
    ) -> Result<()>;

    /// Surface size changed.
    fn resize(&mut self, _width: u32, _height: u32) {}
}

/// Owns the [`Texture`] records, ordered by handle.
#[derive(Debug, Default)]
pub struct TextureRegistry {
    textures: BTreeMap<TextureHandle, Texture>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a texture with empty storage of the given size.
    pub fn allocate(
        &mut self,
        backend: &mut impl GpuBackend,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle> {
        let handle = backend.create_texture()?;
        if let Err(e) = backend.init_empty_texture(handle, width, height) {
            backend.destroy_texture(handle);
            return Err(e);
        }
        self.textures
            .insert(handle, Texture::new(handle, width, height));
        Ok(handle)
    }

    /// Creates a texture holding `bitmap`.
    pub fn allocate_with(
        &mut self,
        backend: &mut impl GpuBackend,
        bitmap: &Bitmap,
    ) -> Result<TextureHandle> {
        let handle = backend.create_texture()?;
        if let Err(e) = backend.upload_texture(handle, bitmap) {
            backend.destroy_texture(handle);
            return Err(e);
        }
        self.textures.insert(
            handle,
            Texture::new(handle, bitmap.width(), bitmap.height()),
        );
        Ok(handle)
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(&handle)
    }

    pub fn contains(&self, handle: TextureHandle) -> bool {
        self.textures.contains_key(&handle)
    }

    /// Destroys the texture and its buffer sets.
    pub fn release(&mut self, backend: &mut impl GpuBackend, handle: TextureHandle) -> Result<()> {
        let texture = self
            .textures
            .remove(&handle)
            .ok_or(MosaicError::UnknownTexture(handle.0))?;
        for set in texture.buffers {
            backend.destroy_buffer_set(set);
        }
        backend.destroy_texture(handle);
        Ok(())
    }

    pub fn release_all(&mut self, backend: &mut impl GpuBackend) {
        for (handle, texture) in std::mem::take(&mut self.textures) {
            for set in texture.buffers {
                backend.destroy_buffer_set(set);
            }
            backend.destroy_texture(handle);
        }
    }

    pub fn handles(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.textures.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Four corners in TR, TL, BR, BL order.
///
/// `dst` is world space with y up; `src` is atlas pixel space with row 0 at the
/// top, so the top edge of `dst` samples `src.y`.
pub fn quad_vertices(src: &Rectangle, dst: &Rectangle, tex_w: u32, tex_h: u32) -> [Vertex; 4] {
    let (tw, th) = (tex_w.max(1) as f32, tex_h.max(1) as f32);
    let (u0, u1) = (src.x() / tw, (src.x() + src.w()) / tw);
    let (v_top, v_bottom) = (src.y() / th, (src.y() + src.h()) / th);
    let (left, right) = (dst.x(), dst.x() + dst.w());
    let (bottom, top) = (dst.y(), dst.y() + dst.h());

    [
        Vertex {
            position: [right, top, 0.0],
            tex_coords: [u1, v_top],
        },
        Vertex {
            position: [left, top, 0.0],
            tex_coords: [u0, v_top],
        },
        Vertex {
            position: [right, bottom, 0.0],
            tex_coords: [u1, v_bottom],
        },
        Vertex {
            position: [left, bottom, 0.0],
            tex_coords: [u0, v_bottom],
        },
    ]
}

/// Two triangles per quad: (TR, TL, BR) and (BL, BR, TL).
fn quad_indices(base: u16) -> [u16; INDICES_PER_QUAD] {
    [base, base + 1, base + 2, base + 3, base + 2, base + 1]
}

/// Vertex and index data for one buffer set's worth of instances.
pub fn build_geometry(instances: &[Instance], tex_w: u32, tex_h: u32) -> (Vec<Vertex>, Vec<u16>) {
    debug_assert!(instances.len() <= QUADS_PER_BUFFER_SET);
    let mut vertices = Vec::with_capacity(instances.len() * VERTICES_PER_QUAD);
    let mut indices = Vec::with_capacity(instances.len() * INDICES_PER_QUAD);
    for (i, instance) in instances.iter().enumerate() {
        vertices.extend_from_slice(&quad_vertices(&instance.src, &instance.dst, tex_w, tex_h));
        indices.extend_from_slice(&quad_indices((i * VERTICES_PER_QUAD) as u16));
    }
    (vertices, indices)
}

/// Brings every registered texture's buffer sets in line with `commands`.
///
/// Textures whose instance list equals the previous upload are skipped without
/// touching the backend. Buffer sets are allocated lazily and kept when the
/// instance count shrinks. Returns the textures that were re-uploaded.
pub fn update_buffers(
    backend: &mut impl GpuBackend,
    registry: &mut TextureRegistry,
    commands: &[GraphicsDrawCommand],
) -> Result<Vec<TextureHandle>> {
    let mut grouped: BTreeMap<TextureHandle, Vec<Instance>> = BTreeMap::new();
    for command in commands {
        if !registry.contains(command.texture) {
            log::warn!(
                "draw command {} references unknown texture {:?}",
                command.id,
                command.texture
            );
            continue;
        }
        grouped.entry(command.texture).or_default().push(Instance {
            src: command.src,
            dst: command.dst,
        });
    }

    let mut updated = Vec::new();
    for (handle, texture) in registry.textures.iter_mut() {
        let instances = grouped.remove(handle).unwrap_or_default();
        if instances == texture.instances {
            continue;
        }

        for (set_index, chunk) in instances.chunks(QUADS_PER_BUFFER_SET).enumerate() {
            if set_index == texture.buffers.len() {
                texture.buffers.push(backend.create_buffer_set()?);
            }
            let (vertices, indices) = build_geometry(chunk, texture.width, texture.height);
            backend.upload_buffer_set(texture.buffers[set_index], &vertices, &indices)?;
        }
        texture.instances = instances;
        updated.push(*handle);
    }
    Ok(updated)
}

/// Draw calls for the current geometry.
///
/// A non-empty `visible` set restricts drawing to the textures it names. Each
/// buffer set is drawn with `min(INDICES_PER_BUFFER_SET, remaining)` indices.
pub fn plan_draw(registry: &TextureRegistry, visible: &HashSet<TextureHandle>) -> Vec<DrawBatch> {
    let mut batches = Vec::new();
    for texture in registry.textures.values() {
        if !visible.is_empty() && !visible.contains(&texture.handle) {
            continue;
        }
        let mut remaining = texture.instances.len() * INDICES_PER_QUAD;
        for &set in &texture.buffers {
            if remaining == 0 {
                break;
            }
            let count = remaining.min(INDICES_PER_BUFFER_SET);
            batches.push(DrawBatch {
                texture: texture.handle,
                buffer_set: set,
                index_count: count as u32,
            });
            remaining -= count;
        }
    }
    batches
}
