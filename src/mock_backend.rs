//! Headless [`GpuBackend`] that records every call.
//!
//! Used by the test suites and by tooling that needs the engine without a
//! window. Handles are issued sequentially starting at 1.

use std::collections::{HashMap, HashSet};

use crate::error::{MosaicError, Result};
use crate::gpu::{
    BufferSetHandle, DrawBatch, GpuBackend, TextureHandle, DEFAULT_MAX_TEXTURE_DIMENSION,
};
use crate::texture_atlas::Bitmap;
use crate::utils::{TransformUniform, Vertex};

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    CreateTexture(TextureHandle),
    InitEmptyTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    ClearTexture(TextureHandle),
    UploadTexture {
        texture: TextureHandle,
        width: u32,
        height: u32,
    },
    UploadSubTexture {
        texture: TextureHandle,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    DestroyTexture(TextureHandle),
    CreateBufferSet(BufferSetHandle),
    UploadBufferSet {
        set: BufferSetHandle,
        vertices: usize,
        indices: usize,
    },
    DestroyBufferSet(BufferSetHandle),
    Draw {
        transform: TransformUniform,
        batches: Vec<DrawBatch>,
    },
    Resize {
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<GpuCall>,
    next_handle: u32,
    textures: HashMap<TextureHandle, (u32, u32)>,
    buffer_sets: HashSet<BufferSetHandle>,
    geometry: HashMap<BufferSetHandle, (Vec<Vertex>, Vec<u16>)>,
    /// Overrides [`DEFAULT_MAX_TEXTURE_DIMENSION`].
    texture_limit: Option<u32>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[GpuCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn buffer_uploads(&self) -> usize {
        self.count(|c| matches!(c, GpuCall::UploadBufferSet { .. }))
    }

    pub fn sub_texture_uploads(&self) -> usize {
        self.count(|c| matches!(c, GpuCall::UploadSubTexture { .. }))
    }

    pub fn last_draw(&self) -> Option<&[DrawBatch]> {
        self.calls.iter().rev().find_map(|c| match c {
            GpuCall::Draw { batches, .. } => Some(batches.as_slice()),
            _ => None,
        })
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_sets(&self) -> usize {
        self.buffer_sets.len()
    }

    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).copied()
    }

    /// Last vertex/index data uploaded to `set`.
    pub fn geometry(&self, set: BufferSetHandle) -> Option<(&[Vertex], &[u16])> {
        self.geometry
            .get(&set)
            .map(|(v, i)| (v.as_slice(), i.as_slice()))
    }

    fn issue(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Rejects storage above `limit` texels per edge, like a small device.
    pub fn with_texture_limit(mut self, limit: u32) -> Self {
        self.texture_limit = Some(limit);
        self
    }

    fn check_size(&self, width: u32, height: u32) -> Result<()> {
        let max = self.max_texture_dimension();
        if width > max || height > max {
            Err(MosaicError::TextureTooLarge { width, height, max })
        } else {
            Ok(())
        }
    }

    fn check(&self, texture: TextureHandle) -> Result<()> {
        if self.textures.contains_key(&texture) {
            Ok(())
        } else {
            Err(MosaicError::UnknownTexture(texture.0))
        }
    }
}

impl GpuBackend for RecordingBackend {
    fn max_texture_dimension(&self) -> u32 {
        self.texture_limit.unwrap_or(DEFAULT_MAX_TEXTURE_DIMENSION)
    }

    fn create_texture(&mut self) -> Result<TextureHandle> {
        let handle = TextureHandle(self.issue());
        self.textures.insert(handle, (0, 0));
        self.calls.push(GpuCall::CreateTexture(handle));
        Ok(handle)
    }

    fn init_empty_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        self.check(texture)?;
        self.check_size(width, height)?;
        self.textures.insert(texture, (width, height));
        self.calls.push(GpuCall::InitEmptyTexture {
            texture,
            width,
            height,
        });
        Ok(())
    }

    fn clear_texture(&mut self, texture: TextureHandle) -> Result<()> {
        self.check(texture)?;
        self.calls.push(GpuCall::ClearTexture(texture));
        Ok(())
    }

    fn upload_texture(&mut self, texture: TextureHandle, bitmap: &Bitmap) -> Result<()> {
        self.check(texture)?;
        self.check_size(bitmap.width(), bitmap.height())?;
        self.textures
            .insert(texture, (bitmap.width(), bitmap.height()));
        self.calls.push(GpuCall::UploadTexture {
            texture,
            width: bitmap.width(),
            height: bitmap.height(),
        });
        Ok(())
    }

    fn upload_sub_texture(
        &mut self,
        texture: TextureHandle,
        bitmap: &Bitmap,
        x: u32,
        y: u32,
    ) -> Result<()> {
        self.check(texture)?;
        self.calls.push(GpuCall::UploadSubTexture {
            texture,
            x,
            y,
            width: bitmap.width(),
            height: bitmap.height(),
        });
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
        self.calls.push(GpuCall::DestroyTexture(texture));
    }

    fn create_buffer_set(&mut self) -> Result<BufferSetHandle> {
        let set = BufferSetHandle(self.issue());
        self.buffer_sets.insert(set);
        self.calls.push(GpuCall::CreateBufferSet(set));
        Ok(set)
    }

    fn upload_buffer_set(
        &mut self,
        set: BufferSetHandle,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> Result<()> {
        self.geometry
            .insert(set, (vertices.to_vec(), indices.to_vec()));
        self.calls.push(GpuCall::UploadBufferSet {
            set,
            vertices: vertices.len(),
            indices: indices.len(),
        });
        Ok(())
    }

    fn destroy_buffer_set(&mut self, set: BufferSetHandle) {
        self.buffer_sets.remove(&set);
        self.geometry.remove(&set);
        self.calls.push(GpuCall::DestroyBufferSet(set));
    }

    fn draw(
        &mut self,
        transform: &TransformUniform,
        _clear_color: [f64; 4],
        batches: &[DrawBatch],
    ) -> Result<()> {
        self.calls.push(GpuCall::Draw {
            transform: *transform,
            batches: batches.to_vec(),
        });
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.calls.push(GpuCall::Resize { width, height });
    }
}
