//! [`GpuBackend`] on top of wgpu.

use std::borrow::Cow;
use std::collections::HashMap;

use pollster::block_on;
use wgpu::util::DeviceExt;

use crate::error::{MosaicError, Result};
use crate::gpu::{BufferSetHandle, DrawBatch, GpuBackend, TextureHandle};
use crate::texture_atlas::Bitmap;
use crate::utils::{TransformUniform, Vertex};

const COPY_BYTES_PER_ROW_ALIGNMENT: usize = 256;
const BYTES_PER_PIXEL: usize = 4;
const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8UnormSrgb;
const ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct GpuBufferSet {
    vertex: Option<wgpu::Buffer>,
    index: Option<wgpu::Buffer>,
}

pub struct WgpuBackend<'a> {
    surface: wgpu::Surface<'a>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    render_pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    transform_buffer: wgpu::Buffer,
    transform_bind_group: wgpu::BindGroup,
    /// `None` until storage is allocated.
    textures: HashMap<TextureHandle, Option<GpuTexture>>,
    buffer_sets: HashMap<BufferSetHandle, GpuBufferSet>,
    next_handle: u32,
    max_texture_dimension: u32,
}

impl<'a> WgpuBackend<'a> {
    pub fn new(
        surface: wgpu::Surface<'a>,
        instance: &wgpu::Instance,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        }))
        .ok_or_else(|| MosaicError::UnsupportedEnvironment("no compatible GPU adapter".into()))?;

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("mosaic device"),
                required_features: wgpu::Features::empty(),
                // Atlases can be as large as the adapter allows.
                required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| MosaicError::DeviceRequest(e.to_string()))?;

        let config = wgpu::SurfaceConfiguration {
            desired_maximum_frame_latency: 2,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![SURFACE_FORMAT],
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: SURFACE_FORMAT,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
        };
        surface.configure(&device, &config);

        let transform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("transform_bind_group_layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<TransformUniform>() as _,
                        ),
                    },
                    count: None,
                }],
            });

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture_bind_group_layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("atlas shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "../shaders/shader.wgsl"
            ))),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Atlas Pipeline Layout"),
            bind_group_layouts: &[&texture_bind_group_layout, &transform_bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("atlas pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: SURFACE_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(err) = block_on(device.pop_error_scope()) {
            return Err(MosaicError::ShaderCompilation(err.to_string()));
        }

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let transform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transform uniform"),
            contents: bytemuck::cast_slice(&[TransformUniform::IDENTITY]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let transform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transform_bind_group"),
            layout: &transform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: transform_buffer.as_entire_binding(),
            }],
        });

        let max_texture_dimension = device.limits().max_texture_dimension_2d;
        log::info!(
            "wgpu backend ready on {} ({width}x{height}, textures up to {max_texture_dimension})",
            adapter.get_info().name
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
            render_pipeline,
            texture_bind_group_layout,
            sampler,
            transform_buffer,
            transform_bind_group,
            textures: HashMap::new(),
            buffer_sets: HashMap::new(),
            next_handle: 1,
            max_texture_dimension,
        })
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn allocated(&self, texture: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&texture)
            .and_then(Option::as_ref)
            .ok_or(MosaicError::UnknownTexture(texture.0))
    }

    fn create_storage(&self, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("atlas texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ATLAS_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("atlas_bind_group"),
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        GpuTexture {
            texture,
            view,
            bind_group,
            width,
            height,
        }
    }

    /// Copies `bitmap` into `target` at `(x, y)` through a row-padded staging
    /// buffer.
    fn copy_bitmap(&self, target: &GpuTexture, bitmap: &Bitmap, x: u32, y: u32) -> Result<()> {
        let (width, height) = bitmap.dimensions();
        if width == 0 || height == 0 {
            return Ok(());
        }
        if x + width > target.width || y + height > target.height {
            return Err(MosaicError::Wire(format!(
                "{width}x{height} region at ({x}, {y}) exceeds {}x{} texture",
                target.width, target.height
            )));
        }

        let unpadded_bytes_per_row = width as usize * BYTES_PER_PIXEL;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT)
            * COPY_BYTES_PER_ROW_ALIGNMENT;
        let mut padded = vec![0u8; padded_bytes_per_row * height as usize];
        for (row, src) in bitmap.as_raw().chunks_exact(unpadded_bytes_per_row).enumerate() {
            let start = row * padded_bytes_per_row;
            padded[start..start + unpadded_bytes_per_row].copy_from_slice(src);
        }

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("atlas staging buffer"),
                contents: &padded,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("atlas upload"),
            });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl GpuBackend for WgpuBackend<'_> {
    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_texture(&mut self) -> Result<TextureHandle> {
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, None);
        Ok(handle)
    }

    fn init_empty_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        if !self.textures.contains_key(&texture) {
            return Err(MosaicError::UnknownTexture(texture.0));
        }
        let max = self.max_texture_dimension;
        if width > max || height > max {
            return Err(MosaicError::TextureTooLarge { width, height, max });
        }
        let storage = self.create_storage(width, height);
        if let Some(old) = self.textures.insert(texture, Some(storage)).flatten() {
            old.texture.destroy();
        }
        Ok(())
    }

    fn clear_texture(&mut self, texture: TextureHandle) -> Result<()> {
        let target = self.allocated(texture)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("atlas clear"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("atlas clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn upload_texture(&mut self, texture: TextureHandle, bitmap: &Bitmap) -> Result<()> {
        self.init_empty_texture(texture, bitmap.width(), bitmap.height())?;
        let target = self.allocated(texture)?;
        self.copy_bitmap(target, bitmap, 0, 0)
    }

    fn upload_sub_texture(
        &mut self,
        texture: TextureHandle,
        bitmap: &Bitmap,
        x: u32,
        y: u32,
    ) -> Result<()> {
        let target = self.allocated(texture)?;
        self.copy_bitmap(target, bitmap, x, y)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(Some(gpu)) = self.textures.remove(&texture) {
            gpu.texture.destroy();
        }
    }

    fn create_buffer_set(&mut self) -> Result<BufferSetHandle> {
        let handle = BufferSetHandle(self.next_handle());
        self.buffer_sets.insert(handle, GpuBufferSet::default());
        Ok(handle)
    }

    fn upload_buffer_set(
        &mut self,
        set: BufferSetHandle,
        vertices: &[Vertex],
        indices: &[u16],
    ) -> Result<()> {
        let Some(buffers) = self.buffer_sets.get_mut(&set) else {
            return Err(MosaicError::Wire(format!("unknown buffer set {}", set.0)));
        };
        if let Some(old) = buffers.vertex.take() {
            old.destroy();
        }
        if let Some(old) = buffers.index.take() {
            old.destroy();
        }
        if vertices.is_empty() || indices.is_empty() {
            return Ok(());
        }
        buffers.vertex = Some(
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("atlas vertex buffer"),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
        );
        buffers.index = Some(
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("atlas index buffer"),
                    contents: bytemuck::cast_slice(indices),
                    usage: wgpu::BufferUsages::INDEX,
                }),
        );
        Ok(())
    }

    fn destroy_buffer_set(&mut self, set: BufferSetHandle) {
        if let Some(buffers) = self.buffer_sets.remove(&set) {
            buffers.vertex.iter().chain(&buffers.index).for_each(wgpu::Buffer::destroy);
        }
    }

    fn draw(
        &mut self,
        transform: &TransformUniform,
        clear_color: [f64; 4],
        batches: &[DrawBatch],
    ) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.surface.configure(&self.device, &self.config);
                return Err(MosaicError::Surface(e.to_string()));
            }
            Err(e) => return Err(MosaicError::Surface(e.to_string())),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.queue.write_buffer(
            &self.transform_buffer,
            0,
            bytemuck::cast_slice(std::slice::from_ref(transform)),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let [r, g, b, a] = clear_color;
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&self.render_pipeline);
            rpass.set_bind_group(1, &self.transform_bind_group, &[]);

            for batch in batches {
                let Some(Some(texture)) = self.textures.get(&batch.texture) else {
                    log::warn!("draw references unknown texture {}", batch.texture.0);
                    continue;
                };
                let Some(GpuBufferSet {
                    vertex: Some(vertex),
                    index: Some(index),
                }) = self.buffer_sets.get(&batch.buffer_set)
                else {
                    continue;
                };
                rpass.set_bind_group(0, &texture.bind_group, &[]);
                rpass.set_vertex_buffer(0, vertex.slice(..));
                rpass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint16);
                rpass.draw_indexed(0..batch.index_count, 0, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }
}
