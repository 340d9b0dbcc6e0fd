//! wgpu implementation of `GpuBackend`.
//!
//! Renders offscreen into an `Rgba8Unorm` target sized to the output
//! window and reads the result back for the overlay surface. Each program
//! carries two pipelines: a triangle strip for the square and an indexed
//! triangle list for the circle fan (wgpu has no fan topology).
//!
//! Shader module and pipeline creation, and every draw, run inside a
//! validation error scope so failures come back as values instead of
//! reaching the uncaptured-error handler.

use std::borrow::Cow;
use std::collections::HashMap;

use image::RgbaImage;
use wgpu::util::DeviceExt;

use super::geometry::{fan_indices, Geometry, Topology, Vertex};
use super::renderer::{DrawCall, GpuBackend, ProgramHandle, TextureHandle};
use super::shader::{LinkedShader, FRAGMENT_ENTRY, SAMPLER_BINDING, TEXTURE_BINDING, UNIFORM_BINDING, VERTEX_ENTRY};
use super::surface::OverlaySurface;
use crate::capture::MagnifiedFrame;
use crate::error::{MagnifierError, MagnifierResult};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ShaderUniforms {
    texture_size: [f32; 2],
    output_size: [f32; 2],
}

struct GpuProgram {
    strip: wgpu::RenderPipeline,
    list: wgpu::RenderPipeline,
}

struct FrameTexture {
    id: u64,
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

struct RenderTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

struct GeometryBuffers {
    topology: Topology,
    vertices: wgpu::Buffer,
    vertex_count: u32,
    /// Present for fans only.
    indices: Option<(wgpu::Buffer, u32)>,
}

/// Offscreen wgpu renderer.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    programs: HashMap<u64, GpuProgram>,
    geometry: Option<GeometryBuffers>,
    frame: Option<FrameTexture>,
    target: Option<RenderTarget>,
    next_id: u64,
    /// Target holds a finished draw not yet invalidated by `clear`.
    has_image: bool,
    released: bool,
}

impl WgpuBackend {
    /// Create a headless device. Blocks on adapter and device requests.
    pub fn new() -> MagnifierResult<Self> {
        pollster::block_on(Self::init())
    }

    async fn init() -> MagnifierResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| MagnifierError::GpuError(format!("Failed to find wgpu adapter: {}", e)))?;

        log::info!("[WGPU] Using adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("magnifier"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| MagnifierError::GpuError(format!("Failed to create device: {}", e)))?;

        device.on_uncaptured_error(Box::new(|err| {
            log::error!("[WGPU] Uncaptured error: {}", err);
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("magnifier-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: TEXTURE_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: SAMPLER_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: UNIFORM_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("magnifier-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        // Pixel-art shaders do their own filtering.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("magnifier-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("magnifier-uniforms"),
            size: std::mem::size_of::<ShaderUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            pipeline_layout,
            sampler,
            uniform_buffer,
            programs: HashMap::new(),
            geometry: None,
            frame: None,
            target: None,
            next_id: 0,
            has_image: false,
            released: false,
        })
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_pipeline(
        &self,
        label: &str,
        vertex: &wgpu::ShaderModule,
        fragment: &wgpu::ShaderModule,
        topology: wgpu::PrimitiveTopology,
    ) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: vertex,
                entry_point: Some(VERTEX_ENTRY),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: fragment,
                entry_point: Some(FRAGMENT_ENTRY),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology,
                strip_index_format: None,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        })
    }

    fn ensure_target(&mut self, width: u32, height: u32) {
        if let Some(target) = &self.target {
            if (target.width, target.height) == (width, height) {
                return;
            }
        }
        if let Some(old) = self.target.take() {
            old.texture.destroy();
            old.readback.destroy();
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("magnifier-target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // wgpu requires 256-byte aligned rows for texture-to-buffer copies
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = (4 * width).div_ceil(align) * align;
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("magnifier-readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        log::debug!("[WGPU] Render target {}x{}", width, height);
        self.target = Some(RenderTarget {
            width,
            height,
            texture,
            view,
            readback,
            padded_bytes_per_row,
        });
    }

    fn read_target(&self) -> MagnifierResult<RgbaImage> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| MagnifierError::GpuDraw("no render target".into()))?;

        let slice = target.readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| MagnifierError::GpuDraw(format!("device poll failed: {}", e)))?;
        rx.recv()
            .map_err(|_| MagnifierError::GpuDraw("map callback dropped".into()))?
            .map_err(|e| MagnifierError::GpuDraw(format!("readback map failed: {}", e)))?;

        let row_bytes = (4 * target.width) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * target.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(target.padded_bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        target.readback.unmap();

        RgbaImage::from_raw(target.width, target.height, pixels)
            .ok_or_else(|| MagnifierError::GpuDraw("readback size mismatch".into()))
    }
}

impl GpuBackend for WgpuBackend {
    fn create_program(&mut self, shader: &LinkedShader) -> MagnifierResult<ProgramHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}-vertex", shader.id)),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&shader.vertex_source)),
        });
        let fragment = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{}-fragment", shader.id)),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&shader.fragment_source)),
        });
        let strip = self.create_pipeline(
            &format!("{}-strip", shader.id),
            &vertex,
            &fragment,
            wgpu::PrimitiveTopology::TriangleStrip,
        );
        let list = self.create_pipeline(
            &format!("{}-list", shader.id),
            &vertex,
            &fragment,
            wgpu::PrimitiveTopology::TriangleList,
        );

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            // Modules and pipelines drop here; nothing is kept.
            return Err(MagnifierError::ShaderLink(format!("{}: {}", shader.id, err)));
        }

        let id = self.next_id();
        self.programs.insert(id, GpuProgram { strip, list });
        log::debug!("[WGPU] Program {} created for '{}'", id, shader.id);
        Ok(ProgramHandle(id))
    }

    fn release_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program.0).is_some() {
            log::debug!("[WGPU] Program {} released", program.0);
        }
    }

    fn upload_geometry(&mut self, geometry: &Geometry) -> MagnifierResult<()> {
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("magnifier-vertices"),
            contents: bytemuck::cast_slice(geometry.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let indices = match geometry.topology() {
            Topology::TriangleStrip => None,
            Topology::TriangleFan => {
                let indices = fan_indices(geometry.vertex_count());
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("magnifier-indices"),
                    contents: bytemuck::cast_slice(&indices),
                    usage: wgpu::BufferUsages::INDEX,
                });
                Some((buffer, indices.len() as u32))
            },
        };

        // Vertices and indices replace the old pair in one assignment.
        if let Some(old) = self.geometry.replace(GeometryBuffers {
            topology: geometry.topology(),
            vertices,
            vertex_count: geometry.vertex_count(),
            indices,
        }) {
            old.vertices.destroy();
            if let Some((buffer, _)) = old.indices {
                buffer.destroy();
            }
        }
        Ok(())
    }

    fn upload_frame(
        &mut self,
        texture: Option<TextureHandle>,
        frame: &MagnifiedFrame,
    ) -> MagnifierResult<TextureHandle> {
        let (width, height) = (frame.width(), frame.height());
        let reusable = matches!(
            (&self.frame, texture),
            (Some(current), Some(requested))
                if current.id == requested.id && (current.width, current.height) == (width, height)
        );

        if !reusable {
            if let Some(old) = self.frame.take() {
                old.texture.destroy();
            }
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("magnifier-frame"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("magnifier-bind-group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: TEXTURE_BINDING,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: SAMPLER_BINDING,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: UNIFORM_BINDING,
                        resource: self.uniform_buffer.as_entire_binding(),
                    },
                ],
            });
            let id = self.next_id();
            log::debug!("[WGPU] Frame texture {} at {}x{}", id, width, height);
            self.frame = Some(FrameTexture {
                id,
                width,
                height,
                texture,
                bind_group,
            });
        }

        let current = self
            .frame
            .as_ref()
            .ok_or_else(|| MagnifierError::GpuError("frame texture missing".into()))?;
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &current.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.image().as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        Ok(TextureHandle {
            id: current.id,
            width,
            height,
        })
    }

    fn draw(&mut self, call: &DrawCall) -> MagnifierResult<()> {
        let (out_w, out_h) = call.output_size;
        if out_w == 0 || out_h == 0 {
            return Err(MagnifierError::GpuDraw("empty output size".into()));
        }
        self.ensure_target(out_w, out_h);

        let uniforms = ShaderUniforms {
            texture_size: [call.texture_size.0 as f32, call.texture_size.1 as f32],
            output_size: [out_w as f32, out_h as f32],
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let program = self
            .programs
            .get(&call.program.0)
            .ok_or_else(|| MagnifierError::GpuDraw(format!("unknown program {}", call.program.0)))?;
        let frame = self
            .frame
            .as_ref()
            .filter(|f| f.id == call.texture.id)
            .ok_or_else(|| MagnifierError::GpuDraw(format!("unknown texture {}", call.texture.id)))?;
        let geometry = self
            .geometry
            .as_ref()
            .ok_or_else(|| MagnifierError::GpuDraw("no geometry uploaded".into()))?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| MagnifierError::GpuDraw("no render target".into()))?;
        if geometry.topology != call.topology || geometry.vertex_count != call.vertex_count {
            return Err(MagnifierError::GpuDraw("draw call does not match uploaded geometry".into()));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("magnifier-draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("magnifier-pass"),
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
            pass.set_bind_group(0, &frame.bind_group, &[]);
            pass.set_vertex_buffer(0, geometry.vertices.slice(..));
            match (&geometry.indices, geometry.topology) {
                (Some((indices, count)), Topology::TriangleFan) => {
                    pass.set_pipeline(&program.list);
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
                    pass.draw_indexed(0..*count, 0, 0..1);
                },
                _ => {
                    pass.set_pipeline(&program.strip);
                    pass.draw(0..geometry.vertex_count, 0..1);
                },
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &target.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(target.padded_bytes_per_row),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            self.has_image = false;
            return Err(MagnifierError::GpuDraw(err.to_string()));
        }
        self.has_image = true;
        Ok(())
    }

    fn clear(&mut self) -> MagnifierResult<()> {
        // Each draw clears the target itself; only the readback is invalidated.
        self.has_image = false;
        Ok(())
    }

    fn present(&mut self, surface: &mut dyn OverlaySurface) -> MagnifierResult<()> {
        if !self.has_image {
            return Ok(());
        }
        let image = self.read_target()?;
        surface.present(&image)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.programs.clear();
        if let Some(frame) = self.frame.take() {
            frame.texture.destroy();
        }
        if let Some(target) = self.target.take() {
            target.texture.destroy();
            target.readback.destroy();
        }
        if let Some(geometry) = self.geometry.take() {
            geometry.vertices.destroy();
            if let Some((buffer, _)) = geometry.indices {
                buffer.destroy();
            }
        }
        self.uniform_buffer.destroy();
        log::debug!("[WGPU] Resources released");
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        self.release();
    }
}
