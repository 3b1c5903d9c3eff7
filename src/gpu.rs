//! wgpu rendering backend: a winit window natively, a canvas on the web.

use crate::asset::{rgba_len, Allocation, GpuContext, GpuError, MaterialParams, Node, ResourceId};
use crate::scene::{Camera, Scene};
use crate::surface::{RenderBackend, SurfaceError, SurfaceRequest};
use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix4, SquareMatrix};
use std::borrow::Cow;
use std::collections::HashMap;
use wgpu::util::DeviceExt;
#[cfg(not(target_arch = "wasm32"))]
use {std::sync::Arc, winit::window::Window};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[rustfmt::skip]
const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[repr(C)]
#[derive(Default, Copy, Clone, Debug, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    light_position: [f32; 4],
    light: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ModelUniform {
    transform: [[f32; 4]; 4],
}

enum GpuResource {
    Geometry {
        vertices: wgpu::Buffer,
        indices: wgpu::Buffer,
        index_count: u32,
        transform: wgpu::Buffer,
        bind_group: wgpu::BindGroup,
    },
    Texture(wgpu::Texture),
    Program {
        params: wgpu::Buffer,
        bind_group: wgpu::BindGroup,
    },
}

impl GpuResource {
    fn destroy(self) {
        match self {
            GpuResource::Geometry {
                vertices,
                indices,
                transform,
                ..
            } => {
                vertices.destroy();
                indices.destroy();
                transform.destroy();
            }
            GpuResource::Texture(texture) => texture.destroy(),
            GpuResource::Program { params, .. } => params.destroy(),
        }
    }
}

struct Draw {
    geometry: ResourceId,
    program: ResourceId,
    params: MaterialParams,
    transform: Matrix4<f32>,
}

fn collect_draws(node: &Node, parent: Matrix4<f32>, draws: &mut Vec<Draw>) {
    let world = parent * node.transform.matrix();
    if let Some(mesh) = node.as_mesh() {
        if let Some(geometry) = mesh.geometry.gpu.id() {
            for material in &mesh.materials {
                if let Some(program) = material.program.id() {
                    draws.push(Draw {
                        geometry,
                        program,
                        params: material.params(),
                        transform: world,
                    });
                }
            }
        }
    }
    for child in &node.children {
        collect_draws(child, world, draws);
    }
}

pub struct WgpuBackend {
    surface: Option<wgpu::Surface<'static>>,
    config: wgpu::SurfaceConfiguration,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    model_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    depth_view: wgpu::TextureView,
    msaa_view: Option<wgpu::TextureView>,
    sample_count: u32,
    resources: HashMap<ResourceId, GpuResource>,
    next_id: u64,
    disposed: bool,
    context_lost: bool,
    #[cfg(target_arch = "wasm32")]
    canvas: Option<web_sys::HtmlCanvasElement>,
}

impl WgpuBackend {
    #[cfg(not(target_arch = "wasm32"))]
    pub async fn for_window(window: Arc<Window>, request: SurfaceRequest) -> Result<Self, SurfaceError> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window)
            .map_err(|error| SurfaceError::Configure(error.to_string()))?;
        Self::with_surface(&instance, surface, &request).await
    }

    /// Renders into `canvas`, which stays out of the document until the
    /// host attaches it.
    #[cfg(target_arch = "wasm32")]
    pub async fn for_canvas(
        canvas: web_sys::HtmlCanvasElement,
        request: SurfaceRequest,
    ) -> Result<Self, SurfaceError> {
        let (width, height) = request.physical_size();
        canvas.set_width(width);
        canvas.set_height(height);
        let instance =
            wgpu::util::new_instance_with_webgpu_detection(wgpu::InstanceDescriptor::default())
                .await;
        let surface = instance
            .create_surface(wgpu::SurfaceTarget::Canvas(canvas.clone()))
            .map_err(|error| SurfaceError::Configure(error.to_string()))?;
        let mut backend = Self::with_surface(&instance, surface, &request).await?;
        backend.canvas = Some(canvas);
        Ok(backend)
    }

    #[cfg(target_arch = "wasm32")]
    pub fn canvas(&self) -> Option<&web_sys::HtmlCanvasElement> {
        self.canvas.as_ref()
    }

    async fn with_surface(
        instance: &wgpu::Instance,
        surface: wgpu::Surface<'static>,
        request: &SurfaceRequest,
    ) -> Result<Self, SurfaceError> {
        let power_preference = if request.high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::default()
        };
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await
            .ok_or(SurfaceError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("character-scene device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .map_err(|error| SurfaceError::NoDevice(error.to_string()))?;

        let (width, height) = request.physical_size();
        let mut config = surface
            .get_default_config(&adapter, width, height)
            .ok_or_else(|| SurfaceError::Configure("surface unsupported by adapter".to_string()))?;
        let capabilities = surface.get_capabilities(&adapter);
        if request.alpha {
            if let Some(mode) = capabilities
                .alpha_modes
                .iter()
                .copied()
                .find(|mode| *mode != wgpu::CompositeAlphaMode::Opaque)
            {
                config.alpha_mode = mode;
            }
        }
        surface.configure(&device, &config);

        let sample_count = if request.antialias
            && adapter
                .get_texture_format_features(config.format)
                .flags
                .sample_count_supported(4)
        {
            4
        } else {
            1
        };
        log::info!(
            "surface {}x{} ({:?}), {}x multisampling",
            width,
            height,
            config.format,
            sample_count
        );

        let uniform_layout = |label: &str| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
        };
        let camera_layout = uniform_layout("camera_bind_group_layout");
        let model_layout = uniform_layout("model_bind_group_layout");
        let material_layout = uniform_layout("material_bind_group_layout");

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Uniform Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform::default()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera_bind_group"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("character shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("character.wgsl"))),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("character pipeline layout"),
            bind_group_layouts: &[&camera_layout, &model_layout, &material_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("character pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
            },
            primitive: wgpu::PrimitiveState {
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: sample_count,
                ..Default::default()
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let (depth_view, msaa_view) = create_targets(&device, &config, sample_count);
        Ok(Self {
            surface: Some(surface),
            config,
            device,
            queue,
            pipeline,
            model_layout,
            material_layout,
            camera_buffer,
            camera_bind_group,
            depth_view,
            msaa_view,
            sample_count,
            resources: HashMap::new(),
            next_id: 0,
            disposed: false,
            context_lost: false,
            #[cfg(target_arch = "wasm32")]
            canvas: None,
        })
    }

    fn usable(&self) -> Result<(), GpuError> {
        if self.disposed || self.context_lost {
            Err(GpuError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn create(&self, request: &Allocation<'_>) -> Result<GpuResource, GpuError> {
        match *request {
            Allocation::Geometry {
                label,
                positions,
                indices,
            } => {
                if positions.is_empty() || indices.is_empty() {
                    return Err(GpuError::Rejected(format!("{label}: empty geometry")));
                }
                let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(positions),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let index_buffer =
                    self.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some(label),
                            contents: bytemuck::cast_slice(indices),
                            usage: wgpu::BufferUsages::INDEX,
                        });
                let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
                let transform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(&[ModelUniform {
                        transform: identity,
                    }]),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &self.model_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: transform.as_entire_binding(),
                    }],
                });
                Ok(GpuResource::Geometry {
                    vertices,
                    indices: index_buffer,
                    index_count: indices.len() as u32,
                    transform,
                    bind_group,
                })
            }
            Allocation::Texture {
                label,
                width,
                height,
                rgba,
            } => {
                let max = self.device.limits().max_texture_dimension_2d;
                if width == 0 || height == 0 || width > max || height > max {
                    return Err(GpuError::Rejected(format!(
                        "{label}: texture size {width}x{height} outside 1..={max}"
                    )));
                }
                let expected = rgba_len(width, height);
                if rgba.len() as u64 != expected {
                    return Err(GpuError::Rejected(format!(
                        "{label}: expected {expected} bytes of RGBA, got {}",
                        rgba.len()
                    )));
                }
                let size = wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                };
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                self.queue.write_texture(
                    wgpu::ImageCopyTexture {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    rgba,
                    wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(4 * width),
                        rows_per_image: Some(height),
                    },
                    size,
                );
                Ok(GpuResource::Texture(texture))
            }
            Allocation::Program { label, params } => {
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(&[params]),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &self.material_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                });
                Ok(GpuResource::Program {
                    params: buffer,
                    bind_group,
                })
            }
        }
    }

    fn draw(&self, scene: &Scene, camera: &Camera) -> Result<(), wgpu::SurfaceError> {
        let Some(surface) = &self.surface else {
            return Ok(());
        };

        let mut draws = Vec::new();
        for node in &scene.children {
            collect_draws(node, Matrix4::identity(), &mut draws);
        }
        let lighting = &scene.lighting;
        let view_proj: [[f32; 4]; 4] = (OPENGL_TO_WGPU_MATRIX * camera.view_projection()).into();
        let position = lighting.point.position;
        self.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniform {
                view_proj,
                light_position: [position.x, position.y, position.z, 1.0],
                light: [
                    lighting.point.intensity,
                    lighting.directional_intensity,
                    lighting.environment_intensity,
                    0.0,
                ],
            }]),
        );
        for draw in &draws {
            if let Some(GpuResource::Geometry { transform, .. }) = self.resources.get(&draw.geometry) {
                let matrix: [[f32; 4]; 4] = draw.transform.into();
                self.queue.write_buffer(
                    transform,
                    0,
                    bytemuck::cast_slice(&[ModelUniform { transform: matrix }]),
                );
            }
            if let Some(GpuResource::Program { params, .. }) = self.resources.get(&draw.program) {
                self.queue
                    .write_buffer(params, 0, bytemuck::cast_slice(&[draw.params]));
            }
        }

        let frame = surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let (color_view, resolve_target) = match &self.msaa_view {
            Some(msaa) => (msaa, Some(&view)),
            None => (&view, None),
        };
        let ambient = 0.02 + 0.1 * f64::from(lighting.environment_intensity);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("character pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: ambient,
                            g: ambient,
                            b: ambient * 1.2,
                            a: 0.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&self.pipeline);
            rpass.set_bind_group(0, &self.camera_bind_group, &[]);
            for draw in &draws {
                let (
                    Some(GpuResource::Geometry {
                        vertices,
                        indices,
                        index_count,
                        bind_group: model_group,
                        ..
                    }),
                    Some(GpuResource::Program {
                        bind_group: material_group,
                        ..
                    }),
                ) = (
                    self.resources.get(&draw.geometry),
                    self.resources.get(&draw.program),
                )
                else {
                    continue;
                };
                rpass.set_bind_group(1, model_group, &[]);
                rpass.set_bind_group(2, material_group, &[]);
                rpass.set_vertex_buffer(0, vertices.slice(..));
                rpass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                rpass.draw_indexed(0..*index_count, 0, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }
}

impl WgpuBackend {
    #[cfg(not(target_arch = "wasm32"))]
    fn create_checked(&self, request: &Allocation<'_>) -> Result<GpuResource, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let created = self.create(request);
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            if let Ok(resource) = created {
                resource.destroy();
            }
            return Err(GpuError::OutOfMemory);
        }
        created
    }

    /// Browser error scopes only resolve on a later task, so out-of-memory
    /// shows up as an uncaptured device error instead.
    #[cfg(target_arch = "wasm32")]
    fn create_checked(&self, request: &Allocation<'_>) -> Result<GpuResource, GpuError> {
        self.create(request)
    }
}

fn create_targets(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    sample_count: u32,
) -> (wgpu::TextureView, Option<wgpu::TextureView>) {
    let size = wgpu::Extent3d {
        width: config.width.max(1),
        height: config.height.max(1),
        depth_or_array_layers: 1,
    };
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size,
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let msaa = (sample_count > 1).then(|| {
        device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Multisample Texture"),
                size,
                mip_level_count: 1,
                sample_count,
                dimension: wgpu::TextureDimension::D2,
                format: config.format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default())
    });
    (
        depth.create_view(&wgpu::TextureViewDescriptor::default()),
        msaa,
    )
}

impl GpuContext for WgpuBackend {
    fn allocate(&mut self, request: Allocation<'_>) -> Result<ResourceId, GpuError> {
        self.usable()?;
        let resource = self.create_checked(&request).map_err(|error| {
            log::warn!("GPU allocation failed: {error}");
            error
        })?;
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.resources.insert(id, resource);
        Ok(id)
    }

    fn release(&mut self, id: ResourceId) {
        if let Some(resource) = self.resources.remove(&id) {
            resource.destroy();
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        #[cfg(target_arch = "wasm32")]
        if let Some(canvas) = &self.canvas {
            canvas.set_width(self.config.width);
            canvas.set_height(self.config.height);
        }
        if let Some(surface) = &self.surface {
            if self.usable().is_ok() {
                surface.configure(&self.device, &self.config);
                let (depth_view, msaa_view) =
                    create_targets(&self.device, &self.config, self.sample_count);
                self.depth_view = depth_view;
                self.msaa_view = msaa_view;
            }
        }
    }

    fn render(&mut self, scene: &Scene, camera: &Camera) {
        if self.usable().is_err() {
            return;
        }
        match self.draw(scene, camera) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let (width, height) = (self.config.width, self.config.height);
                self.resize(width, height);
            }
            Err(error) => log::warn!("dropped frame: {error}"),
        }
    }

    fn output_attached(&self) -> bool {
        self.surface.is_some()
    }

    fn detach_output(&mut self) {
        self.surface = None;
        #[cfg(target_arch = "wasm32")]
        if let Some(canvas) = self.canvas.take() {
            canvas.remove();
        }
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let leaked = self.resources.len();
        if leaked > 0 {
            log::warn!("disposing backend with {leaked} resources still allocated");
        }
        for (_, resource) in self.resources.drain() {
            resource.destroy();
        }
        self.camera_buffer.destroy();
        self.disposed = true;
    }

    fn force_context_loss(&mut self) -> bool {
        if !self.context_lost {
            self.device.destroy();
            self.context_lost = true;
        }
        true
    }
}
