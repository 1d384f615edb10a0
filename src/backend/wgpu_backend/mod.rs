//! wgpu renderer implementation
//!
//! Draw calls are buffered between `clear` and `present` and replayed into a
//! single render pass when the frame is presented. Pipelines are created on
//! first use for each combination of shader, sample count, fill mode and
//! topology.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{TextureData, Vertex};
use crate::BackendType;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(PipelineKey),
    SetBindGroup { index: u32, key: BindGroupKey },
    SetVertexBuffer(BufferHandle),
    SetIndexBuffer(BufferHandle),
    DrawIndexed { indices: Range<u32>, base_vertex: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: u64,
    samples: u32,
    wireframe: bool,
    topology: PrimitiveTopology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BindGroupKey {
    /// Frame and bone uniform buffers
    Constants(u64, u64),
    /// Diffuse and normal textures
    Textures(u64, u64),
}

struct ShaderModule {
    module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    vertex_layout: VertexBufferLayout,
}

struct GpuTexture {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct MultisampleTargets {
    samples: u32,
    #[allow(dead_code)]
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    #[allow(dead_code)]
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

/// Frame started by `clear`, submitted by `present`
struct PendingFrame {
    surface_texture: wgpu::SurfaceTexture,
    commands: Vec<RenderCommand>,
}

#[derive(Default)]
struct BoundState {
    shader: Option<u64>,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    constants: [Option<u64>; ConstantSlot::COUNT],
    textures: [Option<u64>; TextureSlot::COUNT],
    topology: PrimitiveTopology,
}

/// wgpu renderer
pub struct WgpuRenderer {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    info: DeviceInfo,
    features: wgpu::Features,
    supported_msaa_levels: Vec<u32>,

    // Render targets
    #[allow(dead_code)]
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    multisample: Option<MultisampleTargets>,

    // Raster and sampler state
    wireframe: bool,
    anisotropy: u32,
    sampler: wgpu::Sampler,

    // Fixed binding model
    constants_layout: wgpu::BindGroupLayout,
    textures_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, GpuTexture>,
    shaders: HashMap<u64, ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    fallback_textures: [u64; TextureSlot::COUNT],

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_shader_id: u64,

    bound: BoundState,
    pending: Option<PendingFrame>,
}

impl WgpuRenderer {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Bc1RgbaUnorm => wgpu::TextureFormat::Bc1RgbaUnorm,
            TextureFormat::Bc2RgbaUnorm => wgpu::TextureFormat::Bc2RgbaUnorm,
            TextureFormat::Bc3RgbaUnorm => wgpu::TextureFormat::Bc3RgbaUnorm,
            TextureFormat::Bc4RUnorm => wgpu::TextureFormat::Bc4RUnorm,
            TextureFormat::Bc5RgUnorm => wgpu::TextureFormat::Bc5RgUnorm,
            TextureFormat::Bc7RgbaUnorm => wgpu::TextureFormat::Bc7RgbaUnorm,
        }
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Uint32x4 => wgpu::VertexFormat::Uint32x4,
        }
    }

    fn convert_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
        match topology {
            PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }

    fn present_mode(vsync: bool) -> wgpu::PresentMode {
        if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        }
    }

    /// Clamp to device limits while maintaining aspect ratio
    fn clamp_size(&self, width: u32, height: u32) -> (u32, u32) {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width.max(1), height.max(1))
        }
    }
}

impl WgpuRenderer {
    /// Create a renderer for `window`, blocking until the device is ready
    pub fn create(
        window: Arc<winit::window::Window>,
        settings: &RendererSettings,
    ) -> RendererResult<Self> {
        pollster::block_on(Self::create_async(window, settings))
    }

    pub async fn create_async(
        window: Arc<winit::window::Window>,
        settings: &RendererSettings,
    ) -> RendererResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;
        let features = device.features();
        let adapter_info = adapter.get_info();

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                RendererError::SurfaceCreationFailed("surface reports no formats".into())
            })?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let max_size = device.limits().max_texture_dimension_2d;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.clamp(1, max_size),
            height: size.height.clamp(1, max_size),
            present_mode: Self::present_mode(settings.vsync),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let supported_msaa_levels = Self::detect_msaa_levels(&adapter, features, surface_format);
        log::info!("Supported MSAA levels: {:?}", supported_msaa_levels);

        let (depth_texture, depth_view) = Self::create_depth_target(
            &device,
            surface_config.width,
            surface_config.height,
            1,
        );

        let constants_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Constants Layout"),
            entries: &[
                Self::uniform_entry(
                    ConstantSlot::Frame.binding(),
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                ),
                Self::uniform_entry(ConstantSlot::Bones.binding(), wgpu::ShaderStages::VERTEX),
            ],
        });
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let textures_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Textures Layout"),
            entries: &[
                texture_entry(TextureSlot::Diffuse.binding()),
                texture_entry(TextureSlot::Normal.binding()),
                wgpu::BindGroupLayoutEntry {
                    binding: SAMPLER_BINDING,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Model Pipeline Layout"),
            bind_group_layouts: &[&constants_layout, &textures_layout],
            push_constant_ranges: &[],
        });

        let anisotropy = settings.anisotropy.clamp(1, MAX_ANISOTROPY);
        let sampler = Self::create_sampler(&device, anisotropy);

        let mut renderer = Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            info: DeviceInfo {
                name: adapter_info.name.clone(),
                backend: BackendType::Wgpu,
                dedicated_video_memory: None,
            },
            features,
            supported_msaa_levels,
            depth_texture,
            depth_view,
            multisample: None,
            wireframe: false,
            anisotropy,
            sampler,
            constants_layout,
            textures_layout,
            pipeline_layout,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            fallback_textures: [0; TextureSlot::COUNT],
            next_buffer_id: 1,
            next_texture_id: 1,
            next_shader_id: 1,
            bound: BoundState::default(),
            pending: None,
        };

        for slot in [TextureSlot::Diffuse, TextureSlot::Normal] {
            let id = renderer.upload(&TextureData::fallback(slot))?;
            renderer.fallback_textures[slot.index()] = id;
        }

        renderer.toggle_wireframe(settings.wireframe);
        let (width, height) = renderer.surface_size();
        renderer.create_anti_aliasing_target(settings.msaa_level, width, height)?;

        Ok(renderer)
    }

    /// Native initialization
    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> RendererResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        // On Windows, try Vulkan first to avoid D3D12 debug layer validation errors
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::Backends::all()
        } else {
            #[cfg(target_os = "windows")]
            {
                wgpu::Backends::VULKAN
            }
            #[cfg(not(target_os = "windows"))]
            {
                wgpu::Backends::all()
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RendererError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;

        // If no adapter found with preferred backend, try with all backends
        let (instance, surface, adapter) = if adapter.is_none() && backends != wgpu::Backends::all() {
            log::warn!("Preferred backend not available, falling back to all backends");
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let surface = instance
                .create_surface(window.clone())
                .map_err(|e| RendererError::SurfaceCreationFailed(e.to_string()))?;
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    RendererError::InitializationFailed("No suitable adapter found".into())
                })?;
            (instance, surface, adapter)
        } else {
            let adapter = adapter.ok_or_else(|| {
                RendererError::InitializationFailed("No suitable adapter found".into())
            })?;
            (instance, surface, adapter)
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let wanted = wgpu::Features::POLYGON_MODE_LINE
            | wgpu::Features::TEXTURE_COMPRESSION_BC
            | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let required_features = adapter.features() & wanted;
        if required_features != wanted {
            log::warn!(
                "Adapter lacks optional features: {:?}",
                wanted - required_features
            );
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Model Viewer Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| RendererError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    fn detect_msaa_levels(
        adapter: &wgpu::Adapter,
        features: wgpu::Features,
        color_format: wgpu::TextureFormat,
    ) -> Vec<u32> {
        if !features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
            // Without adapter-specific formats, WebGPU guarantees 4x only
            return vec![4];
        }
        let color = adapter.get_texture_format_features(color_format).flags;
        let depth = adapter
            .get_texture_format_features(wgpu::TextureFormat::Depth32Float)
            .flags;
        filter_msaa_levels(
            [2, 4, 8, 16]
                .into_iter()
                .filter(|&n| color.sample_count_supported(n) && depth.sample_count_supported(n)),
        )
    }

    fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    fn create_depth_target(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        samples: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn create_sampler(device: &wgpu::Device, anisotropy: u32) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Model Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: anisotropy as u16,
            border_color: None,
        })
    }

    fn reconfigure_surface(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn upload(&mut self, data: &TextureData) -> RendererResult<u64> {
        data.validate()
            .map_err(|e| RendererError::TextureCreationFailed(e.to_string()))?;
        let (width, height) = (data.width(), data.height());
        if data.format.is_compressed() {
            if !self.features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC) {
                return Err(RendererError::UnsupportedFeature(format!(
                    "'{}' uses {:?}, BC compression is not supported by this adapter",
                    data.name, data.format
                )));
            }
            if width % 4 != 0 || height % 4 != 0 {
                return Err(RendererError::TextureCreationFailed(format!(
                    "'{}' is {}x{}, block compressed textures need multiples of 4",
                    data.name, width, height
                )));
            }
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&data.name),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: data.mip_level_count(),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(data.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (level, mip) in data.mips.iter().enumerate() {
            // Compressed copies cover whole blocks, even for the 2x2 and 1x1 tails
            let (copy_width, copy_height) = if data.format.is_compressed() {
                (mip.width.div_ceil(4) * 4, mip.height.div_ceil(4) * 4)
            } else {
                (mip.width, mip.height)
            };
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &mip.data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(data.format.bytes_per_row(mip.width)),
                    rows_per_image: Some(data.format.rows(mip.height)),
                },
                wgpu::Extent3d {
                    width: copy_width,
                    height: copy_height,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, GpuTexture { texture, view });

        log::debug!(
            "Created texture '{}' {}x{} {:?}, {} mip level(s)",
            data.name,
            width,
            height,
            data.format,
            data.mip_level_count()
        );
        Ok(id)
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> bool {
        if self.pipelines.contains_key(&key) {
            return true;
        }
        let Some(shader) = self.shaders.get(&key.shader) else {
            return false;
        };

        let attributes: Vec<wgpu::VertexAttribute> = shader
            .vertex_layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: shader.vertex_layout.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Model Pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: &shader.vertex_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader.module,
                    entry_point: &shader.fragment_entry,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_config.format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: Self::convert_topology(key.topology),
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: if key.wireframe {
                        wgpu::PolygonMode::Line
                    } else {
                        wgpu::PolygonMode::Fill
                    },
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: key.samples,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            });

        log::debug!("Created pipeline {:?}", key);
        self.pipelines.insert(key, pipeline);
        true
    }

    fn ensure_bind_group(&mut self, key: BindGroupKey) -> bool {
        if self.bind_groups.contains_key(&key) {
            return true;
        }
        let bind_group = match key {
            BindGroupKey::Constants(frame, bones) => {
                let (Some(frame), Some(bones)) = (self.buffers.get(&frame), self.buffers.get(&bones))
                else {
                    return false;
                };
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Constants"),
                    layout: &self.constants_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: ConstantSlot::Frame.binding(),
                            resource: frame.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: ConstantSlot::Bones.binding(),
                            resource: bones.as_entire_binding(),
                        },
                    ],
                })
            }
            BindGroupKey::Textures(diffuse, normal) => {
                let (Some(diffuse), Some(normal)) =
                    (self.textures.get(&diffuse), self.textures.get(&normal))
                else {
                    return false;
                };
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Textures"),
                    layout: &self.textures_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: TextureSlot::Diffuse.binding(),
                            resource: wgpu::BindingResource::TextureView(&diffuse.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: TextureSlot::Normal.binding(),
                            resource: wgpu::BindingResource::TextureView(&normal.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: SAMPLER_BINDING,
                            resource: wgpu::BindingResource::Sampler(&self.sampler),
                        },
                    ],
                })
            }
        };
        self.bind_groups.insert(key, bind_group);
        true
    }

    fn forget_buffer(&mut self, id: u64) {
        self.buffers.remove(&id);
        self.bind_groups.retain(|key, _| match key {
            BindGroupKey::Constants(a, b) => *a != id && *b != id,
            BindGroupKey::Textures(..) => true,
        });
    }

    /// The wgpu device, for collaborators that build their own pipelines
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Surface format used by the colour targets
    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }
}

impl Renderer for WgpuRenderer {
    fn api(&self) -> BackendType {
        BackendType::Wgpu
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        // A frame acquired at the old size cannot be presented any more
        self.pending = None;

        let (width, height) = self.clamp_size(width, height);
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.reconfigure_surface();

        let (depth_texture, depth_view) = Self::create_depth_target(&self.device, width, height, 1);
        self.depth_texture = depth_texture;
        self.depth_view = depth_view;

        let level = self.msaa_level();
        self.create_anti_aliasing_target(level, width, height)
    }

    fn clear(&mut self) -> RendererResult<()> {
        self.pending = None;
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring and skipping frame");
                self.reconfigure_surface();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring surface texture, skipping frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RendererError::OutOfMemory),
        };
        self.pending = Some(PendingFrame {
            surface_texture,
            commands: Vec::new(),
        });
        Ok(())
    }

    fn present(&mut self) -> RendererResult<()> {
        let Some(frame) = self.pending.take() else {
            return Ok(());
        };

        let swapchain_view = frame
            .surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let (color_view, resolve_target, depth_view, color_store) = match &self.multisample {
            Some(ms) => (
                &ms.color_view,
                Some(&swapchain_view),
                &ms.depth_view,
                wgpu::StoreOp::Discard,
            ),
            None => (&swapchain_view, None, &self.depth_view, wgpu::StoreOp::Store),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Model Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: CLEAR_COLOR[0] as f64,
                            g: CLEAR_COLOR[1] as f64,
                            b: CLEAR_COLOR[2] as f64,
                            a: CLEAR_COLOR[3] as f64,
                        }),
                        store: color_store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_DEPTH),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            // Execute buffered commands
            for cmd in &frame.commands {
                match cmd {
                    RenderCommand::SetPipeline(key) => {
                        if let Some(pipeline) = self.pipelines.get(key) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetBindGroup { index, key } => {
                        if let Some(bind_group) = self.bind_groups.get(key) {
                            render_pass.set_bind_group(*index, bind_group, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer(handle) => {
                        if let Some(buffer) = self.buffers.get(&handle.0) {
                            render_pass.set_vertex_buffer(0, buffer.slice(..));
                        }
                    }
                    RenderCommand::SetIndexBuffer(handle) => {
                        if let Some(buffer) = self.buffers.get(&handle.0) {
                            render_pass.set_index_buffer(buffer.slice(..), wgpu::IndexFormat::Uint32);
                        }
                    }
                    RenderCommand::DrawIndexed {
                        indices,
                        base_vertex,
                    } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, 0..1);
                    }
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.surface_texture.present();
        Ok(())
    }

    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> RendererResult<VertexBuffer> {
        if vertices.is_empty() {
            return Err(RendererError::BufferCreationFailed(
                "vertex buffer is empty".into(),
            ));
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vertex Buffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        log::debug!("Created vertex buffer {} ({} vertices)", id, vertices.len());

        Ok(VertexBuffer {
            handle: BufferHandle(id),
            vertex_count: vertices.len() as u32,
        })
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> RendererResult<IndexBuffer> {
        if indices.is_empty() {
            return Err(RendererError::BufferCreationFailed(
                "index buffer is empty".into(),
            ));
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Index Buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        log::debug!("Created index buffer {} ({} indices)", id, indices.len());

        Ok(IndexBuffer {
            handle: BufferHandle(id),
            index_count: indices.len() as u32,
        })
    }

    fn upload_texture_2d(&mut self, data: &TextureData) -> RendererResult<Texture2D> {
        let id = self.upload(data)?;
        Ok(Texture2D {
            handle: TextureHandle(id),
            width: data.width(),
            height: data.height(),
            mip_levels: data.mip_level_count(),
            format: data.format,
        })
    }

    fn create_constant_buffer(&mut self, label: &str, size: u64) -> RendererResult<ConstantBuffer> {
        if size == 0 || size > self.device.limits().max_uniform_buffer_binding_size as u64 {
            return Err(RendererError::BufferCreationFailed(format!(
                "constant buffer '{}' of {} bytes is outside device limits",
                label, size
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(ConstantBuffer {
            handle: BufferHandle(id),
            size,
        })
    }

    fn update_constant_buffer(&mut self, buffer: &ConstantBuffer, data: &[u8]) {
        debug_assert!(data.len() as u64 <= buffer.size);
        if let Some(buf) = self.buffers.get(&buffer.handle.0) {
            self.queue.write_buffer(buf, 0, data);
        }
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> RendererResult<Shader> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(RendererError::ShaderCreationFailed(error.to_string()));
        }

        let id = self.next_shader_id;
        self.next_shader_id += 1;
        self.shaders.insert(
            id,
            ShaderModule {
                module,
                vertex_entry: desc.vertex_entry.clone(),
                fragment_entry: desc.fragment_entry.clone(),
                vertex_layout: desc.vertex_layout.clone(),
            },
        );
        log::debug!("Created shader {:?}", desc.label);

        Ok(Shader {
            handle: ShaderHandle(id),
        })
    }

    fn release_vertex_buffer(&mut self, buffer: VertexBuffer) {
        self.forget_buffer(buffer.handle.0);
    }

    fn release_index_buffer(&mut self, buffer: IndexBuffer) {
        self.forget_buffer(buffer.handle.0);
    }

    fn release_texture_2d(&mut self, texture: Texture2D) {
        let id = texture.handle.0;
        self.textures.remove(&id);
        self.bind_groups.retain(|key, _| match key {
            BindGroupKey::Textures(a, b) => *a != id && *b != id,
            BindGroupKey::Constants(..) => true,
        });
        if self.bound.textures.contains(&Some(id)) {
            self.bound.textures = [None; TextureSlot::COUNT];
        }
    }

    fn release_constant_buffer(&mut self, buffer: ConstantBuffer) {
        self.forget_buffer(buffer.handle.0);
    }

    fn release_shader(&mut self, shader: Shader) {
        let id = shader.handle.0;
        self.shaders.remove(&id);
        self.pipelines.retain(|key, _| key.shader != id);
    }

    fn apply_shader(&mut self, shader: &Shader) {
        self.bound.shader = Some(shader.handle.0);
    }

    fn apply_vertex_buffer(&mut self, buffer: &VertexBuffer) {
        self.bound.vertex_buffer = Some(buffer.handle);
    }

    fn apply_index_buffer(&mut self, buffer: &IndexBuffer) {
        self.bound.index_buffer = Some(buffer.handle);
    }

    fn apply_constant_buffer(&mut self, slot: ConstantSlot, buffer: &ConstantBuffer) {
        self.bound.constants[slot.index()] = Some(buffer.handle.0);
    }

    fn apply_texture_2d(&mut self, slot: TextureSlot, texture: &Texture2D) {
        self.bound.textures[slot.index()] = Some(texture.handle.0);
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.bound.topology = topology;
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) {
        if self.pending.is_none() {
            return;
        }
        let (Some(shader), Some(vb), Some(ib)) = (
            self.bound.shader,
            self.bound.vertex_buffer,
            self.bound.index_buffer,
        ) else {
            log::warn!("draw_indexed without shader, vertex and index buffers bound");
            return;
        };
        let [Some(frame), Some(bones)] = self.bound.constants else {
            log::warn!("draw_indexed without both constant buffers bound");
            return;
        };

        let key = PipelineKey {
            shader,
            samples: self.msaa_level().max(1),
            wireframe: self.wireframe,
            topology: self.bound.topology,
        };
        let diffuse = self.bound.textures[TextureSlot::Diffuse.index()]
            .unwrap_or(self.fallback_textures[TextureSlot::Diffuse.index()]);
        let normal = self.bound.textures[TextureSlot::Normal.index()]
            .unwrap_or(self.fallback_textures[TextureSlot::Normal.index()]);
        let constants = BindGroupKey::Constants(frame, bones);
        let textures = BindGroupKey::Textures(diffuse, normal);

        if !self.ensure_pipeline(key)
            || !self.ensure_bind_group(constants)
            || !self.ensure_bind_group(textures)
        {
            log::warn!("draw_indexed with released resources bound, skipped");
            return;
        }

        if let Some(frame) = self.pending.as_mut() {
            frame.commands.extend([
                RenderCommand::SetPipeline(key),
                RenderCommand::SetBindGroup {
                    index: 0,
                    key: constants,
                },
                RenderCommand::SetBindGroup {
                    index: 1,
                    key: textures,
                },
                RenderCommand::SetVertexBuffer(vb),
                RenderCommand::SetIndexBuffer(ib),
                RenderCommand::DrawIndexed {
                    indices: start_index..start_index + index_count,
                    base_vertex,
                },
            ]);
        }
    }

    fn create_anti_aliasing_target(
        &mut self,
        level: u32,
        width: u32,
        height: u32,
    ) -> RendererResult<()> {
        let level = resolve_msaa_level(level, &self.supported_msaa_levels)?;
        // Previous targets are released before new ones are allocated
        self.multisample = None;

        let Some(samples) = level else {
            log::info!("MSAA disabled");
            return Ok(());
        };

        let (width, height) = (width.max(1), height.max(1));
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("MSAA Colour Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format: self.surface_config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let (depth, depth_view) = Self::create_depth_target(&self.device, width, height, samples);

        self.multisample = Some(MultisampleTargets {
            samples,
            color,
            color_view,
            depth,
            depth_view,
        });
        log::info!("MSAA {}x at {}x{}", samples, width, height);
        Ok(())
    }

    fn msaa_level(&self) -> u32 {
        self.multisample.as_ref().map_or(0, |ms| ms.samples)
    }

    fn supported_msaa_levels(&self) -> &[u32] {
        &self.supported_msaa_levels
    }

    fn toggle_wireframe(&mut self, enabled: bool) {
        if enabled && !self.features.contains(wgpu::Features::POLYGON_MODE_LINE) {
            log::warn!("Wireframe needs POLYGON_MODE_LINE, staying solid");
            return;
        }
        self.wireframe = enabled;
    }

    fn is_wireframe(&self) -> bool {
        self.wireframe
    }

    fn max_anisotropic_filter_level(&self) -> u32 {
        MAX_ANISOTROPY
    }

    fn set_anisotropic_filter(&mut self, level: u32) -> RendererResult<()> {
        let level = level.clamp(1, MAX_ANISOTROPY);
        if level == self.anisotropy {
            return Ok(());
        }
        self.anisotropy = level;
        self.sampler = Self::create_sampler(&self.device, level);
        // Texture bind groups hold the old sampler
        self.bind_groups
            .retain(|key, _| matches!(key, BindGroupKey::Constants(..)));
        log::info!("Anisotropic filtering {}x", level);
        Ok(())
    }

    fn anisotropic_filter(&self) -> u32 {
        self.anisotropy
    }

    fn set_vsync(&mut self, enabled: bool) -> RendererResult<()> {
        self.surface_config.present_mode = Self::present_mode(enabled);
        self.pending = None;
        self.reconfigure_surface();
        log::info!("VSync {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    fn vsync(&self) -> bool {
        self.surface_config.present_mode == wgpu::PresentMode::AutoVsync
    }
}
