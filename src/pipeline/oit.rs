//! Order-independent transparency via per-pixel linked lists.
//!
//! Transparent geometry is never sorted on the CPU. Instead, every covering
//! fragment is appended to a small GPU-side linked list belonging to its
//! pixel, and a fullscreen resolve pass sorts and blends each list:
//!
//! 1. **Clear** — a compute pass resets every pixel's head pointer to the
//!    sentinel and the allocation counter to zero.
//! 2. **Accumulate** — the transparent draw calls run depth-tested
//!    (read-only) against the opaque scene depth with depth writes off.
//!    Each fragment shades itself against the current light, reserves an
//!    arena slot with an atomic counter bump and pushes itself onto its
//!    pixel's list with an atomic head exchange. When the arena is full
//!    the fragment is silently dropped: bounded memory, bounded work.
//! 3. **Resolve** — a fullscreen triangle walks each pixel's list (bounded
//!    to [`OitPipeline::MAX_RESOLVE_FRAGMENTS`]), insertion-sorts it by
//!    descending depth and blends back-to-front with straight alpha over
//!    the opaque background.
//!
//! The three passes run once per light. Each resolve reads a snapshot of
//! the opaque background taken before any transparency was applied, scaled
//! by `1 / total_lights`; the first light's resolve replaces the
//! background and every later one adds, so the background is restored to
//! full strength across the passes while each light contributes its own
//! transparency term. Pass-to-pass ordering (accumulate before resolve,
//! resolve before the next light's clear) rides on the implicit barriers
//! wgpu inserts between passes sharing the same storage buffers.
//!
//! The linked lists live and die inside a single `render` call; nothing
//! GPU-side persists across frames except the allocations themselves.

use bytemuck::{Pod, Zeroable};

use crate::camera::Camera;
use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::pipeline::forward::{ModelUniforms, light_uniforms};
use crate::pipeline::{RenderContext, SceneTargets, UniformArena};
use crate::render_list::{ListRange, RenderList};
use crate::texture::Texture;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AccumFrameUniforms {
    projection: [[f32; 4]; 4],
    viewport: [u32; 2],
    total_lights: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ResolveUniforms {
    viewport: [u32; 2],
    total_lights: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ClearUniforms {
    pixel_count: u32,
    _pad: [u32; 3],
}

/// Static (size-independent) pipeline objects, built lazily on first use.
struct OitPipelines {
    accum_layout: wgpu::BindGroupLayout,
    resolve_layout: wgpu::BindGroupLayout,
    clear_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    accum: wgpu::RenderPipeline,
    accum_line: Option<wgpu::RenderPipeline>,
    resolve_replace: wgpu::RenderPipeline,
    resolve_additive: wgpu::RenderPipeline,
    clear: wgpu::ComputePipeline,
}

/// Surface-sized resources, rebuilt whenever the targets change size.
struct OitResources {
    #[allow(dead_code)]
    heads: wgpu::Buffer,
    #[allow(dead_code)]
    counter: wgpu::Buffer,
    #[allow(dead_code)]
    arena: wgpu::Buffer,
    #[allow(dead_code)]
    snapshot: wgpu::Texture,
    accum_bind: wgpu::BindGroup,
    resolve_bind: wgpu::BindGroup,
    clear_bind: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// The order-independent-transparency pipeline.
///
/// Renders the transparent block of a list on top of an opaque scene held
/// in the driver's [`SceneTargets`], one clear/accumulate/resolve cycle
/// per light.
pub struct OitPipeline {
    pipelines: Option<OitPipelines>,
    resources: Option<OitResources>,
    frame_buffer: wgpu::Buffer,
    resolve_buffer: wgpu::Buffer,
    light_uniforms: UniformArena,
    model_uniforms: UniformArena,
    default_texture: Texture,
    wireframe: bool,
    warned_wireframe: bool,
}

impl OitPipeline {
    /// Arena budget: average linked-list capacity per pixel.
    pub const FRAGS_PER_PIXEL: u32 = 20;
    /// Most fragments one pixel's resolve will sort and blend; anything
    /// past this bound in a list is ignored. Must match `MAX_FRAGMENTS` in
    /// `oit_resolve.wgsl`.
    pub const MAX_RESOLVE_FRAGMENTS: u32 = 75;
    /// Head-pointer value meaning "no fragment". Must match the shaders.
    pub const SENTINEL: u32 = u32::MAX;
    /// Bytes per arena node: vec4 color + depth + next, padded to the
    /// WGSL struct stride.
    const NODE_BYTES: u64 = 32;

    /// Creates the pipeline; GPU pipelines and buffers are built on first
    /// render.
    pub fn new(gpu: &GpuContext) -> Self {
        let frame_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Frame Uniforms"),
            size: std::mem::size_of::<AccumFrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let resolve_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Resolve Uniforms"),
            size: std::mem::size_of::<ResolveUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let light_uniforms = UniformArena::new(
            gpu,
            "OIT Light Uniforms",
            std::mem::size_of::<crate::pipeline::forward::LightUniforms>() as u64,
        );
        let model_uniforms = UniformArena::new(
            gpu,
            "OIT Model Uniforms",
            std::mem::size_of::<ModelUniforms>() as u64,
        );

        Self {
            pipelines: None,
            resources: None,
            frame_buffer,
            resolve_buffer,
            light_uniforms,
            model_uniforms,
            default_texture: Texture::white(gpu),
            wireframe: false,
            warned_wireframe: false,
        }
    }

    /// Whether transparent meshes are drawn as wireframes during
    /// accumulation.
    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Toggles wireframe accumulation for subsequent `render` calls.
    pub fn set_wireframe(&mut self, flag: bool) {
        self.wireframe = flag;
    }

    /// Drops every GPU resource; the next render re-initializes from
    /// scratch.
    pub fn invalidate(&mut self) {
        self.pipelines = None;
        self.resources = None;
    }

    fn ensure_pipelines(&mut self, gpu: &GpuContext) {
        if self.pipelines.is_some() {
            return;
        }
        log::debug!("oit: building pipelines");
        let device = &gpu.device;

        let accum_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("OIT Accumulate Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/oit_accum.wgsl").into()),
        });
        let resolve_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("OIT Resolve Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/oit_resolve.wgsl").into()),
        });
        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("OIT Clear Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/oit_clear.wgsl").into()),
        });

        let storage = |binding, read_only, visibility| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform = |binding, visibility| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let accum_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("OIT Accumulate Bind Group Layout"),
            entries: &[
                uniform(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                storage(1, false, wgpu::ShaderStages::FRAGMENT),
                storage(2, false, wgpu::ShaderStages::FRAGMENT),
                storage(3, false, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let resolve_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("OIT Resolve Bind Group Layout"),
            entries: &[
                uniform(0, wgpu::ShaderStages::FRAGMENT),
                storage(1, true, wgpu::ShaderStages::FRAGMENT),
                storage(2, true, wgpu::ShaderStages::FRAGMENT),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let clear_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("OIT Clear Bind Group Layout"),
            entries: &[
                storage(0, false, wgpu::ShaderStages::COMPUTE),
                storage(1, false, wgpu::ShaderStages::COMPUTE),
                uniform(2, wgpu::ShaderStages::COMPUTE),
            ],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("OIT Texture Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
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

        let accum_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("OIT Accumulate Pipeline Layout"),
                bind_group_layouts: &[
                    &accum_layout,
                    self.light_uniforms.layout(),
                    self.model_uniforms.layout(),
                    &texture_layout,
                ],
                push_constant_ranges: &[],
            });

        let build_accum = |polygon_mode, label: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&accum_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &accum_shader,
                    entry_point: Some("vs"),
                    buffers: &[crate::mesh::Vertex3d::LAYOUT],
                    compilation_options: Default::default(),
                },
                // All output goes through the storage buffers; there is no
                // color attachment to write.
                fragment: Some(wgpu::FragmentState {
                    module: &accum_shader,
                    entry_point: Some("fs"),
                    targets: &[],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    front_face: wgpu::FrontFace::Ccw,
                    polygon_mode,
                    ..Default::default()
                },
                // Test against the opaque scene depth, never write it.
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: SceneTargets::DEPTH_FORMAT,
                    depth_write_enabled: false,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let accum = build_accum(wgpu::PolygonMode::Fill, "OIT Accumulate Pipeline");
        let accum_line = gpu.supports_wireframe().then(|| {
            build_accum(
                wgpu::PolygonMode::Line,
                "OIT Accumulate Pipeline (wireframe)",
            )
        });

        let resolve_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("OIT Resolve Pipeline Layout"),
                bind_group_layouts: &[&resolve_layout],
                push_constant_ranges: &[],
            });

        let build_resolve = |blend: wgpu::BlendState, label: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&resolve_pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &resolve_shader,
                    entry_point: Some("vs"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &resolve_shader,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: SceneTargets::COLOR_FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        };

        let resolve_replace =
            build_resolve(wgpu::BlendState::REPLACE, "OIT Resolve Pipeline (replace)");
        let resolve_additive = build_resolve(ADDITIVE, "OIT Resolve Pipeline (additive)");

        let clear_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("OIT Clear Pipeline Layout"),
                bind_group_layouts: &[&clear_layout],
                push_constant_ranges: &[],
            });
        let clear = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("OIT Clear Pipeline"),
            layout: Some(&clear_pipeline_layout),
            module: &clear_shader,
            entry_point: Some("cs"),
            compilation_options: Default::default(),
            cache: None,
        });

        self.pipelines = Some(OitPipelines {
            accum_layout,
            resolve_layout,
            clear_layout,
            texture_layout,
            accum,
            accum_line,
            resolve_replace,
            resolve_additive,
            clear,
        });
    }

    /// (Re)builds the surface-sized buffers and bind groups.
    ///
    /// Fails without partial teardown when the requested arena cannot fit
    /// in a storage binding; the caller should not retry at the same size.
    fn ensure_resources(
        &mut self,
        gpu: &GpuContext,
        targets: &SceneTargets,
    ) -> Result<(), RenderError> {
        if let Some(res) = &self.resources
            && res.width == targets.width()
            && res.height == targets.height()
        {
            return Ok(());
        }
        let pipelines = self.pipelines.as_ref().expect("pipelines built first");

        let width = targets.width();
        let height = targets.height();
        let pixels = width as u64 * height as u64;
        let capacity = pixels * Self::FRAGS_PER_PIXEL as u64;
        let arena_bytes = capacity * Self::NODE_BYTES;

        let limits = gpu.device.limits();
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        if arena_bytes > max_binding || arena_bytes > limits.max_buffer_size {
            let msg = format!(
                "transparency arena of {arena_bytes} bytes ({width}x{height}x{} nodes) \
                 exceeds the device limit of {max_binding} bytes",
                Self::FRAGS_PER_PIXEL
            );
            log::error!("oit: {msg}");
            return Err(RenderError::ResourceInit(msg));
        }

        log::debug!(
            "oit: allocating {width}x{height} lists, {capacity} nodes, {arena_bytes} bytes"
        );
        let device = &gpu.device;

        let heads = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Head Pointers"),
            size: pixels * std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Fragment Counter"),
            size: std::mem::size_of::<u32>() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let arena = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Fragment Arena"),
            size: arena_bytes,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let snapshot = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("OIT Background Snapshot"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SceneTargets::COLOR_FORMAT,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let snapshot_view = snapshot.create_view(&wgpu::TextureViewDescriptor::default());

        let clear_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("OIT Clear Uniforms"),
            size: std::mem::size_of::<ClearUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        gpu.queue.write_buffer(
            &clear_buffer,
            0,
            bytemuck::bytes_of(&ClearUniforms {
                pixel_count: pixels as u32,
                _pad: [0; 3],
            }),
        );

        let accum_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("OIT Accumulate Bind Group"),
            layout: &pipelines.accum_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: heads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: counter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: arena.as_entire_binding(),
                },
            ],
        });

        let resolve_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("OIT Resolve Bind Group"),
            layout: &pipelines.resolve_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.resolve_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: heads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: arena.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&snapshot_view),
                },
            ],
        });

        let clear_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("OIT Clear Bind Group"),
            layout: &pipelines.clear_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: heads.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: counter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: clear_buffer.as_entire_binding(),
                },
            ],
        });

        self.resources = Some(OitResources {
            heads,
            counter,
            arena,
            snapshot,
            accum_bind,
            resolve_bind,
            clear_bind,
            width,
            height,
        });
        Ok(())
    }

    /// Accumulates and resolves the transparent block over the opaque
    /// scene in `targets`, once per light.
    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        camera: &Camera,
        list: &RenderList,
        targets: &SceneTargets,
    ) -> Result<(), RenderError> {
        if !list.is_processed() {
            log::error!("oit pipeline: list has not been processed");
            return Err(RenderError::UnprocessedList);
        }
        if list.num_transparent() == 0 || list.num_lights() == 0 {
            return Ok(());
        }

        self.ensure_pipelines(ctx.gpu);
        self.ensure_resources(ctx.gpu, targets)?;

        let view = camera.view_matrix();
        let calls = list.draw_calls(ListRange::Transparents, ctx.scene, view)?;
        let total_lights = list.num_lights() as u32;

        ctx.gpu.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::bytes_of(&AccumFrameUniforms {
                projection: camera.projection.to_cols_array_2d(),
                viewport: [targets.width(), targets.height()],
                total_lights,
                _pad: 0,
            }),
        );
        ctx.gpu.queue.write_buffer(
            &self.resolve_buffer,
            0,
            bytemuck::bytes_of(&ResolveUniforms {
                viewport: [targets.width(), targets.height()],
                total_lights,
                _pad: 0,
            }),
        );

        self.model_uniforms
            .ensure_capacity(ctx.gpu, calls.len() as u32);
        for (i, call) in calls.iter().enumerate() {
            self.model_uniforms
                .write(ctx.gpu, i as u32, &ModelUniforms::from_call(call));
        }
        self.light_uniforms.ensure_capacity(ctx.gpu, total_lights);
        for l in 0..list.num_lights() {
            if let Some((uniforms, _, _)) = light_uniforms(list, l, ctx.scene, camera) {
                self.light_uniforms.write(ctx.gpu, l as u32, &uniforms);
            }
        }

        let wireframe = self.wireframe;
        if wireframe && !ctx.gpu.supports_wireframe() && !self.warned_wireframe {
            log::warn!("wireframe requested but POLYGON_MODE_LINE is unavailable; drawing filled");
            self.warned_wireframe = true;
        }

        let gpu = ctx.gpu;
        let meshes = ctx.meshes;
        let pipelines = self.pipelines.as_ref().expect("pipelines built above");
        let resources = self.resources.as_ref().expect("resources built above");

        // One background snapshot per frame; every light's resolve reads
        // the pre-transparency scene.
        ctx.encoder.copy_texture_to_texture(
            targets.color.as_image_copy(),
            resources.snapshot.as_image_copy(),
            wgpu::Extent3d {
                width: targets.width(),
                height: targets.height(),
                depth_or_array_layers: 1,
            },
        );

        let pixel_count = targets.width() as u64 * targets.height() as u64;
        let clear_groups = pixel_count.div_ceil(256) as u32;

        for l in 0..total_lights {
            // Reset head pointers and the allocation counter.
            {
                let mut pass = ctx
                    .encoder
                    .begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("OIT Clear Pass"),
                        timestamp_writes: None,
                    });
                pass.set_pipeline(&pipelines.clear);
                pass.set_bind_group(0, &resources.clear_bind, &[]);
                pass.dispatch_workgroups(clear_groups, 1, 1);
            }

            // Build this light's per-pixel lists.
            {
                let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("OIT Accumulate Pass"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &targets.depth_view,
                        // No ops: the opaque depth is read-only here.
                        depth_ops: None,
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                let pipeline = if wireframe {
                    pipelines.accum_line.as_ref().unwrap_or(&pipelines.accum)
                } else {
                    &pipelines.accum
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &resources.accum_bind, &[]);
                pass.set_bind_group(
                    1,
                    self.light_uniforms.bind_group(),
                    &[UniformArena::offset(l)],
                );

                for (i, call) in calls.iter().enumerate() {
                    let Some(mesh) = meshes.mesh(call.mesh) else {
                        continue;
                    };
                    pass.set_bind_group(
                        2,
                        self.model_uniforms.bind_group(),
                        &[UniformArena::offset(i as u32)],
                    );
                    let texture = call
                        .material
                        .albedo_texture
                        .and_then(|id| meshes.texture(id))
                        .unwrap_or(&self.default_texture);
                    let texture_bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("OIT Texture Bind Group"),
                        layout: &pipelines.texture_layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(&texture.view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::Sampler(&texture.sampler),
                            },
                        ],
                    });
                    pass.set_bind_group(3, &texture_bind, &[]);
                    pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
            }

            // Sort and blend the lists over the background.
            {
                let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("OIT Resolve Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &targets.color_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                let pipeline = if l == 0 {
                    &pipelines.resolve_replace
                } else {
                    &pipelines.resolve_additive
                };
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &resources.resolve_bind, &[]);
                pass.draw(0..3, 0..1);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// CPU model of one per-pixel fragment node.
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Node {
        color: [f32; 4],
        depth: f32,
        next: u32,
    }

    /// CPU model of the GPU arena insertion protocol: an atomic counter
    /// reserving slots and an atomic head exchange linking them. Mirrors
    /// `oit_accum.wgsl` exactly, including the silent drop on overflow.
    struct ArenaModel {
        heads: Vec<u32>,
        nodes: Vec<Option<Node>>,
        counter: u32,
    }

    impl ArenaModel {
        fn new(pixels: usize, capacity: usize) -> Self {
            Self {
                heads: vec![OitPipeline::SENTINEL; pixels],
                nodes: vec![None; capacity],
                counter: 0,
            }
        }

        fn insert(&mut self, pixel: usize, color: [f32; 4], depth: f32) {
            let slot = self.counter;
            self.counter += 1;
            if (slot as usize) < self.nodes.len() {
                let prev = std::mem::replace(&mut self.heads[pixel], slot);
                self.nodes[slot as usize] = Some(Node {
                    color,
                    depth,
                    next: prev,
                });
            }
        }

        /// Walks a pixel's list the way the resolve shader does.
        fn collect(&self, pixel: usize) -> Vec<Node> {
            let mut out = Vec::new();
            let mut index = self.heads[pixel];
            while index != OitPipeline::SENTINEL
                && out.len() < OitPipeline::MAX_RESOLVE_FRAGMENTS as usize
            {
                let node = self.nodes[index as usize].expect("linked node must be allocated");
                out.push(node);
                index = node.next;
            }
            out
        }
    }

    /// CPU reference of the resolve shader's insertion sort: descending
    /// depth, back to front.
    fn sort_back_to_front(frags: &mut [Node]) {
        for i in 1..frags.len() {
            let key = frags[i];
            let mut j = i;
            while j > 0 && frags[j - 1].depth < key.depth {
                frags[j] = frags[j - 1];
                j -= 1;
            }
            frags[j] = key;
        }
    }

    /// CPU reference of the resolve shader's straight-alpha blend chain.
    fn composite(base: [f32; 3], frags: &[Node]) -> [f32; 3] {
        let mut color = base;
        for f in frags {
            let a = f.color[3];
            for c in 0..3 {
                color[c] = color[c] * (1.0 - a) + f.color[c] * a;
            }
        }
        color
    }

    fn node(depth: f32, color: [f32; 4]) -> Node {
        Node {
            color,
            depth,
            next: 0,
        }
    }

    #[test]
    fn resolve_sorts_descending_by_depth() {
        let mut frags = [
            node(0.9, [1.0, 0.0, 0.0, 1.0]),
            node(0.1, [0.0, 1.0, 0.0, 1.0]),
            node(0.5, [0.0, 0.0, 1.0, 1.0]),
        ];
        sort_back_to_front(&mut frags);
        let depths: Vec<f32> = frags.iter().map(|f| f.depth).collect();
        assert_eq!(depths, vec![0.9, 0.5, 0.1]);
    }

    #[test]
    fn opaque_front_fragment_wins() {
        let mut frags = [
            node(0.9, [1.0, 0.0, 0.0, 1.0]),
            node(0.1, [0.0, 1.0, 0.0, 1.0]),
            node(0.5, [0.0, 0.0, 1.0, 1.0]),
        ];
        sort_back_to_front(&mut frags);
        // Three fully-opaque fragments over a neutral base: only the
        // depth-nearest one survives.
        let out = composite([0.2, 0.2, 0.2], &frags);
        assert_eq!(out, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn half_alpha_blends_back_to_front() {
        let mut frags = [
            node(0.3, [1.0, 1.0, 1.0, 0.5]),
            node(0.7, [0.0, 0.0, 0.0, 0.5]),
        ];
        sort_back_to_front(&mut frags);
        let out = composite([1.0, 0.0, 0.0], &frags);
        // base -> half black -> half white
        assert_eq!(out, [0.75, 0.5, 0.5]);
    }

    #[test]
    fn overflow_drops_fragments_without_breaking_lists() {
        // A pixel covered by 25 overlapping fragments with room for 20.
        let mut arena = ArenaModel::new(4, 20);
        for i in 0..25 {
            arena.insert(2, [i as f32, 0.0, 0.0, 1.0], i as f32 / 25.0);
        }

        let collected = arena.collect(2);
        assert_eq!(collected.len(), 20);
        // The accepted fragments are exactly the first 20 submitted, newest
        // at the head; the 5 dropped ones appear nowhere.
        for (pos, frag) in collected.iter().enumerate() {
            assert_eq!(frag.color[0], (19 - pos) as f32);
        }
    }

    #[test]
    fn overflow_leaves_other_pixels_intact() {
        let mut arena = ArenaModel::new(2, 5);
        arena.insert(0, [9.0, 0.0, 0.0, 1.0], 0.5);
        for i in 0..10 {
            arena.insert(1, [i as f32, 0.0, 0.0, 1.0], 0.1);
        }

        let first = arena.collect(0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].color[0], 9.0);
        assert_eq!(arena.collect(1).len(), 4);
    }

    #[test]
    fn empty_pixel_resolves_to_background() {
        let arena = ArenaModel::new(1, 4);
        let frags = arena.collect(0);
        assert!(frags.is_empty());
        assert_eq!(composite([0.3, 0.4, 0.5], &frags), [0.3, 0.4, 0.5]);
    }
}
