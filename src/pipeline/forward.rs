//! Lit, shadowed forward rendering of the opaque meshes.
//!
//! This is the classic multipass forward loop: for every light in the
//! list's leading block, render a shadow map from the light's viewpoint,
//! then draw every opaque mesh with Blinn-Phong shading and a shadow
//! comparison. The first light's pass clears and replaces the offscreen
//! targets; every later light blends additively on top, and the shaders
//! divide emissive output by the light count so self-illumination is not
//! accounted once per light.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::camera::Camera;
use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::pipeline::{RenderContext, SceneTargets, ShadowPipeline, UniformArena};
use crate::render_list::{DrawCall, ListRange, RenderList};
use crate::texture::Texture;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    projection: [[f32; 4]; 4],
    total_lights: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct LightUniforms {
    /// Light position in view coordinates.
    pub position: [f32; 4],
    pub color: [f32; 4],
    pub ambient: [f32; 4],
    /// View space to light clip space, for the shadow lookup.
    pub light_matrix: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct ModelUniforms {
    pub modelview: [[f32; 4]; 4],
    /// Inverse transpose of the modelview, for normals under non-uniform
    /// scale.
    pub normal_matrix: [[f32; 4]; 4],
    /// Albedo rgb, opacity in w.
    pub albedo_opacity: [f32; 4],
    /// Emission rgb, roughness in w.
    pub emission_roughness: [f32; 4],
}

impl ModelUniforms {
    pub(crate) fn from_call(call: &DrawCall) -> Self {
        Self {
            modelview: call.modelview.to_cols_array_2d(),
            normal_matrix: call.modelview.inverse().transpose().to_cols_array_2d(),
            albedo_opacity: call
                .material
                .albedo
                .extend(call.material.opacity)
                .to_array(),
            emission_roughness: call
                .material
                .emission
                .extend(call.material.roughness)
                .to_array(),
        }
    }
}

/// Computes the per-light uniform block shared by the forward and OIT
/// shading passes.
pub(crate) fn light_uniforms(
    list: &RenderList,
    index: usize,
    scene: &crate::scene::Scene,
    camera: &Camera,
) -> Option<(LightUniforms, Mat4, Mat4)> {
    let (elem, light) = list.light(index, scene)?;
    let view = camera.view_matrix();
    let light_view = elem.world.inverse();
    // View coords -> world (camera world) -> light view -> light clip.
    let light_matrix = light.projection * light_view * camera.world;
    let position = view * elem.world.w_axis;
    Some((
        LightUniforms {
            position: position.to_array(),
            color: light.color.extend(1.0).to_array(),
            ambient: light.ambient.extend(1.0).to_array(),
            light_matrix: light_matrix.to_cols_array_2d(),
        },
        light_view,
        light.projection,
    ))
}

/// Forward pipeline for the opaque mesh block.
///
/// Owns the [`ShadowPipeline`] and interleaves one shadow pass before each
/// light pass, the same way the OIT pipeline interleaves clear/accumulate/
/// resolve — per light, in list order.
pub struct ForwardPipeline {
    shadow: ShadowPipeline,
    pipeline_replace: wgpu::RenderPipeline,
    pipeline_additive: wgpu::RenderPipeline,
    pipeline_replace_line: Option<wgpu::RenderPipeline>,
    pipeline_additive_line: Option<wgpu::RenderPipeline>,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    light_uniforms: UniformArena,
    model_uniforms: UniformArena,
    texture_layout: wgpu::BindGroupLayout,
    default_texture: Texture,
    wireframe: bool,
    warned_wireframe: bool,
}

impl ForwardPipeline {
    /// Builds all pipeline variants and static resources.
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;
        let shadow = ShadowPipeline::new(gpu);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Forward Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/forward.wgsl").into()),
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Forward Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Forward Frame Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });

        // Back faces are in the shadow map (the shadow pass culls front
        // faces), so a plain less-equal comparison works without bias.
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Comparison Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Forward Frame Bind Group"),
            layout: &frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(shadow.map_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&shadow_sampler),
                },
            ],
        });

        let light_uniforms = UniformArena::new(
            gpu,
            "Forward Light Uniforms",
            std::mem::size_of::<LightUniforms>() as u64,
        );
        let model_uniforms = UniformArena::new(
            gpu,
            "Forward Model Uniforms",
            std::mem::size_of::<ModelUniforms>() as u64,
        );

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Forward Texture Bind Group Layout"),
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

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Forward Pipeline Layout"),
            bind_group_layouts: &[
                &frame_layout,
                light_uniforms.layout(),
                model_uniforms.layout(),
                &texture_layout,
            ],
            push_constant_ranges: &[],
        });

        let build = |blend: wgpu::BlendState, polygon_mode: wgpu::PolygonMode, label: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs"),
                    buffers: &[crate::mesh::Vertex3d::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
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
                    cull_mode: Some(wgpu::Face::Back),
                    front_face: wgpu::FrontFace::Ccw,
                    polygon_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: SceneTargets::DEPTH_FORMAT,
                    depth_write_enabled: true,
                    // Later light passes redraw the same geometry at equal
                    // depth.
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
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

        let pipeline_replace = build(
            wgpu::BlendState::REPLACE,
            wgpu::PolygonMode::Fill,
            "Forward Pipeline (replace)",
        );
        let pipeline_additive = build(
            ADDITIVE,
            wgpu::PolygonMode::Fill,
            "Forward Pipeline (additive)",
        );
        let (pipeline_replace_line, pipeline_additive_line) = if gpu.supports_wireframe() {
            (
                Some(build(
                    wgpu::BlendState::REPLACE,
                    wgpu::PolygonMode::Line,
                    "Forward Pipeline (replace, wireframe)",
                )),
                Some(build(
                    ADDITIVE,
                    wgpu::PolygonMode::Line,
                    "Forward Pipeline (additive, wireframe)",
                )),
            )
        } else {
            (None, None)
        };

        let default_texture = Texture::white(gpu);

        Self {
            shadow,
            pipeline_replace,
            pipeline_additive,
            pipeline_replace_line,
            pipeline_additive_line,
            frame_buffer,
            frame_bind_group,
            light_uniforms,
            model_uniforms,
            texture_layout,
            default_texture,
            wireframe: false,
            warned_wireframe: false,
        }
    }

    /// The owned shadow pipeline, e.g. for previewing its map.
    pub fn shadow(&self) -> &ShadowPipeline {
        &self.shadow
    }

    /// Whether meshes are drawn as wireframes.
    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Toggles wireframe drawing for subsequent `render` calls.
    pub fn set_wireframe(&mut self, flag: bool) {
        self.wireframe = flag;
    }

    /// Creates a bind group for a material's albedo texture (or the white
    /// default).
    fn texture_bind_group(
        &self,
        gpu: &GpuContext,
        meshes: &crate::mesh::MeshStore,
        call: &DrawCall,
    ) -> wgpu::BindGroup {
        let texture = call
            .material
            .albedo_texture
            .and_then(|id| meshes.texture(id))
            .unwrap_or(&self.default_texture);
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Forward Texture Bind Group"),
            layout: &self.texture_layout,
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
        })
    }

    /// Renders every light's shadowed, lit pass over the opaque block into
    /// `targets`.
    ///
    /// With no lights in the list the targets are still cleared, so the
    /// downstream blit never shows stale content.
    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        camera: &Camera,
        list: &RenderList,
        targets: &SceneTargets,
    ) -> Result<(), RenderError> {
        if !list.is_processed() {
            log::error!("forward pipeline: list has not been processed");
            return Err(RenderError::UnprocessedList);
        }

        let total_lights = list.num_lights() as u32;
        if total_lights == 0 {
            let _clear = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Forward Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            return Ok(());
        }

        let view = camera.view_matrix();
        let calls = list.draw_calls(ListRange::Meshes, ctx.scene, view)?;

        ctx.gpu.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::bytes_of(&FrameUniforms {
                projection: camera.projection.to_cols_array_2d(),
                total_lights,
                _pad: [0; 3],
            }),
        );

        self.model_uniforms
            .ensure_capacity(ctx.gpu, calls.len() as u32);
        for (i, call) in calls.iter().enumerate() {
            self.model_uniforms
                .write(ctx.gpu, i as u32, &ModelUniforms::from_call(call));
        }
        self.light_uniforms.ensure_capacity(ctx.gpu, total_lights);

        let wireframe = self.wireframe;
        if wireframe && !ctx.gpu.supports_wireframe() && !self.warned_wireframe {
            log::warn!("wireframe requested but POLYGON_MODE_LINE is unavailable; drawing filled");
            self.warned_wireframe = true;
        }

        for l in 0..list.num_lights() {
            let Some((uniforms, light_view, light_projection)) =
                light_uniforms(list, l, ctx.scene, camera)
            else {
                continue;
            };
            self.light_uniforms.write(ctx.gpu, l as u32, &uniforms);

            self.shadow
                .render_light(ctx, l as u32, light_view, light_projection, list)?;

            let first = l == 0;
            let gpu = ctx.gpu;
            let meshes = ctx.meshes;
            let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Forward Light Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: if first {
                            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: if first {
                            wgpu::LoadOp::Clear(1.0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let pipeline = match (first, wireframe) {
                (true, true) => self.pipeline_replace_line.as_ref().unwrap_or(&self.pipeline_replace),
                (true, false) => &self.pipeline_replace,
                (false, true) => self
                    .pipeline_additive_line
                    .as_ref()
                    .unwrap_or(&self.pipeline_additive),
                (false, false) => &self.pipeline_additive,
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.frame_bind_group, &[]);
            pass.set_bind_group(
                1,
                self.light_uniforms.bind_group(),
                &[UniformArena::offset(l as u32)],
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
                let texture_bind_group = self.texture_bind_group(gpu, meshes, call);
                pass.set_bind_group(3, &texture_bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }

        Ok(())
    }
}
