//! Depth-only shadow map rendering from a light's viewpoint.

use glam::Mat4;

use crate::error::RenderError;
use crate::gpu::GpuContext;
use crate::pipeline::{RenderContext, UniformArena};
use crate::render_list::{ListRange, RenderList};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowFrameUniforms {
    projection: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ShadowModelUniforms {
    modelview: [[f32; 4]; 4],
}

/// Renders the opaque meshes into a dedicated depth map as seen from a
/// light.
///
/// The pass culls *front* faces, so the map holds back-face depths; that
/// trades peter-panning for acne on closed geometry and lets the shading
/// pass compare without a depth bias.
///
/// One map is kept and re-rendered for every light in turn — the forward
/// pipeline interleaves a shadow pass before each of its light passes, so
/// the map always holds the current light's view when it is sampled.
pub struct ShadowPipeline {
    pipeline: wgpu::RenderPipeline,
    frame_uniforms: UniformArena,
    model_uniforms: UniformArena,
    #[allow(dead_code)]
    map: wgpu::Texture,
    map_view: wgpu::TextureView,
}

impl ShadowPipeline {
    /// Shadow map resolution, square.
    pub const MAP_SIZE: u32 = 1024;
    /// Depth format of the map.
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Builds the depth-only pipeline and the shadow map.
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Shadow Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/shadow.wgsl").into()),
        });

        let frame_uniforms = UniformArena::new(
            gpu,
            "Shadow Frame Uniforms",
            std::mem::size_of::<ShadowFrameUniforms>() as u64,
        );
        let model_uniforms = UniformArena::new(
            gpu,
            "Shadow Model Uniforms",
            std::mem::size_of::<ShadowModelUniforms>() as u64,
        );

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shadow Pipeline Layout"),
            bind_group_layouts: &[frame_uniforms.layout(), model_uniforms.layout()],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Shadow Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[crate::mesh::Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            // Depth-only: no fragment stage, no color targets.
            fragment: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Front),
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: Self::DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let map = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Map"),
            size: wgpu::Extent3d {
                width: Self::MAP_SIZE,
                height: Self::MAP_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let map_view = map.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            pipeline,
            frame_uniforms,
            model_uniforms,
            map,
            map_view,
        }
    }

    /// View of the shadow map, for the shading pass's comparison sampling
    /// and for the driver's shadow-map preview.
    pub fn map_view(&self) -> &wgpu::TextureView {
        &self.map_view
    }

    /// Renders the opaque block of `list` into the shadow map from the
    /// viewpoint of light `light_index`.
    ///
    /// `light_view` is the inverted light world matrix; `light_projection`
    /// comes from the light payload. Uniform entries are keyed by
    /// `light_index` so several lights can be encoded into one frame
    /// without overwriting each other.
    pub fn render_light(
        &mut self,
        ctx: &mut RenderContext,
        light_index: u32,
        light_view: Mat4,
        light_projection: Mat4,
        list: &RenderList,
    ) -> Result<(), RenderError> {
        if !list.is_processed() {
            log::error!("shadow pipeline: list has not been processed");
            return Err(RenderError::UnprocessedList);
        }

        let calls = list.draw_calls(ListRange::Meshes, ctx.scene, light_view)?;

        self.frame_uniforms
            .ensure_capacity(ctx.gpu, light_index + 1);
        self.frame_uniforms.write(
            ctx.gpu,
            light_index,
            &ShadowFrameUniforms {
                projection: light_projection.to_cols_array_2d(),
            },
        );

        let base = light_index * calls.len() as u32;
        self.model_uniforms
            .ensure_capacity(ctx.gpu, base + calls.len() as u32);
        for (i, call) in calls.iter().enumerate() {
            self.model_uniforms.write(
                ctx.gpu,
                base + i as u32,
                &ShadowModelUniforms {
                    modelview: call.modelview.to_cols_array_2d(),
                },
            );
        }

        let meshes = ctx.meshes;
        let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Shadow Pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.map_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(
            0,
            self.frame_uniforms.bind_group(),
            &[UniformArena::offset(light_index)],
        );

        for (i, call) in calls.iter().enumerate() {
            let Some(mesh) = meshes.mesh(call.mesh) else {
                continue;
            };
            pass.set_bind_group(
                1,
                self.model_uniforms.bind_group(),
                &[UniformArena::offset(base + i as u32)],
            );
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }

        Ok(())
    }
}
