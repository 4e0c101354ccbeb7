//! Rendering pipelines and the resources they share.
//!
//! Each pipeline is a stateful orchestrator that consumes a processed
//! [`RenderList`](crate::render_list::RenderList) plus a camera and drives
//! the GPU through one or more passes:
//!
//! - [`ShadowPipeline`] — depth-only pass from a light's viewpoint
//! - [`ForwardPipeline`] — lit, shadowed, per-light additive passes over
//!   the opaque meshes (owns the shadow pipeline)
//! - [`OitPipeline`] — per-pixel linked-list transparency accumulation and
//!   resolve
//! - [`FullscreenPipeline`] — composites an offscreen target to the screen
//!
//! The offscreen color and depth targets the first three pipelines share
//! are owned by the frame driver as a [`SceneTargets`] value and passed
//! down explicitly; there is no global "current target" state anywhere.
//!
//! All pipelines initialize their GPU resources lazily on first render and
//! rebuild the size-dependent ones when the surface size changes, so a
//! window resize needs no explicit notification beyond
//! [`GpuContext::resize`](crate::gpu::GpuContext::resize).

mod forward;
mod fullscreen;
mod oit;
mod shadow;

pub use forward::ForwardPipeline;
pub use fullscreen::FullscreenPipeline;
pub use oit::OitPipeline;
pub use shadow::ShadowPipeline;

use crate::gpu::GpuContext;
use crate::mesh::MeshStore;
use crate::scene::Scene;

/// Everything a pipeline needs for one frame, threaded by reference.
///
/// Created fresh by the driver each frame around a single command encoder;
/// the pipelines append their passes to it in driver-chosen order.
pub struct RenderContext<'a> {
    /// GPU device, queue and surface configuration.
    pub gpu: &'a GpuContext,
    /// Command encoder the frame's passes are recorded into.
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// The scene the render list was built from.
    pub scene: &'a Scene,
    /// Mesh and texture storage referenced by the scene's nodes.
    pub meshes: &'a MeshStore,
}

/// The driver-owned offscreen color and depth targets.
///
/// The forward pipeline draws the opaque scene into them, the OIT pipeline
/// resolves transparency on top of the color target (depth-testing against
/// the shared depth), and the fullscreen pipeline finally samples the color
/// target to the swapchain.
pub struct SceneTargets {
    /// Offscreen color target.
    pub color: wgpu::Texture,
    /// View of the color target.
    pub color_view: wgpu::TextureView,
    /// Shared depth buffer.
    pub depth: wgpu::Texture,
    /// View of the depth buffer.
    pub depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl SceneTargets {
    /// Color format; float so that additive multi-light accumulation does
    /// not clamp at 1.0.
    pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
    /// Depth format shared by the forward and OIT pipelines.
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Creates targets matching the current surface size.
    pub fn new(gpu: &GpuContext) -> Self {
        let color = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Scene Color Target"),
            size: wgpu::Extent3d {
                width: gpu.width(),
                height: gpu.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Scene Depth Target"),
            size: wgpu::Extent3d {
                width: gpu.width(),
                height: gpu.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            color,
            color_view,
            depth,
            depth_view,
            width: gpu.width(),
            height: gpu.height(),
        }
    }

    /// Recreates the targets if the surface size changed.
    pub fn ensure_size(&mut self, gpu: &GpuContext) {
        if self.width != gpu.width() || self.height != gpu.height() {
            *self = Self::new(gpu);
        }
    }

    /// Current width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Current height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Alignment-padded stride for dynamically-offset uniform entries.
pub(crate) const UNIFORM_STRIDE: u64 = 256;

/// A growable uniform buffer addressed with dynamic offsets.
///
/// Per-draw and per-light uniforms vary within a single command encoder, so
/// they cannot share one plain uniform buffer (every `write_buffer` lands
/// before the encoder's passes execute, and the last write would win).
/// Instead each pipeline writes entry `i` of an arena at offset
/// `i * UNIFORM_STRIDE` and binds the arena once with a dynamic offset per
/// draw or per light.
pub(crate) struct UniformArena {
    label: &'static str,
    entry_size: u64,
    buffer: wgpu::Buffer,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    capacity: u32,
}

impl UniformArena {
    /// Creates an arena for `entry_size`-byte entries with an initial
    /// capacity; visible to both vertex and fragment stages.
    pub fn new(gpu: &GpuContext, label: &'static str, entry_size: u64) -> Self {
        let layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(entry_size),
                    },
                    count: None,
                }],
            });

        let capacity = 16;
        let (buffer, bind_group) = Self::alloc(gpu, label, &layout, entry_size, capacity);

        Self {
            label,
            entry_size,
            buffer,
            layout,
            bind_group,
            capacity,
        }
    }

    fn alloc(
        gpu: &GpuContext,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        entry_size: u64,
        capacity: u32,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * UNIFORM_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(entry_size),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Grows the arena to hold at least `entries` entries.
    pub fn ensure_capacity(&mut self, gpu: &GpuContext, entries: u32) {
        if entries > self.capacity {
            let capacity = entries.next_power_of_two();
            log::debug!("{}: growing to {capacity} entries", self.label);
            let (buffer, bind_group) =
                Self::alloc(gpu, self.label, &self.layout, self.entry_size, capacity);
            self.buffer = buffer;
            self.bind_group = bind_group;
            self.capacity = capacity;
        }
    }

    /// Writes one entry; `index` must be below the ensured capacity.
    pub fn write<T: bytemuck::Pod>(&self, gpu: &GpuContext, index: u32, value: &T) {
        gpu.queue.write_buffer(
            &self.buffer,
            index as u64 * UNIFORM_STRIDE,
            bytemuck::bytes_of(value),
        );
    }

    /// Dynamic offset of entry `index`.
    pub fn offset(index: u32) -> u32 {
        index * UNIFORM_STRIDE as u32
    }

    /// Layout for pipeline creation.
    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Bind group to set with a dynamic offset.
    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}
