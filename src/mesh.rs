//! Mesh geometry, materials and the asset store.
//!
//! This module provides the drawable side of the scene graph:
//!
//! - [`Vertex3d`] — the vertex format used by all meshes (position, normal, UV)
//! - [`Mesh`] — GPU-resident geometry with vertex and index buffers
//! - [`Material`] — surface properties; its `opacity` decides whether a mesh
//!   goes through the opaque forward pass or the transparency pipeline
//! - [`MeshStore`] — owns all meshes and textures, handing out the stable
//!   [`MeshId`]/[`TextureId`] handles that scene nodes reference
//!
//! Scene nodes never hold `&Mesh`; they hold a [`MeshId`] and the store is
//! passed to the pipelines at render time, so per-frame structures stay free
//! of borrows into the asset storage.

use glam::Vec3;

use crate::gpu::GpuContext;
use crate::texture::Texture;

/// A vertex for 3D mesh rendering with position, normal, and texture
/// coordinates.
///
/// `#[repr(C)]` plus the bytemuck derives make the struct castable to bytes
/// for GPU upload. Each vertex occupies 32 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    /// Position in model space.
    pub position: [f32; 3],
    /// Surface normal (normalized for correct lighting).
    pub normal: [f32; 3],
    /// Texture coordinates, typically in [0, 1].
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// The wgpu vertex buffer layout for this vertex type: position at
    /// location 0, normal at 1, UV at 2, 32-byte stride.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            // normal
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            // uv
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    /// Creates a new vertex.
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// GPU-resident 3D mesh geometry with vertex and index buffers.
///
/// Once created the data lives on the GPU and the mesh is immutable; to
/// render different geometry, create a new mesh. All built-in primitives
/// use counter-clockwise winding for front faces.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) index_buffer: wgpu::Buffer,
    pub(crate) index_count: u32,
}

impl Mesh {
    /// Creates a mesh from raw vertex and index data.
    ///
    /// Indices are u32, three per triangle. An empty mesh is valid but
    /// renders nothing.
    pub fn new(gpu: &GpuContext, vertices: &[Vertex3d], indices: &[u32]) -> Self {
        use wgpu::util::DeviceExt;

        let vertex_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let index_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }
    }

    /// Creates a unit cube centered at the origin.
    ///
    /// Spans -0.5 to 0.5 on all axes; each face has its own vertices for
    /// flat shading and a full [0,1] UV range.
    pub fn cube(gpu: &GpuContext) -> Self {
        #[rustfmt::skip]
        let vertices = vec![
            // Front face (Z+)
            Vertex3d::new([-0.5, -0.5,  0.5], [ 0.0,  0.0,  1.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 0.0,  0.0,  1.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 0.0,  0.0,  1.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5,  0.5], [ 0.0,  0.0,  1.0], [0.0, 1.0]),
            // Back face (Z-)
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 0.0,  0.0, -1.0], [0.0, 0.0]),
            Vertex3d::new([-0.5, -0.5, -0.5], [ 0.0,  0.0, -1.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [ 0.0,  0.0, -1.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 0.0,  0.0, -1.0], [0.0, 1.0]),
            // Top face (Y+)
            Vertex3d::new([-0.5,  0.5,  0.5], [ 0.0,  1.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 0.0,  1.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 0.0,  1.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [ 0.0,  1.0,  0.0], [0.0, 1.0]),
            // Bottom face (Y-)
            Vertex3d::new([-0.5, -0.5, -0.5], [ 0.0, -1.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 0.0, -1.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 0.0, -1.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5, -0.5,  0.5], [ 0.0, -1.0,  0.0], [0.0, 1.0]),
            // Right face (X+)
            Vertex3d::new([ 0.5, -0.5,  0.5], [ 1.0,  0.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([ 0.5, -0.5, -0.5], [ 1.0,  0.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([ 0.5,  0.5, -0.5], [ 1.0,  0.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([ 0.5,  0.5,  0.5], [ 1.0,  0.0,  0.0], [0.0, 1.0]),
            // Left face (X-)
            Vertex3d::new([-0.5, -0.5, -0.5], [-1.0,  0.0,  0.0], [0.0, 0.0]),
            Vertex3d::new([-0.5, -0.5,  0.5], [-1.0,  0.0,  0.0], [1.0, 0.0]),
            Vertex3d::new([-0.5,  0.5,  0.5], [-1.0,  0.0,  0.0], [1.0, 1.0]),
            Vertex3d::new([-0.5,  0.5, -0.5], [-1.0,  0.0,  0.0], [0.0, 1.0]),
        ];

        #[rustfmt::skip]
        let indices: Vec<u32> = vec![
            0,  1,  2,  2,  3,  0,  // front
            4,  5,  6,  6,  7,  4,  // back
            8,  9,  10, 10, 11, 8,  // top
            12, 13, 14, 14, 15, 12, // bottom
            16, 17, 18, 18, 19, 16, // right
            20, 21, 22, 22, 23, 20, // left
        ];

        Self::new(gpu, &vertices, &indices)
    }

    /// Creates a UV sphere of radius 0.5 centered at the origin.
    ///
    /// `segments` divides the equator, `rings` divides pole to pole; 32/16
    /// is a reasonable medium quality.
    pub fn sphere(gpu: &GpuContext, segments: u32, rings: u32) -> Self {
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                let position = [x * 0.5, y * 0.5, z * 0.5];
                let normal = [x, y, z];
                let uv = [seg as f32 / segments as f32, ring as f32 / rings as f32];

                vertices.push(Vertex3d::new(position, normal, uv));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;

                indices.push(current);
                indices.push(next);
                indices.push(current + 1);

                indices.push(current + 1);
                indices.push(next);
                indices.push(next + 1);
            }
        }

        Self::new(gpu, &vertices, &indices)
    }

    /// Creates a square plane on the XZ axis, normals pointing up.
    pub fn plane(gpu: &GpuContext, size: f32) -> Self {
        let half = size * 0.5;
        let vertices = vec![
            Vertex3d::new([-half, 0.0, -half], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex3d::new([half, 0.0, -half], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex3d::new([half, 0.0, half], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex3d::new([-half, 0.0, half], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];

        let indices = vec![0, 1, 2, 2, 3, 0];

        Self::new(gpu, &vertices, &indices)
    }
}

/// Surface properties of a mesh instance.
///
/// The `opacity` field is the classification key for the render list: a
/// material with `opacity == 1.0` is drawn by the opaque forward pass, while
/// anything below goes through the per-pixel transparency pipeline.
#[derive(Clone, Copy, Debug)]
pub struct Material {
    /// Base surface color, multiplied with the albedo texture if present.
    pub albedo: Vec3,
    /// Self-illumination, independent of any light.
    pub emission: Vec3,
    /// 1.0 is fully diffuse, 0.0 fully specular.
    pub roughness: f32,
    /// Straight alpha in [0, 1]; values below 1.0 mark the mesh transparent.
    pub opacity: f32,
    /// Optional albedo texture; a 1x1 white default is used when absent.
    pub albedo_texture: Option<TextureId>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            emission: Vec3::ZERO,
            roughness: 0.5,
            opacity: 1.0,
            albedo_texture: None,
        }
    }
}

impl Material {
    /// Creates an opaque material with the given albedo.
    pub fn with_albedo(albedo: Vec3) -> Self {
        Self {
            albedo,
            ..Default::default()
        }
    }

    /// Sets the opacity (builder style).
    pub fn opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    /// Sets the emission color (builder style).
    pub fn emission(mut self, emission: Vec3) -> Self {
        self.emission = emission;
        self
    }

    /// Sets the roughness (builder style).
    pub fn roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    /// Sets the albedo texture (builder style).
    pub fn albedo_texture(mut self, texture: TextureId) -> Self {
        self.albedo_texture = Some(texture);
        self
    }

    /// True when this material belongs in the opaque pass.
    pub fn is_opaque(&self) -> bool {
        self.opacity >= 1.0
    }
}

/// Type-safe handle to a mesh registered in a [`MeshStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) usize);

/// Type-safe handle to a texture registered in a [`MeshStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

/// Owns all meshes and textures referenced by scene nodes.
///
/// Assets are registered once and live until the store is dropped; handles
/// are plain indices and stay valid for the store's lifetime.
#[derive(Default)]
pub struct MeshStore {
    meshes: Vec<Mesh>,
    textures: Vec<Texture>,
}

impl MeshStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mesh and returns its handle.
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        let idx = self.meshes.len();
        self.meshes.push(mesh);
        MeshId(idx)
    }

    /// Registers a texture and returns its handle.
    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        let idx = self.textures.len();
        self.textures.push(texture);
        TextureId(idx)
    }

    /// Looks up a mesh by handle.
    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    /// Looks up a texture by handle.
    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }
}
