//! # Veil
//!
//! **A forward-rendering 3D engine with order-independent transparency.**
//!
//! Veil keeps a scene graph, flattens it once per frame into a partitioned
//! render list, and pushes that list through a fixed set of wgpu pipelines:
//! shadow mapping, a per-light forward pass for opaque meshes, per-pixel
//! linked-list transparency, and a fullscreen composite.
//!
//! ## Quick Start
//!
//! ```ignore
//! use veil::*;
//!
//! // Setup: scene, assets, pipelines.
//! let mut store = MeshStore::new();
//! let cube = store.add_mesh(Mesh::cube(&gpu));
//!
//! let mut scene = Scene::new();
//! scene.add(scene.root(), Node::light("sun", Light::new(Vec3::ONE, Vec3::splat(0.1))))?;
//! scene.add(scene.root(), Node::mesh("glass", cube, Material::default().opacity(0.4)))?;
//!
//! let mut targets = SceneTargets::new(&gpu);
//! let mut forward = ForwardPipeline::new(&gpu);
//! let mut oit = OitPipeline::new(&gpu);
//! let fullscreen = FullscreenPipeline::new(&gpu);
//! let mut list = RenderList::new();
//!
//! // Each frame: traverse, then render in fixed order.
//! list.reset();
//! list.process(&scene, scene.root())?;
//! forward.render(&mut ctx, &camera, &list, &targets)?;
//! oit.render(&mut ctx, &camera, &list, &targets)?;
//! fullscreen.render(&mut ctx, &targets.color_view, &swapchain_view);
//! ```
//!
//! The `orbit` demo (`cargo run --example orbit`) is a complete frame
//! driver with an orbit camera and runtime toggles.
//!
//! ## Design
//!
//! - **No hidden state** — the active camera, targets and scene are
//!   threaded explicitly through every render call; pipelines own only
//!   their GPU resources.
//! - **Handles over references** — per-frame structures address scene
//!   nodes and meshes through stable ids, never borrows.
//! - **Bounded transparency** — the per-pixel fragment arena and resolve
//!   depth are fixed budgets; overflow degrades output, never correctness
//!   or memory.

mod camera;
mod error;
mod gpu;
mod mesh;
mod pipeline;
mod render_list;
mod scene;
mod texture;

pub use camera::Camera;
pub use error::{RenderError, SceneError};
pub use gpu::GpuContext;
pub use mesh::{Material, Mesh, MeshId, MeshStore, TextureId, Vertex3d};
pub use pipeline::{
    ForwardPipeline, FullscreenPipeline, OitPipeline, RenderContext, SceneTargets, ShadowPipeline,
};
pub use render_list::{DrawCall, ListRange, RenderList, RenderableElem};
pub use scene::{Light, Node, NodeId, NodeKind, Scene};
pub use texture::Texture;

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
