//! Per-frame flattening of the scene graph into an ordered render list.
//!
//! Once per frame the driver resets a [`RenderList`] and feeds it the scene
//! root. The traversal walks the graph depth-first, accumulating world
//! matrices, and partitions every renderable node into one of three blocks:
//!
//! ```text
//! [ lights ][ opaque meshes ][ transparent meshes ]
//! ```
//!
//! The block boundaries are maintained incrementally during insertion, never
//! recomputed by scanning. Lights always go to the very front, opaque meshes
//! right behind the light block, and transparent meshes (material opacity
//! below 1.0) to the back. Within the transparent block the traversal order
//! is preserved; within the opaque block it is reversed, because every solid
//! mesh is inserted at the same fixed offset. That reversal is harmless —
//! opaque draw order is settled by the depth buffer — but it is part of the
//! list's observable contract and the tests pin it down.
//!
//! List entries reference nodes by [`NodeId`], so a built list borrows
//! nothing from the scene; it is valid only for the frame it was built in
//! and must be reset before the next traversal (world matrices are
//! recomputed every frame since nodes may be animated).

use glam::Mat4;

use crate::error::SceneError;
use crate::mesh::{Material, MeshId};
use crate::scene::{Light, NodeId, NodeKind, Scene};

/// One flattened element: an accumulated world matrix plus the handle of
/// the node that produced it.
#[derive(Clone, Copy, Debug)]
pub struct RenderableElem {
    /// Product of every ancestor local matrix and the node's own.
    pub world: Mat4,
    /// The originating node.
    pub node: NodeId,
}

/// Selects which block of the list a query or draw dispatch covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListRange {
    /// Every element.
    All,
    /// The leading light block.
    Lights,
    /// The opaque mesh block.
    Meshes,
    /// The trailing transparent mesh block.
    Transparents,
}

/// A draw call emitted by [`RenderList::draw_calls`].
///
/// The modelview matrix is already composed (`view * world`); this is the
/// only place in the engine where world-space geometry is converted to view
/// space for drawing.
#[derive(Clone, Copy, Debug)]
pub struct DrawCall {
    /// View matrix times the element's world matrix.
    pub modelview: Mat4,
    /// Geometry to draw.
    pub mesh: MeshId,
    /// Surface properties for the shading pass.
    pub material: Material,
}

/// Flat, partitioned sequence of renderable elements for one frame.
#[derive(Default)]
pub struct RenderList {
    elems: Vec<RenderableElem>,
    num_lights: usize,
    num_opaque: usize,
    processed: bool,
}

impl RenderList {
    /// Creates an empty, unprocessed list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all elements and counts.
    ///
    /// Idempotent; must be called before re-traversing a scene, since
    /// [`process`](Self::process) appends to whatever is already here.
    pub fn reset(&mut self) {
        self.elems.clear();
        self.num_lights = 0;
        self.num_opaque = 0;
        self.processed = false;
    }

    /// Traverses the scene depth-first from `root` and appends every
    /// renderable node, partitioned by category.
    ///
    /// The root starts from the identity matrix; every visited node's world
    /// matrix is `parent_world * node.local`. Fails fast on the first
    /// invalid node id without cleaning up already-inserted elements — the
    /// caller must [`reset`](Self::reset) after a failure.
    pub fn process(&mut self, scene: &Scene, root: NodeId) -> Result<(), SceneError> {
        if let Err(err) = self.process_node(scene, root, Mat4::IDENTITY) {
            log::error!("render list traversal failed: {err}");
            return Err(err);
        }
        self.processed = true;
        Ok(())
    }

    fn process_node(
        &mut self,
        scene: &Scene,
        id: NodeId,
        parent_world: Mat4,
    ) -> Result<(), SceneError> {
        let node = scene.node(id)?;
        let world = parent_world * node.local;
        let elem = RenderableElem { world, node: id };

        match &node.kind {
            NodeKind::Light(_) => {
                // Lights lead the whole sequence.
                self.elems.insert(0, elem);
                self.num_lights += 1;
            }
            NodeKind::Mesh { material, .. } => {
                if material.is_opaque() {
                    // Solid meshes slot in right after the light block,
                    // newest first; depth testing makes the order among
                    // them irrelevant.
                    self.elems.insert(self.num_lights, elem);
                    self.num_opaque += 1;
                } else {
                    self.elems.push(elem);
                }
            }
            // Groups and cameras are traversed but never inserted.
            NodeKind::Group | NodeKind::Camera { .. } => {}
        }

        for child in node.children() {
            self.process_node(scene, *child, world)?;
        }
        Ok(())
    }

    /// True once a traversal has completed since the last reset.
    ///
    /// Pipelines refuse to render a list that was never processed.
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// True when no elements have been inserted.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Number of lights (the leading block).
    pub fn num_lights(&self) -> usize {
        self.num_lights
    }

    /// Number of opaque meshes (the middle block).
    pub fn num_opaque(&self) -> usize {
        self.num_opaque
    }

    /// Number of transparent meshes (the trailing block).
    pub fn num_transparent(&self) -> usize {
        self.elems.len() - self.num_lights - self.num_opaque
    }

    /// Half-open index range covered by a category.
    pub fn range(&self, which: ListRange) -> std::ops::Range<usize> {
        match which {
            ListRange::All => 0..self.elems.len(),
            ListRange::Lights => 0..self.num_lights,
            ListRange::Meshes => self.num_lights..self.num_lights + self.num_opaque,
            ListRange::Transparents => self.num_lights + self.num_opaque..self.elems.len(),
        }
    }

    /// The elements of a category, in list order.
    pub fn elems(&self, which: ListRange) -> &[RenderableElem] {
        &self.elems[self.range(which)]
    }

    /// The light payload and flattened element at light index `index`.
    pub fn light(&self, index: usize, scene: &Scene) -> Option<(RenderableElem, Light)> {
        let elem = *self.elems.get(0..self.num_lights)?.get(index)?;
        match scene.node(elem.node).ok()?.kind {
            NodeKind::Light(light) => Some((elem, light)),
            _ => None,
        }
    }

    /// Emits one [`DrawCall`] per mesh element in the selected range, with
    /// the modelview matrix (`view * world`) already composed.
    ///
    /// Non-mesh elements inside the range (lights, when `All` is selected)
    /// are skipped. Elements whose node has been removed since the
    /// traversal are an error: the list is stale.
    pub fn draw_calls(
        &self,
        which: ListRange,
        scene: &Scene,
        view: Mat4,
    ) -> Result<Vec<DrawCall>, SceneError> {
        let mut calls = Vec::with_capacity(self.range(which).len());
        for elem in self.elems(which) {
            if let NodeKind::Mesh { mesh, material } = scene.node(elem.node)?.kind {
                calls.push(DrawCall {
                    modelview: view * elem.world,
                    mesh,
                    material,
                });
            }
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Node;
    use glam::Vec3;

    fn light() -> Light {
        Light::new(Vec3::ONE, Vec3::splat(0.1))
    }

    fn opaque() -> Material {
        Material::default()
    }

    fn glass() -> Material {
        Material::default().opacity(0.5)
    }

    fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    /// Builds a scene with interleaved kinds and checks the partition.
    #[test]
    fn partition_invariant() {
        let mut scene = Scene::new();
        let root = scene.root();
        scene
            .add(root, Node::mesh("glass0", MeshId(0), glass()))
            .unwrap();
        scene.add(root, Node::light("l0", light())).unwrap();
        scene
            .add(root, Node::mesh("solid0", MeshId(1), opaque()))
            .unwrap();
        scene
            .add(root, Node::mesh("glass1", MeshId(2), glass()))
            .unwrap();
        scene.add(root, Node::light("l1", light())).unwrap();
        scene
            .add(root, Node::mesh("solid1", MeshId(3), opaque()))
            .unwrap();

        let mut list = RenderList::new();
        list.process(&scene, root).unwrap();

        assert_eq!(list.len(), 6);
        assert_eq!(list.num_lights(), 2);
        assert_eq!(list.num_opaque(), 2);
        assert_eq!(list.num_transparent(), 2);
        assert_eq!(list.range(ListRange::Lights), 0..2);
        assert_eq!(list.range(ListRange::Meshes), 2..4);
        assert_eq!(list.range(ListRange::Transparents), 4..6);

        for elem in list.elems(ListRange::Lights) {
            assert!(matches!(
                scene.node(elem.node).unwrap().kind,
                NodeKind::Light(_)
            ));
        }
        for elem in list.elems(ListRange::Meshes) {
            let NodeKind::Mesh { material, .. } = scene.node(elem.node).unwrap().kind else {
                panic!("non-mesh in opaque block");
            };
            assert!(material.is_opaque());
        }
        for elem in list.elems(ListRange::Transparents) {
            let NodeKind::Mesh { material, .. } = scene.node(elem.node).unwrap().kind else {
                panic!("non-mesh in transparent block");
            };
            assert!(!material.is_opaque());
        }
    }

    /// Two resets/traversals of the same scene yield identical lists.
    #[test]
    fn reset_then_reprocess_is_identical() {
        let mut scene = Scene::new();
        let root = scene.root();
        let pivot = scene
            .add(root, Node::group("pivot").with_transform(translation(1.0, 0.0, 0.0)))
            .unwrap();
        scene.add(pivot, Node::light("l", light())).unwrap();
        scene
            .add(
                pivot,
                Node::mesh("m", MeshId(0), opaque()).with_transform(translation(0.0, 2.0, 0.0)),
            )
            .unwrap();
        scene
            .add(root, Node::mesh("g", MeshId(1), glass()))
            .unwrap();

        let mut list = RenderList::new();
        list.process(&scene, root).unwrap();
        let first: Vec<_> = list
            .elems(ListRange::All)
            .iter()
            .map(|e| (e.node, e.world))
            .collect();

        list.reset();
        assert!(!list.is_processed());
        assert_eq!(list.len(), 0);
        list.process(&scene, root).unwrap();
        let second: Vec<_> = list
            .elems(ListRange::All)
            .iter()
            .map(|e| (e.node, e.world))
            .collect();

        assert_eq!(first, second);
    }

    /// World matrices are the exact associative product down the chain.
    #[test]
    fn world_matrix_is_ancestor_product() {
        let m0 = translation(1.0, 0.0, 0.0);
        let m1 = Mat4::from_rotation_y(0.7);
        let m2 = Mat4::from_scale(Vec3::new(2.0, 1.0, 0.5));

        let mut scene = Scene::new();
        let a = scene
            .add(scene.root(), Node::group("a").with_transform(m0))
            .unwrap();
        let b = scene.add(a, Node::group("b").with_transform(m1)).unwrap();
        scene
            .add(b, Node::mesh("m", MeshId(0), opaque()).with_transform(m2))
            .unwrap();

        let mut list = RenderList::new();
        list.process(&scene, scene.root()).unwrap();

        assert_eq!(list.elems(ListRange::Meshes)[0].world, m0 * m1 * m2);
    }

    /// One light plus an opaque and a half-transparent mesh.
    #[test]
    fn one_light_two_meshes() {
        let mut scene = Scene::new();
        let root = scene.root();
        scene.add(root, Node::light("sun", light())).unwrap();
        scene
            .add(root, Node::mesh("solid", MeshId(0), opaque()))
            .unwrap();
        scene
            .add(root, Node::mesh("glass", MeshId(1), glass()))
            .unwrap();

        let mut list = RenderList::new();
        list.process(&scene, root).unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list.num_lights(), 1);
        assert_eq!(list.range(ListRange::Meshes), 1..2);
        assert_eq!(list.range(ListRange::Transparents), 2..3);
    }

    /// Opaque siblings end up in reverse traversal order; transparent
    /// siblings keep traversal order.
    #[test]
    fn sibling_order_within_blocks() {
        let mut scene = Scene::new();
        let root = scene.root();
        let s0 = scene
            .add(root, Node::mesh("s0", MeshId(0), opaque()))
            .unwrap();
        let s1 = scene
            .add(root, Node::mesh("s1", MeshId(1), opaque()))
            .unwrap();
        let t0 = scene
            .add(root, Node::mesh("t0", MeshId(2), glass()))
            .unwrap();
        let t1 = scene
            .add(root, Node::mesh("t1", MeshId(3), glass()))
            .unwrap();

        let mut list = RenderList::new();
        list.process(&scene, root).unwrap();

        let opaque_ids: Vec<_> = list.elems(ListRange::Meshes).iter().map(|e| e.node).collect();
        let transparent_ids: Vec<_> = list
            .elems(ListRange::Transparents)
            .iter()
            .map(|e| e.node)
            .collect();
        assert_eq!(opaque_ids, vec![s1, s0]);
        assert_eq!(transparent_ids, vec![t0, t1]);
    }

    /// A stale root id fails the traversal.
    #[test]
    fn invalid_root_fails() {
        let mut scene = Scene::new();
        let a = scene.add(scene.root(), Node::group("a")).unwrap();
        scene.remove(a).unwrap();

        let mut list = RenderList::new();
        assert!(list.process(&scene, a).is_err());
        assert!(!list.is_processed());
    }

    /// Draw calls carry `view * world` and skip non-mesh elements.
    #[test]
    fn draw_calls_compose_modelview() {
        let world = translation(0.0, 0.0, -3.0);
        let view = translation(5.0, 0.0, 0.0);

        let mut scene = Scene::new();
        let root = scene.root();
        scene.add(root, Node::light("l", light())).unwrap();
        scene
            .add(root, Node::mesh("m", MeshId(7), opaque()).with_transform(world))
            .unwrap();

        let mut list = RenderList::new();
        list.process(&scene, root).unwrap();

        let all = list.draw_calls(ListRange::All, &scene, view).unwrap();
        assert_eq!(all.len(), 1); // the light is skipped
        assert_eq!(all[0].mesh, MeshId(7));
        assert_eq!(all[0].modelview, view * world);
    }
}
