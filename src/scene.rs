//! Scene graph: an arena of transformable nodes.
//!
//! The scene is a tree of named nodes, each carrying a local transform and a
//! [`NodeKind`] payload (group, mesh, light or camera). Nodes live in an
//! arena owned by [`Scene`]; the tree structure is expressed with stable
//! [`NodeId`] handles, so per-frame structures like the render list can
//! reference nodes without borrowing into the graph.
//!
//! World matrices are never cached on the nodes: every traversal recomputes
//! them as the running product of ancestor local matrices, so animated
//! transforms are always picked up.
//!
//! # Example
//!
//! ```ignore
//! let mut scene = Scene::new();
//! let sun = scene.add(scene.root(), Node::light("sun", Light::new(
//!     Vec3::ONE, Vec3::splat(0.1),
//! )))?;
//! let cube = scene.add(scene.root(), Node::mesh("cube", cube_id, Material::default())
//!     .with_transform(Mat4::from_translation(Vec3::Y)))?;
//! ```

use glam::{Mat4, Vec3};

use crate::error::SceneError;
use crate::mesh::{Material, MeshId};

/// Stable handle to a node in a [`Scene`] arena.
///
/// Ids stay valid until the node they name is removed; a removed slot may be
/// reused by a later insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Light payload carried by [`NodeKind::Light`] nodes.
///
/// The projection matrix is the one used when rendering the scene from the
/// light's point of view (shadow mapping). The light's position comes from
/// its node's world matrix, not from the payload.
#[derive(Clone, Copy, Debug)]
pub struct Light {
    /// Diffuse/specular color of the light.
    pub color: Vec3,
    /// Ambient contribution added to every lit fragment.
    pub ambient: Vec3,
    /// Projection used for the light's shadow pass.
    pub projection: Mat4,
}

impl Light {
    /// Default extent of the shadow projection box, in world units.
    pub const DEFAULT_SHADOW_EXTENT: f32 = 20.0;

    /// Creates a light with the default orthographic shadow projection.
    pub fn new(color: Vec3, ambient: Vec3) -> Self {
        let e = Self::DEFAULT_SHADOW_EXTENT;
        Self {
            color,
            ambient,
            projection: Mat4::orthographic_rh(-e, e, -e, e, 0.1, 2.0 * e),
        }
    }

    /// Replaces the shadow projection.
    pub fn with_projection(mut self, projection: Mat4) -> Self {
        self.projection = projection;
        self
    }
}

/// Closed set of node payloads.
///
/// Traversal code switches on this tag; there is no runtime type probing
/// anywhere in the engine.
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// A pure transform node with no renderable payload.
    Group,
    /// A drawable mesh instance.
    Mesh {
        /// Handle into the [`MeshStore`](crate::mesh::MeshStore).
        mesh: MeshId,
        /// Surface properties, including the opacity that decides the
        /// opaque/transparent classification.
        material: Material,
    },
    /// A light source.
    Light(Light),
    /// A camera placeholder; traversed for children but never drawn.
    Camera {
        /// Projection associated with this camera node.
        projection: Mat4,
    },
}

/// A single node: name, local transform, payload and children.
#[derive(Clone, Debug)]
pub struct Node {
    /// Display name, used by [`Scene::find_by_name`].
    pub name: String,
    /// Transform relative to the parent node.
    pub local: Mat4,
    /// Payload tag.
    pub kind: NodeKind,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl Node {
    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            local: Mat4::IDENTITY,
            kind,
            children: Vec::new(),
            parent: None,
        }
    }

    /// Creates a transform-only group node.
    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    /// Creates a mesh node.
    pub fn mesh(name: impl Into<String>, mesh: MeshId, material: Material) -> Self {
        Self::new(name, NodeKind::Mesh { mesh, material })
    }

    /// Creates a light node.
    pub fn light(name: impl Into<String>, light: Light) -> Self {
        Self::new(name, NodeKind::Light(light))
    }

    /// Creates a camera node.
    pub fn camera(name: impl Into<String>, projection: Mat4) -> Self {
        Self::new(name, NodeKind::Camera { projection })
    }

    /// Sets the local transform (builder style).
    pub fn with_transform(mut self, local: Mat4) -> Self {
        self.local = local;
        self
    }

    /// Child ids in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Parent id, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

/// Arena-backed scene graph with a single root.
///
/// The root is created by [`Scene::new`] and cannot be removed; every other
/// node is attached under an existing parent with [`Scene::add`]. Removing a
/// node drops its entire subtree.
pub struct Scene {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    root: NodeId,
}

impl Scene {
    /// Creates a scene containing only the root group node.
    pub fn new() -> Self {
        let root = Node::group("root");
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    /// Attaches `node` under `parent` and returns its id.
    pub fn add(&mut self, parent: NodeId, mut node: Node) -> Result<NodeId, SceneError> {
        self.node(parent)?;
        node.parent = Some(parent);
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };
        // parent was validated above
        if let Some(Some(p)) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        Ok(id)
    }

    /// Shared access to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node, SceneError> {
        self.nodes
            .get(id.0)
            .and_then(|slot| slot.as_ref())
            .ok_or(SceneError::InvalidNode(id.0))
    }

    /// Mutable access to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SceneError> {
        self.nodes
            .get_mut(id.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(SceneError::InvalidNode(id.0))
    }

    /// Removes a node and its whole subtree.
    ///
    /// The freed slots may be reused by later insertions; ids into the
    /// removed subtree become invalid.
    pub fn remove(&mut self, id: NodeId) -> Result<(), SceneError> {
        if id == self.root {
            return Err(SceneError::RootRemoval);
        }
        let parent = self.node(id)?.parent;
        if let Some(pid) = parent
            && let Some(Some(p)) = self.nodes.get_mut(pid.0)
        {
            p.children.retain(|c| *c != id);
        }
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(slot) = self.nodes.get_mut(cur.0)
                && let Some(node) = slot.take()
            {
                stack.extend_from_slice(&node.children);
                self.free.push(cur.0);
            }
        }
        Ok(())
    }

    /// Finds the first node with the given name in depth-first pre-order
    /// from the root.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id).ok()?;
            if node.name == name {
                return Some(id);
            }
            // push children reversed so the first child is visited first
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
        None
    }

    /// Computes a node's world matrix by walking its ancestor chain.
    ///
    /// This is the same associative product the per-frame traversal
    /// computes; it is recomputed on every call.
    pub fn world_matrix(&self, id: NodeId) -> Result<Mat4, SceneError> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = self.node(c)?;
            chain.push(node.local);
            cur = node.parent;
        }
        Ok(chain
            .into_iter()
            .rev()
            .fold(Mat4::IDENTITY, |acc, local| acc * local))
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat(t: Vec3) -> Mat4 {
        Mat4::from_translation(t)
    }

    #[test]
    fn find_by_name_is_preorder() {
        let mut scene = Scene::new();
        let a = scene.add(scene.root(), Node::group("a")).unwrap();
        scene.add(a, Node::group("target")).unwrap();
        let b = scene.add(scene.root(), Node::group("b")).unwrap();
        let late = scene.add(b, Node::group("target")).unwrap();

        // the one under "a" comes first in pre-order
        let found = scene.find_by_name("target").unwrap();
        assert_ne!(found, late);
        assert_eq!(scene.node(found).unwrap().parent(), Some(a));
    }

    #[test]
    fn world_matrix_composes_ancestors() {
        let mut scene = Scene::new();
        let a = scene
            .add(
                scene.root(),
                Node::group("a").with_transform(mat(Vec3::new(1.0, 0.0, 0.0))),
            )
            .unwrap();
        let b = scene
            .add(a, Node::group("b").with_transform(mat(Vec3::new(0.0, 2.0, 0.0))))
            .unwrap();

        let world = scene.world_matrix(b).unwrap();
        assert_eq!(
            world,
            mat(Vec3::new(1.0, 0.0, 0.0)) * mat(Vec3::new(0.0, 2.0, 0.0))
        );
    }

    #[test]
    fn remove_drops_subtree_and_invalidates_ids() {
        let mut scene = Scene::new();
        let a = scene.add(scene.root(), Node::group("a")).unwrap();
        let b = scene.add(a, Node::group("b")).unwrap();
        let c = scene.add(b, Node::group("c")).unwrap();
        assert_eq!(scene.len(), 4);

        scene.remove(a).unwrap();
        assert_eq!(scene.len(), 1);
        for id in [a, b, c] {
            assert!(scene.node(id).is_err());
        }
        assert!(scene.node(scene.root()).unwrap().children().is_empty());
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut scene = Scene::new();
        assert_eq!(scene.remove(scene.root()), Err(SceneError::RootRemoval));
    }

    #[test]
    fn stale_id_is_rejected() {
        let mut scene = Scene::new();
        let a = scene.add(scene.root(), Node::group("a")).unwrap();
        scene.remove(a).unwrap();
        assert!(matches!(scene.node(a), Err(SceneError::InvalidNode(_))));
    }
}
