//! Error types for scene traversal and rendering.

use thiserror::Error;

/// Errors produced while building or traversing a scene.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    /// A `NodeId` that does not name a live node in this scene.
    #[error("invalid node id {0}")]
    InvalidNode(usize),
    /// A structural operation that would detach the root.
    #[error("the scene root cannot be removed")]
    RootRemoval,
}

/// Errors produced by the rendering pipelines.
///
/// Resource exhaustion inside the transparency arena is deliberately *not*
/// represented here: overflowing fragments are dropped on the GPU as a
/// bounded-memory approximation, never surfaced as an error.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A render list that has not been processed since its last reset.
    #[error("render list has not been processed")]
    UnprocessedList,
    /// A size-dependent GPU resource could not be (re)built.
    #[error("resource initialization failed: {0}")]
    ResourceInit(String),
    /// The scene referenced by the list failed to resolve.
    #[error(transparent)]
    Scene(#[from] SceneError),
}
