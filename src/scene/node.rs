use glam::Affine3A;

use crate::scene::NodeHandle;
use crate::scene::transform::Transform;

/// A scene node: hierarchy links, transform and per-node draw state.
///
/// Drawables and lights live in the scene's component maps keyed by the
/// node's handle, keeping nodes small for the per-frame traversal.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,

    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,

    pub transform: Transform,

    /// Invisible nodes hide their whole subtree from the render list.
    pub visible: bool,
    /// Explicit draw order within a bucket; lower draws first.
    pub render_order: i32,
    /// When set, overrides the group order inherited by every descendant.
    pub group_order: Option<i32>,
}

impl Node {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: Vec::new(),
            transform: Transform::new(),
            visible: true,
            render_order: 0,
            group_order: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        self.transform.world_matrix()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new("Node")
    }
}
