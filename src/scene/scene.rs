use glam::{Affine3A, Quat, Vec3};
use slotmap::{SlotMap, SparseSecondaryMap};

use crate::errors::{PrismError, Result};
use crate::scene::NodeHandle;
use crate::scene::drawable::Drawable;
use crate::scene::light::Light;
use crate::scene::node::Node;
use crate::scene::transform::decompose;
use crate::scene::transform_system::{self, TransformStats};

/// Scene graph: node hierarchy plus drawable and light components.
///
/// Nodes are stored in a generational slotmap; parents hold child handles and
/// children hold a non-owning parent handle. Removing a node never removes its
/// children implicitly.
#[derive(Debug, Default)]
pub struct Scene {
    nodes: SlotMap<NodeHandle, Node>,
    root_nodes: Vec<NodeHandle>,

    pub drawables: SparseSecondaryMap<NodeHandle, Drawable>,
    pub lights: SparseSecondaryMap<NodeHandle, Light>,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Adds a node as a new root.
    pub fn add_node(&mut self, node: Node) -> NodeHandle {
        let handle = self.nodes.insert(node);
        self.root_nodes.push(handle);
        handle
    }

    pub fn create_node(&mut self, name: &str) -> NodeHandle {
        self.add_node(Node::new(name))
    }

    /// Creates a node carrying a drawable.
    pub fn add_drawable(&mut self, name: &str, drawable: Drawable) -> NodeHandle {
        let handle = self.create_node(name);
        self.drawables.insert(handle, drawable);
        handle
    }

    /// Creates a node carrying a light.
    pub fn add_light(&mut self, name: &str, light: Light) -> NodeHandle {
        let handle = self.create_node(name);
        self.lights.insert(handle, light);
        handle
    }

    #[must_use]
    pub fn get_node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    pub fn get_node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    #[must_use]
    pub fn root_nodes(&self) -> &[NodeHandle] {
        &self.root_nodes
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.nodes.iter()
    }

    fn describe(&self, handle: NodeHandle) -> String {
        match self.nodes.get(handle) {
            Some(node) => format!("'{}' ({handle:?})", node.name),
            None => format!("{handle:?}"),
        }
    }

    fn require(&self, handle: NodeHandle) -> Result<&Node> {
        self.nodes
            .get(handle)
            .ok_or_else(|| PrismError::NodeNotFound(format!("{handle:?}")))
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Makes `child` the last child of `parent`, detaching it from any previous
    /// parent first.
    ///
    /// Fails with [`PrismError::HierarchyCycle`] if `child` is `parent` or one
    /// of its ancestors. Matrices are not recomputed until the next update.
    pub fn attach(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<()> {
        self.require(parent)?;
        self.require(child)?;

        let mut cursor = Some(parent);
        while let Some(h) = cursor {
            if h == child {
                return Err(PrismError::HierarchyCycle {
                    parent: self.describe(parent),
                    child: self.describe(child),
                });
            }
            cursor = self.nodes.get(h).and_then(|n| n.parent);
        }

        self.unlink(child);

        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = Some(parent);
            c.transform.mark_world_dirty();
        }
        Ok(())
    }

    /// Turns `child` into a root, keeping its local transform.
    pub fn detach(&mut self, child: NodeHandle) -> Result<()> {
        let node = self.require(child)?;
        if node.parent.is_none() {
            return Ok(());
        }
        self.unlink(child);
        self.root_nodes.push(child);
        if let Some(c) = self.nodes.get_mut(child) {
            c.transform.mark_world_dirty();
        }
        Ok(())
    }

    /// Removes `child` from its parent's child list (or the root list).
    fn unlink(&mut self, child: NodeHandle) {
        let parent = self.nodes.get(child).and_then(|n| n.parent);
        match parent {
            Some(p) => {
                if let Some(pn) = self.nodes.get_mut(p) {
                    pn.children.retain(|&c| c != child);
                }
            }
            None => self.root_nodes.retain(|&r| r != child),
        }
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = None;
        }
    }

    /// Removes a node and its components. Its children become roots.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Option<Node> {
        if !self.nodes.contains_key(handle) {
            return None;
        }
        self.unlink(handle);

        let children = self
            .nodes
            .get(handle)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for c in children {
            if let Some(child) = self.nodes.get_mut(c) {
                child.parent = None;
                child.transform.mark_world_dirty();
                self.root_nodes.push(c);
            }
        }

        self.drawables.remove(handle);
        self.lights.remove(handle);
        let mut node = self.nodes.remove(handle)?;
        node.children.clear();
        Some(node)
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// Refreshes world matrices across the whole scene.
    pub fn update_world(&mut self, force: bool) -> TransformStats {
        transform_system::update_hierarchy(&mut self.nodes, &self.root_nodes, force)
    }

    /// Refreshes world matrices below (and including) `root`.
    pub fn update_subtree(&mut self, root: NodeHandle, force: bool) -> TransformStats {
        transform_system::update_subtree(&mut self.nodes, root, force)
    }

    /// World matrix after bringing the ancestor chain up to date.
    pub fn world_matrix(&mut self, handle: NodeHandle) -> Result<Affine3A> {
        self.require(handle)?;
        transform_system::update_ancestors(&mut self.nodes, handle);
        Ok(*self.require(handle)?.world_matrix())
    }

    pub fn world_position(&mut self, handle: NodeHandle) -> Result<Vec3> {
        Ok(self.world_matrix(handle)?.translation.into())
    }

    pub fn world_quaternion(&mut self, handle: NodeHandle) -> Result<Quat> {
        Ok(decompose(&self.world_matrix(handle)?).1)
    }

    pub fn world_scale(&mut self, handle: NodeHandle) -> Result<Vec3> {
        Ok(decompose(&self.world_matrix(handle)?).2)
    }
}
