//! Transform System
//!
//! Walks the node hierarchy and refreshes world matrices. Kept apart from
//! [`Scene`](crate::scene::Scene) so it only borrows the node map and the
//! root list.
//!
//! Traversal uses an explicit stack of `(node, parent world, forced)` so deep
//! hierarchies cannot overflow the call stack. A node is visited at most once
//! per pass, and its world matrix is recomputed only when it was flagged or an
//! ancestor's world matrix changed in the same pass.

use glam::Affine3A;
use slotmap::SlotMap;

use crate::scene::NodeHandle;
use crate::scene::node::Node;

/// Work done by one update pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransformStats {
    pub visited: usize,
    pub local_recomposed: usize,
    pub world_recomputed: usize,
}

impl std::ops::AddAssign for TransformStats {
    fn add_assign(&mut self, rhs: Self) {
        self.visited += rhs.visited;
        self.local_recomposed += rhs.local_recomposed;
        self.world_recomputed += rhs.world_recomputed;
    }
}

/// Updates every tree rooted at `roots`.
pub fn update_hierarchy(
    nodes: &mut SlotMap<NodeHandle, Node>,
    roots: &[NodeHandle],
    force: bool,
) -> TransformStats {
    let mut stack: Vec<(NodeHandle, Option<Affine3A>, bool)> = Vec::with_capacity(64);
    for &root in roots.iter().rev() {
        stack.push((root, None, force));
    }
    run(nodes, &mut stack)
}

/// Updates the subtree under `root`, reading the parent's world matrix as it
/// currently stands.
pub fn update_subtree(
    nodes: &mut SlotMap<NodeHandle, Node>,
    root: NodeHandle,
    force: bool,
) -> TransformStats {
    let parent_world = nodes
        .get(root)
        .and_then(|n| n.parent)
        .and_then(|p| nodes.get(p))
        .map(|p| *p.world_matrix());
    let mut stack = vec![(root, parent_world, force)];
    run(nodes, &mut stack)
}

/// Brings the world matrix of `handle` up to date by walking its ancestor
/// chain from the top. Siblings and descendants are not visited; any node on
/// the chain that recomputes flags its children so the next full pass still
/// refreshes them.
pub fn update_ancestors(nodes: &mut SlotMap<NodeHandle, Node>, handle: NodeHandle) -> TransformStats {
    let mut chain = Vec::new();
    let mut cursor = Some(handle);
    while let Some(h) = cursor {
        let Some(node) = nodes.get(h) else { break };
        chain.push(h);
        cursor = node.parent;
    }

    let mut stats = TransformStats::default();
    let mut parent_world: Option<Affine3A> = None;
    let mut force = false;
    for &h in chain.iter().rev() {
        let Some(node) = nodes.get_mut(h) else { break };
        stats.visited += 1;
        if node.transform.auto_update && node.transform.compose_local() {
            stats.local_recomposed += 1;
        }
        if node.transform.update_world(parent_world.as_ref(), force) {
            stats.world_recomputed += 1;
            force = true;
            let children = node.children.clone();
            for c in children {
                if let Some(child) = nodes.get_mut(c) {
                    child.transform.mark_world_dirty();
                }
            }
        }
        parent_world = nodes.get(h).map(|n| *n.world_matrix());
    }
    stats
}

fn run(
    nodes: &mut SlotMap<NodeHandle, Node>,
    stack: &mut Vec<(NodeHandle, Option<Affine3A>, bool)>,
) -> TransformStats {
    let mut stats = TransformStats::default();

    while let Some((handle, parent_world, force)) = stack.pop() {
        let Some(node) = nodes.get_mut(handle) else {
            continue;
        };
        stats.visited += 1;

        if node.transform.auto_update && node.transform.compose_local() {
            stats.local_recomposed += 1;
        }
        let recomputed = node.transform.update_world(parent_world.as_ref(), force);
        if recomputed {
            stats.world_recomputed += 1;
        }

        let world = *node.transform.world_matrix();
        let child_force = force || recomputed;

        let Some(node) = nodes.get(handle) else {
            continue;
        };
        for &child in node.children.iter().rev() {
            let Some(c) = nodes.get(child) else { continue };
            if c.transform.auto_update || child_force {
                stack.push((child, Some(world), child_force));
            }
        }
    }

    stats
}
