//! Render List Builder
//!
//! Walks the scene once per frame, culls drawables against the view
//! frustum and sorts the survivors into three buckets:
//!
//! - **opaque**: front-to-back, grouped by material to limit rebinding;
//! - **transmissive**: `transmission > 0`, back-to-front;
//! - **transparent**: back-to-front.
//!
//! Bucket vectors are cleared, not freed, between frames. Every sort key
//! ends in `(node id, group index)`, which is unique per entry, so orders
//! are total and identical across rebuilds of an unchanged scene.

use std::cmp::Ordering;

use glam::{Affine3A, Vec3};
use slotmap::Key;

use crate::assets::{AssetStore, GeometryHandle, MaterialHandle};
use crate::scene::camera::CameraView;
use crate::scene::drawable::DrawableKind;
use crate::scene::{NodeHandle, Scene};

/// One draw: a drawable node, or one group of a grouped geometry.
#[derive(Debug, Clone)]
pub struct RenderItem {
    pub node: NodeHandle,
    pub kind: DrawableKind,
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
    /// Index into the geometry's groups; `None` draws the whole draw range.
    pub group: Option<u32>,
    pub render_order: i32,
    /// Inherited from the nearest ancestor carrying a group order.
    pub group_order: i32,
    /// View-space distance of the bounding-sphere center.
    pub depth: f32,
    pub world: Affine3A,
    pub instance_count: u32,
}

impl RenderItem {
    fn node_id(&self) -> u64 {
        self.node.data().as_ffi()
    }

    fn material_id(&self) -> u64 {
        self.material.data().as_ffi()
    }

    fn group_index(&self) -> u32 {
        self.group.map_or(0, |g| g + 1)
    }
}

/// Opaque order: group order, render order, material, front-to-back depth,
/// node, group.
#[must_use]
pub fn opaque_order(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(a.material_id().cmp(&b.material_id()))
        .then(a.depth.total_cmp(&b.depth))
        .then(a.node_id().cmp(&b.node_id()))
        .then(a.group_index().cmp(&b.group_index()))
}

/// Transparent and transmissive order: group order, render order,
/// back-to-front depth, node, group.
#[must_use]
pub fn transparent_order(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(b.depth.total_cmp(&a.depth))
        .then(a.node_id().cmp(&b.node_id()))
        .then(a.group_index().cmp(&b.group_index()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CullStats {
    pub nodes_visited: u32,
    pub drawables: u32,
    pub culled: u32,
    /// Drawables kept because their bounds could not be tested.
    pub unbounded: u32,
    pub skipped: u32,
}

#[derive(Debug, Default)]
pub struct RenderList {
    pub opaque: Vec<RenderItem>,
    pub transmissive: Vec<RenderItem>,
    pub transparent: Vec<RenderItem>,
    /// Light nodes in visible subtrees.
    pub lights: Vec<NodeHandle>,
    stack: Vec<(NodeHandle, i32)>,
    stats: CullStats,
}

impl RenderList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transmissive.clear();
        self.transparent.clear();
        self.lights.clear();
        self.stack.clear();
        self.stats = CullStats::default();
    }

    /// Rebuilds the list. World matrices must already be current.
    pub fn build(&mut self, scene: &Scene, assets: &AssetStore, camera: &CameraView) {
        self.clear();

        for &root in scene.root_nodes().iter().rev() {
            self.stack.push((root, 0));
        }

        while let Some((handle, inherited_group)) = self.stack.pop() {
            let Some(node) = scene.get_node(handle) else {
                continue;
            };
            if !node.visible {
                continue;
            }
            self.stats.nodes_visited += 1;
            let group_order = node.group_order.unwrap_or(inherited_group);

            if scene.lights.contains_key(handle) {
                self.lights.push(handle);
            }
            if scene.drawables.contains_key(handle) {
                self.push_drawable(scene, assets, camera, handle, group_order);
            }

            for &child in node.children().iter().rev() {
                self.stack.push((child, group_order));
            }
        }
    }

    fn push_drawable(
        &mut self,
        scene: &Scene,
        assets: &AssetStore,
        camera: &CameraView,
        handle: NodeHandle,
        group_order: i32,
    ) {
        let (Some(node), Some(drawable)) = (scene.get_node(handle), scene.drawables.get(handle)) else {
            return;
        };
        self.stats.drawables += 1;

        let Some(geometry) = assets.geometries.get(drawable.geometry) else {
            log::warn!("Node '{}' references a missing geometry; skipped", node.name);
            self.stats.skipped += 1;
            return;
        };
        let world = *node.world_matrix();

        let sphere = match geometry.ensure_bounding_sphere() {
            Ok(s) if !s.is_degenerate() => Some(s.transform(&world)),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Node '{}' has no usable bounds ({e}); drawn unculled", node.name);
                None
            }
        };

        match sphere {
            Some(s) if drawable.frustum_culled && drawable.instance_count <= 1 => {
                if !camera.frustum.intersects_sphere(s.center, s.radius) {
                    self.stats.culled += 1;
                    return;
                }
            }
            Some(_) => {}
            None => self.stats.unbounded += 1,
        }

        let center = sphere.map_or_else(|| Vec3::from(world.translation), |s| s.center);
        let depth = camera.depth_of(center);

        let groups = geometry.groups();
        if groups.is_empty() {
            if let Some(material) = drawable.primary_material() {
                self.push_item(assets, RenderItem {
                    node: handle,
                    kind: drawable.kind,
                    geometry: drawable.geometry,
                    material,
                    group: None,
                    render_order: node.render_order,
                    group_order,
                    depth,
                    world,
                    instance_count: drawable.instance_count,
                });
            }
            return;
        }

        for (index, group) in groups.iter().enumerate() {
            let Some(material) = drawable.material_for(group.material_index) else {
                log::warn!(
                    "Node '{}' group {index} uses material index {} with {} materials; skipped",
                    node.name,
                    group.material_index,
                    drawable.materials.len()
                );
                continue;
            };
            self.push_item(assets, RenderItem {
                node: handle,
                kind: drawable.kind,
                geometry: drawable.geometry,
                material,
                group: Some(index as u32),
                render_order: node.render_order,
                group_order,
                depth,
                world,
                instance_count: drawable.instance_count,
            });
        }
    }

    fn push_item(&mut self, assets: &AssetStore, item: RenderItem) {
        let Some(material) = assets.materials.get(item.material) else {
            log::warn!("Missing material {:?}; draw skipped", item.material);
            self.stats.skipped += 1;
            return;
        };
        if !material.visible() {
            return;
        }
        if material.is_transmissive() {
            self.transmissive.push(item);
        } else if material.transparent() {
            self.transparent.push(item);
        } else {
            self.opaque.push(item);
        }
    }

    /// Sorts every bucket by its total order.
    pub fn sort(&mut self) {
        self.opaque.sort_unstable_by(opaque_order);
        self.transmissive.sort_unstable_by(transparent_order);
        self.transparent.sort_unstable_by(transparent_order);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transmissive.len() + self.transparent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All items in submission order: opaque, transmissive, transparent.
    pub fn iter(&self) -> impl Iterator<Item = &RenderItem> {
        self.opaque
            .iter()
            .chain(&self.transmissive)
            .chain(&self.transparent)
    }

    #[must_use]
    pub fn stats(&self) -> CullStats {
        self.stats
    }
}
