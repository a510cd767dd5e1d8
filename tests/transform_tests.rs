//! Scene graph and transform propagation tests
//!
//! Tests for:
//! - Parent/child world matrix composition
//! - Incremental updates (only stale nodes are recomputed)
//! - Hierarchy edits: attach, detach, cycles, removal
//! - Matrix decomposition round-trips
//! - Camera frustum and depth

use std::f32::consts::FRAC_PI_2;

use glam::{Affine3A, Quat, Vec3};
use prism::errors::PrismError;
use prism::scene::camera::Camera;
use prism::scene::transform::{Transform, decompose};
use prism::scene::{Node, Scene};

// ============================================================================
// Helper
// ============================================================================

const EPSILON: f32 = 1e-5;

fn vec3_approx(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() < EPSILON
}

fn quat_approx(a: Quat, b: Quat) -> bool {
    // q and -q are the same rotation
    a.dot(b).abs() > 1.0 - EPSILON
}

fn node_at(scene: &mut Scene, name: &str, position: Vec3) -> prism::NodeHandle {
    let mut node = Node::new(name);
    node.transform.set_position(position);
    scene.add_node(node)
}

// ============================================================================
// Propagation
// ============================================================================

#[test]
fn child_world_position_composes_parent_translation() {
    let mut scene = Scene::new();
    let parent = node_at(&mut scene, "parent", Vec3::new(5.0, 0.0, 0.0));
    let child = node_at(&mut scene, "child", Vec3::new(1.0, 0.0, 0.0));
    scene.attach(parent, child).unwrap();

    scene.update_world(false);

    let world = scene.get_node(child).unwrap().transform.world_position();
    assert!(vec3_approx(world, Vec3::new(6.0, 0.0, 0.0)));
}

#[test]
fn parent_rotation_rotates_child_offset() {
    let mut scene = Scene::new();
    let parent = scene.create_node("parent");
    let child = node_at(&mut scene, "child", Vec3::new(1.0, 0.0, 0.0));
    scene.attach(parent, child).unwrap();
    scene
        .get_node_mut(parent)
        .unwrap()
        .transform
        .set_rotation(Quat::from_rotation_y(FRAC_PI_2));

    scene.update_world(false);

    // +X rotated a quarter turn about +Y lands on -Z.
    let world = scene.world_position(child).unwrap();
    assert!(vec3_approx(world, Vec3::new(0.0, 0.0, -1.0)));
}

#[test]
fn unchanged_scene_recomputes_nothing() {
    let mut scene = Scene::new();
    let parent = node_at(&mut scene, "parent", Vec3::X);
    let child = node_at(&mut scene, "child", Vec3::Y);
    scene.attach(parent, child).unwrap();

    let first = scene.update_world(false);
    assert_eq!(first.visited, 2);
    assert_eq!(first.world_recomputed, 2);

    let second = scene.update_world(false);
    assert_eq!(second.visited, 2);
    assert_eq!(second.local_recomposed, 0);
    assert_eq!(second.world_recomputed, 0);
}

#[test]
fn moving_parent_recomputes_whole_subtree() {
    let mut scene = Scene::new();
    let parent = node_at(&mut scene, "parent", Vec3::ZERO);
    let child = node_at(&mut scene, "child", Vec3::X);
    let other = node_at(&mut scene, "other", Vec3::Z);
    scene.attach(parent, child).unwrap();
    scene.update_world(false);

    scene
        .get_node_mut(parent)
        .unwrap()
        .transform
        .set_position(Vec3::new(0.0, 3.0, 0.0));
    let stats = scene.update_world(false);

    assert_eq!(stats.local_recomposed, 1);
    assert_eq!(stats.world_recomputed, 2);
    assert!(vec3_approx(
        scene.get_node(child).unwrap().transform.world_position(),
        Vec3::new(1.0, 3.0, 0.0)
    ));
    assert!(vec3_approx(
        scene.get_node(other).unwrap().transform.world_position(),
        Vec3::Z
    ));
}

#[test]
fn forced_update_recomputes_clean_nodes() {
    let mut scene = Scene::new();
    node_at(&mut scene, "a", Vec3::X);
    node_at(&mut scene, "b", Vec3::Y);
    scene.update_world(false);

    let stats = scene.update_world(true);
    assert_eq!(stats.world_recomputed, 2);
}

#[test]
fn world_matrix_query_refreshes_ancestor_chain_only() {
    let mut scene = Scene::new();
    let root = node_at(&mut scene, "root", Vec3::new(2.0, 0.0, 0.0));
    let leaf = node_at(&mut scene, "leaf", Vec3::new(0.0, 2.0, 0.0));
    scene.attach(root, leaf).unwrap();

    // No full update: the query walks the chain itself.
    let position = scene.world_position(leaf).unwrap();
    assert!(vec3_approx(position, Vec3::new(2.0, 2.0, 0.0)));
}

// ============================================================================
// Hierarchy edits
// ============================================================================

#[test]
fn attach_under_own_descendant_fails() {
    let mut scene = Scene::new();
    let a = scene.create_node("a");
    let b = scene.create_node("b");
    let c = scene.create_node("c");
    scene.attach(a, b).unwrap();
    scene.attach(b, c).unwrap();

    let err = scene.attach(c, a).unwrap_err();
    assert!(matches!(err, PrismError::HierarchyCycle { .. }));
    // Hierarchy is unchanged.
    assert_eq!(scene.get_node(a).unwrap().parent(), None);
    assert_eq!(scene.get_node(c).unwrap().parent(), Some(b));
}

#[test]
fn reattach_moves_child_between_parents() {
    let mut scene = Scene::new();
    let first = node_at(&mut scene, "first", Vec3::X);
    let second = node_at(&mut scene, "second", Vec3::Y);
    let child = scene.create_node("child");
    scene.attach(first, child).unwrap();
    scene.attach(second, child).unwrap();

    assert!(scene.get_node(first).unwrap().children().is_empty());
    assert_eq!(scene.get_node(second).unwrap().children(), &[child]);

    scene.update_world(false);
    assert!(vec3_approx(scene.get_node(child).unwrap().transform.world_position(), Vec3::Y));
}

#[test]
fn detach_keeps_local_transform() {
    let mut scene = Scene::new();
    let parent = node_at(&mut scene, "parent", Vec3::new(10.0, 0.0, 0.0));
    let child = node_at(&mut scene, "child", Vec3::new(1.0, 0.0, 0.0));
    scene.attach(parent, child).unwrap();
    scene.update_world(false);

    scene.detach(child).unwrap();
    scene.update_world(false);

    assert!(scene.root_nodes().contains(&child));
    assert!(vec3_approx(
        scene.get_node(child).unwrap().transform.world_position(),
        Vec3::new(1.0, 0.0, 0.0)
    ));
}

#[test]
fn removing_node_promotes_children_to_roots() {
    let mut scene = Scene::new();
    let parent = scene.create_node("parent");
    let child = scene.create_node("child");
    scene.attach(parent, child).unwrap();

    assert!(scene.remove_node(parent).is_some());
    assert!(scene.get_node(parent).is_none());
    assert_eq!(scene.get_node(child).unwrap().parent(), None);
    assert!(scene.root_nodes().contains(&child));

    // Stale handle stays dead.
    assert!(scene.remove_node(parent).is_none());
    assert!(matches!(scene.world_matrix(parent), Err(PrismError::NodeNotFound(_))));
}

// ============================================================================
// Decomposition
// ============================================================================

#[test]
fn decompose_round_trips_trs() {
    let t = Vec3::new(1.0, -2.0, 3.0);
    let r = Quat::from_rotation_x(0.3) * Quat::from_rotation_z(1.1);
    let s = Vec3::new(2.0, 0.5, 3.0);
    let m = Affine3A::from_scale_rotation_translation(s, r, t);

    let (t2, r2, s2) = decompose(&m);
    assert!(vec3_approx(t, t2));
    assert!(quat_approx(r, r2));
    assert!(vec3_approx(s, s2));
}

#[test]
fn decompose_mirrored_matrix_yields_unit_quaternion() {
    let m = Affine3A::from_scale(Vec3::new(-1.0, 1.0, 1.0));
    let (_, r, s) = decompose(&m);

    assert!((r.length() - 1.0).abs() < EPSILON);
    assert!(vec3_approx(s, Vec3::new(-1.0, 1.0, 1.0)));
    let rebuilt = Affine3A::from_scale_rotation_translation(s, r, Vec3::ZERO);
    assert!(rebuilt.abs_diff_eq(m, EPSILON));
}

#[test]
fn set_local_matrix_updates_trs() {
    let mut t = Transform::new();
    let m = Affine3A::from_scale_rotation_translation(
        Vec3::splat(2.0),
        Quat::from_rotation_y(0.5),
        Vec3::new(4.0, 5.0, 6.0),
    );
    t.set_local_matrix(m);

    assert!(vec3_approx(t.position(), Vec3::new(4.0, 5.0, 6.0)));
    assert!(vec3_approx(t.scale(), Vec3::splat(2.0)));
    assert!(quat_approx(t.rotation(), Quat::from_rotation_y(0.5)));
    assert!(t.world_needs_update());
}

#[test]
fn look_at_points_negative_z_at_target() {
    let mut t = Transform::new();
    t.set_position(Vec3::new(0.0, 0.0, 5.0));
    t.look_at(Vec3::ZERO, Vec3::Y);

    let forward = t.rotation() * Vec3::NEG_Z;
    assert!(vec3_approx(forward, Vec3::NEG_Z));
}

// ============================================================================
// Camera
// ============================================================================

#[test]
fn orthographic_camera_culls_outside_volume() {
    let mut cam = Camera::new_orthographic(5.0, 1.0, 0.1, 50.0);
    cam.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
    let view = cam.view();

    assert!(view.frustum.intersects_sphere(Vec3::new(4.0, 0.0, 0.0), 0.5));
    assert!(!view.frustum.intersects_sphere(Vec3::new(8.0, 0.0, 0.0), 0.5));
    assert!(vec3_approx(view.position, Vec3::new(0.0, 0.0, 10.0)));
}
