//! Geometry tests
//!
//! Tests for:
//! - Index width selection
//! - Bounding box / sphere computation and their failure modes
//! - Layout vs. data versioning
//! - Draw range and group resolution
//! - Index validation at the call site
//! - Validation and non-indexed expansion
//! - Morph target mode
//! - Derived normals

use glam::{Vec2, Vec3};
use wgpu::IndexFormat;

use prism::errors::PrismError;
use prism::resources::geometry::{Attribute, Geometry, NORMAL, POSITION, UV};

// ============================================================================
// Helper
// ============================================================================

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

fn vec3_approx(a: Vec3, b: Vec3) -> bool {
    approx(a.x, b.x) && approx(a.y, b.y) && approx(a.z, b.z)
}

fn triangle() -> Geometry {
    let mut geo = Geometry::new();
    geo.set_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)]),
    );
    geo
}

fn quad() -> Geometry {
    let mut geo = Geometry::new();
    geo.set_attribute(
        POSITION,
        Attribute::from_vec3(&[
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ]),
    );
    geo.set_attribute(
        UV,
        Attribute::from_vec2(&[Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]),
    );
    geo.set_index(&[0, 1, 2, 0, 2, 3]).unwrap();
    geo
}

// ============================================================================
// Index width
// ============================================================================

#[test]
fn small_indices_use_16_bits() {
    let mut geo = Geometry::new();
    geo.set_index(&[0, 1, 2, 100]).unwrap();

    let index = geo.index().unwrap();
    assert_eq!(index.format, IndexFormat::Uint16);
    assert_eq!(index.stride(), 2);
    assert_eq!(index.values(), vec![0, 1, 2, 100]);
}

#[test]
fn index_above_u16_range_switches_to_32_bits() {
    let mut geo = Geometry::new();
    geo.set_index(&[0, 70_000, 1]).unwrap();

    let index = geo.index().unwrap();
    assert_eq!(index.format, IndexFormat::Uint32);
    assert_eq!(index.buffer.byte_len(), 12);
    assert_eq!(index.values(), vec![0, 70_000, 1]);
}

#[test]
fn index_width_change_bumps_layout_version() {
    let mut geo = Geometry::new();
    geo.set_index(&[0, 1, 2]).unwrap();
    let layout = geo.layout_version();

    geo.set_index(&[2, 1, 0]).unwrap();
    assert_eq!(geo.layout_version(), layout);

    geo.set_index(&[0, 1, 70_000]).unwrap();
    assert!(geo.layout_version() > layout);
}

// ============================================================================
// Bounding volumes
// ============================================================================

#[test]
fn bounding_volumes_of_triangle() {
    let geo = triangle();

    let bbox = geo.compute_bounding_box().unwrap();
    assert!(vec3_approx(bbox.min, Vec3::ZERO));
    assert!(vec3_approx(bbox.max, Vec3::new(2.0, 2.0, 0.0)));

    let sphere = geo.compute_bounding_sphere().unwrap();
    assert!(vec3_approx(sphere.center, Vec3::new(1.0, 1.0, 0.0)));
    assert!(approx(sphere.radius, 2f32.sqrt()));
}

#[test]
fn bounds_are_cached_until_positions_change() {
    let mut geo = triangle();
    assert!(geo.bounding_sphere().is_none());

    geo.ensure_bounding_sphere().unwrap();
    assert!(geo.bounding_sphere().is_some());

    geo.mark_attribute_dirty(UV);
    assert!(geo.bounding_sphere().is_some());

    geo.mark_attribute_dirty(POSITION);
    assert!(geo.bounding_sphere().is_none());
}

#[test]
fn bounds_without_position_fail() {
    let mut geo = Geometry::new();
    geo.set_attribute(NORMAL, Attribute::from_vec3(&[Vec3::Z]));

    let err = geo.compute_bounding_sphere().unwrap_err();
    assert!(matches!(err, PrismError::MissingAttribute(name) if name == POSITION));
}

#[test]
fn non_finite_positions_fail_bounds() {
    let mut geo = Geometry::new();
    geo.set_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::ZERO, Vec3::new(f32::NAN, 0.0, 0.0)]),
    );

    assert!(matches!(
        geo.compute_bounding_box(),
        Err(PrismError::NonFiniteBounds(_))
    ));
}

#[test]
fn out_of_range_index_is_rejected_by_set_index() {
    let mut geo = triangle();
    geo.set_index(&[0, 1, 2]).unwrap();
    let data = geo.data_version();

    let err = geo.set_index(&[0, 1, 7]).unwrap_err();
    assert!(matches!(
        err,
        PrismError::IndexOutOfRange {
            index: 7,
            at: 2,
            vertex_count: 3
        }
    ));
    // The previous index buffer stays in place.
    assert_eq!(geo.index().unwrap().values(), vec![0, 1, 2]);
    assert_eq!(geo.data_version(), data);
}

#[test]
fn out_of_range_index_fails_bounds() {
    // Indices set before the positions are only checked later.
    let mut geo = Geometry::new();
    geo.set_index(&[0, 1, 7]).unwrap();
    geo.set_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::ZERO, Vec3::X, Vec3::Y]),
    );

    let err = geo.compute_bounding_box().unwrap_err();
    assert!(matches!(
        err,
        PrismError::IndexOutOfRange {
            index: 7,
            at: 2,
            vertex_count: 3
        }
    ));
}

#[test]
fn indexed_bounds_only_cover_referenced_vertices() {
    let mut geo = Geometry::new();
    geo.set_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::splat(100.0)]),
    );
    geo.set_index(&[0, 1, 2]).unwrap();

    let bbox = geo.compute_bounding_box().unwrap();
    assert!(vec3_approx(bbox.max, Vec3::new(1.0, 1.0, 0.0)));
}

#[test]
fn relative_morph_targets_extend_bounds() {
    let mut geo = triangle();
    geo.set_morph_targets_relative(true);
    geo.add_morph_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::ZERO]),
    );

    let bbox = geo.compute_bounding_box().unwrap();
    assert!(approx(bbox.max.z, 4.0));
    assert_eq!(geo.morph_target_count(), 1);
}

#[test]
fn empty_position_gives_degenerate_sphere() {
    let mut geo = Geometry::new();
    geo.set_attribute(POSITION, Attribute::from_vec3(&[]));

    let sphere = geo.compute_bounding_sphere().unwrap();
    assert!(sphere.is_degenerate());
}

// ============================================================================
// Versions
// ============================================================================

#[test]
fn same_format_attribute_swap_keeps_layout() {
    let mut geo = triangle();
    let layout = geo.layout_version();
    let data = geo.data_version();

    geo.set_attribute(POSITION, Attribute::from_vec3(&[Vec3::ONE; 3]));
    assert_eq!(geo.layout_version(), layout);
    assert!(geo.data_version() > data);

    geo.set_attribute(POSITION, Attribute::from_f32(&[0.0; 6], 2));
    assert!(geo.layout_version() > layout);
}

#[test]
fn adding_and_removing_attributes_changes_layout() {
    let mut geo = triangle();
    let layout = geo.layout_version();

    geo.set_attribute(NORMAL, Attribute::from_vec3(&[Vec3::Z; 3]));
    let with_normal = geo.layout_version();
    assert!(with_normal > layout);

    assert!(geo.remove_attribute(NORMAL).is_some());
    assert!(geo.layout_version() > with_normal);
    assert!(geo.remove_attribute(NORMAL).is_none());
}

// ============================================================================
// Draw ranges
// ============================================================================

#[test]
fn draw_range_is_clipped_to_available_elements() {
    let mut geo = quad();
    assert_eq!(geo.resolve_range(None), 0..6);

    geo.set_draw_range(3, 100);
    assert_eq!(geo.resolve_range(None), 3..6);
}

#[test]
fn group_range_intersects_draw_range() {
    let mut geo = quad();
    geo.add_group(0, 3, 0);
    geo.add_group(3, 3, 1);
    geo.set_draw_range(2, 2);

    let groups = geo.groups().to_vec();
    assert_eq!(geo.resolve_range(Some(&groups[0])), 2..3);
    assert_eq!(geo.resolve_range(Some(&groups[1])), 3..4);
}

#[test]
fn disjoint_group_resolves_to_empty_range() {
    let mut geo = quad();
    geo.add_group(4, 2, 0);
    geo.set_draw_range(0, 3);

    let group = geo.groups()[0];
    assert!(geo.resolve_range(Some(&group)).is_empty());
}

// ============================================================================
// Validation and expansion
// ============================================================================

#[test]
fn mismatched_attribute_counts_fail_validation() {
    let mut geo = triangle();
    geo.set_attribute(UV, Attribute::from_vec2(&[Vec2::ZERO, Vec2::ONE]));

    let err = geo.validate().unwrap_err();
    assert!(matches!(
        err,
        PrismError::AttributeCountMismatch { count: 2, expected: 3, .. }
    ));
}

#[test]
fn instanced_attributes_are_exempt_from_vertex_count() {
    let mut geo = triangle();
    geo.set_attribute("offset", Attribute::from_vec3(&[Vec3::X; 10]).instanced());
    geo.validate().unwrap();
}

#[test]
fn validation_catches_index_edited_in_place() {
    let geo = quad();
    geo.validate().unwrap();

    // Writing through the shared buffer bumps its version, so the cached
    // result is not reused.
    geo.index().unwrap().buffer.write_range(0, &[9u16]);
    assert!(matches!(
        geo.validate(),
        Err(PrismError::IndexOutOfRange { index: 9, .. })
    ));
}

#[test]
fn to_non_indexed_expands_every_attribute() {
    let geo = quad();
    let flat = geo.to_non_indexed().unwrap();

    assert!(flat.index().is_none());
    assert_eq!(flat.vertex_count(), 6);
    let position = flat.get_attribute(POSITION).unwrap();
    assert!(vec3_approx(position.get_vec3(3), Vec3::new(-1.0, -1.0, 0.0)));
    assert!(vec3_approx(position.get_vec3(5), Vec3::new(-1.0, 1.0, 0.0)));

    let uv = flat.get_attribute(UV).unwrap();
    assert_eq!(uv.count, 6);
    assert!(approx(uv.get_x(2), 1.0) && approx(uv.get_y(2), 1.0));
    flat.validate().unwrap();
}

#[test]
fn to_non_indexed_reports_short_attribute() {
    let mut geo = triangle();
    geo.set_attribute(UV, Attribute::from_vec2(&[Vec2::ZERO, Vec2::ONE]));
    geo.set_index(&[0, 1, 2]).unwrap();

    let err = geo.to_non_indexed().unwrap_err();
    assert!(matches!(
        err,
        PrismError::AttributeCountMismatch { name, count: 2, expected: 3 } if name == UV
    ));
}

#[test]
fn to_non_indexed_reports_short_morph_target() {
    let mut geo = triangle();
    geo.add_morph_attribute(POSITION, Attribute::from_vec3(&[Vec3::Z]));
    geo.set_index(&[0, 2, 1]).unwrap();

    assert!(matches!(
        geo.to_non_indexed(),
        Err(PrismError::AttributeCountMismatch { count: 1, expected: 3, .. })
    ));
}

#[test]
fn to_non_indexed_gathers_morph_targets() {
    let mut geo = triangle();
    geo.set_morph_targets_relative(true);
    geo.add_morph_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::X, Vec3::Y, Vec3::Z]),
    );
    geo.set_index(&[2, 0, 1]).unwrap();

    let flat = geo.to_non_indexed().unwrap();
    assert!(flat.morph_targets_relative());
    let target = &flat.morph_attributes(POSITION)[0];
    assert_eq!(target.count, 3);
    assert!(vec3_approx(target.get_vec3(0), Vec3::Z));
    assert!(vec3_approx(target.get_vec3(1), Vec3::X));
}

#[test]
fn morph_mode_toggle_changes_layout_and_bounds() {
    let mut geo = triangle();
    geo.add_morph_attribute(
        POSITION,
        Attribute::from_vec3(&[Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO]),
    );
    // Absolute: the second vertex moves to x = 5. Relative: to x = 2 + 5.
    let absolute = geo.compute_bounding_box().unwrap();
    assert!(approx(absolute.max.x, 5.0));
    let layout = geo.layout_version();

    geo.set_morph_targets_relative(true);
    assert!(geo.layout_version() > layout);
    assert!(geo.bounding_box().is_none());

    let relative = geo.compute_bounding_box().unwrap();
    assert!(approx(relative.max.x, 7.0));

    let toggled = geo.layout_version();
    geo.set_morph_targets_relative(true);
    assert_eq!(geo.layout_version(), toggled);
}

#[test]
fn to_non_indexed_on_flat_geometry_reports_not_indexed() {
    assert!(matches!(triangle().to_non_indexed(), Err(PrismError::NotIndexed)));
}

#[test]
fn vertex_normals_of_ccw_triangle_face_positive_z() {
    let mut geo = triangle();
    geo.compute_vertex_normals().unwrap();

    let normals = geo.get_attribute(NORMAL).unwrap();
    for i in 0..3 {
        assert!(vec3_approx(normals.get_vec3(i), Vec3::Z));
    }
}
