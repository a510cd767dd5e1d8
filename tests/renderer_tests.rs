//! Frame renderer tests
//!
//! Tests for:
//! - A full frame against the headless device
//! - Redundant state and uniform elision on unchanged frames
//! - Transient device faults skip one draw, other errors abort the frame
//! - Settings changes, geometry permutation changes and disposal

use glam::{Mat4, Vec3, Vec4};

use prism::errors::PrismError;
use prism::renderer::device::{DeviceLimits, HeadlessDevice, ProgramHandle, Viewport};
use prism::renderer::ToneMapping;
use prism::renderer::program::uniforms::UniformValue;
use prism::resources::geometry::{Attribute, Geometry, POSITION};
use prism::resources::material::{Blending, Material};
use prism::resources::texture::TextureRef;
use prism::scene::camera::{Camera, CameraView};
use prism::scene::{Drawable, Light, NodeHandle, Scene};
use prism::{AssetStore, GeometryHandle, MaterialHandle, RenderContext, Renderer, RendererSettings};

// ============================================================================
// Helper
// ============================================================================

struct Harness {
    ctx: RenderContext<HeadlessDevice>,
    renderer: Renderer,
    scene: Scene,
    assets: AssetStore,
    camera: CameraView,
}

impl Harness {
    fn new() -> Self {
        Self::with_device(HeadlessDevice::default())
    }

    fn with_device(device: HeadlessDevice) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut camera = Camera::new_perspective(60.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        Self {
            ctx: RenderContext::new(device).unwrap(),
            renderer: Renderer::default(),
            scene: Scene::new(),
            assets: AssetStore::new(),
            camera: camera.view(),
        }
    }

    fn triangle(&mut self) -> GeometryHandle {
        let mut geo = Geometry::new();
        geo.set_attribute(
            POSITION,
            Attribute::from_vec3(&[Vec3::new(-0.5, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0), Vec3::Y]),
        );
        self.assets.add_geometry(geo)
    }

    fn quad(&mut self) -> GeometryHandle {
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
        geo.set_index(&[0, 1, 2, 0, 2, 3]).unwrap();
        self.assets.add_geometry(geo)
    }

    fn mesh(&mut self, name: &str, geometry: GeometryHandle, material: Material) -> (NodeHandle, MaterialHandle) {
        let material = self.assets.add_material(material);
        let node = self.scene.add_drawable(name, Drawable::mesh(geometry, material));
        (node, material)
    }

    fn frame(&mut self) -> prism::errors::Result<prism::FrameStats> {
        self.renderer
            .render(&mut self.ctx, &mut self.scene, &self.assets, &self.camera)
    }

    fn last_program(&self) -> ProgramHandle {
        self.ctx.device.draws.last().unwrap().program.unwrap()
    }

    fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.ctx.device.uniform_value(self.last_program(), name)
    }
}

fn checker() -> TextureRef {
    TextureRef::new_rgba8("checker", 2, 2, vec![255; 16])
}

// ============================================================================
// Full frame
// ============================================================================

#[test]
fn single_mesh_frame_draws_and_uploads_uniforms() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let (node, _) = h.mesh("tri", geo, Material::basic(Vec4::new(1.0, 0.0, 0.0, 1.0)));
    h.scene
        .get_node_mut(node)
        .unwrap()
        .transform
        .set_position(Vec3::new(1.0, 2.0, 0.0));

    let stats = h.frame().unwrap();

    assert_eq!(stats.draws, 1);
    assert_eq!(stats.skipped_draws, 0);
    assert_eq!(stats.opaque, 1);
    assert_eq!(h.ctx.device.counters.programs_compiled, 1);
    assert_eq!(h.ctx.device.live_buffers(), 1);

    let draw = h.ctx.device.draws.last().unwrap();
    assert_eq!(draw.call.range, 0..3);
    assert!(!draw.call.indexed);
    assert_eq!(draw.call.instances, 1);
    assert_eq!(draw.call.topology, wgpu::PrimitiveTopology::TriangleList);
    assert_eq!(draw.blending, Some(Blending::None));

    assert_eq!(
        h.uniform("modelMatrix"),
        Some(&UniformValue::Mat4(Mat4::from_translation(Vec3::new(1.0, 2.0, 0.0))))
    );
    assert_eq!(
        h.uniform("diffuse"),
        Some(&UniformValue::Vec4(Vec4::new(1.0, 0.0, 0.0, 1.0)))
    );
    assert_eq!(h.uniform("cameraPosition"), Some(&UniformValue::Vec3(Vec3::new(0.0, 0.0, 10.0))));
    assert!(stats.uniform_uploads > 0);
}

#[test]
fn indexed_geometry_draws_index_range() {
    let mut h = Harness::new();
    let geo = h.quad();
    h.mesh("quad", geo, Material::basic(Vec4::ONE));

    h.frame().unwrap();

    let draw = h.ctx.device.draws.last().unwrap();
    assert!(draw.call.indexed);
    assert_eq!(draw.call.range, 0..6);
    assert_eq!(h.ctx.device.live_buffers(), 2);
}

#[test]
fn lit_material_receives_light_uniforms() {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("lit", geo, Material::standard(Vec4::ONE));
    h.scene.add_light("sun", Light::new_directional(Vec3::ONE, 2.0));

    h.frame().unwrap();

    assert!(matches!(
        h.uniform("directionalLightColor"),
        Some(UniformValue::Vec3Array(colors)) if colors.len() == 1
    ));
    assert!(h.uniform("roughness").is_some());
}

#[test]
fn unlit_material_ignores_lights() {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("flat", geo, Material::basic(Vec4::ONE));
    h.scene.add_light("sun", Light::new_directional(Vec3::ONE, 1.0));

    h.frame().unwrap();

    assert!(h.uniform("directionalLightColor").is_none());
    assert!(h.uniform("ambientLightColor").is_none());
}

#[test]
fn material_maps_bind_texture_units_in_order() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let mut material = Material::basic(Vec4::ONE);
    material.configure_maps(|maps| {
        maps.map = Some(checker());
        maps.alpha_map = Some(checker());
    });
    h.mesh("textured", geo, material);

    h.frame().unwrap();

    let draw = h.ctx.device.draws.last().unwrap();
    assert_eq!(draw.textures.len(), 2);
    assert_eq!(draw.textures[0].0, 0);
    assert_eq!(draw.textures[1].0, 1);
    assert_eq!(h.uniform("map"), Some(&UniformValue::Sampler(0)));
    assert_eq!(h.uniform("alphaMap"), Some(&UniformValue::Sampler(1)));
    assert_eq!(h.ctx.device.live_textures(), 2);
}

#[test]
fn transparent_material_draws_with_its_blending() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let mut glass = Material::basic(Vec4::new(1.0, 1.0, 1.0, 0.5));
    glass.set_transparent(true);
    glass.set_blending(Blending::Additive);
    h.mesh("glass", geo, glass);

    let stats = h.frame().unwrap();

    assert_eq!(stats.transparent, 1);
    assert_eq!(h.ctx.device.draws.last().unwrap().blending, Some(Blending::Additive));
}

#[test]
fn morph_influences_are_padded_to_target_count() {
    let mut h = Harness::new();
    let mut geo = Geometry::new();
    geo.set_attribute(POSITION, Attribute::from_vec3(&[Vec3::ZERO, Vec3::X, Vec3::Y]));
    geo.add_morph_attribute(POSITION, Attribute::from_vec3(&[Vec3::Z; 3]));
    geo.add_morph_attribute(POSITION, Attribute::from_vec3(&[Vec3::NEG_Z; 3]));
    let geo = h.assets.add_geometry(geo);
    let (node, _) = h.mesh("morph", geo, Material::basic(Vec4::ONE));
    h.scene.drawables.get_mut(node).unwrap().morph_influences = vec![0.5];

    h.frame().unwrap();

    assert_eq!(
        h.uniform("morphTargetInfluences"),
        Some(&UniformValue::FloatArray(vec![0.5, 0.0]))
    );
    // position plus two morph targets
    assert_eq!(h.ctx.device.live_buffers(), 3);
}

#[test]
fn empty_draw_range_issues_no_draw() {
    let mut h = Harness::new();
    let mut geo = Geometry::new();
    geo.set_attribute(POSITION, Attribute::from_vec3(&[Vec3::ZERO, Vec3::X, Vec3::Y]));
    geo.set_draw_range(3, 10);
    let geo = h.assets.add_geometry(geo);
    h.mesh("empty", geo, Material::basic(Vec4::ONE));

    let stats = h.frame().unwrap();

    assert_eq!(stats.opaque, 1);
    assert_eq!(stats.draws, 0);
    assert_eq!(stats.skipped_draws, 0);
    assert!(h.ctx.device.draws.is_empty());
}

// ============================================================================
// Elision
// ============================================================================

#[test]
fn unchanged_second_frame_issues_no_state_or_uploads() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("lit", geo, Material::standard(Vec4::ONE));
    h.scene.add_light("sun", Light::new_directional(Vec3::ONE, 1.0));
    h.frame()?;
    let counters = h.ctx.device.counters;

    let stats = h.frame()?;

    assert_eq!(stats.draws, 1);
    assert_eq!(stats.uniform_uploads, 0);
    assert_eq!(stats.state.issued, 0);
    assert!(stats.state.elided > 0);
    assert_eq!(h.ctx.device.counters.uploads(), counters.uploads());
    assert_eq!(h.ctx.device.counters.uniform_writes, counters.uniform_writes);
    assert_eq!(h.ctx.device.counters.programs_compiled, 1);
    assert_eq!(h.ctx.device.counters.draw_calls, 2);
    assert_eq!(h.ctx.programs.stats().fast_hits, 1);
    Ok(())
}

#[test]
fn uniform_edit_uploads_only_what_changed() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let (_, material) = h.mesh("tri", geo, Material::basic(Vec4::ONE));
    h.frame().unwrap();

    h.assets
        .materials
        .get_mut(material)
        .unwrap()
        .set_color(Vec4::new(0.0, 1.0, 0.0, 1.0));
    let stats = h.frame().unwrap();

    assert_eq!(stats.uniform_uploads, 1);
    assert_eq!(h.ctx.device.counters.programs_compiled, 1);
    assert_eq!(
        h.uniform("diffuse"),
        Some(&UniformValue::Vec4(Vec4::new(0.0, 1.0, 0.0, 1.0)))
    );
}

#[test]
fn moving_a_node_uploads_its_matrices_only() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let (node, _) = h.mesh("tri", geo, Material::basic(Vec4::ONE));
    h.frame().unwrap();

    h.scene
        .get_node_mut(node)
        .unwrap()
        .transform
        .set_position(Vec3::new(0.0, 1.0, 0.0));
    let stats = h.frame().unwrap();

    // modelMatrix changes; normalMatrix of a pure translation does not.
    assert_eq!(stats.uniform_uploads, 1);
    assert_eq!(stats.transforms.world_recomputed, 1);
}

#[test]
fn viewport_is_set_once() {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("tri", geo, Material::basic(Vec4::ONE));
    h.renderer.set_viewport(Some(Viewport {
        x: 0.0,
        y: 0.0,
        width: 640.0,
        height: 480.0,
    }));

    let first = h.frame().unwrap();
    let second = h.frame().unwrap();

    assert!(first.state.issued > 0);
    assert_eq!(second.state.issued, 0);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn rejected_state_call_skips_only_that_draw() {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("basic", geo, Material::basic(Vec4::ONE));
    h.mesh("standard", geo, Material::standard(Vec4::ONE));

    // The first rejection hits frame setup and is absorbed there; the second
    // hits the first item's program bind.
    h.ctx.device.faults.reject_state_calls = 2;
    let stats = h.frame().unwrap();

    assert_eq!(stats.draws, 1);
    assert_eq!(stats.skipped_draws, 1);
    assert_eq!(h.ctx.device.draws.len(), 1);

    let stats = h.frame().unwrap();
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.skipped_draws, 0);
}

#[test]
fn texture_unit_limit_aborts_frame() {
    let mut h = Harness::with_device(HeadlessDevice::new(DeviceLimits {
        max_texture_units: 1,
        ..DeviceLimits::default()
    }));
    let geo = h.triangle();
    let mut material = Material::basic(Vec4::ONE);
    material.configure_maps(|maps| {
        maps.map = Some(checker());
        maps.alpha_map = Some(checker());
    });
    h.mesh("textured", geo, material);

    let err = h.frame().unwrap_err();

    assert!(matches!(
        err,
        PrismError::DeviceLimitExceeded {
            what: "texture units",
            requested: 2,
            max: 1
        }
    ));
    assert!(!err.is_transient());
    assert!(h.ctx.device.draws.is_empty());
}

#[test]
fn too_many_lights_fail_the_frame() {
    let mut h = Harness::new();
    h.renderer.set_settings(RendererSettings {
        max_lights_per_kind: 1,
        ..RendererSettings::default()
    });
    let geo = h.triangle();
    h.mesh("lit", geo, Material::standard(Vec4::ONE));
    h.scene.add_light("a", Light::new_directional(Vec3::ONE, 1.0));
    h.scene.add_light("b", Light::new_directional(Vec3::ONE, 1.0));

    assert!(matches!(
        h.frame(),
        Err(PrismError::LightCountOverflow {
            kind: "directional",
            count: 2,
            max: 1
        })
    ));
}

#[test]
fn compile_failure_aborts_and_recovers() {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("tri", geo, Material::basic(Vec4::ONE));

    h.ctx.device.faults.fail_compiles = 1;
    assert!(matches!(h.frame(), Err(PrismError::Device(_))));
    assert!(h.ctx.programs.is_empty());

    let stats = h.frame().unwrap();
    assert_eq!(stats.draws, 1);
}

// ============================================================================
// Settings and disposal
// ============================================================================

#[test]
fn settings_change_rebuilds_programs() {
    let mut h = Harness::new();
    let geo = h.triangle();
    h.mesh("tri", geo, Material::basic(Vec4::ONE));
    h.frame().unwrap();

    let version = h.renderer.settings_version();
    h.renderer.set_settings(RendererSettings::default());
    assert_eq!(h.renderer.settings_version(), version);

    h.renderer.set_settings(RendererSettings {
        tone_mapping: ToneMapping::AcesFilmic,
        ..RendererSettings::default()
    });
    assert_eq!(h.renderer.settings_version(), version + 1);
    h.frame().unwrap();

    assert_eq!(h.ctx.device.counters.programs_compiled, 2);
    assert_eq!(h.ctx.device.live_programs(), 1);
}

#[test]
fn morph_mode_toggle_selects_new_program() {
    let mut h = Harness::new();
    let mut geo = Geometry::new();
    geo.set_attribute(POSITION, Attribute::from_vec3(&[Vec3::ZERO, Vec3::X, Vec3::Y]));
    geo.add_morph_attribute(POSITION, Attribute::from_vec3(&[Vec3::Z; 3]));
    let geo = h.assets.add_geometry(geo);
    h.mesh("morph", geo, Material::basic(Vec4::ONE));
    h.frame().unwrap();
    let absolute = h.last_program();

    h.assets
        .geometries
        .get_mut(geo)
        .unwrap()
        .set_morph_targets_relative(true);
    h.frame().unwrap();

    let relative = h.last_program();
    assert_ne!(relative, absolute);
    assert_eq!(h.ctx.device.counters.programs_compiled, 2);
    assert_eq!(h.ctx.device.live_programs(), 1);
    assert_eq!(h.ctx.state.current_program(), Some(relative));
}

#[test]
fn clipping_planes_reach_the_program() {
    let mut h = Harness::new();
    let plane = Vec4::new(0.0, 1.0, 0.0, 0.0);
    h.renderer.set_settings(RendererSettings {
        clipping_planes: vec![plane],
        ..RendererSettings::default()
    });
    let geo = h.triangle();
    h.mesh("tri", geo, Material::basic(Vec4::ONE));

    h.frame().unwrap();

    assert_eq!(h.uniform("clippingPlanes"), Some(&UniformValue::Vec4Array(vec![plane])));
}

#[test]
fn dispose_geometry_releases_buffers_and_programs() {
    let mut h = Harness::new();
    let geo = h.quad();
    h.mesh("quad", geo, Material::basic(Vec4::ONE));
    h.frame().unwrap();
    assert_eq!(h.ctx.device.live_buffers(), 2);

    h.renderer.dispose_geometry(&mut h.ctx, &h.assets, geo);

    assert_eq!(h.ctx.device.live_buffers(), 0);
    assert_eq!(h.ctx.device.live_programs(), 0);
    assert_eq!(h.ctx.programs.binding_count(), 0);
}

#[test]
fn dispose_material_releases_its_programs() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let (_, kept) = h.mesh("a", geo, Material::basic(Vec4::ONE));
    let (_, gone) = h.mesh("b", geo, Material::standard(Vec4::ONE));
    h.frame().unwrap();
    assert_eq!(h.ctx.device.live_programs(), 2);

    h.renderer.dispose_material(&mut h.ctx, gone);

    assert_eq!(h.ctx.device.live_programs(), 1);
    assert_eq!(h.ctx.programs.binding_count(), 1);
    h.renderer.dispose_material(&mut h.ctx, kept);
    assert!(h.ctx.programs.is_empty());
}

#[test]
fn disposed_program_is_no_longer_mirrored_as_bound() {
    let mut h = Harness::new();
    let geo = h.triangle();
    let (_, material) = h.mesh("tri", geo, Material::basic(Vec4::ONE));
    h.frame().unwrap();
    let program = h.last_program();
    assert_eq!(h.ctx.state.current_program(), Some(program));

    h.renderer.dispose_material(&mut h.ctx, material);
    assert_eq!(h.ctx.state.current_program(), None);

    // The next frame compiles a fresh program and binds it again.
    let issued = h.ctx.state.stats().issued;
    h.frame().unwrap();
    assert_eq!(h.ctx.device.counters.programs_compiled, 2);
    assert_eq!(h.ctx.state.current_program(), Some(h.last_program()));
    assert!(h.ctx.state.stats().issued > issued);
}

#[test]
fn dispose_texture_frees_device_texture() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let geo = h.triangle();
    let texture = checker();
    let mut material = Material::basic(Vec4::ONE);
    material.configure_maps(|maps| maps.map = Some(texture.clone()));
    h.mesh("textured", geo, material);
    h.frame()?;

    h.renderer.dispose_texture(&mut h.ctx, &texture);
    assert_eq!(h.ctx.device.live_textures(), 0);

    // Re-uploaded on demand.
    h.frame()?;
    assert_eq!(h.ctx.device.live_textures(), 1);
    Ok(())
}
