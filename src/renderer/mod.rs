//! Frame Renderer
//!
//! [`Renderer::render`] drives one frame against a [`RenderContext`]:
//!
//! 1. refresh world matrices;
//! 2. build the render list (culling, bucketing) and gather lights;
//! 3. sort the buckets;
//! 4. for every item: resolve its program, upload resources, apply state
//!    through the state cache, upload dirty uniforms, draw.
//!
//! Errors raised while drawing one item are classified with
//! [`PrismError::is_transient`]: transient ones are logged and the item is
//! skipped, everything else aborts the frame and is returned.

pub mod context;
pub mod device;
pub mod program;
pub mod render_list;
pub mod resource_cache;
pub mod settings;
pub mod state_cache;

pub use context::RenderContext;
pub use render_list::{CullStats, RenderItem, RenderList};
pub use resource_cache::{ResourceCache, ResourceCacheStats};
pub use settings::{ColorSpace, RendererSettings, ToneMapping};
pub use state_cache::{GpuStateCache, StateCacheStats};

use glam::{Mat3, Mat4};
use smallvec::SmallVec;
use wgpu::{CompareFunction, Face};

use crate::assets::{AssetStore, GeometryHandle, MaterialHandle};
use crate::errors::{PrismError, Result};
use crate::renderer::device::{
    DepthState, DrawCall, GraphicsDevice, IndexBinding, VertexBinding, Viewport,
};
use crate::renderer::program::uniforms::{UniformValue, material_uniforms};
use crate::renderer::program::{FastProgramKey, LightState, get_parameters};
use crate::resources::geometry::{Attribute, Geometry, NORMAL, POSITION};
use crate::resources::material::{Blending, Side};
use crate::resources::texture::TextureRef;
use crate::scene::camera::CameraView;
use crate::scene::drawable::DrawableKind;
use crate::scene::{Scene, TransformStats};

/// What one frame did.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub transforms: TransformStats,
    pub cull: CullStats,
    pub opaque: usize,
    pub transmissive: usize,
    pub transparent: usize,
    pub draws: u32,
    /// Items dropped after a transient device error.
    pub skipped_draws: u32,
    pub uniform_uploads: u32,
    pub state: StateCacheStats,
}

#[derive(Debug)]
pub struct Renderer {
    settings: RendererSettings,
    settings_version: u64,
    list: RenderList,
    viewport: Option<Viewport>,
    /// Clear color and depth before drawing.
    pub auto_clear: bool,
    frame: u64,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RendererSettings::default())
    }
}

impl Renderer {
    #[must_use]
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            settings,
            settings_version: 1,
            list: RenderList::new(),
            viewport: None,
            auto_clear: true,
            frame: 0,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Replaces the settings. A change invalidates every program binding's
    /// fast key, so the next frame re-derives permutations.
    pub fn set_settings(&mut self, settings: RendererSettings) {
        if settings != self.settings {
            self.settings = settings;
            self.settings_version += 1;
        }
    }

    #[must_use]
    pub fn settings_version(&self) -> u64 {
        self.settings_version
    }

    pub fn set_viewport(&mut self, viewport: Option<Viewport>) {
        self.viewport = viewport;
    }

    /// The list built by the last frame.
    #[must_use]
    pub fn render_list(&self) -> &RenderList {
        &self.list
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // ========================================================================
    // Frame
    // ========================================================================

    pub fn render<D: GraphicsDevice>(
        &mut self,
        ctx: &mut RenderContext<D>,
        scene: &mut Scene,
        assets: &AssetStore,
        camera: &CameraView,
    ) -> Result<FrameStats> {
        self.frame += 1;
        ctx.resources.begin_frame();
        let state_before = ctx.state.stats();

        let mut stats = FrameStats {
            transforms: scene.update_world(false),
            ..FrameStats::default()
        };

        self.list.build(scene, assets, camera);
        let lights = LightState::gather(
            self.list.lights.iter().filter_map(|&h| {
                Some((scene.lights.get(h)?, scene.get_node(h)?.world_matrix()))
            }),
            self.settings.max_lights_per_kind,
        )?;
        if self.settings.sort_objects {
            self.list.sort();
        }

        stats.cull = self.list.stats();
        stats.opaque = self.list.opaque.len();
        stats.transmissive = self.list.transmissive.len();
        stats.transparent = self.list.transparent.len();

        self.begin_pass(ctx)?;

        let frame = FrameInputs {
            scene: &*scene,
            assets,
            camera,
            lights: &lights,
        };
        for item in self.list.iter() {
            match self.draw_item(ctx, &frame, item) {
                Ok(Some(uploads)) => {
                    stats.draws += 1;
                    stats.uniform_uploads += uploads;
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    log::warn!("Skipped draw of node {:?}: {e}", item.node);
                    stats.skipped_draws += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let after = ctx.state.stats();
        stats.state = StateCacheStats {
            issued: after.issued - state_before.issued,
            elided: after.elided - state_before.elided,
        };
        log::trace!("Frame {} done: {stats:?}", self.frame);
        Ok(stats)
    }

    fn begin_pass<D: GraphicsDevice>(&self, ctx: &mut RenderContext<D>) -> Result<()> {
        let result = (|| -> Result<()> {
            ctx.state.bind_framebuffer(&mut ctx.device, None)?;
            if let Some(viewport) = self.viewport {
                ctx.state.set_viewport(&mut ctx.device, viewport)?;
            }
            if self.auto_clear {
                ctx.device.clear(self.settings.clear_color, true)?;
            }
            Ok(())
        })();
        match result {
            Err(e) if e.is_transient() => {
                log::warn!("Frame setup call rejected: {e}");
                Ok(())
            }
            other => other,
        }
    }

    /// Draws one item and returns the number of uniform uploads it made, or
    /// `None` when its draw range is empty.
    fn draw_item<D: GraphicsDevice>(
        &self,
        ctx: &mut RenderContext<D>,
        frame: &FrameInputs<'_>,
        item: &RenderItem,
    ) -> Result<Option<u32>> {
        let geometry = frame
            .assets
            .geometries
            .get(item.geometry)
            .ok_or_else(|| PrismError::AssetNotFound(format!("{:?}", item.geometry)))?;
        let material = frame
            .assets
            .materials
            .get(item.material)
            .ok_or_else(|| PrismError::AssetNotFound(format!("{:?}", item.material)))?;
        geometry.validate()?;

        let group = item.group.and_then(|g| geometry.groups().get(g as usize));
        let range = geometry.resolve_range(group);
        if range.is_empty() {
            log::trace!("Node {:?} has an empty draw range", item.node);
            return Ok(None);
        }

        // --- Program ---
        let instanced = item.instance_count > 1 || geometry.attributes().any(|(_, a)| a.is_instanced());
        let fast = FastProgramKey {
            material: item.material,
            material_version: material.version(),
            geometry: item.geometry,
            geometry_layout_version: geometry.layout_version(),
            drawable: item.kind,
            instanced,
            light_hash: frame.lights.permutation_hash(),
            settings_version: self.settings_version,
        };
        let limits = ctx.device.limits();
        let resolved = ctx.programs.resolve(&mut ctx.device, fast, || {
            get_parameters(
                material,
                frame.lights,
                item.kind,
                instanced,
                geometry,
                &self.settings,
                &limits,
            )
        });
        forget_destroyed_programs(ctx);
        let program_id = resolved?;
        let program = ctx
            .programs
            .get_mut(program_id)
            .ok_or_else(|| PrismError::AssetNotFound(format!("program {program_id:?}")))?;

        // --- Resources ---
        let mut textures: SmallVec<[_; 8]> = SmallVec::new();
        for (_, texture) in material.maps().bound() {
            textures.push(ctx.resources.get_or_create_texture(&mut ctx.device, texture)?);
        }

        let mut vertex_bindings: SmallVec<[(u32, VertexBinding); 8]> = SmallVec::new();
        for (name, location) in &program.attributes {
            let Some(attr) = resolve_input(geometry, name) else {
                log::trace!("Geometry has no input '{name}'; left unbound");
                continue;
            };
            let format = attr
                .vertex_format()
                .ok_or_else(|| PrismError::UnsupportedVertexFormat(name.clone()))?;
            let buffer = ctx.resources.get_or_create_buffer(&mut ctx.device, &attr.buffer)?;
            vertex_bindings.push((*location, VertexBinding {
                buffer,
                offset: attr.offset,
                stride: attr.stride,
                format,
                instanced: attr.is_instanced(),
            }));
        }
        let index = match geometry.index() {
            Some(index) => Some(IndexBinding {
                buffer: ctx.resources.get_or_create_buffer(&mut ctx.device, &index.buffer)?,
                format: index.format,
            }),
            None => None,
        };

        // --- State ---
        let settings = material.settings();
        ctx.state.bind_program(&mut ctx.device, program.handle)?;
        for (location, binding) in vertex_bindings {
            ctx.state.bind_vertex_buffer(&mut ctx.device, location, binding)?;
        }
        if let Some(binding) = index {
            ctx.state.bind_index_buffer(&mut ctx.device, binding)?;
        }
        let blending = if settings.transparent || material.is_transmissive() {
            settings.blending
        } else {
            Blending::None
        };
        ctx.state.set_blend_mode(&mut ctx.device, blending)?;
        ctx.state.set_depth_state(&mut ctx.device, DepthState {
            test: settings.depth_test,
            write: settings.depth_write,
            compare: CompareFunction::LessEqual,
        })?;
        let cull = match (item.kind, settings.side) {
            (DrawableKind::Mesh, Side::Front) => Some(Face::Back),
            (DrawableKind::Mesh, Side::Back) => Some(Face::Front),
            _ => None,
        };
        ctx.state.set_cull_mode(&mut ctx.device, cull)?;
        for (unit, texture) in (0u32..).zip(textures) {
            ctx.state.bind_texture(&mut ctx.device, unit, texture)?;
        }

        // --- Uniforms ---
        let material_current = program.mirror.material_current(item.material, material.version());
        let mut uploads = 0u32;
        let table = &program.uniforms;
        let mirror = &mut program.mirror;
        let mut send = |device: &mut D, name: &str, value: UniformValue| -> Result<()> {
            if mirror.upload(device, table, name, value)? {
                uploads += 1;
            }
            Ok(())
        };

        let camera = frame.camera;
        send(&mut ctx.device, "viewMatrix", camera.view.into())?;
        send(&mut ctx.device, "projectionMatrix", camera.projection.into())?;
        send(&mut ctx.device, "cameraPosition", camera.position.into())?;
        send(&mut ctx.device, "toneMappingExposure", self.settings.tone_mapping_exposure.into())?;
        if !self.settings.clipping_planes.is_empty() {
            send(
                &mut ctx.device,
                "clippingPlanes",
                UniformValue::Vec4Array(self.settings.clipping_planes.clone()),
            )?;
        }
        if material.kind().is_lit() {
            for (name, value) in frame.lights.uniforms() {
                send(&mut ctx.device, name, value)?;
            }
        }

        send(&mut ctx.device, "modelMatrix", Mat4::from(item.world).into())?;
        let normal_matrix = Mat3::from(item.world.matrix3).inverse().transpose();
        send(&mut ctx.device, "normalMatrix", normal_matrix.into())?;
        if geometry.morph_target_count() > 0 {
            let mut influences = frame
                .scene
                .drawables
                .get(item.node)
                .map(|d| d.morph_influences.clone())
                .unwrap_or_default();
            influences.resize(geometry.morph_target_count(), 0.0);
            send(&mut ctx.device, "morphTargetInfluences", UniformValue::FloatArray(influences))?;
        }

        if !material_current {
            for (name, value) in material_uniforms(material, 0) {
                send(&mut ctx.device, name.as_ref(), value)?;
            }
        }
        drop(send);
        program.mirror.mark_material(item.material, material.version());

        // --- Draw ---
        ctx.device.draw(&DrawCall {
            topology: item.kind.topology(),
            range,
            indexed: geometry.index().is_some(),
            instances: item.instance_count.max(1),
        })?;
        Ok(Some(uploads))
    }

    // ========================================================================
    // Disposal
    // ========================================================================

    /// Releases the program references held for `material`.
    pub fn dispose_material<D: GraphicsDevice>(&mut self, ctx: &mut RenderContext<D>, material: MaterialHandle) {
        let released = ctx.programs.release_material(&mut ctx.device, material);
        forget_destroyed_programs(ctx);
        log::debug!("Disposed material {material:?} ({released} program bindings)");
    }

    /// Releases program references and device buffers of `geometry`.
    pub fn dispose_geometry<D: GraphicsDevice>(
        &mut self,
        ctx: &mut RenderContext<D>,
        assets: &AssetStore,
        geometry: GeometryHandle,
    ) {
        ctx.programs.release_geometry(&mut ctx.device, geometry);
        forget_destroyed_programs(ctx);
        let Some(geo) = assets.geometries.get(geometry) else {
            return;
        };
        let buffers = geo
            .attributes()
            .map(|(_, a)| &a.buffer)
            .chain(geo.index().map(|i| &i.buffer));
        for buffer in buffers {
            if let Some(handle) = ctx.resources.remove_buffer(&mut ctx.device, buffer) {
                ctx.state.forget_buffer(handle);
            }
        }
        for name in [POSITION, NORMAL] {
            for target in geo.morph_attributes(name) {
                if let Some(handle) = ctx.resources.remove_buffer(&mut ctx.device, &target.buffer) {
                    ctx.state.forget_buffer(handle);
                }
            }
        }
    }

    pub fn dispose_texture<D: GraphicsDevice>(&mut self, ctx: &mut RenderContext<D>, texture: &TextureRef) {
        if let Some(handle) = ctx.resources.remove_texture(&mut ctx.device, texture) {
            ctx.state.forget_texture(handle);
        }
    }
}

/// Borrowed per-frame inputs shared by every draw.
struct FrameInputs<'a> {
    scene: &'a Scene,
    assets: &'a AssetStore,
    camera: &'a CameraView,
    lights: &'a LightState,
}

/// Maps a program input name to the geometry attribute feeding it.
fn resolve_input<'g>(geometry: &'g Geometry, name: &str) -> Option<&'g Attribute> {
    if let Some(i) = name.strip_prefix("morphTarget") {
        let i: usize = i.parse().ok()?;
        return geometry.morph_attributes(POSITION).get(i);
    }
    if let Some(i) = name.strip_prefix("morphNormal") {
        let i: usize = i.parse().ok()?;
        return geometry.morph_attributes(NORMAL).get(i);
    }
    geometry.get_attribute(name)
}

/// Drops mirrored program bindings whose device program no longer exists.
fn forget_destroyed_programs<D: GraphicsDevice>(ctx: &mut RenderContext<D>) {
    for handle in ctx.programs.take_destroyed() {
        ctx.state.forget_program(handle);
    }
}
