//! Program permutation parameters.
//!
//! [`get_parameters`] reduces a material, the frame's light set, the
//! drawable and the renderer settings to every choice that changes shader
//! text. It is pure: the same inputs always give equal parameters, and
//! nothing is cached or compiled here.

use bitflags::bitflags;
use glam::{Affine3A, Vec3, Vec4};
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::{PrismError, Result};
use crate::renderer::device::DeviceLimits;
use crate::renderer::program::uniforms::UniformValue;
use crate::renderer::settings::{ColorSpace, RendererSettings, ToneMapping};
use crate::resources::geometry::{self, Geometry};
use crate::resources::material::{Material, MaterialKind, Side, VertexColors};
use crate::resources::shader_defines::ShaderDefines;
use crate::scene::drawable::DrawableKind;
use crate::scene::light::{Light, LightKind};

/// Width of the per-kind light count fields in the program key.
pub const MAX_LIGHTS_PER_KIND: usize = 63;
pub const MAX_CLIPPING_PLANES: usize = 63;
pub const MAX_MORPH_TARGETS: usize = 8;

bitflags! {
    /// Boolean permutation switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProgramFeatures: u32 {
        const MAP            = 1 << 0;
        const NORMAL_MAP     = 1 << 1;
        const EMISSIVE_MAP   = 1 << 2;
        const ROUGHNESS_MAP  = 1 << 3;
        const METALNESS_MAP  = 1 << 4;
        const AO_MAP         = 1 << 5;
        const ALPHA_MAP      = 1 << 6;
        const ENV_MAP        = 1 << 7;
        const FOG            = 1 << 8;
        const FLAT_SHADING   = 1 << 9;
        const TRANSMISSION   = 1 << 10;
        const INSTANCING     = 1 << 11;
        const MORPH_TARGETS  = 1 << 12;
        const MORPH_NORMALS  = 1 << 13;
        const MORPH_RELATIVE = 1 << 14;
        const HAS_NORMAL     = 1 << 15;
        const HAS_UV         = 1 << 16;
        const HAS_TANGENT    = 1 << 17;
        const ALPHA_TEST     = 1 << 18;
        const DOUBLE_SIDED   = 1 << 19;
        const FLIP_SIDED     = 1 << 20;
        const LIT            = 1 << 21;
        const TRANSPARENT    = 1 << 22;
    }
}

const FEATURE_DEFINES: &[(ProgramFeatures, &str)] = &[
    (ProgramFeatures::MAP, "USE_MAP"),
    (ProgramFeatures::NORMAL_MAP, "USE_NORMAL_MAP"),
    (ProgramFeatures::EMISSIVE_MAP, "USE_EMISSIVE_MAP"),
    (ProgramFeatures::ROUGHNESS_MAP, "USE_ROUGHNESS_MAP"),
    (ProgramFeatures::METALNESS_MAP, "USE_METALNESS_MAP"),
    (ProgramFeatures::AO_MAP, "USE_AO_MAP"),
    (ProgramFeatures::ALPHA_MAP, "USE_ALPHA_MAP"),
    (ProgramFeatures::ENV_MAP, "USE_ENV_MAP"),
    (ProgramFeatures::FOG, "USE_FOG"),
    (ProgramFeatures::FLAT_SHADING, "FLAT_SHADED"),
    (ProgramFeatures::TRANSMISSION, "USE_TRANSMISSION"),
    (ProgramFeatures::INSTANCING, "USE_INSTANCING"),
    (ProgramFeatures::MORPH_TARGETS, "USE_MORPH_TARGETS"),
    (ProgramFeatures::MORPH_NORMALS, "USE_MORPH_NORMALS"),
    (ProgramFeatures::MORPH_RELATIVE, "MORPH_TARGETS_RELATIVE"),
    (ProgramFeatures::HAS_NORMAL, "HAS_NORMAL"),
    (ProgramFeatures::HAS_UV, "HAS_UV"),
    (ProgramFeatures::HAS_TANGENT, "HAS_TANGENT"),
    (ProgramFeatures::ALPHA_TEST, "USE_ALPHA_TEST"),
    (ProgramFeatures::DOUBLE_SIDED, "DOUBLE_SIDED"),
    (ProgramFeatures::FLIP_SIDED, "FLIP_SIDED"),
    (ProgramFeatures::LIT, "USE_LIGHTS"),
    (ProgramFeatures::TRANSPARENT, "TRANSPARENT"),
];

// ============================================================================
// Light state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LightCounts {
    pub directional: u8,
    pub point: u8,
    pub spot: u8,
    pub hemisphere: u8,
}

/// Lights visible this frame, flattened into uniform-ready arrays.
///
/// Directions are world-space and point from the light along its local -Z.
#[derive(Debug, Clone, Default)]
pub struct LightState {
    pub counts: LightCounts,
    pub shadow_casters: u8,
    pub ambient: Vec3,

    dir_colors: Vec<Vec3>,
    dir_directions: Vec<Vec3>,
    point_colors: Vec<Vec3>,
    point_positions: Vec<Vec3>,
    /// `(distance, decay, 0, 0)`
    point_params: Vec<Vec4>,
    spot_colors: Vec<Vec3>,
    spot_positions: Vec<Vec3>,
    spot_directions: Vec<Vec3>,
    /// `(distance, decay, cos outer, cos inner)`
    spot_params: Vec<Vec4>,
    hemi_sky: Vec<Vec3>,
    hemi_ground: Vec<Vec3>,
    hemi_directions: Vec<Vec3>,
}

impl LightState {
    /// Builds the state from `(light, world matrix)` pairs. Fails when one
    /// kind has more lights than `max_per_kind` (itself capped by the key
    /// layout).
    pub fn gather<'a>(
        lights: impl IntoIterator<Item = (&'a Light, &'a Affine3A)>,
        max_per_kind: usize,
    ) -> Result<Self> {
        let max = max_per_kind.min(MAX_LIGHTS_PER_KIND);
        let mut state = Self::default();

        for (light, world) in lights {
            let color = light.color * light.intensity;
            let position = Vec3::from(world.translation);
            let direction = world.transform_vector3(Vec3::NEG_Z).normalize_or_zero();

            match light.kind {
                LightKind::Ambient => state.ambient += color,
                LightKind::Directional => {
                    state.dir_colors.push(color);
                    state.dir_directions.push(direction);
                }
                LightKind::Point(p) => {
                    state.point_colors.push(color);
                    state.point_positions.push(position);
                    state.point_params.push(Vec4::new(p.distance, p.decay, 0.0, 0.0));
                }
                LightKind::Spot(s) => {
                    state.spot_colors.push(color);
                    state.spot_positions.push(position);
                    state.spot_directions.push(direction);
                    let outer = s.angle.cos();
                    let inner = (s.angle * (1.0 - s.penumbra)).cos();
                    state.spot_params.push(Vec4::new(s.distance, s.decay, outer, inner));
                }
                LightKind::Hemisphere { ground_color } => {
                    state.hemi_sky.push(color);
                    state.hemi_ground.push(ground_color * light.intensity);
                    state.hemi_directions.push(direction);
                }
            }
            if light.cast_shadow && !matches!(light.kind, LightKind::Ambient | LightKind::Hemisphere { .. }) {
                state.shadow_casters = state.shadow_casters.saturating_add(1);
            }
        }

        let count = |kind: &'static str, n: usize| -> Result<u8> {
            if n > max {
                return Err(PrismError::LightCountOverflow { kind, count: n, max });
            }
            Ok(n as u8)
        };
        state.counts = LightCounts {
            directional: count("directional", state.dir_colors.len())?,
            point: count("point", state.point_colors.len())?,
            spot: count("spot", state.spot_colors.len())?,
            hemisphere: count("hemisphere", state.hemi_sky.len())?,
        };
        Ok(state)
    }

    /// Hash of everything in the light state that changes shader text.
    #[must_use]
    pub fn permutation_hash(&self) -> u64 {
        let c = self.counts;
        u64::from(c.directional)
            | u64::from(c.point) << 8
            | u64::from(c.spot) << 16
            | u64::from(c.hemisphere) << 24
            | u64::from(self.shadow_casters) << 32
    }

    /// Light uniforms in upload order. Empty arrays are skipped.
    #[must_use]
    pub fn uniforms(&self) -> Vec<(&'static str, UniformValue)> {
        let mut out = vec![("ambientLightColor", UniformValue::Vec3(self.ambient))];
        let arrays3 = [
            ("directionalLightColor", &self.dir_colors),
            ("directionalLightDirection", &self.dir_directions),
            ("pointLightColor", &self.point_colors),
            ("pointLightPosition", &self.point_positions),
            ("spotLightColor", &self.spot_colors),
            ("spotLightPosition", &self.spot_positions),
            ("spotLightDirection", &self.spot_directions),
            ("hemisphereLightSkyColor", &self.hemi_sky),
            ("hemisphereLightGroundColor", &self.hemi_ground),
            ("hemisphereLightDirection", &self.hemi_directions),
        ];
        for (name, values) in arrays3 {
            if !values.is_empty() {
                out.push((name, UniformValue::Vec3Array(values.clone())));
            }
        }
        for (name, values) in [("pointLightParams", &self.point_params), ("spotLightParams", &self.spot_params)] {
            if !values.is_empty() {
                out.push((name, UniformValue::Vec4Array(values.clone())));
            }
        }
        out
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Shader text a custom material brings along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSource {
    pub name: String,
    pub vertex: String,
    pub fragment: String,
}

/// Every permutation choice for one (material, drawable, frame state).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramParameters {
    /// Built-in template name, `None` for custom shaders.
    pub template: Option<&'static str>,
    pub kind_index: u8,
    pub features: ProgramFeatures,
    pub vertex_colors: VertexColors,
    pub lights: LightCounts,
    pub shadows: u8,
    pub clipping_planes: u8,
    pub morph_targets: u8,
    pub output_color_space: ColorSpace,
    pub tone_mapping: ToneMapping,
    pub texture_units: u8,
    /// xxh3 of custom shader text; 0 for built-in kinds.
    pub shader_id: u64,
    pub custom_defines: ShaderDefines,
    pub custom: Option<CustomSource>,
}

fn kind_index(kind: &MaterialKind) -> u8 {
    match kind {
        MaterialKind::Basic => 0,
        MaterialKind::Lambert => 1,
        MaterialKind::Phong => 2,
        MaterialKind::Standard => 3,
        MaterialKind::Physical => 4,
        MaterialKind::Points => 5,
        MaterialKind::LineBasic => 6,
        MaterialKind::Sprite => 7,
        MaterialKind::Shader(_) => 8,
    }
}

fn check_limit(what: &'static str, requested: usize, max: usize) -> Result<()> {
    if requested > max {
        return Err(PrismError::DeviceLimitExceeded {
            what,
            requested: requested as u32,
            max: max as u32,
        });
    }
    Ok(())
}

/// Derives the permutation for drawing `geometry` with `material`.
///
/// Fails with [`PrismError::DeviceLimitExceeded`] when the permutation
/// needs more texture units, vertex attributes, morph targets or clipping
/// planes than the device (or the key layout) supports.
pub fn get_parameters(
    material: &Material,
    lights: &LightState,
    drawable: DrawableKind,
    instanced: bool,
    geometry: &Geometry,
    settings: &RendererSettings,
    limits: &DeviceLimits,
) -> Result<ProgramParameters> {
    let kind = material.kind();
    let s = material.settings();
    let maps = material.maps();
    let mut features = ProgramFeatures::empty();

    for (flag, present) in [
        (ProgramFeatures::MAP, maps.map.is_some()),
        (ProgramFeatures::NORMAL_MAP, maps.normal_map.is_some()),
        (ProgramFeatures::EMISSIVE_MAP, maps.emissive_map.is_some()),
        (ProgramFeatures::ROUGHNESS_MAP, maps.roughness_map.is_some()),
        (ProgramFeatures::METALNESS_MAP, maps.metalness_map.is_some()),
        (ProgramFeatures::AO_MAP, maps.ao_map.is_some()),
        (ProgramFeatures::ALPHA_MAP, maps.alpha_map.is_some()),
        (ProgramFeatures::ENV_MAP, maps.env_map.is_some()),
        (ProgramFeatures::FOG, s.fog),
        (ProgramFeatures::FLAT_SHADING, s.flat_shading),
        (ProgramFeatures::TRANSMISSION, material.is_transmissive()),
        (ProgramFeatures::INSTANCING, instanced),
        (ProgramFeatures::HAS_NORMAL, geometry.has_attribute(geometry::NORMAL)),
        (ProgramFeatures::HAS_UV, geometry.has_attribute(geometry::UV)),
        (ProgramFeatures::HAS_TANGENT, geometry.has_attribute(geometry::TANGENT)),
        (ProgramFeatures::ALPHA_TEST, s.alpha_test > 0.0),
        (ProgramFeatures::DOUBLE_SIDED, s.side == Side::Double),
        (ProgramFeatures::FLIP_SIDED, s.side == Side::Back),
        (ProgramFeatures::LIT, kind.is_lit()),
        (ProgramFeatures::TRANSPARENT, s.transparent),
    ] {
        features.set(flag, present);
    }

    // Morph targets only apply to meshes.
    let morph_targets = if drawable == DrawableKind::Mesh {
        geometry.morph_target_count()
    } else {
        0
    };
    if morph_targets > 0 {
        features |= ProgramFeatures::MORPH_TARGETS;
        features.set(
            ProgramFeatures::MORPH_NORMALS,
            !geometry.morph_attributes(geometry::NORMAL).is_empty(),
        );
        features.set(ProgramFeatures::MORPH_RELATIVE, geometry.morph_targets_relative());
    }
    check_limit("morph targets", morph_targets, MAX_MORPH_TARGETS)?;

    let vertex_inputs = geometry.attributes().count()
        + morph_targets * if features.contains(ProgramFeatures::MORPH_NORMALS) { 2 } else { 1 };
    check_limit("vertex attributes", vertex_inputs, limits.max_vertex_attributes as usize)?;

    let custom_samplers = match kind {
        MaterialKind::Shader(shader) => shader
            .uniforms
            .values()
            .filter(|v| matches!(v, UniformValue::Sampler(_)))
            .count(),
        _ => 0,
    };
    let texture_units = maps.count() as usize + custom_samplers;
    let max_units = (limits.max_texture_units as usize).min(usize::from(u8::MAX));
    check_limit("texture units", texture_units, max_units)?;

    check_limit("clipping planes", settings.clipping_planes.len(), MAX_CLIPPING_PLANES)?;

    let (light_counts, shadows) = if kind.is_lit() {
        let shadows = if settings.shadows_enabled { lights.shadow_casters } else { 0 };
        (lights.counts, shadows)
    } else {
        (LightCounts::default(), 0)
    };

    let (shader_id, custom) = match kind {
        MaterialKind::Shader(shader) => {
            let mut text = String::with_capacity(shader.vertex.len() + shader.fragment.len() + 1);
            text.push_str(&shader.vertex);
            text.push('\0');
            text.push_str(&shader.fragment);
            (
                xxh3_64(text.as_bytes()),
                Some(CustomSource {
                    name: shader.name.clone(),
                    vertex: shader.vertex.clone(),
                    fragment: shader.fragment.clone(),
                }),
            )
        }
        _ => (0, None),
    };

    Ok(ProgramParameters {
        template: kind.template_name(),
        kind_index: kind_index(kind),
        features,
        vertex_colors: s.vertex_colors,
        lights: light_counts,
        shadows,
        clipping_planes: settings.clipping_planes.len() as u8,
        morph_targets: morph_targets as u8,
        output_color_space: settings.output_color_space,
        tone_mapping: settings.tone_mapping,
        texture_units: texture_units as u8,
        shader_id,
        custom_defines: material.defines().clone(),
        custom,
    })
}

impl ProgramParameters {
    /// The `#define` set handed to the shader source provider.
    #[must_use]
    pub fn defines(&self) -> ShaderDefines {
        let mut defines = ShaderDefines::with_capacity(24);
        for &(flag, name) in FEATURE_DEFINES {
            if self.features.contains(flag) {
                defines.enable(name);
            }
        }
        match self.vertex_colors {
            VertexColors::None => {}
            VertexColors::Rgb => defines.enable("USE_VERTEX_COLOR"),
            VertexColors::Rgba => {
                defines.enable("USE_VERTEX_COLOR");
                defines.enable("USE_VERTEX_ALPHA");
            }
        }
        defines.set_count("NUM_DIR_LIGHTS", self.lights.directional);
        defines.set_count("NUM_POINT_LIGHTS", self.lights.point);
        defines.set_count("NUM_SPOT_LIGHTS", self.lights.spot);
        defines.set_count("NUM_HEMI_LIGHTS", self.lights.hemisphere);
        defines.set_count("NUM_SHADOWS", self.shadows);
        defines.set_count("NUM_CLIPPING_PLANES", self.clipping_planes);
        if self.morph_targets > 0 {
            defines.set_count("MORPH_TARGET_COUNT", self.morph_targets);
        }
        defines.set("OUTPUT_COLOR_SPACE", match self.output_color_space {
            ColorSpace::Srgb => "SRGB",
            ColorSpace::Linear => "LINEAR",
        });
        defines.set("TONE_MAPPING", match self.tone_mapping {
            ToneMapping::None => "NONE",
            ToneMapping::Linear => "LINEAR",
            ToneMapping::Reinhard => "REINHARD",
            ToneMapping::Cineon => "CINEON",
            ToneMapping::AcesFilmic => "ACES_FILMIC",
            ToneMapping::AgX => "AGX",
            ToneMapping::Neutral => "NEUTRAL",
        });
        defines.merge(&self.custom_defines);
        defines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::geometry::Attribute;
    use crate::resources::texture::TextureRef;

    fn triangle() -> Geometry {
        let mut g = Geometry::new();
        g.set_attribute(
            geometry::POSITION,
            Attribute::from_vec3(&[Vec3::ZERO, Vec3::X, Vec3::Y]),
        );
        g
    }

    fn derive(material: &Material, lights: &LightState) -> Result<ProgramParameters> {
        get_parameters(
            material,
            lights,
            DrawableKind::Mesh,
            false,
            &triangle(),
            &RendererSettings::default(),
            &DeviceLimits::default(),
        )
    }

    #[test]
    fn unlit_materials_ignore_lights() {
        let light = Light::new_directional(Vec3::ONE, 1.0);
        let world = Affine3A::IDENTITY;
        let lights = LightState::gather([(&light, &world)], 16).unwrap();

        let basic = derive(&Material::basic(Vec4::ONE), &lights).unwrap();
        let lit = derive(&Material::standard(Vec4::ONE), &lights).unwrap();
        assert_eq!(basic.lights.directional, 0);
        assert_eq!(lit.lights.directional, 1);
    }

    #[test]
    fn too_many_textures_is_reported() {
        let tex = TextureRef::new_rgba8("t", 1, 1, vec![0; 4]);
        let mut m = Material::standard(Vec4::ONE);
        m.configure_maps(|maps| {
            maps.map = Some(tex.clone());
            maps.normal_map = Some(tex.clone());
            maps.ao_map = Some(tex.clone());
        });
        let limits = DeviceLimits {
            max_texture_units: 2,
            ..DeviceLimits::default()
        };
        let err = get_parameters(
            &m,
            &LightState::default(),
            DrawableKind::Mesh,
            false,
            &triangle(),
            &RendererSettings::default(),
            &limits,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PrismError::DeviceLimitExceeded { what: "texture units", requested: 3, max: 2 }
        ));
    }

    #[test]
    fn light_overflow_is_reported() {
        let light = Light::new_point(Vec3::ONE, 1.0, 0.0);
        let world = Affine3A::IDENTITY;
        let err = LightState::gather(std::iter::repeat_n((&light, &world), 3), 2).unwrap_err();
        assert!(matches!(err, PrismError::LightCountOverflow { kind: "point", count: 3, max: 2 }));
    }

    #[test]
    fn defines_reflect_features() {
        let mut m = Material::basic(Vec4::ONE);
        m.set_vertex_colors(VertexColors::Rgba);
        m.set_define("CUSTOM_FLAG", "1");
        let defines = derive(&m, &LightState::default()).unwrap().defines();
        assert!(defines.contains("USE_VERTEX_ALPHA"));
        assert!(defines.contains("CUSTOM_FLAG"));
        assert_eq!(defines.get("NUM_DIR_LIGHTS"), Some("0"));
        assert!(!defines.contains("USE_MAP"));
    }
}
