//! Materials.
//!
//! A [`Material`] is a closed set of shading kinds sharing one settings block,
//! one uniform block and one texture-slot block. Every mutation through the
//! public API bumps [`Material::version`]; the program cache uses that
//! version to skip re-deriving permutation parameters and re-sending
//! material uniforms when nothing changed.

use std::collections::BTreeMap;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::renderer::program::uniforms::UniformValue;
use crate::resources::shader_defines::ShaderDefines;
use crate::resources::texture::TextureRef;
use crate::resources::version_tracker::ChangeTracker;

// ============================================================================
// Settings
// ============================================================================

/// Faces that get rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

/// Fixed-function blend presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
}

/// Where per-vertex color comes from, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VertexColors {
    #[default]
    None,
    Rgb,
    Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialSettings {
    pub transparent: bool,
    pub visible: bool,
    pub side: Side,
    pub blending: Blending,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Fragments with alpha below this are discarded; 0 disables the test.
    pub alpha_test: f32,
    pub vertex_colors: VertexColors,
    pub fog: bool,
    pub flat_shading: bool,
}

impl Default for MaterialSettings {
    fn default() -> Self {
        Self {
            transparent: false,
            visible: true,
            side: Side::Front,
            blending: Blending::Normal,
            depth_test: true,
            depth_write: true,
            alpha_test: 0.0,
            vertex_colors: VertexColors::None,
            fog: true,
            flat_shading: false,
        }
    }
}

// ============================================================================
// Uniform data and texture slots
// ============================================================================

/// Scalar material inputs. Kinds ignore the fields they do not shade with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialUniforms {
    pub color: Vec4,
    pub opacity: f32,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub shininess: f32,
    pub specular: Vec3,
    pub transmission: f32,
    pub ior: f32,
    pub thickness: f32,
    pub point_size: f32,
    pub line_width: f32,
    pub rotation: f32,
}

impl Default for MaterialUniforms {
    fn default() -> Self {
        Self {
            color: Vec4::ONE,
            opacity: 1.0,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            roughness: 1.0,
            metalness: 0.0,
            shininess: 30.0,
            specular: Vec3::splat(0.066),
            transmission: 0.0,
            ior: 1.5,
            thickness: 0.0,
            point_size: 1.0,
            line_width: 1.0,
            rotation: 0.0,
        }
    }
}

/// Texture slots. Each bound slot adds a define and consumes a texture unit.
#[derive(Debug, Clone, Default)]
pub struct MaterialMaps {
    pub map: Option<TextureRef>,
    pub normal_map: Option<TextureRef>,
    pub emissive_map: Option<TextureRef>,
    pub roughness_map: Option<TextureRef>,
    pub metalness_map: Option<TextureRef>,
    pub ao_map: Option<TextureRef>,
    pub alpha_map: Option<TextureRef>,
    pub env_map: Option<TextureRef>,
}

impl MaterialMaps {
    /// `(sampler uniform name, texture)` for every bound slot, in a fixed
    /// order so texture units are assigned deterministically.
    pub fn bound(&self) -> impl Iterator<Item = (&'static str, &TextureRef)> {
        [
            ("map", &self.map),
            ("normalMap", &self.normal_map),
            ("emissiveMap", &self.emissive_map),
            ("roughnessMap", &self.roughness_map),
            ("metalnessMap", &self.metalness_map),
            ("aoMap", &self.ao_map),
            ("alphaMap", &self.alpha_map),
            ("envMap", &self.env_map),
        ]
        .into_iter()
        .filter_map(|(name, slot)| slot.as_ref().map(|t| (name, t)))
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.bound().count() as u32
    }
}

/// User-supplied shader text plus its extra uniforms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomShader {
    pub name: String,
    pub vertex: String,
    pub fragment: String,
    pub uniforms: BTreeMap<String, UniformValue>,
}

// ============================================================================
// Material
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialKind {
    Basic,
    Lambert,
    Phong,
    Standard,
    Physical,
    Points,
    LineBasic,
    Sprite,
    Shader(Box<CustomShader>),
}

impl MaterialKind {
    /// Template name of the built-in kinds; `None` for custom shaders.
    #[must_use]
    pub fn template_name(&self) -> Option<&'static str> {
        Some(match self {
            Self::Basic => "mesh_basic",
            Self::Lambert => "mesh_lambert",
            Self::Phong => "mesh_phong",
            Self::Standard => "mesh_standard",
            Self::Physical => "mesh_physical",
            Self::Points => "points",
            Self::LineBasic => "line_basic",
            Self::Sprite => "sprite",
            Self::Shader(_) => return None,
        })
    }

    /// Whether the kind reacts to scene lights.
    #[must_use]
    pub fn is_lit(&self) -> bool {
        matches!(
            self,
            Self::Lambert | Self::Phong | Self::Standard | Self::Physical
        )
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    kind: MaterialKind,
    settings: MaterialSettings,
    uniforms: MaterialUniforms,
    maps: MaterialMaps,
    defines: ShaderDefines,
    version: ChangeTracker,
}

/// Generates version-bumping accessors for `Copy` fields of a sub-block.
macro_rules! impl_material_api {
    ($block:ident: $(($field:ident, $setter:ident, $ty:ty)),* $(,)?) => {
        $(
            #[must_use]
            pub fn $field(&self) -> $ty {
                self.$block.$field
            }

            pub fn $setter(&mut self, value: $ty) {
                if self.$block.$field != value {
                    self.$block.$field = value;
                    self.bump();
                }
            }
        )*
    };
}

impl Material {
    #[must_use]
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            settings: MaterialSettings::default(),
            uniforms: MaterialUniforms::default(),
            maps: MaterialMaps::default(),
            defines: ShaderDefines::new(),
            version: ChangeTracker::new(),
        }
    }

    #[must_use]
    pub fn basic(color: Vec4) -> Self {
        let mut m = Self::new(MaterialKind::Basic);
        m.uniforms.color = color;
        m
    }

    #[must_use]
    pub fn lambert(color: Vec4) -> Self {
        let mut m = Self::new(MaterialKind::Lambert);
        m.uniforms.color = color;
        m
    }

    #[must_use]
    pub fn phong(color: Vec4) -> Self {
        let mut m = Self::new(MaterialKind::Phong);
        m.uniforms.color = color;
        m
    }

    #[must_use]
    pub fn standard(color: Vec4) -> Self {
        let mut m = Self::new(MaterialKind::Standard);
        m.uniforms.color = color;
        m
    }

    #[must_use]
    pub fn physical(color: Vec4) -> Self {
        let mut m = Self::new(MaterialKind::Physical);
        m.uniforms.color = color;
        m
    }

    #[must_use]
    pub fn custom(shader: CustomShader) -> Self {
        Self::new(MaterialKind::Shader(Box::new(shader)))
    }

    fn bump(&mut self) {
        self.version.changed();
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }

    #[must_use]
    pub fn kind(&self) -> &MaterialKind {
        &self.kind
    }

    #[must_use]
    pub fn settings(&self) -> &MaterialSettings {
        &self.settings
    }

    #[must_use]
    pub fn uniforms(&self) -> &MaterialUniforms {
        &self.uniforms
    }

    #[must_use]
    pub fn maps(&self) -> &MaterialMaps {
        &self.maps
    }

    /// Extra defines merged into the permutation.
    #[must_use]
    pub fn defines(&self) -> &ShaderDefines {
        &self.defines
    }

    pub fn set_define(&mut self, key: &str, value: &str) {
        self.defines.set(key, value);
        self.bump();
    }

    /// Batch edit of the texture slots.
    pub fn configure_maps(&mut self, f: impl FnOnce(&mut MaterialMaps)) {
        f(&mut self.maps);
        self.bump();
    }

    /// Batch edit of the uniform block.
    pub fn configure(&mut self, f: impl FnOnce(&mut MaterialUniforms)) {
        let before = self.uniforms;
        f(&mut self.uniforms);
        if self.uniforms != before {
            self.bump();
        }
    }

    /// Mutable access to a custom shader's uniforms.
    pub fn custom_uniforms_mut(&mut self) -> Option<&mut BTreeMap<String, UniformValue>> {
        match &mut self.kind {
            MaterialKind::Shader(shader) => {
                self.version.changed();
                Some(&mut shader.uniforms)
            }
            _ => None,
        }
    }

    impl_material_api!(settings:
        (transparent, set_transparent, bool),
        (visible, set_visible, bool),
        (side, set_side, Side),
        (blending, set_blending, Blending),
        (depth_test, set_depth_test, bool),
        (depth_write, set_depth_write, bool),
        (alpha_test, set_alpha_test, f32),
        (vertex_colors, set_vertex_colors, VertexColors),
        (fog, set_fog, bool),
        (flat_shading, set_flat_shading, bool),
    );

    impl_material_api!(uniforms:
        (color, set_color, Vec4),
        (opacity, set_opacity, f32),
        (emissive, set_emissive, Vec3),
        (roughness, set_roughness, f32),
        (metalness, set_metalness, f32),
        (shininess, set_shininess, f32),
        (transmission, set_transmission, f32),
        (ior, set_ior, f32),
        (point_size, set_point_size, f32),
    );

    /// Transmissive materials are composited in their own back-to-front pass.
    #[must_use]
    pub fn is_transmissive(&self) -> bool {
        self.uniforms.transmission > 0.0
    }
}
