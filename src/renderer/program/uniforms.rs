//! Uniform values, location tables and the per-program upload mirror.
//!
//! Programs are shared between draws, so every value that reaches the
//! device goes through [`UniformMirror::upload`], which compares it against
//! the last value sent to that program. The material section is additionally
//! gated on `(material, version)` so an unchanged material costs one compare.

use std::borrow::Cow;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use crate::assets::MaterialHandle;
use crate::renderer::device::{DeviceError, GraphicsDevice, ProgramHandle, UniformLocation};
use crate::resources::material::{Material, MaterialKind};

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    /// Texture unit index for a sampler uniform.
    Sampler(u32),
    FloatArray(Vec<f32>),
    Vec3Array(Vec<Vec3>),
    Vec4Array(Vec<Vec4>),
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat3> for UniformValue {
    fn from(v: Mat3) -> Self {
        Self::Mat3(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

// ============================================================================
// Location table
// ============================================================================

/// Name to location map of a program's active uniforms, built once at
/// compile time.
#[derive(Debug, Clone, Default)]
pub struct UniformTable {
    locations: FxHashMap<String, UniformLocation>,
}

impl UniformTable {
    pub fn build(device: &impl GraphicsDevice, program: ProgramHandle) -> Self {
        let locations = device
            .active_uniforms(program)
            .into_iter()
            .filter_map(|name| {
                let loc = device.uniform_location(program, &name)?;
                Some((name, loc))
            })
            .collect();
        Self { locations }
    }

    #[inline]
    #[must_use]
    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.locations.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }
}

// ============================================================================
// Upload mirror
// ============================================================================

/// Last values sent to one program.
#[derive(Debug, Default)]
pub struct UniformMirror {
    sent: FxHashMap<UniformLocation, UniformValue>,
    last_material: Option<(MaterialHandle, u64)>,
}

impl UniformMirror {
    /// Sends `value` unless the program already holds it. Names the program
    /// does not use are ignored. Returns whether a device call was made.
    pub fn upload<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        table: &UniformTable,
        name: &str,
        value: UniformValue,
    ) -> Result<bool, DeviceError> {
        let Some(location) = table.location(name) else {
            return Ok(false);
        };
        if self.sent.get(&location) == Some(&value) {
            return Ok(false);
        }
        match device.set_uniform(location, &value) {
            Ok(()) => {
                self.sent.insert(location, value);
                Ok(true)
            }
            Err(e) => {
                self.sent.remove(&location);
                Err(e)
            }
        }
    }

    /// Whether `material` at `version` was the last one fully applied.
    #[must_use]
    pub fn material_current(&self, material: MaterialHandle, version: u64) -> bool {
        self.last_material == Some((material, version))
    }

    pub fn mark_material(&mut self, material: MaterialHandle, version: u64) {
        self.last_material = Some((material, version));
    }

    /// Forgets everything; the next upload of each value reaches the device.
    pub fn invalidate(&mut self) {
        self.sent.clear();
        self.last_material = None;
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }
}

// ============================================================================
// Material section
// ============================================================================

/// Uniforms a material contributes, in upload order. Sampler uniforms take
/// consecutive texture units starting at `first_unit`, matching the order of
/// [`MaterialMaps::bound`](crate::resources::material::MaterialMaps::bound).
#[must_use]
pub fn material_uniforms(material: &Material, first_unit: u32) -> Vec<(Cow<'_, str>, UniformValue)> {
    let u = material.uniforms();
    let mut out: Vec<(Cow<'_, str>, UniformValue)> = vec![
        ("diffuse".into(), u.color.into()),
        ("opacity".into(), u.opacity.into()),
        ("emissive".into(), (u.emissive * u.emissive_intensity).into()),
    ];

    match material.kind() {
        MaterialKind::Phong => {
            out.push(("shininess".into(), u.shininess.into()));
            out.push(("specular".into(), u.specular.into()));
        }
        MaterialKind::Standard | MaterialKind::Physical => {
            out.push(("roughness".into(), u.roughness.into()));
            out.push(("metalness".into(), u.metalness.into()));
            if matches!(material.kind(), MaterialKind::Physical) {
                out.push(("transmission".into(), u.transmission.into()));
                out.push(("ior".into(), u.ior.into()));
                out.push(("thickness".into(), u.thickness.into()));
            }
        }
        MaterialKind::Points => out.push(("size".into(), u.point_size.into())),
        MaterialKind::LineBasic => out.push(("linewidth".into(), u.line_width.into())),
        MaterialKind::Sprite => out.push(("rotation".into(), u.rotation.into())),
        MaterialKind::Shader(shader) => {
            for (name, value) in &shader.uniforms {
                out.push((Cow::Borrowed(name.as_str()), value.clone()));
            }
        }
        MaterialKind::Basic | MaterialKind::Lambert => {}
    }

    if material.settings().alpha_test > 0.0 {
        out.push(("alphaTest".into(), material.settings().alpha_test.into()));
    }

    for (unit, (name, _)) in (first_unit..).zip(material.maps().bound()) {
        out.push((name.into(), UniformValue::Sampler(unit)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::texture::TextureRef;

    #[test]
    fn samplers_follow_map_order() {
        let tex = TextureRef::new_rgba8("t", 1, 1, vec![0; 4]);
        let mut m = Material::standard(Vec4::ONE);
        m.configure_maps(|maps| {
            maps.normal_map = Some(tex.clone());
            maps.map = Some(tex.clone());
        });

        let samplers: Vec<_> = material_uniforms(&m, 2)
            .into_iter()
            .filter(|(_, v)| matches!(v, UniformValue::Sampler(_)))
            .collect();
        assert_eq!(samplers[0], ("map".into(), UniformValue::Sampler(2)));
        assert_eq!(samplers[1], ("normalMap".into(), UniformValue::Sampler(3)));
    }

    #[test]
    fn physical_adds_transmission() {
        let mut m = Material::physical(Vec4::ONE);
        m.set_transmission(0.6);
        let names: Vec<_> = material_uniforms(&m, 0).into_iter().map(|(n, _)| n).collect();
        assert!(names.iter().any(|n| n == "transmission"));
        assert!(!names.iter().any(|n| n == "shininess"));
    }
}
