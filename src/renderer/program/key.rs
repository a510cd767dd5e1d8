//! Program cache keys.
//!
//! [`ProgramKey`] is the canonical (L2) key: a fixed bit-field layout over
//! [`ProgramParameters`], so equal permutations always produce equal keys no
//! matter how the parameters were assembled. [`FastProgramKey`] is the L1
//! key built from handles and version counters, letting an unchanged draw
//! skip parameter derivation entirely.
//!
//! Bit layout of `ProgramKey::bits`:
//!
//! | bits    | field                     |
//! |---------|---------------------------|
//! | 0..4    | material kind             |
//! | 4..36   | feature flags             |
//! | 36..38  | vertex color mode         |
//! | 38..44  | directional lights        |
//! | 44..50  | point lights              |
//! | 50..56  | spot lights               |
//! | 56..62  | hemisphere lights         |
//! | 62..70  | shadow casters            |
//! | 70..76  | clipping planes           |
//! | 76..80  | morph targets             |
//! | 80..81  | output color space        |
//! | 81..84  | tone mapping              |
//! | 84..92  | texture units             |

use crate::assets::{GeometryHandle, MaterialHandle};
use crate::renderer::program::parameters::ProgramParameters;
use crate::renderer::settings::{ColorSpace, ToneMapping};
use crate::resources::material::VertexColors;
use crate::scene::drawable::DrawableKind;

/// Canonical permutation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramKey {
    pub bits: u128,
    /// Custom shader text identity, 0 for built-in kinds.
    pub shader: u64,
    /// Hash of material-supplied defines.
    pub defines: u64,
}

#[derive(Default)]
struct BitWriter {
    bits: u128,
    offset: u32,
}

impl BitWriter {
    #[inline]
    fn put(&mut self, width: u32, value: u64) {
        debug_assert!(
            width == 64 || value < (1 << width),
            "value {value} does not fit in {width} bits"
        );
        let mask = (1u128 << width) - 1;
        self.bits |= (u128::from(value) & mask) << self.offset;
        self.offset += width;
    }
}

impl ProgramKey {
    #[must_use]
    pub fn from_parameters(p: &ProgramParameters) -> Self {
        let mut w = BitWriter::default();
        w.put(4, u64::from(p.kind_index));
        w.put(32, u64::from(p.features.bits()));
        w.put(2, match p.vertex_colors {
            VertexColors::None => 0,
            VertexColors::Rgb => 1,
            VertexColors::Rgba => 2,
        });
        w.put(6, u64::from(p.lights.directional));
        w.put(6, u64::from(p.lights.point));
        w.put(6, u64::from(p.lights.spot));
        w.put(6, u64::from(p.lights.hemisphere));
        w.put(8, u64::from(p.shadows));
        w.put(6, u64::from(p.clipping_planes));
        w.put(4, u64::from(p.morph_targets));
        w.put(1, match p.output_color_space {
            ColorSpace::Srgb => 0,
            ColorSpace::Linear => 1,
        });
        w.put(3, match p.tone_mapping {
            ToneMapping::None => 0,
            ToneMapping::Linear => 1,
            ToneMapping::Reinhard => 2,
            ToneMapping::Cineon => 3,
            ToneMapping::AcesFilmic => 4,
            ToneMapping::AgX => 5,
            ToneMapping::Neutral => 6,
        });
        w.put(8, u64::from(p.texture_units));

        Self {
            bits: w.bits,
            shader: p.shader_id,
            defines: if p.custom_defines.is_empty() {
                0
            } else {
                p.custom_defines.compute_hash()
            },
        }
    }
}

/// L1 key: valid as long as none of the versioned inputs changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FastProgramKey {
    pub material: MaterialHandle,
    pub material_version: u64,
    pub geometry: GeometryHandle,
    pub geometry_layout_version: u64,
    pub drawable: DrawableKind,
    pub instanced: bool,
    pub light_hash: u64,
    pub settings_version: u64,
}

impl FastProgramKey {
    /// The draw slot this key belongs to; a newer key for the same slot
    /// supersedes the old one.
    #[must_use]
    pub fn slot(&self) -> (MaterialHandle, GeometryHandle, DrawableKind, bool) {
        (self.material, self.geometry, self.drawable, self.instanced)
    }
}
