//! Global String Interner
//!
//! Turns shader define names and values into integer [`Symbol`]s so define
//! sets can be compared and hashed without touching string data.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact integer identifier for an interned string.
pub type Symbol = Spur;

/// Interns a string, returning its Symbol.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up an already-interned string without allocating.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a Symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    INTERNER.resolve(&sym)
}

/// Pre-interns the define names every program permutation touches, keeping
/// first-frame key derivation off the interner's write path.
pub fn preload_common_defines() {
    let common = [
        "USE_MAP",
        "USE_NORMAL_MAP",
        "USE_EMISSIVE_MAP",
        "USE_ROUGHNESS_MAP",
        "USE_METALNESS_MAP",
        "USE_AO_MAP",
        "USE_ALPHA_MAP",
        "USE_ENV_MAP",
        "USE_VERTEX_COLOR",
        "USE_VERTEX_ALPHA",
        "USE_FOG",
        "USE_TRANSMISSION",
        "USE_MORPH_TARGETS",
        "USE_INSTANCING",
        "HAS_NORMAL",
        "HAS_UV",
        "HAS_TANGENT",
        "NUM_DIR_LIGHTS",
        "NUM_POINT_LIGHTS",
        "NUM_SPOT_LIGHTS",
        "NUM_HEMI_LIGHTS",
        "NUM_CLIPPING_PLANES",
        "TONE_MAPPING",
        "OUTPUT_COLOR_SPACE",
        "1",
    ];

    for name in common {
        intern(name);
    }
}
