//! Asset storage for geometries and materials.
//!
//! Drawables reference assets by handle; the renderer resolves handles
//! against an [`AssetStore`] every frame.

pub mod handle;
pub mod storage;

pub use handle::{GeometryHandle, MaterialHandle};
pub use storage::AssetStorage;

use crate::resources::{Geometry, Material};

#[derive(Debug, Default)]
pub struct AssetStore {
    pub geometries: AssetStorage<GeometryHandle, Geometry>,
    pub materials: AssetStorage<MaterialHandle, Material>,
}

impl AssetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryHandle {
        self.geometries.add(geometry)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        self.materials.add(material)
    }
}
