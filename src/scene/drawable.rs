use smallvec::{SmallVec, smallvec};
use wgpu::PrimitiveTopology;

use crate::assets::{GeometryHandle, MaterialHandle};

/// The closed set of things the render list knows how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawableKind {
    Mesh,
    Points,
    Lines,
    Sprite,
}

impl DrawableKind {
    #[must_use]
    pub fn topology(self) -> PrimitiveTopology {
        match self {
            Self::Mesh | Self::Sprite => PrimitiveTopology::TriangleList,
            Self::Points => PrimitiveTopology::PointList,
            Self::Lines => PrimitiveTopology::LineList,
        }
    }
}

/// Drawable component attached to a scene node.
///
/// With a grouped geometry, group `i` draws with `materials[group.material_index]`,
/// falling back to the only material when exactly one is given.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub kind: DrawableKind,
    pub geometry: GeometryHandle,
    pub materials: SmallVec<[MaterialHandle; 1]>,
    /// When false the drawable is listed even outside the view frustum.
    pub frustum_culled: bool,
    /// Instanced draws submit this many instances; 1 for plain draws.
    pub instance_count: u32,
    /// Weights of the geometry's morph targets, in target order.
    pub morph_influences: Vec<f32>,
}

impl Drawable {
    #[must_use]
    pub fn new(kind: DrawableKind, geometry: GeometryHandle, material: MaterialHandle) -> Self {
        Self {
            kind,
            geometry,
            materials: smallvec![material],
            frustum_culled: true,
            instance_count: 1,
            morph_influences: Vec::new(),
        }
    }

    #[must_use]
    pub fn mesh(geometry: GeometryHandle, material: MaterialHandle) -> Self {
        Self::new(DrawableKind::Mesh, geometry, material)
    }

    #[must_use]
    pub fn points(geometry: GeometryHandle, material: MaterialHandle) -> Self {
        Self::new(DrawableKind::Points, geometry, material)
    }

    #[must_use]
    pub fn lines(geometry: GeometryHandle, material: MaterialHandle) -> Self {
        Self::new(DrawableKind::Lines, geometry, material)
    }

    #[must_use]
    pub fn sprite(geometry: GeometryHandle, material: MaterialHandle) -> Self {
        Self::new(DrawableKind::Sprite, geometry, material)
    }

    /// Multi-material drawable for grouped geometries.
    #[must_use]
    pub fn with_materials(
        kind: DrawableKind,
        geometry: GeometryHandle,
        materials: impl IntoIterator<Item = MaterialHandle>,
    ) -> Self {
        Self {
            kind,
            geometry,
            materials: materials.into_iter().collect(),
            frustum_culled: true,
            instance_count: 1,
            morph_influences: Vec::new(),
        }
    }

    /// Material for a group's material index.
    #[must_use]
    pub fn material_for(&self, material_index: u32) -> Option<MaterialHandle> {
        match self.materials.as_slice() {
            [only] => Some(*only),
            all => all.get(material_index as usize).copied(),
        }
    }

    #[must_use]
    pub fn primary_material(&self) -> Option<MaterialHandle> {
        self.materials.first().copied()
    }
}
