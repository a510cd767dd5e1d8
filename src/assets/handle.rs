//! Asset handles.
//!
//! Generational slotmap keys: a handle to a removed asset never resolves to a
//! later asset that reuses the slot.

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a [`Geometry`](crate::resources::Geometry) in an [`AssetStore`](super::AssetStore).
    pub struct GeometryHandle;
    /// Handle to a [`Material`](crate::resources::Material) in an [`AssetStore`](super::AssetStore).
    pub struct MaterialHandle;
}
