//! CPU-side resource definitions.
//!
//! Data the renderer consumes but does not own on the GPU:
//! - Buffer: raw vertex / index data with version and update-range tracking
//! - Geometry: attribute views, index buffer, groups, bounding volumes
//! - Texture: pixel data with a version counter
//! - Material: shading kind, settings, uniforms and texture slots
//! - ShaderDefines: the define part of a program permutation

pub mod buffer;
pub mod geometry;
pub mod material;
pub mod shader_defines;
pub mod texture;
pub mod version_tracker;

pub use buffer::{BufferRef, UpdateRange};
pub use geometry::{
    Attribute, BoundingBox, BoundingSphere, ComponentType, Geometry, GeometryGroup, IndexBuffer,
    InterleavedBuffer,
};
pub use material::{
    Blending, CustomShader, Material, MaterialKind, MaterialMaps, MaterialSettings,
    MaterialUniforms, Side, VertexColors,
};
pub use shader_defines::ShaderDefines;
pub use texture::{TextureDesc, TextureRef, TextureSampler};
pub use version_tracker::ChangeTracker;
