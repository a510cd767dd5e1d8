//! Scene graph.
//!
//! - Node: hierarchy links and per-node draw state
//! - Transform: local TRS with lazily derived local / world matrices
//! - TransformSystem: iterative world-matrix propagation
//! - Scene: node storage plus drawable and light components
//! - Camera: projection and placement, read once per frame as a `CameraView`

pub mod camera;
pub mod drawable;
pub mod light;
pub mod node;
pub mod scene;
pub mod transform;
pub mod transform_system;

pub use camera::{Camera, CameraView, Frustum, ProjectionType};
pub use drawable::{Drawable, DrawableKind};
pub use light::{Light, LightKind, PointLight, SpotLight};
pub use node::Node;
pub use scene::Scene;
pub use transform::Transform;
pub use transform_system::TransformStats;

use slotmap::new_key_type;

new_key_type! {
    pub struct NodeHandle;
}
