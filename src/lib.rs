#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Prism: a retained-mode scene graph with a cached, state-tracking render
//! pipeline over an abstract immediate-mode [`GraphicsDevice`].

pub mod resources;
pub mod assets;
pub mod scene;
pub mod renderer;
pub mod errors;
pub mod utils;

pub use resources::{BufferRef, Geometry, Material, ShaderDefines, Side, TextureRef};
pub use assets::{AssetStore, GeometryHandle, MaterialHandle};
pub use scene::{Camera, CameraView, Drawable, DrawableKind, Light, Node, NodeHandle, Scene, Transform};
pub use renderer::{FrameStats, RenderContext, Renderer, RendererSettings};
pub use renderer::device::{GraphicsDevice, HeadlessDevice};
pub use errors::{PrismError, Result};
pub use utils::interner;
