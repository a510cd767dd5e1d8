//! Render Context
//!
//! The [`RenderContext`] bundles one graphics device with the caches that
//! mirror its contents: bound state, uploaded resources and compiled
//! programs. Nothing here is global; several contexts (an on-screen one and
//! an off-screen one, say) can live side by side.

use crate::errors::Result;
use crate::renderer::device::GraphicsDevice;
use crate::renderer::program::{ProgramCache, ShaderSourceProvider, TemplateShaderSource};
use crate::renderer::resource_cache::ResourceCache;
use crate::renderer::state_cache::GpuStateCache;

#[derive(Debug)]
pub struct RenderContext<D: GraphicsDevice> {
    pub device: D,
    pub state: GpuStateCache,
    pub resources: ResourceCache,
    pub programs: ProgramCache,
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Context using the built-in shader templates.
    pub fn new(device: D) -> Result<Self> {
        Ok(Self::with_source(device, TemplateShaderSource::new()?))
    }

    #[must_use]
    pub fn with_source(device: D, source: impl ShaderSourceProvider + 'static) -> Self {
        crate::utils::interner::preload_common_defines();
        Self {
            device,
            state: GpuStateCache::new(),
            resources: ResourceCache::new(),
            programs: ProgramCache::new(source),
        }
    }

    /// Forgets mirrored device state after out-of-band device use.
    pub fn reset_state(&mut self) {
        self.state.reset();
    }

    /// Releases every device resource the caches own.
    pub fn release_all(&mut self) {
        self.programs.clear(&mut self.device);
        self.programs.take_destroyed();
        self.resources.clear(&mut self.device);
        self.state.reset();
    }
}
