//! GPU State Cache
//!
//! Mirrors the device's bound state so redundant state calls are never
//! issued. Every slot starts as `None` ("unknown"), which always differs from
//! a requested value. Setters return `Ok(true)` when a device call was made
//! and `Ok(false)` when it was elided.
//!
//! A failed device call leaves its slot unknown and propagates the error.

use wgpu::Face;

use crate::renderer::device::{
    BufferHandle, DepthState, DeviceError, FramebufferHandle, GraphicsDevice, IndexBinding,
    ProgramHandle, ScissorRect, TextureHandle, VertexBinding, Viewport,
};
use crate::resources::material::Blending;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateCacheStats {
    pub issued: u64,
    pub elided: u64,
}

#[derive(Debug, Default)]
pub struct GpuStateCache {
    program: Option<ProgramHandle>,
    vertex_buffers: Vec<Option<VertexBinding>>,
    index_buffer: Option<IndexBinding>,
    blending: Option<Blending>,
    depth: Option<DepthState>,
    /// Outer `None` is unknown; `Some(None)` is culling disabled.
    cull: Option<Option<Face>>,
    textures: Vec<Option<TextureHandle>>,
    framebuffer: Option<Option<FramebufferHandle>>,
    viewport: Option<Viewport>,
    scissor: Option<Option<ScissorRect>>,
    stats: StateCacheStats,
}

#[inline]
fn apply<T: PartialEq + Copy>(
    slot: &mut Option<T>,
    value: T,
    stats: &mut StateCacheStats,
    call: impl FnOnce(T) -> Result<(), DeviceError>,
) -> Result<bool, DeviceError> {
    if *slot == Some(value) {
        stats.elided += 1;
        return Ok(false);
    }
    match call(value) {
        Ok(()) => {
            *slot = Some(value);
            stats.issued += 1;
            Ok(true)
        }
        Err(e) => {
            *slot = None;
            Err(e)
        }
    }
}

fn indexed_slot<T>(slots: &mut Vec<Option<T>>, index: u32) -> &mut Option<T> {
    let index = index as usize;
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
    &mut slots[index]
}

impl GpuStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_program<D: GraphicsDevice>(&mut self, device: &mut D, program: ProgramHandle) -> Result<bool, DeviceError> {
        apply(&mut self.program, program, &mut self.stats, |p| device.use_program(p))
    }

    pub fn bind_vertex_buffer<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        location: u32,
        binding: VertexBinding,
    ) -> Result<bool, DeviceError> {
        let slot = indexed_slot(&mut self.vertex_buffers, location);
        apply(slot, binding, &mut self.stats, |b| device.bind_vertex_buffer(location, &b))
    }

    pub fn bind_index_buffer<D: GraphicsDevice>(&mut self, device: &mut D, binding: IndexBinding) -> Result<bool, DeviceError> {
        apply(&mut self.index_buffer, binding, &mut self.stats, |b| device.bind_index_buffer(&b))
    }

    pub fn set_blend_mode<D: GraphicsDevice>(&mut self, device: &mut D, blending: Blending) -> Result<bool, DeviceError> {
        apply(&mut self.blending, blending, &mut self.stats, |b| device.set_blend_mode(b))
    }

    pub fn set_depth_state<D: GraphicsDevice>(&mut self, device: &mut D, depth: DepthState) -> Result<bool, DeviceError> {
        apply(&mut self.depth, depth, &mut self.stats, |d| device.set_depth_state(d))
    }

    /// Convenience over [`set_depth_state`](Self::set_depth_state) keeping
    /// the other depth fields.
    pub fn set_depth_test<D: GraphicsDevice>(&mut self, device: &mut D, test: bool) -> Result<bool, DeviceError> {
        let depth = DepthState {
            test,
            ..self.depth.unwrap_or_default()
        };
        self.set_depth_state(device, depth)
    }

    pub fn set_cull_mode<D: GraphicsDevice>(&mut self, device: &mut D, cull: Option<Face>) -> Result<bool, DeviceError> {
        apply(&mut self.cull, cull, &mut self.stats, |c| device.set_cull_mode(c))
    }

    pub fn bind_texture<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        unit: u32,
        texture: TextureHandle,
    ) -> Result<bool, DeviceError> {
        let slot = indexed_slot(&mut self.textures, unit);
        apply(slot, texture, &mut self.stats, |t| device.bind_texture(unit, t))
    }

    pub fn bind_framebuffer<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        framebuffer: Option<FramebufferHandle>,
    ) -> Result<bool, DeviceError> {
        apply(&mut self.framebuffer, framebuffer, &mut self.stats, |f| device.bind_framebuffer(f))
    }

    pub fn set_viewport<D: GraphicsDevice>(&mut self, device: &mut D, viewport: Viewport) -> Result<bool, DeviceError> {
        apply(&mut self.viewport, viewport, &mut self.stats, |v| device.set_viewport(v))
    }

    pub fn set_scissor<D: GraphicsDevice>(&mut self, device: &mut D, scissor: Option<ScissorRect>) -> Result<bool, DeviceError> {
        apply(&mut self.scissor, scissor, &mut self.stats, |s| device.set_scissor(s))
    }

    /// Forgets every mirrored slot. Call after anything else touched the
    /// device.
    pub fn reset(&mut self) {
        let stats = self.stats;
        *self = Self {
            stats,
            ..Self::default()
        };
    }

    /// Clears slots referring to a destroyed buffer so a recycled handle is
    /// never mistaken for the old binding.
    pub fn forget_buffer(&mut self, buffer: BufferHandle) {
        for slot in &mut self.vertex_buffers {
            if slot.is_some_and(|b| b.buffer == buffer) {
                *slot = None;
            }
        }
        if self.index_buffer.is_some_and(|b| b.buffer == buffer) {
            self.index_buffer = None;
        }
    }

    pub fn forget_texture(&mut self, texture: TextureHandle) {
        for slot in &mut self.textures {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    pub fn forget_program(&mut self, program: ProgramHandle) {
        if self.program == Some(program) {
            self.program = None;
        }
    }

    #[inline]
    #[must_use]
    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.program
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> StateCacheStats {
        self.stats
    }
}
