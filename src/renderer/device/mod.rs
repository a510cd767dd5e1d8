//! Graphics device contract.
//!
//! The renderer talks to the GPU through [`GraphicsDevice`]: an immediate,
//! stateful bind-then-draw context. Everything above this trait is
//! API-agnostic; descriptor enums are borrowed from `wgpu` so formats and
//! topologies have one vocabulary across the crate.
//!
//! [`HeadlessDevice`] implements the contract without a GPU, recording calls
//! and counters.

pub mod headless;

pub use headless::{DeviceCounters, DrawRecord, FaultPlan, HeadlessDevice};

use std::ops::Range;

use thiserror::Error;
use wgpu::{BufferUsages, CompareFunction, Face, IndexFormat, PrimitiveTopology, VertexFormat};

use crate::renderer::program::uniforms::UniformValue;
use crate::resources::material::Blending;
use crate::resources::texture::{TextureDesc, TextureSampler};

// ============================================================================
// Handles
// ============================================================================

macro_rules! device_handle {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

device_handle!(
    BufferHandle,
    TextureHandle,
    ProgramHandle,
    FramebufferHandle,
    UniformLocation,
);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Allocation of a buffer, texture or program failed.
    #[error("Out of device memory allocating {what} ({bytes} bytes)")]
    OutOfMemory { what: &'static str, bytes: u64 },

    #[error("Program '{label}' failed to compile: {log}")]
    CompileFailed { label: String, log: String },

    /// The device refused a state-setting call. Only the current draw is
    /// affected.
    #[error("Device rejected {call}: {reason}")]
    Rejected { call: &'static str, reason: String },

    #[error("Invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },
}

impl DeviceError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

// ============================================================================
// Descriptors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_units: u32,
    pub max_samples: u32,
    pub max_texture_size: u32,
    pub max_vertex_attributes: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_units: 16,
            max_samples: 4,
            max_texture_size: 8192,
            max_vertex_attributes: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub size: u64,
    pub usage: BufferUsages,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub desc: TextureDesc,
    pub sampler: TextureSampler,
}

/// Shader text for one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
}

/// Where a vertex attribute location fetches its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub stride: u64,
    pub format: VertexFormat,
    pub instanced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    pub buffer: BufferHandle,
    pub format: IndexFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
    pub compare: CompareFunction,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
            compare: CompareFunction::LessEqual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub topology: PrimitiveTopology,
    /// Index range for indexed draws, vertex range otherwise.
    pub range: Range<u32>,
    pub indexed: bool,
    pub instances: u32,
}

// ============================================================================
// Contract
// ============================================================================

/// Immediate-mode graphics context.
///
/// Uniform calls apply to the program last passed to
/// [`use_program`](Self::use_program).
pub trait GraphicsDevice {
    fn limits(&self) -> DeviceLimits;

    // --- Buffers ---
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, DeviceError>;
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<(), DeviceError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // --- Textures ---
    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle, DeviceError>;
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), DeviceError>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    // --- Programs ---
    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle, DeviceError>;
    fn destroy_program(&mut self, program: ProgramHandle);
    /// Names of the uniforms the compiled program actually uses.
    fn active_uniforms(&self, program: ProgramHandle) -> Vec<String>;
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    /// Names of the vertex inputs the program reads, with their locations.
    fn active_attributes(&self, program: ProgramHandle) -> Vec<(String, u32)>;
    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<(), DeviceError>;

    // --- State ---
    fn use_program(&mut self, program: ProgramHandle) -> Result<(), DeviceError>;
    fn bind_vertex_buffer(&mut self, location: u32, binding: &VertexBinding) -> Result<(), DeviceError>;
    fn bind_index_buffer(&mut self, binding: &IndexBinding) -> Result<(), DeviceError>;
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<(), DeviceError>;
    fn set_blend_mode(&mut self, blending: Blending) -> Result<(), DeviceError>;
    fn set_depth_state(&mut self, depth: DepthState) -> Result<(), DeviceError>;
    fn set_cull_mode(&mut self, cull: Option<Face>) -> Result<(), DeviceError>;
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) -> Result<(), DeviceError>;
    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), DeviceError>;
    fn set_scissor(&mut self, scissor: Option<ScissorRect>) -> Result<(), DeviceError>;

    // --- Commands ---
    fn clear(&mut self, color: [f32; 4], depth: bool) -> Result<(), DeviceError>;
    fn draw(&mut self, call: &DrawCall) -> Result<(), DeviceError>;
}
