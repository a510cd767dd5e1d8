//! Headless device.
//!
//! Implements [`GraphicsDevice`] in memory. Every call updates
//! [`DeviceCounters`], draws are recorded as [`DrawRecord`]s, and a
//! [`FaultPlan`] can make upcoming allocations, compiles or state calls fail.
//!
//! Shader text is "compiled" by scanning for `uniform <type> <name>;` and
//! `in <type> <name>;` declarations, which is enough to exercise the
//! program cache's uniform and attribute tables.

use rustc_hash::FxHashMap;
use wgpu::Face;

use super::{
    BufferDescriptor, BufferHandle, DepthState, DeviceError, DeviceLimits, DrawCall,
    FramebufferHandle, GraphicsDevice, IndexBinding, ProgramHandle, ProgramSource, ScissorRect,
    TextureDescriptor, TextureHandle, UniformLocation, VertexBinding, Viewport,
};
use crate::renderer::program::uniforms::UniformValue;
use crate::resources::material::Blending;

/// Running totals of device work.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCounters {
    pub buffers_created: u32,
    pub buffers_destroyed: u32,
    pub buffer_writes: u32,
    pub bytes_uploaded: u64,
    pub textures_created: u32,
    pub textures_destroyed: u32,
    pub texture_writes: u32,
    pub programs_compiled: u32,
    pub programs_destroyed: u32,
    pub uniform_writes: u32,
    pub state_calls: u32,
    pub draw_calls: u32,
}

impl DeviceCounters {
    /// Buffer plus texture uploads.
    #[must_use]
    pub fn uploads(&self) -> u32 {
        self.buffer_writes + self.texture_writes
    }
}

/// Failures to inject into upcoming calls. Each counter is consumed as the
/// matching call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FaultPlan {
    pub fail_allocations: u32,
    pub fail_uploads: u32,
    pub fail_compiles: u32,
    pub reject_state_calls: u32,
}

/// One issued draw with the state it ran under.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: Option<ProgramHandle>,
    pub call: DrawCall,
    pub textures: Vec<(u32, TextureHandle)>,
    pub blending: Option<Blending>,
}

#[derive(Debug)]
struct ProgramRecord {
    uniforms: Vec<String>,
    attributes: Vec<(String, u32)>,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    limits: DeviceLimits,
    next_id: u32,

    buffers: FxHashMap<BufferHandle, Vec<u8>>,
    textures: FxHashMap<TextureHandle, usize>,
    programs: FxHashMap<ProgramHandle, ProgramRecord>,
    /// Uniform locations encode `(program << 16) | index`.
    uniform_values: FxHashMap<UniformLocation, UniformValue>,

    current_program: Option<ProgramHandle>,
    bound_textures: FxHashMap<u32, TextureHandle>,
    blending: Option<Blending>,

    pub counters: DeviceCounters,
    pub faults: FaultPlan,
    pub draws: Vec<DrawRecord>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(DeviceLimits::default())
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_id: 1,
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            programs: FxHashMap::default(),
            uniform_values: FxHashMap::default(),
            current_program: None,
            bound_textures: FxHashMap::default(),
            blending: None,
            counters: DeviceCounters::default(),
            faults: FaultPlan::default(),
            draws: Vec::new(),
        }
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Contents of a live buffer.
    #[must_use]
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Last value sent to `name` on `program`.
    #[must_use]
    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<&UniformValue> {
        let location = self.uniform_location(program, name)?;
        self.uniform_values.get(&location)
    }

    fn state_call(&mut self, call: &'static str) -> Result<(), DeviceError> {
        if self.faults.reject_state_calls > 0 {
            self.faults.reject_state_calls -= 1;
            return Err(DeviceError::Rejected {
                call,
                reason: "injected fault".to_string(),
            });
        }
        self.counters.state_calls += 1;
        Ok(())
    }

    fn allocation(&mut self, what: &'static str, bytes: u64) -> Result<(), DeviceError> {
        if self.faults.fail_allocations > 0 {
            self.faults.fail_allocations -= 1;
            return Err(DeviceError::OutOfMemory { what, bytes });
        }
        Ok(())
    }
}

/// Extracts `name` from declarations of the form `<keyword> <type> <name>;`.
fn declarations(source: &str, keyword: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix(keyword)?.strip_prefix(' ')?;
            let decl = rest.trim_end().strip_suffix(';')?;
            let name = decl.split_whitespace().last()?;
            let name = name.split('[').next().unwrap_or(name);
            Some(name.to_string())
        })
        .collect()
}

impl GraphicsDevice for HeadlessDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, DeviceError> {
        self.allocation("buffer", desc.size)?;
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(handle, vec![0; desc.size as usize]);
        self.counters.buffers_created += 1;
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        if self.faults.fail_uploads > 0 {
            self.faults.fail_uploads -= 1;
            return Err(DeviceError::OutOfMemory {
                what: "buffer upload",
                bytes: data.len() as u64,
            });
        }
        let storage = self.buffers.get_mut(&buffer).ok_or(DeviceError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            return Err(DeviceError::Rejected {
                call: "write_buffer",
                reason: format!("write {start}..{end} exceeds buffer of {} bytes", storage.len()),
            });
        }
        storage[start..end].copy_from_slice(data);
        self.counters.buffer_writes += 1;
        self.counters.bytes_uploaded += data.len() as u64;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_some() {
            self.counters.buffers_destroyed += 1;
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle, DeviceError> {
        let texels = u64::from(desc.desc.width) * u64::from(desc.desc.height);
        self.allocation("texture", texels * 4)?;
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, 0);
        self.counters.textures_created += 1;
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> Result<(), DeviceError> {
        if self.faults.fail_uploads > 0 {
            self.faults.fail_uploads -= 1;
            return Err(DeviceError::OutOfMemory {
                what: "texture upload",
                bytes: data.len() as u64,
            });
        }
        let size = self.textures.get_mut(&texture).ok_or(DeviceError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })?;
        *size = data.len();
        self.counters.texture_writes += 1;
        self.counters.bytes_uploaded += data.len() as u64;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.counters.textures_destroyed += 1;
        }
    }

    fn create_program(&mut self, source: &ProgramSource) -> Result<ProgramHandle, DeviceError> {
        if self.faults.fail_compiles > 0 {
            self.faults.fail_compiles -= 1;
            return Err(DeviceError::CompileFailed {
                label: source.label.clone(),
                log: "injected fault".to_string(),
            });
        }
        self.allocation("program", 0)?;

        let mut uniforms = declarations(&source.vertex, "uniform");
        for name in declarations(&source.fragment, "uniform") {
            if !uniforms.contains(&name) {
                uniforms.push(name);
            }
        }
        let attributes = declarations(&source.vertex, "in")
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i as u32))
            .collect();

        let handle = ProgramHandle(self.next_handle());
        self.programs.insert(handle, ProgramRecord { uniforms, attributes });
        self.counters.programs_compiled += 1;
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program).is_some() {
            self.counters.programs_destroyed += 1;
            self.uniform_values.retain(|loc, _| loc.0 >> 16 != program.0);
            if self.current_program == Some(program) {
                self.current_program = None;
            }
        }
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<String> {
        self.programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let record = self.programs.get(&program)?;
        let index = record.uniforms.iter().position(|u| u == name)?;
        Some(UniformLocation((program.0 << 16) | index as u32))
    }

    fn active_attributes(&self, program: ProgramHandle) -> Vec<(String, u32)> {
        self.programs
            .get(&program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default()
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &UniformValue) -> Result<(), DeviceError> {
        match self.current_program {
            Some(p) if location.0 >> 16 == p.0 => {}
            _ => {
                return Err(DeviceError::Rejected {
                    call: "set_uniform",
                    reason: "location does not belong to the bound program".to_string(),
                });
            }
        }
        self.uniform_values.insert(location, value.clone());
        self.counters.uniform_writes += 1;
        Ok(())
    }

    fn use_program(&mut self, program: ProgramHandle) -> Result<(), DeviceError> {
        if !self.programs.contains_key(&program) {
            return Err(DeviceError::InvalidHandle {
                kind: "program",
                id: program.0,
            });
        }
        self.state_call("use_program")?;
        self.current_program = Some(program);
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, _location: u32, binding: &VertexBinding) -> Result<(), DeviceError> {
        if !self.buffers.contains_key(&binding.buffer) {
            return Err(DeviceError::InvalidHandle {
                kind: "buffer",
                id: binding.buffer.0,
            });
        }
        self.state_call("bind_vertex_buffer")
    }

    fn bind_index_buffer(&mut self, binding: &IndexBinding) -> Result<(), DeviceError> {
        if !self.buffers.contains_key(&binding.buffer) {
            return Err(DeviceError::InvalidHandle {
                kind: "buffer",
                id: binding.buffer.0,
            });
        }
        self.state_call("bind_index_buffer")
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) -> Result<(), DeviceError> {
        if unit >= self.limits.max_texture_units {
            return Err(DeviceError::Rejected {
                call: "bind_texture",
                reason: format!("unit {unit} exceeds {}", self.limits.max_texture_units),
            });
        }
        self.state_call("bind_texture")?;
        self.bound_textures.insert(unit, texture);
        Ok(())
    }

    fn set_blend_mode(&mut self, blending: Blending) -> Result<(), DeviceError> {
        self.state_call("set_blend_mode")?;
        self.blending = Some(blending);
        Ok(())
    }

    fn set_depth_state(&mut self, _depth: DepthState) -> Result<(), DeviceError> {
        self.state_call("set_depth_state")
    }

    fn set_cull_mode(&mut self, _cull: Option<Face>) -> Result<(), DeviceError> {
        self.state_call("set_cull_mode")
    }

    fn bind_framebuffer(&mut self, _framebuffer: Option<FramebufferHandle>) -> Result<(), DeviceError> {
        self.state_call("bind_framebuffer")
    }

    fn set_viewport(&mut self, _viewport: Viewport) -> Result<(), DeviceError> {
        self.state_call("set_viewport")
    }

    fn set_scissor(&mut self, _scissor: Option<ScissorRect>) -> Result<(), DeviceError> {
        self.state_call("set_scissor")
    }

    fn clear(&mut self, _color: [f32; 4], _depth: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), DeviceError> {
        let mut textures: Vec<_> = self.bound_textures.iter().map(|(&u, &t)| (u, t)).collect();
        textures.sort_unstable();
        self.draws.push(DrawRecord {
            program: self.current_program,
            call: call.clone(),
            textures,
            blending: self.blending,
        });
        self.counters.draw_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declarations() {
        let src = "uniform mat4 modelMatrix;\n  uniform vec3 lights[4];\nin vec3 position;\nvoid main() {}";
        assert_eq!(declarations(src, "uniform"), ["modelMatrix", "lights"]);
        assert_eq!(declarations(src, "in"), ["position"]);
    }

    #[test]
    fn injected_allocation_failure_is_consumed() {
        let mut device = HeadlessDevice::default();
        device.faults.fail_allocations = 1;
        let desc = BufferDescriptor {
            label: "test",
            size: 16,
            usage: wgpu::BufferUsages::VERTEX,
        };
        assert!(matches!(
            device.create_buffer(&desc),
            Err(DeviceError::OutOfMemory { .. })
        ));
        assert!(device.create_buffer(&desc).is_ok());
        assert_eq!(device.live_buffers(), 1);
    }
}
