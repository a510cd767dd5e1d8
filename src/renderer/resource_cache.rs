//! Resource Cache
//!
//! Maps CPU-side [`BufferRef`]s and [`TextureRef`]s to device handles.
//! Entries are keyed by the CPU object's id, so clones of a `BufferRef`
//! (and every attribute view over an interleaved buffer) resolve to the same
//! device buffer.
//!
//! Each entry mirrors the CPU version it last uploaded. An entry whose
//! version matches costs no device calls; a stale one is re-uploaded, using
//! the buffer's recorded update ranges when every change since the cached
//! version was ranged. A failure while creating or uploading leaves the
//! previous entry untouched (or no entry at all).

use rustc_hash::FxHashMap;

use crate::errors::{PrismError, Result};
use crate::renderer::device::{
    BufferDescriptor, BufferHandle, GraphicsDevice, TextureDescriptor, TextureHandle,
};
use crate::resources::buffer::BufferRef;
use crate::resources::texture::{TextureDesc, TextureRef, TextureSampler};

#[derive(Debug, Clone, Copy)]
pub struct GpuBuffer {
    pub handle: BufferHandle,
    pub size: u64,
    pub version: u64,
    pub usage: wgpu::BufferUsages,
    last_used_frame: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub desc: TextureDesc,
    pub sampler: TextureSampler,
    pub version: u64,
    last_used_frame: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCacheStats {
    pub buffers_allocated: u32,
    pub buffers_released: u32,
    pub full_uploads: u32,
    pub partial_uploads: u32,
    pub bytes_uploaded: u64,
    pub textures_allocated: u32,
    pub textures_released: u32,
    pub texture_uploads: u32,
}

#[derive(Debug, Default)]
pub struct ResourceCache {
    buffers: FxHashMap<u64, GpuBuffer>,
    textures: FxHashMap<u64, GpuTexture>,
    frame: u64,
    stats: ResourceCacheStats,
}

/// Outcome of bringing one resource up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upload {
    /// Already current; nothing was sent.
    None,
    Partial,
    Full,
    /// A new device resource was allocated and filled.
    Created,
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a frame for idle tracking.
    pub fn begin_frame(&mut self) {
        self.frame += 1;
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Device handle for `buffer`, allocating or re-uploading as needed.
    pub fn get_or_create_buffer<D: GraphicsDevice>(&mut self, device: &mut D, buffer: &BufferRef) -> Result<BufferHandle> {
        self.update_buffer(device, buffer)?;
        self.buffers
            .get(&buffer.id())
            .map(|e| e.handle)
            .ok_or_else(|| PrismError::AssetNotFound(format!("buffer '{}'", buffer.label())))
    }

    /// Brings the device copy of `buffer` up to date.
    pub fn update_buffer<D: GraphicsDevice>(&mut self, device: &mut D, buffer: &BufferRef) -> Result<Upload> {
        let frame = self.frame;
        let cpu_version = buffer.version();

        let Some(entry) = self.buffers.get_mut(&buffer.id()) else {
            let created = self.create_buffer(device, buffer)?;
            self.buffers.insert(buffer.id(), created);
            return Ok(Upload::Created);
        };
        entry.last_used_frame = frame;
        if entry.version == cpu_version {
            return Ok(Upload::None);
        }

        let data = buffer.read_data();
        if data.len() as u64 > entry.size {
            drop(data);
            let old = entry.handle;
            let created = self.create_buffer(device, buffer)?;
            self.buffers.insert(buffer.id(), created);
            device.destroy_buffer(old);
            self.stats.buffers_released += 1;
            log::debug!("Re-created buffer '{}' after growth", buffer.label());
            return Ok(Upload::Created);
        }

        let outcome = match buffer.ranges_since(entry.version) {
            Some(ranges) if !ranges.is_empty() => {
                for r in &ranges {
                    let range = r.offset as usize..r.end() as usize;
                    device.write_buffer(entry.handle, r.offset, &data[range])?;
                    self.stats.bytes_uploaded += r.size;
                }
                self.stats.partial_uploads += 1;
                Upload::Partial
            }
            _ => {
                device.write_buffer(entry.handle, 0, &data)?;
                self.stats.bytes_uploaded += data.len() as u64;
                self.stats.full_uploads += 1;
                Upload::Full
            }
        };
        entry.version = cpu_version;
        log::trace!("Uploaded buffer '{}' ({outcome:?})", buffer.label());
        Ok(outcome)
    }

    fn create_buffer<D: GraphicsDevice>(&mut self, device: &mut D, buffer: &BufferRef) -> Result<GpuBuffer> {
        // Version is read before the data so a concurrent write re-uploads.
        let version = buffer.version();
        let data = buffer.read_data();
        let size = (data.len() as u64).max(4);
        let handle = device.create_buffer(&BufferDescriptor {
            label: buffer.label(),
            size,
            usage: buffer.usage(),
        })?;
        if let Err(e) = device.write_buffer(handle, 0, &data) {
            device.destroy_buffer(handle);
            return Err(e.into());
        }
        self.stats.buffers_allocated += 1;
        self.stats.full_uploads += 1;
        self.stats.bytes_uploaded += data.len() as u64;
        log::debug!("Allocated buffer '{}' ({size} bytes)", buffer.label());
        Ok(GpuBuffer {
            handle,
            size,
            version,
            usage: buffer.usage(),
            last_used_frame: self.frame,
        })
    }

    /// Releases the device buffer. A no-op for buffers never uploaded.
    pub fn remove_buffer<D: GraphicsDevice>(&mut self, device: &mut D, buffer: &BufferRef) -> Option<BufferHandle> {
        let entry = self.buffers.remove(&buffer.id())?;
        device.destroy_buffer(entry.handle);
        self.stats.buffers_released += 1;
        Some(entry.handle)
    }

    #[must_use]
    pub fn buffer(&self, buffer: &BufferRef) -> Option<&GpuBuffer> {
        self.buffers.get(&buffer.id())
    }

    // ========================================================================
    // Textures
    // ========================================================================

    pub fn get_or_create_texture<D: GraphicsDevice>(&mut self, device: &mut D, texture: &TextureRef) -> Result<TextureHandle> {
        self.update_texture(device, texture)?;
        self.textures
            .get(&texture.id())
            .map(|e| e.handle)
            .ok_or_else(|| PrismError::AssetNotFound(format!("texture '{}'", texture.label())))
    }

    /// Brings the device copy of `texture` up to date. A change of size,
    /// format or sampler re-creates the device texture.
    pub fn update_texture<D: GraphicsDevice>(&mut self, device: &mut D, texture: &TextureRef) -> Result<Upload> {
        let frame = self.frame;
        let cpu_version = texture.version();

        let Some(entry) = self.textures.get_mut(&texture.id()) else {
            let created = self.create_texture(device, texture)?;
            self.textures.insert(texture.id(), created);
            return Ok(Upload::Created);
        };
        entry.last_used_frame = frame;
        if entry.version == cpu_version {
            return Ok(Upload::None);
        }

        if entry.desc != texture.desc() || entry.sampler != texture.sampler() {
            let old = entry.handle;
            let created = self.create_texture(device, texture)?;
            self.textures.insert(texture.id(), created);
            device.destroy_texture(old);
            self.stats.textures_released += 1;
            return Ok(Upload::Created);
        }

        device.write_texture(entry.handle, &texture.read_data())?;
        entry.version = cpu_version;
        self.stats.texture_uploads += 1;
        Ok(Upload::Full)
    }

    fn create_texture<D: GraphicsDevice>(&mut self, device: &mut D, texture: &TextureRef) -> Result<GpuTexture> {
        let version = texture.version();
        let desc = texture.desc();
        let sampler = texture.sampler();

        let max = device.limits().max_texture_size;
        if desc.max_dimension() > max {
            return Err(PrismError::DeviceLimitExceeded {
                what: "texture size",
                requested: desc.max_dimension(),
                max,
            });
        }

        let handle = device.create_texture(&TextureDescriptor {
            label: texture.label(),
            desc,
            sampler,
        })?;
        if let Err(e) = device.write_texture(handle, &texture.read_data()) {
            device.destroy_texture(handle);
            return Err(e.into());
        }
        self.stats.textures_allocated += 1;
        self.stats.texture_uploads += 1;
        log::debug!(
            "Allocated texture '{}' ({}x{} {:?})",
            texture.label(),
            desc.width,
            desc.height,
            desc.format
        );
        Ok(GpuTexture {
            handle,
            desc,
            sampler,
            version,
            last_used_frame: self.frame,
        })
    }

    pub fn remove_texture<D: GraphicsDevice>(&mut self, device: &mut D, texture: &TextureRef) -> Option<TextureHandle> {
        let entry = self.textures.remove(&texture.id())?;
        device.destroy_texture(entry.handle);
        self.stats.textures_released += 1;
        Some(entry.handle)
    }

    #[must_use]
    pub fn texture(&self, texture: &TextureRef) -> Option<&GpuTexture> {
        self.textures.get(&texture.id())
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Releases entries not touched during the last `max_idle_frames`
    /// frames. Returns the released handles so bound state can be forgotten.
    pub fn prune<D: GraphicsDevice>(&mut self, device: &mut D, max_idle_frames: u64) -> (Vec<BufferHandle>, Vec<TextureHandle>) {
        let cutoff = self.frame.saturating_sub(max_idle_frames);

        let buffers: Vec<BufferHandle> = self
            .buffers
            .extract_if(|_, e| e.last_used_frame < cutoff)
            .map(|(_, e)| e.handle)
            .collect();
        let textures: Vec<TextureHandle> = self
            .textures
            .extract_if(|_, e| e.last_used_frame < cutoff)
            .map(|(_, e)| e.handle)
            .collect();

        for &handle in &buffers {
            device.destroy_buffer(handle);
        }
        for &handle in &textures {
            device.destroy_texture(handle);
        }
        self.stats.buffers_released += buffers.len() as u32;
        self.stats.textures_released += textures.len() as u32;
        if !buffers.is_empty() || !textures.is_empty() {
            log::debug!("Pruned {} buffers, {} textures", buffers.len(), textures.len());
        }
        (buffers, textures)
    }

    /// Releases everything.
    pub fn clear<D: GraphicsDevice>(&mut self, device: &mut D) {
        for (_, e) in self.buffers.drain() {
            device.destroy_buffer(e.handle);
            self.stats.buffers_released += 1;
        }
        for (_, e) in self.textures.drain() {
            device.destroy_texture(e.handle);
            self.stats.textures_released += 1;
        }
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn stats(&self) -> ResourceCacheStats {
        self.stats
    }
}
