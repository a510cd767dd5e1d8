use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Sampling state uploaded alongside the texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSampler {
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
}

impl Default for TextureSampler {
    fn default() -> Self {
        Self {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
        }
    }
}

/// Size and format of a texture's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub format: wgpu::TextureFormat,
}

impl TextureDesc {
    #[must_use]
    pub fn new_2d(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            format,
        }
    }

    /// Largest edge, checked against the device's maximum texture size.
    #[inline]
    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.width.max(self.height)
    }
}

#[derive(Debug)]
struct TextureInner {
    desc: TextureDesc,
    sampler: TextureSampler,
    data: Vec<u8>,
}

/// CPU-side texture: pixel data plus a version counter.
///
/// Decoding can happen on any thread; once the data is in place the texture
/// is handed to the render thread, which uploads it on first use and again
/// whenever the version moves.
#[derive(Debug)]
pub struct TextureData {
    id: u64,
    label: String,
    version: AtomicU64,
    inner: RwLock<TextureInner>,
}

/// Shared handle to a [`TextureData`].
#[derive(Debug, Clone)]
pub struct TextureRef(Arc<TextureData>);

impl PartialEq for TextureRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TextureRef {}

impl std::hash::Hash for TextureRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl TextureRef {
    pub fn new(label: &str, desc: TextureDesc, data: Vec<u8>) -> Self {
        Self(Arc::new(TextureData {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            label: label.to_string(),
            version: AtomicU64::new(1),
            inner: RwLock::new(TextureInner {
                desc,
                sampler: TextureSampler::default(),
                data,
            }),
        }))
    }

    /// 2D RGBA8 texture from raw pixels.
    pub fn new_rgba8(label: &str, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(
            label,
            TextureDesc::new_2d(width, height, wgpu::TextureFormat::Rgba8Unorm),
            pixels,
        )
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.0.version.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }

    #[must_use]
    pub fn desc(&self) -> TextureDesc {
        self.0.inner.read().desc
    }

    #[must_use]
    pub fn sampler(&self) -> TextureSampler {
        self.0.inner.read().sampler
    }

    pub fn read_data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.0.inner.read(), |inner| inner.data.as_slice())
    }

    /// Replaces the pixels, keeping size and format.
    pub fn update_data(&self, pixels: Vec<u8>) {
        let mut inner = self.0.inner.write();
        inner.data = pixels;
        self.0.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Replaces size, format and pixels. The GPU texture is re-created.
    pub fn resize(&self, desc: TextureDesc, pixels: Vec<u8>) {
        let mut inner = self.0.inner.write();
        inner.desc = desc;
        inner.data = pixels;
        self.0.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_sampler(&self, sampler: TextureSampler) {
        let mut inner = self.0.inner.write();
        if inner.sampler != sampler {
            inner.sampler = sampler;
            self.0.version.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Deref for TextureRef {
    type Target = TextureData;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
