use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use smallvec::SmallVec;

// Global buffer ID generator
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Ranged writes beyond this count collapse into a full re-upload.
const MAX_UPDATE_RANGES: usize = 32;

/// A byte range of a buffer that changed since some version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRange {
    pub offset: u64,
    pub size: u64,
}

impl UpdateRange {
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug, Default)]
struct BufferInner {
    data: Vec<u8>,
    /// Ranged writes, tagged with the version each one produced.
    ranges: SmallVec<[(u64, UpdateRange); 4]>,
    /// Version produced by the most recent whole-buffer change.
    full_since: u64,
}

/// CPU-side data buffer.
///
/// Holds the authoritative copy of vertex, index or uniform data. The version
/// is readable without locking so the per-frame "is the GPU copy current?"
/// check stays cheap. Ranged writes are remembered so a cache can upload only
/// the bytes that changed.
#[derive(Debug)]
pub struct DataBuffer {
    id: u64,
    label: String,
    usage: wgpu::BufferUsages,
    version: AtomicU64,
    inner: RwLock<BufferInner>,
}

/// Shared handle to a [`DataBuffer`].
///
/// Cloning shares storage: every clone (and every attribute view built on it)
/// resolves to the same cache entry and the same GPU buffer.
#[derive(Debug, Clone)]
pub struct BufferRef(Arc<DataBuffer>);

impl PartialEq for BufferRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for BufferRef {}

impl std::hash::Hash for BufferRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl BufferRef {
    pub fn new<T: Pod>(data: &[T], usage: wgpu::BufferUsages, label: Option<&str>) -> Self {
        Self::from_vec(bytemuck::cast_slice(data).to_vec(), usage, label)
    }

    pub fn from_bytes(data: &[u8], usage: wgpu::BufferUsages, label: Option<&str>) -> Self {
        Self::from_vec(data.to_vec(), usage, label)
    }

    pub fn with_capacity(capacity: usize, usage: wgpu::BufferUsages, label: Option<&str>) -> Self {
        Self::from_vec(vec![0u8; capacity], usage, label)
    }

    fn from_vec(data: Vec<u8>, usage: wgpu::BufferUsages, label: Option<&str>) -> Self {
        Self(Arc::new(DataBuffer {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            label: label.unwrap_or("Buffer").to_string(),
            usage,
            version: AtomicU64::new(1),
            inner: RwLock::new(BufferInner {
                data,
                ranges: SmallVec::new(),
                full_since: 1,
            }),
        }))
    }

    // === Lock-free metadata ===

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.0.version.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[inline]
    #[must_use]
    pub fn usage(&self) -> wgpu::BufferUsages {
        self.0.usage
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Number of handles sharing this storage.
    #[must_use]
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    // === Data access ===

    /// Byte length of the current contents.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.0.inner.read().data.len()
    }

    pub fn read_data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.0.inner.read(), |inner| inner.data.as_slice())
    }

    /// Replaces the whole contents. Any GPU copy must be fully re-uploaded.
    pub fn replace<T: Pod>(&self, data: &[T]) {
        let mut inner = self.0.inner.write();
        inner.data.clear();
        inner.data.extend_from_slice(bytemuck::cast_slice(data));
        self.bump_full(&mut inner);
    }

    /// Edits the contents in place as a whole-buffer change.
    pub fn modify(&self, f: impl FnOnce(&mut Vec<u8>)) {
        let mut inner = self.0.inner.write();
        f(&mut inner.data);
        self.bump_full(&mut inner);
    }

    /// Overwrites `data.len()` bytes starting at `byte_offset` and records the
    /// range so a cache can perform a partial upload.
    ///
    /// # Panics
    ///
    /// Panics if the write extends past the end of the buffer.
    pub fn write_range<T: Pod>(&self, byte_offset: u64, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut inner = self.0.inner.write();
        let start = byte_offset as usize;
        let end = start + bytes.len();
        assert!(
            end <= inner.data.len(),
            "write_range {start}..{end} out of bounds for buffer '{}' of {} bytes",
            self.0.label,
            inner.data.len()
        );
        inner.data[start..end].copy_from_slice(bytes);

        let version = self.0.version.load(Ordering::Acquire) + 1;
        if inner.ranges.len() >= MAX_UPDATE_RANGES {
            inner.ranges.clear();
            inner.full_since = version;
        } else {
            inner.ranges.push((
                version,
                UpdateRange {
                    offset: byte_offset,
                    size: bytes.len() as u64,
                },
            ));
        }
        self.0.version.store(version, Ordering::Release);
    }

    /// Ranges changed after version `since`, or `None` when a whole-buffer
    /// change happened in the meantime and only a full upload is correct.
    #[must_use]
    pub fn ranges_since(&self, since: u64) -> Option<SmallVec<[UpdateRange; 4]>> {
        let inner = self.0.inner.read();
        if since == 0 || inner.full_since > since {
            return None;
        }
        Some(
            inner
                .ranges
                .iter()
                .filter(|(v, _)| *v > since)
                .map(|&(_, r)| r)
                .collect(),
        )
    }

    /// Forgets recorded ranges. Consumers that are behind fall back to a full
    /// upload.
    pub fn clear_update_ranges(&self) {
        let mut inner = self.0.inner.write();
        inner.ranges.clear();
        inner.full_since = self.0.version.load(Ordering::Acquire);
    }

    fn bump_full(&self, inner: &mut BufferInner) {
        let version = self.0.version.load(Ordering::Acquire) + 1;
        inner.ranges.clear();
        inner.full_since = version;
        self.0.version.store(version, Ordering::Release);
    }
}

impl Deref for BufferRef {
    type Target = DataBuffer;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
