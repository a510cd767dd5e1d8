//! Program Cache
//!
//! Owns every compiled program. Programs are stored in a slotmap and
//! addressed through generational [`ProgramId`]s, so an id whose program
//! was destroyed can never resolve to a newer one.
//!
//! # Two-Level Caching (L1 / L2)
//!
//! The **L2** map (`ProgramKey` → `ProgramId`) deduplicates compiled
//! programs: identical permutations share one program and bump its
//! reference count.
//!
//! The **L1** map holds one binding per draw slot
//! (material, geometry, drawable kind, instancing) with the
//! [`FastProgramKey`] it was resolved for. While the fast key matches, the
//! draw reuses its program without deriving parameters. Each binding owns
//! one reference; rebinding a slot acquires the new program before
//! releasing the old one.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::assets::{GeometryHandle, MaterialHandle};
use crate::errors::Result;
use crate::renderer::device::{GraphicsDevice, ProgramHandle};
use crate::renderer::program::key::{FastProgramKey, ProgramKey};
use crate::renderer::program::parameters::ProgramParameters;
use crate::renderer::program::source::ShaderSourceProvider;
use crate::renderer::program::uniforms::{UniformMirror, UniformTable};
use crate::scene::drawable::DrawableKind;

new_key_type! {
    pub struct ProgramId;
}

type SlotKey = (MaterialHandle, GeometryHandle, DrawableKind, bool);

#[derive(Debug)]
pub struct ProgramEntry {
    pub handle: ProgramHandle,
    pub key: ProgramKey,
    pub label: String,
    pub uniforms: UniformTable,
    /// Vertex inputs read by the program, with their locations.
    pub attributes: Vec<(String, u32)>,
    pub mirror: UniformMirror,
    ref_count: u32,
}

impl ProgramEntry {
    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgramCacheStats {
    pub compiled: u32,
    pub destroyed: u32,
    /// L2 hits: an existing program was shared.
    pub shared: u32,
    /// L1 hits: parameter derivation skipped.
    pub fast_hits: u64,
}

pub struct ProgramCache {
    programs: SlotMap<ProgramId, ProgramEntry>,
    lookup: FxHashMap<ProgramKey, ProgramId>,
    bindings: FxHashMap<SlotKey, (FastProgramKey, ProgramId)>,
    source: Box<dyn ShaderSourceProvider>,
    /// Device programs destroyed since the last [`ProgramCache::take_destroyed`].
    destroyed: Vec<ProgramHandle>,
    stats: ProgramCacheStats,
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramCache")
            .field("programs", &self.programs.len())
            .field("bindings", &self.bindings.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ProgramCache {
    #[must_use]
    pub fn new(source: impl ShaderSourceProvider + 'static) -> Self {
        Self {
            programs: SlotMap::with_key(),
            lookup: FxHashMap::default(),
            bindings: FxHashMap::default(),
            source: Box::new(source),
            destroyed: Vec::new(),
            stats: ProgramCacheStats::default(),
        }
    }

    // ========================================================================
    // L2: shared programs
    // ========================================================================

    /// Returns the program for `key`, compiling it on a miss. Every call
    /// takes one reference that must be returned through
    /// [`release`](Self::release).
    pub fn acquire<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        params: &ProgramParameters,
        key: ProgramKey,
    ) -> Result<ProgramId> {
        if let Some(&id) = self.lookup.get(&key)
            && let Some(entry) = self.programs.get_mut(id)
        {
            entry.ref_count += 1;
            self.stats.shared += 1;
            return Ok(id);
        }

        let source = self.source.program_source(params)?;
        let handle = device.create_program(&source)?;
        let uniforms = UniformTable::build(device, handle);
        let attributes = device.active_attributes(handle);

        log::debug!(
            "Compiled program '{}' ({} uniforms, {} inputs)",
            source.label,
            uniforms.len(),
            attributes.len()
        );

        let id = self.programs.insert(ProgramEntry {
            handle,
            key,
            label: source.label,
            uniforms,
            attributes,
            mirror: UniformMirror::default(),
            ref_count: 1,
        });
        self.lookup.insert(key, id);
        self.stats.compiled += 1;
        Ok(id)
    }

    /// Drops one reference. The program is destroyed when none remain.
    /// Returns the destroyed device handle.
    pub fn release<D: GraphicsDevice>(&mut self, device: &mut D, id: ProgramId) -> Option<ProgramHandle> {
        let entry = self.programs.get_mut(id)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return None;
        }

        let entry = self.programs.remove(id)?;
        if self.lookup.get(&entry.key) == Some(&id) {
            self.lookup.remove(&entry.key);
        }
        device.destroy_program(entry.handle);
        self.destroyed.push(entry.handle);
        self.stats.destroyed += 1;
        log::debug!("Destroyed program '{}'", entry.label);
        Some(entry.handle)
    }

    /// Device handles destroyed since the previous call. Whoever mirrors
    /// bound device state must forget them before the device reuses them.
    pub fn take_destroyed(&mut self) -> Vec<ProgramHandle> {
        std::mem::take(&mut self.destroyed)
    }

    // ========================================================================
    // L1: per-slot bindings
    // ========================================================================

    /// Program for a draw slot. `derive` runs only when `fast` differs from
    /// the key the slot was last resolved with.
    pub fn resolve<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        fast: FastProgramKey,
        derive: impl FnOnce() -> Result<ProgramParameters>,
    ) -> Result<ProgramId> {
        let slot = fast.slot();
        if let Some(&(bound, id)) = self.bindings.get(&slot)
            && bound == fast
            && self.programs.contains_key(id)
        {
            self.stats.fast_hits += 1;
            return Ok(id);
        }

        let params = derive()?;
        let key = ProgramKey::from_parameters(&params);
        let id = self.acquire(device, &params, key)?;
        log::trace!("Bound {slot:?} to program {id:?}");

        if let Some((_, previous)) = self.bindings.insert(slot, (fast, id)) {
            self.release(device, previous);
        }
        Ok(id)
    }

    /// Releases every binding that draws with `material`.
    pub fn release_material<D: GraphicsDevice>(&mut self, device: &mut D, material: MaterialHandle) -> usize {
        self.release_bindings(device, |slot| slot.0 == material)
    }

    /// Releases every binding that draws `geometry`.
    pub fn release_geometry<D: GraphicsDevice>(&mut self, device: &mut D, geometry: GeometryHandle) -> usize {
        self.release_bindings(device, |slot| slot.1 == geometry)
    }

    fn release_bindings<D: GraphicsDevice>(
        &mut self,
        device: &mut D,
        mut matches: impl FnMut(&SlotKey) -> bool,
    ) -> usize {
        let released: Vec<ProgramId> = self
            .bindings
            .extract_if(|slot, _| matches(slot))
            .map(|(_, (_, id))| id)
            .collect();
        for &id in &released {
            self.release(device, id);
        }
        released.len()
    }

    /// Releases all bindings, destroying every program they kept alive.
    pub fn clear<D: GraphicsDevice>(&mut self, device: &mut D) {
        self.release_bindings(device, |_| true);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn get(&self, id: ProgramId) -> Option<&ProgramEntry> {
        self.programs.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ProgramId) -> Option<&mut ProgramEntry> {
        self.programs.get_mut(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    #[must_use]
    pub fn ref_count(&self, id: ProgramId) -> Option<u32> {
        self.programs.get(id).map(ProgramEntry::ref_count)
    }

    pub fn programs(&self) -> impl Iterator<Item = (ProgramId, &ProgramEntry)> {
        self.programs.iter()
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn stats(&self) -> ProgramCacheStats {
        self.stats
    }
}
