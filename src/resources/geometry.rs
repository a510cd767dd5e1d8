//! Geometry buffer sets.
//!
//! A [`Geometry`] maps named attribute slots to typed [`Attribute`] views over
//! CPU-side [`BufferRef`]s, plus an optional index buffer, a draw range and
//! material groups. Several attributes may view one shared buffer (see
//! [`InterleavedBuffer`]); the resource cache then uploads that buffer once.
//!
//! Bounding volumes are derived from the position attribute and cached until
//! position data is marked dirty through the geometry.

use std::cell::{Cell, RefCell};
use std::ops::Range;

use glam::{Affine3A, Vec3};
use rustc_hash::FxHashMap;
use wgpu::{BufferUsages, IndexFormat, VertexFormat, VertexStepMode};

use crate::errors::{PrismError, Result};
use crate::resources::buffer::BufferRef;
use crate::resources::version_tracker::ChangeTracker;
use crate::utils::Dirty;

pub const POSITION: &str = "position";
pub const NORMAL: &str = "normal";
pub const UV: &str = "uv";
pub const COLOR: &str = "color";
pub const TANGENT: &str = "tangent";

// ============================================================================
// Component types
// ============================================================================

/// Numeric element type of an attribute component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F16,
    F32,
}

impl ComponentType {
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 | Self::F16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
        }
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32)
    }

    /// Decodes one component. Normalized integers map to `[0, 1]` (unsigned)
    /// or `[-1, 1]` (signed).
    fn read(self, bytes: &[u8], normalized: bool) -> f32 {
        let raw = match self {
            Self::I8 => f32::from(bytes[0] as i8),
            Self::U8 => f32::from(bytes[0]),
            Self::I16 => f32::from(bytemuck::pod_read_unaligned::<i16>(bytes)),
            Self::U16 => f32::from(bytemuck::pod_read_unaligned::<u16>(bytes)),
            Self::I32 => bytemuck::pod_read_unaligned::<i32>(bytes) as f32,
            Self::U32 => bytemuck::pod_read_unaligned::<u32>(bytes) as f32,
            Self::F16 => half::f16::from_bits(bytemuck::pod_read_unaligned::<u16>(bytes)).to_f32(),
            Self::F32 => bytemuck::pod_read_unaligned::<f32>(bytes),
        };
        if normalized && !self.is_float() {
            match self {
                Self::I8 => (raw / 127.0).max(-1.0),
                Self::U8 => raw / 255.0,
                Self::I16 => (raw / 32767.0).max(-1.0),
                Self::U16 => raw / 65535.0,
                Self::I32 => (raw / 2_147_483_647.0).max(-1.0),
                _ => raw / 4_294_967_295.0,
            }
        } else {
            raw
        }
    }

    /// Encodes one component, applying the inverse of [`Self::read`].
    fn write(self, out: &mut [u8], value: f32, normalized: bool) {
        let value = if normalized && !self.is_float() {
            match self {
                Self::I8 => (value.clamp(-1.0, 1.0) * 127.0).round(),
                Self::U8 => (value.clamp(0.0, 1.0) * 255.0).round(),
                Self::I16 => (value.clamp(-1.0, 1.0) * 32767.0).round(),
                Self::U16 => (value.clamp(0.0, 1.0) * 65535.0).round(),
                Self::I32 => (f64::from(value.clamp(-1.0, 1.0)) * 2_147_483_647.0).round() as f32,
                _ => (f64::from(value.clamp(0.0, 1.0)) * 4_294_967_295.0).round() as f32,
            }
        } else {
            value
        };
        match self {
            Self::I8 => out[0] = (value as i8) as u8,
            Self::U8 => out[0] = value as u8,
            Self::I16 => out.copy_from_slice(&(value as i16).to_ne_bytes()),
            Self::U16 => out.copy_from_slice(&(value as u16).to_ne_bytes()),
            Self::I32 => out.copy_from_slice(&(value as i32).to_ne_bytes()),
            Self::U32 => out.copy_from_slice(&(value as u32).to_ne_bytes()),
            Self::F16 => out.copy_from_slice(&half::f16::from_f32(value).to_bits().to_ne_bytes()),
            Self::F32 => out.copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// A typed view of per-vertex (or per-instance) data inside a [`BufferRef`].
#[derive(Debug, Clone)]
pub struct Attribute {
    pub buffer: BufferRef,
    /// Components per element (1..=4, or 16 for matrices).
    pub item_size: u32,
    pub component: ComponentType,
    pub normalized: bool,
    /// Byte offset of the first element inside `buffer`.
    pub offset: u64,
    /// Byte distance between consecutive elements.
    pub stride: u64,
    pub count: u32,
    pub step_mode: VertexStepMode,
}

impl Attribute {
    /// Planar attribute over freshly allocated storage.
    pub fn new<T: bytemuck::Pod>(
        data: &[T],
        item_size: u32,
        component: ComponentType,
        normalized: bool,
    ) -> Self {
        let buffer = BufferRef::new(
            data,
            BufferUsages::VERTEX | BufferUsages::COPY_DST,
            Some("VertexAttribute"),
        );
        let element = item_size as u64 * component.size() as u64;
        let count = (buffer.byte_len() as u64 / element.max(1)) as u32;
        Self {
            buffer,
            item_size,
            component,
            normalized,
            offset: 0,
            stride: element,
            count,
            step_mode: VertexStepMode::Vertex,
        }
    }

    pub fn from_f32(data: &[f32], item_size: u32) -> Self {
        Self::new(data, item_size, ComponentType::F32, false)
    }

    pub fn from_vec3(data: &[Vec3]) -> Self {
        Self::new(data, 3, ComponentType::F32, false)
    }

    pub fn from_vec2(data: &[glam::Vec2]) -> Self {
        Self::new(data, 2, ComponentType::F32, false)
    }

    pub fn from_vec4(data: &[glam::Vec4]) -> Self {
        Self::new(data, 4, ComponentType::F32, false)
    }

    /// Marks this attribute as advancing once per instance.
    #[must_use]
    pub fn instanced(mut self) -> Self {
        self.step_mode = VertexStepMode::Instance;
        self
    }

    #[inline]
    #[must_use]
    pub fn element_size(&self) -> u64 {
        u64::from(self.item_size) * self.component.size() as u64
    }

    #[inline]
    #[must_use]
    pub fn is_instanced(&self) -> bool {
        self.step_mode == VertexStepMode::Instance
    }

    /// Vertex format the device should use to fetch this attribute, if the
    /// combination is fetchable at all.
    #[must_use]
    pub fn vertex_format(&self) -> Option<VertexFormat> {
        use ComponentType as C;
        use VertexFormat as F;
        let n = self.normalized;
        Some(match (self.component, self.item_size) {
            (C::F32, 1) => F::Float32,
            (C::F32, 2) => F::Float32x2,
            (C::F32, 3) => F::Float32x3,
            (C::F32, 4) => F::Float32x4,
            (C::F16, 1) => F::Float16,
            (C::F16, 2) => F::Float16x2,
            (C::F16, 4) => F::Float16x4,
            (C::U8, 1) => if n { F::Unorm8 } else { F::Uint8 },
            (C::U8, 2) => if n { F::Unorm8x2 } else { F::Uint8x2 },
            (C::U8, 4) => if n { F::Unorm8x4 } else { F::Uint8x4 },
            (C::I8, 1) => if n { F::Snorm8 } else { F::Sint8 },
            (C::I8, 2) => if n { F::Snorm8x2 } else { F::Sint8x2 },
            (C::I8, 4) => if n { F::Snorm8x4 } else { F::Sint8x4 },
            (C::U16, 1) => if n { F::Unorm16 } else { F::Uint16 },
            (C::U16, 2) => if n { F::Unorm16x2 } else { F::Uint16x2 },
            (C::U16, 4) => if n { F::Unorm16x4 } else { F::Uint16x4 },
            (C::I16, 1) => if n { F::Snorm16 } else { F::Sint16 },
            (C::I16, 2) => if n { F::Snorm16x2 } else { F::Sint16x2 },
            (C::I16, 4) => if n { F::Snorm16x4 } else { F::Sint16x4 },
            (C::U32, 1) if !n => F::Uint32,
            (C::U32, 2) if !n => F::Uint32x2,
            (C::U32, 3) if !n => F::Uint32x3,
            (C::U32, 4) if !n => F::Uint32x4,
            (C::I32, 1) if !n => F::Sint32,
            (C::I32, 2) if !n => F::Sint32x2,
            (C::I32, 3) if !n => F::Sint32x3,
            (C::I32, 4) if !n => F::Sint32x4,
            _ => return None,
        })
    }

    fn component_range(&self, index: u32, component: u32) -> Range<usize> {
        assert!(
            component < self.item_size,
            "component {component} out of range for attribute of item size {}",
            self.item_size
        );
        assert!(
            index < self.count,
            "element {index} out of range for attribute of {} elements",
            self.count
        );
        let start = (self.offset
            + u64::from(index) * self.stride
            + u64::from(component) * self.component.size() as u64) as usize;
        start..start + self.component.size()
    }

    /// Reads one component as `f32`, honoring normalization.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count` or `component >= item_size`.
    #[must_use]
    pub fn get_component(&self, index: u32, component: u32) -> f32 {
        let range = self.component_range(index, component);
        let data = self.buffer.read_data();
        self.component.read(&data[range], self.normalized)
    }

    /// Writes one component, recording the touched bytes as an update range.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count` or `component >= item_size`.
    pub fn set_component(&self, index: u32, component: u32, value: f32) {
        let range = self.component_range(index, component);
        let mut bytes = [0u8; 4];
        let out = &mut bytes[..self.component.size()];
        self.component.write(out, value, self.normalized);
        self.buffer.write_range(range.start as u64, &*out);
    }

    #[must_use]
    pub fn get_x(&self, index: u32) -> f32 {
        self.get_component(index, 0)
    }

    #[must_use]
    pub fn get_y(&self, index: u32) -> f32 {
        self.get_component(index, 1)
    }

    #[must_use]
    pub fn get_z(&self, index: u32) -> f32 {
        self.get_component(index, 2)
    }

    /// First three components. Missing components read as zero.
    #[must_use]
    pub fn get_vec3(&self, index: u32) -> Vec3 {
        let n = self.item_size.min(3);
        let mut v = [0.0f32; 3];
        for (c, slot) in v.iter_mut().enumerate().take(n as usize) {
            *slot = self.get_component(index, c as u32);
        }
        Vec3::from_array(v)
    }

    /// Byte range of element `index` inside the backing buffer.
    fn element_bytes(&self, index: u32) -> Range<usize> {
        let start = (self.offset + u64::from(index) * self.stride) as usize;
        start..start + self.element_size() as usize
    }
}

/// One buffer holding several attributes side by side.
#[derive(Debug, Clone)]
pub struct InterleavedBuffer {
    pub buffer: BufferRef,
    /// Bytes per vertex.
    pub stride: u64,
    pub count: u32,
}

impl InterleavedBuffer {
    pub fn new<T: bytemuck::Pod>(data: &[T], stride: u64) -> Self {
        let buffer = BufferRef::new(
            data,
            BufferUsages::VERTEX | BufferUsages::COPY_DST,
            Some("InterleavedBuffer"),
        );
        let count = (buffer.byte_len() as u64 / stride.max(1)) as u32;
        Self {
            buffer,
            stride,
            count,
        }
    }

    /// A view of `item_size` components starting `offset` bytes into each
    /// vertex. All views share the backing buffer.
    #[must_use]
    pub fn attribute(
        &self,
        offset: u64,
        item_size: u32,
        component: ComponentType,
        normalized: bool,
    ) -> Attribute {
        Attribute {
            buffer: self.buffer.clone(),
            item_size,
            component,
            normalized,
            offset,
            stride: self.stride,
            count: self.count,
            step_mode: VertexStepMode::Vertex,
        }
    }
}

// ============================================================================
// Index buffer
// ============================================================================

#[derive(Debug, Clone)]
pub struct IndexBuffer {
    pub buffer: BufferRef,
    pub format: IndexFormat,
    pub count: u32,
}

impl IndexBuffer {
    /// Stores `values` as 16-bit unless some value needs 32 bits.
    #[must_use]
    pub fn from_values(values: &[u32]) -> Self {
        let usage = BufferUsages::INDEX | BufferUsages::COPY_DST;
        let wide = values.iter().any(|&v| v > u32::from(u16::MAX));
        let (buffer, format) = if wide {
            (BufferRef::new(values, usage, Some("IndexBuffer")), IndexFormat::Uint32)
        } else {
            let narrow: Vec<u16> = values.iter().map(|&v| v as u16).collect();
            (BufferRef::new(&narrow, usage, Some("IndexBuffer")), IndexFormat::Uint16)
        };
        Self {
            buffer,
            format,
            count: values.len() as u32,
        }
    }

    #[must_use]
    pub fn stride(&self) -> usize {
        match self.format {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }

    /// Decodes every index.
    #[must_use]
    pub fn values(&self) -> Vec<u32> {
        let data = self.buffer.read_data();
        match self.format {
            IndexFormat::Uint16 => data
                .chunks_exact(2)
                .map(|c| u32::from(bytemuck::pod_read_unaligned::<u16>(c)))
                .collect(),
            IndexFormat::Uint32 => data
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<u32>)
                .collect(),
        }
    }
}

// ============================================================================
// Bounding volumes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    #[must_use]
    pub fn center(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            (self.min + self.max) * 0.5
        }
    }

    #[must_use]
    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand_by_point(matrix.transform_point3(corner));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// Zero or negative radius; such volumes are never used to cull.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        !(self.radius > 0.0) || !self.center.is_finite()
    }

    /// Sphere enclosing this one after `matrix`, using the largest axis scale.
    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        let m = matrix.matrix3;
        let max_scale = m
            .x_axis
            .length_squared()
            .max(m.y_axis.length_squared())
            .max(m.z_axis.length_squared())
            .sqrt();
        Self {
            center: matrix.transform_point3(self.center),
            radius: self.radius * max_scale,
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// A sub-range drawn with `materials[material_index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryGroup {
    pub start: u32,
    pub count: u32,
    pub material_index: u32,
}

#[derive(Debug)]
pub struct Geometry {
    attributes: FxHashMap<String, Attribute>,
    index: Option<IndexBuffer>,
    morph_attributes: FxHashMap<String, Vec<Attribute>>,
    /// Morph position targets are offsets rather than absolute positions.
    morph_targets_relative: bool,
    groups: Vec<GeometryGroup>,
    draw_range: Range<u32>,

    /// Bumped when the attribute set or any attribute's format changes.
    layout_version: ChangeTracker,
    /// Bumped on every geometry-level change.
    data_version: ChangeTracker,

    bounding_box: RefCell<Dirty<BoundingBox>>,
    bounding_sphere: RefCell<Dirty<BoundingSphere>>,
    /// `(data_version, index buffer version)` of the last successful validation.
    validated: Cell<Option<(u64, u64)>>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Geometry {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            index: self.index.clone(),
            morph_attributes: self.morph_attributes.clone(),
            morph_targets_relative: self.morph_targets_relative,
            groups: self.groups.clone(),
            draw_range: self.draw_range.clone(),
            layout_version: self.layout_version,
            data_version: self.data_version,
            bounding_box: RefCell::new(*self.bounding_box.borrow()),
            bounding_sphere: RefCell::new(*self.bounding_sphere.borrow()),
            validated: Cell::new(None),
        }
    }
}

impl Geometry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attributes: FxHashMap::default(),
            index: None,
            morph_attributes: FxHashMap::default(),
            morph_targets_relative: false,
            groups: Vec::new(),
            draw_range: 0..u32::MAX,
            layout_version: ChangeTracker::new(),
            data_version: ChangeTracker::new(),
            bounding_box: RefCell::new(Dirty::stale(BoundingBox::EMPTY)),
            bounding_sphere: RefCell::new(Dirty::stale(BoundingSphere {
                center: Vec3::ZERO,
                radius: -1.0,
            })),
            validated: Cell::new(None),
        }
    }

    // === Versions ===

    #[inline]
    #[must_use]
    pub fn layout_version(&self) -> u64 {
        self.layout_version.version()
    }

    #[inline]
    #[must_use]
    pub fn data_version(&self) -> u64 {
        self.data_version.version()
    }

    fn touch_data(&mut self) {
        self.data_version.changed();
    }

    fn touch_layout(&mut self) {
        self.layout_version.changed();
        self.touch_data();
    }

    // === Attributes ===

    pub fn set_attribute(&mut self, name: &str, attr: Attribute) {
        let layout_changed = self.attributes.get(name).is_none_or(|old| {
            old.component != attr.component
                || old.item_size != attr.item_size
                || old.normalized != attr.normalized
                || old.step_mode != attr.step_mode
        });
        self.attributes.insert(name.to_string(), attr);
        if layout_changed {
            self.touch_layout();
        } else {
            self.touch_data();
        }
        if name == POSITION {
            self.invalidate_bounds();
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        let removed = self.attributes.remove(name);
        if removed.is_some() {
            self.touch_layout();
            if name == POSITION {
                self.invalidate_bounds();
            }
        }
        removed
    }

    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Records that an attribute's contents were edited in place.
    ///
    /// Editing the position attribute drops the cached bounding volumes; the
    /// owner must recompute them.
    pub fn mark_attribute_dirty(&mut self, name: &str) {
        self.touch_data();
        if name == POSITION {
            self.invalidate_bounds();
        }
    }

    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        self.attributes.get(POSITION).map_or(0, |a| a.count)
    }

    // === Morph targets ===

    pub fn add_morph_attribute(&mut self, name: &str, attr: Attribute) {
        self.morph_attributes
            .entry(name.to_string())
            .or_default()
            .push(attr);
        self.touch_layout();
        if name == POSITION {
            self.invalidate_bounds();
        }
    }

    #[must_use]
    pub fn morph_attributes(&self, name: &str) -> &[Attribute] {
        self.morph_attributes.get(name).map_or(&[], Vec::as_slice)
    }

    /// Switches morph position targets between offsets and absolute
    /// positions. Selects a different program permutation.
    pub fn set_morph_targets_relative(&mut self, relative: bool) {
        if self.morph_targets_relative != relative {
            self.morph_targets_relative = relative;
            self.touch_layout();
            self.invalidate_bounds();
        }
    }

    #[inline]
    #[must_use]
    pub fn morph_targets_relative(&self) -> bool {
        self.morph_targets_relative
    }

    #[must_use]
    pub fn morph_target_count(&self) -> usize {
        self.morph_attributes
            .values()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    // === Index ===

    /// Sets the index buffer. 16-bit storage is used unless some value
    /// exceeds 65535.
    ///
    /// When a position attribute is present every value must address one of
    /// its vertices; otherwise the geometry is left unchanged.
    pub fn set_index(&mut self, values: &[u32]) -> Result<()> {
        if let Some(position) = self.attributes.get(POSITION) {
            let vertex_count = position.count;
            if let Some((at, &index)) = values.iter().enumerate().find(|&(_, &v)| v >= vertex_count) {
                return Err(PrismError::IndexOutOfRange {
                    index,
                    at,
                    vertex_count,
                });
            }
        }
        let index = IndexBuffer::from_values(values);
        let format_changed = self.index.as_ref().map(|i| i.format) != Some(index.format);
        self.index = Some(index);
        if format_changed {
            self.touch_layout();
        } else {
            self.touch_data();
        }
        Ok(())
    }

    pub fn clear_index(&mut self) {
        if self.index.take().is_some() {
            self.touch_layout();
        }
    }

    #[must_use]
    pub fn index(&self) -> Option<&IndexBuffer> {
        self.index.as_ref()
    }

    // === Draw range & groups ===

    pub fn set_draw_range(&mut self, start: u32, count: u32) {
        self.draw_range = start..start.saturating_add(count);
        self.touch_data();
    }

    #[must_use]
    pub fn draw_range(&self) -> Range<u32> {
        self.draw_range.clone()
    }

    pub fn add_group(&mut self, start: u32, count: u32, material_index: u32) {
        self.groups.push(GeometryGroup {
            start,
            count,
            material_index,
        });
        self.touch_data();
    }

    pub fn clear_groups(&mut self) {
        self.groups.clear();
        self.touch_data();
    }

    #[must_use]
    pub fn groups(&self) -> &[GeometryGroup] {
        &self.groups
    }

    /// Number of indices (or vertices, when non-indexed) available to draw.
    #[must_use]
    pub fn element_count(&self) -> u32 {
        self.index.as_ref().map_or(self.vertex_count(), |i| i.count)
    }

    /// Element range for a whole-object draw or for one group, clipped to the
    /// draw range and the available elements.
    #[must_use]
    pub fn resolve_range(&self, group: Option<&GeometryGroup>) -> Range<u32> {
        let available = self.element_count();
        let (mut start, mut end) = (self.draw_range.start, self.draw_range.end.min(available));
        if let Some(g) = group {
            start = start.max(g.start);
            end = end.min(g.start.saturating_add(g.count));
        }
        start.min(end)..end
    }

    // === Bounding volumes ===

    fn invalidate_bounds(&self) {
        self.bounding_box.borrow_mut().invalidate();
        self.bounding_sphere.borrow_mut().invalidate();
    }

    /// Cached box, or `None` when it was never computed or is stale.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bounding_box.borrow().get().copied()
    }

    /// Cached sphere, or `None` when it was never computed or is stale.
    #[must_use]
    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.bounding_sphere.borrow().get().copied()
    }

    /// Vertex indices to visit: the referenced ones when indexed.
    fn visited_vertices(&self, count: u32) -> Result<Vec<u32>> {
        match &self.index {
            Some(index) => {
                let values = index.values();
                if let Some((at, &v)) = values.iter().enumerate().find(|&(_, &v)| v >= count) {
                    return Err(PrismError::IndexOutOfRange {
                        index: v,
                        at,
                        vertex_count: count,
                    });
                }
                Ok(values)
            }
            None => Ok((0..count).collect()),
        }
    }

    /// Every point the position and morph-target attributes can produce.
    fn collect_points(&self) -> Result<Vec<Vec3>> {
        let position = self
            .attributes
            .get(POSITION)
            .ok_or_else(|| PrismError::MissingAttribute(POSITION.to_string()))?;
        let visited = self.visited_vertices(position.count)?;

        let mut points: Vec<Vec3> = visited.iter().map(|&i| position.get_vec3(i)).collect();
        for target in self.morph_attributes(POSITION) {
            for &i in &visited {
                if i >= target.count {
                    continue;
                }
                let p = target.get_vec3(i);
                points.push(if self.morph_targets_relative {
                    position.get_vec3(i) + p
                } else {
                    p
                });
            }
        }

        if points.iter().any(|p| !p.is_finite()) {
            return Err(PrismError::NonFiniteBounds(POSITION.to_string()));
        }
        Ok(points)
    }

    /// Recomputes and caches the axis-aligned box.
    pub fn compute_bounding_box(&self) -> Result<BoundingBox> {
        let points = self.collect_points()?;
        let mut bbox = BoundingBox::EMPTY;
        for p in points {
            bbox.expand_by_point(p);
        }
        self.bounding_box.borrow_mut().set(bbox);
        Ok(bbox)
    }

    /// Recomputes and caches the sphere: box center first, then the largest
    /// distance from it.
    pub fn compute_bounding_sphere(&self) -> Result<BoundingSphere> {
        let points = self.collect_points()?;
        let mut bbox = BoundingBox::EMPTY;
        for &p in &points {
            bbox.expand_by_point(p);
        }
        let center = bbox.center();
        let radius = points
            .iter()
            .map(|p| p.distance_squared(center))
            .fold(0.0f32, f32::max)
            .sqrt();
        let sphere = BoundingSphere {
            center,
            radius: if points.is_empty() { -1.0 } else { radius },
        };
        self.bounding_box.borrow_mut().set(bbox);
        self.bounding_sphere.borrow_mut().set(sphere);
        Ok(sphere)
    }

    /// Cached sphere, computed on first use.
    pub fn ensure_bounding_sphere(&self) -> Result<BoundingSphere> {
        if let Some(sphere) = self.bounding_sphere() {
            return Ok(sphere);
        }
        self.compute_bounding_sphere()
    }

    // === Derived data ===

    /// Area-weighted vertex normals, stored in the `normal` attribute.
    pub fn compute_vertex_normals(&mut self) -> Result<()> {
        let position = self
            .attributes
            .get(POSITION)
            .ok_or_else(|| PrismError::MissingAttribute(POSITION.to_string()))?;
        let count = position.count;
        let order = self.visited_vertices(count)?;

        let mut normals = vec![Vec3::ZERO; count as usize];
        for tri in order.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]];
            let (pa, pb, pc) = (position.get_vec3(a), position.get_vec3(b), position.get_vec3(c));
            let face = (pb - pa).cross(pc - pa);
            normals[a as usize] += face;
            normals[b as usize] += face;
            normals[c as usize] += face;
        }
        for n in &mut normals {
            *n = n.normalize_or_zero();
        }

        self.set_attribute(NORMAL, Attribute::from_vec3(&normals));
        Ok(())
    }

    /// Expands an indexed geometry into a flat one by gathering every
    /// vertex-rate attribute per index. Instance-rate attributes are shared.
    pub fn to_non_indexed(&self) -> Result<Geometry> {
        let Some(index) = &self.index else {
            return Err(PrismError::NotIndexed);
        };
        let values = index.values();
        let vertex_count = self.vertex_count();
        if let Some((at, &v)) = values.iter().enumerate().find(|&(_, &v)| v >= vertex_count) {
            return Err(PrismError::IndexOutOfRange {
                index: v,
                at,
                vertex_count,
            });
        }

        // Every vertex-rate source must cover the largest index.
        if let Some(&max) = values.iter().max() {
            let morph_targets = self
                .morph_attributes
                .iter()
                .flat_map(|(name, targets)| targets.iter().map(move |t| (name, t)));
            let short = self
                .attributes
                .iter()
                .chain(morph_targets)
                .find(|(_, attr)| !attr.is_instanced() && max >= attr.count);
            if let Some((name, attr)) = short {
                return Err(PrismError::AttributeCountMismatch {
                    name: name.clone(),
                    count: attr.count,
                    expected: vertex_count,
                });
            }
        }

        let gather = |attr: &Attribute| -> Attribute {
            if attr.is_instanced() {
                return attr.clone();
            }
            let element = attr.element_size() as usize;
            let data = attr.buffer.read_data();
            let mut out = Vec::with_capacity(values.len() * element);
            for &i in &values {
                out.extend_from_slice(&data[attr.element_bytes(i)]);
            }
            let buffer = BufferRef::from_bytes(&out, attr.buffer.usage(), Some(attr.buffer.label()));
            Attribute {
                buffer,
                offset: 0,
                stride: element as u64,
                count: values.len() as u32,
                ..attr.clone()
            }
        };

        let mut flat = Geometry::new();
        flat.morph_targets_relative = self.morph_targets_relative;
        for (name, attr) in &self.attributes {
            flat.set_attribute(name, gather(attr));
        }
        for (name, targets) in &self.morph_attributes {
            for target in targets {
                flat.add_morph_attribute(name, gather(target));
            }
        }
        flat.groups.clone_from(&self.groups);
        flat.draw_range = self.draw_range.clone();
        Ok(flat)
    }

    /// Checks the draw invariants. The result is cached until the geometry or
    /// its index buffer changes.
    pub fn validate(&self) -> Result<()> {
        let stamp = (
            self.data_version.version(),
            self.index.as_ref().map_or(0, |i| i.buffer.version()),
        );
        if self.validated.get() == Some(stamp) {
            return Ok(());
        }

        let position = self
            .attributes
            .get(POSITION)
            .ok_or_else(|| PrismError::MissingAttribute(POSITION.to_string()))?;
        let expected = position.count;

        if self.index.is_some() {
            self.visited_vertices(expected)?;
        } else {
            for (name, attr) in &self.attributes {
                if !attr.is_instanced() && attr.count != expected {
                    return Err(PrismError::AttributeCountMismatch {
                        name: name.clone(),
                        count: attr.count,
                        expected,
                    });
                }
            }
        }

        self.validated.set(Some(stamp));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_components_round_trip() {
        let attr = Attribute::new(&[0u8, 128, 255, 255], 4, ComponentType::U8, true);
        assert_eq!(attr.get_component(0, 0), 0.0);
        assert_eq!(attr.get_component(0, 2), 1.0);

        attr.set_component(0, 1, 0.5);
        assert!((attr.get_component(0, 1) - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn signed_normalized_clamps_to_minus_one() {
        let attr = Attribute::new(&[-128i8, 127], 2, ComponentType::I8, true);
        assert_eq!(attr.get_component(0, 0), -1.0);
        assert_eq!(attr.get_component(0, 1), 1.0);
    }

    #[test]
    fn half_float_components() {
        let data = [half::f16::from_f32(1.5), half::f16::from_f32(-2.0)];
        let attr = Attribute::new(&data, 2, ComponentType::F16, false);
        assert_eq!(attr.get_x(0), 1.5);
        assert_eq!(attr.get_y(0), -2.0);
        assert_eq!(attr.vertex_format(), Some(VertexFormat::Float16x2));
    }

    #[test]
    #[should_panic(expected = "component 3 out of range")]
    fn out_of_range_component_panics() {
        let attr = Attribute::from_f32(&[0.0; 6], 3);
        let _ = attr.get_component(0, 3);
    }

    #[test]
    #[should_panic(expected = "element 2 out of range")]
    fn out_of_range_element_panics() {
        let attr = Attribute::from_f32(&[0.0; 6], 3);
        let _ = attr.get_component(2, 0);
    }

    #[test]
    fn interleaved_views_share_storage() {
        // position (3) + uv (2) per vertex
        let data: [f32; 10] = [0.0, 1.0, 2.0, 0.25, 0.75, 3.0, 4.0, 5.0, 0.5, 1.0];
        let inter = InterleavedBuffer::new(&data, 20);
        let pos = inter.attribute(0, 3, ComponentType::F32, false);
        let uv = inter.attribute(12, 2, ComponentType::F32, false);

        assert_eq!(pos.count, 2);
        assert_eq!(pos.buffer, uv.buffer);
        assert_eq!(pos.get_vec3(1), Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(uv.get_y(0), 0.75);
    }
}
