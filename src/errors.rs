//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`PrismError`] covers three families of failure:
//!
//! - **Configuration errors**: malformed geometry, hierarchy cycles, permutations
//!   the active device cannot satisfy. Detected at the offending call and never
//!   coerced into a "best effort" draw.
//! - **Resource exhaustion**: the device failed to allocate a buffer, texture or
//!   program. The cache entry that triggered the allocation is rolled back.
//! - **Transient device-state errors**: the device rejected a state call. The
//!   renderer logs these and skips the affected draw.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, PrismError>`.
//!
//! ```rust,ignore
//! use prism::errors::{PrismError, Result};
//!
//! fn prepare() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::renderer::device::DeviceError;

/// The main error type for the Prism engine.
#[derive(Error, Debug)]
pub enum PrismError {
    // ========================================================================
    // Scene Graph Errors
    // ========================================================================
    /// Attaching would make a node its own ancestor.
    #[error("Attaching node {child} under {parent} would create a cycle")]
    HierarchyCycle {
        /// Debug name of the prospective parent
        parent: String,
        /// Debug name of the child being attached
        child: String,
    },

    /// A node handle did not resolve to a live node.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A geometry or material handle did not resolve to a live asset.
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    // ========================================================================
    // Geometry Errors
    // ========================================================================
    /// A required vertex attribute is absent.
    #[error("Geometry is missing required attribute '{0}'")]
    MissingAttribute(String),

    /// An index references a vertex outside the position attribute.
    #[error("Index {index} at position {at} is out of range (vertex count {vertex_count})")]
    IndexOutOfRange {
        /// Offending index value
        index: u32,
        /// Position of the offending value inside the index buffer
        at: usize,
        /// Number of vertices in the position attribute
        vertex_count: u32,
    },

    /// Two vertex-rate attributes disagree on the vertex count.
    #[error("Attribute '{name}' has {count} vertices, expected {expected}")]
    AttributeCountMismatch {
        /// Attribute name
        name: String,
        /// Its vertex count
        count: u32,
        /// The position attribute's vertex count
        expected: u32,
    },

    /// An attribute's component type and item size have no vertex format.
    #[error("Attribute '{0}' has no matching vertex format")]
    UnsupportedVertexFormat(String),

    /// The geometry has no index buffer. Informational: a flat geometry is
    /// already what `to_non_indexed` would produce.
    #[error("Geometry is not indexed")]
    NotIndexed,

    /// Bounding volume computation met a NaN or infinite position.
    #[error("Attribute '{0}' contains non-finite values; bounding volume is undefined")]
    NonFiniteBounds(String),

    // ========================================================================
    // Program / Permutation Errors
    // ========================================================================
    /// The permutation needs more of a device resource than the device offers.
    #[error("Device limit exceeded for {what}: requested {requested}, maximum {max}")]
    DeviceLimitExceeded {
        /// Limited resource
        what: &'static str,
        /// Amount the permutation needs
        requested: u32,
        /// Device maximum
        max: u32,
    },

    /// A light or clipping plane count does not fit its permutation key field.
    #[error("Too many {kind}: {count} (maximum {max})")]
    LightCountOverflow {
        /// Counted entity
        kind: &'static str,
        /// Actual count
        count: usize,
        /// Largest representable count
        max: usize,
    },

    /// Shader template lookup or rendering failed.
    #[error("Shader template error: {0}")]
    ShaderTemplate(#[from] minijinja::Error),

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// The graphics device reported a failure.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // ========================================================================
    // Configuration
    // ========================================================================
    /// Renderer settings could not be parsed.
    #[error("Settings parse error: {0}")]
    Settings(#[from] serde_json::Error),
}

impl PrismError {
    /// Returns `true` for errors that only affect the draw that raised them.
    ///
    /// The frame renderer skips such draws instead of aborting the frame.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, PrismError::Device(e) if e.is_transient())
    }

    /// Returns `true` when the device ran out of memory or handles.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, PrismError::Device(DeviceError::OutOfMemory { .. }))
    }
}

/// Alias for `Result<T, PrismError>`.
pub type Result<T> = std::result::Result<T, PrismError>;
