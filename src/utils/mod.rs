//! Utility Module
//!
//! - [`interner`]: String interning for shader define names and values
//! - [`dirty`]: [`Dirty<T>`] wrapper for lazily derived values (matrices,
//!   bounding volumes)
//!
//! # String Interning
//!
//! ```rust,ignore
//! use prism::utils::interner;
//!
//! let sym1 = interner::intern("USE_NORMAL_MAP");
//! let sym2 = interner::intern("USE_NORMAL_MAP");
//! assert_eq!(sym1, sym2); // O(1) comparison
//! ```

pub mod dirty;
pub mod interner;

pub use dirty::Dirty;
pub use interner::Symbol;
