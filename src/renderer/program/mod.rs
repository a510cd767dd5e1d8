//! Material/Program Cache
//!
//! Per draw, a material moves through
//! `parameters → key → program → uniforms`:
//!
//! - [`parameters`]: pure derivation of the permutation descriptor.
//! - [`key`]: bit-field packing into a canonical [`ProgramKey`], plus the
//!   version-based [`FastProgramKey`].
//! - [`source`]: shader text synthesis from templates.
//! - [`cache`]: reference-counted compiled programs.
//! - [`uniforms`]: location tables and dirty-checked uniform upload.

pub mod cache;
pub mod key;
pub mod parameters;
pub mod source;
pub mod uniforms;

pub use cache::{ProgramCache, ProgramCacheStats, ProgramEntry, ProgramId};
pub use key::{FastProgramKey, ProgramKey};
pub use parameters::{LightCounts, LightState, ProgramFeatures, ProgramParameters, get_parameters};
pub use source::{ShaderSourceProvider, TemplateShaderSource};
pub use uniforms::{UniformMirror, UniformTable, UniformValue};
