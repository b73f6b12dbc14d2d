//! Domain types shared across the foldserve workspace.
//!
//! No I/O lives here: this crate defines the job model, request parameter
//! types with their validation rules, the protein sequence rules, and the
//! error taxonomy the other crates map onto their own surfaces.

pub mod error;
pub mod job;
pub mod params;
pub mod sequence;

pub use error::CoreError;
