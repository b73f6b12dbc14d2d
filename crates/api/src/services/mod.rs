//! tonic service implementations for the three façades.
//!
//! Each façade translates its typed submission into a registry `create`
//! plus an executor dispatch, and exposes the shared status/cancel surface
//! over the common wire shapes.

pub mod common;
pub mod inference;
pub mod msa;
pub mod training;

pub use inference::InferenceService;
pub use msa::MsaService;
pub use training::TrainingService;
