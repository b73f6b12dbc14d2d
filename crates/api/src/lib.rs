//! gRPC service façades for the foldserve job-lifecycle core.
//!
//! Three tonic services (inference, MSA, training) validate typed
//! submissions, create jobs in the shared registry, hand them to the
//! executor, and expose the shared status/cancel surface.

pub mod config;
pub mod error;
pub mod services;
pub mod state;
