//! Foldserve job event bus.
//!
//! In-process publish/subscribe for job lifecycle events:
//!
//! - [`EventBus`] — fan-out hub backed by `tokio::sync::broadcast`.
//! - [`JobEvent`] — the canonical lifecycle event envelope.
//! - [`log_mirror`] — background task mirroring lifecycle edges into the
//!   structured log.
//!
//! Clients of the gRPC services still poll for status; the bus carries
//! events between in-process components only.

pub mod bus;
pub mod log_mirror;

pub use bus::{EventBus, JobEvent, JobEventKind};
pub use log_mirror::run_log_mirror;
