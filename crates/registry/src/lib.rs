//! Process-wide job registry.
//!
//! [`JobRegistry`] is the single piece of shared mutable state in the
//! system: a map from job id to job record plus the job's cancellation
//! token. Entries are individually locked so that unrelated jobs never
//! serialize against each other; the outer map lock is held only for
//! lookup and insertion.

pub mod registry;

pub use registry::JobRegistry;
