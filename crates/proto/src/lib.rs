//! Generated gRPC bindings for the foldserve wire protocol.
//!
//! The `.proto` sources live under `proto/`; `build.rs` compiles them with
//! `tonic-build` and also emits the file descriptor set consumed by the
//! server reflection service.

pub mod v1 {
    tonic::include_proto!("foldserve.v1");

    /// Encoded file descriptor set for gRPC server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("foldserve_descriptor");
}
