fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ensure a protoc binary is available even when one isn't installed system-wide.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }

    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("foldserve_descriptor.bin"))
        .compile_protos(
            &[
                "proto/common.proto",
                "proto/inference_service.proto",
                "proto/msa_service.proto",
                "proto/training_service.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
