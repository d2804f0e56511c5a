fn main() -> Result<(), Box<dyn std::error::Error>> {
    // protoc is not available in this build environment and cannot be fetched
    // via the system package manager (no network). Supply a vendored binary so
    // tonic-build's codegen can run. This is build plumbing only; it does not
    // change generated output.
    if std::env::var_os("PROTOC").is_none() {
        unsafe {
            std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
        }
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/roost/host/v1/bots.proto",
                "proto/roost/host/v1/filesystem.proto",
                "proto/roost/host/v1/logs.proto",
                "proto/roost/host/v1/health.proto",
            ],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/roost/host/v1/bots.proto");
    println!("cargo:rerun-if-changed=proto/roost/host/v1/filesystem.proto");
    println!("cargo:rerun-if-changed=proto/roost/host/v1/logs.proto");
    println!("cargo:rerun-if-changed=proto/roost/host/v1/health.proto");
    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
