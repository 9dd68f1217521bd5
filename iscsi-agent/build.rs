fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc binary so the build does not depend on a
    // system-installed protobuf compiler.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            unsafe { std::env::set_var("PROTOC", protoc) };
        }
    }

    // Compile the agent proto (server side only)
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(&["../proto/iscsi_agent.proto"], &["../proto"])?;

    Ok(())
}
