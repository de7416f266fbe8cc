fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file_descriptor_set = protox::compile(["proto/gnmi.proto"], ["proto"])?;
    tonic_build::configure()
        .build_server(false)
        .skip_protoc_run()
        .compile_fds(file_descriptor_set)?;
    println!("cargo:rerun-if-changed=proto/gnmi.proto");
    Ok(())
}
