fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file_descriptor_set = protox::compile(["proto/flow.proto"], ["proto"])?;
    prost_build::Config::new()
        .skip_protoc_run()
        .compile_fds(file_descriptor_set)?;
    println!("cargo:rerun-if-changed=proto/flow.proto");
    Ok(())
}
