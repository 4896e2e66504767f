use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().build_timestamp().emit()?;

    println!("cargo:rerun-if-changed=proto/clamgate.proto");
    let fds = protox::compile(["proto/clamgate.proto"], ["proto"])?;
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_fds(fds)?;
    Ok(())
}
