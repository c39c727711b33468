fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Rerun if proto files change
    println!("cargo:rerun-if-changed=proto/flipcash/common.proto");
    println!("cargo:rerun-if-changed=proto/flipcash/event.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/flipcash/common.proto",
                "proto/flipcash/event.proto",
            ],
            &["proto"],
        )?;
    Ok(())
}
