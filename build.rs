fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/scheduler.proto")?;

    // panics if not linux, encoder shutdown relies on SIGTERM
    if std::env::consts::OS != "linux" {
        panic!("This program only runs on linux");
    }
    Ok(())
}
