use std::env;

fn main() -> Result<(), env::VarError> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")?;

    // Host builds produce a stub binary and link normally.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        println!("cargo:rustc-link-arg-bins=-T{}/linker.ld", manifest_dir);
    }

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=linker.ld");
    Ok(())
}
