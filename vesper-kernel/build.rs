fn main() {
    // The linker script only applies to the bare-metal target; host
    // builds (unit tests) link normally.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("aarch64-unknown-none") {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{}/kernel.ld", manifest_dir);
    }

    println!("cargo:rerun-if-changed=kernel.ld");
}
