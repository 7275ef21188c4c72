use std::env;
use std::path::PathBuf;

use cbindgen::{Builder, Config};

const HEADER: &str = "bindings.h";

fn main() {
    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let config = Config::from_file(crate_dir.join("cbindgen.toml")).unwrap();

    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
        .expect("Unable to generate the OneCard bindings")
        .write_to_file(crate_dir.join(HEADER));
}
