// Stages the generated interrupt tables for `interrupts::linked`.
//
// The image is linked twice. The first build has no tables yet and links
// zero-filled placeholders of the final size; gen_idt then reads `.intList`
// from that image, and the second build points KEEL_IDT and
// KEEL_IRQ_VECTOR_MAP at its outputs. Both links carry tables of identical
// size, so no stub moves between them.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

// checked against the kernel's layout when the tables are assembled
const IDT_BYTES: usize = 256 * 16;
const IRQ_MAP_SIZE: usize = 64;

fn stage(var: &str, name: &str, size: usize, out_dir: &Path) {
    println!("cargo:rerun-if-env-changed={var}");

    let bytes = match env::var_os(var) {
        Some(path) => {
            let path = PathBuf::from(path);
            println!("cargo:rerun-if-changed={}", path.display());

            let bytes = fs::read(&path)
                .unwrap_or_else(|err| panic!("{var}: cannot read {}: {err}", path.display()));
            assert!(
                bytes.len() == size,
                "{var}: {} is {} bytes, expected {size}",
                path.display(),
                bytes.len()
            );
            bytes
        }
        None => vec![0u8; size],
    };

    fs::write(out_dir.join(name), bytes).expect("failed to stage interrupt table");
}

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));

    stage("KEEL_IDT", "idt.bin", IDT_BYTES, &out_dir);
    stage("KEEL_IRQ_VECTOR_MAP", "irq_vector_map.bin", IRQ_MAP_SIZE, &out_dir);

    // --- linker fragment ----------------------------------------------------
    // image build scripts see this as DEP_KEEL_LINKER_FRAGMENT
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    let fragment = manifest_dir.join("link").join("intlist.ld");
    println!("cargo:rerun-if-changed={}", fragment.display());
    println!("cargo:linker_fragment={}", fragment.display());
}
