// Generated Interrupt Tables
//
// The IDT and the IRQ-to-vector map are data produced by gen_idt from the
// first link of the image. build.rs stages them in OUT_DIR (zero-filled
// placeholders on the first link) and they are assembled in here verbatim:
//
// - `_idt_base_address`: `IDT_BYTES` of gates, loaded by `idt::load`
// - `_irq_vector_map`: `IRQ_MAP_SIZE` bytes, dynamic mapping only
//
// The assembler rejects a staged file whose size does not match the layout,
// so a table generated for another configuration cannot be linked.
//
// The `.intList` sections gen_idt reads are kept by `link/intlist.ld`, which
// the image's linker script INCLUDEs (build.rs exports its path as
// `DEP_KEEL_LINKER_FRAGMENT`).

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
core::arch::global_asm!(
    ".pushsection .rodata._idt_base_address, \"a\"",
    ".balign 16",
    ".global _idt_base_address",
    "_idt_base_address:",
    concat!(".incbin \"", env!("OUT_DIR"), "/idt.bin\""),
    ".if (. - _idt_base_address) - {idt_bytes}",
    ".error \"staged IDT does not match IDT_BYTES\"",
    ".endif",
    ".popsection",
    idt_bytes = const super::idt::IDT_BYTES,
);

#[cfg(all(target_arch = "x86_64", target_os = "none", not(feature = "fixed-irq-mapping")))]
core::arch::global_asm!(
    ".pushsection .rodata._irq_vector_map, \"a\"",
    ".global _irq_vector_map",
    "_irq_vector_map:",
    concat!(".incbin \"", env!("OUT_DIR"), "/irq_vector_map.bin\""),
    ".if (. - _irq_vector_map) - {map_size}",
    ".error \"staged IRQ-to-vector map does not match IRQ_MAP_SIZE\"",
    ".endif",
    ".popsection",
    map_size = const crate::config::IRQ_MAP_SIZE,
);
