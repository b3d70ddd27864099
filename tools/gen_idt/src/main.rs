//! IDT generator
//!
//! Reads the `.intList` descriptors from a linked Keel image, assigns a
//! vector to every connected interrupt and writes the raw IDT (and, with
//! dynamic mapping, the IRQ-to-vector map) for the final link. The kernel's
//! build script picks them up from `KEEL_IDT` and `KEEL_IRQ_VECTOR_MAP`.

mod tables;

use anyhow::{Context, Result};
use clap::Parser;
use object::{Object, ObjectSection};
use std::fs;
use std::path::PathBuf;
use tables::Mapping;

#[derive(Parser, Debug)]
#[command(name = "gen_idt", version, about = "Build the Keel IDT from .intList descriptors")]
struct Args {
    /// Linked kernel image (ELF)
    kernel: PathBuf,

    /// Output file for the raw IDT
    #[arg(long, default_value = "idt.bin")]
    idt_out: PathBuf,

    /// Output file for the IRQ-to-vector map (dynamic mapping only)
    #[arg(long, default_value = "irq_vector_map.bin")]
    map_out: PathBuf,

    /// Vectors come from the controller's fixed wiring
    #[arg(long)]
    fixed_mapping: bool,

    /// List every assignment
    #[arg(short, long)]
    verbose: bool,
}

fn section_bytes<'data>(obj: &object::File<'data>, name: &str) -> Result<&'data [u8]> {
    let section = obj
        .section_by_name(name)
        .with_context(|| format!("image has no {} section", name))?;
    let data = section
        .data()
        .with_context(|| format!("failed to read {}", name))?;
    println!("{}: {} bytes at vaddr 0x{:x}", name, data.len(), section.address());
    Ok(data)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let data = fs::read(&args.kernel)
        .with_context(|| format!("failed to read {}", args.kernel.display()))?;
    let obj = object::File::parse(&*data).context("failed to parse kernel ELF")?;

    let header = section_bytes(&obj, ".intList.header")?;
    let list = section_bytes(&obj, ".intList")?;

    let mapping = if args.fixed_mapping {
        Mapping::Fixed
    } else {
        Mapping::Dynamic
    };

    let tables = tables::build(header, list, mapping)?;

    if args.verbose {
        for assignment in &tables.assignments {
            println!("{}", tables::describe(assignment));
        }
    }

    fs::write(&args.idt_out, &tables.idt)
        .with_context(|| format!("failed to write {}", args.idt_out.display()))?;

    println!("\nIDT created: {}", args.idt_out.display());
    println!("  Connected: {} vectors", tables.assignments.len());
    println!("  Size: {} bytes", tables.idt.len());

    if let Some(map) = &tables.irq_map {
        fs::write(&args.map_out, map.as_bytes())
            .with_context(|| format!("failed to write {}", args.map_out.display()))?;

        println!("IRQ map created: {}", args.map_out.display());
        println!("  Lines: {}", map.connected().count());
    }

    // the kernel's build script runs in its own directory
    let absolute = |path: &PathBuf| fs::canonicalize(path).unwrap_or_else(|_| path.clone());

    println!("\nRebuild the image with:");
    println!("  KEEL_IDT={}", absolute(&args.idt_out).display());
    if tables.irq_map.is_some() {
        println!("  KEEL_IRQ_VECTOR_MAP={}", absolute(&args.map_out).display());
    }

    Ok(())
}
