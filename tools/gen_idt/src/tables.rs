//! Table construction from raw `.intList` bytes.

use anyhow::{bail, Context, Result};
use keel::config::NUM_VECTORS;
use keel::interrupts::descriptor::{self, DescriptorRecord, Dpl, HeaderRecord, SOFT_IRQ, UNASSIGNED};
use keel::interrupts::idt::{VectorTable, IDT_BYTES};
use keel::interrupts::vectors::{IrqVectorMap, PriorityGroups, VectorAllocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    Fixed,
    Dynamic,
}

/// One descriptor with its final vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub record: DescriptorRecord,
    pub vector: u8,
}

#[derive(Debug)]
pub struct Tables {
    pub idt: Vec<u8>,
    /// Only produced with dynamic mapping.
    pub irq_map: Option<IrqVectorMap>,
    pub assignments: Vec<Assignment>,
}

fn dpl_of(raw: u32) -> Dpl {
    if raw == Dpl::User as u32 {
        Dpl::User
    } else {
        Dpl::Kernel
    }
}

pub fn build(header: &[u8], list: &[u8], mapping: Mapping) -> Result<Tables> {
    let header = HeaderRecord::parse(header).map_err(anyhow::Error::msg)?;
    if header.num_vectors as usize != NUM_VECTORS {
        bail!(
            "image was built for {} vectors, this tool generates {}",
            header.num_vectors,
            NUM_VECTORS
        );
    }

    let records: Vec<DescriptorRecord> = descriptor::records(list)
        .map_err(anyhow::Error::msg)?
        .collect();

    for record in &records {
        record
            .validate()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("invalid descriptor {:x?}", record))?;

        if mapping == Mapping::Fixed && record.vector == UNASSIGNED {
            bail!(
                "IRQ {} (handler {:#x}) has no vector; fixed mapping needs the controller's vector",
                record.irq,
                record.handler
            );
        }
    }

    let mut table = VectorTable::with_spurious(header.spurious, header.spurious_no_error);
    let mut allocator = VectorAllocator::new(PriorityGroups::kernel());
    let mut assignments = Vec::with_capacity(records.len());

    allocator
        .resolve_all(&records, |record, vector| {
            assignments.push(Assignment { record: *record, vector });
        })
        .map_err(anyhow::Error::msg)?;

    for assignment in &assignments {
        let record = &assignment.record;
        table
            .install(assignment.vector as u32, record.handler, dpl_of(record.dpl))
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("installing handler {:#x}", record.handler))?;
    }

    let mut idt = vec![0u8; IDT_BYTES];
    let out: &mut [u8; IDT_BYTES] = idt
        .as_mut_slice()
        .try_into()
        .context("IDT buffer has the wrong size")?;
    table.write_to(out);

    let irq_map = match mapping {
        Mapping::Dynamic => Some(allocator.into_map()),
        Mapping::Fixed => None,
    };

    Ok(Tables {
        idt,
        irq_map,
        assignments,
    })
}

pub fn describe(assignment: &Assignment) -> String {
    let record = &assignment.record;
    let source = if record.irq == SOFT_IRQ {
        String::from("soft")
    } else {
        format!("IRQ{}", record.irq)
    };
    let how = if record.vector == UNASSIGNED {
        format!("prio {}", record.priority)
    } else {
        String::from("explicit")
    };

    format!(
        "  vector 0x{:02x}  {:<6} {:<9} dpl {}  -> 0x{:x}",
        assignment.vector, source, how, record.dpl, record.handler
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::interrupts::idt::GATE_SIZE;

    const SPURIOUS: u64 = 0xFFFF_8000_0000_1000;
    const SPURIOUS_NO_ERROR: u64 = 0xFFFF_8000_0000_1010;

    fn header() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&SPURIOUS.to_le_bytes());
        out.extend_from_slice(&SPURIOUS_NO_ERROR.to_le_bytes());
        out.extend_from_slice(&(NUM_VECTORS as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    fn list(records: &[DescriptorRecord]) -> Vec<u8> {
        records.iter().flat_map(|r| r.to_bytes()).collect()
    }

    fn record(handler: u64, irq: u32, priority: u32, vector: u32) -> DescriptorRecord {
        DescriptorRecord {
            handler,
            irq,
            priority,
            vector,
            dpl: Dpl::Kernel as u32,
        }
    }

    fn gate_handler(idt: &[u8], vector: usize) -> u64 {
        let gate = &idt[vector * GATE_SIZE..(vector + 1) * GATE_SIZE];
        let low = u16::from_le_bytes([gate[0], gate[1]]) as u64;
        let mid = u16::from_le_bytes([gate[6], gate[7]]) as u64;
        let high = u32::from_le_bytes([gate[8], gate[9], gate[10], gate[11]]) as u64;
        low | (mid << 16) | (high << 32)
    }

    #[test]
    fn dynamic_irqs_land_in_their_priority_group() {
        let records = [
            record(0xA000, 10, 2, UNASSIGNED),
            record(0xB000, 11, 2, UNASSIGNED),
            record(0xC000, 12, 2, UNASSIGNED),
        ];

        let tables = build(&header(), &list(&records), Mapping::Dynamic).unwrap();
        let map = tables.irq_map.unwrap();

        let vectors: Vec<u8> = tables.assignments.iter().map(|a| a.vector).collect();
        assert_eq!(vectors, vec![64, 65, 66]);
        assert_eq!(map.as_bytes()[10], 64);
        assert_eq!(map.as_bytes()[12], 66);
        assert_eq!(gate_handler(&tables.idt, 65), 0xB000);
    }

    #[test]
    fn unclaimed_vectors_use_matching_spurious_handler() {
        let tables = build(&header(), &[], Mapping::Dynamic).unwrap();

        assert_eq!(tables.idt.len(), IDT_BYTES);
        assert_eq!(gate_handler(&tables.idt, 8), SPURIOUS);
        assert_eq!(gate_handler(&tables.idt, 3), SPURIOUS_NO_ERROR);
        assert_eq!(gate_handler(&tables.idt, 200), SPURIOUS_NO_ERROR);
    }

    #[test]
    fn exception_stubs_keep_their_vectors() {
        let records = [
            record(0xE000, SOFT_IRQ, 0, 14),
            record(0xD000, 5, 0, UNASSIGNED),
        ];

        let tables = build(&header(), &list(&records), Mapping::Dynamic).unwrap();

        assert_eq!(gate_handler(&tables.idt, 14), 0xE000);
        assert_eq!(gate_handler(&tables.idt, 32), 0xD000);
    }

    #[test]
    fn fixed_mapping_rejects_unassigned_descriptor() {
        let records = [record(0xA000, 4, 1, UNASSIGNED)];

        assert!(build(&header(), &list(&records), Mapping::Fixed).is_err());
    }

    #[test]
    fn fixed_mapping_emits_no_irq_map() {
        let records = [record(0xA000, 4, 1, 0x24)];

        let tables = build(&header(), &list(&records), Mapping::Fixed).unwrap();

        assert!(tables.irq_map.is_none());
        assert_eq!(gate_handler(&tables.idt, 0x24), 0xA000);
    }

    #[test]
    fn duplicate_explicit_vectors_fail() {
        let records = [
            record(0xA000, SOFT_IRQ, 0, 0x80),
            record(0xB000, SOFT_IRQ, 0, 0x80),
        ];

        assert!(build(&header(), &list(&records), Mapping::Dynamic).is_err());
    }

    #[test]
    fn full_priority_group_fails() {
        let records: Vec<DescriptorRecord> =
            (0..17).map(|irq| record(0x1000 + irq as u64, irq, 3, UNASSIGNED)).collect();

        let err = build(&header(), &list(&records), Mapping::Dynamic).unwrap_err();
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn header_with_other_vector_count_is_rejected() {
        let mut bad = header();
        bad[16..20].copy_from_slice(&128u32.to_le_bytes());

        assert!(build(&bad, &[], Mapping::Dynamic).is_err());
    }

    #[test]
    fn truncated_section_is_rejected() {
        let mut bytes = list(&[record(0xA000, 1, 0, UNASSIGNED)]);
        bytes.pop();

        assert!(build(&header(), &bytes, Mapping::Dynamic).is_err());
    }
}
