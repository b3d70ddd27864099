// Static Registration Descriptor Table
//
// Every statically connected interrupt leaves one `IsrListEntry` in the
// `.intList` link section. The kernel never reads these records at run time;
// gen_idt extracts the section from the linked image, resolves vectors and
// writes the IDT. The records are immutable after creation.
//
// Layout of one record (24 bytes, little endian):
//
//     +0   handler   stub address
//     +8   irq       IRQ line, or SOFT_IRQ
//     +12  priority  priority level
//     +16  vector    explicit vector, or UNASSIGNED
//     +20  dpl       descriptor privilege level
//
// `.intList.header` holds a single `IntListHeader` naming the two spurious
// handlers and the IDT size.
//
// Invariant: a software interrupt (`irq == SOFT_IRQ`) always names its
// vector; only hardware lines may ask for dynamic assignment.

use core::fmt;
use core::mem::size_of;
use static_assertions::const_assert_eq;

/// `irq` value of a descriptor with no hardware line behind it.
pub const SOFT_IRQ: u32 = u32::MAX;

/// `vector` value asking the offline allocator to pick one.
pub const UNASSIGNED: u32 = u32::MAX;

pub const RECORD_SIZE: usize = 24;
pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Dpl {
    Kernel = 0,
    User = 3,
}

/// Raw descriptor as emitted by `irq_connect!` and `int_register!`.
#[repr(C)]
pub struct IsrListEntry {
    pub handler: unsafe extern "C" fn(),
    pub irq: u32,
    pub priority: u32,
    pub vector: u32,
    pub dpl: u32,
}

const_assert_eq!(size_of::<IsrListEntry>(), RECORD_SIZE);

// SAFETY: the record is plain data placed in a read-only section; the handler
// is only ever an address.
unsafe impl Sync for IsrListEntry {}

#[repr(C)]
pub struct IntListHeader {
    pub spurious: unsafe extern "C" fn(),
    pub spurious_no_error: unsafe extern "C" fn(),
    pub num_vectors: u32,
    pub reserved: u32,
}

const_assert_eq!(size_of::<IntListHeader>(), HEADER_SIZE);

unsafe impl Sync for IntListHeader {}

/// Descriptor as read back from a linked image, with the handler reduced to
/// its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRecord {
    pub handler: u64,
    pub irq: u32,
    pub priority: u32,
    pub vector: u32,
    pub dpl: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRecord {
    pub spurious: u64,
    pub spurious_no_error: u64,
    pub num_vectors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    TruncatedSection { len: usize },
    MissingHeader,
    SoftIrqWithoutVector { handler: u64 },
    InvalidDpl { handler: u64, dpl: u32 },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::TruncatedSection { len } => write!(
                f,
                "descriptor section is {} bytes, not a multiple of {}",
                len, RECORD_SIZE
            ),
            DescriptorError::MissingHeader => write!(f, "descriptor header is missing or short"),
            DescriptorError::SoftIrqWithoutVector { handler } => write!(
                f,
                "software interrupt at {:#x} has no explicit vector",
                handler
            ),
            DescriptorError::InvalidDpl { handler, dpl } => {
                write!(f, "handler {:#x} requests privilege level {}", handler, dpl)
            }
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

impl DescriptorRecord {
    /// Decode one `RECORD_SIZE` chunk.
    fn from_chunk(chunk: &[u8]) -> Self {
        Self {
            handler: read_u64(chunk, 0),
            irq: read_u32(chunk, 8),
            priority: read_u32(chunk, 12),
            vector: read_u32(chunk, 16),
            dpl: read_u32(chunk, 20),
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..8].copy_from_slice(&self.handler.to_le_bytes());
        out[8..12].copy_from_slice(&self.irq.to_le_bytes());
        out[12..16].copy_from_slice(&self.priority.to_le_bytes());
        out[16..20].copy_from_slice(&self.vector.to_le_bytes());
        out[20..24].copy_from_slice(&self.dpl.to_le_bytes());
        out
    }

    pub fn is_soft(&self) -> bool {
        self.irq == SOFT_IRQ
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.is_soft() && self.vector == UNASSIGNED {
            return Err(DescriptorError::SoftIrqWithoutVector { handler: self.handler });
        }

        if self.dpl != Dpl::Kernel as u32 && self.dpl != Dpl::User as u32 {
            return Err(DescriptorError::InvalidDpl {
                handler: self.handler,
                dpl: self.dpl,
            });
        }

        Ok(())
    }
}

impl HeaderRecord {
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DescriptorError::MissingHeader);
        }

        Ok(Self {
            spurious: read_u64(bytes, 0),
            spurious_no_error: read_u64(bytes, 8),
            num_vectors: read_u32(bytes, 16),
        })
    }
}

/// Iterate the records of a `.intList` section.
pub fn records(section: &[u8]) -> Result<impl Iterator<Item = DescriptorRecord> + '_, DescriptorError> {
    if section.len() % RECORD_SIZE != 0 {
        return Err(DescriptorError::TruncatedSection { len: section.len() });
    }

    Ok(section.chunks_exact(RECORD_SIZE).map(DescriptorRecord::from_chunk))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(records: &[DescriptorRecord]) -> Vec<u8> {
        records.iter().flat_map(|r| r.to_bytes()).collect()
    }

    #[test]
    fn records_are_decoded_in_field_order() {
        let rec = DescriptorRecord {
            handler: 0xFFFF_8000_0010_2030,
            irq: 28,
            priority: 2,
            vector: UNASSIGNED,
            dpl: 0,
        };
        let bytes = section(&[rec]);

        assert_eq!(&bytes[8..12], &28u32.to_le_bytes());
        let parsed: Vec<_> = records(&bytes).unwrap().collect();
        assert_eq!(parsed, vec![rec]);
    }

    #[test]
    fn truncated_section_is_rejected() {
        let bytes = [0u8; RECORD_SIZE + 3];
        assert!(matches!(
            records(&bytes),
            Err(DescriptorError::TruncatedSection { len }) if len == RECORD_SIZE + 3
        ));
    }

    #[test]
    fn soft_irq_must_carry_a_vector() {
        let rec = DescriptorRecord {
            handler: 0x1000,
            irq: SOFT_IRQ,
            priority: 0,
            vector: UNASSIGNED,
            dpl: Dpl::User as u32,
        };
        assert_eq!(
            rec.validate(),
            Err(DescriptorError::SoftIrqWithoutVector { handler: 0x1000 })
        );

        let ok = DescriptorRecord { vector: 0x68, ..rec };
        assert_eq!(ok.validate(), Ok(()));
    }

    #[test]
    fn unknown_privilege_level_is_rejected() {
        let rec = DescriptorRecord {
            handler: 0x2000,
            irq: 4,
            priority: 1,
            vector: UNASSIGNED,
            dpl: 2,
        };
        assert_eq!(
            rec.validate(),
            Err(DescriptorError::InvalidDpl { handler: 0x2000, dpl: 2 })
        );
    }

    #[test]
    fn header_parses_handler_addresses() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xAAAAu64.to_le_bytes());
        bytes.extend_from_slice(&0xBBBBu64.to_le_bytes());
        bytes.extend_from_slice(&256u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let header = HeaderRecord::parse(&bytes).unwrap();
        assert_eq!(header.spurious, 0xAAAA);
        assert_eq!(header.spurious_no_error, 0xBBBB);
        assert_eq!(header.num_vectors, 256);

        assert_eq!(HeaderRecord::parse(&bytes[..10]), Err(DescriptorError::MissingHeader));
    }
}
