// Vector Assignment Policy
//
// Decides which IDT vector an (IRQ line, priority) pair lands on. Two modes
// exist and a build uses exactly one of them:
//
// - Fixed mapping (`fixed-irq-mapping`): the controller hard-wires
//   `vector = IRQ + 0x20`; the priority is accepted and ignored. There is no
//   lookup table at run time.
// - Dynamic mapping (default): registration records `UNASSIGNED`, and the
//   offline generator gives the IRQ a free vector inside its priority group.
//   Groups are `VECTORS_PER_PRIORITY` wide and start at `VECTOR_BASE`:
//
//       priority p  ->  [VECTOR_BASE + p * 16, VECTOR_BASE + (p + 1) * 16)
//
//   The result is published as the IRQ-to-vector map, which is read-only
//   after link.
//
// Runtime code goes through `VectorLookup` (`irq_to_vector`) and must not
// assume which mode is active.
//
// Build-time failures are `AssignError`s; gen_idt refuses to emit tables when
// any descriptor fails to resolve.

use super::descriptor::{DescriptorRecord, SOFT_IRQ, UNASSIGNED};
use crate::config::{
    FIXED_VECTOR_OFFSET, IRQ_MAP_SIZE, NUM_PRIORITIES, NUM_VECTORS, VECTORS_PER_PRIORITY,
    VECTOR_BASE,
};
use core::fmt;
use core::ops::Range;
use spin::Once;

/// Value of the descriptor `vector` field for an `irq_connect!` call.
pub const fn vector_arg(irq: u32) -> u32 {
    if cfg!(feature = "fixed-irq-mapping") {
        FixedMapping::vector_of(irq)
    } else {
        UNASSIGNED
    }
}

pub trait VectorLookup {
    fn vector_for(&self, irq: u32) -> Option<u8>;
}

/// Controller wiring where the vector is a pure function of the IRQ line.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedMapping;

impl FixedMapping {
    pub const fn vector_of(irq: u32) -> u32 {
        irq + FIXED_VECTOR_OFFSET
    }
}

impl VectorLookup for FixedMapping {
    fn vector_for(&self, irq: u32) -> Option<u8> {
        let vector = irq.checked_add(FIXED_VECTOR_OFFSET)?;
        if vector < NUM_VECTORS as u32 {
            Some(vector as u8)
        } else {
            None
        }
    }
}

/// Published IRQ-to-vector table for dynamic mapping. Zero marks a line that
/// was never connected; no IRQ can legitimately use an exception vector.
#[derive(Clone, PartialEq, Eq)]
pub struct IrqVectorMap {
    vectors: [u8; IRQ_MAP_SIZE],
}

impl IrqVectorMap {
    pub const fn empty() -> Self {
        Self {
            vectors: [0; IRQ_MAP_SIZE],
        }
    }

    /// Rebuild from the on-disk form written by gen_idt. Bytes past
    /// `IRQ_MAP_SIZE` are ignored, missing bytes stay unconnected.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut map = Self::empty();
        for (slot, byte) in map.vectors.iter_mut().zip(bytes) {
            *slot = *byte;
        }
        map
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.vectors
    }

    pub fn connected(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.vectors
            .iter()
            .enumerate()
            .filter(|(_, vector)| **vector != 0)
            .map(|(irq, vector)| (irq as u32, *vector))
    }

    fn set(&mut self, irq: u32, vector: u8) -> Result<(), AssignError> {
        let slot = self
            .vectors
            .get_mut(irq as usize)
            .ok_or(AssignError::IrqOutOfRange { irq })?;

        if *slot != 0 && *slot != vector {
            return Err(AssignError::IrqAlreadyConnected { irq, vector: *slot });
        }

        *slot = vector;
        Ok(())
    }
}

impl VectorLookup for IrqVectorMap {
    fn vector_for(&self, irq: u32) -> Option<u8> {
        match self.vectors.get(irq as usize) {
            Some(0) | None => None,
            Some(vector) => Some(*vector),
        }
    }
}

impl Default for IrqVectorMap {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for IrqVectorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.connected()).finish()
    }
}

/// Geometry of the priority groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityGroups {
    pub base: u32,
    pub group_size: u32,
    pub count: u32,
}

impl PriorityGroups {
    pub const fn kernel() -> Self {
        Self {
            base: VECTOR_BASE,
            group_size: VECTORS_PER_PRIORITY,
            count: NUM_PRIORITIES,
        }
    }

    pub fn range(&self, priority: u32) -> Option<Range<u32>> {
        if priority >= self.count {
            return None;
        }

        let start = self.base + priority * self.group_size;
        let end = start + self.group_size;
        if end > NUM_VECTORS as u32 {
            return None;
        }

        Some(start..end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    PriorityGroupFull { priority: u32, capacity: u32 },
    PriorityOutOfRange { priority: u32 },
    VectorOutOfRange { vector: u32 },
    VectorInUse { vector: u32 },
    SoftIrqWithoutVector,
    IrqOutOfRange { irq: u32 },
    IrqAlreadyConnected { irq: u32, vector: u8 },
    ExceptionVectorForIrq { irq: u32, vector: u32 },
}

impl fmt::Display for AssignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignError::PriorityGroupFull { priority, capacity } => write!(
                f,
                "too many interrupts at priority {} (group holds {})",
                priority, capacity
            ),
            AssignError::PriorityOutOfRange { priority } => {
                write!(f, "priority {} has no vector group", priority)
            }
            AssignError::VectorOutOfRange { vector } => {
                write!(f, "vector {} is outside the IDT", vector)
            }
            AssignError::VectorInUse { vector } => {
                write!(f, "vector {} is claimed by more than one interrupt", vector)
            }
            AssignError::SoftIrqWithoutVector => {
                write!(f, "software interrupt registered without an explicit vector")
            }
            AssignError::IrqOutOfRange { irq } => {
                write!(f, "IRQ {} is beyond the IRQ-to-vector map", irq)
            }
            AssignError::IrqAlreadyConnected { irq, vector } => {
                write!(f, "IRQ {} is already connected to vector {}", irq, vector)
            }
            AssignError::ExceptionVectorForIrq { irq, vector } => write!(
                f,
                "IRQ {} asks for vector {}, which is reserved for CPU exceptions",
                irq, vector
            ),
        }
    }
}

/// Offline vector allocator. Explicit vectors must be reserved before any
/// `UNASSIGNED` descriptor is allocated, so a dynamic allocation can never
/// take a vector a later explicit registration needs; `resolve_all` does
/// the two passes in that order.
pub struct VectorAllocator {
    groups: PriorityGroups,
    used: [bool; NUM_VECTORS],
    map: IrqVectorMap,
}

impl VectorAllocator {
    pub const fn new(groups: PriorityGroups) -> Self {
        Self {
            groups,
            used: [false; NUM_VECTORS],
            map: IrqVectorMap::empty(),
        }
    }

    /// Claim the explicit vector of a descriptor.
    pub fn reserve(&mut self, record: &DescriptorRecord) -> Result<u8, AssignError> {
        if record.vector == UNASSIGNED {
            return Err(AssignError::SoftIrqWithoutVector);
        }

        let vector = record.vector;
        if record.irq != SOFT_IRQ && vector < VECTOR_BASE {
            return Err(AssignError::ExceptionVectorForIrq { irq: record.irq, vector });
        }

        let slot = self
            .used
            .get_mut(vector as usize)
            .ok_or(AssignError::VectorOutOfRange { vector })?;
        if *slot {
            return Err(AssignError::VectorInUse { vector });
        }
        *slot = true;

        if record.irq != SOFT_IRQ {
            self.map.set(record.irq, vector as u8)?;
        }

        Ok(vector as u8)
    }

    /// Give an `UNASSIGNED` descriptor the lowest free vector of its group.
    pub fn allocate(&mut self, record: &DescriptorRecord) -> Result<u8, AssignError> {
        if record.irq == SOFT_IRQ {
            return Err(AssignError::SoftIrqWithoutVector);
        }
        if record.irq as usize >= IRQ_MAP_SIZE {
            return Err(AssignError::IrqOutOfRange { irq: record.irq });
        }

        let range = self
            .groups
            .range(record.priority)
            .ok_or(AssignError::PriorityOutOfRange { priority: record.priority })?;

        let vector = range
            .clone()
            .find(|vector| !self.used[*vector as usize])
            .ok_or(AssignError::PriorityGroupFull {
                priority: record.priority,
                capacity: range.end - range.start,
            })?;

        self.map.set(record.irq, vector as u8)?;
        self.used[vector as usize] = true;

        Ok(vector as u8)
    }

    /// Resolve every descriptor, explicit vectors first. `on_resolved` sees
    /// each descriptor exactly once together with its final vector.
    pub fn resolve_all<F>(&mut self, records: &[DescriptorRecord], mut on_resolved: F) -> Result<(), AssignError>
    where
        F: FnMut(&DescriptorRecord, u8),
    {
        for record in records.iter().filter(|r| r.vector != UNASSIGNED) {
            let vector = self.reserve(record)?;
            on_resolved(record, vector);
        }

        for record in records.iter().filter(|r| r.vector == UNASSIGNED) {
            let vector = self.allocate(record)?;
            on_resolved(record, vector);
        }

        Ok(())
    }

    pub fn into_map(self) -> IrqVectorMap {
        self.map
    }
}

static IRQ_VECTOR_MAP: Once<IrqVectorMap> = Once::new();

/// Publish the IRQ-to-vector map produced by gen_idt. Only the first call
/// has any effect.
pub fn install_vector_map(map: IrqVectorMap) {
    IRQ_VECTOR_MAP.call_once(|| map);
}

static UNPUBLISHED: IrqVectorMap = IrqVectorMap::empty();

/// Lookup matching the build's mapping mode. Before the map is installed
/// every dynamic lookup fails.
pub fn active_lookup() -> &'static dyn VectorLookup {
    if cfg!(feature = "fixed-irq-mapping") {
        &FixedMapping
    } else {
        IRQ_VECTOR_MAP.get().unwrap_or(&UNPUBLISHED)
    }
}

/// Vector of a statically connected IRQ, whatever the mapping mode.
pub fn irq_to_vector(irq: u32) -> Option<u8> {
    active_lookup().vector_for(irq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::descriptor::Dpl;

    fn record(irq: u32, priority: u32, vector: u32) -> DescriptorRecord {
        DescriptorRecord {
            handler: 0x1000 + irq as u64,
            irq,
            priority,
            vector,
            dpl: Dpl::Kernel as u32,
        }
    }

    #[test]
    fn dynamic_vector_lands_in_priority_group() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());

        let first = alloc.allocate(&record(5, 2, UNASSIGNED)).unwrap();
        assert!((64..80).contains(&first), "vector {} outside group 2", first);

        let second = alloc.allocate(&record(9, 2, UNASSIGNED)).unwrap();
        assert!((64..80).contains(&second));
        assert_ne!(first, second);

        let map = alloc.into_map();
        assert_eq!(map.vector_for(5), Some(first));
        assert_eq!(map.vector_for(9), Some(second));
        assert_eq!(map.vector_for(6), None);
    }

    #[test]
    fn group_exhaustion_is_reported() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        for irq in 0..VECTORS_PER_PRIORITY {
            alloc.allocate(&record(irq, 0, UNASSIGNED)).unwrap();
        }

        assert_eq!(
            alloc.allocate(&record(40, 0, UNASSIGNED)),
            Err(AssignError::PriorityGroupFull { priority: 0, capacity: 16 })
        );
    }

    #[test]
    fn explicit_vectors_are_reserved_before_allocation() {
        let records = [
            record(1, 2, UNASSIGNED),
            record(SOFT_IRQ, 0, 0x40),
            record(2, 2, UNASSIGNED),
        ];

        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        let mut seen = Vec::new();
        alloc
            .resolve_all(&records, |r, v| seen.push((r.irq, v)))
            .unwrap();

        assert_eq!(seen[0], (SOFT_IRQ, 0x40));
        assert_eq!(seen[1], (1, 0x41));
        assert_eq!(seen[2], (2, 0x42));
    }

    #[test]
    fn distinct_irqs_never_share_a_vector() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        let mut vectors = Vec::new();
        for irq in 0..IRQ_MAP_SIZE as u32 {
            let priority = irq % NUM_PRIORITIES;
            let vector = alloc.allocate(&record(irq, priority, UNASSIGNED)).unwrap();
            let group = PriorityGroups::kernel().range(priority).unwrap();
            assert!(group.contains(&(vector as u32)));
            vectors.push(vector);
        }

        vectors.sort_unstable();
        vectors.dedup();
        assert_eq!(vectors.len(), IRQ_MAP_SIZE);
    }

    #[test]
    fn duplicate_explicit_vector_is_rejected() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        alloc.reserve(&record(SOFT_IRQ, 0, 0x68)).unwrap();

        assert_eq!(
            alloc.reserve(&record(SOFT_IRQ, 0, 0x68)),
            Err(AssignError::VectorInUse { vector: 0x68 })
        );
    }

    #[test]
    fn soft_irq_requires_explicit_vector() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        assert_eq!(
            alloc.allocate(&record(SOFT_IRQ, 1, UNASSIGNED)),
            Err(AssignError::SoftIrqWithoutVector)
        );
    }

    #[test]
    fn out_of_range_inputs_are_rejected() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());

        assert_eq!(
            alloc.allocate(&record(3, NUM_PRIORITIES, UNASSIGNED)),
            Err(AssignError::PriorityOutOfRange { priority: NUM_PRIORITIES })
        );
        assert_eq!(
            alloc.allocate(&record(IRQ_MAP_SIZE as u32, 0, UNASSIGNED)),
            Err(AssignError::IrqOutOfRange { irq: IRQ_MAP_SIZE as u32 })
        );
        assert_eq!(
            alloc.reserve(&record(SOFT_IRQ, 0, 300)),
            Err(AssignError::VectorOutOfRange { vector: 300 })
        );
    }

    #[test]
    fn same_irq_on_two_vectors_is_rejected() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        let first = alloc.allocate(&record(7, 1, UNASSIGNED)).unwrap();

        assert_eq!(
            alloc.allocate(&record(7, 3, UNASSIGNED)),
            Err(AssignError::IrqAlreadyConnected { irq: 7, vector: first })
        );
    }

    #[test]
    fn fixed_mapping_is_irq_plus_offset() {
        assert_eq!(FixedMapping::vector_of(5), 0x25);
        assert_eq!(FixedMapping.vector_for(5), Some(0x25));
        assert_eq!(FixedMapping.vector_for(0xE0), None);
    }

    #[test]
    fn hardware_irq_cannot_claim_an_exception_vector() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());

        assert_eq!(
            alloc.reserve(&record(4, 0, 0)),
            Err(AssignError::ExceptionVectorForIrq { irq: 4, vector: 0 })
        );
        assert_eq!(
            alloc.reserve(&record(4, 0, VECTOR_BASE - 1)),
            Err(AssignError::ExceptionVectorForIrq { irq: 4, vector: VECTOR_BASE - 1 })
        );

        // the rejected claims left nothing behind
        assert_eq!(alloc.reserve(&record(4, 0, VECTOR_BASE)), Ok(VECTOR_BASE as u8));
        assert_eq!(alloc.reserve(&record(SOFT_IRQ, 0, 14)), Ok(14));
        assert_eq!(alloc.into_map().vector_for(4), Some(VECTOR_BASE as u8));
    }

    #[test]
    fn vector_map_round_trips_through_bytes() {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        alloc.allocate(&record(3, 1, UNASSIGNED)).unwrap();
        let map = alloc.into_map();

        let restored = IrqVectorMap::from_bytes(map.as_bytes());
        assert_eq!(restored, map);
        assert_eq!(restored.vector_for(IRQ_MAP_SIZE as u32 + 10), None);
    }
}
