// Static Interrupt Connection
//
// `irq_connect!` wires a service routine to an IRQ line at build time and
// programs the controller at run time:
//
//     let vector = irq_connect!(AON_TIMER_IRQ, AON_TIMER_IRQ_PRI, aon_isr, 0,
//                               TriggerFlags::EDGE | TriggerFlags::HIGH);
//
// At build time the macro emits a naked stub that pushes `arg` and `isr` and
// jumps to `_interrupt_enter`, plus an `IsrListEntry` naming that stub in
// `.intList`. gen_idt later resolves the entry's vector and installs the stub
// in the IDT. At run time the macro looks up the resolved vector, records the
// trigger mode and programs the controller, leaving the line masked until
// `irq_enable`.
//
// `int_register!` emits only the descriptor, for hand-written entry points
// such as user-mode trap gates (DPL 3). `exc_connect!` builds a stub feeding
// `_exception_enter` for one CPU exception vector.
//
// `arg` must be a constant; the routine receives it unchanged.
//
// On hosted builds the macros emit no stubs or descriptors; the run-time half
// of `irq_connect!` still runs against whatever controller is installed.

use super::controller::{self, IrqController, TriggerFlags, TriggerRegistry, TRIGGERS};
use super::vectors::{self, VectorLookup};
use crate::{log_debug, log_warn};

const LOG_ORIGIN: &str = "connect";

#[macro_export]
macro_rules! irq_connect {
    ($irq:expr, $priority:expr, $isr:path, $arg:expr, $flags:expr) => {{
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        {
            #[unsafe(naked)]
            unsafe extern "C" fn __irq_stub() {
                core::arch::naked_asm!(
                    "push rax",
                    "movabs rax, {arg}",
                    "xchg rax, [rsp]",
                    "push rax",
                    "lea rax, [rip + {isr}]",
                    "xchg rax, [rsp]",
                    "jmp _interrupt_enter",
                    arg = const $arg,
                    isr = sym $isr,
                );
            }

            #[used]
            #[link_section = ".intList"]
            static __IRQ_ENTRY: $crate::interrupts::descriptor::IsrListEntry =
                $crate::interrupts::descriptor::IsrListEntry {
                    handler: __irq_stub,
                    irq: $irq,
                    priority: $priority,
                    vector: $crate::interrupts::vectors::vector_arg($irq),
                    dpl: $crate::interrupts::descriptor::Dpl::Kernel as u32,
                };
        }

        let _: $crate::interrupts::dispatch::Isr = $isr;
        $crate::interrupts::connect::configure($irq, $priority, $flags)
    }};
}

#[macro_export]
macro_rules! int_register {
    ($routine:path, $irq:expr, $priority:expr, $vector:expr, $dpl:expr) => {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        const _: () = {
            #[used]
            #[link_section = ".intList"]
            static ENTRY: $crate::interrupts::descriptor::IsrListEntry =
                $crate::interrupts::descriptor::IsrListEntry {
                    handler: $routine,
                    irq: $irq,
                    priority: $priority,
                    vector: $vector,
                    dpl: $dpl as u32,
                };
        };
    };
}

#[macro_export]
macro_rules! exc_connect {
    ($vector:literal, $handler:path) => {
        $crate::__private::paste! {
            #[cfg(all(target_arch = "x86_64", target_os = "none"))]
            #[unsafe(naked)]
            unsafe extern "C" fn [<_exception_vector_ $vector _stub>]() {
                core::arch::naked_asm!(
                    ".if {error_code} == 0",
                    "push 0",
                    ".endif",
                    "push {vector}",
                    "push rax",
                    "lea rax, [rip + {handler}]",
                    "xchg rax, [rsp]",
                    "jmp _exception_enter",
                    error_code = const $crate::interrupts::idt::has_error_code($vector) as u8,
                    vector = const $vector,
                    handler = sym $handler,
                );
            }

            const _: $crate::interrupts::dispatch::ExceptionHandler = $handler;

            $crate::int_register!(
                [<_exception_vector_ $vector _stub>],
                $crate::interrupts::descriptor::SOFT_IRQ,
                0,
                $vector,
                $crate::interrupts::descriptor::Dpl::Kernel
            );
        }
    };
}

/// Run-time half of `irq_connect!` against explicit collaborators. Returns
/// the vector the line was routed to. The priority only took part in the
/// offline assignment; at run time the vector comes from `lookup` alone.
pub fn configure_with(
    lookup: &dyn VectorLookup,
    controller: Option<&dyn IrqController>,
    triggers: &TriggerRegistry,
    irq: u32,
    priority: u32,
    flags: TriggerFlags,
) -> u8 {
    let Some(vector) = lookup.vector_for(irq) else {
        panic!("IRQ {} is connected but has no vector in the generated tables", irq);
    };

    triggers.record(irq, flags);

    if let Some(controller) = controller {
        controller.irq_config(irq, vector, flags);
    }

    log_debug!(LOG_ORIGIN, "IRQ{} (priority {}) connected at vector {:#x}", irq, priority, vector);
    vector
}

pub fn configure(irq: u32, priority: u32, flags: TriggerFlags) -> u8 {
    configure_with(
        vectors::active_lookup(),
        controller::active(),
        &TRIGGERS,
        irq,
        priority,
        flags,
    )
}

/// Unmask `irq` at the interrupt controller.
pub fn irq_enable(irq: u32) {
    match controller::active() {
        Some(controller) => controller.enable(irq),
        None => log_warn!(LOG_ORIGIN, "irq_enable({}) before a controller was installed", irq),
    }
}

/// Mask `irq` at the interrupt controller.
pub fn irq_disable(irq: u32) {
    match controller::active() {
        Some(controller) => controller.disable(irq),
        None => log_warn!(LOG_ORIGIN, "irq_disable({}) before a controller was installed", irq),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::controller::tests::{Event, RecordingController};
    use crate::interrupts::descriptor::{DescriptorRecord, UNASSIGNED};
    use crate::interrupts::vectors::{FixedMapping, PriorityGroups, VectorAllocator};

    fn dynamic_map(irq: u32, priority: u32) -> crate::interrupts::vectors::IrqVectorMap {
        let mut alloc = VectorAllocator::new(PriorityGroups::kernel());
        alloc
            .allocate(&DescriptorRecord {
                handler: 0x1000,
                irq,
                priority,
                vector: UNASSIGNED,
                dpl: 0,
            })
            .unwrap();
        alloc.into_map()
    }

    #[test]
    fn dynamic_connection_programs_resolved_vector() {
        let map = dynamic_map(5, 2);
        let controller = RecordingController::default();
        let triggers = TriggerRegistry::new();

        let vector = configure_with(
            &map,
            Some(&controller),
            &triggers,
            5,
            2,
            TriggerFlags::LEVEL | TriggerFlags::LOW,
        );

        assert!((64..80).contains(&vector));
        assert_eq!(
            controller.events(),
            vec![Event::Config {
                irq: 5,
                vector,
                flags: TriggerFlags::LEVEL | TriggerFlags::LOW,
            }]
        );
        assert_eq!(triggers.get(5), Some(TriggerFlags::LEVEL | TriggerFlags::LOW));
    }

    #[test]
    fn fixed_connection_ignores_priority() {
        let controller = RecordingController::default();
        let triggers = TriggerRegistry::new();

        let low = configure_with(&FixedMapping, Some(&controller), &triggers, 4, 0, TriggerFlags::EDGE);
        let high = configure_with(&FixedMapping, Some(&controller), &triggers, 4, 9, TriggerFlags::EDGE);

        assert_eq!(low, 0x24);
        assert_eq!(low, high);
        assert_eq!(
            controller.events(),
            vec![
                Event::Config { irq: 4, vector: 0x24, flags: TriggerFlags::EDGE },
                Event::Config { irq: 4, vector: 0x24, flags: TriggerFlags::EDGE },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "has no vector")]
    fn unresolved_irq_panics() {
        let map = dynamic_map(5, 2);
        let triggers = TriggerRegistry::new();
        configure_with(&map, None, &triggers, 6, 2, TriggerFlags::EDGE);
    }

    #[test]
    #[should_panic(expected = "connected with trigger")]
    fn reconnecting_with_other_trigger_panics() {
        let triggers = TriggerRegistry::new();
        configure_with(&FixedMapping, None, &triggers, 3, 1, TriggerFlags::EDGE);
        configure_with(&FixedMapping, None, &triggers, 3, 1, TriggerFlags::LEVEL);
    }
}
