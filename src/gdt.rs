/// CPU descriptor tables: GDT, TSS and the fault stacks.
///
/// Thread stacks are plain heap allocations with no guard pages, so a
/// faulting thread's stack can be arbitrarily corrupt by the time a
/// handler runs. Every fault handler this kernel registers with an IST
/// index therefore gets a dedicated, statically reserved stack, wired
/// through the TSS. Slot assignments and the handler registrations in
/// `interrupts::init_idt` must agree.

use spin::Lazy;
use x86_64::instructions::segmentation::{Segment, CS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::config::FAULT_STACK_SIZE;

/// IST slot for the double-fault handler (a blown kernel stack must not
/// escalate to a triple fault).
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
/// IST slot for the page-fault handler, so it can report a fault even
/// when the faulting thread's stack pointer is garbage.
pub const PAGE_FAULT_IST_INDEX: u16 = 1;

const IST_ENTRIES: usize = 2;

#[repr(align(16))]
struct IstStack(#[allow(dead_code)] [u8; FAULT_STACK_SIZE]);

// Written by the CPU on fault entry; never touched from Rust.
static mut IST_STACKS: [IstStack; IST_ENTRIES] =
    [const { IstStack([0; FAULT_STACK_SIZE]) }; IST_ENTRIES];

fn ist_stack_top(entry: usize) -> VirtAddr {
    let base = (&raw const IST_STACKS) as *const IstStack;
    let bottom = unsafe { base.add(entry) } as u64;
    VirtAddr::new(bottom + FAULT_STACK_SIZE as u64)
}

static TSS: Lazy<TaskStateSegment> = Lazy::new(|| {
    let mut tss = TaskStateSegment::new();
    for entry in 0..IST_ENTRIES {
        tss.interrupt_stack_table[entry] = ist_stack_top(entry);
    }
    tss
});

struct Selectors {
    code: SegmentSelector,
    tss: SegmentSelector,
}

static GDT: Lazy<(GlobalDescriptorTable, Selectors)> = Lazy::new(|| {
    let mut gdt = GlobalDescriptorTable::new();
    let code = gdt.append(Descriptor::kernel_code_segment());
    let tss = gdt.append(Descriptor::tss_segment(&TSS));
    (gdt, Selectors { code, tss })
});

/// Load the tables and reload the segment registers. First step of the
/// boot sequence; everything after it may fault safely.
pub fn init() {
    let (gdt, selectors) = &*GDT;
    gdt.load();
    unsafe {
        CS::set_reg(selectors.code);
        load_tss(selectors.tss);
    }
}
