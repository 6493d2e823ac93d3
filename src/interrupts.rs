/// IDT, PIC remapping, PIT timer and the hardware interrupt handlers.
///
/// IDT entries 0-31 are CPU exceptions; the 8259 PICs are remapped so
/// IRQs 0-15 land on vectors 32-47. The PIT drives the scheduler: every
/// tick bumps the global counter, and once the scheduler is active the
/// handler may context-switch away and return here much later on the
/// next dispatch of the interrupted thread.

use core::sync::atomic::{AtomicU64, Ordering};

use pic8259::ChainedPics;
use spin::{Mutex, Once};
use x86_64::instructions::port::Port;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::gdt;
use crate::hlt_loop;
use crate::sync::spinlock::SpinLock;

static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

/// Monotonic tick counter, incremented by the timer ISR.
pub fn ticks() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

// 8254 PIT
const PIT_OSCILLATOR_HZ: u32 = 1_193_182;
pub const TICK_HZ: u32 = 100;
const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;
const PS2_DATA_PORT: u16 = 0x60;

/// Program the PIT for TICK_HZ (10 ms per tick).
pub fn init_pit() {
    let divisor = (PIT_OSCILLATOR_HZ / TICK_HZ) as u16;
    unsafe {
        Port::new(PIT_COMMAND_PORT).write(0x36u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor & 0xFF) as u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor >> 8) as u8);
    }
}

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
}

// --- scancode queue ---------------------------------------------------

/// Raw bytes from the keyboard controller, drained by `keyboard::poll`.
pub static SCANCODE_QUEUE: SpinLock<ScancodeQueue> = SpinLock::new(ScancodeQueue::new());

pub struct ScancodeQueue {
    buf: [u8; 128],
    read: usize,
    write: usize,
    count: usize,
}

impl ScancodeQueue {
    const fn new() -> Self {
        ScancodeQueue {
            buf: [0; 128],
            read: 0,
            write: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, scancode: u8) {
        if self.count < self.buf.len() {
            self.buf[self.write] = scancode;
            self.write = (self.write + 1) % self.buf.len();
            self.count += 1;
        }
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let value = self.buf[self.read];
        self.read = (self.read + 1) % self.buf.len();
        self.count -= 1;
        Some(value)
    }
}

// --- IDT --------------------------------------------------------------

static IDT: Once<InterruptDescriptorTable> = Once::new();

pub fn init_idt() {
    let idt = IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        // Fault handlers run on their reserved IST stacks; a thread's
        // heap stack cannot be trusted once it has faulted.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
            idt.page_fault
                .set_handler_fn(page_fault_handler)
                .set_stack_index(gdt::PAGE_FAULT_IST_INDEX);
        }
        idt[InterruptIndex::Timer as u8].set_handler_fn(timer_interrupt_handler);
        idt[InterruptIndex::Keyboard as u8].set_handler_fn(keyboard_interrupt_handler);
        idt
    });
    idt.load();
}

// --- CPU exceptions ---------------------------------------------------

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    crate::println!("EXCEPTION: PAGE FAULT");
    crate::println!("Accessed Address: {:?}", Cr2::read());
    crate::println!("Error Code: {:?}", error_code);
    crate::println!("{:#?}", stack_frame);
    hlt_loop();
}

// --- hardware interrupts ----------------------------------------------

/// Timer tick. EOI is sent before the scheduler entry point because the
/// tick may preempt: the context switch happens inside this handler's
/// frame, on the interrupted thread's stack, and only unwinds when that
/// thread is dispatched again.
extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);

    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Timer as u8);
    }

    crate::task::scheduler::timer_tick();
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    let mut port = Port::new(PS2_DATA_PORT);
    let scancode: u8 = unsafe { port.read() };

    SCANCODE_QUEUE.lock().push(scancode);

    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Keyboard as u8);
    }
}
