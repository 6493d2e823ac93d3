/// Execution context and the stack-switching primitive.
///
/// A context is nothing but a saved stack pointer: `context_switch` pushes
/// the callee-saved registers and RFLAGS onto the current stack, stores
/// RSP into `*old`, loads RSP from `*new` and pops the same frame back.
/// From the switched-out thread's perspective the call simply returns
/// later, with stack and registers exactly as left.
///
/// A brand-new thread gets a hand-built `SwitchFrame` at the top of its
/// stack whose return address is the thread trampoline, so the first
/// dispatch "returns" into the entry function.

use crate::config::STACK_SIZE_MAX;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
}

impl Context {
    pub const fn empty() -> Self {
        Context { rsp: 0 }
    }
}

/// Stack image popped by `context_switch`, lowest address first.
/// Field order matches the pop sequence in the assembly below.
#[repr(C)]
struct SwitchFrame {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    rflags: u64,
    rip: u64,
}

// IF set, reserved bit 1 set: a fresh thread starts with interrupts enabled.
const INITIAL_RFLAGS: u64 = 0x202;

core::arch::global_asm!(
    ".global context_switch",
    "context_switch:",
    "pushfq",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, [rsi]",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "popfq",
    "ret",
);

extern "C" {
    /// Save the current context into `*old` and resume `*new`.
    ///
    /// # Safety
    /// `new` must point at a context primed by `prime_stack` or saved by a
    /// previous `context_switch`, and its stack must still be alive. Must
    /// be called with interrupts disabled; the switched-in context carries
    /// its own interrupt state in its saved RFLAGS.
    pub fn context_switch(old: *mut Context, new: *const Context);
}

/// Write the initial switch frame onto a fresh stack and return the
/// context that will enter `trampoline` on first dispatch.
///
/// # Safety
/// `stack_bottom` must point at a writable allocation of `stack_size`
/// bytes, 16-byte aligned.
pub unsafe fn prime_stack(
    stack_bottom: *mut u8,
    stack_size: usize,
    trampoline: extern "C" fn() -> !,
) -> Context {
    debug_assert!(stack_size <= STACK_SIZE_MAX);

    // Round the top down to 16 bytes, then leave one slot so RSP is at
    // 8 mod 16 on trampoline entry, as the SysV ABI expects after a call.
    let top = (stack_bottom as u64 + stack_size as u64) & !0xF;
    let frame_addr = top - 8 - core::mem::size_of::<SwitchFrame>() as u64;

    let frame = frame_addr as *mut SwitchFrame;
    unsafe {
        frame.write(SwitchFrame {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbx: 0,
            rbp: 0,
            rflags: INITIAL_RFLAGS,
            rip: trampoline as usize as u64,
        });
    }

    Context { rsp: frame_addr }
}
