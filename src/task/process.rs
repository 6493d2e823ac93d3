/// Thread slot table.
///
/// A fixed-capacity arena of `Process` slots. Queues link through slot
/// indices (`next_run`, `next_sleep`) rather than pointers; the mailbox,
/// capability and share state for a slot live in the IPC arenas under the
/// same index. The table is only ever touched through the scheduler
/// singleton with interrupts disabled.

extern crate alloc;

use alloc::alloc::Layout;
use alloc::vec::Vec;

use super::context::Context;
use super::{Pid, SchedPolicy, ThreadInfo, ThreadKind, ThreadState};
use crate::config::{
    DEFAULT_WEIGHT, MAX_THREADS, STACK_SIZE_DEFAULT, STACK_SIZE_MAX, THREAD_CHANNEL_SLOTS,
};

pub struct Process {
    pub pid: Pid,
    pub state: ThreadState,
    pub kind: ThreadKind,
    pub ctx: Context,
    pub stack_bottom: *mut u8,
    pub stack_size: usize,
    pub entry: Option<fn()>,
    pub base_priority: u8,
    pub dynamic_priority: u8,
    pub policy: SchedPolicy,
    pub weight: u32,
    pub deadline: u64,
    pub vruntime: u64,
    pub slice_ticks: u32,
    pub slice_remaining: u32,
    pub wake_deadline: u64,
    pub on_run_queue: bool,
    pub next_run: Option<usize>,
    pub next_sleep: Option<usize>,
    /// Channel ids this thread has joined (bounded by THREAD_CHANNEL_SLOTS).
    pub channels: Vec<i32>,
    /// Channel this thread is blocked receiving on, if any.
    pub wait_channel: Option<i32>,
    /// Set while parked on a mailbox waiter list.
    pub ipc_waiting: bool,
    pub exit_code: i32,
}

// The raw stack pointer is only dereferenced by the owning thread and the
// reclaim path; all slot access goes through the scheduler lock.
unsafe impl Send for Process {}

impl Process {
    fn unused() -> Self {
        Process {
            pid: -1,
            state: ThreadState::Unused,
            kind: ThreadKind::Kernel,
            ctx: Context::empty(),
            stack_bottom: core::ptr::null_mut(),
            stack_size: 0,
            entry: None,
            base_priority: 0,
            dynamic_priority: 0,
            policy: SchedPolicy::Fair,
            weight: DEFAULT_WEIGHT,
            deadline: 0,
            vruntime: 0,
            slice_ticks: 0,
            slice_remaining: 0,
            wake_deadline: 0,
            on_run_queue: false,
            next_run: None,
            next_sleep: None,
            channels: Vec::with_capacity(THREAD_CHANNEL_SLOTS),
            wait_channel: None,
            ipc_waiting: false,
            exit_code: 0,
        }
    }

    /// Reset every field back to the free state, keeping the (empty)
    /// channel list's allocation. The caller frees the stack.
    pub fn reset(&mut self) {
        let mut channels = core::mem::take(&mut self.channels);
        channels.clear();
        *self = Process::unused();
        self.channels = channels;
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            pid: self.pid,
            state: self.state,
            kind: self.kind,
            base_priority: self.base_priority,
            dynamic_priority: self.dynamic_priority,
            policy: self.policy,
            weight: self.weight,
            deadline: self.deadline,
            vruntime: self.vruntime,
            slice_ticks: self.slice_ticks,
            slice_remaining: self.slice_remaining,
            stack_pointer: self.ctx.rsp,
            stack_size: self.stack_size,
        }
    }
}

pub struct ProcessTable {
    slots: alloc::boxed::Box<[Process]>,
    next_pid: Pid,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            slots.push(Process::unused());
        }
        ProcessTable {
            slots: slots.into_boxed_slice(),
            next_pid: 1,
        }
    }

    /// Find a free slot and reset it. Creation only ever sees UNUSED
    /// slots; zombies are recycled by the scheduler reclaim path first.
    pub fn alloc_slot(&mut self) -> Option<usize> {
        let idx = self
            .slots
            .iter()
            .position(|p| p.state == ThreadState::Unused)?;
        self.slots[idx].reset();
        Some(idx)
    }

    /// Monotonically increasing pid, wrapping past overflow back to 1.
    pub fn acquire_pid(&mut self) -> Pid {
        if self.next_pid <= 0 {
            self.next_pid = 1;
        }
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1);
        pid
    }

    pub fn lookup(&self, pid: Pid) -> Option<usize> {
        if pid <= 0 {
            return None;
        }
        self.slots
            .iter()
            .position(|p| p.pid == pid && p.state != ThreadState::Unused)
    }

    pub fn slot(&self, idx: usize) -> &Process {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut Process {
        &mut self.slots[idx]
    }

    /// Live user-visible threads (idle excluded).
    pub fn count(&self) -> usize {
        self.slots
            .iter()
            .filter(|p| p.state != ThreadState::Unused && p.pid > 0)
            .count()
    }

    pub fn snapshot(&self) -> Vec<ThreadInfo> {
        self.slots
            .iter()
            .filter(|p| p.state != ThreadState::Unused && p.pid >= 0)
            .map(Process::info)
            .collect()
    }
}

/// Clamp a requested stack size: zero means the default, anything above
/// the maximum is capped.
pub fn effective_stack_size(requested: usize) -> usize {
    if requested == 0 {
        STACK_SIZE_DEFAULT
    } else if requested > STACK_SIZE_MAX {
        STACK_SIZE_MAX
    } else {
        requested
    }
}

fn stack_layout(size: usize) -> Layout {
    Layout::from_size_align(size, 16).expect("bad stack layout")
}

/// Allocate a zeroed, 16-byte-aligned thread stack.
pub fn alloc_stack(size: usize) -> Option<*mut u8> {
    let ptr = unsafe { alloc::alloc::alloc_zeroed(stack_layout(size)) };
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

pub fn dealloc_stack(stack_bottom: *mut u8, size: usize) {
    if !stack_bottom.is_null() {
        unsafe {
            alloc::alloc::dealloc(stack_bottom, stack_layout(size));
        }
    }
}
