/// Preemptive multi-policy scheduler.
///
/// One scheduler context (the boot stack) owns dispatch: every thread that
/// stops running — yield, sleep, block, exit, timeslice expiry — switches
/// back into the scheduler loop, which accounts runtime, reclaims zombies
/// and picks the next thread. Selection order is DEADLINE (earliest
/// absolute deadline), then FAIR (smallest weighted vruntime), then the
/// head of the highest-priority ready FIFO.
///
/// Run queues and the sleep list are guarded by the scheduler lock, taken
/// only with interrupts disabled; on this uniprocessor the interrupt flag
/// is the real lock and the mutex documents the invariant. Raw context
/// pointers taken under the lock stay valid across the switch because the
/// slot table never moves after init.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::context::{context_switch, prime_stack, Context};
use super::process::{self, ProcessTable};
use super::{Pid, SchedPolicy, ThreadInfo, ThreadKind, ThreadState, IDLE_PID};
use crate::config::{
    BASE_SLICE, BASE_WEIGHT, DEFAULT_WEIGHT, MAX_BOOST, PRIO_LEVELS, PRIO_MAX, PRIO_MIN,
    THREAD_CHANNEL_SLOTS,
};
use crate::error::{KResult, KernelError};
use crate::interrupts::ticks;
use crate::ipc;
use crate::sync::spinlock;
use crate::{klog_debug, klog_error};

const SCHED_EVENT_CREATE: u8 = 1;
const SCHED_EVENT_EXIT: u8 = 2;
const SCHED_EVENT_RECLAIM: u8 = 3;

struct RunQueue {
    head: Option<usize>,
    tail: Option<usize>,
}

impl RunQueue {
    const fn empty() -> Self {
        RunQueue {
            head: None,
            tail: None,
        }
    }
}

pub struct Scheduler {
    table: ProcessTable,
    ready: [RunQueue; PRIO_LEVELS],
    ready_bitmap: u32,
    sleep_head: Option<usize>,
    current: Option<usize>,
    idle: Option<usize>,
    sched_ctx: Context,
}

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);
static SCHEDULER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Identity of the thread calling into the kernel right now.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CurrentThread {
    pub slot: usize,
    pub pid: Pid,
    pub kind: ThreadKind,
}

/// Run `f` against the scheduler singleton with interrupts disabled.
/// Returns `None` before `init`.
fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    let saved = spinlock::save_disable();
    let result = SCHEDULER.lock().as_mut().map(f);
    spinlock::restore(saved);
    result
}

// --- pure helpers -----------------------------------------------------

fn clamp_priority(value: i32) -> u8 {
    if value < PRIO_MIN as i32 {
        PRIO_MIN
    } else if value > PRIO_MAX as i32 {
        PRIO_MAX
    } else {
        value as u8
    }
}

/// Timeslice granted per run: higher-priority threads get longer slices.
fn timeslice_for(dynamic_priority: u8) -> u32 {
    let offset = dynamic_priority.saturating_sub(PRIO_MIN).min(4);
    let slice = BASE_SLICE << offset;
    slice.max(1)
}

/// Wake boost target: up to MAX_BOOST steps above base, clamped.
fn boosted_priority(base: u8) -> u8 {
    let boost = MAX_BOOST.min(base.saturating_sub(PRIO_MIN));
    base - boost
}

/// vruntime accrued for `used` ticks at the given FAIR weight. Integer
/// division, clamped to 1 whenever any time was used.
fn vruntime_delta(used: u32, weight: u32) -> u64 {
    let weight = if weight == 0 { DEFAULT_WEIGHT } else { weight };
    ((used as u64 * BASE_WEIGHT as u64) / weight as u64).max(1)
}

fn default_user_priority() -> u8 {
    clamp_priority(PRIO_MIN as i32 + 1)
}

fn state_code(state: ThreadState) -> u8 {
    match state {
        ThreadState::Unused => 0,
        ThreadState::Ready => 1,
        ThreadState::Running => 2,
        ThreadState::Waiting => 3,
        ThreadState::Zombie => 4,
    }
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            table: ProcessTable::new(),
            ready: [const { RunQueue::empty() }; PRIO_LEVELS],
            ready_bitmap: 0,
            sleep_head: None,
            current: None,
            idle: None,
            sched_ctx: Context::empty(),
        }
    }

    // --- ready queues -------------------------------------------------

    fn enqueue_ready(&mut self, idx: usize) {
        if Some(idx) == self.idle || self.table.slot(idx).on_run_queue {
            return;
        }

        let priority = clamp_priority(self.table.slot(idx).dynamic_priority as i32) as usize;
        let slot = self.table.slot_mut(idx);
        slot.next_run = None;
        slot.on_run_queue = true;

        match self.ready[priority].tail {
            Some(tail) => {
                self.table.slot_mut(tail).next_run = Some(idx);
                self.ready[priority].tail = Some(idx);
            }
            None => {
                self.ready[priority].head = Some(idx);
                self.ready[priority].tail = Some(idx);
            }
        }
        self.ready_bitmap |= 1 << priority;
    }

    fn remove_from_ready(&mut self, idx: usize) {
        for priority in 0..PRIO_LEVELS {
            let mut prev: Option<usize> = None;
            let mut cursor = self.ready[priority].head;
            while let Some(i) = cursor {
                let next = self.table.slot(i).next_run;
                if i == idx {
                    match prev {
                        Some(p) => self.table.slot_mut(p).next_run = next,
                        None => self.ready[priority].head = next,
                    }
                    if self.ready[priority].tail == Some(i) {
                        self.ready[priority].tail = prev;
                    }
                    if self.ready[priority].head.is_none() {
                        self.ready_bitmap &= !(1 << priority);
                    }
                    let slot = self.table.slot_mut(i);
                    slot.next_run = None;
                    slot.on_run_queue = false;
                    return;
                }
                prev = Some(i);
                cursor = next;
            }
        }
    }

    /// Head of the highest-priority non-empty FIFO, found via the bitmap.
    fn dequeue_next(&mut self) -> Option<usize> {
        for priority in 0..PRIO_LEVELS {
            if self.ready_bitmap & (1 << priority) == 0 {
                continue;
            }
            let head = match self.ready[priority].head {
                Some(head) => head,
                None => {
                    // Stale bit; repair and keep scanning.
                    self.ready_bitmap &= !(1 << priority);
                    self.ready[priority].tail = None;
                    continue;
                }
            };
            let next = self.table.slot(head).next_run;
            self.ready[priority].head = next;
            if next.is_none() {
                self.ready[priority].tail = None;
                self.ready_bitmap &= !(1 << priority);
            }
            let slot = self.table.slot_mut(head);
            slot.next_run = None;
            slot.on_run_queue = false;
            return Some(head);
        }
        None
    }

    fn pick_deadline(&mut self) -> Option<usize> {
        let mut best: Option<(usize, u64, Pid)> = None;
        for priority in 0..PRIO_LEVELS {
            let mut cursor = self.ready[priority].head;
            while let Some(i) = cursor {
                let slot = self.table.slot(i);
                cursor = slot.next_run;
                if slot.policy != SchedPolicy::Deadline || slot.deadline == 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, deadline, pid)) => {
                        slot.deadline < deadline || (slot.deadline == deadline && slot.pid < pid)
                    }
                };
                if better {
                    best = Some((i, slot.deadline, slot.pid));
                }
            }
        }
        let (idx, _, _) = best?;
        self.remove_from_ready(idx);
        Some(idx)
    }

    fn pick_fair(&mut self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for priority in 0..PRIO_LEVELS {
            let mut cursor = self.ready[priority].head;
            while let Some(i) = cursor {
                let slot = self.table.slot(i);
                cursor = slot.next_run;
                if slot.policy != SchedPolicy::Fair {
                    continue;
                }
                if best.map_or(true, |(_, vruntime)| slot.vruntime < vruntime) {
                    best = Some((i, slot.vruntime));
                }
            }
        }
        let (idx, _) = best?;
        self.remove_from_ready(idx);
        Some(idx)
    }

    fn select_next(&mut self) -> Option<usize> {
        self.pick_deadline()
            .or_else(|| self.pick_fair())
            .or_else(|| self.dequeue_next())
    }

    // --- sleep list ---------------------------------------------------

    fn insert_sleep(&mut self, idx: usize) {
        self.remove_from_sleep(idx);
        let deadline = self.table.slot(idx).wake_deadline;

        match self.sleep_head {
            Some(head) if self.table.slot(head).wake_deadline <= deadline => {
                let mut at = head;
                while let Some(next) = self.table.slot(at).next_sleep {
                    if self.table.slot(next).wake_deadline > deadline {
                        break;
                    }
                    at = next;
                }
                let after = self.table.slot(at).next_sleep;
                self.table.slot_mut(idx).next_sleep = after;
                self.table.slot_mut(at).next_sleep = Some(idx);
            }
            other => {
                self.table.slot_mut(idx).next_sleep = other;
                self.sleep_head = Some(idx);
            }
        }
    }

    fn remove_from_sleep(&mut self, idx: usize) {
        let mut prev: Option<usize> = None;
        let mut cursor = self.sleep_head;
        while let Some(i) = cursor {
            let next = self.table.slot(i).next_sleep;
            if i == idx {
                match prev {
                    Some(p) => self.table.slot_mut(p).next_sleep = next,
                    None => self.sleep_head = next,
                }
                self.table.slot_mut(i).next_sleep = None;
                return;
            }
            prev = Some(i);
            cursor = next;
        }
    }

    fn wake_sleepers(&mut self, now: u64) {
        while let Some(head) = self.sleep_head {
            if self.table.slot(head).wake_deadline > now {
                break;
            }
            self.sleep_head = self.table.slot(head).next_sleep;
            let slot = self.table.slot_mut(head);
            slot.next_sleep = None;
            slot.wake_deadline = 0;
            slot.dynamic_priority = boosted_priority(slot.base_priority);
            slot.state = ThreadState::Ready;
            self.enqueue_ready(head);
        }
    }

    // --- accounting and dispatch helpers ------------------------------

    fn arm_timeslice(&mut self, idx: usize) {
        let slot = self.table.slot_mut(idx);
        slot.slice_ticks = timeslice_for(slot.dynamic_priority);
        slot.slice_remaining = slot.slice_ticks;
    }

    fn account_runtime(&mut self, idx: usize) {
        if Some(idx) == self.idle {
            return;
        }
        let slot = self.table.slot_mut(idx);
        if slot.policy != SchedPolicy::Fair {
            return;
        }
        let used = slot.slice_ticks.saturating_sub(slot.slice_remaining);
        if used == 0 {
            return;
        }
        slot.vruntime += vruntime_delta(used, slot.weight);
    }

    /// Move the running thread back to READY and hand raw context
    /// pointers to the caller, which performs the switch after dropping
    /// the scheduler lock.
    fn prepare_preempt(&mut self, demote: bool) -> Option<(*mut Context, *const Context)> {
        let cur = self.current?;

        if Some(cur) != self.idle {
            if demote && self.table.slot(cur).dynamic_priority < PRIO_MAX {
                self.table.slot_mut(cur).dynamic_priority += 1;
            }
            self.table.slot_mut(cur).state = ThreadState::Ready;
            self.enqueue_ready(cur);
        } else {
            // Idle is never queued; the loop falls back to it on its own.
            self.table.slot_mut(cur).state = ThreadState::Ready;
        }

        Some(self.switch_out_ptrs(cur))
    }

    fn switch_out_ptrs(&mut self, idx: usize) -> (*mut Context, *const Context) {
        let old = &mut self.table.slot_mut(idx).ctx as *mut Context;
        let new = &self.sched_ctx as *const Context;
        (old, new)
    }
}

// --- lifecycle --------------------------------------------------------

/// Build the slot table and the idle thread. Call after the heap is up,
/// before IPC and sync init.
pub fn init() {
    {
        let saved = spinlock::save_disable();
        *SCHEDULER.lock() = Some(Scheduler::new());
        spinlock::restore(saved);
    }
    if create_thread(idle_thread, 0, ThreadKind::Kernel, PRIO_MAX, true).is_err() {
        panic!("scheduler: failed to create idle thread");
    }
}

pub fn is_active() -> bool {
    SCHEDULER_ACTIVE.load(Ordering::Acquire)
}

fn idle_thread() {
    loop {
        x86_64::instructions::interrupts::enable_and_hlt();
    }
}

extern "C" fn thread_trampoline() -> ! {
    let entry = with_sched(|s| s.current.and_then(|cur| s.table.slot(cur).entry)).flatten();
    match entry {
        Some(entry) => entry(),
        None => klog_error!("sched", "thread started without an entry function"),
    }
    exit(0)
}

fn create_thread(
    entry: fn(),
    stack_size: usize,
    kind: ThreadKind,
    base_priority: u8,
    is_idle: bool,
) -> KResult<Pid> {
    let stack_size = process::effective_stack_size(stack_size);
    let stack = process::alloc_stack(stack_size).ok_or(KernelError::Exhausted)?;
    let ctx = unsafe { prime_stack(stack, stack_size, thread_trampoline) };

    let result = with_sched(|s| -> KResult<Pid> {
        let idx = s.table.alloc_slot().ok_or(KernelError::Exhausted)?;
        let pid = if is_idle { IDLE_PID } else { s.table.acquire_pid() };

        let slot = s.table.slot_mut(idx);
        slot.pid = pid;
        slot.kind = kind;
        slot.base_priority = clamp_priority(base_priority as i32);
        slot.dynamic_priority = slot.base_priority;
        slot.policy = SchedPolicy::Fair;
        slot.weight = DEFAULT_WEIGHT;
        slot.entry = Some(entry);
        slot.stack_bottom = stack;
        slot.stack_size = stack_size;
        slot.ctx = ctx;
        slot.state = ThreadState::Ready;

        s.arm_timeslice(idx);
        if is_idle {
            s.idle = Some(idx);
        } else {
            s.enqueue_ready(idx);
        }
        Ok(pid)
    })
    .ok_or(KernelError::Invalid)
    .and_then(|r| r);

    match result {
        Ok(pid) => {
            if !is_idle {
                klog_debug!("sched", "created pid {}", pid);
                emit_event(SCHED_EVENT_CREATE, pid, 0, ThreadState::Ready);
            }
            Ok(pid)
        }
        Err(err) => {
            process::dealloc_stack(stack, stack_size);
            Err(err)
        }
    }
}

/// Create a user-kind thread at the default user priority.
pub fn create_user(entry: fn(), stack_size: usize) -> KResult<Pid> {
    create_thread(entry, stack_size, ThreadKind::User, default_user_priority(), false)
}

/// Create a kernel-kind thread at the highest priority.
pub fn create_kernel(entry: fn(), stack_size: usize) -> KResult<Pid> {
    create_thread(entry, stack_size, ThreadKind::Kernel, PRIO_MIN, false)
}

/// The scheduler loop. Runs on the boot stack, with interrupts disabled
/// whenever it holds control; dispatched threads carry their own
/// interrupt state.
pub fn enter() -> ! {
    x86_64::instructions::interrupts::disable();
    SCHEDULER_ACTIVE.store(true, Ordering::Release);
    klog_debug!("sched", "dispatch loop entered");

    loop {
        let (old, new) = {
            let mut guard = SCHEDULER.lock();
            let s = guard.as_mut().expect("scheduler not initialized");
            s.wake_sleepers(ticks());

            let next = match s.select_next() {
                Some(next) => next,
                None => s.idle.expect("idle thread missing"),
            };
            s.current = Some(next);
            s.table.slot_mut(next).state = ThreadState::Running;
            s.arm_timeslice(next);

            let new = &s.table.slot(next).ctx as *const Context;
            let old = &mut s.sched_ctx as *mut Context;
            (old, new)
        };

        unsafe { context_switch(old, new) };

        // The thread gave the CPU back: account for it, reclaim zombies,
        // requeue a preempted-but-ready thread.
        let reclaimed = {
            let mut guard = SCHEDULER.lock();
            let s = guard.as_mut().expect("scheduler not initialized");
            let mut reclaimed = None;

            if let Some(idx) = s.current.take() {
                s.account_runtime(idx);
                match s.table.slot(idx).state {
                    ThreadState::Zombie => {
                        if s.table.slot(idx).on_run_queue {
                            panic!("sched: zombie thread still on a run queue");
                        }
                        s.remove_from_sleep(idx);
                        let pid = s.table.slot(idx).pid;
                        let code = s.table.slot(idx).exit_code;
                        let stack = s.table.slot(idx).stack_bottom;
                        let stack_size = s.table.slot(idx).stack_size;
                        s.table.slot_mut(idx).reset();
                        process::dealloc_stack(stack, stack_size);
                        reclaimed = Some((idx, pid, code));
                    }
                    ThreadState::Ready => {
                        if Some(idx) != s.idle && !s.table.slot(idx).on_run_queue {
                            s.enqueue_ready(idx);
                        }
                    }
                    _ => {}
                }
            }
            reclaimed
        };

        if let Some((idx, pid, code)) = reclaimed {
            ipc::attach_slot(idx);
            klog_debug!("sched", "reclaimed pid {}", pid);
            emit_event(SCHED_EVENT_RECLAIM, pid, code, ThreadState::Unused);
        }
    }
}

/// Timer-tick entry point, called from the timer ISR with interrupts
/// disabled. Wakes due sleepers and preempts on timeslice expiry.
pub fn timer_tick() {
    if !is_active() {
        return;
    }

    let switch = {
        let mut guard = SCHEDULER.lock();
        let s = match guard.as_mut() {
            Some(s) => s,
            None => return,
        };
        s.wake_sleepers(ticks());

        match s.current {
            None => None,
            Some(cur) if Some(cur) == s.idle => {
                if s.ready_bitmap != 0 {
                    s.prepare_preempt(false)
                } else {
                    None
                }
            }
            Some(cur) => {
                let slot = s.table.slot_mut(cur);
                if slot.slice_remaining > 0 {
                    slot.slice_remaining -= 1;
                }
                if slot.slice_remaining == 0 {
                    s.prepare_preempt(true)
                } else {
                    None
                }
            }
        }
    };

    if let Some((old, new)) = switch {
        unsafe { context_switch(old, new) };
    }
}

/// Voluntarily give up the CPU. Resets dynamic priority to base.
pub fn yield_now() {
    let saved = spinlock::save_disable();
    let switch = with_sched(|s| match s.current {
        Some(cur) if Some(cur) != s.idle => {
            let slot = s.table.slot_mut(cur);
            slot.dynamic_priority = slot.base_priority;
            slot.state = ThreadState::Ready;
            slot.slice_remaining = 0;
            s.enqueue_ready(cur);
            Some(s.switch_out_ptrs(cur))
        }
        _ => None,
    })
    .flatten();

    if let Some((old, new)) = switch {
        unsafe { context_switch(old, new) };
    }
    spinlock::restore(saved);
}

/// Mark the caller WAITING and switch to the scheduler. The caller must
/// already have arranged for a matching `wake`; interrupts must be
/// disabled from that arrangement through this call.
pub fn block_current() {
    let saved = spinlock::save_disable();
    let switch = with_sched(|s| match s.current {
        Some(cur) if Some(cur) != s.idle => {
            let slot = s.table.slot_mut(cur);
            slot.state = ThreadState::Waiting;
            slot.slice_remaining = 0;
            Some(s.switch_out_ptrs(cur))
        }
        _ => None,
    })
    .flatten();

    if let Some((old, new)) = switch {
        unsafe { context_switch(old, new) };
    }
    spinlock::restore(saved);
}

/// Sleep for at least `ticks` timer ticks (minimum one).
pub fn sleep(ticks_to_sleep: u32) {
    let deadline = ticks() + ticks_to_sleep.max(1) as u64;
    let saved = spinlock::save_disable();
    let switch = with_sched(|s| match s.current {
        Some(cur) if Some(cur) != s.idle => {
            let slot = s.table.slot_mut(cur);
            slot.wake_deadline = deadline;
            slot.state = ThreadState::Waiting;
            slot.slice_remaining = 0;
            s.insert_sleep(cur);
            Some(s.switch_out_ptrs(cur))
        }
        _ => None,
    })
    .flatten();

    if let Some((old, new)) = switch {
        unsafe { context_switch(old, new) };
    }
    spinlock::restore(saved);
}

/// Unblock a WAITING thread: pull it off the sleep list if present, boost
/// its dynamic priority and enqueue it READY. Anything else is a no-op.
pub fn wake(pid: Pid) {
    with_sched(|s| {
        let idx = match s.table.lookup(pid) {
            Some(idx) => idx,
            None => return,
        };
        if s.table.slot(idx).state != ThreadState::Waiting {
            return;
        }
        s.remove_from_sleep(idx);
        let slot = s.table.slot_mut(idx);
        slot.wake_deadline = 0;
        slot.dynamic_priority = boosted_priority(slot.base_priority);
        slot.state = ThreadState::Ready;
        s.enqueue_ready(idx);
    });
}

/// Terminate the calling thread. Releases its IPC state, records the exit
/// code and switches away for good; the scheduler loop reclaims the slot.
pub fn exit(code: i32) -> ! {
    let me = current_thread().expect("exit() outside of a thread");
    ipc::process_cleanup(me.slot, me.pid);

    klog_debug!("sched", "exit pid {} code {}", me.pid, code);
    emit_event(SCHED_EVENT_EXIT, me.pid, code, ThreadState::Zombie);

    let _ = spinlock::save_disable();
    let switch = with_sched(|s| {
        s.remove_from_sleep(me.slot);
        let slot = s.table.slot_mut(me.slot);
        slot.on_run_queue = false;
        slot.next_run = None;
        slot.exit_code = code;
        slot.state = ThreadState::Zombie;
        s.switch_out_ptrs(me.slot)
    })
    .expect("scheduler not initialized");

    unsafe { context_switch(switch.0, switch.1) };
    panic!("sched: zombie thread resumed");
}

/// Change a thread's scheduling policy. `pid <= 0` targets the caller.
/// For FAIR, weight 0 selects the default. For DEADLINE, a non-zero
/// deadline below the current tick is taken as relative to now.
pub fn set_scheduler(pid: Pid, policy: SchedPolicy, weight: u32, deadline_ticks: u64) -> KResult<()> {
    let now = ticks();
    with_sched(|s| {
        let idx = if pid <= 0 {
            s.current.ok_or(KernelError::NotFound)?
        } else {
            s.table.lookup(pid).ok_or(KernelError::NotFound)?
        };
        let slot = s.table.slot_mut(idx);
        let weight = if weight == 0 { DEFAULT_WEIGHT } else { weight };

        match policy {
            SchedPolicy::Fair => {
                slot.policy = SchedPolicy::Fair;
                slot.weight = weight;
                slot.deadline = 0;
            }
            SchedPolicy::Deadline => {
                let deadline = if deadline_ticks != 0 && deadline_ticks < now {
                    now + deadline_ticks
                } else {
                    deadline_ticks
                };
                slot.policy = SchedPolicy::Deadline;
                slot.weight = weight;
                slot.deadline = deadline;
            }
        }
        Ok(())
    })
    .unwrap_or(Err(KernelError::Invalid))
}

// --- queries ----------------------------------------------------------

pub fn current_pid() -> Option<Pid> {
    with_sched(|s| s.current.map(|cur| s.table.slot(cur).pid)).flatten()
}

pub fn thread_count() -> usize {
    with_sched(|s| s.table.count()).unwrap_or(0)
}

pub fn snapshot() -> Vec<ThreadInfo> {
    with_sched(|s| s.table.snapshot()).unwrap_or_default()
}

pub fn state_of(pid: Pid) -> Option<ThreadState> {
    with_sched(|s| s.table.lookup(pid).map(|idx| s.table.slot(idx).state)).flatten()
}

pub(crate) fn current_thread() -> Option<CurrentThread> {
    with_sched(|s| {
        s.current.map(|cur| {
            let slot = s.table.slot(cur);
            CurrentThread {
                slot: cur,
                pid: slot.pid,
                kind: slot.kind,
            }
        })
    })
    .flatten()
}

pub(crate) fn lookup_slot(pid: Pid) -> Option<usize> {
    with_sched(|s| s.table.lookup(pid)).flatten()
}

pub(crate) fn set_ipc_waiting(pid: Pid, waiting: bool) {
    with_sched(|s| {
        if let Some(idx) = s.table.lookup(pid) {
            s.table.slot_mut(idx).ipc_waiting = waiting;
        }
    });
}

pub(crate) fn set_wait_channel(pid: Pid, channel: Option<i32>) {
    with_sched(|s| {
        if let Some(idx) = s.table.lookup(pid) {
            s.table.slot_mut(idx).wait_channel = channel;
        }
    });
}

pub(crate) fn has_channel_membership(pid: Pid, channel: i32) -> bool {
    with_sched(|s| {
        s.table
            .lookup(pid)
            .map(|idx| s.table.slot(idx).channels.contains(&channel))
            .unwrap_or(false)
    })
    .unwrap_or(false)
}

pub(crate) fn add_channel_membership(pid: Pid, channel: i32) -> KResult<()> {
    with_sched(|s| {
        let idx = s.table.lookup(pid).ok_or(KernelError::NotFound)?;
        let slot = s.table.slot_mut(idx);
        if slot.channels.contains(&channel) {
            return Ok(());
        }
        if slot.channels.len() >= THREAD_CHANNEL_SLOTS {
            return Err(KernelError::Full);
        }
        slot.channels.push(channel);
        Ok(())
    })
    .unwrap_or(Err(KernelError::Invalid))
}

pub(crate) fn remove_channel_membership(pid: Pid, channel: i32) {
    with_sched(|s| {
        if let Some(idx) = s.table.lookup(pid) {
            s.table.slot_mut(idx).channels.retain(|&c| c != channel);
        }
    });
}

/// Detach and return all channel memberships of a slot, clearing the
/// slot's channel-wait state. Used by the exit cleanup path.
pub(crate) fn take_channel_state(slot: usize) -> Vec<i32> {
    with_sched(|s| {
        let p = s.table.slot_mut(slot);
        p.wait_channel = None;
        p.ipc_waiting = false;
        core::mem::take(&mut p.channels)
    })
    .unwrap_or_default()
}

fn emit_event(action: u8, pid: Pid, value: i32, state: ThreadState) {
    if pid <= 0 || !ipc::is_initialized() {
        return;
    }
    let channel = match ipc::service_channel(ipc::ServiceChannel::Scheduler) {
        Some(channel) => channel,
        None => return,
    };

    let mut payload = [0u8; 12];
    payload[0] = action;
    payload[1] = state_code(state);
    payload[4..8].copy_from_slice(&pid.to_le_bytes());
    payload[8..12].copy_from_slice(&value.to_le_bytes());

    let _ = ipc::channel_send(channel, 0, action as u32, 0, &payload, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn timeslice_scales_with_priority() {
        assert_eq!(timeslice_for(PRIO_MIN), BASE_SLICE);
        assert_eq!(timeslice_for(PRIO_MIN + 1), BASE_SLICE << 1);
        // The shift saturates at four steps.
        assert_eq!(timeslice_for(PRIO_MAX), BASE_SLICE << (PRIO_MAX - PRIO_MIN).min(4));
    }

    #[test_case]
    fn priority_clamps_to_configured_range() {
        assert_eq!(clamp_priority(-5), PRIO_MIN);
        assert_eq!(clamp_priority(PRIO_MAX as i32 + 10), PRIO_MAX);
        assert_eq!(clamp_priority(PRIO_MIN as i32 + 1), PRIO_MIN + 1);
    }

    #[test_case]
    fn boost_never_passes_highest_priority() {
        assert_eq!(boosted_priority(PRIO_MIN), PRIO_MIN);
        assert!(boosted_priority(PRIO_MAX) >= PRIO_MIN);
        assert_eq!(boosted_priority(PRIO_MIN + 1), PRIO_MIN + 1 - MAX_BOOST.min(1));
    }

    #[test_case]
    fn vruntime_rounds_up_to_one() {
        // A heavy weight must still accrue at least one unit per run.
        assert_eq!(vruntime_delta(1, u32::MAX), 1);
        assert_eq!(vruntime_delta(4, BASE_WEIGHT), 4);
        // Double weight halves accrual.
        assert_eq!(vruntime_delta(4, BASE_WEIGHT * 2), 2);
    }
}
