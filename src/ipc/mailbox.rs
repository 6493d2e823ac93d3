/// Per-thread bounded mailboxes.
///
/// One mailbox per process slot, each behind its own spinlock. `send`
/// never blocks: a full mailbox is an error. `recv` blocks USER-kind
/// callers on the mailbox waiter list; the sender pops one waiter under
/// the same lock that enqueued the message and wakes it after the lock
/// is released, so nothing can interleave on the mailbox in between.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use spin::Once;

use super::caps::{self, RIGHT_RECV, RIGHT_SEND};
use crate::config::{MAILBOX_CAPACITY, MAILBOX_WAITERS, MAX_THREADS, MSG_MAX};
use crate::error::{KResult, KernelError};
use crate::klog_warn;
use crate::sync::spinlock::{self, SpinLock};
use crate::task::scheduler;
use crate::task::{Pid, ThreadKind};

/// Source wildcard for `recv`.
pub const ANY_PROCESS: Pid = -1;

struct MailSlot {
    sender: Pid,
    data: Vec<u8>,
}

struct Mailbox {
    queue: VecDeque<MailSlot>,
    waiters: VecDeque<Pid>,
}

impl Mailbox {
    fn new() -> Self {
        Mailbox {
            queue: VecDeque::with_capacity(MAILBOX_CAPACITY),
            waiters: VecDeque::with_capacity(MAILBOX_WAITERS),
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.waiters.clear();
    }

    fn position(&self, source: Pid) -> Option<usize> {
        self.queue
            .iter()
            .position(|slot| source == ANY_PROCESS || slot.sender == source)
    }
}

static MAILBOXES: Once<Box<[SpinLock<Mailbox>]>> = Once::new();

pub(crate) fn init() {
    MAILBOXES.call_once(|| {
        let mut boxes = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            boxes.push(SpinLock::new(Mailbox::new()));
        }
        boxes.into_boxed_slice()
    });
}

pub(crate) fn clear_slot(idx: usize) {
    if let Some(boxes) = MAILBOXES.get() {
        boxes[idx].lock().clear();
    }
}

/// Deliver `data` to `target`'s mailbox. Returns the payload size.
pub fn send(target: Pid, data: &[u8]) -> KResult<usize> {
    let boxes = MAILBOXES.get().ok_or(KernelError::Invalid)?;
    if target <= 0 {
        return Err(KernelError::NotFound);
    }
    if data.len() > MSG_MAX {
        return Err(KernelError::Invalid);
    }

    let target_slot = scheduler::lookup_slot(target).ok_or(KernelError::NotFound)?;

    // A send from outside any thread (boot, ISR) is kernel-origin: no
    // capability applies and the recorded sender id is 0.
    let sender = scheduler::current_thread();
    if let Some(me) = &sender {
        if !caps::check(me, target, RIGHT_SEND) {
            return Err(KernelError::Denied);
        }
    }
    let sender_pid = sender.map(|me| me.pid).unwrap_or(0);

    let wake_pid = {
        let mut mailbox = boxes[target_slot].lock();
        if mailbox.queue.len() >= MAILBOX_CAPACITY {
            return Err(KernelError::Full);
        }
        mailbox.queue.push_back(MailSlot {
            sender: sender_pid,
            data: data.to_vec(),
        });
        mailbox.waiters.pop_front()
    };

    if let Some(pid) = wake_pid {
        scheduler::wake(pid);
    }
    Ok(data.len())
}

enum Park {
    /// A matching message arrived between the dequeue attempt and the
    /// park decision; go around again.
    Retry,
    Parked,
    Overflow,
}

/// Receive the oldest message from `source` (or from anyone, with
/// `ANY_PROCESS`) into `buffer`. Returns the original payload size; the
/// copy is truncated to the buffer. Messages from senders the caller
/// holds no RECV right for are discarded and the search continues.
/// USER-kind callers block on an empty mailbox; KERNEL-kind callers get
/// `WouldBlock`.
pub fn recv(source: Pid, buffer: &mut [u8]) -> KResult<usize> {
    let boxes = MAILBOXES.get().ok_or(KernelError::Invalid)?;
    let me = scheduler::current_thread().ok_or(KernelError::Invalid)?;

    loop {
        let message = {
            let mut mailbox = boxes[me.slot].lock();
            let found = mailbox.position(source);
            found.and_then(|i| mailbox.queue.remove(i))
        };

        if let Some(message) = message {
            if !caps::check(&me, message.sender, RIGHT_RECV) {
                klog_warn!("ipc", "dropping message without recv capability");
                continue;
            }
            let n = message.data.len().min(buffer.len());
            buffer[..n].copy_from_slice(&message.data[..n]);
            return Ok(message.data.len());
        }

        if me.kind == ThreadKind::Kernel {
            return Err(KernelError::WouldBlock);
        }

        // Park. Interrupts stay off from the waiter registration through
        // the context switch so a send cannot slip in and wake a thread
        // that is not yet WAITING.
        let saved = spinlock::save_disable();
        let decision = {
            let mut mailbox = boxes[me.slot].lock();
            if mailbox.position(source).is_some() {
                Park::Retry
            } else if mailbox.waiters.contains(&me.pid) {
                Park::Parked
            } else if mailbox.waiters.len() >= MAILBOX_WAITERS {
                Park::Overflow
            } else {
                mailbox.waiters.push_back(me.pid);
                Park::Parked
            }
        };

        match decision {
            Park::Retry => spinlock::restore(saved),
            Park::Overflow => {
                spinlock::restore(saved);
                return Err(KernelError::Full);
            }
            Park::Parked => {
                scheduler::set_ipc_waiting(me.pid, true);
                scheduler::block_current();
                scheduler::set_ipc_waiting(me.pid, false);
                spinlock::restore(saved);
            }
        }
    }
}
