/// Named message channels with publish/subscribe.
///
/// A channel is a bounded ring of messages plus two bounded lists:
/// subscribers (who may send and receive) and waiters (subscribers
/// blocked on an empty ring). Channels flagged KERNEL are open to every
/// thread, and a sender id of 0 marks an in-kernel origin that bypasses
/// the subscription check. Channels are created by name and never
/// destroyed. Each channel has its own spinlock.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use spin::Once;

use crate::config::{
    CHANNEL_COUNT, CHANNEL_NAME_MAX, CHANNEL_QUEUE, CHANNEL_SUBSCRIBERS, CHANNEL_WAITERS, MSG_MAX,
};
use crate::error::{KResult, KernelError};
use crate::sync::spinlock::{self, SpinLock};
use crate::task::scheduler;
use crate::task::Pid;

/// Channel flag: system channel, open to all threads.
pub const CHANNEL_KERNEL: u32 = 0x1;
/// Receive flag: return instead of blocking on an empty ring.
pub const RECV_NONBLOCK: u32 = 0x1;
/// Output header bit: payload was larger than the receive buffer.
pub const MSG_TRUNCATED: u32 = 0x1;

/// Header of a received message. `size` is the original payload size,
/// which may exceed what was copied into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMessage {
    pub header: u32,
    pub mtype: u32,
    pub sender: Pid,
    pub size: usize,
}

struct ChanMsg {
    header: u32,
    mtype: u32,
    sender: Pid,
    data: Vec<u8>,
}

struct Channel {
    used: bool,
    id: i32,
    flags: u32,
    name: String,
    queue: VecDeque<ChanMsg>,
    waiters: VecDeque<Pid>,
    subscribers: Vec<Pid>,
}

impl Channel {
    fn vacant() -> Self {
        Channel {
            used: false,
            id: 0,
            flags: 0,
            name: String::new(),
            queue: VecDeque::with_capacity(CHANNEL_QUEUE),
            waiters: VecDeque::with_capacity(CHANNEL_WAITERS),
            subscribers: Vec::with_capacity(CHANNEL_SUBSCRIBERS),
        }
    }
}

static CHANNELS: Once<Box<[SpinLock<Channel>]>> = Once::new();
static NEXT_ID: AtomicI32 = AtomicI32::new(1);

pub(crate) fn init() {
    CHANNELS.call_once(|| {
        let mut table = Vec::with_capacity(CHANNEL_COUNT);
        for _ in 0..CHANNEL_COUNT {
            table.push(SpinLock::new(Channel::vacant()));
        }
        table.into_boxed_slice()
    });
}

fn arena() -> KResult<&'static [SpinLock<Channel>]> {
    CHANNELS.get().map(|t| &t[..]).ok_or(KernelError::Invalid)
}

/// Arena index of a live channel id. Ids are never reused, so the result
/// stays valid without holding any lock.
fn find(channel_id: i32) -> KResult<usize> {
    if channel_id <= 0 {
        return Err(KernelError::NotFound);
    }
    for (idx, channel) in arena()?.iter().enumerate() {
        let guard = channel.lock();
        if guard.used && guard.id == channel_id {
            return Ok(idx);
        }
    }
    Err(KernelError::NotFound)
}

/// Create a channel. Overlong names are truncated.
pub fn create(name: &str, flags: u32) -> KResult<i32> {
    let table = arena()?;
    let name: String = name.chars().take(CHANNEL_NAME_MAX).collect();

    for slot in table.iter() {
        let mut channel = slot.lock();
        if channel.used {
            continue;
        }
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        channel.used = true;
        channel.id = id;
        channel.flags = flags;
        channel.name = name;
        channel.queue.clear();
        channel.waiters.clear();
        channel.subscribers.clear();
        return Ok(id);
    }
    Err(KernelError::Exhausted)
}

/// Record membership in both directions: the thread's channel list and
/// the channel's subscriber list.
pub fn join(pid: Pid, channel_id: i32) -> KResult<()> {
    let table = arena()?;
    let idx = find(channel_id)?;

    scheduler::add_channel_membership(pid, channel_id)?;

    let mut channel = table[idx].lock();
    if channel.subscribers.contains(&pid) {
        return Ok(());
    }
    if channel.subscribers.len() >= CHANNEL_SUBSCRIBERS {
        drop(channel);
        scheduler::remove_channel_membership(pid, channel_id);
        return Err(KernelError::Full);
    }
    channel.subscribers.push(pid);
    Ok(())
}

/// Reverse of `join`; also drops the thread from the waiter list.
pub fn leave(pid: Pid, channel_id: i32) -> KResult<()> {
    let table = arena()?;
    let idx = find(channel_id)?;

    scheduler::remove_channel_membership(pid, channel_id);

    let was_waiting = {
        let mut channel = table[idx].lock();
        channel.subscribers.retain(|&p| p != pid);
        let before = channel.waiters.len();
        channel.waiters.retain(|&p| p != pid);
        channel.waiters.len() != before
    };
    if was_waiting {
        scheduler::set_wait_channel(pid, None);
    }
    Ok(())
}

/// Enqueue a message. `sender` 0 is an in-kernel origin and bypasses the
/// subscription check; otherwise the sender must be subscribed unless the
/// channel is KERNEL-flagged. Wakes one parked receiver, after the
/// channel lock is released.
pub fn send(
    channel_id: i32,
    sender: Pid,
    header: u32,
    mtype: u32,
    data: &[u8],
    _flags: u32,
) -> KResult<usize> {
    if data.len() > MSG_MAX {
        return Err(KernelError::Invalid);
    }
    let table = arena()?;
    let idx = find(channel_id)?;

    let kernel_channel = table[idx].lock().flags & CHANNEL_KERNEL != 0;
    if sender > 0 {
        scheduler::lookup_slot(sender).ok_or(KernelError::NotFound)?;
        if !kernel_channel && !scheduler::has_channel_membership(sender, channel_id) {
            return Err(KernelError::Denied);
        }
    }

    let wake_pid = {
        let mut channel = table[idx].lock();
        if channel.queue.len() >= CHANNEL_QUEUE {
            return Err(KernelError::Full);
        }
        channel.queue.push_back(ChanMsg {
            header,
            mtype,
            sender,
            data: data.to_vec(),
        });
        channel.waiters.pop_front()
    };

    if let Some(pid) = wake_pid {
        scheduler::set_wait_channel(pid, None);
        scheduler::wake(pid);
    }
    Ok(data.len())
}

enum Park {
    Got(ChanMsg),
    WouldBlock,
    NotSelf,
    Overflow,
    Parked,
}

/// Dequeue the head message for `pid` into `buffer`. Requires
/// subscription unless the channel is KERNEL-flagged. On an empty ring:
/// `RECV_NONBLOCK` returns `WouldBlock`; otherwise the caller parks on
/// the bounded waiter list and retries when woken. Only a thread may
/// block on its own behalf.
pub fn receive(
    pid: Pid,
    channel_id: i32,
    buffer: &mut [u8],
    flags: u32,
) -> KResult<ChannelMessage> {
    let table = arena()?;
    let idx = find(channel_id)?;

    scheduler::lookup_slot(pid).ok_or(KernelError::NotFound)?;
    let kernel_channel = table[idx].lock().flags & CHANNEL_KERNEL != 0;
    if !kernel_channel && !scheduler::has_channel_membership(pid, channel_id) {
        return Err(KernelError::Denied);
    }

    let blocking_self = scheduler::current_pid() == Some(pid);

    loop {
        // Interrupts stay off from the waiter registration through the
        // context switch; see mailbox::recv.
        let saved = spinlock::save_disable();
        let decision = {
            let mut channel = table[idx].lock();
            match channel.queue.pop_front() {
                Some(msg) => Park::Got(msg),
                None if flags & RECV_NONBLOCK != 0 => Park::WouldBlock,
                None if !blocking_self => Park::NotSelf,
                None if channel.waiters.contains(&pid) => Park::Parked,
                None if channel.waiters.len() >= CHANNEL_WAITERS => Park::Overflow,
                None => {
                    channel.waiters.push_back(pid);
                    Park::Parked
                }
            }
        };

        match decision {
            Park::Got(msg) => {
                spinlock::restore(saved);
                if blocking_self {
                    scheduler::set_wait_channel(pid, None);
                }
                let n = msg.data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&msg.data[..n]);
                let mut header = msg.header;
                if msg.data.len() > buffer.len() {
                    header |= MSG_TRUNCATED;
                }
                return Ok(ChannelMessage {
                    header,
                    mtype: msg.mtype,
                    sender: msg.sender,
                    size: msg.data.len(),
                });
            }
            Park::WouldBlock => {
                spinlock::restore(saved);
                return Err(KernelError::WouldBlock);
            }
            Park::NotSelf => {
                spinlock::restore(saved);
                return Err(KernelError::Invalid);
            }
            Park::Overflow => {
                spinlock::restore(saved);
                return Err(KernelError::Full);
            }
            Park::Parked => {
                scheduler::set_wait_channel(pid, Some(channel_id));
                scheduler::block_current();
                spinlock::restore(saved);
            }
        }
    }
}

/// 1 if the channel holds a message, 0 if empty, error on a bad id.
pub fn peek(channel_id: i32) -> KResult<bool> {
    let table = arena()?;
    let idx = find(channel_id)?;
    let has_message = !table[idx].lock().queue.is_empty();
    Ok(has_message)
}

/// Public view of one channel, for the shell's `channels` listing.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: i32,
    pub name: String,
    pub flags: u32,
    pub queued: usize,
    pub subscribers: usize,
}

pub fn snapshot() -> Vec<ChannelInfo> {
    let table = match CHANNELS.get() {
        Some(table) => table,
        None => return Vec::new(),
    };
    let mut out = Vec::new();
    for slot in table.iter() {
        let channel = slot.lock();
        if !channel.used {
            continue;
        }
        out.push(ChannelInfo {
            id: channel.id,
            name: channel.name.clone(),
            flags: channel.flags,
            queued: channel.queue.len(),
            subscribers: channel.subscribers.len(),
        });
    }
    out
}

/// Remove a dying thread from a channel's subscriber and waiter lists.
pub(crate) fn scrub_thread(pid: Pid, channel_id: i32) {
    let table = match CHANNELS.get() {
        Some(table) => table,
        None => return,
    };
    let idx = match find(channel_id) {
        Ok(idx) => idx,
        Err(_) => return,
    };
    let mut channel = table[idx].lock();
    channel.subscribers.retain(|&p| p != pid);
    channel.waiters.retain(|&p| p != pid);
}
