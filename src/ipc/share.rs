/// Shared-memory region registry.
///
/// The kernel does not remap pages; it keeps the authoritative record of
/// who shared what with whom. The table is the arena; each process slot
/// holds a short list of record indices, never pointers. Records resolve
/// both endpoints to slot indices at creation time so teardown never has
/// to consult the scheduler while holding the share lock.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Once;

use super::caps::{self, RIGHT_SHARE};
use crate::config::{MAX_THREADS, PAGE_SIZE, SHARES_PER_THREAD, SHARE_TABLE_SIZE, USER_SPACE_LIMIT};
use crate::error::{KResult, KernelError};
use crate::sync::spinlock::SpinLock;
use crate::task::scheduler;
use crate::task::Pid;

#[derive(Debug, Clone, Copy)]
struct ShareRecord {
    owner: Pid,
    owner_slot: usize,
    target: Pid,
    target_slot: usize,
    addr: u64,
    pages: u64,
    flags: u32,
}

/// Public view of one registry entry.
#[derive(Debug, Clone, Copy)]
pub struct ShareInfo {
    pub id: usize,
    pub owner: Pid,
    pub target: Pid,
    pub addr: u64,
    pub pages: u64,
    pub flags: u32,
}

struct ShareState {
    table: Box<[Option<ShareRecord>]>,
    attached: Box<[Vec<usize>]>,
}

static SHARES: Once<SpinLock<ShareState>> = Once::new();

pub(crate) fn init() {
    SHARES.call_once(|| {
        let table = alloc::vec![None; SHARE_TABLE_SIZE].into_boxed_slice();
        let mut attached = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            attached.push(Vec::with_capacity(SHARES_PER_THREAD));
        }
        SpinLock::new(ShareState {
            table,
            attached: attached.into_boxed_slice(),
        })
    });
}

pub(crate) fn clear_slot(idx: usize) {
    if let Some(shares) = SHARES.get() {
        shares.lock().attached[idx].clear();
    }
}

/// Register a page-aligned region of the caller's address space as shared
/// with `target`. Requires the SHARE right. Returns the record id.
pub fn share(target: Pid, addr: u64, pages: u64) -> KResult<usize> {
    let shares = SHARES.get().ok_or(KernelError::Invalid)?;

    if addr == 0 || pages == 0 || addr & (PAGE_SIZE - 1) != 0 {
        return Err(KernelError::Invalid);
    }
    let span = pages.checked_mul(PAGE_SIZE).ok_or(KernelError::Invalid)?;
    let limit = addr.checked_add(span).ok_or(KernelError::Invalid)?;
    if limit > USER_SPACE_LIMIT {
        return Err(KernelError::Invalid);
    }
    if target <= 0 {
        return Err(KernelError::NotFound);
    }

    let me = scheduler::current_thread().ok_or(KernelError::Invalid)?;
    if !caps::check(&me, target, RIGHT_SHARE) {
        return Err(KernelError::Denied);
    }
    let target_slot = scheduler::lookup_slot(target).ok_or(KernelError::NotFound)?;

    let mut state = shares.lock();
    let id = state
        .table
        .iter()
        .position(Option::is_none)
        .ok_or(KernelError::Exhausted)?;

    // Check both attachment lists up front so a failure never leaves a
    // half-attached record behind.
    let needed_on_owner = if me.slot == target_slot { 2 } else { 1 };
    if state.attached[me.slot].len() + needed_on_owner > SHARES_PER_THREAD {
        return Err(KernelError::Full);
    }
    if me.slot != target_slot && state.attached[target_slot].len() >= SHARES_PER_THREAD {
        return Err(KernelError::Full);
    }

    state.table[id] = Some(ShareRecord {
        owner: me.pid,
        owner_slot: me.slot,
        target,
        target_slot,
        addr,
        pages,
        flags: 0,
    });
    state.attached[me.slot].push(id);
    state.attached[target_slot].push(id);
    Ok(id)
}

/// Drop every record that names `pid` on either side. Called on exit.
pub(crate) fn drop_for_pid(pid: Pid) {
    if pid <= 0 {
        return;
    }
    let shares = match SHARES.get() {
        Some(shares) => shares,
        None => return,
    };

    let mut state = shares.lock();
    for id in 0..state.table.len() {
        let record = match state.table[id] {
            Some(record) if record.owner == pid || record.target == pid => record,
            _ => continue,
        };
        state.attached[record.owner_slot].retain(|&r| r != id);
        state.attached[record.target_slot].retain(|&r| r != id);
        state.table[id] = None;
    }
}

pub fn snapshot() -> Vec<ShareInfo> {
    let shares = match SHARES.get() {
        Some(shares) => shares,
        None => return Vec::new(),
    };
    let state = shares.lock();
    state
        .table
        .iter()
        .enumerate()
        .filter_map(|(id, record)| {
            record.map(|r| ShareInfo {
                id,
                owner: r.owner,
                target: r.target,
                addr: r.addr,
                pages: r.pages,
                flags: r.flags,
            })
        })
        .collect()
}
