/// Capability table: per-thread (peer → rights) entries.
///
/// A right is held by one thread against another. Kernel-kind threads,
/// self, and kernel-origin peers (pid ≤ 0) always pass. One global lock
/// guards every thread's entry list.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Once;

use crate::config::{CAPS_PER_THREAD, MAX_THREADS};
use crate::error::{KResult, KernelError};
use crate::sync::spinlock::SpinLock;
use crate::task::scheduler::{self, CurrentThread};
use crate::task::{Pid, ThreadKind};

pub const RIGHT_SEND: u32 = 0x1;
pub const RIGHT_RECV: u32 = 0x2;
pub const RIGHT_SHARE: u32 = 0x4;

#[derive(Debug, Clone, Copy)]
struct CapEntry {
    peer: Pid,
    rights: u32,
}

static CAPS: Once<SpinLock<Box<[Vec<CapEntry>]>>> = Once::new();

pub(crate) fn init() {
    CAPS.call_once(|| {
        let mut table = Vec::with_capacity(MAX_THREADS);
        for _ in 0..MAX_THREADS {
            table.push(Vec::with_capacity(CAPS_PER_THREAD));
        }
        SpinLock::new(table.into_boxed_slice())
    });
}

pub(crate) fn clear_slot(idx: usize) {
    if let Some(caps) = CAPS.get() {
        caps.lock()[idx].clear();
    }
}

/// Does `me` hold all of `rights` toward `peer`?
pub(crate) fn check(me: &CurrentThread, peer: Pid, rights: u32) -> bool {
    if rights == 0 || me.kind == ThreadKind::Kernel || peer <= 0 || me.pid == peer {
        return true;
    }
    let caps = match CAPS.get() {
        Some(caps) => caps,
        None => return false,
    };
    let granted = caps.lock()[me.slot]
        .iter()
        .find(|entry| entry.peer == peer)
        .map(|entry| entry.rights)
        .unwrap_or(0);
    granted & rights == rights
}

/// Grant is additive: rights accumulate into the existing entry.
pub fn grant(owner: Pid, peer: Pid, rights: u32) -> KResult<()> {
    if owner <= 0 || peer <= 0 || rights == 0 {
        return Err(KernelError::Invalid);
    }
    let caps = CAPS.get().ok_or(KernelError::Invalid)?;
    let slot = scheduler::lookup_slot(owner).ok_or(KernelError::NotFound)?;

    let mut table = caps.lock();
    let entries = &mut table[slot];
    match entries.iter_mut().find(|entry| entry.peer == peer) {
        Some(entry) => entry.rights |= rights,
        None => {
            if entries.len() >= CAPS_PER_THREAD {
                return Err(KernelError::Full);
            }
            entries.push(CapEntry { peer, rights });
        }
    }
    Ok(())
}

/// Revoke clears bits; an entry whose rights reach zero is dropped.
pub fn revoke(owner: Pid, peer: Pid, rights: u32) -> KResult<()> {
    if owner <= 0 || peer <= 0 || rights == 0 {
        return Err(KernelError::Invalid);
    }
    let caps = CAPS.get().ok_or(KernelError::Invalid)?;
    let slot = scheduler::lookup_slot(owner).ok_or(KernelError::NotFound)?;

    let mut table = caps.lock();
    let entries = &mut table[slot];
    if let Some(entry) = entries.iter_mut().find(|entry| entry.peer == peer) {
        entry.rights &= !rights;
    }
    entries.retain(|entry| entry.rights != 0);
    Ok(())
}

pub fn query(owner: Pid, peer: Pid) -> KResult<u32> {
    if owner <= 0 || peer <= 0 {
        return Err(KernelError::Invalid);
    }
    let caps = CAPS.get().ok_or(KernelError::Invalid)?;
    let slot = scheduler::lookup_slot(owner).ok_or(KernelError::NotFound)?;

    let rights = caps.lock()[slot]
        .iter()
        .find(|entry| entry.peer == peer)
        .map(|entry| entry.rights)
        .unwrap_or(0);
    Ok(rights)
}
