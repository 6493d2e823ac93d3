/// Mutexes and counting semaphores over the scheduler's block/wake
/// protocol.
///
/// All primitive state sits in two fixed pools behind one spinlock.
/// Waiters queue FIFO. A mutex unlock with waiters hands ownership to
/// the head under the lock, so no third thread can slip in between the
/// unlock and the waiter's resumption; a semaphore post wakes the head
/// without touching the count. The wake itself is always issued after
/// the pool lock is released.

pub mod spinlock;

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use spin::Once;

use crate::config::{SYNC_MUTEXES, SYNC_SEMAPHORES, SYNC_WAITERS};
use crate::error::{KResult, KernelError};
use crate::klog_info;
use crate::task::scheduler;
use crate::task::Pid;
use self::spinlock::SpinLock;

struct MutexSlot {
    used: bool,
    locked: bool,
    owner: Pid,
    waiters: VecDeque<Pid>,
}

struct SemSlot {
    used: bool,
    count: u32,
    waiters: VecDeque<Pid>,
}

struct SyncPools {
    mutexes: Box<[MutexSlot]>,
    semaphores: Box<[SemSlot]>,
}

static SYNC: Once<SpinLock<SyncPools>> = Once::new();

/// Build the pools. Call after scheduler and IPC init.
pub fn init() {
    SYNC.call_once(|| {
        let mut mutexes = Vec::with_capacity(SYNC_MUTEXES);
        for _ in 0..SYNC_MUTEXES {
            mutexes.push(MutexSlot {
                used: false,
                locked: false,
                owner: -1,
                waiters: VecDeque::with_capacity(SYNC_WAITERS),
            });
        }
        let mut semaphores = Vec::with_capacity(SYNC_SEMAPHORES);
        for _ in 0..SYNC_SEMAPHORES {
            semaphores.push(SemSlot {
                used: false,
                count: 0,
                waiters: VecDeque::with_capacity(SYNC_WAITERS),
            });
        }
        SpinLock::new(SyncPools {
            mutexes: mutexes.into_boxed_slice(),
            semaphores: semaphores.into_boxed_slice(),
        })
    });
    klog_info!("sync", "{} mutexes, {} semaphores", SYNC_MUTEXES, SYNC_SEMAPHORES);
}

fn pools() -> KResult<&'static SpinLock<SyncPools>> {
    SYNC.get().ok_or(KernelError::Invalid)
}

fn current_pid() -> KResult<Pid> {
    scheduler::current_pid().ok_or(KernelError::Invalid)
}

// --- mutexes ----------------------------------------------------------

pub fn mutex_create() -> KResult<usize> {
    let mut pools = pools()?.lock();
    let id = pools
        .mutexes
        .iter()
        .position(|m| !m.used)
        .ok_or(KernelError::Exhausted)?;
    let mutex = &mut pools.mutexes[id];
    mutex.used = true;
    mutex.locked = false;
    mutex.owner = -1;
    mutex.waiters.clear();
    Ok(id)
}

/// Acquire, blocking FIFO behind the current owner. Re-locking a mutex
/// the caller already owns is a no-op.
pub fn mutex_lock(id: usize) -> KResult<()> {
    let pool = pools()?;
    let me = current_pid()?;

    loop {
        // Interrupts stay off from waiter registration through the
        // context switch; see mailbox::recv for the race this closes.
        let saved = spinlock::save_disable();
        let decision = {
            let mut pools = pool.lock();
            match pools.mutexes.get_mut(id) {
                None => Err(KernelError::NotFound),
                Some(mutex) if !mutex.used => Err(KernelError::NotFound),
                Some(mutex) => {
                    if !mutex.locked || mutex.owner == me {
                        mutex.locked = true;
                        mutex.owner = me;
                        Ok(true)
                    } else if mutex.waiters.contains(&me) {
                        Ok(false)
                    } else if mutex.waiters.len() >= SYNC_WAITERS {
                        Err(KernelError::Full)
                    } else {
                        mutex.waiters.push_back(me);
                        Ok(false)
                    }
                }
            }
        };

        match decision {
            Ok(true) => {
                spinlock::restore(saved);
                return Ok(());
            }
            Ok(false) => {
                scheduler::block_current();
                spinlock::restore(saved);
            }
            Err(err) => {
                spinlock::restore(saved);
                return Err(err);
            }
        }
    }
}

/// Release. Only the owner may unlock; with waiters queued, ownership
/// passes to the head atomically and the head is woken.
pub fn mutex_unlock(id: usize) -> KResult<()> {
    let pool = pools()?;
    let me = current_pid()?;

    let wake_pid = {
        let mut pools = pool.lock();
        let mutex = pools.mutexes.get_mut(id).ok_or(KernelError::NotFound)?;
        if !mutex.used {
            return Err(KernelError::NotFound);
        }
        if !mutex.locked || mutex.owner != me {
            return Err(KernelError::Denied);
        }
        match mutex.waiters.pop_front() {
            Some(next) => {
                mutex.owner = next;
                mutex.locked = true;
                Some(next)
            }
            None => {
                mutex.locked = false;
                mutex.owner = -1;
                None
            }
        }
    };

    if let Some(pid) = wake_pid {
        scheduler::wake(pid);
    }
    Ok(())
}

/// (locked, owner) for inspection; owner is -1 when unlocked.
pub fn mutex_info(id: usize) -> KResult<(bool, Pid)> {
    let mut pools = pools()?.lock();
    let mutex = pools.mutexes.get_mut(id).ok_or(KernelError::NotFound)?;
    if !mutex.used {
        return Err(KernelError::NotFound);
    }
    Ok((mutex.locked, mutex.owner))
}

// --- semaphores -------------------------------------------------------

pub fn semaphore_create(initial: u32) -> KResult<usize> {
    let mut pools = pools()?.lock();
    let id = pools
        .semaphores
        .iter()
        .position(|s| !s.used)
        .ok_or(KernelError::Exhausted)?;
    let sem = &mut pools.semaphores[id];
    sem.used = true;
    sem.count = initial;
    sem.waiters.clear();
    Ok(id)
}

/// Take one unit, parking FIFO when the count is zero. A parked waiter
/// is only ever woken by `semaphore_post`, which removes it from the
/// queue and hands it the unit directly — so waking IS acquisition, and
/// no recheck loop is needed (a recheck would find the count still zero
/// and strand the waiter).
pub fn semaphore_wait(id: usize) -> KResult<()> {
    let pool = pools()?;
    let me = current_pid()?;

    let saved = spinlock::save_disable();
    let decision = {
        let mut pools = pool.lock();
        match pools.semaphores.get_mut(id) {
            None => Err(KernelError::NotFound),
            Some(sem) if !sem.used => Err(KernelError::NotFound),
            Some(sem) => {
                if sem.count > 0 {
                    sem.count -= 1;
                    Ok(true)
                } else if sem.waiters.len() >= SYNC_WAITERS {
                    Err(KernelError::Full)
                } else {
                    sem.waiters.push_back(me);
                    Ok(false)
                }
            }
        }
    };

    match decision {
        Ok(true) => {
            spinlock::restore(saved);
            Ok(())
        }
        Ok(false) => {
            scheduler::block_current();
            spinlock::restore(saved);
            Ok(())
        }
        Err(err) => {
            spinlock::restore(saved);
            Err(err)
        }
    }
}

/// Release one unit: hand it straight to the first waiter, or bump the
/// count when nobody is parked.
pub fn semaphore_post(id: usize) -> KResult<()> {
    let pool = pools()?;

    let wake_pid = {
        let mut pools = pool.lock();
        let sem = pools.semaphores.get_mut(id).ok_or(KernelError::NotFound)?;
        if !sem.used {
            return Err(KernelError::NotFound);
        }
        match sem.waiters.pop_front() {
            Some(next) => Some(next),
            None => {
                sem.count += 1;
                None
            }
        }
    };

    if let Some(pid) = wake_pid {
        scheduler::wake(pid);
    }
    Ok(())
}

pub fn semaphore_count(id: usize) -> KResult<u32> {
    let mut pools = pools()?.lock();
    let sem = pools.semaphores.get_mut(id).ok_or(KernelError::NotFound)?;
    if !sem.used {
        return Err(KernelError::NotFound);
    }
    Ok(sem.count)
}
