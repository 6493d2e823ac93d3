/// Kernel tunables.
///
/// Every bound the kernel enforces lives here. Values are validated at
/// compile time; a build with an out-of-range constant does not link.

/// Size of the thread slot table.
pub const MAX_THREADS: usize = 32;

/// Default and maximum bytes per thread stack.
pub const STACK_SIZE_DEFAULT: usize = 16 * 1024;
pub const STACK_SIZE_MAX: usize = 64 * 1024;

/// Bytes per IST fault stack. Thread stacks live on the heap without
/// guard pages, so fault handlers always run on these instead.
pub const FAULT_STACK_SIZE: usize = 5 * 4096;

/// Number of ready-queue priority levels. The bitmap of occupied levels is
/// a `u32`, so at most 32 levels are representable.
pub const PRIO_LEVELS: usize = 8;

/// Numerically smallest level id (highest priority).
pub const PRIO_MIN: u8 = 0;
pub const PRIO_MAX: u8 = (PRIO_LEVELS - 1) as u8;

/// Steps of dynamic boost above base priority on wake.
pub const MAX_BOOST: u8 = 2;

/// Ticks per unit timeslice; the grant scales with dynamic priority.
pub const BASE_SLICE: u32 = 2;

/// FAIR-policy weights. `vruntime` accrues as used * BASE_WEIGHT / weight.
pub const BASE_WEIGHT: u32 = 1024;
pub const DEFAULT_WEIGHT: u32 = 1024;

/// Per-mailbox message slots, waiter-list bound, and max payload bytes.
pub const MAILBOX_CAPACITY: usize = 8;
pub const MAILBOX_WAITERS: usize = 4;
pub const MSG_MAX: usize = 256;

/// Capability entries per thread.
pub const CAPS_PER_THREAD: usize = 8;

/// Shared-region bookkeeping.
pub const SHARES_PER_THREAD: usize = 4;
pub const SHARE_TABLE_SIZE: usize = 16;

/// Channel bounds.
pub const CHANNEL_COUNT: usize = 16;
pub const CHANNEL_QUEUE: usize = 16;
pub const CHANNEL_WAITERS: usize = 8;
pub const CHANNEL_SUBSCRIBERS: usize = 8;
pub const CHANNEL_NAME_MAX: usize = 32;

/// Per-thread channel memberships.
pub const THREAD_CHANNEL_SLOTS: usize = 8;

/// Shared-region validation.
pub const PAGE_SIZE: u64 = 4096;
pub const USER_SPACE_LIMIT: u64 = 0x0000_7FFF_FFFF_0000;

/// Synchronization primitive pools.
pub const SYNC_MUTEXES: usize = 16;
pub const SYNC_SEMAPHORES: usize = 16;
pub const SYNC_WAITERS: usize = 8;

/// Kernel log ring capacity (entries).
pub const KLOG_CAPACITY: usize = 64;

/// RAM filesystem bounds.
pub const RAMFS_MAX_FILES: usize = 32;
pub const RAMFS_FILE_MAX: usize = 8 * 1024;

const _: () = assert!(PRIO_LEVELS >= 1 && PRIO_LEVELS <= 32);
const _: () = assert!((PRIO_MIN as usize) < PRIO_LEVELS);
const _: () = assert!(MAX_THREADS >= 2, "need at least idle plus one thread");
const _: () = assert!(STACK_SIZE_DEFAULT <= STACK_SIZE_MAX);
const _: () = assert!(FAULT_STACK_SIZE % 16 == 0 && FAULT_STACK_SIZE >= 4096);
const _: () = assert!(BASE_SLICE >= 1);
const _: () = assert!(BASE_WEIGHT >= 1 && DEFAULT_WEIGHT >= 1);
const _: () = assert!(MAILBOX_CAPACITY >= 1 && MSG_MAX >= 1);
const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(CHANNEL_NAME_MAX >= 8);
