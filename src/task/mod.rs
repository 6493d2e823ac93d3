pub mod context;
pub mod process;
pub mod scheduler;

/// Thread identity. Positive for user-visible threads, 0 for idle; a free
/// slot holds -1.
pub type Pid = i32;

pub const IDLE_PID: Pid = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Unused,
    Ready,
    Running,
    Waiting,
    Zombie,
}

impl core::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ThreadState::Unused => "UNUSED",
            ThreadState::Ready => "READY",
            ThreadState::Running => "RUNNING",
            ThreadState::Waiting => "WAITING",
            ThreadState::Zombie => "ZOMBIE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    User,
    Kernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    Fair,
    Deadline,
}

impl core::fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SchedPolicy::Fair => write!(f, "fair"),
            SchedPolicy::Deadline => write!(f, "deadline"),
        }
    }
}

/// One row of the scheduler snapshot, as reported by `ps`.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    pub pid: Pid,
    pub state: ThreadState,
    pub kind: ThreadKind,
    pub base_priority: u8,
    pub dynamic_priority: u8,
    pub policy: SchedPolicy,
    pub weight: u32,
    pub deadline: u64,
    pub vruntime: u64,
    pub slice_ticks: u32,
    pub slice_remaining: u32,
    pub stack_pointer: u64,
    pub stack_size: usize,
}
