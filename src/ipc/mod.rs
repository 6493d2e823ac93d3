/// Inter-process communication: mailboxes, capabilities, shared-region
/// registry and named channels.
///
/// Init order matters: the scheduler must already own its slot table
/// (slot indices key the IPC arenas), and sync init follows. The four
/// well-known service channels are published here.

pub mod caps;
pub mod channel;
pub mod mailbox;
pub mod share;

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Once;

use crate::klog_info;
use crate::task::scheduler;
use crate::task::Pid;

pub use caps::{grant as cap_grant, query as cap_query, revoke as cap_revoke};
pub use caps::{RIGHT_RECV, RIGHT_SEND, RIGHT_SHARE};
pub use channel::{
    create as channel_create, join as channel_join, leave as channel_leave, peek as channel_peek,
    receive as channel_receive, send as channel_send, ChannelMessage, CHANNEL_KERNEL,
    MSG_TRUNCATED, RECV_NONBLOCK,
};
pub use mailbox::{recv, send, ANY_PROCESS};
pub use share::{share, ShareInfo};

/// Well-known system channels, created during init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceChannel {
    DeviceManager = 0,
    ModuleLoader = 1,
    Logger = 2,
    Scheduler = 3,
}

const SERVICE_NAMES: [&str; 4] = ["svc.devmgr", "svc.module", "svc.logger", "svc.scheduler"];

static SERVICE_CHANNELS: Once<[i32; 4]> = Once::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Build the IPC arenas and publish the service channels.
pub fn init() {
    caps::init();
    mailbox::init();
    share::init();
    channel::init();

    SERVICE_CHANNELS.call_once(|| {
        let mut ids = [-1; 4];
        for (i, name) in SERVICE_NAMES.iter().enumerate() {
            match channel::create(name, CHANNEL_KERNEL) {
                Ok(id) => ids[i] = id,
                Err(err) => crate::klog_error!("ipc", "service channel {}: {}", name, err),
            }
        }
        ids
    });

    INITIALIZED.store(true, Ordering::Release);
    klog_info!("ipc", "mailboxes, capabilities and service channels ready");
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

pub fn service_channel(service: ServiceChannel) -> Option<i32> {
    let id = SERVICE_CHANNELS.get()?[service as usize];
    if id > 0 {
        Some(id)
    } else {
        None
    }
}

/// Reset a slot's IPC state. Called for a freshly reclaimed slot.
pub(crate) fn attach_slot(idx: usize) {
    mailbox::clear_slot(idx);
    caps::clear_slot(idx);
    share::clear_slot(idx);
}

/// Release everything a dying thread holds: mailbox contents, capability
/// entries, share records on either side, channel memberships and any
/// waiter-list entries. Runs in the exiting thread, before it goes
/// ZOMBIE.
pub(crate) fn process_cleanup(slot: usize, pid: Pid) {
    mailbox::clear_slot(slot);
    caps::clear_slot(slot);
    share::drop_for_pid(pid);

    for channel_id in scheduler::take_channel_state(slot) {
        channel::scrub_thread(pid, channel_id);
    }
}
