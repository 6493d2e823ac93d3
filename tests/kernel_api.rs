// Integration test: core API behavior reachable from the boot context,
// before the scheduler loop is entered. Threads are created but never
// dispatched; calls from here are kernel-origin.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(ferrite_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use ferrite_kernel::config::{MAILBOX_CAPACITY, MSG_MAX};
use ferrite_kernel::ipc;
use ferrite_kernel::task::scheduler;
use ferrite_kernel::task::{SchedPolicy, ThreadKind, ThreadState};
use ferrite_kernel::{allocator, memory, ramfs, KernelError};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config
};

entry_point!(main, config = &BOOTLOADER_CONFIG);

fn main(boot_info: &'static mut BootInfo) -> ! {
    ferrite_kernel::serial::init();
    ferrite_kernel::init();

    let phys_mem_offset = x86_64::VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("physical_memory_offset not available"),
    );
    let mut mapper = unsafe { memory::init(phys_mem_offset) };
    let mut frame_allocator =
        unsafe { memory::BootInfoFrameAllocator::init(&boot_info.memory_regions) };
    allocator::init_heap(&mut mapper, &mut frame_allocator).expect("heap initialization failed");

    ferrite_kernel::klog::init();
    ramfs::init();
    scheduler::init();
    ipc::init();
    ferrite_kernel::sync::init();

    test_main();
    ferrite_kernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    ferrite_kernel::test_panic_handler(info)
}

fn parked_entry() {}

#[test_case]
fn test_create_lands_ready_at_user_priority() {
    let pid = scheduler::create_user(parked_entry, 0).unwrap();
    assert!(pid > 0);

    let snapshot = scheduler::snapshot();
    let info = snapshot.iter().find(|t| t.pid == pid).unwrap();
    assert_eq!(info.state, ThreadState::Ready);
    assert_eq!(info.kind, ThreadKind::User);
    assert_eq!(info.policy, SchedPolicy::Fair);
    assert!(info.base_priority > 0, "user threads sit below kernel priority");
    assert_eq!(info.base_priority, info.dynamic_priority);
}

#[test_case]
fn test_pids_are_monotonic() {
    let a = scheduler::create_user(parked_entry, 0).unwrap();
    let b = scheduler::create_user(parked_entry, 0).unwrap();
    assert!(b > a);
}

#[test_case]
fn test_set_scheduler_validates_target() {
    assert_eq!(
        scheduler::set_scheduler(9999, SchedPolicy::Fair, 0, 0),
        Err(KernelError::NotFound)
    );

    let pid = scheduler::create_user(parked_entry, 0).unwrap();
    scheduler::set_scheduler(pid, SchedPolicy::Fair, 2048, 0).unwrap();
    let snapshot = scheduler::snapshot();
    let info = snapshot.iter().find(|t| t.pid == pid).unwrap();
    assert_eq!(info.weight, 2048);

    // Deadline below the current tick is taken as relative.
    scheduler::set_scheduler(pid, SchedPolicy::Deadline, 0, 1).unwrap();
    let snapshot = scheduler::snapshot();
    let info = snapshot.iter().find(|t| t.pid == pid).unwrap();
    assert_eq!(info.policy, SchedPolicy::Deadline);
    assert!(info.deadline >= 1);
}

#[test_case]
fn test_capability_grant_revoke_query() {
    let owner = scheduler::create_user(parked_entry, 0).unwrap();
    let peer = scheduler::create_user(parked_entry, 0).unwrap();

    assert_eq!(ipc::cap_query(owner, peer), Ok(0));

    ipc::cap_grant(owner, peer, ipc::RIGHT_SEND | ipc::RIGHT_RECV).unwrap();
    let rights = ipc::cap_query(owner, peer).unwrap();
    assert_eq!(rights & (ipc::RIGHT_SEND | ipc::RIGHT_RECV), ipc::RIGHT_SEND | ipc::RIGHT_RECV);

    // Grants accumulate.
    ipc::cap_grant(owner, peer, ipc::RIGHT_SHARE).unwrap();
    assert_eq!(
        ipc::cap_query(owner, peer).unwrap(),
        ipc::RIGHT_SEND | ipc::RIGHT_RECV | ipc::RIGHT_SHARE
    );

    // Revocation clears exactly the named bits.
    ipc::cap_revoke(owner, peer, ipc::RIGHT_SEND | ipc::RIGHT_SHARE).unwrap();
    assert_eq!(ipc::cap_query(owner, peer).unwrap(), ipc::RIGHT_RECV);

    ipc::cap_revoke(owner, peer, ipc::RIGHT_RECV).unwrap();
    assert_eq!(ipc::cap_query(owner, peer), Ok(0));

    assert_eq!(ipc::cap_grant(0, peer, ipc::RIGHT_SEND), Err(KernelError::Invalid));
    assert_eq!(ipc::cap_grant(owner, peer, 0), Err(KernelError::Invalid));
}

#[test_case]
fn test_mailbox_send_validation_and_capacity() {
    assert_eq!(ipc::send(9999, b"x"), Err(KernelError::NotFound));
    assert_eq!(ipc::send(-1, b"x"), Err(KernelError::NotFound));

    let target = scheduler::create_user(parked_entry, 0).unwrap();

    let oversized = [0u8; MSG_MAX + 1];
    assert_eq!(ipc::send(target, &oversized), Err(KernelError::Invalid));

    // Kernel-origin sends need no capability; fill the mailbox.
    for _ in 0..MAILBOX_CAPACITY {
        assert_eq!(ipc::send(target, b"ping"), Ok(4));
    }
    assert_eq!(ipc::send(target, b"ping"), Err(KernelError::Full));
}

#[test_case]
fn test_channel_pubsub_and_truncation() {
    let ch = ipc::channel_create("test.api", 0).unwrap();
    let subscriber = scheduler::create_user(parked_entry, 0).unwrap();
    let outsider = scheduler::create_user(parked_entry, 0).unwrap();

    ipc::channel_join(subscriber, ch).unwrap();

    // Non-subscribers may neither send nor receive on a plain channel.
    assert_eq!(
        ipc::channel_send(ch, outsider, 0, 0, b"nope", 0),
        Err(KernelError::Denied)
    );
    let mut buf = [0u8; 8];
    assert_eq!(
        ipc::channel_receive(outsider, ch, &mut buf, ipc::RECV_NONBLOCK),
        Err(KernelError::Denied)
    );

    // Kernel origin (sender 0) bypasses the subscription check.
    let payload = [0xAAu8; 16];
    assert_eq!(ipc::channel_send(ch, 0, 0x10, 7, &payload, 0), Ok(16));
    assert_eq!(ipc::channel_peek(ch), Ok(true));

    // An 8-byte buffer gets the first 8 bytes and the TRUNCATED bit.
    let msg = ipc::channel_receive(subscriber, ch, &mut buf, ipc::RECV_NONBLOCK).unwrap();
    assert_eq!(msg.size, 16);
    assert_eq!(msg.mtype, 7);
    assert_eq!(msg.sender, 0);
    assert!(msg.header & ipc::MSG_TRUNCATED != 0);
    assert_eq!(buf, [0xAAu8; 8]);

    assert_eq!(ipc::channel_peek(ch), Ok(false));
    assert_eq!(
        ipc::channel_receive(subscriber, ch, &mut buf, ipc::RECV_NONBLOCK),
        Err(KernelError::WouldBlock)
    );

    ipc::channel_leave(subscriber, ch).unwrap();
    assert_eq!(
        ipc::channel_receive(subscriber, ch, &mut buf, ipc::RECV_NONBLOCK),
        Err(KernelError::Denied)
    );

    assert_eq!(ipc::channel_peek(9999), Err(KernelError::NotFound));
}

#[test_case]
fn test_service_channels_exist() {
    for service in [
        ipc::ServiceChannel::DeviceManager,
        ipc::ServiceChannel::ModuleLoader,
        ipc::ServiceChannel::Logger,
        ipc::ServiceChannel::Scheduler,
    ] {
        assert!(ipc::service_channel(service).is_some());
    }
}

#[test_case]
fn test_share_argument_validation() {
    use ferrite_kernel::config::PAGE_SIZE;

    // Misaligned base and zero page count are rejected before anything
    // else is consulted.
    assert_eq!(ipc::share(1, PAGE_SIZE + 1, 1), Err(KernelError::Invalid));
    assert_eq!(ipc::share(1, PAGE_SIZE, 0), Err(KernelError::Invalid));
    assert_eq!(ipc::share(1, 0, 1), Err(KernelError::Invalid));
    assert_eq!(ipc::share(1, u64::MAX & !(PAGE_SIZE - 1), 2), Err(KernelError::Invalid));
}

#[test_case]
fn test_sync_pools_from_boot_context() {
    use ferrite_kernel::sync;

    let m = sync::mutex_create().unwrap();
    assert_eq!(sync::mutex_info(m), Ok((false, -1)));
    // No current thread at boot: lock and unlock both need one.
    assert_eq!(sync::mutex_lock(m), Err(KernelError::Invalid));

    let s = sync::semaphore_create(2).unwrap();
    assert_eq!(sync::semaphore_count(s), Ok(2));
    sync::semaphore_post(s).unwrap();
    assert_eq!(sync::semaphore_count(s), Ok(3));

    assert_eq!(sync::semaphore_count(9999), Err(KernelError::NotFound));
}

#[test_case]
fn test_ramfs_roundtrip() {
    ramfs::write("notes.txt", b"hello ramfs").unwrap();
    assert_eq!(ramfs::read("notes.txt").unwrap(), b"hello ramfs");

    ramfs::touch("empty").unwrap();
    assert_eq!(ramfs::read("empty").unwrap(), b"");

    let names: alloc::vec::Vec<_> = ramfs::list().into_iter().map(|(n, _)| n).collect();
    assert!(names.iter().any(|n| n == "notes.txt"));

    ramfs::remove("notes.txt").unwrap();
    assert!(ramfs::read("notes.txt").is_err());
    ramfs::remove("empty").unwrap();
}
