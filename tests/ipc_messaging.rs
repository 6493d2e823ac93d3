// Threaded IPC scenarios: the capability-gated mailbox path (including
// the silent drop of messages the receiver holds no RECV right for),
// blocking channel receive woken by a kernel-origin send, and the
// shared-region lifecycle through thread exit.

#![no_std]
#![no_main]

extern crate alloc;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use ferrite_kernel::ipc;
use ferrite_kernel::task::scheduler;
use ferrite_kernel::task::ThreadState;
use ferrite_kernel::{allocator, exit_qemu, memory, println, KernelError, QemuExitCode};

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
    ferrite_kernel::interrupts::init_pit();
    scheduler::init();
    ferrite_kernel::ipc::init();
    ferrite_kernel::sync::init();

    scheduler::create_kernel(driver, 0).expect("failed to spawn driver");
    scheduler::enter()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[failed]\n");
    println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
    ferrite_kernel::hlt_loop()
}

static DRIVER_PID: AtomicI32 = AtomicI32::new(0);

fn driver() {
    DRIVER_PID.store(scheduler::current_pid().unwrap(), Ordering::SeqCst);

    println!("ipc_messaging::capability_gated_mailbox...");
    test_capability_gated_mailbox();
    println!("[ok]");

    println!("ipc_messaging::blocking_channel_receive...");
    test_blocking_channel_receive();
    println!("[ok]");

    println!("ipc_messaging::share_lifecycle...");
    test_share_lifecycle();
    println!("[ok]");

    exit_qemu(QemuExitCode::Success);
}

fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        scheduler::sleep(1);
    }
}

// --- capability-gated mailbox ------------------------------------------

static SENDER_PID: AtomicI32 = AtomicI32::new(0);
static RECEIVER_PID: AtomicI32 = AtomicI32::new(0);
static SEND_GRANTED: AtomicBool = AtomicBool::new(false);
static FIRST_SENT: AtomicBool = AtomicBool::new(false);
static RECV_GRANTED: AtomicBool = AtomicBool::new(false);
static RECEIVED: AtomicBool = AtomicBool::new(false);
static PHASE2: AtomicBool = AtomicBool::new(false);
static FILTERED: AtomicBool = AtomicBool::new(false);

fn mb_sender() {
    let target = RECEIVER_PID.load(Ordering::SeqCst);

    // A user thread with no SEND right toward the peer is refused.
    // The driver's pid never receives a grant, so this is race-free.
    assert_eq!(
        ipc::send(DRIVER_PID.load(Ordering::SeqCst), b"hi"),
        Err(KernelError::Denied)
    );

    wait_for(&SEND_GRANTED);
    assert_eq!(ipc::send(target, b"hi"), Ok(2));
    FIRST_SENT.store(true, Ordering::SeqCst);

    wait_for(&RECV_GRANTED);
    assert_eq!(ipc::send(target, b"hi"), Ok(2));

    // Phase two: our message arrives after the driver's, but a
    // source-filtered recv must still pick ours first.
    wait_for(&PHASE2);
    assert_eq!(ipc::send(target, b"usr"), Ok(3));
}

fn mb_receiver() {
    // Blocks until a message from a RECV-capable sender arrives. The
    // first message is dropped silently: no RECV right toward its
    // sender yet.
    let mut buf = [0u8; 8];
    let n = ipc::recv(ipc::ANY_PROCESS, &mut buf).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&buf[..2], b"hi");
    RECEIVED.store(true, Ordering::SeqCst);

    // Source-filtered receive: the driver's "sys" message is older, but
    // filtering on the sender skips it without consuming it.
    let sender = SENDER_PID.load(Ordering::SeqCst);
    let n = ipc::recv(sender, &mut buf).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&buf[..3], b"usr");

    // The skipped message is still there for an unfiltered receive.
    let n = ipc::recv(ipc::ANY_PROCESS, &mut buf).unwrap();
    assert_eq!(n, 3);
    assert_eq!(&buf[..3], b"sys");
    FILTERED.store(true, Ordering::SeqCst);
}

fn test_capability_gated_mailbox() {
    let receiver = scheduler::create_user(mb_receiver, 0).unwrap();
    RECEIVER_PID.store(receiver, Ordering::SeqCst);
    let sender = scheduler::create_user(mb_sender, 0).unwrap();
    SENDER_PID.store(sender, Ordering::SeqCst);

    // Without a SEND right the sender is refused outright.
    // (It is parked on SEND_GRANTED, so probe on its behalf is not
    // possible from here; instead verify the refusal path directly.)
    ipc::cap_grant(sender, receiver, ipc::RIGHT_SEND).unwrap();
    SEND_GRANTED.store(true, Ordering::SeqCst);
    wait_for(&FIRST_SENT);

    // Give the receiver time to run: it must have discarded the
    // un-capable message and parked again, not returned.
    scheduler::sleep(5);
    assert!(!RECEIVED.load(Ordering::SeqCst));
    assert_eq!(scheduler::state_of(receiver), Some(ThreadState::Waiting));

    // Grant RECV and trigger a second send; this one is delivered.
    ipc::cap_grant(receiver, sender, ipc::RIGHT_RECV).unwrap();
    RECV_GRANTED.store(true, Ordering::SeqCst);
    wait_for(&RECEIVED);

    // Phase two: queue a message of our own ahead of the sender's and
    // let the receiver pick them apart with a source filter. We are
    // kernel-kind, so no SEND right is needed, but the receiver needs a
    // RECV right toward us to accept the message.
    let me = DRIVER_PID.load(Ordering::SeqCst);
    ipc::cap_grant(receiver, me, ipc::RIGHT_RECV).unwrap();
    assert_eq!(ipc::send(receiver, b"sys"), Ok(3));
    PHASE2.store(true, Ordering::SeqCst);
    wait_for(&FILTERED);
}

// --- blocking channel receive ------------------------------------------

static CHANNEL_ID: AtomicI32 = AtomicI32::new(0);
static CHANNEL_GOT: AtomicBool = AtomicBool::new(false);

fn chan_receiver() {
    let me = scheduler::current_pid().unwrap();
    let ch = CHANNEL_ID.load(Ordering::SeqCst);

    let mut buf = [0u8; 16];
    loop {
        match ipc::channel_receive(me, ch, &mut buf, 0) {
            Ok(msg) => {
                assert_eq!(msg.size, 5);
                assert_eq!(msg.header, 0x77);
                assert_eq!(msg.mtype, 9);
                assert_eq!(msg.sender, 0);
                assert_eq!(&buf[..5], b"hello");
                break;
            }
            // The driver may not have joined us to the channel yet.
            Err(KernelError::Denied) => scheduler::sleep(1),
            Err(err) => panic!("channel receive failed: {}", err),
        }
    }
    CHANNEL_GOT.store(true, Ordering::SeqCst);
}

fn test_blocking_channel_receive() {
    let ch = ipc::channel_create("test.events", 0).unwrap();
    CHANNEL_ID.store(ch, Ordering::SeqCst);

    let receiver = scheduler::create_user(chan_receiver, 0).unwrap();
    ipc::channel_join(receiver, ch).unwrap();

    // Let the receiver park on the empty ring.
    scheduler::sleep(5);
    assert_eq!(scheduler::state_of(receiver), Some(ThreadState::Waiting));
    assert_eq!(ipc::channel_peek(ch), Ok(false));

    // Kernel-origin send wakes it.
    assert_eq!(ipc::channel_send(ch, 0, 0x77, 9, b"hello", 0), Ok(5));
    wait_for(&CHANNEL_GOT);
}

// --- shared-region lifecycle -------------------------------------------

static SHARE_OWNER_PID: AtomicI32 = AtomicI32::new(0);
static SHARE_TARGET_PID: AtomicI32 = AtomicI32::new(0);
static SHARE_GRANTED: AtomicBool = AtomicBool::new(false);
static SHARE_PLACED: AtomicBool = AtomicBool::new(false);

const SHARE_ADDR: u64 = 0x4000_0000;
const SHARE_PAGES: u64 = 4;

fn share_owner() {
    wait_for(&SHARE_GRANTED);
    let target = SHARE_TARGET_PID.load(Ordering::SeqCst);

    // The grant covers owner -> target only; any other peer is refused.
    assert_eq!(
        ipc::share(DRIVER_PID.load(Ordering::SeqCst), SHARE_ADDR, 1),
        Err(KernelError::Denied)
    );

    ipc::share(target, SHARE_ADDR, SHARE_PAGES).unwrap();
    SHARE_PLACED.store(true, Ordering::SeqCst);
    scheduler::sleep(10);
    // Falling off the end exits; the registry record must go with us.
}

fn share_target() {
    scheduler::sleep(300);
}

fn test_share_lifecycle() {
    let owner = scheduler::create_user(share_owner, 0).unwrap();
    SHARE_OWNER_PID.store(owner, Ordering::SeqCst);
    let target = scheduler::create_user(share_target, 0).unwrap();
    SHARE_TARGET_PID.store(target, Ordering::SeqCst);

    ipc::cap_grant(owner, target, ipc::RIGHT_SHARE).unwrap();
    SHARE_GRANTED.store(true, Ordering::SeqCst);
    wait_for(&SHARE_PLACED);

    let snapshot = ipc::share::snapshot();
    let record = snapshot
        .iter()
        .find(|s| s.owner == owner)
        .expect("share record missing");
    assert_eq!(record.target, target);
    assert_eq!(record.addr, SHARE_ADDR);
    assert_eq!(record.pages, SHARE_PAGES);

    // The owner exits ~10 ticks after placing the share; its record is
    // dropped on exit, from both sides.
    while scheduler::state_of(owner).is_some() {
        scheduler::sleep(2);
    }
    assert!(ipc::share::snapshot().iter().all(|s| s.owner != owner));
}
