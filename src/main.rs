#![no_std]
#![no_main]

extern crate alloc;

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;

use ferrite_kernel::interrupts::TICK_HZ;
use ferrite_kernel::task::scheduler;
use ferrite_kernel::{allocator, ipc, keyboard, klog, memory, ramfs, shell, sync};
use ferrite_kernel::{klog_info, println};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    // The boot stack becomes the scheduler context; the default 80 KiB
    // is too tight once the dispatch loop starts logging.
    config.kernel_stack_size = 512 * 1024;
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    ferrite_kernel::serial::init();
    println!("ferrite kernel booting...");

    // CPU tables, PICs, interrupts on.
    ferrite_kernel::init();

    // Paging and heap.
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

    klog::init();
    klog_info!("kernel", "heap ready");

    ramfs::init();
    keyboard::init();
    klog_info!("kernel", "ramfs and keyboard ready");

    ferrite_kernel::interrupts::init_pit();
    klog_info!("kernel", "PIT running at {} Hz", TICK_HZ);

    // The core, in its fixed order: scheduler, IPC, sync.
    scheduler::init();
    klog_info!("kernel", "scheduler ready");
    ipc::init();
    sync::init();

    match scheduler::create_kernel(shell::shell_thread, 0) {
        Ok(pid) => klog_info!("kernel", "shell spawned as pid {}", pid),
        Err(err) => klog_info!("kernel", "failed to spawn shell: {}", err),
    }

    scheduler::enter()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("{}", info);
    ferrite_kernel::hlt_loop()
}
