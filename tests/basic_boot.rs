// Integration test: the kernel boots, prints, and logs.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(ferrite_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use ferrite_kernel::println;

entry_point!(main);

fn main(_boot_info: &'static mut BootInfo) -> ! {
    ferrite_kernel::serial::init();
    ferrite_kernel::init();
    test_main();
    ferrite_kernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    ferrite_kernel::test_panic_handler(info)
}

#[test_case]
fn test_println_simple() {
    println!("test_println_simple output");
}

#[test_case]
fn test_println_many() {
    for _ in 0..200 {
        println!("test_println_many output");
    }
}

#[test_case]
fn test_log_levels_round_trip() {
    use ferrite_kernel::klog::LogLevel;

    assert_eq!(LogLevel::from_name("warn"), Some(LogLevel::Warn));
    assert_eq!(LogLevel::from_name("2"), Some(LogLevel::Warn));
    assert_eq!(LogLevel::from_name("loud"), None);
    assert!(LogLevel::Debug < LogLevel::Error);
}
