/// UART 16550 driver (COM1 at 0x3F8).
///
/// All kernel text output funnels through this port. QEMU maps it to
/// stdio, which is also how the test harness reports results. Interrupts
/// are held off for the duration of a write so a timer preemption cannot
/// interleave two threads' output mid-line.

use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;

static COM1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3F8) });

pub fn init() {
    COM1.lock().init();
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;

    interrupts::without_interrupts(|| {
        COM1.lock().write_fmt(args).expect("serial write failed");
    });
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::serial::_print(::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", ::core::format_args!($($arg)*)));
}
