/// PS/2 keyboard decoding.
///
/// The IRQ1 handler only queues raw scancodes; decoding happens here, on
/// demand, in thread context. The shell polls `poll_char` and sleeps a
/// tick when there is nothing to read.

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::interrupts::SCANCODE_QUEUE;

type KeyboardState = Keyboard<layouts::Us104Key, ScancodeSet1>;

static KEYBOARD: Mutex<Option<KeyboardState>> = Mutex::new(None);

pub fn init() {
    *KEYBOARD.lock() = Some(Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::Ignore,
    ));
}

/// Decode the next buffered scancode into a character, if any.
pub fn poll_char() -> Option<char> {
    loop {
        let scancode = SCANCODE_QUEUE.lock().pop()?;

        let mut guard = KEYBOARD.lock();
        let keyboard = guard.as_mut()?;
        if let Ok(Some(event)) = keyboard.add_byte(scancode) {
            if let Some(DecodedKey::Unicode(c)) = keyboard.process_keyevent(event) {
                return Some(c);
            }
        }
        // Key-up events and raw keys decode to nothing; try the next byte.
    }
}
