//! PS/2 keyboard: translate scancodes via `pc-keyboard`, feed a 128-byte
//! circular buffer, and wake whichever thread is blocked in `readline` at
//! the head of the console wait queue.

use alloc::vec::Vec;

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::arch::x86::port;
use crate::error::{KernelError, KernelResult};
use crate::sched::ktcb::KtcbId;
use crate::sync::{condvar, mutex};

const KEYBOARD_DATA_PORT: u16 = 0x60;
const BUFFER_CAPACITY: usize = 128;

struct RingBuffer {
    buf: [u8; BUFFER_CAPACITY],
    head: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self { buf: [0; BUFFER_CAPACITY], head: 0, len: 0 }
    }

    fn push(&mut self, byte: u8) {
        let tail = (self.head + self.len) % BUFFER_CAPACITY;
        self.buf[tail] = byte;
        if self.len == BUFFER_CAPACITY {
            self.head = (self.head + 1) % BUFFER_CAPACITY;
        } else {
            self.len += 1;
        }
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % BUFFER_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

static BUFFER: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

lazy_static::lazy_static! {
    static ref DECODER: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> =
        Mutex::new(Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore));
    /// Paired mutex/condvar `readline` blocks on, signaled from `on_irq`.
    static ref WAIT_MUTEX: mutex::MutexId = mutex::create();
    static ref WAIT_COND: condvar::CondId = condvar::create();
}

/// Called from the keyboard IRQ handler: decode one scancode byte and, if
/// it resolves to an ASCII character, push it onto the circular buffer
/// and wake the head of the readline wait queue. EOI is sent by the
/// caller, matching the timer handler's split.
pub fn on_irq() {
    // SAFETY: reading the 8042 data port in response to its own IRQ.
    let scancode = unsafe { port::inb(KEYBOARD_DATA_PORT) };

    let decoded = {
        let mut decoder = DECODER.lock();
        decoder.add_byte(scancode).ok().flatten().and_then(|event| decoder.process_keyevent(event))
    };

    let byte = match decoded {
        Some(DecodedKey::Unicode(c)) if c.is_ascii() => Some(c as u8),
        _ => None,
    };

    if let Some(byte) = byte {
        BUFFER.lock().push(byte);
        let _ = condvar::signal(*WAIT_COND);
    }
}

/// `getchar`: return the next buffered byte without blocking. Mirrors the
/// original's stub contract (spec §9 Open Questions): no byte ready is
/// simply a failure, never a wait.
pub fn getchar() -> KernelResult<u8> {
    BUFFER.lock().pop().ok_or(KernelError::ResourceExhausted { resource: "keyboard buffer" })
}

/// `readline`: block on the console wait queue until a full line —
/// terminated by `\n` or `buf.len()` bytes, whichever comes first — is
/// available, then copy it into `buf` and return the byte count.
pub fn readline(me: KtcbId, buf: &mut [u8]) -> KernelResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }

    mutex::lock(*WAIT_MUTEX, me)?;
    let mut line = Vec::new();
    'collect: loop {
        while let Some(byte) = BUFFER.lock().pop() {
            line.push(byte);
            if byte == b'\n' || line.len() == buf.len() {
                break 'collect;
            }
        }
        condvar::wait(*WAIT_COND, *WAIT_MUTEX, me)?;
    }
    mutex::unlock(*WAIT_MUTEX, me)?;

    let n = line.len();
    buf[..n].copy_from_slice(&line);
    Ok(n)
}
