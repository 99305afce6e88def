//! `log` crate integration: every `log::info!`/`warn!`/`error!` call in the
//! kernel is routed to the serial port, the same developer-diagnostics
//! channel `serial_println!` uses, so boot logs survive even when the VGA
//! console is unusable or not yet initialized.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::serial_println!("[{:<5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial-backed logger as the global `log` sink.
///
/// # Safety
///
/// Must be called at most once, early in boot, before any code calls into
/// `log::info!`/`warn!`/`error!` (those are no-ops before a logger is set,
/// so calling this late just loses the earliest messages rather than
/// breaking anything).
pub fn init(max_level: LevelFilter) {
    log::set_logger(&LOGGER).expect("logger already installed");
    log::set_max_level(max_level);
}
