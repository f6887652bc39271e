//! # Semihosting Logger
//!
//! Backs the `log` facade with the debugger console. Each record is written
//! as `LEVEL target: message` inside a critical section, so lines from
//! different tasks never interleave.
//!
//! Semihosting halts the core for every call; keep the level at `Info` or
//! above outside of debugging sessions.

use cortex_m_semihosting::hprintln;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::sync;

struct SemihostingLogger;

static LOGGER: SemihostingLogger = SemihostingLogger;

impl Log for SemihostingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        sync::critical_section(|_cs| {
            let _ = hprintln!("{:<5} {}: {}", record.level(), record.target(), record.args());
        });
    }

    fn flush(&self) {}
}

/// Install the logger. Fails if another logger was installed first.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
