//! Kernel logger: a `log` facade sink that writes one formatted line per
//! record to the machine console, gated by a runtime level.

extern crate alloc;

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = alloc::format!(
            "[{}] {}: {}",
            record.level().as_str().to_ascii_lowercase(),
            record.target(),
            record.args()
        );
        crate::platform::machine().console_write(&line);
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Safe to call more than once; later calls
/// only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_reach_the_console() {
        let _guard = crate::testing::GLOBAL_LOCK.lock();
        init(LevelFilter::Info);
        // Other threads share the console ring; retry in case our line is
        // evicted between the write and the read.
        let seen = (0..3).any(|_| {
            log::info!(target: "logtest", "hello from {}", "logger");
            crate::platform::sim::machine()
                .console_lines()
                .iter()
                .any(|l| l.contains("logtest") && l.contains("hello from logger"))
        });
        assert!(seen);
    }
}
