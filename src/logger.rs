use log::{Level, LevelFilter};

struct ScanLogger;

static LOGGER: ScanLogger = ScanLogger;

impl log::Log for ScanLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let tag = match record.level() {
            Level::Error => "Error",
            Level::Warn => "Warn",
            Level::Info => "Info",
            Level::Debug => "Debug",
            Level::Trace => "Trace",
        };

        println!("[{}] {}", tag, record.args());
    }

    fn flush(&self) {}
}

fn filter(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

pub fn init(debug: bool) {
    // Result is ignored since we guarantee that init is called only one time.
    let _ = log::set_logger(&LOGGER).map(|_| log::set_max_level(filter(debug)));
}
