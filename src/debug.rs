use parking_lot::Mutex;
/// Logging backend for the lumen binary.
///
/// Routes every `log::info!()` etc. from lumen and lumen-config to stderr as
/// `[timestamp] [LEVEL] [target] message` lines, keeping stdout free for
/// command output.
///
/// Level, highest precedence first:
/// - `--log-level` on the command line
/// - `LUMEN_LOG` environment variable (`off`, `error`, `warn`, `info`, `debug`, `trace`)
/// - `warn`
use log::{LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Environment variable read when `--log-level` is not given.
pub const LOG_ENV_VAR: &str = "LUMEN_LOG";

/// `log` implementation writing formatted lines to a shared writer.
pub struct LogBridge {
    level: LevelFilter,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl LogBridge {
    pub fn new(level: LevelFilter, writer: Box<dyn Write + Send>) -> Self {
        Self {
            level,
            writer: Mutex::new(writer),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{:<5}] [{}] {}\n",
            get_timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        let mut writer = self.writer.lock();
        // Logging must never take the process down
        let _ = writer.write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = self.writer.lock().flush();
    }
}

static LOGGER: OnceLock<LogBridge> = OnceLock::new();

fn get_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// Parse a level name (`warn`, `DEBUG`, ...).
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse().ok()
}

/// Pick the effective level from the CLI flag and the environment value.
pub fn effective_level(cli_level: Option<LevelFilter>, env_value: Option<&str>) -> LevelFilter {
    cli_level
        .or_else(|| env_value.and_then(parse_level))
        .unwrap_or(LevelFilter::Warn)
}

/// Install the stderr logger. Later calls are ignored.
pub fn init_log_bridge(cli_level: Option<LevelFilter>) {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let level = effective_level(cli_level, env_value.as_deref());
    let logger = LOGGER.get_or_init(|| LogBridge::new(level, Box::new(io::stderr())));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level());
    }
}
