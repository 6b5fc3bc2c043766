use std::str::FromStr;

use log::LevelFilter;

/// Log verbosity, from silent to everything
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Nothing = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
    All = 5,
}

impl LogLevel {
    /// Create a LogLevel from an integer, saturating at both ends
    pub fn from_i32(level: i32) -> Self {
        match level {
            i32::MIN..=0 => LogLevel::Nothing,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::All,
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Level for a count of `-v` flags on top of the default warnings
    pub fn from_verbosity(count: u8) -> Self {
        Self::from_i32(LogLevel::Warning.as_i32() + count as i32)
    }

    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Nothing => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::All => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    /// Accepts a level name or its number
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<i32>() {
            return Ok(Self::from_i32(n));
        }
        match s.to_ascii_lowercase().as_str() {
            "nothing" | "off" | "none" => Ok(LogLevel::Nothing),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "all" | "trace" => Ok(LogLevel::All),
            other => anyhow::bail!("Unknown log level '{}'", other),
        }
    }
}

/// Install the stderr logger at `level`.
///
/// The logger is built once; calling again only lowers or raises the
/// global maximum, never past the level of the first call.
pub fn init(level: LogLevel) {
    let installed = env_logger::Builder::new()
        .filter_level(level.to_filter())
        .format_timestamp(None)
        .format_target(true)
        .try_init();
    if installed.is_err() {
        log::trace!("logger already installed");
    }
    log::set_max_level(level.to_filter());
}
