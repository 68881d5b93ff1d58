use log::LevelFilter;

#[derive(PartialEq, PartialOrd, Debug, Default, Clone, Copy)]
pub enum LogLevel {
    #[default]
    NONE,
    INFO,
    DEBUG,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::NONE => LevelFilter::Warn,
            LogLevel::INFO => LevelFilter::Info,
            LogLevel::DEBUG => LevelFilter::Debug,
        }
    }
}

pub fn to_loglevel(ulevel: u64) -> LogLevel {
    match ulevel {
        0 => LogLevel::NONE,
        1 => LogLevel::INFO,
        2 => LogLevel::DEBUG,
        _ => LogLevel::NONE,
    }
}

/// Installs the global logger.  `RUST_LOG`, when set, wins over the configured level.
pub fn init_logging(ulevel: u64) {
    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(spec) => builder.parse_filters(&spec),
        Err(_) => builder.filter_level(to_loglevel(ulevel).filter()),
    };
    // a second init (tests, embedding) keeps the first logger
    let _ = builder.format_timestamp(None).try_init();
}
