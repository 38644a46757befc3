pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the default terminal logger used by binaries embedding the
/// transport.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("logger config must parse");

    config.build_logger().expect("logger must build")
}

/// Logger that swallows all records.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
