use slog::Logger;
use sloggers::{Config, LoggerConfig};

/// Builds the root logger every `StreamClient` derives its child loggers
/// from. Configuration is inline rather than file-driven since the
/// request processor has no config surface of its own.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
        type = "terminal"
        level = "debug"
        destination = "stderr"
        "#,
    )
    .expect("static logger config must parse");

    config.build_logger().expect("logger config must build")
}
