mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    FlushPolicy, IngestSettings, LogSettings, OverflowPolicy, ServerSettings, Settings,
};

/// Loads the configuration from the default file and environment variables.
///
/// `config/default.toml` is optional. Environment variables use the `INGEST`
/// prefix and a double underscore between path segments, for example
/// `INGEST__SERVER__PORT=9000` or `INGEST__INGEST__BUFFER_CAPACITY=50`.
/// Anything not provided keeps its default value.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

pub fn load_config_from(file: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix("INGEST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests;
