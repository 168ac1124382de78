mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{LoggingSettings, ServerSettings, SessionSettings, Settings};

/// Loads the configuration from `config/default` and `STOCKINGS_*`
/// environment variables (sections separated by `__`, e.g.
/// `STOCKINGS_SESSION__PRIVATE_KEY`), then fills gaps from the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("STOCKINGS")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let server = partial.server.as_ref();
    let session = partial.session.as_ref();
    let logging = partial.logging.as_ref();

    Ok(Settings {
        server: ServerSettings {
            host: server
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server.and_then(|s| s.port).unwrap_or(default.server.port),
        },
        session: SessionSettings {
            algorithm: session
                .and_then(|s| s.algorithm.clone())
                .unwrap_or(default.session.algorithm),
            private_key: session
                .and_then(|s| s.private_key.clone())
                .or(default.session.private_key),
            public_key: session
                .and_then(|s| s.public_key.clone())
                .or(default.session.public_key),
            dispose_meta_after_secs: session
                .and_then(|s| s.dispose_meta_after_secs)
                .unwrap_or(default.session.dispose_meta_after_secs),
        },
        logging: LoggingSettings {
            level: logging
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    })
}
