use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listener, the session layer and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Token signing and connection retention.
///
/// `private_key` is the shared secret for HMAC algorithms, or a PEM private
/// key for asymmetric ones, which also need `public_key`.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    pub algorithm: String,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub dispose_meta_after_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub session: Option<PartialSessionSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSessionSettings {
    pub algorithm: Option<String>,
    pub private_key: Option<String>,
    pub public_key: Option<String>,
    pub dispose_meta_after_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// No signing key is configured by default; the server refuses to start
/// until one is supplied.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            session: SessionSettings {
                algorithm: "HS256".to_string(),
                private_key: None,
                public_key: None,
                dispose_meta_after_secs: 30 * 60,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
