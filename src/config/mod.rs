//! # Configuration Management
//!
//! Layered configuration: built-in defaults, an optional TOML file, then
//! environment variables (`MEMBERAUTH__AUTH__LOCKOUT_THRESHOLD=3`).

pub mod settings;

pub use settings::{AppConfig, AuthConfig, DatabaseConfig, ObservabilityConfig};

use crate::errors::Result;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "MEMBERAUTH_CONFIG";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MEMBERAUTH";

impl AppConfig {
    /// Load configuration from defaults, the optional file and the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref())
    }

    /// Load configuration, reading `path` (TOML) when given.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let loaded: AppConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }
}
