//! Ambient settings: a TOML file under `$XDG_CONFIG_HOME/gtuber/config.toml`
//! layered under `GTUBER_`-prefixed environment variables, in that order.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Extra directories to search for plugins, prepended to the built-in
    /// search path.
    #[serde(default)]
    pub extra_search_paths: Vec<String>,
    /// Disable the on-disk plugin cache entirely; every lookup re-scans the
    /// search path.
    #[serde(default)]
    pub disable_cache: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            extra_search_paths: Vec::new(),
            disable_cache: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Request timeout in seconds, overriding the 7s default.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    7
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Top-level settings object, loaded once via [`GtuberSettings::load`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GtuberSettings {
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl GtuberSettings {
    /// Load from `$XDG_CONFIG_HOME/gtuber/config.toml` if present, then layer
    /// `GTUBER_`-prefixed environment variables (double underscore as the
    /// nesting separator, e.g. `GTUBER_ENGINE__TIMEOUT_SECS=10`) on top.
    pub fn load() -> Result<Self> {
        let config_file = crate::util::config_dir().join("config.toml");
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let figment = if path.exists() {
            Figment::new().merge(Toml::file(path))
        } else {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            Figment::new().merge(Serialized::defaults(Self::default()))
        };

        figment
            .merge(Env::prefixed("GTUBER_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = GtuberSettings::load_from_file(std::path::Path::new(
            "/nonexistent/gtuber/config.toml",
        ))
        .unwrap();
        assert_eq!(settings.engine.timeout_secs, 7);
        assert!(!settings.plugins.disable_cache);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("GTUBER_ENGINE__TIMEOUT_SECS", "15");
        let settings = GtuberSettings::load_from_file(std::path::Path::new(
            "/nonexistent/gtuber/config.toml",
        ))
        .unwrap();
        assert_eq!(settings.engine.timeout_secs, 15);
        std::env::remove_var("GTUBER_ENGINE__TIMEOUT_SECS");
    }
}
