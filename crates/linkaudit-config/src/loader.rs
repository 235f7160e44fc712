//! Configuration loader.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Reads `linkaudit.toml` files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
            _ => ConfigError::Io(e),
        })?;
        Self::load_str(&content)
    }

    /// Like [`ConfigLoader::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Parse configuration text after `${VAR}` substitution.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let substituted = Self::substitute_env(content)?;
        Ok(toml::from_str(&substituted)?)
    }

    /// Replace every `${VAR}` with the variable's value; the first unset one is an error.
    fn substitute_env(content: &str) -> Result<String, ConfigError> {
        let placeholder = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        let mut missing: Option<String> = None;
        let substituted = placeholder.replace_all(content, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            })
        });

        match missing {
            Some(name) => Err(ConfigError::EnvVarNotSet(name)),
            None => Ok(substituted.into_owned()),
        }
    }

    /// Expand a leading `~` to the home directory.
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}
