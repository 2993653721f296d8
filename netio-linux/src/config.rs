//! Load config from file and environment.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Presets may name other presets; deeper chains are taken for a loop.
pub const MAX_PRESET_DEPTH: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Node configuration. File: $NETIO_CONFIG, ~/.config/netio/config.toml or
/// /etc/netio/config.toml. Env overrides: NETIO_KEEPALIVE_MS, NETIO_LISTEN, NETIO_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Keepalive period in milliseconds (default 1000).
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_interval_ms: u64,
    /// Public endpoints bound at startup, e.g. `unix:@house`.
    #[serde(default)]
    pub listen: Vec<String>,
    /// Short names for parameter specs and message targets.
    #[serde(default)]
    pub presets: BTreeMap<String, String>,
    /// Tracing filter directive, e.g. `info` or `netio_core=debug`.
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_keepalive_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: default_keepalive_ms(),
            listen: Vec::new(),
            presets: BTreeMap::new(),
            log_level: None,
        }
    }
}

impl Config {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Follow preset names until `spec` is not one.
    pub fn expand<'a>(&'a self, spec: &'a str) -> Result<&'a str, ConfigError> {
        let mut cur = spec;
        for _ in 0..=MAX_PRESET_DEPTH {
            match self.presets.get(cur) {
                Some(next) => cur = next.as_str(),
                None => return Ok(cur),
            }
        }
        Err(ConfigError::Invalid(format!(
            "preset '{}': max nesting reached, are you looping?",
            spec
        )))
    }

    /// Apply overrides from `var`, which looks up an environment variable.
    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(s) = var("NETIO_KEEPALIVE_MS") {
            self.keepalive_interval_ms = s
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("NETIO_KEEPALIVE_MS: bad value '{}'", s)))?;
        }
        if let Some(s) = var("NETIO_LISTEN") {
            self.listen = s
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(s) = var("NETIO_LOG") {
            self.log_level = Some(s);
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load config: default, then the first config file found, then env vars.
pub fn load() -> Result<Config, ConfigError> {
    let mut c = match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_from(&p)?,
        None => Config::default(),
    };
    c.apply_env_from(|k| std::env::var(k).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = std::env::var_os("NETIO_CONFIG") {
        out.push(PathBuf::from(p));
    }
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/netio/config.toml"));
    }
    out.push(PathBuf::from("/etc/netio/config.toml"));
    out
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let c: Config = toml::from_str(&s).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    c.validate()?;
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presets(pairs: &[(&str, &str)]) -> Config {
        Config {
            presets: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Config::default()
        }
    }

    #[test]
    fn presets_chain() {
        let c = presets(&[("lamp", "kitchen"), ("kitchen", "unix:@house#lamp")]);
        assert_eq!(c.expand("lamp").unwrap(), "unix:@house#lamp");
        assert_eq!(c.expand("netio:x").unwrap(), "netio:x");
    }

    #[test]
    fn preset_loop_is_an_error() {
        let c = presets(&[("a", "b"), ("b", "a")]);
        assert!(matches!(c.expand("a"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();
        c.apply_env_from(|k| match k {
            "NETIO_KEEPALIVE_MS" => Some("250".into()),
            "NETIO_LISTEN" => Some("unix:@a, udp4::7000,".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(c.keepalive_interval(), Duration::from_millis(250));
        assert_eq!(c.listen, vec!["unix:@a", "udp4::7000"]);
        assert!(c.log_level.is_none());

        assert!(c
            .apply_env_from(|k| (k == "NETIO_KEEPALIVE_MS").then(|| "soon".into()))
            .is_err());
    }
}
