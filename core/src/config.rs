//! Filter chain configuration
//!
//! Which filter-sets to enable, in which order, and with which variables:
//!
//! ```toml
//! [[filterset]]
//! name = "trace"
//! [filterset.variables]
//! level = "info"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Environment variable naming the chain file
pub const CONFIG_ENV: &str = "GLSCOPE_CONFIG";

/// Environment variable listing extra filter-sets to enable, comma separated
pub const CHAIN_EXTRA_ENV: &str = "GLSCOPE_CHAIN_EXTRA";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Filter-sets to enable, in order
    #[serde(rename = "filterset", default)]
    pub filter_sets: Vec<FilterSetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSetConfig {
    pub name: String,

    /// Variable values, parsed by the filter-set's declared kinds
    #[serde(default)]
    pub variables: BTreeMap<String, toml::Value>,
}

impl FilterSetConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            variables: BTreeMap::new(),
        }
    }
}

impl ChainConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), filter_sets = config.filter_sets.len(), "loaded chain config");
        Ok(config)
    }

    /// Load from `$GLSCOPE_CONFIG`, else `$HOME/.glscope/chain.toml`. A
    /// missing default file gives an empty chain; a missing explicit one is
    /// an error. Extra sets from `$GLSCOPE_CHAIN_EXTRA` are appended.
    pub fn load_default() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => match default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        if let Ok(extra) = std::env::var(CHAIN_EXTRA_ENV) {
            config.append_extra(&extra);
        }
        Ok(config)
    }

    /// Append the comma-separated sets in `list` that are not already named.
    pub fn append_extra(&mut self, list: &str) {
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !self.filter_sets.iter().any(|s| s.name == name) {
                self.filter_sets.push(FilterSetConfig::new(name));
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for set in &self.filter_sets {
            if set.name.trim().is_empty() {
                return Err(Error::Config("filter-set name must not be empty".to_string()));
            }
            if !seen.insert(set.name.as_str()) {
                return Err(Error::Config(format!(
                    "filter-set {} listed more than once",
                    set.name
                )));
            }
        }
        Ok(())
    }
}

fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".glscope").join("chain.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[filterset]]
name = "stats_calls"

[[filterset]]
name = "trace"
[filterset.variables]
level = "debug"
group = 3
"#;

    #[test]
    fn test_parse_chain() {
        let config = ChainConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.filter_sets.len(), 2);
        assert_eq!(config.filter_sets[0].name, "stats_calls");
        assert!(config.filter_sets[0].variables.is_empty());
        let trace = &config.filter_sets[1];
        assert_eq!(
            trace.variables.get("level"),
            Some(&toml::Value::String("debug".to_string()))
        );
        assert_eq!(trace.variables.get("group"), Some(&toml::Value::Integer(3)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_empty_chain() {
        let config = ChainConfig::from_toml_str("").unwrap();
        assert!(config.filter_sets.is_empty());
    }

    #[test]
    fn test_validation_rejects_duplicates_and_blank_names() {
        let mut config = ChainConfig::default();
        config.filter_sets.push(FilterSetConfig::new("trace"));
        config.filter_sets.push(FilterSetConfig::new("trace"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let blank = ChainConfig {
            filter_sets: vec![FilterSetConfig::new("  ")],
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_append_extra_skips_listed_sets() {
        let mut config = ChainConfig::from_toml_str(SAMPLE).unwrap();
        config.append_extra("trace, logstats,,");
        let names: Vec<&str> = config.filter_sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["stats_calls", "trace", "logstats"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ChainConfig::load(file.path()).unwrap();
        assert_eq!(config.filter_sets.len(), 2);
    }

    #[test]
    fn test_bad_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[filterset]]\nname = ").unwrap();
        assert!(matches!(ChainConfig::load(file.path()), Err(Error::Toml(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChainConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
