//! `glscope check`: validate a chain config against the built-in sets
//!
//! Applies the config to an offline interceptor (no real GL entry points)
//! and prints the pipeline order that would result.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use glscope_core::{ChainConfig, FilterSetConfig};
use tracing::debug;

use crate::output;

#[derive(Args)]
pub struct CheckArgs {
    /// Chain config file (defaults to $GLSCOPE_CONFIG or ~/.glscope/chain.toml)
    pub config: Option<PathBuf>,

    /// Override a variable, as set.variable=value
    #[arg(long = "set", value_name = "SET.VAR=VALUE")]
    pub overrides: Vec<String>,
}

/// Split `set.variable=value`.
fn parse_override(text: &str) -> Result<(&str, &str, &str)> {
    let (target, value) = text
        .split_once('=')
        .with_context(|| format!("Override {text} is missing '='"))?;
    let (set, variable) = target
        .split_once('.')
        .with_context(|| format!("Override {text} is missing a set name"))?;
    Ok((set.trim(), variable.trim(), value))
}

fn apply_overrides(config: &mut ChainConfig, overrides: &[String]) -> Result<()> {
    for text in overrides {
        let (set, variable, value) = parse_override(text)?;
        let index = match config.filter_sets.iter().position(|s| s.name == set) {
            Some(index) => index,
            None => {
                config.filter_sets.push(FilterSetConfig::new(set));
                config.filter_sets.len() - 1
            }
        };
        config.filter_sets[index]
            .variables
            .insert(variable.to_string(), toml::Value::String(value.to_string()));
    }
    Ok(())
}

pub fn run(args: CheckArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ChainConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ChainConfig::load_default().context("Failed to load default chain config")?,
    };
    apply_overrides(&mut config, &args.overrides)?;
    debug!(sets = config.filter_sets.len(), "loaded chain config");

    let interceptor = super::offline_interceptor()?;
    if let Err(e) = interceptor.apply_config(&config) {
        output::error(&format!("{e:#}"));
        return Err(e);
    }

    output::success("Chain config is valid");
    output::heading("Pipeline order:");
    for (i, name) in interceptor.pipeline_order().iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_override() {
        let (set, var, value) = parse_override("logstats.interval=10").unwrap();
        assert_eq!((set, var, value), ("logstats", "interval", "10"));
        assert!(parse_override("logstats.interval").is_err());
        assert!(parse_override("interval=10").is_err());
    }

    #[test]
    fn test_overrides_add_missing_sets() {
        let mut config = ChainConfig::from_toml_str("[[filterset]]\nname = \"trace\"\n").unwrap();
        apply_overrides(
            &mut config,
            &["trace.level=info".to_string(), "logstats.interval=5".to_string()],
        )
        .unwrap();
        assert_eq!(config.filter_sets.len(), 2);
        assert_eq!(
            config.filter_sets[0].variables["level"],
            toml::Value::String("info".to_string())
        );
        assert_eq!(config.filter_sets[1].name, "logstats");
    }
}
