//! Error types for the interception core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown filter-set: {0}")]
    UnknownFilterSet(String),

    #[error("filter-set {0} is already registered")]
    DuplicateFilterSet(String),

    #[error("filter-set {filter_set} depends on {dependency}, which is not registered")]
    MissingDependency {
        filter_set: String,
        dependency: String,
    },

    #[error("filter-set ordering has a cycle involving: {}", involved.join(", "))]
    OrderingCycle { involved: Vec<String> },

    #[error("filter-set {filter_set} failed to initialise: {source:#}")]
    InitFailed {
        filter_set: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("signal {0} already exists")]
    DuplicateSignal(String),

    #[error("filter-set {filter_set} has no variable {variable}")]
    UnknownVariable {
        filter_set: String,
        variable: String,
    },

    #[error("invalid value {value:?} for {filter_set}.{variable}: {reason}")]
    InvalidVariable {
        filter_set: String,
        variable: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Report a broken internal invariant.
///
/// Panics in debug builds. Release builds log the violation at `error` and
/// evaluate to `()`, leaving the caller to return its contained fallback.
#[macro_export]
macro_rules! invariant_violation {
    ($($arg:tt)+) => {{
        if cfg!(debug_assertions) {
            panic!($($arg)+);
        } else {
            $crate::__tracing::error!("invariant violated: {}", format_args!($($arg)+));
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_sets() {
        let err = Error::OrderingCycle {
            involved: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "filter-set ordering has a cycle involving: a, b");
    }

    #[test]
    fn test_init_failed_keeps_source() {
        let err = Error::InitFailed {
            filter_set: "trace".into(),
            source: anyhow::anyhow!("no log file"),
        };
        assert!(err.to_string().contains("no log file"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double free")]
    fn test_invariant_violation_panics_in_debug() {
        invariant_violation!("double free of object {}", 3);
    }
}
