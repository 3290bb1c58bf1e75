//! Built-in filter-sets for glscope
//!
//! - `stats_calls`: per-function and total call counters
//! - `stats_calltimes`: per-function and total time spent in calls
//! - `trace`: logs every call with its arguments and return value
//! - `logstats`: periodically logs how the signals moved

pub mod logstats;
pub mod stats_calls;
pub mod stats_calltimes;
pub mod trace;

use glscope_core::{FilterSetInfo, InterceptorBuilder};

/// Every built-in filter-set, in registration order.
pub fn builtin() -> Vec<FilterSetInfo> {
    vec![
        stats_calls::filter_set(),
        stats_calltimes::filter_set(),
        trace::filter_set(),
        logstats::filter_set(),
    ]
}

/// Register the built-in filter-sets with `builder`.
pub fn register_builtin(builder: InterceptorBuilder) -> InterceptorBuilder {
    builtin()
        .into_iter()
        .fold(builder, |builder, info| builder.filter_set(info))
}
