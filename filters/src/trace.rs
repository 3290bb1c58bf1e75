//! Call tracing
//!
//! Logs each completed call as `name(args) = ret`, or as a JSON object, at a
//! configurable level.

use std::str::FromStr;

use anyhow::Context;
use glscope_core::{FilterSetInfo, VariableInfo, VariableKind};
use glscope_shared::utils::time::system_time_nanos;
use glscope_shared::{CallRecord, GroupId, Value};
use serde::Serialize;
use tracing::Level;

pub const NAME: &str = "trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Text,
    Json,
}

impl FromStr for TraceFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(TraceFormat::Text),
            "json" => Ok(TraceFormat::Json),
            _ => anyhow::bail!("Invalid trace format: {}", s),
        }
    }
}

#[derive(Serialize)]
struct TraceLine<'a> {
    timestamp_ns: u64,
    function: &'a str,
    args: &'a [Value],
    ret: &'a Value,
}

/// Render one call in `format`.
pub fn format_call(function: &str, call: &CallRecord, format: TraceFormat) -> String {
    match format {
        TraceFormat::Text => {
            let args: Vec<String> = call.args.iter().map(ToString::to_string).collect();
            if call.ret.is_void() {
                format!("{function}({})", args.join(", "))
            } else {
                format!("{function}({}) = {}", args.join(", "), call.ret)
            }
        }
        TraceFormat::Json => {
            let line = TraceLine {
                timestamp_ns: system_time_nanos(),
                function,
                args: &call.args,
                ret: &call.ret,
            };
            serde_json::to_string(&line).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
        }
    }
}

fn emit(level: Level, line: &str) {
    match level {
        Level::TRACE => tracing::trace!(target: "glscope::trace", "{line}"),
        Level::DEBUG => tracing::debug!(target: "glscope::trace", "{line}"),
        Level::INFO => tracing::info!(target: "glscope::trace", "{line}"),
        Level::WARN => tracing::warn!(target: "glscope::trace", "{line}"),
        _ => tracing::error!(target: "glscope::trace", "{line}"),
    }
}

pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(NAME, "Logs every call with its arguments and result", |setup| {
        let options = setup.options();
        let level = Level::from_str(options.get_str("level", "debug"))
            .context("Invalid trace level")?;
        let format: TraceFormat = options.get_str("format", "text").parse()?;
        let group = u32::try_from(options.get_int("group", -1)).ok().map(GroupId);

        setup
            .filter_new("trace", true, move |call, data| {
                if group.is_some_and(|g| g != call.group()) {
                    return true;
                }
                let functions = &data.services().functions;
                let name = functions.name(call.function()).unwrap_or("?");
                emit(level, &format_call(name, call, format));
                true
            })
            .after_call();
        Ok(())
    })
    .variable(VariableInfo::new(
        "level",
        VariableKind::String,
        "log level: trace, debug, info or warn [debug]",
    ))
    .variable(VariableInfo::new(
        "format",
        VariableKind::String,
        "text or json [text]",
    ))
    .variable(VariableInfo::new(
        "group",
        VariableKind::Int,
        "only trace functions in this group [all]",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glscope_shared::FunctionTable;

    fn clear_call() -> CallRecord {
        let table = FunctionTable::from_names(&[("glClear", 0, 1)]).unwrap();
        let descriptor = table.descriptor(table.lookup("glClear").unwrap()).unwrap();
        CallRecord::new(descriptor, vec![Value::Enum(0x4000)])
    }

    #[test]
    fn test_text_format() {
        let call = clear_call();
        let text = format_call("glClear", &call, TraceFormat::Text);
        assert!(text.starts_with("glClear("));
        assert!(!text.contains('='));

        let mut with_ret = call.clone();
        with_ret.ret = Value::Bool(true);
        assert!(format_call("glClear", &with_ret, TraceFormat::Text).ends_with(" = GL_TRUE"));
    }

    #[test]
    fn test_json_format() {
        let call = clear_call();
        let json = format_call("glClear", &call, TraceFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["function"], "glClear");
        assert_eq!(parsed["args"].as_array().map(Vec::len), Some(1));
        assert!(parsed["timestamp_ns"].as_u64().is_some());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<TraceFormat>().unwrap(), TraceFormat::Json);
        assert!("yaml".parse::<TraceFormat>().is_err());
    }
}
