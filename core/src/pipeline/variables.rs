//! Filter-set variables
//!
//! Each filter-set declares the variables it understands. Values arrive as
//! text (from a chain config or the command line), are parsed against the
//! declared kind when set, and are read back with typed getters during init.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Bool,
    Int,
    UInt,
    /// Strictly greater than zero
    PositiveInt,
    Float,
    String,
}

impl VariableKind {
    pub fn parse(self, text: &str) -> Result<VariableValue, String> {
        let text = text.trim();
        match self {
            VariableKind::Bool => match text.to_lowercase().as_str() {
                "1" | "yes" | "true" | "on" => Ok(VariableValue::Bool(true)),
                "0" | "no" | "false" | "off" => Ok(VariableValue::Bool(false)),
                _ => Err("expected a boolean (yes/no, true/false, on/off, 1/0)".to_string()),
            },
            VariableKind::Int => text
                .parse()
                .map(VariableValue::Int)
                .map_err(|_| "expected an integer".to_string()),
            VariableKind::UInt => text
                .parse()
                .map(VariableValue::UInt)
                .map_err(|_| "expected a non-negative integer".to_string()),
            VariableKind::PositiveInt => match text.parse::<u64>() {
                Ok(0) | Err(_) => Err("expected a positive integer".to_string()),
                Ok(v) => Ok(VariableValue::UInt(v)),
            },
            VariableKind::Float => text
                .parse()
                .map(VariableValue::Float)
                .map_err(|_| "expected a number".to_string()),
            VariableKind::String => Ok(VariableValue::String(text.to_string())),
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableKind::Bool => "bool",
            VariableKind::Int => "int",
            VariableKind::UInt => "uint",
            VariableKind::PositiveInt => "positive int",
            VariableKind::Float => "float",
            VariableKind::String => "string",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Bool(v) => write!(f, "{v}"),
            VariableValue::Int(v) => write!(f, "{v}"),
            VariableValue::UInt(v) => write!(f, "{v}"),
            VariableValue::Float(v) => write!(f, "{v}"),
            VariableValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// Declaration of one variable a filter-set accepts.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub help: String,
    pub kind: VariableKind,
}

impl VariableInfo {
    pub fn new(name: &str, kind: VariableKind, help: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind,
        }
    }
}

/// Parsed variable values for one filter-set.
#[derive(Debug, Clone, Default)]
pub struct FilterSetOptions {
    values: HashMap<String, VariableValue>,
}

impl FilterSetOptions {
    pub(crate) fn set(&mut self, name: &str, value: VariableValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.values.get(name)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(VariableValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn get_int(&self, name: &str, default: i64) -> i64 {
        match self.values.get(name) {
            Some(VariableValue::Int(v)) => *v,
            Some(VariableValue::UInt(v)) => i64::try_from(*v).unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_uint(&self, name: &str, default: u64) -> u64 {
        match self.values.get(name) {
            Some(VariableValue::UInt(v)) => *v,
            Some(VariableValue::Int(v)) => u64::try_from(*v).unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_float(&self, name: &str, default: f64) -> f64 {
        match self.values.get(name) {
            Some(VariableValue::Float(v)) => *v,
            Some(VariableValue::Int(v)) => *v as f64,
            Some(VariableValue::UInt(v)) => *v as f64,
            _ => default,
        }
    }

    pub fn get_str<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        match self.values.get(name) {
            Some(VariableValue::String(v)) => v,
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(VariableKind::Bool.parse("Yes"), Ok(VariableValue::Bool(true)));
        assert_eq!(VariableKind::Bool.parse("off"), Ok(VariableValue::Bool(false)));
        assert!(VariableKind::Bool.parse("maybe").is_err());
        assert_eq!(VariableKind::Int.parse("-4"), Ok(VariableValue::Int(-4)));
        assert!(VariableKind::UInt.parse("-4").is_err());
        assert!(VariableKind::PositiveInt.parse("0").is_err());
        assert_eq!(VariableKind::PositiveInt.parse(" 30 "), Ok(VariableValue::UInt(30)));
        assert_eq!(VariableKind::Float.parse("0.5"), Ok(VariableValue::Float(0.5)));
    }

    #[test]
    fn test_typed_getters_fall_back_to_default() {
        let mut opts = FilterSetOptions::default();
        opts.set("interval", VariableValue::UInt(10));
        opts.set("level", VariableValue::String("debug".into()));

        assert_eq!(opts.get_uint("interval", 1), 10);
        assert_eq!(opts.get_float("interval", 0.0), 10.0);
        assert_eq!(opts.get_str("level", "info"), "debug");
        assert_eq!(opts.get_str("format", "text"), "text");
        assert!(opts.get_bool("level", true));
    }
}
