//! The generic call record built by the marshaling layer
//!
//! Every intercepted API call is packed into a [`CallRecord`] before it enters
//! the dispatch core. The function identity is fixed at construction; the
//! argument and return slots are mutable so filters can rewrite them.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::types::function::{FunctionDescriptor, FunctionId, GroupId};

/// A single argument or return value.
///
/// Pointers are carried as plain addresses; the interception layer never
/// dereferences them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// A `GLenum` or other enumerant
    Enum(u32),
    Float(f32),
    Double(f64),
    Pointer(usize),
}

impl Value {
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Integral view of the value. Floats are not converted.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Bool(b) => Some(b as u64),
            Value::Int(v) => u64::try_from(v).ok(),
            Value::UInt(v) => Some(v),
            Value::Enum(v) => Some(v as u64),
            Value::Pointer(p) => Some(p as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(b as i64),
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::Enum(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            Value::Int(v) => Some(v as f64),
            Value::UInt(v) => Some(v as f64),
            _ => None,
        }
    }

    /// Address carried by a pointer or handle-typed integer slot.
    pub fn as_pointer(&self) -> Option<usize> {
        match *self {
            Value::Pointer(p) => Some(p),
            Value::UInt(v) => usize::try_from(v).ok(),
            Value::Int(v) => usize::try_from(v).ok(),
            _ => None,
        }
    }

    /// C truthiness: non-zero integers, pointers and `true`.
    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::Void => false,
            Value::Bool(b) => b,
            Value::Float(v) => v != 0.0,
            Value::Double(v) => v != 0.0,
            _ => self.as_u64().map_or(true, |v| v != 0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", if *b { "GL_TRUE" } else { "GL_FALSE" }),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Enum(v) => write!(f, "{v:#06x}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Pointer(0) => write!(f, "NULL"),
            Value::Pointer(p) => write!(f, "{p:#x}"),
        }
    }
}

/// Opaque data the marshaling layer may attach to a call.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Generic record of one intercepted call.
#[derive(Clone)]
pub struct CallRecord {
    function: FunctionId,
    group: GroupId,
    /// Argument slots, in declaration order
    pub args: Vec<Value>,
    /// Return-value slot; `Value::Void` until the real function runs
    pub ret: Value,
    /// Opaque per-call data owned by the marshaling layer
    pub user_data: Option<UserData>,
}

impl CallRecord {
    /// Build a record for `descriptor` with the packed arguments.
    ///
    /// The argument count must match the descriptor; a mismatch is a defect
    /// in the marshaling layer.
    pub fn new(descriptor: &FunctionDescriptor, args: Vec<Value>) -> Self {
        assert_eq!(
            args.len(),
            descriptor.arg_count,
            "{} takes {} arguments",
            descriptor.name,
            descriptor.arg_count
        );
        Self {
            function: descriptor.id,
            group: descriptor.group,
            args,
            ret: Value::Void,
            user_data: None,
        }
    }

    /// Attach opaque per-call data
    pub fn with_user_data(mut self, data: UserData) -> Self {
        self.user_data = Some(data);
        self
    }

    pub fn function(&self) -> FunctionId {
        self.function
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Argument at `index`, or `Value::Void` if out of range.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).copied().unwrap_or_default()
    }

    /// Replace the argument at `index`. Returns false if out of range.
    pub fn set_arg(&mut self, index: usize, value: Value) -> bool {
        match self.args.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRecord")
            .field("function", &self.function)
            .field("group", &self.group)
            .field("args", &self.args)
            .field("ret", &self.ret)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> FunctionDescriptor {
        FunctionDescriptor {
            id: FunctionId(3),
            group: GroupId(1),
            name: "glBindTexture".to_string(),
            arg_count: 2,
        }
    }

    #[test]
    fn test_record_identity_and_slots() {
        let mut call = CallRecord::new(&descriptor(), vec![Value::Enum(0x0de1), Value::UInt(7)]);
        assert_eq!(call.function(), FunctionId(3));
        assert_eq!(call.group(), GroupId(1));
        assert!(call.ret.is_void());

        assert!(call.set_arg(1, Value::UInt(9)));
        assert!(!call.set_arg(2, Value::UInt(9)));
        assert_eq!(call.arg(1), Value::UInt(9));
        assert_eq!(call.arg(5), Value::Void);
    }

    #[test]
    #[should_panic(expected = "takes 2 arguments")]
    fn test_wrong_arg_count_is_a_defect() {
        CallRecord::new(&descriptor(), vec![Value::Enum(0x0de1)]);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int(-1).as_u64(), None);
        assert_eq!(Value::Pointer(0x40).as_pointer(), Some(0x40));
        assert!(Value::Pointer(1).is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert_eq!(Value::Float(0.5).as_f64(), Some(0.5));
    }

    #[test]
    fn test_value_serializes_tagged() {
        let json = serde_json::to_string(&Value::Enum(0x1702)).unwrap();
        assert_eq!(json, r#"{"type":"enum","value":5890}"#);
    }
}
