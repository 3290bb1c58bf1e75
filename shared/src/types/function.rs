//! Function identifiers and the table of real entry points

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::types::call::CallRecord;

/// Dense index of an interceptable function, in `[0, table.len())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Aliases (`glFoo`, `glFooARB`) share a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub id: FunctionId,
    pub group: GroupId,
    pub name: String,
    pub arg_count: usize,
}

/// Invokes the real implementation, writing the result into `call.ret`.
pub type RealFn = Arc<dyn Fn(&mut CallRecord) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("function ids must be dense: expected {expected}, found {found}")]
    NonDense { expected: u32, found: u32 },

    #[error("function {0} declared twice")]
    DuplicateName(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),
}

/// Immutable list of interceptable functions plus their real entry points.
///
/// Descriptors are fixed at construction. Entry points are bound once,
/// typically when the loader resolves the real library.
pub struct FunctionTable {
    descriptors: Vec<FunctionDescriptor>,
    by_name: HashMap<String, FunctionId>,
    entries: Vec<OnceLock<RealFn>>,
}

impl FunctionTable {
    pub fn new(descriptors: Vec<FunctionDescriptor>) -> Result<Self, TableError> {
        let mut by_name = HashMap::with_capacity(descriptors.len());
        for (i, desc) in descriptors.iter().enumerate() {
            if desc.id.index() != i {
                return Err(TableError::NonDense {
                    expected: i as u32,
                    found: desc.id.0,
                });
            }
            if by_name.insert(desc.name.clone(), desc.id).is_some() {
                return Err(TableError::DuplicateName(desc.name.clone()));
            }
        }
        let entries = (0..descriptors.len()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            descriptors,
            by_name,
            entries,
        })
    }

    /// Build a table from `(name, group, arg_count)` triples, assigning ids in order.
    pub fn from_names(functions: &[(&str, u32, usize)]) -> Result<Self, TableError> {
        let descriptors = functions
            .iter()
            .enumerate()
            .map(|(i, (name, group, arg_count))| FunctionDescriptor {
                id: FunctionId(i as u32),
                group: GroupId(*group),
                name: (*name).to_string(),
                arg_count: *arg_count,
            })
            .collect();
        Self::new(descriptors)
    }

    /// An empty table, for tooling that only needs the filter graph
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
            by_name: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptor(&self, id: FunctionId) -> Option<&FunctionDescriptor> {
        self.descriptors.get(id.index())
    }

    pub fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: FunctionId) -> Option<&str> {
        self.descriptor(id).map(|d| d.name.as_str())
    }

    /// Bind the real entry point for `id`. Returns false if already bound or out of range.
    pub fn bind(&self, id: FunctionId, real: RealFn) -> bool {
        match self.entries.get(id.index()) {
            Some(slot) => slot.set(real).is_ok(),
            None => false,
        }
    }

    pub fn bind_by_name(&self, name: &str, real: RealFn) -> Result<bool, TableError> {
        let id = self
            .lookup(name)
            .ok_or_else(|| TableError::UnknownFunction(name.to_string()))?;
        Ok(self.bind(id, real))
    }

    /// The bound real entry point, if any.
    pub fn entry(&self, id: FunctionId) -> Option<&RealFn> {
        self.entries.get(id.index()).and_then(OnceLock::get)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.descriptors.iter()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self.entries.iter().filter(|e| e.get().is_some()).count();
        f.debug_struct("FunctionTable")
            .field("functions", &self.descriptors.len())
            .field("bound", &bound)
            .finish()
    }
}
