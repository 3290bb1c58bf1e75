//! Shared types and utilities for glscope
//!
//! This crate contains the data structures exchanged between the marshaling
//! layer, the dispatch core and filter-set implementations: the generic call
//! record, argument values, the pre-built function table and the opaque
//! native windowing handles.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{call::*, function::*, handles::*};
