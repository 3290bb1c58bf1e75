//! Type definitions shared by the interception layer

pub mod call;
pub mod function;
pub mod handles;
