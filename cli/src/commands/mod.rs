//! Subcommand implementations

pub mod check;
pub mod filters;

use std::sync::Arc;

use anyhow::{Context, Result};
use glscope_core::{HeadlessWindowSystem, Interceptor};
use glscope_shared::FunctionTable;

/// An interceptor with every built-in filter-set registered, over an empty
/// function table and the headless window system.
pub fn offline_interceptor() -> Result<Arc<Interceptor>> {
    let builder = Interceptor::builder(Arc::new(FunctionTable::empty()))
        .window_system(Arc::new(HeadlessWindowSystem::default()));
    glscope_filters::register_builtin(builder)
        .build()
        .context("Failed to build interceptor")
}
