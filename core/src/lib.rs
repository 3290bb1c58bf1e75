//! Interception core for glscope
//!
//! This crate provides the object tracking engine, the filter pipeline, the
//! dispatch core, statistics signals and the trackers (contexts and threads,
//! GL object names, display lists, begin/end state) that filter-sets build on.
//!
//! The window-system backend is chosen at build time with exactly one of the
//! `glx` (default), `wgl` or `egl` features. Because `glx` is a default
//! feature, select another backend together with `--no-default-features`,
//! for example `cargo build -p glscope-cli --no-default-features --features egl`.

pub mod config;
pub mod die;
pub mod dispatch;
pub mod error;
pub mod glwin;
pub mod interceptor;
pub mod objects;
pub mod pipeline;
pub mod stats;
pub mod trackbeginend;
pub mod trackcontext;
pub mod trackobjects;

mod sync;

#[cfg(any(
    all(feature = "glx", feature = "wgl"),
    all(feature = "glx", feature = "egl"),
    all(feature = "wgl", feature = "egl"),
))]
compile_error!("exactly one of the features `glx`, `wgl` and `egl` may be enabled");

#[cfg(not(any(feature = "glx", feature = "wgl", feature = "egl")))]
compile_error!("one of the features `glx`, `wgl` or `egl` must be enabled");

#[doc(hidden)]
pub use tracing as __tracing;

// Re-export commonly used types
pub use config::{ChainConfig, FilterSetConfig};
pub use dispatch::Outcome;
pub use error::{Error, Result};
pub use glwin::{Backend, HeadlessWindowSystem, NativeWindowSystem, WindowSystem};
pub use interceptor::{Interceptor, InterceptorBuilder, Services};
pub use objects::{ClassId, Object, ObjectKey, ObjectRegistry, ViewToken};
pub use pipeline::{
    CallbackData, FilterSetInfo, FilterSetSetup, FilterSetState, Phase, VariableInfo, VariableKind,
};
pub use stats::{Signal, SignalRegistry, SignalSnapshot};
pub use trackbeginend::BeginEndTracker;
pub use trackcontext::{ContextState, ContextTracker};
pub use trackobjects::{DisplayListInfo, ResourceKind, ResourceTracker, TrackedResource};
