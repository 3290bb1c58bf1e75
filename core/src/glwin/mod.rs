//! Windowing-system abstraction
//!
//! Exactly one of GLX, WGL or EGL is active per build. This module knows which
//! entry points of that protocol create, bind, destroy and swap contexts, how
//! to read the native handles out of an intercepted call, and defines the
//! [`WindowSystem`] seam through which the context tracker queries and drives
//! the real windowing layer.

mod egl;
mod glx;
pub mod headless;
pub mod native;
mod wgl;

use glscope_shared::{
    CallRecord, ConfigHandle, ContextHandle, DisplayHandle, DrawableHandle, Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use headless::HeadlessWindowSystem;
pub use native::NativeWindowSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Glx,
    Wgl,
    Egl,
}

impl Backend {
    /// The backend selected by cargo feature for this build.
    pub const fn compiled() -> Backend {
        if cfg!(feature = "egl") {
            Backend::Egl
        } else if cfg!(feature = "wgl") {
            Backend::Wgl
        } else {
            Backend::Glx
        }
    }

    pub fn create_functions(self) -> &'static [&'static str] {
        match self {
            Backend::Glx => glx::CREATE,
            Backend::Wgl => wgl::CREATE,
            Backend::Egl => egl::CREATE,
        }
    }

    pub fn make_current_functions(self) -> &'static [&'static str] {
        match self {
            Backend::Glx => glx::MAKE_CURRENT,
            Backend::Wgl => wgl::MAKE_CURRENT,
            Backend::Egl => egl::MAKE_CURRENT,
        }
    }

    pub fn destroy_functions(self) -> &'static [&'static str] {
        match self {
            Backend::Glx => glx::DESTROY,
            Backend::Wgl => wgl::DESTROY,
            Backend::Egl => egl::DESTROY,
        }
    }

    pub fn swap_functions(self) -> &'static [&'static str] {
        match self {
            Backend::Glx => glx::SWAP,
            Backend::Wgl => wgl::SWAP,
            Backend::Egl => egl::SWAP,
        }
    }

    /// Decode a completed context-creation call. Returns `None` if `function`
    /// is not a creation entry point or creation failed.
    pub fn decode_create(self, function: &str, call: &CallRecord) -> Option<ContextCreateInfo> {
        let context = ContextHandle::from_raw(call.ret.as_pointer()?)?;
        let layout = match self {
            Backend::Glx => glx::create_layout(function),
            Backend::Wgl => wgl::create_layout(function),
            Backend::Egl => egl::create_layout(function),
        }?;
        Some(ContextCreateInfo {
            function: function.to_string(),
            args: call.args.clone(),
            share_arg: layout.share,
            display: layout.display.and_then(|i| pointer(call, i)).and_then(DisplayHandle::from_raw),
            config: layout.config.and_then(|i| pointer(call, i)).and_then(ConfigHandle::from_raw),
            drawable: layout.drawable.and_then(|i| pointer(call, i)).and_then(DrawableHandle::from_raw),
            share: layout.share.and_then(|i| pointer(call, i)).and_then(ContextHandle::from_raw),
            context,
        })
    }

    /// Decode the arguments of a make-current call.
    pub fn decode_make_current(self, function: &str, call: &CallRecord) -> Option<MakeCurrentArgs> {
        let layout = match self {
            Backend::Glx => glx::make_current_layout(function),
            Backend::Wgl => wgl::make_current_layout(function),
            Backend::Egl => egl::make_current_layout(function),
        }?;
        Some(MakeCurrentArgs {
            display: layout.display.and_then(|i| pointer(call, i)).and_then(DisplayHandle::from_raw),
            draw: pointer(call, layout.draw).and_then(DrawableHandle::from_raw),
            read: pointer(call, layout.read).and_then(DrawableHandle::from_raw),
            context: pointer(call, layout.context).and_then(ContextHandle::from_raw),
        })
    }

    /// The context a destroy call names.
    pub fn decode_destroy(self, function: &str, call: &CallRecord) -> Option<ContextHandle> {
        let index = match self {
            Backend::Glx => glx::destroy_context_arg(function),
            Backend::Wgl => wgl::destroy_context_arg(function),
            Backend::Egl => egl::destroy_context_arg(function),
        }?;
        pointer(call, index).and_then(ContextHandle::from_raw)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Glx => "glx",
            Backend::Wgl => "wgl",
            Backend::Egl => "egl",
        })
    }
}

fn pointer(call: &CallRecord, index: usize) -> Option<usize> {
    call.args.get(index).and_then(Value::as_pointer)
}

/// Argument positions of a context-creation entry point.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CreateLayout {
    pub display: Option<usize>,
    pub config: Option<usize>,
    pub drawable: Option<usize>,
    pub share: Option<usize>,
}

/// Argument positions of a make-current entry point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MakeCurrentLayout {
    pub display: Option<usize>,
    pub draw: usize,
    pub read: usize,
    pub context: usize,
}

/// How a context was created, kept so a compatible one can be made later.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextCreateInfo {
    /// Name of the creating entry point
    pub function: String,
    /// Arguments of the creating call
    pub args: Vec<Value>,
    /// Position of the share-context argument, if the entry point takes one
    pub share_arg: Option<usize>,
    pub display: Option<DisplayHandle>,
    pub config: Option<ConfigHandle>,
    pub drawable: Option<DrawableHandle>,
    pub share: Option<ContextHandle>,
    pub context: ContextHandle,
}

/// Arguments of a make-current call. A `None` context unbinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MakeCurrentArgs {
    pub display: Option<DisplayHandle>,
    pub draw: Option<DrawableHandle>,
    pub read: Option<DrawableHandle>,
    pub context: Option<ContextHandle>,
}

/// The real windowing layer, as seen by the context tracker.
///
/// Queries are always live: the application may switch contexts outside any
/// interception point, so implementations never answer from a cache of
/// intercepted calls.
pub trait WindowSystem: Send + Sync {
    fn backend(&self) -> Backend;

    fn current_display(&self) -> Option<DisplayHandle>;

    fn current_context(&self) -> Option<ContextHandle>;

    fn current_drawable(&self) -> Option<DrawableHandle>;

    fn current_read_drawable(&self) -> Option<DrawableHandle>;

    /// Bind (or, with no context, unbind) on the calling thread.
    fn make_current(&self, args: &MakeCurrentArgs) -> bool;

    /// Create a context with the same configuration as `template`, sharing
    /// objects with `share` if given.
    fn create_context_like(
        &self,
        template: &ContextCreateInfo,
        share: Option<ContextHandle>,
    ) -> Option<ContextHandle>;

    fn destroy_context(&self, display: Option<DisplayHandle>, context: ContextHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use glscope_shared::FunctionTable;

    fn record(table: &FunctionTable, name: &str, args: Vec<Value>, ret: Value) -> CallRecord {
        let id = table.lookup(name).unwrap();
        let mut call = CallRecord::new(table.descriptor(id).unwrap(), args);
        call.ret = ret;
        call
    }

    #[test]
    fn test_glx_decoders() {
        let table = FunctionTable::from_names(&[
            ("glXCreateNewContext", 0, 5),
            ("glXMakeCurrent", 1, 3),
            ("glXMakeContextCurrent", 2, 4),
            ("glXDestroyContext", 3, 2),
        ])
        .unwrap();
        let p = Value::Pointer;

        let create = record(
            &table,
            "glXCreateNewContext",
            vec![p(0x10), p(0x20), Value::Int(0x8014), p(0x30), Value::Bool(true)],
            p(0x40),
        );
        let info = Backend::Glx.decode_create("glXCreateNewContext", &create).unwrap();
        assert_eq!(info.display.map(|d| d.as_raw()), Some(0x10));
        assert_eq!(info.config.map(|c| c.as_raw()), Some(0x20));
        assert_eq!(info.share.map(|c| c.as_raw()), Some(0x30));
        assert_eq!(info.context.as_raw(), 0x40);
        assert_eq!(info.share_arg, Some(3));

        let failed = record(
            &table,
            "glXCreateNewContext",
            vec![p(0x10), p(0x20), Value::Int(0x8014), p(0), Value::Bool(true)],
            p(0),
        );
        assert!(Backend::Glx.decode_create("glXCreateNewContext", &failed).is_none());

        let bind = record(&table, "glXMakeCurrent", vec![p(0x10), p(0x50), p(0x40)], Value::Bool(true));
        let args = Backend::Glx.decode_make_current("glXMakeCurrent", &bind).unwrap();
        assert_eq!(args.draw, args.read);
        assert_eq!(args.context.map(|c| c.as_raw()), Some(0x40));

        let bind2 = record(
            &table,
            "glXMakeContextCurrent",
            vec![p(0x10), p(0x50), p(0x60), p(0)],
            Value::Bool(true),
        );
        let args = Backend::Glx.decode_make_current("glXMakeContextCurrent", &bind2).unwrap();
        assert_eq!(args.read.map(|d| d.as_raw()), Some(0x60));
        assert!(args.context.is_none());

        let destroy = record(&table, "glXDestroyContext", vec![p(0x10), p(0x40)], Value::Void);
        assert_eq!(
            Backend::Glx.decode_destroy("glXDestroyContext", &destroy).map(|c| c.as_raw()),
            Some(0x40)
        );
        assert!(Backend::Egl.decode_destroy("glXDestroyContext", &destroy).is_none());
    }

    #[test]
    fn test_wgl_display_is_the_device_context() {
        let table = FunctionTable::from_names(&[("wglMakeCurrent", 0, 2)]).unwrap();
        let call = record(
            &table,
            "wglMakeCurrent",
            vec![Value::Pointer(0x77), Value::Pointer(0x88)],
            Value::Bool(true),
        );
        let args = Backend::Wgl.decode_make_current("wglMakeCurrent", &call).unwrap();
        assert_eq!(args.display.map(|d| d.as_raw()), Some(0x77));
        assert_eq!(args.draw.map(|d| d.as_raw()), Some(0x77));
        assert_eq!(args.context.map(|c| c.as_raw()), Some(0x88));
    }

    #[test]
    fn test_function_lists_are_disjoint() {
        for backend in [Backend::Glx, Backend::Wgl, Backend::Egl] {
            for name in backend.create_functions() {
                assert!(!backend.make_current_functions().contains(name));
                assert!(!backend.destroy_functions().contains(name));
            }
        }
    }

    #[test]
    fn test_compiled_backend_follows_features() {
        let expected = if cfg!(feature = "egl") {
            Backend::Egl
        } else if cfg!(feature = "wgl") {
            Backend::Wgl
        } else {
            Backend::Glx
        };
        assert_eq!(Backend::compiled(), expected);
    }
}
