//! Window system backed by the real windowing entry points
//!
//! Calls go straight to the real functions bound in the [`FunctionTable`],
//! skipping the filter pipeline, so the core links against no windowing
//! library itself.

use std::fmt;
use std::sync::Arc;

use glscope_shared::{
    CallRecord, ContextHandle, DisplayHandle, DrawableHandle, FunctionTable, Value,
};
use tracing::debug;

use super::{egl, glx, wgl, Backend, ContextCreateInfo, MakeCurrentArgs, WindowSystem};

pub struct NativeWindowSystem {
    backend: Backend,
    functions: Arc<FunctionTable>,
}

impl NativeWindowSystem {
    pub fn new(backend: Backend, functions: Arc<FunctionTable>) -> Self {
        Self { backend, functions }
    }

    /// Invoke the real `name`. `None` if it is missing, unbound, or given the
    /// wrong number of arguments.
    pub(crate) fn invoke(&self, name: &str, args: Vec<Value>) -> Option<Value> {
        let id = self.functions.lookup(name)?;
        let descriptor = self.functions.descriptor(id)?;
        if descriptor.arg_count != args.len() {
            debug!(function = name, expected = descriptor.arg_count, got = args.len(), "argument count mismatch");
            return None;
        }
        let real = self.functions.entry(id)?;
        let mut call = CallRecord::new(descriptor, args);
        real(&mut call);
        Some(call.ret)
    }

    pub(crate) fn invoke_pointer(&self, name: &str, args: Vec<Value>) -> Option<usize> {
        self.invoke(name, args)?.as_pointer()
    }
}

impl WindowSystem for NativeWindowSystem {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn current_display(&self) -> Option<DisplayHandle> {
        match self.backend {
            Backend::Glx => glx::current_display(self),
            Backend::Wgl => wgl::current_display(self),
            Backend::Egl => egl::current_display(self),
        }
    }

    fn current_context(&self) -> Option<ContextHandle> {
        match self.backend {
            Backend::Glx => glx::current_context(self),
            Backend::Wgl => wgl::current_context(self),
            Backend::Egl => egl::current_context(self),
        }
    }

    fn current_drawable(&self) -> Option<DrawableHandle> {
        match self.backend {
            Backend::Glx => glx::current_drawable(self),
            Backend::Wgl => wgl::current_drawable(self),
            Backend::Egl => egl::current_drawable(self),
        }
    }

    fn current_read_drawable(&self) -> Option<DrawableHandle> {
        match self.backend {
            Backend::Glx => glx::current_read_drawable(self),
            Backend::Wgl => wgl::current_read_drawable(self),
            Backend::Egl => egl::current_read_drawable(self),
        }
    }

    fn make_current(&self, args: &MakeCurrentArgs) -> bool {
        match self.backend {
            Backend::Glx => glx::make_current(self, args),
            Backend::Wgl => wgl::make_current(self, args),
            Backend::Egl => egl::make_current(self, args),
        }
    }

    fn create_context_like(
        &self,
        template: &ContextCreateInfo,
        share: Option<ContextHandle>,
    ) -> Option<ContextHandle> {
        match self.backend {
            Backend::Glx => glx::create_context_like(self, template, share),
            Backend::Wgl => wgl::create_context_like(self, template, share),
            Backend::Egl => egl::create_context_like(self, template, share),
        }
    }

    fn destroy_context(&self, display: Option<DisplayHandle>, context: ContextHandle) {
        match self.backend {
            Backend::Glx => glx::destroy_context(self, display, context),
            Backend::Wgl => wgl::destroy_context(self, display, context),
            Backend::Egl => egl::destroy_context(self, display, context),
        }
    }
}

impl fmt::Debug for NativeWindowSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeWindowSystem")
            .field("backend", &self.backend)
            .field("functions", &self.functions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_invokes_bound_entry_points() {
        let table = Arc::new(
            FunctionTable::from_names(&[
                ("glXGetCurrentContext", 0, 0),
                ("glXMakeCurrent", 1, 3),
                ("glXGetCurrentDisplay", 2, 0),
            ])
            .unwrap(),
        );
        let bound = Arc::new(AtomicUsize::new(0));
        let b = bound.clone();
        table.bind_by_name(
            "glXGetCurrentContext",
            Arc::new(move |call: &mut CallRecord| {
                call.ret = Value::Pointer(b.load(Ordering::SeqCst));
            }),
        )
        .unwrap();
        let b = bound.clone();
        table.bind_by_name(
            "glXMakeCurrent",
            Arc::new(move |call: &mut CallRecord| {
                b.store(call.arg(2).as_pointer().unwrap_or(0), Ordering::SeqCst);
                call.ret = Value::Bool(true);
            }),
        )
        .unwrap();

        let ws = NativeWindowSystem::new(Backend::Glx, table);
        assert!(ws.current_context().is_none());

        let ctx = ContextHandle::from_raw(0x40);
        let draw = DrawableHandle::from_raw(0x50);
        assert!(ws.make_current(&MakeCurrentArgs {
            display: DisplayHandle::from_raw(0x10),
            draw,
            read: draw,
            context: ctx,
        }));
        assert_eq!(ws.current_context(), ctx);
        // Unbound entry point reads as "nothing current"
        assert!(ws.current_display().is_none());
    }

    #[test]
    fn test_missing_entry_point_fails_softly() {
        let ws = NativeWindowSystem::new(Backend::Egl, Arc::new(FunctionTable::empty()));
        assert!(!ws.make_current(&MakeCurrentArgs::default()));
        assert!(ws.current_drawable().is_none());
    }
}
