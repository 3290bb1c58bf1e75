//! In-process window system
//!
//! Hands out counter-allocated handles and keeps per-thread current bindings,
//! with the same threading rules as the native protocols. Used by tests and by
//! offline tooling that has no display to talk to.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use glscope_shared::{ContextHandle, DisplayHandle, DrawableHandle};

use super::{Backend, ContextCreateInfo, MakeCurrentArgs, WindowSystem};
use crate::sync::lock;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BOUND: RefCell<HashMap<u64, MakeCurrentArgs>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy)]
struct HeadlessContext {
    display: Option<DisplayHandle>,
    share: Option<ContextHandle>,
}

#[derive(Debug)]
pub struct HeadlessWindowSystem {
    id: u64,
    backend: Backend,
    next_handle: AtomicUsize,
    contexts: Mutex<HashMap<ContextHandle, HeadlessContext>>,
    fail_make_current: AtomicBool,
}

impl Default for HeadlessWindowSystem {
    fn default() -> Self {
        Self::new(Backend::compiled())
    }
}

impl HeadlessWindowSystem {
    pub fn new(backend: Backend) -> Self {
        Self {
            id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            backend,
            next_handle: AtomicUsize::new(0x1000),
            contexts: Mutex::new(HashMap::new()),
            fail_make_current: AtomicBool::new(false),
        }
    }

    fn allocate(&self) -> usize {
        self.next_handle.fetch_add(0x10, Ordering::Relaxed)
    }

    pub fn open_display(&self) -> Option<DisplayHandle> {
        DisplayHandle::from_raw(self.allocate())
    }

    pub fn create_drawable(&self) -> Option<DrawableHandle> {
        DrawableHandle::from_raw(self.allocate())
    }

    /// Create a context, optionally sharing objects with `share`.
    pub fn create_context(
        &self,
        display: Option<DisplayHandle>,
        share: Option<ContextHandle>,
    ) -> Option<ContextHandle> {
        let mut contexts = lock(&self.contexts);
        if share.is_some_and(|s| !contexts.contains_key(&s)) {
            return None;
        }
        let context = ContextHandle::from_raw(self.allocate())?;
        contexts.insert(context, HeadlessContext { display, share });
        Some(context)
    }

    pub fn share_of(&self, context: ContextHandle) -> Option<ContextHandle> {
        lock(&self.contexts).get(&context).and_then(|c| c.share)
    }

    pub fn context_exists(&self, context: ContextHandle) -> bool {
        lock(&self.contexts).contains_key(&context)
    }

    /// Make every subsequent `make_current` fail, as a lost display would.
    pub fn set_fail_make_current(&self, fail: bool) {
        self.fail_make_current.store(fail, Ordering::Relaxed);
    }

    fn bound(&self) -> Option<MakeCurrentArgs> {
        BOUND.with(|b| b.borrow().get(&self.id).copied())
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn current_display(&self) -> Option<DisplayHandle> {
        self.bound().and_then(|b| b.display)
    }

    fn current_context(&self) -> Option<ContextHandle> {
        self.bound().and_then(|b| b.context)
    }

    fn current_drawable(&self) -> Option<DrawableHandle> {
        self.bound().and_then(|b| b.draw)
    }

    fn current_read_drawable(&self) -> Option<DrawableHandle> {
        self.bound().and_then(|b| b.read)
    }

    fn make_current(&self, args: &MakeCurrentArgs) -> bool {
        if self.fail_make_current.load(Ordering::Relaxed) {
            return false;
        }
        if let Some(context) = args.context {
            if !self.context_exists(context) {
                return false;
            }
        }
        BOUND.with(|b| {
            let mut b = b.borrow_mut();
            if args.context.is_some() {
                b.insert(self.id, *args);
            } else {
                b.remove(&self.id);
            }
        });
        true
    }

    fn create_context_like(
        &self,
        template: &ContextCreateInfo,
        share: Option<ContextHandle>,
    ) -> Option<ContextHandle> {
        let display = lock(&self.contexts)
            .get(&template.context)?
            .display
            .or(template.display);
        self.create_context(display, share)
    }

    fn destroy_context(&self, _display: Option<DisplayHandle>, context: ContextHandle) {
        lock(&self.contexts).remove(&context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_are_per_thread() {
        let ws = HeadlessWindowSystem::new(Backend::Glx);
        let dpy = ws.open_display();
        let a = ws.create_context(dpy, None).unwrap();
        let b = ws.create_context(dpy, None).unwrap();
        assert_ne!(a, b);

        std::thread::scope(|s| {
            for ctx in [a, b] {
                let ws = &ws;
                s.spawn(move || {
                    let draw = ws.create_drawable();
                    assert!(ws.make_current(&MakeCurrentArgs {
                        display: dpy,
                        draw,
                        read: draw,
                        context: Some(ctx),
                    }));
                    assert_eq!(ws.current_context(), Some(ctx));
                });
            }
        });
        assert!(ws.current_context().is_none());
    }

    #[test]
    fn test_unknown_context_and_forced_failure() {
        let ws = HeadlessWindowSystem::new(Backend::Egl);
        let bogus = ContextHandle::from_raw(0xdead).unwrap();
        assert!(!ws.make_current(&MakeCurrentArgs {
            context: Some(bogus),
            ..Default::default()
        }));
        assert!(ws.create_context(None, Some(bogus)).is_none());

        let ctx = ws.create_context(None, None).unwrap();
        ws.set_fail_make_current(true);
        assert!(!ws.make_current(&MakeCurrentArgs {
            context: Some(ctx),
            ..Default::default()
        }));
    }
}
