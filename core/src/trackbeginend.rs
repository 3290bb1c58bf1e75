//! glBegin/glEnd tracking
//!
//! Most GL calls are illegal between `glBegin` and `glEnd`, including
//! `glGetError`, so filter-sets that issue their own calls check here first.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::objects::{ObjectRegistry, ViewToken};
use crate::pipeline::FilterSetInfo;
use crate::trackcontext::{ContextTracker, TRACKCONTEXT};

pub const TRACKBEGINEND: &str = "trackbeginend";

/// Highest primitive mode `glBegin` accepts (`GL_TRIANGLE_STRIP_ADJACENCY`)
const MAX_PRIMITIVE_MODE: u64 = 0x000D;

pub struct BeginEndTracker {
    contexts: Arc<ContextTracker>,
    view: ViewToken,
}

impl BeginEndTracker {
    /// Register the per-context flag. Must run before any context object
    /// exists.
    pub fn new(objects: &ObjectRegistry, contexts: Arc<ContextTracker>) -> Self {
        let view = objects.view_new(contexts.context_class(), None, None, 1);
        Self {
            contexts,
            view,
        }
    }

    /// Whether the calling thread may be inside a `glBegin`/`glEnd` pair.
    /// Errs on the side of true when no tracked context is current.
    pub fn in_begin_end(&self) -> bool {
        self.contexts
            .current_context_object()
            .and_then(|ctx| ctx.with_view(self.view, |flag| flag[0] != 0))
            .unwrap_or(true)
    }

    /// `glBegin(mode)` ran. Invalid modes leave the flag alone, since the
    /// call failed without entering a primitive.
    pub fn observe_begin(&self, mode: u64) {
        if mode <= MAX_PRIMITIVE_MODE {
            self.set(true);
        } else {
            trace!(mode, "glBegin with invalid mode");
        }
    }

    pub fn observe_end(&self) {
        self.set(false);
    }

    fn set(&self, inside: bool) {
        if let Some(ctx) = self.contexts.current_context_object() {
            ctx.with_view(self.view, |flag| flag[0] = u8::from(inside));
        }
    }
}

impl fmt::Debug for BeginEndTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeginEndTracker")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(
        TRACKBEGINEND,
        "Tracks whether each context is between glBegin and glEnd",
        |setup| {
            setup
                .filter_new("trackbeginend", false, |call, data| {
                    let services = data.services();
                    match services.functions.name(call.function()) {
                        Some("glBegin") => {
                            if let Some(mode) = call.arg(0).as_u64() {
                                services.begin_end.observe_begin(mode);
                            }
                        }
                        Some("glEnd") => services.begin_end.observe_end(),
                        _ => {}
                    }
                    true
                })
                .after_call()
                .run_when_inactive();
            setup.catches_name(&["glBegin", "glEnd"]);
            Ok(())
        },
    )
    .depends(TRACKCONTEXT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glwin::{Backend, HeadlessWindowSystem};

    #[test]
    fn test_flag_follows_begin_and_end() {
        let ws = Arc::new(HeadlessWindowSystem::new(Backend::Glx));
        let objects = Arc::new(ObjectRegistry::new());
        let contexts = Arc::new(ContextTracker::new(objects.clone(), ws.clone()));
        let tracker = BeginEndTracker::new(&objects, contexts.clone());

        assert!(tracker.in_begin_end(), "no context is current");
        let ctx = ws.create_context(None, None).unwrap();
        contexts.make_context_current(None, None, None, Some(ctx));
        assert!(!tracker.in_begin_end());

        tracker.observe_begin(0x0004);
        assert!(tracker.in_begin_end());
        tracker.observe_end();
        assert!(!tracker.in_begin_end());

        tracker.observe_begin(0x1234);
        assert!(!tracker.in_begin_end());
    }
}
