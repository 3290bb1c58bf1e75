//! Context and thread tracking
//!
//! Maps native rendering contexts to tracked objects of the `context` class
//! and groups contexts that share GL objects into `namespace` objects. The
//! tracker follows create, make-current and destroy calls (through the
//! `trackcontext` filter-set) and keeps each thread's current context and
//! namespace as the current objects of those classes.
//!
//! A context's object is created the first time it is bound, on the binding
//! thread and with the context current, so view constructors may query it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use glscope_shared::{ContextHandle, DisplayHandle, DrawableHandle};
use tracing::{debug, warn};

use crate::glwin::{Backend, ContextCreateInfo, MakeCurrentArgs, WindowSystem};
use crate::objects::{ClassId, Object, ObjectRegistry};
use crate::pipeline::FilterSetInfo;
use crate::sync::lock;

/// Name of the built-in filter-set that feeds the tracker.
pub const TRACKCONTEXT: &str = "trackcontext";

static NEXT_TRACKER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static BINDINGS: RefCell<HashMap<u64, MakeCurrentArgs>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unbound,
    Current,
}

#[derive(Debug, Clone)]
struct PendingContext {
    create: Option<ContextCreateInfo>,
    auxiliary: bool,
}

struct TrackedContext {
    object: Object,
    /// Context whose namespace this one belongs to
    root: ContextHandle,
    display: Option<DisplayHandle>,
    create: Option<ContextCreateInfo>,
    threads: HashSet<ThreadId>,
    auxiliary: bool,
    aux_shared: Option<ContextHandle>,
    aux_unshared: Option<ContextHandle>,
}

struct Namespace {
    object: Object,
    members: HashSet<ContextHandle>,
    /// Objects freed together with the namespace
    scoped: Vec<Object>,
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<ContextHandle, PendingContext>,
    contexts: HashMap<ContextHandle, TrackedContext>,
    namespaces: HashMap<ContextHandle, Namespace>,
}

impl TrackerState {
    /// Namespace root for a context about to be tracked: follow share links
    /// until reaching a tracked context or one that shares with nothing.
    fn resolve_root(&self, context: ContextHandle) -> ContextHandle {
        let mut current = context;
        let mut seen = HashSet::new();
        while seen.insert(current) {
            if let Some(tracked) = self.contexts.get(&current) {
                return tracked.root;
            }
            match self
                .pending
                .get(&current)
                .and_then(|p| p.create.as_ref())
                .and_then(|c| c.share)
            {
                Some(share) if self.contexts.contains_key(&share) || self.pending.contains_key(&share) => {
                    current = share;
                }
                Some(share) => {
                    warn!(context = %current, %share, "context shares with an untracked context");
                    return current;
                }
                None => return current,
            }
        }
        current
    }

    fn state_of(&self, context: ContextHandle) -> Option<ContextState> {
        match self.contexts.get(&context) {
            Some(t) if t.threads.is_empty() => Some(ContextState::Unbound),
            Some(_) => Some(ContextState::Current),
            None => self.pending.contains_key(&context).then_some(ContextState::Unbound),
        }
    }
}

/// Objects released by a destroy, freed once the tracker lock is dropped.
#[derive(Default)]
struct Released {
    objects: Vec<Object>,
    auxiliary: Vec<(Option<DisplayHandle>, ContextHandle)>,
}

pub struct ContextTracker {
    id: u64,
    objects: Arc<ObjectRegistry>,
    window: Arc<dyn WindowSystem>,
    context_class: ClassId,
    namespace_class: ClassId,
    state: Mutex<TrackerState>,
}

impl ContextTracker {
    pub fn new(objects: Arc<ObjectRegistry>, window: Arc<dyn WindowSystem>) -> Self {
        let context_class = objects.class_new("context", None);
        let namespace_class = objects.class_new("namespace", None);
        Self {
            id: NEXT_TRACKER.fetch_add(1, Ordering::Relaxed),
            objects,
            window,
            context_class,
            namespace_class,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        self.window.backend()
    }

    pub fn window_system(&self) -> &Arc<dyn WindowSystem> {
        &self.window
    }

    /// Class of tracked contexts; filter-sets add per-context views to it.
    pub fn context_class(&self) -> ClassId {
        self.context_class
    }

    /// Class of object-sharing groups; per-namespace views go here.
    pub fn namespace_class(&self) -> ClassId {
        self.namespace_class
    }

    pub fn get_current_display(&self) -> Option<DisplayHandle> {
        self.window.current_display()
    }

    pub fn get_current_context(&self) -> Option<ContextHandle> {
        self.window.current_context()
    }

    pub fn get_current_drawable(&self) -> Option<DrawableHandle> {
        self.window.current_drawable()
    }

    pub fn get_current_read_drawable(&self) -> Option<DrawableHandle> {
        self.window.current_read_drawable()
    }

    /// The calling thread's tracked context object. None once the context
    /// has been destroyed, even if another thread destroyed it.
    pub fn current_context_object(&self) -> Option<Object> {
        let object = self.objects.object_get_current(self.context_class);
        if object.is_none() {
            self.drop_stale_binding();
        }
        object
    }

    /// The calling thread's tracked namespace object.
    pub fn current_namespace_object(&self) -> Option<Object> {
        self.current_context_object()?;
        self.objects.object_get_current(self.namespace_class)
    }

    /// Forget a binding whose context was destroyed on another thread.
    fn drop_stale_binding(&self) {
        let stale = BINDINGS.with(|b| b.borrow_mut().remove(&self.id));
        if stale.is_some() {
            self.objects.object_set_current(self.namespace_class, None);
        }
    }

    pub fn context_object(&self, context: ContextHandle) -> Option<Object> {
        lock(&self.state)
            .contexts
            .get(&context)
            .map(|t| t.object.clone())
    }

    /// Whether any thread has `context` current. A thread that exits while
    /// still bound keeps counting until the context is destroyed or the
    /// thread's binding is replaced, since thread exit is never observed.
    pub fn context_state(&self, context: ContextHandle) -> Option<ContextState> {
        lock(&self.state).state_of(context)
    }

    pub fn is_auxiliary(&self, context: ContextHandle) -> bool {
        let state = lock(&self.state);
        state.contexts.get(&context).map_or_else(
            || state.pending.get(&context).is_some_and(|p| p.auxiliary),
            |t| t.auxiliary,
        )
    }

    /// Record a context the application (or the tracker) has just created.
    pub fn observe_context_created(&self, info: ContextCreateInfo) {
        self.track_created(info, false);
    }

    fn track_created(&self, info: ContextCreateInfo, auxiliary: bool) {
        let context = info.context;
        let mut state = lock(&self.state);
        if state.contexts.contains_key(&context) {
            warn!(%context, "context handle reused while still tracked");
            return;
        }
        debug!(%context, function = %info.function, auxiliary, "context created");
        state.pending.insert(
            context,
            PendingContext {
                create: Some(info),
                auxiliary,
            },
        );
    }

    /// Bind through the real windowing layer, then update this thread's
    /// association. Returns the windowing layer's verdict.
    pub fn make_context_current(
        &self,
        display: Option<DisplayHandle>,
        draw: Option<DrawableHandle>,
        read: Option<DrawableHandle>,
        context: Option<ContextHandle>,
    ) -> bool {
        let args = MakeCurrentArgs {
            display,
            draw,
            read,
            context,
        };
        // No tracker lock across the real call: it may block on the display.
        if !self.window.make_current(&args) {
            return false;
        }
        self.bind_thread(args);
        true
    }

    /// Record a make-current call that already succeeded.
    pub fn observe_made_current(&self, args: MakeCurrentArgs) {
        self.bind_thread(args);
    }

    /// Re-read the calling thread's binding from the windowing layer.
    pub fn sync_current_thread(&self) {
        let args = MakeCurrentArgs {
            display: self.window.current_display(),
            draw: self.window.current_drawable(),
            read: self.window.current_read_drawable(),
            context: self.window.current_context(),
        };
        self.bind_thread(args);
    }

    fn bind_thread(&self, args: MakeCurrentArgs) {
        let thread = thread::current().id();
        let previous = BINDINGS.with(|b| b.borrow().get(&self.id).copied());
        let old = previous.and_then(|p| p.context);

        if old != args.context {
            if let Some(old) = old {
                let mut state = lock(&self.state);
                if let Some(tracked) = state.contexts.get_mut(&old) {
                    tracked.threads.remove(&thread);
                    if tracked.threads.is_empty() {
                        debug!(context = %old, "context unbound");
                    }
                }
            }
        }

        let Some(context) = args.context else {
            BINDINGS.with(|b| b.borrow_mut().remove(&self.id));
            self.objects.object_set_current(self.context_class, None);
            self.objects.object_set_current(self.namespace_class, None);
            return;
        };

        let tracked = self.ensure_tracked(context, args.display);
        BINDINGS.with(|b| b.borrow_mut().insert(self.id, args));
        let Some((object, namespace)) = tracked else {
            return;
        };
        {
            let mut state = lock(&self.state);
            if let Some(tracked) = state.contexts.get_mut(&context) {
                if tracked.threads.is_empty() {
                    debug!(%context, "context current");
                }
                tracked.threads.insert(thread);
            }
        }
        self.objects
            .object_set_current(self.context_class, Some(&object));
        self.objects
            .object_set_current(self.namespace_class, Some(&namespace));
    }

    /// Context and namespace objects for `context`, creating them if this is
    /// the context's first bind.
    fn ensure_tracked(
        &self,
        context: ContextHandle,
        display: Option<DisplayHandle>,
    ) -> Option<(Object, Object)> {
        let (pending, root, need_namespace) = {
            let state = lock(&self.state);
            if let Some(tracked) = state.contexts.get(&context) {
                return Self::tracked_pair(&state, tracked);
            }
            let root = state.resolve_root(context);
            let pending = state.pending.get(&context).cloned();
            if pending.is_none() {
                warn!(%context, "context made current but never observed being created");
            }
            (pending, root, !state.namespaces.contains_key(&root))
        };

        // Constructors run unlocked; they may call back into the tracker.
        let object = self
            .objects
            .object_new(self.context_class, context.as_raw() as u64, false);
        let namespace = need_namespace.then(|| {
            self.objects
                .object_new(self.namespace_class, root.as_raw() as u64, false)
        });

        let mut state = lock(&self.state);
        let raced = state
            .contexts
            .get(&context)
            .map(|existing| Self::tracked_pair(&state, existing));
        let raced = match raced {
            Some(pair) => Some(pair),
            None if namespace.is_none() && !state.namespaces.contains_key(&root) => {
                // The namespace went away while unlocked; start over.
                drop(state);
                self.objects.object_free(&object);
                return self.ensure_tracked(context, display);
            }
            None => None,
        };
        if let Some(pair) = raced {
            // Another thread bound the same context first
            drop(state);
            self.objects.object_free(&object);
            if let Some(n) = namespace {
                self.objects.object_free(&n);
            }
            return pair;
        }

        let mut surplus_namespace = None;
        let ns_object = match state.namespaces.get_mut(&root) {
            Some(ns) => {
                ns.members.insert(context);
                surplus_namespace = namespace;
                ns.object.clone()
            }
            None => {
                let created = namespace?;
                state.namespaces.insert(
                    root,
                    Namespace {
                        object: created.clone(),
                        members: HashSet::from([context]),
                        scoped: Vec::new(),
                    },
                );
                created
            }
        };

        let pending = state.pending.remove(&context).or(pending);
        let (create, auxiliary) = pending.map_or((None, false), |p| (p.create, p.auxiliary));
        state.contexts.insert(
            context,
            TrackedContext {
                object: object.clone(),
                root,
                display: display.or(create.as_ref().and_then(|c| c.display)),
                create,
                threads: HashSet::new(),
                auxiliary,
                aux_shared: None,
                aux_unshared: None,
            },
        );
        drop(state);

        if let Some(n) = surplus_namespace {
            self.objects.object_free(&n);
        }
        Some((object, ns_object))
    }

    fn tracked_pair(state: &TrackerState, tracked: &TrackedContext) -> Option<(Object, Object)> {
        match state.namespaces.get(&tracked.root) {
            Some(ns) => Some((tracked.object.clone(), ns.object.clone())),
            None => {
                crate::invariant_violation!(
                    "tracked context {} has no namespace {}",
                    tracked.object.key(),
                    tracked.root
                );
                None
            }
        }
    }

    /// Forget a context that is being destroyed.
    ///
    /// A context still current somewhere is implicitly unbound. When the last
    /// context of a namespace goes, the namespace and every object scoped to
    /// it are freed. Auxiliary contexts made from this one are destroyed too.
    pub fn observe_context_destroyed(&self, context: ContextHandle) {
        let released = {
            let mut state = lock(&self.state);
            let was_pending = state.pending.remove(&context).is_some();
            let Some(tracked) = state.contexts.remove(&context) else {
                if !was_pending {
                    debug!(%context, "destroy of untracked context");
                }
                return;
            };
            if !tracked.threads.is_empty() {
                debug!(%context, threads = tracked.threads.len(), "context destroyed while current");
            }

            let mut released = Released::default();
            if let Some(ns) = state.namespaces.get_mut(&tracked.root) {
                ns.members.remove(&context);
                if ns.members.is_empty() {
                    if let Some(ns) = state.namespaces.remove(&tracked.root) {
                        released.objects.extend(ns.scoped.into_iter().rev());
                        released.objects.push(ns.object);
                    }
                }
            }
            released.objects.insert(0, tracked.object);
            for aux in [tracked.aux_shared, tracked.aux_unshared].into_iter().flatten() {
                released.auxiliary.push((tracked.display, aux));
            }
            released
        };

        if BINDINGS.with(|b| b.borrow().get(&self.id).and_then(|a| a.context)) == Some(context) {
            BINDINGS.with(|b| b.borrow_mut().remove(&self.id));
            self.objects.object_set_current(self.namespace_class, None);
        }
        for object in &released.objects {
            if object.is_live() {
                self.objects.object_free(object);
            }
        }
        for (display, aux) in released.auxiliary {
            self.observe_context_destroyed(aux);
            self.window.destroy_context(display, aux);
        }
    }

    /// Create a context compatible with `context`, sharing its objects if
    /// `share` is set. The new context is tracked like any other.
    pub fn clone_current_context(
        &self,
        display: Option<DisplayHandle>,
        context: ContextHandle,
        share: bool,
    ) -> Option<ContextHandle> {
        let template = {
            let state = lock(&self.state);
            state
                .contexts
                .get(&context)
                .and_then(|t| t.create.clone())
                .or_else(|| state.pending.get(&context).and_then(|p| p.create.clone()))
        };
        let Some(mut template) = template else {
            warn!(%context, "cannot clone a context whose creation was not observed");
            return None;
        };
        if template.display.is_none() {
            template.display = display;
        }
        let share_with = share.then_some(context);
        let Some(created) = self.window.create_context_like(&template, share_with) else {
            warn!(%context, share, "failed to create auxiliary context");
            return None;
        };

        let mut info = template;
        info.context = created;
        info.share = share_with;
        if let Some(i) = info.share_arg {
            if let Some(slot) = info.args.get_mut(i) {
                *slot = share_with.into();
            }
        }
        self.track_created(info, true);
        Some(created)
    }

    /// The cached auxiliary context for the calling thread's current context,
    /// created on first use.
    pub fn aux_context(&self, shared: bool) -> Option<ContextHandle> {
        let current = BINDINGS.with(|b| b.borrow().get(&self.id).copied())?;
        let context = current.context?;
        {
            let state = lock(&self.state);
            let tracked = state.contexts.get(&context)?;
            let cached = if shared {
                tracked.aux_shared
            } else {
                tracked.aux_unshared
            };
            if cached.is_some() {
                return cached;
            }
        }

        let aux = self.clone_current_context(current.display, context, shared)?;
        let mut state = lock(&self.state);
        match state.contexts.get_mut(&context) {
            Some(tracked) => {
                let slot = if shared {
                    &mut tracked.aux_shared
                } else {
                    &mut tracked.aux_unshared
                };
                match *slot {
                    Some(existing) => {
                        drop(state);
                        self.observe_context_destroyed(aux);
                        self.window.destroy_context(current.display, aux);
                        Some(existing)
                    }
                    None => {
                        *slot = Some(aux);
                        Some(aux)
                    }
                }
            }
            None => {
                drop(state);
                self.observe_context_destroyed(aux);
                self.window.destroy_context(current.display, aux);
                None
            }
        }
    }

    /// Tie `object`'s lifetime to the calling thread's current namespace.
    /// Returns false if no tracked context is current.
    pub fn scope_to_namespace(&self, object: &Object) -> bool {
        let Some(context) = BINDINGS.with(|b| b.borrow().get(&self.id).and_then(|a| a.context)) else {
            return false;
        };
        let mut state = lock(&self.state);
        let Some(root) = state.contexts.get(&context).map(|t| t.root) else {
            return false;
        };
        match state.namespaces.get_mut(&root) {
            Some(ns) => {
                ns.scoped.retain(Object::is_live);
                ns.scoped.push(object.clone());
                true
            }
            None => false,
        }
    }

    pub fn tracked_contexts(&self) -> usize {
        lock(&self.state).contexts.len()
    }
}

impl fmt::Debug for ContextTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ContextTracker")
            .field("backend", &self.window.backend())
            .field("pending", &state.pending.len())
            .field("contexts", &state.contexts.len())
            .field("namespaces", &state.namespaces.len())
            .finish()
    }
}

/// The filter-set that feeds the tracker from intercepted windowing calls.
///
/// Its filters keep running while the set is deactivated so tracking never
/// falls out of step with the application.
pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(
        TRACKCONTEXT,
        "Tracks rendering contexts, their namespaces and per-thread bindings",
        |setup| {
            let backend = setup.services().contexts.backend();

            setup
                .filter_new("trackcontext_create", false, move |call, data| {
                    let services = data.services();
                    if let Some(name) = services.functions.name(call.function()) {
                        if let Some(info) = backend.decode_create(name, call) {
                            services.contexts.observe_context_created(info);
                        }
                    }
                    true
                })
                .after_call()
                .run_when_inactive();
            setup.catches_name(backend.create_functions());

            setup
                .filter_new("trackcontext_make_current", false, move |call, data| {
                    if !call.ret.is_truthy() {
                        return true;
                    }
                    let services = data.services();
                    let decoded = services
                        .functions
                        .name(call.function())
                        .and_then(|name| backend.decode_make_current(name, call));
                    match decoded {
                        Some(args) => services.contexts.observe_made_current(args),
                        None => services.contexts.sync_current_thread(),
                    }
                    true
                })
                .after_call()
                .run_when_inactive();
            setup.catches_name(backend.make_current_functions());

            setup
                .filter_new("trackcontext_destroy", false, move |call, data| {
                    let services = data.services();
                    if let Some(name) = services.functions.name(call.function()) {
                        if let Some(context) = backend.decode_destroy(name, call) {
                            services.contexts.observe_context_destroyed(context);
                        }
                    }
                    true
                })
                .run_when_inactive();
            setup.catches_name(backend.destroy_functions());
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glwin::HeadlessWindowSystem;
    use crate::objects::ObjectKey;

    fn tracker() -> (Arc<HeadlessWindowSystem>, ContextTracker, Arc<ObjectRegistry>) {
        let ws = Arc::new(HeadlessWindowSystem::new(Backend::Glx));
        let objects = Arc::new(ObjectRegistry::new());
        let tracker = ContextTracker::new(objects.clone(), ws.clone());
        (ws, tracker, objects)
    }

    fn created(ws: &HeadlessWindowSystem, share: Option<ContextHandle>) -> ContextCreateInfo {
        let display = ws.open_display();
        let context = ws.create_context(display, share).unwrap();
        ContextCreateInfo {
            function: "glXCreateNewContext".to_string(),
            args: Vec::new(),
            share_arg: None,
            display,
            config: None,
            drawable: None,
            share,
            context,
        }
    }

    #[test]
    fn test_state_machine() {
        let (ws, tracker, _) = tracker();
        let info = created(&ws, None);
        let ctx = info.context;
        tracker.observe_context_created(info);
        assert_eq!(tracker.context_state(ctx), Some(ContextState::Unbound));

        assert!(tracker.make_context_current(None, None, None, Some(ctx)));
        assert_eq!(tracker.context_state(ctx), Some(ContextState::Current));
        assert_eq!(tracker.get_current_context(), Some(ctx));
        assert_eq!(
            tracker.current_context_object().map(|o| o.key()),
            Some(ctx.as_raw() as ObjectKey)
        );

        assert!(tracker.make_context_current(None, None, None, None));
        assert_eq!(tracker.context_state(ctx), Some(ContextState::Unbound));
        assert!(tracker.current_context_object().is_none());
    }

    #[test]
    fn test_failed_bind_changes_nothing() {
        let (ws, tracker, _) = tracker();
        let info = created(&ws, None);
        let ctx = info.context;
        tracker.observe_context_created(info);
        ws.set_fail_make_current(true);
        assert!(!tracker.make_context_current(None, None, None, Some(ctx)));
        assert_eq!(tracker.context_state(ctx), Some(ContextState::Unbound));
        assert!(tracker.context_object(ctx).is_none());
    }

    #[test]
    fn test_shared_contexts_share_namespace() {
        let (ws, tracker, _) = tracker();
        let a = created(&ws, None);
        let (ctx_a, display) = (a.context, a.display);
        tracker.observe_context_created(a);
        let b = created(&ws, Some(ctx_a));
        let ctx_b = b.context;
        tracker.observe_context_created(b);

        tracker.make_context_current(display, None, None, Some(ctx_b));
        let ns_b = tracker.current_namespace_object().unwrap();
        tracker.make_context_current(display, None, None, Some(ctx_a));
        let ns_a = tracker.current_namespace_object().unwrap();
        assert_eq!(ns_a, ns_b);
        assert_eq!(ns_a.key(), ctx_a.as_raw() as ObjectKey);
    }

    #[test]
    fn test_destroy_frees_namespace_and_scoped_objects() {
        let (ws, tracker, objects) = tracker();
        let texture = objects.class_new("texture", None);
        let a = created(&ws, None);
        let ctx_a = a.context;
        tracker.observe_context_created(a);
        let b = created(&ws, Some(ctx_a));
        let ctx_b = b.context;
        tracker.observe_context_created(b);

        tracker.make_context_current(None, None, None, Some(ctx_a));
        let tex = objects.object_new(texture, 1, true);
        assert!(tracker.scope_to_namespace(&tex));
        let ns = tracker.current_namespace_object().unwrap();
        tracker.make_context_current(None, None, None, Some(ctx_b));
        tracker.make_context_current(None, None, None, Some(ctx_a));

        tracker.observe_context_destroyed(ctx_a);
        assert!(tex.is_live(), "namespace still has a member");
        assert!(tracker.current_context_object().is_none());

        tracker.observe_context_destroyed(ctx_b);
        assert!(!tex.is_live());
        assert!(!ns.is_live());
        assert!(objects.object_get_current(texture).is_none());
        assert_eq!(tracker.tracked_contexts(), 0);
    }

    #[test]
    fn test_unobserved_context_still_tracked() {
        let (ws, tracker, _) = tracker();
        let ctx = ws.create_context(None, None).unwrap();
        assert!(tracker.make_context_current(None, None, None, Some(ctx)));
        assert!(tracker.context_object(ctx).is_some());
        assert!(tracker.current_namespace_object().is_some());
    }

    #[test]
    fn test_aux_context_cached_and_destroyed_with_parent() {
        let (ws, tracker, _) = tracker();
        let info = created(&ws, None);
        let ctx = info.context;
        tracker.observe_context_created(info);
        tracker.make_context_current(None, None, None, Some(ctx));

        let shared = tracker.aux_context(true).unwrap();
        assert_eq!(tracker.aux_context(true), Some(shared));
        let unshared = tracker.aux_context(false).unwrap();
        assert_ne!(shared, unshared);
        assert!(tracker.is_auxiliary(shared));
        assert_eq!(ws.share_of(shared), Some(ctx));
        assert_eq!(ws.share_of(unshared), None);

        // Binding the shared aux context lands in the parent's namespace.
        let ns = tracker.current_namespace_object().unwrap();
        tracker.make_context_current(None, None, None, Some(shared));
        assert_eq!(tracker.current_namespace_object(), Some(ns));
        tracker.make_context_current(None, None, None, Some(ctx));

        tracker.observe_context_destroyed(ctx);
        assert!(!ws.context_exists(shared));
        assert!(!ws.context_exists(unshared));
        assert!(tracker.context_state(shared).is_none());
    }

    #[test]
    fn test_two_threads_two_contexts() {
        let (ws, tracker, _) = tracker();
        let a = created(&ws, None);
        let b = created(&ws, None);
        let (ctx_a, ctx_b) = (a.context, b.context);
        tracker.observe_context_created(a);
        tracker.observe_context_created(b);

        std::thread::scope(|s| {
            for ctx in [ctx_a, ctx_b] {
                let tracker = &tracker;
                s.spawn(move || {
                    for _ in 0..100 {
                        assert!(tracker.make_context_current(None, None, None, Some(ctx)));
                        assert_eq!(tracker.get_current_context(), Some(ctx));
                        assert_eq!(
                            tracker.current_context_object().map(|o| o.key()),
                            Some(ctx.as_raw() as ObjectKey)
                        );
                    }
                    assert_eq!(tracker.context_state(ctx), Some(ContextState::Current));
                    assert!(tracker.make_context_current(None, None, None, None));
                });
            }
        });
        assert_eq!(tracker.context_state(ctx_a), Some(ContextState::Unbound));
        assert_eq!(tracker.context_state(ctx_b), Some(ContextState::Unbound));
    }

    #[test]
    fn test_same_context_on_two_threads() {
        let (ws, tracker, _) = tracker();
        let info = created(&ws, None);
        let ctx = info.context;
        tracker.observe_context_created(info);

        std::thread::scope(|s| {
            s.spawn(|| {
                tracker.make_context_current(None, None, None, Some(ctx));
                tracker.make_context_current(None, None, None, None);
            });
        });
        tracker.make_context_current(None, None, None, Some(ctx));
        assert_eq!(tracker.context_state(ctx), Some(ContextState::Current));
        assert_eq!(tracker.tracked_contexts(), 1);
    }

    #[test]
    fn test_destroy_on_other_thread_clears_binding() {
        let (ws, tracker, _) = tracker();
        let a = created(&ws, None);
        let ctx_a = a.context;
        tracker.observe_context_created(a);
        let b = created(&ws, Some(ctx_a));
        let ctx_b = b.context;
        tracker.observe_context_created(b);

        // The sibling keeps the namespace alive after ctx_b goes.
        tracker.make_context_current(None, None, None, Some(ctx_a));
        let ns = tracker.current_namespace_object().unwrap();

        let (bound_tx, bound_rx) = std::sync::mpsc::channel();
        let (destroyed_tx, destroyed_rx) = std::sync::mpsc::channel();
        std::thread::scope(|s| {
            let tracker = &tracker;
            s.spawn(move || {
                assert!(tracker.make_context_current(None, None, None, Some(ctx_b)));
                bound_tx.send(()).unwrap();
                destroyed_rx.recv().unwrap();
                assert!(tracker.current_context_object().is_none());
                assert!(tracker.current_namespace_object().is_none());
                assert!(tracker.context_state(ctx_b).is_none());
            });
            bound_rx.recv().unwrap();
            tracker.observe_context_destroyed(ctx_b);
            destroyed_tx.send(()).unwrap();
        });
        assert!(ns.is_live());
        assert_eq!(tracker.current_namespace_object(), Some(ns));
    }

    #[test]
    fn test_scoped_objects_pruned_once_freed() {
        let (ws, tracker, objects) = tracker();
        let texture = objects.class_new("texture", None);
        let info = created(&ws, None);
        let ctx = info.context;
        tracker.observe_context_created(info);
        tracker.make_context_current(None, None, None, Some(ctx));

        for key in 0..3 {
            let tex = objects.object_new(texture, key, false);
            assert!(tracker.scope_to_namespace(&tex));
            objects.object_free(&tex);
        }
        let kept = objects.object_new(texture, 9, false);
        assert!(tracker.scope_to_namespace(&kept));
        tracker.observe_context_destroyed(ctx);
        assert!(!kept.is_live());
    }
}
