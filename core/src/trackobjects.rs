//! Per-namespace tracking of GL object names
//!
//! Textures, buffers and queries are recorded when they are first bound, with
//! the target they were bound to. Display lists are recorded when their
//! definition ends. Both tables live in a view on the namespace class, so
//! contexts that share objects see the same names and everything is dropped
//! when the namespace goes away.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use glscope_shared::{CallRecord, FunctionTable, Value};
use tracing::{debug, trace};

use crate::dispatch::{self, Outcome};
use crate::objects::{ClassId, Object, ObjectKey, ObjectRegistry, ViewToken};
use crate::pipeline::FilterSetInfo;
use crate::sync::lock;
use crate::trackcontext::{ContextTracker, TRACKCONTEXT};

pub const TRACKOBJECTS: &str = "trackobjects";
pub const TRACKDISPLAYLIST: &str = "trackdisplaylist";

/// `GL_NONE`, reported as the mode when no list is being defined
pub const GL_NONE: u32 = 0;

/// Kinds of named GL objects the tracker follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Texture,
    Buffer,
    Query,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Texture, ResourceKind::Buffer, ResourceKind::Query];

    /// Entry points taking `(target, name)` that bring a name into use.
    pub fn bind_functions(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Texture => &["glBindTexture", "glBindTextureEXT"],
            ResourceKind::Buffer => &["glBindBuffer", "glBindBufferARB"],
            ResourceKind::Query => &["glBeginQuery", "glBeginQueryARB"],
        }
    }

    pub fn delete_functions(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Texture => &["glDeleteTextures", "glDeleteTexturesEXT"],
            ResourceKind::Buffer => &["glDeleteBuffers", "glDeleteBuffersARB"],
            ResourceKind::Query => &["glDeleteQueries", "glDeleteQueriesARB"],
        }
    }

    /// Entry points answering whether a name is still an object.
    pub fn is_functions(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Texture => &["glIsTexture", "glIsTextureEXT"],
            ResourceKind::Buffer => &["glIsBuffer", "glIsBufferARB"],
            ResourceKind::Query => &["glIsQuery", "glIsQueryARB"],
        }
    }

    fn for_bind(function: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.bind_functions().contains(&function))
    }

    fn for_delete(function: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.delete_functions().contains(&function))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Texture => "texture",
            ResourceKind::Buffer => "buffer",
            ResourceKind::Query => "query",
        })
    }
}

/// A tracked object name and the target it was last bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedResource {
    pub name: u32,
    pub target: u32,
}

/// Name and compile mode of a display list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayListInfo {
    pub list: u32,
    pub mode: u32,
}

impl DisplayListInfo {
    fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0; 8];
        bytes[..4].copy_from_slice(&self.list.to_ne_bytes());
        bytes[4..].copy_from_slice(&self.mode.to_ne_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let list = u32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?);
        let mode = u32::from_ne_bytes(bytes.get(4..8)?.try_into().ok()?);
        Some(Self { list, mode })
    }
}

#[derive(Default)]
struct NamespaceTable {
    resources: HashMap<ResourceKind, BTreeMap<u32, u32>>,
    display_lists: HashMap<u32, Object>,
}

type Tables = Arc<Mutex<HashMap<u64, NamespaceTable>>>;

pub struct ResourceTracker {
    objects: Arc<ObjectRegistry>,
    contexts: Arc<ContextTracker>,
    functions: Arc<FunctionTable>,
    /// Slot of the namespace's table in `tables`
    namespace_view: ViewToken,
    display_list_class: ClassId,
    display_list_view: ViewToken,
    tables: Tables,
}

impl ResourceTracker {
    /// Register the per-namespace and display-list views. Must run before
    /// any namespace object exists.
    pub fn new(
        objects: Arc<ObjectRegistry>,
        contexts: Arc<ContextTracker>,
        functions: Arc<FunctionTable>,
    ) -> Self {
        let tables: Tables = Arc::new(Mutex::new(HashMap::new()));
        let next_slot = Arc::new(AtomicU64::new(1));

        let ctor_tables = tables.clone();
        let dtor_tables = tables.clone();
        let namespace_view = objects.view_new(
            contexts.namespace_class(),
            Some(Arc::new(move |_: ObjectKey, bytes: &mut [u8]| {
                let slot = next_slot.fetch_add(1, Ordering::Relaxed);
                bytes.copy_from_slice(&slot.to_ne_bytes());
                lock(&ctor_tables).insert(slot, NamespaceTable::default());
            })),
            Some(Arc::new(move |bytes: &mut [u8]| {
                if let Some(slot) = slot_of(bytes) {
                    lock(&dtor_tables).remove(&slot);
                }
            })),
            8,
        );
        let display_list_class = objects.class_new("displaylist", None);
        let display_list_view = objects.view_new(display_list_class, None, None, 8);
        Self {
            objects,
            contexts,
            functions,
            namespace_view,
            display_list_class,
            display_list_view,
            tables,
        }
    }

    /// Class of display-list objects; filter-sets may attach views to it
    /// before the first list is defined.
    pub fn display_list_class(&self) -> ClassId {
        self.display_list_class
    }

    fn current_slot(&self) -> Option<u64> {
        let namespace = self.contexts.current_namespace_object()?;
        namespace
            .with_view(self.namespace_view, |bytes| slot_of(bytes))
            .flatten()
    }

    fn with_table<R>(&self, f: impl FnOnce(&mut NamespaceTable) -> R) -> Option<R> {
        let slot = self.current_slot()?;
        let mut tables = lock(&self.tables);
        tables.get_mut(&slot).map(f)
    }

    /// Record that `name` was bound to `target` in the current namespace.
    /// Name zero unbinds and is not recorded.
    pub fn observe_bind(&self, kind: ResourceKind, target: u32, name: u32) {
        if name == 0 {
            return;
        }
        let recorded = self.with_table(|table| {
            table.resources.entry(kind).or_default().insert(name, target);
        });
        if recorded.is_none() {
            debug!(%kind, name, "bind outside any tracked context");
        }
    }

    /// Drop tracked names the GL no longer recognises.
    ///
    /// Delete calls carry their names behind a pointer, so after one runs
    /// every tracked name of `kind` is checked with the matching `glIs*`
    /// entry point. Nothing is dropped when no such entry point is bound.
    pub fn observe_delete(&self, kind: ResourceKind) {
        let Some(names) = self.with_table(|table| {
            table
                .resources
                .get(&kind)
                .map(|m| m.keys().copied().collect::<Vec<_>>())
                .unwrap_or_default()
        }) else {
            return;
        };
        // The GL is queried unlocked.
        let dead: Vec<u32> = names
            .into_iter()
            .filter(|name| self.name_exists(kind, *name) == Some(false))
            .collect();
        if dead.is_empty() {
            return;
        }
        trace!(%kind, ?dead, "names deleted");
        self.with_table(|table| {
            if let Some(map) = table.resources.get_mut(&kind) {
                for name in &dead {
                    map.remove(name);
                }
            }
        });
    }

    /// Stop tracking `name`.
    pub fn forget(&self, kind: ResourceKind, name: u32) {
        self.with_table(|table| {
            if let Some(map) = table.resources.get_mut(&kind) {
                map.remove(&name);
            }
        });
    }

    /// Target `name` was last bound to in the current namespace, without
    /// asking the GL whether it still exists.
    pub fn target_of(&self, kind: ResourceKind, name: u32) -> Option<u32> {
        self.with_table(|table| table.resources.get(&kind)?.get(&name).copied())
            .flatten()
    }

    /// Every tracked name of `kind` in the current namespace that the GL
    /// still reports as an object. Empty when the `glIs*` entry point is not
    /// available.
    pub fn resources(&self, kind: ResourceKind) -> Vec<TrackedResource> {
        let tracked = self
            .with_table(|table| {
                table
                    .resources
                    .get(&kind)
                    .map(|m| {
                        m.iter()
                            .map(|(name, target)| TrackedResource {
                                name: *name,
                                target: *target,
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        tracked
            .into_iter()
            .filter(|r| self.name_exists(kind, r.name) == Some(true))
            .collect()
    }

    /// Ask the real `glIs*` function. None if it is not bound.
    fn name_exists(&self, kind: ResourceKind, name: u32) -> Option<bool> {
        for function in kind.is_functions() {
            let Some(id) = self.functions.lookup(function) else {
                continue;
            };
            let Some(descriptor) = self.functions.descriptor(id) else {
                continue;
            };
            if descriptor.arg_count != 1 {
                continue;
            }
            let mut call = CallRecord::new(descriptor, vec![Value::UInt(u64::from(name))]);
            match dispatch::call_real(&self.functions, &mut call) {
                Outcome::Completed => return Some(call.ret.is_truthy()),
                Outcome::Unavailable | Outcome::Vetoed { .. } => continue,
            }
        }
        None
    }

    /// A `glNewList` succeeded. Nested definitions are ignored.
    pub fn observe_new_list(&self, list: u32, mode: u32) {
        if list == 0 || self.objects.object_get_current(self.display_list_class).is_some() {
            return;
        }
        let object = self
            .objects
            .object_new(self.display_list_class, u64::from(list), true);
        let info = DisplayListInfo { list, mode };
        object.with_view(self.display_list_view, |bytes| {
            bytes.copy_from_slice(&info.to_bytes());
        });
    }

    /// A `glEndList` ran: the list being defined replaces any older list of
    /// the same name.
    pub fn observe_end_list(&self) {
        let Some(object) = self.objects.object_get_current(self.display_list_class) else {
            return;
        };
        self.objects.object_set_current(self.display_list_class, None);
        let Some(info) = self.display_list_info(&object) else {
            return;
        };
        if !self.contexts.scope_to_namespace(&object) {
            debug!(list = info.list, "display list ended outside any tracked context");
            self.objects.object_free(&object);
            return;
        }
        let replaced = self
            .with_table(|table| table.display_lists.insert(info.list, object.clone()))
            .flatten();
        if let Some(old) = replaced.filter(Object::is_live) {
            self.objects.object_free(&old);
        }
    }

    /// A `glDeleteLists(first, range)` ran.
    pub fn observe_delete_lists(&self, first: u32, range: u32) {
        let removed = self
            .with_table(|table| {
                (0..range)
                    .filter_map(|i| first.checked_add(i))
                    .filter_map(|list| table.display_lists.remove(&list))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for object in removed.iter().filter(|o| o.is_live()) {
            self.objects.object_free(object);
        }
    }

    /// The object for a completed display list in the current namespace.
    pub fn display_list(&self, list: u32) -> Option<Object> {
        self.with_table(|table| table.display_lists.get(&list).cloned())
            .flatten()
            .filter(Object::is_live)
    }

    pub fn display_list_info(&self, object: &Object) -> Option<DisplayListInfo> {
        object
            .with_view(self.display_list_view, |bytes| DisplayListInfo::from_bytes(bytes))
            .flatten()
    }

    /// The list the calling thread is defining, if any.
    pub fn current_display_list(&self) -> Option<DisplayListInfo> {
        let object = self.objects.object_get_current(self.display_list_class)?;
        self.display_list_info(&object)
    }

    /// Compile mode of the list being defined, or [`GL_NONE`].
    pub fn display_list_mode(&self) -> u32 {
        self.current_display_list().map_or(GL_NONE, |info| info.mode)
    }
}

impl fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("namespaces", &lock(&self.tables).len())
            .finish_non_exhaustive()
    }
}

fn slot_of(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_ne_bytes(bytes.get(..8)?.try_into().ok()?))
}

fn u32_arg(call: &CallRecord, index: usize) -> Option<u32> {
    call.arg(index).as_u64().and_then(|v| u32::try_from(v).ok())
}

/// Records texture, buffer and query names as they are bound.
pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(
        TRACKOBJECTS,
        "Tracks texture, buffer and query names per namespace",
        |setup| {
            setup
                .filter_new("trackobjects_bind", false, |call, data| {
                    let services = data.services();
                    let kind = services
                        .functions
                        .name(call.function())
                        .and_then(ResourceKind::for_bind);
                    if let (Some(kind), Some(target), Some(name)) = (kind, u32_arg(call, 0), u32_arg(call, 1)) {
                        services.resources.observe_bind(kind, target, name);
                    }
                    true
                })
                .after_call()
                .run_when_inactive();
            let binds: Vec<&str> = ResourceKind::ALL
                .iter()
                .flat_map(|k| k.bind_functions().iter().copied())
                .collect();
            setup.catches_name(&binds);

            setup
                .filter_new("trackobjects_delete", false, |call, data| {
                    let services = data.services();
                    if let Some(kind) = services
                        .functions
                        .name(call.function())
                        .and_then(ResourceKind::for_delete)
                    {
                        services.resources.observe_delete(kind);
                    }
                    true
                })
                .after_call()
                .run_when_inactive();
            let deletes: Vec<&str> = ResourceKind::ALL
                .iter()
                .flat_map(|k| k.delete_functions().iter().copied())
                .collect();
            setup.catches_name(&deletes);
            Ok(())
        },
    )
    .depends(TRACKCONTEXT)
}

/// Records display lists as they are defined and deleted.
pub fn display_list_filter_set() -> FilterSetInfo {
    FilterSetInfo::new(
        TRACKDISPLAYLIST,
        "Tracks display lists and the list currently being defined",
        |setup| {
            setup
                .filter_new("trackdisplaylist", false, |call, data| {
                    let services = data.services();
                    let resources = &services.resources;
                    match services.functions.name(call.function()) {
                        Some("glNewList") => {
                            if let (Some(list), Some(mode)) = (u32_arg(call, 0), u32_arg(call, 1)) {
                                resources.observe_new_list(list, mode);
                            }
                        }
                        Some("glEndList") => resources.observe_end_list(),
                        Some("glDeleteLists") => {
                            if let (Some(first), Some(range)) = (u32_arg(call, 0), u32_arg(call, 1)) {
                                resources.observe_delete_lists(first, range);
                            }
                        }
                        _ => {}
                    }
                    true
                })
                .after_call()
                .run_when_inactive();
            setup.catches_name(&["glNewList", "glEndList", "glDeleteLists"]);
            Ok(())
        },
    )
    .depends(TRACKCONTEXT)
}
