//! Object tracking engine
//!
//! Tracked API resources (textures, buffers, contexts, ...) are grouped into
//! classes forming a forest. Each class owns a list of views: byte ranges of
//! the per-object data block reserved by independent filter-sets, each with
//! an optional constructor and destructor. A class's object data is laid out
//! root class first, so a view registered on an ancestor is found at the same
//! token in every descendant's objects.
//!
//! Every class also has a current object per thread, mirroring the
//! single-current-per-thread binding semantics of the graphics API.
//!
//! Most classes have a fixed layout once their first object exists. A
//! transient class (such as the per-call scratch class) may gain and lose
//! views at any time; each object keeps the layout it was created with, so a
//! view added later is simply absent from older objects.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::die;
use crate::invariant_violation;
use crate::sync::{lock, read, write};

/// Opaque key identifying the native resource (GL name or native handle).
pub type ObjectKey = u64;

/// Runs once per object with the object's key and the view's bytes.
pub type ViewCtor = Arc<dyn Fn(ObjectKey, &mut [u8]) + Send + Sync>;

/// Runs once per object, in reverse construction order, before release.
pub type ViewDtor = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(usize);

impl ClassId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a view's byte range within objects of `class` and its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewToken {
    class: ClassId,
    id: u64,
    offset: usize,
    size: usize,
}

impl ViewToken {
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Offset within the owning class's own segment at registration time.
    /// Views of a transient class are repacked when a sibling is removed.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

struct ViewSlot {
    id: u64,
    offset: usize,
    size: usize,
    ctor: Option<ViewCtor>,
    dtor: Option<ViewDtor>,
}

#[derive(Clone)]
struct ClassDesc {
    name: String,
    parent: Option<ClassId>,
    /// Root first, ending with this class
    chain: Vec<ClassId>,
    views: Vec<Arc<ViewSlot>>,
    own_size: usize,
    /// Views may be added and removed while objects exist
    transient: bool,
    /// Set once any object of this class or a descendant has been created
    instantiated: Arc<AtomicBool>,
}

static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<HashMap<(u64, ClassId), Weak<ObjectInner>>> =
        RefCell::new(HashMap::new());
}

/// Registry of object classes and factory for their instances.
pub struct ObjectRegistry {
    id: u64,
    classes: RwLock<Vec<Arc<ClassDesc>>>,
    next_object: AtomicU64,
    next_view: AtomicU64,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            classes: RwLock::new(Vec::new()),
            next_object: AtomicU64::new(1),
            next_view: AtomicU64::new(1),
        }
    }

    /// Create a class, optionally inheriting the views of `parent`.
    pub fn class_new(&self, name: &str, parent: Option<ClassId>) -> ClassId {
        self.create_class(name, parent, false)
    }

    /// Create a root class whose views come and go with the filter-sets that
    /// own them. Objects keep the layout they were created with.
    pub fn class_new_transient(&self, name: &str) -> ClassId {
        self.create_class(name, None, true)
    }

    fn create_class(&self, name: &str, parent: Option<ClassId>, transient: bool) -> ClassId {
        let mut classes = write(&self.classes);
        let id = ClassId(classes.len());
        let mut chain = match parent.and_then(|p| classes.get(p.0)) {
            Some(p) => p.chain.clone(),
            None => {
                if let Some(p) = parent {
                    invariant_violation!("class {name}: parent {p:?} does not exist");
                }
                Vec::new()
            }
        };
        chain.push(id);
        classes.push(Arc::new(ClassDesc {
            name: name.to_string(),
            parent: parent.filter(|p| p.0 < id.0),
            chain,
            views: Vec::new(),
            own_size: 0,
            transient,
            instantiated: Arc::new(AtomicBool::new(false)),
        }));
        id
    }

    /// Reserve `size` bytes in every object of `class` and its descendants.
    ///
    /// On a fixed class this must be called before any such object exists;
    /// registering afterwards is an invariant violation, and objects created
    /// earlier never see the view.
    pub fn view_new(
        &self,
        class: ClassId,
        ctor: Option<ViewCtor>,
        dtor: Option<ViewDtor>,
        size: usize,
    ) -> ViewToken {
        let id = self.next_view.fetch_add(1, Ordering::Relaxed);
        let late = {
            let classes = read(&self.classes);
            classes
                .get(class.0)
                .filter(|desc| !desc.transient && desc.instantiated.load(Ordering::Acquire))
                .map(|desc| desc.name.clone())
        };
        if let Some(name) = late {
            invariant_violation!("view registered on class {name} after objects were created");
        }
        let mut classes = write(&self.classes);
        if class.0 >= classes.len() {
            drop(classes);
            invariant_violation!("view_new on unknown class {class:?}");
            return ViewToken {
                class,
                id,
                offset: 0,
                size,
            };
        }
        let desc = Arc::make_mut(&mut classes[class.0]);
        let offset = desc.own_size;
        desc.own_size += size;
        desc.views.push(Arc::new(ViewSlot {
            id,
            offset,
            size,
            ctor,
            dtor,
        }));
        ViewToken {
            class,
            id,
            offset,
            size,
        }
    }

    /// Drop a view from a transient class and repack the rest. Objects that
    /// already exist keep their bytes and still run the view's destructor.
    pub fn view_remove(&self, view: ViewToken) {
        let mut classes = write(&self.classes);
        let Some(current) = classes.get(view.class.0) else {
            return;
        };
        if !current.transient {
            let name = current.name.clone();
            drop(classes);
            invariant_violation!("view removed from fixed class {name}");
            return;
        }
        if !current.views.iter().any(|v| v.id == view.id) {
            return;
        }
        let desc = Arc::make_mut(&mut classes[view.class.0]);
        let mut offset = 0;
        desc.views = desc
            .views
            .iter()
            .filter(|v| v.id != view.id)
            .map(|v| {
                let slot = Arc::new(ViewSlot {
                    id: v.id,
                    offset,
                    size: v.size,
                    ctor: v.ctor.clone(),
                    dtor: v.dtor.clone(),
                });
                offset += v.size;
                slot
            })
            .collect();
        desc.own_size = offset;
    }

    /// Total per-object data size, including ancestor views.
    pub fn class_size(&self, class: ClassId) -> usize {
        let classes = read(&self.classes);
        classes.get(class.0).map_or(0, |desc| {
            desc.chain.iter().map(|c| classes[c.0].own_size).sum()
        })
    }

    pub fn class_name(&self, class: ClassId) -> Option<String> {
        read(&self.classes).get(class.0).map(|d| d.name.clone())
    }

    pub fn class_parent(&self, class: ClassId) -> Option<ClassId> {
        read(&self.classes).get(class.0).and_then(|d| d.parent)
    }

    /// True if `class` is `ancestor` or derives from it.
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        read(&self.classes)
            .get(class.0)
            .is_some_and(|d| d.chain.contains(&ancestor))
    }

    /// Create an object of `class`, running every constructor root class first.
    pub fn object_new(&self, class: ClassId, key: ObjectKey, make_current: bool) -> Object {
        let (chain, segments) = {
            let classes = read(&self.classes);
            if class.0 >= classes.len() {
                drop(classes);
                invariant_violation!("object_new on unknown class {class:?}");
                return self.orphan(class, key);
            }
            let chain = classes[class.0].chain.clone();
            let mut base = 0;
            let mut segments = Vec::new();
            for c in &chain {
                let ancestor = &classes[c.0];
                ancestor.instantiated.store(true, Ordering::Release);
                segments.push(Segment {
                    class: *c,
                    base,
                    views: ancestor.views.clone(),
                });
                base += ancestor.own_size;
            }
            (chain, segments)
        };

        let size = segments.last().map_or(0, |s| {
            s.base + s.views.iter().map(|v| v.size).sum::<usize>()
        });
        let mut data = die::zeroed_block(size);
        for segment in &segments {
            for view in &segment.views {
                if let Some(ctor) = &view.ctor {
                    let start = segment.base + view.offset;
                    ctor(key, &mut data[start..start + view.size]);
                }
            }
        }

        let object = Object(Arc::new(ObjectInner {
            id: self.next_object.fetch_add(1, Ordering::Relaxed),
            registry: self.id,
            class,
            key,
            chain,
            segments,
            data: Mutex::new(data),
            live: AtomicBool::new(true),
        }));
        if make_current {
            self.object_set_current(class, Some(&object));
        }
        object
    }

    /// Data-less stand-in returned after an invariant violation.
    fn orphan(&self, class: ClassId, key: ObjectKey) -> Object {
        Object(Arc::new(ObjectInner {
            id: self.next_object.fetch_add(1, Ordering::Relaxed),
            registry: self.id,
            class,
            key,
            chain: Vec::new(),
            segments: Vec::new(),
            data: Mutex::new(Vec::new()),
            live: AtomicBool::new(true),
        }))
    }

    /// Run every destructor in reverse construction order and release the data.
    ///
    /// Current pointers on this thread that referenced the object are cleared;
    /// other threads observe the object as gone on their next lookup.
    pub fn object_free(&self, object: &Object) {
        if object.0.registry != self.id {
            invariant_violation!("object {} freed through a foreign registry", object.0.id);
            return;
        }
        if !object.0.live.swap(false, Ordering::AcqRel) {
            invariant_violation!("double free of object {}", object.0.id);
            return;
        }

        let mut data = lock(&object.0.data);
        for segment in object.0.segments.iter().rev() {
            for view in segment.views.iter().rev() {
                if let Some(dtor) = &view.dtor {
                    let start = segment.base + view.offset;
                    dtor(&mut data[start..start + view.size]);
                }
            }
        }
        *data = Vec::new();
        drop(data);

        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            for class in &object.0.chain {
                let key = (self.id, *class);
                if current
                    .get(&key)
                    .is_some_and(|w| w.as_ptr() == Arc::as_ptr(&object.0))
                {
                    current.remove(&key);
                }
            }
        });
    }

    /// The calling thread's current object of `class`, if any and still live.
    pub fn object_get_current(&self, class: ClassId) -> Option<Object> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            let key = (self.id, class);
            let found = current
                .get(&key)
                .and_then(Weak::upgrade)
                .filter(|inner| inner.live.load(Ordering::Acquire));
            if found.is_none() {
                current.remove(&key);
            }
            found.map(Object)
        })
    }

    /// Set (or clear, with `None`) the calling thread's current object of `class`.
    ///
    /// The object must belong to `class` or one of its descendants.
    pub fn object_set_current(&self, class: ClassId, object: Option<&Object>) {
        if let Some(obj) = object {
            if !obj.is_live() {
                invariant_violation!("freed object {} made current", obj.0.id);
                return;
            }
            if obj.0.registry != self.id || !obj.0.chain.contains(&class) {
                invariant_violation!("object {} is not an instance of {class:?}", obj.0.id);
                return;
            }
        }
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            match object {
                Some(obj) => {
                    current.insert((self.id, class), Arc::downgrade(&obj.0));
                }
                None => {
                    current.remove(&(self.id, class));
                }
            }
        });
    }

    /// Access the bytes of the current object's view, if there is a current object.
    pub fn with_current_view<R>(
        &self,
        class: ClassId,
        view: ViewToken,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        self.object_get_current(class)?.with_view(view, f)
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = read(&self.classes).iter().map(|c| c.name.clone()).collect();
        f.debug_struct("ObjectRegistry")
            .field("id", &self.id)
            .field("classes", &names)
            .finish()
    }
}

struct Segment {
    class: ClassId,
    base: usize,
    views: Vec<Arc<ViewSlot>>,
}

struct ObjectInner {
    id: u64,
    registry: u64,
    class: ClassId,
    key: ObjectKey,
    chain: Vec<ClassId>,
    segments: Vec<Segment>,
    data: Mutex<Vec<u8>>,
    live: AtomicBool,
}

/// Shared handle to a tracked object. Clones refer to the same instance.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    pub fn class(&self) -> ClassId {
        self.0.class
    }

    pub fn key(&self) -> ObjectKey {
        self.0.key
    }

    pub fn is_live(&self) -> bool {
        self.0.live.load(Ordering::Acquire)
    }

    /// Run `f` on the bytes of `view`.
    ///
    /// Returns `None` if the object has been freed or the view does not belong
    /// to the object's class chain.
    pub fn with_view<R>(&self, view: ViewToken, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let segment = self.0.segments.iter().find(|s| s.class == view.class)?;
        let slot = segment.views.iter().find(|v| v.id == view.id)?;
        let mut data = lock(&self.0.data);
        if !self.is_live() {
            return None;
        }
        let start = segment.base + slot.offset;
        data.get_mut(start..start + slot.size).map(f)
    }

    /// Copy of the bytes of `view`.
    pub fn read_view(&self, view: ViewToken) -> Option<Vec<u8>> {
        self.with_view(view, |bytes| bytes.to_vec())
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Object {}

impl std::hash::Hash for Object {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.0.id)
            .field("class", &self.0.class)
            .field("key", &self.0.key)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> (ViewCtor, ViewDtor) {
        let (l1, l2) = (log.clone(), log.clone());
        let (t1, t2) = (format!("ctor:{tag}"), format!("dtor:{tag}"));
        (
            Arc::new(move |_: ObjectKey, _: &mut [u8]| l1.lock().unwrap().push(t1.clone())),
            Arc::new(move |_: &mut [u8]| l2.lock().unwrap().push(t2.clone())),
        )
    }

    #[test]
    fn test_view_offsets_increase_and_sum() {
        let reg = ObjectRegistry::new();
        let base = reg.class_new("bindable", None);
        let tex = reg.class_new("texture", Some(base));

        let b = reg.view_new(base, None, None, 4);
        let t1 = reg.view_new(tex, None, None, 8);
        let t2 = reg.view_new(tex, None, None, 3);
        let t3 = reg.view_new(tex, None, None, 0);
        let t4 = reg.view_new(tex, None, None, 5);

        assert_eq!(b.offset(), 0);
        assert_eq!((t1.offset(), t2.offset(), t3.offset(), t4.offset()), (0, 8, 11, 11));
        assert_eq!(reg.class_size(base), 4);
        assert_eq!(reg.class_size(tex), 4 + 8 + 3 + 5);
    }

    #[test]
    fn test_ctor_dtor_order() {
        let reg = ObjectRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = reg.class_new("root", None);
        let mid = reg.class_new("mid", Some(root));
        let leaf = reg.class_new("leaf", Some(mid));

        for (class, tag) in [(leaf, "leaf"), (root, "root1"), (mid, "mid"), (root, "root2")] {
            let (c, d) = recorder(&log, tag);
            reg.view_new(class, Some(c), Some(d), 1);
        }

        let obj = reg.object_new(leaf, 9, false);
        reg.object_free(&obj);

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "ctor:root1", "ctor:root2", "ctor:mid", "ctor:leaf", "dtor:leaf", "dtor:mid",
                "dtor:root2", "dtor:root1",
            ]
        );
    }

    #[test]
    fn test_texture_scenario() {
        let reg = ObjectRegistry::new();
        let texture = reg.class_new("texture", None);
        let view = reg.view_new(
            texture,
            Some(Arc::new(|_: ObjectKey, bytes: &mut [u8]| bytes.fill(0))),
            None,
            8,
        );

        let obj = reg.object_new(texture, 42, true);
        assert_eq!(reg.object_get_current(texture), Some(obj.clone()));
        assert_eq!(obj.read_view(view), Some(vec![0u8; 8]));
        assert_eq!(obj.key(), 42);

        reg.object_free(&obj);
        assert!(reg.object_get_current(texture).is_none());
        assert!(obj.read_view(view).is_none());
    }

    #[test]
    fn test_ancestor_view_shared_by_descendants() {
        let reg = ObjectRegistry::new();
        let base = reg.class_new("bindable", None);
        let buffer = reg.class_new("buffer", Some(base));
        let bound = reg.view_new(base, None, None, 1);
        let own = reg.view_new(buffer, Some(Arc::new(|key: ObjectKey, b: &mut [u8]| b[0] = key as u8)), None, 1);

        let obj = reg.object_new(buffer, 7, false);
        obj.with_view(bound, |b| b[0] = 1).unwrap();
        assert_eq!(obj.read_view(bound), Some(vec![1]));
        assert_eq!(obj.read_view(own), Some(vec![7]));
        assert!(reg.is_subclass(buffer, base));
        assert!(!reg.is_subclass(base, buffer));
    }

    #[test]
    fn test_current_is_polymorphic_and_cleared_on_free() {
        let reg = ObjectRegistry::new();
        let base = reg.class_new("bindable", None);
        let tex = reg.class_new("texture", Some(base));
        let obj = reg.object_new(tex, 1, true);
        reg.object_set_current(base, Some(&obj));
        assert_eq!(reg.object_get_current(base), Some(obj.clone()));

        let other = reg.object_new(tex, 2, false);
        reg.object_set_current(tex, Some(&other));
        assert_eq!(reg.object_get_current(tex), Some(other.clone()));

        reg.object_free(&obj);
        assert!(reg.object_get_current(base).is_none());
        assert_eq!(reg.object_get_current(tex), Some(other));
    }

    #[test]
    fn test_current_is_per_thread() {
        let reg = ObjectRegistry::new();
        let tex = reg.class_new("texture", None);
        let obj = reg.object_new(tex, 1, true);

        std::thread::scope(|s| {
            s.spawn(|| assert!(reg.object_get_current(tex).is_none()));
        });
        assert_eq!(reg.object_get_current(tex), Some(obj));
    }

    #[test]
    fn test_freed_on_other_thread_not_returned() {
        let reg = ObjectRegistry::new();
        let tex = reg.class_new("texture", None);
        let obj = reg.object_new(tex, 1, true);
        std::thread::scope(|s| {
            s.spawn(|| reg.object_free(&obj));
        });
        assert!(reg.object_get_current(tex).is_none());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "after objects were created")]
    fn test_view_after_instance_is_fatal() {
        let reg = ObjectRegistry::new();
        let base = reg.class_new("bindable", None);
        let tex = reg.class_new("texture", Some(base));
        let _obj = reg.object_new(tex, 1, false);
        reg.view_new(base, None, None, 4);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal_in_debug() {
        let reg = ObjectRegistry::new();
        let tex = reg.class_new("texture", None);
        let obj = reg.object_new(tex, 1, false);
        reg.object_free(&obj);
        reg.object_free(&obj);
    }

    #[test]
    fn test_sibling_class_still_accepts_views() {
        let reg = ObjectRegistry::new();
        let base = reg.class_new("bindable", None);
        let tex = reg.class_new("texture", Some(base));
        let buf = reg.class_new("buffer", Some(base));
        let _obj = reg.object_new(tex, 1, false);
        let view = reg.view_new(buf, None, None, 2);
        assert_eq!(view.offset(), 0);
        assert_eq!(reg.class_size(buf), 2);
    }

    #[test]
    fn test_transient_class_views_come_and_go() {
        let reg = ObjectRegistry::new();
        let call = reg.class_new_transient("call");
        let first = reg.view_new(call, None, None, 8);
        let old = reg.object_new(call, 1, false);

        // Adding and removing views after objects exist is allowed here.
        let second = reg.view_new(call, Some(Arc::new(|_: ObjectKey, b: &mut [u8]| b.fill(7))), None, 2);
        assert_eq!(reg.class_size(call), 10);
        assert!(old.read_view(second).is_none());

        reg.view_remove(first);
        assert_eq!(reg.class_size(call), 2);
        let new = reg.object_new(call, 2, false);
        assert_eq!(new.read_view(second), Some(vec![7, 7]));
        assert!(new.read_view(first).is_none());
        assert_eq!(old.read_view(first), Some(vec![0; 8]));

        reg.view_remove(second);
        assert_eq!(reg.class_size(call), 0);
        reg.object_free(&old);
        reg.object_free(&new);
    }

    #[test]
    fn test_removed_view_dtor_still_runs_for_existing_objects() {
        let reg = ObjectRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let call = reg.class_new_transient("call");
        let (c, d) = recorder(&log, "scratch");
        let view = reg.view_new(call, Some(c), Some(d), 4);
        let obj = reg.object_new(call, 1, false);
        reg.view_remove(view);
        reg.object_free(&obj);
        assert_eq!(*log.lock().unwrap(), ["ctor:scratch", "dtor:scratch"]);
    }
}
