//! Filter-set and filter declarations

use std::fmt;
use std::sync::Arc;

use glscope_shared::{CallRecord, FunctionId};
use tracing::debug;

use crate::interceptor::{Interceptor, Services};
use crate::objects::{Object, ViewCtor, ViewDtor, ViewToken};
use crate::pipeline::variables::{FilterSetOptions, VariableInfo};

/// Which half of a dispatch a callback is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the real function; a veto suppresses the call
    Pre,
    /// After the real function; the return slot is filled
    Post,
}

/// Phases a filter subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum When {
    #[default]
    Before,
    After,
    Both,
}

impl When {
    pub fn includes(self, phase: Phase) -> bool {
        matches!(
            (self, phase),
            (When::Both, _) | (When::Before, Phase::Pre) | (When::After, Phase::Post)
        )
    }
}

/// Which calls a filter sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Catches {
    All,
    Functions(Vec<FunctionId>),
}

impl Catches {
    pub fn matches(&self, function: FunctionId) -> bool {
        match self {
            Catches::All => true,
            Catches::Functions(ids) => ids.contains(&function),
        }
    }
}

/// Context handed to every filter callback.
pub struct CallbackData<'a> {
    pub phase: Phase,
    pub filter_set: &'a str,
    pub filter: &'a str,
    /// Per-call scratch object, when any filter-set registered call views
    pub call_object: Option<&'a Object>,
    pub interceptor: &'a Interceptor,
}

impl CallbackData<'_> {
    pub fn services(&self) -> &Services {
        self.interceptor.services()
    }
}

/// Returns false to veto: the rest of the chain and, in the pre phase, the
/// real function are skipped.
pub type FilterFn = Arc<dyn Fn(&mut CallRecord, &CallbackData<'_>) -> bool + Send + Sync>;

/// Initialises a filter-set, registering its filters, signals and views.
pub type InitFn = Arc<dyn Fn(&mut FilterSetSetup<'_>) -> anyhow::Result<()> + Send + Sync>;

pub type ShutdownFn = Arc<dyn Fn(&Services) + Send + Sync>;

/// Registration record for a filter-set.
#[derive(Clone)]
pub struct FilterSetInfo {
    pub name: String,
    pub description: String,
    /// Sets this one must run before
    pub runs_before: Vec<String>,
    /// Sets this one must run after
    pub runs_after: Vec<String>,
    /// Sets loaded automatically when this one is enabled
    pub depends: Vec<String>,
    pub variables: Vec<VariableInfo>,
    pub(crate) init: InitFn,
    pub(crate) shutdown: Option<ShutdownFn>,
}

impl FilterSetInfo {
    pub fn new<F>(name: &str, description: &str, init: F) -> Self
    where
        F: Fn(&mut FilterSetSetup<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            runs_before: Vec::new(),
            runs_after: Vec::new(),
            depends: Vec::new(),
            variables: Vec::new(),
            init: Arc::new(init),
            shutdown: None,
        }
    }

    pub fn runs_before(mut self, other: &str) -> Self {
        self.runs_before.push(other.to_string());
        self
    }

    pub fn runs_after(mut self, other: &str) -> Self {
        self.runs_after.push(other.to_string());
        self
    }

    pub fn depends(mut self, other: &str) -> Self {
        self.depends.push(other.to_string());
        self
    }

    pub fn variable(mut self, variable: VariableInfo) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn on_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Fn(&Services) + Send + Sync + 'static,
    {
        self.shutdown = Some(Arc::new(shutdown));
        self
    }
}

impl fmt::Debug for FilterSetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSetInfo")
            .field("name", &self.name)
            .field("runs_before", &self.runs_before)
            .field("runs_after", &self.runs_after)
            .field("depends", &self.depends)
            .finish_non_exhaustive()
    }
}

/// A registered callback, as it sits in a dispatch chain.
pub struct Filter {
    pub(crate) name: String,
    pub(crate) filter_set: Arc<str>,
    pub(crate) catches: Catches,
    pub(crate) when: When,
    pub(crate) run_when_inactive: bool,
    pub(crate) callback: FilterFn,
}

impl Filter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter_set(&self) -> &str {
        &self.filter_set
    }

    pub fn catches(&self) -> &Catches {
        &self.catches
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("filter_set", &self.filter_set)
            .field("name", &self.name)
            .field("catches", &self.catches)
            .field("when", &self.when)
            .field("run_when_inactive", &self.run_when_inactive)
            .finish()
    }
}

/// Builder for one filter, returned by [`FilterSetSetup::filter_new`].
pub struct FilterDecl {
    name: String,
    catches: Catches,
    when: When,
    run_when_inactive: bool,
    callback: FilterFn,
}

impl FilterDecl {
    /// Subscribe to `function`. Ignored for catch-all filters.
    pub fn catches_function(&mut self, function: FunctionId) -> &mut Self {
        if let Catches::Functions(ids) = &mut self.catches {
            if !ids.contains(&function) {
                ids.push(function);
            }
        }
        self
    }

    pub fn when(&mut self, when: When) -> &mut Self {
        self.when = when;
        self
    }

    /// Run in the post-call phase only
    pub fn after_call(&mut self) -> &mut Self {
        self.when(When::After)
    }

    /// Keep running while the owning set is loaded but deactivated.
    pub fn run_when_inactive(&mut self) -> &mut Self {
        self.run_when_inactive = true;
        self
    }

    fn build(self, filter_set: &Arc<str>) -> Filter {
        Filter {
            name: self.name,
            filter_set: filter_set.clone(),
            catches: self.catches,
            when: self.when,
            run_when_inactive: self.run_when_inactive,
            callback: self.callback,
        }
    }
}

/// What a filter-set's init callback works with.
pub struct FilterSetSetup<'a> {
    name: Arc<str>,
    services: &'a Arc<Services>,
    options: &'a FilterSetOptions,
    filters: Vec<FilterDecl>,
    shutdown_hooks: Vec<Box<dyn FnOnce() + Send>>,
    call_views: Vec<ViewToken>,
}

/// What a successful init leaves behind for the pipeline to own.
pub(crate) struct SetupOutput {
    pub filters: Vec<Arc<Filter>>,
    pub hooks: Vec<Box<dyn FnOnce() + Send>>,
    pub call_views: Vec<ViewToken>,
}

impl<'a> FilterSetSetup<'a> {
    pub(crate) fn new(name: &str, services: &'a Arc<Services>, options: &'a FilterSetOptions) -> Self {
        Self {
            name: Arc::from(name),
            services,
            options,
            filters: Vec::new(),
            shutdown_hooks: Vec::new(),
            call_views: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self) -> &'a Arc<Services> {
        self.services
    }

    pub fn options(&self) -> &'a FilterSetOptions {
        self.options
    }

    /// Register a callback. With `catches_all` it sees every dispatched call;
    /// otherwise only the functions added through
    /// [`FilterDecl::catches_function`] or [`FilterSetSetup::catches_name`].
    pub fn filter_new<F>(&mut self, name: &str, catches_all: bool, callback: F) -> &mut FilterDecl
    where
        F: Fn(&mut CallRecord, &CallbackData<'_>) -> bool + Send + Sync + 'static,
    {
        self.filters.push(FilterDecl {
            name: name.to_string(),
            catches: if catches_all {
                Catches::All
            } else {
                Catches::Functions(Vec::new())
            },
            when: When::default(),
            run_when_inactive: false,
            callback: Arc::new(callback),
        });
        let last = self.filters.len() - 1;
        &mut self.filters[last]
    }

    /// Subscribe the most recently declared filter to the named functions that
    /// exist in the function table. Returns how many were found.
    pub fn catches_name(&mut self, names: &[&str]) -> usize {
        let services = self.services;
        let functions = &services.functions;
        let Some(decl) = self.filters.last_mut() else {
            return 0;
        };
        let mut found = 0;
        for name in names {
            match functions.lookup(name) {
                Some(id) => {
                    decl.catches_function(id);
                    found += 1;
                }
                None => debug!(filter_set = %self.name, function = name, "function not in table"),
            }
        }
        found
    }

    /// Run `hook` when this load of the filter-set is shut down.
    pub fn on_shutdown<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown_hooks.push(Box::new(hook));
    }

    /// Reserve `size` bytes in every per-call object. The view lives as long
    /// as this load of the filter-set and is released when it is disabled.
    pub fn call_view_new(
        &mut self,
        ctor: Option<ViewCtor>,
        dtor: Option<ViewDtor>,
        size: usize,
    ) -> ViewToken {
        let services = self.services;
        let view = services.objects.view_new(services.call_class, ctor, dtor, size);
        self.call_views.push(view);
        view
    }

    pub(crate) fn finish(self) -> SetupOutput {
        let filters = self
            .filters
            .into_iter()
            .map(|decl| Arc::new(decl.build(&self.name)))
            .collect();
        SetupOutput {
            filters,
            hooks: self.shutdown_hooks,
            call_views: self.call_views,
        }
    }

    /// Undo a failed init: its call views are released, hooks never run.
    pub(crate) fn abandon(self) {
        release_call_views(self.services, &self.call_views);
    }
}

pub(crate) fn release_call_views(services: &Services, views: &[ViewToken]) {
    for view in views {
        services.objects.view_remove(*view);
    }
}
