//! Process-wide interception runtime
//!
//! An [`Interceptor`] owns the function table, the object registry, the
//! signal registry, the trackers and the filter pipeline. It is built
//! once at startup with [`InterceptorBuilder`] and then shared by every
//! application thread.

use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;
use glscope_shared::{CallRecord, FunctionTable};
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::config::ChainConfig;
use crate::dispatch::{self, Outcome};
use crate::error::Result;
use crate::glwin::{Backend, NativeWindowSystem, WindowSystem};
use crate::objects::{ClassId, ObjectRegistry};
use crate::pipeline::{FilterSetInfo, FilterSetStatus, Pipeline};
use crate::stats::SignalRegistry;
use crate::trackbeginend::{self, BeginEndTracker};
use crate::trackcontext::{self, ContextTracker};
use crate::trackobjects::{self, ResourceTracker};

static GLOBAL: OnceCell<Arc<Interceptor>> = OnceCell::new();

/// What filter-sets reach through [`crate::pipeline::CallbackData`] and
/// [`crate::pipeline::FilterSetSetup`].
pub struct Services {
    pub functions: Arc<FunctionTable>,
    pub objects: Arc<ObjectRegistry>,
    pub signals: Arc<SignalRegistry>,
    pub contexts: Arc<ContextTracker>,
    pub resources: Arc<ResourceTracker>,
    pub begin_end: Arc<BeginEndTracker>,
    /// Root class of per-call scratch objects. Filter-sets add views to it
    /// through [`crate::pipeline::FilterSetSetup::call_view_new`].
    pub call_class: ClassId,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("functions", &self.functions.len())
            .field("signals", &self.signals.len())
            .field("contexts", &self.contexts)
            .finish_non_exhaustive()
    }
}

pub struct Interceptor {
    services: Arc<Services>,
    pipeline: Pipeline,
}

impl Interceptor {
    pub fn builder(functions: Arc<FunctionTable>) -> InterceptorBuilder {
        InterceptorBuilder::new(functions)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run the real function for `call` without any filters.
    pub fn call_real(&self, call: &mut CallRecord) -> Outcome {
        dispatch::call_real(&self.services.functions, call)
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.pipeline.enable(name, &self.services)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.pipeline.disable(name, &self.services)
    }

    pub fn activate(&self, name: &str) -> Result<()> {
        self.pipeline.activate(name, &self.services)
    }

    pub fn deactivate(&self, name: &str) -> Result<()> {
        self.pipeline.deactivate(name)
    }

    pub fn set_variable(&self, filter_set: &str, variable: &str, value: &str) -> Result<()> {
        self.pipeline.set_variable(filter_set, variable, value)
    }

    /// Loaded filter-sets, in the order their filters run.
    pub fn pipeline_order(&self) -> Vec<String> {
        self.pipeline.ordered_names()
    }

    pub fn filter_sets(&self) -> Vec<FilterSetStatus> {
        self.pipeline.list()
    }

    /// Set variables and enable every filter-set named in `config`, in file
    /// order. Stops at the first failure.
    pub fn apply_config(&self, config: &ChainConfig) -> anyhow::Result<()> {
        config.validate()?;
        for set in &config.filter_sets {
            for (variable, value) in &set.variables {
                let text = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.set_variable(&set.name, variable, &text)
                    .with_context(|| format!("Failed to set {}.{}", set.name, variable))?;
            }
            self.enable(&set.name)
                .with_context(|| format!("Failed to enable filter-set {}", set.name))?;
        }
        Ok(())
    }

    /// Disable every loaded filter-set, last in pipeline order first.
    pub fn shutdown(&self) {
        info!("shutting down interceptor");
        self.pipeline.shutdown_all(&self.services);
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("services", &self.services)
            .field("pipeline", &self.pipeline.ordered_names())
            .finish()
    }
}

/// Install the process-wide interceptor. Fails, handing it back, if one is
/// already installed.
pub fn install(interceptor: Arc<Interceptor>) -> std::result::Result<(), Arc<Interceptor>> {
    GLOBAL.set(interceptor)
}

pub fn global() -> Option<&'static Arc<Interceptor>> {
    GLOBAL.get()
}

pub struct InterceptorBuilder {
    functions: Arc<FunctionTable>,
    window: Option<Arc<dyn WindowSystem>>,
    filter_sets: Vec<FilterSetInfo>,
    orders: Vec<(String, String)>,
    depends: Vec<(String, String)>,
}

impl InterceptorBuilder {
    pub fn new(functions: Arc<FunctionTable>) -> Self {
        Self {
            functions,
            window: None,
            filter_sets: Vec::new(),
            orders: Vec::new(),
            depends: Vec::new(),
        }
    }

    /// Use `window` instead of the compiled backend's real entry points.
    pub fn window_system(mut self, window: Arc<dyn WindowSystem>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn filter_set(mut self, info: FilterSetInfo) -> Self {
        self.filter_sets.push(info);
        self
    }

    pub fn order(mut self, before: &str, after: &str) -> Self {
        self.orders.push((before.to_string(), after.to_string()));
        self
    }

    pub fn depends(mut self, base: &str, dependency: &str) -> Self {
        self.depends.push((base.to_string(), dependency.to_string()));
        self
    }

    /// Register everything collected so far. The built-in tracking sets
    /// (`trackcontext`, `trackobjects`, `trackdisplaylist` and
    /// `trackbeginend`) are always registered; each loads when something
    /// depends on it or it is enabled directly.
    pub fn build(self) -> Result<Arc<Interceptor>> {
        let window = self.window.unwrap_or_else(|| {
            Arc::new(NativeWindowSystem::new(
                Backend::compiled(),
                self.functions.clone(),
            ))
        });
        let objects = Arc::new(ObjectRegistry::new());
        let call_class = objects.class_new_transient("call");
        let contexts = Arc::new(ContextTracker::new(objects.clone(), window));
        // Tracker views go on before any context or namespace object exists.
        let resources = Arc::new(ResourceTracker::new(
            objects.clone(),
            contexts.clone(),
            self.functions.clone(),
        ));
        let begin_end = Arc::new(BeginEndTracker::new(&objects, contexts.clone()));

        let services = Arc::new(Services {
            functions: self.functions,
            objects,
            signals: Arc::new(SignalRegistry::new()),
            contexts,
            resources,
            begin_end,
            call_class,
        });
        let pipeline = Pipeline::new(services.functions.len());
        pipeline.register(trackcontext::filter_set())?;
        pipeline.register(trackobjects::filter_set())?;
        pipeline.register(trackobjects::display_list_filter_set())?;
        pipeline.register(trackbeginend::filter_set())?;
        for info in self.filter_sets {
            pipeline.register(info)?;
        }
        for (before, after) in &self.orders {
            pipeline.order(before, after);
        }
        for (base, dependency) in &self.depends {
            pipeline.depends(base, dependency);
        }
        debug!(
            functions = services.functions.len(),
            backend = %services.contexts.backend(),
            "interceptor built"
        );
        Ok(Arc::new(Interceptor { services, pipeline }))
    }
}
