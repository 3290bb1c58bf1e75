//! Filter pipeline
//!
//! Filter-sets are registered once at startup, then enabled and disabled at
//! will. Enabling runs the set's init callback (loading its dependencies
//! first) and recomputes the pipeline order; disabling runs the shutdown
//! callbacks and drops the set's filters. Every change rebuilds a per-function
//! chain table which dispatch reads as an immutable snapshot, so callbacks run
//! without any pipeline lock held.

pub mod filter;
mod order;
pub mod variables;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::interceptor::Services;
use crate::objects::ViewToken;
use crate::sync::{lock, read, write};

pub use filter::{
    CallbackData, Catches, Filter, FilterDecl, FilterFn, FilterSetInfo, FilterSetSetup, InitFn,
    Phase, ShutdownFn, When,
};
pub use variables::{FilterSetOptions, VariableInfo, VariableKind, VariableValue};

use filter::{release_call_views, SetupOutput};

/// Lifecycle state of a registered filter-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSetState {
    Registered,
    /// Init ran but the set's filters are switched off, except those marked
    /// to run when inactive
    Loaded,
    Active,
}

/// Summary of a registered filter-set, for listings.
#[derive(Debug, Clone)]
pub struct FilterSetStatus {
    pub name: String,
    pub description: String,
    pub state: FilterSetState,
    pub variables: Vec<VariableInfo>,
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

struct FilterSetEntry {
    info: Arc<FilterSetInfo>,
    state: FilterSetState,
    options: FilterSetOptions,
    filters: Vec<Arc<Filter>>,
    shutdown_hooks: Vec<ShutdownHook>,
    call_views: Vec<ViewToken>,
}

/// Work needed to enable a set: sets to run init for, dependencies first,
/// and loaded-but-inactive sets to switch back on.
#[derive(Debug, Default)]
struct LoadPlan {
    load: Vec<usize>,
    reactivate: Vec<usize>,
}

#[derive(Default)]
struct PipelineState {
    sets: Vec<FilterSetEntry>,
    by_name: HashMap<String, usize>,
    /// Global `(before, after)` constraints
    orders: Vec<(String, String)>,
    /// Global `(base, dependency)` declarations
    depends: Vec<(String, String)>,
    /// Loaded sets, in pipeline order
    order: Vec<usize>,
}

impl PipelineState {
    fn index(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFilterSet(name.to_string()))
    }

    fn dependencies_of(&self, set: usize) -> Vec<String> {
        let info = &self.sets[set].info;
        let mut deps = info.depends.clone();
        deps.extend(
            self.depends
                .iter()
                .filter(|(base, _)| *base == info.name)
                .map(|(_, dep)| dep.clone()),
        );
        deps
    }

    /// What enabling `root` must do to it and its transitive dependencies.
    fn load_plan(&self, root: usize) -> Result<LoadPlan> {
        fn visit(
            state: &PipelineState,
            set: usize,
            seen: &mut HashSet<usize>,
            plan: &mut LoadPlan,
        ) -> Result<()> {
            if !seen.insert(set) {
                return Ok(());
            }
            for dep in state.dependencies_of(set) {
                let dep_index =
                    state
                        .by_name
                        .get(&dep)
                        .copied()
                        .ok_or_else(|| Error::MissingDependency {
                            filter_set: state.sets[set].info.name.clone(),
                            dependency: dep.clone(),
                        })?;
                visit(state, dep_index, seen, plan)?;
            }
            match state.sets[set].state {
                FilterSetState::Registered => plan.load.push(set),
                FilterSetState::Loaded => plan.reactivate.push(set),
                FilterSetState::Active => {}
            }
            Ok(())
        }

        let mut plan = LoadPlan::default();
        visit(self, root, &mut HashSet::new(), &mut plan)?;
        Ok(plan)
    }

    fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        let mut add = |before: &str, after: &str| {
            if let (Some(b), Some(a)) = (self.by_name.get(before), self.by_name.get(after)) {
                edges.push((*b, *a));
            }
        };
        for entry in &self.sets {
            for other in &entry.info.runs_before {
                add(&entry.info.name, other);
            }
            for other in &entry.info.runs_after {
                add(other, &entry.info.name);
            }
        }
        for (before, after) in &self.orders {
            add(before, after);
        }
        edges
    }

    /// Pipeline order over the loaded sets plus `extra`.
    fn compute_order(&self, extra: &[usize]) -> Result<Vec<usize>> {
        let mut nodes = self.order.clone();
        nodes.extend(extra.iter().filter(|n| !self.order.contains(n)));
        order::sort_preserving(&nodes, &self.edges(), &self.order).map_err(|stuck| {
            Error::OrderingCycle {
                involved: stuck.iter().map(|i| self.sets[*i].info.name.clone()).collect(),
            }
        })
    }

    fn build_chains(&self, function_count: usize) -> ChainTable {
        let mut table = ChainTable {
            pre: vec![Vec::new(); function_count],
            post: vec![Vec::new(); function_count],
        };
        for &set in &self.order {
            let entry = &self.sets[set];
            let active = entry.state == FilterSetState::Active;
            for filter in &entry.filters {
                if !active && !filter.run_when_inactive {
                    continue;
                }
                let ids: Box<dyn Iterator<Item = usize>> = match &filter.catches {
                    Catches::All => Box::new(0..function_count),
                    Catches::Functions(ids) => Box::new(
                        ids.iter()
                            .map(|id| id.index())
                            .filter(|i| *i < function_count),
                    ),
                };
                for i in ids {
                    if filter.when.includes(Phase::Pre) {
                        table.pre[i].push(filter.clone());
                    }
                    if filter.when.includes(Phase::Post) {
                        table.post[i].push(filter.clone());
                    }
                }
            }
        }
        table
    }
}

/// Per-function filter chains, in pipeline order.
#[derive(Debug, Default)]
pub(crate) struct ChainTable {
    pre: Vec<Vec<Arc<Filter>>>,
    post: Vec<Vec<Arc<Filter>>>,
}

impl ChainTable {
    pub(crate) fn chain(&self, function: usize, phase: Phase) -> &[Arc<Filter>] {
        let chains = match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
        };
        chains.get(function).map_or(&[], Vec::as_slice)
    }
}

pub struct Pipeline {
    function_count: usize,
    state: Mutex<PipelineState>,
    chains: RwLock<Arc<ChainTable>>,
}

impl Pipeline {
    pub(crate) fn new(function_count: usize) -> Self {
        Self {
            function_count,
            state: Mutex::new(PipelineState::default()),
            chains: RwLock::new(Arc::new(ChainTable {
                pre: vec![Vec::new(); function_count],
                post: vec![Vec::new(); function_count],
            })),
        }
    }

    /// Current chain snapshot; stays valid while the pipeline changes.
    pub(crate) fn chains(&self) -> Arc<ChainTable> {
        read(&self.chains).clone()
    }

    fn rebuild(&self, state: &PipelineState) {
        let table = Arc::new(state.build_chains(self.function_count));
        *write(&self.chains) = table;
    }

    pub fn register(&self, info: FilterSetInfo) -> Result<()> {
        let mut state = lock(&self.state);
        if state.by_name.contains_key(&info.name) {
            return Err(Error::DuplicateFilterSet(info.name));
        }
        let index = state.sets.len();
        state.by_name.insert(info.name.clone(), index);
        state.sets.push(FilterSetEntry {
            info: Arc::new(info),
            state: FilterSetState::Registered,
            options: FilterSetOptions::default(),
            filters: Vec::new(),
            shutdown_hooks: Vec::new(),
            call_views: Vec::new(),
        });
        Ok(())
    }

    /// Declare that `before` runs before `after` whenever both are loaded.
    pub fn order(&self, before: &str, after: &str) {
        lock(&self.state)
            .orders
            .push((before.to_string(), after.to_string()));
    }

    /// Declare that enabling `base` first enables `dependency`.
    pub fn depends(&self, base: &str, dependency: &str) {
        lock(&self.state)
            .depends
            .push((base.to_string(), dependency.to_string()));
    }

    /// Parse and store a variable. Takes effect at the set's next init.
    pub fn set_variable(&self, filter_set: &str, variable: &str, text: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let index = state.index(filter_set)?;
        let entry = &mut state.sets[index];
        let Some(info) = entry.info.variables.iter().find(|v| v.name == variable) else {
            return Err(Error::UnknownVariable {
                filter_set: filter_set.to_string(),
                variable: variable.to_string(),
            });
        };
        let value = info.kind.parse(text).map_err(|reason| Error::InvalidVariable {
            filter_set: filter_set.to_string(),
            variable: variable.to_string(),
            value: text.to_string(),
            reason,
        })?;
        entry.options.set(variable, value);
        Ok(())
    }

    /// Load (running init, dependencies first) and activate a filter-set.
    ///
    /// Dependencies that are loaded but deactivated are switched back on.
    /// On an ordering cycle or missing dependency nothing changes. If an init
    /// callback fails, sets loaded by this call are shut down again and the
    /// pipeline is left as it was.
    pub fn enable(&self, name: &str, services: &Arc<Services>) -> Result<()> {
        let (to_load, reactivate) = {
            let mut state = lock(&self.state);
            let root = state.index(name)?;
            let plan = state.load_plan(root)?;
            if plan.load.is_empty() {
                for set in &plan.reactivate {
                    state.sets[*set].state = FilterSetState::Active;
                    debug!(filter_set = %state.sets[*set].info.name, "filter-set reactivated");
                }
                if !plan.reactivate.is_empty() {
                    self.rebuild(&state);
                }
                return Ok(());
            }
            state.compute_order(&plan.load)?;
            let to_load = plan
                .load
                .into_iter()
                .map(|i| (i, state.sets[i].info.clone(), state.sets[i].options.clone()))
                .collect::<Vec<_>>();
            (to_load, plan.reactivate)
        };

        // Init runs unlocked so it may query the pipeline or issue calls.
        let mut loaded: Vec<LoadedSet> = Vec::new();
        for (index, info, options) in &to_load {
            let mut setup = FilterSetSetup::new(&info.name, services, options);
            match (info.init)(&mut setup) {
                Ok(()) => {
                    let SetupOutput {
                        filters,
                        hooks,
                        call_views,
                    } = setup.finish();
                    loaded.push(LoadedSet {
                        index: *index,
                        info: info.clone(),
                        filters,
                        hooks,
                        call_views,
                    });
                }
                Err(source) => {
                    warn!(filter_set = %info.name, error = %source, "filter-set init failed");
                    setup.abandon();
                    unload(loaded, services);
                    return Err(Error::InitFailed {
                        filter_set: info.name.clone(),
                        source,
                    });
                }
            }
        }

        let mut state = lock(&self.state);
        let indices: Vec<usize> = loaded.iter().map(|l| l.index).collect();
        let order = match state.compute_order(&indices) {
            Ok(order) => order,
            Err(e) => {
                drop(state);
                unload(loaded, services);
                return Err(e);
            }
        };
        for set in loaded {
            let entry = &mut state.sets[set.index];
            entry.state = FilterSetState::Active;
            entry.filters = set.filters;
            entry.shutdown_hooks = set.hooks;
            entry.call_views = set.call_views;
            info!(filter_set = %entry.info.name, "filter-set enabled");
        }
        for set in reactivate {
            let entry = &mut state.sets[set];
            if entry.state == FilterSetState::Loaded {
                entry.state = FilterSetState::Active;
                debug!(filter_set = %entry.info.name, "filter-set reactivated");
            }
        }
        state.order = order;
        self.rebuild(&state);
        Ok(())
    }

    /// Shut a filter-set down and remove its filters from every chain.
    ///
    /// The remaining sets keep their relative order. Disabling a set that is
    /// not loaded does nothing.
    pub fn disable(&self, name: &str, services: &Services) -> Result<()> {
        let (info, hooks, call_views) = {
            let mut state = lock(&self.state);
            let index = state.index(name)?;
            if state.sets[index].state == FilterSetState::Registered {
                return Ok(());
            }
            let dependents: Vec<String> = state
                .order
                .iter()
                .filter(|i| **i != index && state.dependencies_of(**i).iter().any(|d| d == name))
                .map(|i| state.sets[*i].info.name.clone())
                .collect();
            if !dependents.is_empty() {
                warn!(filter_set = name, ?dependents, "disabling a filter-set others depend on");
            }

            state.order.retain(|i| *i != index);
            let entry = &mut state.sets[index];
            entry.state = FilterSetState::Registered;
            entry.filters.clear();
            let hooks = std::mem::take(&mut entry.shutdown_hooks);
            let call_views = std::mem::take(&mut entry.call_views);
            let info = entry.info.clone();
            self.rebuild(&state);
            (info, hooks, call_views)
        };
        run_shutdown(&info, hooks, services);
        release_call_views(services, &call_views);
        info!(filter_set = name, "filter-set disabled");
        Ok(())
    }

    /// Switch a loaded set's filters back on, loading it first if needed.
    pub fn activate(&self, name: &str, services: &Arc<Services>) -> Result<()> {
        self.enable(name, services)
    }

    /// Switch a loaded set's filters off without shutting it down. Filters
    /// marked to run when inactive keep running.
    pub fn deactivate(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let index = state.index(name)?;
        if state.sets[index].state == FilterSetState::Active {
            state.sets[index].state = FilterSetState::Loaded;
            self.rebuild(&state);
            debug!(filter_set = name, "filter-set deactivated");
        }
        Ok(())
    }

    /// Disable every loaded set, last in pipeline order first.
    pub fn shutdown_all(&self, services: &Services) {
        let names: Vec<String> = {
            let state = lock(&self.state);
            state
                .order
                .iter()
                .rev()
                .map(|i| state.sets[*i].info.name.clone())
                .collect()
        };
        for name in names {
            if let Err(e) = self.disable(&name, services) {
                warn!(filter_set = %name, error = %e, "failed to disable filter-set");
            }
        }
    }

    pub fn state_of(&self, name: &str) -> Result<FilterSetState> {
        let state = lock(&self.state);
        let index = state.index(name)?;
        Ok(state.sets[index].state)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state_of(name)
            .is_ok_and(|s| s != FilterSetState::Registered)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state_of(name)
            .is_ok_and(|s| s == FilterSetState::Active)
    }

    /// Names of the loaded filter-sets, in pipeline order.
    pub fn ordered_names(&self) -> Vec<String> {
        let state = lock(&self.state);
        state
            .order
            .iter()
            .map(|i| state.sets[*i].info.name.clone())
            .collect()
    }

    /// Every registered set, in registration order.
    pub fn list(&self) -> Vec<FilterSetStatus> {
        lock(&self.state)
            .sets
            .iter()
            .map(|e| FilterSetStatus {
                name: e.info.name.clone(),
                description: e.info.description.clone(),
                state: e.state,
                variables: e.info.variables.clone(),
            })
            .collect()
    }

    pub fn options(&self, name: &str) -> Result<FilterSetOptions> {
        let state = lock(&self.state);
        let index = state.index(name)?;
        Ok(state.sets[index].options.clone())
    }
}

/// A set whose init succeeded during an enable that has not committed yet.
struct LoadedSet {
    index: usize,
    info: Arc<FilterSetInfo>,
    filters: Vec<Arc<Filter>>,
    hooks: Vec<ShutdownHook>,
    call_views: Vec<ViewToken>,
}

/// Shut down sets loaded by a failed enable, most recent first.
fn unload(loaded: Vec<LoadedSet>, services: &Services) {
    for set in loaded.into_iter().rev() {
        run_shutdown(&set.info, set.hooks, services);
        release_call_views(services, &set.call_views);
    }
}

fn run_shutdown(info: &FilterSetInfo, hooks: Vec<ShutdownHook>, services: &Services) {
    for hook in hooks.into_iter().rev() {
        hook();
    }
    if let Some(shutdown) = &info.shutdown {
        shutdown(services);
    }
}
