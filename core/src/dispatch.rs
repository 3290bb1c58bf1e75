//! Dispatch core
//!
//! Runs one intercepted call through its pre-call chain, the real function and
//! its post-call chain. A per-thread depth counter sends calls issued from
//! inside a filter (or from the real function itself) straight to the real
//! entry point, so instrumentation never re-enters its own pipeline.

use std::cell::Cell;
use std::sync::Arc;

use glscope_shared::{CallRecord, FunctionTable};
use serde::Serialize;
use tracing::debug;

use crate::interceptor::Interceptor;
use crate::objects::Object;
use crate::pipeline::{CallbackData, Filter, Phase};

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// How a dispatched call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The real function ran (and post-call hooks after it)
    Completed,
    /// A pre-call filter suppressed the real function
    Vetoed { filter_set: String, filter: String },
    /// No real entry point is bound for the function
    Unavailable,
}

/// Dispatch nesting depth on the calling thread. Zero outside any dispatch.
pub fn depth() -> u32 {
    DEPTH.with(Cell::get)
}

struct DepthGuard {
    outer: u32,
}

impl DepthGuard {
    fn enter() -> Self {
        let outer = DEPTH.with(|d| {
            let outer = d.get();
            d.set(outer + 1);
            outer
        });
        Self { outer }
    }

    fn is_reentrant(&self) -> bool {
        self.outer > 0
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(self.outer));
    }
}

/// Invoke the bound real entry point, bypassing every filter.
pub(crate) fn call_real(functions: &FunctionTable, call: &mut CallRecord) -> Outcome {
    match functions.entry(call.function()) {
        Some(real) => {
            real(call);
            Outcome::Completed
        }
        None => Outcome::Unavailable,
    }
}

impl Interceptor {
    /// Run `call` through the pipeline.
    pub fn dispatch(&self, call: &mut CallRecord) -> Outcome {
        let guard = DepthGuard::enter();
        let services = self.services();
        if guard.is_reentrant() {
            return call_real(&services.functions, call);
        }

        let function = call.function();
        if function.index() >= services.functions.len() {
            crate::invariant_violation!("dispatch of unknown function {function}");
            return Outcome::Unavailable;
        }

        let chains = self.pipeline().chains();
        let call_object = (services.objects.class_size(services.call_class) > 0).then(|| {
            services
                .objects
                .object_new(services.call_class, u64::from(function.0), false)
        });

        let outcome = match self.run_chain(
            call,
            chains.chain(function.index(), Phase::Pre),
            Phase::Pre,
            call_object.as_ref(),
        ) {
            Some((filter_set, filter)) => Outcome::Vetoed { filter_set, filter },
            None => {
                let outcome = call_real(&services.functions, call);
                self.run_chain(
                    call,
                    chains.chain(function.index(), Phase::Post),
                    Phase::Post,
                    call_object.as_ref(),
                );
                outcome
            }
        };

        if let Some(object) = call_object {
            services.objects.object_free(&object);
        }
        drop(guard);
        outcome
    }

    /// Feed `call` to `chain` in order. Returns the vetoing filter, if any.
    fn run_chain(
        &self,
        call: &mut CallRecord,
        chain: &[Arc<Filter>],
        phase: Phase,
        call_object: Option<&Object>,
    ) -> Option<(String, String)> {
        for filter in chain {
            let data = CallbackData {
                phase,
                filter_set: filter.filter_set(),
                filter: filter.name(),
                call_object,
                interceptor: self,
            };
            if !(filter.callback)(call, &data) {
                debug!(
                    filter_set = filter.filter_set(),
                    filter = filter.name(),
                    function = self.services().functions.name(call.function()).unwrap_or("?"),
                    ?phase,
                    "call vetoed"
                );
                return Some((filter.filter_set().to_string(), filter.name().to_string()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_guard_restores_on_drop() {
        assert_eq!(depth(), 0);
        {
            let outer = DepthGuard::enter();
            assert!(!outer.is_reentrant());
            let inner = DepthGuard::enter();
            assert!(inner.is_reentrant());
            assert_eq!(depth(), 2);
        }
        assert_eq!(depth(), 0);
    }

    #[test]
    fn test_call_real_unbound() {
        let table = FunctionTable::from_names(&[("glFlush", 0, 0)]).unwrap();
        let id = table.lookup("glFlush").unwrap();
        let mut call = CallRecord::new(table.descriptor(id).unwrap(), vec![]);
        assert_eq!(call_real(&table, &mut call), Outcome::Unavailable);
    }
}
