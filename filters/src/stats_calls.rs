//! Call counters
//!
//! Creates one signal per function in the table, `calls:<name>`, plus
//! `calls:total`, and adds one to the matching pair on every dispatched call.

use std::sync::Arc;

use glscope_core::stats::{Signal, SignalRegistry};
use glscope_core::{FilterSetInfo, Services};

pub const NAME: &str = "stats_calls";

/// Signal counting every dispatched call
pub const TOTAL_SIGNAL: &str = "calls:total";

pub fn signal_name(function: &str) -> String {
    format!("calls:{function}")
}

pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(NAME, "Counts calls per function and in total", |setup| {
        let services = setup.services().clone();
        let mut created = Vec::with_capacity(services.functions.len() + 1);
        let counters = match create_all(&services, &mut created) {
            Ok(counters) => counters,
            Err(e) => {
                remove_all(&services.signals, &created);
                return Err(e);
            }
        };

        setup.filter_new("stats_calls", true, move |call, _| {
            if let Some(signal) = counters.by_function.get(call.function().index()) {
                signal.add(1.0);
            }
            counters.total.add(1.0);
            true
        });

        let signals = services.signals.clone();
        setup.on_shutdown(move || remove_all(&signals, &created));
        Ok(())
    })
}

struct CallSignals {
    by_function: Vec<Arc<Signal>>,
    total: Arc<Signal>,
}

fn create_all(services: &Services, created: &mut Vec<String>) -> anyhow::Result<CallSignals> {
    let signals = &services.signals;
    let mut by_function = Vec::with_capacity(services.functions.len());
    for descriptor in services.functions.iter() {
        let name = signal_name(&descriptor.name);
        by_function.push(signals.signal_new(&name, None)?);
        created.push(name);
    }
    let total = signals.signal_new(TOTAL_SIGNAL, None)?;
    created.push(TOTAL_SIGNAL.to_string());
    Ok(CallSignals { by_function, total })
}

fn remove_all(signals: &SignalRegistry, names: &[String]) {
    for name in names {
        signals.remove(name);
    }
}
