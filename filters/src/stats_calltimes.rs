//! Call timings
//!
//! Accumulates the wall-clock seconds spent in each function, as
//! `calltimes:<name>`, plus `calltimes:total`. The start time is kept in a
//! per-call view so concurrent calls on different threads never mix.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glscope_core::pipeline::When;
use glscope_core::stats::{Signal, SignalRegistry};
use glscope_core::{FilterSetInfo, Phase, Services};

use crate::stats_calls;

pub const NAME: &str = "stats_calltimes";

/// Signal accumulating the time spent in every dispatched call
pub const TOTAL_SIGNAL: &str = "calltimes:total";

pub fn signal_name(function: &str) -> String {
    format!("calltimes:{function}")
}

pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(NAME, "Accumulates time spent per function and in total", |setup| {
        let services = setup.services().clone();
        let mut created = Vec::with_capacity(services.functions.len() + 1);
        let timers = match create_all(&services, &mut created) {
            Ok(timers) => timers,
            Err(e) => {
                remove_all(&services.signals, &created);
                return Err(e);
            }
        };

        let epoch = Instant::now();
        let view = setup.call_view_new(None, None, 8);
        setup
            .filter_new("stats_calltimes", true, move |call, data| {
                let Some(object) = data.call_object else {
                    return true;
                };
                let now = epoch.elapsed();
                match data.phase {
                    Phase::Pre => {
                        let nanos = u64::try_from(now.as_nanos()).unwrap_or(u64::MAX);
                        object.with_view(view, |bytes| bytes.copy_from_slice(&nanos.to_ne_bytes()));
                    }
                    Phase::Post => {
                        let started = object
                            .with_view(view, |bytes| <[u8; 8]>::try_from(&bytes[..]).ok())
                            .flatten()
                            .map(|b| Duration::from_nanos(u64::from_ne_bytes(b)));
                        let Some(started) = started else {
                            return true;
                        };
                        let secs = now.saturating_sub(started).as_secs_f64();
                        if let Some(signal) = timers.by_function.get(call.function().index()) {
                            signal.add(secs);
                        }
                        timers.total.add(secs);
                    }
                }
                true
            })
            .when(When::Both);

        let signals = services.signals.clone();
        setup.on_shutdown(move || remove_all(&signals, &created));
        Ok(())
    })
    .runs_after(stats_calls::NAME)
}

struct CallTimers {
    by_function: Vec<Arc<Signal>>,
    total: Arc<Signal>,
}

fn create_all(services: &Services, created: &mut Vec<String>) -> anyhow::Result<CallTimers> {
    let signals = &services.signals;
    let mut by_function = Vec::with_capacity(services.functions.len());
    for descriptor in services.functions.iter() {
        let name = signal_name(&descriptor.name);
        by_function.push(signals.signal_new(&name, None)?);
        created.push(name);
    }
    let total = signals.signal_new(TOTAL_SIGNAL, None)?;
    created.push(TOTAL_SIGNAL.to_string());
    Ok(CallTimers { by_function, total })
}

fn remove_all(signals: &SignalRegistry, names: &[String]) {
    for name in names {
        signals.remove(name);
    }
}
