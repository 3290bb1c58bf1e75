//! Periodic statistics logging
//!
//! Every `interval` buffer swaps, samples all signals and logs how much each
//! one moved since the previous sample.

use std::sync::{Arc, Mutex};

use glscope_core::stats::{SignalRegistry, SignalSnapshot};
use glscope_core::{FilterSetInfo, VariableInfo, VariableKind};
use glscope_shared::utils::time::elapsed_secs;
use tracing::{debug, info};

use crate::stats_calls;

pub const NAME: &str = "logstats";

const DEFAULT_INTERVAL: u64 = 100;

/// One signal's movement between two samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDelta {
    pub name: String,
    pub delta: f64,
    /// Change per second
    pub rate: f64,
}

/// Signals that changed between `prev` and `next`, sorted by name.
pub fn deltas(prev: &SignalSnapshot, next: &SignalSnapshot) -> Vec<SignalDelta> {
    let elapsed = elapsed_secs(prev.taken_at, next.taken_at);
    let mut names: Vec<&String> = next.values.keys().collect();
    names.sort();
    names
        .into_iter()
        .filter_map(|name| {
            let delta = next.delta(prev, name);
            (delta.is_finite() && delta != 0.0).then(|| SignalDelta {
                name: name.clone(),
                delta,
                rate: if elapsed > 0.0 { delta / elapsed } else { 0.0 },
            })
        })
        .collect()
}

struct FrameCounter {
    frames: u64,
    last: SignalSnapshot,
}

/// Counts frames and reports every `interval` of them.
struct Reporter {
    interval: u64,
    signals: Arc<SignalRegistry>,
    state: Mutex<FrameCounter>,
}

impl Reporter {
    fn frame(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.frames += 1;
        if state.frames % self.interval != 0 {
            return;
        }
        let next = self.signals.gather();
        for d in deltas(&state.last, &next) {
            info!(frame = state.frames, signal = %d.name, delta = d.delta, rate = d.rate, "signal");
        }
        state.last = next;
    }
}

pub fn filter_set() -> FilterSetInfo {
    FilterSetInfo::new(NAME, "Logs signal changes every few frames", |setup| {
        let services = setup.services().clone();
        let interval = setup.options().get_uint("interval", DEFAULT_INTERVAL).max(1);
        let reporter = Reporter {
            interval,
            signals: services.signals.clone(),
            state: Mutex::new(FrameCounter {
                frames: 0,
                last: services.signals.gather(),
            }),
        };

        setup.filter_new("logstats", false, move |_, _| {
            reporter.frame();
            true
        });
        let found = setup.catches_name(services.contexts.backend().swap_functions());
        if found == 0 {
            debug!("no buffer swap function in table; logstats stays quiet");
        }
        Ok(())
    })
    .depends(stats_calls::NAME)
    .runs_after(stats_calls::NAME)
    .variable(VariableInfo::new(
        "interval",
        VariableKind::PositiveInt,
        "frames between reports [100]",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_skip_unchanged_signals() {
        let signals = SignalRegistry::new();
        let calls = signals.signal_new("calls:total", None).unwrap();
        let idle = signals.signal_new("idle", None).unwrap();
        idle.update(5.0);
        calls.add(1.0);
        let before = signals.gather();
        calls.add(10.0);
        let after = signals.gather();

        let d = deltas(&before, &after);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].name, "calls:total");
        assert_eq!(d[0].delta, 10.0);
    }

    #[test]
    fn test_reporter_samples_on_interval() {
        let signals = Arc::new(SignalRegistry::new());
        let frames = signals.signal_new("frames", None).unwrap();
        let reporter = Reporter {
            interval: 3,
            signals: signals.clone(),
            state: Mutex::new(FrameCounter {
                frames: 0,
                last: signals.gather(),
            }),
        };
        let first = reporter.state.lock().unwrap().last.taken_at;
        for _ in 0..2 {
            frames.add(1.0);
            reporter.frame();
        }
        assert_eq!(reporter.state.lock().unwrap().last.taken_at, first);
        frames.add(1.0);
        reporter.frame();
        let state = reporter.state.lock().unwrap();
        assert_eq!(state.frames, 3);
        assert_eq!(state.last.end("frames"), 3.0);
    }
}
