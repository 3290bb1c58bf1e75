//! Statistics signals
//!
//! Filters update named signals from the dispatch path; reporting filters read
//! them through snapshots taken outside that path. Each signal integrates its
//! value over wall-clock time so reporters can compute time averages.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::sync::{lock, read, write};

/// Combines the current value with an increment.
pub type CombineFn = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

#[derive(Debug)]
struct SignalState {
    value: f64,
    integral: f64,
    last_updated: Option<Instant>,
}

impl SignalState {
    fn advance(&mut self, now: Instant) {
        if let Some(last) = self.last_updated {
            if self.value.is_finite() {
                self.integral += self.value * now.duration_since(last).as_secs_f64();
            }
        }
        self.last_updated = Some(now);
    }
}

/// A named accumulating counter.
pub struct Signal {
    name: String,
    combine: Option<CombineFn>,
    state: Mutex<SignalState>,
}

impl Signal {
    fn new(name: &str, combine: Option<CombineFn>) -> Self {
        Self {
            name: name.to_string(),
            combine,
            state: Mutex::new(SignalState {
                value: f64::NAN,
                integral: 0.0,
                last_updated: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Combine `dv` into the value (summation unless a combine function was
    /// given). The first add on a signal with no value sets it to `dv`.
    pub fn add(&self, dv: f64) {
        let mut state = lock(&self.state);
        state.advance(Instant::now());
        state.value = if !state.value.is_finite() {
            dv
        } else {
            match &self.combine {
                Some(combine) => combine(state.value, dv),
                None => state.value + dv,
            }
        };
    }

    /// Replace the value.
    pub fn update(&self, value: f64) {
        let mut state = lock(&self.state);
        state.advance(Instant::now());
        state.value = value;
    }

    /// Current value; NaN until first set.
    pub fn value(&self) -> f64 {
        lock(&self.state).value
    }

    fn sample(&self, now: Instant) -> SignalValue {
        let mut state = lock(&self.state);
        state.advance(now);
        SignalValue {
            value: state.value,
            integral: state.integral,
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("custom_combine", &self.combine.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalValue {
    pub value: f64,
    /// Value integrated over time, in value-seconds
    pub integral: f64,
}

/// Point-in-time copy of every signal.
#[derive(Debug, Clone)]
pub struct SignalSnapshot {
    pub taken_at: Instant,
    pub values: HashMap<String, SignalValue>,
}

impl SignalSnapshot {
    pub fn get(&self, name: &str) -> Option<SignalValue> {
        self.values.get(name).copied()
    }

    /// Value at the earlier snapshot
    pub fn start(prev: &SignalSnapshot, name: &str) -> f64 {
        prev.get(name).map_or(f64::NAN, |v| v.value)
    }

    /// Value at this snapshot
    pub fn end(&self, name: &str) -> f64 {
        self.get(name).map_or(f64::NAN, |v| v.value)
    }

    /// Change in value since `prev`.
    pub fn delta(&self, prev: &SignalSnapshot, name: &str) -> f64 {
        let start = Self::start(prev, name);
        let end = self.end(name);
        // A signal first set between the two snapshots counts from zero
        if start.is_nan() && end.is_finite() && prev.values.contains_key(name) {
            return end;
        }
        end - start
    }

    /// Time-weighted average value between `prev` and this snapshot.
    pub fn average(&self, prev: &SignalSnapshot, name: &str) -> f64 {
        let (Some(a), Some(b)) = (prev.get(name), self.get(name)) else {
            return f64::NAN;
        };
        let elapsed = self.taken_at.duration_since(prev.taken_at).as_secs_f64();
        if elapsed <= 0.0 {
            return f64::NAN;
        }
        (b.integral - a.integral) / elapsed
    }
}

/// Registry of named signals.
#[derive(Default)]
pub struct SignalRegistry {
    signals: RwLock<HashMap<String, Arc<Signal>>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal. Names are unique for the lifetime of the signal.
    pub fn signal_new(&self, name: &str, combine: Option<CombineFn>) -> Result<Arc<Signal>> {
        let mut signals = write(&self.signals);
        if signals.contains_key(name) {
            return Err(Error::DuplicateSignal(name.to_string()));
        }
        let signal = Arc::new(Signal::new(name, combine));
        signals.insert(name.to_string(), signal.clone());
        Ok(signal)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Signal>> {
        read(&self.signals).get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Signal>> {
        write(&self.signals).remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.signals).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read(&self.signals).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.signals).is_empty()
    }

    /// Sample every signal at one instant.
    pub fn gather(&self) -> SignalSnapshot {
        let signals: Vec<Arc<Signal>> = read(&self.signals).values().cloned().collect();
        let taken_at = Instant::now();
        let values = signals
            .iter()
            .map(|s| (s.name.clone(), s.sample(taken_at)))
            .collect();
        SignalSnapshot { taken_at, values }
    }
}

impl fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("signals", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_add_sets_value() {
        let reg = SignalRegistry::new();
        let s = reg.signal_new("calls:total", None).unwrap();
        assert!(s.value().is_nan());
        s.add(2.0);
        s.add(3.0);
        assert_eq!(s.value(), 5.0);
        s.update(1.0);
        assert_eq!(s.value(), 1.0);
    }

    #[test]
    fn test_custom_combine() {
        let reg = SignalRegistry::new();
        let s = reg.signal_new("peak", Some(Arc::new(f64::max))).unwrap();
        for v in [3.0, 9.0, 4.0] {
            s.add(v);
        }
        assert_eq!(s.value(), 9.0);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let reg = SignalRegistry::new();
        reg.signal_new("frames", None).unwrap();
        assert!(matches!(
            reg.signal_new("frames", None),
            Err(Error::DuplicateSignal(name)) if name == "frames"
        ));
        reg.remove("frames");
        assert!(reg.signal_new("frames", None).is_ok());
    }

    #[test]
    fn test_concurrent_add() {
        const THREADS: usize = 8;
        const ADDS: usize = 10_000;

        let reg = SignalRegistry::new();
        let s = reg.signal_new("hits", None).unwrap();
        s.update(0.0);
        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..ADDS {
                        s.add(1.0);
                    }
                });
            }
        });
        assert_eq!(s.value(), (THREADS * ADDS) as f64);
    }

    #[test]
    fn test_snapshot_delta_and_average() {
        let reg = SignalRegistry::new();
        let s = reg.signal_new("frames", None).unwrap();
        s.update(10.0);
        let first = reg.gather();
        std::thread::sleep(Duration::from_millis(20));
        s.add(5.0);
        let second = reg.gather();

        assert_eq!(second.delta(&first, "frames"), 5.0);
        assert_eq!(SignalSnapshot::start(&first, "frames"), 10.0);
        assert_eq!(second.end("frames"), 15.0);
        let avg = second.average(&first, "frames");
        assert!((9.99..=15.01).contains(&avg), "average {avg}");
        assert!(second.delta(&first, "missing").is_nan());
    }
}
