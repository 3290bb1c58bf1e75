use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use glscope_core::{Backend, Error, HeadlessWindowSystem, Interceptor, Outcome};
use glscope_filters::{logstats, register_builtin, stats_calls, stats_calltimes, trace};
use glscope_shared::{CallRecord, FunctionId, FunctionTable, Value};

const FUNCTIONS: &[(&str, u32, usize)] = &[
    ("glClear", 0, 1),
    ("glFlush", 0, 0),
    ("glDrawArrays", 0, 3),
    ("glXSwapBuffers", 1, 2),
];

fn interceptor() -> Arc<Interceptor> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let functions = Arc::new(FunctionTable::from_names(FUNCTIONS).unwrap());
    register_builtin(Interceptor::builder(functions))
        .window_system(Arc::new(HeadlessWindowSystem::new(Backend::Glx)))
        .build()
        .unwrap()
}

fn call(interceptor: &Interceptor, id: FunctionId) -> Outcome {
    let functions = &interceptor.services().functions;
    let descriptor = functions.descriptor(id).unwrap();
    let args = vec![Value::UInt(0); descriptor.arg_count];
    let mut call = CallRecord::new(descriptor, args);
    interceptor.dispatch(&mut call)
}

fn signal(interceptor: &Interceptor, name: &str) -> f64 {
    interceptor
        .services()
        .signals
        .get(name)
        .map_or(f64::NAN, |s| s.value())
}

#[test]
fn test_stats_calls_counts_every_dispatch() -> Result<()> {
    let gl = interceptor();
    gl.enable(stats_calls::NAME)?;

    let count = gl.services().functions.len() as u32;
    for i in 0..1000u32 {
        // No real entry points are bound; the calls are still counted.
        assert_eq!(call(&gl, FunctionId(i % count)), Outcome::Unavailable);
    }
    assert_eq!(signal(&gl, stats_calls::TOTAL_SIGNAL), 1000.0);
    assert_eq!(signal(&gl, &stats_calls::signal_name("glClear")), 250.0);
    assert!(signal(&gl, &stats_calls::signal_name("glFlush")) > 0.0);
    Ok(())
}

#[test]
fn test_stats_calls_counts_across_threads() -> Result<()> {
    let gl = interceptor();
    gl.enable(stats_calls::NAME)?;
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..500 {
                    call(&gl, FunctionId(1));
                }
            });
        }
    });
    assert_eq!(signal(&gl, stats_calls::TOTAL_SIGNAL), 2000.0);
    Ok(())
}

#[test]
fn test_disable_removes_signals() -> Result<()> {
    let gl = interceptor();
    gl.enable(stats_calls::NAME)?;
    assert!(gl.services().signals.get(stats_calls::TOTAL_SIGNAL).is_some());
    gl.disable(stats_calls::NAME)?;
    assert!(gl.services().signals.is_empty());

    // Re-enabling starts from scratch
    gl.enable(stats_calls::NAME)?;
    call(&gl, FunctionId(0));
    assert_eq!(signal(&gl, stats_calls::TOTAL_SIGNAL), 1.0);
    Ok(())
}

#[test]
fn test_logstats_pulls_in_stats_calls() -> Result<()> {
    let gl = interceptor();
    gl.set_variable(logstats::NAME, "interval", "2")?;
    gl.enable(logstats::NAME)?;
    assert_eq!(gl.pipeline_order(), [stats_calls::NAME, logstats::NAME]);

    let swap = gl.services().functions.lookup("glXSwapBuffers").unwrap();
    for _ in 0..4 {
        call(&gl, FunctionId(0));
        call(&gl, swap);
    }
    assert_eq!(signal(&gl, &stats_calls::signal_name("glXSwapBuffers")), 4.0);
    Ok(())
}

#[test]
fn test_logstats_rejects_zero_interval() {
    let gl = interceptor();
    let err = gl.set_variable(logstats::NAME, "interval", "0").unwrap_err();
    assert!(matches!(err, Error::InvalidVariable { .. }));
}

#[test]
fn test_trace_formats_and_group_filter() -> Result<()> {
    let gl = interceptor();
    gl.set_variable(trace::NAME, "format", "json")?;
    gl.set_variable(trace::NAME, "group", "1")?;
    gl.set_variable(trace::NAME, "level", "info")?;
    gl.enable(trace::NAME)?;
    assert_eq!(call(&gl, FunctionId(0)), Outcome::Unavailable);
    Ok(())
}

#[test]
fn test_trace_bad_level_fails_init() {
    let gl = interceptor();
    gl.set_variable(trace::NAME, "level", "loud").unwrap();
    let err = gl.enable(trace::NAME).unwrap_err();
    assert!(matches!(err, Error::InitFailed { .. }));
    assert!(!gl.pipeline().is_loaded(trace::NAME));
}

#[test]
fn test_builtin_listing() {
    let gl = interceptor();
    let names: Vec<String> = gl.filter_sets().into_iter().map(|s| s.name).collect();
    for expected in [stats_calls::NAME, stats_calltimes::NAME, trace::NAME, logstats::NAME] {
        assert!(names.iter().any(|n| n == expected), "{expected} missing");
    }
}

#[test]
fn test_stats_calltimes_accumulates_call_duration() -> Result<()> {
    let gl = interceptor();
    gl.services()
        .functions
        .bind_by_name(
            "glFlush",
            Arc::new(|_: &mut CallRecord| std::thread::sleep(Duration::from_millis(5))),
        )
        .unwrap();
    gl.enable(stats_calltimes::NAME)?;
    gl.enable(stats_calls::NAME)?;
    assert_eq!(gl.pipeline_order(), [stats_calls::NAME, stats_calltimes::NAME]);

    let flush = gl.services().functions.lookup("glFlush").unwrap();
    for _ in 0..3 {
        assert_eq!(call(&gl, flush), Outcome::Completed);
    }
    call(&gl, FunctionId(0));

    let flushing = signal(&gl, &stats_calltimes::signal_name("glFlush"));
    assert!(flushing >= 0.015, "only {flushing}s recorded");
    assert!(signal(&gl, stats_calltimes::TOTAL_SIGNAL) >= flushing);
    assert_eq!(signal(&gl, &stats_calls::signal_name("glFlush")), 3.0);
    Ok(())
}

#[test]
fn test_stats_calltimes_disable_releases_call_view() -> Result<()> {
    let gl = interceptor();
    let call_class = gl.services().call_class;
    gl.enable(stats_calltimes::NAME)?;
    assert_eq!(gl.services().objects.class_size(call_class), 8);
    call(&gl, FunctionId(0));

    gl.disable(stats_calltimes::NAME)?;
    assert_eq!(gl.services().objects.class_size(call_class), 0);
    assert!(gl.services().signals.get(stats_calltimes::TOTAL_SIGNAL).is_none());

    gl.enable(stats_calltimes::NAME)?;
    call(&gl, FunctionId(0));
    assert!(signal(&gl, stats_calltimes::TOTAL_SIGNAL) >= 0.0);
    Ok(())
}
