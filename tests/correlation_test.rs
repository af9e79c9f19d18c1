//! Correlation tests
//!
//! Many caller threads share one worker. Each must get its own response,
//! timeouts must not leak table entries, and a timed-out caller must not
//! disturb the next one.

use pitaya_daq::config::{MockConfig, WorkerConfig};
use pitaya_daq::protocol::{Params, PONG};
use pitaya_daq::{WorkerError, WorkerManager};
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;

fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => panic!("params must be an object, got {other}"),
    }
}

fn started(config: WorkerConfig) -> WorkerManager {
    let manager = WorkerManager::new();
    manager
        .start_worker(&config)
        .expect("Failed to start mock worker");
    manager
}

#[test]
fn test_each_caller_gets_its_own_response() {
    const THREADS: usize = 16;
    const CALLS_PER_THREAD: usize = 25;

    let manager = started(WorkerConfig::mock());

    thread::scope(|scope| {
        for thread_id in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                for call in 0..CALLS_PER_THREAD {
                    let marker = json!({"thread": thread_id, "call": call});
                    let data = manager
                        .send_command("echo", params(marker.clone()), Duration::from_secs(5))
                        .expect("echo failed");
                    assert_eq!(data, marker, "thread {thread_id} got someone else's reply");
                }
            });
        }
    });

    assert_eq!(manager.pending_count(), 0);
    manager.shutdown();
}

#[test]
fn test_concurrent_pings() {
    const THREADS: usize = 10;

    let manager = started(WorkerConfig::mock());

    let replies: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let manager = &manager;
                scope.spawn(move || {
                    manager.send_command("ping", Params::new(), Duration::from_secs(5))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("caller thread panicked"))
            .collect()
    });

    assert_eq!(replies.len(), THREADS);
    for reply in replies {
        assert_eq!(reply.expect("ping failed"), json!(PONG));
    }
    assert_eq!(manager.pending_count(), 0);
    manager.shutdown();
}

#[test]
fn test_timeout_isolation() {
    let manager = started(WorkerConfig {
        mock: MockConfig {
            seed: Some(1),
            latency: Duration::from_millis(200),
        },
        ..WorkerConfig::mock()
    });

    let err = manager
        .send_command("ping", Params::new(), Duration::from_millis(10))
        .expect_err("tiny timeout must expire");
    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert_eq!(manager.pending_count(), 0);

    // The orphaned reply is dropped; the next caller still gets its own.
    let data = manager
        .send_command("ping", Params::new(), Duration::from_secs(2))
        .expect("ping after timeout");
    assert_eq!(data, json!(PONG));
    assert!(manager.is_worker_running());
    assert_eq!(manager.pending_count(), 0);
    manager.shutdown();
}

#[test]
fn test_table_is_empty_after_mixed_outcomes() {
    let manager = started(WorkerConfig {
        mock: MockConfig {
            seed: Some(2),
            latency: Duration::from_millis(20),
        },
        ..WorkerConfig::mock()
    });

    thread::scope(|scope| {
        for thread_id in 0..8u64 {
            let manager = &manager;
            scope.spawn(move || {
                for call in 0..10u64 {
                    let result = match (thread_id + call) % 4 {
                        0 => manager.send_command("ping", Params::new(), Duration::from_millis(1)),
                        1 => manager.send_command(
                            "no_such_command",
                            Params::new(),
                            Duration::from_secs(5),
                        ),
                        2 => manager.send_command(
                            "pid_configure",
                            params(json!({"channel": "pid0", "p": 1.0, "i": 0.0})),
                            Duration::from_secs(5),
                        ),
                        _ => manager.send_command("ping", Params::new(), Duration::from_secs(5)),
                    };
                    match result {
                        Ok(_) | Err(WorkerError::Timeout { .. } | WorkerError::Command { .. }) => {}
                        Err(other) => panic!("unexpected error: {other:?}"),
                    }
                }
            });
        }
    });

    assert_eq!(manager.pending_count(), 0);
    manager.shutdown();
    assert_eq!(manager.pending_count(), 0);
}

#[test]
fn test_idempotent_configuration() {
    let setup = params(json!({
        "channel": "asg0",
        "waveform": "square",
        "frequency": 1000.0,
        "amplitude": 0.5,
        "offset": 0.1,
        "output_direct": "out1",
        "trigger_source": "immediately"
    }));
    let timeout = Duration::from_secs(1);
    let read_state = |manager: &WorkerManager| {
        manager
            .send_command("asg_get_state", params(json!({"channel": "asg0"})), timeout)
            .expect("asg_get_state failed")
    };

    let once = started(WorkerConfig::mock());
    once.send_command("asg_setup", setup.clone(), timeout)
        .expect("asg_setup failed");
    let state_once = read_state(&once);
    once.shutdown();

    let twice = started(WorkerConfig::mock());
    twice
        .send_command("asg_setup", setup.clone(), timeout)
        .expect("asg_setup failed");
    twice
        .send_command("asg_setup", setup, timeout)
        .expect("asg_setup failed");
    let state_twice = read_state(&twice);
    twice.shutdown();

    assert_eq!(state_once, state_twice);
    assert_eq!(state_once["waveform"], json!("square"));
    assert_eq!(state_once["trigger_source"], json!("immediately"));
}
