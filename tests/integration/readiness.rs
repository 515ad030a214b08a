use std::{
    net::TcpListener,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use cyfire::{
    endpoint::{PortProbe, ServiceEndpoint},
    error::HarnessError,
    readiness::{ReadinessPolicy, ReadinessWaiter},
};

fn policy(timeout_ms: u64, poll_ms: u64) -> ReadinessPolicy {
    ReadinessPolicy {
        timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(poll_ms),
        reuse_existing_server: true,
    }
}

#[test]
fn timeout_fires_near_the_deadline() {
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let waiter = ReadinessWaiter::new(move |_: &ServiceEndpoint| {
        *counter.lock().unwrap() += 1;
        false
    });

    let started = Instant::now();
    let err = waiter
        .wait_until_ready(&ServiceEndpoint::from_port(9099), &policy(200, 50))
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));
    assert!(elapsed >= Duration::from_millis(200), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    let probes = *calls.lock().unwrap();
    assert!((3..=6).contains(&probes), "probed {probes} times");
    assert!(err.to_string().contains("http://localhost:9099"));
}

#[test]
fn second_probe_resolves_after_one_interval() {
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&stamps);
    let waiter = ReadinessWaiter::new(move |_: &ServiceEndpoint| {
        let mut stamps = recorder.lock().unwrap();
        stamps.push(Instant::now());
        stamps.len() >= 2
    });

    waiter
        .wait_until_ready(&ServiceEndpoint::from_port(9099), &policy(5_000, 100))
        .unwrap();

    let stamps = stamps.lock().unwrap();
    assert_eq!(stamps.len(), 2);
    let gap = stamps[1] - stamps[0];
    assert!(gap >= Duration::from_millis(100), "gap {gap:?}");
    assert!(gap < Duration::from_millis(300), "gap {gap:?}");
}

#[test]
fn real_listener_is_detected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = ServiceEndpoint::parse(&format!("tcp://127.0.0.1:{port}")).unwrap();

    let waiter = ReadinessWaiter::new(PortProbe::with_timeout(Duration::from_millis(500)).unwrap());
    waiter.wait_until_ready(&endpoint, &policy(2_000, 50)).unwrap();
}
