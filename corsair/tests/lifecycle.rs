//! Signal-driven lifecycle: HUP worker churn, TTIN/TTOU pool resizing,
//! graceful shutdown.

mod common;

use std::thread;
use std::time::Duration;

use common::{lazy_request, ServerGuard};
use nix::sys::signal::Signal;

#[test]
fn test_hup_restarts_workers_without_losing_service() {
    let server = ServerGuard::spawn(&[
        "--port",
        "16690",
        "16691",
        "--min_servers",
        "3",
        "--max_servers",
        "6",
        "--check_interval",
        "100",
    ]);

    let ctx = zmq::Context::new();
    let reply = lazy_request(
        &ctx,
        "tcp://localhost:16690",
        b"before",
        10,
        Duration::from_millis(1000),
    )
    .expect("no reply before HUP");
    assert_eq!(reply, b"before");

    // Restart every worker, then demand service immediately. Requests
    // dispatched to dying workers disappear; the retries cover the gap
    // while replacements are forked.
    server.signal(Signal::SIGHUP);
    for i in 0..10u8 {
        let payload = [b'r', i];
        let reply = lazy_request(
            &ctx,
            "tcp://localhost:16690",
            &payload,
            8,
            Duration::from_millis(1000),
        )
        .unwrap_or_else(|| panic!("request {i} lost after HUP"));
        assert_eq!(reply, payload);
    }

    assert_eq!(server.terminate(), 0);
}

#[test]
fn test_ttin_ttou_resize_the_pool() {
    let server = ServerGuard::spawn_with_stderr(&[
        "--port",
        "16700",
        "16701",
        "--min_servers",
        "1",
        "--max_servers",
        "20",
        "--check_interval",
        "100",
    ]);

    let ctx = zmq::Context::new();
    let reply = lazy_request(
        &ctx,
        "tcp://localhost:16700",
        b"warmup",
        10,
        Duration::from_millis(1000),
    )
    .expect("no reply during warmup");
    assert_eq!(reply, b"warmup");

    // Five raises then two lowers; spaced out so no two deliveries of the
    // same (non-queuing) signal coalesce.
    for _ in 0..5 {
        server.signal(Signal::SIGTTIN);
        thread::sleep(Duration::from_millis(150));
    }
    for _ in 0..2 {
        server.signal(Signal::SIGTTOU);
        thread::sleep(Duration::from_millis(150));
    }
    thread::sleep(Duration::from_millis(300));

    let (code, stderr) = server.terminate_collect_stderr();
    assert_eq!(code, 0);
    assert_eq!(stderr.matches("raised worker limits").count(), 5, "{stderr}");
    assert_eq!(stderr.matches("lowered worker limits").count(), 2, "{stderr}");
    // 20 + 5 - 2: the net resize is observable in the last adjustment.
    assert!(stderr.contains("max_servers=23"), "{stderr}");
}

#[test]
fn test_sigterm_exits_cleanly() {
    let server = ServerGuard::spawn(&[
        "--port",
        "16710",
        "16711",
        "--min_servers",
        "2",
        "--max_servers",
        "4",
        "--check_interval",
        "100",
    ]);

    let ctx = zmq::Context::new();
    let reply = lazy_request(
        &ctx,
        "tcp://localhost:16710",
        b"ping",
        10,
        Duration::from_millis(1000),
    )
    .expect("no reply before shutdown");
    assert_eq!(reply, b"ping");

    assert_eq!(server.terminate(), 0);
}

#[test]
fn test_sigterm_mid_request_still_replies() {
    // One worker, and every request takes a full second: SIGTERM lands
    // while the worker is provably still computing.
    let server = ServerGuard::spawn_example("sleepy_server", &["16730", "16731", "1000"]);

    let ctx = zmq::Context::new();
    let warm = lazy_request(
        &ctx,
        "tcp://localhost:16730",
        b"warm",
        10,
        Duration::from_millis(2500),
    )
    .expect("no reply during warmup");
    assert_eq!(warm, b"WARM");

    let client = thread::spawn(|| {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::REQ).expect("socket");
        socket.set_linger(0).expect("linger");
        socket.set_rcvtimeo(8000).expect("rcvtimeo");
        socket.connect("tcp://localhost:16730").expect("connect");
        socket.send(&b"inflight"[..], 0).expect("send");
        socket.recv_bytes(0)
    });

    // Let the request reach the worker and start its one-second nap,
    // then terminate the supervisor mid-request.
    thread::sleep(Duration::from_millis(400));
    server.signal(Signal::SIGTERM);

    let reply = client
        .join()
        .expect("client thread panicked")
        .expect("in-flight reply lost during drain");
    assert_eq!(reply, b"INFLIGHT");

    assert_eq!(server.terminate(), 0);
}

#[test]
fn test_worker_crash_mid_request_is_replaced() {
    let server = ServerGuard::spawn_example("sleepy_server", &["16740", "16741", "100"]);

    let ctx = zmq::Context::new();
    let warm = lazy_request(
        &ctx,
        "tcp://localhost:16740",
        b"warm",
        10,
        Duration::from_millis(1500),
    )
    .expect("no reply during warmup");
    assert_eq!(warm, b"WARM");

    // The magic payload aborts the worker mid-request: the client sees
    // no reply at all.
    let lost = lazy_request(
        &ctx,
        "tcp://localhost:16740",
        b"crash",
        1,
        Duration::from_millis(1500),
    );
    assert!(lost.is_none(), "a crashed worker cannot have replied");

    // The supervisor reaps the corpse and forks a replacement; service
    // resumes for retrying clients.
    let reply = lazy_request(
        &ctx,
        "tcp://localhost:16740",
        b"back",
        10,
        Duration::from_millis(1500),
    )
    .expect("pool did not recover after worker crash");
    assert_eq!(reply, b"BACK");

    assert_eq!(server.terminate(), 0);
}

#[test]
fn test_sigquit_exits_cleanly() {
    let server = ServerGuard::spawn(&[
        "--port",
        "16720",
        "16721",
        "--min_servers",
        "1",
        "--max_servers",
        "2",
        "--check_interval",
        "100",
    ]);

    let ctx = zmq::Context::new();
    let reply = lazy_request(
        &ctx,
        "tcp://localhost:16720",
        b"ping",
        10,
        Duration::from_millis(1000),
    )
    .expect("no reply before shutdown");
    assert_eq!(reply, b"ping");

    server.signal(Signal::SIGQUIT);
    // terminate() sends a redundant SIGTERM; the QUIT already queued wins
    // the race either way and the exit stays clean.
    assert_eq!(server.terminate(), 0);
}
