//! Shared helpers for end-to-end tests: spawn the server binary and talk
//! to it the way a real client would (lazy-pirate retries).

#![allow(dead_code)]

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// A running server binary, killed on drop so a failing assertion never
/// leaks a process tree.
pub struct ServerGuard {
    child: Option<Child>,
}

impl ServerGuard {
    /// Spawn the compiled `corsair` binary with the given arguments.
    pub fn spawn(args: &[&str]) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_corsair"))
            .args(args)
            .spawn()
            .expect("failed to spawn corsair");
        Self { child: Some(child) }
    }

    /// Spawn a compiled example binary; examples build alongside the test
    /// targets and land next to the main binary.
    pub fn spawn_example(name: &str, args: &[&str]) -> Self {
        let mut path = PathBuf::from(env!("CARGO_BIN_EXE_corsair"));
        path.pop();
        path.push("examples");
        path.push(name);
        let child = Command::new(&path)
            .args(args)
            .spawn()
            .unwrap_or_else(|e| panic!("failed to spawn example {name}: {e}"));
        Self { child: Some(child) }
    }

    /// Same, but with stderr captured for log assertions.
    pub fn spawn_with_stderr(args: &[&str]) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_corsair"))
            .args(args)
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn corsair");
        Self { child: Some(child) }
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.as_ref().expect("server already waited").id() as i32)
    }

    pub fn signal(&self, signal: Signal) {
        kill(self.pid(), signal).expect("failed to signal server");
    }

    /// Send SIGTERM and wait for the exit code.
    pub fn terminate(mut self) -> i32 {
        self.signal(Signal::SIGTERM);
        let mut child = self.child.take().expect("server already waited");
        let status = child.wait().expect("failed to wait for server");
        status.code().unwrap_or(-1)
    }

    /// Send SIGTERM, wait, and return (exit code, captured stderr).
    pub fn terminate_collect_stderr(mut self) -> (i32, String) {
        self.signal(Signal::SIGTERM);
        let mut child = self.child.take().expect("server already waited");
        let status = child.wait().expect("failed to wait for server");
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr).expect("failed to read stderr");
        }
        (status.code().unwrap_or(-1), stderr)
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// One lazy-pirate request: fresh REQ socket per attempt, bounded receive,
/// retry on timeout. Returns `None` when every attempt timed out.
pub fn lazy_request(
    ctx: &zmq::Context,
    endpoint: &str,
    payload: &[u8],
    attempts: u32,
    timeout: Duration,
) -> Option<Vec<u8>> {
    for _ in 0..attempts {
        let socket = ctx.socket(zmq::REQ).expect("socket");
        socket.set_linger(0).expect("linger");
        socket
            .set_rcvtimeo(timeout.as_millis() as i32)
            .expect("rcvtimeo");
        socket.connect(endpoint).expect("connect");
        socket.send(payload, 0).expect("send");
        match socket.recv_bytes(0) {
            Ok(reply) => return Some(reply),
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => panic!("client receive failed: {e}"),
        }
    }
    None
}
