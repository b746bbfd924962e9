//! Lazy Pirate client
//!
//! The client half of the reliability pattern the server implements: the
//! broker never retries or times out on a client's behalf, so a reliable
//! client uses a bounded receive and reopens its socket to retry.
//!
//! Run a server first:
//!
//! ```text
//! corsair --port 6660 6661 --min_servers 2
//! ```
//!
//! then:
//!
//! ```text
//! cargo run --example lazy_pirate -- tcp://localhost:6660 hello
//! ```

use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);
const REQUEST_RETRIES: u32 = 3;

fn request(ctx: &zmq::Context, endpoint: &str, payload: &[u8]) -> Option<Vec<u8>> {
    for attempt in 1..=REQUEST_RETRIES {
        // A REQ socket that missed its reply is wedged; a fresh socket per
        // attempt resets the send/recv cycle.
        let socket = ctx.socket(zmq::REQ).expect("failed to create socket");
        socket.set_linger(0).expect("failed to set linger");
        socket
            .set_rcvtimeo(REQUEST_TIMEOUT.as_millis() as i32)
            .expect("failed to set receive timeout");
        socket.connect(endpoint).expect("failed to connect");

        socket.send(payload, 0).expect("failed to send");
        match socket.recv_bytes(0) {
            Ok(reply) => return Some(reply),
            Err(zmq::Error::EAGAIN) => {
                eprintln!("no reply within {REQUEST_TIMEOUT:?} (attempt {attempt}), retrying");
            }
            Err(e) => {
                eprintln!("receive failed: {e}");
                return None;
            }
        }
    }
    None
}

fn main() {
    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .unwrap_or_else(|| "tcp://localhost:6660".to_string());
    let payload = args.next().unwrap_or_else(|| "hello".to_string());

    let ctx = zmq::Context::new();
    match request(&ctx, &endpoint, payload.as_bytes()) {
        Some(reply) => println!("{}", String::from_utf8_lossy(&reply)),
        None => {
            eprintln!("server unreachable after {REQUEST_RETRIES} attempts");
            std::process::exit(1);
        }
    }
}
