//! Integration harness: runs the demo sim + bridge on an engine thread, the
//! way a real embedding would, and talks to it over plain loopback TCP.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::Value;

use scenebridge::bridge::RuntimeBridge;
use scenebridge::config::BridgeConfig;
use scenebridge::sim::{demo, SimEngine};

pub struct Harness {
    pub addr: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(BridgeConfig {
            runtime_port: 0,
            ..BridgeConfig::default()
        })
    }

    pub fn start_with(mut config: BridgeConfig) -> Self {
        // Ephemeral port regardless of what the caller tweaked.
        config.runtime_port = 0;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (addr_tx, addr_rx) = mpsc::channel();

        let handle = std::thread::spawn(move || {
            let mut sim = SimEngine::new("harness");
            demo::build(&mut sim);
            let mut bridge = RuntimeBridge::new(config);
            let addr = bridge.start(&mut sim).expect("bridge bind");
            addr_tx.send(addr).expect("report addr");

            let mut last = Instant::now();
            while !stop_flag.load(Ordering::Relaxed) {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f64();
                last = now;
                sim.tick(dt);
                bridge.tick(&mut sim);
                std::thread::sleep(Duration::from_millis(2));
            }
            bridge.stop(&mut sim);
        });

        let addr = addr_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("engine thread started");
        Self {
            addr,
            stop,
            handle: Some(handle),
        }
    }

    /// Send raw request bytes, return (status, full response text).
    pub fn raw(&self, request: &[u8]) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .unwrap();
        stream.write_all(request).expect("write request");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("read response");
        let text = String::from_utf8_lossy(&out).into_owned();
        let status = text
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        (status, text)
    }

    fn request(&self, method: &str, path: &str, body: Option<&Value>) -> (u16, Value) {
        let body_bytes = body
            .map(|b| serde_json::to_vec(b).expect("encode body"))
            .unwrap_or_default();
        let mut request = format!(
            "{} {} HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: {}\r\n",
            method,
            path,
            body_bytes.len()
        );
        if body.is_some() {
            request.push_str("Content-Type: application/json\r\n");
        }
        request.push_str("\r\n");

        let mut bytes = request.into_bytes();
        bytes.extend_from_slice(&body_bytes);
        let (status, text) = self.raw(&bytes);

        let json = text
            .split_once("\r\n\r\n")
            .map(|(_, b)| b)
            .and_then(|b| serde_json::from_str(b).ok())
            .unwrap_or(Value::Null);
        (status, json)
    }

    pub fn get(&self, path: &str) -> (u16, Value) {
        self.request("GET", path, None)
    }

    pub fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.request("POST", path, Some(&body))
    }

    /// GET expecting HTTP 200; returns the body.
    pub fn get_ok(&self, path: &str) -> Value {
        let (status, body) = self.get(path);
        assert_eq!(status, 200, "GET {} -> {} ({})", path, status, body);
        body
    }

    /// POST expecting HTTP 200; returns the body.
    pub fn post_ok(&self, path: &str, body: Value) -> Value {
        let (status, out) = self.post(path, body);
        assert_eq!(status, 200, "POST {} -> {} ({})", path, status, out);
        out
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Find a node record in a snapshot tree by name.
pub fn find_node<'a>(nodes: &'a [Value], name: &str) -> Option<&'a Value> {
    for node in nodes {
        if node["name"] == name {
            return Some(node);
        }
        if let Some(children) = node["children"].as_array() {
            if let Some(found) = find_node(children, name) {
                return Some(found);
            }
        }
    }
    None
}
