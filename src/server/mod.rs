//! Cooperative HTTP/1.1 server.
//!
//! Runs entirely inside the engine's frame loop: every tick the owner calls
//! [`HttpServer::poll_io`] to accept sockets and advance per-connection
//! parsing, dispatches any completed requests, and calls
//! [`HttpServer::flush`] to push pending response bytes and reap dead or
//! expired connections. No thread is ever spawned and no call blocks.
//!
//! The server is generic over the handler token `H` (a `Copy` value the
//! dispatcher resolves); it knows transport, not semantics. One request per
//! connection; every response closes.

pub mod request;
pub mod response;

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, warn};

use request::{find_head_end, parse_head, Request, RequestHead};
use response::Response;

/// Connection identifier, unique for the server's lifetime.
pub type ConnId = u64;

/// Guard against unbounded buffering from a misbehaving client.
const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum Phase {
    /// Accumulating request bytes.
    Reading,
    /// Request handed to the dispatcher; a continuation may be pending.
    Handling,
    /// Response queued; draining the write buffer.
    Writing,
    Closed,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Vec<u8>,
    head: Option<RequestHead>,
    head_end: usize,
    created: Instant,
    write_buf: Vec<u8>,
    written: usize,
    phase: Phase,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buf: Vec::new(),
            head: None,
            head_end: 0,
            created: Instant::now(),
            write_buf: Vec::new(),
            written: 0,
            phase: Phase::Reading,
        }
    }

    fn queue_response(&mut self, response: Response) {
        self.write_buf = response.into_bytes();
        self.written = 0;
        self.phase = Phase::Writing;
    }
}

pub struct HttpServer<H> {
    listener: Option<TcpListener>,
    addr: Option<SocketAddr>,
    conns: HashMap<ConnId, Connection>,
    next_id: ConnId,
    routes: IndexMap<String, H>,
    timeout: Duration,
}

impl<H: Copy> HttpServer<H> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            listener: None,
            addr: None,
            conns: HashMap::new(),
            next_id: 1,
            routes: IndexMap::new(),
            timeout,
        }
    }

    /// Register a handler under `"METHOD path"`.
    pub fn register(&mut self, method: &str, path: &str, handler: H) {
        self.routes.insert(format!("{} {}", method, path), handler);
    }

    pub fn lookup(&self, request: &Request) -> Option<H> {
        self.routes.get(&request.route_key()).copied()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Bind the loopback listener. Port 0 selects an ephemeral port; the
    /// chosen address is returned and kept for [`HttpServer::local_addr`].
    pub fn bind(&mut self, host: &str, port: u16) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        info!("bridge listening on http://{}", addr);
        self.listener = Some(listener);
        self.addr = Some(addr);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Stop accepting and drop every connection.
    pub fn shutdown(&mut self) {
        self.listener = None;
        self.addr = None;
        self.conns.clear();
    }

    pub fn is_open(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Accept pending sockets and advance parsing on every reading
    /// connection. Returns requests that completed this tick, ready for
    /// dispatch; protocol-level failures (oversize, malformed head, bad JSON
    /// on POST) are answered here and never reach the dispatcher.
    pub fn poll_io(&mut self) -> Vec<(ConnId, Request)> {
        self.accept_pending();

        let mut ready = Vec::new();
        for (&id, conn) in self.conns.iter_mut() {
            if conn.phase != Phase::Reading {
                continue;
            }
            if let Some(request) = Self::pump_connection(id, conn) {
                ready.push((id, request));
            }
        }
        ready
    }

    fn accept_pending(&mut self) {
        let listener = match &self.listener {
            Some(l) => l,
            None => return,
        };
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    let id = self.next_id;
                    self.next_id += 1;
                    debug!("conn {} accepted from {}", id, peer);
                    self.conns.insert(id, Connection::new(stream, peer));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Read available bytes and advance the parse state. Returns a complete
    /// request exactly once, flipping the connection to `Handling`.
    fn pump_connection(id: ConnId, conn: &mut Connection) -> Option<Request> {
        let mut chunk = [0u8; 4096];
        loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => {
                    // Peer closed before completing a request.
                    debug!("conn {} closed by peer {}", id, conn.peer);
                    conn.phase = Phase::Closed;
                    return None;
                }
                Ok(n) => {
                    conn.buf.extend_from_slice(&chunk[..n]);
                    if conn.buf.len() > MAX_REQUEST_BYTES {
                        conn.queue_response(Response::bad_request("Request too large"));
                        return None;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("conn {} read error: {}", id, e);
                    conn.phase = Phase::Closed;
                    return None;
                }
            }
        }

        if conn.head.is_none() {
            let end = find_head_end(&conn.buf)?;
            match parse_head(&conn.buf[..end]) {
                Ok(head) => {
                    conn.head = Some(head);
                    conn.head_end = end;
                }
                Err(e) => {
                    debug!("conn {} malformed request: {:?}", id, e);
                    conn.queue_response(Response::bad_request("Malformed HTTP request"));
                    return None;
                }
            }
        }

        let content_length = conn.head.as_ref().map(|h| h.content_length).unwrap_or(0);
        if conn.buf.len() < conn.head_end + content_length {
            return None;
        }

        let head = conn.head.take().expect("head parsed above");
        let body = conn.buf[conn.head_end..conn.head_end + content_length].to_vec();
        let (request, json_failed) = Request::assemble(head, body);

        if json_failed && request.method == "POST" {
            conn.queue_response(Response::bad_request("Invalid JSON in request body"));
            return None;
        }
        if request.method == "OPTIONS" {
            conn.queue_response(Response::preflight());
            return None;
        }

        conn.phase = Phase::Handling;
        Some(request)
    }

    /// Queue a response for a dispatched connection. A connection that was
    /// already reaped (timeout, peer gone) drops the response silently — the
    /// disconnected client is only discoverable at write time.
    pub fn respond(&mut self, id: ConnId, response: Response) {
        match self.conns.get_mut(&id) {
            Some(conn) => conn.queue_response(response),
            None => debug!("conn {} gone before response; dropping write", id),
        }
    }

    /// Drain write buffers, close finished connections, and reap anything
    /// past the connection timeout regardless of phase.
    pub fn flush(&mut self) {
        let timeout = self.timeout;
        self.conns.retain(|&id, conn| {
            if conn.created.elapsed() > timeout {
                debug!("conn {} timed out", id);
                return false;
            }
            if conn.phase == Phase::Writing {
                loop {
                    if conn.written >= conn.write_buf.len() {
                        let _ = conn.stream.flush();
                        conn.phase = Phase::Closed;
                        break;
                    }
                    match conn.stream.write(&conn.write_buf[conn.written..]) {
                        Ok(0) => {
                            conn.phase = Phase::Closed;
                            break;
                        }
                        Ok(n) => conn.written += n,
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("conn {} write failed: {}", id, e);
                            conn.phase = Phase::Closed;
                            break;
                        }
                    }
                }
            }
            conn.phase != Phase::Closed
        });
    }
}
