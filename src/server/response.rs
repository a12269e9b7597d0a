//! HTTP response assembly.
//!
//! Every response closes its connection and carries permissive CORS headers
//! so browser-based tooling can hit the bridge directly.

use serde_json::{json, Value};

use super::request::Request;

/// Content produced by a handler, before transport framing.
#[derive(Debug, Clone)]
pub enum Reply {
    /// JSON-ready value. `Value::Null` renders as `{"ok": true}`.
    Value(Value),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reply: Reply,
}

impl Response {
    pub fn json(value: Value) -> Self {
        Self {
            status: 200,
            reply: Reply::Value(value),
        }
    }

    pub fn from_reply(reply: Reply) -> Self {
        Self { status: 200, reply }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn bad_request(message: &str) -> Self {
        Self::json(json!({"error": message})).with_status(400)
    }

    pub fn not_found(request: &Request) -> Self {
        Self::json(json!({
            "error": "Route not found",
            "path": request.path,
            "method": request.method,
        }))
        .with_status(404)
    }

    pub fn internal(message: &str) -> Self {
        Self::json(json!({"error": format!("Internal: {}", message)})).with_status(500)
    }

    /// Empty CORS preflight answer.
    pub fn preflight() -> Self {
        Self {
            status: 204,
            reply: Reply::Text(String::new()),
        }
    }

    /// Serialize into wire bytes: status line, fixed headers, body.
    pub fn into_bytes(self) -> Vec<u8> {
        let (content_type, body): (&str, Vec<u8>) = match self.reply {
            Reply::Value(Value::Null) => (
                "application/json",
                serde_json::to_vec(&json!({"ok": true})).unwrap_or_default(),
            ),
            Reply::Value(v) => (
                "application/json",
                serde_json::to_vec(&v).unwrap_or_default(),
            ),
            Reply::Text(t) => ("text/plain; charset=utf-8", t.into_bytes()),
            Reply::Bytes(b) => ("application/octet-stream", b),
        };

        let mut out = Vec::with_capacity(body.len() + 256);
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status)).as_bytes(),
        );
        out.extend_from_slice(b"Access-Control-Allow-Origin: *\r\n");
        if self.status == 204 {
            out.extend_from_slice(b"Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n");
            out.extend_from_slice(b"Access-Control-Allow-Headers: Content-Type\r\n");
            out.extend_from_slice(b"Connection: close\r\n\r\n");
            return out;
        }
        out.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        out.extend_from_slice(b"Connection: close\r\n\r\n");
        out.extend_from_slice(&body);
        out
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
