//! HTTP/1.1 request parsing.
//!
//! The header boundary is located in the raw byte buffer, never in a decoded
//! string — `Content-Length` counts bytes, and multi-byte UTF-8 in a header
//! or body must not shift the cut.

use std::collections::HashMap;

use serde_json::Value;

/// A fully received request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Percent-decoded query parameters.
    pub query: HashMap<String, String>,
    /// Header map with lowercased keys.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Parsed JSON body when the content type says `application/json`.
    pub json_body: Option<Value>,
}

/// Parsed request head (everything before the body).
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub content_length: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    MalformedRequestLine,
    MalformedHeader,
    BadContentLength,
}

/// Byte offset just past the `\r\n\r\n` head terminator, if present.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parse the request line and headers from `head` (terminator included).
pub fn parse_head(head: &[u8]) -> Result<RequestHead, ParseError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::MalformedRequestLine)?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or(ParseError::MalformedRequestLine)?
        .to_uppercase();
    let target = parts.next().ok_or(ParseError::MalformedRequestLine)?;
    // "HTTP/1.1" trailer is tolerated but not required.

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, parse_query(q)),
        None => (target, HashMap::new()),
    };

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(ParseError::MalformedHeader)?;
        headers.insert(name.trim().to_lowercase(), value.trim().to_string());
    }

    let content_length = match headers.get("content-length") {
        Some(raw) => raw.parse::<usize>().map_err(|_| ParseError::BadContentLength)?,
        None => 0,
    };

    Ok(RequestHead {
        method,
        path: percent_decode(path, false),
        query,
        headers,
        content_length,
    })
}

/// Parse `a=1&b=two%20words` into a decoded map.
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        map.insert(percent_decode(key, true), percent_decode(value, true));
    }
    map
}

/// Decode `%XX` escapes; in query components `+` also reads as a space.
/// Invalid escapes pass through untouched.
pub fn percent_decode(input: &str, plus_as_space: bool) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| u8::from_str_radix(&String::from_utf8_lossy(h), 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl Request {
    /// Assemble a request once the body is complete. JSON parsing is
    /// attempted only when the content type asks for it; the result reports
    /// whether that parse failed (POST callers turn that into a 400).
    pub fn assemble(head: RequestHead, body: Vec<u8>) -> (Request, bool) {
        let is_json = head
            .headers
            .get("content-type")
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let mut json_failed = false;
        let json_body = if is_json && !body.is_empty() {
            match serde_json::from_slice::<Value>(&body) {
                Ok(v) => Some(v),
                Err(_) => {
                    json_failed = true;
                    None
                }
            }
        } else {
            None
        };

        (
            Request {
                method: head.method,
                path: head.path,
                query: head.query,
                headers: head.headers,
                body,
                json_body,
            },
            json_failed,
        )
    }

    /// Route key in the form `"METHOD path"`.
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    fn json_field(&self, name: &str) -> Option<&Value> {
        self.json_body.as_ref().and_then(|b| b.get(name))
    }

    /// String parameter from the JSON body, falling back to the query string.
    /// Empty strings count as absent so `ref=""` never shadows `path`.
    pub fn str_param(&self, name: &str) -> Option<String> {
        if let Some(v) = self.json_field(name) {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    return Some(s.to_string());
                }
                return None;
            }
        }
        self.query
            .get(name)
            .filter(|s| !s.is_empty())
            .cloned()
    }

    pub fn f64_param(&self, name: &str) -> Option<f64> {
        if let Some(v) = self.json_field(name) {
            return v.as_f64();
        }
        self.query.get(name).and_then(|s| s.parse().ok())
    }

    pub fn u32_param(&self, name: &str) -> Option<u32> {
        self.f64_param(name).map(|f| f.max(0.0) as u32)
    }

    pub fn bool_param(&self, name: &str) -> Option<bool> {
        if let Some(v) = self.json_field(name) {
            if let Some(b) = v.as_bool() {
                return Some(b);
            }
        }
        self.query.get(name).map(|s| s == "true" || s == "1")
    }

    /// Raw JSON parameter (body only) for values of arbitrary shape.
    pub fn value_param(&self, name: &str) -> Option<Value> {
        self.json_field(name).cloned()
    }
}
