//! Minimal HTTP/1.1 server that plays back scripted API replies for integration tests.
//!
//! Each accepted connection consumes the next reply in the script; once the
//! script is exhausted the last reply repeats. Every request (path, headers,
//! body) is recorded for assertions.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    /// JSON (or any) body with a status and optional `Retry-After` seconds.
    Json {
        status: u16,
        body: String,
        retry_after: Option<u64>,
    },
    /// `text/event-stream` response; each entry is sent as one `data:` event.
    /// The connection closes after the last one.
    Sse { events: Vec<String> },
    /// Like `Sse`, but keeps the connection open and silent afterwards until
    /// the client hangs up.
    SseThenStall { events: Vec<String> },
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Json {
            status: 200,
            body: body.to_string(),
            retry_after: None,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Reply::Json {
            status,
            body: body.to_string(),
            retry_after: None,
        }
    }

    pub fn sse(events: &[&str]) -> Self {
        Reply::Sse {
            events: events.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn sse_then_stall(events: &[&str]) -> Self {
        Reply::SseThenStall {
            events: events.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct ApiServer {
    /// Base URL, e.g. "http://127.0.0.1:12345/v1/".
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    hangups: Arc<AtomicUsize>,
}

impl ApiServer {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Stalled connections the client has closed.
    pub fn hangups(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread. Runs until the process exits.
pub fn start(script: Vec<Reply>) -> ApiServer {
    assert!(!script.is_empty(), "script needs at least one reply");
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);
    let hangups = Arc::new(AtomicUsize::new(0));
    let closed = Arc::clone(&hangups);
    let script = Arc::new(script);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let recorded = Arc::clone(&recorded);
            let script = Arc::clone(&script);
            let closed = Arc::clone(&closed);
            thread::spawn(move || {
                if handle(stream, &script, &recorded) {
                    closed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    ApiServer {
        base_url: format!("http://127.0.0.1:{}/v1/", port),
        requests,
        hangups,
    }
}

/// Returns true when a stalled connection was closed by the client.
fn handle(mut stream: TcpStream, script: &[Reply], recorded: &Mutex<Vec<Recorded>>) -> bool {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some(request) = read_request(&mut stream) else {
        return false;
    };
    let reply = {
        let mut log = recorded.lock().unwrap();
        let index = log.len().min(script.len() - 1);
        log.push(request);
        script[index].clone()
    };
    match reply {
        Reply::Json {
            status,
            body,
            retry_after,
        } => {
            let retry = retry_after
                .map(|s| format!("Retry-After: {}\r\n", s))
                .unwrap_or_default();
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                status,
                reason(status),
                body.len(),
                retry,
                body
            );
            let _ = stream.write_all(response.as_bytes());
            false
        }
        Reply::Sse { events } => {
            let _ = write_events(&mut stream, &events);
            false
        }
        Reply::SseThenStall { events } => {
            if !write_events(&mut stream, &events) {
                return false;
            }
            wait_for_hangup(&mut stream)
        }
    }
}

/// Sends the SSE head and one `data:` frame per event. False on write error.
fn write_events(stream: &mut TcpStream, events: &[String]) -> bool {
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
    if stream.write_all(head.as_bytes()).is_err() {
        return false;
    }
    for event in events {
        let frame = format!("data: {}\n\n", event);
        if stream.write_all(frame.as_bytes()).is_err() {
            return false;
        }
        let _ = stream.flush();
        thread::sleep(Duration::from_millis(5));
    }
    true
}

/// Blocks (up to a minute) until the peer closes the connection.
fn wait_for_hangup(stream: &mut TcpStream) -> bool {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(100)));
    let mut buf = [0u8; 64];
    for _ in 0..600 {
        match stream.read(&mut buf) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(_) => return true,
        }
    }
    false
}

/// Reads headers and a `Content-Length` body.
fn read_request(stream: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&buf[..header_end]).ok()?.to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = (header_end + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).into_owned();
    Some(Recorded {
        method,
        path,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
