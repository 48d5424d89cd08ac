//! The admin/control surface (C8): a dispatch table from request path
//! to handler, served over a minimal HTTP/1.1 listener.
//!
//! A hand-rolled accept loop over raw sockets with per-connection
//! counters, not a full web framework — `tokio`'s async TCP primitives
//! stand in for the embedded HTTP server every long-lived daemon here
//! needs.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("admin listener io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed request: method, path (without query string), and query
/// parameters.
pub struct AdminRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
}

/// What a handler returns; written back as a minimal HTTP/1.1 response.
pub struct AdminResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl AdminResponse {
    pub fn ok(content_type: &'static str, body: impl Into<String>) -> Self {
        AdminResponse {
            status: 200,
            content_type,
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        AdminResponse {
            status: 404,
            content_type: "text/plain",
            body: "not found\n".into(),
        }
    }
}

pub type Handler = Arc<dyn Fn(&AdminRequest) -> AdminResponse + Send + Sync>;

/// Counters tracked by the acceptor.
#[derive(Default)]
pub struct Counters {
    pub open_connections: AtomicU64,
    pub close_connections: AtomicU64,
    pub accept_errors: AtomicU64,
    pub accept_closures: AtomicU64,
    pub read_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> String {
        format!(
            "open_connections {}\nclose_connections {}\naccept_errors {}\naccept_closures {}\nread_errors {}\n",
            self.open_connections.load(Ordering::Relaxed),
            self.close_connections.load(Ordering::Relaxed),
            self.accept_errors.load(Ordering::Relaxed),
            self.accept_closures.load(Ordering::Relaxed),
            self.read_errors.load(Ordering::Relaxed),
        )
    }
}

/// A dispatch table from request path to handler, shared by
/// every daemon's admin listener.
pub struct Dispatcher {
    name: String,
    handlers: Mutex<HashMap<String, Handler>>,
    pub counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Dispatcher {
            name: name.into(),
            handlers: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register a handler for an exact path (`/`, `/config`,
    /// `/metrics`, plus daemon-specific paths like `/replay-start`).
    pub fn add_handler(
        &self,
        path: impl Into<String>,
        handler: impl Fn(&AdminRequest) -> AdminResponse + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert(path.into(), Arc::new(handler));
    }

    pub fn dispatch(&self, request: &AdminRequest) -> AdminResponse {
        let handler = self.handlers.lock().unwrap().get(&request.path).cloned();
        match handler {
            Some(handler) => handler(request),
            None => AdminResponse::not_found(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.name
    }
}

/// Register the three handlers every daemon exposes: liveness,
/// a configuration echo, and an aggregated counters exposition.
/// `config_echo` renders the daemon's current configuration (normally
/// YAML via `serde_yaml`).
pub fn register_standard_handlers(
    dispatcher: &Dispatcher,
    config_echo: impl Fn() -> String + Send + Sync + 'static,
) {
    dispatcher.add_handler("/", |_req| AdminResponse::ok("text/plain", "OK\n"));

    dispatcher.add_handler("/config", move |_req| {
        AdminResponse::ok("application/yaml", config_echo())
    });

    let counters = dispatcher.counters.clone();
    dispatcher.add_handler("/metrics", move |_req| {
        AdminResponse::ok("text/plain", counters.snapshot())
    });
}

/// Bind the admin listener. Split from [`run`] so daemons (and tests)
/// can learn the actual bound address when `addr`'s port is 0.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, AdminError> {
    Ok(TcpListener::bind(addr).await?)
}

/// Run the accept loop against an already-bound listener until
/// `shutdown` resolves — SIGINT/SIGTERM trigger graceful shutdown of
/// the admin server.
pub async fn run(
    dispatcher: Arc<Dispatcher>,
    listener: TcpListener,
    mut shutdown: impl Future<Output = ()> + Send + Unpin,
) -> Result<(), AdminError> {
    debug!(name = dispatcher.server_name(), "admin listener running");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("admin listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        dispatcher.counters.open_connections.fetch_add(1, Ordering::Relaxed);
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            handle_connection(dispatcher.clone(), stream).await;
                            dispatcher.counters.close_connections.fetch_add(1, Ordering::Relaxed);
                        });
                        debug!(%peer, "admin connection accepted");
                    }
                    Err(err) => {
                        dispatcher.counters.accept_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %err, "admin accept error");
                    }
                }
            }
        }
    }
}

/// Convenience combining [`bind`] and [`run`] for daemon `main`s that
/// do not need the bound address ahead of time.
pub async fn serve(
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + Unpin,
) -> Result<(), AdminError> {
    let listener = bind(addr).await?;
    run(dispatcher, listener, shutdown).await
}

async fn handle_connection(dispatcher: Arc<Dispatcher>, stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    match reader.read_line(&mut request_line).await {
        Ok(0) | Err(_) => {
            dispatcher.counters.accept_closures.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Ok(_) => {}
    }

    let request = match parse_request_line(&request_line) {
        Some(request) => request,
        None => {
            dispatcher.counters.read_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => {
                dispatcher.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => continue,
        }
    }

    let response = dispatcher.dispatch(&request);
    let body = response.body.into_bytes();
    let head = format!(
        "HTTP/1.1 {} {}\r\nServer: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        dispatcher.server_name(),
        response.content_type,
        body.len(),
    );
    let mut stream = reader.into_inner();
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    let _ = stream.write_all(&body).await;
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

fn parse_request_line(line: &str) -> Option<AdminRequest> {
    let line = line.trim_end();
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;
    let (path, query_str) = target.split_once('?').unwrap_or((target, ""));
    let query = query_str
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect();
    Some(AdminRequest {
        method,
        path: path.to_string(),
        query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn request_line_parses_path_and_query() {
        let req = parse_request_line("GET /replay-status?verbose=1 HTTP/1.1\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/replay-status");
        assert_eq!(req.query.get("verbose").map(String::as_str), Some("1"));
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        assert!(parse_request_line("\r\n").is_none());
    }

    #[test]
    fn dispatch_falls_back_to_not_found() {
        let dispatcher = Dispatcher::new("test");
        let req = AdminRequest {
            method: "GET".into(),
            path: "/nope".into(),
            query: HashMap::new(),
        };
        let response = dispatcher.dispatch(&req);
        assert_eq!(response.status, 404);
    }

    #[test]
    fn metrics_handler_reflects_counters() {
        let dispatcher = Dispatcher::new("test");
        register_standard_handlers(&dispatcher, || "book:\n  max-size: 5000\n".to_string());
        dispatcher.counters.accept_errors.fetch_add(3, Ordering::Relaxed);

        let req = AdminRequest {
            method: "GET".into(),
            path: "/metrics".into(),
            query: HashMap::new(),
        };
        let response = dispatcher.dispatch(&req);
        assert!(response.body.contains("accept_errors 3"));

        let req = AdminRequest {
            method: "GET".into(),
            path: "/config".into(),
            query: HashMap::new(),
        };
        let response = dispatcher.dispatch(&req);
        assert!(response.body.contains("max-size: 5000"));
    }

    #[tokio::test]
    async fn end_to_end_request_over_tcp() {
        let dispatcher = Arc::new(Dispatcher::new("jaybeams-test"));
        register_standard_handlers(&dispatcher, || String::new());

        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let dispatcher_clone = dispatcher.clone();
        let server = tokio::spawn(async move {
            run(dispatcher_clone, listener, Box::pin(async {
                let _ = shutdown_rx.await;
            }))
            .await
            .unwrap();
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("OK\n"));

        assert_eq!(dispatcher.counters.open_connections.load(Ordering::Relaxed), 1);

        let _ = shutdown_tx.send(());
        server.await.unwrap();
    }
}
