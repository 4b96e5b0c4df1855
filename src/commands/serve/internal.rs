//! Internal implementation of the verification server

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::microserver::{self, HttpRequest, HttpResponse};
use super::ServeOptions;
use sqlgrade::verify::{ComparisonOutcome, RunError, RunMode, Verifier};

/// Environment variable holding the bearer token for POST endpoints
pub const TOKEN_ENV: &str = "SQLGRADE_SERVE_TOKEN";

// === Server state ===

/// Server state shared across connection threads
pub struct ServerState {
    start_time: Instant,
    version: String,
    verifier: Arc<Verifier>,
    /// Bearer token required on POST endpoints, if any
    token: Option<String>,
    run_mode: RunMode,
}

impl ServerState {
    pub fn new(verifier: Arc<Verifier>, token: Option<String>, run_mode: RunMode) -> Self {
        Self {
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            verifier,
            token,
            run_mode,
        }
    }

    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// === API types ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_secs: u64,
}

/// POST /api/v1/runner body
#[derive(Deserialize)]
struct RunRequest {
    query: String,
}

/// POST /api/v1/runner/validate body
#[derive(Deserialize)]
struct ValidateRequest {
    user_query: String,
    correct_query: String,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status_code: u16,
    message: &'a str,
    details: serde_json::Value,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: ErrorBody<'a>,
}

// === Helpers ===

/// Generate a random 32-byte hex token
pub fn generate_token() -> String {
    (0..32)
        .map(|_| format!("{:02x}", fastrand::u8(..)))
        .collect()
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "localhost" | "::1")
}

/// Token to require: the configured one, or a fresh one when exposed beyond loopback
pub fn resolve_token(host: &str, configured: Option<String>) -> Option<String> {
    match configured.filter(|t| !t.is_empty()) {
        Some(token) => Some(token),
        None if !is_loopback(host) => Some(generate_token()),
        None => None,
    }
}

/// Check bearer token authorization
fn check_auth(request: &HttpRequest, token: &str) -> bool {
    request
        .header("Authorization")
        .map(|h| h == format!("Bearer {}", token))
        .unwrap_or(false)
}

fn json(status: u16, value: &impl Serialize) -> HttpResponse {
    let mut response = HttpResponse::new(status).with_header("Content-Type", "application/json");
    response.body = serde_json::to_vec(value).unwrap_or_default();
    response
}

fn with_standard_headers(response: HttpResponse) -> HttpResponse {
    response
        .with_header("X-Content-Type-Options", "nosniff")
        .with_header("X-Frame-Options", "DENY")
        .with_header("Access-Control-Allow-Origin", "*")
}

fn json_success(data: &impl Serialize) -> HttpResponse {
    json(200, &Envelope { success: true, data })
}

/// Consistent JSON error response
fn json_error(status: u16, message: &str) -> HttpResponse {
    json_error_with(status, message, serde_json::Value::Null)
}

fn json_error_with(status: u16, message: &str, details: serde_json::Value) -> HttpResponse {
    json(
        status,
        &ErrorEnvelope {
            success: false,
            error: ErrorBody {
                status_code: status,
                message,
                details,
            },
        },
    )
}

fn parse_body<'a, T: Deserialize<'a>>(request: &'a HttpRequest) -> Result<T, HttpResponse> {
    if request.body.is_empty() {
        return Err(json_error(400, "Missing request body"));
    }
    serde_json::from_slice(&request.body).map_err(|e| json_error(400, &format!("Invalid JSON: {}", e)))
}

// === Transport-free handlers ===

/// Route request to handler
pub(super) fn route_request(request: &HttpRequest, state: &ServerState) -> HttpResponse {
    let response = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => handle_health(state),
        ("POST", "/api/v1/runner") => handle_run(request, state),
        ("POST", "/api/v1/runner/validate") => handle_validate(request, state),
        ("OPTIONS", _) => HttpResponse::new(204)
            .with_header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .with_header("Access-Control-Allow-Headers", "Authorization, Content-Type"),
        (_, "/health" | "/api/v1/runner" | "/api/v1/runner/validate") => {
            json_error(405, "Method not allowed")
        }
        _ => json_error(404, "Not found"),
    };
    with_standard_headers(response)
}

fn authorize(request: &HttpRequest, state: &ServerState) -> Result<(), HttpResponse> {
    match &state.token {
        Some(token) if !check_auth(request, token) => Err(json_error(401, "Unauthorized")),
        _ => Ok(()),
    }
}

/// Handle GET /health
fn handle_health(state: &ServerState) -> HttpResponse {
    json(
        200,
        &HealthResponse {
            status: "ok",
            version: state.version.clone(),
            uptime_secs: state.uptime_secs(),
        },
    )
}

/// Handle POST /api/v1/runner
fn handle_run(request: &HttpRequest, state: &ServerState) -> HttpResponse {
    if let Err(response) = authorize(request, state) {
        return response;
    }
    let body: RunRequest = match parse_body(request) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match state.verifier.run(&body.query, state.run_mode) {
        Ok(output) => json_success(&output),
        Err(RunError::Server(e)) => {
            warn!(error = %e, "run request failed");
            json_error(503, &e.to_string())
        }
        Err(e) => json_error(400, &e.to_string()),
    }
}

/// Handle POST /api/v1/runner/validate
fn handle_validate(request: &HttpRequest, state: &ServerState) -> HttpResponse {
    if let Err(response) = authorize(request, state) {
        return response;
    }
    let body: ValidateRequest = match parse_body(request) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match state
        .verifier
        .validate(&body.correct_query, &body.user_query)
    {
        Ok(outcome) => validation_response(&outcome),
        Err(e) => {
            warn!(error = %e, "validate request failed");
            json_error(503, &e.to_string())
        }
    }
}

fn validation_response(outcome: &ComparisonOutcome) -> HttpResponse {
    let report = outcome.report();
    if outcome.is_rejection() {
        let details = serde_json::to_value(&report).unwrap_or_default();
        return json_error_with(400, &report.message, details);
    }
    json_success(&serde_json::json!({ "validation": report }))
}

// === Transport: TCP accept loop ===
// One request per connection. Thread per connection.

/// Handle one connection on any Read + Write stream
fn handle_connection(stream: &mut (impl Read + Write), state: &ServerState) {
    let response = match microserver::read_request(stream) {
        Some(Ok(request)) => {
            debug!(method = %request.method, path = %request.path, "request");
            route_request(&request, state)
        }
        Some(Err(e)) => with_standard_headers(json_error(e.status(), &e.to_string())),
        None => return,
    };

    microserver::write_response(stream, &response);
}

/// Bind and serve until the process is stopped
pub fn run_server(options: ServeOptions, verifier: Verifier) -> Result<()> {
    let configured = std::env::var(TOKEN_ENV).ok();
    let generated = configured.is_none() && !is_loopback(&options.host);
    let token = resolve_token(&options.host, configured);

    if !is_loopback(&options.host) {
        warn!(
            host = %options.host,
            "binding beyond loopback exposes the server to the network (HTTP only)"
        );
    }
    if let (true, Some(token)) = (generated, &token) {
        eprintln!("Auth token (set {} to choose your own): {}", TOKEN_ENV, token);
    }

    let run_mode = if options.commit_runs {
        RunMode::Commit
    } else {
        RunMode::Preview
    };
    let state = Arc::new(ServerState::new(Arc::new(verifier), token, run_mode));

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr).with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, auth = state.token.is_some(), ?run_mode, "server listening");
    println!("sqlgrade server listening on http://{}", addr);
    println!("   Press Ctrl+C to stop\n");

    accept_loop(listener, state);
    Ok(())
}

fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    handle_connection(&mut stream, &state);
                    let _ = stream.shutdown(Shutdown::Write);
                });
            }
            Err(e) => warn!(error = %e, "TCP accept error"),
        }
    }
}
