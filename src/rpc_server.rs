//! marksync RPC Server: JSON-RPC over stdin/stdout for the extension host.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmarks.add", "params":{"url":"...","title":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"synced"} or {"event":"bookmark_conflict","data":{...}}

use std::io::{self, Write};
use std::time::Instant;

use marksync::app::App;
use marksync::platform;
use marksync::rpc_handler::handle_method;
use marksync::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use marksync::services::telemetry::init_tracing;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Simple rate limiter: max requests per second.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        let elapsed = self.window_start.elapsed();
        if elapsed.as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

fn emit_line(value: &Value) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", value);
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut settings_engine = SettingsEngine::new(None);
    if let Err(e) = settings_engine.load() {
        eprintln!("failed to load settings, using defaults: {}", e);
    }
    settings_engine.apply_env_overrides();
    let settings = settings_engine.get_settings().clone();

    let verbose = std::env::var("MARKSYNC_VERBOSE").is_ok();
    let json_logs = std::env::var("MARKSYNC_LOG_JSON").is_ok();
    init_tracing(settings.enable_logging, verbose, json_logs);

    if let Err(e) = SettingsEngine::validate(&settings) {
        error!(error = %e, "invalid sync settings");
        return Err(e.into());
    }

    let data_dir = platform::get_data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("marksync.db");
    info!(path = %db_path.display(), "opening local database");
    let app = App::new(&db_path, settings)?;

    let mut events = app.sync.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_value(&event) {
                    Ok(value) => emit_line(&value),
                    Err(e) => warn!(error = %e, "failed to encode sync event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "sync event feed lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    emit_line(&json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}));

    // Max 200 RPC requests per second.
    let mut rate_limiter = RateLimiter::new(200);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                emit_line(&json!({"id": null, "error": format!("parse error: {}", e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            emit_line(&json!({"id": id, "error": "rate limit exceeded"}));
            continue;
        }

        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        let response = match handle_method(&app, method, &params).await {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        emit_line(&response);
    }

    info!("stdin closed, shutting down");
    app.shutdown();
    Ok(())
}
