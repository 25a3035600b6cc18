mod calc;
mod config;
mod db;
mod error;
mod grading;
mod ipc;
mod loader;
mod overrides;
mod report;
mod source;
mod stats;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(format: config::LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout carries responses only.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true);
    match format {
        config::LogFormat::Text => builder.with_ansi(false).init(),
        config::LogFormat::Json => builder.json().init(),
    }
}

fn main() {
    dotenvy::dotenv().ok();
    let cfg = config::Config::parse();
    init_logging(cfg.log_format);

    let mut state = ipc::AppState::new(&cfg);
    if let Some(path) = cfg.workspace.as_ref() {
        if let Err(e) = state.open_workspace(path) {
            warn!(workspace = %path.display(), error = %e, "startup workspace failed to open");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "gradebookd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                let payload = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", payload);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
