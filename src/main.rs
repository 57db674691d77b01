mod authz;
mod bulk;
mod config;
mod db;
mod gateway;
mod ipc;
mod session;
mod validate;

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

fn main() {
    let config = config::Config::from_env();

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut state = ipc::AppState::new(config);
    if let Some(path) = state.config.workspace.clone() {
        if let Err(e) = ipc::open_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), error = ?e, "could not open workspace at startup");
        }
    }

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

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No id to echo back.
            Err(e) => ipc::err("", "bad_json", e.to_string(), None),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
