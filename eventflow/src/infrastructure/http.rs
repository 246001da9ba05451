// /////////////////////////////////////////////////////////////////////////////
// EventFlow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Dashboard HTTP Endpoint
//!
//! Lightweight HTTP server for the dashboard's read-only surface. Serves
//! the latest window snapshot; nothing more. Two endpoints:
//!
//! - `GET /`: the dashboard HTML page (polls `/data` client-side)
//! - `GET /data`: the most recent window summary, verbatim JSON, or the
//!   waiting placeholder before the first window closes
//!
//! Anything else is a 404. Requests are handled concurrently on spawned
//! tasks; the accept loop observes the cancellation token and stops
//! accepting on shutdown.
//!
//! The snapshot arrives through a `tokio::sync::watch` receiver: the broker
//! consumer is the single writer, the HTTP handlers are readers, and the
//! channel's replace-on-send semantics give exactly the last-writer-wins
//! contract the dashboard wants.

use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use eventflow_bootstrap::CancellationToken;
use eventflow_domain::PipelineError;

/// Dashboard page; renders whatever `/data` returns and refreshes itself.
const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>EventFlow Dashboard</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 2rem; background: #f7f7f7; }
    h1 { font-size: 1.4rem; }
    table { border-collapse: collapse; margin-top: 1rem; background: #fff; }
    th, td { border: 1px solid #ccc; padding: 0.4rem 0.8rem; text-align: left; }
    .meta { color: #666; margin-top: 0.5rem; }
  </style>
</head>
<body>
  <h1>EventFlow &mdash; latest window</h1>
  <div class="meta" id="meta">waiting for first window...</div>
  <table id="stats"><thead><tr><th>Region</th><th>Source</th><th>Count</th></tr></thead><tbody></tbody></table>
  <script>
    async function refresh() {
      try {
        const res = await fetch('/data');
        const data = await res.json();
        const meta = document.getElementById('meta');
        const body = document.querySelector('#stats tbody');
        body.innerHTML = '';
        if (data.status === 'waiting') {
          meta.textContent = 'waiting for first window...';
          return;
        }
        meta.textContent = 'window ' + data.window_start_iso + ' → ' + data.window_end_iso
          + ' (' + data.total_processed + ' events)';
        const stats = data.stats_by_region || {};
        for (const region of Object.keys(stats)) {
          for (const source of Object.keys(stats[region])) {
            const row = body.insertRow();
            row.insertCell().textContent = region;
            row.insertCell().textContent = source;
            row.insertCell().textContent = stats[region][source];
          }
        }
      } catch (e) { /* server restarting; keep polling */ }
    }
    refresh();
    setInterval(refresh, 2000);
  </script>
</body>
</html>
"#;

/// HTTP server publishing the latest window snapshot.
pub struct DashboardEndpoint {
    snapshot: watch::Receiver<Arc<Value>>,
    port: u16,
}

impl DashboardEndpoint {
    pub fn new(snapshot: watch::Receiver<Arc<Value>>, port: u16) -> Self {
        Self { snapshot, port }
    }

    /// Accepts connections until the token cancels.
    pub async fn serve(&self, token: CancellationToken) -> Result<(), PipelineError> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            PipelineError::internal_error(format!("failed to bind dashboard endpoint: {}", e))
        })?;

        info!("dashboard endpoint started on http://{}/", addr);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("dashboard endpoint shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((mut stream, _)) => {
                            let snapshot = Arc::clone(&self.snapshot.borrow());
                            tokio::spawn(async move {
                                if let Err(e) = handle_request(&mut stream, snapshot).await {
                                    error!("error handling dashboard request: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("error accepting connection: {}", e);
                        }
                    }
                }
            }
        }
    }
}

/// Handles one HTTP request against the captured snapshot.
async fn handle_request(
    stream: &mut tokio::net::TcpStream,
    snapshot: Arc<Value>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buffer = [0; 1024];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    debug!("received request: {}", request.lines().next().unwrap_or(""));

    if request.starts_with("GET /data") {
        let body = serde_json::to_string(snapshot.as_ref())?;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
    } else if request.starts_with("GET / ") || request.starts_with("GET / HTTP") {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            DASHBOARD_HTML.len(),
            DASHBOARD_HTML
        );
        stream.write_all(response.as_bytes()).await?;
    } else {
        let not_found = "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\nNot Found";
        stream.write_all(not_found.as_bytes()).await?;
    }

    Ok(())
}

/// Placeholder served before the first window summary arrives.
pub fn waiting_snapshot() -> Value {
    serde_json::json!({
        "status": "waiting",
        "last_update": null,
        "stats_by_region": {}
    })
}
