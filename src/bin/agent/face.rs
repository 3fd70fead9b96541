use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};
use trends_agent::CompilerEvent;

fn to_sse_event(event: &CompilerEvent) -> Event {
    let name = match event {
        CompilerEvent::StateChanged { .. } => "state",
        CompilerEvent::ResultDescribed { .. } => "result",
        CompilerEvent::Finished { .. } => "finished",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

#[derive(Clone)]
pub struct AppState {
    pub query_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<CompilerEvent>,
}

#[derive(Deserialize)]
struct CompilePayload {
    query: String,
}

/// Start the web UI on the first free port in 3000..3010. Returns the query
/// queue and the event channel the compiler publishes on.
pub async fn start_server() -> Result<(mpsc::Receiver<String>, broadcast::Sender<CompilerEvent>)> {
    let (query_tx, query_rx) = mpsc::channel::<String>(4);
    let (event_tx, _) = broadcast::channel::<CompilerEvent>(64);

    let state = Arc::new(AppState {
        query_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/compile", post(compile_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for port in 3000..3010 {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) =
        bound.context("could not bind to any port in 3000-3009; is another agent running?")?;

    info!("Web UI running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("[Web] server stopped: {}", e);
        }
    });

    Ok((query_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    debug!("[Web] GET /");
    Html(INDEX_HTML)
}

async fn compile_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CompilePayload>,
) -> (StatusCode, &'static str) {
    let query = payload.query.trim().to_string();
    if query.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty query");
    }
    info!("[Web] POST /compile: {}", query);
    match state.query_tx.try_send(query) {
        Ok(()) => (StatusCode::ACCEPTED, "queued"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Trends Agent</title>
<style>
  body { background: #101014; color: #ddd; font-family: system-ui, sans-serif; margin: 0; }
  main { max-width: 860px; margin: 0 auto; padding: 32px; }
  form { display: flex; gap: 8px; }
  input { flex: 1; padding: 10px; background: #1b1b22; color: #eee; border: 1px solid #333; border-radius: 6px; }
  button { padding: 10px 18px; background: #6c5ce7; color: #fff; border: 0; border-radius: 6px; cursor: pointer; }
  #log li { margin: 4px 0; color: #9a9ab0; }
  #log li.result { color: #ddd; white-space: pre-wrap; }
  #report { white-space: pre-wrap; background: #17171d; padding: 16px; border-radius: 6px; margin-top: 16px; }
</style>
</head>
<body>
<main>
  <h1>Trends Agent</h1>
  <form id="form">
    <input id="query" placeholder="e.g. boho summer dresses" autocomplete="off">
    <button type="submit">Compile</button>
  </form>
  <ul id="log"></ul>
  <pre id="report"></pre>
</main>
<script>
  const log = document.getElementById('log');
  const add = (text, cls) => {
    const li = document.createElement('li');
    li.textContent = text;
    if (cls) li.className = cls;
    log.appendChild(li);
  };
  document.getElementById('form').addEventListener('submit', async (e) => {
    e.preventDefault();
    const query = document.getElementById('query').value.trim();
    if (!query) return;
    log.innerHTML = '';
    document.getElementById('report').textContent = '';
    const res = await fetch('/compile', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ query }),
    });
    add(res.ok ? 'Queued: ' + query : 'Agent busy, try again later');
  });
  const events = new EventSource('/events');
  events.addEventListener('state', (e) => add('State: ' + JSON.parse(e.data).state));
  events.addEventListener('result', (e) => {
    const d = JSON.parse(e.data);
    add('Result ' + d.number + ': ' + d.description, 'result');
  });
  events.addEventListener('finished', (e) => {
    document.getElementById('report').textContent = JSON.parse(e.data).report;
  });
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use trends_agent::WorkflowState;

    #[test]
    fn test_events_serialize_with_tag() {
        let event = CompilerEvent::StateChanged {
            state: WorkflowState::IterateResults,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "state_changed", "state": "iterate_results"})
        );
    }
}
