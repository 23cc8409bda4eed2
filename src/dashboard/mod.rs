use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::validate_match_url;
use crate::models::MatchSnapshot;
use crate::tracker::{Delivery, MatchTracker, RefreshError, TrackerStatus};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<MatchTracker>,
    /// Idle time before an event stream gets a keepalive event
    pub keepalive: Duration,
}

type ApiError = (StatusCode, Json<Value>);

const NO_CACHE: [(HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Build the Axum router for the dashboard and score API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/current-score", get(current_score_handler))
        .route("/api/scrape", get(scrape_handler))
        .route("/api/set-url", post(set_url_handler))
        .route("/api/status", get(status_handler))
        .route("/api/debug", get(debug_handler))
        .route("/api/toggle-auto-update", post(toggle_auto_update_handler))
        .route("/events", get(events_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn index_handler() -> impl IntoResponse {
    Html(CONTROL_PAGE_HTML)
}

/// GET /api/current-score — refreshes first when the snapshot is stale.
async fn current_score_handler(State(state): State<Arc<AppState>>) -> Response {
    let tracker = &state.tracker;

    match tracker.refresh_if_due().await {
        Ok(_) => {}
        Err(RefreshError::NotConfigured) => {
            return (
                NO_CACHE,
                api_error(
                    StatusCode::BAD_REQUEST,
                    "No match URL set. Please visit the home page to set a URL.",
                ),
            )
                .into_response();
        }
        Err(e) => {
            // a stale snapshot is still served below
            warn!("Stale data refresh failed: {}", e);
            if tracker.current_snapshot().await.is_none() {
                return (
                    NO_CACHE,
                    api_error(StatusCode::SERVICE_UNAVAILABLE, "Failed to fetch current scores"),
                )
                    .into_response();
            }
        }
    }

    match tracker.current_snapshot().await {
        Some(snapshot) => (StatusCode::OK, NO_CACHE, Json(snapshot.to_json())).into_response(),
        None => (
            NO_CACHE,
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "No data available yet. Please wait for the first update.",
            ),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeParams {
    url: Option<String>,
}

/// GET /api/scrape?url=... — forced fetch of the given or tracked URL.
async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScrapeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let url = params.url.filter(|u| !u.trim().is_empty());
    let result = match url {
        Some(url) => {
            validate_match_url(&url)
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
            state.tracker.scrape(url.trim()).await
        }
        None => state.tracker.refresh().await,
    };

    match result {
        Ok(snapshot) => Ok(Json(snapshot.to_json())),
        Err(RefreshError::NotConfigured) => Err(api_error(
            StatusCode::BAD_REQUEST,
            "No match URL provided or set",
        )),
        Err(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unable to scrape match data: {}", e),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct SetUrlRequest {
    #[serde(default)]
    url: Option<String>,
}

/// POST /api/set-url {"url": "..."} — track a new match and fetch it now.
async fn set_url_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let url = body
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "URL is required"))?;
    validate_match_url(&url).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.tracker.set_match_url(&url).await {
        Ok(snapshot) => {
            info!("URL set and initial data scraped: {}", url);
            Ok(Json(json!({
                "message": "URL set successfully",
                "url": url,
                "initial_data": snapshot.to_json(),
            })))
        }
        Err(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to scrape initial data: {}", e),
        )),
    }
}

/// POST /api/toggle-auto-update
async fn toggle_auto_update_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let enabled = state.tracker.toggle_auto_update();
    Json(json!({ "auto_update": enabled }))
}

fn format_last_update(status: &TrackerStatus) -> Option<String> {
    status
        .last_update
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// GET /api/status
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.tracker.status().await;
    Json(json!({
        "current_url": status.match_url,
        "auto_update": status.auto_update,
        "update_interval": status.update_interval.as_secs(),
        "has_data": status.has_data,
        "last_update": format_last_update(&status),
        "active_connections": status.active_connections,
    }))
}

fn snapshot_sample(snap: &MatchSnapshot) -> Value {
    let batsman = |i: usize| snap.striker_pair[i].as_ref();
    json!({
        "team1_name": snap.team1.name,
        "team1_score": snap.team1.runs,
        "team1_overs": snap.team1.overs,
        "team2_name": snap.team2.name,
        "team2_score": snap.team2.runs,
        "team2_overs": snap.team2.overs,
        "livescore": snap.live_score_summary,
        "batsman1": batsman(0).map(|b| b.name.as_str()),
        "batsman1_runs": batsman(0).map(|b| b.runs),
        "batsman2": batsman(1).map(|b| b.name.as_str()),
        "batsman2_runs": batsman(1).map(|b| b.runs),
    })
}

/// GET /api/debug
async fn debug_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tracker = &state.tracker;
    let status = tracker.status().await;
    let snapshot = tracker.current_snapshot().await;
    Json(json!({
        "current_url": status.match_url,
        "has_match_data": status.has_data,
        "last_update": format_last_update(&status),
        "should_update": status.should_update,
        "auto_update": status.auto_update,
        "format_overs": tracker.parser().format_overs(),
        "active_sse_connections": status.active_connections,
        "match_data_sample": snapshot.as_deref().map(snapshot_sample).unwrap_or_else(|| json!({})),
    }))
}

/// GET /events — server-sent snapshot stream.
///
/// Starts with the current snapshot when there is one, then one event per
/// refresh, with `{"keepalive": true}` during quiet periods. The subscriber
/// is unregistered when the client goes away and the stream is dropped.
async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.tracker.subscribe().await;
    let keepalive = state.keepalive;
    info!(
        "Event stream opened (subscriber {}, {} active)",
        subscription.id(),
        state.tracker.subscriber_count()
    );

    let events = stream::unfold(subscription, move |mut subscription| async move {
        let event = match subscription.next_delivery(keepalive).await? {
            Delivery::Snapshot(snapshot) => Event::default().json_data(snapshot.to_json()),
            Delivery::Keepalive => Event::default().json_data(json!({ "keepalive": true })),
        };
        Some((event, subscription))
    });
    Sse::new(events)
}

/// Embedded control page (HTML + CSS + JS)
const CONTROL_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Cricket Live Relay</title>
<style>
  :root { --bg: #0f1117; --card: #1a1d27; --border: #2a2d3a; --accent: #6c63ff; --green: #00c896; --red: #ff4f6a; --text: #e0e0e0; --muted: #8888aa; }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; }
  .status-dot { width: 10px; height: 10px; border-radius: 50%; background: var(--red); display: inline-block; }
  .status-dot.on { background: var(--green); animation: pulse 1.5s infinite; }
  @keyframes pulse { 0%,100% { opacity: 1; } 50% { opacity: .3; } }
  main { padding: 1.5rem 2rem; display: grid; gap: 1.5rem; max-width: 900px; }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; padding: 1.2rem; }
  .row { display: flex; gap: .6rem; }
  input { flex: 1; background: var(--bg); color: var(--text); border: 1px solid var(--border); border-radius: 6px; padding: .5rem .8rem; }
  button { background: var(--accent); border: none; color: #fff; padding: .5rem 1rem; border-radius: 6px; cursor: pointer; }
  button.ghost { background: none; border: 1px solid var(--border); color: var(--muted); }
  .score { font-size: 1.6rem; font-weight: 700; margin: .4rem 0; }
  .muted { color: var(--muted); font-size: .85rem; }
  table { width: 100%; border-collapse: collapse; margin-top: .8rem; }
  td, th { padding: .5rem; text-align: left; border-bottom: 1px solid var(--border); font-size: .9rem; }
  th { color: var(--muted); font-size: .75rem; text-transform: uppercase; }
  #error { color: var(--red); }
</style>
</head>
<body>
<header>
  <span class="status-dot" id="dot"></span>
  <h1>Cricket Live Relay</h1>
  <span style="margin-left:auto" class="muted" id="last-updated"></span>
</header>
<main>
  <div class="panel">
    <div class="row">
      <input id="url" placeholder="https://crex.com/scoreboard/.../live">
      <button onclick="setUrl()">Track</button>
      <button class="ghost" id="auto-btn" onclick="toggleAuto()">Auto-update</button>
    </div>
    <p class="muted" id="tracking" style="margin-top:.6rem"></p>
    <p id="error"></p>
  </div>

  <div class="panel">
    <div class="muted" id="status-line">Live</div>
    <div class="score" id="livescore">Waiting for data…</div>
    <div class="muted" id="runrate"></div>
    <div class="muted" id="team2"></div>
    <table>
      <thead><tr><th>Batter</th><th>R</th><th>B</th><th>SR</th></tr></thead>
      <tbody id="batters"><tr><td colspan="4" class="muted">No batters yet</td></tr></tbody>
    </table>
  </div>
</main>
<script>
const $ = id => document.getElementById(id);

function row(cells) {
  const tr = document.createElement('tr');
  for (const c of cells) {
    const td = document.createElement('td');
    td.textContent = c;
    tr.appendChild(td);
  }
  return tr;
}

function render(d) {
  if (d.keepalive) return;
  $('livescore').textContent = d.live_score_summary;
  $('status-line').textContent = d.status_line;
  $('runrate').textContent = d.run_rate_label;
  $('team2').textContent = d.team2.name + ': ' + d.team2_status_label;
  const rows = d.striker_pair
    .map((b, i) => b && row([b.name, b.runs, b.balls_faced, d.strike_rate_labels[i]]))
    .filter(Boolean);
  if (!rows.length) {
    const empty = row(['No batters yet']);
    empty.firstChild.colSpan = 4;
    empty.firstChild.className = 'muted';
    rows.push(empty);
  }
  $('batters').replaceChildren(...rows);
  $('last-updated').textContent = 'Updated ' + new Date(d.captured_at).toLocaleTimeString();
}

async function loadStatus() {
  const r = await fetch('/api/status');
  if (!r.ok) return;
  const s = await r.json();
  $('tracking').textContent = s.current_url ? 'Tracking ' + s.current_url + ' · ' + s.active_connections + ' viewer(s)' : 'No match tracked';
  $('auto-btn').textContent = 'Auto-update: ' + (s.auto_update ? 'on' : 'off');
}

async function setUrl() {
  $('error').textContent = '';
  const r = await fetch('/api/set-url', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify({ url: $('url').value }) });
  const body = await r.json();
  if (!r.ok) { $('error').textContent = body.error; return; }
  render(body.initial_data);
  loadStatus();
}

async function toggleAuto() {
  await fetch('/api/toggle-auto-update', { method: 'POST' });
  loadStatus();
}

function connect() {
  const es = new EventSource('/events');
  es.onopen = () => $('dot').className = 'status-dot on';
  es.onmessage = e => render(JSON.parse(e.data));
  es.onerror = () => { $('dot').className = 'status-dot'; es.close(); setTimeout(connect, 5000); };
}

loadStatus();
setInterval(loadStatus, 10000);
connect();
</script>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoreboard::TitleSource;
    use crate::tracker::TrackerSettings;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    const TITLE: &str = "SL 88-1 (10.0) (Pathum Nissanka 45(31), Kusal Mendis 30(29)) vs BAN 160-7 ((20.0)) | CREX";

    struct StaticSource {
        title: &'static str,
        offline: AtomicBool,
    }

    #[async_trait]
    impl TitleSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_title(&self, _url: &str) -> Result<String> {
            if self.offline.load(Ordering::SeqCst) {
                anyhow::bail!("offline");
            }
            Ok(self.title.to_string())
        }
    }

    fn state_with(
        source: Arc<StaticSource>,
        settings: TrackerSettings,
        keepalive: Duration,
    ) -> Arc<AppState> {
        let tracker = MatchTracker::new(source, settings);
        Arc::new(AppState {
            tracker: Arc::new(tracker),
            keepalive,
        })
    }

    fn state(title: Option<&'static str>) -> Arc<AppState> {
        let source = StaticSource {
            title: title.unwrap_or_default(),
            offline: AtomicBool::new(title.is_none()),
        };
        state_with(Arc::new(source), TrackerSettings::default(), Duration::from_secs(30))
    }

    /// Payload of the first event on an SSE response.
    async fn first_event(resp: Response) -> Value {
        let mut body = resp.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("no event within 5s")
            .unwrap()
            .unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .expect("event without data line");
        serde_json::from_str(data.trim()).unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_current_score_not_configured() {
        let resp = current_score_handler(State(state(Some(TITLE)))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache, no-store, must-revalidate"
        );
    }

    #[tokio::test]
    async fn test_current_score_after_set_url() {
        let state = state(Some(TITLE));
        let resp = set_url_handler(
            State(Arc::clone(&state)),
            Json(SetUrlRequest {
                url: Some("https://crex.com/scoreboard/sl-ban/live".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["initial_data"]["team1"]["name"], "SL");

        let resp = current_score_handler(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["team2"]["runs"], 160);
        assert_eq!(body["status_line"], "Target: 161");
        assert_eq!(body["run_rate_label"], "CRR: 8.80 | RRR: 7.30");
    }

    #[tokio::test]
    async fn test_current_score_fetch_failure_without_data() {
        let state = state(None);
        let resp = set_url_handler(
            State(Arc::clone(&state)),
            Json(SetUrlRequest {
                url: Some("https://crex.com/x".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = current_score_handler(State(state)).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_current_score_serves_stale_snapshot_when_refresh_fails() {
        let source = Arc::new(StaticSource {
            title: TITLE,
            offline: AtomicBool::new(false),
        });
        let settings = TrackerSettings {
            update_interval: Duration::from_millis(20),
            ..TrackerSettings::default()
        };
        let state = state_with(Arc::clone(&source), settings, Duration::from_secs(30));
        state
            .tracker
            .set_match_url("https://crex.com/scoreboard/sl-ban/live")
            .await
            .unwrap();

        source.offline.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.tracker.is_update_due().await);

        let resp = current_score_handler(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["team1"]["name"], "SL");
        assert_eq!(body["team2"]["runs"], 160);
    }

    #[tokio::test]
    async fn test_events_start_with_current_snapshot() {
        let state = state(Some(TITLE));
        state
            .tracker
            .set_match_url("https://crex.com/scoreboard/sl-ban/live")
            .await
            .unwrap();

        let resp = events_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(state.tracker.subscriber_count(), 1);

        let event = first_event(resp).await;
        assert_eq!(event["team1"]["name"], "SL");
        assert_eq!(event["run_rate_label"], "CRR: 8.80 | RRR: 7.30");
        assert_eq!(state.tracker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_events_keepalive_when_idle() {
        let source = StaticSource {
            title: TITLE,
            offline: AtomicBool::new(false),
        };
        let state = state_with(
            Arc::new(source),
            TrackerSettings::default(),
            Duration::from_millis(20),
        );

        let resp = events_handler(State(Arc::clone(&state))).await.into_response();
        let event = first_event(resp).await;
        assert_eq!(event, json!({ "keepalive": true }));
    }

    #[test]
    fn test_control_page_sets_text_not_markup() {
        assert!(!CONTROL_PAGE_HTML.contains("innerHTML"));
        assert!(CONTROL_PAGE_HTML.contains("textContent = c"));
    }

    #[tokio::test]
    async fn test_set_url_requires_url() {
        let resp = set_url_handler(State(state(Some(TITLE))), Json(SetUrlRequest { url: None }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = set_url_handler(
            State(state(Some(TITLE))),
            Json(SetUrlRequest {
                url: Some("not a url".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scrape_without_url() {
        let resp = scrape_handler(State(state(Some(TITLE))), Query(ScrapeParams { url: None }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scrape_with_url_param() {
        let state = state(Some(TITLE));
        let resp = scrape_handler(
            State(Arc::clone(&state)),
            Query(ScrapeParams {
                url: Some("https://crex.com/other".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.tracker.current_snapshot().await.is_some());
        assert!(state.tracker.match_url().await.is_none());
    }

    #[tokio::test]
    async fn test_status_and_toggle() {
        let state = state(Some(TITLE));
        let body = body_json(status_handler(State(Arc::clone(&state))).await.into_response()).await;
        assert_eq!(body["auto_update"], true);
        assert_eq!(body["update_interval"], 30);
        assert_eq!(body["has_data"], false);
        assert!(body["last_update"].is_null());

        let body =
            body_json(toggle_auto_update_handler(State(Arc::clone(&state))).await.into_response()).await;
        assert_eq!(body["auto_update"], false);

        let body = body_json(debug_handler(State(state)).await.into_response()).await;
        assert_eq!(body["auto_update"], false);
        assert_eq!(body["should_update"], true);
        assert_eq!(body["format_overs"], 20.0);
    }
}
