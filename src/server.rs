//! HTTP surfaces: the JSON data service, the terminal mirror, and the
//! mission-planner front-end
//!
//! All of them are thin shells over the shared snapshot; each runs on a
//! small current-thread tokio runtime on its own OS thread so the rest of
//! the process stays plain threads-and-mutexes.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::astro::{self, FlareStatus, Illumination, TrackClock};
use crate::data::{Config, SelectionMode, VisibilityMode, KNOWN_GROUPS};
use crate::engine::{ObjectStore, ReloadSlot, SharedState};

/// Everything a request handler may touch.
pub struct ServerContext {
    pub clock: Arc<TrackClock>,
    pub store: Arc<RwLock<ObjectStore>>,
    pub config: Arc<RwLock<Config>>,
    pub shared: Arc<SharedState>,
    pub reload: Arc<ReloadSlot>,
    pub selected: Arc<AtomicI32>,
    pub last_frame: Arc<Mutex<String>>,
}

type Ctx = Arc<ServerContext>;

#[derive(Serialize)]
struct ApiConfig {
    lat: f64,
    lon: f64,
    min_el: f64,
    max_apo: f64,
    show_all: bool,
    groups: String,
    sun_lat: f64,
    sun_lon: f64,
}

#[derive(Serialize)]
struct ApiSatellite {
    id: i32,
    n: String,
    lat: f64,
    lon: f64,
    a: f64,
    e: f64,
    v: &'static str,
    next: String,
    apo: f64,
    f: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    trail: Option<Vec<[f64; 2]>>,
}

#[derive(Serialize)]
struct ApiPayload {
    config: ApiConfig,
    satellites: Vec<ApiSatellite>,
}

async fn api_satellites(State(ctx): State<Ctx>) -> impl IntoResponse {
    let snapshot = ctx.shared.read();
    let config = ctx.config.read().clone();
    let selected = ctx.selected.load(Ordering::Relaxed);
    let t = ctx.clock.now_physics();
    let sun = astro::ground_point(astro::sun_eci(&t), &t);

    let satellites = {
        let store = ctx.store.read();
        snapshot
            .rows
            .iter()
            .zip(snapshot.refs.iter())
            .map(|(row, handle)| {
                // The selected object carries its ground track so the
                // dashboard can draw the trail.
                let trail = (row.catalog_id == selected)
                    .then(|| store.resolve(handle))
                    .flatten()
                    .map(|obj| {
                        obj.ground_track()
                            .iter()
                            .map(|g| [g.lat_deg, g.lon_deg])
                            .collect()
                    });
                ApiSatellite {
                    id: row.catalog_id,
                    n: row.name.clone(),
                    lat: row.lat_deg,
                    lon: row.lon_deg,
                    a: row.az_deg,
                    e: row.el_deg,
                    v: match row.state {
                        Illumination::Visible => "YES",
                        Illumination::Daylight => "DAY",
                        Illumination::Eclipsed => "NO",
                    },
                    next: row.next_event.clone(),
                    apo: row.apogee_km,
                    f: match row.flare {
                        FlareStatus::None => 0,
                        FlareStatus::Near => 1,
                        FlareStatus::Hit => 2,
                    },
                    trail,
                }
            })
            .collect()
    };

    let payload = ApiPayload {
        config: ApiConfig {
            lat: config.observer_lat,
            lon: config.observer_lon,
            min_el: config.min_elevation_deg,
            max_apo: config.max_apogee_km,
            show_all: config.visibility_mode == VisibilityMode::Radio,
            groups: config.selection_csv(),
            sun_lat: sun.lat_deg,
            sun_lon: sun.lon_deg,
        },
        satellites,
    };

    (
        [(header::CACHE_CONTROL, "no-cache, no-store")],
        Json(payload),
    )
}

async fn api_select(State(ctx): State<Ctx>, Path(id): Path<i32>) -> impl IntoResponse {
    if ctx.store.read().get(id).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"status": "error", "message": "unknown catalog id"})),
        );
    }
    ctx.selected.store(id, Ordering::Relaxed);
    log::info!("effector target set to catalog {id}");
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// Partial configuration update from the control plane; omitted fields
/// keep their current value. The orchestrator takes it at its next tick.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigPatch {
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    max_objects: Option<usize>,
    min_el: Option<f64>,
    max_apo: Option<f64>,
    trail_mins: Option<i64>,
    groups: Option<String>,
    visible_only: Option<bool>,
}

impl ConfigPatch {
    fn apply(self, mut config: Config) -> Config {
        if let Some(v) = self.lat {
            config.observer_lat = v;
        }
        if let Some(v) = self.lon {
            config.observer_lon = v;
        }
        if let Some(v) = self.alt {
            config.observer_alt_km = v;
        }
        if let Some(v) = self.max_objects {
            config.max_objects = v;
        }
        if let Some(v) = self.min_el {
            config.min_elevation_deg = v;
        }
        if let Some(v) = self.max_apo {
            config.max_apogee_km = v;
        }
        if let Some(v) = self.trail_mins {
            config.trail_half_minutes = v;
        }
        if let Some(csv) = self.groups {
            config.selection_mode = SelectionMode::Groups;
            config.group_list = csv
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(optical) = self.visible_only {
            config.visibility_mode = if optical {
                VisibilityMode::Optical
            } else {
                VisibilityMode::Radio
            };
        }
        config
    }
}

async fn api_config(
    State(ctx): State<Ctx>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    let candidate = patch.apply(ctx.config.read().clone());
    if let Err(e) = candidate.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"status": "error", "message": e.to_string()})),
        );
    }
    ctx.reload.request(candidate);
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn mirror(State(ctx): State<Ctx>) -> impl IntoResponse {
    let frame = ctx.last_frame.lock().clone();
    let page = format!(
        "<!DOCTYPE html><html><head><meta http-equiv=\"refresh\" content=\"1\">\
         <title>skytrack terminal</title>\
         <style>body{{background:#000;color:#0f0;font-family:monospace;font-size:14px}}</style>\
         </head><body><pre>{}</pre></body></html>",
        escape_html(&frame)
    );
    (
        [(header::CACHE_CONTROL, "no-cache, no-store")],
        Html(page),
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn data_router(ctx: Ctx) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/satellites", get(api_satellites))
        .route("/api/select/{id}", get(api_select))
        .route("/api/config", post(api_config))
        .with_state(ctx)
}

fn mirror_router(ctx: Ctx) -> Router {
    Router::new().route("/", get(mirror)).with_state(ctx)
}

async fn until_stopped(running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
}

/// Serve the data and mirror ports until the shutdown flag clears.
/// Returns the thread handle; binding failures log and end the thread.
pub fn spawn(
    ctx: Ctx,
    data_port: u16,
    mirror_port: u16,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("http".into())
        .spawn(move || {
            let outcome = (|| -> Result<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("tokio runtime")?;
                runtime.block_on(async {
                    let data_listener =
                        tokio::net::TcpListener::bind(("0.0.0.0", data_port))
                            .await
                            .with_context(|| format!("bind data port {data_port}"))?;
                    let mirror_listener =
                        tokio::net::TcpListener::bind(("0.0.0.0", mirror_port))
                            .await
                            .with_context(|| format!("bind mirror port {mirror_port}"))?;
                    log::info!(
                        "serving JSON on :{data_port}, terminal mirror on :{mirror_port}"
                    );
                    let data = axum::serve(data_listener, data_router(ctx.clone()))
                        .with_graceful_shutdown(until_stopped(running.clone()));
                    let mirror = axum::serve(mirror_listener, mirror_router(ctx))
                        .with_graceful_shutdown(until_stopped(running));
                    tokio::try_join!(data, mirror).context("http serve")?;
                    Ok(())
                })
            })();
            if let Err(e) = outcome {
                log::error!("http server stopped: {e:#}");
            }
        })
        .expect("spawn http thread")
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    lat: f64,
    lon: f64,
    alt: f64,
    groups: Vec<String>,
    min_el: f64,
    visible_only: bool,
}

#[derive(Clone)]
struct PlannerState {
    chosen: crossbeam_channel::Sender<Config>,
    defaults: Config,
}

async fn planner_page(State(state): State<PlannerState>) -> Html<String> {
    let boxes: String = KNOWN_GROUPS
        .iter()
        .map(|g| {
            let checked = if state.defaults.group_list.iter().any(|x| x == g) {
                " checked"
            } else {
                ""
            };
            format!(
                "<label><input type=\"checkbox\" name=\"g\" value=\"{g}\"{checked}> {g}</label>"
            )
        })
        .collect();
    Html(PLANNER_HTML.replace("{{GROUPS}}", &boxes).replace(
        "{{LAT}}",
        &format!("{}", state.defaults.observer_lat),
    ).replace(
        "{{LON}}",
        &format!("{}", state.defaults.observer_lon),
    ))
}

async fn planner_submit(
    State(state): State<PlannerState>,
    Json(plan): Json<PlanRequest>,
) -> impl IntoResponse {
    let mut config = state.defaults.clone();
    config.observer_lat = plan.lat;
    config.observer_lon = plan.lon;
    config.observer_alt_km = plan.alt;
    config.min_elevation_deg = plan.min_el;
    config.visibility_mode = if plan.visible_only {
        VisibilityMode::Optical
    } else {
        VisibilityMode::Radio
    };
    config.selection_mode = SelectionMode::Groups;
    config.group_list = plan.groups;
    if let Err(e) = config.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"status": "error", "message": e.to_string()})),
        );
    }
    let _ = state.chosen.send(config);
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// The mission-planner phase: serve the group picker until a plan is
/// submitted, then hand the chosen configuration back to the launcher.
pub fn run_planner(port: u16, defaults: Config) -> Result<Config> {
    let (tx, rx) = crossbeam_channel::bounded::<Config>(1);
    let running = Arc::new(AtomicBool::new(true));

    let state = PlannerState {
        chosen: tx,
        defaults,
    };
    let router = Router::new()
        .route("/", get(planner_page))
        .route("/api/plan", post(planner_submit))
        .with_state(state);

    let server_running = running.clone();
    let handle = std::thread::Builder::new()
        .name("planner".into())
        .spawn(move || -> Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("tokio runtime")?;
            runtime.block_on(async {
                let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                    .await
                    .with_context(|| format!("bind planner port {port}"))?;
                log::info!("mission planner at http://0.0.0.0:{port}/ - waiting for a plan");
                axum::serve(listener, router)
                    .with_graceful_shutdown(until_stopped(server_running))
                    .await
                    .context("planner serve")
            })
        })
        .expect("spawn planner thread");

    let config = rx.recv().context("planner channel closed before a plan arrived")?;
    running.store(false, Ordering::Relaxed);
    match handle.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("planner thread panicked"),
    }
    log::info!("plan received, continuing into the tracker");
    Ok(config)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>skytrack</title>
<style>
  body { margin:0; background:#111; color:#ddd; font-family:monospace; }
  .wrap { display:flex; height:100vh; }
  .side { width:44%; min-width:420px; border-right:1px solid #333; display:flex; flex-direction:column; }
  .head { padding:12px; background:#1c1c1c; border-bottom:1px solid #333; }
  .head h1 { margin:0; font-size:16px; color:#4da6ff; }
  .tablewrap { flex:1; overflow-y:auto; }
  table { width:100%; border-collapse:collapse; font-size:12px; }
  th { position:sticky; top:0; background:#2a2a2a; text-align:left; padding:6px; }
  td { padding:5px 6px; border-bottom:1px solid #222; cursor:pointer; white-space:nowrap; }
  tr:hover { background:#2c2c2c; }
  tr.sel { background:#23405c; }
  .v-YES { color:#0f0; } .v-DAY { color:#ff0; } .v-NO { color:#0ff; }
  .flare { color:#ff0; font-weight:bold; }
  .sky { flex:1; background:#000; }
  canvas { width:100%; height:100%; display:block; }
</style>
</head>
<body>
<div class="wrap">
  <div class="side">
    <div class="head"><h1>SKYTRACK</h1><div id="status">connecting…</div></div>
    <div class="tablewrap"><table>
      <thead><tr><th>Name</th><th>Az</th><th>El</th><th>Next</th><th>Vis</th></tr></thead>
      <tbody id="rows"></tbody>
    </table></div>
  </div>
  <div class="sky"><canvas id="plot"></canvas></div>
</div>
<script>
let data = [], selected = null;
const canvas = document.getElementById('plot');
const ctx = canvas.getContext('2d');

function resize() {
  canvas.width = canvas.clientWidth;
  canvas.height = canvas.clientHeight;
}
window.addEventListener('resize', resize);
resize();

function select(id) {
  selected = id;
  fetch('/api/select/' + id);
  renderTable();
}

function renderTable() {
  let html = '';
  for (const s of data) {
    const cls = s.id === selected ? 'sel' : '';
    const flare = s.f > 0 ? ' <span class="flare">(F)</span>' : '';
    html += `<tr class="${cls}" onclick="select(${s.id})">`
      + `<td>${s.n}${flare}</td><td>${s.a.toFixed(1)}</td><td>${s.e.toFixed(1)}</td>`
      + `<td>${s.next}</td><td class="v-${s.v}">${s.v}</td></tr>`;
  }
  document.getElementById('rows').innerHTML = html;
}

function renderSky() {
  ctx.fillStyle = '#000';
  ctx.fillRect(0, 0, canvas.width, canvas.height);
  const cx = canvas.width / 2, cy = canvas.height / 2;
  const r = Math.min(cx, cy) * 0.9;
  ctx.strokeStyle = '#084808';
  for (const k of [1, 2 / 3, 1 / 3]) {
    ctx.beginPath(); ctx.arc(cx, cy, r * k, 0, 2 * Math.PI); ctx.stroke();
  }
  ctx.fillStyle = '#0f0';
  ctx.font = '13px monospace';
  ctx.fillText('N', cx - 4, cy - r - 6);
  for (const s of data) {
    if (s.e < 0) continue;
    const d = r * (90 - s.e) / 90;
    const rad = (s.a - 90) * Math.PI / 180;
    const x = cx + d * Math.cos(rad), y = cy + d * Math.sin(rad);
    let col = s.v === 'YES' ? '#0f0' : (s.v === 'DAY' ? '#ff0' : '#0ff');
    if (s.f > 0 && Math.floor(Date.now() / (s.f === 2 ? 100 : 500)) % 2 === 0) col = '#444';
    ctx.fillStyle = col;
    ctx.beginPath(); ctx.arc(x, y, s.id === selected ? 6 : 4, 0, 2 * Math.PI); ctx.fill();
    ctx.fillStyle = '#ccc';
    ctx.fillText(s.n, x + 8, y + 4);
  }
}

async function poll() {
  try {
    const resp = await fetch('/api/satellites');
    const body = await resp.json();
    data = body.satellites || [];
    document.getElementById('status').innerText =
      `live: ${data.length} | observer ${body.config.lat.toFixed(3)}, ${body.config.lon.toFixed(3)}`;
    renderTable();
  } catch (e) {
    document.getElementById('status').innerText = 'fetch failed';
  }
}
setInterval(poll, 1000);
setInterval(renderSky, 100);
poll();
</script>
</body>
</html>
"#;

const PLANNER_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>skytrack planner</title>
<style>
  body { background:#111; color:#ddd; font-family:monospace; max-width:720px; margin:2em auto; }
  h1 { color:#4da6ff; font-size:18px; }
  fieldset { border:1px solid #333; margin-bottom:1em; }
  label { display:inline-block; width:170px; margin:2px 0; }
  input[type=number] { background:#222; color:#ddd; border:1px solid #444; width:110px; }
  button { background:#23405c; color:#fff; border:1px solid #4da6ff; padding:8px 20px; cursor:pointer; }
</style>
</head>
<body>
<h1>Mission planner</h1>
<fieldset><legend>Observer</legend>
  <label>Latitude <input type="number" id="lat" step="0.0001" value="{{LAT}}"></label>
  <label>Longitude <input type="number" id="lon" step="0.0001" value="{{LON}}"></label>
  <label>Altitude km <input type="number" id="alt" step="0.01" value="0"></label>
  <label>Min elevation <input type="number" id="minel" step="1" value="0"></label>
  <label><input type="checkbox" id="visonly" checked> optical only</label>
</fieldset>
<fieldset><legend>Groups</legend>{{GROUPS}}</fieldset>
<button onclick="submitPlan()">Save and start tracking</button>
<div id="msg"></div>
<script>
async function submitPlan() {
  const groups = Array.from(document.querySelectorAll('input[name=g]:checked')).map(b => b.value);
  const body = {
    lat: parseFloat(document.getElementById('lat').value),
    lon: parseFloat(document.getElementById('lon').value),
    alt: parseFloat(document.getElementById('alt').value),
    min_el: parseFloat(document.getElementById('minel').value),
    visible_only: document.getElementById('visonly').checked,
    groups: groups,
  };
  const resp = await fetch('/api/plan', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify(body),
  });
  const out = await resp.json();
  document.getElementById('msg').innerText =
    out.status === 'ok' ? 'Saved - tracker starting, this page can be closed.' : out.message;
}
</script>
</body>
</html>
"#;
