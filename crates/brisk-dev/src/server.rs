//! The dev server.
//!
//! Serves the latest build output from memory, rebuilds incrementally when
//! watched files change and pushes update records to connected browsers over
//! a WebSocket. Requests for build output wait until no rebuild is in flight,
//! so a page never sees a mix of old and new chunks.

use crate::hmr::{ChangeCoalescer, HmrManager, UpdateKind, UpdateRecord};
use crate::ui::UI;
use crate::watch::{FileWatcher, IgnoreSet};
use crate::websocket::{handle_client, ClientRegistry};
use crate::{mocks, proxy};
use axum::body::{Body, Bytes};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use brisk_bundle::bundler::chunker::ChunkKind;
use brisk_bundle::{BuildResult, Bundler, PluginManager};
use brisk_core::core::path::{absolutize, to_slash};
use brisk_core::{format_error_with_help, BriskError, BriskResult, BuildConfig, OutputFormat};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

pub const HMR_PATH: &str = "/__hmr";
pub const CLIENT_PATH: &str = "/__hmr/client.js";

const CLIENT_SCRIPT: &str = include_str!("client.js");
const WATCH_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPhase {
    Building,
    Ready,
    /// Last build failed; the previous good output is still served
    Failed(String),
}

/// Latest good build output, keyed by URL path
#[derive(Debug, Default)]
struct OutputCache {
    files: HashMap<String, Vec<u8>>,
    entry_scripts: Vec<String>,
    entry_styles: Vec<String>,
}

impl OutputCache {
    fn from_result(result: &BuildResult) -> BriskResult<Self> {
        let files = result
            .files()?
            .into_iter()
            .map(|(name, bytes)| (format!("/{}", name), bytes))
            .collect();
        let entries = result.chunks.iter().filter(|c| c.kind == ChunkKind::Entry);
        let (entry_scripts, entry_styles) = entries.fold((Vec::new(), Vec::new()), |(mut js, mut css), chunk| {
            js.push(format!("/{}", chunk.file_name));
            if let Some(style) = &chunk.css_file {
                css.push(format!("/{}", style));
            }
            (js, css)
        });
        Ok(Self {
            files,
            entry_scripts,
            entry_styles,
        })
    }
}

/// Shared state behind every request handler
pub struct DevState {
    config: BuildConfig,
    public_dir: PathBuf,
    bundler: tokio::sync::Mutex<Bundler>,
    hmr: RwLock<HmrManager>,
    output: RwLock<OutputCache>,
    clients: ClientRegistry,
    phase: watch::Sender<BuildPhase>,
    generation: AtomicU64,
    /// Changes whose rebuild was superseded or failed, reported with the next good one
    carried: Mutex<Vec<PathBuf>>,
    http: reqwest::Client,
}

impl DevState {
    pub fn new(config: BuildConfig, plugins: PluginManager) -> BriskResult<Self> {
        let bundler = Bundler::new(config.clone(), plugins)?.with_hmr(config.dev.hmr);
        let public_dir = absolutize(&config.root, &config.dev.public_dir);
        let hmr = HmrManager::new(&[config.root.clone(), public_dir.clone()]);
        let (phase, _) = watch::channel(BuildPhase::Building);

        Ok(Self {
            config,
            public_dir,
            bundler: tokio::sync::Mutex::new(bundler),
            hmr: RwLock::new(hmr),
            output: RwLock::new(OutputCache::default()),
            clients: ClientRegistry::new(),
            phase,
            generation: AtomicU64::new(0),
            carried: Mutex::new(Vec::new()),
            http: reqwest::Client::new(),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase.borrow().clone()
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Resolves once no build is in flight
    pub async fn wait_fresh(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase != BuildPhase::Building).await;
    }

    /// Full build; on failure the server keeps running and reports the error
    pub async fn initial_build(&self) -> BriskResult<()> {
        self.phase.send_replace(BuildPhase::Building);
        let mut bundler = self.bundler.lock().await;
        let outcome = bundler.build().await;
        let outcome = outcome.and_then(|result| self.install(&bundler, &result).map(|_| result));
        drop(bundler);

        match outcome {
            Ok(result) => {
                UI::rebuilt(result.stats.modules, result.stats.rendered_chunks, result.duration);
                self.phase.send_replace(BuildPhase::Ready);
                Ok(())
            }
            Err(e) => {
                self.phase.send_replace(BuildPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Rebuild after `paths` changed and broadcast the resulting record.
    ///
    /// Returns `None` when a newer change superseded this rebuild; its paths are
    /// then folded into the next record.
    pub async fn handle_changes(&self, paths: Vec<PathBuf>) -> Option<UpdateRecord> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.phase.send_replace(BuildPhase::Building);

        let mut bundler = self.bundler.lock().await;
        let outcome = bundler.rebuild(&paths).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Rebuild {} superseded", generation);
            self.carried.lock().extend(paths);
            return None;
        }

        let outcome = outcome.and_then(|result| self.install(&bundler, &result).map(|_| result));
        drop(bundler);

        let record = match outcome {
            Ok(result) => {
                UI::rebuilt(result.stats.modules, result.stats.rendered_chunks, result.duration);
                for warning in &result.warnings {
                    UI::warning(warning);
                }
                let mut changed = std::mem::take(&mut *self.carried.lock());
                changed.extend(paths);
                let record = self.hmr.read().on_files_changed(&changed);
                self.phase.send_replace(BuildPhase::Ready);
                record?
            }
            Err(e) => {
                UI::error(&format_error_with_help(&e));
                self.carried.lock().extend(paths);
                let record = self.hmr.read().error(e.to_string());
                self.phase.send_replace(BuildPhase::Failed(e.to_string()));
                record
            }
        };

        match record.kind {
            UpdateKind::Update => UI::hmr_update(&record.modules),
            UpdateKind::FullReload => UI::full_reload(record.message.as_deref().unwrap_or("")),
            UpdateKind::Connected | UpdateKind::Error => {}
        }
        let delivered = self.clients.broadcast(&record);
        debug!("Update {} delivered to {} clients", record.seq, delivered);
        Some(record)
    }

    fn install(&self, bundler: &Bundler, result: &BuildResult) -> BriskResult<()> {
        let cache = OutputCache::from_result(result)?;
        {
            let mut hmr = self.hmr.write();
            hmr.track(bundler.graph());
            hmr.track_output(result);
        }
        *self.output.write() = cache;
        Ok(())
    }

    fn cached(&self, path: &str) -> Option<Vec<u8>> {
        self.output.read().files.get(path).cloned()
    }

    async fn index_html(&self) -> String {
        for dir in [&self.config.root, &self.public_dir] {
            if let Ok(html) = tokio::fs::read_to_string(dir.join("index.html")).await {
                return html;
            }
        }
        let output = self.output.read();
        generate_index_html(&output.entry_scripts, &output.entry_styles, self.config.format)
    }

    async fn public_file(&self, path: &str) -> Option<Vec<u8>> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty() || relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return None;
        }
        tokio::fs::read(self.public_dir.join(relative)).await.ok()
    }

    fn decorate_html(&self, html: &str) -> String {
        if self.config.dev.hmr {
            inject_client_script(html)
        } else {
            html.to_string()
        }
    }
}

/// Dev server bound to one project
pub struct DevServer {
    state: Arc<DevState>,
}

impl DevServer {
    pub fn new(config: BuildConfig, plugins: PluginManager) -> BriskResult<Self> {
        Ok(Self {
            state: Arc::new(DevState::new(config, plugins)?),
        })
    }

    pub fn state(&self) -> Arc<DevState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(HMR_PATH, get(handle_socket))
            .route(CLIENT_PATH, get(handle_client_script))
            .fallback(handle_request)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until Ctrl+C
    pub async fn run(self) -> BriskResult<()> {
        let addr = format!("{}:{}", self.state.config.dev.host, self.state.config.dev.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BriskError::Server(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Build, start watching and serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> BriskResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.state.config;
        let local = listener.local_addr()?;
        let roots = config.watch_roots();
        let watching = roots
            .iter()
            .map(|r| to_slash(r.strip_prefix(&config.root).unwrap_or(r)))
            .collect::<Vec<_>>()
            .join(", ");
        UI::server_start(&format!("http://{}", local), &watching);

        if let Err(e) = self.state.initial_build().await {
            UI::error(&format_error_with_help(&e));
        }

        let debounce = Duration::from_millis(config.dev.debounce_ms);
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let _watcher = FileWatcher::start(&roots, IgnoreSet::new(&config.dev.ignore)?, debounce, tx)?;
        let watch_task = tokio::spawn(watch_loop(self.state.clone(), ChangeCoalescer::new(rx, debounce)));

        info!("Serving on http://{}", local);
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| BriskError::Server(e.to_string()));

        watch_task.abort();
        UI::server_stop();
        served
    }
}

async fn watch_loop(state: Arc<DevState>, mut coalescer: ChangeCoalescer) {
    while let Some(batch) = coalescer.next_batch().await {
        for path in &batch {
            let shown = path.strip_prefix(&state.config.root).unwrap_or(path);
            UI::file_changed(&to_slash(shown));
        }
        let state = state.clone();
        tokio::spawn(async move {
            state.handle_changes(batch).await;
        });
    }
}

async fn handle_socket(ws: WebSocketUpgrade, State(state): State<Arc<DevState>>) -> Response<Body> {
    ws.on_upgrade(move |socket| async move {
        let (id, rx) = state.clients.register();
        let greetings = {
            let hmr = state.hmr.read();
            let mut records = vec![hmr.connected()];
            if let BuildPhase::Failed(message) = state.phase() {
                records.push(hmr.error(message));
            }
            records
        };
        debug!("HMR client {} connected", id);
        handle_client(socket, id, greetings, rx).await;
        state.clients.unregister(id);
    })
}

async fn handle_client_script() -> Response<Body> {
    respond(StatusCode::OK, "application/javascript", CLIENT_SCRIPT)
}

async fn handle_request(
    State(state): State<Arc<DevState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let path = uri.path();

    if let Some(mock) = mocks::find(&state.config.dev.mocks, &method, path) {
        return mocks::respond(mock).unwrap_or_else(|e| server_error(&e));
    }

    if let Some((prefix, rule)) = proxy::match_rule(&state.config.dev.proxy, path) {
        let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or(path);
        return match proxy::forward(&state.http, prefix, rule, method, path_and_query, &headers, body).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain; charset=utf-8", e.to_string())
            }
        };
    }

    if method != Method::GET && method != Method::HEAD {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain; charset=utf-8", "Method not allowed");
    }

    state.wait_fresh().await;

    if path == "/" || path == "/index.html" {
        let html = state.index_html().await;
        return respond(StatusCode::OK, content_type("index.html"), state.decorate_html(&html));
    }

    if let Some(bytes) = state.cached(path) {
        return respond(StatusCode::OK, content_type(path), bytes);
    }

    if let Some(bytes) = state.public_file(path).await {
        if path.ends_with(".html") {
            let html = state.decorate_html(&String::from_utf8_lossy(&bytes));
            return respond(StatusCode::OK, content_type(path), html);
        }
        return respond(StatusCode::OK, content_type(path), bytes);
    }

    debug!("404 {}", path);
    respond(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", format!("Not found: {}", path))
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn server_error(error: &BriskError) -> Response<Body> {
    warn!("{}", error);
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
}

/// Insert the HMR client before `</body>`, or append it
pub fn inject_client_script(html: &str) -> String {
    let tag = format!(r#"<script type="module" src="{}"></script>"#, CLIENT_PATH);
    match html.rfind("</body>") {
        Some(pos) => format!("{}{}\n{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}\n{}\n", html, tag),
    }
}

/// Page used when the project has no index.html of its own
fn generate_index_html(scripts: &[String], styles: &[String], format: OutputFormat) -> String {
    let script_type = if format == OutputFormat::Esm { r#" type="module""# } else { "" };
    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>brisk</title>\n");
    for style in styles {
        html.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">\n", style));
    }
    html.push_str("</head>\n<body>\n<div id=\"app\"></div>\n");
    for script in scripts {
        html.push_str(&format!("<script{} src=\"{}\"></script>\n", script_type, script));
    }
    html.push_str("</body>\n</html>\n");
    html
}

fn content_type(path: &str) -> &'static str {
    let extension = Path::new(path).extension().and_then(|ext| ext.to_str()).unwrap_or("");

    match extension {
        "js" | "mjs" | "cjs" => "application/javascript",
        "json" | "map" => "application/json",
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_before_body_close() {
        let html = inject_client_script("<html><body><p>hi</p></body></html>");
        let script = html.find(CLIENT_PATH).unwrap();
        assert!(script < html.find("</body>").unwrap());
        assert!(html.find("<p>hi</p>").unwrap() < script);
    }

    #[test]
    fn test_inject_without_body_appends() {
        let html = inject_client_script("<p>bare</p>");
        assert!(html.starts_with("<p>bare</p>"));
        assert!(html.contains(CLIENT_PATH));
    }

    #[test]
    fn test_generated_index_links_entries() {
        let html = generate_index_html(&["/index.js".to_string()], &["/index.css".to_string()], OutputFormat::Esm);
        assert!(html.contains(r#"<script type="module" src="/index.js"></script>"#));
        assert!(html.contains(r#"<link rel="stylesheet" href="/index.css">"#));

        let classic = generate_index_html(&["/index.js".to_string()], &[], OutputFormat::Iife);
        assert!(classic.contains(r#"<script src="/index.js"></script>"#));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type("/index.js"), "application/javascript");
        assert_eq!(content_type("/index.js.map"), "application/json");
        assert_eq!(content_type("/assets/logo-1a2b.png"), "image/png");
        assert_eq!(content_type("/unknown.bin"), "application/octet-stream");
    }
}
