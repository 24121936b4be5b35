//! Dev server tests against a real listener

use axum::http::HeaderMap;
use axum::routing;
use axum::Router;
use brisk_bundle::PluginManager;
use brisk_core::{BriskResult, BuildConfig};
use brisk_dev::{BuildPhase, DevServer, DevState, UpdateKind};
use futures_util::StreamExt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    for (path, content) in files {
        write(temp.path(), path, content);
    }
    temp
}

struct Running {
    addr: SocketAddr,
    state: Arc<DevState>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<BriskResult<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }
}

// Watching is pointed at a directory that does not exist so tests drive
// rebuilds themselves.
async fn start(root: &Path, extra_yaml: &str) -> Running {
    let yaml = format!("entry: src/index.js\ndev:\n  watch: [unwatched]\n{}", extra_yaml);
    let config = BuildConfig::from_yaml_str(&yaml, root.to_path_buf()).unwrap();
    let server = DevServer::new(config, PluginManager::new()).unwrap();
    let state = server.state();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async {
        let _ = rx.await;
    }));
    Running {
        addr,
        state,
        shutdown,
        handle,
    }
}

async fn get(url: &str) -> (u16, String, String) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (status, content_type, response.text().await.unwrap())
}

const APP: &[(&str, &str)] = &[
    (
        "src/index.js",
        "import { text } from './view.js';\ndocument.body.textContent = text;\n",
    ),
    (
        "src/view.js",
        "export const text = 'one';\nif (import.meta.hot) { import.meta.hot.accept(); }\n",
    ),
];

#[tokio::test]
async fn test_serves_output_and_generated_index() {
    let temp = project(APP);
    let server = start(temp.path(), "").await;

    let (status, content_type, body) = get(&server.url("/index.js")).await;
    assert_eq!(status, 200);
    assert_eq!(content_type, "application/javascript");
    assert!(body.contains("'one'"));

    let (status, content_type, html) = get(&server.url("/")).await;
    assert_eq!(status, 200);
    assert!(content_type.starts_with("text/html"));
    assert!(html.contains(r#"src="/index.js""#));
    assert!(html.contains("/__hmr/client.js"));

    let (status, _, script) = get(&server.url("/__hmr/client.js")).await;
    assert_eq!(status, 200);
    assert!(script.contains("hotApply"));

    let (status, _, _) = get(&server.url("/missing.js")).await;
    assert_eq!(status, 404);
    assert_eq!(server.state.phase(), BuildPhase::Ready);

    server.stop().await;
}

#[tokio::test]
async fn test_project_index_and_public_files() {
    let mut files = APP.to_vec();
    files.push(("index.html", "<html><body><main id=\"app\"></main></body></html>"));
    files.push(("public/robots.txt", "User-agent: *\n"));
    let temp = project(&files);
    let server = start(temp.path(), "").await;

    let (_, _, html) = get(&server.url("/")).await;
    assert!(html.contains("<main id=\"app\"></main>"));
    assert!(html.find("/__hmr/client.js").unwrap() < html.find("</body>").unwrap());

    let (status, content_type, robots) = get(&server.url("/robots.txt")).await;
    assert_eq!(status, 200);
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(robots, "User-agent: *\n");

    server.stop().await;
}

#[tokio::test]
async fn test_mocks_and_proxy() {
    let upstream = Router::new()
        .route("/users", routing::get(|| async { "upstream users" }))
        .route(
            "/host",
            routing::get(|headers: HeaderMap| async move {
                headers
                    .get("host")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(upstream_listener, upstream).await.unwrap();
    });

    let temp = project(APP);
    let extra = format!(
        "  proxy:\n    /api:\n      target: http://{}\n      rewrite: \"\"\n    /origin:\n      target: http://{}\n      rewrite: \"\"\n      change_origin: true\n    /dead:\n      target: http://127.0.0.1:1\n  mocks:\n    - path: /mock/user\n      body:\n        name: ada\n",
        upstream_addr, upstream_addr
    );
    let server = start(temp.path(), &extra).await;

    let (status, _, body) = get(&server.url("/api/users")).await;
    assert_eq!(status, 200);
    assert_eq!(body, "upstream users");

    // the browser's host is forwarded unless change_origin is set
    let (_, _, host) = get(&server.url("/api/host")).await;
    assert_eq!(host, server.addr.to_string());
    let (_, _, host) = get(&server.url("/origin/host")).await;
    assert_eq!(host, upstream_addr.to_string());

    let (status, _, _) = get(&server.url("/dead/thing")).await;
    assert_eq!(status, 500);

    let (status, content_type, body) = get(&server.url("/mock/user")).await;
    assert_eq!(status, 200);
    assert_eq!(content_type, "application/json");
    let value: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["name"], "ada");

    server.stop().await;
}

#[tokio::test]
async fn test_hmr_update_reaches_websocket_client() {
    let temp = project(APP);
    let server = start(temp.path(), "").await;
    // the first response means the initial build is installed
    get(&server.url("/index.js")).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/__hmr", server.addr))
        .await
        .unwrap();
    let greeting = socket.next().await.unwrap().unwrap();
    assert!(matches!(&greeting, Message::Text(text) if text.contains("\"type\":\"connected\"")));

    write(
        temp.path(),
        "src/view.js",
        "export const text = 'two';\nif (import.meta.hot) { import.meta.hot.accept(); }\n",
    );
    let record = server
        .state
        .handle_changes(vec![temp.path().join("src/view.js")])
        .await
        .unwrap();
    assert_eq!(record.kind, UpdateKind::Update);
    assert_eq!(record.modules, vec!["src/view.js"]);
    assert_eq!(record.files, vec!["index.js"]);

    let pushed = socket.next().await.unwrap().unwrap();
    match pushed {
        Message::Text(text) => {
            assert!(text.contains("\"type\":\"update\""));
            assert!(text.contains("src/view.js"));
        }
        other => panic!("unexpected message {:?}", other),
    }

    let (_, _, body) = get(&server.url("/index.js")).await;
    assert!(body.contains("'two'"));

    server.stop().await;
}

#[tokio::test]
async fn test_failed_rebuild_keeps_last_good_output() {
    let temp = project(APP);
    let server = start(temp.path(), "").await;
    get(&server.url("/index.js")).await;

    write(temp.path(), "src/index.js", "import { text } from './gone.js';\nconsole.log(text);\n");
    let record = server
        .state
        .handle_changes(vec![temp.path().join("src/index.js")])
        .await
        .unwrap();
    assert_eq!(record.kind, UpdateKind::Error);
    assert!(matches!(server.state.phase(), BuildPhase::Failed(_)));

    let (status, _, body) = get(&server.url("/index.js")).await;
    assert_eq!(status, 200);
    assert!(body.contains("'one'"));

    // late joiners learn about the failure right away
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/__hmr", server.addr))
        .await
        .unwrap();
    socket.next().await.unwrap().unwrap();
    let error = socket.next().await.unwrap().unwrap();
    assert!(matches!(&error, Message::Text(text) if text.contains("\"type\":\"error\"")));

    // fixing the file reloads the page, since the entry itself changed
    write(temp.path(), "src/index.js", APP[0].1);
    let record = server
        .state
        .handle_changes(vec![temp.path().join("src/index.js")])
        .await
        .unwrap();
    assert_eq!(record.kind, UpdateKind::FullReload);
    assert_eq!(server.state.phase(), BuildPhase::Ready);

    server.stop().await;
}
