//! Live-edit preview server implementation.

use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use trellis_core::{
    Content, ContentError, Document, EditorEffect, EditorError, EditorSession, FileFetcher, MountOptions,
    PreviewCache, RenderTree, Renderer, DEFAULT_PREVIEW_CAPACITY,
};
use trellis_html::{
    load_symbols, AdapterError, Breakpoints, BuildError, HtmlAdapter, RenderAdapter, TemplateEngine,
};

use crate::live::{live_client_script, LiveHub, LiveMessage};
use crate::watcher::{FileWatcher, WatchEvent};

const LIVE_PATH: &str = "/__live";

/// Origin assumed for socket clients that send none.
const LOCAL_ORIGIN: &str = "http://localhost";

/// Configuration for the preview server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Content document being previewed
    pub content_path: PathBuf,

    /// Symbol documents, reloaded when they change
    pub symbols_dir: Option<PathBuf>,

    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Open browser on start
    pub open: bool,

    /// Editor model, caller state, context and locale of the document
    pub mount: MountOptions,

    pub preview_cache_capacity: usize,

    /// Site title appended to the page title
    pub site_title: Option<String>,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            content_path: PathBuf::from("content/index.json"),
            symbols_dir: None,
            port: 7777,
            host: "127.0.0.1".to_string(),
            open: true,
            mount: MountOptions {
                model: Some("page".to_string()),
                live_edit: true,
                ..MountOptions::default()
            },
            preview_cache_capacity: DEFAULT_PREVIEW_CAPACITY,
            site_title: None,
        }
    }
}

impl DevServerConfig {
    /// Directory that relative `httpRequests` URLs resolve against.
    pub fn content_root(&self) -> PathBuf {
        match self.content_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error(transparent)]
    Render(#[from] AdapterError),

    #[error(transparent)]
    Symbols(#[from] BuildError),
}

/// Shared server state.
pub struct ServerState {
    config: DevServerConfig,
    renderer: Renderer,
    document: Document,
    hub: LiveHub,
    previews: PreviewCache,
    templates: TemplateEngine,
    live_script: String,
    /// Origins allowed to use the API and the live socket
    origins: EditorSession,
    content_file: PathBuf,
    symbols_dir: Option<PathBuf>,
}

pub type SharedState = Arc<RwLock<ServerState>>;

impl ServerState {
    /// Load and mount the configured content document.
    pub fn new(mut config: DevServerConfig, renderer: Renderer) -> Result<Self, ServerError> {
        // Pages served from here forward editor messages over the socket
        if !config.mount.trusted_hosts.contains(&config.host) {
            config.mount.trusted_hosts.push(config.host.clone());
        }
        let origins = EditorSession::new(config.mount.model.clone().unwrap_or_default())
            .with_trusted_hosts(config.mount.trusted_hosts.clone());

        let content = read_content(&config.content_path)?;
        let document = mount(&config, &renderer, content);

        Ok(Self {
            content_file: canonical(&config.content_path),
            symbols_dir: config.symbols_dir.as_deref().map(canonical),
            previews: PreviewCache::new(config.preview_cache_capacity),
            live_script: live_client_script(LIVE_PATH, origins.trusted_hosts()),
            origins,
            templates: TemplateEngine::new(),
            hub: LiveHub::new(),
            document,
            renderer,
            config,
        })
    }

    pub fn hub(&self) -> &LiveHub {
        &self.hub
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn previews(&self) -> &PreviewCache {
        &self.previews
    }

    pub fn render_tree(&self) -> RenderTree {
        self.document.render()
    }

    /// The full preview page, live client included.
    pub fn render_page(&self) -> Result<String, AdapterError> {
        let tree = self.render_tree();
        self.templates.render_tree(&self.adapter(), &tree, |mut page| {
            if let Some(title) = &self.config.site_title {
                page = page.with_site_title(title.as_str());
            }
            if let Some(locale) = &self.config.mount.locale {
                page = page.with_lang(locale.as_str());
            }
            page.with_script(self.live_script.as_str())
        })
    }

    /// Push the current rendering to every open page. Pages with client-side
    /// variants are reloaded so their selection scripts run again.
    pub fn broadcast(&self) {
        let tree = self.render_tree();
        if tree.has_client_variants() {
            self.hub.send(LiveMessage::Reload);
            return;
        }
        match self.adapter().render(&tree) {
            Ok(html) => self.hub.send(LiveMessage::Render { html }),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to render preview");
                self.hub.send(LiveMessage::Reload);
            }
        }
    }

    /// Re-read the content file and mount it afresh.
    pub fn reload_content(&mut self) -> Result<(), ServerError> {
        let content = read_content(&self.config.content_path)?;
        self.document = mount(&self.config, &self.renderer, content);
        self.broadcast();
        Ok(())
    }

    /// Reload the symbol library, then the content.
    pub fn reload_symbols(&mut self) -> Result<(), ServerError> {
        let Some(dir) = &self.config.symbols_dir else {
            return Ok(());
        };
        let symbols = load_symbols(dir)?;
        self.renderer = self.renderer.clone().with_symbols(Arc::new(symbols));
        self.reload_content()
    }

    /// Apply one editor message received from `origin`.
    pub fn receive_editor_frame(&mut self, origin: &str, raw: &str) -> Result<EditorEffect, ServerError> {
        let effect = self
            .document
            .receive_editor_message(origin, raw, Some(&self.previews))?;
        if effect == EditorEffect::ContentUpdated {
            self.run_requests();
        }
        if effect != EditorEffect::Ignored {
            self.broadcast();
        }
        Ok(effect)
    }

    /// Store preview content under `key`. Returns whether `key` is the
    /// current document, which is then re-rendered.
    pub fn put_preview(&mut self, key: &str, value: JsonValue) -> Result<bool, ServerError> {
        let content: Content = serde_json::from_value(value).map_err(ContentError::from)?;
        self.previews.put(key, content.clone());

        let current = key == self.document.content().id();
        if current {
            self.document.replace_content(content);
            self.run_requests();
            self.broadcast();
        }
        Ok(current)
    }

    pub fn preview(&self, key: &str) -> Option<Content> {
        self.previews.get(key)
    }

    /// The origin policy for API requests and socket connections.
    pub fn origins(&self) -> &EditorSession {
        &self.origins
    }

    /// Requests without an `Origin` header come from outside a browser.
    pub fn allows_origin(&self, headers: &HeaderMap) -> bool {
        request_origin(headers).map_or(true, |origin| self.origins.is_trusted(origin))
    }

    fn adapter(&self) -> HtmlAdapter {
        let meta = self.document.content().meta.breakpoints.as_ref();
        HtmlAdapter::new().with_breakpoints(Breakpoints::from_meta(meta))
    }

    fn run_requests(&self) {
        if !self.document.content().data.http_requests.is_empty() {
            self.document
                .run_requests(&FileFetcher::new(self.config.content_root()));
        }
    }

    fn is_content_file(&self, path: &FsPath) -> bool {
        path == self.content_file || canonical(path) == self.content_file
    }

    fn is_symbol_file(&self, path: &FsPath) -> bool {
        self.symbols_dir
            .as_deref()
            .is_some_and(|dir| path.starts_with(dir) || canonical(path).starts_with(dir))
    }
}

fn mount(config: &DevServerConfig, renderer: &Renderer, content: Content) -> Document {
    let document = Document::mount(content, renderer.clone(), config.mount.clone());
    if !document.content().data.http_requests.is_empty() {
        let merged = document.run_requests(&FileFetcher::new(config.content_root()));
        tracing::debug!(merged, "Resolved HTTP requests");
    }
    document
}

fn read_content(path: &FsPath) -> Result<Content, ServerError> {
    let text = std::fs::read_to_string(path).map_err(|e| ServerError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(Content::from_json(&text)?)
}

fn canonical(path: &FsPath) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Live-edit preview server.
pub struct DevServer {
    config: DevServerConfig,
    renderer: Renderer,
}

impl DevServer {
    pub fn new(config: DevServerConfig, renderer: Renderer) -> Self {
        Self { config, renderer }
    }

    /// Start the server and run until it fails.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| ServerError::InvalidAddress(format!("{}:{}: {e}", self.config.host, self.config.port)))?;

        let content_root = self.config.content_root();
        let mut watch_paths = vec![content_root.clone()];
        if let Some(dir) = &self.config.symbols_dir {
            if !dir.starts_with(&content_root) {
                watch_paths.push(dir.clone());
            }
        }
        let open_browser = self.config.open;

        let state = ServerState::new(self.config, self.renderer)?;
        let origins = state.origins().clone();
        let state = Arc::new(RwLock::new(state));

        let (watcher, mut rx) =
            FileWatcher::new(&watch_paths).map_err(|e| ServerError::WatchError(e.to_string()))?;

        let watch_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle_watch_event(&watch_state, event).await;
            }
            // Keep watcher alive
            drop(watcher);
        });

        let app = router(state, origins, &content_root);

        tracing::info!("Starting preview server at http://{}", addr);

        if open_browser {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::debug!(error = %e, "Could not open browser");
            }
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        Ok(())
    }
}

/// Routes of the preview server. Content files are served under `/content`.
/// Cross-origin API access is limited to the hosts `origins` trusts.
pub fn router(state: SharedState, origins: EditorSession, content_root: &FsPath) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin.to_str().is_ok_and(|o| origins.is_trusted(o))
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/api/preview", post(put_preview_handler))
        .route("/api/preview/{key}", get(get_preview_handler))
        .route("/api/render", get(render_handler))
        .layer(cors);

    Router::new()
        .route("/", get(index_handler))
        .route(LIVE_PATH, get(ws_handler))
        .merge(api)
        .nest_service("/content", ServeDir::new(content_root))
        .with_state(state)
}

/// Handle file watch events.
async fn handle_watch_event(state: &SharedState, event: WatchEvent) {
    let mut state = state.write().await;
    let path = event.path().to_path_buf();

    let result = if state.is_content_file(&path) {
        if matches!(event, WatchEvent::Deleted(_)) {
            tracing::warn!("Content file deleted: {}", path.display());
            return;
        }
        tracing::info!("Content modified: {}", path.display());
        state.reload_content()
    } else if state.is_symbol_file(&path) {
        tracing::info!("Symbol modified: {}", path.display());
        state.reload_symbols()
    } else if matches!(event, WatchEvent::Modified(_)) {
        state.hub().send(LiveMessage::Reload);
        Ok(())
    } else {
        tracing::debug!("Ignoring change to {}", path.display());
        Ok(())
    };

    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Failed to reload");
    }
}

/// Handler for the preview page.
async fn index_handler(State(state): State<SharedState>) -> Response {
    let state = state.read().await;
    match state.render_page() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to render page");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to render page: {e}")).into_response()
        }
    }
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

fn forbidden(headers: &HeaderMap) -> Response {
    let origin = request_origin(headers).unwrap_or_default();
    tracing::warn!(origin = %origin, "Rejected request from untrusted origin");
    (StatusCode::FORBIDDEN, format!("Untrusted origin: {origin}")).into_response()
}

async fn render_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let state = state.read().await;
    if !state.allows_origin(&headers) {
        return forbidden(&headers);
    }
    Json(state.render_tree()).into_response()
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    key: String,
    value: JsonValue,
}

async fn put_preview_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<PreviewRequest>,
) -> Response {
    let mut state = state.write().await;
    if !state.allows_origin(&headers) {
        return forbidden(&headers);
    }
    match state.put_preview(&request.key, request.value) {
        Ok(current) => Json(json!({"stored": true, "current": current})).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn get_preview_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    let state = state.read().await;
    if !state.allows_origin(&headers) {
        return forbidden(&headers);
    }
    match state.preview(&key) {
        Some(content) => Json(content).into_response(),
        None => (StatusCode::NOT_FOUND, format!("No preview for '{key}'")).into_response(),
    }
}

/// Handler for the live WebSocket endpoint.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<SharedState>,
) -> Response {
    if !state.read().await.allows_origin(&headers) {
        return forbidden(&headers);
    }
    let origin = request_origin(&headers).unwrap_or(LOCAL_ORIGIN).to_string();
    ws.on_upgrade(move |socket| handle_ws(socket, state, origin))
}

/// Forward live messages to the page and editor messages to the document.
async fn handle_ws(mut socket: WebSocket, state: SharedState, origin: String) {
    let mut rx = state.read().await.hub().subscribe();

    if !send(&mut socket, &LiveMessage::Connected).await {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(msg) => {
                    if !send(&mut socket, &msg).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Live client lagged");
                    if !send(&mut socket, &LiveMessage::Reload).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let result = state.write().await.receive_editor_frame(&origin, text.as_str());
                    match result {
                        Ok(effect) => tracing::debug!(?effect, "Editor message applied"),
                        Err(e) => tracing::warn!(origin = %origin, error = %e, "Rejected editor message"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &LiveMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};
    use trellis_core::{default_renderer, Globals};

    fn page(text: &str) -> String {
        format!(
            r#"{{"id": "home", "data": {{"title": "Home", "blocks": [
                {{"id": "t", "component": {{"name": "Text", "options": {{"text": "{text}"}}}}}}
            ]}}}}"#
        )
    }

    fn setup() -> (TempDir, ServerState) {
        let temp = tempdir().unwrap();
        let content_path = temp.path().join("index.json");
        fs::write(&content_path, page("Hello")).unwrap();

        let config = DevServerConfig {
            content_path,
            open: false,
            ..Default::default()
        };
        let state = ServerState::new(config, default_renderer(Globals::default())).unwrap();
        (temp, state)
    }

    #[test]
    fn creates_server_with_default_config() {
        let config = DevServerConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.preview_cache_capacity, 500);
        assert_eq!(config.mount.model.as_deref(), Some("page"));
    }

    #[test]
    fn renders_page_with_live_client() {
        let (_temp, state) = setup();
        let html = state.render_page().unwrap();

        assert!(html.contains("<title>Home</title>"));
        assert!(html.contains("Hello"));
        assert!(html.contains("location.host + '/__live'"));
    }

    #[test]
    fn previews_of_the_current_document_rerender() {
        let (_temp, mut state) = setup();
        let mut rx = state.hub().subscribe();

        let value: JsonValue = serde_json::from_str(&page("Updated")).unwrap();
        assert!(state.put_preview("home", value).unwrap());
        match rx.try_recv() {
            Ok(LiveMessage::Render { html }) => assert!(html.contains("Updated")),
            other => panic!("Expected Render message, got {other:?}"),
        }

        let other: JsonValue = serde_json::from_str(&page("Elsewhere")).unwrap();
        assert!(!state.put_preview("blog", other).unwrap());
        assert!(rx.try_recv().is_err());
        assert!(state.preview("blog").is_some());
        assert!(state.render_page().unwrap().contains("Updated"));
    }

    #[test]
    fn editor_frames_respect_origin_and_model() {
        let (_temp, mut state) = setup();
        let update = r#"{"type": "builder.contentUpdate", "data": {"key": "page", "data": {"data": {"blocks": [
            {"id": "t", "component": {"name": "Text", "options": {"text": "From editor"}}}
        ]}}}}"#;

        assert!(matches!(
            state.receive_editor_frame("https://evil.test", update),
            Err(ServerError::Editor(EditorError::UntrustedOrigin(_)))
        ));

        let effect = state.receive_editor_frame("http://localhost:7777", update).unwrap();
        assert_eq!(effect, EditorEffect::ContentUpdated);
        assert!(state.previews().contains("home"));
        assert!(state.render_page().unwrap().contains("From editor"));

        let other = update.replace(r#""key": "page""#, r#""key": "blog""#);
        let effect = state.receive_editor_frame("http://localhost:7777", &other).unwrap();
        assert_eq!(effect, EditorEffect::Ignored);
    }

    #[test]
    fn reloads_content_from_disk() {
        let (temp, mut state) = setup();
        fs::write(temp.path().join("index.json"), page("Changed on disk")).unwrap();
        let mut rx = state.hub().subscribe();

        state.reload_content().unwrap();

        assert!(state.render_page().unwrap().contains("Changed on disk"));
        assert!(matches!(rx.try_recv(), Ok(LiveMessage::Render { .. })));
        assert!(state.is_content_file(&temp.path().join("index.json")));
    }

    #[test]
    fn missing_content_is_an_error() {
        let temp = tempdir().unwrap();
        let config = DevServerConfig {
            content_path: temp.path().join("missing.json"),
            ..Default::default()
        };
        assert!(matches!(
            ServerState::new(config, default_renderer(Globals::default())),
            Err(ServerError::ReadError { .. })
        ));
    }

    fn origin(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, value.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn api_handlers_serve_previews_and_trees() {
        let (_temp, state) = setup();
        let shared: SharedState = Arc::new(RwLock::new(state));
        let local = origin("http://127.0.0.1:7777");

        let missing =
            get_preview_handler(State(shared.clone()), local.clone(), Path("nope".to_string())).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let request = PreviewRequest {
            key: "nope".to_string(),
            value: serde_json::from_str(&page("Draft")).unwrap(),
        };
        let stored = put_preview_handler(State(shared.clone()), local.clone(), Json(request)).await;
        assert_eq!(stored.status(), StatusCode::OK);

        let found =
            get_preview_handler(State(shared.clone()), HeaderMap::new(), Path("nope".to_string())).await;
        assert_eq!(found.status(), StatusCode::OK);

        let tree = render_handler(State(shared.clone()), local.clone()).await;
        assert_eq!(tree.status(), StatusCode::OK);
        assert_eq!(shared.read().await.render_tree().content_id, "home");

        let invalid = PreviewRequest {
            key: "bad".to_string(),
            value: json!([1, 2]),
        };
        let rejected = put_preview_handler(State(shared), local, Json(invalid)).await;
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_rejects_untrusted_origins() {
        let (_temp, state) = setup();
        let shared: SharedState = Arc::new(RwLock::new(state));
        let evil = origin("https://evil.test");

        let request = PreviewRequest {
            key: "home".to_string(),
            value: json!({
                "id": "home",
                "data": {"httpRequests": {"x": "file:///etc/passwd"}, "blocks": []}
            }),
        };
        let stored = put_preview_handler(State(shared.clone()), evil.clone(), Json(request)).await;
        assert_eq!(stored.status(), StatusCode::FORBIDDEN);
        assert!(shared.read().await.preview("home").is_none());
        assert!(shared.read().await.render_page().unwrap().contains("Hello"));

        let tree = render_handler(State(shared.clone()), evil.clone()).await;
        assert_eq!(tree.status(), StatusCode::FORBIDDEN);

        let preview = get_preview_handler(State(shared), evil, Path("home".to_string())).await;
        assert_eq!(preview.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn trusts_the_serving_host_and_configured_hosts() {
        let (_temp, state) = setup();
        assert!(state.allows_origin(&HeaderMap::new()));
        assert!(state.allows_origin(&origin("http://127.0.0.1:7777")));
        assert!(state.allows_origin(&origin("https://builder.io")));
        assert!(!state.allows_origin(&origin("https://evil.test")));
    }
}
