//! A mounted content document.
//!
//! Owns the root state for its lifetime. Mounting builds the initial state
//! and runs the content's `jsCode`; unmounting (or dropping) tears the store
//! down so late merges from outstanding work are discarded.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::editor::{merge_content, EditorMessage, EditorSession};
use crate::error::{EditorError, FetchError};
use crate::http::{Fetcher, PendingRequest, RequestTracker};
use crate::model::Content;
use crate::preview::PreviewCache;
use crate::renderer::{RenderTree, Renderer};
use crate::scope::{Scope, StateMap};
use crate::store::{StateHandle, StateStore, Subscription};

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Editor model; enables the live-edit session when set
    pub model: Option<String>,
    /// Caller data layered over `data.state`
    pub data: StateMap,
    pub context: StateMap,
    pub locale: Option<String>,
    pub live_edit: bool,
    /// Trusted editor hosts on top of the defaults
    pub trusted_hosts: Vec<String>,
}

/// What an editor message did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorEffect {
    ContentUpdated,
    StateReset,
    SdkConfigured,
    Ignored,
}

pub struct Document {
    content: Content,
    store: StateStore,
    renderer: Renderer,
    requests: RequestTracker,
    session: Option<EditorSession>,
    context: Arc<StateMap>,
    locale: Option<String>,
    live_edit: bool,
}

impl Document {
    /// Mount `content` on a fork of `renderer`. The document's block cache
    /// and live-edit flag are its own; `renderer` is left untouched.
    pub fn mount(content: Content, renderer: Renderer, options: MountOptions) -> Self {
        let initial = initial_state(&content, options.data, options.locale.as_deref());
        let renderer = renderer.fork();
        renderer.processor().set_live_edit(options.live_edit);

        let session = options
            .model
            .map(|model| EditorSession::new(model).with_trusted_hosts(options.trusted_hosts));

        let document = Self {
            content,
            store: StateStore::new(initial),
            renderer,
            requests: RequestTracker::new(),
            session,
            context: Arc::new(options.context),
            locale: options.locale,
            live_edit: options.live_edit,
        };

        if let Some(code) = document.content.data.js_code.as_deref() {
            if !code.trim().is_empty() {
                document.run_statements(code, None);
            }
        }
        tracing::debug!(content_id = %document.content.id(), "Mounted document");
        document
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn session(&self) -> Option<&EditorSession> {
        self.session.as_ref()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> Arc<StateMap> {
        self.store.snapshot()
    }

    pub fn handle(&self) -> StateHandle {
        self.store.handle()
    }

    pub fn is_mounted(&self) -> bool {
        self.store.is_mounted()
    }

    /// Scope over the current root state.
    pub fn scope(&self) -> Scope {
        Scope::new(self.store.snapshot(), self.context.clone(), self.locale.clone())
    }

    /// Render against the current state.
    pub fn render(&self) -> RenderTree {
        self.renderer.render_content(&self.content, &self.scope())
    }

    /// Shallow-merge into root state.
    pub fn merge_state(&self, patch: StateMap) -> bool {
        self.store.merge(patch)
    }

    /// Called with the new state after every merge.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateMap) + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    /// Run an action's statement code; `state` writes merge into root state.
    pub fn run_action(&self, code: &str, event: Option<&JsonValue>) -> Option<JsonValue> {
        self.run_statements(code, event)
    }

    fn run_statements(&self, code: &str, event: Option<&JsonValue>) -> Option<JsonValue> {
        let scope = self.scope();
        let mut input = scope.input(code).statements();
        if let Some(event) = event {
            input = input.event(event);
        }
        let store = self.store.clone();
        self.renderer
            .processor()
            .evaluator()
            .evaluate_with_setter(&input, &mut |patch| {
                store.merge(patch);
            })
    }

    /// HTTP requests due now, marked pending.
    pub fn begin_requests(&self) -> Vec<PendingRequest> {
        self.requests.begin(
            &self.content.data.http_requests,
            self.renderer.processor().evaluator(),
            &self.scope(),
            self.live_edit,
        )
    }

    /// Deliver the result of a request from [`Document::begin_requests`].
    pub fn complete_request(&self, request: &PendingRequest, result: Result<JsonValue, FetchError>) -> bool {
        self.requests.complete(request, result, &self.store.handle())
    }

    /// Fetch every due request synchronously. Returns the merged count.
    pub fn run_requests(&self, fetcher: &dyn Fetcher) -> usize {
        self.requests.run(
            &self.content.data.http_requests,
            self.renderer.processor().evaluator(),
            &self.scope(),
            self.live_edit,
            fetcher,
            &self.store.handle(),
        )
    }

    /// Swap in new content. Root state is kept; caches are dropped.
    pub fn replace_content(&mut self, content: Content) {
        self.content = content;
        self.renderer.processor().clear_cache();
        self.requests.reset();
    }

    /// Parse and apply a raw editor message from `origin`.
    pub fn receive_editor_message(
        &mut self,
        origin: &str,
        raw: &str,
        preview: Option<&PreviewCache>,
    ) -> Result<EditorEffect, EditorError> {
        let Some(session) = &self.session else {
            return Ok(EditorEffect::Ignored);
        };
        let message = session.receive(origin, raw)?;
        self.apply_editor_message(message, preview)
    }

    /// Apply an already trusted editor message.
    pub fn apply_editor_message(
        &mut self,
        message: EditorMessage,
        preview: Option<&PreviewCache>,
    ) -> Result<EditorEffect, EditorError> {
        let Some(session) = &self.session else {
            return Ok(EditorEffect::Ignored);
        };

        match message {
            EditorMessage::ContentUpdate(update) => {
                if !session.accepts_update(&update) {
                    return Ok(EditorEffect::Ignored);
                }
                let merged = merge_content(&self.content, &update.data)?;
                if let Some(preview) = preview {
                    preview.put(merged.id().to_string(), merged.clone());
                }
                tracing::debug!(content_id = %merged.id(), edit_type = ?update.edit_type, "Content updated from editor");
                self.replace_content(merged);
                Ok(EditorEffect::ContentUpdated)
            }
            EditorMessage::ResetState(reset) => match session.accepts_reset(&reset) {
                Some(state) => {
                    self.store.merge(state.clone());
                    Ok(EditorEffect::StateReset)
                }
                None => Ok(EditorEffect::Ignored),
            },
            EditorMessage::ConfigureSdk(config) => {
                let Some(breakpoints) = config.breakpoints.filter(|b| !b.is_null()) else {
                    return Ok(EditorEffect::Ignored);
                };
                if config.content_id.as_deref() != Some(self.content.id()) {
                    return Ok(EditorEffect::Ignored);
                }
                let update = serde_json::json!({"meta": {"breakpoints": breakpoints}});
                let merged = merge_content(&self.content, &update)?;
                self.replace_content(merged);
                Ok(EditorEffect::SdkConfigured)
            }
            EditorMessage::TriggerAnimation(_) => {
                tracing::debug!("Ignoring animation trigger");
                Ok(EditorEffect::Ignored)
            }
            EditorMessage::Unknown(kind) => {
                tracing::debug!(kind = %kind, "Ignoring unknown editor message");
                Ok(EditorEffect::Ignored)
            }
        }
    }

    /// Stop accepting state changes and drop all listeners.
    pub fn unmount(&self) {
        if self.store.is_mounted() {
            self.store.unmount();
            tracing::debug!(content_id = %self.content.id(), "Unmounted document");
        }
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("content_id", &self.content.id())
            .field("store", &self.store)
            .field("session", &self.session)
            .field("live_edit", &self.live_edit)
            .finish()
    }
}

/// Input defaults, then `data.state`, then caller data, then the locale.
pub fn initial_state(content: &Content, data: StateMap, locale: Option<&str>) -> StateMap {
    let mut state = StateMap::new();
    if let Some(JsonValue::Array(inputs)) = content.data.extra.get("inputs") {
        for input in inputs {
            let name = input.get("name").and_then(JsonValue::as_str);
            let default = input.get("defaultValue");
            if let (Some(name), Some(default)) = (name, default) {
                if !name.is_empty() {
                    state.insert(name.to_string(), default.clone());
                }
            }
        }
    }
    state.extend(content.data.state.clone());
    state.extend(data);
    if let Some(locale) = locale {
        state.insert("locale".into(), locale.into());
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::BlockProcessor;
    use crate::registry::ComponentRegistry;
    use crate::renderer::NodeKind;
    use crate::transform::TransformRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_expr::Evaluator;

    fn renderer() -> Renderer {
        let processor = BlockProcessor::new(Arc::new(Evaluator::default()), TransformRegistry::new());
        Renderer::new(Arc::new(processor), Arc::new(ComponentRegistry::with_defaults()))
    }

    fn page() -> Content {
        serde_json::from_value(json!({
            "id": "home",
            "data": {
                "inputs": [{"name": "greeting", "defaultValue": "hi"}],
                "state": {"title": "Hello", "count": 1},
                "jsCode": "state.count = state.count + 1;",
                "blocks": [{
                    "id": "heading",
                    "component": {"name": "Text", "options": {}},
                    "bindings": {"component.options.text": "state.title"}
                }]
            }
        }))
        .unwrap()
    }

    fn map(value: JsonValue) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn text(tree: &RenderTree) -> JsonValue {
        match &tree.nodes[0].kind {
            NodeKind::Component { options, .. } => options["text"].clone(),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn editable() -> Document {
        Document::mount(
            page(),
            renderer(),
            MountOptions {
                model: Some("page".into()),
                ..MountOptions::default()
            },
        )
    }

    #[test]
    fn mount_builds_state_and_runs_js_code() {
        let document = Document::mount(
            page(),
            renderer(),
            MountOptions {
                data: map(json!({"title": "From caller"})),
                locale: Some("fr".into()),
                ..MountOptions::default()
            },
        );

        let state = document.state();
        assert_eq!(state["greeting"], json!("hi"));
        assert_eq!(state["title"], json!("From caller"));
        assert_eq!(state["locale"], json!("fr"));
        assert_eq!(state["count"], json!(2));
    }

    #[test]
    fn documents_do_not_share_live_edit() {
        let shared = renderer();
        let editing = Document::mount(
            page(),
            shared.clone(),
            MountOptions {
                live_edit: true,
                ..MountOptions::default()
            },
        );
        let published = Document::mount(page(), shared.clone(), MountOptions::default());

        assert!(editing.renderer().processor().live_edit());
        assert!(!published.renderer().processor().live_edit());
        assert!(!shared.processor().live_edit());
    }

    #[test]
    fn render_follows_state_changes() {
        let document = Document::mount(page(), renderer(), MountOptions::default());
        assert_eq!(text(&document.render()), json!("Hello"));

        document.merge_state(map(json!({"title": "Bye"})));
        assert_eq!(text(&document.render()), json!("Bye"));
    }

    #[test]
    fn actions_write_through_the_store() {
        let document = Document::mount(page(), renderer(), MountOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = document.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        document.run_action("state.count += event.amount", Some(&json!({"amount": 5})));
        assert_eq!(document.state()["count"], json!(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmount_drops_late_merges() {
        let document = Document::mount(page(), renderer(), MountOptions::default());
        let handle = document.handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = document.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        document.unmount();
        assert!(!handle.merge(map(json!({"title": "late"}))));
        assert_eq!(document.state()["title"], json!("Hello"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_the_document_unmounts() {
        let document = Document::mount(page(), renderer(), MountOptions::default());
        let store = document.store().clone();
        drop(document);
        assert!(!store.is_mounted());
    }

    #[test]
    fn editor_updates_for_own_model_only() {
        let preview = PreviewCache::new(4);
        let mut document = editable();

        let other = r#"{"type": "builder.contentUpdate", "data": {"modelName": "blog", "data": {"data": {"title": "x"}}}}"#;
        let effect = document.receive_editor_message("https://builder.io", other, Some(&preview)).unwrap();
        assert_eq!(effect, EditorEffect::Ignored);

        let raw = r#"{"type": "builder.contentUpdate", "data": {"key": "page", "data": {"data": {"blocks": [
            {"id": "heading", "component": {"name": "Text", "options": {"text": "Edited"}}}
        ]}}}}"#;
        let untrusted = document.receive_editor_message("https://evil.io", raw, Some(&preview));
        assert!(matches!(untrusted, Err(EditorError::UntrustedOrigin(_))));
        assert!(preview.is_empty());

        let effect = document.receive_editor_message("https://builder.io", raw, Some(&preview)).unwrap();
        assert_eq!(effect, EditorEffect::ContentUpdated);
        assert_eq!(text(&document.render()), json!("Edited"));
        assert!(preview.contains("home"));
    }

    #[test]
    fn editor_resets_state_and_configures_breakpoints() {
        let mut document = editable();

        let raw = r#"{"type": "builder.resetState", "data": {"model": "page", "state": {"title": "Reset"}}}"#;
        let effect = document.receive_editor_message("http://localhost:1234", raw, None).unwrap();
        assert_eq!(effect, EditorEffect::StateReset);
        assert_eq!(document.state()["title"], json!("Reset"));

        let raw = r#"{"type": "builder.configureSdk", "data": {"contentId": "home", "breakpoints": {"small": 500}}}"#;
        let effect = document.receive_editor_message("https://builder.io", raw, None).unwrap();
        assert_eq!(effect, EditorEffect::SdkConfigured);
        assert_eq!(document.content().meta.breakpoints, Some(json!({"small": 500})));

        let raw = r#"{"type": "builder.configureSdk", "data": {"contentId": "elsewhere", "breakpoints": {"small": 1}}}"#;
        let effect = document.receive_editor_message("https://builder.io", raw, None).unwrap();
        assert_eq!(effect, EditorEffect::Ignored);
    }

    #[test]
    fn documents_without_a_model_ignore_the_editor() {
        let mut document = Document::mount(page(), renderer(), MountOptions::default());
        let raw = r#"{"type": "builder.resetState", "data": {"model": "page", "state": {"title": "x"}}}"#;
        let effect = document.receive_editor_message("https://evil.io", raw, None).unwrap();
        assert_eq!(effect, EditorEffect::Ignored);
    }

    #[test]
    fn http_requests_merge_into_state() {
        let mut content = page();
        content
            .data
            .http_requests
            .insert("products".into(), "/api/{{state.title}}.json".into());
        let document = Document::mount(content, renderer(), MountOptions::default());

        let pending = document.begin_requests();
        assert_eq!(pending[0].url, "/api/Hello.json");
        assert!(document.complete_request(&pending[0], Ok(json!([1, 2]))));
        assert_eq!(document.state()["products"], json!([1, 2]));
        assert!(document.begin_requests().is_empty());
    }
}
