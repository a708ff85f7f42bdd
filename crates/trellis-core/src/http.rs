//! HTTP-bound state: `data.httpRequests` maps a state key to a URL whose
//! JSON response is merged into root state under that key.
//!
//! Requests are split into [`RequestTracker::begin`] and
//! [`RequestTracker::complete`] so the host decides how fetching happens.
//! Completion merges through a [`StateHandle`], i.e. into whatever the state
//! is by then, and is dropped once the document has unmounted.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use trellis_expr::{Evaluator, Value};

use crate::error::FetchError;
use crate::scope::{Scope, StateMap};
use crate::store::StateHandle;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("Invalid regex"));

/// Performs one request. Implementations may block.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<JsonValue, FetchError>;
}

/// Serves `file://` URLs and plain paths relative to a root directory.
/// Files outside the root, symlink targets included, are refused.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if url.contains("://") {
            return Err(FetchError::Unsupported(url.to_string()));
        }
        Ok(self.root.join(url.trim_start_matches('/')))
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<JsonValue, FetchError> {
        let failed = |message: String| FetchError::Failed {
            url: url.to_string(),
            message,
        };
        let root = self.root.canonicalize().map_err(|e| failed(e.to_string()))?;
        let path = self
            .resolve(url)?
            .canonicalize()
            .map_err(|e| failed(e.to_string()))?;
        if !path.starts_with(&root) {
            return Err(FetchError::OutsideRoot(url.to_string()));
        }
        let text = std::fs::read_to_string(&path).map_err(|e| failed(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| failed(e.to_string()))
    }
}

/// A request handed to the host for fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Done,
}

/// Per-key request bookkeeping for one document.
#[derive(Debug, Default)]
pub struct RequestTracker {
    status: Mutex<HashMap<String, Status>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that should start now. Keys already in flight are skipped,
    /// and so are completed keys unless `live_edit` is set. Returned keys
    /// are marked pending.
    pub fn begin(
        &self,
        requests: &BTreeMap<String, String>,
        evaluator: &Evaluator,
        scope: &Scope,
        live_edit: bool,
    ) -> Vec<PendingRequest> {
        let Ok(mut status) = self.status.lock() else {
            return Vec::new();
        };

        let mut started = Vec::new();
        for (key, url) in requests {
            if url.trim().is_empty() {
                continue;
            }
            match status.get(key) {
                Some(Status::Pending) => continue,
                Some(Status::Done) if !live_edit => continue,
                _ => {}
            }
            let url = expand_url(url, evaluator, scope);
            status.insert(key.clone(), Status::Pending);
            started.push(PendingRequest {
                key: key.clone(),
                url,
            });
        }
        started
    }

    /// Record the outcome of `request`. A success is merged into the state
    /// behind `handle`; returns whether that merge happened. Failed keys may
    /// be requested again on the next trigger.
    pub fn complete(
        &self,
        request: &PendingRequest,
        result: Result<JsonValue, FetchError>,
        handle: &StateHandle,
    ) -> bool {
        let succeeded = result.is_ok();
        let merged = match result {
            Ok(json) => {
                let mut patch = StateMap::new();
                patch.insert(request.key.clone(), json);
                handle.merge(patch)
            }
            Err(e) => {
                tracing::warn!(key = %request.key, url = %request.url, error = %e, "HTTP request failed");
                false
            }
        };

        if let Ok(mut status) = self.status.lock() {
            if succeeded {
                status.insert(request.key.clone(), Status::Done);
            } else {
                status.remove(&request.key);
            }
        }
        merged
    }

    /// Begin and complete every due request synchronously with `fetcher`.
    /// Returns the number of merged responses.
    pub fn run(
        &self,
        requests: &BTreeMap<String, String>,
        evaluator: &Evaluator,
        scope: &Scope,
        live_edit: bool,
        fetcher: &dyn Fetcher,
        handle: &StateHandle,
    ) -> usize {
        self.begin(requests, evaluator, scope, live_edit)
            .iter()
            .filter(|request| self.complete(request, fetcher.fetch(&request.url), handle))
            .count()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.status_of(key) == Some(Status::Pending)
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.status_of(key) == Some(Status::Done)
    }

    /// Forget all bookkeeping, e.g. after the content changed.
    pub fn reset(&self) {
        if let Ok(mut status) = self.status.lock() {
            status.clear();
        }
    }

    fn status_of(&self, key: &str) -> Option<Status> {
        self.status.lock().ok().and_then(|s| s.get(key).copied())
    }
}

/// Replace each `{{expr}}` in `url` with the string form of its value.
pub fn expand_url(url: &str, evaluator: &Evaluator, scope: &Scope) -> String {
    PLACEHOLDER
        .replace_all(url, |caps: &Captures<'_>| {
            match evaluator.evaluate(&scope.input(caps[1].trim())) {
                Some(value) => Value::from_json(&value).to_js_string(),
                None => "undefined".to_string(),
            }
        })
        .into_owned()
}
