//! Evaluation scopes.
//!
//! A [`Scope`] is immutable once built. Repeat and symbol boundaries derive
//! child scopes by layering new local state on top of the parent's, never by
//! mutating the parent.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use trellis_expr::EvalInput;

pub type StateMap = Map<String, JsonValue>;

#[derive(Debug, Clone, Default)]
pub struct Scope {
    root: Arc<StateMap>,
    local: Arc<StateMap>,
    context: Arc<StateMap>,
    locale: Option<String>,
    /// Hashes of `root` and `context`, shared by child scopes
    root_hash: u64,
    context_hash: u64,
    fingerprint: u64,
}

impl Scope {
    pub fn new(root: Arc<StateMap>, context: Arc<StateMap>, locale: Option<String>) -> Self {
        let mut scope = Self {
            root_hash: hash_map(&root),
            context_hash: hash_map(&context),
            root,
            local: Arc::new(StateMap::new()),
            context,
            locale,
            fingerprint: 0,
        };
        scope.fingerprint = scope.compute_fingerprint();
        scope
    }

    /// Root state only, no context or locale.
    pub fn from_state(root: StateMap) -> Self {
        Self::new(Arc::new(root), Arc::new(StateMap::new()), None)
    }

    /// A child scope whose local state is this scope's local state extended
    /// with `extra`.
    pub fn with_local(&self, extra: StateMap) -> Self {
        let mut local = (*self.local).clone();
        local.extend(extra);
        let mut child = Self {
            local: Arc::new(local),
            ..self.clone()
        };
        child.fingerprint = child.compute_fingerprint();
        child
    }

    /// A child scope with extra ambient context values.
    pub fn with_context(&self, extra: StateMap) -> Self {
        let mut context = (*self.context).clone();
        context.extend(extra);
        let mut child = Self {
            context_hash: hash_map(&context),
            context: Arc::new(context),
            ..self.clone()
        };
        child.fingerprint = child.compute_fingerprint();
        child
    }

    pub fn root(&self) -> &StateMap {
        &self.root
    }

    pub fn root_arc(&self) -> Arc<StateMap> {
        self.root.clone()
    }

    pub fn local(&self) -> &StateMap {
        &self.local
    }

    pub fn context(&self) -> &StateMap {
        &self.context
    }

    pub fn context_arc(&self) -> Arc<StateMap> {
        self.context.clone()
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// Hash of every value visible to expressions in this scope.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Merged view, local state shadowing root state.
    pub fn merged_state(&self) -> StateMap {
        let mut merged = (*self.root).clone();
        merged.extend(self.local.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// An evaluator request for `code` in this scope.
    pub fn input<'a>(&'a self, code: &'a str) -> EvalInput<'a> {
        let input = EvalInput::new(code, &self.root).context(&self.context);
        if self.local.is_empty() {
            input
        } else {
            input.local(&self.local)
        }
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.root_hash.hash(&mut hasher);
        hash_map(&self.local).hash(&mut hasher);
        self.context_hash.hash(&mut hasher);
        self.locale.hash(&mut hasher);
        hasher.finish()
    }
}

fn hash_map(map: &StateMap) -> u64 {
    let mut hasher = DefaultHasher::new();
    // Map serialization cannot fail
    serde_json::to_string(map).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn child_scopes_layer_without_touching_the_parent() {
        let parent = Scope::from_state(map(json!({"a": 1}))).with_local(map(json!({"x": 1})));
        let child = parent.with_local(map(json!({"y": 2})));

        assert_eq!(parent.local().len(), 1);
        assert_eq!(child.local(), &map(json!({"x": 1, "y": 2})));
        assert!(Arc::ptr_eq(&parent.root, &child.root));
    }

    #[test]
    fn child_scopes_reuse_the_root_hash() {
        let parent = Scope::from_state(map(json!({"items": [1, 2, 3], "title": "t"})));
        let first = parent.with_local(map(json!({"item": 1})));
        let second = parent.with_local(map(json!({"item": 2})));

        assert_eq!(first.root_hash, parent.root_hash);
        assert_eq!(second.root_hash, parent.root_hash);
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint(), parent.with_local(map(json!({"item": 1}))).fingerprint());
        assert_ne!(first.fingerprint(), first.with_context(map(json!({"k": 1}))).fingerprint());
    }

    #[test]
    fn local_state_shadows_root_in_merged_view() {
        let scope = Scope::from_state(map(json!({"a": 1, "b": 1}))).with_local(map(json!({"b": 2})));
        assert_eq!(scope.merged_state(), map(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn fingerprint_tracks_visible_values() {
        let a = Scope::from_state(map(json!({"a": 1})));
        let b = Scope::from_state(map(json!({"a": 1})));
        let c = Scope::from_state(map(json!({"a": 2})));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(
            a.with_local(map(json!({"i": 0}))).fingerprint(),
            a.with_local(map(json!({"i": 1}))).fingerprint()
        );
    }
}
