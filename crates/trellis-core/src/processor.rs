//! Block processing: localization, transforms, binding evaluation.
//!
//! The source block is never touched; every pass works on a copy. Bindings
//! are evaluated against the scope only, never against each other's output.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde_json::Value as JsonValue;
use trellis_expr::Evaluator;

use crate::error::BindingPathError;
use crate::localize::localize_block;
use crate::model::Block;
use crate::scope::Scope;
use crate::transform::TransformRegistry;

const CACHE_CAPACITY: usize = 1024;

/// JavaScript truthiness of a JSON value.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Visibility of a processed, non-repeated block: an explicit `hide` wins,
/// then an explicit `show`, otherwise visible.
pub fn is_showable(block: &Block) -> bool {
    let hide = block.hide.as_ref().is_some_and(is_truthy);
    let show = block.show.as_ref().map_or(true, is_truthy);
    show && !hide
}

pub const MAX_INDEX_GAP: usize = 1024;

/// Write `value` at a dotted path (`a.b.0.c` or `a.b[0].c`), creating
/// intermediate containers. A numeric next segment creates an array.
/// Intermediate scalars are replaced.
pub fn set_path(target: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), BindingPathError> {
    let segments: Vec<&str> = path
        .split(['.', '[', ']'])
        .filter(|s| !s.is_empty())
        .collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(BindingPathError::Empty);
    };

    let mut current = target;
    for (i, segment) in parents.iter().enumerate() {
        let next_is_index = segments[i + 1].parse::<usize>().is_ok();
        let fresh = || {
            if next_is_index {
                JsonValue::Array(Vec::new())
            } else {
                JsonValue::Object(Default::default())
            }
        };

        current = match current {
            JsonValue::Object(map) => {
                let slot = map.entry(segment.to_string()).or_insert_with(fresh);
                if !matches!(slot, JsonValue::Object(_) | JsonValue::Array(_)) {
                    *slot = fresh();
                }
                slot
            }
            JsonValue::Array(items) => {
                let index = array_index(segment, path, items.len())?;
                if index >= items.len() {
                    items.resize(index + 1, JsonValue::Null);
                }
                let slot = &mut items[index];
                if !matches!(slot, JsonValue::Object(_) | JsonValue::Array(_)) {
                    *slot = fresh();
                }
                slot
            }
            _ => {
                return Err(BindingPathError::NotAContainer {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
        };
    }

    match current {
        JsonValue::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        JsonValue::Array(items) => {
            let index = array_index(last, path, items.len())?;
            if index >= items.len() {
                items.resize(index + 1, JsonValue::Null);
            }
            items[index] = value;
            Ok(())
        }
        _ => Err(BindingPathError::NotAContainer {
            path: path.to_string(),
            segment: last.to_string(),
        }),
    }
}

/// An index into an array of `len` items. Writes may pad the array with
/// nulls, but by no more than [`MAX_INDEX_GAP`] slots.
fn array_index(segment: &str, path: &str, len: usize) -> Result<usize, BindingPathError> {
    segment
        .parse::<usize>()
        .ok()
        .filter(|&index| index <= len.saturating_add(MAX_INDEX_GAP))
        .ok_or_else(|| BindingPathError::InvalidIndex {
            path: path.to_string(),
            segment: segment.to_string(),
        })
}

/// Turns authored blocks into processed blocks for one scope.
pub struct BlockProcessor {
    evaluator: Arc<Evaluator>,
    transforms: TransformRegistry,
    cache: Mutex<LruCache<(String, u64), Block>>,
    live_edit: AtomicBool,
}

impl BlockProcessor {
    pub fn new(evaluator: Arc<Evaluator>, transforms: TransformRegistry) -> Self {
        Self {
            evaluator,
            transforms,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            live_edit: AtomicBool::new(false),
        }
    }

    /// A processor with the same evaluator and transforms but its own
    /// cache and live-edit flag. Cache keys are block ids, so documents
    /// that may reuse ids need separate processors.
    pub fn fork(&self) -> Self {
        Self::new(self.evaluator.clone(), self.transforms.clone())
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn evaluator_arc(&self) -> Arc<Evaluator> {
        self.evaluator.clone()
    }

    /// In live edit mode the cache is bypassed entirely.
    pub fn set_live_edit(&self, enabled: bool) {
        self.live_edit.store(enabled, Ordering::Relaxed);
        if enabled {
            self.clear_cache();
        }
    }

    pub fn live_edit(&self) -> bool {
        self.live_edit.load(Ordering::Relaxed)
    }

    /// Forget all cached results, e.g. after the content changed.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Produce the processed copy of `block` for `scope`.
    pub fn process(&self, block: &Block, scope: &Scope) -> Block {
        let cacheable = !self.live_edit() && !block.id.is_empty();
        let key = (block.id.clone(), scope.fingerprint());

        if cacheable {
            if let Ok(mut cache) = self.cache.lock() {
                if let Some(hit) = cache.get(&key) {
                    return hit.clone();
                }
            }
        }

        let processed = self.process_uncached(block, scope);

        if cacheable {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(key, processed.clone());
            }
        }
        processed
    }

    fn process_uncached(&self, block: &Block, scope: &Scope) -> Block {
        let mut copy = block.shallow_clone();
        localize_block(&mut copy, scope.locale());
        self.transforms.apply(&mut copy, &block.children);

        let mut processed = if copy.bindings.is_empty() {
            copy
        } else {
            self.evaluate_bindings(copy, scope)
        };

        if processed.children.is_empty() {
            processed.children = block.children.clone();
        }
        processed
    }

    fn evaluate_bindings(&self, copy: Block, scope: &Scope) -> Block {
        let base = match serde_json::to_value(&copy) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(block_id = %copy.id, error = %e, "Cannot serialize block for bindings");
                return copy;
            }
        };

        // A failed binding leaves the authored value in place; one that
        // evaluated to undefined writes null
        let results: Vec<(&String, JsonValue)> = copy
            .bindings
            .iter()
            .filter_map(|(path, code)| match self.evaluator.try_evaluate(&scope.input(code), None) {
                Ok(value) => Some((path, value.unwrap_or(JsonValue::Null))),
                Err(e) => {
                    tracing::warn!(block_id = %copy.id, path = %path, code = %code, error = %e, "Failed code evaluation");
                    None
                }
            })
            .collect();

        let mut json = base.clone();
        for (path, value) in &results {
            if let Err(e) = set_path(&mut json, path, value.clone()) {
                tracing::warn!(block_id = %copy.id, path = %path, error = %e, "Skipping binding");
            }
        }

        match serde_json::from_value::<Block>(json) {
            Ok(processed) => processed,
            // Some binding wrote a value of the wrong shape; find it and
            // apply the others
            Err(_) => {
                let mut json = base;
                for (path, value) in results {
                    let mut trial = json.clone();
                    if set_path(&mut trial, path, value).is_err() {
                        continue;
                    }
                    match serde_json::from_value::<Block>(trial.clone()) {
                        Ok(_) => json = trial,
                        Err(e) => {
                            let error = BindingPathError::InvalidBlock {
                                path: path.clone(),
                                message: e.to_string(),
                            };
                            tracing::warn!(block_id = %copy.id, path = %path, error = %error, "Skipping binding");
                        }
                    }
                }
                serde_json::from_value(json).unwrap_or(copy)
            }
        }
    }
}

impl std::fmt::Debug for BlockProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProcessor")
            .field("transforms", &self.transforms)
            .field("live_edit", &self.live_edit())
            .field("cached", &self.cached_len())
            .finish()
    }
}
