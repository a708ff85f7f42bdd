//! Repeat expansion.
//!
//! A repeated block is a template. Expansion never copies it; each instance
//! borrows the same block and carries its own scope. Instance keys are
//! collection indices, so reordering a collection re-keys its instances.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value as JsonValue};
use trellis_expr::Evaluator;

use crate::model::{Block, Repeat};
use crate::scope::{Scope, StateMap};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][\w$]*$").expect("Invalid regex"));

const DEFAULT_ITEM: &str = "item";
const DEFAULT_INDEX: &str = "index";

/// One expanded instance of a repeated block.
#[derive(Debug, Clone)]
pub struct RepeatInstance<'a> {
    pub block: &'a Block,
    pub scope: Scope,
    /// Position in the collection
    pub key: usize,
}

/// Evaluate the collection of `block` in `scope` and build one instance per
/// element. A missing repeat, or a collection that is not an array, yields
/// nothing.
pub fn expand<'a>(evaluator: &Evaluator, block: &'a Block, scope: &Scope) -> Vec<RepeatInstance<'a>> {
    let Some(repeat) = block.repeat.as_ref().filter(|_| block.is_repeated()) else {
        return Vec::new();
    };

    let items = match evaluator.evaluate(&scope.input(repeat.collection.trim())) {
        Some(JsonValue::Array(items)) => items,
        other => {
            tracing::debug!(
                block_id = %block.id,
                collection = %repeat.collection,
                found = ?other.as_ref().map(value_kind),
                "Repeat collection is not an array"
            );
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| RepeatInstance {
            block,
            scope: scope.with_local(item_state(repeat, item, index)),
            key: index,
        })
        .collect()
}

/// Local bindings for the `index`-th element.
pub fn item_state(repeat: &Repeat, item: JsonValue, index: usize) -> StateMap {
    let mut local = StateMap::new();
    local.insert(DEFAULT_ITEM.into(), item.clone());
    local.insert(DEFAULT_INDEX.into(), json!(index));
    local.insert("$item".into(), item.clone());
    local.insert("$index".into(), json!(index));

    let alias = item_alias(repeat);
    if let Some(alias) = &alias {
        local.insert(alias.clone(), item);
        local.insert(format!("${alias}Index"), json!(index));
    }
    if let Some(index_name) = repeat.index_name.as_deref().filter(|n| !n.is_empty()) {
        local.insert(index_name.to_string(), json!(index));
    }
    local
}

/// The custom item name, or `<lastSegment>Item` derived from the collection
/// expression (`state.products` gives `productsItem`).
fn item_alias(repeat: &Repeat) -> Option<String> {
    if let Some(name) = repeat.item_name.as_deref().filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    let last = repeat.collection.trim().rsplit('.').next()?;
    IDENTIFIER
        .is_match(last)
        .then(|| format!("{last}Item"))
}

fn value_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn repeated(collection: &str, item_name: Option<&str>) -> Block {
        let mut block = Block::new("row");
        block.repeat = Some(Repeat {
            collection: collection.into(),
            item_name: item_name.map(str::to_string),
            index_name: None,
        });
        block
    }

    fn scope(state: JsonValue) -> Scope {
        Scope::from_state(state.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn one_instance_per_element() {
        let evaluator = Evaluator::default();
        let block = repeated("state.items", None);
        let scope = scope(json!({"items": ["x0", "x1", "x2"]}));

        let instances = expand(&evaluator, &block, &scope);
        assert_eq!(instances.len(), 3);
        for (i, instance) in instances.iter().enumerate() {
            assert_eq!(instance.key, i);
            assert!(std::ptr::eq(instance.block, &block));
            assert_eq!(instance.scope.local()["item"], json!(format!("x{i}")));
            assert_eq!(instance.scope.local()["index"], json!(i));
            assert_eq!(instance.scope.local()["$item"], json!(format!("x{i}")));
            assert_eq!(instance.scope.local()["$index"], json!(i));
            assert_eq!(instance.scope.local()["itemsItem"], json!(format!("x{i}")));
        }
    }

    #[test]
    fn custom_alias_is_visible_to_expressions() {
        let evaluator = Evaluator::default();
        let block = repeated("state.products", Some("product"));
        let scope = scope(json!({"products": [{"name": "Lamp"}]}));

        let instances = expand(&evaluator, &block, &scope);
        let name = evaluator.evaluate(&instances[0].scope.input("state.product.name + ' #' + state.$productIndex"));
        assert_eq!(name, Some(json!("Lamp #0")));
    }

    #[test]
    fn non_array_collections_expand_to_nothing() {
        let evaluator = Evaluator::default();
        for state in [json!({"items": {"a": 1}}), json!({"items": "abc"}), json!({})] {
            let block = repeated("state.items", None);
            assert!(expand(&evaluator, &block, &scope(state)).is_empty());
        }
    }

    #[test]
    fn enclosing_scope_is_untouched() {
        let evaluator = Evaluator::default();
        let block = repeated("state.items", None);
        let outer = scope(json!({"items": [1, 2]}));

        let instances = expand(&evaluator, &block, &outer);
        assert!(outer.local().is_empty());
        assert_ne!(instances[0].scope.fingerprint(), instances[1].scope.fingerprint());
    }

    #[test]
    fn nested_repeats_see_outer_item() {
        let evaluator = Evaluator::default();
        let outer_block = repeated("state.rows", Some("row"));
        let inner_block = repeated("state.row.cells", None);
        let scope = scope(json!({"rows": [{"cells": ["a", "b"]}]}));

        let rows = expand(&evaluator, &outer_block, &scope);
        let cells = expand(&evaluator, &inner_block, &rows[0].scope);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].scope.local()["row"], json!({"cells": ["a", "b"]}));
        assert_eq!(cells[1].scope.local()["cellsItem"], json!("b"));
    }
}
