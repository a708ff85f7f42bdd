//! Locale-keyed option values.
//!
//! The editor stores translatable inputs as
//! `{"@type": "@builder.io/core:LocalizedValue", "Default": .., "fr-FR": ..}`.

use serde_json::{Map, Value as JsonValue};

use crate::model::Block;

const LOCALIZED_VALUE_TYPE: &str = "@builder.io/core:LocalizedValue";
const DEFAULT_LOCALE: &str = "Default";

fn is_localized(map: &Map<String, JsonValue>) -> bool {
    map.get("@type").and_then(JsonValue::as_str) == Some(LOCALIZED_VALUE_TYPE)
}

/// Replace every localized value under `value` with its entry for `locale`,
/// falling back to the `Default` entry, then to `null`.
pub fn resolve_value(value: &mut JsonValue, locale: &str) {
    match value {
        JsonValue::Object(map) if is_localized(map) => {
            let resolved = map
                .get(locale)
                .or_else(|| map.get(DEFAULT_LOCALE))
                .cloned()
                .unwrap_or(JsonValue::Null);
            *value = resolved;
        }
        JsonValue::Object(map) => {
            for child in map.values_mut() {
                resolve_value(child, locale);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                resolve_value(item, locale);
            }
        }
        _ => {}
    }
}

/// Resolve localized component options and properties of a block in place.
/// Without a locale the block is left untouched.
pub fn localize_block(block: &mut Block, locale: Option<&str>) {
    let Some(locale) = locale else {
        return;
    };
    if let Some(component) = block.component.as_mut() {
        for value in component.options.values_mut() {
            resolve_value(value, locale);
        }
    }
    for value in block.properties.values_mut() {
        resolve_value(value, locale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentRef;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn text_block(text: JsonValue) -> Block {
        let mut block = Block::new("t");
        block.component = Some(ComponentRef {
            name: "Text".into(),
            options: json!({"text": text}).as_object().cloned().unwrap(),
            ..ComponentRef::default()
        });
        block
    }

    fn localized() -> JsonValue {
        json!({"@type": LOCALIZED_VALUE_TYPE, "Default": "Hello", "fr-FR": "Bonjour"})
    }

    #[test]
    fn picks_requested_locale() {
        let mut block = text_block(localized());
        localize_block(&mut block, Some("fr-FR"));
        assert_eq!(block.component.unwrap().options["text"], json!("Bonjour"));
    }

    #[test]
    fn falls_back_to_default_entry() {
        let mut block = text_block(localized());
        localize_block(&mut block, Some("de-DE"));
        assert_eq!(block.component.unwrap().options["text"], json!("Hello"));
    }

    #[test]
    fn leaves_block_alone_without_locale() {
        let mut block = text_block(localized());
        localize_block(&mut block, None);
        assert_eq!(block.component.unwrap().options["text"], localized());
    }

    #[test]
    fn resolves_nested_values() {
        let mut value = json!({"columns": [{"label": localized()}]});
        resolve_value(&mut value, "fr-FR");
        assert_eq!(value, json!({"columns": [{"label": "Bonjour"}]}));
    }
}
