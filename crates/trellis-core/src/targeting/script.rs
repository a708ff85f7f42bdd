//! Client-side replay of variant selection.
//!
//! [`CLIENT_SCRIPT`] defines two global functions with no outside
//! references: `matchesTargeting` mirrors [`super::matches`] and
//! `selectVariant` swaps the winning `<template>` into place.

use serde::Serialize;
use serde_json::json;

use crate::model::{Query, Variant};

/// Cookie holding the visitor's attributes as URI-encoded JSON.
pub const ATTRIBUTES_COOKIE: &str = "trellis.userAttributes";

pub const CLIENT_SCRIPT: &str = r#"function matchesTargeting(attributes, query, startDate, endDate) {
  function matchOne(q) {
    var property = q.property, operator = q.operator, expected = q.value;
    if (!(property && operator)) return true;
    if (property === 'urlPath' && typeof expected === 'string' && expected !== '/' && expected.endsWith('/')) {
      expected = expected.slice(0, -1);
    }
    if (Array.isArray(expected)) {
      var each = function (v) { return matchOne({ property: property, operator: operator, value: v }); };
      return operator === 'isNot' ? expected.every(each) : expected.some(each);
    }
    var actual = attributes[property];
    if (Array.isArray(actual)) return actual.indexOf(expected) !== -1;
    var numeric = typeof actual === 'number' && typeof expected === 'number';
    switch (operator) {
      case 'is': return actual === expected;
      case 'isNot': return actual !== expected;
      case 'contains': return typeof actual === 'string' && actual.includes(String(expected));
      case 'startsWith': return typeof actual === 'string' && actual.startsWith(String(expected));
      case 'endsWith': return typeof actual === 'string' && actual.endsWith(String(expected));
      case 'greaterThan': return numeric && actual > expected;
      case 'lessThan': return numeric && actual < expected;
      case 'greaterThanOrEqualTo': return numeric && actual >= expected;
      case 'lessThanOrEqualTo': return numeric && actual <= expected;
      default: return false;
    }
  }
  var now = (attributes.date && new Date(attributes.date)) || new Date();
  if (startDate && new Date(startDate) > now) return false;
  if (endDate && new Date(endDate) < now) return false;
  return (query || []).every(matchOne);
}
function selectVariant(variants, blockId, locale) {
  var attributes = {};
  var cookie = document.cookie.match(/(?:^|;\s*)trellis\.userAttributes=([^;]*)/);
  try {
    if (cookie) attributes = JSON.parse(decodeURIComponent(cookie[1]));
  } catch (e) {}
  if (locale) attributes.locale = locale;
  var winner = -1;
  for (var i = 0; i < variants.length; i++) {
    var v = variants[i];
    if (matchesTargeting(attributes, v.query, v.startDate, v.endDate)) { winner = i; break; }
  }
  var container = document.querySelector('[data-personalization-id="' + blockId + '"]');
  if (!container) return;
  if (winner !== -1) {
    var chosen = container.querySelector('template[data-variant-id="' + blockId + '-' + winner + '"]');
    var fallback = container.querySelector('[data-variant-fallback="' + blockId + '"]');
    if (chosen && fallback) fallback.replaceWith(chosen.content.cloneNode(true));
  }
  container.querySelectorAll('template[data-variant-id^="' + blockId + '-"]').forEach(function (t) { t.remove(); });
  ['variants-script-', 'variants-styles-'].forEach(function (prefix) {
    var el = document.querySelector('[data-id="' + prefix + blockId + '"]');
    if (el) el.remove();
  });
}
"#;

/// The part of a variant the browser needs to evaluate it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientVariant<'a> {
    query: &'a [Query],
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<&'a str>,
}

/// Inline script body that selects among `variants` of container `block_id`.
/// Requires [`CLIENT_SCRIPT`] earlier in the page.
pub fn personalization_script(variants: &[Variant], block_id: &str, locale: Option<&str>) -> String {
    let client: Vec<ClientVariant<'_>> = variants
        .iter()
        .map(|v| ClientVariant {
            query: &v.query,
            start_date: v.start_date.as_deref(),
            end_date: v.end_date.as_deref(),
        })
        .collect();

    let args = json!([client, block_id, locale]);
    let args = script_safe(&args.to_string());
    // Strip the array brackets to splice the values in as arguments
    format!("selectVariant({});", &args[1..args.len() - 1])
}

/// CSS hiding the variant templates of one container.
pub fn hide_variants_style(variant_count: usize, block_id: &str) -> String {
    (0..variant_count)
        .map(|i| format!("[data-variant-id=\"{}-{i}\"] {{ display: none; }}", css_escape(block_id)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/").replace("<!--", "<\\!--")
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variants() -> Vec<Variant> {
        serde_json::from_value(json!([
            {
                "query": [{"property": "device", "operator": "is", "value": "</script><script>alert(1)"}],
                "startDate": "2024-01-01",
                "blocks": [{"id": "secret"}]
            },
            {"query": []}
        ]))
        .unwrap()
    }

    #[test]
    fn invocation_carries_queries_but_not_blocks() {
        let script = personalization_script(&variants(), "pc-1", Some("fr-FR"));
        assert!(script.starts_with("selectVariant([{"));
        assert!(script.ends_with(",\"pc-1\",\"fr-FR\");"));
        assert!(script.contains("\"startDate\":\"2024-01-01\""));
        assert!(!script.contains("secret"));
    }

    #[test]
    fn invocation_cannot_close_its_script_tag() {
        let script = personalization_script(&variants(), "pc-1", None);
        assert!(!script.contains("</script>"));
        assert!(script.ends_with(",\"pc-1\",null);"));
    }

    #[test]
    fn client_script_is_self_contained() {
        for needle in ["import ", "require(", "fetch("] {
            assert!(!CLIENT_SCRIPT.contains(needle), "found {needle}");
        }
        assert!(CLIENT_SCRIPT.contains(ATTRIBUTES_COOKIE.replace('.', "\\.").as_str()));
    }

    #[test]
    fn hide_style_covers_every_template() {
        assert_eq!(
            hide_variants_style(2, "pc"),
            "[data-variant-id=\"pc-0\"] { display: none; } [data-variant-id=\"pc-1\"] { display: none; }"
        );
    }
}
