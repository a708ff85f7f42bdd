//! Content document wire format.
//!
//! Only the fields the pipeline depends on are typed. Everything else an
//! authoring backend sends is kept in `extra` and survives a round trip.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::ContentError;

/// A node in the authored content tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Unique within one content document
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,

    /// Dotted target path to expression
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,

    /// Present means explicitly set; the value is tested for truthiness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<JsonValue>,

    /// HTML attributes
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, JsonValue>,

    /// Event name to statement code
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsive_styles: Option<ResponsiveStyles>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub animations: Vec<JsonValue>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, JsonValue>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Block {
    /// A block with an id and no other fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The component name, if the block references one.
    pub fn component_name(&self) -> Option<&str> {
        self.component
            .as_ref()
            .map(|c| c.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Copy of this block without its children.
    pub fn shallow_clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tag_name: self.tag_name.clone(),
            component: self.component.clone(),
            children: Vec::new(),
            bindings: self.bindings.clone(),
            repeat: self.repeat.clone(),
            show: self.show.clone(),
            hide: self.hide.clone(),
            properties: self.properties.clone(),
            actions: self.actions.clone(),
            responsive_styles: self.responsive_styles.clone(),
            animations: self.animations.clone(),
            meta: self.meta.clone(),
            extra: self.extra.clone(),
        }
    }

    /// Whether the block expands over a collection.
    pub fn is_repeated(&self) -> bool {
        self.repeat
            .as_ref()
            .is_some_and(|r| !r.collection.trim().is_empty())
    }
}

/// Reference from a block to a registered component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRef {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, JsonValue>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Repeat specification: expand the block once per collection element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repeat {
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
}

/// Style declarations per breakpoint bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsiveStyles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large: Option<Map<String, JsonValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<Map<String, JsonValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<Map<String, JsonValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xsmall: Option<Map<String, JsonValue>>,
}

/// A content document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub data: ContentData,

    #[serde(default)]
    pub meta: ContentMeta,

    /// Alternate top-level block lists gated by targeting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<Variant>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Content {
    /// Parse a content document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ContentError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentData {
    #[serde(default)]
    pub blocks: Vec<Block>,

    /// Initial root state
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state: Map<String, JsonValue>,

    /// Statement code run once on mount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_code: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_fonts: Vec<JsonValue>,

    /// State key to URL, with optional `{{expr}}` placeholders
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<JsonValue>,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// An alternate block list selected by targeting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub query: Vec<Query>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// A single targeting predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl Query {
    pub fn new(property: &str, operator: &str, value: JsonValue) -> Self {
        Self {
            property: Some(property.to_string()),
            operator: Some(operator.to_string()),
            value: Some(value),
        }
    }
}
