//! Component registry.
//!
//! Render-layer collaborators register components by name with an input
//! schema. The pipeline only ever asks "given a name, is there a component".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::model::Block;

pub const SYMBOL: &str = "Symbol";
pub const SLOT: &str = "Slot";
pub const PERSONALIZATION_CONTAINER: &str = "PersonalizationContainer";
pub const COLUMNS: &str = "Columns";

/// One input of a component's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInput {
    pub name: String,

    #[serde(rename = "type", default = "default_input_type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
}

fn default_input_type() -> String {
    "string".to_string()
}

/// A component as registered by a collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredComponent {
    pub name: String,

    #[serde(default)]
    pub inputs: Vec<ComponentInput>,

    /// Render without the block wrapper element
    #[serde(default)]
    pub no_wrap: bool,

    /// The component renders its children itself and receives them as
    /// raw blocks
    #[serde(default)]
    pub can_have_children: bool,

    /// Children synthesized for blocks that have none
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_children: Vec<Block>,
}

impl RegisteredComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn input(mut self, name: &str, kind: &str, default_value: Option<JsonValue>) -> Self {
        self.inputs.push(ComponentInput {
            name: name.to_string(),
            kind: kind.to_string(),
            default_value,
        });
        self
    }

    pub fn no_wrap(mut self) -> Self {
        self.no_wrap = true;
        self
    }

    pub fn with_children(mut self) -> Self {
        self.can_have_children = true;
        self
    }

    pub fn default_children(mut self, children: Vec<Block>) -> Self {
        self.default_children = children;
        self
    }

    /// Fill in default values for inputs missing from `options`.
    pub fn apply_defaults(&self, options: &mut Map<String, JsonValue>) {
        for input in &self.inputs {
            if let Some(default) = &input.default_value {
                if !options.contains_key(&input.name) {
                    options.insert(input.name.clone(), default.clone());
                }
            }
        }
    }
}

/// Components by name.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, RegisteredComponent>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in components.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for component in builtin_components() {
            registry.register(component);
        }
        registry
    }

    /// Register a component, replacing any previous one with the same name.
    pub fn register(&mut self, component: RegisteredComponent) -> Option<RegisteredComponent> {
        self.components.insert(component.name.clone(), component)
    }

    /// Look up a component by name.
    pub fn resolve(&self, name: &str) -> Option<&RegisteredComponent> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.components.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

fn builtin_components() -> Vec<RegisteredComponent> {
    vec![
        RegisteredComponent::new("Text").input("text", "richText", Some(json!(""))),
        RegisteredComponent::new("Image")
            .input("image", "file", None)
            .input("altText", "string", None)
            .input("fitContent", "boolean", Some(json!(true))),
        RegisteredComponent::new("Button")
            .input("text", "text", Some(json!("Click me!")))
            .input("link", "url", None)
            .input("openLinkInNewTab", "boolean", Some(json!(false)))
            .no_wrap(),
        RegisteredComponent::new("Section").input("maxWidth", "number", Some(json!(1200))),
        RegisteredComponent::new(COLUMNS)
            .input("columns", "array", Some(json!([])))
            .input("space", "number", Some(json!(20))),
        RegisteredComponent::new("CustomCode")
            .input("code", "html", Some(json!("")))
            .input("scriptsClientOnly", "boolean", Some(json!(false))),
        RegisteredComponent::new(SYMBOL).input("symbol", "uiSymbol", None),
        RegisteredComponent::new(SLOT).input("name", "string", None),
        RegisteredComponent::new(PERSONALIZATION_CONTAINER).input(
            "variants",
            "list",
            Some(json!([])),
        ),
    ]
}
