//! Block tree rendering.
//!
//! Walks content top-down and produces a framework-neutral [`RenderTree`].
//! Each block subtree is rendered in isolation: a [`RenderError`] below a
//! block removes that block (or swaps in a placeholder) and leaves its
//! siblings alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::RenderError;
use crate::model::{Block, Content, ResponsiveStyles, Variant};
use crate::processor::{is_showable, BlockProcessor};
use crate::registry::{ComponentRegistry, COLUMNS, PERSONALIZATION_CONTAINER, SLOT, SYMBOL};
use crate::repeat;
use crate::scope::{Scope, StateMap};
use crate::targeting::{self, script, UserAttributes};

const MAX_BLOCK_DEPTH: usize = 64;
const MAX_SYMBOL_DEPTH: usize = 8;

/// How personalization containers and content variants are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalizationMode {
    /// Pick the winner now and render only it
    #[default]
    Server,
    /// Render every variant as a template and let the client pick
    Static,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub mode: PersonalizationMode,
    /// Render a placeholder node where a subtree failed
    pub error_placeholders: bool,
    pub user_attributes: UserAttributes,
    pub max_depth: usize,
    pub max_symbol_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: PersonalizationMode::default(),
            error_placeholders: false,
            user_attributes: UserAttributes::new(),
            max_depth: MAX_BLOCK_DEPTH,
            max_symbol_depth: MAX_SYMBOL_DEPTH,
        }
    }
}

/// Rendered content of one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTree {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    pub nodes: Vec<RenderNode>,
}

impl RenderTree {
    /// Whether any node needs the client-side variant script.
    pub fn has_client_variants(&self) -> bool {
        fn walk(nodes: &[RenderNode]) -> bool {
            nodes.iter().any(|node| {
                matches!(&node.kind, NodeKind::Personalization { script: Some(_), .. })
                    || walk(&node.children)
                    || match &node.kind {
                        NodeKind::Personalization { templates, .. } => {
                            templates.iter().any(|t| walk(&t.children))
                        }
                        _ => false,
                    }
            })
        }
        walk(&self.nodes)
    }

    /// Total number of nodes, templates included.
    pub fn node_count(&self) -> usize {
        fn count(nodes: &[RenderNode]) -> usize {
            nodes
                .iter()
                .map(|node| {
                    let templates = match &node.kind {
                        NodeKind::Personalization { templates, .. } => {
                            templates.iter().map(|t| count(&t.children)).sum()
                        }
                        _ => 0,
                    };
                    1 + count(&node.children) + templates
                })
                .sum()
        }
        count(&self.nodes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    /// Source block id
    pub id: String,
    /// Identity among siblings
    pub key: String,
    pub tag: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsive_styles: Option<ResponsiveStyles>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeKind {
    Element,
    Component {
        name: String,
        options: Map<String, JsonValue>,
        registered: bool,
        no_wrap: bool,
        /// Raw children for components that render their own
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        blocks: Vec<Block>,
    },
    Symbol {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_id: Option<String>,
        inline: bool,
        dynamic: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        css: Option<String>,
    },
    Slot {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<String>,
    },
    Personalization {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        templates: Vec<VariantTemplate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        winner: Option<usize>,
        /// Client selection call, static mode only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
    },
    Placeholder {
        message: String,
    },
}

/// One variant rendered for client-side selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantTemplate {
    pub index: usize,
    pub children: Vec<RenderNode>,
}

/// The `symbol` option of a Symbol block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRef {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub data: Map<String, JsonValue>,
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub dynamic: bool,
}

/// Supplies content for symbols that do not embed it.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, symbol: &SymbolRef) -> Option<Content>;
}

/// Symbol contents held in memory, by content id.
#[derive(Debug, Clone, Default)]
pub struct SymbolLibrary {
    entries: HashMap<String, Content>,
}

impl SymbolLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, content: Content) {
        self.entries.insert(content.id().to_string(), content);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SymbolResolver for SymbolLibrary {
    fn resolve(&self, symbol: &SymbolRef) -> Option<Content> {
        symbol
            .entry
            .as_deref()
            .and_then(|entry| self.entries.get(entry))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Depth {
    blocks: usize,
    symbols: usize,
}

impl Depth {
    fn child(self) -> Self {
        Self {
            blocks: self.blocks + 1,
            ..self
        }
    }

    fn symbol(self) -> Self {
        Self {
            blocks: self.blocks + 1,
            symbols: self.symbols + 1,
        }
    }
}

/// Builds render trees from content.
#[derive(Clone)]
pub struct Renderer {
    processor: Arc<BlockProcessor>,
    registry: Arc<ComponentRegistry>,
    symbols: Option<Arc<dyn SymbolResolver>>,
    options: RenderOptions,
}

impl Renderer {
    pub fn new(processor: Arc<BlockProcessor>, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            processor,
            registry,
            symbols: None,
            options: RenderOptions::default(),
        }
    }

    /// A renderer sharing registry, symbols and options, with a forked
    /// processor. See [`BlockProcessor::fork`].
    pub fn fork(&self) -> Self {
        Self {
            processor: Arc::new(self.processor.fork()),
            ..self.clone()
        }
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolResolver>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: RenderOptions) {
        self.options = options;
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Render a whole document, applying content-level variants.
    pub fn render_content(&self, content: &Content, scope: &Scope) -> RenderTree {
        let nodes = self.render_document_blocks(content, scope, Depth::default());
        RenderTree {
            content_id: content.id().to_string(),
            title: content.data.title.clone().or_else(|| content.name.clone()),
            css: content.data.css_code.clone().filter(|css| !css.trim().is_empty()),
            nodes,
        }
    }

    /// Render a block list in order.
    pub fn render_blocks(&self, blocks: &[Block], scope: &Scope) -> Vec<RenderNode> {
        self.render_children(blocks, scope, Depth::default())
    }

    fn render_document_blocks(&self, content: &Content, scope: &Scope, depth: Depth) -> Vec<RenderNode> {
        if content.variants.is_empty() {
            return self.render_children(&content.data.blocks, scope, depth);
        }
        let id = content.id().to_string();
        let (kind, children) =
            self.personalize(&id, &content.variants, &content.data.blocks, scope, depth);
        match kind {
            NodeKind::Personalization { script: None, .. } => children,
            kind => vec![RenderNode {
                id: id.clone(),
                key: id,
                tag: "div".into(),
                kind,
                attributes: Map::new(),
                actions: BTreeMap::new(),
                responsive_styles: None,
                children,
            }],
        }
    }

    fn render_children(&self, blocks: &[Block], scope: &Scope, depth: Depth) -> Vec<RenderNode> {
        blocks
            .iter()
            .flat_map(|block| self.render_isolated(block, scope, depth))
            .collect()
    }

    fn render_isolated(&self, block: &Block, scope: &Scope, depth: Depth) -> Vec<RenderNode> {
        match self.render_block(block, scope, depth) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(block_id = %block.id, error = %e, "Failed to render block");
                if self.options.error_placeholders {
                    vec![placeholder(block, &e)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn render_block(&self, block: &Block, scope: &Scope, depth: Depth) -> Result<Vec<RenderNode>, RenderError> {
        if depth.blocks >= self.options.max_depth {
            return Err(RenderError::DepthExceeded(self.options.max_depth));
        }

        if block.is_repeated() {
            let instances = repeat::expand(self.processor.evaluator(), block, scope);
            let mut nodes = Vec::with_capacity(instances.len());
            for instance in instances {
                let mut processed = self.processor.process(instance.block, &instance.scope);
                processed.repeat = None;
                if !is_showable(&processed) {
                    continue;
                }
                let key = format!("{}-{}", block.id, instance.key);
                nodes.push(self.build_node(processed, &instance.scope, key, depth)?);
            }
            return Ok(nodes);
        }

        let processed = self.processor.process(block, scope);
        if !is_showable(&processed) {
            return Ok(Vec::new());
        }
        let key = block.id.clone();
        Ok(vec![self.build_node(processed, scope, key, depth)?])
    }

    fn build_node(&self, block: Block, scope: &Scope, key: String, depth: Depth) -> Result<RenderNode, RenderError> {
        let tag = element_tag(&block);
        let mut node = RenderNode {
            id: block.id.clone(),
            key,
            tag,
            kind: NodeKind::Element,
            attributes: block.properties.clone(),
            actions: block.actions.clone(),
            responsive_styles: block.responsive_styles.clone(),
            children: Vec::new(),
        };

        let Some(name) = block.component_name().map(str::to_string) else {
            node.children = self.render_children(&block.children, scope, depth.child());
            return Ok(node);
        };

        match name.as_str() {
            SYMBOL => self.render_symbol(&mut node, &block, scope, depth)?,
            SLOT => self.render_slot(&mut node, &block, scope, depth)?,
            PERSONALIZATION_CONTAINER => {
                let variants = parse_option::<Vec<Variant>>(&block, "variants")?.unwrap_or_default();
                let (kind, children) = self.personalize(&block.id, &variants, &block.children, scope, depth);
                node.kind = kind;
                node.children = children;
            }
            _ => self.render_component(&mut node, block, name, scope, depth)?,
        }
        Ok(node)
    }

    fn render_component(
        &self,
        node: &mut RenderNode,
        block: Block,
        name: String,
        scope: &Scope,
        depth: Depth,
    ) -> Result<(), RenderError> {
        let registered = self.registry.resolve(&name);
        let mut options = block.component.map(|c| c.options).unwrap_or_default();
        if let Some(component) = registered {
            component.apply_defaults(&mut options);
        }

        let mut children = Vec::new();
        if name == COLUMNS {
            children = self.render_columns(&block.id, &options, scope, depth)?;
        }

        let owns_children = registered.is_some_and(|c| c.can_have_children);
        let blocks = if owns_children {
            block.children
        } else {
            children.extend(self.render_children(&block.children, scope, depth.child()));
            Vec::new()
        };

        node.kind = NodeKind::Component {
            name,
            options,
            registered: registered.is_some(),
            no_wrap: registered.is_some_and(|c| c.no_wrap),
            blocks,
        };
        node.children = children;
        Ok(())
    }

    fn render_columns(
        &self,
        block_id: &str,
        options: &Map<String, JsonValue>,
        scope: &Scope,
        depth: Depth,
    ) -> Result<Vec<RenderNode>, RenderError> {
        #[derive(Deserialize)]
        struct Column {
            #[serde(default)]
            blocks: Vec<Block>,
            #[serde(default)]
            width: Option<f64>,
        }

        let columns: Vec<Column> = match options.get("columns") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| invalid(block_id, COLUMNS, e))?,
            None => Vec::new(),
        };

        Ok(columns
            .into_iter()
            .enumerate()
            .map(|(i, column)| {
                let mut attributes = Map::new();
                attributes.insert("class".into(), "trellis-column".into());
                if let Some(width) = column.width {
                    attributes.insert("data-width".into(), width.into());
                }
                RenderNode {
                    id: format!("{block_id}-column-{i}"),
                    key: i.to_string(),
                    tag: "div".into(),
                    kind: NodeKind::Element,
                    attributes,
                    actions: BTreeMap::new(),
                    responsive_styles: None,
                    children: self.render_children(&column.blocks, scope, depth.child()),
                }
            })
            .collect())
    }

    fn render_symbol(&self, node: &mut RenderNode, block: &Block, scope: &Scope, depth: Depth) -> Result<(), RenderError> {
        let symbol = parse_option::<SymbolRef>(block, "symbol")?.unwrap_or_default();

        let mut classes = vec!["trellis-symbol"];
        if symbol.inline {
            classes.push("trellis-inline-symbol");
        }
        if symbol.dynamic {
            classes.push("trellis-dynamic-symbol");
        }
        node.attributes.insert("class".into(), classes.join(" ").into());

        let content = symbol
            .content
            .clone()
            .or_else(|| self.symbols.as_ref().and_then(|s| s.resolve(&symbol)));

        node.kind = NodeKind::Symbol {
            content_id: content.as_ref().map(|c| c.id().to_string()).filter(|id| !id.is_empty()),
            inline: symbol.inline,
            dynamic: symbol.dynamic,
            css: content.as_ref().and_then(|c| c.data.css_code.clone()),
        };

        let Some(content) = content else {
            tracing::debug!(block_id = %block.id, entry = ?symbol.entry, "Symbol has no content");
            return Ok(());
        };

        if depth.symbols >= self.options.max_symbol_depth {
            return Err(RenderError::SymbolRecursion {
                block_id: block.id.clone(),
                depth: self.options.max_symbol_depth,
            });
        }

        let mut root = symbol.data.clone();
        root.extend(scope.local().iter().map(|(k, v)| (k.clone(), v.clone())));
        root.extend(content.data.state.clone());

        let mut context = StateMap::new();
        context.insert("symbolId".into(), block.id.clone().into());
        let nested = Scope::new(
            Arc::new(root),
            Arc::new(StateMap::new()),
            scope.locale().map(str::to_string),
        )
        .with_context(scope.context().clone())
        .with_context(context);

        node.children = self.render_document_blocks(&content, &nested, depth.symbol());
        Ok(())
    }

    fn render_slot(&self, node: &mut RenderNode, block: &Block, scope: &Scope, depth: Depth) -> Result<(), RenderError> {
        let name = parse_option::<String>(block, "name")?.unwrap_or_default();
        let parent = scope
            .context()
            .get("symbolId")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        if parent.is_none() {
            node.attributes.insert("trellis-slot".into(), name.clone().into());
        }

        let blocks: Vec<Block> = match scope.root().get(&name) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| invalid(&block.id, SLOT, e))?,
            None => Vec::new(),
        };
        node.children = self.render_children(&blocks, scope, depth.child());
        node.kind = NodeKind::Slot { name, parent };
        Ok(())
    }

    /// Variant selection for a container or document. Returns the node kind
    /// and the children rendered in its place.
    fn personalize(
        &self,
        id: &str,
        variants: &[Variant],
        fallback: &[Block],
        scope: &Scope,
        depth: Depth,
    ) -> (NodeKind, Vec<RenderNode>) {
        let mut attributes = self.options.user_attributes.clone();
        let locale = scope
            .root()
            .get("locale")
            .and_then(JsonValue::as_str)
            .or(scope.locale())
            .map(str::to_string);
        if let Some(locale) = &locale {
            attributes.insert("locale".into(), locale.clone().into());
        }

        let winner = targeting::first_match(&attributes, variants);

        match self.options.mode {
            PersonalizationMode::Server => {
                let blocks = winner.map_or(fallback, |i| variants[i].blocks.as_slice());
                let children = self.render_children(blocks, scope, depth.child());
                (
                    NodeKind::Personalization {
                        templates: Vec::new(),
                        winner,
                        script: None,
                        style: None,
                    },
                    children,
                )
            }
            PersonalizationMode::Static => {
                let templates = variants
                    .iter()
                    .enumerate()
                    .map(|(index, variant)| VariantTemplate {
                        index,
                        children: self.render_children(&variant.blocks, scope, depth.child()),
                    })
                    .collect();
                let children = self.render_children(fallback, scope, depth.child());
                (
                    NodeKind::Personalization {
                        templates,
                        winner,
                        script: Some(script::personalization_script(variants, id, locale.as_deref())),
                        style: Some(script::hide_variants_style(variants.len(), id)),
                    },
                    children,
                )
            }
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("processor", &self.processor)
            .field("components", &self.registry.len())
            .field("symbols", &self.symbols.is_some())
            .field("options", &self.options)
            .finish()
    }
}

/// `a` when the block links somewhere, otherwise its tag name or `div`.
fn element_tag(block: &Block) -> String {
    let links = block.tag_name.as_deref() == Some("a")
        || block.properties.get("href").is_some_and(|h| !h.is_null())
        || block.extra.get("href").is_some_and(|h| !h.is_null());
    if links {
        return "a".into();
    }
    block
        .tag_name
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "div".into())
}

fn parse_option<T: serde::de::DeserializeOwned>(block: &Block, key: &str) -> Result<Option<T>, RenderError> {
    let Some(value) = block.component.as_ref().and_then(|c| c.options.get(key)) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|e| invalid(&block.id, block.component_name().unwrap_or_default(), e))
}

fn invalid(block_id: &str, component: &str, e: serde_json::Error) -> RenderError {
    RenderError::InvalidOptions {
        block_id: block_id.to_string(),
        component: component.to_string(),
        message: e.to_string(),
    }
}

fn placeholder(block: &Block, error: &RenderError) -> RenderNode {
    RenderNode {
        id: block.id.clone(),
        key: block.id.clone(),
        tag: "div".into(),
        kind: NodeKind::Placeholder {
            message: error.to_string(),
        },
        attributes: Map::new(),
        actions: BTreeMap::new(),
        responsive_styles: None,
        children: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisteredComponent;
    use crate::transform::TransformRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use trellis_expr::Evaluator;

    fn renderer() -> Renderer {
        let mut registry = ComponentRegistry::with_defaults();
        registry.register(RegisteredComponent::new("Tabs").with_children());
        let processor = BlockProcessor::new(Arc::new(Evaluator::default()), TransformRegistry::new());
        Renderer::new(Arc::new(processor), Arc::new(registry))
    }

    fn blocks(value: JsonValue) -> Vec<Block> {
        serde_json::from_value(value).unwrap()
    }

    fn content(value: JsonValue) -> Content {
        serde_json::from_value(value).unwrap()
    }

    fn scope(state: JsonValue) -> Scope {
        Scope::from_state(state.as_object().cloned().unwrap_or_default())
    }

    fn option<'a>(node: &'a RenderNode, key: &str) -> &'a JsonValue {
        match &node.kind {
            NodeKind::Component { options, .. } => &options[key],
            other => panic!("not a component: {other:?}"),
        }
    }

    fn ids(nodes: &[RenderNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn renders_bound_text_from_state() {
        let renderer = renderer();
        let doc = content(json!({
            "id": "page",
            "data": {"blocks": [{
                "id": "title",
                "component": {"name": "Text", "options": {}},
                "bindings": {"component.options.text": "state.title"}
            }]}
        }));

        let tree = renderer.render_content(&doc, &scope(json!({"title": "Hello"})));
        assert_eq!(option(&tree.nodes[0], "text"), &json!("Hello"));

        let tree = renderer.render_content(&doc, &scope(json!({"title": "Bye"})));
        assert_eq!(option(&tree.nodes[0], "text"), &json!("Bye"));
    }

    #[test]
    fn repeats_render_in_collection_order() {
        let nodes = renderer().render_blocks(
            &blocks(json!([
                {"id": "before"},
                {
                    "id": "row",
                    "repeat": {"collection": "state.items"},
                    "bindings": {"properties.title": "state.item.name"},
                    "hide": false
                },
                {"id": "after"}
            ])),
            &scope(json!({"items": [{"name": "a"}, {"name": "b"}]})),
        );

        assert_eq!(ids(&nodes), vec!["before", "row", "row", "after"]);
        assert_eq!(nodes[1].key, "row-0");
        assert_eq!(nodes[2].attributes["title"], json!("b"));
    }

    #[test]
    fn oversized_binding_index_leaves_siblings_rendered() {
        let nodes = renderer().render_blocks(
            &blocks(json!([
                {"id": "bad", "bindings": {"properties.a.18446744073709551615": "1"}},
                {"id": "sibling"}
            ])),
            &scope(json!({})),
        );
        assert_eq!(ids(&nodes), vec!["bad", "sibling"]);
    }

    #[test]
    fn hidden_blocks_and_empty_repeats_render_nothing() {
        let nodes = renderer().render_blocks(
            &blocks(json!([
                {"id": "hidden", "hide": true, "show": true},
                {"id": "bound", "bindings": {"show": "state.visible"}},
                {"id": "empty", "repeat": {"collection": "state.none"}},
                {"id": "shown"}
            ])),
            &scope(json!({"visible": false})),
        );
        assert_eq!(ids(&nodes), vec!["shown"]);
    }

    #[test]
    fn links_render_as_anchors() {
        let nodes = renderer().render_blocks(
            &blocks(json!([
                {"id": "a", "properties": {"href": "/x"}},
                {"id": "b", "tagName": "section"},
                {"id": "c"}
            ])),
            &scope(json!({})),
        );
        let tags: Vec<_> = nodes.iter().map(|n| n.tag.as_str()).collect();
        assert_eq!(tags, vec!["a", "section", "div"]);
    }

    #[test]
    fn components_get_defaults_and_child_ownership() {
        let nodes = renderer().render_blocks(
            &blocks(json!([
                {"id": "btn", "component": {"name": "Button", "options": {"link": "/go"}}},
                {"id": "tabs", "component": {"name": "Tabs"}, "children": [{"id": "tab-1"}]},
                {"id": "widget", "component": {"name": "Widget"}, "children": [{"id": "w-1"}]}
            ])),
            &scope(json!({})),
        );

        assert_eq!(option(&nodes[0], "text"), &json!("Click me!"));
        assert!(matches!(&nodes[0].kind, NodeKind::Component { no_wrap: true, .. }));

        match &nodes[1].kind {
            NodeKind::Component { blocks, .. } => assert_eq!(blocks[0].id, "tab-1"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(nodes[1].children.is_empty());

        assert!(matches!(&nodes[2].kind, NodeKind::Component { registered: false, .. }));
        assert_eq!(ids(&nodes[2].children), vec!["w-1"]);
    }

    #[test]
    fn columns_render_their_blocks() {
        let nodes = renderer().render_blocks(
            &blocks(json!([{
                "id": "cols",
                "component": {"name": "Columns", "options": {"columns": [
                    {"blocks": [{"id": "left"}]},
                    {"blocks": [{"id": "right"}], "width": 30}
                ]}}
            }])),
            &scope(json!({})),
        );
        let columns = &nodes[0].children;
        assert_eq!(columns.len(), 2);
        assert_eq!(ids(&columns[1].children), vec!["right"]);
        assert_eq!(columns[1].attributes["data-width"], json!(30.0));
    }

    #[test]
    fn symbols_get_their_own_scope_and_fill_slots() {
        let nodes = renderer().render_blocks(
            &blocks(json!([{
                "id": "sym",
                "component": {"name": "Symbol", "options": {"symbol": {
                    "inline": true,
                    "data": {"greeting": "from data", "body": [{"id": "slotted"}]},
                    "content": {
                        "id": "symbol-content",
                        "data": {
                            "state": {"owned": "by symbol"},
                            "blocks": [
                                {"id": "inner", "bindings": {
                                    "properties.greeting": "state.greeting",
                                    "properties.parent": "context.symbolId",
                                    "properties.outer": "state.outer"
                                }},
                                {"id": "slot", "component": {"name": "Slot", "options": {"name": "body"}}}
                            ]
                        }
                    }
                }}}
            }])),
            &scope(json!({"outer": "hidden"})),
        );

        let symbol = &nodes[0];
        assert!(matches!(&symbol.kind, NodeKind::Symbol { inline: true, .. }));
        assert_eq!(symbol.attributes["class"], json!("trellis-symbol trellis-inline-symbol"));

        let inner = &symbol.children[0];
        assert_eq!(inner.attributes["greeting"], json!("from data"));
        assert_eq!(inner.attributes["parent"], json!("sym"));
        assert_eq!(inner.attributes["outer"], JsonValue::Null);

        let slot = &symbol.children[1];
        assert_eq!(
            slot.kind,
            NodeKind::Slot {
                name: "body".into(),
                parent: Some("sym".into())
            }
        );
        assert_eq!(ids(&slot.children), vec!["slotted"]);
    }

    #[test]
    fn resolves_symbols_from_library() {
        let mut library = SymbolLibrary::new();
        library.insert(content(json!({"id": "footer", "data": {"blocks": [{"id": "f"}]}})));
        let renderer = renderer().with_symbols(Arc::new(library));

        let nodes = renderer.render_blocks(
            &blocks(json!([
                {"id": "s1", "component": {"name": "Symbol", "options": {"symbol": {"entry": "footer"}}}},
                {"id": "s2", "component": {"name": "Symbol", "options": {"symbol": {"entry": "missing"}}}}
            ])),
            &scope(json!({})),
        );
        assert_eq!(ids(&nodes[0].children), vec!["f"]);
        assert!(nodes[1].children.is_empty());
    }

    #[test]
    fn failing_subtree_leaves_siblings() {
        let mut library = SymbolLibrary::new();
        library.insert(content(json!({"id": "loop", "data": {"blocks": [
            {"id": "again", "component": {"name": "Symbol", "options": {"symbol": {"entry": "loop"}}}}
        ]}})));
        let mut options = RenderOptions::default();
        options.error_placeholders = true;
        let renderer = renderer().with_symbols(Arc::new(library)).with_options(options);

        let nodes = renderer.render_blocks(
            &blocks(json!([
                {"id": "first"},
                {"id": "bad", "component": {"name": "Symbol", "options": {"symbol": "not an object"}}},
                {"id": "recursive", "component": {"name": "Symbol", "options": {"symbol": {"entry": "loop"}}}},
                {"id": "last"}
            ])),
            &scope(json!({})),
        );

        assert_eq!(ids(&nodes), vec!["first", "bad", "recursive", "last"]);
        assert!(matches!(nodes[1].kind, NodeKind::Placeholder { .. }));

        let mut deepest = &nodes[2];
        while let Some(child) = deepest.children.first() {
            deepest = child;
        }
        assert!(matches!(deepest.kind, NodeKind::Placeholder { .. }));
    }

    fn personalized() -> Vec<Block> {
        blocks(json!([{
            "id": "pc",
            "component": {"name": "PersonalizationContainer", "options": {"variants": [
                {"query": [{"property": "device", "operator": "is", "value": "mobile"}], "blocks": [{"id": "mobile"}]},
                {"query": [{"property": "locale", "operator": "is", "value": "fr"}], "blocks": [{"id": "french"}]}
            ]}},
            "children": [{"id": "fallback"}]
        }]))
    }

    #[test]
    fn server_mode_renders_first_matching_variant() {
        let mut options = RenderOptions::default();
        options.user_attributes.insert("device".into(), json!("desktop"));
        let renderer = renderer().with_options(options);

        let nodes = renderer.render_blocks(&personalized(), &scope(json!({"locale": "fr"})));
        assert_eq!(ids(&nodes[0].children), vec!["french"]);

        let nodes = renderer.render_blocks(&personalized(), &scope(json!({})));
        assert_eq!(ids(&nodes[0].children), vec!["fallback"]);
    }

    #[test]
    fn static_mode_renders_every_variant() {
        let mut options = RenderOptions::default();
        options.mode = PersonalizationMode::Static;
        options.user_attributes.insert("device".into(), json!("mobile"));
        let renderer = renderer().with_options(options);

        let nodes = renderer.render_blocks(&personalized(), &scope(json!({})));
        let NodeKind::Personalization { templates, winner, script, style } = &nodes[0].kind else {
            panic!("not personalized");
        };
        assert_eq!(*winner, Some(0));
        assert_eq!(templates.len(), 2);
        assert_eq!(ids(&templates[1].children), vec!["french"]);
        assert_eq!(ids(&nodes[0].children), vec!["fallback"]);
        assert!(script.as_deref().is_some_and(|s| s.contains("\"pc\"")));
        assert!(style.as_deref().is_some_and(|s| s.contains("pc-1")));
    }

    #[test]
    fn content_variants_pick_blocks() {
        let renderer = renderer();
        let doc = content(json!({
            "id": "page",
            "data": {"blocks": [{"id": "default"}]},
            "variants": [{"query": [{"property": "plan", "operator": "is", "value": "pro"}], "blocks": [{"id": "pro"}]}]
        }));

        let tree = renderer.render_content(&doc, &scope(json!({})));
        assert_eq!(ids(&tree.nodes), vec!["default"]);
        assert!(!tree.has_client_variants());

        let mut options = RenderOptions::default();
        options.mode = PersonalizationMode::Static;
        let tree = renderer.with_options(options).render_content(&doc, &scope(json!({})));
        assert!(tree.has_client_variants());
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn render_tree_serializes_with_type_tags() {
        let tree = renderer().render_blocks(
            &blocks(json!([{"id": "t", "component": {"name": "Text", "options": {"text": "x"}}}])),
            &scope(json!({})),
        );
        let value = serde_json::to_value(&tree[0]).unwrap();
        assert_eq!(value["kind"]["type"], json!("component"));
        assert_eq!(value["kind"]["noWrap"], json!(false));
    }
}
