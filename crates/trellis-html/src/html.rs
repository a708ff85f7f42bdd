//! HTML adapter.
//!
//! Every node becomes an element carrying its properties as attributes.
//! Built-in components get fixed markup; any other component becomes a
//! custom element with its options serialized into `data-options`.
//! Responsive styles are collected into one `<style>` element ahead of the
//! markup.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use trellis_core::model::ResponsiveStyles;
use trellis_core::{Block, NodeKind, RenderNode, RenderTree};

use crate::adapter::{AdapterError, RenderAdapter};

static TAG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").expect("Invalid regex"));

static ATTRIBUTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_:@][A-Za-z0-9_.:@-]*$").expect("Invalid regex"));

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Max widths, in pixels, at which the responsive style tiers apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoints {
    pub medium: u32,
    pub small: u32,
    pub xsmall: u32,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            medium: 991,
            small: 640,
            xsmall: 479,
        }
    }
}

impl Breakpoints {
    /// Defaults overridden by a document's `meta.breakpoints`.
    pub fn from_meta(meta: Option<&JsonValue>) -> Self {
        let mut breakpoints = Self::default();
        let Some(JsonValue::Object(meta)) = meta else {
            return breakpoints;
        };
        let width = |key: &str| {
            meta.get(key)
                .and_then(JsonValue::as_f64)
                .filter(|w| *w > 0.0 && *w < f64::from(u32::MAX))
                .map(|w| w.round() as u32)
        };
        if let Some(w) = width("medium") {
            breakpoints.medium = w;
        }
        if let Some(w) = width("small") {
            breakpoints.small = w;
        }
        if let Some(w) = width("xsmall") {
            breakpoints.xsmall = w;
        }
        breakpoints
    }
}

/// Renders trees as HTML fragments.
#[derive(Debug, Clone, Default)]
pub struct HtmlAdapter {
    breakpoints: Breakpoints,
}

impl HtmlAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_breakpoints(mut self, breakpoints: Breakpoints) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn breakpoints(&self) -> Breakpoints {
        self.breakpoints
    }
}

impl RenderAdapter for HtmlAdapter {
    fn name(&self) -> &'static str {
        "html"
    }

    fn render(&self, tree: &RenderTree) -> Result<String, AdapterError> {
        let mut out = Output::default();
        self.write_children(&tree.nodes, &mut out)?;
        Ok(out.finish())
    }
}

#[derive(Default)]
struct Output {
    html: String,
    css: String,
    /// Classes whose responsive rules were already emitted
    styled: HashSet<String>,
}

impl Output {
    fn finish(self) -> String {
        if self.css.is_empty() {
            return self.html;
        }
        format!(
            "<style data-trellis-styles>{}</style>{}",
            style_safe(&self.css),
            self.html
        )
    }
}

/// Ordered attribute list. `None` values are written as bare flags.
#[derive(Debug, Default)]
struct Attributes {
    items: Vec<(String, Option<String>)>,
}

impl Attributes {
    fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.items.iter_mut().find(|(n, _)| n == name) {
            Some(item) => item.1 = value,
            None => self.items.push((name.to_string(), value)),
        }
    }

    fn flag(&mut self, name: &str) {
        if !self.items.iter().any(|(n, _)| n == name) {
            self.items.push((name.to_string(), None));
        }
    }

    fn append(&mut self, name: &str, value: &str, separator: &str) {
        match self.items.iter_mut().find(|(n, _)| n == name) {
            Some((_, Some(existing))) if !existing.is_empty() => {
                existing.push_str(separator);
                existing.push_str(value);
            }
            Some(item) => item.1 = Some(value.to_string()),
            None => self.items.push((name.to_string(), Some(value.to_string()))),
        }
    }

    fn add_class(&mut self, class: &str) {
        self.append("class", class, " ");
    }

    fn add_style(&mut self, declarations: &str) {
        if !declarations.is_empty() {
            self.append("style", declarations, "; ");
        }
    }

    /// Merge `other` in; classes and styles accumulate, the rest overrides.
    fn extend(&mut self, other: Attributes) {
        for (name, value) in other.items {
            match value {
                Some(v) if name == "class" => self.add_class(&v),
                Some(v) if name == "style" => self.add_style(&v),
                Some(v) => self.set(&name, v),
                None => self.flag(&name),
            }
        }
    }

    fn write_to(&self, out: &mut String) {
        for (name, value) in &self.items {
            out.push(' ');
            out.push_str(name);
            if let Some(value) = value {
                out.push_str("=\"");
                out.push_str(&escape_html(value));
                out.push('"');
            }
        }
    }
}

/// Markup of a component root, before it is placed in its wrapper.
struct Element {
    tag: String,
    attrs: Attributes,
    body: String,
    /// Whether `body` already holds the node's children
    holds_children: bool,
}

impl Element {
    fn new(tag: &str, class: &str) -> Self {
        let mut attrs = Attributes::default();
        attrs.add_class(class);
        Self {
            tag: tag.to_string(),
            attrs,
            body: String::new(),
            holds_children: false,
        }
    }

    fn write_to(&self, out: &mut String) {
        open(out, &self.tag, &self.attrs);
        if !is_void(&self.tag) {
            out.push_str(&self.body);
            close(out, &self.tag);
        }
    }
}

impl HtmlAdapter {
    fn write_children(&self, nodes: &[RenderNode], out: &mut Output) -> Result<(), AdapterError> {
        for node in nodes {
            self.write_node(node, out)?;
        }
        Ok(())
    }

    /// Render `nodes` into a separate string, collecting their styles.
    fn render_children(&self, nodes: &[RenderNode], out: &mut Output) -> Result<String, AdapterError> {
        let outer = std::mem::take(&mut out.html);
        let result = self.write_children(nodes, out);
        let inner = std::mem::replace(&mut out.html, outer);
        result.map(|()| inner)
    }

    fn write_node(&self, node: &RenderNode, out: &mut Output) -> Result<(), AdapterError> {
        match &node.kind {
            NodeKind::Element => {
                let attrs = self.node_attributes(node, out);
                self.write_element(node, attrs, out)
            }
            NodeKind::Component {
                name,
                options,
                registered,
                no_wrap,
                blocks,
            } => {
                let element = self.component_element(node, name, options, *registered, blocks, out)?;
                self.write_component(node, element, *no_wrap, out)
            }
            NodeKind::Symbol {
                content_id, css, ..
            } => {
                let mut attrs = self.node_attributes(node, out);
                if let Some(id) = content_id {
                    attrs.set("data-content-id", id.as_str());
                }
                let tag = checked_tag(node)?;
                open(&mut out.html, tag, &attrs);
                if let Some(css) = css.as_deref().filter(|c| !c.trim().is_empty()) {
                    out.html.push_str("<style>");
                    out.html.push_str(&style_safe(css));
                    out.html.push_str("</style>");
                }
                self.write_children(&node.children, out)?;
                close(&mut out.html, tag);
                Ok(())
            }
            NodeKind::Slot { name, parent } => {
                let mut attrs = self.node_attributes(node, out);
                attrs.set("data-slot-name", name.as_str());
                if let Some(parent) = parent {
                    attrs.set("data-slot-parent", parent.as_str());
                }
                self.write_element(node, attrs, out)
            }
            NodeKind::Personalization {
                templates,
                winner,
                script,
                style,
            } => {
                let mut attrs = self.node_attributes(node, out);
                attrs.set("data-personalization-id", node.id.as_str());
                if let Some(winner) = winner {
                    attrs.set("data-variant-winner", winner.to_string());
                }
                let Some(script) = script else {
                    return self.write_element(node, attrs, out);
                };

                let tag = checked_tag(node)?;
                let id = escape_html(&node.id);
                open(&mut out.html, tag, &attrs);
                for template in templates {
                    out.html.push_str(&format!(
                        "<template data-variant-id=\"{id}-{}\">",
                        template.index
                    ));
                    self.write_children(&template.children, out)?;
                    out.html.push_str("</template>");
                }
                out.html.push_str(&format!("<div data-variant-fallback=\"{id}\">"));
                self.write_children(&node.children, out)?;
                out.html.push_str("</div>");
                if let Some(style) = style {
                    out.html.push_str(&format!(
                        "<style data-id=\"variants-styles-{id}\">{}</style>",
                        style_safe(style)
                    ));
                }
                out.html.push_str(&format!(
                    "<script data-id=\"variants-script-{id}\">{script}</script>"
                ));
                close(&mut out.html, tag);
                Ok(())
            }
            NodeKind::Placeholder { message } => {
                let mut attrs = Attributes::default();
                attrs.set("data-id", node.id.as_str());
                attrs.add_class("trellis-placeholder");
                attrs.set("data-error", message.as_str());
                open(&mut out.html, "div", &attrs);
                close(&mut out.html, "div");
                Ok(())
            }
        }
    }

    fn write_element(&self, node: &RenderNode, attrs: Attributes, out: &mut Output) -> Result<(), AdapterError> {
        let tag = checked_tag(node)?;
        open(&mut out.html, tag, &attrs);
        if !is_void(tag) {
            self.write_children(&node.children, out)?;
            close(&mut out.html, tag);
        }
        Ok(())
    }

    fn write_component(
        &self,
        node: &RenderNode,
        mut element: Element,
        no_wrap: bool,
        out: &mut Output,
    ) -> Result<(), AdapterError> {
        let attrs = self.node_attributes(node, out);
        let children = if element.holds_children {
            String::new()
        } else {
            self.render_children(&node.children, out)?
        };

        if no_wrap {
            element.attrs.extend(attrs);
            element.body.push_str(&children);
            element.write_to(&mut out.html);
            return Ok(());
        }

        let tag = checked_tag(node)?;
        open(&mut out.html, tag, &attrs);
        element.write_to(&mut out.html);
        if !is_void(tag) {
            out.html.push_str(&children);
            close(&mut out.html, tag);
        }
        Ok(())
    }

    fn component_element(
        &self,
        node: &RenderNode,
        name: &str,
        options: &Map<String, JsonValue>,
        registered: bool,
        blocks: &[Block],
        out: &mut Output,
    ) -> Result<Element, AdapterError> {
        let element = match (name, registered) {
            ("Text", true) => {
                let mut element = Element::new("div", "trellis-text");
                element.body = option_text(options, "text");
                element
            }
            ("Image", true) => {
                let mut element = Element::new("img", "trellis-image");
                if let Some(src) = option_str(options, "image") {
                    element.attrs.set("src", src);
                }
                element.attrs.set("alt", option_text(options, "altText"));
                element.attrs.set("loading", "lazy");
                element
            }
            ("Button", true) => {
                let link = option_str(options, "link").filter(|l| !l.trim().is_empty());
                let mut element = match link {
                    Some(href) => {
                        let mut element = Element::new("a", "trellis-button");
                        element.attrs.set("href", href);
                        if options.get("openLinkInNewTab") == Some(&JsonValue::Bool(true)) {
                            element.attrs.set("target", "_blank");
                            element.attrs.set("rel", "noopener noreferrer");
                        }
                        element
                    }
                    None => {
                        let mut element = Element::new("button", "trellis-button");
                        element.attrs.set("type", "button");
                        element
                    }
                };
                element.body = escape_html(&option_text(options, "text"));
                element
            }
            ("CustomCode", true) => {
                let mut element = Element::new("div", "trellis-custom-code");
                element.body = option_text(options, "code");
                element
            }
            ("Section", true) => {
                let mut inner = Attributes::default();
                inner.add_class("trellis-section-inner");
                if let Some(width) = option_number(options, "maxWidth") {
                    inner.add_style(&format!(
                        "max-width: {width}px; margin-left: auto; margin-right: auto"
                    ));
                }
                let mut element = Element::new("section", "trellis-section");
                open(&mut element.body, "div", &inner);
                element.body.push_str(&self.render_children(&node.children, out)?);
                close(&mut element.body, "div");
                element.holds_children = true;
                element
            }
            ("Columns", true) => {
                let mut element = Element::new("div", "trellis-columns");
                element.attrs.add_style("display: flex");
                if let Some(space) = option_number(options, "space") {
                    element.attrs.add_style(&format!("gap: {space}px"));
                }
                element.body = self.render_children(&node.children, out)?;
                element.holds_children = true;
                element
            }
            _ => {
                let mut element = Element::new(&custom_element_tag(name), "trellis-component");
                element.attrs.set("data-component", name);
                if !registered {
                    element.attrs.flag("data-unregistered");
                }
                if !options.is_empty() {
                    element.attrs.set("data-options", serde_json::to_string(options)?);
                }
                if !blocks.is_empty() {
                    element.attrs.set("data-blocks", serde_json::to_string(blocks)?);
                }
                element.body = self.render_children(&node.children, out)?;
                element.holds_children = true;
                element
            }
        };
        Ok(element)
    }

    /// Attributes shared by every node: properties, identity, actions and
    /// the responsive style class.
    fn node_attributes(&self, node: &RenderNode, out: &mut Output) -> Attributes {
        let mut attrs = Attributes::default();
        for (name, value) in &node.attributes {
            let name = if name == "className" { "class" } else { name.as_str() };
            if !ATTRIBUTE_NAME.is_match(name) {
                tracing::debug!(block_id = %node.id, attribute = %name, "Skipping invalid attribute name");
                continue;
            }
            match value {
                JsonValue::Null | JsonValue::Bool(false) => {}
                JsonValue::Bool(true) => attrs.flag(name),
                JsonValue::String(s) => attrs.set(name, s.as_str()),
                JsonValue::Number(n) => attrs.set(name, n.to_string()),
                JsonValue::Object(map) if name == "style" => attrs.set(name, declarations(map)),
                other => attrs.set(name, other.to_string()),
            }
        }

        attrs.set("data-id", node.id.as_str());
        if node.key != node.id {
            attrs.set("data-key", node.key.as_str());
        }
        attrs.add_class("trellis-block");

        if let Some(width) = column_width(node) {
            attrs.add_style(&format!("width: {}%", format_number(width)));
        }

        for (event, code) in &node.actions {
            attrs.set(&format!("data-on-{}", kebab(event)), code.as_str());
        }

        if let Some(styles) = &node.responsive_styles {
            let class = format!("trellis-block-{}", css_ident(&node.id));
            attrs.add_class(&class);
            if out.styled.insert(class.clone()) {
                out.css.push_str(&self.responsive_css(&class, styles));
            }
        }
        attrs
    }

    fn responsive_css(&self, class: &str, styles: &ResponsiveStyles) -> String {
        let tiers = [
            (&styles.large, None),
            (&styles.medium, Some(self.breakpoints.medium)),
            (&styles.small, Some(self.breakpoints.small)),
            (&styles.xsmall, Some(self.breakpoints.xsmall)),
        ];

        let mut css = String::new();
        for (tier, max_width) in tiers {
            let Some(map) = tier else { continue };
            let decls = declarations(map);
            if decls.is_empty() {
                continue;
            }
            let rule = format!(".{class} {{ {decls}; }}");
            match max_width {
                Some(width) => css.push_str(&format!("@media (max-width: {width}px) {{ {rule} }}")),
                None => css.push_str(&rule),
            }
        }
        css
    }
}

fn checked_tag(node: &RenderNode) -> Result<&str, AdapterError> {
    if TAG_NAME.is_match(&node.tag) {
        Ok(&node.tag)
    } else {
        Err(AdapterError::InvalidTag {
            block_id: node.id.clone(),
            tag: node.tag.clone(),
        })
    }
}

fn open(out: &mut String, tag: &str, attrs: &Attributes) {
    out.push('<');
    out.push_str(tag);
    attrs.write_to(out);
    out.push('>');
}

fn close(out: &mut String, tag: &str) {
    if !is_void(tag) {
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

fn is_void(tag: &str) -> bool {
    VOID_TAGS.iter().any(|v| v.eq_ignore_ascii_case(tag))
}

/// Width of a column generated for the `Columns` component.
fn column_width(node: &RenderNode) -> Option<f64> {
    let is_column = node
        .attributes
        .get("class")
        .and_then(JsonValue::as_str)
        .is_some_and(|c| c.split_whitespace().any(|c| c == "trellis-column"));
    if !is_column {
        return None;
    }
    node.attributes.get("data-width").and_then(JsonValue::as_f64)
}

fn option_str<'a>(options: &'a Map<String, JsonValue>, key: &str) -> Option<&'a str> {
    options.get(key).and_then(JsonValue::as_str)
}

fn option_text(options: &Map<String, JsonValue>, key: &str) -> String {
    match options.get(key) {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        Some(JsonValue::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn option_number(options: &Map<String, JsonValue>, key: &str) -> Option<String> {
    options.get(key).and_then(JsonValue::as_f64).map(format_number)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// `marginTop: "4px"` style maps as CSS declarations.
fn declarations(styles: &Map<String, JsonValue>) -> String {
    styles
        .iter()
        .filter_map(|(property, value)| {
            let value = match value {
                JsonValue::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                JsonValue::Number(n) => n.to_string(),
                _ => return None,
            };
            Some(format!("{}: {value}", css_property(property)))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn css_property(name: &str) -> String {
    if name.starts_with("--") || name.contains('-') {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn css_ident(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

fn kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn custom_element_tag(name: &str) -> String {
    let name = kebab(name);
    if name.is_empty() {
        "trellis-component".to_string()
    } else {
        format!("trellis-{name}")
    }
}

/// Keep embedded CSS and scripts from closing their element early.
pub(crate) fn style_safe(text: &str) -> String {
    text.replace("</", "<\\/")
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use trellis_core::{
        default_renderer, Content, Globals, PersonalizationMode, RenderOptions, Scope, StateMap,
    };

    fn node(id: &str, kind: NodeKind) -> RenderNode {
        RenderNode {
            id: id.into(),
            key: id.into(),
            tag: "div".into(),
            kind,
            attributes: Map::new(),
            actions: BTreeMap::new(),
            responsive_styles: None,
            children: Vec::new(),
        }
    }

    fn component(name: &str, options: JsonValue, registered: bool) -> NodeKind {
        NodeKind::Component {
            name: name.into(),
            options: options.as_object().cloned().unwrap_or_default(),
            registered,
            no_wrap: false,
            blocks: Vec::new(),
        }
    }

    fn render(nodes: Vec<RenderNode>) -> String {
        let tree = RenderTree {
            nodes,
            ..RenderTree::default()
        };
        HtmlAdapter::new().render(&tree).unwrap()
    }

    #[test]
    fn renders_elements_with_properties() {
        let mut root = node("b1", NodeKind::Element);
        root.tag = "p".into();
        root.attributes = json!({"class": "lead", "title": "Say \"hi\"", "hidden": true, "draft": false})
            .as_object()
            .cloned()
            .unwrap();
        root.actions.insert("click".into(), "state.open = true".into());

        assert_eq!(
            render(vec![root]),
            r#"<p class="lead trellis-block" hidden title="Say &quot;hi&quot;" data-id="b1" data-on-click="state.open = true"></p>"#
        );
    }

    #[test]
    fn renders_builtin_components() {
        let text = node("t", component("Text", json!({"text": "<b>Bold</b>"}), true));
        let image = node(
            "i",
            component("Image", json!({"image": "/a.png", "altText": "A & B"}), true),
        );
        let html = render(vec![text, image]);

        assert!(html.contains(r#"<div class="trellis-text"><b>Bold</b></div>"#));
        assert!(html.contains(r#"<img class="trellis-image" src="/a.png" alt="A &amp; B" loading="lazy">"#));
        assert!(!html.contains("</img>"));
    }

    #[test]
    fn unwrapped_button_carries_block_attributes() {
        let mut button = node(
            "btn",
            NodeKind::Component {
                name: "Button".into(),
                options: json!({"text": "Go <now>", "link": "/shop", "openLinkInNewTab": true})
                    .as_object()
                    .cloned()
                    .unwrap(),
                registered: true,
                no_wrap: true,
                blocks: Vec::new(),
            },
        );
        button.attributes.insert("class".into(), json!("cta"));

        assert_eq!(
            render(vec![button]),
            r#"<a class="trellis-button cta trellis-block" href="/shop" target="_blank" rel="noopener noreferrer" data-id="btn">Go &lt;now&gt;</a>"#
        );
    }

    #[test]
    fn unknown_components_become_custom_elements() {
        let mut hero = node("h", component("ProductCard", json!({"sku": "x1"}), false));
        hero.children.push(node("child", NodeKind::Element));
        let html = render(vec![hero]);

        assert!(html.starts_with(r#"<div class="trellis-block" data-id="h"><trellis-product-card"#));
        assert!(html.contains(r#"data-component="ProductCard""#));
        assert!(html.contains("data-unregistered"));
        assert!(html.contains(r#"data-options="{&quot;sku&quot;:&quot;x1&quot;}""#));
        assert!(html.contains(r#"<div class="trellis-block" data-id="child"></div></trellis-product-card>"#));
    }

    #[test]
    fn columns_lay_out_children_with_widths() {
        let mut column = node("c-column-0", NodeKind::Element);
        column.key = "0".into();
        column.attributes = json!({"class": "trellis-column", "data-width": 50.0})
            .as_object()
            .cloned()
            .unwrap();
        let mut columns = node("c", component("Columns", json!({"space": 20}), true));
        columns.children.push(column);

        let html = render(vec![columns]);
        assert!(html.contains(r#"<div class="trellis-columns" style="display: flex; gap: 20px">"#));
        assert!(html.contains(r#"style="width: 50%""#));
    }

    #[test]
    fn collects_responsive_styles_once() {
        let mut block = node("a.b", NodeKind::Element);
        block.responsive_styles = serde_json::from_value(json!({
            "large": {"marginTop": "10px", "display": "flex"},
            "small": {"marginTop": "4px"}
        }))
        .unwrap();
        let mut repeated = block.clone();
        repeated.key = "a.b-1".into();

        let html = render(vec![block, repeated]);
        assert!(html.starts_with(
            "<style data-trellis-styles>.trellis-block-a-b { display: flex; margin-top: 10px; }\
             @media (max-width: 640px) { .trellis-block-a-b { margin-top: 4px; } }</style>"
        ));
        assert_eq!(html.matches("@media").count(), 1);
        assert!(html.contains(r#"data-key="a.b-1""#));
    }

    #[test]
    fn rejects_invalid_tags() {
        let mut bad = node("x", NodeKind::Element);
        bad.tag = "div onclick=alert(1)".into();
        let tree = RenderTree {
            nodes: vec![bad],
            ..RenderTree::default()
        };
        assert!(matches!(
            HtmlAdapter::new().render(&tree),
            Err(AdapterError::InvalidTag { .. })
        ));
    }

    #[test]
    fn static_personalization_renders_templates_and_fallback() {
        let content: Content = serde_json::from_value(json!({
            "id": "page",
            "data": {"blocks": [{
                "id": "p1",
                "component": {"name": "PersonalizationContainer", "options": {"variants": [
                    {"query": [{"property": "locale", "operator": "is", "value": "de"}],
                     "blocks": [{"id": "de", "component": {"name": "Text", "options": {"text": "Hallo"}}}]}
                ]}},
                "children": [{"id": "en", "component": {"name": "Text", "options": {"text": "Hello"}}}]
            }]}
        }))
        .unwrap();
        let renderer = default_renderer(Globals::default()).with_options(RenderOptions {
            mode: PersonalizationMode::Static,
            ..RenderOptions::default()
        });
        let tree = renderer.render_content(&content, &Scope::from_state(StateMap::new()));
        let html = HtmlAdapter::new().render(&tree).unwrap();

        assert!(html.contains(r#"data-personalization-id="p1""#));
        assert!(html.contains(r#"<template data-variant-id="p1-0">"#));
        assert!(html.contains(r#"<div data-variant-fallback="p1">"#));
        assert!(html.contains(r#"<style data-id="variants-styles-p1">[data-variant-id="p1-0"] { display: none; }</style>"#));
        assert!(html.contains(r#"<script data-id="variants-script-p1">selectVariant("#));
        let template = html.find("Hallo").unwrap();
        let fallback = html.find("Hello").unwrap();
        assert!(template < fallback);
    }

    #[test]
    fn placeholders_carry_the_error() {
        let html = render(vec![node(
            "broken",
            NodeKind::Placeholder {
                message: "Symbol nesting deeper than 8".into(),
            },
        )]);
        assert_eq!(
            html,
            r#"<div data-id="broken" class="trellis-placeholder" data-error="Symbol nesting deeper than 8"></div>"#
        );
    }

    #[test]
    fn reads_breakpoints_from_meta() {
        let breakpoints = Breakpoints::from_meta(Some(&json!({"small": 500, "medium": 800.4})));
        assert_eq!(
            breakpoints,
            Breakpoints {
                medium: 800,
                small: 500,
                xsmall: 479
            }
        );
        assert_eq!(Breakpoints::from_meta(None), Breakpoints::default());
    }
}
