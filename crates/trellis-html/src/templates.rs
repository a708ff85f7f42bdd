//! Page templates around rendered content.

use minijinja::{context, Environment};
use trellis_core::targeting::script::CLIENT_SCRIPT;
use trellis_core::RenderTree;

use crate::adapter::{AdapterError, RenderAdapter};
use crate::html::style_safe;

/// Context for rendering a page template.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PageContext {
    /// Page title
    pub title: String,
    /// Site title, appended to the page title
    pub site_title: Option<String>,
    /// Document language
    pub lang: String,
    /// Content CSS
    pub css: Option<String>,
    /// Variant selection functions, present when the page has variants
    pub client_script: Option<String>,
    /// Rendered content HTML
    pub body: String,
    /// Extra inline scripts appended to the body
    pub scripts: Vec<String>,
}

impl PageContext {
    /// Context for a rendered tree whose markup is `body`.
    pub fn for_tree(tree: &RenderTree, body: String) -> Self {
        Self {
            title: tree.title.clone().unwrap_or_else(|| "Untitled".to_string()),
            site_title: None,
            lang: "en".to_string(),
            css: tree.css.as_deref().map(style_safe),
            client_script: tree.has_client_variants().then(|| CLIENT_SCRIPT.to_string()),
            body,
            scripts: Vec::new(),
        }
    }

    pub fn with_site_title(mut self, site_title: impl Into<String>) -> Self {
        self.site_title = Some(site_title.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.scripts.push(style_safe(&script.into()));
        self
    }
}

/// Template engine using minijinja.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with default templates.
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.add_template_owned("base.html".to_string(), BASE_TEMPLATE.to_string())
            .expect("Failed to add base template");

        env.add_template_owned("page.html".to_string(), PAGE_TEMPLATE.to_string())
            .expect("Failed to add page template");

        Self { env }
    }

    /// Render a page using the specified template.
    pub fn render_page(&self, template: &str, page: &PageContext) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(template)?;

        tmpl.render(context! {
            title => &page.title,
            site_title => &page.site_title,
            lang => &page.lang,
            css => &page.css,
            client_script => &page.client_script,
            body => &page.body,
            scripts => &page.scripts,
            base_styles => BASE_STYLES,
        })
    }

    /// Render `tree` with `adapter` and place it in the page template.
    /// `customize` adjusts the page context before rendering.
    pub fn render_tree(
        &self,
        adapter: &dyn RenderAdapter,
        tree: &RenderTree,
        customize: impl FnOnce(PageContext) -> PageContext,
    ) -> Result<String, AdapterError> {
        let body = adapter.render(tree)?;
        let page = customize(PageContext::for_tree(tree, body));
        Ok(self.render_page("page.html", &page)?)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

const BASE_STYLES: &str = ".trellis-block { box-sizing: border-box; }
.trellis-columns > .trellis-column { flex-shrink: 0; }
.trellis-image { max-width: 100%; height: auto; }
.trellis-placeholder { min-height: 1px; }
@media (max-width: 640px) { .trellis-columns { flex-direction: column; } .trellis-columns > .trellis-column { width: 100% !important; } }";

const BASE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="{{ lang }}">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ title }}{% if site_title %} - {{ site_title }}{% endif %}</title>
  <style>{{ base_styles | safe }}</style>
  {% if css %}<style data-trellis-content-css>{{ css | safe }}</style>
  {% endif %}{% if client_script %}<script>{{ client_script | safe }}</script>
  {% endif %}
</head>
<body>
  {% block content %}{% endblock %}
  {% for script in scripts %}
  <script>{{ script | safe }}</script>
  {% endfor %}
</body>
</html>"##;

const PAGE_TEMPLATE: &str = r##"{% extends "base.html" %}

{% block content %}
<main class="trellis-content">
{{ body | safe }}
</main>
{% endblock %}"##;
