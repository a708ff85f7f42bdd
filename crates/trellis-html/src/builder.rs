//! Static site builder.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use walkdir::WalkDir;

use trellis_core::{Content, Document, FileFetcher, MountOptions, Renderer, StateMap, SymbolLibrary};

use crate::adapter::RenderAdapter;
use crate::html::{Breakpoints, HtmlAdapter};
use crate::templates::TemplateEngine;

/// Top-level content directories that do not hold pages.
pub const SYMBOLS_DIR: &str = "symbols";
pub const DATA_DIR: &str = "data";

/// Configuration for building a static site.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Directory of content documents (`*.json`)
    pub content_dir: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Site title appended to page titles
    pub title: Option<String>,

    pub locale: Option<String>,

    /// Ambient context passed to every document
    pub context: StateMap,

    /// Resolve `data.httpRequests` against files under the content directory
    pub fetch_requests: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("content"),
            output_dir: PathBuf::from("dist"),
            title: None,
            locale: None,
            context: StateMap::new(),
            fetch_requests: true,
        }
    }
}

/// Result of a build operation.
#[derive(Debug)]
pub struct BuildResult {
    /// Number of pages generated
    pub pages: usize,

    /// Total render nodes across all pages
    pub nodes: usize,

    /// Total build time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

/// Errors that can occur during build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to read content: {0}")]
    ReadError(String),

    #[error("Failed to parse content: {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to render {path}: {message}")]
    RenderError { path: String, message: String },

    #[error("Failed to write output: {0}")]
    WriteError(String),
}

/// One line of `manifest.json`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub title: Option<String>,
    /// URL path of the page
    pub path: String,
    /// Source file, relative to the content directory
    pub source: String,
    pub nodes: usize,
    pub client_variants: bool,
}

/// A page to be built.
#[derive(Debug)]
struct PageInfo {
    relative_path: PathBuf,
    output_path: PathBuf,
    url: String,
    content: Content,
}

/// Renders a directory of content documents to HTML files.
pub struct StaticBuilder {
    config: BuildConfig,
    renderer: Renderer,
    templates: TemplateEngine,
}

impl StaticBuilder {
    pub fn new(config: BuildConfig, renderer: Renderer) -> Self {
        Self {
            config,
            renderer,
            templates: TemplateEngine::new(),
        }
    }

    /// Build the static site.
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| BuildError::WriteError(e.to_string()))?;

        let pages = self.discover_pages()?;

        let results: Vec<Result<ManifestEntry, BuildError>> =
            pages.par_iter().map(|page| self.build_page(page)).collect();

        let mut manifest = Vec::with_capacity(results.len());
        for result in results {
            manifest.push(result?);
        }
        let nodes = manifest.iter().map(|entry| entry.nodes).sum();

        self.write_manifest(&manifest)?;

        let duration = start.elapsed();
        tracing::info!(pages = manifest.len(), ms = duration.as_millis() as u64, "Built site");

        Ok(BuildResult {
            pages: manifest.len(),
            nodes,
            duration_ms: duration.as_millis() as u64,
            output_dir: self.config.output_dir.clone(),
        })
    }

    /// Discover all content documents outside the reserved directories.
    fn discover_pages(&self) -> Result<Vec<PageInfo>, BuildError> {
        let root = &self.config.content_dir;
        if !root.exists() {
            return Err(BuildError::ReadError(format!(
                "Content directory not found: {}",
                root.display()
            )));
        }

        let mut pages = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !is_reserved(root, entry.path()))
            .filter_map(|e| e.ok());

        for entry in walker {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.starts_with(&self.config.output_dir) {
                continue;
            }

            let text = fs::read_to_string(path)
                .map_err(|e| BuildError::ReadError(format!("{}: {}", path.display(), e)))?;
            let mut content = Content::from_json(&text).map_err(|e| BuildError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

            let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            if content.id.as_deref().map_or(true, str::is_empty) {
                content.id = relative_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string);
            }

            let (output_path, url) = self.output_location(&relative_path);
            pages.push(PageInfo {
                relative_path,
                output_path,
                url,
                content,
            });
        }

        pages.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(pages)
    }

    /// `index.json` -> `dist/index.html`, `about.json` -> `dist/about/index.html`.
    fn output_location(&self, relative: &Path) -> (PathBuf, String) {
        let stem = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("index");
        let parent = relative.parent().unwrap_or(Path::new(""));
        let dir = if stem == "index" {
            parent.to_path_buf()
        } else {
            parent.join(stem)
        };

        let url_path = dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = if url_path.is_empty() {
            "/".to_string()
        } else {
            format!("/{url_path}/")
        };

        (self.config.output_dir.join(dir).join("index.html"), url)
    }

    /// Mount, render and write a single page.
    fn build_page(&self, page: &PageInfo) -> Result<ManifestEntry, BuildError> {
        let source = page.relative_path.display().to_string();
        let document = Document::mount(
            page.content.clone(),
            self.renderer.clone(),
            MountOptions {
                context: self.config.context.clone(),
                locale: self.config.locale.clone(),
                ..MountOptions::default()
            },
        );

        if self.config.fetch_requests && !page.content.data.http_requests.is_empty() {
            let merged = document.run_requests(&FileFetcher::new(&self.config.content_dir));
            tracing::debug!(page = %source, merged, "Resolved HTTP requests");
        }

        let tree = document.render();
        let adapter = HtmlAdapter::new()
            .with_breakpoints(Breakpoints::from_meta(page.content.meta.breakpoints.as_ref()));
        tracing::debug!(page = %source, adapter = adapter.name(), nodes = tree.node_count(), "Rendering page");

        let html = self
            .templates
            .render_tree(&adapter, &tree, |mut ctx| {
                if let Some(title) = &self.config.title {
                    ctx = ctx.with_site_title(title.as_str());
                }
                if let Some(locale) = &self.config.locale {
                    ctx = ctx.with_lang(locale.as_str());
                }
                ctx
            })
            .map_err(|e| BuildError::RenderError {
                path: source.clone(),
                message: e.to_string(),
            })?;

        if let Some(parent) = page.output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::WriteError(e.to_string()))?;
        }
        fs::write(&page.output_path, html).map_err(|e| BuildError::WriteError(e.to_string()))?;

        Ok(ManifestEntry {
            id: tree.content_id.clone(),
            title: tree.title.clone(),
            path: page.url.clone(),
            source,
            nodes: tree.node_count(),
            client_variants: tree.has_client_variants(),
        })
    }

    fn write_manifest(&self, manifest: &[ManifestEntry]) -> Result<(), BuildError> {
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| BuildError::WriteError(e.to_string()))?;

        fs::write(self.config.output_dir.join("manifest.json"), json)
            .map_err(|e| BuildError::WriteError(e.to_string()))
    }
}

fn is_reserved(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(first), None) => {
            let name = first.as_os_str();
            (name == SYMBOLS_DIR || name == DATA_DIR) && path.is_dir()
        }
        _ => false,
    }
}

/// Load every content document under `dir` as a symbol, keyed by id.
/// A missing directory yields an empty library.
pub fn load_symbols(dir: &Path) -> Result<SymbolLibrary, BuildError> {
    let mut library = SymbolLibrary::new();
    if !dir.exists() {
        return Ok(library);
    }

    for entry in WalkDir::new(dir).follow_links(true).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let text = fs::read_to_string(path)
            .map_err(|e| BuildError::ReadError(format!("{}: {}", path.display(), e)))?;
        let mut content = Content::from_json(&text).map_err(|e| BuildError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if content.id.as_deref().map_or(true, str::is_empty) {
            content.id = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
        }
        library.insert(content);
    }

    tracing::debug!(count = library.len(), dir = %dir.display(), "Loaded symbols");
    Ok(library)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use trellis_core::{default_renderer, Globals};

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn text_block(id: &str, text: &str) -> String {
        format!(r#"{{"id": "{id}", "component": {{"name": "Text", "options": {{"text": "{text}"}}}}}}"#)
    }

    #[test]
    fn builds_simple_site() {
        let temp = tempdir().unwrap();
        let content = temp.path().join("content");
        let out = temp.path().join("dist");

        write(
            &content.join("index.json"),
            &format!(r#"{{"id": "home", "data": {{"title": "Home", "blocks": [{}]}}}}"#, text_block("t", "Welcome")),
        );
        write(
            &content.join("about.json"),
            &format!(r#"{{"data": {{"blocks": [{}]}}}}"#, text_block("a", "About us")),
        );

        let config = BuildConfig {
            content_dir: content,
            output_dir: out.clone(),
            title: Some("Shop".to_string()),
            ..Default::default()
        };
        let result = StaticBuilder::new(config, default_renderer(Globals::default()))
            .build()
            .unwrap();

        assert_eq!(result.pages, 2);
        let home = fs::read_to_string(out.join("index.html")).unwrap();
        assert!(home.contains("<title>Home - Shop</title>"));
        assert!(home.contains("Welcome"));
        assert!(out.join("about/index.html").exists());

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest[0]["path"], "/");
        assert_eq!(manifest[0]["id"], "home");
        assert_eq!(manifest[1]["path"], "/about/");
        assert_eq!(manifest[1]["id"], "about");
    }

    #[test]
    fn evaluates_state_and_fetches_data_files() {
        let temp = tempdir().unwrap();
        let content = temp.path().join("content");
        let out = temp.path().join("dist");

        write(&content.join("data/greeting.json"), r#"{"word": "Howdy"}"#);
        write(
            &content.join("index.json"),
            r#"{
                "id": "home",
                "data": {
                    "state": {"name": "World"},
                    "jsCode": "state.name = state.name + '!'",
                    "httpRequests": {"greeting": "/data/greeting.json"},
                    "blocks": [{
                        "id": "t",
                        "component": {"name": "Text", "options": {}},
                        "bindings": {"component.options.text": "(state.greeting ? state.greeting.word : 'Hello') + ' ' + state.name"}
                    }]
                }
            }"#,
        );

        let result = StaticBuilder::new(
            BuildConfig {
                content_dir: content,
                output_dir: out.clone(),
                ..Default::default()
            },
            default_renderer(Globals::default()),
        )
        .build()
        .unwrap();

        assert_eq!(result.pages, 1);
        let html = fs::read_to_string(out.join("index.html")).unwrap();
        assert!(html.contains("Howdy World!"), "{html}");
        assert!(!out.join("data").exists());
    }

    #[test]
    fn resolves_symbols_from_library() {
        let temp = tempdir().unwrap();
        let content = temp.path().join("content");
        let out = temp.path().join("dist");

        write(
            &content.join("symbols/header.json"),
            &format!(r#"{{"data": {{"blocks": [{}]}}}}"#, text_block("h", "Site header")),
        );
        write(
            &content.join("index.json"),
            r#"{"id": "home", "data": {"blocks": [
                {"id": "s", "component": {"name": "Symbol", "options": {"symbol": {"entry": "header"}}}}
            ]}}"#,
        );

        let symbols = load_symbols(&content.join(SYMBOLS_DIR)).unwrap();
        assert_eq!(symbols.len(), 1);
        let renderer = default_renderer(Globals::default()).with_symbols(Arc::new(symbols));

        let result = StaticBuilder::new(
            BuildConfig {
                content_dir: content,
                output_dir: out.clone(),
                ..Default::default()
            },
            renderer,
        )
        .build()
        .unwrap();

        assert_eq!(result.pages, 1);
        let html = fs::read_to_string(out.join("index.html")).unwrap();
        assert!(html.contains("trellis-symbol"));
        assert!(html.contains("Site header"));
    }

    #[test]
    fn missing_content_dir_is_an_error() {
        let temp = tempdir().unwrap();
        let builder = StaticBuilder::new(
            BuildConfig {
                content_dir: temp.path().join("nope"),
                output_dir: temp.path().join("dist"),
                ..Default::default()
            },
            default_renderer(Globals::default()),
        );
        assert!(matches!(builder.build(), Err(BuildError::ReadError(_))));
    }

    #[test]
    fn invalid_json_fails_the_build() {
        let temp = tempdir().unwrap();
        let content = temp.path().join("content");
        write(&content.join("broken.json"), "{ not json");

        let builder = StaticBuilder::new(
            BuildConfig {
                content_dir: content,
                output_dir: temp.path().join("dist"),
                ..Default::default()
            },
            default_renderer(Globals::default()),
        );
        assert!(matches!(builder.build(), Err(BuildError::ParseError { .. })));
    }
}
