//! Render one content document to stdout.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::Value as JsonValue;
use trellis_core::{Content, Document, FileFetcher, Globals, RenderTree, StateMap};
use trellis_html::{Breakpoints, HtmlAdapter, TemplateEngine};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Render tree as JSON
    Json,
    /// Full HTML page
    Html,
}

pub struct RenderArgs {
    pub file: PathBuf,
    pub state: Option<PathBuf>,
    pub attrs: Option<PathBuf>,
    pub locale: Option<String>,
    pub format: OutputFormat,
}

/// Run the render command.
pub async fn run(config: &Config, args: RenderArgs) -> Result<()> {
    let output = render(config, &args)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}

fn render(config: &Config, args: &RenderArgs) -> Result<String> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let content = Content::from_json(&text)
        .with_context(|| format!("Failed to parse {}", args.file.display()))?;

    let mut options = config.render_options();
    if let Some(path) = &args.attrs {
        options.user_attributes.extend(read_object(path)?);
    }
    let renderer = config.renderer(Globals::default())?.with_options(options);

    let mut mount = config.mount_options();
    if let Some(path) = &args.state {
        mount.data = read_object(path)?;
    }
    if args.locale.is_some() {
        mount.locale = args.locale.clone();
    }
    let lang = mount.locale.clone();

    let document = Document::mount(content, renderer, mount);
    if !document.content().data.http_requests.is_empty() {
        let root = args
            .file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let merged = document.run_requests(&FileFetcher::new(root));
        tracing::debug!(merged, "Resolved HTTP requests");
    }
    let tree = document.render();
    document.unmount();

    match args.format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&tree)?),
        OutputFormat::Html => render_html(&document, &tree, config.build.title.as_deref(), lang),
    }
}

fn render_html(
    document: &Document,
    tree: &RenderTree,
    site_title: Option<&str>,
    lang: Option<String>,
) -> Result<String> {
    let breakpoints = Breakpoints::from_meta(document.content().meta.breakpoints.as_ref());
    let adapter = HtmlAdapter::new().with_breakpoints(breakpoints);

    let html = TemplateEngine::new().render_tree(&adapter, tree, |mut page| {
        if let Some(title) = site_title {
            page = page.with_site_title(title);
        }
        if let Some(lang) = lang {
            page = page.with_lang(lang);
        }
        page
    })?;
    Ok(html)
}

fn read_object(path: &Path) -> Result<StateMap> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))? {
        JsonValue::Object(map) => Ok(map),
        _ => anyhow::bail!("{} must contain a JSON object", path.display()),
    }
}
