//! Project configuration (`trellis.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use trellis_core::{
    default_renderer, Globals, MountOptions, PersonalizationMode, RenderOptions, Renderer, StateMap,
    UserAttributes, DEFAULT_PREVIEW_CAPACITY,
};
use trellis_html::{load_symbols, SYMBOLS_DIR};

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub content: ContentConfig,
    pub render: RenderConfig,
    /// Ambient context available to every expression
    pub context: StateMap,
    pub targeting: TargetingConfig,
    pub build: BuildSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub dir: PathBuf,
    /// Document opened by `trellis dev`, relative to `dir`
    pub file: PathBuf,
    pub model: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("content"),
            file: PathBuf::from("index.json"),
            model: "page".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub locale: Option<String>,
    pub api_key: Option<String>,
    pub live_edit: bool,
    pub personalization: PersonalizationMode,
    pub error_placeholders: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            locale: None,
            api_key: None,
            live_edit: true,
            personalization: PersonalizationMode::Static,
            error_placeholders: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TargetingConfig {
    pub attributes: UserAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub output: PathBuf,
    pub title: Option<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            output: PathBuf::from("dist"),
            title: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub host: String,
    pub preview_cache_capacity: usize,
    /// Editor hosts trusted on top of the defaults
    pub trusted_hosts: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 7777,
            host: "127.0.0.1".to_string(),
            preview_cache_capacity: DEFAULT_PREVIEW_CAPACITY,
            trusted_hosts: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from `path` if it exists.
    /// Returns an error if the file exists but is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Ambient context with the API key folded in as `apiKey`.
    pub fn context(&self) -> StateMap {
        let mut context = self.context.clone();
        if let Some(key) = &self.render.api_key {
            context.insert("apiKey".to_string(), JsonValue::String(key.clone()));
        }
        context
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            mode: self.render.personalization,
            error_placeholders: self.render.error_placeholders,
            user_attributes: self.targeting.attributes.clone(),
            ..RenderOptions::default()
        }
    }

    /// Renderer with the built-in components, configured options and the
    /// symbol library under the content directory.
    pub fn renderer(&self, globals: Globals) -> Result<Renderer> {
        let mut renderer = default_renderer(globals).with_options(self.render_options());
        let symbols_dir = self.symbols_dir();
        if symbols_dir.is_dir() {
            let symbols = load_symbols(&symbols_dir)
                .with_context(|| format!("Failed to load symbols from {}", symbols_dir.display()))?;
            renderer = renderer.with_symbols(Arc::new(symbols));
        }
        Ok(renderer)
    }

    pub fn symbols_dir(&self) -> PathBuf {
        self.content.dir.join(SYMBOLS_DIR)
    }

    /// Mount options for a document rendered outside the editor.
    pub fn mount_options(&self) -> MountOptions {
        MountOptions {
            context: self.context(),
            locale: self.render.locale.clone(),
            ..MountOptions::default()
        }
    }

    /// Mount options for the live-edit preview.
    pub fn editor_mount_options(&self) -> MountOptions {
        MountOptions {
            model: Some(self.content.model.clone()),
            live_edit: self.render.live_edit,
            trusted_hosts: self.server.trusted_hosts.clone(),
            ..self.mount_options()
        }
    }
}
