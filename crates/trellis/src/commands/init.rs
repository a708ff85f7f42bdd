//! Initialize a trellis project.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use trellis_html::{DATA_DIR, SYMBOLS_DIR};

/// Run the init command.
pub async fn run(config_path: &Path, yes: bool) -> Result<()> {
    tracing::info!("Initializing trellis...");
    scaffold(Path::new("."), config_path, yes)?;
    tracing::info!("Initialization complete!");
    tracing::info!("Run 'trellis dev' to start the preview server.");
    Ok(())
}

fn scaffold(root: &Path, config_path: &Path, yes: bool) -> Result<()> {
    let content_dir = root.join("content");

    if content_dir.exists() {
        if !yes {
            tracing::warn!("content/ directory already exists. Use --yes to overwrite.");
            return Ok(());
        }
    } else {
        fs::create_dir_all(&content_dir).context("Failed to create content directory")?;
    }

    let files = [
        (root.join(config_path), DEFAULT_CONFIG),
        (content_dir.join("index.json"), DEFAULT_INDEX),
        (content_dir.join(SYMBOLS_DIR).join("footer.json"), DEFAULT_FOOTER),
        (content_dir.join(DATA_DIR).join("products.json"), DEFAULT_PRODUCTS),
    ];

    for (path, contents) in files {
        if path.exists() && !yes {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Created {}", path.display());
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Trellis Configuration

[content]
# Directory of content documents
dir = "content"

# Document opened by `trellis dev`
file = "index.json"

# Editor model the preview accepts updates for
model = "page"

[render]
# locale = "en-US"
# api_key = "..."

# Evaluate blocks fresh on every render while editing
live_edit = true

# "static" renders every variant and picks one in the browser,
# "server" picks the winner while rendering
personalization = "static"

# Render a placeholder where a block fails instead of dropping it
error_placeholders = false

[context]
# Values available to expressions as `context.*`

[targeting.attributes]
# urlPath = "/"
# device = "desktop"

[build]
output = "dist"
# title = "My Site"

[server]
port = 7777
host = "127.0.0.1"
preview_cache_capacity = 500
# Editor hosts trusted in addition to the built-in ones
trusted_hosts = []
"#;

const DEFAULT_INDEX: &str = r#"{
  "id": "index",
  "name": "Home",
  "data": {
    "title": "Welcome to Trellis",
    "state": {
      "clicks": 0
    },
    "httpRequests": {
      "products": "/data/products.json"
    },
    "blocks": [
      {
        "id": "hero",
        "component": {
          "name": "Section",
          "options": { "maxWidth": 960 }
        },
        "children": [
          {
            "id": "headline",
            "component": { "name": "Text", "options": { "text": "<h1>Welcome to Trellis</h1>" } }
          },
          {
            "id": "counter",
            "component": { "name": "Button", "options": { "text": "Click me" } },
            "bindings": { "component.options.text": "'Clicked ' + state.clicks + ' times'" },
            "actions": { "click": "state.clicks = state.clicks + 1" }
          }
        ]
      },
      {
        "id": "product",
        "tagName": "div",
        "repeat": { "collection": "state.products.items", "itemName": "product" },
        "children": [
          {
            "id": "product-name",
            "component": { "name": "Text", "options": { "text": "" } },
            "bindings": { "component.options.text": "product.name" }
          }
        ]
      },
      {
        "id": "footer",
        "component": { "name": "Symbol", "options": { "symbol": { "entry": "footer" } } }
      }
    ]
  }
}
"#;

const DEFAULT_FOOTER: &str = r#"{
  "id": "footer",
  "data": {
    "blocks": [
      {
        "id": "footer-text",
        "tagName": "footer",
        "component": { "name": "Text", "options": { "text": "Built with trellis" } }
      }
    ]
  }
}
"#;

const DEFAULT_PRODUCTS: &str = r#"{
  "items": [
    { "name": "Trellis Tee" },
    { "name": "Trellis Mug" }
  ]
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;
    use trellis_core::Content;

    #[test]
    fn scaffolds_config_and_content() {
        let temp = tempdir().unwrap();
        scaffold(temp.path(), Path::new("trellis.toml"), false).unwrap();

        let config = Config::load(&temp.path().join("trellis.toml")).unwrap();
        assert_eq!(config.server.port, 7777);

        for file in ["index.json", "symbols/footer.json"] {
            let text = fs::read_to_string(temp.path().join("content").join(file)).unwrap();
            Content::from_json(&text).unwrap();
        }
        assert!(temp.path().join("content/data/products.json").is_file());
    }

    #[test]
    fn keeps_existing_content_without_yes() {
        let temp = tempdir().unwrap();
        let index = temp.path().join("content/index.json");
        fs::create_dir_all(index.parent().unwrap()).unwrap();
        fs::write(&index, "{}").unwrap();

        scaffold(temp.path(), Path::new("trellis.toml"), false).unwrap();
        assert_eq!(fs::read_to_string(&index).unwrap(), "{}");
        assert!(!temp.path().join("trellis.toml").exists());

        scaffold(temp.path(), Path::new("trellis.toml"), true).unwrap();
        assert!(fs::read_to_string(&index).unwrap().contains("Welcome to Trellis"));
    }
}
