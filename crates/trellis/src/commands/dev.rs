//! Live-edit preview server command.

use anyhow::Result;
use trellis_core::Globals;
use trellis_server::{DevServer, DevServerConfig};

use crate::config::Config;

/// Run the dev server.
pub async fn run(config: &Config, port: Option<u16>, open: bool) -> Result<()> {
    let content_path = config.content.dir.join(&config.content.file);
    if !content_path.is_file() {
        anyhow::bail!(
            "Content document not found: {}. Run 'trellis init' first.",
            content_path.display()
        );
    }

    let port = port.unwrap_or(config.server.port);
    tracing::info!("Starting preview server on port {}", port);

    let globals = Globals {
        is_editing: config.render.live_edit,
        is_previewing: true,
    };
    let symbols_dir = config.symbols_dir();

    let server_config = DevServerConfig {
        content_path,
        symbols_dir: symbols_dir.is_dir().then_some(symbols_dir),
        port,
        host: config.server.host.clone(),
        open,
        mount: config.editor_mount_options(),
        preview_cache_capacity: config.server.preview_cache_capacity,
        site_title: config.build.title.clone(),
    };

    DevServer::new(server_config, config.renderer(globals)?).start().await?;

    Ok(())
}
