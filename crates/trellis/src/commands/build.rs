//! Static site build command.

use std::path::PathBuf;

use anyhow::Result;
use trellis_core::Globals;
use trellis_html::{BuildConfig, StaticBuilder};

use crate::config::Config;

/// Run the build command.
pub async fn run(config: &Config, output: Option<PathBuf>) -> Result<()> {
    tracing::info!("Building static site...");

    let build_config = BuildConfig {
        content_dir: config.content.dir.clone(),
        output_dir: output.unwrap_or_else(|| config.build.output.clone()),
        title: config.build.title.clone(),
        locale: config.render.locale.clone(),
        context: config.context(),
        fetch_requests: true,
    };

    let renderer = config.renderer(Globals::default())?;

    // Rendering is CPU bound
    let result = tokio::task::spawn_blocking(move || StaticBuilder::new(build_config, renderer).build()).await??;

    tracing::info!(
        "Built {} pages with {} nodes in {}ms",
        result.pages,
        result.nodes,
        result.duration_ms
    );

    tracing::info!("Output: {}", result.output_dir.display());

    Ok(())
}
