//! Static site server command.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::services::ServeDir;

/// Run the serve command.
pub async fn run(port: u16, dir: PathBuf) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!(
            "Directory not found: {}. Run 'trellis build' first.",
            dir.display()
        );
    }

    let addr: SocketAddr = format!("127.0.0.1:{port}")
        .parse()
        .context("Invalid address")?;

    tracing::info!("Serving {} at http://{}", dir.display(), addr);

    let app = Router::new().fallback_service(ServeDir::new(&dir));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    if let Err(e) = open::that(format!("http://{addr}")) {
        tracing::debug!(error = %e, "Could not open browser");
    }

    axum::serve(listener, app).await?;

    Ok(())
}
