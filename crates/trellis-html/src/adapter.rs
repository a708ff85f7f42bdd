//! Trait definitions for render adapters.

use trellis_core::RenderTree;

/// Errors that can occur while turning a render tree into output.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Invalid tag name '{tag}' on block {block_id}")]
    InvalidTag { block_id: String, tag: String },

    #[error("Failed to serialize options: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Turns a framework-neutral render tree into a concrete output format.
pub trait RenderAdapter: Send + Sync {
    /// Adapter identifier (e.g., "html")
    fn name(&self) -> &'static str;

    /// Render the tree's nodes.
    fn render(&self, tree: &RenderTree) -> Result<String, AdapterError>;
}
