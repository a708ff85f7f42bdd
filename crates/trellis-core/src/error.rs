//! Error types for block processing and rendering.
//!
//! None of these are fatal to a render pass. Each is caught at the boundary
//! that owns it, logged, and replaced by a fallback.

/// A binding result could not be written into the processed block.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingPathError {
    #[error("Empty binding path")]
    Empty,

    #[error("Cannot write '{path}': '{segment}' is not an object or array")]
    NotAContainer { path: String, segment: String },

    #[error("Cannot write '{path}': '{segment}' is not a valid array index")]
    InvalidIndex { path: String, segment: String },

    #[error("Binding '{path}' produced an invalid block: {message}")]
    InvalidBlock { path: String, message: String },
}

/// A block subtree failed to render. Siblings are unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("Maximum block depth {0} exceeded")]
    DepthExceeded(usize),

    #[error("Symbol nesting deeper than {depth} at block {block_id}")]
    SymbolRecursion { block_id: String, depth: usize },

    #[error("Invalid options for {component} in block {block_id}: {message}")]
    InvalidOptions {
        block_id: String,
        component: String,
        message: String,
    },
}

/// A content document could not be read or merged.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid content JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Content update must be a JSON object")]
    NotAnObject,
}

/// An editor message could not be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("Malformed editor message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message from untrusted origin: {0}")]
    UntrustedOrigin(String),

    #[error(transparent)]
    Content(#[from] ContentError),
}

/// An HTTP-bound binding could not be fetched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Unsupported URL: {0}")]
    Unsupported(String),

    #[error("Refusing to read outside the content root: {0}")]
    OutsideRoot(String),

    #[error("Request to {url} failed: {message}")]
    Failed { url: String, message: String },
}
