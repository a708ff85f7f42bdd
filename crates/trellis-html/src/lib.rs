//! HTML rendering for trellis content.
//!
//! Turns render trees into HTML fragments and full pages, and builds a
//! static site from a directory of content documents.

pub mod adapter;
pub mod builder;
pub mod html;
pub mod templates;

pub use adapter::{AdapterError, RenderAdapter};
pub use builder::{
    load_symbols, BuildConfig, BuildError, BuildResult, ManifestEntry, StaticBuilder, DATA_DIR,
    SYMBOLS_DIR,
};
pub use html::{escape_html, Breakpoints, HtmlAdapter};
pub use templates::{PageContext, TemplateEngine};
