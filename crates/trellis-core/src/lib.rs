//! Trellis Core - content processing pipeline
//!
//! Turns authored content documents into framework-neutral render trees:
//! bindings are evaluated against reactive state, repeats are expanded,
//! personalization variants are selected and symbols are nested with their
//! own scopes.

pub mod document;
pub mod editor;
pub mod error;
pub mod http;
pub mod localize;
pub mod model;
pub mod preview;
pub mod processor;
pub mod registry;
pub mod renderer;
pub mod repeat;
pub mod scope;
pub mod store;
pub mod targeting;
pub mod transform;

pub use document::{Document, EditorEffect, MountOptions};
pub use editor::{EditorMessage, EditorSession};
pub use error::{BindingPathError, ContentError, EditorError, FetchError, RenderError};
pub use http::{FileFetcher, Fetcher, PendingRequest};
pub use model::{Block, ComponentRef, Content, Query, Repeat, Variant};
pub use preview::{PreviewCache, DEFAULT_PREVIEW_CAPACITY};
pub use processor::{is_showable, BlockProcessor};
pub use registry::{ComponentRegistry, RegisteredComponent};
pub use renderer::{
    NodeKind, PersonalizationMode, RenderNode, RenderOptions, RenderTree, Renderer, SymbolLibrary,
    SymbolResolver,
};
pub use scope::{Scope, StateMap};
pub use store::{StateHandle, StateStore};
pub use targeting::{filter_variants, matches, UserAttributes};
pub use transform::{BlockTransform, TransformRegistry};

pub use trellis_expr::{Evaluator, Globals};

use std::sync::Arc;

/// A renderer over the built-in components with a fresh evaluator.
pub fn default_renderer(globals: Globals) -> Renderer {
    let registry = ComponentRegistry::with_defaults();
    let transforms = TransformRegistry::from_components(&registry);
    let processor = BlockProcessor::new(Arc::new(Evaluator::new(globals)), transforms);
    Renderer::new(Arc::new(processor), Arc::new(registry))
}
