//! Component-specific block normalization, applied before bindings.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Block;
use crate::registry::ComponentRegistry;

/// Reshapes a block of a particular component type.
pub trait BlockTransform: Send + Sync {
    /// Rewrite `block` in place. `block` has no children of its own unless
    /// an earlier transform added some; `source_children` are the authored
    /// ones.
    fn transform(&self, block: &mut Block, source_children: &[Block]);
}

/// Synthesizes a component's default children for blocks authored without
/// any.
pub struct DefaultChildren {
    children: Vec<Block>,
}

impl DefaultChildren {
    pub fn new(children: Vec<Block>) -> Self {
        Self { children }
    }
}

impl BlockTransform for DefaultChildren {
    fn transform(&self, block: &mut Block, source_children: &[Block]) {
        if !source_children.is_empty() || !block.children.is_empty() {
            return;
        }
        block.children = self
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| {
                let mut child = child.clone();
                if child.id.is_empty() {
                    child.id = format!("{}-default-{i}", block.id);
                }
                child
            })
            .collect();
    }
}

/// Transforms keyed by component name.
#[derive(Default, Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, Vec<Arc<dyn BlockTransform>>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default-children transforms for every registered component that
    /// declares some.
    pub fn from_components(components: &ComponentRegistry) -> Self {
        let mut registry = Self::new();
        for name in components.names() {
            if let Some(component) = components.resolve(name) {
                if !component.default_children.is_empty() {
                    registry.add(
                        name,
                        DefaultChildren::new(component.default_children.clone()),
                    );
                }
            }
        }
        registry
    }

    pub fn add(&mut self, component: &str, transform: impl BlockTransform + 'static) {
        self.transforms
            .entry(component.to_string())
            .or_default()
            .push(Arc::new(transform));
    }

    /// Run every transform registered for the block's component.
    /// Returns whether any applied.
    pub fn apply(&self, block: &mut Block, source_children: &[Block]) -> bool {
        let Some(name) = block.component_name() else {
            return false;
        };
        let Some(transforms) = self.transforms.get(name).cloned() else {
            return false;
        };
        for transform in transforms {
            transform.transform(block, source_children);
        }
        true
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("components", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}
