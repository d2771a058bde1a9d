//! Dotted-name lookup tree
//!
//! Model names may be dotted (`admin.User`), producing a nested-mapping path.
//! Assignment is first-write-wins at every segment: an existing branch or
//! leaf is never overwritten and collisions are silently kept. The hard
//! duplicate-name failure lives in the registry, not here.

use std::collections::HashMap;
use std::sync::Arc;

use loam_orm::BoundModel;

/// Node in the model name tree.
#[derive(Debug)]
pub enum ModelNode {
    Branch(HashMap<String, ModelNode>),
    Model(Arc<BoundModel>),
}

/// Name-to-model lookup tree, navigable by dotted path.
#[derive(Debug, Default)]
pub struct ModelTree {
    root: HashMap<String, ModelNode>,
    len: usize,
}

impl ModelTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `model` under `name`, creating intermediate branches on
    /// demand. First write wins per segment; nothing is overwritten.
    pub fn assign(&mut self, name: &str, model: Arc<BoundModel>) {
        let mut segments = name.split('.').peekable();
        let mut current = &mut self.root;
        let mut inserted = false;
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            let entry = current.entry(segment.to_string()).or_insert_with(|| {
                if last {
                    inserted = true;
                    ModelNode::Model(Arc::clone(&model))
                } else {
                    ModelNode::Branch(HashMap::new())
                }
            });
            match entry {
                ModelNode::Branch(children) => current = children,
                // A leaf on the path ends the walk; remaining segments, if
                // any, are dropped the same way a leaf collision is.
                ModelNode::Model(_) => break,
            }
        }
        if inserted {
            self.len += 1;
        }
    }

    /// True when `path` reaches any node, branch or leaf.
    pub fn contains(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    /// Look up a model by dotted path. Branches yield `None`.
    pub fn get(&self, path: &str) -> Option<&Arc<BoundModel>> {
        match self.node(path)? {
            ModelNode::Model(model) => Some(model),
            ModelNode::Branch(_) => None,
        }
    }

    fn node(&self, path: &str) -> Option<&ModelNode> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self.root.get(first)?;
        for segment in segments {
            match node {
                ModelNode::Branch(children) => node = children.get(segment)?,
                ModelNode::Model(_) => return None,
            }
        }
        Some(node)
    }

    /// Number of names assigned, counting aliases.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
