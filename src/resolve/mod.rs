//! Upstream text resolution.
//!
//! Given a link `(node, slot)`, find the literal text it ultimately carries
//! and the exact place that text lives, so a translation can be written back
//! without touching the link itself. Node graphs come from many third-party
//! node packs with no shared schema, so resolution is an ordered list of
//! [`ExtractionStrategy`] heuristics where the first hit wins.
//!
//! Resolution is read-only, never panics on malformed payloads, and is
//! bounded by a visited set (cycles) and a maximum link depth.

mod strategy;

pub use strategy::{ExtractionStrategy, is_combining_node};

use std::collections::HashSet;
use tracing::trace;

use crate::graph::{FieldPath, Graph, Link, Node, NodeId};

/// Links followed from the first one before giving up.
pub const MAX_DEPTH: usize = 10;

/// How a text was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionKind {
    /// A string stored as-is (output, property or input field).
    Direct,
    /// A string field pulled out of an output object.
    ExtractedObject,
    /// Fragments of a text-combining node joined with a space.
    Combined,
    /// The node's display title.
    Title,
}

/// Text found behind a link, and where it is stored.
///
/// For [`ExtractionKind::Combined`] there is no single stored string;
/// `field` then names the combining node's output slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSource {
    pub text: String,
    pub source_node: NodeId,
    pub field: FieldPath,
    pub kind: ExtractionKind,
}

impl TextSource {
    pub(crate) fn new(
        node: &Node<'_>,
        text: &str,
        field: FieldPath,
        kind: ExtractionKind,
    ) -> Self {
        Self {
            text: text.to_string(),
            source_node: node.id().to_string(),
            field,
            kind,
        }
    }
}

/// State of one resolution chain.
pub(crate) struct Walk<'g> {
    graph: &'g Graph,
    visited: HashSet<NodeId>,
}

impl<'g> Walk<'g> {
    fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            visited: HashSet::new(),
        }
    }
}

pub struct GraphTextResolver {
    strategies: Vec<ExtractionStrategy>,
    max_depth: usize,
}

impl Default for GraphTextResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphTextResolver {
    pub fn new() -> Self {
        Self {
            strategies: ExtractionStrategy::ORDER.to_vec(),
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Text behind `link`, or `None` when nothing usable is found.
    pub fn resolve(&self, graph: &Graph, link: &Link) -> Option<TextSource> {
        self.resolve_at(graph, link, 0)
    }

    /// Like [`resolve`](Self::resolve) for a chain already `depth` links deep.
    pub fn resolve_at(&self, graph: &Graph, link: &Link, depth: usize) -> Option<TextSource> {
        let mut walk = Walk::new(graph);
        self.follow(&mut walk, link, depth)
    }

    /// Combined text of `link`'s source when it is a text-combining node.
    pub fn resolve_combined(&self, graph: &Graph, link: &Link) -> Option<TextSource> {
        let node = graph.node(&link.source)?;
        if !is_combining_node(node.class_type()) {
            return None;
        }
        let mut walk = Walk::new(graph);
        walk.visited.insert(link.source.clone());
        ExtractionStrategy::Combining.try_extract(self, &mut walk, node, link.slot, 0)
    }

    pub(crate) fn follow(
        &self,
        walk: &mut Walk<'_>,
        link: &Link,
        depth: usize,
    ) -> Option<TextSource> {
        if depth > self.max_depth {
            trace!(node = %link.source, depth, "resolution depth exceeded");
            return None;
        }
        let graph = walk.graph;
        let node = graph.node(&link.source)?;
        if !walk.visited.insert(link.source.clone()) {
            trace!(node = %link.source, "cycle in resolution chain");
            return None;
        }

        let found = self.extract(walk, node, link.slot, depth);

        walk.visited.remove(&link.source);
        found
    }

    fn extract(
        &self,
        walk: &mut Walk<'_>,
        node: Node<'_>,
        slot: usize,
        depth: usize,
    ) -> Option<TextSource> {
        for strategy in &self.strategies {
            let found = strategy.try_extract(self, walk, node, slot, depth);
            if found.is_some() || strategy.claims(&node) {
                if let Some(source) = &found {
                    trace!(
                        node = node.id(),
                        strategy = ?strategy,
                        kind = ?source.kind,
                        "text resolved"
                    );
                }
                return found;
            }
        }
        None
    }
}
