//! Reference lookup over the document tree

use crate::error::{Error, Result};
use crate::interpolation::{Anchor, PathReference};
use crate::tree::{NodeId, NodeKind, Tree};
use crate::value::PathSegment;

/// Find the node a reference points at, as seen from `origin`.
///
/// Relative references start in the mapping or sequence that holds `origin`
/// and climb one level per extra leading `.`. For a top-level key the
/// enclosing scope is already the root, so a second `.` stays there.
pub fn resolve_path(tree: &Tree, reference: &PathReference, origin: NodeId) -> Result<NodeId> {
    let start = match reference.anchor {
        Anchor::Root => tree.root(),
        Anchor::Relative { ascension } => ascend(tree, origin, ascension)?,
    };
    descend(tree, start, &reference.segments)
}

fn ascend(tree: &Tree, origin: NodeId, ascension: usize) -> Result<NodeId> {
    let Some(scope) = tree.parent(origin) else {
        return Err(Error::out_of_bounds(ascension, 0));
    };

    let available = tree.node(scope).depth;
    if available == 0 && ascension <= 1 {
        return Ok(scope);
    }
    if ascension > available {
        return Err(Error::out_of_bounds(ascension, available));
    }

    let mut node = scope;
    for _ in 0..ascension {
        match tree.parent(node) {
            Some(parent) => node = parent,
            None => return Err(Error::out_of_bounds(ascension, available)),
        }
    }
    Ok(node)
}

fn descend(tree: &Tree, start: NodeId, segments: &[PathSegment]) -> Result<NodeId> {
    let mut node = start;
    let mut walked = String::new();

    for segment in segments {
        match segment {
            PathSegment::Key(key) => {
                if !walked.is_empty() {
                    walked.push('.');
                }
                walked.push_str(key);
            }
            PathSegment::Index(i) => walked.push_str(&format!("[{}]", i)),
        }

        if let NodeKind::Scalar(_) = tree.node(node).kind {
            return Err(Error::not_indexable(walked));
        }
        node = tree
            .child(node, segment)
            .ok_or_else(|| Error::path_not_found(walked.clone()))?;
    }

    Ok(node)
}
