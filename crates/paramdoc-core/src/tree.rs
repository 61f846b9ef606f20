//! Arena of document nodes
//!
//! A [`Tree`] flattens a [`Value`] into nodes addressed by stable [`NodeId`]s.
//! Each node records its parent and the key or index it sits under, so the
//! ancestor chain and the dotted path of any node can be recovered without
//! walking from the root.

use indexmap::IndexMap;
use std::fmt;

use crate::value::{PathSegment, Value};

/// Stable handle to a node in a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Index of the node in the arena
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Contents of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A leaf value (never a Sequence or Mapping)
    Scalar(Value),
    /// Keyed children in document order
    Mapping(IndexMap<String, NodeId>),
    /// Positional children
    Sequence(Vec<NodeId>),
}

/// A node in the arena
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    /// Parent node, `None` for the root
    pub parent: Option<NodeId>,
    /// Key or index under which this node sits in its parent
    pub segment: Option<PathSegment>,
    /// Number of ancestors (0 for the root)
    pub depth: usize,
    /// Node contents
    pub kind: NodeKind,
}

impl ConfigNode {
    /// The scalar value, if this is a leaf
    pub fn scalar(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Check if this node is a leaf
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Scalar(_))
    }
}

/// Read-only arena of [`ConfigNode`]s
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<ConfigNode>,
}

impl Tree {
    /// Flatten a value into an arena. The root is always `NodeId` 0.
    pub fn from_value(value: Value) -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        tree.insert(value, None, None, 0);
        tree
    }

    fn insert(
        &mut self,
        value: Value,
        parent: Option<NodeId>,
        segment: Option<PathSegment>,
        depth: usize,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ConfigNode {
            parent,
            segment,
            depth,
            kind: NodeKind::Scalar(Value::Null),
        });

        let kind = match value {
            Value::Mapping(map) => {
                let mut children = IndexMap::with_capacity(map.len());
                for (key, child) in map {
                    let child_id =
                        self.insert(child, Some(id), Some(PathSegment::Key(key.clone())), depth + 1);
                    children.insert(key, child_id);
                }
                NodeKind::Mapping(children)
            }
            Value::Sequence(seq) => {
                let children = seq
                    .into_iter()
                    .enumerate()
                    .map(|(i, child)| {
                        self.insert(child, Some(id), Some(PathSegment::Index(i)), depth + 1)
                    })
                    .collect();
                NodeKind::Sequence(children)
            }
            scalar => NodeKind::Scalar(scalar),
        };
        self.nodes[id.index()].kind = kind;
        id
    }

    /// The root node
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has at least a root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow a node
    pub fn node(&self, id: NodeId) -> &ConfigNode {
        &self.nodes[id.index()]
    }

    /// Parent of a node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Child of a container by key or index.
    ///
    /// A key segment made of digits also indexes into a sequence.
    pub fn child(&self, id: NodeId, segment: &PathSegment) -> Option<NodeId> {
        match (&self.node(id).kind, segment) {
            (NodeKind::Mapping(map), PathSegment::Key(key)) => map.get(key).copied(),
            (NodeKind::Mapping(map), PathSegment::Index(i)) => map.get(&i.to_string()).copied(),
            (NodeKind::Sequence(seq), PathSegment::Index(i)) => seq.get(*i).copied(),
            (NodeKind::Sequence(seq), PathSegment::Key(key)) => {
                key.parse::<usize>().ok().and_then(|i| seq.get(i).copied())
            }
            (NodeKind::Scalar(_), _) => None,
        }
    }

    /// Ancestors of a node, nearest first
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Dotted path of a node (e.g., "train.stages[0].lr"); empty for the root
    pub fn path_of(&self, id: NodeId) -> String {
        let mut segments: Vec<&PathSegment> = std::iter::once(id)
            .chain(self.ancestors(id))
            .filter_map(|n| self.node(n).segment.as_ref())
            .collect();
        segments.reverse();

        let mut path = String::new();
        for segment in segments {
            match segment {
                PathSegment::Key(key) => {
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(key);
                }
                PathSegment::Index(i) => {
                    path.push_str(&format!("[{}]", i));
                }
            }
        }
        path
    }

    /// Look up a node by absolute dotted path
    pub fn lookup(&self, path: &str) -> crate::error::Result<NodeId> {
        let segments = crate::value::parse_path(path)?;
        segments.iter().try_fold(self.root(), |node, segment| {
            self.child(node, segment)
                .ok_or_else(|| crate::error::Error::path_not_found(path))
        })
    }

    /// All leaves in document order
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_leaves(self.root(), &mut out);
        out
    }

    /// Leaves below (and including) a node, in document order
    pub fn leaves_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_leaves(id, &mut out);
        out
    }

    fn collect_leaves(&self, id: NodeId, out: &mut Vec<NodeId>) {
        match &self.node(id).kind {
            NodeKind::Scalar(_) => out.push(id),
            NodeKind::Mapping(map) => {
                for child in map.values() {
                    self.collect_leaves(*child, out);
                }
            }
            NodeKind::Sequence(seq) => {
                for child in seq {
                    self.collect_leaves(*child, out);
                }
            }
        }
    }

    /// Rebuild a value for the subtree at `id`, taking leaves from `leaf`
    pub fn rebuild<E>(
        &self,
        id: NodeId,
        leaf: &mut impl FnMut(NodeId, &Value) -> std::result::Result<Value, E>,
    ) -> std::result::Result<Value, E> {
        match &self.node(id).kind {
            NodeKind::Scalar(v) => leaf(id, v),
            NodeKind::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, child) in map {
                    out.insert(key.clone(), self.rebuild(*child, leaf)?);
                }
                Ok(Value::Mapping(out))
            }
            NodeKind::Sequence(seq) => seq
                .iter()
                .map(|child| self.rebuild(*child, leaf))
                .collect::<std::result::Result<Vec<_>, E>>()
                .map(Value::Sequence),
        }
    }

    /// The raw (unresolved) value of the subtree at `id`
    pub fn to_value(&self, id: NodeId) -> Value {
        let mut raw = |_: NodeId, v: &Value| Ok::<_, std::convert::Infallible>(v.clone());
        match self.rebuild(id, &mut raw) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}
