//! Per-node resolution state shared by every flight of one engine
//!
//! Each node moves through `Unresolved -> InProgress -> Resolved | Failed`
//! exactly once. A flight that finds a node in progress on another flight
//! blocks until the owner completes it, unless the wait-for graph shows the
//! owner is (transitively) waiting on the caller.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::tree::NodeId;
use crate::value::Value;

/// Identifier of one top-level resolution request
pub type FlightId = u64;

static NEXT_FLIGHT: AtomicU64 = AtomicU64::new(1);

/// One top-level resolution request and the nodes it is evaluating
#[derive(Debug)]
pub struct Flight {
    id: FlightId,
    stack: Vec<NodeId>,
}

impl Flight {
    /// Start a new flight with a process-unique id
    pub fn new() -> Self {
        Self {
            id: NEXT_FLIGHT.fetch_add(1, Ordering::Relaxed),
            stack: Vec::new(),
        }
    }

    pub fn id(&self) -> FlightId {
        self.id
    }

    /// Nodes under evaluation, outermost first
    pub fn stack(&self) -> &[NodeId] {
        &self.stack
    }

    pub fn push(&mut self, node: NodeId) {
        self.stack.push(node);
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        self.stack.pop()
    }

    /// The stack from the first occurrence of `node`, closed with `node`
    fn chain_from(&self, node: NodeId) -> Option<Vec<NodeId>> {
        let pos = self.stack.iter().position(|n| *n == node)?;
        let mut chain = self.stack[pos..].to_vec();
        chain.push(node);
        Some(chain)
    }
}

impl Default for Flight {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolution state of one node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Unresolved,
    InProgress { flight: FlightId },
    Resolved(Value),
    Failed(Error),
}

/// Outcome of [`ResolutionCache::claim`]
#[derive(Debug)]
pub enum Claim {
    /// The node already has a terminal state
    Ready(Result<Value>),
    /// The caller now owns the node and must [`complete`](ResolutionCache::complete) it
    Owned,
    /// Evaluating the node would close a reference cycle; nodes in order,
    /// the first repeated at the end
    Cycle(Vec<NodeId>),
}

/// A flight blocked on a node owned by another flight
#[derive(Debug)]
struct Waiting {
    node: NodeId,
    stack: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct CacheState {
    nodes: HashMap<NodeId, NodeState>,
    waiting: HashMap<FlightId, Waiting>,
}

/// Node states plus the wait-for graph, behind one lock
#[derive(Debug, Default)]
pub struct ResolutionCache {
    state: Mutex<CacheState>,
    condvar: Condvar,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a node
    pub fn state(&self, node: NodeId) -> NodeState {
        self.state
            .lock()
            .nodes
            .get(&node)
            .cloned()
            .unwrap_or(NodeState::Unresolved)
    }

    /// Number of nodes with a terminal state
    pub fn completed(&self) -> usize {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|s| matches!(s, NodeState::Resolved(_) | NodeState::Failed(_)))
            .count()
    }

    /// Take ownership of a node, or obtain its result.
    ///
    /// Blocks while another flight owns the node.
    pub fn claim(&self, node: NodeId, flight: &Flight) -> Claim {
        let mut state = self.state.lock();
        loop {
            let owner = match state.nodes.get(&node) {
                None | Some(NodeState::Unresolved) => {
                    state
                        .nodes
                        .insert(node, NodeState::InProgress { flight: flight.id });
                    return Claim::Owned;
                }
                Some(NodeState::Resolved(value)) => return Claim::Ready(Ok(value.clone())),
                Some(NodeState::Failed(err)) => return Claim::Ready(Err(err.clone())),
                Some(NodeState::InProgress { flight: owner }) => *owner,
            };

            if owner == flight.id {
                let chain = flight.chain_from(node).unwrap_or_else(|| vec![node, node]);
                return Claim::Cycle(chain);
            }

            if let Some(chain) = deadlock_chain(&state, flight, node, owner) {
                return Claim::Cycle(chain);
            }

            log::trace!("Flight {} waiting on {} (owned by flight {})", flight.id, node, owner);
            state.waiting.insert(
                flight.id,
                Waiting {
                    node,
                    stack: flight.stack.clone(),
                },
            );
            self.condvar.wait(&mut state);
            state.waiting.remove(&flight.id);
        }
    }

    /// Store the terminal state of an owned node and wake waiters
    pub fn complete(&self, node: NodeId, result: &Result<Value>) {
        let terminal = match result {
            Ok(value) => NodeState::Resolved(value.clone()),
            Err(err) => NodeState::Failed(err.clone()),
        };
        self.state.lock().nodes.insert(node, terminal);
        self.condvar.notify_all();
    }
}

/// Follow `awaited -> owner -> node the owner waits on -> ...`.
///
/// Returns the node cycle if the walk reaches the caller's own stack.
fn deadlock_chain(
    state: &CacheState,
    flight: &Flight,
    node: NodeId,
    owner: FlightId,
) -> Option<Vec<NodeId>> {
    let mut segments = Vec::new();
    let mut visited = HashSet::new();
    let mut awaited = node;
    let mut current = owner;

    loop {
        if current == flight.id {
            let pos = flight.stack.iter().position(|n| *n == awaited)?;
            let mut chain = flight.stack[pos..].to_vec();
            chain.extend(segments);
            chain.push(awaited);
            return Some(chain);
        }
        if !visited.insert(current) {
            return None;
        }

        let waiting = state.waiting.get(&current)?;
        let pos = waiting.stack.iter().position(|n| *n == awaited)?;
        segments.extend_from_slice(&waiting.stack[pos..]);

        awaited = waiting.node;
        current = match state.nodes.get(&awaited) {
            Some(NodeState::InProgress { flight }) => *flight,
            _ => return None,
        };
    }
}
