//! Binary phylogenetic tree with per-node state likelihoods.
//!
//! # Overview
//! Nodes live in an arena (`Vec<Option<Node>>`) and refer to each other by
//! [`NodeId`]. A node owns its children by id and keeps a plain id
//! back-reference to its parent, so there is no reference cycle and going up
//! the tree is O(1).
//!
//! ```text
//!            root (no branch length)
//!           /    \
//!       node1     F:2.5         node1.children == [node2, C]
//!       /   \                   node2.parent   == Some(node1)
//!   node2    C:1.5
//!   /   \
//!  A:1   B:1
//! ```
//!
//! # Invariants
//! - Internal nodes have exactly two children (`[NodeId; 2]`), so a non-binary
//!   node cannot be represented at all.
//! - Leaves carry a unique label; internal labels are optional.
//! - Every non-root node has a branch length `>= 0`; the root has none.
//! - `child.parent == Some(p)` exactly when `child` is in `p.children`.
//!
//! # Root identity
//! Topology edits may change which node is the root. Always ask
//! [`Tree::root`] instead of holding on to an old root id.

use crate::error::StructureError;
use crate::io::parse_newick;
use crate::traits::TraitData;
use log::warn;
use phylotree::tree::Tree as PhyloTree;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Write;

/// Index of a node in the tree's arena.
pub type NodeId = usize;

/// Per-state likelihood vector of a node.
///
/// Cells are `None` until assigned: tips get a one-hot vector when their
/// state is observed, internal nodes are filled by the pruning pass. An
/// uncomputed cell is never confused with a likelihood of `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Likelihoods(Vec<Option<f64>>);

impl Likelihoods {
    pub fn uncomputed(n_states: usize) -> Self {
        Likelihoods(vec![None; n_states])
    }

    /// `1.0` for the observed state, `0.0` for all others.
    pub fn one_hot(state: usize, n_states: usize) -> Self {
        Likelihoods(
            (0..n_states)
                .map(|s| Some(if s == state { 1.0 } else { 0.0 }))
                .collect(),
        )
    }

    pub fn computed(values: Vec<f64>) -> Self {
        Likelihoods(values.into_iter().map(Some).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, state: usize) -> Option<f64> {
        self.0.get(state).copied().flatten()
    }

    /// All cells, or `None` if any cell is still uncomputed.
    pub fn values(&self) -> Option<Vec<f64>> {
        if self.0.is_empty() {
            return None;
        }
        self.0.iter().copied().collect()
    }

    pub fn is_computed(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(Option::is_some)
    }
}

/// What a node is. A leaf cannot have children and an internal node cannot
/// carry an observed state.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Leaf {
        label: String,
        state: Option<usize>,
    },
    Internal {
        label: Option<String>,
        children: [NodeId; 2],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) branch_length: Option<f64>,
    pub(crate) kind: NodeKind,
    pub(crate) likelihoods: Likelihoods,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Leaf { label, .. } => Some(label),
            NodeKind::Internal { label, .. } => label.as_deref(),
        }
    }

    /// Distance to the parent, `None` only at the root.
    pub fn branch_length(&self) -> Option<f64> {
        self.branch_length
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in slot order; empty for leaves.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Leaf { .. } => &[],
            NodeKind::Internal { children, .. } => children,
        }
    }

    /// Observed state, only ever set on leaves.
    pub fn state(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::Leaf { state, .. } => *state,
            NodeKind::Internal { .. } => None,
        }
    }

    pub fn likelihoods(&self) -> &Likelihoods {
        &self.likelihoods
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted, strictly binary tree stored as an arena of nodes.
///
/// Freed slots (from collapsed parents or discarded subtrees) are recycled by
/// later allocations, so repeated prune-and-regraft does not grow the arena.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) free: Vec<NodeId>,
    pub(crate) root: NodeId,
    pub(crate) n_states: usize,
}

impl Tree {
    /// Translate a parsed Newick tree into a binary tree with tip states.
    ///
    /// # Algorithm
    /// 1. Walk the parsed tree in pre-order (explicit stack, child order kept)
    ///    and give every parsed node an arena index.
    /// 2. Check the shape: every node has 0 or 2 children, leaves are labeled
    ///    and unique, branch lengths are non-negative.
    /// 3. Leaves with an entry in `traits` get a one-hot likelihood vector of
    ///    length `traits.n_states()`; all other nodes start uncomputed.
    ///
    /// Missing branch lengths are read as `0.0`; a length on the root is dropped.
    ///
    /// # Errors
    /// Returns [`StructureError`] for non-binary shapes, unlabeled or duplicate
    /// leaves, negative lengths, or an empty state assignment. Nothing is repaired.
    pub fn from_parsed(parsed: &PhyloTree, traits: &TraitData) -> Result<Self, StructureError> {
        let n_states = traits.n_states();
        if n_states == 0 {
            return Err(StructureError::EmptyStateAssignment);
        }

        let parsed_root = parsed
            .get_root()
            .map_err(|e| StructureError::Parse(e.to_string()))?;

        // Step 1: pre-order numbering, remembering each node's arena parent
        let mut order: Vec<(usize, Option<NodeId>)> = Vec::new();
        let mut stack = vec![(parsed_root, None)];
        while let Some((parsed_id, parent)) = stack.pop() {
            let id = order.len();
            order.push((parsed_id, parent));
            let node = parsed
                .get(&parsed_id)
                .map_err(|e| StructureError::Parse(e.to_string()))?;
            for &child in node.children.iter().rev() {
                stack.push((child, Some(id)));
            }
        }
        let arena_index: HashMap<usize, NodeId> = order
            .iter()
            .enumerate()
            .map(|(id, &(parsed_id, _))| (parsed_id, id))
            .collect();

        // Step 2 and 3: build nodes in arena order
        let mut nodes = Vec::with_capacity(order.len());
        let mut leaf_labels: HashSet<String> = HashSet::new();
        for (id, &(parsed_id, parent)) in order.iter().enumerate() {
            let parsed_node = parsed
                .get(&parsed_id)
                .map_err(|e| StructureError::Parse(e.to_string()))?;
            let label = parsed_node.name.clone().filter(|name| !name.is_empty());
            let display = label.clone().unwrap_or_else(|| format!("#{id}"));

            let branch_length = match parent {
                None => None,
                Some(_) => {
                    let length = parsed_node.parent_edge.unwrap_or(0.0);
                    if length < 0.0 {
                        return Err(StructureError::NegativeBranchLength {
                            node: display,
                            length,
                        });
                    }
                    Some(length)
                }
            };

            let (kind, likelihoods) = match parsed_node.children.as_slice() {
                [] => {
                    let label = label.ok_or(StructureError::UnlabeledLeaf)?;
                    if !leaf_labels.insert(label.clone()) {
                        return Err(StructureError::DuplicateLabel(label));
                    }
                    let state = traits.state_of(&label);
                    let likelihoods = match state {
                        Some(state) => Likelihoods::one_hot(state, n_states),
                        None => Likelihoods::uncomputed(n_states),
                    };
                    (NodeKind::Leaf { label, state }, likelihoods)
                }
                [left, right] => (
                    NodeKind::Internal {
                        label,
                        children: [arena_index[left], arena_index[right]],
                    },
                    Likelihoods::uncomputed(n_states),
                ),
                other => {
                    return Err(StructureError::NotBinary {
                        node: display,
                        children: other.len(),
                    });
                }
            };

            nodes.push(Some(Node {
                parent,
                branch_length,
                kind,
                likelihoods,
            }));
        }

        for label in traits.labels() {
            if !leaf_labels.contains(label) {
                warn!("Trait data for {label:?} matches no leaf of the tree");
            }
        }

        Ok(Tree {
            nodes,
            free: Vec::new(),
            root: 0,
            n_states,
        })
    }

    /// Parse a Newick string and translate it, see [`Tree::from_parsed`].
    pub fn from_newick(newick: &str, traits: &TraitData) -> Result<Self, StructureError> {
        let parsed = parse_newick(newick)?;
        Self::from_parsed(&parsed, traits)
    }

    /// Current root. May change after a topology edit.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of discrete states of the model (length of every likelihood vector).
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Access a node by id. Detached nodes are still accessible; freed slots are not.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    /// Internal access for ids handed out by this arena.
    pub(crate) fn get(&self, id: NodeId) -> &Node {
        self.node(id).expect("valid node")
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes
            .get_mut(id)
            .and_then(Option::as_mut)
            .expect("valid node")
    }

    pub(crate) fn set_likelihoods(&mut self, id: NodeId, likelihoods: Likelihoods) {
        self.get_mut(id).likelihoods = likelihoods;
    }

    /// Store a node, reusing a freed slot if there is one.
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    pub(crate) fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            if slot.take().is_some() {
                self.free.push(id);
            }
        }
    }

    /// Number of arena slots, in use or free.
    pub(crate) fn slots(&self) -> usize {
        self.nodes.len()
    }

    /// True if `id` is reachable from the current root.
    pub fn contains(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            match self.node(current) {
                None => return false,
                Some(node) => match node.parent {
                    Some(parent) => current = parent,
                    None => return current == self.root,
                },
            }
        }
    }

    /// True if `ancestor` lies on the path from `node` up to its root (excluding `node`).
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.node(node).and_then(Node::parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).and_then(Node::parent);
        }
        false
    }

    /// Pre-order walk (node, first child subtree, second child subtree).
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if self.node(from).is_none() {
            return order;
        }
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id).children().iter().rev());
        }
        order
    }

    /// Breadth-first walk; every node comes after its parent.
    pub fn level_order(&self, from: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if self.node(from).is_none() {
            return order;
        }
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.get(id).children());
        }
        order
    }

    /// All nodes reachable from the root, in pre-order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.preorder(self.root)
    }

    /// Number of nodes reachable from the root.
    pub fn len(&self) -> usize {
        self.node_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.node(self.root).is_none()
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.node_ids()
            .into_iter()
            .filter(|&id| self.get(id).is_leaf())
            .collect()
    }

    pub fn n_leaves(&self) -> usize {
        self.leaves().len()
    }

    pub fn leaf_labels(&self) -> BTreeSet<String> {
        self.subtree_leaf_labels(self.root)
    }

    pub(crate) fn subtree_leaf_labels(&self, from: NodeId) -> BTreeSet<String> {
        self.preorder(from)
            .into_iter()
            .filter_map(|id| match &self.get(id).kind {
                NodeKind::Leaf { label, .. } => Some(label.clone()),
                NodeKind::Internal { .. } => None,
            })
            .collect()
    }

    pub fn find_leaf(&self, label: &str) -> Option<NodeId> {
        self.node_ids().into_iter().find(|&id| {
            matches!(&self.get(id).kind, NodeKind::Leaf { label: l, .. } if l.as_str() == label)
        })
    }

    /// Check the binary-tree invariants on everything reachable from the root:
    /// two distinct children per internal node, consistent parent links, no
    /// shared subtrees, a parentless root.
    pub fn is_binary(&self) -> bool {
        let Some(root) = self.node(self.root) else {
            return false;
        };
        if root.parent.is_some() {
            return false;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                return false;
            }
            let Some(node) = self.node(id) else {
                return false;
            };
            if let NodeKind::Internal { children, .. } = &node.kind {
                if children[0] == children[1] {
                    return false;
                }
                for &child in children {
                    match self.node(child) {
                        Some(c) if c.parent == Some(id) => stack.push(child),
                        _ => return false,
                    }
                }
            }
        }
        true
    }

    /// Order-sensitive structural equality.
    ///
    /// Walks both trees in pre-order and compares label, branch length and
    /// child count at every step. Child order is significant: `(A,B)` and
    /// `(B,A)` are different trees. Canonicalize first if order should not matter.
    pub fn structurally_equal(&self, other: &Tree) -> bool {
        let mut stack = vec![(self.root, other.root)];
        while let Some((a, b)) = stack.pop() {
            let (Some(na), Some(nb)) = (self.node(a), other.node(b)) else {
                return false;
            };
            if na.label() != nb.label()
                || na.branch_length != nb.branch_length
                || na.children().len() != nb.children().len()
            {
                return false;
            }
            stack.extend(na.children().iter().copied().zip(nb.children().iter().copied()));
        }
        true
    }

    /// Write the tree in Newick notation, e.g. `((A:1.0,B:1.0):0.5,C:1.5);`.
    ///
    /// Internal labels are written when present; the root carries no length.
    pub fn to_newick(&self) -> String {
        enum Step {
            Enter(NodeId),
            Separator,
            Close(NodeId),
        }

        let mut out = String::new();
        if self.is_empty() {
            out.push(';');
            return out;
        }

        let mut stack = vec![Step::Enter(self.root)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(id) => match &self.get(id).kind {
                    NodeKind::Leaf { label, .. } => {
                        out.push_str(label);
                        self.write_length(&mut out, id);
                    }
                    NodeKind::Internal { children, .. } => {
                        out.push('(');
                        stack.push(Step::Close(id));
                        stack.push(Step::Enter(children[1]));
                        stack.push(Step::Separator);
                        stack.push(Step::Enter(children[0]));
                    }
                },
                Step::Separator => out.push(','),
                Step::Close(id) => {
                    out.push(')');
                    if let Some(label) = self.get(id).label() {
                        out.push_str(label);
                    }
                    self.write_length(&mut out, id);
                }
            }
        }
        out.push(';');
        out
    }

    fn write_length(&self, out: &mut String, id: NodeId) {
        if let Some(length) = self.get(id).branch_length {
            // Writing to a String cannot fail
            let _ = write!(out, ":{length:?}");
        }
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal(other)
    }
}
