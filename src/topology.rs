//! Topology edits: detach, attach, swap and random prune-and-regraft.
//!
//! All operators keep the tree strictly binary and leave it untouched when
//! they return an error.
//!
//! ```text
//! detach(X):                         attach(T, X), T internal:
//!
//!       G                 G                T                T
//!       |                 |               / \              / \
//!       P        ->       S   +  X       a   b    ->   W:0.0   X
//!      / \              (t_P + t_S)                    / \
//!     X   S                                           a   b
//! ```
//!
//! Attaching to a leaf inserts a new node halfway along the leaf's edge:
//!
//! ```text
//!     P                 P
//!     |  t              |  t/2
//!     L       ->        N
//!                      / \
//!               t/2   L   X
//! ```

use crate::error::{StructureError, TopologyError};
use crate::tree::{Likelihoods, Node, NodeId, NodeKind, Tree};
use log::trace;
use rand::seq::SliceRandom;
use rand::Rng;

/// Where a detached subtree used to hang, enough to undo the detach exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct GraftSite {
    /// The former sibling, promoted into the removed parent's place.
    pub sibling: NodeId,
    /// Slot (0 or 1) the subtree occupied under its parent.
    pub slot: usize,
    pub parent_label: Option<String>,
    pub parent_length: Option<f64>,
    pub sibling_length: Option<f64>,
}

/// Result of [`Tree::detach_subtree`].
#[derive(Debug, Clone, PartialEq)]
pub struct Detached {
    /// Root of the remaining tree, possibly a new one.
    pub root: NodeId,
    /// Root of the removed subtree. Its nodes stay in the arena.
    pub subtree: NodeId,
    pub site: GraftSite,
}

impl Tree {
    /// Create a leaf that is not part of the tree yet, ready for [`Tree::attach`].
    ///
    /// # Errors
    /// [`StructureError::NegativeBranchLength`] or [`StructureError::StateOutOfRange`].
    pub fn new_leaf(
        &mut self,
        label: impl Into<String>,
        branch_length: f64,
        state: Option<usize>,
    ) -> Result<NodeId, StructureError> {
        let label = label.into();
        if branch_length < 0.0 {
            return Err(StructureError::NegativeBranchLength {
                node: label,
                length: branch_length,
            });
        }
        let likelihoods = match state {
            Some(state) if state >= self.n_states => {
                return Err(StructureError::StateOutOfRange {
                    state,
                    n_states: self.n_states,
                });
            }
            Some(state) => Likelihoods::one_hot(state, self.n_states),
            None => Likelihoods::uncomputed(self.n_states),
        };

        Ok(self.alloc(Node {
            parent: None,
            branch_length: Some(branch_length),
            kind: NodeKind::Leaf { label, state },
            likelihoods,
        }))
    }

    /// Remove the subtree rooted at `node` and collapse its former parent.
    ///
    /// The sibling takes the parent's place (same slot under the grandparent)
    /// with branch length `t_parent + t_sibling`. If the parent was the root,
    /// the sibling becomes the new root. Returns the root of the remaining tree.
    ///
    /// # Errors
    /// [`TopologyError::CannotDetachRoot`] or [`TopologyError::NotMember`].
    pub fn detach(&mut self, node: NodeId) -> Result<NodeId, TopologyError> {
        Ok(self.detach_subtree(node)?.root)
    }

    /// Same as [`Tree::detach`], also returning what [`Tree::reattach`] needs to undo it.
    pub fn detach_subtree(&mut self, node: NodeId) -> Result<Detached, TopologyError> {
        if !self.contains(node) {
            return Err(TopologyError::NotMember(node));
        }
        let Some(parent) = self.get(node).parent else {
            return Err(TopologyError::CannotDetachRoot);
        };

        let slot = self.child_slot(parent, node);
        let sibling = self.get(parent).children()[1 - slot];
        let parent_node = self.get(parent);
        let grandparent = parent_node.parent;
        let site = GraftSite {
            sibling,
            slot,
            parent_label: parent_node.label().map(str::to_string),
            parent_length: parent_node.branch_length,
            sibling_length: self.get(sibling).branch_length,
        };

        match grandparent {
            Some(g) => {
                self.replace_child(g, parent, sibling);
                let length = site.parent_length.unwrap_or(0.0) + site.sibling_length.unwrap_or(0.0);
                let s = self.get_mut(sibling);
                s.parent = Some(g);
                s.branch_length = Some(length);
            }
            None => {
                let s = self.get_mut(sibling);
                s.parent = None;
                s.branch_length = None;
                self.root = sibling;
            }
        }
        self.get_mut(node).parent = None;
        self.release(parent);

        trace!("Detached node {node}, sibling {sibling} promoted");
        Ok(Detached {
            root: self.root,
            subtree: node,
            site,
        })
    }

    /// Undo [`Tree::detach_subtree`]: re-create the collapsed parent with its
    /// label and length and put the subtree back in its original slot.
    pub fn reattach(&mut self, detached: &Detached) -> Result<NodeId, TopologyError> {
        let subtree = detached.subtree;
        let site = &detached.site;
        self.check_detached(subtree)?;
        if !self.contains(site.sibling) {
            return Err(TopologyError::NotMember(site.sibling));
        }

        let grandparent = self.get(site.sibling).parent;
        let children = if site.slot == 0 {
            [subtree, site.sibling]
        } else {
            [site.sibling, subtree]
        };
        let n_states = self.n_states;
        let parent = self.alloc(Node {
            parent: grandparent,
            branch_length: site.parent_length,
            kind: NodeKind::Internal {
                label: site.parent_label.clone(),
                children,
            },
            likelihoods: Likelihoods::uncomputed(n_states),
        });

        match grandparent {
            Some(g) => self.replace_child(g, site.sibling, parent),
            None => self.root = parent,
        }
        let s = self.get_mut(site.sibling);
        s.parent = Some(parent);
        s.branch_length = site.sibling_length;
        self.get_mut(subtree).parent = Some(parent);

        Ok(self.root)
    }

    /// Graft the detached `subtree` at `target`. Returns the root.
    ///
    /// An internal target keeps its place: a new node `W` (length `0.0`) takes
    /// over its two children and the target's children become `[W, subtree]`.
    /// A leaf target is split instead, see the module docs.
    ///
    /// # Errors
    /// - [`TopologyError::NotMember`] if `target` is not in the tree.
    /// - [`TopologyError::NotDetached`] if `subtree` still hangs somewhere.
    /// - [`TopologyError::DuplicateLabel`] if a leaf label would occur twice.
    pub fn attach(&mut self, target: NodeId, subtree: NodeId) -> Result<NodeId, TopologyError> {
        if !self.contains(target) {
            return Err(TopologyError::NotMember(target));
        }
        self.check_detached(subtree)?;

        let existing = self.leaf_labels();
        if let Some(label) = self
            .subtree_leaf_labels(subtree)
            .into_iter()
            .find(|label| existing.contains(label))
        {
            return Err(TopologyError::DuplicateLabel(label));
        }

        let n_states = self.n_states;
        let target_kind = self.get(target).kind.clone();
        match target_kind {
            NodeKind::Internal { children, .. } => {
                let w = self.alloc(Node {
                    parent: Some(target),
                    branch_length: Some(0.0),
                    kind: NodeKind::Internal {
                        label: None,
                        children,
                    },
                    likelihoods: Likelihoods::uncomputed(n_states),
                });
                for child in children {
                    self.get_mut(child).parent = Some(w);
                }
                if let NodeKind::Internal { children, .. } = &mut self.get_mut(target).kind {
                    *children = [w, subtree];
                }
                self.hang(subtree, target);
            }
            NodeKind::Leaf { .. } => {
                let parent = self.get(target).parent;
                let half = self.get(target).branch_length.map(|t| t / 2.0);
                let n = self.alloc(Node {
                    parent,
                    branch_length: half,
                    kind: NodeKind::Internal {
                        label: None,
                        children: [target, subtree],
                    },
                    likelihoods: Likelihoods::uncomputed(n_states),
                });
                match parent {
                    Some(p) => self.replace_child(p, target, n),
                    None => self.root = n,
                }
                let t = self.get_mut(target);
                t.parent = Some(n);
                t.branch_length = Some(half.unwrap_or(0.0));
                self.hang(subtree, n);
            }
        }

        trace!("Attached subtree {subtree} at node {target}");
        Ok(self.root)
    }

    /// Exchange the positions of two nodes and their subtrees.
    ///
    /// Each node lands in the other's slot and keeps its own branch length.
    ///
    /// # Errors
    /// Swapping the root, a node with itself, two siblings, or a node with
    /// one of its ancestors is rejected.
    pub fn swap(&mut self, a: NodeId, b: NodeId) -> Result<(), TopologyError> {
        for id in [a, b] {
            if !self.contains(id) {
                return Err(TopologyError::NotMember(id));
            }
        }
        if a == b {
            return Err(TopologyError::SwapSelf(a));
        }
        let (Some(pa), Some(pb)) = (self.get(a).parent, self.get(b).parent) else {
            return Err(TopologyError::SwapRoot);
        };
        if pa == pb {
            return Err(TopologyError::SwapSiblings(a, b));
        }
        if self.is_ancestor(a, b) {
            return Err(TopologyError::SwapAncestor { node: b, ancestor: a });
        }
        if self.is_ancestor(b, a) {
            return Err(TopologyError::SwapAncestor { node: a, ancestor: b });
        }

        let slot_a = self.child_slot(pa, a);
        let slot_b = self.child_slot(pb, b);
        self.set_child(pa, slot_a, b);
        self.set_child(pb, slot_b, a);
        self.get_mut(a).parent = Some(pb);
        self.get_mut(b).parent = Some(pa);
        Ok(())
    }

    /// Random subtree prune-and-regraft.
    ///
    /// Picks a uniformly random non-root node, detaches it and attaches it at
    /// a uniformly random node of the remaining tree. Returns the root.
    pub fn prune_and_regraft<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<NodeId, TopologyError> {
        let root = self.root;
        let candidates: Vec<NodeId> = self
            .node_ids()
            .into_iter()
            .filter(|&id| id != root)
            .collect();
        let &node = candidates.choose(rng).ok_or(TopologyError::NothingToPrune)?;

        self.detach(node)?;
        let targets = self.node_ids();
        let &target = targets.choose(rng).ok_or(TopologyError::NothingToPrune)?;
        self.attach(target, node)
    }

    /// Drop a detached subtree and free its arena slots.
    pub fn discard(&mut self, subtree: NodeId) -> Result<(), TopologyError> {
        self.check_detached(subtree)?;
        for id in self.preorder(subtree) {
            self.release(id);
        }
        Ok(())
    }

    fn check_detached(&self, subtree: NodeId) -> Result<(), TopologyError> {
        match self.node(subtree) {
            None => Err(TopologyError::NotMember(subtree)),
            Some(node) if node.parent.is_some() || subtree == self.root => {
                Err(TopologyError::NotDetached(subtree))
            }
            Some(_) => Ok(()),
        }
    }

    /// Link a detached subtree under `parent`. A subtree without length gets `0.0`.
    fn hang(&mut self, subtree: NodeId, parent: NodeId) {
        let node = self.get_mut(subtree);
        node.parent = Some(parent);
        node.branch_length.get_or_insert(0.0);
    }

    fn child_slot(&self, parent: NodeId, child: NodeId) -> usize {
        if self.get(parent).children()[0] == child { 0 } else { 1 }
    }

    fn set_child(&mut self, parent: NodeId, slot: usize, child: NodeId) {
        if let NodeKind::Internal { children, .. } = &mut self.get_mut(parent).kind {
            children[slot] = child;
        }
    }

    fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let slot = self.child_slot(parent, old);
        self.set_child(parent, slot, new);
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{StructureError, TopologyError};
    use crate::traits::TraitData;
    use crate::tree::tests::{tips, NEWICK};
    use crate::tree::Tree;
    use itertools::Itertools;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_isaac::Isaac64Rng;

    const SWAPPED: &str = "((((D:0.5,E:0.5),C:1.5):1.0,(A:1.0,B:1.0):0.5):2.0,F:2.5)";

    fn fixture() -> Tree {
        Tree::from_newick(NEWICK, &tips()).unwrap()
    }

    fn parent_of(tree: &Tree, label: &str) -> usize {
        let leaf = tree.find_leaf(label).unwrap();
        tree.node(leaf).unwrap().parent().unwrap()
    }

    #[test]
    fn test_attach_to_internal_node() {
        let mut tree = fixture();
        let g = tree.new_leaf("G", 1.0, Some(0)).unwrap();
        let ab = parent_of(&tree, "A");
        tree.attach(ab, g).unwrap();

        assert!(tree.is_binary());
        assert_eq!(tree.n_leaves(), 7);
        assert_eq!(
            tree.to_newick(),
            "(((((A:1.0,B:1.0):0.0,G:1.0):0.5,C:1.5):1.0,(D:0.5,E:0.5):0.0):2.0,F:2.5);"
        );
    }

    #[test]
    fn test_attach_to_leaf_splits_edge() {
        let mut tree = fixture();
        let g = tree.new_leaf("G", 1.0, None).unwrap();
        let c = tree.find_leaf("C").unwrap();
        tree.attach(c, g).unwrap();

        assert!(tree.is_binary());
        assert_eq!(
            tree.to_newick(),
            "((((A:1.0,B:1.0):0.5,(C:0.75,G:1.0):0.75):1.0,(D:0.5,E:0.5):0.0):2.0,F:2.5);"
        );
    }

    fn single_leaf() -> (Tree, usize) {
        let traits = TraitData::new([("A", 0), ("B", 1)]).unwrap();
        let mut tree = Tree::from_newick("(A:1.0,B:1.0)", &traits).unwrap();
        let a = tree.find_leaf("A").unwrap();
        tree.detach(a).unwrap();
        (tree, a)
    }

    #[test]
    fn test_attach_to_root_leaf() {
        let (mut tree, a) = single_leaf();
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.to_newick(), "B;");

        let root = tree.attach(tree.root(), a).unwrap();
        assert_eq!(root, tree.root());
        assert!(tree.is_binary());
        assert_eq!(tree.to_newick(), "(B:0.0,A:1.0);");
    }

    #[test]
    fn test_attach_errors() {
        let mut tree = fixture();
        let a = tree.find_leaf("A").unwrap();
        let root = tree.root();

        let dup = tree.new_leaf("A", 1.0, Some(0)).unwrap();
        assert_eq!(
            tree.attach(root, dup),
            Err(TopologyError::DuplicateLabel("A".to_string()))
        );
        assert_eq!(tree.attach(root, a), Err(TopologyError::NotDetached(a)));
        assert_eq!(tree.attach(root, root), Err(TopologyError::NotDetached(root)));

        let g = tree.new_leaf("G", 1.0, Some(0)).unwrap();
        let bogus = tree.slots() + 5;
        assert_eq!(tree.attach(bogus, g), Err(TopologyError::NotMember(bogus)));
        assert_eq!(tree.attach(g, dup), Err(TopologyError::NotMember(g)));

        // Failed edits leave the tree untouched
        assert!(tree == fixture());
    }

    #[test]
    fn test_new_leaf_errors() {
        let mut tree = fixture();
        assert!(matches!(
            tree.new_leaf("G", -1.0, Some(0)),
            Err(StructureError::NegativeBranchLength { .. })
        ));
        assert_eq!(
            tree.new_leaf("G", 1.0, Some(3)),
            Err(StructureError::StateOutOfRange { state: 3, n_states: 3 })
        );
    }

    #[test]
    fn test_detach_leaf() {
        let mut tree = fixture();
        let a = tree.find_leaf("A").unwrap();
        let root = tree.detach(a).unwrap();

        assert_eq!(root, tree.root());
        assert!(tree.is_binary());
        assert!(!tree.contains(a));
        assert!(tree.node(a).unwrap().is_root());
        assert_eq!(
            tree.to_newick(),
            "(((B:1.5,C:1.5):1.0,(D:0.5,E:0.5):0.0):2.0,F:2.5);"
        );
    }

    #[test]
    fn test_detach_every_node() {
        let reference = fixture();
        let root = reference.root();
        for id in reference.node_ids().into_iter().filter(|&id| id != root) {
            let mut tree = fixture();
            let expected = tree.len() - tree.preorder(id).len() - 1;
            tree.detach(id).unwrap();
            assert!(tree.is_binary());
            assert_eq!(tree.len(), expected);
            assert!(!tree.contains(id));
        }
    }

    #[test]
    fn test_detach_child_of_root_changes_root() {
        let mut tree = fixture();
        let old_root = tree.root();
        let f = tree.find_leaf("F").unwrap();
        let root = tree.detach(f).unwrap();

        assert_ne!(root, old_root);
        assert_eq!(tree.node(root).unwrap().branch_length(), None);
        assert_eq!(
            tree.to_newick(),
            "(((A:1.0,B:1.0):0.5,C:1.5):1.0,(D:0.5,E:0.5):0.0);"
        );
    }

    #[test]
    fn test_detach_root() {
        let mut tree = fixture();
        let root = tree.root();
        assert_eq!(tree.detach(root), Err(TopologyError::CannotDetachRoot));
        assert_eq!(tree.root(), root);
        assert!(tree == fixture());
        assert_eq!(
            TopologyError::CannotDetachRoot.to_string(),
            "cannot detach root"
        );
    }

    #[test]
    fn test_detach_then_reattach_is_identity() {
        let reference = fixture();
        let root = reference.root();
        for id in reference.node_ids().into_iter().filter(|&id| id != root) {
            let mut tree = fixture();
            let detached = tree.detach_subtree(id).unwrap();
            tree.reattach(&detached).unwrap();
            assert!(tree.is_binary());
            assert_eq!(tree.to_newick(), reference.to_newick());
            assert!(tree == reference);
        }
    }

    #[test]
    fn test_swap() {
        let mut tree = fixture();
        let ab = parent_of(&tree, "A");
        let de = parent_of(&tree, "D");
        tree.swap(ab, de).unwrap();

        let swapped = Tree::from_newick(SWAPPED, &tips()).unwrap();
        assert!(tree.is_binary());
        assert!(tree == swapped);

        // Swapping back restores the original
        tree.swap(ab, de).unwrap();
        assert!(tree == fixture());
    }

    #[test]
    fn test_swap_errors() {
        let mut tree = fixture();
        let a = tree.find_leaf("A").unwrap();
        let b = tree.find_leaf("B").unwrap();
        let ab = parent_of(&tree, "A");
        let root = tree.root();

        assert_eq!(tree.swap(a, b), Err(TopologyError::SwapSiblings(a, b)));
        assert_eq!(tree.swap(root, a), Err(TopologyError::SwapRoot));
        assert_eq!(tree.swap(a, root), Err(TopologyError::SwapRoot));
        assert_eq!(tree.swap(a, a), Err(TopologyError::SwapSelf(a)));

        let abc = tree.node(ab).unwrap().parent().unwrap();
        assert_eq!(
            tree.swap(abc, a),
            Err(TopologyError::SwapAncestor { node: a, ancestor: abc })
        );
        assert!(tree == fixture());
    }

    #[test]
    fn test_swap_all_pairs_keeps_tree_binary() {
        let reference = fixture();
        for (a, b) in reference.node_ids().into_iter().tuple_combinations() {
            let mut tree = fixture();
            match tree.swap(a, b) {
                Ok(()) => {
                    assert!(tree.is_binary());
                    assert_eq!(tree.leaf_labels(), reference.leaf_labels());
                    assert_eq!(tree.len(), reference.len());
                }
                Err(_) => assert!(tree == reference),
            }
        }
    }

    #[test]
    fn test_prune_and_regraft() {
        let mut tree = fixture();
        let labels = tree.leaf_labels();
        let mut rng = Isaac64Rng::seed_from_u64(42);

        tree.prune_and_regraft(&mut rng).unwrap();
        let slots = tree.slots();
        for _ in 0..100 {
            let root = tree.prune_and_regraft(&mut rng).unwrap();
            assert_eq!(root, tree.root());
            assert!(tree.is_binary());
            assert_eq!(tree.leaf_labels(), labels);
            assert_eq!(tree.len(), 11);
            assert_eq!(tree.slots(), slots);
        }
    }

    #[test]
    fn test_prune_single_leaf() {
        let (mut tree, _) = single_leaf();
        let mut rng = Isaac64Rng::seed_from_u64(0);
        assert_eq!(
            tree.prune_and_regraft(&mut rng),
            Err(TopologyError::NothingToPrune)
        );
    }

    #[test]
    fn test_discard() {
        let mut tree = fixture();
        let ab = parent_of(&tree, "A");
        let a = tree.find_leaf("A").unwrap();
        tree.detach(ab).unwrap();
        tree.discard(ab).unwrap();

        assert!(tree.node(ab).is_none());
        assert!(tree.node(a).is_none());
        assert_eq!(tree.n_leaves(), 4);

        // Freed slots are reused
        let slots = tree.slots();
        let g = tree.new_leaf("G", 1.0, None).unwrap();
        assert!(g < slots);
        assert_eq!(tree.discard(tree.root()), Err(TopologyError::NotDetached(tree.root())));
    }
}
