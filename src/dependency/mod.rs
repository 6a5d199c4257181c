//! Dependency forest: path constraints clustered by the input bytes they touch
//!
//! Every input index maps to the tree currently responsible for it. Adding a
//! constraint merges all trees its dependencies reach, so distinct trees
//! always have disjoint dependency sets. This is a union-find over input
//! indices where the compression happens eagerly at merge time: after a merge
//! every slot of the absorbed tree already points at the survivor.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

/// Input-byte indices an expression transitively reads
pub type DependencySet = BTreeSet<usize>;

/// Largest input index the forest allocates a slot for (16 MiB inputs)
pub const MAX_INDEX: usize = (1 << 24) - 1;

/// Handle to a live tree inside a [`DependencyForest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(usize);

/// A cluster of constraint nodes sharing, transitively, input dependencies
#[derive(Debug, Clone)]
pub struct DependencyTree<T> {
    nodes: Vec<T>,
    deps: DependencySet,
}

impl<T> Default for DependencyTree<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            deps: DependencySet::new(),
        }
    }
}

impl<T> DependencyTree<T> {
    pub fn add_node(&mut self, node: T, deps: &DependencySet) {
        self.nodes.push(node);
        self.deps.extend(deps.iter().copied());
    }

    /// Absorb every node and dependency of `other`
    pub fn merge(&mut self, other: DependencyTree<T>) {
        self.nodes.extend(other.nodes);
        self.deps.extend(other.deps);
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.deps
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Summary of the forest layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForestStats {
    /// Distinct live trees reachable from the slots
    pub unique_trees: usize,
    /// Slots allocated (largest index seen + 1)
    pub allocated_slots: usize,
    /// Unique trees per allocated slot
    pub sparsity: f64,
    /// Indices that have a tree
    pub covered: DependencySet,
}

/// Lazily grown map from input index to the tree owning it
#[derive(Debug, Clone)]
pub struct DependencyForest<T> {
    slots: Vec<Option<TreeId>>,
    trees: Vec<Option<DependencyTree<T>>>,
    free: Vec<TreeId>,
}

impl<T> Default for DependencyForest<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            trees: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> DependencyForest<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> TreeId {
        match self.free.pop() {
            Some(id) => {
                self.trees[id.0] = Some(DependencyTree::default());
                id
            }
            None => {
                self.trees.push(Some(DependencyTree::default()));
                TreeId(self.trees.len() - 1)
            }
        }
    }

    fn retire(&mut self, id: TreeId) -> DependencyTree<T> {
        let tree = self.trees[id.0].take().unwrap_or_default();
        self.free.push(id);
        tree
    }

    /// Tree owning `index`, created empty if there is none yet
    ///
    /// Returns `None` for indices above [`MAX_INDEX`].
    pub fn find(&mut self, index: usize) -> Option<TreeId> {
        if index > MAX_INDEX {
            return None;
        }
        let needed = index.checked_add(1)?;
        if self.slots.len() < needed {
            self.slots.resize(needed, None);
        }
        Some(match self.slots[index] {
            Some(id) => id,
            None => {
                let id = self.alloc();
                self.slots[index] = Some(id);
                id
            }
        })
    }

    /// Tree owning `index`, without creating one
    pub fn lookup(&self, index: usize) -> Option<TreeId> {
        self.slots.get(index).copied().flatten()
    }

    pub fn tree(&self, id: TreeId) -> &DependencyTree<T> {
        self.trees[id.0]
            .as_ref()
            .expect("tree handle refers to a merged-away tree")
    }

    /// Insert a constraint node, merging every tree its dependencies touch
    ///
    /// Returns `false` (and inserts nothing) when `deps` is empty, since a
    /// node without symbolic input has no tree to live in, or when an index
    /// lies above [`MAX_INDEX`].
    pub fn add_node(&mut self, node: T, deps: &DependencySet) -> bool {
        if let Some(index) = deps.iter().copied().find(|index| *index > MAX_INDEX) {
            log::warn!("refusing to insert a constraint on input index {}", index);
            return false;
        }
        let mut target: Option<TreeId> = None;

        for &index in deps {
            let Some(other) = self.find(index) else {
                return false;
            };
            let current = match target {
                None => other,
                Some(current) if current != other => {
                    let absorbed = self.retire(other);
                    for &moved in absorbed.dependencies() {
                        self.slots[moved] = Some(current);
                    }
                    if let Some(tree) = self.trees[current.0].as_mut() {
                        tree.merge(absorbed);
                    }
                    current
                }
                Some(current) => current,
            };
            self.slots[index] = Some(current);
            target = Some(current);
        }

        match target.and_then(|id| self.trees[id.0].as_mut()) {
            Some(tree) => {
                tree.add_node(node, deps);
                true
            }
            None => {
                log::warn!("refusing to insert a constraint without input dependencies");
                false
            }
        }
    }

    /// Distinct trees owning any index of `deps`
    pub fn trees_for(&self, deps: &DependencySet) -> Vec<TreeId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for &index in deps {
            if let Some(id) = self.lookup(index) {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Every live tree reachable from the slots, in slot order
    pub fn trees(&self) -> Vec<TreeId> {
        let mut seen = HashSet::new();
        self.slots
            .iter()
            .flatten()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn stats(&self) -> ForestStats {
        let unique_trees = self.trees().len();
        let allocated_slots = self.slots.len();
        let covered: DependencySet = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|_| i))
            .collect();
        ForestStats {
            unique_trees,
            allocated_slots,
            sparsity: if allocated_slots == 0 {
                0.0
            } else {
                unique_trees as f64 / allocated_slots as f64
            },
            covered,
        }
    }

    /// Human-readable dump, one line per tree
    pub fn dump(&self, render: impl Fn(&T) -> String) -> String {
        let mut out = String::new();
        for id in self.trees() {
            let tree = self.tree(id);
            let _ = writeln!(
                out,
                "tree {} deps={:?} nodes={}",
                id.0,
                tree.dependencies(),
                tree.nodes().len()
            );
            for node in tree.nodes() {
                let _ = writeln!(out, "    {}", render(node));
            }
        }
        let stats = self.stats();
        let _ = writeln!(
            out,
            "unique trees: {}, allocated slots: {}, sparsity: {:.3}",
            stats.unique_trees, stats.allocated_slots, stats.sparsity
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn deps(indices: &[usize]) -> DependencySet {
        indices.iter().copied().collect()
    }

    /// Any two distinct live trees have disjoint dependency sets
    fn assert_disjoint(forest: &DependencyForest<u32>) {
        let trees = forest.trees();
        for (i, a) in trees.iter().enumerate() {
            for b in &trees[i + 1..] {
                let da = forest.tree(*a).dependencies();
                let db = forest.tree(*b).dependencies();
                assert!(da.is_disjoint(db), "{:?} overlaps {:?}", da, db);
            }
        }
    }

    #[test]
    fn test_independent_branches_stay_apart_then_merge() {
        let mut forest = DependencyForest::new();
        forest.add_node(1u32, &deps(&[2, 4]));
        forest.add_node(2u32, &deps(&[11, 24]));

        let a = forest.lookup(2).unwrap();
        let b = forest.lookup(24).unwrap();
        assert_ne!(a, b);
        assert_eq!(forest.trees().len(), 2);
        assert_disjoint(&forest);

        forest.add_node(3u32, &deps(&[4, 11]));
        let merged = forest.lookup(2).unwrap();
        for index in [2, 4, 11, 24] {
            assert_eq!(forest.lookup(index), Some(merged));
        }
        assert_eq!(forest.trees().len(), 1);
        let mut nodes = forest.tree(merged).nodes().to_vec();
        nodes.sort();
        assert_eq!(nodes, vec![1, 2, 3]);
        assert_eq!(forest.tree(merged).dependencies(), &deps(&[2, 4, 11, 24]));
    }

    #[test]
    fn test_cheap_append_when_co_resident() {
        let mut forest = DependencyForest::new();
        forest.add_node(1u32, &deps(&[5, 6]));
        let tree = forest.lookup(5).unwrap();
        forest.add_node(2u32, &deps(&[6, 5]));
        assert_eq!(forest.lookup(6), Some(tree));
        assert_eq!(forest.tree(tree).nodes(), &[1, 2]);
    }

    #[test]
    fn test_empty_dependencies_rejected() {
        let mut forest: DependencyForest<u32> = DependencyForest::new();
        assert!(!forest.add_node(1, &DependencySet::new()));
        assert!(forest.trees().is_empty());
    }

    #[test]
    fn test_find_creates_lazily() {
        let mut forest: DependencyForest<u32> = DependencyForest::new();
        assert_eq!(forest.lookup(9), None);
        let id = forest.find(9).unwrap();
        assert!(forest.tree(id).is_empty());
        assert_eq!(forest.find(9), Some(id));
        assert_eq!(forest.stats().allocated_slots, 10);
    }

    #[test]
    fn test_oversized_indices_are_rejected() {
        let mut forest: DependencyForest<u32> = DependencyForest::new();
        assert_eq!(forest.find(usize::MAX), None);
        assert_eq!(forest.find(MAX_INDEX + 1), None);
        assert!(!forest.add_node(1, &deps(&[3, usize::MAX])));
        assert!(!forest.add_node(2, &deps(&[1 << 40])));
        assert!(forest.trees().is_empty());
        assert_eq!(forest.stats().allocated_slots, 0);

        assert!(forest.find(MAX_INDEX).is_some());
    }

    #[test]
    fn test_trees_for_collects_distinct() {
        let mut forest = DependencyForest::new();
        forest.add_node(1u32, &deps(&[0, 1]));
        forest.add_node(2u32, &deps(&[7]));
        let ids = forest.trees_for(&deps(&[0, 1, 7, 30]));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_stats_and_dump() {
        let mut forest = DependencyForest::new();
        forest.add_node(10u32, &deps(&[0, 3]));
        forest.add_node(11u32, &deps(&[5]));
        let stats = forest.stats();
        assert_eq!(stats.unique_trees, 2);
        assert_eq!(stats.allocated_slots, 6);
        assert_eq!(stats.covered, deps(&[0, 3, 5]));

        let dump = forest.dump(|n| format!("node {}", n));
        assert!(dump.contains("node 10"));
        assert!(dump.contains("unique trees: 2"));
    }

    #[test]
    fn test_random_insertions_keep_invariants() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _round in 0..20 {
            let mut forest = DependencyForest::new();
            let mut inserted: Vec<(u32, DependencySet)> = Vec::new();

            for n in 0..60u32 {
                let count = rng.random_range(1..4);
                let d: DependencySet = (0..count).map(|_| rng.random_range(0..40)).collect();
                assert!(forest.add_node(n, &d));
                inserted.push((n, d));

                assert_disjoint(&forest);

                // Completeness: every index of every inserted node leads to
                // a tree holding that node
                for (node, node_deps) in &inserted {
                    for index in node_deps {
                        let id = forest.lookup(*index).expect("index lost its tree");
                        let tree = forest.tree(id);
                        assert!(tree.nodes().contains(node));
                        assert!(node_deps.is_subset(tree.dependencies()));
                    }
                }
            }

            // Each node lives in exactly one tree
            let total: usize = forest
                .trees()
                .iter()
                .map(|id| forest.tree(*id).nodes().len())
                .sum();
            assert_eq!(total, inserted.len());
        }
    }
}
