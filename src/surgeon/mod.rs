//! Concrete/symbolic rewriting of the expression graph
//!
//! Two traversals are offered. [`GraphSurgeon::concretize`] physically
//! replaces input reads that should be pinned by constants in every parent
//! slot referencing them; [`GraphSurgeon::concretize_copy`] does so on a
//! private copy, leaving recorded constraints intact.
//! [`GraphSurgeon::resolve_node_deps`] only flips the concreteness flag of
//! read leaves, leaving the graph shape untouched.

use std::collections::{HashSet, VecDeque};

use crate::dependency::DependencySet;
use crate::error::{Result, SessionError};
use crate::expr::{ExprArena, ExprId, evaluate};

pub struct GraphSurgeon<'a> {
    arena: &'a mut ExprArena,
    input: &'a [u8],
}

impl<'a> GraphSurgeon<'a> {
    pub fn new(arena: &'a mut ExprArena, input: &'a [u8]) -> Self {
        Self { arena, input }
    }

    /// Replace every read under `root` whose index is not in `symbolic`
    /// by its evaluated constant
    ///
    /// Returns the number of leaves rewritten. Subtrees without input
    /// dependencies and already concrete leaves are skipped, so a second pass
    /// over the same graph rewrites nothing.
    pub fn concretize(&mut self, root: ExprId, symbolic: &DependencySet) -> Result<usize> {
        let mut queue = VecDeque::from([root]);
        let mut seen = HashSet::new();
        let mut rewritten = 0;

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) || self.arena.deps(id).is_empty() {
                continue;
            }
            if let Some(index) = self.arena.read_index(id) {
                if !symbolic.contains(&index) && !self.arena.is_concrete(id) {
                    self.replace_leaf(id)?;
                    rewritten += 1;
                }
                continue;
            }
            queue.extend(self.arena.children(id).iter().copied());
        }

        if rewritten > 0 {
            log::trace!("concretized {} leaves under {}", rewritten, root);
        }
        Ok(rewritten)
    }

    /// Concretize a fresh copy of `root` and return it
    ///
    /// The copy lives until the arena is rolled back past it.
    pub fn concretize_copy(&mut self, root: ExprId, symbolic: &DependencySet) -> Result<ExprId> {
        let copy = self.arena.duplicate(root);
        self.concretize(copy, symbolic)?;
        Ok(copy)
    }

    fn replace_leaf(&mut self, leaf: ExprId) -> Result<()> {
        let parents = self.arena.uses(leaf).to_vec();

        // Check every back-reference before touching anything
        let mut edits = Vec::with_capacity(parents.len());
        for parent in parents {
            let slots: Vec<usize> = self
                .arena
                .children(parent)
                .iter()
                .enumerate()
                .filter(|(_, child)| **child == leaf)
                .map(|(slot, _)| slot)
                .collect();
            if slots.is_empty() {
                return Err(SessionError::GraphInconsistency {
                    parent,
                    child: leaf,
                });
            }
            edits.push((parent, slots));
        }

        let value = evaluate(self.arena, leaf, self.input);
        let width = self.arena.width(leaf);
        let constant = self.arena.constant(value, width);
        for (parent, slots) in edits {
            for slot in slots {
                self.arena.replace_child(parent, slot, constant);
            }
            self.arena.refresh(parent);
        }

        self.arena.concretize(leaf);
        self.arena.clear_uses(leaf);
        Ok(())
    }

    /// Flag reads under `root` concrete or symbolic without graph surgery
    ///
    /// Reads whose index is in neither set keep their current flag.
    pub fn resolve_node_deps(
        &mut self,
        root: ExprId,
        concrete: &DependencySet,
        symbolic: &DependencySet,
    ) {
        for read in self.arena.reads(root) {
            let Some(index) = self.arena.read_index(read) else {
                continue;
            };
            if concrete.contains(&index) {
                self.arena.concretize(read);
            } else if symbolic.contains(&index) {
                self.arena.symbolize(read);
            } else {
                log::debug!("no decision for input index {} under {}", index, root);
            }
        }
    }
}
