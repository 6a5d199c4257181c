//! Expression graph: an arena of typed bit-vector nodes
//!
//! Nodes are addressed by stable [`ExprId`]s. Children are owned edges,
//! parent links ("uses") are plain id lists kept next to each node, so a
//! parent can be found in O(1) without any live reference cycle. Nodes stay
//! alive for the lifetime of the arena.
//!
//! Structurally identical nodes are interned, which is how a single input
//! read ends up shared by every constraint that mentions it.

pub mod eval;
pub mod kind;
pub mod range;
pub mod smt;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::dependency::DependencySet;

pub use eval::evaluate;
pub use kind::{Kind, Signedness};
pub use range::RangeSet;
pub use smt::{SmtTranslator, Term};

/// Width of an input read in bits
pub const BYTE_WIDTH: u32 = 8;

/// Maximum supported bit-vector width
pub const MAX_WIDTH: u32 = 64;

/// Stable handle to a node in an [`ExprArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub usize);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// All-ones mask for a width
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn range_slot(signedness: Signedness) -> usize {
    match signedness {
        Signedness::Unsigned => 0,
        Signedness::Signed => 1,
    }
}

/// Sign-extend the low `width` bits of `value` to an i64
pub fn to_signed(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    kind: Kind,
    width: u32,
    children: Vec<ExprId>,
    concrete: bool,
    deps: DependencySet,
    // Unsigned, signed
    ranges: [Option<RangeSet>; 2],
    uses: Vec<ExprId>,
}

type InternKey = (Kind, u32, Vec<ExprId>);

/// Owner of every expression node of a session
#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    interned: HashMap<InternKey, ExprId>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.nodes[id.0]
    }

    // --- Construction ---

    fn intern(&mut self, kind: Kind, width: u32, children: Vec<ExprId>) -> ExprId {
        debug_assert!(width >= 1 && width <= MAX_WIDTH, "bad width {}", width);
        let key = (kind, width, children);
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }
        let (kind, width, children) = key;

        let mut deps = DependencySet::new();
        if let Kind::Read(index) = kind {
            deps.insert(index);
        }
        for child in &children {
            deps.extend(self.node(*child).deps.iter().copied());
        }
        let concrete = match kind {
            Kind::Bool(_) | Kind::Constant(_) => true,
            Kind::Read(_) => false,
            _ => children.iter().all(|c| self.node(*c).concrete),
        };

        let id = ExprId(self.nodes.len());
        self.nodes.push(ExprNode {
            kind,
            width,
            children: children.clone(),
            concrete,
            deps,
            ranges: [None, None],
            uses: Vec::new(),
        });
        for child in &children {
            self.add_use(*child, id);
        }
        self.interned.insert((kind, width, children), id);
        id
    }

    pub fn constant(&mut self, value: u64, width: u32) -> ExprId {
        self.intern(Kind::Constant(value & mask(width)), width, Vec::new())
    }

    pub fn bool_const(&mut self, value: bool) -> ExprId {
        self.intern(Kind::Bool(value), 1, Vec::new())
    }

    /// Symbolic read of one input byte
    pub fn read(&mut self, index: usize) -> ExprId {
        self.intern(Kind::Read(index), BYTE_WIDTH, Vec::new())
    }

    /// `Not` or `Neg`
    pub fn unary(&mut self, kind: Kind, operand: ExprId) -> ExprId {
        debug_assert!(matches!(kind, Kind::Not | Kind::Neg));
        let width = self.width(operand);
        self.intern(kind, width, vec![operand])
    }

    pub fn extract(&mut self, high: u32, low: u32, operand: ExprId) -> ExprId {
        debug_assert!(high >= low && high < self.width(operand));
        if low == 0 && high + 1 == self.width(operand) {
            return operand;
        }
        self.intern(Kind::Extract { high, low }, high - low + 1, vec![operand])
    }

    pub fn zext(&mut self, width: u32, operand: ExprId) -> ExprId {
        self.extend(Kind::ZExt, width, operand)
    }

    pub fn sext(&mut self, width: u32, operand: ExprId) -> ExprId {
        self.extend(Kind::SExt, width, operand)
    }

    fn extend(&mut self, kind: Kind, width: u32, operand: ExprId) -> ExprId {
        let from = self.width(operand);
        debug_assert!(width >= from);
        if width == from {
            return operand;
        }
        self.intern(kind, width, vec![operand])
    }

    /// Binary bit-vector operator
    pub fn binary(&mut self, kind: Kind, lhs: ExprId, rhs: ExprId) -> ExprId {
        let width = if kind == Kind::Concat {
            self.width(lhs) + self.width(rhs)
        } else {
            debug_assert_eq!(self.width(lhs), self.width(rhs), "{} width mismatch", kind);
            self.width(lhs)
        };
        self.intern(kind, width, vec![lhs, rhs])
    }

    pub fn relational(&mut self, kind: Kind, lhs: ExprId, rhs: ExprId) -> ExprId {
        debug_assert!(kind.is_relational());
        debug_assert_eq!(self.width(lhs), self.width(rhs), "{} width mismatch", kind);
        self.intern(kind, 1, vec![lhs, rhs])
    }

    /// Logical negation; relational kinds are negated in place of wrapping
    pub fn lnot(&mut self, operand: ExprId) -> ExprId {
        let kind = self.kind(operand);
        match kind {
            Kind::Bool(value) => self.bool_const(!value),
            Kind::LNot => self.child(operand, 0),
            _ if kind.is_relational() => {
                let negated = kind.negate().unwrap_or(kind);
                let (lhs, rhs) = (self.child(operand, 0), self.child(operand, 1));
                self.relational(negated, lhs, rhs)
            }
            _ => self.intern(Kind::LNot, 1, vec![operand]),
        }
    }

    pub fn land(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.intern(Kind::LAnd, 1, vec![lhs, rhs])
    }

    pub fn lor(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.intern(Kind::LOr, 1, vec![lhs, rhs])
    }

    // --- Accessors ---

    pub fn kind(&self, id: ExprId) -> Kind {
        self.node(id).kind
    }

    pub fn width(&self, id: ExprId) -> u32 {
        self.node(id).width
    }

    pub fn children(&self, id: ExprId) -> &[ExprId] {
        &self.node(id).children
    }

    pub fn child(&self, id: ExprId, slot: usize) -> ExprId {
        self.node(id).children[slot]
    }

    pub fn deps(&self, id: ExprId) -> &DependencySet {
        &self.node(id).deps
    }

    /// Parents currently referencing this node
    pub fn uses(&self, id: ExprId) -> &[ExprId] {
        &self.node(id).uses
    }

    pub fn is_concrete(&self, id: ExprId) -> bool {
        self.node(id).concrete
    }

    pub fn read_index(&self, id: ExprId) -> Option<usize> {
        match self.kind(id) {
            Kind::Read(index) => Some(index),
            _ => None,
        }
    }

    pub fn constant_value(&self, id: ExprId) -> Option<u64> {
        match self.kind(id) {
            Kind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Interval set proven under one interpretation, if any was recorded
    pub fn range(&self, id: ExprId, signedness: Signedness) -> Option<&RangeSet> {
        self.node(id).ranges[range_slot(signedness)].as_ref()
    }

    /// Distinct read leaves reachable from `root`, in breadth-first order
    pub fn reads(&self, root: ExprId) -> Vec<ExprId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root]);
        let mut reads = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if self.read_index(id).is_some() {
                reads.push(id);
            }
            queue.extend(self.children(id).iter().copied());
        }
        reads
    }

    // --- Mutation ---

    /// Flag a read leaf as pinned to its concrete input value
    pub fn concretize(&mut self, id: ExprId) {
        debug_assert!(self.read_index(id).is_some());
        self.node_mut(id).concrete = true;
    }

    /// Flag a read leaf as a free solver variable
    pub fn symbolize(&mut self, id: ExprId) {
        debug_assert!(self.read_index(id).is_some());
        self.node_mut(id).concrete = false;
    }

    pub fn add_use(&mut self, child: ExprId, parent: ExprId) {
        let uses = &mut self.node_mut(child).uses;
        if !uses.contains(&parent) {
            uses.push(parent);
        }
    }

    pub fn clear_uses(&mut self, id: ExprId) {
        self.node_mut(id).uses.clear();
    }

    /// Point a parent's child slot at another node
    ///
    /// The parent no longer matches its interned shape, so it is evicted
    /// from the intern table; later builds of that shape get a fresh node.
    pub fn replace_child(&mut self, parent: ExprId, slot: usize, child: ExprId) {
        let node = self.node(parent);
        let key = (node.kind, node.width, node.children.clone());
        if self.interned.get(&key) == Some(&parent) {
            self.interned.remove(&key);
        }
        self.node_mut(parent).children[slot] = child;
        self.add_use(child, parent);
    }

    /// Recompute dependencies and concreteness of `id` and its ancestors
    pub fn refresh(&mut self, id: ExprId) {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let node = self.node(current);
            if node.kind.is_leaf() {
                continue;
            }
            let mut deps = DependencySet::new();
            for child in &node.children {
                deps.extend(self.node(*child).deps.iter().copied());
            }
            let concrete = node.children.iter().all(|c| self.node(*c).concrete);
            if deps == node.deps && concrete == node.concrete {
                continue;
            }
            let node = self.node_mut(current);
            node.deps = deps;
            node.concrete = concrete;
            queue.extend(node.uses.iter().copied());
        }
    }

    /// Private copy of every node under `root` that reads input
    ///
    /// Copies are not interned and only reference each other or input-free
    /// subtrees, so rewriting their slots leaves every other node untouched.
    /// Copied reads start symbolic; range sets are carried over.
    pub fn duplicate(&mut self, root: ExprId) -> ExprId {
        let mut copies = HashMap::new();
        self.duplicate_into(root, &mut copies)
    }

    fn duplicate_into(&mut self, id: ExprId, copies: &mut HashMap<ExprId, ExprId>) -> ExprId {
        if self.node(id).deps.is_empty() {
            return id;
        }
        if let Some(&copy) = copies.get(&id) {
            return copy;
        }
        let children: Vec<ExprId> = self
            .node(id)
            .children
            .clone()
            .into_iter()
            .map(|child| self.duplicate_into(child, copies))
            .collect();

        let mut node = self.node(id).clone();
        node.concrete = match node.kind {
            Kind::Read(_) => false,
            _ => children.iter().all(|c| self.node(*c).concrete),
        };
        node.children = children.clone();
        node.uses = Vec::new();

        let copy = ExprId(self.nodes.len());
        self.nodes.push(node);
        for child in children {
            self.add_use(child, copy);
        }
        copies.insert(id, copy);
        copy
    }

    /// Marker for [`ExprArena::rollback`]
    pub fn checkpoint(&self) -> usize {
        self.nodes.len()
    }

    /// Drop every node created after `mark`
    ///
    /// Nodes older than `mark` must not have had a slot redirected to a
    /// dropped node.
    pub fn rollback(&mut self, mark: usize) {
        while self.nodes.len() > mark {
            let id = ExprId(self.nodes.len() - 1);
            let Some(node) = self.nodes.pop() else {
                break;
            };
            for child in &node.children {
                if child.0 < mark {
                    self.nodes[child.0].uses.retain(|parent| *parent != id);
                }
            }
            let key = (node.kind, node.width, node.children);
            if self.interned.get(&key) == Some(&id) {
                self.interned.remove(&key);
            }
        }
    }

    /// Intersect the interval sets of `id` with `(id + adjustment) kind rhs`
    ///
    /// Ordering comparisons only refine the set of their own signedness;
    /// equality and disequality refine both.
    pub fn add_range_constraint(&mut self, id: ExprId, kind: Kind, rhs: u64, adjustment: u64) {
        let width = self.width(id);
        let node = self.node_mut(id);
        for signedness in [Signedness::Unsigned, Signedness::Signed] {
            if kind.signedness().is_some_and(|s| s != signedness) {
                continue;
            }
            node.ranges[range_slot(signedness)]
                .get_or_insert_with(|| RangeSet::full(width))
                .constrain(kind, rhs, adjustment);
        }
    }

    // --- Rendering ---

    /// S-expression rendering, same syntax the trace reader accepts
    pub fn render(&self, id: ExprId) -> String {
        let mut out = String::new();
        self.render_into(id, &mut out);
        out
    }

    fn render_into(&self, id: ExprId, out: &mut String) {
        let node = self.node(id);
        match node.kind {
            Kind::Bool(value) => out.push_str(if value { "true" } else { "false" }),
            Kind::Constant(value) => out.push_str(&format!("(const 0x{:x} {})", value, node.width)),
            Kind::Read(index) => out.push_str(&format!("(read {})", index)),
            Kind::Extract { high, low } => {
                out.push_str(&format!("(extract {} {} ", high, low));
                self.render_into(node.children[0], out);
                out.push(')');
            }
            Kind::ZExt | Kind::SExt => {
                out.push_str(&format!("({} {} ", node.kind, node.width));
                self.render_into(node.children[0], out);
                out.push(')');
            }
            kind => {
                out.push('(');
                out.push_str(kind.mnemonic());
                for child in &node.children {
                    out.push(' ');
                    self.render_into(*child, out);
                }
                out.push(')');
            }
        }
    }
}
