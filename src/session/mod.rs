//! Solving session for one traced execution
//!
//! A [`SolverSession`] receives branch, address and value events in trace
//! order. Every event records a constraint in the dependency forest; branches
//! the oracle flags as interesting are additionally negated against the part
//! of the path that can interact with them, and each satisfying model becomes
//! a new test case.

pub mod config;
pub mod smt;
pub mod stats;
pub mod testcase;

use std::collections::HashSet;

use z3::ast::{BV, Bool};

pub use config::{SessionConfig, SyncMode};
pub use smt::{CheckResult, SmtContext, SolverScope, SolverStatistics};
pub use stats::SessionStatistics;
pub use testcase::{TestCaseKind, TestCaseSink};

use crate::dependency::{DependencyForest, DependencySet};
use crate::error::{Result, SessionError};
use crate::expr::{ExprArena, ExprId, Kind, Signedness, SmtTranslator, evaluate, mask};
use crate::oracle::BranchOracle;
use crate::surgeon::GraphSurgeon;

/// Result of negating one branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negation {
    /// Solved together with the synchronised path
    Solved,
    /// Only the negated condition alone was satisfiable
    Optimistic,
    Unsolved,
}

/// What a branch event led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    /// The condition has no symbolic input
    Constant,
    Uninteresting,
    Negated(Negation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Min,
    Max,
}

/// Constraint state and solver for one traced execution
///
/// Owns the expression arena, the dependency forest of recorded constraints
/// and the solver. Events must arrive in trace order.
pub struct SolverSession<O: BranchOracle> {
    config: SessionConfig,
    input: Vec<u8>,
    arena: ExprArena,
    forest: DependencyForest<ExprId>,
    // Canonical nodes already carrying a range set in the forest
    ranged: HashSet<ExprId>,
    smt: SmtContext,
    oracle: O,
    sink: TestCaseSink,
    stats: SessionStatistics,
    last_interested: bool,
}

impl<O: BranchOracle> SolverSession<O> {
    /// Open a session over the configured input file
    pub fn new(config: SessionConfig, oracle: O) -> Result<Self> {
        let input = config.read_input()?;
        Self::with_input(config, input, oracle)
    }

    /// Open a session over input bytes already in memory
    pub fn with_input(config: SessionConfig, input: Vec<u8>, oracle: O) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "session over {} input bytes, sync mode {}, timeout {:?}",
            input.len(),
            config.sync_mode,
            config.solver_timeout
        );
        let smt = SmtContext::new(config.solver_timeout);
        let sink = TestCaseSink::new(config.output_dir.clone());
        Ok(Self {
            config,
            input,
            arena: ExprArena::new(),
            forest: DependencyForest::new(),
            ranged: HashSet::new(),
            smt,
            oracle,
            sink,
            stats: SessionStatistics::default(),
            last_interested: false,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    /// Arena the instrumentation builds event expressions in
    pub fn arena_mut(&mut self) -> &mut ExprArena {
        &mut self.arena
    }

    pub fn forest(&self) -> &DependencyForest<ExprId> {
        &self.forest
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Test cases emitted so far
    pub fn generated(&self) -> usize {
        self.sink.generated()
    }

    pub fn statistics(&self) -> SessionStatistics {
        let mut stats = self.stats.clone();
        stats.solver = self.smt.statistics().clone();
        stats
    }

    pub fn dump_forest(&self) -> String {
        self.forest.dump(|node| format!("{} {}", node, self.arena.render(*node)))
    }

    // --- Instrumentation events ---

    /// Branch on `condition` with outcome `taken` at `pc` (0 reuses the last classification)
    ///
    /// The non-negated constraint is recorded even when negation fails.
    pub fn on_branch(&mut self, condition: ExprId, taken: bool, pc: u64) -> Result<BranchOutcome> {
        self.stats.branches += 1;
        if !self.arena.kind(condition).is_bool() {
            return Err(SessionError::NonBooleanCondition {
                node: condition,
                rendered: self.arena.render(condition),
            });
        }
        if let Kind::Bool(value) = self.arena.kind(condition) {
            self.stats.constant_branches += 1;
            return if value == taken {
                Ok(BranchOutcome::Constant)
            } else {
                Err(SessionError::TraceMismatch { value, taken })
            };
        }

        let interesting = self.classify(pc, taken);
        if self.arena.deps(condition).is_empty() {
            self.stats.constant_branches += 1;
            return Ok(BranchOutcome::Constant);
        }

        let outcome = if interesting {
            self.stats.interesting_branches += 1;
            self.negate_path(condition, taken).map(BranchOutcome::Negated)
        } else {
            Ok(BranchOutcome::Uninteresting)
        };
        self.add_constraint(condition, taken);
        outcome
    }

    /// Memory access through a symbolic address observed as `address`
    ///
    /// After an interesting branch the feasible extremes of the address are
    /// probed first and a test case is emitted for each.
    pub fn on_address(&mut self, expr: ExprId, address: u64) -> Result<Option<(u64, u64)>> {
        if self.arena.deps(expr).is_empty() {
            return Ok(None);
        }
        let probed = if self.last_interested {
            self.probe_bounds(expr)
        } else {
            Ok(None)
        };
        self.on_value(expr, address);
        probed
    }

    /// Pin `expr` to the value it had in the traced run
    pub fn on_value(&mut self, expr: ExprId, value: u64) {
        if self.arena.deps(expr).is_empty() {
            return;
        }
        let width = self.arena.width(expr);
        if cfg!(debug_assertions) {
            let actual = evaluate(&self.arena, expr, &self.input);
            if actual != value & mask(width) {
                log::warn!(
                    "observed 0x{:x} but {} evaluates to 0x{:x}",
                    value,
                    self.arena.render(expr),
                    actual
                );
            }
        }
        let constant = self.arena.constant(value, width);
        let pinned = self.arena.relational(Kind::Equal, expr, constant);
        self.add_constraint(pinned, true);
    }

    /// Enumerate every other feasible value of `expr`, then pin the observed one
    ///
    /// Returns the number of alternative values found.
    pub fn on_solve_all(&mut self, expr: ExprId, value: u64) -> Result<usize> {
        let found = if self.last_interested && !self.arena.deps(expr).is_empty() {
            self.enumerate_values(expr, value)
        } else {
            Ok(0)
        };
        self.on_value(expr, value);
        found
    }

    fn classify(&mut self, pc: u64, taken: bool) -> bool {
        if pc != 0 {
            self.last_interested = self.oracle.is_interesting(pc, taken);
        }
        self.last_interested
    }

    // --- Solving ---

    /// Try to produce an input taking the other side of `condition`
    pub fn negate_path(&mut self, condition: ExprId, taken: bool) -> Result<Negation> {
        self.smt.reset();
        self.sync_constraints(condition)?;
        self.add_target(condition, !taken);
        if self.check_and_save(TestCaseKind::Exact)? {
            self.stats.negations_solved += 1;
            return Ok(Negation::Solved);
        }

        self.smt.reset();
        self.add_target(condition, !taken);
        if self.check_and_save(TestCaseKind::Optimistic)? {
            self.stats.negations_optimistic += 1;
            Ok(Negation::Optimistic)
        } else {
            log::debug!("no input flips {}", self.arena.render(condition));
            self.stats.negations_unsolved += 1;
            Ok(Negation::Unsolved)
        }
    }

    /// Submit every recorded constraint that can interact with `target`
    ///
    /// Trees are selected through the forest slots of `target`'s
    /// dependencies. Within a tree, indices outside those dependencies are
    /// pinned to the input and nodes depending only on pinned indices are
    /// skipped. Returns the submitted nodes.
    pub fn sync_constraints(&mut self, target: ExprId) -> Result<Vec<ExprId>> {
        let targets = self.arena.deps(target).clone();
        let mut seen = HashSet::new();
        let mut submitted = Vec::new();

        for tree_id in self.forest.trees_for(&targets) {
            let tree = self.forest.tree(tree_id);
            let (symbolic, concrete): (DependencySet, DependencySet) = tree
                .dependencies()
                .iter()
                .copied()
                .partition(|index| targets.contains(index));
            let nodes = tree.nodes().to_vec();

            for node in nodes {
                if !seen.insert(node) {
                    continue;
                }
                if self.arena.deps(node).iter().all(|index| concrete.contains(index)) {
                    continue;
                }
                let mark = self.arena.checkpoint();
                let result = self
                    .pin(node, &concrete, &symbolic)
                    .and_then(|subject| self.submit_constraint(subject));
                self.arena.rollback(mark);
                result?;
                submitted.push(node);
            }
        }

        log::debug!("synchronised {} constraints for {}", submitted.len(), target);
        Ok(submitted)
    }

    /// Node to submit for `node` with its concrete reads pinned
    ///
    /// Rewrite mode returns a rewritten copy that is only valid until the
    /// arena is rolled back; the recorded node never changes shape.
    fn pin(
        &mut self,
        node: ExprId,
        concrete: &DependencySet,
        symbolic: &DependencySet,
    ) -> Result<ExprId> {
        let mut surgeon = GraphSurgeon::new(&mut self.arena, &self.input);
        match self.config.sync_mode {
            SyncMode::Rewrite => surgeon.concretize_copy(node, symbolic),
            SyncMode::Mark => {
                surgeon.resolve_node_deps(node, concrete, symbolic);
                Ok(node)
            }
        }
    }

    /// Assert a recorded node: booleans directly, values through their range form
    fn submit_constraint(&mut self, node: ExprId) -> Result<()> {
        if self.arena.kind(node).is_bool() {
            self.submit(node);
            return Ok(());
        }
        let mut derived = false;
        for signedness in [Signedness::Unsigned, Signedness::Signed] {
            if let Some(form) = self.range_form(node, signedness) {
                self.submit(form);
                derived = true;
            }
        }
        if derived {
            Ok(())
        } else {
            Err(SessionError::RangeDerivation {
                node,
                rendered: self.arena.render(node),
            })
        }
    }

    /// Disjunction of interval bounds describing the range set of `node`
    pub fn range_form(&mut self, node: ExprId, signedness: Signedness) -> Option<ExprId> {
        let ranges = self.arena.range(node, signedness)?.clone();
        let width = self.arena.width(node);
        let (lower, upper) = match signedness {
            Signedness::Unsigned => (Kind::Uge, Kind::Ule),
            Signedness::Signed => (Kind::Sge, Kind::Sle),
        };

        let mut form: Option<ExprId> = None;
        for (from, to) in ranges.intervals(signedness) {
            let bound = if from == to {
                let value = self.arena.constant(from, width);
                self.arena.relational(Kind::Equal, node, value)
            } else {
                let low = self.arena.constant(from, width);
                let high = self.arena.constant(to, width);
                let above = self.arena.relational(lower, node, low);
                let below = self.arena.relational(upper, node, high);
                self.arena.land(above, below)
            };
            form = Some(match form {
                Some(previous) => self.arena.lor(previous, bound),
                None => bound,
            });
        }
        Some(form.unwrap_or_else(|| self.arena.bool_const(false)))
    }

    /// Assert `condition == value` with `condition`'s own reads left free
    fn add_target(&mut self, condition: ExprId, value: bool) {
        self.free_reads(condition);
        let target = if value {
            condition
        } else {
            self.arena.lnot(condition)
        };
        self.submit(target);
    }

    fn free_reads(&mut self, root: ExprId) {
        for read in self.arena.reads(root) {
            self.arena.symbolize(read);
        }
    }

    fn submit(&mut self, node: ExprId) {
        let mut translator = SmtTranslator::new(&self.arena, &self.input);
        let formula = translator.translate_bool(node);
        self.smt.assert(&formula, translator.variables());
    }

    fn translate_term(&mut self, expr: ExprId) -> BV {
        let mut translator = SmtTranslator::new(&self.arena, &self.input);
        let term = translator.translate_bv(expr);
        self.smt.bind(translator.variables());
        term
    }

    /// Feasible unsigned extremes of `expr` under the synchronised path
    pub fn probe_bounds(&mut self, expr: ExprId) -> Result<Option<(u64, u64)>> {
        self.stats.probes += 1;
        self.smt.reset();
        self.sync_constraints(expr)?;
        self.free_reads(expr);
        let term = self.translate_term(expr);
        if self.smt.check() != CheckResult::Sat {
            return Ok(None);
        }

        let (Some(min), Some(max)) = (
            self.extreme(&term, Bound::Min),
            self.extreme(&term, Bound::Max),
        ) else {
            return Ok(None);
        };
        log::debug!("{} ranges over [0x{:x}, 0x{:x}]", expr, min, max);

        let width = term.get_size();
        self.solve_one(&term.eq(&BV::from_u64(min, width)))?;
        if max != min {
            self.solve_one(&term.eq(&BV::from_u64(max, width)))?;
        }
        Ok(Some((min, max)))
    }

    fn extreme(&mut self, term: &BV, bound: Bound) -> Option<u64> {
        let width = term.get_size();
        let mut best = None;
        let mut iterations = 0;
        {
            let mut scope = self.smt.scope();
            while scope.check() == CheckResult::Sat {
                iterations += 1;
                let Some(value) = scope.eval(term) else {
                    break;
                };
                best = Some(value);
                let limit = BV::from_u64(value, width);
                let tighter = match bound {
                    Bound::Min => term.bvult(&limit),
                    Bound::Max => term.bvugt(&limit),
                };
                scope.assert(&tighter, None);
            }
        }
        self.stats.probe_iterations += iterations;
        best
    }

    /// Check `formula` in a scope on top of the current assertions and save a hit
    fn solve_one(&mut self, formula: &Bool) -> Result<bool> {
        let assignment = {
            let mut scope = self.smt.scope();
            scope.assert(formula, None);
            match scope.check() {
                CheckResult::Sat => scope.assignment(),
                _ => None,
            }
        };
        match assignment {
            Some(values) => {
                self.save(&values, TestCaseKind::Exact)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn enumerate_values(&mut self, expr: ExprId, value: u64) -> Result<usize> {
        let width = self.arena.width(expr);
        let constant = self.arena.constant(value, width);
        let observed = self.arena.relational(Kind::Equal, expr, constant);

        self.smt.reset();
        self.sync_constraints(expr)?;
        self.add_target(observed, false);
        let mut kind = TestCaseKind::Exact;
        if self.smt.check() != CheckResult::Sat {
            self.smt.reset();
            self.add_target(observed, false);
            kind = TestCaseKind::Optimistic;
        }

        let term = self.translate_term(expr);
        let mut found = 0;
        while self.config.enumeration_limit.map_or(true, |limit| found < limit) {
            if !self.check_and_save(kind)? {
                break;
            }
            let Some(next) = self.smt.eval(&term) else {
                break;
            };
            found += 1;
            let exclude = term.eq(&BV::from_u64(next, width)).not();
            self.smt.assert(&exclude, None);
        }

        log::debug!("{} alternative values for {}", found, expr);
        self.stats.enumerated_values += found as u64;
        Ok(found)
    }

    fn check_and_save(&mut self, kind: TestCaseKind) -> Result<bool> {
        if self.smt.check() != CheckResult::Sat {
            return Ok(false);
        }
        let Some(values) = self.smt.assignment() else {
            log::warn!("satisfiable query produced no model");
            return Ok(false);
        };
        self.save(&values, kind)?;
        Ok(true)
    }

    fn save(&mut self, values: &[(usize, u8)], kind: TestCaseKind) -> Result<()> {
        let bytes = self.materialize(values);
        self.sink.save(&bytes, kind)?;
        self.stats.testcases += 1;
        if kind == TestCaseKind::Optimistic {
            self.stats.optimistic_testcases += 1;
        }
        Ok(())
    }

    /// Input bytes with every model-bound index overwritten
    pub fn materialize(&self, values: &[(usize, u8)]) -> Vec<u8> {
        let mut bytes = self.input.clone();
        for &(index, value) in values {
            match bytes.get_mut(index) {
                Some(byte) => *byte = value,
                None => log::debug!("model binds index {} past the input end", index),
            }
        }
        bytes
    }

    // --- Recording ---

    /// Record `condition == taken` in the forest
    ///
    /// Comparisons against a constant refine the range set of the compared
    /// value instead of adding a new node. Conditions without symbolic input
    /// are dropped.
    pub fn add_constraint(&mut self, condition: ExprId, taken: bool) {
        let (mut condition, mut taken) = (condition, taken);
        while self.arena.kind(condition) == Kind::LNot {
            condition = self.arena.child(condition, 0);
            taken = !taken;
        }
        if let Kind::Bool(value) = self.arena.kind(condition) {
            if value != taken {
                log::warn!("constant condition {} recorded as {}", value, taken);
            }
            return;
        }
        if self.arena.deps(condition).is_empty() {
            return;
        }
        if self.add_range_constraint(condition, taken) {
            return;
        }

        let node = if taken {
            condition
        } else {
            self.arena.lnot(condition)
        };
        let deps = self.arena.deps(node).clone();
        self.forest.add_node(node, &deps);
    }

    fn add_range_constraint(&mut self, condition: ExprId, taken: bool) -> bool {
        let kind = self.arena.kind(condition);
        if !kind.is_relational() {
            return false;
        }
        let (lhs, rhs) = (self.arena.child(condition, 0), self.arena.child(condition, 1));
        let (symbolic, value, kind) = match (
            self.arena.constant_value(lhs),
            self.arena.constant_value(rhs),
        ) {
            (None, Some(value)) => (lhs, value, kind),
            (Some(value), None) => match kind.swap() {
                Some(swapped) => (rhs, value, swapped),
                None => return false,
            },
            _ => return false,
        };
        let kind = if taken {
            kind
        } else {
            match kind.negate() {
                Some(negated) => negated,
                None => return false,
            }
        };

        let (canonical, adjustment) = self.canonicalize(symbolic);
        self.arena.add_range_constraint(canonical, kind, value, adjustment);
        if self.ranged.insert(canonical) {
            let deps = self.arena.deps(canonical).clone();
            self.forest.add_node(canonical, &deps);
        }
        log::trace!(
            "(+ {} 0x{:x}) {} 0x{:x}",
            self.arena.render(canonical),
            adjustment,
            kind,
            value
        );
        true
    }

    /// Strip a constant addend: `x + c` and `x - c` to `x`, `c - x` to `-x`
    fn canonicalize(&mut self, expr: ExprId) -> (ExprId, u64) {
        let kind = self.arena.kind(expr);
        if !matches!(kind, Kind::Add | Kind::Sub) {
            return (expr, 0);
        }
        let width = self.arena.width(expr);
        let (lhs, rhs) = (self.arena.child(expr, 0), self.arena.child(expr, 1));
        match (
            kind,
            self.arena.constant_value(lhs),
            self.arena.constant_value(rhs),
        ) {
            (Kind::Add, Some(c), None) => (rhs, c),
            (Kind::Add, None, Some(c)) => (lhs, c),
            (Kind::Sub, Some(c), None) => (self.arena.unary(Kind::Neg, rhs), c),
            (Kind::Sub, None, Some(c)) => (lhs, c.wrapping_neg() & mask(width)),
            _ => (expr, 0),
        }
    }

    /// Assert every recorded constraint with all inputs free
    ///
    /// The traced input satisfies the recorded path, so an unsatisfiable
    /// result means the forest lost or corrupted a constraint.
    pub fn check_feasible(&mut self) -> Result<()> {
        self.smt.reset();
        let none = DependencySet::new();
        let mut count = 0;
        for tree_id in self.forest.trees() {
            let tree = self.forest.tree(tree_id);
            let symbolic = tree.dependencies().clone();
            for node in tree.nodes().to_vec() {
                GraphSurgeon::new(&mut self.arena, &self.input)
                    .resolve_node_deps(node, &none, &symbolic);
                self.submit_constraint(node)?;
                count += 1;
            }
        }
        match self.smt.check() {
            CheckResult::Sat => Ok(()),
            CheckResult::Unsat => Err(SessionError::Infeasible { count }),
            CheckResult::Unknown => {
                log::warn!("feasibility of {} constraints undecided", count);
                Ok(())
            }
        }
    }
}

impl<O: BranchOracle> Drop for SolverSession<O> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && self.config.check_feasible {
            if let Err(e) = self.check_feasible() {
                log::error!("{}", e);
            }
        }
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("dependency forest:\n{}", self.dump_forest());
        }
        log::info!("session finished\n{}", self.statistics());
    }
}
