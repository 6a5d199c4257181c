//! Incremental Z3 solver wrapper with scoped assertions

use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use z3::ast::{BV, Bool};
use z3::{Params, SatResult, Solver};

use crate::expr::smt::input_variable;

/// Outcome of a satisfiability query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Sat,
    Unsat,
    /// Timeout or solver give-up; callers treat it like `Unsat`
    Unknown,
}

impl From<SatResult> for CheckResult {
    fn from(result: SatResult) -> Self {
        match result {
            SatResult::Sat => CheckResult::Sat,
            SatResult::Unsat => CheckResult::Unsat,
            SatResult::Unknown => CheckResult::Unknown,
        }
    }
}

/// Query counters
#[derive(Debug, Clone, Default)]
pub struct SolverStatistics {
    pub queries: u64,
    pub sat: u64,
    pub unsat: u64,
    pub unknown: u64,
    pub solving_time: Duration,
}

/// Solver plus the input indices each assertion frame mentions
pub struct SmtContext {
    solver: Solver,
    timeout: Duration,
    frames: Vec<BTreeSet<usize>>,
    stats: SolverStatistics,
}

impl SmtContext {
    pub fn new(timeout: Duration) -> Self {
        let solver = Solver::new();
        Self::apply_timeout(&solver, timeout);
        Self {
            solver,
            timeout,
            frames: vec![BTreeSet::new()],
            stats: SolverStatistics::default(),
        }
    }

    fn apply_timeout(solver: &Solver, timeout: Duration) {
        let mut params = Params::new();
        params.set_u32("timeout", timeout.as_millis().min(u32::MAX as u128) as u32);
        solver.set_params(&params);
    }

    /// Drop every assertion and scope
    pub fn reset(&mut self) {
        self.solver.reset();
        Self::apply_timeout(&self.solver, self.timeout);
        self.frames.clear();
        self.frames.push(BTreeSet::new());
    }

    pub fn push(&mut self) {
        self.solver.push();
        self.frames.push(BTreeSet::new());
    }

    pub fn pop(&mut self) {
        // The base frame is never popped
        if self.frames.len() > 1 {
            self.solver.pop(1);
            self.frames.pop();
        }
    }

    /// Scope depth above the base frame
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Push a scope that is popped when the guard drops
    pub fn scope(&mut self) -> SolverScope<'_> {
        self.push();
        SolverScope { ctx: self }
    }

    /// Assert `formula`, recording the input indices it binds
    pub fn assert<'v>(&mut self, formula: &Bool, variables: impl IntoIterator<Item = &'v usize>) {
        self.solver.assert(formula);
        self.bind(variables);
    }

    /// Record input indices as bound without asserting anything
    pub fn bind<'v>(&mut self, variables: impl IntoIterator<Item = &'v usize>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.extend(variables.into_iter().copied());
        }
    }

    /// Input indices mentioned by the live assertion stack
    pub fn bound_variables(&self) -> BTreeSet<usize> {
        self.frames.iter().flatten().copied().collect()
    }

    pub fn check(&mut self) -> CheckResult {
        let start = Instant::now();
        let result = CheckResult::from(self.solver.check());
        let elapsed = start.elapsed();

        self.stats.queries += 1;
        self.stats.solving_time += elapsed;
        match result {
            CheckResult::Sat => self.stats.sat += 1,
            CheckResult::Unsat => self.stats.unsat += 1,
            CheckResult::Unknown => {
                self.stats.unknown += 1;
                log::debug!("solver returned unknown after {:?}", elapsed);
            }
        }
        log::trace!("query {} -> {:?} in {:?}", self.stats.queries, result, elapsed);
        result
    }

    /// Value of a bit-vector term under the current model
    pub fn eval(&self, term: &BV) -> Option<u64> {
        let model = self.solver.get_model()?;
        model.eval(term, true)?.as_u64()
    }

    /// Model values of every bound input byte
    pub fn assignment(&self) -> Option<Vec<(usize, u8)>> {
        let model = self.solver.get_model()?;
        let mut values = Vec::new();
        for index in self.bound_variables() {
            let value = model.eval(&input_variable(index), true)?.as_u64()?;
            values.push((index, value as u8));
        }
        Some(values)
    }

    pub fn statistics(&self) -> &SolverStatistics {
        &self.stats
    }
}

/// RAII scope over an [`SmtContext`]; pops on drop
pub struct SolverScope<'a> {
    ctx: &'a mut SmtContext,
}

impl Deref for SolverScope<'_> {
    type Target = SmtContext;

    fn deref(&self) -> &SmtContext {
        self.ctx
    }
}

impl DerefMut for SolverScope<'_> {
    fn deref_mut(&mut self) -> &mut SmtContext {
        self.ctx
    }
}

impl Drop for SolverScope<'_> {
    fn drop(&mut self) {
        self.ctx.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_equals(index: usize, value: u64) -> Bool {
        input_variable(index).eq(&BV::from_u64(value, 8))
    }

    #[test]
    fn test_assignment_covers_bound_indices() {
        let mut ctx = SmtContext::new(Duration::from_secs(5));
        ctx.assert(&byte_equals(3, 0x41), &[3]);
        assert_eq!(ctx.check(), CheckResult::Sat);
        assert_eq!(ctx.assignment().unwrap(), vec![(3, 0x41)]);
        assert_eq!(ctx.statistics().queries, 1);
        assert_eq!(ctx.statistics().sat, 1);
    }

    #[test]
    fn test_scope_pops_on_drop() {
        let mut ctx = SmtContext::new(Duration::from_secs(5));
        ctx.assert(&byte_equals(0, 1), &[0]);
        {
            let mut scope = ctx.scope();
            scope.assert(&byte_equals(0, 2), &[0, 9]);
            assert_eq!(scope.depth(), 1);
            assert_eq!(scope.check(), CheckResult::Unsat);
        }
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.bound_variables().into_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(ctx.check(), CheckResult::Sat);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = SmtContext::new(Duration::from_secs(5));
        ctx.push();
        ctx.assert(&Bool::from_bool(false), &[4]);
        assert_eq!(ctx.check(), CheckResult::Unsat);
        ctx.reset();
        assert_eq!(ctx.depth(), 0);
        assert!(ctx.bound_variables().is_empty());
        assert_eq!(ctx.check(), CheckResult::Sat);
        assert_eq!(ctx.statistics().unsat, 1);
    }

    /// 32-bit value spelled by four input bytes, widened to 64 bits
    fn word(first: usize) -> BV {
        let bytes: Vec<BV> = (first..first + 4).map(input_variable).collect();
        bytes[0]
            .concat(&bytes[1])
            .concat(&bytes[2])
            .concat(&bytes[3])
            .zero_ext(32)
    }

    #[test]
    fn test_timeout_reports_unknown() {
        assert_eq!(CheckResult::from(SatResult::Unknown), CheckResult::Unknown);

        // Factor the product of the two largest 32-bit primes
        let mut ctx = SmtContext::new(Duration::from_millis(1));
        let (x, y) = (word(0), word(4));
        let one = BV::from_u64(1, 64);
        ctx.assert(&x.bvmul(&y).eq(&BV::from_u64(0xffff_ffea_0000_0055, 64)), &[0, 4]);
        ctx.assert(&x.bvugt(&one), &[0]);
        ctx.assert(&y.bvugt(&one), &[4]);

        assert_eq!(ctx.check(), CheckResult::Unknown);
        assert_eq!(ctx.statistics().unknown, 1);
        assert_eq!(ctx.statistics().queries, 1);
    }

    #[test]
    fn test_base_frame_survives_extra_pop() {
        let mut ctx = SmtContext::new(Duration::from_secs(5));
        ctx.bind(&[1]);
        ctx.pop();
        assert_eq!(ctx.depth(), 0);
        assert!(ctx.bound_variables().contains(&1));
    }
}
