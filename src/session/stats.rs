//! Session counters

use std::fmt;

use super::smt::SolverStatistics;

#[derive(Debug, Clone, Default)]
pub struct SessionStatistics {
    /// Branch events seen
    pub branches: u64,
    /// Branches whose condition had no symbolic input
    pub constant_branches: u64,
    pub interesting_branches: u64,
    pub negations_solved: u64,
    pub negations_optimistic: u64,
    pub negations_unsolved: u64,
    /// Address events that triggered min/max probing
    pub probes: u64,
    /// Solver rounds spent tightening bounds
    pub probe_iterations: u64,
    /// Values found by solve-all requests
    pub enumerated_values: u64,
    pub testcases: u64,
    pub optimistic_testcases: u64,
    pub solver: SolverStatistics,
}

impl fmt::Display for SessionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "branches: {} ({} constant, {} interesting)",
            self.branches, self.constant_branches, self.interesting_branches
        )?;
        writeln!(
            f,
            "negations: {} solved, {} optimistic, {} unsolved",
            self.negations_solved, self.negations_optimistic, self.negations_unsolved
        )?;
        writeln!(
            f,
            "probes: {} ({} iterations), enumerated values: {}",
            self.probes, self.probe_iterations, self.enumerated_values
        )?;
        writeln!(
            f,
            "test cases: {} ({} optimistic)",
            self.testcases, self.optimistic_testcases
        )?;
        write!(
            f,
            "solver: {} queries ({} sat, {} unsat, {} unknown) in {:.3}s",
            self.solver.queries,
            self.solver.sat,
            self.solver.unsat,
            self.solver.unknown,
            self.solver.solving_time.as_secs_f64()
        )
    }
}
