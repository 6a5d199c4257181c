//! symsync - incremental constraint tracking for concolic test generation
//!
//! Path constraints observed along a traced execution are clustered into a
//! [`DependencyForest`](dependency::DependencyForest) by the input bytes they
//! read. Negating a branch only resubmits the clusters that can interact with
//! it, with every other byte pinned to its concrete value, so solver queries
//! scale with the touched cluster rather than with the path length.

pub mod dependency;
pub mod error;
pub mod expr;
pub mod oracle;
pub mod session;
pub mod surgeon;
pub mod trace;

pub use dependency::{DependencyForest, DependencySet, DependencyTree};
pub use error::{Result, SessionError};
pub use expr::{ExprArena, ExprId, Kind};
pub use oracle::{AlwaysInteresting, BranchOracle, CoverageMap, NeverInteresting};
pub use session::{BranchOutcome, Negation, SessionConfig, SolverSession, SyncMode};
pub use surgeon::GraphSurgeon;
