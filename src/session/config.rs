//! Configuration types for a solving session

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SessionError};

/// Default per-query solver timeout
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_secs(10);

/// How recorded constraints are pinned during synchronisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Flip concreteness flags on shared reads, graph untouched
    #[default]
    Mark,
    /// Replace pinned reads by constants in a per-query copy of each constraint
    Rewrite,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Mark => write!(f, "mark"),
            SyncMode::Rewrite => write!(f, "rewrite"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mark" | "flag" => Ok(SyncMode::Mark),
            "rewrite" | "surgery" => Ok(SyncMode::Rewrite),
            _ => Err(format!(
                "Unknown sync mode: '{}'. Valid options: mark, rewrite",
                s
            )),
        }
    }
}

/// Configuration for a [`SolverSession`](super::SolverSession)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Concrete input the traced run consumed
    pub input_file: PathBuf,
    /// Where test cases are written (None = report on stderr)
    pub output_dir: Option<PathBuf>,
    /// Per-query solver timeout
    pub solver_timeout: Duration,
    pub sync_mode: SyncMode,
    /// Check joint satisfiability of all recorded constraints on drop (debug builds)
    pub check_feasible: bool,
    /// Cap on values enumerated by a single solve-all request (None = until unsat)
    pub enumeration_limit: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::new(),
            output_dir: None,
            solver_timeout: DEFAULT_SOLVER_TIMEOUT,
            sync_mode: SyncMode::default(),
            check_feasible: false,
            enumeration_limit: None,
        }
    }
}

impl SessionConfig {
    pub fn new(input_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            ..Self::default()
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = timeout;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn with_feasibility_check(mut self, enabled: bool) -> Self {
        self.check_feasible = enabled;
        self
    }

    pub fn with_enumeration_limit(mut self, limit: Option<usize>) -> Self {
        self.enumeration_limit = limit;
        self
    }

    /// Check the output directory exists
    pub fn validate(&self) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            match fs::metadata(dir) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(SessionError::config(dir, "output path is not a directory")),
                Err(e) => {
                    return Err(SessionError::config(
                        dir,
                        format!("output directory unavailable: {}", e),
                    ));
                }
            }
        }
        if self.solver_timeout.is_zero() {
            return Err(SessionError::config(
                &self.input_file,
                "solver timeout must be positive",
            ));
        }
        Ok(())
    }

    /// Read the concrete input bytes
    pub fn read_input(&self) -> Result<Vec<u8>> {
        fs::read(&self.input_file).map_err(|e| {
            SessionError::config(&self.input_file, format!("cannot read input: {}", e))
        })
    }
}
