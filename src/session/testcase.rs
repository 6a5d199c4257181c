//! Test case output

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use crate::error::{Result, SessionError};

/// How a test case was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCaseKind {
    /// Negation solved together with the synchronised path
    Exact,
    /// Negation solved alone after the path was unsatisfiable
    Optimistic,
}

/// Numbers and writes generated inputs
#[derive(Debug, Default)]
pub struct TestCaseSink {
    output_dir: Option<PathBuf>,
    counter: usize,
}

impl TestCaseSink {
    pub fn new(output_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            counter: 0,
        }
    }

    /// Number of test cases emitted so far
    pub fn generated(&self) -> usize {
        self.counter
    }

    pub fn file_name(counter: usize, kind: TestCaseKind) -> String {
        match kind {
            TestCaseKind::Exact => format!("{:06}", counter),
            TestCaseKind::Optimistic => format!("{:06}-optimistic", counter),
        }
    }

    /// Emit one test case, returning the file written if any
    pub fn save(&mut self, bytes: &[u8], kind: TestCaseKind) -> Result<Option<PathBuf>> {
        let name = Self::file_name(self.counter, kind);
        let Some(dir) = &self.output_dir else {
            log::info!("test case {}: {}", name, escape(bytes));
            self.counter += 1;
            return Ok(None);
        };

        let path = dir.join(name);
        fs::write(&path, bytes).map_err(|source| SessionError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("wrote test case {}", path.display());
        self.counter += 1;
        Ok(Some(path))
    }
}

fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        let _ = write!(out, "\\x{:02X}", b);
    }
    out
}
