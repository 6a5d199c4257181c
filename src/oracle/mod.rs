//! Branch interestingness oracles
//!
//! The session asks an oracle whether flipping a branch is worth a solver
//! query. [`CoverageMap`] answers with an AFL-style edge bitmap: a branch is
//! interesting when the edge its negation would take has never been seen.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SessionError};

/// Decides whether negating a branch is worth a solver query
pub trait BranchOracle {
    fn is_interesting(&mut self, pc: u64, taken: bool) -> bool;
}

/// Every branch is interesting
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysInteresting;

impl BranchOracle for AlwaysInteresting {
    fn is_interesting(&mut self, _pc: u64, _taken: bool) -> bool {
        true
    }
}

/// No branch is interesting; only constraints are recorded
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverInteresting;

impl BranchOracle for NeverInteresting {
    fn is_interesting(&mut self, _pc: u64, _taken: bool) -> bool {
        false
    }
}

/// Size of the edge bitmap in bytes
pub const MAP_SIZE: usize = 1 << 16;

/// Context-sensitive edge coverage bitmap
///
/// Bytes follow AFL's "virgin" convention: `0xff` means the edge has never
/// been hit. Loading and saving the map lets consecutive trace runs share
/// what has already been covered.
#[derive(Debug, Clone)]
pub struct CoverageMap {
    virgin: Vec<u8>,
    prev_loc: u64,
    path: Option<PathBuf>,
}

impl Default for CoverageMap {
    fn default() -> Self {
        Self {
            virgin: vec![0xff; MAP_SIZE],
            prev_loc: 0,
            path: None,
        }
    }
}

impl CoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a bitmap from `path`, starting fresh if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let virgin = match fs::read(path) {
            Ok(bytes) if bytes.len() == MAP_SIZE => bytes,
            Ok(bytes) => {
                return Err(SessionError::config(
                    path,
                    format!("bitmap has {} bytes, expected {}", bytes.len(), MAP_SIZE),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![0xff; MAP_SIZE],
            Err(source) => {
                return Err(SessionError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            virgin,
            prev_loc: 0,
            path: Some(path.to_path_buf()),
        })
    }

    /// Write the bitmap back to the file it was loaded from
    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => fs::write(path, &self.virgin).map_err(|source| SessionError::Io {
                path: path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    fn hash_pc(pc: u64, taken: bool) -> u64 {
        // splitmix64 finaliser over the branch identity
        let mut h = pc.wrapping_mul(2).wrapping_add(taken as u64);
        h = (h ^ (h >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        h = (h ^ (h >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        h ^ (h >> 31)
    }

    fn index(&self, h: u64) -> usize {
        ((self.prev_loc ^ h) as usize) & (MAP_SIZE - 1)
    }

    pub fn is_virgin(&self, pc: u64, taken: bool) -> bool {
        self.virgin[self.index(Self::hash_pc(pc, taken))] == 0xff
    }

    /// Number of edges hit so far
    pub fn covered_edges(&self) -> usize {
        self.virgin.iter().filter(|b| **b != 0xff).count()
    }
}

impl BranchOracle for CoverageMap {
    fn is_interesting(&mut self, pc: u64, taken: bool) -> bool {
        let taken_hash = Self::hash_pc(pc, taken);
        let flipped = self.index(Self::hash_pc(pc, !taken));
        let hit = self.index(taken_hash);

        let interesting = self.virgin[flipped] == 0xff;
        self.virgin[hit] = 0;
        self.prev_loc = taken_hash >> 1;
        interesting
    }
}
