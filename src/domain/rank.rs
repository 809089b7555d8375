use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Position of a process inside its group.
///
/// Not convertible to `bool`; use [`RankContext::is_coordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rank(pub usize);

impl Rank {
    pub const COORDINATOR: Rank = Rank(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the current process within a fixed-size group.
///
/// Established once per process and never mutated. A group of size one is
/// valid and selects the sequential path of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankContext {
    rank: Rank,
    size: usize,
    coordinator: Rank,
}

impl RankContext {
    pub fn new(rank: usize, size: usize) -> Result<Self> {
        let rank = Rank(rank);
        if size == 0 {
            return Err(Error::ConfigError("group size must be at least 1".to_string()));
        }
        if rank.index() >= size {
            return Err(Error::ConfigError(format!("rank {} is outside of a group of size {}", rank, size)));
        }
        Ok(Self { rank, size, coordinator: Rank::COORDINATOR })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn coordinator_rank(&self) -> Rank {
        self.coordinator
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == self.coordinator
    }

    /// Number of non-coordinator members.
    pub fn workers(&self) -> usize {
        self.size - 1
    }

    pub fn is_single_process(&self) -> bool {
        self.size == 1
    }
}

impl fmt::Display for RankContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rank, self.size)
    }
}
