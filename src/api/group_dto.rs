use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_COORDINATOR_ADDR: &str = "127.0.0.1:47800";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Environment variable naming the coordinator's listen address.
pub const COORDINATOR_ENV: &str = "PULL_MAP_COORDINATOR";

const OMPI_RANK_ENV: &str = "OMPI_COMM_WORLD_RANK";
const OMPI_SIZE_ENV: &str = "OMPI_COMM_WORLD_SIZE";
const PMI_RANK_ENV: &str = "PMI_RANK";
const PMI_SIZE_ENV: &str = "PMI_SIZE";

/// Group membership as it appears in a JSON file, the environment or on the command line.
///
/// Every field is optional so that partial descriptions from several sources can be layered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub rank: Option<usize>,
    pub size: Option<usize>,
    pub coordinator_addr: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub retry_interval_ms: Option<u64>,
}

impl GroupDto {
    /// Reads launcher variables of Open MPI and MPICH/Intel MPI.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|value| value.trim().parse::<usize>().ok());

        let ompi = (number(OMPI_RANK_ENV), number(OMPI_SIZE_ENV));
        let pmi = (number(PMI_RANK_ENV), number(PMI_SIZE_ENV));

        if let (Some(ompi_size), Some(pmi_size)) = (ompi.1, pmi.1) {
            if ompi_size != pmi_size {
                log::warn!(
                    "Launcher variables disagree: {}={} but {}={}. Using the Open MPI values.",
                    OMPI_SIZE_ENV,
                    ompi_size,
                    PMI_SIZE_ENV,
                    pmi_size
                );
            }
        }

        let (rank, size) = match ompi {
            (Some(rank), Some(size)) => (Some(rank), Some(size)),
            _ => pmi,
        };

        GroupDto { rank, size, coordinator_addr: lookup(COORDINATOR_ENV), ..Default::default() }
    }

    /// Fills every unset field from `fallback`.
    pub fn or(self, fallback: GroupDto) -> GroupDto {
        GroupDto {
            rank: self.rank.or(fallback.rank),
            size: self.size.or(fallback.size),
            coordinator_addr: self.coordinator_addr.or(fallback.coordinator_addr),
            connect_timeout_ms: self.connect_timeout_ms.or(fallback.connect_timeout_ms),
            retry_interval_ms: self.retry_interval_ms.or(fallback.retry_interval_ms),
        }
    }
}

/// Fully resolved and validated group membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub rank: usize,
    pub size: usize,
    pub coordinator_addr: String,
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
}

impl TryFrom<GroupDto> for GroupConfig {
    type Error = Error;

    /// Without any rank/size information the process forms a group of one.
    fn try_from(dto: GroupDto) -> Result<Self> {
        let (rank, size) = match (dto.rank, dto.size) {
            (Some(rank), Some(size)) => (rank, size),
            (None, None) => (0, 1),
            (Some(_), None) => return Err(Error::ConfigError("a rank was given without a group size".to_string())),
            (None, Some(_)) => return Err(Error::ConfigError("a group size was given without a rank".to_string())),
        };

        if size == 0 {
            return Err(Error::ConfigError("group size must be at least 1".to_string()));
        }
        if rank >= size {
            return Err(Error::ConfigError(format!("rank {} is outside of a group of size {}", rank, size)));
        }

        let coordinator_addr = dto.coordinator_addr.unwrap_or_else(|| DEFAULT_COORDINATOR_ADDR.to_string());
        if size > 1 && coordinator_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::ConfigError(format!("'{}' is not a valid coordinator address", coordinator_addr)));
        }

        Ok(GroupConfig {
            rank,
            size,
            coordinator_addr,
            connect_timeout_ms: dto.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_interval_ms: dto.retry_interval_ms.unwrap_or(DEFAULT_RETRY_INTERVAL_MS),
        })
    }
}
