use std::path::Path;

use crate::api::group_dto::GroupDto;
use crate::domain::communication::session::TcpComm;
use crate::error::Result;
use crate::loader::parser::load_group_config;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

pub use crate::domain::communication::communicator::Communicator;
pub use crate::domain::communication::local::{LocalComm, LocalGroup, run_local};
pub use crate::domain::rank::{Rank, RankContext};
pub use crate::domain::scheduler::dynamic_map::{DynamicMap, MapOptions, dynamic_map, map_unordered};
pub use crate::domain::source::{AddressingMode, Indexed, Scanning, WorkSource};
pub use crate::error::Error;

/// Resolves this process's group membership and connects it to the rest of the group.
///
/// `overrides` wins over the JSON file at `file_path`, which wins over the launcher environment.
pub fn join_group(overrides: GroupDto, file_path: Option<&Path>) -> Result<TcpComm> {
    let config = load_group_config(overrides, file_path)?;
    log::info!("Joining group as rank {} of {} (coordinator at {}).", config.rank, config.size, config.coordinator_addr);

    let comm = TcpComm::connect(&config)?;
    log::info!("Group connection established.");

    Ok(comm)
}
