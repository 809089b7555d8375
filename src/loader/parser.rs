use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::api::group_dto::{GroupConfig, GroupDto};
use crate::error::Result;

/// Parses a JSON file into a given type `T`.
///
/// Errors are automatically converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let data = fs::read_to_string(file_path)?;
    let parsed_data: T = serde_json::from_str(&data)?;
    Ok(parsed_data)
}

/// Resolves the group membership: `overrides` first, then the optional JSON file, then the environment.
pub fn load_group_config(overrides: GroupDto, file_path: Option<&Path>) -> Result<GroupConfig> {
    let from_file = match file_path {
        Some(path) => {
            log::info!("Loading group configuration from '{}'.", path.display());
            parse_json_file::<GroupDto>(path)?
        }
        None => GroupDto::default(),
    };

    GroupConfig::try_from(overrides.or(from_file).or(GroupDto::from_env()))
}
