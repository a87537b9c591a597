use std::fs;

use crate::{config::Config, error::ConfigError};

pub fn read_config(filename: &str) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(filename).map_err(|source| ConfigError::Read {
        path: filename.to_string(),
        source,
    })?;

    parse_config(&text).map_err(|source| ConfigError::Parse {
        path: filename.to_string(),
        source,
    })
}

pub fn parse_config(text: &str) -> Result<Config, serde_yaml::Error> {
    serde_yaml::from_str(text)
}
