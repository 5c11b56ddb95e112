use std::path::Path;

use serde::Deserialize;

/// Defaults loaded from a TOML file. Command line flags take precedence.
#[derive(Deserialize, Default, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub urls: Vec<String>,
    pub output: Option<String>,
    pub headers: Vec<String>,
    pub cookies: Option<String>,
    pub timeout: Option<u64>,
}

impl Config {
    pub fn load(file: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(file)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }
}
