use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_port() -> u16 {
    22
}

/// One server entry from the config file.
///
/// Field names mirror the JSON file (camelCase). `requiredServerLogIn`
/// references another record's alias: that server must be logged into
/// first, and this record's ssh command is issued inside its shell.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub server: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub server_display_name: String,
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required_server_log_in: Option<String>,
}

impl ServerRecord {
    /// The ssh command line for this record, e.g. `ssh bob@10.0.0.5 -p22`.
    /// Used both to spawn the first hop and as a shell line for later hops.
    pub fn ssh_command(&self) -> String {
        format!("ssh {}@{} -p{}", self.username, self.server, self.port)
    }

    /// Successful-login marker: the `user@host` fragment every shell prompt
    /// on the box contains. Password prompts vary, this doesn't.
    pub fn login_marker(&self) -> String {
        format!("{}@{}", self.username, self.server_display_name)
    }
}

/// The full config file: an ordered list of servers.
/// Loaded once per invocation, read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub servers: Vec<ServerRecord>,
}

impl Config {
    /// Load and parse the config file. Missing, unreadable or malformed
    /// files are fatal with the path in the error chain.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Config file {} is not valid JSON", path.display()))?;
        Ok(config)
    }

    /// Find the server record carrying the given alias.
    ///
    /// First match wins. If two records share an alias the earlier one in
    /// the file is returned; which record "owns" a duplicated alias is
    /// undefined, so don't duplicate aliases.
    pub fn resolve(&self, alias: &str) -> Result<&ServerRecord, ConfigError> {
        self.servers
            .iter()
            .find(|s| s.aliases.iter().any(|a| a == alias))
            .ok_or_else(|| ConfigError::UnknownAlias {
                alias: alias.to_string(),
                known: self.known_aliases(),
            })
    }

    /// Every alias in the file, in config order.
    pub fn known_aliases(&self) -> Vec<String> {
        self.servers
            .iter()
            .flat_map(|s| s.aliases.iter().cloned())
            .collect()
    }
}
