//! Configuration loading and management
//!
//! Handles parsing of `trackcore.toml` configuration files. The config is an
//! immutable table of allowed enum values and defaults, loaded at startup and
//! passed explicitly into validators and services rather than imported as
//! shared global state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{GrantRole, SubTaskStatus};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sub-task configuration
    #[serde(default)]
    pub sub_tasks: SubTaskConfig,

    /// Member/role configuration
    #[serde(default)]
    pub members: MemberConfig,

    /// Pagination defaults for store queries
    #[serde(default)]
    pub query: QueryConfig,

    /// Reference synchronization configuration
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sub_tasks: SubTaskConfig::default(),
            members: MemberConfig::default(),
            query: QueryConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a `trackcore.toml` file, falling back to
    /// defaults when the file is missing.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Sub-task status table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskConfig {
    /// Statuses in board order
    #[serde(default = "default_sub_task_statuses")]
    pub statuses: Vec<String>,

    /// Status assigned when none is given
    #[serde(default = "default_sub_task_status")]
    pub default_status: String,
}

impl SubTaskConfig {
    /// Resolve the configured default against the board table.
    pub fn resolve_default(&self) -> Result<SubTaskStatus> {
        self.parse_status(&self.default_status)
    }

    /// Parse a status name, requiring it to appear in the board table.
    pub fn parse_status(&self, name: &str) -> Result<SubTaskStatus> {
        if !self.statuses.iter().any(|status| status == name) {
            return Err(Error::Validation(format!(
                "status {name} is not on the configured board"
            )));
        }
        name.parse()
    }

    /// Check that an already-typed status is on the configured board.
    pub fn ensure_allowed(&self, status: SubTaskStatus) -> Result<()> {
        if self.statuses.iter().any(|entry| entry == status.as_str()) {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "status {} is not on the configured board",
                status.as_str()
            )))
        }
    }
}

fn default_sub_task_statuses() -> Vec<String> {
    ["todo", "inProgress", "developmentDone", "qaTest", "done"]
        .iter()
        .map(|status| status.to_string())
        .collect()
}

fn default_sub_task_status() -> String {
    "todo".to_string()
}

impl Default for SubTaskConfig {
    fn default() -> Self {
        Self {
            statuses: default_sub_task_statuses(),
            default_status: default_sub_task_status(),
        }
    }
}

/// Member/role defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Role granted to members joining a team
    #[serde(default = "default_member_role")]
    pub default_role: String,

    /// Roles assignable through role grants
    #[serde(default = "default_grant_roles")]
    pub grant_roles: Vec<String>,
}

impl MemberConfig {
    /// Role for members joining without an explicit grant.
    pub fn resolve_default_role(&self) -> Result<GrantRole> {
        self.default_role.parse()
    }

    /// Check that a role may be handed out through grants.
    pub fn ensure_grantable(&self, role: GrantRole) -> Result<()> {
        if self.grant_roles.iter().any(|entry| entry == role.as_str()) {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "role {} is not grantable",
                role.as_str()
            )))
        }
    }
}

fn default_member_role() -> String {
    "view".to_string()
}

fn default_grant_roles() -> Vec<String> {
    ["edit", "board_lead", "view"]
        .iter()
        .map(|role| role.to_string())
        .collect()
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            default_role: default_member_role(),
            grant_roles: default_grant_roles(),
        }
    }
}

/// Pagination defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Maximum results per page when the caller gives no limit
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

fn default_limit() -> usize {
    10
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

/// Reference synchronization tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Retries for read-modify-write loops that hit a version conflict
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}
