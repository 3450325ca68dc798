//! Settings type definitions.
//!
//! All types use camelCase JSON names and `#[serde(default)]`, so a partial
//! settings file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::loader::arbor_home;

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArborSettings {
    pub database: DatabaseSettings,
    pub agent: AgentSettings,
    pub logging: LoggingSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path to the agent/event database.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: arbor_home()
                .join("database")
                .join("arbor.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Written as a `system` event on a fresh install.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub default_provider: String,
    pub default_model: String,
    /// One of `none`, `min`, `low`, `med`, `high`.
    pub default_thinking: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            default_provider: "anthropic".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            default_thinking: "med".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
    /// Persist warn+ records to a SQLite log database.
    pub persist_warnings: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: true,
            log_db_path: arbor_home()
                .join("database")
                .join("logs.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// How often the main loop polls in-flight tool executions.
    pub tick_interval_ms: u64,
    /// Working directory handed to tools. Defaults to the process cwd.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            working_directory: None,
        }
    }
}
