use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

use crate::criteria::{standard_definitions, OpCode, OperationDefinition};
use crate::fields::{CustomFieldDefinition, FieldType};
use crate::retry::DEFAULT_MAX_ATTEMPTS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Stations in pipeline order.
    #[serde(default, rename = "station")]
    pub stations: Vec<StationConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub station_timeout_secs: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            station_timeout_secs: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PoolConfig {
    /// Command run to connect a share; `{share}`, `{user}`, `{password}` are substituted.
    #[serde(default)]
    pub connect_command: Option<Vec<String>>,
    #[serde(default)]
    pub disconnect_command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StationConfig {
    /// Registry key of the station implementation, e.g. `"folder"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub max_search_results: Option<usize>,
    /// Age after which an item counts as stuck.
    #[serde(default)]
    pub age_limit_secs: Option<u64>,
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    /// Keys specific to the station type.
    #[serde(flatten)]
    pub settings: toml::Table,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct OperationConfig {
    pub op_code: String,
    #[serde(default)]
    pub operand_count: u8,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub public: bool,
}

impl StationConfig {
    /// Description, falling back to the station type.
    pub fn display_name(&self) -> &str {
        self.description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&self.kind)
    }

    /// Interpret the type-specific keys as `T`.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.settings.clone())
            .try_into()
            .with_context(|| format!("Invalid settings for {} station '{}'", self.kind, self.display_name()))
    }

    /// Standard operations followed by the configured custom ones.
    pub fn operation_definitions(&self) -> Vec<OperationDefinition> {
        let mut defs = standard_definitions();
        for op in &self.operations {
            defs.push(OperationDefinition::new(
                OpCode::from_code(&op.op_code),
                op.operand_count,
                op.label.clone().unwrap_or_else(|| op.op_code.clone()),
            ));
        }
        defs
    }

    pub fn custom_fields(&self) -> Result<Vec<CustomFieldDefinition>> {
        self.fields
            .iter()
            .map(|f| {
                let field_type: FieldType = f
                    .field_type
                    .as_deref()
                    .unwrap_or_default()
                    .parse()
                    .with_context(|| format!("Invalid type declared for custom field {}", f.name))?;
                Ok(CustomFieldDefinition {
                    name: f.name.clone(),
                    field_type,
                    label: f.label.clone(),
                    public: f.public,
                    searchable: f.searchable,
                })
            })
            .collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.search.max_attempts < 1 {
        anyhow::bail!("search.max_attempts must be >= 1");
    }

    if config.search.station_timeout_secs == Some(0) {
        anyhow::bail!("search.station_timeout_secs must be > 0 when set");
    }

    for (index, station) in config.stations.iter().enumerate() {
        if station.kind.trim().is_empty() {
            anyhow::bail!("station #{} has an empty type", index);
        }
        if station.max_search_results == Some(0) {
            anyhow::bail!("station '{}': max_search_results must be > 0", station.display_name());
        }
        for op in &station.operations {
            if op.op_code.trim().is_empty() {
                anyhow::bail!("station '{}': operation with empty op_code", station.display_name());
            }
        }
        station.custom_fields()?;
    }

    if matches!(&config.pool.connect_command, Some(c) if c.is_empty()) {
        anyhow::bail!("pool.connect_command must not be empty when set");
    }

    Ok(config)
}
