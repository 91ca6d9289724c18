//! The ordered set of stations a search fans out to.
//!
//! Built from the `[[station]]` entries of the config file, in file order.
//! A station that cannot be created or connected does not fail the
//! pipeline: it is recorded as unavailable and left out of searches.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PoolConfig};
use crate::criteria::OperationDefinition;
use crate::fields::CustomFieldDefinition;
use crate::models::StationId;
use crate::pool::{CommandConnector, ConnectionPool, NoopConnector};
use crate::traits::{Station, StationContext, StationRegistry};

/// A station entry from the configuration, live or not.
#[derive(Debug, Clone)]
pub struct ConfiguredStation {
    pub id: StationId,
    pub kind: String,
    pub description: String,
    /// Created and connected successfully.
    pub enabled: bool,
    pub error: Option<String>,
}

/// A live station together with its configured position.
#[derive(Clone)]
pub struct LiveStation {
    pub id: StationId,
    pub station: Arc<dyn Station>,
}

pub struct Pipeline {
    description: String,
    configured: Vec<ConfiguredStation>,
    stations: Vec<LiveStation>,
    errors: Vec<String>,
}

/// Build the pool described by `[pool]`.
pub fn connection_pool(config: &PoolConfig) -> Result<ConnectionPool> {
    match &config.connect_command {
        Some(connect) => {
            let connector = CommandConnector::new(connect.clone(), config.disconnect_command.clone())?;
            Ok(ConnectionPool::new(connector))
        }
        None => Ok(ConnectionPool::new(NoopConnector)),
    }
}

impl Pipeline {
    /// A pipeline over already initialized stations, all enabled, in the
    /// given order.
    pub fn new(description: impl Into<String>, stations: Vec<Arc<dyn Station>>) -> Self {
        let mut configured = Vec::with_capacity(stations.len());
        let mut live = Vec::with_capacity(stations.len());
        for (index, station) in stations.into_iter().enumerate() {
            let id = StationId(index);
            configured.push(ConfiguredStation {
                id,
                kind: station.station_type().to_string(),
                description: station.description().to_string(),
                enabled: true,
                error: None,
            });
            live.push(LiveStation { id, station });
        }
        Self {
            description: description.into(),
            configured,
            stations: live,
            errors: Vec::new(),
        }
    }

    pub fn from_config(config: &Config, registry: &StationRegistry, ctx: &StationContext) -> Self {
        let mut pipeline = Self {
            description: config.pipeline.description.clone(),
            configured: Vec::new(),
            stations: Vec::new(),
            errors: Vec::new(),
        };

        for (index, station_config) in config.stations.iter().enumerate() {
            let id = StationId(index);
            let mut entry = ConfiguredStation {
                id,
                kind: station_config.kind.clone(),
                description: station_config.display_name().to_string(),
                enabled: false,
                error: None,
            };

            if !station_config.active {
                debug!(station = %entry.description, "inactive, not initialized");
                pipeline.configured.push(entry);
                continue;
            }

            let created = registry.create(station_config, ctx).and_then(|station| {
                station.connect()?;
                Ok(station)
            });

            match created {
                Ok(station) => {
                    entry.description = station.description().to_string();
                    entry.enabled = true;
                    info!(station = %entry.description, id = %id, "station ready");
                    pipeline.stations.push(LiveStation { id, station });
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(station = %entry.description, "station not available: {}", message);
                    pipeline
                        .errors
                        .push(format!("Station not available: {}\n{}", entry.description, message));
                    entry.error = Some(message);
                }
            }
            pipeline.configured.push(entry);
        }

        pipeline
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Live stations in configured order.
    pub fn stations(&self) -> &[LiveStation] {
        &self.stations
    }

    pub fn station(&self, id: StationId) -> Option<&Arc<dyn Station>> {
        self.stations.iter().find(|s| s.id == id).map(|s| &s.station)
    }

    pub fn configured_stations(&self) -> &[ConfiguredStation] {
        &self.configured
    }

    /// Errors from building the pipeline.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Distinct roles of the live stations, sorted ignoring case.
    pub fn roles(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut roles: Vec<String> = self
            .stations
            .iter()
            .flat_map(|s| s.station.roles().iter().cloned())
            .filter(|r| seen.insert(r.clone()))
            .collect();
        roles.sort_by_key(|r| r.to_uppercase());
        roles
    }

    /// Distinct union of the operations of all live stations.
    pub fn configured_operations(&self) -> Vec<OperationDefinition> {
        let mut ops: Vec<OperationDefinition> = Vec::new();
        for live in &self.stations {
            for op in live.station.operations() {
                if !ops.contains(op) {
                    ops.push(op.clone());
                }
            }
        }
        ops
    }

    /// Distinct union of the searchable custom fields of all live stations.
    pub fn configured_searchable_custom_fields(&self) -> Vec<CustomFieldDefinition> {
        let mut seen = HashSet::new();
        self.stations
            .iter()
            .flat_map(|s| s.station.searchable_fields())
            .filter(|f| seen.insert(f.clone()))
            .collect()
    }

    /// Disconnect every live station. Failures are logged and skipped.
    pub fn shutdown(&self) {
        for live in &self.stations {
            if let Err(e) = live.station.disconnect() {
                warn!(station = %live.station.description(), "error disconnecting station: {:#}", e);
            }
        }
        info!("pipeline shut down");
    }
}
