//! The station contract and the registry that builds stations from config.
//!
//! A [`Station`] is one independently operated backing store that can be
//! searched for items. Stations are long-lived, shared between searches as
//! `Arc<dyn Station>`, and searched concurrently with each other, one
//! blocking worker per station.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             StationRegistry              │
//! │  ┌─────────┐ ┌────────────────────────┐  │
//! │  │Built-in │ │  Custom (Rust)         │  │
//! │  │ folder  │ │  register("db", f)     │  │
//! │  └─────────┘ └────────────────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!       Pipeline::from_config() → Search
//! ```
//!
//! # Usage
//!
//! ```rust
//! use stationwatch::traits::StationRegistry;
//!
//! let mut registry = StationRegistry::with_builtins();
//! // registry.register("database", DatabaseStation::create);
//! assert!(registry.types().contains(&"folder"));
//! ```

use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StationConfig;
use crate::criteria::{standard_definitions, Criterion, OperationDefinition};
use crate::error::StationError;
use crate::fields::CustomFieldDefinition;
use crate::models::{Instance, ResultSet};
use crate::pool::ConnectionPool;

// ═══════════════════════════════════════════════════════════════════════
// StationCore
// ═══════════════════════════════════════════════════════════════════════

/// State every station carries regardless of its backing store.
#[derive(Debug, Clone)]
pub struct StationCore {
    description: String,
    roles: Vec<String>,
    operations: Vec<OperationDefinition>,
    custom_fields: Vec<CustomFieldDefinition>,
    max_search_results: Option<usize>,
    age_limit: Option<Duration>,
}

impl StationCore {
    /// A core supporting the standard operations, no roles, no custom fields.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            roles: Vec::new(),
            operations: standard_definitions(),
            custom_fields: Vec::new(),
            max_search_results: None,
            age_limit: None,
        }
    }

    pub fn from_config(config: &StationConfig) -> Result<Self> {
        Ok(Self {
            description: config.display_name().to_string(),
            roles: config.roles.clone(),
            operations: config.operation_definitions(),
            custom_fields: config.custom_fields()?,
            max_search_results: config.max_search_results,
            age_limit: config.age_limit_secs.map(Duration::from_secs),
        })
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_operation(mut self, op: OperationDefinition) -> Self {
        self.operations.push(op);
        self
    }

    pub fn with_custom_field(mut self, field: CustomFieldDefinition) -> Self {
        self.custom_fields.push(field);
        self
    }

    pub fn with_max_search_results(mut self, max: usize) -> Self {
        self.max_search_results = Some(max);
        self
    }

    pub fn with_age_limit(mut self, limit: Duration) -> Self {
        self.age_limit = Some(limit);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn operations(&self) -> &[OperationDefinition] {
        &self.operations
    }

    pub fn custom_fields(&self) -> &[CustomFieldDefinition] {
        &self.custom_fields
    }

    pub fn max_search_results(&self) -> Option<usize> {
        self.max_search_results
    }

    /// Items older than this count as stuck.
    pub fn age_limit(&self) -> Option<Duration> {
        self.age_limit
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Station Trait
// ═══════════════════════════════════════════════════════════════════════

/// A searchable backing store.
///
/// Only [`core`](Station::core) and [`do_search`](Station::do_search) are
/// required; everything else has a default driven by the core.
///
/// # Example
///
/// ```rust
/// use stationwatch::criteria::Criterion;
/// use stationwatch::error::StationError;
/// use stationwatch::models::Instance;
/// use stationwatch::traits::{Station, StationCore};
///
/// pub struct StaticStation {
///     core: StationCore,
/// }
///
/// impl Station for StaticStation {
///     fn core(&self) -> &StationCore { &self.core }
///
///     fn do_search(&self, _criteria: &[Criterion]) -> Result<Vec<Instance>, StationError> {
///         Ok(vec![Instance::new("ORDER").with_id("1001")])
///     }
/// }
/// ```
pub trait Station: Send + Sync {
    fn core(&self) -> &StationCore;

    /// Registry key of the implementation, e.g. `"folder"`.
    fn station_type(&self) -> &str {
        "custom"
    }

    fn description(&self) -> &str {
        self.core().description()
    }

    /// Called once when the pipeline is built.
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Called once when the pipeline shuts down.
    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Find the items matching all `criteria`.
    ///
    /// May block. Called concurrently with other stations' searches, and
    /// possibly several times per search when it fails transiently.
    fn do_search(&self, criteria: &[Criterion]) -> Result<Vec<Instance>, StationError>;

    fn operations(&self) -> &[OperationDefinition] {
        self.core().operations()
    }

    fn roles(&self) -> &[String] {
        self.core().roles()
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Fail with [`StationError::UnsupportedCriterion`] naming the first
    /// criterion whose operation this station does not declare.
    ///
    /// Must not have side effects.
    fn check_supported_criteria(&self, criteria: &[Criterion]) -> Result<(), StationError> {
        let ops = self.operations();
        match criteria
            .iter()
            .find(|c| !ops.iter().any(|op| op.op_code == c.operation))
        {
            Some(c) => Err(StationError::unsupported_operation(&c.operation)),
            None => Ok(()),
        }
    }

    fn custom_fields(&self) -> &[CustomFieldDefinition] {
        self.core().custom_fields()
    }

    fn searchable_fields(&self) -> Vec<CustomFieldDefinition> {
        self.custom_fields()
            .iter()
            .filter(|f| f.searchable)
            .cloned()
            .collect()
    }

    fn public_fields(&self) -> Vec<CustomFieldDefinition> {
        self.custom_fields()
            .iter()
            .filter(|f| f.public)
            .cloned()
            .collect()
    }

    /// Fill in values of `fields` for items in `targets`.
    ///
    /// Runs after every station has searched, so a station may annotate
    /// items found elsewhere. Values are written with
    /// [`ItemRef::set_public_field`](crate::models::ItemRef::set_public_field).
    fn set_public_field_values(
        &self,
        _fields: &[CustomFieldDefinition],
        _targets: &[ResultSet],
    ) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// StationContext
// ═══════════════════════════════════════════════════════════════════════

/// Shared services handed to station factories.
#[derive(Clone, Default)]
pub struct StationContext {
    pool: ConnectionPool,
}

impl StationContext {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════
// StationRegistry
// ═══════════════════════════════════════════════════════════════════════

/// Builds a station from its configuration entry.
pub type StationFactory = fn(&StationConfig, &StationContext) -> Result<Arc<dyn Station>>;

/// Maps station `type` names to factories.
///
/// Use [`StationRegistry::with_builtins`] for a registry pre-loaded with
/// the built-in stations, then [`register`](StationRegistry::register)
/// custom ones.
#[derive(Default)]
pub struct StationRegistry {
    factories: BTreeMap<String, StationFactory>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        use crate::station_folder::FolderStation;

        let mut registry = Self::new();
        registry.register("folder", FolderStation::create);
        registry
    }

    /// Register a factory, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: StationFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, config: &StationConfig, ctx: &StationContext) -> Result<Arc<dyn Station>> {
        match self.factories.get(&config.kind) {
            Some(factory) => factory(config, ctx),
            None => bail!("Unknown station type: {}", config.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::OpCode;
    use crate::fields::FieldType;

    struct Fixed {
        core: StationCore,
    }

    impl Station for Fixed {
        fn core(&self) -> &StationCore {
            &self.core
        }

        fn do_search(&self, _criteria: &[Criterion]) -> Result<Vec<Instance>, StationError> {
            Ok(vec![Instance::new("ORDER").with_id("1")])
        }
    }

    fn fixed() -> Fixed {
        Fixed {
            core: StationCore::new("fixed")
                .with_roles(["Intake"])
                .with_operation(OperationDefinition::new(OpCode::Custom("STARTS_WITH".into()), 2, "starts with"))
                .with_custom_field(CustomFieldDefinition::new("CUSTOMER", FieldType::Text).searchable())
                .with_custom_field(CustomFieldDefinition::new("AMOUNT", FieldType::Number).public()),
        }
    }

    #[test]
    fn check_supported_names_first_unsupported_operation() {
        let s = fixed();
        assert!(s
            .check_supported_criteria(&[
                Criterion::binary("ID", OpCode::Equal, "1"),
                Criterion::binary("ID", OpCode::Custom("STARTS_WITH".into()), "1"),
                Criterion::status(OpCode::Stuck),
            ])
            .is_ok());

        let err = s
            .check_supported_criteria(&[
                Criterion::binary("ID", OpCode::Equal, "1"),
                Criterion::status(OpCode::Error),
                Criterion::new(Some("ID"), OpCode::Empty, None),
            ])
            .unwrap_err();
        assert!(matches!(err, StationError::UnsupportedCriterion(_)));
        assert_eq!(err.to_string(), "Unsupported operation: IS_ERROR");
    }

    #[test]
    fn field_and_role_views() {
        let s = fixed();
        assert!(s.has_role("intake"));
        assert!(!s.has_role("archive"));
        assert_eq!(s.description(), "fixed");
        assert_eq!(s.station_type(), "custom");
        assert_eq!(s.searchable_fields()[0].name, "CUSTOMER");
        assert_eq!(s.public_fields()[0].name, "AMOUNT");
        assert_eq!(s.searchable_fields().len(), 1);
    }

    #[test]
    fn registry_rejects_unknown_type() {
        let registry = StationRegistry::with_builtins();
        assert_eq!(registry.types(), vec!["folder"]);

        let config: StationConfig = toml::from_str("type = \"oracle\"").unwrap();
        let err = registry
            .create(&config, &StationContext::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Unknown station type: oracle");
    }

    #[test]
    fn registry_accepts_custom_factories() {
        fn make(config: &StationConfig, _ctx: &StationContext) -> Result<Arc<dyn Station>> {
            Ok(Arc::new(Fixed {
                core: StationCore::from_config(config)?,
            }))
        }

        let mut registry = StationRegistry::new();
        registry.register("fixed", make);
        let config: StationConfig =
            toml::from_str("type = \"fixed\"\ndescription = \"Stub\"\nroles = [\"a\"]").unwrap();
        let station = registry.create(&config, &StationContext::default()).unwrap();
        assert_eq!(station.description(), "Stub");
        assert!(station.has_role("A"));
    }
}
