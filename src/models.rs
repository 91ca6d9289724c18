//! Core data models used throughout stationwatch.
//!
//! These types represent the items stations find and the per-station result
//! sets the search coordinator assembles.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Position of a station in the pipeline configuration.
///
/// Assigned to every configured station, active or not, so ids stay stable
/// when stations are disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StationId(pub usize);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-unique reference id issued by [`InstanceMemory`](crate::memory::InstanceMemory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RefId(pub u64);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One instance of an item (order, document, file) found at a station.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Instance {
    /// Identifying number of the item, e.g. order number.
    pub id: Option<String>,
    /// Identifier of this particular instance of the item.
    pub unique_id: Option<String>,
    /// e.g. `ORDER`, `CUSTOMER`, `DOCUMENT`.
    pub entity_name: String,
    /// Status with regard to the station, e.g. `WAITING`.
    pub status: Option<String>,
    pub arrival_date: Option<DateTime<Utc>>,
    pub update_date: Option<DateTime<Utc>>,
    /// Display name of the content, e.g. `folder/file.xml`.
    pub location: Option<String>,
    pub size: Option<u64>,
    /// Station-specific attributes.
    pub fields: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// One-line summary: `ENTITY ID : STATUS`.
    pub fn summary(&self) -> String {
        format!(
            "{} {} : {}",
            self.entity_name,
            self.id.as_deref().unwrap_or(""),
            self.status.as_deref().unwrap_or("")
        )
    }
}

/// A search result item, correlated with the station that found it.
///
/// Shared as `Arc<ItemRef>` between the result set and the instance memory.
/// Public field values are written after the search through a shared
/// reference, so both views see them.
#[derive(Debug)]
pub struct ItemRef {
    id: RefId,
    instance: Instance,
    station: StationId,
    public_fields: RwLock<BTreeMap<String, Vec<String>>>,
}

impl ItemRef {
    pub(crate) fn new(id: RefId, instance: Instance, station: StationId) -> Self {
        Self {
            id,
            instance,
            station,
            public_fields: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> RefId {
        self.id
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn station(&self) -> StationId {
        self.station
    }

    /// Replace the values of a public field.
    pub fn set_public_field(&self, name: impl Into<String>, values: Vec<String>) {
        self.public_fields.write().insert(name.into(), values);
    }

    pub fn public_field(&self, name: &str) -> Option<Vec<String>> {
        self.public_fields.read().get(name).cloned()
    }

    /// First value of a public field, if the field is set and non-empty.
    pub fn public_field_value(&self, name: &str) -> Option<String> {
        self.public_fields
            .read()
            .get(name)
            .and_then(|values| values.first().cloned())
    }

    pub fn public_fields(&self) -> BTreeMap<String, Vec<String>> {
        self.public_fields.read().clone()
    }
}

impl Serialize for ItemRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ItemRef", 4)?;
        s.serialize_field("ref_id", &self.id)?;
        s.serialize_field("station", &self.station)?;
        s.serialize_field("instance", &self.instance)?;
        s.serialize_field("public_fields", &*self.public_fields.read())?;
        s.end()
    }
}

/// One station's outcome for one search: the items found, or an error.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub station: StationId,
    pub station_name: String,
    pub items: Vec<Arc<ItemRef>>,
    pub error: Option<String>,
}

impl ResultSet {
    pub fn new(station: StationId, station_name: impl Into<String>) -> Self {
        Self {
            station,
            station_name: station_name.into(),
            items: Vec::new(),
            error: None,
        }
    }

    pub fn failed(station: StationId, station_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(station, station_name)
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.items.iter().map(|r| r.instance())
    }

    /// Non-empty instance ids in this result set.
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances()
            .filter_map(|i| i.id.clone())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

impl Serialize for ResultSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let items: Vec<&ItemRef> = self.items.iter().map(|r| r.as_ref()).collect();
        let mut s = serializer.serialize_struct("ResultSet", 4)?;
        s.serialize_field("station", &self.station)?;
        s.serialize_field("station_name", &self.station_name)?;
        s.serialize_field("error", &self.error)?;
        s.serialize_field("items", &items)?;
        s.end()
    }
}

/// All instances across result sets, in result set order.
pub fn merge_instances(lists: &[ResultSet]) -> Vec<&Instance> {
    lists.iter().flat_map(|l| l.instances()).collect()
}

/// Distinct non-empty instance ids across result sets, in first-seen order.
pub fn unique_instance_ids(lists: &[ResultSet]) -> Vec<String> {
    let mut seen = HashSet::new();
    lists
        .iter()
        .flat_map(|l| l.instance_ids())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
