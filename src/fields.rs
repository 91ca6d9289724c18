//! Custom fields a station declares in its configuration.
//!
//! A field is *searchable* when criteria may reference it, and *public* when
//! the station populates its values on search results from every station
//! (see [`Station::set_public_field_values`](crate::traits::Station::set_public_field_values)).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    #[default]
    Text,
    Date,
    Number,
    Boolean,
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim() {
            "" | "TEXT" => Ok(FieldType::Text),
            "DATE" => Ok(FieldType::Date),
            "NUMBER" => Ok(FieldType::Number),
            "BOOLEAN" => Ok(FieldType::Boolean),
            other => anyhow::bail!("unknown field type '{}'", other),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Text => "TEXT",
            FieldType::Date => "DATE",
            FieldType::Number => "NUMBER",
            FieldType::Boolean => "BOOLEAN",
        };
        f.write_str(s)
    }
}

/// A custom field declared by a station.
///
/// Two definitions are equal when name and type match; label and flags do
/// not take part, so the pipeline-wide catalog collapses the same field
/// declared by several stations into one entry.
#[derive(Debug, Clone, Serialize)]
pub struct CustomFieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub label: Option<String>,
    pub public: bool,
    pub searchable: bool,
}

impl CustomFieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            label: None,
            public: false,
            searchable: false,
        }
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label for display, falling back to the name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

impl PartialEq for CustomFieldDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.field_type == other.field_type
    }
}

impl Eq for CustomFieldDefinition {}

impl Hash for CustomFieldDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
