//! Search criteria: the predicate language passed unchanged to every station.
//!
//! A [`Criterion`] pairs an optional field name with an [`OpCode`] and an
//! optional value. How many operands an operation takes is described by its
//! [`OperationDefinition`], not by the criterion; stations validate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known field names understood across stations.
pub mod field {
    /// Entity type, e.g. `ORDER` or `CUSTOMER`.
    pub const ENTITY_TYPE: &str = "TYPE";
    /// Identifier of the entity (not of one instance of it).
    pub const ENTITY_ID: &str = "ID";
    /// Identifier of one instance of an entity.
    pub const INSTANCE_UNIQUE_ID: &str = "UNIQUE_ID";
    pub const INSTANCE_UPDATE_DATE: &str = "UPDATE_DATE";
    pub const INSTANCE_ARRIVAL_DATE: &str = "ARRIVAL_DATE";
    /// Status of an instance at a station, e.g. `WAITING`.
    pub const INSTANCE_STATUS: &str = "STATUS";
}

/// Well-known status values.
pub mod status {
    pub const COMPLETE: &str = "COMPLETE";
    pub const ERROR: &str = "ERROR";
    pub const ARCHIVE: &str = "ARCHIVE";
}

/// Operation code of a criterion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpCode {
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotEqual,
    /// Null, empty, or all blanks.
    Empty,
    NotEmpty,
    /// Entity is stuck in its workflow and needs attention.
    Stuck,
    /// Entity is in some failure state.
    Error,
    /// Entity reached a final state.
    Complete,
    /// Operation declared by a station's configuration.
    Custom(String),
}

impl OpCode {
    pub fn code(&self) -> &str {
        match self {
            OpCode::Equal => "EQ",
            OpCode::GreaterThan => "GT",
            OpCode::GreaterThanOrEqual => "GE",
            OpCode::LessThan => "LT",
            OpCode::LessThanOrEqual => "LE",
            OpCode::Like => "LIKE",
            OpCode::NotEqual => "NE",
            OpCode::Empty => "EMPTY",
            OpCode::NotEmpty => "NOT_EMPTY",
            OpCode::Stuck => "IS_STUCK",
            OpCode::Error => "IS_ERROR",
            OpCode::Complete => "IS_COMPLETE",
            OpCode::Custom(code) => code,
        }
    }

    /// Map a code to an operation. Unknown codes become [`OpCode::Custom`].
    pub fn from_code(code: &str) -> Self {
        match code {
            "EQ" => OpCode::Equal,
            "GT" => OpCode::GreaterThan,
            "GE" => OpCode::GreaterThanOrEqual,
            "LT" => OpCode::LessThan,
            "LE" => OpCode::LessThanOrEqual,
            "LIKE" => OpCode::Like,
            "NE" => OpCode::NotEqual,
            "EMPTY" => OpCode::Empty,
            "NOT_EMPTY" => OpCode::NotEmpty,
            "IS_STUCK" => OpCode::Stuck,
            "IS_ERROR" => OpCode::Error,
            "IS_COMPLETE" => OpCode::Complete,
            other => OpCode::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.code())
    }
}

impl Serialize for OpCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(OpCode::from_code(&code))
    }
}

/// Describes one operation a station can evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub op_code: OpCode,
    /// Operands including the field itself: 2 for `ID EQ 7`, 0 for `IS_STUCK`.
    pub operand_count: u8,
    pub label: String,
}

impl OperationDefinition {
    pub fn new(op_code: OpCode, operand_count: u8, label: impl Into<String>) -> Self {
        Self {
            op_code,
            operand_count,
            label: label.into(),
        }
    }
}

/// The operations every station supports before configuration adds its own.
///
/// `EMPTY`, `NOT_EMPTY`, `IS_ERROR` and `IS_COMPLETE` are part of the
/// vocabulary but not of this set.
pub fn standard_definitions() -> Vec<OperationDefinition> {
    vec![
        OperationDefinition::new(OpCode::Equal, 2, "="),
        OperationDefinition::new(OpCode::GreaterThan, 2, ">"),
        OperationDefinition::new(OpCode::GreaterThanOrEqual, 2, ">="),
        OperationDefinition::new(OpCode::LessThan, 2, "<"),
        OperationDefinition::new(OpCode::LessThanOrEqual, 2, "<="),
        OperationDefinition::new(OpCode::Like, 2, "like"),
        OperationDefinition::new(OpCode::NotEqual, 2, "not equal"),
        OperationDefinition::new(OpCode::Stuck, 0, "is Stuck"),
    ]
}

/// One search predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Criterion {
    pub field_name: Option<String>,
    pub operation: OpCode,
    pub value: Option<String>,
}

impl Criterion {
    pub fn new(field_name: Option<&str>, operation: OpCode, value: Option<&str>) -> Self {
        Self {
            field_name: field_name.map(str::to_string),
            operation,
            value: value.map(str::to_string),
        }
    }

    /// `field op value`, the common two-operand form.
    pub fn binary(field_name: &str, operation: OpCode, value: &str) -> Self {
        Self::new(Some(field_name), operation, Some(value))
    }

    /// A zero-operand status predicate such as `IS_STUCK`.
    pub fn status(operation: OpCode) -> Self {
        Self::new(None, operation, None)
    }

    pub fn is_unary(&self) -> bool {
        matches!(self.operation, OpCode::Empty | OpCode::NotEmpty)
    }

    /// Definition of this criterion's operation in the standard set.
    pub fn definition(&self) -> Option<OperationDefinition> {
        standard_definitions()
            .into_iter()
            .find(|d| d.op_code == self.operation)
    }

    pub fn field_is(&self, name: &str) -> bool {
        self.field_name.as_deref() == Some(name)
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field_name {
            write!(f, "{} ", field)?;
        }
        write!(f, "{}", self.operation)?;
        if !self.is_unary() {
            if let Some(value) = &self.value {
                write!(f, " {}", value)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Criterion {
    type Err = anyhow::Error;

    /// Parse `IS_STUCK`, `STATUS EMPTY` or `ID GE 1000`. Everything after the
    /// operation is the value, spaces included.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty criterion");
        }

        let mut parts = s.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or_default();
        let rest = parts.next().map(str::trim_start).unwrap_or_default();

        if rest.is_empty() {
            return Ok(Criterion::status(OpCode::from_code(first)));
        }

        let mut parts = rest.splitn(2, char::is_whitespace);
        let op = parts.next().unwrap_or_default();
        let value = parts.next().map(str::trim).filter(|v| !v.is_empty());

        Ok(Criterion::new(Some(first), OpCode::from_code(op), value))
    }
}

/// All criteria that name `field`.
pub fn criteria_by_field<'a>(criteria: &'a [Criterion], field: &str) -> Vec<&'a Criterion> {
    criteria.iter().filter(|c| c.field_is(field)).collect()
}

pub fn has_stuck_criterion(criteria: &[Criterion]) -> bool {
    criteria.iter().any(|c| c.operation == OpCode::Stuck)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_code_round_trip_through_code() {
        for def in standard_definitions() {
            assert_eq!(OpCode::from_code(def.op_code.code()), def.op_code);
        }
        assert_eq!(
            OpCode::from_code("STARTS_WITH"),
            OpCode::Custom("STARTS_WITH".to_string())
        );
    }

    #[test]
    fn standard_set_excludes_unimplemented_status_ops() {
        let defs = standard_definitions();
        assert_eq!(defs.len(), 8);
        assert!(defs.iter().all(|d| d.op_code != OpCode::Empty));
        assert!(defs.iter().all(|d| d.op_code != OpCode::Complete));
        let stuck = defs.iter().find(|d| d.op_code == OpCode::Stuck).unwrap();
        assert_eq!(stuck.operand_count, 0);
    }

    #[test]
    fn display_omits_value_for_unary() {
        let c = Criterion::new(Some("STATUS"), OpCode::Empty, Some("ignored"));
        assert_eq!(c.to_string(), "STATUS EMPTY");
        let c = Criterion::binary("ID", OpCode::Equal, "42");
        assert_eq!(c.to_string(), "ID EQ 42");
        assert_eq!(Criterion::status(OpCode::Stuck).to_string(), "IS_STUCK");
    }

    #[test]
    fn parse_forms() {
        let c: Criterion = "IS_STUCK".parse().unwrap();
        assert_eq!(c, Criterion::status(OpCode::Stuck));

        let c: Criterion = "STATUS NOT_EMPTY".parse().unwrap();
        assert_eq!(c.field_name.as_deref(), Some("STATUS"));
        assert_eq!(c.operation, OpCode::NotEmpty);
        assert_eq!(c.value, None);

        let c: Criterion = "CUSTOMER LIKE Acme  Corp ".parse().unwrap();
        assert_eq!(c.operation, OpCode::Like);
        assert_eq!(c.value.as_deref(), Some("Acme  Corp"));

        assert!("   ".parse::<Criterion>().is_err());
    }

    #[test]
    fn criteria_helpers() {
        let crit = vec![
            Criterion::binary("ID", OpCode::GreaterThan, "10"),
            Criterion::binary("STATUS", OpCode::Equal, "WAITING"),
            Criterion::binary("ID", OpCode::LessThan, "20"),
        ];
        assert_eq!(criteria_by_field(&crit, "ID").len(), 2);
        assert!(!has_stuck_criterion(&crit));

        let mut with_stuck = crit.clone();
        with_stuck.push(Criterion::status(OpCode::Stuck));
        assert!(has_stuck_criterion(&with_stuck));
    }

    #[test]
    fn definition_lookup() {
        let c = Criterion::binary("ID", OpCode::Like, "4%");
        assert_eq!(c.definition().unwrap().label, "like");
        let c = Criterion::status(OpCode::Custom("WEIRD".into()));
        assert!(c.definition().is_none());
    }
}
