//! Common type definitions for RowGuard

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relation identifier of the table a row originates from (0 = none)
pub type TableId = u32;

// ============================================================================
// Policy Types
// ============================================================================

/// What the interceptor does with a matching row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Abort when the sentinel value is observed
    #[default]
    Abort,
    /// Add bounded noise to the target value
    Perturb,
}

/// Scope of a sentinel abort
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Aborts the current statement only
    Recoverable,
    /// Terminates the client session
    Fatal,
}

impl Severity {
    /// Map the `abort_statement_only` setting to a severity
    pub fn from_statement_only(abort_statement_only: bool) -> Self {
        if abort_statement_only {
            Severity::Recoverable
        } else {
            Severity::Fatal
        }
    }

    /// Reason code reported to clients
    pub fn sqlstate(self) -> &'static str {
        match self {
            Severity::Recoverable => "P0S01",
            Severity::Fatal => "P0S02",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Recoverable => "recoverable",
            Severity::Fatal => "fatal",
        }
    }
}

/// How a null perturbation target is handled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NullHandling {
    /// Leave the null untouched
    #[default]
    Skip,
    /// Treat null as 0 and perturb it
    Zero,
    /// Reject the row as a type mismatch
    Error,
}

// ============================================================================
// Statement Types
// ============================================================================

/// Statement kind driving a pipeline run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

impl CommandKind {
    /// Only SELECT output is counted and evaluated by the policy
    pub fn is_select(self) -> bool {
        matches!(self, CommandKind::Select)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Select => "select",
            CommandKind::Insert => "insert",
            CommandKind::Update => "update",
            CommandKind::Delete => "delete",
            CommandKind::Utility => "utility",
        }
    }
}

/// Scan direction requested for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    #[default]
    Forward,
    NoMovement,
}

// ============================================================================
// Row Types
// ============================================================================

/// A single field value. `Null` carries the per-field null flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Int16(i16),
    Float64(f64),
    Text(String),
    Bytes(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the underlying type
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int2",
            Value::Int32(_) => "int4",
            Value::Int64(_) => "int8",
            Value::Float64(_) => "float8",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytea",
        }
    }

    /// Read the value as a 32-bit integer. Int8 only when it fits.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int16(v) => Some(i32::from(*v)),
            Value::Int32(v) => Some(*v),
            Value::Int64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Replace the integer payload, keeping the variant and saturating at its bounds
    #[must_use]
    pub fn with_i32(&self, value: i32) -> Value {
        match self {
            Value::Int16(_) => Value::Int16(
                i16::try_from(value).unwrap_or(if value < 0 { i16::MIN } else { i16::MAX }),
            ),
            Value::Int64(_) => Value::Int64(i64::from(value)),
            _ => Value::Int32(value),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Sentinel comparison: integers compare across widths, null never matches
    pub fn matches_sentinel(&self, sentinel: &Value) -> bool {
        if self.is_null() || sentinel.is_null() {
            return false;
        }
        match (self.as_i64(), sentinel.as_i64()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == sentinel,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => {
                f.write_str("\\x")?;
                for b in v.iter() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A row produced by the upstream source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    /// Table the row originates from
    #[serde(default)]
    pub table_id: TableId,
    /// Field values in column order
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(table_id: TableId, values: Vec<Value>) -> Self {
        Self { table_id, values }
    }

    /// Number of fields
    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Field at a 1-based ordinal
    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        ordinal.checked_sub(1).and_then(|i| self.values.get(i))
    }

    /// Mutable field at a 1-based ordinal
    pub fn get_mut(&mut self, ordinal: usize) -> Option<&mut Value> {
        ordinal.checked_sub(1).and_then(|i| self.values.get_mut(i))
    }
}

/// Externally visible shape of the rows a statement emits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RowShape {
    /// Column names
    pub columns: Vec<String>,
}

impl RowShape {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Anonymous shape with `width` columns named `column1..columnN`
    pub fn anonymous(width: usize) -> Self {
        Self {
            columns: (1..=width).map(|i| format!("column{i}")).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_row_ordinals_are_one_based() {
        let row = Row::new(100, vec![Value::Int32(1), Value::Int32(1000)]);
        assert_eq!(row.get(0), None);
        assert_eq!(row.get(1), Some(&Value::Int32(1)));
        assert_eq!(row.get(2), Some(&Value::Int32(1000)));
        assert_eq!(row.get(3), None);
    }

    #[rstest]
    #[case(Value::Int16(-3), Some(-3))]
    #[case(Value::Int32(42), Some(42))]
    #[case(Value::Int64(7), Some(7))]
    #[case(Value::Int64(i64::from(i32::MAX) + 1), None)]
    #[case(Value::Text("1".into()), None)]
    #[case(Value::Null, None)]
    fn test_as_i32(#[case] value: Value, #[case] expected: Option<i32>) {
        assert_eq!(value.as_i32(), expected);
    }

    #[rstest]
    #[case(Value::Int16(0), 40_000, Value::Int16(i16::MAX))]
    #[case(Value::Int16(0), -40_000, Value::Int16(i16::MIN))]
    #[case(Value::Int64(0), 5, Value::Int64(5))]
    #[case(Value::Int32(0), 5, Value::Int32(5))]
    #[case(Value::Null, 5, Value::Int32(5))]
    fn test_with_i32_keeps_variant(#[case] value: Value, #[case] input: i32, #[case] expected: Value) {
        assert_eq!(value.with_i32(input), expected);
    }

    #[test]
    fn test_sentinel_matching() {
        assert!(Value::Int32(-1).matches_sentinel(&Value::Int64(-1)));
        assert!(Value::Int16(-1).matches_sentinel(&Value::Int32(-1)));
        assert!(!Value::Int32(1).matches_sentinel(&Value::Int32(-1)));
        assert!(Value::Text("canary".into()).matches_sentinel(&Value::Text("canary".into())));
        assert!(!Value::Text("-1".into()).matches_sentinel(&Value::Int32(-1)));
        assert!(!Value::Null.matches_sentinel(&Value::Null));
    }

    #[test]
    fn test_row_deserializes_from_json() {
        let row: Row = serde_json::from_str(r#"{"table_id":100,"values":[1,null,"x",5000000000]}"#)
            .unwrap();
        assert_eq!(row.table_id, 100);
        assert_eq!(
            row.values,
            vec![
                Value::Int32(1),
                Value::Null,
                Value::Text("x".into()),
                Value::Int64(5_000_000_000),
            ]
        );
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Severity::from_statement_only(true), Severity::Recoverable);
        assert_eq!(Severity::from_statement_only(false), Severity::Fatal);
        assert_ne!(Severity::Recoverable.sqlstate(), Severity::Fatal.sqlstate());
    }
}
