use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned by the remote service to sheets, columns, rows and
/// workspaces.
pub type RemoteId = u64;

/// Represents a single cell value, either read from a workbook or fetched from
/// a remote sheet.
///
/// Equality is structural: `Text("5")` and `Number(5.0)` are different values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    /// Plain string value.
    Text(String),
    /// Floating point number.
    Number(f64),
    /// Checkbox or boolean cell.
    Boolean(bool),
    /// Empty cell.
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Converts the value into the JSON representation used on the wire.
    /// Empty cells are sent as an empty string, which clears the remote cell.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Text(value) => serde_json::Value::String(value.clone()),
            CellValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Boolean(value) => serde_json::Value::Bool(*value),
            CellValue::Null => serde_json::Value::String(String::new()),
        }
    }

    /// Builds a value from a JSON literal. Nested structures are kept as their
    /// JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(value) => CellValue::Boolean(value),
            serde_json::Value::Number(number) => match number.as_f64() {
                Some(value) => CellValue::Number(value),
                None => CellValue::Text(number.to_string()),
            },
            serde_json::Value::String(value) => CellValue::Text(value),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(value) => f.write_str(value),
            CellValue::Number(value) => write!(f, "{value}"),
            CellValue::Boolean(value) => write!(f, "{value}"),
            CellValue::Null => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

/// One row of data, keyed by field name.
pub type Record = BTreeMap<String, CellValue>;

/// Ordered, hashable form of a non-empty key value used to correlate local
/// rows with remote rows.
///
/// Numbers keep a canonical decimal rendering so they can be ordered; they
/// never compare equal to text, even when the text spells the same number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Text(String),
    Number(String),
    Boolean(bool),
}

impl Key {
    /// Returns the key for the given value, or `None` for an empty cell.
    pub fn from_value(value: &CellValue) -> Option<Self> {
        match value {
            CellValue::Text(text) => Some(Key::Text(text.clone())),
            CellValue::Number(number) => Some(Key::Number(number.to_string())),
            CellValue::Boolean(flag) => Some(Key::Boolean(*flag)),
            CellValue::Null => None,
        }
    }

    /// Returns the key of `record` under `field`, if present and non-empty.
    pub fn of(record: &Record, field: &str) -> Option<Self> {
        record.get(field).and_then(Key::from_value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Text(value) | Key::Number(value) => f.write_str(value),
            Key::Boolean(value) => write!(f, "{value}"),
        }
    }
}

/// Column of a remote sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: RemoteId,
    pub title: String,
    pub primary: bool,
}

/// Row of a remote sheet, with cells keyed by column identifier.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetRow {
    pub id: RemoteId,
    pub cells: BTreeMap<RemoteId, CellValue>,
}

/// A remote sheet as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub id: RemoteId,
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<SheetRow>,
}

impl Sheet {
    pub fn summary(&self) -> SheetSummary {
        SheetSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Name and identifier of a sheet inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetSummary {
    pub id: RemoteId,
    pub name: String,
}
