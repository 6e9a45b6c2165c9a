//! Maps workbook columns onto the destination sheet's columns.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::procure::sheets::error::{Result, ToolError};
use crate::procure::sheets::io::excel_read::SourceTable;
use crate::procure::sheets::model::{CellValue, Column, Record, RemoteId};

/// Destination column holding the item number.
pub const ITEM_KEY: &str = "ITEM#";

/// Per-field value transform applied after normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    /// Keep the normalized value.
    #[default]
    Identity,
    /// Empty cells are written as an empty string.
    BlankIfNull,
}

impl FieldTransform {
    fn apply(self, value: CellValue) -> CellValue {
        match (self, value) {
            (FieldTransform::BlankIfNull, CellValue::Null) => CellValue::Text(String::new()),
            (_, value) => value,
        }
    }
}

fn required_default() -> bool {
    true
}

/// One source column and the destination field it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub source: String,
    pub target: String,
    #[serde(default = "required_default")]
    pub required: bool,
    #[serde(default)]
    pub transform: FieldTransform,
}

impl FieldSpec {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            required: true,
            transform: FieldTransform::Identity,
        }
    }

    pub fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// The set of destination fields a workbook is mapped onto, plus the field
/// used to correlate rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub key: String,
    pub fields: Vec<FieldSpec>,
}

impl TargetSchema {
    /// Columns written when importing a purchasing workbook.
    pub fn import() -> Self {
        Self {
            key: ITEM_KEY.to_string(),
            fields: vec![
                FieldSpec::new("Item ID", ITEM_KEY),
                FieldSpec::new("Item Description", "ITEM DESCRIPTION"),
                FieldSpec::new("Quantity", "QTY"),
                FieldSpec::new("UOM", "UOM"),
                FieldSpec::new("Area", "AREA"),
                FieldSpec::new("Specific Area", "NOTES")
                    .with_transform(FieldTransform::BlankIfNull),
                FieldSpec::new("Awarded To", "AWARDED TO"),
            ],
        }
    }

    /// Columns compared when updating an existing sheet. Empty notes stay
    /// empty so they match blank remote cells.
    pub fn update() -> Self {
        Self {
            key: ITEM_KEY.to_string(),
            fields: vec![
                FieldSpec::new("Item ID", ITEM_KEY),
                FieldSpec::new("Item Description", "ITEM DESCRIPTION"),
                FieldSpec::new("Quantity", "QTY"),
                FieldSpec::new("Area", "AREA"),
                FieldSpec::new("Specific Area", "NOTES"),
            ],
        }
    }

    /// Loads a schema from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let schema: TargetSchema = serde_json::from_str(&data)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(ToolError::InvalidSchema("no fields declared".into()));
        }
        let mut targets = BTreeSet::new();
        for field in &self.fields {
            if !targets.insert(field.target.as_str()) {
                return Err(ToolError::InvalidSchema(format!(
                    "field '{}' is mapped more than once",
                    field.target
                )));
            }
        }
        if !targets.contains(self.key.as_str()) {
            return Err(ToolError::InvalidSchema(format!(
                "key field '{}' is not one of the mapped fields",
                self.key
            )));
        }
        Ok(())
    }

    /// Destination field names, in declaration order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.target.as_str())
    }
}

/// Renames workbook records onto the schema's destination fields.
pub fn map_records(table: &SourceTable, schema: &TargetSchema) -> Result<Vec<Record>> {
    let missing: Vec<String> = schema
        .fields
        .iter()
        .filter(|field| field.required && !table.columns.contains(&field.source))
        .map(|field| field.source.clone())
        .collect();
    if !missing.is_empty() {
        return Err(ToolError::SchemaMismatch { missing });
    }

    let present: Vec<&FieldSpec> = schema
        .fields
        .iter()
        .filter(|field| table.columns.contains(&field.source))
        .collect();

    let mut mapped = Vec::with_capacity(table.records.len());
    for (index, record) in table.records.iter().enumerate() {
        let mut row = Record::new();
        for field in &present {
            let value = record.get(&field.source).cloned().unwrap_or(CellValue::Null);
            row.insert(field.target.clone(), field.transform.apply(normalize(value)));
        }

        if row.get(&schema.key).is_none_or(CellValue::is_null) {
            return Err(ToolError::MissingKey {
                row: index + 1,
                field: schema.key.clone(),
            });
        }
        mapped.push(row);
    }

    debug!(records = mapped.len(), fields = present.len(), "mapped records");
    Ok(mapped)
}

/// Trims text and turns whitespace-only text into an empty cell.
fn normalize(value: CellValue) -> CellValue {
    match value {
        CellValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                CellValue::Null
            } else if trimmed.len() == text.len() {
                CellValue::Text(text)
            } else {
                CellValue::Text(trimmed.to_string())
            }
        }
        other => other,
    }
}

/// Column title → column identifier for one remote sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    by_title: BTreeMap<String, RemoteId>,
}

impl ColumnMap {
    pub fn from_columns(columns: &[Column]) -> Self {
        let mut by_title = BTreeMap::new();
        for column in columns {
            by_title.entry(column.title.clone()).or_insert(column.id);
        }
        Self { by_title }
    }

    pub fn id_of(&self, title: &str) -> Option<RemoteId> {
        self.by_title.get(title).copied()
    }

    pub fn title_of(&self, id: RemoteId) -> Option<&str> {
        self.by_title
            .iter()
            .find(|(_, column_id)| **column_id == id)
            .map(|(title, _)| title.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }

    /// Checks that every field has a column in the sheet.
    pub fn require<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a str>,
        sheet: &str,
    ) -> Result<()> {
        let columns: Vec<String> = fields
            .into_iter()
            .filter(|field| !self.by_title.contains_key(*field))
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            Ok(())
        } else {
            Err(ToolError::MissingColumns {
                sheet: sheet.to_string(),
                columns,
            })
        }
    }
}
