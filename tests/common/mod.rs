#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use procure_sheets::config::Settings;
use procure_sheets::io::smartsheet::SheetGateway;
use procure_sheets::mapping::ColumnMap;
use procure_sheets::model::{CellValue, Column, Record, RemoteId, Sheet, SheetRow, SheetSummary};
use procure_sheets::reconcile::RowPatch;
use procure_sheets::{Result, ToolError};
use rust_xlsxwriter::Workbook;

pub const SHEET_ID: RemoteId = 4_000;
pub const WORKSPACE_ID: RemoteId = 77;
pub const TEMPLATE_ID: RemoteId = 99;

pub const IMPORT_HEADER: [&str; 7] = [
    "Item ID",
    "Item Description",
    "Quantity",
    "UOM",
    "Area",
    "Specific Area",
    "Awarded To",
];

pub const SHEET_COLUMNS: [&str; 7] = [
    "ITEM#",
    "ITEM DESCRIPTION",
    "QTY",
    "UOM",
    "AREA",
    "NOTES",
    "AWARDED TO",
];

pub fn text(value: &str) -> CellValue {
    CellValue::Text(value.to_string())
}

pub fn num(value: f64) -> CellValue {
    CellValue::Number(value)
}

pub fn record(fields: &[(&str, CellValue)]) -> Record {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

pub fn header_row(names: &[&str]) -> Vec<CellValue> {
    names.iter().map(|name| text(name)).collect()
}

/// Writes a workbook with one worksheet per `(tab, rows)` pair.
pub fn write_workbook(path: &Path, tabs: &[(&str, Vec<Vec<CellValue>>)]) {
    let mut workbook = Workbook::new();
    for (tab, rows) in tabs {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*tab).expect("tab name");
        for (row_idx, row) in rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                let (row_idx, col_idx) = (row_idx as u32, col_idx as u16);
                match cell {
                    CellValue::Text(value) => {
                        worksheet
                            .write_string(row_idx, col_idx, value)
                            .expect("string written");
                    }
                    CellValue::Number(value) => {
                        worksheet
                            .write_number(row_idx, col_idx, *value)
                            .expect("number written");
                    }
                    CellValue::Boolean(value) => {
                        worksheet
                            .write_boolean(row_idx, col_idx, *value)
                            .expect("boolean written");
                    }
                    CellValue::Null => {}
                }
            }
        }
    }
    workbook.save(path).expect("workbook saved");
}

pub fn settings() -> Settings {
    settings_with(&[])
}

pub fn settings_with(overrides: &[(&str, &str)]) -> Settings {
    let mut vars: BTreeMap<String, String> = [
        ("SMARTSHEET_API_KEY", "secret-token"),
        ("TEMPLATE_SHEET_ID", "99"),
        ("WORKSPACE_ID", "77"),
        ("EXCEL_TAB", "Takeoff"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect();
    for (name, value) in overrides {
        vars.insert(name.to_string(), value.to_string());
    }
    Settings::from_lookup(|name| vars.get(name).cloned()).expect("settings")
}

/// Builds a remote sheet with the purchasing columns and the given rows,
/// each row given as `(row id, [(column title, value)])`.
pub fn purchasing_sheet(name: &str, rows: &[(RemoteId, Vec<(&str, CellValue)>)]) -> Sheet {
    let columns: Vec<Column> = SHEET_COLUMNS
        .iter()
        .enumerate()
        .map(|(index, title)| Column {
            id: 100 + index as RemoteId,
            title: title.to_string(),
            primary: index == 0,
        })
        .collect();
    let id_of = |title: &str| {
        columns
            .iter()
            .find(|column| column.title == title)
            .map(|column| column.id)
            .expect("known column")
    };
    let rows = rows
        .iter()
        .map(|(row_id, cells)| {
            let mut all: BTreeMap<RemoteId, CellValue> = columns
                .iter()
                .map(|column| (column.id, CellValue::Null))
                .collect();
            for (title, value) in cells {
                all.insert(id_of(title), value.clone());
            }
            SheetRow {
                id: *row_id,
                cells: all,
            }
        })
        .collect();
    Sheet {
        id: SHEET_ID,
        name: name.to_string(),
        columns,
        rows,
    }
}

/// Mutation recorded by [`FakeGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { workspace_id: RemoteId, template_id: RemoteId, name: String },
    Add { sheet_id: RemoteId, rows: Vec<Record> },
    Update { sheet_id: RemoteId, patches: Vec<RowPatch> },
    Delete { sheet_id: RemoteId, row_ids: Vec<RemoteId> },
}

/// In-memory gateway that serves fixed sheets and records every mutation.
pub struct FakeGateway {
    pub sheets: Vec<Sheet>,
    pub calls: RefCell<Vec<Call>>,
}

impl FakeGateway {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self {
            sheets,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mutations(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl SheetGateway for FakeGateway {
    fn list_sheets(&self, _workspace_id: RemoteId) -> Result<Vec<SheetSummary>> {
        Ok(self.sheets.iter().map(Sheet::summary).collect())
    }

    fn get_sheet(&self, sheet_id: RemoteId) -> Result<Sheet> {
        self.sheets
            .iter()
            .find(|sheet| sheet.id == sheet_id)
            .cloned()
            .ok_or(ToolError::Api {
                status: 404,
                code: Some(1006),
                message: "Not Found".into(),
            })
    }

    fn create_sheet_from_template(
        &self,
        workspace_id: RemoteId,
        template_id: RemoteId,
        name: &str,
    ) -> Result<SheetSummary> {
        self.calls.borrow_mut().push(Call::Create {
            workspace_id,
            template_id,
            name: name.to_string(),
        });
        Ok(SheetSummary {
            id: 5_000,
            name: name.to_string(),
        })
    }

    fn add_rows(&self, sheet_id: RemoteId, columns: &ColumnMap, rows: &[Record]) -> Result<usize> {
        for row in rows {
            columns.require(row.keys().map(String::as_str), "fake")?;
        }
        self.calls.borrow_mut().push(Call::Add {
            sheet_id,
            rows: rows.to_vec(),
        });
        Ok(rows.len())
    }

    fn update_rows(
        &self,
        sheet_id: RemoteId,
        columns: &ColumnMap,
        patches: &[RowPatch],
    ) -> Result<usize> {
        for patch in patches {
            columns.require(patch.changes.keys().map(String::as_str), "fake")?;
        }
        self.calls.borrow_mut().push(Call::Update {
            sheet_id,
            patches: patches.to_vec(),
        });
        Ok(patches.len())
    }

    fn delete_rows(&self, sheet_id: RemoteId, row_ids: &[RemoteId]) -> Result<usize> {
        self.calls.borrow_mut().push(Call::Delete {
            sheet_id,
            row_ids: row_ids.to_vec(),
        });
        Ok(row_ids.len())
    }
}
