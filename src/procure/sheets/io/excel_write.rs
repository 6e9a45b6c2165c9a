use std::collections::BTreeSet;
use std::path::Path;

use rust_xlsxwriter::{Workbook, Worksheet};

use crate::procure::sheets::error::Result;
use crate::procure::sheets::model::{CellValue, Key, Record};
use crate::procure::sheets::reconcile::{InsertPlan, UpdatePlan};

/// Sheet listing the rows an import would add.
pub const ROWS_SHEET: &str = "Rows";
/// Sheet listing the keys that block an import.
pub const DUPLICATES_SHEET: &str = "Duplicates";
/// Sheet listing the cell changes an update would make.
pub const CHANGES_SHEET: &str = "Changes";

const CHANGE_COLUMNS: [&str; 5] = ["Key", "Row ID", "Field", "Current", "Proposed"];

/// Writes a preview of an import plan.
///
/// `fields` fixes the column order of the rows sheet.
pub fn write_insert_report(path: &Path, fields: &[String], plan: &InsertPlan) -> Result<()> {
    let mut workbook = Workbook::new();

    match plan {
        InsertPlan::Insert { rows, tagged } => {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(ROWS_SHEET)?;
            write_records(worksheet, fields, rows)?;
            if !tagged.is_empty() {
                let worksheet = workbook.add_worksheet();
                worksheet.set_name(DUPLICATES_SHEET)?;
                write_keys(worksheet, tagged)?;
            }
        }
        InsertPlan::DuplicatesFound { keys } => {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(DUPLICATES_SHEET)?;
            write_keys(worksheet, keys)?;
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Writes a preview of an update plan, one line per changed cell.
pub fn write_update_report(path: &Path, plan: &UpdatePlan) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(CHANGES_SHEET)?;

    for (col_idx, header) in CHANGE_COLUMNS.iter().enumerate() {
        worksheet.write_string(0, col_idx as u16, *header)?;
    }

    let mut row_idx = 1u32;
    for patch in plan.patches() {
        for (field, change) in &patch.changes {
            worksheet.write_string(row_idx, 0, patch.key.to_string())?;
            worksheet.write_string(row_idx, 1, patch.row_id.to_string())?;
            worksheet.write_string(row_idx, 2, field)?;
            write_cell(worksheet, row_idx, 3, &change.old)?;
            write_cell(worksheet, row_idx, 4, &change.new)?;
            row_idx += 1;
        }
    }
    add_table(worksheet, row_idx - 1, CHANGE_COLUMNS.len())?;

    workbook.save(path)?;
    Ok(())
}

fn write_records(worksheet: &mut Worksheet, fields: &[String], rows: &[Record]) -> Result<()> {
    for (col_idx, header) in fields.iter().enumerate() {
        worksheet.write_string(0, col_idx as u16, header)?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, field) in fields.iter().enumerate() {
            if let Some(value) = row.get(field) {
                write_cell(worksheet, (row_idx + 1) as u32, col_idx as u16, value)?;
            }
        }
    }
    add_table(worksheet, rows.len() as u32, fields.len())
}

fn write_keys(worksheet: &mut Worksheet, keys: &BTreeSet<Key>) -> Result<()> {
    worksheet.write_string(0, 0, "Key")?;
    for (row_idx, key) in keys.iter().enumerate() {
        worksheet.write_string((row_idx + 1) as u32, 0, key.to_string())?;
    }
    add_table(worksheet, keys.len() as u32, 1)
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, value: &CellValue) -> Result<()> {
    match value {
        CellValue::Text(text) => {
            worksheet.write_string(row, col, text)?;
        }
        CellValue::Number(number) => {
            worksheet.write_number(row, col, *number)?;
        }
        CellValue::Boolean(flag) => {
            worksheet.write_boolean(row, col, *flag)?;
        }
        CellValue::Null => {}
    }
    Ok(())
}

fn add_table(worksheet: &mut Worksheet, last_row: u32, column_count: usize) -> Result<()> {
    if column_count == 0 {
        return Ok(());
    }
    let mut table = rust_xlsxwriter::Table::new();
    table.set_autofilter(true);
    let col_end = (column_count as u16).saturating_sub(1);
    worksheet.add_table(0, 0, last_row.max(1), col_end, &table)?;
    Ok(())
}
