use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};

use calamine::{DataType, Range, Reader, Xlsx};
use chrono::{Days, NaiveDate, NaiveTime};
use tracing::{debug, info, instrument, warn};

use crate::procure::sheets::error::{Result, ToolError};
use crate::procure::sheets::model::{CellValue, Record};

/// Prefix of the owner file Excel writes next to a workbook it has open.
const OWNER_FILE_PREFIX: &str = "~$";

/// Windows `ERROR_SHARING_VIOLATION` and `ERROR_LOCK_VIOLATION`.
const SHARING_VIOLATION_CODES: [i32; 2] = [32, 33];

/// Where to read a table from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub tab: String,
    /// Text of the cell sitting directly above the table header. When absent
    /// the first row of the tab is the header.
    pub marker: Option<String>,
}

/// Rows read from a workbook tab.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub tab: String,
    /// Header names in the order they appear in the tab.
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

/// Lists the tabs of a workbook.
pub fn sheet_names(path: &Path) -> Result<Vec<String>> {
    let workbook = open_source(path)?;
    Ok(workbook.sheet_names().to_vec())
}

/// Reads one table from the workbook described by `spec`.
#[instrument(level = "debug", skip_all, fields(path = %spec.path.display(), tab = %spec.tab))]
pub fn read_table(spec: &SourceSpec) -> Result<SourceTable> {
    let mut workbook = open_source(&spec.path)?;

    let available = workbook.sheet_names().to_vec();
    if !available.iter().any(|name| name == &spec.tab) {
        return Err(ToolError::TabNotFound {
            tab: spec.tab.clone(),
            available,
        });
    }

    let range = workbook
        .worksheet_range(&spec.tab)
        .ok_or_else(|| ToolError::TabNotFound {
            tab: spec.tab.clone(),
            available: Vec::new(),
        })??;

    let table = extract_table(&range, spec)?;
    info!(
        rows = table.records.len(),
        columns = table.columns.len(),
        "read table from workbook"
    );
    Ok(table)
}

fn open_source(path: &Path) -> Result<Xlsx<BufReader<File>>> {
    if owner_files(path).iter().any(|owner| owner.exists()) {
        return Err(ToolError::FileUnavailable(path.to_path_buf()));
    }

    let file = File::open(path).map_err(|err| classify_open_error(path, err))?;
    let workbook = Xlsx::new(BufReader::new(file))?;
    Ok(workbook)
}

/// Candidate owner files for `path`. Excel keeps the whole name for short
/// names and overwrites the first one or two characters for longer ones.
fn owner_files(path: &Path) -> Vec<PathBuf> {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return Vec::new();
    };
    name.char_indices()
        .take(3)
        .map(|(skip, _)| path.with_file_name(format!("{OWNER_FILE_PREFIX}{}", &name[skip..])))
        .collect()
}

fn classify_open_error(path: &Path, err: std::io::Error) -> ToolError {
    let locked = err.kind() == IoErrorKind::PermissionDenied
        || (cfg!(windows)
            && err
                .raw_os_error()
                .is_some_and(|code| SHARING_VIOLATION_CODES.contains(&code)));

    if err.kind() == IoErrorKind::NotFound {
        ToolError::SourceNotFound(path.to_path_buf())
    } else if locked {
        ToolError::FileUnavailable(path.to_path_buf())
    } else {
        ToolError::Io(err)
    }
}

fn extract_table(range: &Range<DataType>, spec: &SourceSpec) -> Result<SourceTable> {
    let rows: Vec<&[DataType]> = range.rows().collect();

    let (header_index, stop_at_blank) = match &spec.marker {
        Some(marker) => {
            let marker_index = rows
                .iter()
                .position(|row| row_contains(row, marker))
                .ok_or_else(|| ToolError::TableNotFound {
                    tab: spec.tab.clone(),
                    marker: marker.clone(),
                })?;
            debug!(row = marker_index, "found table marker");
            (marker_index + 1, true)
        }
        None => match rows.iter().position(|row| !is_blank(row)) {
            Some(index) => (index, false),
            None => return Err(ToolError::EmptySource { tab: spec.tab.clone() }),
        },
    };

    let Some(header_row) = rows.get(header_index) else {
        return Err(ToolError::EmptySource { tab: spec.tab.clone() });
    };
    let header = parse_header(header_row);
    let columns: Vec<String> = header.iter().map(|(_, name)| name.clone()).collect();

    let mut records = Vec::new();
    for row in rows.iter().skip(header_index + 1) {
        if is_blank(row) {
            if stop_at_blank {
                break;
            }
            continue;
        }

        let record: Record = header
            .iter()
            .map(|(col_idx, name)| {
                let value = row.get(*col_idx).map(cell_value).unwrap_or(CellValue::Null);
                (name.clone(), value)
            })
            .collect();
        records.push(record);
    }

    if records.is_empty() {
        return Err(ToolError::EmptySource { tab: spec.tab.clone() });
    }

    Ok(SourceTable {
        tab: spec.tab.clone(),
        columns,
        records,
    })
}

fn parse_header(row: &[DataType]) -> Vec<(usize, String)> {
    let mut header: Vec<(usize, String)> = Vec::new();
    for (col_idx, cell) in row.iter().enumerate() {
        let name = cell_to_string(cell).trim().to_string();
        if name.is_empty() {
            continue;
        }
        if header.iter().any(|(_, existing)| existing == &name) {
            warn!(column = %name, "ignoring repeated header column");
            continue;
        }
        header.push((col_idx, name));
    }
    header
}

fn row_contains(row: &[DataType], marker: &str) -> bool {
    let marker = marker.trim();
    row.iter().any(|cell| cell_to_string(cell).trim() == marker)
}

fn is_blank(row: &[DataType]) -> bool {
    row.iter().all(|cell| cell_to_string(cell).trim().is_empty())
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::String(value) => value.clone(),
        DataType::Empty => String::new(),
        other => cell_value(other).to_string(),
    }
}

fn cell_value(cell: &DataType) -> CellValue {
    match cell {
        DataType::String(value) => CellValue::Text(value.clone()),
        DataType::Float(value) => CellValue::Number(*value),
        DataType::Int(value) => CellValue::Number(*value as f64),
        DataType::Bool(value) => CellValue::Boolean(*value),
        DataType::DateTime(serial) => CellValue::Text(format_serial_date(*serial)),
        DataType::Empty => CellValue::Null,
        other => CellValue::Text(other.to_string()),
    }
}

/// Renders an Excel serial date as ISO text, keeping the time of day only
/// when it is not midnight.
fn format_serial_date(serial: f64) -> String {
    let days = serial.trunc();
    let seconds = ((serial - days) * 86_400.0).round() as u32;

    let date = NaiveDate::from_ymd_opt(1899, 12, 30)
        .filter(|_| days >= 0.0)
        .and_then(|epoch| epoch.checked_add_days(Days::new(days as u64)));
    let Some(date) = date else {
        return serial.to_string();
    };

    if seconds == 0 || seconds >= 86_400 {
        return date.to_string();
    }
    match NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0) {
        Some(time) => date.and_time(time).to_string(),
        None => date.to_string(),
    }
}
