use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::procure::sheets::config::Settings;
use crate::procure::sheets::error::{Result, ToolError};
use crate::procure::sheets::io::excel_read::{self, SourceSpec};
use crate::procure::sheets::io::smartsheet::{SheetGateway, find_sheet_id};
use crate::procure::sheets::mapping::{ColumnMap, TargetSchema, map_records};
use crate::procure::sheets::model::{Key, Record, SheetSummary};
use crate::procure::sheets::reconcile::{self, InsertPlan, RemoteSnapshot, UpdatePlan};

/// A workbook table to push into a named sheet.
#[derive(Debug, Clone)]
pub struct TableRequest {
    pub source: SourceSpec,
    pub sheet_name: String,
    pub schema: TargetSchema,
}

impl TableRequest {
    /// Builds a request for `path`, falling back to the configured tab and
    /// table marker when none is given.
    pub fn new(
        settings: &Settings,
        path: &Path,
        tab: Option<String>,
        marker: Option<String>,
        sheet_name: impl Into<String>,
        schema: TargetSchema,
    ) -> Self {
        Self {
            source: SourceSpec {
                path: settings.resolve_source(path),
                tab: tab.unwrap_or_else(|| settings.tab_name.clone()),
                marker: marker.or_else(|| settings.table_marker.clone()),
            },
            sheet_name: sheet_name.into(),
            schema,
        }
    }
}

/// The destination of an import or update, fetched fresh for one operation.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub sheet: SheetSummary,
    pub columns: ColumnMap,
    pub snapshot: RemoteSnapshot,
}

/// An import that has been planned but not yet written.
#[derive(Debug, Clone)]
pub struct PreparedImport {
    pub target: RemoteTarget,
    /// Destination fields in schema order.
    pub fields: Vec<String>,
    pub plan: InsertPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Inserted { rows: usize, tagged: BTreeSet<Key> },
    DuplicatesFound { keys: BTreeSet<Key> },
}

/// An update that has been planned but not yet written.
#[derive(Debug, Clone)]
pub struct PreparedUpdate {
    pub target: RemoteTarget,
    pub plan: UpdatePlan,
    /// Workbook keys with no row in the sheet; they are left alone.
    pub unmatched: BTreeSet<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated {
        rows: usize,
        cells: usize,
        unmatched: BTreeSet<Key>,
    },
    NoDifferences {
        unmatched: BTreeSet<Key>,
    },
}

/// Rows to remove from a named sheet.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub sheet_name: String,
    pub key_field: String,
    /// Key values as they appear in the sheet.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { rows: usize, missing: Vec<String> },
    NothingToDelete { missing: Vec<String> },
}

/// Creates a new sheet in the workspace from the configured template.
#[instrument(level = "info", skip_all, fields(name = %name))]
pub fn create_sheet(
    gateway: &impl SheetGateway,
    settings: &Settings,
    name: &str,
) -> Result<SheetSummary> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ToolError::EmptySheetName);
    }
    let sheet = gateway.create_sheet_from_template(
        settings.workspace_id,
        settings.template_sheet_id,
        name,
    )?;
    info!(sheet_id = sheet.id, "sheet created from template");
    Ok(sheet)
}

/// Lists the sheets of the configured workspace.
#[instrument(level = "info", skip_all)]
pub fn list_sheets(gateway: &impl SheetGateway, settings: &Settings) -> Result<Vec<SheetSummary>> {
    let mut sheets = gateway.list_sheets(settings.workspace_id)?;
    sheets.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
    Ok(sheets)
}

/// Reads the workbook, fetches the sheet and plans the rows to add.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %request.source.path.display(), sheet = %request.sheet_name)
)]
pub fn prepare_import(
    gateway: &impl SheetGateway,
    settings: &Settings,
    request: &TableRequest,
    allow_duplicates: bool,
) -> Result<PreparedImport> {
    let records = read_candidates(request)?;
    let target = fetch_target(gateway, settings, request)?;
    let plan = reconcile::plan_insert(
        &records,
        &target.snapshot,
        &request.schema.key,
        allow_duplicates,
    )?;
    match &plan {
        InsertPlan::Insert { rows, tagged } => {
            info!(rows = rows.len(), tagged = tagged.len(), "insert planned")
        }
        InsertPlan::DuplicatesFound { keys } => {
            info!(duplicates = keys.len(), "insert blocked by existing keys")
        }
    }
    Ok(PreparedImport {
        target,
        fields: request.schema.targets().map(str::to_string).collect(),
        plan,
    })
}

/// Writes a prepared import.
#[instrument(level = "info", skip_all, fields(sheet_id = prepared.target.sheet.id))]
pub fn apply_import(gateway: &impl SheetGateway, prepared: &PreparedImport) -> Result<ImportOutcome> {
    match &prepared.plan {
        InsertPlan::DuplicatesFound { keys } => {
            Ok(ImportOutcome::DuplicatesFound { keys: keys.clone() })
        }
        InsertPlan::Insert { rows, tagged } => {
            let added =
                gateway.add_rows(prepared.target.sheet.id, &prepared.target.columns, rows)?;
            info!(rows = added, "rows added");
            Ok(ImportOutcome::Inserted {
                rows: added,
                tagged: tagged.clone(),
            })
        }
    }
}

/// Imports a workbook table into a sheet.
pub fn import_data(
    gateway: &impl SheetGateway,
    settings: &Settings,
    request: &TableRequest,
    allow_duplicates: bool,
) -> Result<ImportOutcome> {
    let prepared = prepare_import(gateway, settings, request, allow_duplicates)?;
    apply_import(gateway, &prepared)
}

/// Reads the workbook, fetches the sheet and plans the cell changes.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %request.source.path.display(), sheet = %request.sheet_name)
)]
pub fn prepare_update(
    gateway: &impl SheetGateway,
    settings: &Settings,
    request: &TableRequest,
) -> Result<PreparedUpdate> {
    let records = read_candidates(request)?;
    let target = fetch_target(gateway, settings, request)?;
    let key = &request.schema.key;
    let plan = reconcile::plan_update(&records, &target.snapshot, key)?;
    let unmatched = reconcile::unmatched_keys(&records, &target.snapshot, key)?;
    if !unmatched.is_empty() {
        warn!(
            rows = unmatched.len(),
            "workbook rows with no matching sheet row are skipped"
        );
    }
    info!(
        rows = plan.patches().len(),
        cells = plan.cell_count(),
        "update planned"
    );
    Ok(PreparedUpdate {
        target,
        plan,
        unmatched,
    })
}

/// Writes a prepared update.
#[instrument(level = "info", skip_all, fields(sheet_id = prepared.target.sheet.id))]
pub fn apply_update(gateway: &impl SheetGateway, prepared: &PreparedUpdate) -> Result<UpdateOutcome> {
    let unmatched = prepared.unmatched.clone();
    match &prepared.plan {
        UpdatePlan::NoDifferences => Ok(UpdateOutcome::NoDifferences { unmatched }),
        UpdatePlan::Patches(patches) => {
            let rows =
                gateway.update_rows(prepared.target.sheet.id, &prepared.target.columns, patches)?;
            info!(rows, "rows updated");
            Ok(UpdateOutcome::Updated {
                rows,
                cells: prepared.plan.cell_count(),
                unmatched,
            })
        }
    }
}

/// Updates a sheet from a workbook table.
pub fn update_data(
    gateway: &impl SheetGateway,
    settings: &Settings,
    request: &TableRequest,
) -> Result<UpdateOutcome> {
    let prepared = prepare_update(gateway, settings, request)?;
    apply_update(gateway, &prepared)
}

/// Deletes the rows whose key matches one of the requested values.
#[instrument(level = "info", skip_all, fields(sheet = %request.sheet_name))]
pub fn delete_rows(
    gateway: &impl SheetGateway,
    settings: &Settings,
    request: &DeleteRequest,
) -> Result<DeleteOutcome> {
    let sheet_id = find_sheet_id(gateway, settings.workspace_id, &request.sheet_name)?;
    let sheet = gateway.get_sheet(sheet_id)?;
    let columns = ColumnMap::from_columns(&sheet.columns);
    let key_column = columns
        .id_of(&request.key_field)
        .ok_or_else(|| ToolError::MissingColumns {
            sheet: sheet.name.clone(),
            columns: vec![request.key_field.clone()],
        })?;

    // Every row carrying a requested key goes, including repeated keys.
    let wanted: BTreeSet<&str> = request.keys.iter().map(String::as_str).collect();
    let mut matched: BTreeSet<String> = BTreeSet::new();
    let mut row_ids = Vec::new();
    for row in &sheet.rows {
        let Some(key) = row.cells.get(&key_column).and_then(Key::from_value) else {
            continue;
        };
        let key = key.to_string();
        if wanted.contains(key.as_str()) {
            row_ids.push(row.id);
            matched.insert(key);
        }
    }
    let mut missing: Vec<String> = Vec::new();
    for key in &request.keys {
        if !matched.contains(key) && !missing.contains(key) {
            missing.push(key.clone());
        }
    }

    if row_ids.is_empty() {
        return Ok(DeleteOutcome::NothingToDelete { missing });
    }
    let rows = gateway.delete_rows(sheet_id, &row_ids)?;
    info!(rows, "rows deleted");
    Ok(DeleteOutcome::Deleted { rows, missing })
}

fn read_candidates(request: &TableRequest) -> Result<Vec<Record>> {
    let table = excel_read::read_table(&request.source)?;
    let records = map_records(&table, &request.schema)?;
    info!(records = records.len(), "read workbook records");
    Ok(records)
}

fn fetch_target(
    gateway: &impl SheetGateway,
    settings: &Settings,
    request: &TableRequest,
) -> Result<RemoteTarget> {
    let sheet_id = find_sheet_id(gateway, settings.workspace_id, &request.sheet_name)?;
    let sheet = gateway.get_sheet(sheet_id)?;
    let columns = ColumnMap::from_columns(&sheet.columns);
    columns.require(request.schema.targets(), &sheet.name)?;
    let snapshot = RemoteSnapshot::from_sheet(&sheet, &columns, &request.schema.key);
    debug!(
        sheet_id,
        remote_rows = snapshot.row_count(),
        keyed_rows = snapshot.len(),
        "fetched remote snapshot"
    );
    Ok(RemoteTarget {
        sheet: sheet.summary(),
        columns,
        snapshot,
    })
}
