//! Gateway to the remote sheet service.
//!
//! [`SheetGateway`] is the seam the orchestration layer talks to;
//! [`SmartsheetClient`] implements it over the Smartsheet REST API. Wire
//! shapes stay private to this module and are converted to plain model values
//! at the boundary.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::procure::sheets::config::Settings;
use crate::procure::sheets::error::{Result, ToolError};
use crate::procure::sheets::mapping::ColumnMap;
use crate::procure::sheets::model::{
    CellValue, Column, Record, RemoteId, Sheet, SheetRow, SheetSummary,
};
use crate::procure::sheets::reconcile::RowPatch;

/// Largest number of rows (or row ids) sent in a single request.
pub const ROW_BATCH_LIMIT: usize = 400;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Operations needed from the remote sheet service.
pub trait SheetGateway {
    /// Lists every sheet in the workspace, including sheets inside folders.
    fn list_sheets(&self, workspace_id: RemoteId) -> Result<Vec<SheetSummary>>;

    /// Fetches a sheet with its columns and rows.
    fn get_sheet(&self, sheet_id: RemoteId) -> Result<Sheet>;

    /// Copies `template_id` into the workspace under `name`.
    fn create_sheet_from_template(
        &self,
        workspace_id: RemoteId,
        template_id: RemoteId,
        name: &str,
    ) -> Result<SheetSummary>;

    /// Appends rows at the bottom of the sheet. Returns the number of rows
    /// added.
    fn add_rows(&self, sheet_id: RemoteId, columns: &ColumnMap, rows: &[Record]) -> Result<usize>;

    /// Writes the new value of every change in `patches`. Returns the number
    /// of rows updated.
    fn update_rows(
        &self,
        sheet_id: RemoteId,
        columns: &ColumnMap,
        patches: &[RowPatch],
    ) -> Result<usize>;

    /// Deletes rows by identifier. Returns the number of rows deleted.
    fn delete_rows(&self, sheet_id: RemoteId, row_ids: &[RemoteId]) -> Result<usize>;
}

/// Resolves a sheet name in the workspace.
pub fn find_sheet_id(
    gateway: &impl SheetGateway,
    workspace_id: RemoteId,
    name: &str,
) -> Result<RemoteId> {
    gateway
        .list_sheets(workspace_id)?
        .into_iter()
        .find(|sheet| sheet.name == name)
        .map(|sheet| sheet.id)
        .ok_or_else(|| ToolError::SheetNotFound(name.to_string()))
}

/// Blocking HTTP client for the Smartsheet REST API.
#[derive(Debug, Clone)]
pub struct SmartsheetClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SmartsheetClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.base_url.clone(), settings.api_key.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.bearer_auth(&self.api_key).send()?;
        let response = check_status(response)?;
        Ok(response.json()?)
    }
}

impl SheetGateway for SmartsheetClient {
    #[instrument(level = "debug", skip(self))]
    fn list_sheets(&self, workspace_id: RemoteId) -> Result<Vec<SheetSummary>> {
        let request = self
            .http
            .get(self.url(&format!("workspaces/{workspace_id}")))
            .query(&[("loadAll", "true")]);
        let workspace: WorkspacePayload = self.send(request)?;
        let mut sheets = Vec::new();
        workspace.collect_sheets(&mut sheets);
        debug!(count = sheets.len(), "listed workspace sheets");
        Ok(sheets)
    }

    #[instrument(level = "debug", skip(self))]
    fn get_sheet(&self, sheet_id: RemoteId) -> Result<Sheet> {
        let request = self.http.get(self.url(&format!("sheets/{sheet_id}")));
        let payload: SheetPayload = self.send(request)?;
        let sheet = payload.into_sheet();
        debug!(
            columns = sheet.columns.len(),
            rows = sheet.rows.len(),
            "fetched sheet"
        );
        Ok(sheet)
    }

    #[instrument(level = "debug", skip(self))]
    fn create_sheet_from_template(
        &self,
        workspace_id: RemoteId,
        template_id: RemoteId,
        name: &str,
    ) -> Result<SheetSummary> {
        let body = CreateSheetBody {
            name,
            from_id: template_id,
        };
        let request = self
            .http
            .post(self.url(&format!("workspaces/{workspace_id}/sheets")))
            .json(&body);
        let response: ResultEnvelope<SummaryPayload> = self.send(request)?;
        Ok(response.result.into())
    }

    #[instrument(level = "debug", skip(self, columns, rows), fields(rows = rows.len()))]
    fn add_rows(&self, sheet_id: RemoteId, columns: &ColumnMap, rows: &[Record]) -> Result<usize> {
        write_batches(rows, "add", |chunk| {
            let body = chunk
                .iter()
                .map(|record| NewRowBody::from_record(record, columns))
                .collect::<Result<Vec<_>>>()
                .map_err(|err| name_sheet(err, sheet_id))?;
            let request = self
                .http
                .post(self.url(&format!("sheets/{sheet_id}/rows")))
                .json(&body);
            let response: ResultEnvelope<Vec<Value>> = self.send(request)?;
            Ok(response.result.len())
        })
    }

    #[instrument(level = "debug", skip(self, columns, patches), fields(rows = patches.len()))]
    fn update_rows(
        &self,
        sheet_id: RemoteId,
        columns: &ColumnMap,
        patches: &[RowPatch],
    ) -> Result<usize> {
        write_batches(patches, "update", |chunk| {
            let body = chunk
                .iter()
                .map(|patch| UpdateRowBody::from_patch(patch, columns))
                .collect::<Result<Vec<_>>>()
                .map_err(|err| name_sheet(err, sheet_id))?;
            let request = self
                .http
                .put(self.url(&format!("sheets/{sheet_id}/rows")))
                .json(&body);
            let response: ResultEnvelope<Vec<Value>> = self.send(request)?;
            Ok(response.result.len())
        })
    }

    #[instrument(level = "debug", skip(self, row_ids), fields(rows = row_ids.len()))]
    fn delete_rows(&self, sheet_id: RemoteId, row_ids: &[RemoteId]) -> Result<usize> {
        write_batches(row_ids, "delete", |chunk| {
            let request = self
                .http
                .delete(self.url(&format!("sheets/{sheet_id}/rows")))
                .query(&[
                    ("ids", join_ids(chunk)),
                    ("ignoreRowsNotFound", "true".to_string()),
                ]);
            let response: ResultEnvelope<Vec<Value>> = self.send(request)?;
            Ok(response.result.len())
        })
    }
}

/// Sends `items` in chunks of [`ROW_BATCH_LIMIT`] and sums the rows each
/// chunk reports. Earlier chunks stay written when a later one fails, so the
/// committed count is logged before the error is returned.
fn write_batches<T>(
    items: &[T],
    action: &str,
    mut send: impl FnMut(&[T]) -> Result<usize>,
) -> Result<usize> {
    let mut committed = 0;
    let mut sent = 0;
    for chunk in items.chunks(ROW_BATCH_LIMIT) {
        match send(chunk) {
            Ok(rows) => {
                committed += rows;
                sent += chunk.len();
            }
            Err(err) => {
                if sent > 0 {
                    warn!(
                        action,
                        committed,
                        unsent = items.len() - sent,
                        "batch failed after earlier batches were written"
                    );
                }
                return Err(err);
            }
        }
    }
    Ok(committed)
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(api_error(status.as_u16(), &body))
}

fn api_error(status: u16, body: &str) -> ToolError {
    match serde_json::from_str::<ApiErrorPayload>(body) {
        Ok(payload) => ToolError::Api {
            status,
            code: payload.error_code,
            message: payload.message,
        },
        Err(_) => ToolError::Api {
            status,
            code: None,
            message: body.trim().to_string(),
        },
    }
}

fn name_sheet(err: ToolError, sheet_id: RemoteId) -> ToolError {
    match err {
        ToolError::MissingColumns { columns, .. } => ToolError::MissingColumns {
            sheet: sheet_id.to_string(),
            columns,
        },
        other => other,
    }
}

fn join_ids(ids: &[RemoteId]) -> String {
    ids.iter()
        .map(RemoteId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn cells_for<'a>(
    values: impl Iterator<Item = (&'a str, &'a CellValue)>,
    columns: &ColumnMap,
) -> Result<Vec<CellBody>> {
    let mut missing = Vec::new();
    let mut cells = Vec::new();
    for (field, value) in values {
        match columns.id_of(field) {
            Some(column_id) => cells.push(CellBody {
                column_id,
                value: value.to_json(),
            }),
            None => missing.push(field.to_string()),
        }
    }
    if missing.is_empty() {
        Ok(cells)
    } else {
        Err(ToolError::MissingColumns {
            sheet: String::new(),
            columns: missing,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorPayload {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct SummaryPayload {
    id: RemoteId,
    name: String,
}

impl From<SummaryPayload> for SheetSummary {
    fn from(payload: SummaryPayload) -> Self {
        SheetSummary {
            id: payload.id,
            name: payload.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkspacePayload {
    #[serde(default)]
    sheets: Vec<SummaryPayload>,
    #[serde(default)]
    folders: Vec<WorkspacePayload>,
}

impl WorkspacePayload {
    fn collect_sheets(self, out: &mut Vec<SheetSummary>) {
        out.extend(self.sheets.into_iter().map(SheetSummary::from));
        for folder in self.folders {
            folder.collect_sheets(out);
        }
    }
}

#[derive(Debug, Deserialize)]
struct SheetPayload {
    id: RemoteId,
    name: String,
    #[serde(default)]
    columns: Vec<ColumnPayload>,
    #[serde(default)]
    rows: Vec<RowPayload>,
}

impl SheetPayload {
    fn into_sheet(self) -> Sheet {
        Sheet {
            id: self.id,
            name: self.name,
            columns: self
                .columns
                .into_iter()
                .map(|column| Column {
                    id: column.id,
                    title: column.title,
                    primary: column.primary,
                })
                .collect(),
            rows: self
                .rows
                .into_iter()
                .map(|row| SheetRow {
                    id: row.id,
                    cells: row
                        .cells
                        .into_iter()
                        .map(|cell| {
                            let value = cell.value.map(CellValue::from_json).unwrap_or(CellValue::Null);
                            (cell.column_id, value)
                        })
                        .collect::<BTreeMap<_, _>>(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ColumnPayload {
    id: RemoteId,
    title: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
struct RowPayload {
    id: RemoteId,
    #[serde(default)]
    cells: Vec<CellPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellPayload {
    column_id: RemoteId,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSheetBody<'a> {
    name: &'a str,
    from_id: RemoteId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CellBody {
    column_id: RemoteId,
    value: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRowBody {
    to_bottom: bool,
    cells: Vec<CellBody>,
}

impl NewRowBody {
    fn from_record(record: &Record, columns: &ColumnMap) -> Result<Self> {
        let values = record.iter().map(|(field, value)| (field.as_str(), value));
        Ok(Self {
            to_bottom: true,
            cells: cells_for(values, columns)?,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRowBody {
    id: RemoteId,
    cells: Vec<CellBody>,
}

impl UpdateRowBody {
    fn from_patch(patch: &RowPatch, columns: &ColumnMap) -> Result<Self> {
        Ok(Self {
            id: patch.row_id,
            cells: cells_for(patch.cells(), columns)?,
        })
    }
}
