use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Broad classes of failure, used by the command line to pick an exit code
/// and by callers that need to decide whether user input can fix the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required setting, schema or sheet column is missing or invalid.
    Configuration,
    /// The local workbook could not be read as requested.
    SourceRead,
    /// A sheet could not be resolved in the workspace.
    RemoteLookup,
    /// The remote service failed or rejected a request.
    RemoteTransport,
    /// Anything else.
    Internal,
}

/// Error type covering the failures that can occur while reading workbooks,
/// planning changes and talking to the remote sheet service.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a required setting is absent or blank.
    #[error("missing required setting {0}; add it to the environment or the .env file")]
    MissingSetting(&'static str),

    /// Raised when a setting cannot be parsed.
    #[error("invalid value '{value}' for setting {name}")]
    InvalidSetting { name: &'static str, value: String },

    /// Raised when a column mapping schema is inconsistent.
    #[error("invalid column schema: {0}")]
    InvalidSchema(String),

    /// Raised when the destination sheet lacks columns the schema writes to.
    #[error("sheet '{sheet}' has no column(s) named {}", .columns.join(", "))]
    MissingColumns { sheet: String, columns: Vec<String> },

    /// Raised when the workbook path does not exist.
    #[error("input file not found: {0}")]
    SourceNotFound(PathBuf),

    /// Raised when the workbook exists but is locked by another program.
    #[error("{} is open in another program; close it and try again", .0.display())]
    FileUnavailable(PathBuf),

    /// Raised when the requested tab is not part of the workbook.
    #[error("the workbook has no tab named '{tab}' (found: {})", .available.join(", "))]
    TabNotFound { tab: String, available: Vec<String> },

    /// Raised when the table marker does not appear in the tab.
    #[error("no table marked '{marker}' in tab '{tab}'")]
    TableNotFound { tab: String, marker: String },

    /// Raised when the selected range holds a header but no data.
    #[error("tab '{tab}' contains no data rows")]
    EmptySource { tab: String },

    /// Raised when required source columns are missing from the header row.
    #[error("the workbook is missing required column(s): {}", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    /// Raised when a data row has no value in the key column.
    #[error("data row {row} has no value for key field {field}")]
    MissingKey { row: usize, field: String },

    /// Raised when no sheet with the given name exists in the workspace.
    #[error("no sheet named '{0}' in the workspace")]
    SheetNotFound(String),

    /// Raised when a sheet is requested without a name.
    #[error("a sheet name is required")]
    EmptySheetName,

    /// Transport-level failure while talking to the remote service.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote service answered with an error status.
    #[error("remote service returned {status}: {message}{}", .code.map(|code| format!(" (code {code})")).unwrap_or_default())]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::MissingSetting(_)
            | ToolError::InvalidSetting { .. }
            | ToolError::InvalidSchema(_)
            | ToolError::MissingColumns { .. } => ErrorKind::Configuration,
            ToolError::SourceNotFound(_)
            | ToolError::FileUnavailable(_)
            | ToolError::TabNotFound { .. }
            | ToolError::TableNotFound { .. }
            | ToolError::EmptySource { .. }
            | ToolError::SchemaMismatch { .. }
            | ToolError::MissingKey { .. }
            | ToolError::ExcelRead(_) => ErrorKind::SourceRead,
            ToolError::SheetNotFound(_) | ToolError::EmptySheetName => ErrorKind::RemoteLookup,
            ToolError::Http(_) | ToolError::Api { .. } => ErrorKind::RemoteTransport,
            ToolError::Io(_)
            | ToolError::Json(_)
            | ToolError::ExcelWrite(_)
            | ToolError::Logging(_) => ErrorKind::Internal,
        }
    }
}
