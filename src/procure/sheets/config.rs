//! Process-wide settings.
//!
//! Settings are read once at start-up from the environment (optionally seeded
//! from a `.env` file) and then passed by reference to every action.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::procure::sheets::error::{Result, ToolError};
use crate::procure::sheets::model::RemoteId;

pub const API_KEY_VAR: &str = "SMARTSHEET_API_KEY";
pub const TEMPLATE_SHEET_VAR: &str = "TEMPLATE_SHEET_ID";
pub const WORKSPACE_VAR: &str = "WORKSPACE_ID";
pub const TAB_VAR: &str = "EXCEL_TAB";
pub const SOURCE_FOLDER_VAR: &str = "EXCEL_FOLDER";
pub const TABLE_MARKER_VAR: &str = "TABLE_NAME";
pub const BASE_URL_VAR: &str = "SMARTSHEET_BASE_URL";

/// Default endpoint of the Smartsheet REST API.
pub const DEFAULT_BASE_URL: &str = "https://api.smartsheet.com/2.0";

const WORKBOOK_EXTENSION: &str = "xlsx";

/// Immutable configuration shared by every action.
#[derive(Clone, PartialEq)]
pub struct Settings {
    /// Bearer token for the remote API.
    pub api_key: String,
    /// Sheet copied when creating a new sheet.
    pub template_sheet_id: RemoteId,
    /// Workspace that holds the purchasing sheets.
    pub workspace_id: RemoteId,
    /// Workbook tab the data is read from.
    pub tab_name: String,
    /// Folder used to resolve bare workbook names.
    pub source_folder: Option<PathBuf>,
    /// Marker announcing the table inside the tab, when the tab holds several.
    pub table_marker: Option<String>,
    /// API root, without trailing slash.
    pub base_url: String,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("template_sheet_id", &self.template_sheet_id)
            .field("workspace_id", &self.workspace_id)
            .field("tab_name", &self.tab_name)
            .field("source_folder", &self.source_folder)
            .field("table_marker", &self.table_marker)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Settings {
    /// Loads the `.env` file (an explicit one must exist; the default
    /// `./.env` is optional) and then reads the process environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|err| ToolError::InvalidSetting {
                    name: "--env-file",
                    value: format!("{}: {err}", path.display()),
                })?;
                debug!(path = %path.display(), "loaded environment file");
            }
            None => match dotenvy::dotenv() {
                Ok(path) => debug!(path = %path.display(), "loaded environment file"),
                Err(err) if err.not_found() => {}
                Err(err) => {
                    return Err(ToolError::InvalidSetting {
                        name: ".env",
                        value: err.to_string(),
                    });
                }
            },
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &'static str| optional(name).ok_or(ToolError::MissingSetting(name));

        let settings = Settings {
            api_key: required(API_KEY_VAR)?,
            template_sheet_id: parse_id(TEMPLATE_SHEET_VAR, required(TEMPLATE_SHEET_VAR)?)?,
            workspace_id: parse_id(WORKSPACE_VAR, required(WORKSPACE_VAR)?)?,
            tab_name: required(TAB_VAR)?,
            source_folder: optional(SOURCE_FOLDER_VAR).map(PathBuf::from),
            table_marker: optional(TABLE_MARKER_VAR),
            base_url: optional(BASE_URL_VAR)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    /// Resolves a workbook path given on the command line.
    ///
    /// Existing or absolute paths are used as-is. Other relative paths are
    /// looked up in the configured source folder, and a bare name gets the
    /// `.xlsx` extension.
    pub fn resolve_source(&self, path: &Path) -> PathBuf {
        if path.exists() || path.is_absolute() {
            return path.to_path_buf();
        }
        let Some(folder) = &self.source_folder else {
            return path.to_path_buf();
        };
        let mut candidate = folder.join(path);
        if candidate.extension().is_none() {
            candidate.set_extension(WORKBOOK_EXTENSION);
        }
        candidate
    }
}

fn parse_id(name: &'static str, value: String) -> Result<RemoteId> {
    value
        .parse()
        .map_err(|_| ToolError::InvalidSetting { name, value })
}
