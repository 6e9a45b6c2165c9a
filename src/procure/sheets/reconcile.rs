//! Compares workbook records with a snapshot of the remote sheet and plans the
//! rows to add or the cells to change.
//!
//! Everything here is pure: the caller fetches the snapshot, hands it in, and
//! applies the resulting plan through a gateway.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::procure::sheets::error::{Result, ToolError};
use crate::procure::sheets::mapping::ColumnMap;
use crate::procure::sheets::model::{CellValue, Key, Record, RemoteId, Sheet};

/// Appended to the key of a row inserted despite colliding with an existing
/// row.
pub const DUPLICATE_SUFFIX: &str = " (DUPLICATE)";

/// A remote row converted to field names.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRow {
    pub row_id: RemoteId,
    pub record: Record,
}

/// Remote rows indexed by key, captured once per operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    rows: BTreeMap<Key, RemoteRow>,
    row_count: usize,
    conflicts: BTreeSet<Key>,
}

impl RemoteSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Indexes rows by `key_field`. Rows without a key are counted but not
    /// indexed; when a key repeats the first row keeps it and the key is
    /// reported by [`RemoteSnapshot::conflicting_keys`].
    pub fn from_rows(rows: impl IntoIterator<Item = RemoteRow>, key_field: &str) -> Self {
        let mut snapshot = Self::default();
        for row in rows {
            snapshot.row_count += 1;
            let Some(key) = Key::of(&row.record, key_field) else {
                continue;
            };
            if snapshot.rows.contains_key(&key) {
                snapshot.conflicts.insert(key);
            } else {
                snapshot.rows.insert(key, row);
            }
        }
        if !snapshot.conflicts.is_empty() {
            warn!(
                keys = snapshot.conflicts.len(),
                "remote sheet holds repeated keys; the first row of each is used"
            );
        }
        snapshot
    }

    /// Converts the rows of a fetched sheet, naming cells by column title.
    /// Cells in columns missing from `columns` are dropped.
    pub fn from_sheet(sheet: &Sheet, columns: &ColumnMap, key_field: &str) -> Self {
        let rows = sheet.rows.iter().map(|row| RemoteRow {
            row_id: row.id,
            record: row
                .cells
                .iter()
                .filter_map(|(column_id, value)| {
                    columns
                        .title_of(*column_id)
                        .map(|title| (title.to_string(), value.clone()))
                })
                .collect(),
        });
        Self::from_rows(rows, key_field)
    }

    pub fn get(&self, key: &Key) -> Option<&RemoteRow> {
        self.rows.get(key)
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of rows in the sheet, including rows without a key.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Keys carried by more than one remote row.
    pub fn conflicting_keys(&self) -> &BTreeSet<Key> {
        &self.conflicts
    }
}

/// Keys found both in a candidate batch and in the remote sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateReport {
    pub keys: BTreeSet<Key>,
    /// Size of the remote sheet, so callers can tell an empty sheet from a
    /// sheet with no overlap.
    pub remote_row_count: usize,
}

impl DuplicateReport {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Outcome of planning an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertPlan {
    /// Rows to add, with the keys that were tagged as duplicates.
    Insert {
        rows: Vec<Record>,
        tagged: BTreeSet<Key>,
    },
    /// Nothing may be written because these keys already exist.
    DuplicatesFound { keys: BTreeSet<Key> },
}

/// Old and new value of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub old: CellValue,
    pub new: CellValue,
}

/// Cell changes needed to bring one remote row in line with the workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPatch {
    pub key: Key,
    pub row_id: RemoteId,
    pub changes: BTreeMap<String, FieldChange>,
}

impl RowPatch {
    /// New cell values keyed by field.
    pub fn cells(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.changes
            .iter()
            .map(|(field, change)| (field.as_str(), &change.new))
    }
}

/// Outcome of planning an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePlan {
    NoDifferences,
    Patches(Vec<RowPatch>),
}

impl UpdatePlan {
    pub fn patches(&self) -> &[RowPatch] {
        match self {
            UpdatePlan::NoDifferences => &[],
            UpdatePlan::Patches(patches) => patches,
        }
    }

    /// Total number of changed cells.
    pub fn cell_count(&self) -> usize {
        self.patches().iter().map(|patch| patch.changes.len()).sum()
    }
}

/// Returns the keys of `candidates` that already exist in `snapshot`.
pub fn detect_duplicates(
    candidates: &[Record],
    snapshot: &RemoteSnapshot,
    key_field: &str,
) -> Result<DuplicateReport> {
    let mut keys = BTreeSet::new();
    for (index, record) in candidates.iter().enumerate() {
        let key = candidate_key(record, index, key_field)?;
        if snapshot.get(&key).is_some() {
            keys.insert(key);
        }
    }
    Ok(DuplicateReport {
        keys,
        remote_row_count: snapshot.row_count(),
    })
}

/// Plans the rows to add.
///
/// Colliding keys abort the insert unless `allow_duplicates` is set, in which
/// case the colliding rows are still added with [`DUPLICATE_SUFFIX`] appended
/// to their key so they stand out in the sheet.
pub fn plan_insert(
    candidates: &[Record],
    snapshot: &RemoteSnapshot,
    key_field: &str,
    allow_duplicates: bool,
) -> Result<InsertPlan> {
    let report = detect_duplicates(candidates, snapshot, key_field)?;
    if !report.is_empty() && !allow_duplicates {
        debug!(duplicates = report.keys.len(), "insert rejected");
        return Ok(InsertPlan::DuplicatesFound { keys: report.keys });
    }

    let rows = candidates
        .iter()
        .map(|record| {
            let collides = Key::of(record, key_field).is_some_and(|key| report.keys.contains(&key));
            if !collides {
                return record.clone();
            }
            let mut row = record.clone();
            if let Some(value) = row.get_mut(key_field) {
                *value = tag_duplicate(value);
            }
            row
        })
        .collect();

    Ok(InsertPlan::Insert {
        rows,
        tagged: report.keys,
    })
}

/// Plans the cell changes for every candidate whose key exists remotely.
///
/// Only fields present in both the candidate and the remote row are compared;
/// the key field is never changed. When a key repeats in the batch the last
/// row wins.
pub fn plan_update(
    candidates: &[Record],
    snapshot: &RemoteSnapshot,
    key_field: &str,
) -> Result<UpdatePlan> {
    let mut latest: BTreeMap<Key, &Record> = BTreeMap::new();
    for (index, record) in candidates.iter().enumerate() {
        let key = candidate_key(record, index, key_field)?;
        if latest.insert(key.clone(), record).is_some() {
            warn!(%key, "key repeated in workbook; the last row is used");
        }
    }

    let mut patches = Vec::new();
    for (key, candidate) in latest {
        let Some(remote) = snapshot.get(&key) else {
            continue;
        };
        let changes = diff_fields(candidate, &remote.record, key_field);
        if !changes.is_empty() {
            patches.push(RowPatch {
                key,
                row_id: remote.row_id,
                changes,
            });
        }
    }

    if patches.is_empty() {
        Ok(UpdatePlan::NoDifferences)
    } else {
        debug!(rows = patches.len(), "update planned");
        Ok(UpdatePlan::Patches(patches))
    }
}

/// Candidate keys with no row in the remote sheet.
pub fn unmatched_keys(
    candidates: &[Record],
    snapshot: &RemoteSnapshot,
    key_field: &str,
) -> Result<BTreeSet<Key>> {
    let mut keys = BTreeSet::new();
    for (index, record) in candidates.iter().enumerate() {
        let key = candidate_key(record, index, key_field)?;
        if snapshot.get(&key).is_none() {
            keys.insert(key);
        }
    }
    Ok(keys)
}

fn candidate_key(record: &Record, index: usize, key_field: &str) -> Result<Key> {
    Key::of(record, key_field).ok_or_else(|| ToolError::MissingKey {
        row: index + 1,
        field: key_field.to_string(),
    })
}

fn diff_fields(candidate: &Record, remote: &Record, key_field: &str) -> BTreeMap<String, FieldChange> {
    candidate
        .iter()
        .filter(|(field, _)| field.as_str() != key_field)
        .filter_map(|(field, new)| {
            let old = remote.get(field)?;
            (old != new).then(|| {
                (
                    field.clone(),
                    FieldChange {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )
            })
        })
        .collect()
}

fn tag_duplicate(value: &CellValue) -> CellValue {
    CellValue::Text(format!("{value}{DUPLICATE_SUFFIX}"))
}
