//! Core library for the procure-sheets command line application.
//!
//! The library keeps the sheet reconciliation logic free of any user interface
//! or network concerns. IO adapters (workbook reading, report writing and the
//! remote sheet gateway) live under [`procure::sheets::io`], plain values in
//! [`procure::sheets::model`], the workbook → sheet column mapping in
//! [`procure::sheets::mapping`], the diff and duplicate planning in
//! [`procure::sheets::reconcile`], and the actions that tie them together in
//! [`procure::sheets::sync`].

pub mod procure;

pub use procure::sheets::{
    ErrorKind, Result, ToolError, config, error, io, mapping, model, reconcile, sync,
};
