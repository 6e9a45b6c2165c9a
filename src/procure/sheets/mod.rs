pub mod config;
pub mod error;
pub mod io;
pub mod mapping;
pub mod model;
pub mod reconcile;
pub mod sync;

pub use error::{ErrorKind, Result, ToolError};
