//! Command and query surface for widesync
//!
//! Every operation is addressed by collection, document id and path, and goes
//! through the [`OperationRouter`]:
//!
//! - [`Command`]: serializable requests, one variant per verb
//! - [`Output`]: one result variant per command
//! - [`Query`]: the chained query builder and its JSON form
//!
//! # Example
//!
//! ```ignore
//! use widesync_executor::{Command, OperationRouter, Output};
//!
//! let router = OperationRouter::open(SyncConfig::default(), store, search);
//! let out = router.execute(Command::Set {
//!     collection: "items".into(),
//!     id: None,
//!     path: None,
//!     value: json!({"name": "a", "tags": ["x", "y"]}),
//!     version: 1,
//! }).await?;
//! assert!(matches!(out, Output::Inserted { .. }));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod output;
mod query;
mod router;

pub use command::Command;
pub use output::Output;
pub use query::{Query, QueryKind};
pub use router::OperationRouter;

pub use widesync_core::{Error, Result};
pub use widesync_engine::{ColumnStore, MemoryColumnStore, SortKey, SyncConfig};
pub use widesync_search::{MemorySearchEngine, SearchEngine, SearchSync};
