mod config;
pub use crate::config::*;

pub mod cache;
pub mod catalog;
pub mod completion;
pub mod ids;
pub mod manual;
pub mod process;
pub mod progress;
pub mod queue;
pub mod record;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod updates;

pub use crate::catalog::Catalog;
pub use crate::record::RespondentRecord;
pub use crate::store::{ResponseStore, StoreError};
pub use crate::sync::{BatchReport, BatchUpdate, SyncError, UserOutcome};
pub use crate::updates::{FieldUpdate, UpdateMap};
