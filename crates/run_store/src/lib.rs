mod error;
mod schema;
mod store;

pub use error::RunStoreError;
pub use schema::{RunRecord, RunRecordType, RUN_RECORD_VERSION};
pub use store::{RunStore, RUNS_FILE_NAME};
