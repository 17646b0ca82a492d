pub mod error;
pub mod schema;
pub mod sqlite;

pub use error::StoreError;
pub use sqlite::{SqliteReportSink, SqliteReportStore};
