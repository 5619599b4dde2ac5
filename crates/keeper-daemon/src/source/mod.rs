//! Data sources
//!
//! A data source exposes named data sets (collections) and a forward-only
//! cursor over every record of one data set. Records are opaque JSON
//! objects; no schema is enforced.

use async_trait::async_trait;
use futures::stream::BoxStream;
use keeper_common::Result;

pub mod mongo;

pub use mongo::MongoSource;

/// One self-describing record read from a data set
pub type Record = serde_json::Value;

/// Forward cursor over the records of one data set
pub type RecordStream = BoxStream<'static, Result<Record>>;

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Names of the data sets to back up, in the order they should be dumped.
    async fn list_data_sets(&self) -> Result<Vec<String>>;

    /// Open a cursor over all records of `data_set`.
    async fn open_cursor(&self, data_set: &str) -> Result<RecordStream>;
}
