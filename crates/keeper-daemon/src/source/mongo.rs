//! MongoDB data source

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use keeper_common::{KeeperError, Result};
use mongodb::{
    bson::{doc, Bson, Document},
    options::ClientOptions,
    Client,
};
use tracing::{debug, info, instrument, warn};

use super::{DataSource, RecordStream};
use crate::config::SourceConfig;
use crate::error::{BackupError, BackupResult};

const APP_NAME: &str = "backup-keeper";

/// Collections of one MongoDB database
pub struct MongoSource {
    client: Client,
    database: String,
    collections: Vec<String>,
}

impl MongoSource {
    /// Connect and ping the server.
    ///
    /// Any failure here is a [`BackupError::Connectivity`]: the process
    /// cannot do anything useful without its source.
    pub async fn connect(config: &SourceConfig) -> BackupResult<Self> {
        let timeout = config.connect_timeout();
        let connectivity = |e: mongodb::error::Error| BackupError::Connectivity(KeeperError::database(e));

        let mut options = ClientOptions::parse(&config.uri).await.map_err(connectivity)?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options).map_err(connectivity)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connectivity)?;

        info!(database = %config.database, "MongoDB source connected");

        Ok(Self {
            client,
            database: config.database.clone(),
            collections: config.collections.clone(),
        })
    }

    /// Close the connection pool. Runs already holding a cursor will fail.
    pub async fn close(&self) {
        self.client.clone().shutdown().immediate(true).await;
        debug!("MongoDB source closed");
    }
}

#[async_trait]
impl DataSource for MongoSource {
    #[instrument(skip(self), fields(database = %self.database))]
    async fn list_data_sets(&self) -> Result<Vec<String>> {
        let names = self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(KeeperError::database)?;

        Ok(select_data_sets(names, &self.collections))
    }

    async fn open_cursor(&self, data_set: &str) -> Result<RecordStream> {
        let cursor = self
            .client
            .database(&self.database)
            .collection::<Document>(data_set)
            .find(doc! {})
            .await
            .map_err(KeeperError::database)?;

        Ok(cursor
            .map_err(KeeperError::database)
            .map_ok(|document| Bson::Document(document).into_relaxed_extjson())
            .boxed())
    }
}

/// Apply the allow-list (empty means everything), drop server-internal
/// `system.*` collections and sort for a stable dump order.
pub(crate) fn select_data_sets(mut names: Vec<String>, allow: &[String]) -> Vec<String> {
    names.retain(|name| !name.starts_with("system."));

    if !allow.is_empty() {
        for wanted in allow {
            if !names.contains(wanted) {
                warn!(collection = %wanted, "configured collection does not exist");
            }
        }
        names.retain(|name| allow.contains(name));
    }

    names.sort();
    names
}
