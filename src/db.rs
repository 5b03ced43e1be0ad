use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One record per API key. Keys are unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Capability seam over the persistent key store.
#[async_trait]
pub trait KeyBackend: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>>;
    async fn upsert(&self, key: &str, active: bool, owner: Option<&str>) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct MongoBackend {
    client: Client,
    db_name: String,
    keys: Collection<KeyRecord>,
}

impl MongoBackend {
    /// Connects and ensures the unique index on `key`. Index creation
    /// failure is fatal at startup.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let keys = client.database(db_name).collection::<KeyRecord>("api_keys");

        let index = IndexModel::builder()
            .keys(doc! { "key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        keys.create_index(index).await?;

        Ok(Self {
            client,
            db_name: db_name.to_string(),
            keys,
        })
    }
}

#[async_trait]
impl KeyBackend for MongoBackend {
    async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>> {
        Ok(self.keys.find_one(doc! { "key": key }).await?)
    }

    async fn upsert(&self, key: &str, active: bool, owner: Option<&str>) -> Result<()> {
        self.keys
            .update_one(
                doc! { "key": key },
                doc! { "$set": { "active": active, "owner": owner.unwrap_or_default() } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}
