use bson::{doc, Document};
use mongodb::options::FindOptions as MongoFindOptions;
use mongodb::sync::{Client, Database};

use super::config::MongoConfig;
use super::error::StoreError;
use super::store::{Collection, DocumentStore, FindOptions};

/// A live connection to the production (or test) MongoDB database.
///
/// Authentication is exercised once, at construction, with a `ping`. There is no retry: a
/// failure leaves the caller without a store.
pub struct MongoStore {
    database: Database,
    host: String,
    user: String,
}

impl MongoStore {
    pub fn connect(config: &MongoConfig, production: bool) -> Result<Self, StoreError> {
        let database_name = config.database(production).to_string();
        let connection_error = |reason: String| StoreError::Connection {
            host: format!("{}:{}", config.host, config.port),
            database: database_name.clone(),
            reason,
        };

        let client = Client::with_options(config.client_options(production))
            .map_err(|e| connection_error(e.to_string()))?;
        let database = client.database(&database_name);
        database
            .run_command(doc! {"ping": 1}, None)
            .map_err(|e| connection_error(e.to_string()))?;

        log::info!(
            "Connected to database {} at {}:{} as {}",
            database_name,
            config.host,
            config.port,
            if config.user.is_empty() {
                "anonymous"
            } else {
                config.user.as_str()
            }
        );

        Ok(Self {
            database,
            host: format!("{}:{}", config.host, config.port),
            user: config.user.clone(),
        })
    }

    fn collection(&self, collection: Collection) -> mongodb::sync::Collection<Document> {
        self.database.collection::<Document>(collection.name())
    }
}

impl DocumentStore for MongoStore {
    fn is_connected(&self) -> bool {
        self.database.run_command(doc! {"ping": 1}, None).is_ok()
    }

    fn database_name(&self) -> &str {
        self.database.name()
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn count(&self, collection: Collection, filter: Document) -> Result<u64, StoreError> {
        self.collection(collection)
            .count_documents(filter, None)
            .map_err(|e| StoreError::Query(collection, e.to_string()))
    }

    fn find(
        &self,
        collection: Collection,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let mongo_options = MongoFindOptions::builder().limit(options.limit).build();

        let cursor = self
            .collection(collection)
            .find(filter, mongo_options)
            .map_err(|e| StoreError::Query(collection, e.to_string()))?;
        let mut documents: Vec<Document> = Vec::new();
        for result in cursor {
            documents.push(result.map_err(|e| StoreError::Query(collection, e.to_string()))?);
        }
        Ok(documents)
    }

    fn insert_one(&self, collection: Collection, document: Document) -> Result<(), StoreError> {
        self.collection(collection)
            .insert_one(document, None)
            .map_err(|e| StoreError::Insert(collection, e.to_string()))?;
        Ok(())
    }
}

impl Drop for MongoStore {
    fn drop(&mut self) {
        log::debug!(
            "Closing connection to {} at {}",
            self.database.name(),
            self.host
        );
    }
}
