use std::path::PathBuf;
use thiserror::Error;

use super::store::Collection;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse JSON: {0}")]
    ParsingError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FileToolsError {
    #[error("FileTools could not find {0}.json on the search path or in the bundled files")]
    NotFound(String),
    #[error("FileTools failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("FileTools failed to parse {name}: {source}")]
    ParsingError {
        name: String,
        source: serde_json::Error,
    },
}

/// Structural problems with a candidate JSON file. Any of these is fatal for that file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not open JSON file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("JSON file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("JSON file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("JSON file contains non-finite literal(s): {0}")]
    NonFinite(String),
    #[error("JSON file top level must be an object")]
    NotAnObject,
    #[error("JSON file could not be converted to BSON: {0}")]
    BsonError(#[from] bson::ser::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Could not connect to database {database} at {host}: {reason}")]
    Connection {
        host: String,
        database: String,
        reason: String,
    },
    #[error("Store is not connected")]
    NotConnected,
    #[error("Query on collection {0} failed: {1}")]
    Query(Collection, String),
    #[error("Insert into collection {0} failed: {1}")]
    Insert(Collection, String),
    #[error("Store failed due to MongoDB driver error: {0}")]
    Driver(#[from] mongodb::error::Error),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Support file probe failed to run ssh: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Support file probe HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unexpected conditions raised while checking a document. Constraint violations are not errors.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Checks failed due to store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Checks failed due to support file probe error: {0}")]
    ProbeError(#[from] ProbeError),
    #[error("Checks failed to encode document as BSON: {0}")]
    BsonError(#[from] bson::ser::Error),
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("Insert failed due to store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Device index for {0} already exists; refusing to overwrite it")]
    DuplicateIndex(String),
    #[error("Insert failed due to check error: {0}")]
    CheckError(#[from] CheckError),
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("SSH tunnel failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("SSH tunnel exited early with status {0}")]
    ExitedEarly(std::process::ExitStatus),
    #[error("SSH tunnel did not open local port {0} within {1} seconds")]
    Timeout(u16, u64),
    #[error("SSH tunnel failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}
