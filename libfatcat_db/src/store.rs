use bson::{Bson, Document};
use fxhash::FxHashMap;
use std::cell::RefCell;
use std::fmt;

use super::error::StoreError;

/// The collections the validation engine reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Devices,
    Measurements,
    Goalposts,
    DeviceAssembly,
    StfResultsRaw,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Devices => "devices",
            Collection::Measurements => "measurements",
            Collection::Goalposts => "goalposts",
            Collection::DeviceAssembly => "device_assembly",
            Collection::StfResultsRaw => "stf_results_raw",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<i64>,
}

/// The minimal query surface needed by the validators and the inserter.
///
/// Implementations are not expected to be shared between threads; one store per session.
pub trait DocumentStore {
    fn is_connected(&self) -> bool;
    fn database_name(&self) -> &str;
    /// The database user this session authenticated as
    fn user(&self) -> &str;
    fn count(&self, collection: Collection, filter: Document) -> Result<u64, StoreError>;
    fn find(
        &self,
        collection: Collection,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, StoreError>;
    fn insert_one(&self, collection: Collection, document: Document) -> Result<(), StoreError>;
}

/// An in-process store used for dry runs and tests.
///
/// Understands the filter subset the reader issues: equality on dotted paths (descending into
/// arrays), `$in`, `$ne`, `$exists` and `$elemMatch`.
#[derive(Debug)]
pub struct MemoryStore {
    database: String,
    user: String,
    connected: bool,
    collections: RefCell<FxHashMap<Collection, Vec<Document>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory", "tester")
    }
}

impl MemoryStore {
    pub fn new(database: &str, user: &str) -> Self {
        Self {
            database: database.to_string(),
            user: user.to_string(),
            connected: true,
            collections: RefCell::new(FxHashMap::default()),
        }
    }

    /// A store that reports itself as not connected
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::default()
        }
    }

    /// Seed a collection without going through the insert path
    pub fn seed(&self, collection: Collection, documents: Vec<Document>) {
        self.collections
            .borrow_mut()
            .entry(collection)
            .or_default()
            .extend(documents);
    }

    pub fn all(&self, collection: Collection) -> Vec<Document> {
        self.collections
            .borrow()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

impl DocumentStore for MemoryStore {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    fn user(&self) -> &str {
        &self.user
    }

    fn count(&self, collection: Collection, filter: Document) -> Result<u64, StoreError> {
        self.check_connected()?;
        Ok(self
            .collections
            .borrow()
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| matches_filter(d, &filter)).count())
            .unwrap_or(0) as u64)
    }

    fn find(
        &self,
        collection: Collection,
        filter: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_connected()?;
        let mut found: Vec<Document> = self
            .collections
            .borrow()
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(limit) = options.limit {
            if limit > 0 {
                found.truncate(limit as usize);
            }
        }
        Ok(found)
    }

    fn insert_one(&self, collection: Collection, document: Document) -> Result<(), StoreError> {
        self.check_connected()?;
        self.collections
            .borrow_mut()
            .entry(collection)
            .or_default()
            .push(document);
        Ok(())
    }
}

/// Every value reachable at a dotted path, descending through arrays
fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut current: Vec<&'a Bson> = Vec::new();
    let mut parts = path.split('.');
    let first = match parts.next() {
        Some(p) => p,
        None => return current,
    };
    if let Some(value) = document.get(first) {
        current.push(value);
    }
    for part in parts {
        let mut next: Vec<&'a Bson> = Vec::new();
        for value in current {
            match value {
                Bson::Document(sub) => {
                    if let Some(v) = sub.get(part) {
                        next.push(v);
                    }
                }
                Bson::Array(items) => {
                    for item in items {
                        if let Bson::Document(sub) = item {
                            if let Some(v) = sub.get(part) {
                                next.push(v);
                            }
                        }
                    }
                }
                _ => (),
            }
        }
        current = next;
    }
    current
}

/// Mongo equality: a field matches a scalar if it equals it or is an array containing it
fn values_equal(found: &Bson, expected: &Bson) -> bool {
    if bson_eq(found, expected) {
        return true;
    }
    match found {
        Bson::Array(items) => items.iter().any(|i| bson_eq(i, expected)),
        _ => false,
    }
}

/// Equality that treats int and double of the same value as equal
fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(x) => Some(*x),
        _ => None,
    }
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, condition)| matches_condition(document, path, condition))
}

fn matches_condition(document: &Document, path: &str, condition: &Bson) -> bool {
    let found = lookup(document, path);
    match condition {
        Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, arg)| match op.as_str() {
                "$in" => match arg {
                    Bson::Array(options) => found
                        .iter()
                        .any(|f| options.iter().any(|o| values_equal(f, o))),
                    _ => false,
                },
                "$ne" => !found.iter().any(|f| values_equal(f, arg)),
                "$exists" => {
                    let wanted = matches!(arg, Bson::Boolean(true));
                    wanted == !found.is_empty()
                }
                "$elemMatch" => match arg {
                    Bson::Document(sub_filter) => found.iter().any(|f| match f {
                        Bson::Array(items) => items.iter().any(|item| match item {
                            Bson::Document(d) => matches_filter(d, sub_filter),
                            _ => false,
                        }),
                        _ => false,
                    }),
                    _ => false,
                },
                _ => false,
            })
        }
        expected => found.iter().any(|f| values_equal(f, expected)),
    }
}
