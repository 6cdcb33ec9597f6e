//! Writing checked documents to the database.
//!
//! A document is written exactly once, stamped with `insert_meta`. A new device assembly also
//! gets a `device_assembly` index document listing every nested sub-device uid. The two writes
//! are not wrapped in a transaction: a crash between them leaves the device without its index,
//! and the index is never written over an existing one.
use bson::{doc, Bson, Document};
use fxhash::FxHashSet;

use super::checks::DocType;
use super::error::{InsertError, StoreError};
use super::general::INSERT_META_KEY;
use super::mongo_reader::MongoReader;
use super::report::Reporter;
use super::run_checks::CheckedFile;
use super::store::{Collection, DocumentStore};
use super::sub_devices::SUB_DEVICES_KEY;

/// The shared account that can only read
pub const READ_ONLY_USER: &str = "icecube";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted {
        collection: Collection,
        indexed: bool,
    },
    /// The document did not pass its checks
    NotPassed,
    /// The configured database user cannot write
    ReadOnlyUser,
}

/// Name of the person running the insert, from the environment
fn insert_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("unknown"))
}

/// Direct sub-device uids listed in a device document
fn direct_sub_device_uids(device: &Document) -> Vec<String> {
    device
        .get_array(SUB_DEVICES_KEY)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| match i {
                    Bson::Document(entry) => entry.get_str("uid").ok().map(String::from),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Every uid below `device`, depth first, each listed once
pub fn flatten_sub_device_uids(
    reader: &MongoReader,
    device: &Document,
) -> Result<Vec<String>, StoreError> {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut flattened: Vec<String> = Vec::new();
    let mut stack: Vec<String> = direct_sub_device_uids(device);
    stack.reverse();
    while let Some(uid) = stack.pop() {
        if !seen.insert(uid.clone()) {
            continue;
        }
        if let Some(sub) = reader.find_device_by_uid(&uid)? {
            let mut children = direct_sub_device_uids(&sub);
            children.reverse();
            stack.extend(children);
        }
        flattened.push(uid);
    }
    Ok(flattened)
}

pub struct Inserter<'a> {
    store: &'a dyn DocumentStore,
    reporter: &'a Reporter,
}

impl<'a> Inserter<'a> {
    pub fn new(store: &'a dyn DocumentStore, reporter: &'a Reporter) -> Self {
        Self { store, reporter }
    }

    pub fn insert(&self, checked: &CheckedFile) -> Result<InsertOutcome, InsertError> {
        let (file, outcome) = match (&checked.file, &checked.outcome) {
            (Some(file), Some(outcome)) if outcome.passed() => (file, outcome),
            _ => {
                self.reporter.error(format!(
                    "not inserting {}: it did not pass its checks",
                    checked.path.to_string_lossy()
                ));
                return Ok(InsertOutcome::NotPassed);
            }
        };
        if self.store.user() == READ_ONLY_USER {
            self.reporter.warning(format!(
                "not inserting {}: database user \"{READ_ONLY_USER}\" is read-only, configure a user with write permission in mongo_config.json",
                file.file_name
            ));
            return Ok(InsertOutcome::ReadOnlyUser);
        }
        let collection = match outcome.doc_type.collection() {
            Some(c) => c,
            None => return Ok(InsertOutcome::NotPassed),
        };

        let insert_time = bson::DateTime::now();
        let mut document = file.document.clone();
        document.insert(
            INSERT_META_KEY,
            doc! {
                "insert_time": insert_time,
                "json_filename": file.file_name.as_str(),
                "json_md5": file.md5.as_str(),
                "insert_user": insert_user(),
                "mongo_user": self.store.user(),
            },
        );
        self.store.insert_one(collection, document)?;
        self.reporter.pass(format!(
            "inserted {} into {}.{collection}",
            file.file_name,
            self.store.database_name()
        ));

        let indexed = outcome.doc_type == DocType::Device
            && !direct_sub_device_uids(&file.document).is_empty();
        if indexed {
            self.insert_device_index(&file.document, insert_time)?;
        }
        Ok(InsertOutcome::Inserted {
            collection,
            indexed,
        })
    }

    fn insert_device_index(
        &self,
        device: &Document,
        insert_time: bson::DateTime,
    ) -> Result<(), InsertError> {
        let reader = MongoReader::new(self.store);
        let uid = device.get_str("uid").unwrap_or_default();
        if reader.count_device_index(uid)? > 0 {
            self.reporter
                .error(format!("device index for {uid} already exists"));
            return Err(InsertError::DuplicateIndex(uid.to_string()));
        }
        let sub_device_uids = flatten_sub_device_uids(&reader, device)?;
        let count = sub_device_uids.len();
        self.store.insert_one(
            Collection::DeviceAssembly,
            doc! {
                "uid": uid,
                "device_type": device.get_str("device_type").unwrap_or_default(),
                "sub_device_uids": sub_device_uids,
                "insert_time": insert_time,
            },
        )?;
        self.reporter.pass(format!(
            "inserted device index for {uid} with {count} sub-device(s)"
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Formats;
    use crate::run_checks::RunChecks;
    use crate::store::MemoryStore;
    use crate::support_files::tests::FakeProbe;
    use std::path::Path;

    const MAINBOARD: &str = r#"{"uid": "abc-123", "device_type": "mainboard",
        "production_date": "2022-05-01",
        "sub_devices": [{"device_type": "pmt", "uid": "pmt-001"}]}"#;

    fn store(user: &str) -> MemoryStore {
        let store = MemoryStore::new("memory", user);
        store.seed(
            Collection::Devices,
            vec![doc! {"uid": "pmt-001", "device_type": "pmt", "production_date": "2021-01-01"}],
        );
        store
    }

    fn check(store: &MemoryStore, path: &Path, reporter: &Reporter) -> CheckedFile {
        let formats = Formats::bundled().unwrap();
        let probe = FakeProbe::default();
        RunChecks::new(MongoReader::new(store), &formats, &probe, reporter)
            .run(path)
            .unwrap()
    }

    #[test]
    fn test_insert_then_recheck_fails_as_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc-123.json");
        std::fs::write(&path, MAINBOARD).unwrap();
        let store = store("writer");

        let reporter = Reporter::default();
        let checked = check(&store, &path, &reporter);
        assert!(checked.passed(), "{:?}", reporter.diagnostics());
        let outcome = Inserter::new(&store, &reporter).insert(&checked).unwrap();
        assert_eq!(
            outcome,
            InsertOutcome::Inserted {
                collection: Collection::Devices,
                indexed: true
            }
        );

        let stored = MongoReader::new(&store)
            .find_device_by_uid("abc-123")
            .unwrap()
            .unwrap();
        let meta = stored.get_document(INSERT_META_KEY).unwrap();
        assert_eq!(meta.get_str("json_filename").unwrap(), "abc-123.json");
        assert_eq!(meta.get_str("mongo_user").unwrap(), "writer");
        let index = store.all(Collection::DeviceAssembly);
        assert_eq!(index.len(), 1);
        assert_eq!(
            index[0].get_array("sub_device_uids").unwrap(),
            &vec![Bson::String("pmt-001".into())]
        );

        let reporter = Reporter::default();
        let rechecked = check(&store, &path, &reporter);
        assert!(!rechecked.passed());
        assert!(reporter.contains("duplicate JSON file name"));
        assert!(reporter.contains("duplicate JSON file md5"));
    }

    #[test]
    fn test_read_only_user_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc-123.json");
        std::fs::write(&path, MAINBOARD).unwrap();
        let store = store(READ_ONLY_USER);
        let reporter = Reporter::default();
        let checked = check(&store, &path, &reporter);
        assert!(checked.passed());
        let outcome = Inserter::new(&store, &reporter).insert(&checked).unwrap();
        assert_eq!(outcome, InsertOutcome::ReadOnlyUser);
        assert_eq!(store.all(Collection::Devices).len(), 1);
    }

    #[test]
    fn test_failed_file_not_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"uid": "abc-124", "device_type": "mainboard", "production_date": "2015-01-01"}"#,
        )
        .unwrap();
        let store = store("writer");
        let reporter = Reporter::default();
        let checked = check(&store, &path, &reporter);
        let outcome = Inserter::new(&store, &reporter).insert(&checked).unwrap();
        assert_eq!(outcome, InsertOutcome::NotPassed);
        assert_eq!(store.all(Collection::Devices).len(), 1);
    }

    #[test]
    fn test_existing_index_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc-123.json");
        std::fs::write(&path, MAINBOARD).unwrap();
        let store = store("writer");
        store.seed(
            Collection::DeviceAssembly,
            vec![doc! {"uid": "abc-123", "sub_device_uids": ["pmt-009"]}],
        );
        let reporter = Reporter::default();
        let checked = check(&store, &path, &reporter);
        let result = Inserter::new(&store, &reporter).insert(&checked);
        assert!(matches!(result, Err(InsertError::DuplicateIndex(uid)) if uid == "abc-123"));
        assert_eq!(store.all(Collection::DeviceAssembly).len(), 1);
    }

    #[test]
    fn test_flatten_nested_assembly() {
        let store = MemoryStore::default();
        store.seed(
            Collection::Devices,
            vec![
                doc! {"uid": "dmb-1", "device_type": "degg_mainboard",
                      "sub_devices": [{"device_type": "icm", "uid": "icm-1"}]},
                doc! {"uid": "icm-1", "device_type": "icm"},
                doc! {"uid": "pmt-1", "device_type": "pmt"},
            ],
        );
        let degg = doc! {"uid": "degg-1", "device_type": "degg", "sub_devices": [
            {"device_type": "degg_mainboard", "uid": "dmb-1"},
            {"device_type": "pmt", "uid": "pmt-1", "index": 0},
        ]};
        let uids = flatten_sub_device_uids(&MongoReader::new(&store), &degg).unwrap();
        assert_eq!(uids, vec!["dmb-1", "icm-1", "pmt-1"]);
    }
}
