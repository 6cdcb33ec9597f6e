use bson::oid::ObjectId;
use bson::{doc, Document};

use super::datatypes::compare_date_strings;
use super::error::StoreError;
use super::store::{Collection, DocumentStore, FindOptions};

/// Read-only facade over the store. Each method is one named query shape; nothing here writes.
#[derive(Clone, Copy)]
pub struct MongoReader<'s> {
    store: &'s dyn DocumentStore,
}

impl<'s> MongoReader<'s> {
    pub fn new(store: &'s dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Callers must check this before issuing queries
    pub fn is_connected(&self) -> bool {
        self.store.is_connected()
    }

    pub fn database_name(&self) -> &str {
        self.store.database_name()
    }

    /// Documents in `collection` that were inserted from a file with this name
    pub fn count_json_file_name(
        &self,
        collection: Collection,
        file_name: &str,
    ) -> Result<u64, StoreError> {
        self.store
            .count(collection, doc! {"insert_meta.json_filename": file_name})
    }

    /// Documents in `collection` that were inserted from a file with this content hash
    pub fn count_json_md5(&self, collection: Collection, md5: &str) -> Result<u64, StoreError> {
        self.store
            .count(collection, doc! {"insert_meta.json_md5": md5})
    }

    pub fn find_device_by_uid(&self, uid: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .store
            .find(
                Collection::Devices,
                doc! {"uid": uid},
                FindOptions {
                    limit: Some(1),
                    ..Default::default()
                },
            )?
            .into_iter()
            .next())
    }

    /// Number of devices already stored under this uid
    pub fn duplicate_count(&self, uid: &str) -> Result<u64, StoreError> {
        self.store.count(Collection::Devices, doc! {"uid": uid})
    }

    /// Devices listing `uid` as one of their direct sub-devices
    pub fn find_parent_devices(&self, uid: &str) -> Result<Vec<Document>, StoreError> {
        self.store.find(
            Collection::Devices,
            doc! {"sub_devices.uid": uid},
            FindOptions::default(),
        )
    }

    /// Devices carrying an aux id with this exact type and value, optionally ignoring every
    /// device stored under `exclude_uid`
    pub fn count_aux_id(
        &self,
        id_type: &str,
        id: &str,
        exclude_uid: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut filter = doc! {"aux_ids": {"$elemMatch": {"type": id_type, "id": id}}};
        if let Some(uid) = exclude_uid {
            filter.insert("uid", doc! {"$ne": uid});
        }
        self.store.count(Collection::Devices, filter)
    }

    /// The goalpost with the latest `valid_date` for this test.
    ///
    /// Dates may carry different UTC offsets, so every candidate is fetched and compared by
    /// instant rather than sorted as text by the server.
    pub fn latest_goalpost(
        &self,
        testname: &str,
        testtype: &str,
    ) -> Result<Option<Document>, StoreError> {
        let goalposts = self.store.find(
            Collection::Goalposts,
            doc! {"goalpost_testname": testname, "goalpost_testtype": testtype},
            FindOptions::default(),
        )?;
        Ok(goalposts.into_iter().max_by(|a, b| {
            compare_date_strings(
                a.get_str("valid_date").unwrap_or_default(),
                b.get_str("valid_date").unwrap_or_default(),
            )
        }))
    }

    pub fn count_goalposts(&self, testname: &str, testtype: &str) -> Result<u64, StoreError> {
        self.store.count(
            Collection::Goalposts,
            doc! {"goalpost_testname": testname, "goalpost_testtype": testtype},
        )
    }

    /// Full measurement documents, meas_data included, for one device and measurement name
    pub fn get_fat_measurements(
        &self,
        device_uid: &str,
        meas_name: &str,
    ) -> Result<Vec<Document>, StoreError> {
        self.store.find(
            Collection::Measurements,
            doc! {"device_uid": device_uid, "meas_name": meas_name},
            FindOptions::default(),
        )
    }

    /// Raw STF results are referenced by ObjectId; a malformed id counts as zero
    pub fn count_stf_result(&self, id: &str) -> Result<u64, StoreError> {
        match ObjectId::parse_str(id) {
            Ok(oid) => self
                .store
                .count(Collection::StfResultsRaw, doc! {"_id": oid}),
            Err(_) => Ok(0),
        }
    }

    pub fn count_device_index(&self, uid: &str) -> Result<u64, StoreError> {
        self.store
            .count(Collection::DeviceAssembly, doc! {"uid": uid})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_named_queries() {
        let store = MemoryStore::default();
        let oid = ObjectId::new();
        store.seed(
            Collection::Devices,
            vec![
                doc! {"uid": "mb-1", "device_type": "mainboard",
                      "sub_devices": [{"device_type": "pmt", "uid": "pmt-001"}],
                      "insert_meta": {"json_filename": "mb-1.json", "json_md5": "abc"}},
                doc! {"uid": "pmt-001", "device_type": "pmt"},
            ],
        );
        store.seed(Collection::StfResultsRaw, vec![doc! {"_id": oid}]);
        let reader = MongoReader::new(&store);

        assert!(reader.is_connected());
        assert_eq!(
            reader
                .count_json_file_name(Collection::Devices, "mb-1.json")
                .unwrap(),
            1
        );
        assert_eq!(reader.count_json_md5(Collection::Devices, "abc").unwrap(), 1);
        assert_eq!(reader.count_json_md5(Collection::Goalposts, "abc").unwrap(), 0);
        assert_eq!(
            reader
                .find_device_by_uid("pmt-001")
                .unwrap()
                .unwrap()
                .get_str("device_type")
                .unwrap(),
            "pmt"
        );
        assert!(reader.find_device_by_uid("pmt-404").unwrap().is_none());
        assert_eq!(reader.find_parent_devices("pmt-001").unwrap().len(), 1);
        assert_eq!(reader.count_stf_result(&oid.to_hex()).unwrap(), 1);
        assert_eq!(reader.count_stf_result("not-an-oid").unwrap(), 0);
    }

    #[test]
    fn test_latest_goalpost() {
        let store = MemoryStore::default();
        store.seed(
            Collection::Goalposts,
            vec![
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "min",
                      "goalpost_testbounds": 1.0, "valid_date": "2021-03-01"},
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "min",
                      "goalpost_testbounds": 2.0, "valid_date": "2022-03-01"},
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "max",
                      "goalpost_testbounds": 9.0, "valid_date": "2023-03-01"},
            ],
        );
        let reader = MongoReader::new(&store);
        let latest = reader.latest_goalpost("gain", "min").unwrap().unwrap();
        assert_eq!(latest.get_f64("goalpost_testbounds").unwrap(), 2.0);
        assert_eq!(reader.count_goalposts("gain", "min").unwrap(), 2);
        assert!(reader.latest_goalpost("dark_rate", "max").unwrap().is_none());
    }

    #[test]
    fn test_latest_goalpost_across_offsets() {
        let store = MemoryStore::default();
        store.seed(
            Collection::Goalposts,
            vec![
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "min",
                      "goalpost_testbounds": 1.0, "valid_date": "2022-05-01T05:00:00Z"},
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "min",
                      "goalpost_testbounds": 2.0, "valid_date": "2022-05-01T12:00:00+09:00"},
            ],
        );
        let latest = MongoReader::new(&store)
            .latest_goalpost("gain", "min")
            .unwrap()
            .unwrap();
        assert_eq!(latest.get_f64("goalpost_testbounds").unwrap(), 1.0);
    }
}
