use bson::{Bson, Document};

use super::datatypes::{find_duplicates, is_hex_string};
use super::devices::KNOWN_DUPLICATE_KEY;
use super::error::StoreError;
use super::formats::AuxIdTable;
use super::general::check_required_fields;
use super::mongo_reader::MongoReader;
use super::report::Reporter;

pub const AUX_IDS_KEY: &str = "aux_ids";

/// Validates the auxiliary identifiers (serial numbers, ICM ids, ...) of a device document
pub struct AuxIds<'a> {
    reader: MongoReader<'a>,
    table: &'a AuxIdTable,
    reporter: &'a Reporter,
}

impl<'a> AuxIds<'a> {
    pub fn new(reader: MongoReader<'a>, table: &'a AuxIdTable, reporter: &'a Reporter) -> Self {
        Self {
            reader,
            table,
            reporter,
        }
    }

    pub fn validate(&self, device: &Document) -> Result<bool, StoreError> {
        let items = match device.get(AUX_IDS_KEY) {
            None => return Ok(true),
            Some(Bson::Array(items)) => items,
            Some(other) => {
                self.reporter
                    .error(format!("\"{AUX_IDS_KEY}\" must be a list of dicts, found {other}"));
                return Ok(false);
            }
        };

        // A known duplicate repeats the aux ids of its stored copies
        let exclude_uid = match device.get_bool(KNOWN_DUPLICATE_KEY) {
            Ok(true) => device.get_str("uid").ok(),
            _ => None,
        };

        let mut ok = true;
        let mut pairs: Vec<(String, String)> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let context = format!("{AUX_IDS_KEY}[{i}]");
            let entry = match item {
                Bson::Document(d) => d,
                other => {
                    self.reporter
                        .error(format!("{context} must be a dict, found {other}"));
                    ok = false;
                    continue;
                }
            };
            if !check_required_fields(&context, entry, &self.table.entry_fields, self.reporter) {
                ok = false;
                continue;
            }
            let id_type = entry.get_str("type").unwrap_or_default();
            let id = entry.get_str("id").unwrap_or_default();
            match self.table.types.get(id_type) {
                None => {
                    self.reporter
                        .error(format!("{context} has unknown aux id type \"{id_type}\""));
                    ok = false;
                }
                Some(rule) => {
                    if rule.hex && !is_hex_string(id) {
                        self.reporter.error(format!(
                            "{context} {id_type} \"{id}\" must be a hex string without a 0x prefix"
                        ));
                        ok = false;
                    }
                    if rule.unique {
                        ok &= self.check_unique(id_type, id, exclude_uid)?;
                    }
                }
            }
            pairs.push((id_type.to_string(), id.to_string()));
        }

        let keys: Vec<Bson> = pairs
            .iter()
            .map(|(t, id)| Bson::String(format!("{t}:{id}")))
            .collect();
        for dup in find_duplicates(&keys) {
            self.reporter
                .error(format!("aux id {dup} is listed more than once"));
            ok = false;
        }

        if ok {
            self.reporter.pass("aux_ids are valid");
        }
        Ok(ok)
    }

    fn check_unique(
        &self,
        id_type: &str,
        id: &str,
        exclude_uid: Option<&str>,
    ) -> Result<bool, StoreError> {
        let count = self.reader.count_aux_id(id_type, id, exclude_uid)?;
        if count == 0 {
            Ok(true)
        } else {
            self.reporter.error(format!(
                "aux id {id_type} \"{id}\" already belongs to {count} stored device(s)"
            ));
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Formats;
    use crate::store::{Collection, MemoryStore};
    use bson::doc;

    fn validate(store: &MemoryStore, device: &Document) -> (bool, Reporter) {
        let formats = Formats::bundled().unwrap();
        let reporter = Reporter::default();
        let ok = AuxIds::new(MongoReader::new(store), &formats.aux_ids, &reporter)
            .validate(device)
            .unwrap();
        (ok, reporter)
    }

    #[test]
    fn test_aux_ids() {
        let store = MemoryStore::default();
        store.seed(
            Collection::Devices,
            vec![doc! {"uid": "old", "aux_ids": [{"type": "serial_number", "id": "SN-1"}]}],
        );

        let good = doc! {"uid": "new", "aux_ids": [
            {"type": "serial_number", "id": "SN-2"},
            {"type": "icm_id", "id": "00af3c"},
            {"type": "part_number", "id": "PN-7"},
        ]};
        assert!(validate(&store, &good).0);

        let (ok, reporter) = validate(
            &store,
            &doc! {"uid": "new", "aux_ids": [{"type": "serial_number", "id": "SN-1"}]},
        );
        assert!(!ok);
        assert!(reporter.contains("already belongs to 1 stored device"));

        let (ok, reporter) = validate(
            &store,
            &doc! {"uid": "new", "aux_ids": [{"type": "icm_id", "id": "0x00af3c"},
                                             {"type": "barcode", "id": "B1"}]},
        );
        assert!(!ok);
        assert!(reporter.contains("must be a hex string"));
        assert!(reporter.contains("unknown aux id type \"barcode\""));

        let (ok, reporter) = validate(
            &store,
            &doc! {"uid": "new", "aux_ids": [{"type": "part_number", "id": "PN-7"},
                                             {"type": "part_number", "id": "PN-7"}]},
        );
        assert!(!ok);
        assert!(reporter.contains("listed more than once"));
    }

    #[test]
    fn test_known_duplicate_reuses_its_own_aux_ids() {
        let store = MemoryStore::default();
        store.seed(
            Collection::Devices,
            vec![
                doc! {"uid": "pmt-001", "aux_ids": [{"type": "serial_number", "id": "SN-1"}]},
                doc! {"uid": "pmt-777", "aux_ids": [{"type": "serial_number", "id": "SN-7"}]},
            ],
        );

        let (ok, reporter) = validate(
            &store,
            &doc! {"uid": "pmt-001", "known_duplicate_uid": true,
                   "aux_ids": [{"type": "serial_number", "id": "SN-1"}]},
        );
        assert!(ok, "{:?}", reporter.diagnostics());

        let (ok, reporter) = validate(
            &store,
            &doc! {"uid": "pmt-001", "known_duplicate_uid": true,
                   "aux_ids": [{"type": "serial_number", "id": "SN-7"}]},
        );
        assert!(!ok);
        assert!(reporter.contains("already belongs to 1 stored device"));

        let (ok, _) = validate(
            &store,
            &doc! {"uid": "pmt-001",
                   "aux_ids": [{"type": "serial_number", "id": "SN-1"}]},
        );
        assert!(!ok);
    }

    #[test]
    fn test_absent_aux_ids_pass() {
        let store = MemoryStore::default();
        let (ok, reporter) = validate(&store, &doc! {"uid": "new"});
        assert!(ok);
        assert!(reporter.diagnostics().is_empty());
    }
}
