//! Composition rules for the `sub_devices` field of a device document.
use bson::{Bson, Document};
use std::collections::BTreeSet;

use super::datatypes::find_duplicates;
use super::error::StoreError;
use super::formats::{SubDeviceRule, SubDeviceTable};
use super::general::{check_optional_fields, check_required_fields};
use super::mongo_reader::MongoReader;
use super::report::Reporter;

pub const SUB_DEVICES_KEY: &str = "sub_devices";

/// One well-formed entry of a `sub_devices` list
#[derive(Debug, Clone, PartialEq)]
pub struct SubDeviceEntry {
    pub device_type: String,
    pub uid: String,
    pub index: Option<i64>,
}

/// Largest number of indexed sub-devices of one type a parent may require
pub const MAX_INDEXED_SUB_DEVICES: i64 = 1024;

/// Parse an inclusive `"a-b"` index range of at most [`MAX_INDEXED_SUB_DEVICES`] entries
pub fn parse_index_range(range: &str) -> Option<(i64, i64)> {
    let (start, stop) = range.split_once('-')?;
    let start: i64 = start.trim().parse().ok()?;
    let stop: i64 = stop.trim().parse().ok()?;
    let span = stop.checked_sub(start)?;
    if start >= 0 && (0..MAX_INDEXED_SUB_DEVICES).contains(&span) {
        Some((start, stop))
    } else {
        None
    }
}

/// Last `-`/`_` separated component of a uid
pub fn trailing_id(uid: &str) -> &str {
    uid.rsplit(['-', '_']).find(|s| !s.is_empty()).unwrap_or(uid)
}

/// Validates the `sub_devices` list of one parent device against the requirement table.
///
/// The checks are independent, all of them run, and the result is their conjunction.
pub struct SubDevices<'a> {
    reader: MongoReader<'a>,
    table: &'a SubDeviceTable,
    reporter: &'a Reporter,
}

impl<'a> SubDevices<'a> {
    pub fn new(reader: MongoReader<'a>, table: &'a SubDeviceTable, reporter: &'a Reporter) -> Self {
        Self {
            reader,
            table,
            reporter,
        }
    }

    pub fn validate(&self, parent: &Document) -> Result<bool, StoreError> {
        let parent_uid = parent.get_str("uid").unwrap_or_default();
        let parent_type = parent.get_str("device_type").unwrap_or_default();
        let rules = self.table.rules_for(parent_type);

        let raw = match parent.get(SUB_DEVICES_KEY) {
            None if rules.is_none() => return Ok(true),
            None => Vec::new(),
            Some(Bson::Array(items)) => items.clone(),
            Some(other) => {
                self.reporter.error(format!(
                    "\"{SUB_DEVICES_KEY}\" must be a list of dicts, found {other}"
                ));
                return Ok(false);
            }
        };

        let (shape_ok, entries) = self.check_shape(&raw);
        let mut ok = shape_ok;
        ok &= self.check_siblings(parent_uid, &entries);
        ok &= self.check_existence(parent_uid, &entries)?;
        ok &= self.check_requirements(parent_type, &entries);
        ok &= self.check_closure(parent_type, &entries);
        ok &= self.check_id_in_uid(parent_uid, parent_type, &entries);

        if ok {
            self.reporter
                .pass(format!("sub_devices of {parent_uid} ({parent_type}) are valid"));
        }
        Ok(ok)
    }

    /// Every entry is a dict with the required keys; returns the entries that could be read
    fn check_shape(&self, raw: &[Bson]) -> (bool, Vec<SubDeviceEntry>) {
        let mut ok = true;
        let mut entries: Vec<SubDeviceEntry> = Vec::new();
        for (i, item) in raw.iter().enumerate() {
            let context = format!("{SUB_DEVICES_KEY}[{i}]");
            let entry = match item {
                Bson::Document(d) => d,
                other => {
                    self.reporter
                        .error(format!("{context} must be a dict, found {other}"));
                    ok = false;
                    continue;
                }
            };
            let mut entry_ok =
                check_required_fields(&context, entry, &self.table.entry_fields, self.reporter);
            entry_ok &= check_optional_fields(
                &context,
                entry,
                &self.table.optional_entry_fields,
                self.reporter,
            );
            let index = entry.get_i64("index").ok().or_else(|| {
                entry.get_i32("index").ok().map(i64::from)
            });
            if let Some(i) = index {
                if i < 0 {
                    self.reporter
                        .error(format!("{context} index {i} must not be negative"));
                    entry_ok = false;
                }
            }
            if entry_ok {
                entries.push(SubDeviceEntry {
                    device_type: entry.get_str("device_type").unwrap_or_default().to_string(),
                    uid: entry.get_str("uid").unwrap_or_default().to_string(),
                    index,
                });
            }
            ok &= entry_ok;
        }
        (ok, entries)
    }

    /// No two siblings share a uid and a device does not contain itself
    fn check_siblings(&self, parent_uid: &str, entries: &[SubDeviceEntry]) -> bool {
        let mut ok = true;
        let uids: Vec<Bson> = entries.iter().map(|e| Bson::String(e.uid.clone())).collect();
        for dup in find_duplicates(&uids) {
            self.reporter
                .error(format!("sub-device uid {dup} is listed more than once"));
            ok = false;
        }
        if entries.iter().any(|e| e.uid == parent_uid) {
            self.reporter
                .error(format!("device {parent_uid} lists itself as a sub-device"));
            ok = false;
        }
        ok
    }

    /// Each referenced uid is stored with the claimed type and is not part of another device
    fn check_existence(
        &self,
        parent_uid: &str,
        entries: &[SubDeviceEntry],
    ) -> Result<bool, StoreError> {
        let mut ok = true;
        for entry in entries {
            match self.reader.find_device_by_uid(&entry.uid)? {
                None => {
                    self.reporter.error(format!(
                        "sub-device {} ({}) not found in the devices collection",
                        entry.uid, entry.device_type
                    ));
                    ok = false;
                }
                Some(stored) => {
                    let stored_type = stored.get_str("device_type").unwrap_or_default();
                    if stored_type != entry.device_type {
                        self.reporter.error(format!(
                            "sub-device {} is stored as device_type \"{stored_type}\", not \"{}\"",
                            entry.uid, entry.device_type
                        ));
                        ok = false;
                    }
                }
            }
            let parents: Vec<String> = self
                .reader
                .find_parent_devices(&entry.uid)?
                .iter()
                .filter_map(|d| d.get_str("uid").ok().map(String::from))
                .filter(|uid| uid != parent_uid)
                .collect();
            if !parents.is_empty() {
                self.reporter.error(format!(
                    "sub-device {} is already a sub-device of {}",
                    entry.uid,
                    parents.join(", ")
                ));
                ok = false;
            }
        }
        Ok(ok)
    }

    /// Counts and indices per sub-device type match the table for the parent type
    fn check_requirements(&self, parent_type: &str, entries: &[SubDeviceEntry]) -> bool {
        let rules = match self.table.rules_for(parent_type) {
            Some(r) => r,
            None => return true,
        };
        let mut ok = true;
        for (sub_type, rule) in rules {
            let matching: Vec<&SubDeviceEntry> =
                entries.iter().filter(|e| &e.device_type == sub_type).collect();
            ok &= match &rule.index {
                Some(range) => self.check_indexed(parent_type, sub_type, range, &matching),
                None => self.check_single(parent_type, sub_type, &matching),
            };
        }
        ok
    }

    fn check_indexed(
        &self,
        parent_type: &str,
        sub_type: &str,
        range: &str,
        matching: &[&SubDeviceEntry],
    ) -> bool {
        let (start, stop) = match parse_index_range(range) {
            Some(r) => r,
            None => {
                self.reporter.error(format!(
                    "requirement table has a malformed index range \"{range}\" for {sub_type} in {parent_type}"
                ));
                return false;
            }
        };
        let expected = (stop - start + 1) as usize;
        let mut ok = true;
        if matching.len() != expected {
            self.reporter.error(format!(
                "{parent_type} requires {expected} {sub_type} sub-devices (indices {start}-{stop}), found {}",
                matching.len()
            ));
            ok = false;
        }

        let mut found: BTreeSet<i64> = BTreeSet::new();
        for entry in matching {
            match entry.index {
                Some(i) => {
                    found.insert(i);
                }
                None => {
                    self.reporter.error(format!(
                        "{sub_type} sub-device {} requires an index in {start}-{stop}",
                        entry.uid
                    ));
                    ok = false;
                }
            }
        }
        let wanted: BTreeSet<i64> = (start..=stop).collect();
        let missing: Vec<String> = wanted.difference(&found).map(|i| i.to_string()).collect();
        let extra: Vec<String> = found.difference(&wanted).map(|i| i.to_string()).collect();
        if !missing.is_empty() {
            self.reporter.error(format!(
                "{parent_type} is missing {sub_type} indices [{}]",
                missing.join(", ")
            ));
            ok = false;
        }
        if !extra.is_empty() {
            self.reporter.error(format!(
                "{parent_type} has unexpected {sub_type} indices [{}]",
                extra.join(", ")
            ));
            ok = false;
        }
        ok
    }

    fn check_single(&self, parent_type: &str, sub_type: &str, matching: &[&SubDeviceEntry]) -> bool {
        let mut ok = true;
        if matching.len() != 1 {
            self.reporter.error(format!(
                "{parent_type} requires only 1 {sub_type} sub-device, found {}",
                matching.len()
            ));
            ok = false;
        }
        for entry in matching {
            if let Some(i) = entry.index {
                self.reporter.error(format!(
                    "{sub_type} sub-device {} must not carry an index (found {i})",
                    entry.uid
                ));
                ok = false;
            }
        }
        ok
    }

    /// No sub-device type outside the table for this parent
    fn check_closure(&self, parent_type: &str, entries: &[SubDeviceEntry]) -> bool {
        let rules = self.table.rules_for(parent_type);
        let mut unexpected: BTreeSet<&str> = BTreeSet::new();
        for entry in entries {
            let known = rules.is_some_and(|r| r.contains_key(&entry.device_type));
            if !known {
                unexpected.insert(entry.device_type.as_str());
            }
        }
        for sub_type in &unexpected {
            self.reporter.error(format!(
                "sub-device type \"{sub_type}\" is not expected in a {parent_type}"
            ));
        }
        unexpected.is_empty()
    }

    /// Naming convention: the sub-device's trailing id appears in the parent uid
    fn check_id_in_uid(&self, parent_uid: &str, parent_type: &str, entries: &[SubDeviceEntry]) -> bool {
        let rules = match self.table.rules_for(parent_type) {
            Some(r) => r,
            None => return true,
        };
        let mut ok = true;
        for entry in entries {
            let rule: Option<&SubDeviceRule> = rules.get(&entry.device_type);
            if !rule.is_some_and(|r| r.id_in_uid) {
                continue;
            }
            let id = trailing_id(&entry.uid);
            if !parent_uid.contains(id) {
                self.reporter.error(format!(
                    "id \"{id}\" of {} sub-device {} does not appear in parent uid {parent_uid}",
                    entry.device_type, entry.uid
                ));
                ok = false;
            }
        }
        ok
    }
}
