//! Checks shared by every document kind.
use bson::{Bson, Document};

use super::datatypes::{is_instance, no_hyphen, not_empty_string, not_nan_inf, tag_names};
use super::error::{CheckError, StoreError};
use super::formats::FieldTypes;
use super::mongo_reader::MongoReader;
use super::report::Reporter;
use super::store::Collection;

/// Headroom below the 16 MiB document limit of the store
pub const MAX_BSON_SIZE: usize = 16_000_000;
/// Stamped at insert time; callers may not supply it
pub const INSERT_META_KEY: &str = "insert_meta";

/// Reject NaN/Infinity, hyphens in keys and blank strings anywhere in the document.
///
/// Every offending location is reported, not just the first.
pub fn check_json_syntax(document: &Document, reporter: &Reporter) -> bool {
    let mut ok = true;
    for (key, value) in document {
        ok &= check_key(key, key, reporter);
        ok &= check_value(key, value, reporter);
    }
    if ok {
        reporter.pass("JSON syntax is clean");
    }
    ok
}

fn check_key(path: &str, key: &str, reporter: &Reporter) -> bool {
    let mut ok = true;
    if !no_hyphen(key) {
        reporter.error(format!("key \"{path}\" contains a hyphen"));
        ok = false;
    }
    if !not_empty_string(key) {
        reporter.error(format!("key \"{path}\" is empty"));
        ok = false;
    }
    ok
}

fn check_value(path: &str, value: &Bson, reporter: &Reporter) -> bool {
    match value {
        Bson::Double(x) => {
            if not_nan_inf(*x) {
                true
            } else {
                reporter.error(format!("\"{path}\" is {x}; NaN and Infinity are not allowed"));
                false
            }
        }
        Bson::String(s) => {
            if not_empty_string(s) {
                true
            } else {
                reporter.error(format!("\"{path}\" is an empty string"));
                false
            }
        }
        Bson::Array(items) => {
            let mut ok = true;
            for (i, item) in items.iter().enumerate() {
                ok &= check_value(&format!("{path}[{i}]"), item, reporter);
            }
            ok
        }
        Bson::Document(sub) => {
            let mut ok = true;
            for (key, item) in sub {
                let sub_path = format!("{path}.{key}");
                ok &= check_key(&sub_path, key, reporter);
                ok &= check_value(&sub_path, item, reporter);
            }
            ok
        }
        _ => true,
    }
}

/// Every required field is present and matches one of its type tags
pub fn check_required_fields(
    context: &str,
    document: &Document,
    required: &FieldTypes,
    reporter: &Reporter,
) -> bool {
    let mut ok = true;
    for (field, tags) in required {
        match document.get(field) {
            None => {
                reporter.error(format!("{context} is missing required field \"{field}\""));
                ok = false;
            }
            Some(value) if !is_instance(value, tags) => {
                reporter.error(format!(
                    "{context} field \"{field}\" must be of type {}, found {value}",
                    tag_names(tags)
                ));
                ok = false;
            }
            Some(_) => (),
        }
    }
    ok
}

/// Optional fields are judged only when present
pub fn check_optional_fields(
    context: &str,
    document: &Document,
    optional: &FieldTypes,
    reporter: &Reporter,
) -> bool {
    let mut ok = true;
    for (field, tags) in optional {
        if let Some(value) = document.get(field) {
            if !is_instance(value, tags) {
                reporter.error(format!(
                    "{context} optional field \"{field}\" must be of type {}, found {value}",
                    tag_names(tags)
                ));
                ok = false;
            }
        }
    }
    ok
}

pub fn check_no_insert_meta(document: &Document, reporter: &Reporter) -> bool {
    if document.contains_key(INSERT_META_KEY) {
        reporter.error(format!(
            "\"{INSERT_META_KEY}\" is stamped at insert time and must not be supplied"
        ));
        false
    } else {
        true
    }
}

/// No document in the target collection was inserted from a file with this name
pub fn unique_json_file_name(
    reader: &MongoReader,
    collection: Collection,
    file_name: &str,
    reporter: &Reporter,
) -> Result<bool, StoreError> {
    let count = reader.count_json_file_name(collection, file_name)?;
    if count == 0 {
        reporter.pass(format!("JSON file name {file_name} is unique in {collection}"));
        Ok(true)
    } else {
        reporter.error(format!(
            "duplicate JSON file name: {file_name} already inserted into {collection} ({count} found)"
        ));
        Ok(false)
    }
}

/// No document in the target collection was inserted from a file with this content hash
pub fn unique_json_file_md5(
    reader: &MongoReader,
    collection: Collection,
    md5: &str,
    reporter: &Reporter,
) -> Result<bool, StoreError> {
    let count = reader.count_json_md5(collection, md5)?;
    if count == 0 {
        reporter.pass(format!("JSON file md5 {md5} is unique in {collection}"));
        Ok(true)
    } else {
        reporter.error(format!(
            "duplicate JSON file md5: {md5} already inserted into {collection} ({count} found)"
        ));
        Ok(false)
    }
}

/// Encoded size of the document in bytes
pub fn bson_size(document: &Document) -> Result<usize, bson::ser::Error> {
    let mut buffer: Vec<u8> = Vec::new();
    document.to_writer(&mut buffer)?;
    Ok(buffer.len())
}

pub fn check_bson_size(document: &Document, reporter: &Reporter) -> Result<bool, CheckError> {
    let size = bson_size(document)?;
    reporter.debug(format!(
        "BSON size is {}",
        human_bytes::human_bytes(size as f64)
    ));
    if size <= MAX_BSON_SIZE {
        Ok(true)
    } else {
        reporter.error(format!(
            "BSON size {} exceeds the limit of {}",
            human_bytes::human_bytes(size as f64),
            human_bytes::human_bytes(MAX_BSON_SIZE as f64)
        ));
        Ok(false)
    }
}
