use bson::{Bson, Document};

use super::aux_ids::AuxIds;
use super::datatypes::{is_alpha_num_hyphen_underscore, valid_date_time};
use super::error::StoreError;
use super::formats::Formats;
use super::general::check_required_fields;
use super::mongo_reader::MongoReader;
use super::report::Reporter;
use super::sub_devices::SubDevices;

pub const KNOWN_DUPLICATE_KEY: &str = "known_duplicate_uid";

/// Composite validator for device documents
pub struct Devices<'a> {
    reader: MongoReader<'a>,
    formats: &'a Formats,
    reporter: &'a Reporter,
}

impl<'a> Devices<'a> {
    pub fn new(reader: MongoReader<'a>, formats: &'a Formats, reporter: &'a Reporter) -> Self {
        Self {
            reader,
            formats,
            reporter,
        }
    }

    pub fn validate(&self, device: &Document) -> Result<bool, StoreError> {
        if !check_required_fields(
            "device",
            device,
            &self.formats.device.required_fields,
            self.reporter,
        ) {
            return Ok(false);
        }
        let uid = device.get_str("uid").unwrap_or_default();
        let device_type = device.get_str("device_type").unwrap_or_default();

        let mut ok = self.check_uid(uid);
        ok &= self.check_device_type(device_type);
        ok &= valid_date_time(
            "production_date",
            device.get("production_date").unwrap_or(&Bson::Null),
            self.reporter,
        );
        ok &= self.check_duplicate(uid, device.get_bool(KNOWN_DUPLICATE_KEY).unwrap_or(false))?;
        ok &= SubDevices::new(self.reader, &self.formats.sub_devices, self.reporter)
            .validate(device)?;
        ok &= AuxIds::new(self.reader, &self.formats.aux_ids, self.reporter).validate(device)?;

        if ok {
            self.reporter
                .pass(format!("device {uid} ({device_type}) is valid"));
        }
        Ok(ok)
    }

    fn check_uid(&self, uid: &str) -> bool {
        if is_alpha_num_hyphen_underscore(uid) {
            true
        } else {
            self.reporter.error(format!(
                "uid \"{uid}\" may only contain letters, digits, hyphens and underscores"
            ));
            false
        }
    }

    fn check_device_type(&self, device_type: &str) -> bool {
        if self
            .formats
            .device
            .device_types
            .iter()
            .any(|t| t == device_type)
        {
            true
        } else {
            self.reporter
                .error(format!("unknown device_type \"{device_type}\""));
            false
        }
    }

    /// A uid already in the store fails unless the document declares the duplicate as known
    fn check_duplicate(&self, uid: &str, known_duplicate: bool) -> Result<bool, StoreError> {
        let count = self.reader.duplicate_count(uid)?;
        if count == 0 {
            return Ok(true);
        }
        if known_duplicate {
            self.reporter.warning(format!(
                "uid {uid} is already stored {count} time(s); accepted as a known duplicate"
            ));
            Ok(true)
        } else {
            self.reporter.error(format!(
                "duplicate uid: {uid} is already stored {count} time(s)"
            ));
            Ok(false)
        }
    }
}
