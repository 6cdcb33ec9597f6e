use bson::{Bson, Document};

use super::datatypes::{as_f64, as_i64, valid_unix_time};
use super::error::StoreError;
use super::formats::Formats;
use super::general::check_required_fields;
use super::meas_data::MeasData;
use super::mongo_reader::MongoReader;
use super::report::Reporter;

/// Composite validator for measurement documents
pub struct Measurements<'a> {
    reader: MongoReader<'a>,
    formats: &'a Formats,
    reporter: &'a Reporter,
}

impl<'a> Measurements<'a> {
    pub fn new(reader: MongoReader<'a>, formats: &'a Formats, reporter: &'a Reporter) -> Self {
        Self {
            reader,
            formats,
            reporter,
        }
    }

    pub fn validate(&self, measurement: &Document) -> Result<bool, StoreError> {
        let format = &self.formats.measurement;
        if !check_required_fields(
            "measurement",
            measurement,
            &format.required_fields,
            self.reporter,
        ) {
            return Ok(false);
        }
        let device_uid = measurement.get_str("device_uid").unwrap_or_default();
        let meas_name = measurement.get_str("meas_name").unwrap_or_default();
        let meas_time = measurement.get("meas_time").unwrap_or(&Bson::Null);
        let run_number = measurement.get("run_number").and_then(as_i64).unwrap_or(-1);

        let mut ok = valid_unix_time("meas_time", meas_time, self.reporter);
        ok &= self.check_device_exists(device_uid)?;
        ok &= self.check_allowed(measurement, "meas_class", &format.meas_classes);
        ok &= self.check_allowed(measurement, "meas_stage", &format.meas_stages);
        ok &= self.check_allowed(measurement, "meas_site", &format.meas_sites);
        if run_number < 0 {
            self.reporter
                .error(format!("\"run_number\" must not be negative, found {run_number}"));
            ok = false;
        }
        ok &= self.check_duplicate(device_uid, meas_name, run_number, meas_time)?;
        ok &= MeasData::new(self.reader, &self.formats.meas_data, self.reporter)
            .validate(measurement)?;

        if ok {
            self.reporter.pass(format!(
                "measurement {meas_name} run {run_number} of {device_uid} is valid"
            ));
        }
        Ok(ok)
    }

    /// Measurements may reference top-level devices and sub-devices alike
    fn check_device_exists(&self, device_uid: &str) -> Result<bool, StoreError> {
        match self.reader.find_device_by_uid(device_uid)? {
            Some(_) => Ok(true),
            None => {
                self.reporter.error(format!(
                    "device_uid {device_uid} was not found in {}",
                    self.reader.database_name()
                ));
                Ok(false)
            }
        }
    }

    fn check_allowed(&self, measurement: &Document, field: &str, allowed: &[String]) -> bool {
        if allowed.is_empty() {
            return true;
        }
        let value = measurement.get_str(field).unwrap_or_default();
        if allowed.iter().any(|a| a == value) {
            true
        } else {
            self.reporter.error(format!(
                "\"{field}\" = \"{value}\" must be one of [{}]",
                allowed.join(", ")
            ));
            false
        }
    }

    /// Same device, name, run number and time means the run was already submitted
    fn check_duplicate(
        &self,
        device_uid: &str,
        meas_name: &str,
        run_number: i64,
        meas_time: &Bson,
    ) -> Result<bool, StoreError> {
        let time = as_f64(meas_time);
        let duplicates = self
            .reader
            .get_fat_measurements(device_uid, meas_name)?
            .iter()
            .filter(|stored| {
                stored.get("run_number").and_then(as_i64) == Some(run_number)
                    && stored.get("meas_time").and_then(as_f64) == time
            })
            .count();
        if duplicates == 0 {
            Ok(true)
        } else {
            self.reporter.error(format!(
                "duplicate measurement: {meas_name} run {run_number} of {device_uid} is already stored"
            ));
            Ok(false)
        }
    }
}
