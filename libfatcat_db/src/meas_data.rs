//! The `meas_data` payload of a measurement document.
//!
//! Each entry is a dict carrying a `data_format` and a `label`; the format decides which further
//! keys must be present (see `meas_data.json`).
use bson::{Bson, Document};

use super::datatypes::{find_duplicates, is_hex_string, is_number};
use super::error::StoreError;
use super::formats::MeasDataFormats;
use super::general::check_required_fields;
use super::mongo_reader::MongoReader;
use super::report::Reporter;

pub const MEAS_DATA_KEY: &str = "meas_data";
pub const STF_RESULT_FORMAT: &str = "stf_result";
pub const STF_RESULT_ID_KEY: &str = "stf_result_id";
/// Hex length of a stored object id
pub const OBJECT_ID_HEX_LEN: usize = 24;

const NUMERIC_ARRAYS: [&str; 3] = ["values", "x_values", "y_values"];

pub struct MeasData<'a> {
    reader: MongoReader<'a>,
    formats: &'a MeasDataFormats,
    reporter: &'a Reporter,
}

impl<'a> MeasData<'a> {
    pub fn new(reader: MongoReader<'a>, formats: &'a MeasDataFormats, reporter: &'a Reporter) -> Self {
        Self {
            reader,
            formats,
            reporter,
        }
    }

    pub fn validate(&self, measurement: &Document) -> Result<bool, StoreError> {
        let items = match measurement.get(MEAS_DATA_KEY) {
            Some(Bson::Array(items)) if !items.is_empty() => items,
            Some(Bson::Array(_)) => {
                self.reporter
                    .error(format!("\"{MEAS_DATA_KEY}\" must not be empty"));
                return Ok(false);
            }
            Some(other) => {
                self.reporter.error(format!(
                    "\"{MEAS_DATA_KEY}\" must be a list of dicts, found {other}"
                ));
                return Ok(false);
            }
            None => {
                self.reporter
                    .error(format!("measurement is missing \"{MEAS_DATA_KEY}\""));
                return Ok(false);
            }
        };

        let mut ok = true;
        let mut labels: Vec<Bson> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let context = format!("{MEAS_DATA_KEY}[{i}]");
            match item {
                Bson::Document(entry) => {
                    ok &= self.check_entry(&context, entry)?;
                    if let Some(label) = entry.get("label") {
                        labels.push(label.clone());
                    }
                }
                other => {
                    self.reporter
                        .error(format!("{context} must be a dict, found {other}"));
                    ok = false;
                }
            }
        }

        for dup in find_duplicates(&labels) {
            self.reporter
                .error(format!("{MEAS_DATA_KEY} label {dup} is used more than once"));
            ok = false;
        }
        Ok(ok)
    }

    fn check_entry(&self, context: &str, entry: &Document) -> Result<bool, StoreError> {
        if !check_required_fields(context, entry, &self.formats.entry_fields, self.reporter) {
            return Ok(false);
        }
        let data_format = entry.get_str("data_format").unwrap_or_default();
        let fields = match self.formats.formats.get(data_format) {
            Some(f) => f,
            None => {
                let mut known: Vec<&str> = self.formats.formats.keys().map(String::as_str).collect();
                known.sort_unstable();
                self.reporter.error(format!(
                    "{context} has unknown data_format \"{data_format}\", expected one of [{}]",
                    known.join(", ")
                ));
                return Ok(false);
            }
        };
        let context = format!("{context} ({data_format})");
        if !check_required_fields(&context, entry, fields, self.reporter) {
            return Ok(false);
        }

        let mut ok = self.check_numeric_arrays(&context, entry);
        ok &= self.check_xy_lengths(&context, entry);
        ok &= self.check_table(&context, entry);
        if data_format == STF_RESULT_FORMAT {
            ok &= self.check_stf_result(&context, entry)?;
        }
        Ok(ok)
    }

    fn check_numeric_arrays(&self, context: &str, entry: &Document) -> bool {
        let mut ok = true;
        for key in NUMERIC_ARRAYS {
            if let Ok(values) = entry.get_array(key) {
                if let Some(bad) = values.iter().position(|v| !is_number(v)) {
                    self.reporter.error(format!(
                        "{context} \"{key}\"[{bad}] must be a number, found {}",
                        values[bad]
                    ));
                    ok = false;
                }
            }
        }
        ok
    }

    fn check_xy_lengths(&self, context: &str, entry: &Document) -> bool {
        match (entry.get_array("x_values"), entry.get_array("y_values")) {
            (Ok(x), Ok(y)) if x.len() != y.len() => {
                self.reporter.error(format!(
                    "{context} has {} x_values but {} y_values",
                    x.len(),
                    y.len()
                ));
                false
            }
            _ => true,
        }
    }

    fn check_table(&self, context: &str, entry: &Document) -> bool {
        let (columns, rows) = match (entry.get_array("columns"), entry.get_array("rows")) {
            (Ok(c), Ok(r)) => (c, r),
            _ => return true,
        };
        let mut ok = true;
        for (i, row) in rows.iter().enumerate() {
            if let Bson::Array(cells) = row {
                if cells.len() != columns.len() {
                    self.reporter.error(format!(
                        "{context} row {i} has {} cells for {} columns",
                        cells.len(),
                        columns.len()
                    ));
                    ok = false;
                }
            }
        }
        ok
    }

    /// The referenced raw STF result must be stored already
    fn check_stf_result(&self, context: &str, entry: &Document) -> Result<bool, StoreError> {
        let id = entry.get_str(STF_RESULT_ID_KEY).unwrap_or_default();
        if id.len() != OBJECT_ID_HEX_LEN || !is_hex_string(id) {
            self.reporter.error(format!(
                "{context} \"{STF_RESULT_ID_KEY}\" = \"{id}\" must be a {OBJECT_ID_HEX_LEN} character hex id"
            ));
            return Ok(false);
        }
        if self.reader.count_stf_result(id)? == 0 {
            self.reporter
                .error(format!("{context} stf result {id} was not found"));
            return Ok(false);
        }
        Ok(true)
    }
}
