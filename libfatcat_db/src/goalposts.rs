//! Acceptance-threshold ("goalpost") documents.
//!
//! For a given `(testname, testtype)` the stored goalposts form a chain ordered by
//! `valid_date`; a new one must be strictly later than the newest and must actually change the
//! bounds.
use bson::{Bson, Document};

use std::cmp::Ordering;

use super::datatypes::{as_f64, compare_date_strings, is_number, valid_date_time};
use super::error::StoreError;
use super::formats::GoalpostFormat;
use super::general::check_required_fields;
use super::mongo_reader::MongoReader;
use super::report::Reporter;

pub const TESTNAME_KEY: &str = "goalpost_testname";
pub const TESTTYPE_KEY: &str = "goalpost_testtype";
pub const TESTBOUNDS_KEY: &str = "goalpost_testbounds";
pub const VALID_DATE_KEY: &str = "valid_date";

pub fn valid_testtype(testtype: &str, format: &GoalpostFormat, reporter: &Reporter) -> bool {
    if format.testtypes.iter().any(|t| t == testtype) {
        true
    } else {
        reporter.error(format!(
            "\"{TESTTYPE_KEY}\" = \"{testtype}\" must be one of [{}]",
            format.testtypes.join(", ")
        ));
        false
    }
}

/// Scalar number for `min`/`max`/`equals`; a strictly ascending pair for `in-range`
pub fn valid_testbounds(testtype: &str, bounds: &Bson, reporter: &Reporter) -> bool {
    match testtype {
        "min" | "max" | "equals" => {
            if is_number(bounds) && as_f64(bounds).is_some_and(f64::is_finite) {
                true
            } else {
                reporter.error(format!(
                    "\"{TESTBOUNDS_KEY}\" for testtype {testtype} must be a single number, found {bounds}"
                ));
                false
            }
        }
        "in-range" => {
            let pair: Option<(f64, f64)> = match bounds {
                Bson::Array(items) if items.len() == 2 => {
                    match (as_f64(&items[0]), as_f64(&items[1])) {
                        (Some(low), Some(high)) => Some((low, high)),
                        _ => None,
                    }
                }
                _ => None,
            };
            match pair {
                Some((low, high)) if low < high => true,
                Some((low, high)) => {
                    reporter.error(format!(
                        "\"{TESTBOUNDS_KEY}\" for testtype in-range must be strictly ascending, found [{low}, {high}]"
                    ));
                    false
                }
                None => {
                    reporter.error(format!(
                        "\"{TESTBOUNDS_KEY}\" for testtype in-range must be a list of 2 numbers, found {bounds}"
                    ));
                    false
                }
            }
        }
        other => {
            reporter.error(format!(
                "cannot judge \"{TESTBOUNDS_KEY}\" for unknown testtype \"{other}\""
            ));
            false
        }
    }
}

/// Numeric equality of two bounds; `5` and `5.0` are the same bound
pub fn bounds_equal(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| bounds_equal(p, q))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(p), Some(q)) => p == q,
            _ => a == b,
        },
    }
}

fn is_later(new: &str, stored: &str) -> bool {
    compare_date_strings(new, stored) == Ordering::Greater
}

pub struct Goalposts<'a> {
    reader: MongoReader<'a>,
    format: &'a GoalpostFormat,
    reporter: &'a Reporter,
}

impl<'a> Goalposts<'a> {
    pub fn new(reader: MongoReader<'a>, format: &'a GoalpostFormat, reporter: &'a Reporter) -> Self {
        Self {
            reader,
            format,
            reporter,
        }
    }

    pub fn validate(&self, goalpost: &Document) -> Result<bool, StoreError> {
        if !check_required_fields(
            "goalpost",
            goalpost,
            &self.format.required_fields,
            self.reporter,
        ) {
            return Ok(false);
        }
        let testname = goalpost.get_str(TESTNAME_KEY).unwrap_or_default();
        let testtype = goalpost.get_str(TESTTYPE_KEY).unwrap_or_default();
        let valid_date = goalpost.get(VALID_DATE_KEY).unwrap_or(&Bson::Null);
        let bounds = goalpost.get(TESTBOUNDS_KEY).unwrap_or(&Bson::Null);

        let mut ok = valid_testtype(testtype, self.format, self.reporter);
        ok &= valid_testbounds(testtype, bounds, self.reporter);
        ok &= valid_date_time(VALID_DATE_KEY, valid_date, self.reporter);
        let date = goalpost.get_str(VALID_DATE_KEY).unwrap_or_default();
        ok &= self.check_valid_date(testname, testtype, date)?;
        ok &= self.check_new_bounds(testname, testtype, bounds)?;

        if ok {
            self.reporter
                .pass(format!("goalpost {testname} ({testtype}) is valid"));
        }
        Ok(ok)
    }

    /// The new valid_date is strictly later than the newest stored one for this test
    pub fn check_valid_date(
        &self,
        testname: &str,
        testtype: &str,
        valid_date: &str,
    ) -> Result<bool, StoreError> {
        let latest = match self.reader.latest_goalpost(testname, testtype)? {
            Some(l) => l,
            None => {
                self.reporter.info(format!(
                    "no stored goalpost for {testname} ({testtype}); this will be the first"
                ));
                return Ok(true);
            }
        };
        let stored = latest.get_str(VALID_DATE_KEY).unwrap_or_default();
        if is_later(valid_date, stored) {
            Ok(true)
        } else {
            self.reporter.error(format!(
                "\"{VALID_DATE_KEY}\" {valid_date} must be later than the latest stored {stored} for {testname} ({testtype})"
            ));
            Ok(false)
        }
    }

    /// The new bounds differ from the newest stored bounds for this test
    pub fn check_new_bounds(
        &self,
        testname: &str,
        testtype: &str,
        bounds: &Bson,
    ) -> Result<bool, StoreError> {
        let latest = match self.reader.latest_goalpost(testname, testtype)? {
            Some(l) => l,
            None => return Ok(true),
        };
        match latest.get(TESTBOUNDS_KEY) {
            Some(stored) if bounds_equal(stored, bounds) => {
                self.reporter.error(format!(
                    "\"{TESTBOUNDS_KEY}\" {bounds} is identical to the latest stored bounds for {testname} ({testtype})"
                ));
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Formats;
    use crate::store::{Collection, MemoryStore};
    use bson::{bson, doc};

    fn store() -> MemoryStore {
        let store = MemoryStore::default();
        store.seed(
            Collection::Goalposts,
            vec![
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "in-range",
                      "goalpost_testbounds": [4.0, 6.0], "valid_date": "2021-01-01"},
                doc! {"goalpost_testname": "gain", "goalpost_testtype": "in-range",
                      "goalpost_testbounds": [4.5, 5.5], "valid_date": "2022-01-01"},
            ],
        );
        store
    }

    fn goalpost(bounds: Bson, date: &str) -> Document {
        doc! {"goalpost_testname": "gain", "goalpost_testtype": "in-range",
              "goalpost_testbounds": bounds, "valid_date": date}
    }

    fn validate(store: &MemoryStore, document: &Document) -> (bool, Reporter) {
        let formats = Formats::bundled().unwrap();
        let reporter = Reporter::default();
        let ok = Goalposts::new(MongoReader::new(store), &formats.goalpost, &reporter)
            .validate(document)
            .unwrap();
        (ok, reporter)
    }

    #[test]
    fn test_testbounds_shapes() {
        let reporter = Reporter::default();
        assert!(valid_testbounds("min", &bson!(3), &reporter));
        assert!(valid_testbounds("equals", &bson!(2.5), &reporter));
        assert!(!valid_testbounds("max", &bson!([1, 2]), &reporter));
        assert!(valid_testbounds("in-range", &bson!([1, 2.5]), &reporter));
        assert!(!valid_testbounds("in-range", &bson!([5, 5]), &reporter));
        assert!(!valid_testbounds("in-range", &bson!([6, 5]), &reporter));
        assert!(!valid_testbounds("in-range", &bson!([1, 2, 3]), &reporter));
        assert!(!valid_testbounds("in-range", &bson!(["a", "b"]), &reporter));
        assert!(!valid_testbounds("between", &bson!([1, 2]), &reporter));
    }

    #[test]
    fn test_goalpost_ordering() {
        let store = store();

        let (ok, reporter) = validate(&store, &goalpost(bson!([4.0, 5.0]), "2022-01-01"));
        assert!(!ok);
        assert!(reporter.contains("must be later than the latest stored 2022-01-01"));

        let (ok, _) = validate(&store, &goalpost(bson!([4.0, 5.0]), "2021-06-01"));
        assert!(!ok);

        let (ok, reporter) = validate(&store, &goalpost(bson!([4.5, 5.5]), "2023-01-01"));
        assert!(!ok);
        assert!(reporter.contains("identical to the latest stored bounds"));

        let (ok, _) = validate(&store, &goalpost(bson!([4, 5]), "2023-01-01"));
        assert!(ok);
    }

    #[test]
    fn test_latest_is_chosen_by_instant_not_text() {
        let store = MemoryStore::default();
        store.seed(
            Collection::Goalposts,
            vec![
                goalpost(bson!([4.0, 6.0]), "2022-05-01T05:00:00Z"),
                goalpost(bson!([4.5, 5.5]), "2022-05-01T12:00:00+09:00"),
            ],
        );

        let (ok, reporter) = validate(&store, &goalpost(bson!([4, 5]), "2022-05-01T04:00:00Z"));
        assert!(!ok);
        assert!(reporter.contains("must be later than the latest stored 2022-05-01T05:00:00Z"));

        let (ok, reporter) = validate(&store, &goalpost(bson!([4.0, 6.0]), "2022-05-01T06:00:00Z"));
        assert!(!ok);
        assert!(reporter.contains("identical to the latest stored bounds"));

        let (ok, _) = validate(&store, &goalpost(bson!([4.5, 5.5]), "2022-05-01T06:00:00Z"));
        assert!(ok);
    }

    #[test]
    fn test_first_goalpost_for_a_test() {
        let store = store();
        let first = doc! {"goalpost_testname": "dark_rate", "goalpost_testtype": "max",
                          "goalpost_testbounds": 1500, "valid_date": "2022-02-02"};
        let (ok, reporter) = validate(&store, &first);
        assert!(ok);
        assert!(reporter.contains("this will be the first"));
    }

    #[test]
    fn test_bounds_equal() {
        assert!(bounds_equal(&bson!(5), &bson!(5.0)));
        assert!(bounds_equal(&bson!([1, 2.0]), &bson!([1.0, 2])));
        assert!(!bounds_equal(&bson!([1, 2]), &bson!([1, 3])));
        assert!(!bounds_equal(&bson!([1, 2]), &bson!(1)));
    }
}
