//! Orchestrates every check for one document.
//!
//! A document moves through the stages
//!
//! `Untyped -> Typed -> GeneralChecked -> TypeChecked -> AdditionalChecked -> {Passed, Failed}`
//!
//! Classification is the only stage that stops the walk; every other stage runs all of its
//! checks even after one of them failed, so a single run reports every problem in the file.
use bson::Document;
use std::fmt;

use super::devices::Devices;
use super::error::CheckError;
use super::formats::{FieldTypes, Formats};
use super::general::{
    check_bson_size, check_json_syntax, check_no_insert_meta, check_optional_fields,
    unique_json_file_md5, unique_json_file_name,
};
use super::goalposts::Goalposts;
use super::measurements::Measurements;
use super::mongo_reader::MongoReader;
use super::report::Reporter;
use super::store::Collection;
use super::support_files::{SupportFileProbe, SupportFiles};

/// What a JSON document turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Device,
    Measurement,
    Goalpost,
    Ambiguous,
}

impl DocType {
    /// Collection a document of this type is inserted into
    pub fn collection(&self) -> Option<Collection> {
        match self {
            DocType::Device => Some(Collection::Devices),
            DocType::Measurement => Some(Collection::Measurements),
            DocType::Goalpost => Some(Collection::Goalposts),
            DocType::Ambiguous => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocType::Device => write!(f, "device"),
            DocType::Measurement => write!(f, "measurement"),
            DocType::Goalpost => write!(f, "goalpost"),
            DocType::Ambiguous => write!(f, "ambiguous"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckStage {
    Untyped,
    Typed,
    GeneralChecked,
    TypeChecked,
    AdditionalChecked,
    Passed,
    Failed,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStage::Untyped => write!(f, "untyped"),
            CheckStage::Typed => write!(f, "typed"),
            CheckStage::GeneralChecked => write!(f, "general checks"),
            CheckStage::TypeChecked => write!(f, "type checks"),
            CheckStage::AdditionalChecked => write!(f, "additional checks"),
            CheckStage::Passed => write!(f, "passed"),
            CheckStage::Failed => write!(f, "failed"),
        }
    }
}

fn present_keys(document: &Document, required: &FieldTypes) -> usize {
    required
        .keys()
        .filter(|k| document.contains_key(k.as_str()))
        .count()
}

/// Classify a document by which required-key set it satisfies.
///
/// Exactly one set must be fully present and the other two must not be touched at all.
pub fn determine_json_file_type(document: &Document, formats: &Formats) -> DocType {
    let candidates = [
        (DocType::Device, &formats.device.required_fields),
        (DocType::Measurement, &formats.measurement.required_fields),
        (DocType::Goalpost, &formats.goalpost.required_fields),
    ];
    let counts: Vec<(DocType, usize, usize)> = candidates
        .iter()
        .map(|(t, required)| (*t, present_keys(document, required), required.len()))
        .collect();

    let full: Vec<DocType> = counts
        .iter()
        .filter(|(_, present, total)| present == total)
        .map(|(t, _, _)| *t)
        .collect();
    let touched = counts.iter().filter(|(_, present, _)| *present > 0).count();

    match full.as_slice() {
        [only] if touched == 1 => *only,
        _ => DocType::Ambiguous,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub doc_type: DocType,
    /// Last stage the document completed before reaching a verdict
    pub completed: CheckStage,
    /// First stage whose checks did not all pass
    pub first_failed: Option<CheckStage>,
    /// `Passed` or `Failed`
    pub stage: CheckStage,
}

/// Progress of one document through the stages
struct StageWalk<'r> {
    file_name: &'r str,
    reporter: &'r Reporter,
    completed: CheckStage,
    first_failed: Option<CheckStage>,
}

impl<'r> StageWalk<'r> {
    fn new(file_name: &'r str, reporter: &'r Reporter) -> Self {
        Self {
            file_name,
            reporter,
            completed: CheckStage::Untyped,
            first_failed: None,
        }
    }

    fn complete(&mut self, stage: CheckStage, ok: bool) {
        self.completed = stage;
        if !ok && self.first_failed.is_none() {
            self.first_failed = Some(stage);
        }
        self.reporter.debug(format!(
            "{}: {stage} {}",
            self.file_name,
            if ok { "done" } else { "failed" }
        ));
    }

    fn finish(self, doc_type: DocType) -> CheckOutcome {
        let failed = self.first_failed.is_some() || self.completed == CheckStage::Untyped;
        CheckOutcome {
            doc_type,
            completed: self.completed,
            first_failed: self.first_failed,
            stage: if failed {
                CheckStage::Failed
            } else {
                CheckStage::Passed
            },
        }
    }
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.stage == CheckStage::Passed
    }
}

pub struct Checks<'a> {
    reader: MongoReader<'a>,
    formats: &'a Formats,
    probe: &'a dyn SupportFileProbe,
    reporter: &'a Reporter,
}

impl<'a> Checks<'a> {
    pub fn new(
        reader: MongoReader<'a>,
        formats: &'a Formats,
        probe: &'a dyn SupportFileProbe,
        reporter: &'a Reporter,
    ) -> Self {
        Self {
            reader,
            formats,
            probe,
            reporter,
        }
    }

    /// Run every stage on a document loaded from `file_name` with content hash `md5`
    pub fn run(
        &self,
        document: &Document,
        file_name: &str,
        md5: &str,
    ) -> Result<CheckOutcome, CheckError> {
        let mut walk = StageWalk::new(file_name, self.reporter);
        let doc_type = determine_json_file_type(document, self.formats);
        let collection = match doc_type.collection() {
            Some(c) => c,
            None => {
                self.reporter.fatal(format!(
                    "{file_name} does not match exactly one of the device, measurement or goalpost formats"
                ));
                return Ok(walk.finish(doc_type));
            }
        };
        self.reporter
            .info(format!("{file_name} is a {doc_type} document"));
        walk.complete(CheckStage::Typed, true);

        let ok = self.general_checks(document, collection, file_name, md5)?;
        walk.complete(CheckStage::GeneralChecked, ok);
        let ok = self.type_checks(document, doc_type)?;
        walk.complete(CheckStage::TypeChecked, ok);
        let ok = self.additional_checks(document, doc_type)?;
        walk.complete(CheckStage::AdditionalChecked, ok);

        Ok(walk.finish(doc_type))
    }

    pub fn general_checks(
        &self,
        document: &Document,
        collection: Collection,
        file_name: &str,
        md5: &str,
    ) -> Result<bool, CheckError> {
        let mut ok = check_json_syntax(document, self.reporter);
        ok &= check_no_insert_meta(document, self.reporter);
        ok &= unique_json_file_name(&self.reader, collection, file_name, self.reporter)?;
        ok &= unique_json_file_md5(&self.reader, collection, md5, self.reporter)?;
        ok &= check_bson_size(document, self.reporter)?;
        Ok(ok)
    }

    pub fn type_checks(&self, document: &Document, doc_type: DocType) -> Result<bool, CheckError> {
        let ok = match doc_type {
            DocType::Device => {
                Devices::new(self.reader, self.formats, self.reporter).validate(document)?
            }
            DocType::Measurement => {
                Measurements::new(self.reader, self.formats, self.reporter).validate(document)?
            }
            DocType::Goalpost => {
                Goalposts::new(self.reader, &self.formats.goalpost, self.reporter)
                    .validate(document)?
            }
            DocType::Ambiguous => false,
        };
        Ok(ok)
    }

    pub fn additional_checks(
        &self,
        document: &Document,
        doc_type: DocType,
    ) -> Result<bool, CheckError> {
        let mut ok = check_optional_fields(
            &doc_type.to_string(),
            document,
            &self.formats.optional.fields,
            self.reporter,
        );
        ok &= SupportFiles::new(self.probe, self.reporter).validate(document)?;
        Ok(ok)
    }
}
