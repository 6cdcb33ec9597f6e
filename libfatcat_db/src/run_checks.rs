use std::path::{Path, PathBuf};

use super::checks::{CheckOutcome, Checks};
use super::error::CheckError;
use super::file_tools::{load_document, LoadedFile};
use super::formats::Formats;
use super::mongo_reader::MongoReader;
use super::report::Reporter;
use super::support_files::SupportFileProbe;

/// Result of checking one file on disk
#[derive(Debug, Clone)]
pub struct CheckedFile {
    pub path: PathBuf,
    /// `None` when the file could not be read as a JSON object
    pub file: Option<LoadedFile>,
    /// `None` when checking never started (unreadable file or no database)
    pub outcome: Option<CheckOutcome>,
}

impl CheckedFile {
    pub fn passed(&self) -> bool {
        self.outcome.is_some_and(|o| o.passed())
    }
}

/// Loads a file from disk and walks it through [`Checks`]
pub struct RunChecks<'a> {
    reader: MongoReader<'a>,
    formats: &'a Formats,
    probe: &'a dyn SupportFileProbe,
    reporter: &'a Reporter,
}

impl<'a> RunChecks<'a> {
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

    pub fn run(&self, path: &Path) -> Result<CheckedFile, CheckError> {
        let mut checked = CheckedFile {
            path: path.to_path_buf(),
            file: None,
            outcome: None,
        };

        let file = match load_document(path) {
            Ok(f) => f,
            Err(e) => {
                self.reporter
                    .fatal(format!("{}: {e}", path.to_string_lossy()));
                return Ok(checked);
            }
        };

        if !self.reader.is_connected() {
            self.reporter.fatal(format!(
                "not connected to database {}; skipping {}",
                self.reader.database_name(),
                file.file_name
            ));
            checked.file = Some(file);
            return Ok(checked);
        }

        let outcome = Checks::new(self.reader, self.formats, self.probe, self.reporter).run(
            &file.document,
            &file.file_name,
            &file.md5,
        )?;
        if outcome.passed() {
            self.reporter
                .pass(format!("{} passed all checks", file.file_name));
        } else {
            self.reporter.error(format!(
                "{} failed with {} problem(s)",
                file.file_name,
                self.reporter.failures()
            ));
        }
        checked.file = Some(file);
        checked.outcome = Some(outcome);
        Ok(checked)
    }
}
