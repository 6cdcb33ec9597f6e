//! Existence checks for the files and URLs a document points at.
//!
//! A `support_files` entry is either `{filetype, hostname, pathname}`, checked on the local
//! filesystem or with `test -e` over ssh, or `{url_description, url}`, checked with an HTTP GET.
use bson::{Bson, Document};
use std::path::Path;
use std::process::{Command, Stdio};

use super::error::ProbeError;
use super::report::Reporter;

pub const SUPPORT_FILES_KEY: &str = "support_files";

/// Asks the outside world whether a referenced file exists
pub trait SupportFileProbe {
    fn file_exists(&self, hostname: &str, pathname: &str) -> Result<bool, ProbeError>;
    fn url_status(&self, url: &str) -> Result<u16, ProbeError>;
}

/// Probe backed by the local filesystem, the `ssh` binary and a blocking HTTP client
pub struct SystemProbe {
    client: reqwest::blocking::Client,
    local_host: String,
}

impl SystemProbe {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::blocking::Client::builder().build()?;
        let local_host = std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("localhost"));
        Ok(Self { client, local_host })
    }

    fn is_local(&self, hostname: &str) -> bool {
        matches!(hostname, "" | "localhost" | "127.0.0.1") || hostname == self.local_host
    }
}

impl SupportFileProbe for SystemProbe {
    fn file_exists(&self, hostname: &str, pathname: &str) -> Result<bool, ProbeError> {
        if self.is_local(hostname) {
            return Ok(Path::new(pathname).exists());
        }
        let status = Command::new("ssh")
            .args(["-o", "BatchMode=yes", hostname, "test", "-e", pathname])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }

    fn url_status(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self.client.get(url).send()?;
        Ok(response.status().as_u16())
    }
}

pub struct SupportFiles<'a> {
    probe: &'a dyn SupportFileProbe,
    reporter: &'a Reporter,
}

impl<'a> SupportFiles<'a> {
    pub fn new(probe: &'a dyn SupportFileProbe, reporter: &'a Reporter) -> Self {
        Self { probe, reporter }
    }

    pub fn validate(&self, document: &Document) -> Result<bool, ProbeError> {
        let items = match document.get(SUPPORT_FILES_KEY) {
            None => return Ok(true),
            Some(Bson::Array(items)) => items,
            Some(other) => {
                self.reporter.error(format!(
                    "\"{SUPPORT_FILES_KEY}\" must be a list of dicts, found {other}"
                ));
                return Ok(false);
            }
        };

        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            let context = format!("{SUPPORT_FILES_KEY}[{i}]");
            ok &= match item {
                Bson::Document(entry) => self.check_entry(&context, entry)?,
                other => {
                    self.reporter
                        .error(format!("{context} must be a dict, found {other}"));
                    false
                }
            };
        }
        Ok(ok)
    }

    fn check_entry(&self, context: &str, entry: &Document) -> Result<bool, ProbeError> {
        if let Ok(url) = entry.get_str("url") {
            if entry.get_str("url_description").is_err() {
                self.reporter
                    .error(format!("{context} is missing \"url_description\""));
                return Ok(false);
            }
            return Ok(self.check_url(context, url));
        }

        match (
            entry.get_str("filetype"),
            entry.get_str("hostname"),
            entry.get_str("pathname"),
        ) {
            (Ok(_), Ok(hostname), Ok(pathname)) => {
                if self.probe.file_exists(hostname, pathname)? {
                    self.reporter
                        .pass(format!("{context} {hostname}:{pathname} exists"));
                    Ok(true)
                } else {
                    self.reporter
                        .error(format!("{context} {hostname}:{pathname} does not exist"));
                    Ok(false)
                }
            }
            _ => {
                self.reporter.error(format!(
                    "{context} needs either {{filetype, hostname, pathname}} or {{url_description, url}}"
                ));
                Ok(false)
            }
        }
    }

    /// 200 passes, 404 fails, any other answer (or none) is only a warning
    fn check_url(&self, context: &str, url: &str) -> bool {
        match self.probe.url_status(url) {
            Ok(200) => {
                self.reporter.pass(format!("{context} {url} is reachable"));
                true
            }
            Ok(404) => {
                self.reporter.error(format!("{context} {url} was not found (404)"));
                false
            }
            Ok(code) => {
                self.reporter
                    .warning(format!("{context} {url} answered with status {code}"));
                true
            }
            Err(e) => {
                self.reporter
                    .warning(format!("{context} {url} could not be reached: {e}"));
                true
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::report::Severity;
    use bson::doc;
    use fxhash::FxHashMap;

    /// Canned answers keyed by `host:path` and url
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub files: Vec<String>,
        pub urls: FxHashMap<String, u16>,
    }

    impl SupportFileProbe for FakeProbe {
        fn file_exists(&self, hostname: &str, pathname: &str) -> Result<bool, ProbeError> {
            Ok(self.files.contains(&format!("{hostname}:{pathname}")))
        }

        fn url_status(&self, url: &str) -> Result<u16, ProbeError> {
            Ok(self.urls.get(url).copied().unwrap_or(500))
        }
    }

    #[test]
    fn test_status_codes() {
        let mut probe = FakeProbe::default();
        probe.urls.insert("https://a/ok".into(), 200);
        probe.urls.insert("https://a/gone".into(), 404);
        let reporter = Reporter::default();
        let checker = SupportFiles::new(&probe, &reporter);

        let ok = doc! {"support_files": [{"url_description": "log", "url": "https://a/ok"}]};
        assert!(checker.validate(&ok).unwrap());

        let gone = doc! {"support_files": [{"url_description": "log", "url": "https://a/gone"}]};
        assert!(!checker.validate(&gone).unwrap());

        let flaky = doc! {"support_files": [{"url_description": "log", "url": "https://a/500"}]};
        assert!(checker.validate(&flaky).unwrap());
        assert_eq!(reporter.count(Severity::Warning), 1);
    }

    #[test]
    fn test_host_files() {
        let probe = FakeProbe {
            files: vec![String::from("daq01:/data/run12.hdf5")],
            ..Default::default()
        };
        let reporter = Reporter::default();
        let checker = SupportFiles::new(&probe, &reporter);

        let present = doc! {"support_files": [
            {"filetype": "hdf5", "hostname": "daq01", "pathname": "/data/run12.hdf5"}]};
        assert!(checker.validate(&present).unwrap());

        let missing = doc! {"support_files": [
            {"filetype": "hdf5", "hostname": "daq01", "pathname": "/data/run13.hdf5"},
            {"hostname": "daq01"}]};
        assert!(!checker.validate(&missing).unwrap());
        assert!(reporter.contains("daq01:/data/run13.hdf5 does not exist"));
        assert!(reporter.contains("needs either"));
    }

    #[test]
    fn test_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "x").unwrap();
        let probe = SystemProbe::new().unwrap();
        assert!(probe
            .file_exists("localhost", path.to_str().unwrap())
            .unwrap());
        assert!(!probe
            .file_exists("localhost", dir.path().join("nope").to_str().unwrap())
            .unwrap());
    }
}
