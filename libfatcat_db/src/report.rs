use std::cell::RefCell;
use std::fmt;

/// Severity of a single diagnostic emitted during checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Pass,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Pass => "PASS",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        };
        write!(f, "{label}")
    }
}

/// How much of the report is forwarded to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors and fatals only
    Quiet,
    #[default]
    Normal,
    Debug,
}

impl Verbosity {
    fn admits(&self, severity: Severity) -> bool {
        match self {
            Verbosity::Quiet => severity >= Severity::Error,
            Verbosity::Normal => severity >= Severity::Info,
            Verbosity::Debug => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Collects the diagnostics of a checking session and forwards them to the log.
///
/// Every validator receives a `&Reporter`. Predicates report and return a bool; nothing here
/// decides pass/fail, callers accumulate the booleans.
#[derive(Debug, Default)]
pub struct Reporter {
    verbosity: Verbosity,
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Reporter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    pub fn report(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        if self.verbosity.admits(severity) {
            match severity {
                Severity::Debug => log::debug!("{message}"),
                Severity::Info => log::info!("{message}"),
                Severity::Pass => log::info!("{severity}: {message}"),
                Severity::Warning => log::warn!("{message}"),
                Severity::Error | Severity::Fatal => log::error!("{severity}: {message}"),
            }
        }
        self.diagnostics
            .borrow_mut()
            .push(Diagnostic { severity, message });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.report(Severity::Debug, message)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.report(Severity::Info, message)
    }

    pub fn pass(&self, message: impl Into<String>) {
        self.report(Severity::Pass, message)
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.report(Severity::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) {
        self.report(Severity::Error, message)
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.report(Severity::Fatal, message)
    }

    /// Snapshot of everything reported so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    /// True if any diagnostic message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.message.contains(needle))
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    /// Number of errors and fatals
    pub fn failures(&self) -> usize {
        self.count(Severity::Error) + self.count(Severity::Fatal)
    }

    pub fn clear(&self) {
        self.diagnostics.borrow_mut().clear()
    }
}
