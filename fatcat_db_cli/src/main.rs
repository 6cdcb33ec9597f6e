use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use simplelog::{Color, ConfigBuilder, Level, LevelFilter, SharedLogger};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use time::macros::format_description;
use time::OffsetDateTime;

use libfatcat_db::config::{MongoConfig, SshConfig, MONGO_CONFIG_NAME, SSH_CONFIG_NAME};
use libfatcat_db::error::InsertError;
use libfatcat_db::file_tools::FileTools;
use libfatcat_db::formats::Formats;
use libfatcat_db::insert::{InsertOutcome, Inserter};
use libfatcat_db::mongo_reader::MongoReader;
use libfatcat_db::mongo_store::MongoStore;
use libfatcat_db::report::{Reporter, Verbosity};
use libfatcat_db::run_checks::RunChecks;
use libfatcat_db::support_files::SystemProbe;
use libfatcat_db::tunnel::SshTunnel;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Default)]
struct Summary {
    inserted: usize,
    unindexed: usize,
    passed: usize,
    failed: usize,
}

/// The `.dat` files listing the paths of each outcome for one session
struct RunLogs {
    done: PathBuf,
    passed: PathBuf,
    failed: PathBuf,
    unindexed: PathBuf,
}

impl RunLogs {
    fn new(dir: &Path, timestamp: &str, insert: bool) -> Self {
        let done = if insert {
            format!("inserted_{timestamp}.dat")
        } else {
            format!("passed_{timestamp}.dat")
        };
        Self {
            done: dir.join(done),
            passed: dir.join(format!("passed_{timestamp}.dat")),
            failed: dir.join(format!("failed_{timestamp}.dat")),
            unindexed: dir.join(format!("inserted_no_index_{timestamp}.dat")),
        }
    }

    fn record_failed(&self, path: &Path, summary: &mut Summary) -> CliResult<()> {
        summary.failed += 1;
        append_line(&self.failed, path)
    }

    fn record_checked(&self, path: &Path, summary: &mut Summary) -> CliResult<()> {
        summary.passed += 1;
        append_line(&self.done, path)
    }

    /// File one insert attempt. A duplicate index is only raised after the document itself
    /// was written, so that file is listed as inserted and again as missing its index.
    fn record_insert(
        &self,
        result: Result<InsertOutcome, InsertError>,
        path: &Path,
        summary: &mut Summary,
    ) -> CliResult<()> {
        match result {
            Ok(InsertOutcome::Inserted { .. }) => {
                summary.inserted += 1;
                append_line(&self.done, path)
            }
            Ok(InsertOutcome::ReadOnlyUser) => {
                summary.passed += 1;
                append_line(&self.passed, path)
            }
            Ok(InsertOutcome::NotPassed) => self.record_failed(path, summary),
            Err(InsertError::DuplicateIndex(uid)) => {
                log::warn!(
                    "{} was inserted but its device index for {uid} was not written",
                    path.to_string_lossy()
                );
                summary.inserted += 1;
                summary.unindexed += 1;
                append_line(&self.done, path)?;
                append_line(&self.unindexed, path)
            }
            Err(e) => {
                log::error!("Inserting {} failed: {e}", path.to_string_lossy());
                self.record_failed(path, summary)
            }
        }
    }
}

fn build_cli() -> Command {
    Command::new("mongo_insert")
        .about("Check JSON documents against the fatcat_db rules and optionally insert them")
        .arg_required_else_help(true)
        .arg(
            Arg::new("files")
                .num_args(1..)
                .required(true)
                .help("JSON files or glob patterns"),
        )
        .arg(
            Arg::new("insert")
                .short('i')
                .long("insert")
                .action(ArgAction::SetTrue)
                .help("Insert every file that passes (default is a dry run)"),
        )
        .arg(
            Arg::new("production")
                .short('p')
                .long("production")
                .action(ArgAction::SetTrue)
                .help("Use the production database instead of the test database"),
        )
        .arg(
            Arg::new("no_tunnel")
                .long("no-tunnel")
                .visible_alias("nt")
                .action(ArgAction::SetTrue)
                .help("Connect directly instead of through the ssh tunnel"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .conflicts_with("debug")
                .help("Only print errors"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Print debug messages"),
        )
        .arg(
            Arg::new("timer")
                .short('t')
                .long("timer")
                .action(ArgAction::SetTrue)
                .help("Print how long each file took"),
        )
        .arg(
            Arg::new("config_dir")
                .short('c')
                .long("config-dir")
                .help("Directory searched first for configuration and schema files"),
        )
        .arg(
            Arg::new("log_file")
                .short('l')
                .long("log-file")
                .help("Also write the log to this file"),
        )
}

fn init_logging(
    pb_manager: &MultiProgress,
    level: LevelFilter,
    log_file: Option<&Path>,
) -> CliResult<()> {
    let config = ConfigBuilder::new()
        .set_level_color(Level::Info, Some(Color::Green))
        .set_level_color(Level::Warn, Some(Color::Yellow))
        .set_level_color(Level::Error, Some(Color::Red))
        .build();
    let term = simplelog::TermLogger::new(
        level,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![term];
    if let Some(path) = log_file {
        loggers.push(simplelog::WriteLogger::new(level, config, File::create(path)?));
    }
    LogWrapper::new(pb_manager.clone(), simplelog::CombinedLogger::new(loggers)).try_init()?;
    log::set_max_level(level);
    Ok(())
}

/// Expand glob patterns; plain paths are passed through untouched
fn expand_paths<'a>(args: impl Iterator<Item = &'a String>) -> CliResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for arg in args {
        if arg.contains(['*', '?', '[']) {
            let before = paths.len();
            for entry in glob::glob(arg)? {
                paths.push(entry?);
            }
            if paths.len() == before {
                log::warn!("No files match {arg}");
            }
        } else {
            paths.push(PathBuf::from(arg));
        }
    }
    Ok(paths)
}

fn append_line(file_name: &Path, path: &Path) -> CliResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_name)?;
    writeln!(file, "{}", path.to_string_lossy())?;
    Ok(())
}

fn find_config(tools: &FileTools, name: &str) -> CliResult<PathBuf> {
    tools.find(name).ok_or_else(|| {
        format!(
            "could not find {name}.json in any of {:?}",
            tools.search_dirs()
        )
        .into()
    })
}

fn run(
    matches: &ArgMatches,
    verbosity: Verbosity,
    pb_manager: &MultiProgress,
) -> CliResult<Summary> {
    let insert = matches.get_flag("insert");
    let production = matches.get_flag("production");
    let timer = matches.get_flag("timer");
    let config_dir = matches.get_one::<String>("config_dir").map(PathBuf::from);

    let paths = expand_paths(
        matches
            .get_many::<String>("files")
            .ok_or("No JSON files given")?,
    )?;

    let tools = FileTools::from_env(config_dir.as_deref());
    let mongo_path = find_config(&tools, MONGO_CONFIG_NAME)?;
    log::info!("Loading database config from {}...", mongo_path.to_string_lossy());
    let mut mongo_config = MongoConfig::read_config_file(&mongo_path)?;

    // The tunnel must outlive the store
    let _tunnel = if matches.get_flag("no_tunnel") {
        None
    } else {
        let ssh_path = find_config(&tools, SSH_CONFIG_NAME)?;
        let ssh_config = SshConfig::read_config_file(&ssh_path)?;
        let tunnel = SshTunnel::open(&ssh_config, &mongo_config.host, mongo_config.port)?;
        mongo_config = mongo_config.through_tunnel(tunnel.local_port());
        Some(tunnel)
    };

    let store = MongoStore::connect(&mongo_config, production)?;
    let formats = Formats::load(&tools)?;
    let probe = SystemProbe::new()?;

    let timestamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let logs = RunLogs::new(Path::new("."), &timestamp, insert);

    log::info!(
        "Checking {} file(s) against {}{}",
        paths.len(),
        mongo_config.database(production),
        if insert { " and inserting" } else { "" }
    );

    let mut summary = Summary::default();
    let pb = pb_manager.add(ProgressBar::new(paths.len() as u64));
    let started = Instant::now();
    for path in paths.iter() {
        let file_started = Instant::now();
        let reporter = Reporter::new(verbosity);
        let checked = RunChecks::new(MongoReader::new(&store), &formats, &probe, &reporter)
            .run(path)?;

        if !checked.passed() {
            logs.record_failed(path, &mut summary)?;
        } else if insert {
            let result = Inserter::new(&store, &reporter).insert(&checked);
            logs.record_insert(result, path, &mut summary)?;
        } else {
            logs.record_checked(path, &mut summary)?;
        }

        if timer {
            log::info!(
                "{} took {:.3} s",
                path.to_string_lossy(),
                file_started.elapsed().as_secs_f64()
            );
        }
        pb.inc(1);
    }
    pb.finish();

    if timer {
        log::info!("Total time {:.3} s", started.elapsed().as_secs_f64());
    }
    Ok(summary)
}

fn main() -> ExitCode {
    let matches = build_cli().get_matches();

    let (verbosity, level) = if matches.get_flag("quiet") {
        (Verbosity::Quiet, LevelFilter::Warn)
    } else if matches.get_flag("debug") {
        (Verbosity::Debug, LevelFilter::Debug)
    } else {
        (Verbosity::Normal, LevelFilter::Info)
    };

    // Initialize feedback
    let pb_manager = MultiProgress::new();
    let log_file = matches.get_one::<String>("log_file").map(PathBuf::from);
    if let Err(e) = init_logging(&pb_manager, level, log_file.as_deref()) {
        eprintln!("Could not create logging/progress: {e}");
        return ExitCode::FAILURE;
    }

    match run(&matches, verbosity, &pb_manager) {
        Ok(summary) => {
            log::info!(
                "Done. inserted: {} (without index: {}) passed: {} failed: {}",
                summary.inserted,
                summary.unindexed,
                summary.passed,
                summary.failed
            );
            if summary.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let matches = build_cli()
            .try_get_matches_from(["mongo_insert", "-i", "--nt", "-c", "cfg", "a.json", "b.json"])
            .unwrap();
        assert!(matches.get_flag("insert"));
        assert!(matches.get_flag("no_tunnel"));
        assert!(!matches.get_flag("production"));
        assert_eq!(matches.get_one::<String>("config_dir").unwrap(), "cfg");
        assert_eq!(matches.get_many::<String>("files").unwrap().count(), 2);

        assert!(build_cli()
            .try_get_matches_from(["mongo_insert", "-q", "-d", "a.json"])
            .is_err());
    }

    #[test]
    fn test_expand_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.json"), "{}").unwrap();
        std::fs::write(dir.path().join("two.json"), "{}").unwrap();
        let pattern = format!("{}/*.json", dir.path().to_string_lossy());
        let plain = String::from("plain.json");
        let paths = expand_paths([pattern, plain].iter()).unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], dir.path().join("one.json"));
        assert_eq!(paths[2], PathBuf::from("plain.json"));
    }

    #[test]
    fn test_duplicate_index_is_logged_as_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let logs = RunLogs::new(dir.path(), "20240101_000000", true);
        let mut summary = Summary::default();
        let path = Path::new("abc-123.json");

        logs.record_insert(
            Err(InsertError::DuplicateIndex(String::from("abc-123"))),
            path,
            &mut summary,
        )
        .unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.unindexed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(std::fs::read_to_string(&logs.done).unwrap(), "abc-123.json\n");
        assert_eq!(
            std::fs::read_to_string(&logs.unindexed).unwrap(),
            "abc-123.json\n"
        );
        assert!(!logs.failed.exists());
    }

    #[test]
    fn test_read_only_and_not_passed_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let logs = RunLogs::new(dir.path(), "20240101_000000", true);
        let mut summary = Summary::default();

        logs.record_insert(Ok(InsertOutcome::ReadOnlyUser), Path::new("a.json"), &mut summary)
            .unwrap();
        logs.record_insert(Ok(InsertOutcome::NotPassed), Path::new("b.json"), &mut summary)
            .unwrap();

        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(std::fs::read_to_string(&logs.passed).unwrap(), "a.json\n");
        assert_eq!(std::fs::read_to_string(&logs.failed).unwrap(), "b.json\n");
        assert!(!logs.done.exists());
    }
}
