//! # fatcat_db
//!
//! fatcat_db is the validation and insertion layer of the IceCube Upgrade D-Egg/mDOM
//! production database, written in Rust. It takes device, measurement and goalpost records
//! written offline as JSON files, checks each one against the schema files and against what
//! is already stored in MongoDB, and only then writes it, exactly once.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./fatcat_db_cli` from the top
//! level fatcat_db repository. This installs the `mongo_insert` binary to your cargo install
//! location (typically something like `~/.cargo/bin/`).
//!
//! ## Usage
//!
//! ```text
//! mongo_insert [-i] [-p] [--no-tunnel] [-q|-d] [-t] [-c DIR] [-l LOG] FILES...
//! ```
//!
//! Without `-i` every file is only checked (a dry run). With `-i` every file that passed
//! all of its checks is inserted. `-p` targets the production database instead of the test
//! database. Paths of inserted/passed and failed files are appended to
//! `inserted_<timestamp>.dat` (`passed_<timestamp>.dat` for a dry run) and
//! `failed_<timestamp>.dat` in the working directory. A device whose index already existed is
//! inserted without it and is also listed in `inserted_no_index_<timestamp>.dat`.
//!
//! ## Configuration
//!
//! Configuration and schema files are looked up by logical name, in order, in the directory
//! given with `-c`, in `$FATCAT_CONFIG_DIR`, and in `./configs`. The schema files are also
//! bundled with the library, so they only need to exist on disk to override the defaults.
//!
//! `mongo_config.json`:
//!
//! ```json
//! {
//!     "host": "localhost",
//!     "port": 27017,
//!     "user": "writer",
//!     "password": "secret",
//!     "test_database": "production_calibration_test",
//!     "production_database": "production_calibration",
//!     "auth_source": null
//! }
//! ```
//!
//! `ssh_config.json` (only needed when not using `--no-tunnel`):
//!
//! ```json
//! {
//!     "server": "login.icecube.wisc.edu",
//!     "port": 22,
//!     "user": "me",
//!     "key_path": "/home/me/.ssh/id_ed25519",
//!     "local_port": 27018
//! }
//! ```
//!
//! The user `icecube` is read-only; documents can be checked with it but never inserted.
//!
//! ## Checks
//!
//! Each file goes through the stages
//!
//! ```text
//! Untyped -> Typed -> GeneralChecked -> TypeChecked -> AdditionalChecked -> Passed | Failed
//! ```
//!
//! - Typed: the file matches exactly one of the device, measurement or goalpost formats.
//! - General: no NaN/Infinity, no hyphens in keys, no blank strings; the file name and its md5
//! were never inserted into the target collection; the BSON document fits the size limit.
//! - Type: the device, measurement or goalpost rules (sub-devices, aux ids, meas_data,
//! goalpost ordering, ...).
//! - Additional: optional fields have the right types and referenced support files exist.
//!
//! Every check in a stage runs even after another one failed, so one run reports every
//! problem in a file.
//!
//! ## Output
//!
//! Inserted documents carry an `insert_meta` sub-document:
//!
//! ```text
//! insert_meta - insert_time, json_filename, json_md5, insert_user, mongo_user
//! ```
//!
//! A new device assembly (a device with sub-devices) also gets an index document in the
//! `device_assembly` collection:
//!
//! ```text
//! device_assembly - uid, device_type, sub_device_uids, insert_time
//! ```
pub mod aux_ids;
pub mod checks;
pub mod config;
pub mod datatypes;
pub mod devices;
pub mod error;
pub mod file_tools;
pub mod formats;
pub mod general;
pub mod goalposts;
pub mod insert;
pub mod meas_data;
pub mod measurements;
pub mod mongo_reader;
pub mod mongo_store;
pub mod report;
pub mod run_checks;
pub mod store;
pub mod sub_devices;
pub mod support_files;
pub mod tunnel;
