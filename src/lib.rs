#![deny(missing_docs)]

//! chemlog - structured data from computational chemistry logs
//!
//! chemlog turns the free-form text output of electronic-structure codes
//! (CASTEP, CP2K and a tight-binding code) into a single structured
//! [`Record`] per file: energies, unit cells, atom counts, k-point grids,
//! eigenvalues, timing tables.
//!
//! # Overview
//!
//! Logs of this family have no fixed schema. Sections appear in varying
//! order, some repeat once per SCF step or geometry step, and one file can
//! hold several runs back to back. The [`ScanEngine`] handles this with one
//! linear pass:
//!
//! - a **reset marker** starts a fresh record (only the last run survives),
//! - **built-in sections** from a [`LogFormat`] cover what every log prints,
//! - **registered extractors** add anything else without touching the engine,
//! - a **completion marker** must be present or the scan fails.
//!
//! # Quick Start
//!
//! ```no_run
//! use chemlog::{LogFormat, ScanEngine};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = ScanEngine::new(LogFormat::cp2k());
//!     engine.register(chemlog::sections::SCF_STEPS_TRIGGER, chemlog::sections::scf_steps);
//!
//!     let record = engine.parse_file(Path::new("mgo.cpout"))?;
//!     println!("E = {:?} eV", record.get_f64("energy"));
//!     Ok(())
//! }
//! ```
//!
//! # Writing an Extractor
//!
//! An extractor is any function `(&LineStream, usize) -> Result<Extraction, ExtractError>`.
//! It receives the index of the line that matched its trigger, may read
//! ahead as far as it likes, and returns the fields it found plus the index
//! to resume from, which must be past the trigger line.
//!
//! ```
//! use chemlog::extractor::{float_token, Extraction, TokenPos};
//! use chemlog::{LineStream, LogFormat, ScanEngine};
//! use chemlog::record::Fragment;
//!
//! let mut engine = ScanEngine::new(LogFormat::castep());
//! engine.register("Fermi energy", |lines: &LineStream, start: usize| {
//!     let fermi = float_token(lines, start, TokenPos::FromEnd(1))?;
//!     Ok(Extraction::new(Fragment::new().set("fermi_energy", fermi), start + 1))
//! });
//!
//! let record = engine
//!     .scan_text("Fermi energy for spin 1 electrons is -4.25 eV\nTotal time = 2 s\n", "x.castep")
//!     .unwrap();
//! assert_eq!(record.get_f64("fermi_energy"), Some(-4.25));
//! ```
//!
//! Each field in the returned [`record::Fragment`] declares whether it
//! replaces or accumulates (see [`record::MergePolicy`]).
//!
//! # Modules
//!
//! - [`lines`] - Random-access line stream
//! - [`record`] - Output record, values and merge policies
//! - [`extractor`] - Extractor contract, triggers and registry
//! - [`builtin`] - Built-in sections and format presets
//! - [`document`] - Reset handling for multi-run files
//! - [`engine`] - The scan loop and its error type
//! - [`lattice`] - Unit cell geometry
//! - [`sections`] - Stock extractors for optional sections
//! - [`settings`] - INI configuration
//! - [`units`] - Conversion constants

pub mod builtin;
pub mod document;
pub mod engine;
pub mod extractor;
pub mod lattice;
pub mod lines;
pub mod record;
/// Stock extractors for optional sections
pub mod sections;
/// Configuration management system
pub mod settings;
pub mod units;

pub use builtin::LogFormat;
pub use engine::{LogParseError, ScanEngine};
pub use lines::LineStream;
pub use record::Record;
