//! The scan/dispatch loop.
//!
//! [`ScanEngine`] walks a [`LineStream`] once. For every line it:
//!
//! 1. checks the reset marker; a match starts a fresh document and nothing
//!    else runs on that line,
//! 2. runs every built-in section whose trigger matches, in the fixed order
//!    of [`LogFormat::matching`],
//! 3. runs every registered extractor whose trigger matches, in registration
//!    order,
//! 4. moves the cursor to the largest resume index returned (or one line
//!    forward when nothing matched).
//!
//! When the stream is exhausted the active document must carry the
//! completion flag, otherwise the scan fails.
//!
//! # Error Handling
//!
//! Every failure, whatever its origin, reaches the caller as one
//! [`LogParseError`] carrying the source name and the underlying
//! [`ScanFault`]. A failed scan yields no record at all. Callers scanning many
//! files should handle the error per file.
//!
//! An extractor that returns a resume index not past its start line breaks
//! the dispatch contract and panics immediately instead of looping.

use crate::builtin::LogFormat;
use crate::document::Document;
use crate::extractor::{ExtractError, Extraction, SectionExtractor, Trigger, TriggerRegistry};
use crate::lines::LineStream;
use crate::record::{MergeError, Record};
use log::{debug, info};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// What went wrong inside a scan.
#[derive(Error, Debug)]
pub enum ScanFault {
    /// The stream had no lines
    #[error("input contains no lines")]
    EmptyInput,
    /// The file could not be read
    #[error("cannot read input: {0}")]
    Io(#[from] std::io::Error),
    /// A section extractor could not read its block
    #[error("section '{trigger}' starting at line {} failed: {source}", .line + 1)]
    Extractor {
        /// Trigger that dispatched the extractor
        trigger: String,
        /// Zero-based index of the trigger line
        line: usize,
        /// Underlying extractor error
        #[source]
        source: ExtractError,
    },
    /// A fragment could not be merged into the record
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// The completion marker never appeared in the last document
    #[error("run incomplete: completion marker '{marker}' not found")]
    IncompleteRun {
        /// The completion trigger that was expected
        marker: String,
    },
}

/// The single error type returned by a scan.
#[derive(Error, Debug)]
#[error("failed to parse {file}: {fault}")]
pub struct LogParseError {
    /// Name of the scanned source (usually the file path)
    pub file: String,
    /// Underlying failure
    #[source]
    pub fault: ScanFault,
}

impl LogParseError {
    fn new(file: &str, fault: ScanFault) -> Self {
        Self {
            file: file.to_string(),
            fault,
        }
    }

    /// True when the scan failed only because the run never finished.
    pub fn is_incomplete_run(&self) -> bool {
        matches!(self.fault, ScanFault::IncompleteRun { .. })
    }
}

/// Line-scanning engine: built-in sections plus caller registrations.
///
/// # Examples
///
/// ```
/// use chemlog::builtin::LogFormat;
/// use chemlog::engine::ScanEngine;
/// use chemlog::lines::LineStream;
///
/// let engine = ScanEngine::new(LogFormat::castep());
/// let lines = LineStream::new([
///     "Total number of ions in cell 2\n",
///     "Final energy = -1713.025929482 eV\n",
///     "Total time          =      3.21 s\n",
/// ]);
/// let record = engine.scan(&lines, "mgo.castep").unwrap();
/// assert_eq!(record.get_i64("numbAtoms"), Some(2));
/// assert_eq!(record.get_f64("energy"), Some(-1713.025929482));
/// assert_eq!(record.get_bool("run completed"), Some(true));
/// ```
#[derive(Debug, Default)]
pub struct ScanEngine {
    format: LogFormat,
    registry: TriggerRegistry,
}

impl ScanEngine {
    /// An engine with the built-in sections of `format` and no registrations.
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            registry: TriggerRegistry::new(),
        }
    }

    /// An engine with a prepared registry.
    pub fn with_registry(format: LogFormat, registry: TriggerRegistry) -> Self {
        Self { format, registry }
    }

    /// Registers an extractor function on this engine only.
    pub fn register<T, F>(&mut self, trigger: T, extractor: F) -> &mut Self
    where
        T: Into<Trigger>,
        F: Fn(&LineStream, usize) -> Result<Extraction, ExtractError> + Send + Sync + 'static,
    {
        self.registry.register(trigger, extractor);
        self
    }

    /// Registers an extractor object on this engine only.
    pub fn register_extractor<T, E>(&mut self, trigger: T, extractor: E) -> &mut Self
    where
        T: Into<Trigger>,
        E: SectionExtractor + Send + Sync + 'static,
    {
        self.registry.register_extractor(trigger, extractor);
        self
    }

    /// The built-in trigger table.
    pub fn format(&self) -> &LogFormat {
        &self.format
    }

    /// The caller registrations.
    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Scans `lines`, naming them `source` in any error.
    pub fn scan(&self, lines: &LineStream, source: &str) -> Result<Record, LogParseError> {
        self.scan_lines(lines)
            .map_err(|fault| LogParseError::new(source, fault))
    }

    /// Splits `text` into lines and scans them.
    pub fn scan_text(&self, text: &str, source: &str) -> Result<Record, LogParseError> {
        self.scan(&LineStream::from_text(text), source)
    }

    /// Reads and scans a file.
    pub fn parse_file(&self, path: &Path) -> Result<Record, LogParseError> {
        let source = path.display().to_string();
        let text = fs::read_to_string(path)
            .map_err(|e| LogParseError::new(&source, ScanFault::Io(e)))?;
        self.scan_text(&text, &source)
    }

    fn scan_lines(&self, lines: &LineStream) -> Result<Record, ScanFault> {
        if lines.is_empty() {
            return Err(ScanFault::EmptyInput);
        }

        let mut document = Document::new(0);
        let mut cursor = 0;

        while let Some(line) = lines.line(cursor) {
            if self.format.is_reset(line) {
                document.reset(cursor);
                cursor += 1;
                continue;
            }

            let mut next = cursor + 1;
            for (trigger, section) in self.format.matching(line) {
                next = next.max(dispatch(trigger, &section, lines, cursor, &mut document)?);
            }
            for (trigger, extractor) in self.registry.matching(line) {
                next = next.max(dispatch(trigger, extractor, lines, cursor, &mut document)?);
            }
            cursor = next;
        }

        if !document.is_complete() {
            return Err(ScanFault::IncompleteRun {
                marker: self.format.completion.to_string(),
            });
        }

        info!(
            "Scanned {} lines as {}: kept document {} ({} fields)",
            lines.len(),
            self.format.name,
            document.ordinal(),
            document.record().len()
        );
        Ok(document.into_record())
    }
}

fn dispatch(
    trigger: &Trigger,
    extractor: &dyn SectionExtractor,
    lines: &LineStream,
    start: usize,
    document: &mut Document,
) -> Result<usize, ScanFault> {
    debug!("Line {}: trigger '{}'", start + 1, trigger);
    let Extraction { fragment, next } =
        extractor
            .extract(lines, start)
            .map_err(|source| ScanFault::Extractor {
                trigger: trigger.to_string(),
                line: start,
                source,
            })?;
    assert!(
        next > start,
        "extractor for '{}' returned resume index {} at line index {}; it must consume at least one line",
        trigger,
        next,
        start
    );
    document.apply(fragment)?;
    Ok(next)
}

/// Reads `path` and scans it with the built-in sections of `format`.
pub fn parse_file(path: &Path, format: LogFormat) -> Result<Record, LogParseError> {
    ScanEngine::new(format).parse_file(path)
}
