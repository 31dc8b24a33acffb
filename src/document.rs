//! Multi-document handling.
//!
//! A physical log may hold several runs back to back (restarts, chained
//! jobs). The scan always has exactly one active [`Document`]; a reset marker
//! throws it away and starts a fresh one, so the record handed back at the end
//! reflects only the lines after the last marker.

use crate::builtin::keys;
use crate::record::{Fragment, MergeError, Record};
use log::{debug, info};

/// The record being populated plus where its document began.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    record: Record,
    ordinal: usize,
    first_line: usize,
}

impl Document {
    /// A fresh document starting at `first_line`.
    ///
    /// The atom count starts at 0 and both flags start false; every other
    /// field is absent until a section writes it.
    pub fn new(first_line: usize) -> Self {
        Self {
            record: Self::initial_record(),
            ordinal: 0,
            first_line,
        }
    }

    fn initial_record() -> Record {
        let mut record = Record::new();
        record.insert(keys::ATOM_COUNT, 0_i64);
        record.insert(keys::MULTIPLE_GEOMETRIES, false);
        record.insert(keys::RUN_COMPLETED, false);
        record
    }

    /// Discards the current record and starts over at `line`.
    pub fn reset(&mut self, line: usize) {
        if self.ordinal > 0 || line > self.first_line {
            info!(
                "New document at line {}; discarding {} field(s) from lines {}..{}",
                line + 1,
                self.record.len(),
                self.first_line + 1,
                line
            );
        }
        self.record = Self::initial_record();
        self.ordinal += 1;
        self.first_line = line;
    }

    /// Folds an extractor's fragment into the record.
    pub fn apply(&mut self, fragment: Fragment) -> Result<(), MergeError> {
        if !fragment.is_empty() {
            debug!(
                "Merging {:?} into document {}",
                fragment.updates().iter().map(|u| u.key.as_str()).collect::<Vec<_>>(),
                self.ordinal
            );
        }
        self.record.apply(fragment)
    }

    /// Has the completion marker been seen in this document?
    pub fn is_complete(&self) -> bool {
        self.record.get_bool(keys::RUN_COMPLETED).unwrap_or(false)
    }

    /// Number of reset markers seen so far.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The record so far.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Hands the record over.
    pub fn into_record(self) -> Record {
        self.record
    }
}
