//! Section extractors and the trigger registry.
//!
//! A section extractor is a pure function of the line stream and a start
//! index: it reads the block that begins at the trigger line and returns the
//! fields it found together with the index to resume scanning from.
//!
//! ```text
//! (lines, start) -> Result<Extraction { fragment, next }, ExtractError>
//! ```
//!
//! `next` must be strictly greater than `start`; the engine asserts this.
//! Any closure with the matching signature is an extractor, so extension is
//! plain function registration:
//!
//! ```
//! use chemlog::extractor::{float_token, Extraction, TokenPos, TriggerRegistry};
//! use chemlog::lines::LineStream;
//! use chemlog::record::Fragment;
//!
//! let mut registry = TriggerRegistry::new();
//! registry.register("Fermi energy", |lines: &LineStream, start: usize| {
//!     let fermi = float_token(lines, start, TokenPos::FromEnd(1))?;
//!     Ok(Extraction::new(Fragment::new().set("fermi_energy", fermi), start + 1))
//! });
//! assert_eq!(registry.len(), 1);
//! ```

use crate::lattice::LatticeError;
use crate::lines::LineStream;
use crate::record::Fragment;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use thiserror::Error;

lazy_static! {
    // Handles 1.23, -0.032, 1.2e-4, .123, 1.0D-03 and plain integers
    static ref FLOAT_RE: Regex =
        Regex::new(r"[-+]?(?:\d+\.\d*|\.\d+|\d+)(?:[eEdD][-+]?\d+)?").unwrap();
}

/// Error raised by a section extractor when the data promised by its trigger
/// is missing or unreadable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// Fewer tokens or lines than the section layout requires, or a token
    /// that does not parse
    #[error("line {}: {}", .line + 1, .message)]
    Malformed {
        /// Zero-based line index (displayed one-based)
        line: usize,
        /// What was expected
        message: String,
    },
    /// A unit cell block described an invalid lattice
    #[error(transparent)]
    Lattice(#[from] LatticeError),
}

impl ExtractError {
    /// Shorthand for [`ExtractError::Malformed`].
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        ExtractError::Malformed {
            line,
            message: message.into(),
        }
    }
}

/// Result of running one extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Fields found in the section
    pub fragment: Fragment,
    /// Index of the first line not consumed
    pub next: usize,
}

impl Extraction {
    /// Creates an extraction result.
    pub fn new(fragment: Fragment, next: usize) -> Self {
        Self { fragment, next }
    }
}

/// A unit of work bound to a trigger.
pub trait SectionExtractor {
    /// Reads the section whose trigger line is `lines[start]`.
    fn extract(&self, lines: &LineStream, start: usize) -> Result<Extraction, ExtractError>;
}

impl<F> SectionExtractor for F
where
    F: Fn(&LineStream, usize) -> Result<Extraction, ExtractError>,
{
    fn extract(&self, lines: &LineStream, start: usize) -> Result<Extraction, ExtractError> {
        self(lines, start)
    }
}

/// One or more substrings that mark the start of a section.
///
/// A line matches if it contains any of the patterns. Matching is
/// case-sensitive unless [`Trigger::ignore_case`] is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    patterns: Vec<String>,
    ignore_case: bool,
}

impl Trigger {
    /// A trigger on a single substring.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            patterns: vec![pattern.into()],
            ignore_case: false,
        }
    }

    /// A trigger matching any of several substrings.
    pub fn any_of<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            ignore_case: false,
        }
    }

    /// Makes the trigger case-insensitive.
    pub fn ignore_case(mut self) -> Self {
        self.patterns = self.patterns.iter().map(|p| p.to_lowercase()).collect();
        self.ignore_case = true;
        self
    }

    /// Does `line` contain one of the patterns?
    pub fn matches(&self, line: &str) -> bool {
        if self.ignore_case {
            let lowered = line.to_lowercase();
            self.patterns.iter().any(|p| lowered.contains(p.as_str()))
        } else {
            self.patterns.iter().any(|p| line.contains(p.as_str()))
        }
    }

    /// The substrings this trigger looks for.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.patterns.join(" | "))
    }
}

impl From<&str> for Trigger {
    fn from(pattern: &str) -> Self {
        Trigger::new(pattern)
    }
}

impl From<String> for Trigger {
    fn from(pattern: String) -> Self {
        Trigger::new(pattern)
    }
}

type BoxedExtractor = Box<dyn SectionExtractor + Send + Sync>;

/// Caller-supplied (trigger, extractor) pairs, kept in registration order.
///
/// Registration is append-only. Triggers may overlap each other and the
/// built-in triggers; every match runs.
#[derive(Default)]
pub struct TriggerRegistry {
    entries: Vec<(Trigger, BoxedExtractor)>,
}

impl TriggerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a (trigger, function) pair.
    pub fn register<T, F>(&mut self, trigger: T, extractor: F)
    where
        T: Into<Trigger>,
        F: Fn(&LineStream, usize) -> Result<Extraction, ExtractError> + Send + Sync + 'static,
    {
        self.entries.push((trigger.into(), Box::new(extractor)));
    }

    /// Appends a (trigger, extractor object) pair.
    pub fn register_extractor<T, E>(&mut self, trigger: T, extractor: E)
    where
        T: Into<Trigger>,
        E: SectionExtractor + Send + Sync + 'static,
    {
        self.entries.push((trigger.into(), Box::new(extractor)));
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registrations whose trigger matches `line`, in registration order.
    pub fn matching<'a>(
        &'a self,
        line: &'a str,
    ) -> impl Iterator<Item = (&'a Trigger, &'a (dyn SectionExtractor + Send + Sync))> + 'a {
        self.entries
            .iter()
            .filter(move |(trigger, _)| trigger.matches(line))
            .map(|(trigger, extractor)| (trigger, extractor.as_ref()))
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(t, _)| t.to_string()))
            .finish()
    }
}

/// Position of a token on a whitespace-split line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPos {
    /// Counting from the start, zero-based
    Index(usize),
    /// Counting from the end, zero-based (`FromEnd(0)` is the last token)
    FromEnd(usize),
}

/// Token at `pos` on line `idx`.
pub fn token(lines: &LineStream, idx: usize, pos: TokenPos) -> Result<&str, ExtractError> {
    let tokens = lines.tokens(idx);
    let found = match pos {
        TokenPos::Index(i) => tokens.get(i).copied(),
        TokenPos::FromEnd(i) => tokens
            .len()
            .checked_sub(i + 1)
            .and_then(|j| tokens.get(j).copied()),
    };
    found.ok_or_else(|| {
        ExtractError::malformed(
            idx,
            format!("expected a token at {:?}, line has {} tokens", pos, tokens.len()),
        )
    })
}

/// Float token at `pos` on line `idx`. Fortran `D` exponents are accepted.
pub fn float_token(lines: &LineStream, idx: usize, pos: TokenPos) -> Result<f64, ExtractError> {
    let tok = token(lines, idx, pos)?;
    parse_float(tok)
        .ok_or_else(|| ExtractError::malformed(idx, format!("'{}' is not a number", tok)))
}

/// Integer token at `pos` on line `idx`.
pub fn int_token(lines: &LineStream, idx: usize, pos: TokenPos) -> Result<i64, ExtractError> {
    let tok = token(lines, idx, pos)?;
    tok.parse()
        .map_err(|_| ExtractError::malformed(idx, format!("'{}' is not an integer", tok)))
}

/// Every number appearing on `line`, in order.
pub fn floats_in(line: &str) -> Vec<f64> {
    FLOAT_RE
        .find_iter(line)
        .filter_map(|m| parse_float(m.as_str()))
        .collect()
}

/// Parses one token as a float, accepting Fortran `D` exponents.
pub fn parse_float(tok: &str) -> Option<f64> {
    tok.parse::<f64>()
        .ok()
        .or_else(|| tok.replace(['D', 'd'], "E").parse().ok())
}
