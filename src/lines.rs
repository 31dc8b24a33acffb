//! Random-access view over the lines of a log file.
//!
//! Section extractors receive a [`LineStream`] plus the index of the line that
//! triggered them. They are free to look ahead (and back) within the stream;
//! only the engine's dispatch cursor is forced to move forward.

/// An immutable, indexable sequence of text lines.
///
/// Line terminators are stripped on construction, so a stream built from
/// `"a\nb\n"` and one built from `["a\n", "b\n"]` hold the same two lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineStream {
    lines: Vec<String>,
}

impl LineStream {
    /// Builds a stream from already split lines.
    ///
    /// # Examples
    ///
    /// ```
    /// use chemlog::lines::LineStream;
    ///
    /// let stream = LineStream::new(vec!["Total time = 1.0 s\n"]);
    /// assert_eq!(stream.len(), 1);
    /// assert_eq!(stream.line(0), Some("Total time = 1.0 s"));
    /// ```
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            lines: lines
                .into_iter()
                .map(|l| l.as_ref().trim_end_matches(['\n', '\r']).to_string())
                .collect(),
        }
    }

    /// Splits a whole file's contents into lines.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines())
    }

    /// Number of lines in the stream.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true when the stream has no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The line at `idx`, or `None` past the end.
    pub fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(String::as_str)
    }

    /// Does line `idx` contain `needle`? Out-of-range indices never match.
    pub fn contains(&self, idx: usize, needle: &str) -> bool {
        self.line(idx).is_some_and(|l| l.contains(needle))
    }

    /// Whitespace-separated tokens of line `idx` (empty past the end).
    pub fn tokens(&self, idx: usize) -> Vec<&str> {
        self.line(idx)
            .map(|l| l.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Index of the first line at or after `from` containing `needle`.
    pub fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        (from..self.len()).find(|&i| self.contains(i, needle))
    }

    /// Iterates over all lines in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for LineStream {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}
