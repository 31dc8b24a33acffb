//! Stock extractors for sections that only some runs print.
//!
//! None of these are built in. Register the ones you need, either one by one
//! or all at once with [`stock_registry`]:
//!
//! ```
//! use chemlog::builtin::LogFormat;
//! use chemlog::engine::ScanEngine;
//! use chemlog::sections;
//!
//! let mut engine = ScanEngine::new(LogFormat::cp2k());
//! engine.register(sections::SCF_STEPS_TRIGGER, sections::scf_steps);
//! ```
//!
//! The layouts follow CP2K output; the eigenvalue reader is generic enough
//! for any "header, optional rule, rows of numbers, blank line" block.

use crate::extractor::{parse_float, ExtractError, Extraction, TriggerRegistry};
use crate::lines::LineStream;
use crate::record::{Fragment, Record, Site};
use crate::units::BOHR_TO_ANGSTROM;
use lazy_static::lazy_static;
use regex::Regex;

/// Trigger for [`scf_steps`].
pub const SCF_STEPS_TRIGGER: &str = "SCF run converged in";
/// Trigger for [`eigenvalues`].
pub const EIGENVALUES_TRIGGER: &str = "Eigenvalues of the occupied subspace";
/// Trigger for [`timings`].
pub const TIMINGS_TRIGGER: &str = "T I M I N G";
/// Trigger for [`atomic_coordinates`].
pub const COORDINATES_TRIGGER: &str = "ATOMIC COORDINATES IN";

/// Field written by [`scf_steps`].
pub const SCF_STEPS_KEY: &str = "scf_steps";
/// Flat eigenvalue list written by [`eigenvalues`].
pub const EIGENVALUES_KEY: &str = "eigenvalues";
/// Size of each eigenvalue block, so the flat list can be split per k-point.
pub const EIGENVALUE_BLOCKS_KEY: &str = "eigenvalue_block_sizes";
/// Nested record written by [`timings`].
pub const TIMINGS_KEY: &str = "timings";
/// Site list written by [`atomic_coordinates`].
pub const COORDINATES_KEY: &str = "coordinates";

/// How far past the trigger a table header may sit.
const HEADER_LOOKAHEAD: usize = 8;

lazy_static! {
    // "  *** SCF run converged in    12 steps ***"
    static ref SCF_CONVERGED_RE: Regex = Regex::new(r"SCF run converged in\s+(\d+)\s+steps").unwrap();

    // " MODULE QUICKSTEP:  ATOMIC COORDINATES IN angstrom"
    static ref COORD_UNIT_RE: Regex = Regex::new(r"ATOMIC COORDINATES IN\s+(\w+)").unwrap();
}

/// A registry holding every stock extractor.
pub fn stock_registry() -> TriggerRegistry {
    let mut registry = TriggerRegistry::new();
    registry.register(SCF_STEPS_TRIGGER, scf_steps);
    registry.register(EIGENVALUES_TRIGGER, eigenvalues);
    registry.register(TIMINGS_TRIGGER, timings);
    registry.register(COORDINATES_TRIGGER, atomic_coordinates);
    registry
}

/// Number of SCF iterations of the most recent converged SCF cycle.
pub fn scf_steps(lines: &LineStream, start: usize) -> Result<Extraction, ExtractError> {
    let line = lines.line(start).unwrap_or_default();
    let steps: i64 = SCF_CONVERGED_RE
        .captures(line)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| ExtractError::malformed(start, "no step count after 'SCF run converged in'"))?;
    Ok(Extraction::new(
        Fragment::new().set(SCF_STEPS_KEY, steps),
        start + 1,
    ))
}

/// One block of eigenvalues, appended to the running list.
///
/// Dashed rule lines before the first row are skipped. The block ends at a
/// blank line, which is consumed, or at the first line that is not a row of
/// numbers, which is left for the scan.
pub fn eigenvalues(lines: &LineStream, start: usize) -> Result<Extraction, ExtractError> {
    let mut values = Vec::new();
    let mut idx = start + 1;
    while let Some(line) = lines.line(idx) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !values.is_empty() {
                idx += 1;
                break;
            }
        } else if !(values.is_empty() && is_rule(trimmed)) {
            match numeric_row(trimmed) {
                Some(row) => values.extend(row),
                None => break,
            }
        }
        idx += 1;
    }

    if values.is_empty() {
        return Err(ExtractError::malformed(start, "eigenvalue block is empty"));
    }
    let count = values.len() as i64;
    Ok(Extraction::new(
        Fragment::new()
            .accumulate(EIGENVALUES_KEY, values)
            .accumulate(EIGENVALUE_BLOCKS_KEY, vec![count]),
        idx,
    ))
}

/// CP2K timing table: subroutine name to maximum total time in seconds.
pub fn timings(lines: &LineStream, start: usize) -> Result<Extraction, ExtractError> {
    let header = (start + 1..(start + 1 + HEADER_LOOKAHEAD).min(lines.len()))
        .find(|&i| lines.contains(i, "SUBROUTINE"))
        .ok_or_else(|| ExtractError::malformed(start, "timing table has no SUBROUTINE header"))?;

    // header, then a units row
    let mut idx = header + 2;
    let mut table = Record::new();
    while let Some(line) = lines.line(idx) {
        let trimmed = line.trim();
        idx += 1;
        if trimmed.is_empty() || is_rule(trimmed) {
            break;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let total = tokens
            .last()
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|_| tokens.len() >= 2)
            .ok_or_else(|| ExtractError::malformed(idx - 1, "timing row lacks a total time"))?;
        table.insert(tokens[0], total);
    }

    Ok(Extraction::new(Fragment::new().set(TIMINGS_KEY, table), idx))
}

/// CP2K atomic coordinate table, stored in Angstrom.
pub fn atomic_coordinates(lines: &LineStream, start: usize) -> Result<Extraction, ExtractError> {
    let unit = lines
        .line(start)
        .and_then(|l| COORD_UNIT_RE.captures(l))
        .map(|caps| caps[1].to_lowercase())
        .unwrap_or_else(|| "angstrom".to_string());
    let factor = if unit == "bohr" { BOHR_TO_ANGSTROM } else { 1.0 };

    let header = (start + 1..(start + 1 + HEADER_LOOKAHEAD).min(lines.len()))
        .find(|&i| lines.contains(i, "Atom") && lines.contains(i, "Kind"))
        .ok_or_else(|| ExtractError::malformed(start, "coordinate table has no Atom/Kind header"))?;

    let mut sites = Vec::new();
    let mut idx = header + 1;
    while let Some(line) = lines.line(idx) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            idx += 1;
            if sites.is_empty() {
                continue;
            }
            break;
        }
        // rows start with the atom index; anything else belongs to the next section
        if tokens[0].parse::<usize>().is_err() {
            break;
        }
        // Atom  Kind  Element  Z  X  Y  Z  Z(eff)  Mass
        if tokens.len() < 7 {
            return Err(ExtractError::malformed(
                idx,
                format!("coordinate row has {} fields, expected at least 7", tokens.len()),
            ));
        }
        let mut position = [0.0; 3];
        for (slot, tok) in position.iter_mut().zip(&tokens[4..7]) {
            *slot = tok.parse::<f64>().map_err(|_| {
                ExtractError::malformed(idx, format!("'{}' is not a coordinate", tok))
            })? * factor;
        }
        sites.push(Site::new(position, tokens[2]));
        idx += 1;
    }

    if sites.is_empty() {
        return Err(ExtractError::malformed(start, "coordinate table is empty"));
    }
    Ok(Extraction::new(Fragment::new().set(COORDINATES_KEY, sites), idx))
}

/// Every token of the line as a float, or `None` if any token is not a number.
fn numeric_row(trimmed: &str) -> Option<Vec<f64>> {
    trimmed.split_whitespace().map(parse_float).collect()
}

fn is_rule(trimmed: &str) -> bool {
    trimmed.len() > 3 && trimmed.chars().all(|c| c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    fn apply(extraction: Extraction) -> Record {
        let mut record = Record::new();
        record.apply(extraction.fragment).unwrap();
        record
    }

    #[test]
    fn test_scf_steps() {
        let lines = LineStream::from_text("  *** SCF run converged in    12 steps ***");
        let record = apply(scf_steps(&lines, 0).unwrap());
        assert_eq!(record.get_i64(SCF_STEPS_KEY), Some(12));
    }

    #[test]
    fn test_eigenvalue_block() {
        let text = "\
 Eigenvalues of the occupied subspace spin            1
 ---------------------------------------------
     -1.52300000      -0.87600000      -0.87600000      -0.87600000
     -0.21000000

 Fermi Energy [eV] :   -5.714
";
        let lines = LineStream::from_text(text);
        let extraction = eigenvalues(&lines, 0).unwrap();
        assert_eq!(extraction.next, 5);
        let record = apply(extraction);
        assert_eq!(
            record.get(EIGENVALUES_KEY),
            Some(&Value::Floats(vec![-1.523, -0.876, -0.876, -0.876, -0.21]))
        );
        assert_eq!(record.get(EIGENVALUE_BLOCKS_KEY), Some(&Value::Ints(vec![5])));
    }

    #[test]
    fn test_eigenvalue_block_ends_at_text_line() {
        let text = "\
 Eigenvalues of the occupied subspace spin            1
     -0.50000000      -0.40000000
 Fermi Energy [eV] :   -5.714
";
        let lines = LineStream::from_text(text);
        let extraction = eigenvalues(&lines, 0).unwrap();
        assert_eq!(extraction.next, 2);
        let record = apply(extraction);
        assert_eq!(
            record.get(EIGENVALUES_KEY),
            Some(&Value::Floats(vec![-0.5, -0.4]))
        );
        assert_eq!(record.get(EIGENVALUE_BLOCKS_KEY), Some(&Value::Ints(vec![2])));
    }

    #[test]
    fn test_eigenvalue_rows_accept_fortran_exponents() {
        let lines = LineStream::from_text(" Eigenvalues\n  -0.1D+01  0.5E-01\n\n");
        let record = apply(eigenvalues(&lines, 0).unwrap());
        assert_eq!(record.get(EIGENVALUES_KEY), Some(&Value::Floats(vec![-1.0, 0.05])));
    }

    #[test]
    fn test_eigenvalue_block_empty() {
        let lines = LineStream::from_text(" Eigenvalues of the occupied subspace\n\n Done\n");
        assert!(eigenvalues(&lines, 0).is_err());
    }

    #[test]
    fn test_timing_table() {
        let text = "\
 -                                T I M I N G                                  -
 -                                                                             -
 -------------------------------------------------------------------------------
 SUBROUTINE                       CALLS  ASD         SELF TIME        TOTAL TIME
                                MAXIMUM       AVERAGE  MAXIMUM  AVERAGE  MAXIMUM
 CP2K                                 1  1.0    0.011    0.011   12.345   12.345
 qs_energies                          1  2.0    0.000    0.000   10.000   10.500
 -------------------------------------------------------------------------------
 trailing
";
        let lines = LineStream::from_text(text);
        let extraction = timings(&lines, 0).unwrap();
        assert_eq!(extraction.next, 8);
        let record = apply(extraction);
        match record.get(TIMINGS_KEY) {
            Some(Value::Record(table)) => {
                assert_eq!(table.get_f64("CP2K"), Some(12.345));
                assert_eq!(table.get_f64("qs_energies"), Some(10.5));
            }
            other => panic!("Expected timing record, got {:?}", other),
        }
    }

    #[test]
    fn test_coordinates_in_bohr_are_converted() {
        let text = "\
 MODULE QUICKSTEP:  ATOMIC COORDINATES IN bohr

  Atom  Kind  Element       X           Y           Z          Z(eff)       Mass

       1     1 Mg  12    0.000000    0.000000    0.000000      2.00      24.3050
       2     2 O    8    1.000000    1.000000    1.000000      6.00      15.9994

 SCF PARAMETERS
";
        let lines = LineStream::from_text(text);
        let extraction = atomic_coordinates(&lines, 0).unwrap();
        assert_eq!(extraction.next, 7);
        match apply(extraction).get(COORDINATES_KEY) {
            Some(Value::Sites(sites)) => {
                assert_eq!(sites.len(), 2);
                assert_eq!(sites[1].label, "O");
                assert!((sites[1].position[0] - BOHR_TO_ANGSTROM).abs() < 1e-12);
            }
            other => panic!("Expected sites, got {:?}", other),
        }
    }

    #[test]
    fn test_coordinates_end_at_next_section() {
        let text = "\
 MODULE QUICKSTEP:  ATOMIC COORDINATES IN angstrom
  Atom  Kind  Element       X           Y           Z          Z(eff)       Mass
       1     1 H   1    0.000000    0.000000    0.000000      1.00       1.0079
 SCF PARAMETERS
";
        let lines = LineStream::from_text(text);
        let extraction = atomic_coordinates(&lines, 0).unwrap();
        assert_eq!(extraction.next, 3);
    }

    #[test]
    fn test_stock_registry_has_all_sections() {
        assert_eq!(stock_registry().len(), 4);
    }
}
