//! Built-in sections shared by every log of the family.
//!
//! A [`LogFormat`] is the table of built-in triggers for one source code:
//! where documents start, how the unit cell is printed, which lines carry
//! energies, atom counts and k-point grids, and which line proves the run
//! finished. Three presets ship with the crate:
//!
//! | Section | [`LogFormat::castep`] | [`LogFormat::cp2k`] | [`LogFormat::tight_binding`] |
//! |---|---|---|---|
//! | reset | `Run started:` | `PROGRAM STARTED AT` | `Starting calculation` |
//! | unit cell | `Real Lattice(A)` + 3 rows | `CELL\| Vector a` block | `Unit cell` lengths/angles |
//! | energy | `Final energy` (eV) | `ENERGY\| Total FORCE_EVAL` (Ha) | `Total energy` (Ry) |
//! | atoms | `Total number of ions in cell` | `Number of atoms:` | `Number of atoms` |
//! | k-points | `MP grid size for SCF` | `BRILLOUIN\| K-point grid` | - |
//! | geometries | `BFGS: starting iteration` | `OPTIMIZATION STEP:` | `Geometry step` |
//! | completion | `Total time` | `PROGRAM ENDED AT` | `Calculation finished` |
//!
//! Every field is public, so a format can be tweaked (or built from scratch)
//! before it is handed to the engine.

use crate::extractor::{
    float_token, floats_in, int_token, ExtractError, Extraction, SectionExtractor, TokenPos,
    Trigger,
};
use crate::lattice::Lattice;
use crate::lines::LineStream;
use crate::record::Fragment;
use crate::units::{HARTREE_TO_EV, RYD_TO_EV};

/// Field names written by the built-in sections.
pub mod keys {
    /// Accumulated atom count
    pub const ATOM_COUNT: &str = "numbAtoms";
    /// Total energy in eV
    pub const ENERGY: &str = "energy";
    /// Free energy (E-TS) in eV
    pub const FREE_ENERGY: &str = "free_energy";
    /// Zero-temperature estimate in eV
    pub const ENERGY_0K: &str = "energy_0k";
    /// Unit cell
    pub const UNIT_CELL: &str = "unitCell";
    /// Monkhorst-Pack grid
    pub const KPOINT_GRID: &str = "kPointGrid";
    /// Set once a second geometry shows up
    pub const MULTIPLE_GEOMETRIES: &str = "multiple geometries";
    /// Set by the completion marker
    pub const RUN_COMPLETED: &str = "run completed";
}

/// How a unit cell block is laid out after its trigger line.
#[derive(Debug, Clone, PartialEq)]
pub enum LatticeLayout {
    /// Three lines after the trigger, each starting with one vector
    VectorRows,
    /// Consecutive lines sharing `prefix`, with `Vector a|b|c` entries
    PrefixedVectors {
        /// Common line prefix, e.g. `CELL|`
        prefix: String,
    },
    /// A lengths line and an angles line, block ends once both are read
    LengthsAngles {
        /// Marker of the line whose last three numbers are a, b, c
        lengths_label: String,
        /// Marker of the line whose last three numbers are alpha, beta, gamma
        angles_label: String,
    },
}

/// Unit cell section: trigger plus layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeSection {
    /// Start of the block
    pub trigger: Trigger,
    /// Block layout
    pub layout: LatticeLayout,
}

/// A single-line energy: which token to read and how to convert it to eV.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyRule {
    /// Line marker
    pub trigger: Trigger,
    /// Record field
    pub key: String,
    /// Token holding the value
    pub token: TokenPos,
    /// Multiplier to eV
    pub factor: f64,
}

impl EnergyRule {
    /// Creates a rule.
    pub fn new(trigger: impl Into<Trigger>, key: &str, token: TokenPos, factor: f64) -> Self {
        Self {
            trigger: trigger.into(),
            key: key.to_string(),
            token,
            factor,
        }
    }
}

/// Built-in trigger table for one family of logs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFormat {
    /// Preset name, used in log messages
    pub name: String,
    /// Start-of-document marker
    pub reset: Option<Trigger>,
    /// Unit cell block
    pub lattice: Option<LatticeSection>,
    /// Single-line energies
    pub energies: Vec<EnergyRule>,
    /// Atom count line (accumulating)
    pub atoms: Option<Trigger>,
    /// K-point grid line
    pub kpoints: Option<Trigger>,
    /// Marker of a further geometry
    pub multi_geometry: Option<Trigger>,
    /// Required end-of-run marker
    pub completion: Trigger,
}

impl LogFormat {
    /// CASTEP `.castep` files.
    pub fn castep() -> Self {
        Self {
            name: "castep".to_string(),
            reset: Some(Trigger::new("Run started:")),
            lattice: Some(LatticeSection {
                trigger: Trigger::new("Real Lattice(A)"),
                layout: LatticeLayout::VectorRows,
            }),
            energies: vec![
                EnergyRule::new("Final energy", keys::ENERGY, TokenPos::FromEnd(1), 1.0),
                EnergyRule::new("Final free energy", keys::FREE_ENERGY, TokenPos::FromEnd(1), 1.0),
                EnergyRule::new("NB est. 0K energy", keys::ENERGY_0K, TokenPos::FromEnd(1), 1.0),
            ],
            atoms: Some(Trigger::new("Total number of ions in cell")),
            kpoints: Some(Trigger::new("MP grid size for SCF calculation is")),
            multi_geometry: Some(Trigger::new("BFGS: starting iteration")),
            completion: Trigger::new("Total time"),
        }
    }

    /// CP2K `.cpout` files.
    pub fn cp2k() -> Self {
        Self {
            name: "cp2k".to_string(),
            reset: Some(Trigger::new("PROGRAM STARTED AT")),
            lattice: Some(LatticeSection {
                trigger: Trigger::new("CELL| Vector a"),
                layout: LatticeLayout::PrefixedVectors {
                    prefix: "CELL|".to_string(),
                },
            }),
            energies: vec![EnergyRule::new(
                "ENERGY| Total FORCE_EVAL",
                keys::ENERGY,
                TokenPos::FromEnd(0),
                HARTREE_TO_EV,
            )],
            atoms: Some(Trigger::new("Number of atoms:")),
            kpoints: Some(Trigger::new("BRILLOUIN| K-point grid").ignore_case()),
            multi_geometry: Some(Trigger::new("OPTIMIZATION STEP:")),
            completion: Trigger::new("PROGRAM ENDED AT"),
        }
    }

    /// Output of the tight-binding code.
    pub fn tight_binding() -> Self {
        Self {
            name: "tight-binding".to_string(),
            reset: Some(Trigger::new("Starting calculation")),
            lattice: Some(LatticeSection {
                trigger: Trigger::new("Unit cell"),
                layout: LatticeLayout::LengthsAngles {
                    lengths_label: "Lattice lengths".to_string(),
                    angles_label: "Lattice angles".to_string(),
                },
            }),
            energies: vec![EnergyRule::new(
                "Total energy",
                keys::ENERGY,
                TokenPos::FromEnd(1),
                RYD_TO_EV,
            )],
            atoms: Some(Trigger::new("Number of atoms")),
            kpoints: None,
            multi_geometry: Some(Trigger::new("Geometry step")),
            completion: Trigger::new("Calculation finished"),
        }
    }

    /// Looks a preset up by name (`castep`, `cp2k`, `tight-binding`).
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "castep" => Some(Self::castep()),
            "cp2k" => Some(Self::cp2k()),
            "tight-binding" | "tight_binding" | "tb" => Some(Self::tight_binding()),
            _ => None,
        }
    }

    /// Makes every built-in trigger case-insensitive.
    pub fn ignore_case(mut self) -> Self {
        self.reset = self.reset.map(Trigger::ignore_case);
        if let Some(section) = self.lattice.as_mut() {
            section.trigger = section.trigger.clone().ignore_case();
        }
        for rule in &mut self.energies {
            rule.trigger = rule.trigger.clone().ignore_case();
        }
        self.atoms = self.atoms.map(Trigger::ignore_case);
        self.kpoints = self.kpoints.map(Trigger::ignore_case);
        self.multi_geometry = self.multi_geometry.map(Trigger::ignore_case);
        self.completion = self.completion.ignore_case();
        self
    }

    /// Is `line` a start-of-document marker?
    pub fn is_reset(&self, line: &str) -> bool {
        self.reset.as_ref().is_some_and(|t| t.matches(line))
    }

    /// Built-in sections triggered by `line`, in fixed order.
    pub fn matching<'a>(&'a self, line: &str) -> Vec<(&'a Trigger, BuiltinSection<'a>)> {
        let mut hits = Vec::new();
        if let Some(section) = self.lattice.as_ref().filter(|s| s.trigger.matches(line)) {
            hits.push((&section.trigger, BuiltinSection::Lattice(&section.layout)));
        }
        for rule in self.energies.iter().filter(|r| r.trigger.matches(line)) {
            hits.push((&rule.trigger, BuiltinSection::Energy(rule)));
        }
        if let Some(trigger) = self.atoms.as_ref().filter(|t| t.matches(line)) {
            hits.push((trigger, BuiltinSection::AtomCount));
        }
        if let Some(trigger) = self.kpoints.as_ref().filter(|t| t.matches(line)) {
            hits.push((trigger, BuiltinSection::KPointGrid));
        }
        if let Some(trigger) = self.multi_geometry.as_ref().filter(|t| t.matches(line)) {
            hits.push((trigger, BuiltinSection::MultiGeometry));
        }
        if self.completion.matches(line) {
            hits.push((&self.completion, BuiltinSection::Completion));
        }
        hits
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::castep()
    }
}

/// One built-in extractor, borrowed from its [`LogFormat`].
#[derive(Debug, Clone, Copy)]
pub enum BuiltinSection<'a> {
    /// Unit cell block
    Lattice(&'a LatticeLayout),
    /// Single-line energy
    Energy(&'a EnergyRule),
    /// Accumulating atom count
    AtomCount,
    /// Three-integer k-point grid
    KPointGrid,
    /// Multi-geometry flag
    MultiGeometry,
    /// Completion flag
    Completion,
}

impl SectionExtractor for BuiltinSection<'_> {
    fn extract(&self, lines: &LineStream, start: usize) -> Result<Extraction, ExtractError> {
        match self {
            BuiltinSection::Lattice(layout) => extract_lattice(layout, lines, start),
            BuiltinSection::Energy(rule) => {
                let value = float_token(lines, start, rule.token)? * rule.factor;
                Ok(Extraction::new(Fragment::new().set(rule.key.as_str(), value), start + 1))
            }
            BuiltinSection::AtomCount => {
                let count = int_token(lines, start, TokenPos::FromEnd(0))?;
                Ok(Extraction::new(
                    Fragment::new().accumulate(keys::ATOM_COUNT, count),
                    start + 1,
                ))
            }
            BuiltinSection::KPointGrid => {
                let grid = last_ints(lines, start, 3)?;
                Ok(Extraction::new(Fragment::new().set(keys::KPOINT_GRID, grid), start + 1))
            }
            BuiltinSection::MultiGeometry => Ok(Extraction::new(
                Fragment::new().set(keys::MULTIPLE_GEOMETRIES, true),
                start + 1,
            )),
            BuiltinSection::Completion => Ok(Extraction::new(
                Fragment::new().set(keys::RUN_COMPLETED, true),
                start + 1,
            )),
        }
    }
}

fn last_ints(lines: &LineStream, idx: usize, n: usize) -> Result<Vec<i64>, ExtractError> {
    (0..n)
        .rev()
        .map(|i| int_token(lines, idx, TokenPos::FromEnd(i)))
        .collect()
}

fn vector_from(line_idx: usize, numbers: &[f64]) -> Result<[f64; 3], ExtractError> {
    match numbers {
        [x, y, z, ..] => Ok([*x, *y, *z]),
        _ => Err(ExtractError::malformed(
            line_idx,
            format!("expected three vector components, found {}", numbers.len()),
        )),
    }
}

fn last_three(line_idx: usize, numbers: &[f64]) -> Result<[f64; 3], ExtractError> {
    let tail = numbers.len().checked_sub(3).map(|i| &numbers[i..]);
    vector_from(line_idx, tail.unwrap_or(numbers))
}

fn extract_lattice(
    layout: &LatticeLayout,
    lines: &LineStream,
    start: usize,
) -> Result<Extraction, ExtractError> {
    match layout {
        LatticeLayout::VectorRows => {
            let mut rows = [[0.0; 3]; 3];
            for (offset, row) in rows.iter_mut().enumerate() {
                let idx = start + 1 + offset;
                let line = lines
                    .line(idx)
                    .ok_or_else(|| ExtractError::malformed(idx, "unit cell block truncated"))?;
                *row = vector_from(idx, &floats_in(line))?;
            }
            let lattice = Lattice::from_vectors(rows);
            Ok(Extraction::new(
                Fragment::new().set(keys::UNIT_CELL, lattice),
                start + 4,
            ))
        }
        LatticeLayout::PrefixedVectors { prefix } => {
            let mut rows: [Option<[f64; 3]>; 3] = [None; 3];
            let mut idx = start;
            while let Some(line) = lines.line(idx) {
                if idx > start && !line.contains(prefix.as_str()) {
                    break;
                }
                for (slot, label) in rows.iter_mut().zip(["Vector a", "Vector b", "Vector c"]) {
                    if line.contains(label) {
                        let body = line.split_once(':').map_or(line, |(_, rest)| rest);
                        *slot = Some(vector_from(idx, &floats_in(body))?);
                    }
                }
                idx += 1;
            }
            match rows {
                [Some(a), Some(b), Some(c)] => Ok(Extraction::new(
                    Fragment::new().set(keys::UNIT_CELL, Lattice::from_vectors([a, b, c])),
                    idx,
                )),
                _ => Err(ExtractError::malformed(
                    start,
                    "unit cell block lacks one of the a, b, c vectors",
                )),
            }
        }
        LatticeLayout::LengthsAngles {
            lengths_label,
            angles_label,
        } => {
            let mut lengths = None;
            let mut angles = None;
            let mut idx = start + 1;
            // ends after both labels, or at the first line carrying neither
            while lengths.is_none() || angles.is_none() {
                let Some(line) = lines.line(idx) else {
                    break;
                };
                if line.contains(lengths_label.as_str()) {
                    lengths = Some(last_three(idx, &floats_in(line))?);
                } else if line.contains(angles_label.as_str()) {
                    angles = Some(last_three(idx, &floats_in(line))?);
                } else {
                    break;
                }
                idx += 1;
            }
            let (lengths, angles) = lengths.zip(angles).ok_or_else(|| {
                ExtractError::malformed(start, "unit cell block needs both lengths and angles")
            })?;
            let lattice = Lattice::from_params_checked(lengths, angles)?;
            Ok(Extraction::new(Fragment::new().set(keys::UNIT_CELL, lattice), idx))
        }
    }
}
