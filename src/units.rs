//! Unit conversion constants used by the section extractors.
//!
//! Values are CODATA 2018 as tabulated by NIST. The module is read-only: there
//! is nothing to initialise and nothing to tear down.

/// Bohr radius in Angstrom.
pub const BOHR_TO_ANGSTROM: f64 = 0.529177210903;
/// Angstrom in Bohr.
pub const ANGSTROM_TO_BOHR: f64 = 1.0 / BOHR_TO_ANGSTROM;

/// Hartree in electronvolts.
pub const HARTREE_TO_EV: f64 = 27.211386245988;
/// Rydberg in electronvolts (half a Hartree).
pub const RYD_TO_EV: f64 = HARTREE_TO_EV / 2.0;
/// Electronvolt in Hartree.
pub const EV_TO_HARTREE: f64 = 1.0 / HARTREE_TO_EV;
