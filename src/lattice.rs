//! Unit cell geometry populated by the lattice section extractors.
//!
//! A [`Lattice`] stores three lattice vectors (rows of a 3x3 matrix) and an
//! optional list of atomic sites in fractional coordinates. It can be built
//! either from the vectors themselves, as CASTEP and CP2K print them, or from
//! lengths and angles, as tight-binding codes usually report the cell.
//!
//! Angles are in degrees throughout. Lengths are in whatever unit the caller
//! supplied; [`Lattice::convert_lengths`] rescales in place.

use crate::record::Site;
use nalgebra::{Matrix3, Vector3};
use serde::Serialize;
use thiserror::Error;

/// Default tolerance on lengths for the round-trip check (caller units).
pub const LENGTH_TOL: f64 = 1e-3;
/// Default tolerance on angles for the round-trip check (degrees).
pub const ANGLE_TOL: f64 = 1e-2;

/// Errors raised while building or querying a lattice.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LatticeError {
    /// Parameters read back from the vectors differ from the ones supplied
    #[error("lattice parameters do not round-trip: {0}")]
    RoundTrip(String),
    /// Zero-volume cell or impossible angle combination
    #[error("degenerate lattice: {0}")]
    Degenerate(String),
}

/// A periodic cell with optional fractional atomic positions.
///
/// # Examples
///
/// ```
/// use chemlog::lattice::Lattice;
///
/// let cubic = Lattice::from_vectors([[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]);
/// assert!((cubic.volume() - 64.0).abs() < 1e-12);
/// assert!(cubic.angles().iter().all(|g| (g - 90.0).abs() < 1e-10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "SerializableLattice")]
pub struct Lattice {
    /// Rows are the a, b and c vectors
    vectors: Matrix3<f64>,
    /// Sites in fractional coordinates
    sites: Vec<Site>,
}

/// Plain-array mirror of [`Lattice`] for serde, since the matrix type does
/// not serialise without extra nalgebra features.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SerializableLattice {
    vectors: [[f64; 3]; 3],
    lengths: [f64; 3],
    angles: [f64; 3],
    volume: f64,
    fract_coords: Vec<Site>,
}

impl From<Lattice> for SerializableLattice {
    fn from(lattice: Lattice) -> Self {
        Self {
            vectors: lattice.vectors(),
            lengths: lattice.lengths(),
            angles: lattice.angles(),
            volume: lattice.volume(),
            fract_coords: lattice.sites,
        }
    }
}

impl Lattice {
    /// Builds a lattice from the a, b and c vectors.
    pub fn from_vectors(vectors: [[f64; 3]; 3]) -> Self {
        let [a, b, c] = vectors;
        Self {
            vectors: Matrix3::from_rows(&[
                Vector3::from(a).transpose(),
                Vector3::from(b).transpose(),
                Vector3::from(c).transpose(),
            ]),
            sites: Vec::new(),
        }
    }

    /// Builds a lattice from lengths `[a, b, c]` and angles `[alpha, beta, gamma]`.
    ///
    /// Uses the standard orientation: `a` along x, `b` in the xy plane.
    pub fn from_params(lengths: [f64; 3], angles: [f64; 3]) -> Result<Self, LatticeError> {
        let [a, b, c] = lengths;
        if lengths.iter().any(|&l| l <= 0.0 || !l.is_finite()) {
            return Err(LatticeError::Degenerate(format!(
                "lengths must be positive, got {:?}",
                lengths
            )));
        }
        if angles.iter().any(|&g| g <= 0.0 || g >= 180.0 || !g.is_finite()) {
            return Err(LatticeError::Degenerate(format!(
                "angles must lie strictly between 0 and 180 degrees, got {:?}",
                angles
            )));
        }

        let [cos_a, cos_b, cos_g] = angles.map(|g| g.to_radians().cos());
        let sin_g = angles[2].to_radians().sin();

        let cx = c * cos_b;
        let cy = c * (cos_a - cos_b * cos_g) / sin_g;
        let cz_sq = c * c - cx * cx - cy * cy;
        if cz_sq <= 0.0 {
            return Err(LatticeError::Degenerate(format!(
                "angles {:?} do not describe a cell with positive volume",
                angles
            )));
        }

        Ok(Self::from_vectors([
            [a, 0.0, 0.0],
            [b * cos_g, b * sin_g, 0.0],
            [cx, cy, cz_sq.sqrt()],
        ]))
    }

    /// Like [`Lattice::from_params`], then checks the parameters read back
    /// within [`LENGTH_TOL`] and [`ANGLE_TOL`].
    pub fn from_params_checked(lengths: [f64; 3], angles: [f64; 3]) -> Result<Self, LatticeError> {
        let lattice = Self::from_params(lengths, angles)?;
        lattice.check_params(lengths, angles, LENGTH_TOL, ANGLE_TOL)?;
        Ok(lattice)
    }

    /// Verifies this lattice's lengths and angles against expected values.
    pub fn check_params(
        &self,
        lengths: [f64; 3],
        angles: [f64; 3],
        length_tol: f64,
        angle_tol: f64,
    ) -> Result<(), LatticeError> {
        let got_lengths = self.lengths();
        let got_angles = self.angles();
        let lengths_ok = got_lengths
            .iter()
            .zip(lengths.iter())
            .all(|(g, e)| (g - e).abs() <= length_tol);
        let angles_ok = got_angles
            .iter()
            .zip(angles.iter())
            .all(|(g, e)| (g - e).abs() <= angle_tol);

        if lengths_ok && angles_ok {
            Ok(())
        } else {
            Err(LatticeError::RoundTrip(format!(
                "expected lengths {:?} angles {:?}, got lengths {:?} angles {:?}",
                lengths, angles, got_lengths, got_angles
            )))
        }
    }

    fn row(&self, i: usize) -> Vector3<f64> {
        self.vectors.row(i).transpose()
    }

    /// The a, b and c vectors.
    pub fn vectors(&self) -> [[f64; 3]; 3] {
        [0, 1, 2].map(|i| {
            let v = self.row(i);
            [v[0], v[1], v[2]]
        })
    }

    /// Vector lengths `[a, b, c]`.
    pub fn lengths(&self) -> [f64; 3] {
        [0, 1, 2].map(|i| self.row(i).norm())
    }

    /// Cell angles `[alpha, beta, gamma]` in degrees.
    ///
    /// alpha is the angle between b and c, beta between a and c, gamma
    /// between a and b.
    pub fn angles(&self) -> [f64; 3] {
        let angle = |i: usize, j: usize| self.row(i).angle(&self.row(j)).to_degrees();
        [angle(1, 2), angle(0, 2), angle(0, 1)]
    }

    /// Cell volume in cubed length units.
    pub fn volume(&self) -> f64 {
        self.vectors.determinant().abs()
    }

    /// Sites in fractional coordinates.
    pub fn fractional_coords(&self) -> &[Site] {
        &self.sites
    }

    /// Replaces the sites (fractional coordinates).
    pub fn set_fractional_coords(&mut self, sites: Vec<Site>) {
        self.sites = sites;
    }

    /// Sites converted to Cartesian coordinates.
    pub fn cartesian_coords(&self) -> Vec<Site> {
        let to_cart = self.vectors.transpose();
        self.sites
            .iter()
            .map(|s| {
                let cart = to_cart * Vector3::from(s.position);
                Site::new([cart[0], cart[1], cart[2]], s.label.clone())
            })
            .collect()
    }

    /// Replaces the sites from Cartesian coordinates.
    pub fn set_cartesian_coords(&mut self, sites: Vec<Site>) -> Result<(), LatticeError> {
        let to_frac = self.vectors.transpose().try_inverse().ok_or_else(|| {
            LatticeError::Degenerate("cannot invert a zero-volume cell".to_string())
        })?;
        self.sites = sites
            .into_iter()
            .map(|s| {
                let frac = to_frac * Vector3::from(s.position);
                Site::new([frac[0], frac[1], frac[2]], s.label)
            })
            .collect();
        Ok(())
    }

    /// Multiplies every length by `factor`, e.g. [`crate::units::BOHR_TO_ANGSTROM`].
    ///
    /// Fractional coordinates are unit-free and stay as they are.
    pub fn convert_lengths(&mut self, factor: f64) {
        self.vectors *= factor;
    }
}
