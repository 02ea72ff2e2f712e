//! Global box, local sub-box and processor layouts.
//!
//! All bounds are orthogonal; fractions of the global box are converted to
//! coordinates through [`Domain::fraction_to_coord`] on every rank so that
//! neighboring ranks compare bit-identical edge values.

pub mod grid;
pub mod rcb;

use crate::comm_error::CommError;

pub use grid::ProcGrid;
pub use rcb::{RcbInfo, RcbPartition};

/// Axis-aligned box given by its low and high corners.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lo: [f64; 3],
    pub hi: [f64; 3],
}

impl Bounds {
    pub fn new(lo: [f64; 3], hi: [f64; 3]) -> Self {
        Self { lo, hi }
    }

    /// Half-open membership test `lo <= x < hi` on every axis.
    #[inline]
    pub fn contains(&self, x: &[f64; 3]) -> bool {
        (0..3).all(|d| x[d] >= self.lo[d] && x[d] < self.hi[d])
    }

    /// Closed membership test `lo <= x <= hi` on every axis.
    #[inline]
    pub fn contains_closed(&self, x: &[f64; 3]) -> bool {
        (0..3).all(|d| x[d] >= self.lo[d] && x[d] <= self.hi[d])
    }

    /// Positive-volume overlap with another box in the first `dimension` axes.
    pub fn overlaps(&self, other: &Bounds, dimension: usize) -> bool {
        (0..dimension).all(|d| self.lo[d] < other.hi[d] && other.lo[d] < self.hi[d])
    }

    pub fn intersect(&self, other: &Bounds) -> Bounds {
        let mut out = *self;
        for d in 0..3 {
            out.lo[d] = self.lo[d].max(other.lo[d]);
            out.hi[d] = self.hi[d].min(other.hi[d]);
        }
        out
    }

    pub fn volume(&self, dimension: usize) -> f64 {
        (0..dimension).map(|d| (self.hi[d] - self.lo[d]).max(0.0)).product()
    }
}

/// Global simulation box plus the calling rank's sub-box.
#[derive(Clone, Debug, PartialEq)]
pub struct Domain {
    pub dimension: usize,
    pub boxlo: [f64; 3],
    pub boxhi: [f64; 3],
    pub prd: [f64; 3],
    pub periodicity: [bool; 3],
    pub triclinic: bool,
    pub sublo: [f64; 3],
    pub subhi: [f64; 3],
}

impl Domain {
    /// Orthogonal box; the sub-box starts out as the whole box.
    pub fn new(
        dimension: usize,
        boxlo: [f64; 3],
        boxhi: [f64; 3],
        mut periodicity: [bool; 3],
    ) -> Result<Self, CommError> {
        if dimension != 2 && dimension != 3 {
            return Err(CommError::InvalidDimension(dimension));
        }
        if (0..3).any(|d| !(boxhi[d] > boxlo[d])) {
            return Err(CommError::InvalidConfig(format!(
                "box bounds must satisfy lo < hi: {boxlo:?} {boxhi:?}"
            )));
        }
        if dimension == 2 {
            periodicity[2] = false;
        }
        let prd = [
            boxhi[0] - boxlo[0],
            boxhi[1] - boxlo[1],
            boxhi[2] - boxlo[2],
        ];
        Ok(Self {
            dimension,
            boxlo,
            boxhi,
            prd,
            periodicity,
            triclinic: false,
            sublo: boxlo,
            subhi: boxhi,
        })
    }

    /// Coordinate of a fractional position along `axis`. A fraction of one
    /// maps to `boxhi` exactly.
    #[inline]
    pub fn fraction_to_coord(&self, axis: usize, frac: f64) -> f64 {
        if frac < 1.0 {
            self.boxlo[axis] + self.prd[axis] * frac
        } else {
            self.boxhi[axis]
        }
    }

    /// Box spanned by per-axis `[lo, hi)` fractions.
    pub fn split_bounds(&self, split: &[[f64; 2]; 3]) -> Bounds {
        let mut b = Bounds::new(self.boxlo, self.boxhi);
        for d in 0..3 {
            b.lo[d] = self.fraction_to_coord(d, split[d][0]);
            b.hi[d] = self.fraction_to_coord(d, split[d][1]);
        }
        b
    }

    pub fn set_subdomain(&mut self, sub: Bounds) {
        self.sublo = sub.lo;
        self.subhi = sub.hi;
    }

    pub fn subdomain(&self) -> Bounds {
        Bounds::new(self.sublo, self.subhi)
    }

    pub fn global_box(&self) -> Bounds {
        Bounds::new(self.boxlo, self.boxhi)
    }

    /// Wrap a point back into the periodic box, updating its image counters.
    pub fn remap(&self, x: &mut [f64; 3], image: &mut [i32; 3]) {
        for d in 0..self.dimension {
            if !self.periodicity[d] {
                continue;
            }
            if x[d] < self.boxlo[d] {
                x[d] += self.prd[d];
                image[d] -= 1;
            }
            if x[d] >= self.boxhi[d] {
                x[d] -= self.prd[d];
                x[d] = x[d].max(self.boxlo[d]);
                image[d] += 1;
            }
        }
    }

    /// Displacement for a periodic image shift of `pbc` box lengths.
    pub fn pbc_displacement(&self, pbc: &[i32; 3]) -> [f64; 3] {
        [
            pbc[0] as f64 * self.prd[0],
            pbc[1] as f64 * self.prd[1],
            pbc[2] as f64 * self.prd[2],
        ]
    }
}
