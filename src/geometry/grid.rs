//! Uniform and non-uniform brick layouts: a 3-d grid of processors.

use crate::comm_error::CommError;
use crate::geometry::{Bounds, Domain};

/// Processor grid with per-axis split fractions.
///
/// Ranks are numbered with z fastest: `rank = (i * py + j) * pz + k`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcGrid {
    pub procgrid: [usize; 3],
    /// `procgrid[d] + 1` fractions per axis, from 0 to 1.
    pub splits: [Vec<f64>; 3],
    pub me: usize,
    pub myloc: [usize; 3],
}

impl ProcGrid {
    /// Evenly split grid.
    pub fn uniform(procgrid: [usize; 3], me: usize) -> Result<Self, CommError> {
        let splits = [0, 1, 2].map(|d| {
            let n = procgrid[d].max(1);
            (0..=n).map(|i| i as f64 / n as f64).collect::<Vec<_>>()
        });
        Self::with_splits(procgrid, splits, me)
    }

    /// Grid with caller-chosen split fractions (non-uniform layout).
    pub fn with_splits(
        procgrid: [usize; 3],
        splits: [Vec<f64>; 3],
        me: usize,
    ) -> Result<Self, CommError> {
        if procgrid.iter().any(|&p| p == 0) {
            return Err(CommError::InvalidPartition(format!(
                "processor grid {procgrid:?} has an empty axis"
            )));
        }
        for d in 0..3 {
            let s = &splits[d];
            if s.len() != procgrid[d] + 1
                || s.first() != Some(&0.0)
                || s.last() != Some(&1.0)
                || s.windows(2).any(|w| !(w[1] > w[0]))
            {
                return Err(CommError::InvalidPartition(format!(
                    "axis {d} splits {s:?} must increase from 0 to 1 in {} steps",
                    procgrid[d]
                )));
            }
        }
        let nprocs = procgrid.iter().product::<usize>();
        if me >= nprocs {
            return Err(CommError::InvalidPartition(format!(
                "rank {me} outside grid of {nprocs} processors"
            )));
        }
        let mut grid = Self {
            procgrid,
            splits,
            me,
            myloc: [0; 3],
        };
        grid.myloc = grid.loc_of(me);
        Ok(grid)
    }

    pub fn nprocs(&self) -> usize {
        self.procgrid.iter().product()
    }

    pub fn rank_of(&self, loc: [usize; 3]) -> usize {
        (loc[0] * self.procgrid[1] + loc[1]) * self.procgrid[2] + loc[2]
    }

    pub fn loc_of(&self, rank: usize) -> [usize; 3] {
        let k = rank % self.procgrid[2];
        let j = (rank / self.procgrid[2]) % self.procgrid[1];
        let i = rank / (self.procgrid[1] * self.procgrid[2]);
        [i, j, k]
    }

    /// Rank at grid index `index` along `axis`, sharing my other two indices.
    pub fn proc_along(&self, axis: usize, index: usize) -> usize {
        let mut loc = self.myloc;
        loc[axis] = index;
        self.rank_of(loc)
    }

    /// Neighbor rank below (`dir == 0`) or above (`dir == 1`), wrapping around.
    pub fn neighbor(&self, axis: usize, dir: usize) -> usize {
        let n = self.procgrid[axis];
        let index = if dir == 0 {
            (self.myloc[axis] + n - 1) % n
        } else {
            (self.myloc[axis] + 1) % n
        };
        self.proc_along(axis, index)
    }

    /// Lower and upper coordinate of grid slot `index` along `axis`.
    pub fn slot_bounds(&self, domain: &Domain, axis: usize, index: usize) -> (f64, f64) {
        let s = &self.splits[axis];
        (
            domain.fraction_to_coord(axis, s[index]),
            domain.fraction_to_coord(axis, s[index + 1]),
        )
    }

    /// Sub-box owned by `rank`.
    pub fn bounds_of(&self, domain: &Domain, rank: usize) -> Bounds {
        let loc = self.loc_of(rank);
        let mut b = domain.global_box();
        for d in 0..3 {
            let (lo, hi) = self.slot_bounds(domain, d, loc[d]);
            b.lo[d] = lo;
            b.hi[d] = hi;
        }
        b
    }

    /// Grid of `nprocs` processors minimizing sub-box surface for box lengths `prd`.
    pub fn factor(nprocs: usize, dimension: usize, prd: [f64; 3]) -> Result<[usize; 3], CommError> {
        if nprocs == 0 {
            return Err(CommError::InvalidPartition("no processors".into()));
        }
        let mut best: Option<([usize; 3], f64)> = None;
        for px in (1..=nprocs).filter(|p| nprocs % p == 0) {
            let rest = nprocs / px;
            for py in (1..=rest).filter(|p| rest % p == 0) {
                let pz = rest / py;
                if dimension == 2 && pz != 1 {
                    continue;
                }
                let (a, b, c) = (
                    prd[0] / px as f64,
                    prd[1] / py as f64,
                    prd[2] / pz as f64,
                );
                let surf = if dimension == 2 { a + b } else { a * b + b * c + c * a };
                if best.is_none_or(|(_, s)| surf < s) {
                    best = Some(([px, py, pz], surf));
                }
            }
        }
        best.map(|(g, _)| g)
            .ok_or_else(|| CommError::InvalidPartition(format!("cannot factor {nprocs}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_loc_roundtrip_and_neighbors() {
        let g = ProcGrid::uniform([2, 3, 2], 7).unwrap();
        assert_eq!(g.myloc, [1, 0, 1]);
        assert_eq!(g.rank_of(g.myloc), 7);
        // periodic wrap along y
        assert_eq!(g.neighbor(1, 0), g.rank_of([1, 2, 1]));
        assert_eq!(g.neighbor(1, 1), g.rank_of([1, 1, 1]));
        assert_eq!(g.neighbor(0, 1), g.rank_of([0, 0, 1]));
    }

    #[test]
    fn factor_prefers_cubes() {
        assert_eq!(ProcGrid::factor(8, 3, [1.0; 3]).unwrap(), [2, 2, 2]);
        assert_eq!(ProcGrid::factor(4, 2, [1.0; 3]).unwrap(), [2, 2, 1]);
        assert_eq!(ProcGrid::factor(4, 3, [4.0, 1.0, 1.0]).unwrap(), [4, 1, 1]);
    }

    #[test]
    fn rejects_bad_splits() {
        let splits = [vec![0.0, 0.6, 0.5, 1.0], vec![0.0, 1.0], vec![0.0, 1.0]];
        assert!(ProcGrid::with_splits([3, 1, 1], splits, 0).is_err());
    }

    #[test]
    fn bounds_tile_the_box() {
        let dom = Domain::new(3, [0.0; 3], [3.0, 2.0, 1.0], [true; 3]).unwrap();
        let g = ProcGrid::uniform([3, 2, 1], 0).unwrap();
        let total: f64 = (0..g.nprocs()).map(|p| g.bounds_of(&dom, p).volume(3)).sum();
        assert!((total - 6.0).abs() < 1e-12);
        assert_eq!(g.bounds_of(&dom, g.nprocs() - 1).hi, [3.0, 2.0, 1.0]);
    }
}
