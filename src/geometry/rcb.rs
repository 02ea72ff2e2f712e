//! Recursive coordinate bisection (RCB) tiling descriptors.
//!
//! Every rank owns one [`RcbInfo`]: its sub-box as fractions of the global
//! box plus the cut that separated it from its lower sibling when the tree
//! was built. The tree is implicit in rank numbering: a node covering ranks
//! `lo..=hi` splits at `procmid = lo + (hi - lo) / 2 + 1`, and the cut of
//! that node is stored on rank `procmid`.

use bytemuck::{Pod, Zeroable};
use itertools::Itertools;
use static_assertions::const_assert_eq;

use crate::algs::communicator::{Communicator, all_gather_bytes, tags};
use crate::algs::wire::{cast_slice, cast_slice_mut};
use crate::comm_error::CommError;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{Bounds, Domain};

/// Per-rank bisection record, exchanged verbatim between ranks.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RcbInfo {
    /// `[lo, hi]` fractions of the global box per axis.
    pub mysplit: [[f64; 2]; 3],
    /// Fraction of the global box where the cut stored on this rank lies.
    pub cutfrac: f64,
    /// Axis of that cut.
    pub dim: u32,
    pub _pad: u32,
}

const_assert_eq!(std::mem::size_of::<RcbInfo>(), 64);

impl RcbInfo {
    pub fn new(mysplit: [[f64; 2]; 3], dim: usize, cutfrac: f64) -> Self {
        Self {
            mysplit,
            cutfrac,
            dim: dim as u32,
            _pad: 0,
        }
    }

    #[inline]
    pub fn cut_dim(&self) -> usize {
        self.dim as usize
    }
}

/// Midpoint rank of the bisection node covering `lo..=hi`.
#[inline]
pub fn procmid(lo: usize, hi: usize) -> usize {
    lo + (hi - lo) / 2 + 1
}

/// The bisection records of every rank, indexed by rank.
#[derive(Clone, Debug, PartialEq)]
pub struct RcbPartition {
    infos: Vec<RcbInfo>,
    dimension: usize,
}

impl RcbPartition {
    /// Build from the records of all ranks and check that they tile the box.
    pub fn from_infos(infos: Vec<RcbInfo>, dimension: usize) -> Result<Self, CommError> {
        if dimension != 2 && dimension != 3 {
            return Err(CommError::InvalidDimension(dimension));
        }
        if infos.is_empty() {
            return Err(CommError::InvalidPartition("no tiles".into()));
        }
        let part = Self { infos, dimension };
        part.validate_invariants()?;
        Ok(part)
    }

    /// All-gather every rank's record.
    pub fn gather<C: Communicator>(
        comm: &C,
        mine: RcbInfo,
        dimension: usize,
    ) -> Result<Self, CommError> {
        let gathered = all_gather_bytes(comm, tags::GATHER, cast_slice(std::slice::from_ref(&mine)))?;
        let infos = gathered
            .iter()
            .enumerate()
            .map(|(p, bytes)| {
                let mut info = RcbInfo::default();
                let dst = cast_slice_mut(std::slice::from_mut(&mut info));
                if dst.len() != bytes.len() {
                    return Err(CommError::MessageSize {
                        neighbor: p,
                        expected: dst.len(),
                        got: bytes.len(),
                    });
                }
                dst.copy_from_slice(bytes);
                Ok(info)
            })
            .collect::<Result<Vec<_>, CommError>>()?;
        Self::from_infos(infos, dimension)
    }

    /// Bisect the box for `nprocs` ranks, always cutting the physically
    /// longest side of the current region in proportion to the rank counts
    /// on either side.
    pub fn bisect(nprocs: usize, dimension: usize, prd: [f64; 3]) -> Result<Self, CommError> {
        if nprocs == 0 {
            return Err(CommError::InvalidPartition("no processors".into()));
        }
        let mut infos = vec![RcbInfo::default(); nprocs];
        bisect_recurse(&mut infos, 0, nprocs - 1, [[0.0, 1.0]; 3], dimension, &prd);
        Self::from_infos(infos, dimension)
    }

    pub fn nprocs(&self) -> usize {
        self.infos.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn info(&self, proc: usize) -> &RcbInfo {
        &self.infos[proc]
    }

    pub fn infos(&self) -> &[RcbInfo] {
        &self.infos
    }

    /// Sub-box of `proc` in coordinates.
    pub fn bounds_of(&self, domain: &Domain, proc: usize) -> Bounds {
        domain.split_bounds(&self.infos[proc].mysplit)
    }

    /// Check that every internal node's cut separates its two halves.
    fn check_tree(&self, lo: usize, hi: usize) -> Result<(), CommError> {
        if lo == hi {
            return Ok(());
        }
        let mid = procmid(lo, hi);
        let node = &self.infos[mid];
        let dim = node.cut_dim();
        if dim >= self.dimension {
            return Err(CommError::InvalidPartition(format!(
                "rank {mid} cuts along axis {dim} in {}-d",
                self.dimension
            )));
        }
        if let Some(p) = (lo..mid).find(|&p| self.infos[p].mysplit[dim][1] > node.cutfrac) {
            return Err(CommError::InvalidPartition(format!(
                "rank {p} extends past the cut {} stored on rank {mid}",
                node.cutfrac
            )));
        }
        if let Some(p) = (mid..=hi).find(|&p| self.infos[p].mysplit[dim][0] < node.cutfrac) {
            return Err(CommError::InvalidPartition(format!(
                "rank {p} starts below the cut {} stored on rank {mid}",
                node.cutfrac
            )));
        }
        self.check_tree(lo, mid - 1)?;
        self.check_tree(mid, hi)
    }
}

fn bisect_recurse(
    infos: &mut [RcbInfo],
    lo: usize,
    hi: usize,
    region: [[f64; 2]; 3],
    dimension: usize,
    prd: &[f64; 3],
) {
    if lo == hi {
        infos[lo].mysplit = region;
        return;
    }
    let mid = procmid(lo, hi);
    let dim = (0..dimension)
        .max_by(|&a, &b| {
            let la = (region[a][1] - region[a][0]) * prd[a];
            let lb = (region[b][1] - region[b][0]) * prd[b];
            la.total_cmp(&lb).then(b.cmp(&a))
        })
        .unwrap_or(0);
    let share = (mid - lo) as f64 / (hi - lo + 1) as f64;
    let cutfrac = region[dim][0] + (region[dim][1] - region[dim][0]) * share;
    infos[mid].dim = dim as u32;
    infos[mid].cutfrac = cutfrac;

    let mut lower = region;
    lower[dim][1] = cutfrac;
    let mut upper = region;
    upper[dim][0] = cutfrac;
    bisect_recurse(infos, lo, mid - 1, lower, dimension, prd);
    bisect_recurse(infos, mid, hi, upper, dimension, prd);
}

impl DebugInvariants for RcbPartition {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "RcbPartition invalid");
    }

    fn validate_invariants(&self) -> Result<(), CommError> {
        let dim = self.dimension;
        for (p, info) in self.infos.iter().enumerate() {
            if (0..dim).any(|d| {
                let [lo, hi] = info.mysplit[d];
                !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || !(lo < hi)
            }) {
                return Err(CommError::InvalidPartition(format!(
                    "rank {p} has split {:?}",
                    info.mysplit
                )));
            }
        }

        let unit = Domain::new(dim, [0.0; 3], [1.0; 3], [false; 3])?;
        let boxes: Vec<Bounds> = self.infos.iter().map(|i| unit.split_bounds(&i.mysplit)).collect();
        if let Some((a, b)) = (0..boxes.len())
            .tuple_combinations()
            .find(|&(a, b)| boxes[a].overlaps(&boxes[b], dim))
        {
            return Err(CommError::InvalidPartition(format!(
                "tiles of ranks {a} and {b} overlap"
            )));
        }
        let covered: f64 = boxes.iter().map(|b| b.volume(dim)).sum();
        if (covered - 1.0).abs() > 1e-9 {
            return Err(CommError::InvalidPartition(format!(
                "tiles cover {covered} of the box"
            )));
        }

        self.check_tree(0, self.infos.len() - 1)
    }
}
