//! Geometric overlap resolver.
//!
//! Maps a ghost slab to the ranks whose sub-boxes it overlaps, and a
//! migrating point to the single rank that should own it. The layout is
//! chosen once at setup: a brick grid walks outward from the local grid
//! index, an RCB tiling recurses over its implicit bisection tree.

use crate::comm_error::CommError;
use crate::geometry::rcb::procmid;
use crate::geometry::{Bounds, Domain, ProcGrid, RcbPartition};

/// Overlap queries for one processor layout.
#[derive(Clone, Debug, PartialEq)]
pub enum OverlapStrategy {
    Brick(ProcGrid),
    Tiled { rcb: RcbPartition, me: usize },
}

impl OverlapStrategy {
    pub fn tiled(rcb: RcbPartition, me: usize) -> Result<Self, CommError> {
        if me >= rcb.nprocs() {
            return Err(CommError::OwnerNotFound { axis: 0, rank: me });
        }
        Ok(OverlapStrategy::Tiled { rcb, me })
    }

    pub fn me(&self) -> usize {
        match self {
            OverlapStrategy::Brick(grid) => grid.me,
            OverlapStrategy::Tiled { me, .. } => *me,
        }
    }

    pub fn nprocs(&self) -> usize {
        match self {
            OverlapStrategy::Brick(grid) => grid.nprocs(),
            OverlapStrategy::Tiled { rcb, .. } => rcb.nprocs(),
        }
    }

    pub fn is_tiled(&self) -> bool {
        matches!(self, OverlapStrategy::Tiled { .. })
    }

    /// Copy the calling rank's sub-box from the layout into `domain`.
    pub fn apply_subdomain(&self, domain: &mut Domain) -> Result<(), CommError> {
        let sub = self.box_other(domain, 0, self.me())?;
        domain.set_subdomain(sub);
        Ok(())
    }

    /// Append every rank whose sub-box overlaps `slab` to `out`.
    ///
    /// `slab` is a ghost slab extruded along `idim`. Returns the position of
    /// the calling rank in `out` if it was appended.
    pub fn box_drop(
        &self,
        domain: &Domain,
        idim: usize,
        slab: &Bounds,
        out: &mut Vec<usize>,
    ) -> Result<Option<usize>, CommError> {
        match self {
            OverlapStrategy::Brick(grid) => box_drop_brick(grid, domain, idim, slab, out),
            OverlapStrategy::Tiled { rcb, me } => {
                let mut indexme = None;
                box_drop_tiled(rcb, domain, slab, 0, rcb.nprocs() - 1, *me, out, &mut indexme);
                Ok(indexme)
            }
        }
    }

    /// Sub-box owned by `proc`.
    pub fn box_other(&self, domain: &Domain, idim: usize, proc: usize) -> Result<Bounds, CommError> {
        if proc >= self.nprocs() {
            return Err(CommError::OwnerNotFound { axis: idim, rank: proc });
        }
        Ok(match self {
            OverlapStrategy::Brick(grid) => grid.bounds_of(domain, proc),
            OverlapStrategy::Tiled { rcb, .. } => rcb.bounds_of(domain, proc),
        })
    }

    /// Whether `proc` shares my face along `idim` on side `idir` (0 = low,
    /// 1 = high), counting periodic wraparound.
    pub fn box_touch(&self, proc: usize, idim: usize, idir: usize) -> bool {
        match self {
            OverlapStrategy::Brick(grid) => grid.neighbor(idim, idir) == proc,
            OverlapStrategy::Tiled { rcb, me } => {
                let other = rcb.info(proc).mysplit[idim];
                let mine = rcb.info(*me).mysplit[idim];
                if idir == 0 {
                    other[1] == mine[0] || (other[1] == 1.0 && mine[0] == 0.0)
                } else {
                    other[0] == mine[1] || (other[0] == 0.0 && mine[1] == 1.0)
                }
            }
        }
    }

    /// `true` if `x` is nearer my high face than my low face along `idim`,
    /// measuring across the periodic boundary when my face lies on it.
    pub fn closer_subbox_edge(domain: &Domain, idim: usize, x: &[f64; 3]) -> bool {
        let deltalo = if domain.sublo[idim] == domain.boxlo[idim] {
            (x[idim] - domain.prd[idim] - domain.sublo[idim]).abs()
        } else {
            (x[idim] - domain.sublo[idim]).abs()
        };
        let deltahi = if domain.subhi[idim] == domain.boxhi[idim] {
            (x[idim] + domain.prd[idim] - domain.subhi[idim]).abs()
        } else {
            (x[idim] - domain.subhi[idim]).abs()
        };
        deltalo >= deltahi
    }

    /// Rank that should receive a point which left my sub-box along `idim`.
    ///
    /// Brick layouts hand the point to the nearer face neighbor. Tiled
    /// layouts pull the coordinates of not-yet-exchanged axes into my
    /// sub-box and search the tree; a result that only abuts my high face on
    /// such an axis is ambiguous, so the point is nudged inward by
    /// `epsilon` times my sub-box length and searched again, at most
    /// `retries` times.
    pub fn point_drop(
        &self,
        domain: &Domain,
        idim: usize,
        x: &[f64; 3],
        epsilon: f64,
        retries: usize,
    ) -> usize {
        match self {
            OverlapStrategy::Brick(grid) => {
                let dir = usize::from(Self::closer_subbox_edge(domain, idim, x));
                grid.neighbor(idim, dir)
            }
            OverlapStrategy::Tiled { rcb, me } => {
                let me = *me;
                let higher = idim + 1..domain.dimension;
                let mut xnew = *x;
                for d in higher.clone() {
                    if xnew[d] < domain.sublo[d] || xnew[d] > domain.subhi[d] {
                        xnew[d] = if Self::closer_subbox_edge(domain, d, x) {
                            domain.subhi[d]
                        } else {
                            domain.sublo[d]
                        };
                    }
                }

                let mut proc = point_drop_tiled(rcb, domain, &xnew, 0, rcb.nprocs() - 1);
                for _ in 0..retries {
                    if proc == me {
                        break;
                    }
                    let mut nudged = false;
                    for d in higher.clone() {
                        if rcb.info(proc).mysplit[d][0] == rcb.info(me).mysplit[d][1] {
                            xnew[d] -= epsilon * (domain.subhi[d] - domain.sublo[d]);
                            nudged = true;
                        }
                    }
                    if !nudged {
                        break;
                    }
                    proc = point_drop_tiled(rcb, domain, &xnew, 0, rcb.nprocs() - 1);
                }
                proc
            }
        }
    }
}

fn box_drop_brick(
    grid: &ProcGrid,
    domain: &Domain,
    idim: usize,
    slab: &Bounds,
    out: &mut Vec<usize>,
) -> Result<Option<usize>, CommError> {
    let n = grid.procgrid[idim] as isize;
    let here = grid.myloc[idim] as isize;
    // walk away from the face the slab was extruded from
    let (mut index, dir) = if slab.hi[idim] == domain.sublo[idim] {
        (here - 1, -1)
    } else if slab.lo[idim] == domain.subhi[idim] {
        (here + 1, 1)
    } else if slab.hi[idim] == domain.boxhi[idim] {
        (n - 1, -1)
    } else if slab.lo[idim] == domain.boxlo[idim] {
        (0, 1)
    } else {
        return Err(CommError::BoxDropMismatch { axis: idim });
    };

    let mut indexme = None;
    while (0..n).contains(&index) {
        let (lower, upper) = grid.slot_bounds(domain, idim, index as usize);
        if lower >= slab.hi[idim] || upper <= slab.lo[idim] {
            break;
        }
        let proc = grid.proc_along(idim, index as usize);
        if proc == grid.me {
            indexme = Some(out.len());
        }
        out.push(proc);
        index += dir;
    }
    Ok(indexme)
}

#[allow(clippy::too_many_arguments)]
fn box_drop_tiled(
    rcb: &RcbPartition,
    domain: &Domain,
    slab: &Bounds,
    proclower: usize,
    procupper: usize,
    me: usize,
    out: &mut Vec<usize>,
    indexme: &mut Option<usize>,
) {
    if proclower == procupper {
        if proclower == me {
            *indexme = Some(out.len());
        }
        out.push(proclower);
        return;
    }
    let mid = procmid(proclower, procupper);
    let node = rcb.info(mid);
    let dim = node.cut_dim();
    let cut = domain.fraction_to_coord(dim, node.cutfrac);
    if slab.lo[dim] < cut {
        box_drop_tiled(rcb, domain, slab, proclower, mid - 1, me, out, indexme);
    }
    if slab.hi[dim] > cut {
        box_drop_tiled(rcb, domain, slab, mid, procupper, me, out, indexme);
    }
}

fn point_drop_tiled(
    rcb: &RcbPartition,
    domain: &Domain,
    x: &[f64; 3],
    proclower: usize,
    procupper: usize,
) -> usize {
    if proclower == procupper {
        return proclower;
    }
    let mid = procmid(proclower, procupper);
    let node = rcb.info(mid);
    let dim = node.cut_dim();
    if x[dim] < domain.fraction_to_coord(dim, node.cutfrac) {
        point_drop_tiled(rcb, domain, x, proclower, mid - 1)
    } else {
        point_drop_tiled(rcb, domain, x, mid, procupper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RcbInfo;
    use proptest::prelude::*;

    fn unit(periodic: bool) -> Domain {
        Domain::new(3, [0.0; 3], [1.0; 3], [periodic; 3]).unwrap()
    }

    fn three_slabs(me: usize) -> OverlapStrategy {
        let yz = [0.0, 1.0];
        let rcb = RcbPartition::from_infos(
            vec![
                RcbInfo::new([[0.0, 0.3], yz, yz], 0, 0.0),
                RcbInfo::new([[0.3, 0.7], yz, yz], 0, 0.3),
                RcbInfo::new([[0.7, 1.0], yz, yz], 0, 0.7),
            ],
            3,
        )
        .unwrap();
        OverlapStrategy::tiled(rcb, me).unwrap()
    }

    #[test]
    fn tiled_drop_returns_lower_two_in_tree_order() {
        let strat = three_slabs(2);
        let mut dom = unit(true);
        strat.apply_subdomain(&mut dom).unwrap();
        let slab = Bounds::new([0.25, 0.0, 0.0], [0.35, 1.0, 1.0]);
        let mut out = Vec::new();
        let indexme = strat.box_drop(&dom, 0, &slab, &mut out).unwrap();
        assert_eq!(out, vec![0, 1]);
        assert_eq!(indexme, None);
    }

    #[test]
    fn tiled_drop_records_self() {
        let strat = three_slabs(1);
        let dom = unit(true);
        let slab = Bounds::new([0.6, 0.0, 0.0], [0.75, 1.0, 1.0]);
        let mut out = Vec::new();
        assert_eq!(strat.box_drop(&dom, 0, &slab, &mut out).unwrap(), Some(0));
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn brick_walk_stops_at_first_gap() {
        // four ranks along x, I am the second one: sub-box [0.25, 0.5)
        let grid = ProcGrid::uniform([4, 1, 1], 1).unwrap();
        let strat = OverlapStrategy::Brick(grid);
        let mut dom = unit(true);
        strat.apply_subdomain(&mut dom).unwrap();

        // upward slab deep enough to reach two ranks
        let slab = Bounds::new([0.5, 0.0, 0.0], [0.8, 1.0, 1.0]);
        let mut out = Vec::new();
        strat.box_drop(&dom, 0, &slab, &mut out).unwrap();
        assert_eq!(out, vec![2, 3]);

        // periodic image slab on the far side of the box
        let slab = Bounds::new([0.9, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let mut out = Vec::new();
        strat.box_drop(&dom, 0, &slab, &mut out).unwrap();
        assert_eq!(out, vec![3]);
    }

    #[test]
    fn brick_walk_rejects_floating_slab() {
        let strat = OverlapStrategy::Brick(ProcGrid::uniform([4, 1, 1], 1).unwrap());
        let mut dom = unit(true);
        strat.apply_subdomain(&mut dom).unwrap();
        let slab = Bounds::new([0.6, 0.0, 0.0], [0.7, 1.0, 1.0]);
        assert_eq!(
            strat.box_drop(&dom, 0, &slab, &mut Vec::new()),
            Err(CommError::BoxDropMismatch { axis: 0 })
        );
    }

    #[test]
    fn touch_counts_periodic_wrap() {
        let strat = three_slabs(0);
        assert!(strat.box_touch(1, 0, 1));
        assert!(strat.box_touch(2, 0, 0));
        assert!(!strat.box_touch(2, 0, 1));
        assert!(!strat.box_touch(1, 0, 0));
    }

    #[test]
    fn brick_point_goes_to_nearer_face() {
        let strat = OverlapStrategy::Brick(ProcGrid::uniform([2, 1, 1], 0).unwrap());
        let mut dom = unit(false);
        strat.apply_subdomain(&mut dom).unwrap();
        // on the shared face: belongs to the upper rank
        assert_eq!(strat.point_drop(&dom, 0, &[0.5, 0.5, 0.5], 1e-6, 2), 1);
    }

    #[test]
    fn tiled_point_nudged_off_ambiguous_face() {
        // ranks 0 and 1 split the bottom half in x, rank 2 owns the top half
        let rcb = RcbPartition::from_infos(
            vec![
                RcbInfo::new([[0.0, 0.5], [0.0, 0.5], [0.0, 1.0]], 0, 0.0),
                RcbInfo::new([[0.5, 1.0], [0.0, 0.5], [0.0, 1.0]], 0, 0.5),
                RcbInfo::new([[0.0, 1.0], [0.5, 1.0], [0.0, 1.0]], 1, 0.5),
            ],
            3,
        )
        .unwrap();
        let strat = OverlapStrategy::tiled(rcb, 1).unwrap();
        let mut dom = unit(true);
        strat.apply_subdomain(&mut dom).unwrap();
        // left through the periodic x face with y above my top face: y is
        // clamped onto the face shared with rank 2, then nudged below it
        let x = [0.01, 0.75, 0.5];
        assert_eq!(strat.point_drop(&dom, 0, &x, 1e-6, 2), 0);
        // without retries the clamped point stays with rank 2
        assert_eq!(strat.point_drop(&dom, 0, &x, 1e-6, 0), 2);
    }

    proptest! {
        #[test]
        fn tiled_drop_is_exact(
            n in 2usize..16,
            lo in prop::array::uniform3(0.0f64..0.9),
            ext in prop::array::uniform3(0.01f64..0.5),
        ) {
            let dom = unit(true);
            let rcb = RcbPartition::bisect(n, 3, [1.0, 1.3, 0.7]).unwrap();
            let strat = OverlapStrategy::tiled(rcb, 0).unwrap();
            let hi = [0, 1, 2].map(|d| (lo[d] + ext[d]).min(1.0));
            let slab = Bounds::new(lo, hi);
            let mut got = Vec::new();
            strat.box_drop(&dom, 0, &slab, &mut got).unwrap();
            got.sort_unstable();
            let want: Vec<usize> = (0..n)
                .filter(|&p| strat.box_other(&dom, 0, p).unwrap().overlaps(&slab, 3))
                .collect();
            prop_assert_eq!(got, want);
        }

        #[test]
        fn tiled_point_has_one_owner(
            n in 1usize..16,
            x in prop::array::uniform3(0.0f64..1.0),
        ) {
            let dom = unit(true);
            let rcb = RcbPartition::bisect(n, 3, [1.0; 3]).unwrap();
            let strat = OverlapStrategy::tiled(rcb, 0).unwrap();
            let owner = strat.point_drop(&dom, 2, &x, 1e-6, 2);
            let owners: Vec<usize> = (0..n)
                .filter(|&p| strat.box_other(&dom, 2, p).unwrap().contains(&x))
                .collect();
            prop_assert_eq!(owners, vec![owner]);
        }
    }
}
