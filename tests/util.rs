#![allow(dead_code)]
use ghostcomm::prelude::*;

/// Run `f` on every rank of an in-process world, one thread per rank.
/// Results come back ordered by rank.
pub fn run_ranks<T: Send>(n: usize, f: impl Fn(LocalComm) -> T + Sync) -> Vec<T> {
    let world = LocalComm::world(n);
    let f = &f;
    std::thread::scope(|s| {
        let joins: Vec<_> = world.into_iter().map(|c| s.spawn(move || f(c))).collect();
        joins.into_iter().map(|j| j.join().unwrap()).collect()
    })
}

pub fn unit_box(periodic: bool) -> Domain {
    Domain::new(3, [0.0; 3], [1.0; 3], [periodic; 3]).unwrap()
}

/// Communicator on a uniform brick grid, already set up.
pub fn brick_comm(
    comm: LocalComm,
    procgrid: [usize; 3],
    cutoff: f64,
    domain: &mut Domain,
    atoms: &Atoms,
) -> TiledComm<LocalComm> {
    let grid = ProcGrid::uniform(procgrid, comm.rank()).unwrap();
    let mut tc =
        TiledComm::new(comm, CommConfig::with_cutoff(cutoff), OverlapStrategy::Brick(grid)).unwrap();
    tc.init(domain, atoms, &[]).unwrap();
    tc.setup(domain).unwrap();
    tc
}

/// Communicator on an RCB tiling, already set up.
pub fn tiled_comm(
    comm: LocalComm,
    rcb: RcbPartition,
    cutoff: f64,
    domain: &mut Domain,
    atoms: &Atoms,
) -> TiledComm<LocalComm> {
    let me = comm.rank();
    let cfg = CommConfig::with_cutoff(cutoff).layout(Layout::Tiled);
    let mut tc = TiledComm::new(comm, cfg, OverlapStrategy::tiled(rcb, me).unwrap()).unwrap();
    tc.init(domain, atoms, &[]).unwrap();
    tc.setup(domain).unwrap();
    tc
}

/// Three slabs along x cut at 0.3 and 0.7.
pub fn three_slabs() -> RcbPartition {
    let yz = [0.0, 1.0];
    RcbPartition::from_infos(
        vec![
            RcbInfo::new([[0.0, 0.3], yz, yz], 0, 0.0),
            RcbInfo::new([[0.3, 0.7], yz, yz], 0, 0.3),
            RcbInfo::new([[0.7, 1.0], yz, yz], 0, 0.7),
        ],
        3,
    )
    .unwrap()
}

/// Cubic lattice of `n^3` sites at cell centers; tag = site index + 1.
pub fn lattice(n: usize) -> Vec<(u64, [f64; 3])> {
    let h = 1.0 / n as f64;
    let mut out = Vec::with_capacity(n * n * n);
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let tag = (i * n * n + j * n + k) as u64 + 1;
                out.push((tag, [(i as f64 + 0.5) * h, (j as f64 + 0.5) * h, (k as f64 + 0.5) * h]));
            }
        }
    }
    out
}

/// Atoms of `sites` that lie in `sub`.
pub fn owned(sites: &[(u64, [f64; 3])], sub: &Bounds) -> Atoms {
    let mut atoms = Atoms::new();
    for &(tag, x) in sites {
        if sub.contains(&x) {
            atoms.add_atom(tag, 1, x);
        }
    }
    atoms
}

/// Every periodic image of `sites` within `cut` of `sub` that `sub` does
/// not own, as `(tag, position quantized to 1e-6)`.
pub fn expected_ghosts(sites: &[(u64, [f64; 3])], sub: &Bounds, cut: f64) -> Vec<(u64, [i64; 3])> {
    let mut ext = *sub;
    for d in 0..3 {
        ext.lo[d] -= cut;
        ext.hi[d] += cut;
    }
    let mut out = Vec::new();
    for &(tag, x) in sites {
        for sx in -1..=1 {
            for sy in -1..=1 {
                for sz in -1..=1 {
                    let shift = [sx, sy, sz];
                    let img = [x[0] + sx as f64, x[1] + sy as f64, x[2] + sz as f64];
                    if ext.contains_closed(&img) && !(shift == [0, 0, 0] && sub.contains(&x)) {
                        out.push((tag, quantize(&img)));
                    }
                }
            }
        }
    }
    out.sort_unstable();
    out
}

/// Ghosts actually held, in the same form as [`expected_ghosts`].
pub fn actual_ghosts(atoms: &Atoms) -> Vec<(u64, [i64; 3])> {
    let n = atoms.nlocal();
    let mut out: Vec<_> = atoms.ghost_tags()
        .iter()
        .zip(&atoms.x[n..])
        .map(|(&t, x)| (t, quantize(x)))
        .collect();
    out.sort_unstable();
    out
}

pub fn quantize(x: &[f64; 3]) -> [i64; 3] {
    [
        (x[0] * 1e6).round() as i64,
        (x[1] * 1e6).round() as i64,
        (x[2] * 1e6).round() as i64,
    ]
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
