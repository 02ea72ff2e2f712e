mod util;

use ghostcomm::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use util::*;

/// What one rank holds after migration.
struct Migrated {
    sub: Bounds,
    owned: Vec<(u64, [f64; 3])>,
    ghosts: Vec<(u64, [i64; 3])>,
    /// Unwrapped positions before exchange, `x + image * prd`.
    unwrapped_before: Vec<(u64, [i64; 3])>,
    unwrapped_after: Vec<(u64, [i64; 3])>,
    bonds: Vec<(u64, Vec<u64>)>,
}

/// A tag-dependent number of bond partners, so exchange records differ in length.
fn bonds_of(tag: u64) -> Vec<u64> {
    (1..=tag % 7).map(|k| 1000 * tag + k).collect()
}

fn unwrapped(atoms: &Atoms) -> Vec<(u64, [i64; 3])> {
    let mut out: Vec<_> = (0..atoms.nlocal())
        .map(|i| {
            let (x, img) = (atoms.x[i], atoms.image[i]);
            let u = [
                x[0] + f64::from(img[0]),
                x[1] + f64::from(img[1]),
                x[2] + f64::from(img[2]),
            ];
            (atoms.tag[i], quantize(&u))
        })
        .collect();
    out.sort_unstable();
    out
}

fn migrate(
    comm: LocalComm,
    seed: u64,
    max_step: [f64; 3],
    layout: impl Fn(&LocalComm, &Domain) -> (Bounds, OverlapStrategy, Layout),
) -> Migrated {
    let rank = comm.rank();
    let mut dom = unit_box(true);
    let (sub, strategy, kind) = layout(&comm, &dom);
    let mut atoms = owned(&lattice(8), &sub);
    for i in 0..atoms.nlocal() {
        atoms.bonds[i] = bonds_of(atoms.tag[i]);
    }

    let cfg = CommConfig::with_cutoff(0.1).layout(kind);
    let mut tc = TiledComm::new(comm, cfg, strategy).unwrap();
    tc.init(&dom, &atoms, &[]).unwrap();
    tc.setup(&mut dom).unwrap();

    let mut rng = SmallRng::seed_from_u64(seed + rank as u64);
    for i in 0..atoms.nlocal() {
        for d in 0..3 {
            atoms.x[i][d] += rng.gen_range(-max_step[d]..max_step[d]);
        }
    }
    atoms.pbc(&dom);
    let unwrapped_before = unwrapped(&atoms);
    tc.exchange(&mut atoms).unwrap();
    tc.check_atom_count(atoms.nlocal(), 512).unwrap();
    let unwrapped_after = unwrapped(&atoms);
    let bonds = (0..atoms.nlocal()).map(|i| (atoms.tag[i], atoms.bonds[i].clone())).collect();
    tc.borders(&mut atoms).unwrap();

    let n = atoms.nlocal();
    Migrated {
        sub,
        owned: atoms.owned_tags().iter().copied().zip(atoms.x[..n].iter().copied()).collect(),
        ghosts: actual_ghosts(&atoms),
        unwrapped_before,
        unwrapped_after,
        bonds,
    }
}

fn check_conservation(ranks: Vec<Migrated>) {
    let mut tags: Vec<u64> = ranks.iter().flat_map(|m| m.owned.iter().map(|a| a.0)).collect();
    tags.sort_unstable();
    assert_eq!(tags, (1..=512).collect::<Vec<u64>>());

    for (rank, m) in ranks.iter().enumerate() {
        for (tag, x) in &m.owned {
            assert!(m.sub.contains(x), "rank {rank} holds atom {tag} at {x:?}");
        }
    }

    // bonds and image flags travel with their atom
    for m in &ranks {
        for (tag, bonds) in &m.bonds {
            assert_eq!(*bonds, bonds_of(*tag), "atom {tag}");
        }
    }
    let mut before: Vec<_> = ranks.iter().flat_map(|m| m.unwrapped_before.iter().copied()).collect();
    let mut after: Vec<_> = ranks.iter().flat_map(|m| m.unwrapped_after.iter().copied()).collect();
    before.sort_unstable();
    after.sort_unstable();
    assert_eq!(before, after);

    // the halo is rebuilt from the migrated positions
    let sites: Vec<(u64, [f64; 3])> = ranks.iter().flat_map(|m| m.owned.iter().copied()).collect();
    for (rank, m) in ranks.iter().enumerate() {
        assert_eq!(m.ghosts, expected_ghosts(&sites, &m.sub, 0.1), "rank {rank}");
    }
}

#[test]
fn brick_exchange_conserves_atoms() {
    let ranks = run_ranks(8, |comm| {
        migrate(comm, 17, [0.45; 3], |comm, dom| {
            let grid = ProcGrid::uniform([2, 2, 2], comm.rank()).unwrap();
            (grid.bounds_of(dom, comm.rank()), OverlapStrategy::Brick(grid), Layout::Uniform)
        })
    });
    check_conservation(ranks);
}

#[test]
fn rcb_exchange_conserves_atoms() {
    let ranks = run_ranks(3, |comm| {
        migrate(comm, 99, [0.29, 0.5, 0.5], |comm, dom| {
            let rcb = three_slabs();
            let sub = rcb.bounds_of(dom, comm.rank());
            (sub, OverlapStrategy::tiled(rcb, comm.rank()).unwrap(), Layout::Tiled)
        })
    });
    check_conservation(ranks);
}

#[test]
fn repeated_steps_keep_every_atom() {
    let counts = run_ranks(4, |comm| {
        let rank = comm.rank();
        let mut dom = unit_box(true);
        let grid = ProcGrid::uniform([2, 2, 1], rank).unwrap();
        let sub = grid.bounds_of(&dom, rank);
        let mut atoms = owned(&lattice(6), &sub);
        let mut tc = brick_comm(comm, [2, 2, 1], 0.15, &mut dom, &atoms);
        let mut rng = SmallRng::seed_from_u64(rank as u64);
        for _ in 0..5 {
            for i in 0..atoms.nlocal() {
                atoms.v[i] = [
                    rng.gen_range(-0.2..0.2),
                    rng.gen_range(-0.2..0.2),
                    rng.gen_range(-0.2..0.2),
                ];
                for d in 0..3 {
                    atoms.x[i][d] += atoms.v[i][d];
                }
            }
            atoms.pbc(&dom);
            tc.setup(&mut dom).unwrap();
            tc.exchange(&mut atoms).unwrap();
            tc.borders(&mut atoms).unwrap();
            tc.check_atom_count(atoms.nlocal(), 216).unwrap();
        }
        atoms.nlocal()
    });
    assert_eq!(counts.iter().sum::<usize>(), 216);
}

#[test]
fn long_record_crosses_two_axes_with_tight_buffers() {
    let tight = BufferPolicy {
        factor: 1.5,
        min: 4,
        extra: 0,
    };
    let held = run_ranks(4, |comm| {
        let rank = comm.rank();
        let mut dom = unit_box(true);
        let grid = ProcGrid::uniform([2, 2, 1], rank).unwrap();
        let sub = grid.bounds_of(&dom, rank);
        let mut atoms = Atoms::new();
        if sub.contains(&[0.25, 0.25, 0.5]) {
            let i = atoms.add_atom(7, 3, [0.25, 0.25, 0.5]);
            atoms.bonds[i] = (100..150).collect();
            atoms.image[i] = [2, -1, 0];
            // leaves along x and then along y
            atoms.x[i] = [0.75, 0.75, 0.5];
        }
        let mut cfg = CommConfig::with_cutoff(0.1);
        cfg.buffer = tight;
        let mut tc = TiledComm::new(comm, cfg, OverlapStrategy::Brick(grid)).unwrap();
        tc.init(&dom, &atoms, &[]).unwrap();
        tc.setup(&mut dom).unwrap();
        tc.exchange(&mut atoms).unwrap();
        tc.check_atom_count(atoms.nlocal(), 1).unwrap();
        (sub, atoms)
    });

    let owners: Vec<_> = held.iter().filter(|(_, a)| a.nlocal() == 1).collect();
    assert_eq!(owners.len(), 1);
    let (sub, atoms) = owners[0];
    assert!(sub.contains(&[0.75, 0.75, 0.5]));
    assert_eq!(atoms.tag[0], 7);
    assert_eq!(atoms.kind[0], 3);
    assert_eq!(atoms.x[0], [0.75, 0.75, 0.5]);
    assert_eq!(atoms.image[0], [2, -1, 0]);
    assert_eq!(atoms.bonds[0], (100..150).collect::<Vec<u64>>());
}
