mod util;

use ghostcomm::prelude::*;
use util::*;

#[test]
fn brick_lattice_ghosts_match_brute_force() {
    let sites = lattice(10);
    let results = run_ranks(8, |comm| {
        let rank = comm.rank();
        let mut dom = unit_box(true);
        let sub = ProcGrid::uniform([2, 2, 2], rank).unwrap().bounds_of(&dom, rank);
        let mut atoms = owned(&sites, &sub);
        let mut tc = brick_comm(comm, [2, 2, 2], 0.1, &mut dom, &atoms);
        tc.borders(&mut atoms).unwrap();
        (actual_ghosts(&atoms), expected_ghosts(&sites, &sub, 0.1))
    });
    for (rank, (got, want)) in results.into_iter().enumerate() {
        assert_eq!(got.len(), 218, "rank {rank}");
        assert_eq!(got, want, "rank {rank}");
    }
}

#[test]
fn rcb_slab_ghosts_match_brute_force() {
    let sites = lattice(10);
    let results = run_ranks(3, |comm| {
        let rank = comm.rank();
        let mut dom = unit_box(true);
        let sub = three_slabs().bounds_of(&dom, rank);
        let mut atoms = owned(&sites, &sub);
        let mut tc = tiled_comm(comm, three_slabs(), 0.1, &mut dom, &atoms);
        tc.borders(&mut atoms).unwrap();
        (actual_ghosts(&atoms), expected_ghosts(&sites, &sub, 0.1))
    });
    for (rank, (got, want)) in results.into_iter().enumerate() {
        assert!(!got.is_empty());
        assert_eq!(got, want, "rank {rank}");
    }
}

#[test]
fn image_ghosts_at_exactly_the_cutoff_are_kept() {
    // lattice sites sit exactly `cut` past the periodic faces
    let sites = lattice(10);
    let results = run_ranks(5, |comm| {
        let rank = comm.rank();
        let mut dom = unit_box(true);
        let rcb = RcbPartition::bisect(5, 3, dom.prd).unwrap();
        let sub = rcb.bounds_of(&dom, rank);
        let mut atoms = owned(&sites, &sub);
        let mut tc = tiled_comm(comm, rcb, 0.15, &mut dom, &atoms);
        tc.borders(&mut atoms).unwrap();
        (actual_ghosts(&atoms), expected_ghosts(&sites, &sub, 0.15))
    });
    for (rank, (got, want)) in results.into_iter().enumerate() {
        assert_eq!(got, want, "rank {rank}");
    }
}

#[test]
fn bisected_quadrants_cover_halo_in_2d() {
    let sites: Vec<(u64, [f64; 3])> = lattice(12)
        .into_iter()
        .filter(|(_, x)| x[2] < 1.0 / 12.0)
        .map(|(t, x)| (t, [x[0], x[1], 0.0]))
        .collect();
    let results = run_ranks(4, |comm| {
        let rank = comm.rank();
        let mut dom = Domain::new(2, [0.0; 3], [1.0, 1.0, 1.0], [true, true, false]).unwrap();
        let rcb = RcbPartition::bisect(4, 2, dom.prd).unwrap();
        let sub = rcb.bounds_of(&dom, rank);
        let mut atoms = owned(&sites, &sub);
        let mut tc = tiled_comm(comm, rcb, 0.12, &mut dom, &atoms);
        tc.borders(&mut atoms).unwrap();
        let got = actual_ghosts(&atoms);
        // the flat z axis never shifts
        let want: Vec<_> = expected_ghosts(&sites, &sub, 0.12)
            .into_iter()
            .filter(|(_, q)| q[2] == 0)
            .collect();
        (got, want)
    });
    for (rank, (got, want)) in results.into_iter().enumerate() {
        assert_eq!(got, want, "rank {rank}");
    }
}
