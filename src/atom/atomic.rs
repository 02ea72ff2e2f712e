//! Reference point-particle storage: tag, type, mask, image flags,
//! position, velocity, force, and a variable-length list of bond partner
//! tags per owned atom.

use crate::atom::{AtomVec, PbcImage};
use crate::geometry::Domain;

/// Fixed part of an exchange record: len, x, v, tag, type, mask, image, nbond.
const EXCHANGE_FIXED: usize = 14;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Atoms {
    pub tag: Vec<u64>,
    pub kind: Vec<i32>,
    pub mask: Vec<i32>,
    pub image: Vec<[i32; 3]>,
    pub x: Vec<[f64; 3]>,
    pub v: Vec<[f64; 3]>,
    pub f: Vec<[f64; 3]>,
    /// Bond partner tags; empty for ghosts.
    pub bonds: Vec<Vec<u64>>,
    nlocal: usize,
    nghost: usize,
}

impl Atoms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an owned atom. Ghosts, if any, are discarded first.
    pub fn add_atom(&mut self, tag: u64, kind: i32, x: [f64; 3]) -> usize {
        self.set_nghost(0);
        self.tag.push(tag);
        self.kind.push(kind);
        self.mask.push(1);
        self.image.push([0; 3]);
        self.x.push(x);
        self.v.push([0.0; 3]);
        self.f.push([0.0; 3]);
        self.bonds.push(Vec::new());
        self.nlocal += 1;
        self.nlocal - 1
    }

    /// Wrap owned atoms back into the periodic box.
    pub fn pbc(&mut self, domain: &Domain) {
        for i in 0..self.nlocal {
            domain.remap(&mut self.x[i], &mut self.image[i]);
        }
    }

    pub fn len(&self) -> usize {
        self.nlocal + self.nghost
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags of owned atoms.
    pub fn owned_tags(&self) -> &[u64] {
        &self.tag[..self.nlocal]
    }

    /// Tags of ghost atoms.
    pub fn ghost_tags(&self) -> &[u64] {
        &self.tag[self.nlocal..]
    }

    fn insert_owned(&mut self, at: usize, atom: OwnedAtom) {
        self.tag.insert(at, atom.tag);
        self.kind.insert(at, atom.kind);
        self.mask.insert(at, atom.mask);
        self.image.insert(at, atom.image);
        self.x.insert(at, atom.x);
        self.v.insert(at, atom.v);
        self.f.insert(at, [0.0; 3]);
        self.bonds.insert(at, atom.bonds);
    }
}

struct OwnedAtom {
    tag: u64,
    kind: i32,
    mask: i32,
    image: [i32; 3],
    x: [f64; 3],
    v: [f64; 3],
    bonds: Vec<u64>,
}

#[inline]
fn put3(buf: &mut [f64], at: usize, v: &[f64; 3]) {
    buf[at..at + 3].copy_from_slice(v);
}

#[inline]
fn get3(buf: &[f64], at: usize) -> [f64; 3] {
    [buf[at], buf[at + 1], buf[at + 2]]
}

impl AtomVec for Atoms {
    fn size_forward(&self) -> usize {
        3
    }
    fn size_reverse(&self) -> usize {
        3
    }
    fn size_border(&self) -> usize {
        6
    }
    fn size_velocity(&self) -> usize {
        3
    }
    fn comm_x_only(&self) -> bool {
        true
    }
    fn comm_f_only(&self) -> bool {
        true
    }

    fn nlocal(&self) -> usize {
        self.nlocal
    }
    fn nghost(&self) -> usize {
        self.nghost
    }

    fn set_nghost(&mut self, nghost: usize) {
        let n = self.nlocal + nghost;
        self.tag.resize(n, 0);
        self.kind.resize(n, 0);
        self.mask.resize(n, 0);
        self.image.resize(n, [0; 3]);
        self.x.resize(n, [0.0; 3]);
        self.v.resize(n, [0.0; 3]);
        self.f.resize(n, [0.0; 3]);
        self.bonds.resize(n, Vec::new());
        self.nghost = nghost;
    }

    fn x(&self) -> &[[f64; 3]] {
        &self.x
    }
    fn x_mut(&mut self) -> &mut [[f64; 3]] {
        &mut self.x
    }
    fn f(&self) -> &[[f64; 3]] {
        &self.f
    }
    fn f_mut(&mut self) -> &mut [[f64; 3]] {
        &mut self.f
    }

    fn pack_comm(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize {
        for (k, &j) in list.iter().enumerate() {
            put3(buf, 3 * k, &image.apply(&self.x[j]));
        }
        3 * list.len()
    }

    fn pack_comm_vel(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize {
        for (k, &j) in list.iter().enumerate() {
            put3(buf, 6 * k, &image.apply(&self.x[j]));
            put3(buf, 6 * k + 3, &self.v[j]);
        }
        6 * list.len()
    }

    fn unpack_comm(&mut self, n: usize, first: usize, buf: &[f64]) {
        for k in 0..n {
            self.x[first + k] = get3(buf, 3 * k);
        }
    }

    fn unpack_comm_vel(&mut self, n: usize, first: usize, buf: &[f64]) {
        for k in 0..n {
            self.x[first + k] = get3(buf, 6 * k);
            self.v[first + k] = get3(buf, 6 * k + 3);
        }
    }

    fn pack_reverse(&self, n: usize, first: usize, buf: &mut [f64]) -> usize {
        for k in 0..n {
            put3(buf, 3 * k, &self.f[first + k]);
        }
        3 * n
    }

    fn unpack_reverse(&mut self, list: &[usize], buf: &[f64]) {
        for (k, &j) in list.iter().enumerate() {
            let df = get3(buf, 3 * k);
            for d in 0..3 {
                self.f[j][d] += df[d];
            }
        }
    }

    fn pack_border(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize {
        for (k, &j) in list.iter().enumerate() {
            let m = 6 * k;
            put3(buf, m, &image.apply(&self.x[j]));
            buf[m + 3] = self.tag[j] as f64;
            buf[m + 4] = f64::from(self.kind[j]);
            buf[m + 5] = f64::from(self.mask[j]);
        }
        6 * list.len()
    }

    fn pack_border_vel(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize {
        for (k, &j) in list.iter().enumerate() {
            let m = 9 * k;
            put3(buf, m, &image.apply(&self.x[j]));
            buf[m + 3] = self.tag[j] as f64;
            buf[m + 4] = f64::from(self.kind[j]);
            buf[m + 5] = f64::from(self.mask[j]);
            put3(buf, m + 6, &self.v[j]);
        }
        9 * list.len()
    }

    fn unpack_border(&mut self, n: usize, first: usize, buf: &[f64]) {
        for k in 0..n {
            let (m, i) = (6 * k, first + k);
            self.x[i] = get3(buf, m);
            self.tag[i] = buf[m + 3] as u64;
            self.kind[i] = buf[m + 4] as i32;
            self.mask[i] = buf[m + 5] as i32;
        }
    }

    fn unpack_border_vel(&mut self, n: usize, first: usize, buf: &[f64]) {
        for k in 0..n {
            let (m, i) = (9 * k, first + k);
            self.x[i] = get3(buf, m);
            self.tag[i] = buf[m + 3] as u64;
            self.kind[i] = buf[m + 4] as i32;
            self.mask[i] = buf[m + 5] as i32;
            self.v[i] = get3(buf, m + 6);
        }
    }

    fn pack_exchange(&self, i: usize, buf: &mut [f64]) -> usize {
        let bonds = &self.bonds[i];
        let len = self.exchange_size(i);
        buf[0] = len as f64;
        put3(buf, 1, &self.x[i]);
        put3(buf, 4, &self.v[i]);
        buf[7] = self.tag[i] as f64;
        buf[8] = f64::from(self.kind[i]);
        buf[9] = f64::from(self.mask[i]);
        for d in 0..3 {
            buf[10 + d] = f64::from(self.image[i][d]);
        }
        buf[13] = bonds.len() as f64;
        for (k, &b) in bonds.iter().enumerate() {
            buf[EXCHANGE_FIXED + k] = b as f64;
        }
        len
    }

    fn exchange_size(&self, i: usize) -> usize {
        EXCHANGE_FIXED + self.bonds[i].len()
    }

    fn max_exchange(&self) -> usize {
        EXCHANGE_FIXED + self.bonds[..self.nlocal].iter().map(Vec::len).max().unwrap_or(0)
    }

    fn remove_and_compact(&mut self, i: usize) {
        let last = self.nlocal - 1;
        self.tag.swap(i, last);
        self.kind.swap(i, last);
        self.mask.swap(i, last);
        self.image.swap(i, last);
        self.x.swap(i, last);
        self.v.swap(i, last);
        self.f.swap(i, last);
        self.bonds.swap(i, last);
        self.tag.remove(last);
        self.kind.remove(last);
        self.mask.remove(last);
        self.image.remove(last);
        self.x.remove(last);
        self.v.remove(last);
        self.f.remove(last);
        self.bonds.remove(last);
        self.nlocal -= 1;
    }

    fn append_from_buffer(&mut self, buf: &[f64]) -> usize {
        let len = buf[0] as usize;
        let nbond = buf[13] as usize;
        let atom = OwnedAtom {
            x: get3(buf, 1),
            v: get3(buf, 4),
            tag: buf[7] as u64,
            kind: buf[8] as i32,
            mask: buf[9] as i32,
            image: [buf[10] as i32, buf[11] as i32, buf[12] as i32],
            bonds: buf[EXCHANGE_FIXED..EXCHANGE_FIXED + nbond]
                .iter()
                .map(|&b| b as u64)
                .collect(),
        };
        self.insert_owned(self.nlocal, atom);
        self.nlocal += 1;
        len
    }

    fn memory_usage(&self) -> usize {
        let per_atom = std::mem::size_of::<u64>()
            + 2 * std::mem::size_of::<i32>()
            + std::mem::size_of::<[i32; 3]>()
            + 3 * std::mem::size_of::<[f64; 3]>()
            + std::mem::size_of::<Vec<u64>>();
        per_atom * self.x.capacity()
            + self
                .bonds
                .iter()
                .map(|b| b.capacity() * std::mem::size_of::<u64>())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_atoms() -> Atoms {
        let mut a = Atoms::new();
        a.add_atom(10, 1, [0.1, 0.2, 0.3]);
        a.add_atom(11, 2, [0.4, 0.5, 0.6]);
        a.bonds[1] = vec![10, 42];
        a.v[1] = [1.0, 2.0, 3.0];
        a
    }

    #[test]
    fn exchange_record_moves_bonds_and_images() {
        let mut a = two_atoms();
        a.image[1] = [1, -1, 0];
        let mut buf = vec![0.0; 64];
        let n = a.pack_exchange(1, &mut buf);
        assert_eq!(n, 16);
        assert_eq!(a.max_exchange(), 16);
        assert_eq!(a.exchange_size(0), 14);
        assert_eq!(a.exchange_size(1), 16);

        a.remove_and_compact(1);
        assert_eq!(a.nlocal(), 1);

        let mut b = Atoms::new();
        assert_eq!(b.append_from_buffer(&buf), 16);
        assert_eq!(b.owned_tags(), &[11]);
        assert_eq!(b.bonds[0], vec![10, 42]);
        assert_eq!(b.image[0], [1, -1, 0]);
        assert_eq!(b.v[0], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn remove_moves_last_owned_into_hole() {
        let mut a = two_atoms();
        a.add_atom(12, 1, [0.7, 0.8, 0.9]);
        a.remove_and_compact(0);
        assert_eq!(a.owned_tags(), &[12, 11]);
        assert_eq!(a.x[0], [0.7, 0.8, 0.9]);
    }

    #[test]
    fn border_shifts_positions_and_fills_ghost_slots() {
        let mut a = two_atoms();
        let dom = Domain::new(3, [0.0; 3], [1.0; 3], [true; 3]).unwrap();
        let img = PbcImage::new([1, 0, 0], &dom);
        let mut buf = vec![0.0; 12];
        assert_eq!(a.pack_border(&[0, 1], &mut buf, &img), 12);
        a.set_nghost(2);
        a.unpack_border(2, 2, &buf);
        assert_eq!(a.ghost_tags(), &[10, 11]);
        assert_eq!(a.x[2], [1.1, 0.2, 0.3]);
        assert_eq!(a.kind[3], 2);
    }

    #[test]
    fn reverse_accumulates() {
        let mut a = two_atoms();
        a.f[0] = [1.0, 1.0, 1.0];
        a.unpack_reverse(&[0, 0], &[1.0, 2.0, 3.0, 1.0, 1.0, 1.0]);
        assert_eq!(a.f[0], [3.0, 4.0, 5.0]);
    }

    #[test]
    fn pbc_wraps_owned_atoms_only() {
        let mut a = Atoms::new();
        a.add_atom(1, 1, [1.25, -0.25, 0.5]);
        a.set_nghost(1);
        a.x[1] = [5.0, 5.0, 5.0];
        let dom = Domain::new(3, [0.0; 3], [1.0; 3], [true; 3]).unwrap();
        a.pbc(&dom);
        assert_eq!(a.x[0], [0.25, 0.75, 0.5]);
        assert_eq!(a.image[0], [1, -1, 0]);
        assert_eq!(a.x[1], [5.0, 5.0, 5.0]);
    }
}
