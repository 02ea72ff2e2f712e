//! Collaborator payloads riding on the swap schedule.
//!
//! Pair styles, fixes, computes and dumps implement [`CommHook`] to move
//! their own per-atom data through forward and reverse comm. The swap loop
//! only sees a payload width and the pack/unpack callbacks.

use crate::atom::PbcImage;

/// Which kind of collaborator a hook belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    Pair,
    Fix,
    Compute,
    Dump,
    /// A raw fixed-width per-atom array.
    Array,
    /// The atom storage itself.
    Atom,
}

/// Per-atom payload carried by forward and reverse comm.
pub trait CommHook {
    fn kind(&self) -> HookKind;

    /// Values per atom sent by forward comm.
    fn comm_forward(&self) -> usize;

    /// Values per atom sent by reverse comm.
    fn comm_reverse(&self) -> usize {
        0
    }

    /// Values per atom this hook reverse-communicates even with newton off.
    fn comm_reverse_off(&self) -> usize {
        0
    }

    /// Pack the listed atoms into `buf`; returns the number of values written.
    fn pack_forward_comm(&mut self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize;

    /// Unpack `n` atoms into ghost slots `first..first + n`.
    fn unpack_forward_comm(&mut self, n: usize, first: usize, buf: &[f64]);

    /// Pack ghosts `first..first + n`; returns the number of values written.
    fn pack_reverse_comm(&mut self, _n: usize, _first: usize, _buf: &mut [f64]) -> usize {
        0
    }

    /// Fold received ghost values into the listed atoms.
    fn unpack_reverse_comm(&mut self, _list: &[usize], _buf: &[f64]) {}
}

/// Row-major `nall x width` array treated as one hook.
///
/// Forward comm copies owner rows into ghost rows; reverse comm sums ghost
/// rows into owner rows. Values are not shifted across periodic images.
#[derive(Debug)]
pub struct PerAtomArray<'a> {
    pub width: usize,
    pub data: &'a mut [f64],
}

impl<'a> PerAtomArray<'a> {
    pub fn new(width: usize, data: &'a mut [f64]) -> Self {
        Self { width, data }
    }

    #[inline]
    fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.width..(i + 1) * self.width]
    }
}

impl CommHook for PerAtomArray<'_> {
    fn kind(&self) -> HookKind {
        HookKind::Array
    }

    fn comm_forward(&self) -> usize {
        self.width
    }

    fn comm_reverse(&self) -> usize {
        self.width
    }

    fn pack_forward_comm(&mut self, list: &[usize], buf: &mut [f64], _image: &PbcImage) -> usize {
        let w = self.width;
        for (k, &j) in list.iter().enumerate() {
            buf[k * w..(k + 1) * w].copy_from_slice(self.row(j));
        }
        list.len() * w
    }

    fn unpack_forward_comm(&mut self, n: usize, first: usize, buf: &[f64]) {
        let w = self.width;
        self.data[first * w..(first + n) * w].copy_from_slice(&buf[..n * w]);
    }

    fn pack_reverse_comm(&mut self, n: usize, first: usize, buf: &mut [f64]) -> usize {
        let w = self.width;
        buf[..n * w].copy_from_slice(&self.data[first * w..(first + n) * w]);
        n * w
    }

    fn unpack_reverse_comm(&mut self, list: &[usize], buf: &[f64]) {
        let w = self.width;
        for (k, &j) in list.iter().enumerate() {
            for c in 0..w {
                self.data[j * w + c] += buf[k * w + c];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_forward_copies_rows_to_ghost_slots() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0];
        let mut arr = PerAtomArray::new(2, &mut data);
        let mut buf = [0.0; 4];
        let n = arr.pack_forward_comm(&[1, 0], &mut buf, &PbcImage::default());
        assert_eq!(n, 4);
        arr.unpack_forward_comm(2, 2, &buf);
        assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0, 3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn array_reverse_sums_into_owners() {
        let mut data = vec![1.0, 1.0, 0.5, 0.25];
        let mut arr = PerAtomArray::new(1, &mut data);
        let mut buf = [0.0; 2];
        assert_eq!(arr.pack_reverse_comm(2, 2, &mut buf), 2);
        arr.unpack_reverse_comm(&[0, 0], &buf);
        assert_eq!(arr.kind(), HookKind::Array);
        assert_eq!(data[0], 1.75);
    }
}
