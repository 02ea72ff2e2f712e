//! Per-atom storage as seen by the communication layer.
//!
//! Atoms `0..nlocal` are owned; `nlocal..nlocal + nghost` are ghosts laid
//! out swap by swap in the order `borders` received them. All payloads are
//! flat `f64` buffers whose per-atom layout belongs to the storage.

pub mod atomic;

use crate::geometry::Domain;
use crate::hooks::{CommHook, HookKind};

pub use atomic::Atoms;

/// Periodic image shift in box lengths per axis.
pub type PbcShift = [i32; 3];

/// Periodic shift attached to one send partner.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PbcImage {
    /// Any axis is shifted.
    pub flag: bool,
    pub pbc: PbcShift,
    /// Coordinate displacement, `pbc * prd`.
    pub dx: [f64; 3],
}

impl PbcImage {
    pub fn new(pbc: PbcShift, domain: &Domain) -> Self {
        Self {
            flag: pbc != [0; 3],
            pbc,
            dx: domain.pbc_displacement(&pbc),
        }
    }

    #[inline]
    pub fn apply(&self, x: &[f64; 3]) -> [f64; 3] {
        if self.flag {
            [x[0] + self.dx[0], x[1] + self.dx[1], x[2] + self.dx[2]]
        } else {
            *x
        }
    }
}

/// Atom storage collaborator.
///
/// `pack_*` methods write into the front of `buf` and return the number of
/// values written; `unpack_*` methods read `n` atoms' worth starting at the
/// front of `buf` into slots `first..first + n`.
pub trait AtomVec {
    /// Values per atom in forward comm.
    fn size_forward(&self) -> usize;
    /// Values per atom in reverse comm.
    fn size_reverse(&self) -> usize;
    /// Values per atom in a border record.
    fn size_border(&self) -> usize;
    /// Values added per atom when ghosts carry velocities.
    fn size_velocity(&self) -> usize;
    /// Forward comm carries exactly the positions.
    fn comm_x_only(&self) -> bool;
    /// Reverse comm carries exactly the forces.
    fn comm_f_only(&self) -> bool;

    fn nlocal(&self) -> usize;
    fn nghost(&self) -> usize;
    /// Resize ghost storage to `nghost` slots, keeping the leading ones.
    fn set_nghost(&mut self, nghost: usize);
    fn clear_ghosts(&mut self) {
        self.set_nghost(0);
    }

    /// Positions of owned and ghost atoms.
    fn x(&self) -> &[[f64; 3]];
    fn x_mut(&mut self) -> &mut [[f64; 3]];
    /// Forces of owned and ghost atoms.
    fn f(&self) -> &[[f64; 3]];
    fn f_mut(&mut self) -> &mut [[f64; 3]];

    fn pack_comm(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize;
    fn pack_comm_vel(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize;
    fn unpack_comm(&mut self, n: usize, first: usize, buf: &[f64]);
    fn unpack_comm_vel(&mut self, n: usize, first: usize, buf: &[f64]);

    fn pack_reverse(&self, n: usize, first: usize, buf: &mut [f64]) -> usize;
    /// Accumulate into the listed atoms.
    fn unpack_reverse(&mut self, list: &[usize], buf: &[f64]);

    fn pack_border(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize;
    fn pack_border_vel(&self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize;
    fn unpack_border(&mut self, n: usize, first: usize, buf: &[f64]);
    fn unpack_border_vel(&mut self, n: usize, first: usize, buf: &[f64]);

    /// Serialize owned atom `i` as `[len, x, y, z, ...]`, `len` counting
    /// itself. Returns `len`.
    fn pack_exchange(&self, i: usize, buf: &mut [f64]) -> usize;
    /// Length of the record `pack_exchange` writes for owned atom `i`.
    fn exchange_size(&self, i: usize) -> usize;
    /// Upper bound of `pack_exchange` over the current atoms.
    fn max_exchange(&self) -> usize;
    /// Drop owned atom `i`, moving the last owned atom into its slot.
    fn remove_and_compact(&mut self, i: usize);
    /// Append one owned atom from a `pack_exchange` record; returns its length.
    fn append_from_buffer(&mut self, buf: &[f64]) -> usize;

    fn memory_usage(&self) -> usize {
        0
    }
}

/// Which storage payload a swap pass moves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AtomPayloadKind {
    Comm,
    CommVel,
    Border,
    BorderVel,
    Reverse,
}

/// Adapter running storage payloads through the generic swap loops.
pub(crate) struct AtomPayload<'a, A: ?Sized> {
    pub avec: &'a mut A,
    pub kind: AtomPayloadKind,
    pub width: usize,
}

impl<A: AtomVec + ?Sized> CommHook for AtomPayload<'_, A> {
    fn kind(&self) -> HookKind {
        HookKind::Atom
    }

    fn comm_forward(&self) -> usize {
        self.width
    }

    fn comm_reverse(&self) -> usize {
        self.width
    }

    fn pack_forward_comm(&mut self, list: &[usize], buf: &mut [f64], image: &PbcImage) -> usize {
        match self.kind {
            AtomPayloadKind::Comm => self.avec.pack_comm(list, buf, image),
            AtomPayloadKind::CommVel => self.avec.pack_comm_vel(list, buf, image),
            AtomPayloadKind::Border => self.avec.pack_border(list, buf, image),
            AtomPayloadKind::BorderVel => self.avec.pack_border_vel(list, buf, image),
            AtomPayloadKind::Reverse => 0,
        }
    }

    fn unpack_forward_comm(&mut self, n: usize, first: usize, buf: &[f64]) {
        match self.kind {
            AtomPayloadKind::Comm => self.avec.unpack_comm(n, first, buf),
            AtomPayloadKind::CommVel => self.avec.unpack_comm_vel(n, first, buf),
            AtomPayloadKind::Border => self.avec.unpack_border(n, first, buf),
            AtomPayloadKind::BorderVel => self.avec.unpack_border_vel(n, first, buf),
            AtomPayloadKind::Reverse => {}
        }
    }

    fn pack_reverse_comm(&mut self, n: usize, first: usize, buf: &mut [f64]) -> usize {
        self.avec.pack_reverse(n, first, buf)
    }

    fn unpack_reverse_comm(&mut self, list: &[usize], buf: &[f64]) {
        self.avec.unpack_reverse(list, buf)
    }
}
