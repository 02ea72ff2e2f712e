//! Swap schedule: per-direction send/receive partner tables.
//!
//! Swaps run in the order `x-, x+, y-, y+, z-, z+`; swap `2 * axis + dir`
//! sends toward `dir` (0 = low, 1 = high) and receives from the opposite
//! side. The ranks overlapping my low ghost slab are the ones I send to in
//! the low swap *and* the ones I receive from in the high swap, so both
//! swaps of one axis are filled together by [`SwapPair::build`].
//!
//! If the calling rank is its own partner (periodic wraparound with few
//! ranks along an axis) it is always the last entry of both lists, and the
//! traffic is a local copy.

use crate::atom::PbcImage;
use crate::comm_error::CommError;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{Bounds, Domain};
use crate::overlap::OverlapStrategy;

/// A rank this swap sends ghosts to.
#[derive(Clone, Debug, PartialEq)]
pub struct SendPartner {
    pub proc: usize,
    /// Periodic shift applied to positions sent to this rank.
    pub image: PbcImage,
    /// Region of my sub-box (plus earlier ghosts) this rank needs.
    pub sendbox: Bounds,
    /// Local indices of the atoms sent, rebuilt by `borders`.
    pub sendlist: Vec<usize>,
    /// Values expected back from this rank in reverse comm.
    pub size_reverse_recv: usize,
    /// Atoms preceding this rank's block in the reverse receive buffer.
    pub reverse_recv_offset: usize,
}

impl SendPartner {
    fn new(proc: usize, image: PbcImage, sendbox: Bounds) -> Self {
        Self {
            proc,
            image,
            sendbox,
            sendlist: Vec::new(),
            size_reverse_recv: 0,
            reverse_recv_offset: 0,
        }
    }

    #[inline]
    pub fn sendnum(&self) -> usize {
        self.sendlist.len()
    }
}

/// A rank this swap receives ghosts from.
#[derive(Clone, Debug, PartialEq)]
pub struct RecvPartner {
    pub proc: usize,
    /// Ghosts received from this rank in the last `borders`.
    pub recvnum: usize,
    /// Local index of the first of those ghosts.
    pub firstrecv: usize,
    /// Values received from this rank in forward comm.
    pub size_forward_recv: usize,
    /// Atoms preceding this rank's block in the forward receive buffer.
    pub forward_recv_offset: usize,
    /// Values sent back to this rank in reverse comm.
    pub size_reverse_send: usize,
}

impl RecvPartner {
    fn new(proc: usize) -> Self {
        Self {
            proc,
            recvnum: 0,
            firstrecv: 0,
            size_forward_recv: 0,
            forward_recv_offset: 0,
            size_reverse_send: 0,
        }
    }
}

/// One directional swap.
#[derive(Clone, Debug, PartialEq)]
pub struct Swap {
    pub axis: usize,
    pub dir: usize,
    pub send: Vec<SendPartner>,
    pub recv: Vec<RecvPartner>,
    /// Last entry of `send` and of `recv` is the calling rank.
    pub sendself: bool,
    /// At least one partner is another rank.
    pub sendother: bool,
}

impl Swap {
    fn empty(axis: usize, dir: usize) -> Self {
        Self {
            axis,
            dir,
            send: Vec::new(),
            recv: Vec::new(),
            sendself: false,
            sendother: false,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        2 * self.axis + self.dir
    }

    /// Send partners that are other ranks.
    pub fn send_others(&self) -> &[SendPartner] {
        &self.send[..self.send.len() - usize::from(self.sendself)]
    }

    /// Receive partners that are other ranks.
    pub fn recv_others(&self) -> &[RecvPartner] {
        &self.recv[..self.recv.len() - usize::from(self.sendself)]
    }

    pub fn send_self(&self) -> Option<&SendPartner> {
        self.sendself.then(|| self.send.last()).flatten()
    }

    pub fn recv_self(&self) -> Option<&RecvPartner> {
        self.sendself.then(|| self.recv.last()).flatten()
    }

    /// Largest send list of this swap.
    pub fn max_sendnum(&self) -> usize {
        self.send.iter().map(SendPartner::sendnum).max().unwrap_or(0)
    }

    /// Total ghosts received in this swap.
    pub fn total_recv(&self) -> usize {
        self.recv.iter().map(|r| r.recvnum).sum()
    }
}

/// Low and high swap of one axis.
#[derive(Clone, Debug, PartialEq)]
pub struct SwapPair {
    pub axis: usize,
    pub swaps: [Swap; 2],
}

/// Ghost slab(s) of one direction and the ranks they overlap.
struct Overlaps {
    /// `(rank, drawn from the periodic image slab)`, self last.
    procs: Vec<(usize, bool)>,
    slab1: Bounds,
    slab2: Bounds,
    sendself: bool,
}

fn find_overlaps(
    strategy: &OverlapStrategy,
    domain: &Domain,
    idim: usize,
    idir: usize,
    cut: f64,
) -> Result<Overlaps, CommError> {
    let sub = domain.subdomain();
    let (boxlo, boxhi, prd) = (domain.boxlo[idim], domain.boxhi[idim], domain.prd[idim]);

    let mut one = true;
    let mut slab1 = sub;
    if idir == 0 {
        slab1.lo[idim] = sub.lo[idim] - cut;
        slab1.hi[idim] = sub.lo[idim];
    } else {
        slab1.lo[idim] = sub.hi[idim];
        slab1.hi[idim] = sub.hi[idim] + cut;
    }

    let two = domain.periodicity[idim]
        && if idir == 0 {
            slab1.lo[idim] < boxlo
        } else {
            slab1.hi[idim] > boxhi
        };
    let mut slab2 = sub;
    if two {
        if idir == 0 {
            slab2.lo[idim] = slab1.lo[idim] + prd;
            slab2.hi[idim] = boxhi;
            if sub.lo[idim] == boxlo {
                one = false;
            }
        } else {
            slab2.lo[idim] = boxlo;
            slab2.hi[idim] = slab1.hi[idim] - prd;
            if sub.hi[idim] == boxhi {
                one = false;
            }
        }
    }
    if one {
        if idir == 0 {
            slab1.lo[idim] = slab1.lo[idim].max(boxlo);
        } else {
            slab1.hi[idim] = slab1.hi[idim].min(boxhi);
        }
        // non-periodic face on the box boundary: nothing beyond it
        if slab1.lo[idim] >= slab1.hi[idim] {
            one = false;
        }
    }

    let mut found = Vec::new();
    let mut indexme = None;
    if one {
        indexme = strategy.box_drop(domain, idim, &slab1, &mut found)?;
    }
    let noverlap1 = found.len();
    if two {
        if let Some(i) = strategy.box_drop(domain, idim, &slab2, &mut found)? {
            indexme = Some(i);
        }
    }

    let mut procs: Vec<(usize, bool)> = found
        .iter()
        .enumerate()
        .map(|(i, &p)| (p, i >= noverlap1))
        .collect();
    if let Some(i) = indexme {
        let last = procs.len() - 1;
        procs.swap(i, last);
    }
    Ok(Overlaps {
        procs,
        slab1,
        slab2,
        sendself: indexme.is_some(),
    })
}

/// Region of my sub-box (and earlier ghosts) that `proc` needs.
///
/// Along `idim` the box is given in the receiver's frame: positions are
/// tested after the periodic `shift` is applied, so the reach of `cut` past
/// the partner's face is the same sum the partner computes.
fn sendbox(
    obox: &Bounds,
    slab: &Bounds,
    domain: &Domain,
    idim: usize,
    idir: usize,
    shift: f64,
    cutghost: &[f64; 3],
) -> Bounds {
    let cut = cutghost[idim];
    let (lo, hi) = (domain.sublo[idim] + shift, domain.subhi[idim] + shift);
    let mut sbox = obox.intersect(slab);
    if idir == 0 {
        sbox.lo[idim] = lo;
        sbox.hi[idim] = (sbox.hi[idim] + cut).min(hi);
    } else {
        sbox.lo[idim] = (sbox.lo[idim] - cut).max(lo);
        sbox.hi[idim] = hi;
    }
    // ghosts from earlier axes: extend wherever the partner's face is inside the slab
    for d in 0..idim {
        if sbox.lo[d] == obox.lo[d] {
            sbox.lo[d] -= cutghost[d];
        }
        if sbox.hi[d] == obox.hi[d] {
            sbox.hi[d] += cutghost[d];
        }
    }
    sbox
}

impl SwapPair {
    /// Resolve both ghost slabs of `axis` and fill the crossed tables: the
    /// ranks overlapping the low slab become the low swap's send partners
    /// and the high swap's receive partners, and vice versa.
    pub fn build(
        strategy: &OverlapStrategy,
        domain: &Domain,
        axis: usize,
        cutghost: &[f64; 3],
    ) -> Result<Self, CommError> {
        let mut swaps = [Swap::empty(axis, 0), Swap::empty(axis, 1)];
        for idir in 0..2 {
            let ov = find_overlaps(strategy, domain, axis, idir, cutghost[axis])?;
            let mut send = Vec::with_capacity(ov.procs.len());
            for &(proc, image) in &ov.procs {
                let obox = strategy.box_other(domain, axis, proc)?;
                let slab = if image { &ov.slab2 } else { &ov.slab1 };
                let mut pbc = [0; 3];
                if image {
                    pbc[axis] = if idir == 0 { 1 } else { -1 };
                }
                let pbc_image = PbcImage::new(pbc, domain);
                let sbox = sendbox(&obox, slab, domain, axis, idir, pbc_image.dx[axis], cutghost);
                send.push(SendPartner::new(proc, pbc_image, sbox));
            }
            swaps[1 - idir].recv = ov.procs.iter().map(|&(p, _)| RecvPartner::new(p)).collect();

            let swap = &mut swaps[idir];
            swap.sendself = ov.sendself;
            swap.sendother = send.len() > usize::from(ov.sendself);
            swap.send = send;
        }
        Ok(Self { axis, swaps })
    }
}

/// Ranks sharing a face with me along one axis; atoms migrate only to these.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangePartners {
    pub axis: usize,
    pub procs: Vec<usize>,
}

/// Complete schedule for one reneighboring cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct SwapPlan {
    pub me: usize,
    pub cutghost: [f64; 3],
    pub pairs: Vec<SwapPair>,
    pub exchange: Vec<ExchangePartners>,
}

impl SwapPlan {
    /// Plan with no swaps, used before the first `setup`.
    pub fn empty(me: usize) -> Self {
        Self {
            me,
            cutghost: [0.0; 3],
            pairs: Vec::new(),
            exchange: Vec::new(),
        }
    }

    /// Build all `2 * dimension` swaps and the exchange partners.
    pub fn build(
        strategy: &OverlapStrategy,
        domain: &Domain,
        cutoff: f64,
    ) -> Result<Self, CommError> {
        let mut cutghost = [0.0; 3];
        for d in 0..domain.dimension {
            if domain.periodicity[d] && cutoff >= domain.prd[d] {
                return Err(CommError::CutoffExceedsPeriod {
                    axis: d,
                    cutoff,
                    period: domain.prd[d],
                });
            }
            cutghost[d] = cutoff;
        }

        let pairs = (0..domain.dimension)
            .map(|axis| SwapPair::build(strategy, domain, axis, &cutghost))
            .collect::<Result<Vec<_>, _>>()?;

        let me = strategy.me();
        let exchange = pairs
            .iter()
            .map(|pair| {
                let mut procs: Vec<usize> = Vec::new();
                for (idir, swap) in pair.swaps.iter().enumerate() {
                    for sp in &swap.send {
                        if sp.proc != me
                            && strategy.box_touch(sp.proc, pair.axis, idir)
                            && !procs.contains(&sp.proc)
                        {
                            procs.push(sp.proc);
                        }
                    }
                }
                ExchangePartners {
                    axis: pair.axis,
                    procs,
                }
            })
            .collect();

        let plan = Self {
            me,
            cutghost,
            pairs,
            exchange,
        };
        plan.validate_invariants()?;
        Ok(plan)
    }

    pub fn nswap(&self) -> usize {
        2 * self.pairs.len()
    }

    #[inline]
    pub fn swap(&self, iswap: usize) -> &Swap {
        &self.pairs[iswap / 2].swaps[iswap % 2]
    }

    #[inline]
    pub fn swap_mut(&mut self, iswap: usize) -> &mut Swap {
        &mut self.pairs[iswap / 2].swaps[iswap % 2]
    }

    /// Swaps in forward order.
    pub fn swaps(&self) -> impl Iterator<Item = &Swap> {
        self.pairs.iter().flat_map(|p| p.swaps.iter())
    }

    /// Most send partners of any swap.
    pub fn max_send_partners(&self) -> usize {
        self.swaps().map(|s| s.send.len()).max().unwrap_or(0)
    }

    /// Most ghosts sent to one partner in any swap.
    pub fn max_sendnum(&self) -> usize {
        self.swaps().map(Swap::max_sendnum).max().unwrap_or(0)
    }

    /// Most ghosts received in one swap.
    pub fn max_total_recv(&self) -> usize {
        self.swaps().map(Swap::total_recv).max().unwrap_or(0)
    }

    /// Bytes held by partner tables and send lists.
    pub fn memory_usage(&self) -> usize {
        self.swaps()
            .map(|s| {
                s.send.capacity() * std::mem::size_of::<SendPartner>()
                    + s.recv.capacity() * std::mem::size_of::<RecvPartner>()
                    + s.send
                        .iter()
                        .map(|p| p.sendlist.capacity() * std::mem::size_of::<usize>())
                        .sum::<usize>()
            })
            .sum::<usize>()
            + self
                .exchange
                .iter()
                .map(|e| e.procs.capacity() * std::mem::size_of::<usize>())
                .sum::<usize>()
    }
}

impl DebugInvariants for SwapPlan {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "SwapPlan invalid");
    }

    fn validate_invariants(&self) -> Result<(), CommError> {
        for swap in self.swaps() {
            let i = swap.index();
            let send_last = swap.send.last().map(|p| p.proc) == Some(self.me);
            let recv_last = swap.recv.last().map(|p| p.proc) == Some(self.me);
            if swap.sendself != send_last || swap.sendself != recv_last {
                return Err(CommError::InvalidPartition(format!(
                    "swap {i}: self partner must close both send and receive lists"
                )));
            }
            let send_self = swap.send.iter().filter(|p| p.proc == self.me).count();
            let recv_self = swap.recv.iter().filter(|p| p.proc == self.me).count();
            if send_self > 1 || recv_self > 1 {
                return Err(CommError::InvalidPartition(format!(
                    "swap {i}: calling rank listed more than once"
                )));
            }
        }
        Ok(())
    }
}
