//! Tiled halo communication: the recurring protocols driven by a [`SwapPlan`].
//!
//! Call order per reneighboring step is `setup -> exchange -> borders`,
//! followed by any number of `forward_comm` / `reverse_comm` calls that reuse
//! the send lists and receive offsets `borders` established.
//!
//! Every swap posts its receives first, then sends to each partner, copies
//! the self partner locally, and finally unpacks the posted receives in
//! arrival order. Each partner's data lands at the offset computed by
//! `borders`, so arrival order never changes the result.

use log::{debug, trace, warn};

use crate::algs::communicator::{Communicator, Wait, all_reduce_sum_u64, tags, wait_any};
use crate::algs::wire::{
    COUNT_BYTES, EXCHANGE_DEST, EXCHANGE_LEN, EXCHANGE_PAYLOAD, WireCount, cast_slice,
    copy_into_f64, decode_count,
};
use crate::atom::{AtomPayload, AtomPayloadKind, AtomVec};
use crate::buffers::CommBuffers;
use crate::comm_error::CommError;
use crate::config::CommConfig;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::Domain;
use crate::hooks::{CommHook, PerAtomArray};
use crate::overlap::OverlapStrategy;
use crate::swap::{Swap, SwapPlan};

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Halo communicator for one rank.
pub struct TiledComm<C: Communicator> {
    comm: C,
    config: CommConfig,
    strategy: OverlapStrategy,
    /// Domain captured by the last `setup`.
    domain: Option<Domain>,
    plan: SwapPlan,
    buffers: CommBuffers,
    size_forward: usize,
    size_reverse: usize,
    size_border: usize,
    comm_x_only: bool,
    comm_f_only: bool,
    maxforward: usize,
    maxreverse: usize,
}

fn check_layout<C: Communicator>(
    comm: &C,
    config: &CommConfig,
    strategy: &OverlapStrategy,
) -> Result<(), CommError> {
    if strategy.nprocs() != comm.size() || strategy.me() != comm.rank() {
        return Err(CommError::InvalidPartition(format!(
            "layout of {} ranks as rank {} does not match communicator of {} ranks as rank {}",
            strategy.nprocs(),
            strategy.me(),
            comm.size(),
            comm.rank()
        )));
    }
    if let OverlapStrategy::Tiled { rcb, .. } = strategy {
        rcb.debug_assert_invariants();
    }
    if config.layout.is_tiled() != strategy.is_tiled() {
        return Err(CommError::InvalidConfig(format!(
            "layout {:?} does not match the {} overlap strategy",
            config.layout,
            if strategy.is_tiled() { "tiled" } else { "brick" }
        )));
    }
    Ok(())
}

impl<C: Communicator> TiledComm<C> {
    pub fn new(comm: C, config: CommConfig, strategy: OverlapStrategy) -> Result<Self, CommError> {
        check_layout(&comm, &config, &strategy)?;
        Ok(Self {
            buffers: CommBuffers::new(&config.buffer),
            plan: SwapPlan::empty(strategy.me()),
            comm,
            config,
            strategy,
            domain: None,
            size_forward: 3,
            size_reverse: 3,
            size_border: 3,
            comm_x_only: true,
            comm_f_only: true,
            maxforward: 3,
            maxreverse: 3,
        })
    }

    /// Derive payload widths from the atom storage and registered hooks.
    pub fn init<A: AtomVec + ?Sized>(
        &mut self,
        domain: &Domain,
        avec: &A,
        hooks: &[&dyn CommHook],
    ) -> Result<(), CommError> {
        self.config.validate(domain)?;
        let vel = if self.config.ghost_velocity {
            avec.size_velocity()
        } else {
            0
        };
        self.comm_x_only = avec.comm_x_only() && !self.config.ghost_velocity;
        self.comm_f_only = avec.comm_f_only();
        self.size_forward = avec.size_forward() + vel;
        self.size_reverse = avec.size_reverse();
        self.size_border = avec.size_border() + vel;

        self.maxforward = hooks
            .iter()
            .map(|h| h.comm_forward())
            .fold(self.size_forward.max(self.size_border), usize::max);
        self.maxreverse = if self.config.newton {
            hooks
                .iter()
                .map(|h| h.comm_reverse())
                .fold(self.size_reverse, usize::max)
        } else {
            0
        };
        self.maxreverse = hooks
            .iter()
            .map(|h| h.comm_reverse_off())
            .fold(self.maxreverse, usize::max);
        debug!(
            "rank {}: forward width {}, border width {}, max forward {}, max reverse {}, hooks {:?}",
            self.comm.rank(),
            self.size_forward,
            self.size_border,
            self.maxforward,
            self.maxreverse,
            hooks.iter().map(|h| h.kind()).collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Rebuild the swap schedule for the current box.
    ///
    /// The calling rank's sub-box is taken from the layout and written into
    /// `domain`.
    pub fn setup(&mut self, domain: &mut Domain) -> Result<(), CommError> {
        self.config.validate(domain)?;
        self.strategy.apply_subdomain(domain)?;
        let plan = SwapPlan::build(&self.strategy, domain, self.config.cutoff())?;

        let me = self.comm.rank();
        debug!(
            "rank {me}: {} swaps, sub-box {:?}..{:?}",
            plan.nswap(),
            domain.sublo,
            domain.subhi
        );
        for swap in plan.swaps() {
            debug!(
                "rank {me} swap {}: {} send / {} recv partners, self {}",
                swap.index(),
                swap.send.len(),
                swap.recv.len(),
                swap.sendself
            );
        }
        self.plan = plan;
        self.domain = Some(domain.clone());
        Ok(())
    }

    /// Replace the processor layout, e.g. after rebalancing. The schedule is
    /// cleared until the next `setup`.
    pub fn set_layout(&mut self, strategy: OverlapStrategy) -> Result<(), CommError> {
        check_layout(&self.comm, &self.config, &strategy)?;
        self.plan = SwapPlan::empty(strategy.me());
        self.strategy = strategy;
        self.domain = None;
        Ok(())
    }

    /// Send owned positions (and velocities) to every ghost copy.
    pub fn forward_comm<A: AtomVec + ?Sized>(&mut self, avec: &mut A) -> Result<(), CommError> {
        let kind = if self.config.ghost_velocity {
            AtomPayloadKind::CommVel
        } else {
            AtomPayloadKind::Comm
        };
        let (x_only, width) = (self.comm_x_only, self.size_forward);
        let Self {
            comm,
            plan,
            buffers,
            ..
        } = self;
        for iswap in 0..plan.nswap() {
            let tag = tags::FORWARD.offset(iswap);
            if x_only {
                forward_swap_x(comm, plan.swap(iswap), buffers, avec, tag)?;
            } else {
                let mut payload = AtomPayload {
                    avec: &mut *avec,
                    kind,
                    width,
                };
                forward_swap(comm, plan.swap(iswap), buffers, &mut payload, width, tag)?;
            }
        }
        Ok(())
    }

    /// Sum ghost forces back into their owners, swaps in reverse order.
    pub fn reverse_comm<A: AtomVec + ?Sized>(&mut self, avec: &mut A) -> Result<(), CommError> {
        let (f_only, width) = (self.comm_f_only, self.size_reverse);
        let Self {
            comm,
            plan,
            buffers,
            ..
        } = self;
        for iswap in (0..plan.nswap()).rev() {
            let tag = tags::REVERSE.offset(iswap);
            if f_only {
                reverse_swap_f(comm, plan.swap(iswap), buffers, avec, tag)?;
            } else {
                let mut payload = AtomPayload {
                    avec: &mut *avec,
                    kind: AtomPayloadKind::Reverse,
                    width,
                };
                reverse_swap(comm, plan.swap(iswap), buffers, &mut payload, width, tag)?;
            }
        }
        Ok(())
    }

    /// Migrate owned atoms that left the sub-box to their new owners, one
    /// axis at a time. Ghosts are discarded first.
    pub fn exchange<A: AtomVec + ?Sized>(&mut self, avec: &mut A) -> Result<(), CommError> {
        let Self {
            comm,
            config,
            strategy,
            domain,
            plan,
            buffers,
            ..
        } = self;
        let domain = domain
            .as_ref()
            .ok_or_else(|| CommError::InvalidConfig("exchange called before setup".into()))?;
        let me = comm.rank();

        avec.clear_ghosts();
        buffers.set_extra(config.buffer.extra + avec.max_exchange() + 1);

        for dim in 0..domain.dimension {
            let (lo, hi) = (domain.sublo[dim], domain.subhi[dim]);
            let partners = &plan.exchange[dim].procs;

            // 1) pull leaving atoms into [dest, len, payload...] records
            let mut nsend = 0;
            let mut nleft = 0;
            let mut nlost = 0;
            let mut i = 0;
            while i < avec.nlocal() {
                let x = avec.x()[i];
                if x[dim] >= lo && x[dim] < hi {
                    i += 1;
                    continue;
                }
                let dest = strategy.point_drop(
                    domain,
                    dim,
                    &x,
                    config.point_drop_epsilon,
                    config.point_drop_retries,
                );
                if dest == me || !partners.contains(&dest) {
                    nlost += 1;
                } else {
                    // records vary in length; atoms received on an earlier
                    // axis may outgrow the slack set above
                    let need = nsend + 1 + avec.exchange_size(i);
                    if nsend > buffers.maxsend() || need > buffers.send().len() {
                        buffers.grow_send(need, true);
                    }
                    let buf = buffers.send_mut();
                    buf[nsend + EXCHANGE_DEST] = dest as f64;
                    nsend += 1 + avec.pack_exchange(i, &mut buf[nsend + EXCHANGE_LEN..]);
                    nleft += 1;
                }
                avec.remove_and_compact(i);
            }
            if nlost > 0 {
                warn!("rank {me}: {nlost} atoms left the sub-box along axis {dim} with no owner");
            }

            // 2) announce the record buffer length
            let tag = tags::EXCHANGE_COUNT.offset(dim);
            let mut pending: Vec<_> = partners
                .iter()
                .map(|&p| Some(comm.irecv(p, tag, COUNT_BYTES)))
                .collect();
            let count = [WireCount::new(nsend)];
            let sends: Vec<_> = partners
                .iter()
                .map(|&p| comm.isend(p, tag, cast_slice(&count)))
                .collect();
            let mut nrecv = vec![0; partners.len()];
            let result = drain_recvs(&mut pending, partners, |slot, data| {
                nrecv[slot] = decode_count(&data, partners[slot])?;
                Ok(())
            });
            finish_sends(sends);
            result?;

            // 3) every partner gets the whole buffer; records carry their destination
            let offsets: Vec<usize> = nrecv
                .iter()
                .scan(0, |acc, &n| {
                    let off = *acc;
                    *acc += n;
                    Some(off)
                })
                .collect();
            buffers.reserve_recv(nrecv.iter().sum());
            let tag = tags::EXCHANGE.offset(dim);
            let mut pending: Vec<_> = partners
                .iter()
                .zip(&nrecv)
                .map(|(&p, &n)| Some(comm.irecv(p, tag, n * F64_BYTES)))
                .collect();
            let sends: Vec<_> = partners
                .iter()
                .map(|&p| comm.isend(p, tag, cast_slice(&buffers.send()[..nsend])))
                .collect();
            let result = drain_recvs(&mut pending, partners, |slot, data| {
                let off = offsets[slot];
                copy_into_f64(
                    &mut buffers.recv_mut()[off..off + nrecv[slot]],
                    &data,
                    partners[slot],
                )
            });
            finish_sends(sends);
            result?;

            // 4) keep records addressed to me that lie in my slab along dim
            let mut nkept = 0;
            for (slot, &peer) in partners.iter().enumerate() {
                let recv = &buffers.recv()[offsets[slot]..offsets[slot] + nrecv[slot]];
                let mut m = 0;
                while m < recv.len() {
                    let len = recv.get(m + EXCHANGE_LEN).map_or(0, |&v| v as usize);
                    // len itself plus a position at minimum
                    if len < 4 || m + 1 + len > recv.len() {
                        return Err(CommError::transport(
                            peer,
                            format!("malformed exchange record at offset {m}"),
                        ));
                    }
                    let dest = recv[m + EXCHANGE_DEST] as usize;
                    let value = recv[m + EXCHANGE_PAYLOAD + dim];
                    if dest == me && value >= lo && value < hi {
                        avec.append_from_buffer(&recv[m + EXCHANGE_LEN..m + 1 + len]);
                        nkept += 1;
                    }
                    m += 1 + len;
                }
            }
            trace!(
                "rank {me} exchange axis {dim}: sent {nleft} atoms to {} partners, kept {nkept}",
                partners.len()
            );
        }
        Ok(())
    }

    /// Rebuild the ghost halo: fresh send lists, partner counts and receive
    /// offsets for every swap, then the border records themselves.
    pub fn borders<A: AtomVec + ?Sized>(&mut self, avec: &mut A) -> Result<(), CommError> {
        let kind = if self.config.ghost_velocity {
            AtomPayloadKind::BorderVel
        } else {
            AtomPayloadKind::Border
        };
        let (size_forward, size_reverse, size_border) =
            (self.size_forward, self.size_reverse, self.size_border);
        let (maxforward, maxreverse) = (self.maxforward, self.maxreverse);
        let Self {
            comm,
            plan,
            buffers,
            ..
        } = self;
        let me = comm.rank();
        avec.clear_ghosts();

        // largest single send, largest whole-swap receive, in atoms
        let mut smax = 0;
        let mut rmax = 0;
        let mut nlast = 0;
        for iswap in 0..plan.nswap() {
            // 1) scan owned atoms on the first axis, owned plus earlier-axis
            //    ghosts afterwards
            if iswap % 2 == 0 {
                nlast = avec.nlocal() + avec.nghost();
            }
            let nscan = if iswap < 2 { avec.nlocal() } else { nlast };
            let swap = plan.swap_mut(iswap);
            let x = avec.x();
            for sp in &mut swap.send {
                sp.sendlist.clear();
                let (sendbox, image) = (sp.sendbox, sp.image);
                sp.sendlist
                    .extend((0..nscan).filter(|&i| sendbox.contains_closed(&image.apply(&x[i]))));
                smax = smax.max(sp.sendnum());
            }

            // 2) counts
            let tag = tags::BORDER_COUNT.offset(iswap);
            let peers: Vec<usize> = swap.recv_others().iter().map(|r| r.proc).collect();
            let mut pending: Vec<_> = peers
                .iter()
                .map(|&p| Some(comm.irecv(p, tag, COUNT_BYTES)))
                .collect();
            let sends: Vec<_> = swap
                .send_others()
                .iter()
                .map(|sp| {
                    let count = [WireCount::new(sp.sendnum())];
                    comm.isend(sp.proc, tag, cast_slice(&count))
                })
                .collect();
            let mut recvnum = vec![0; peers.len()];
            let result = drain_recvs(&mut pending, &peers, |slot, data| {
                recvnum[slot] = decode_count(&data, peers[slot])?;
                Ok(())
            });
            finish_sends(sends);
            result?;
            for (rp, n) in swap.recv.iter_mut().zip(recvnum) {
                rp.recvnum = n;
            }
            if swap.sendself {
                let n = swap.send.last().map_or(0, |sp| sp.sendnum());
                if let Some(rp) = swap.recv.last_mut() {
                    rp.recvnum = n;
                }
            }

            // 3) offsets into the flat buffers and the ghost range
            let mut offset = 0;
            for sp in &mut swap.send {
                sp.size_reverse_recv = sp.sendnum() * size_reverse;
                sp.reverse_recv_offset = offset;
                offset += sp.sendnum();
            }
            let first = avec.nlocal() + avec.nghost();
            let mut offset = 0;
            for rp in &mut swap.recv {
                rp.size_forward_recv = rp.recvnum * size_forward;
                rp.size_reverse_send = rp.recvnum * size_reverse;
                rp.firstrecv = first + offset;
                rp.forward_recv_offset = offset;
                offset += rp.recvnum;
            }
            let nrecv = offset;
            rmax = rmax.max(nrecv);
            buffers.reserve_send(smax * size_border);
            buffers.reserve_recv(rmax * size_border);

            // 4) border records into the new ghost slots
            avec.set_nghost(avec.nghost() + nrecv);
            let mut payload = AtomPayload {
                avec: &mut *avec,
                kind,
                width: size_border,
            };
            forward_swap(
                comm,
                plan.swap(iswap),
                buffers,
                &mut payload,
                size_border,
                tags::BORDER.offset(iswap),
            )?;
            trace!(
                "rank {me} borders swap {iswap}: sent {} atoms, received {nrecv}",
                plan.swap(iswap).send.iter().map(|sp| sp.sendnum()).sum::<usize>()
            );
        }

        // forward and reverse comm must never have to grow the buffers
        buffers.reserve_send((maxforward * smax).max(maxreverse * rmax));
        buffers.reserve_recv((maxforward * rmax).max(maxreverse * smax));
        plan.debug_assert_invariants();
        Ok(())
    }

    /// Forward comm of a collaborator payload; `size` overrides the hook's
    /// own per-atom width.
    pub fn forward_comm_hook<H: CommHook + ?Sized>(
        &mut self,
        hook: &mut H,
        size: Option<usize>,
    ) -> Result<(), CommError> {
        let width = size.unwrap_or_else(|| hook.comm_forward());
        let Self {
            comm,
            plan,
            buffers,
            ..
        } = self;
        trace!("rank {} forward comm of {:?} hook, width {width}", comm.rank(), hook.kind());
        for iswap in 0..plan.nswap() {
            let tag = tags::HOOK_FORWARD.offset(iswap);
            forward_swap(comm, plan.swap(iswap), buffers, hook, width, tag)?;
        }
        Ok(())
    }

    /// Reverse comm of a collaborator payload.
    pub fn reverse_comm_hook<H: CommHook + ?Sized>(
        &mut self,
        hook: &mut H,
        size: Option<usize>,
    ) -> Result<(), CommError> {
        let width = size.unwrap_or_else(|| hook.comm_reverse());
        let Self {
            comm,
            plan,
            buffers,
            ..
        } = self;
        trace!("rank {} reverse comm of {:?} hook, width {width}", comm.rank(), hook.kind());
        for iswap in (0..plan.nswap()).rev() {
            let tag = tags::HOOK_REVERSE.offset(iswap);
            reverse_swap(comm, plan.swap(iswap), buffers, hook, width, tag)?;
        }
        Ok(())
    }

    /// Forward comm of a row-major per-atom array with `width` columns.
    pub fn forward_comm_array(&mut self, width: usize, data: &mut [f64]) -> Result<(), CommError> {
        if width == 0 || data.len() % width != 0 {
            return Err(CommError::InvalidConfig(format!(
                "per-atom array of {} values is not a whole number of rows of width {width}",
                data.len()
            )));
        }
        let mut array = PerAtomArray::new(width, data);
        self.forward_comm_hook(&mut array, Some(width))
    }

    /// Sum owned atoms over all ranks and compare against `expected`.
    pub fn check_atom_count(&self, nlocal: usize, expected: u64) -> Result<u64, CommError> {
        let found = all_reduce_sum_u64(&self.comm, nlocal as u64)?;
        if found != expected {
            warn!("lost atoms: expected {expected}, found {found}");
            return Err(CommError::AtomCountMismatch { expected, found });
        }
        Ok(found)
    }

    /// Bytes held by buffers and the swap schedule.
    pub fn memory_usage(&self) -> usize {
        self.buffers.memory_usage() + self.plan.memory_usage()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn strategy(&self) -> &OverlapStrategy {
        &self.strategy
    }

    pub fn plan(&self) -> &SwapPlan {
        &self.plan
    }

    pub fn buffers(&self) -> &CommBuffers {
        &self.buffers
    }

    /// Domain seen by the last `setup`.
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    pub fn size_forward(&self) -> usize {
        self.size_forward
    }

    pub fn size_border(&self) -> usize {
        self.size_border
    }

    pub fn maxforward(&self) -> usize {
        self.maxforward
    }

    pub fn maxreverse(&self) -> usize {
        self.maxreverse
    }
}

/// Wait for every posted receive and hand each message to `on_recv` in
/// arrival order. All handles are drained even after the first error.
fn drain_recvs<H: Wait>(
    pending: &mut [Option<H>],
    peers: &[usize],
    mut on_recv: impl FnMut(usize, Vec<u8>) -> Result<(), CommError>,
) -> Result<(), CommError> {
    let mut maybe_err = None;
    while let Some((slot, data)) = wait_any(pending) {
        if maybe_err.is_some() {
            continue;
        }
        let res = match data {
            Some(data) => on_recv(slot, data),
            None => Err(CommError::transport(
                peers[slot],
                "receive completed without data",
            )),
        };
        if let Err(e) = res {
            maybe_err = Some(e);
        }
    }
    maybe_err.map_or(Ok(()), Err)
}

fn finish_sends<H: Wait>(sends: Vec<H>) {
    for send in sends {
        let _ = send.wait();
    }
}

/// One forward swap of positions, received straight into the ghost slots.
fn forward_swap_x<C, A>(
    comm: &C,
    swap: &Swap,
    buffers: &mut CommBuffers,
    avec: &mut A,
    tag: u16,
) -> Result<(), CommError>
where
    C: Communicator,
    A: AtomVec + ?Sized,
{
    let recvs = swap.recv_others();
    let peers: Vec<usize> = recvs.iter().map(|r| r.proc).collect();
    let mut pending: Vec<_> = recvs
        .iter()
        .map(|r| Some(comm.irecv(r.proc, tag, 3 * r.recvnum * F64_BYTES)))
        .collect();

    buffers.reserve_send(3 * swap.max_sendnum());
    let mut sends = Vec::with_capacity(swap.send.len());
    for sp in swap.send_others() {
        let n = avec.pack_comm(&sp.sendlist, buffers.send_mut(), &sp.image);
        sends.push(comm.isend(sp.proc, tag, cast_slice(&buffers.send()[..n])));
    }

    if let (Some(sp), Some(rp)) = (swap.send_self(), swap.recv_self()) {
        let n = avec.pack_comm(&sp.sendlist, buffers.send_mut(), &sp.image);
        let ghosts = &mut avec.x_mut()[rp.firstrecv..rp.firstrecv + rp.recvnum];
        bytemuck::cast_slice_mut::<[f64; 3], f64>(ghosts).copy_from_slice(&buffers.send()[..n]);
    }

    let result = drain_recvs(&mut pending, &peers, |slot, data| {
        let rp = &recvs[slot];
        let ghosts = &mut avec.x_mut()[rp.firstrecv..rp.firstrecv + rp.recvnum];
        copy_into_f64(bytemuck::cast_slice_mut(ghosts), &data, rp.proc)
    });
    finish_sends(sends);
    result
}

/// One forward swap of any payload `width` values per atom.
fn forward_swap<C, H>(
    comm: &C,
    swap: &Swap,
    buffers: &mut CommBuffers,
    hook: &mut H,
    width: usize,
    tag: u16,
) -> Result<(), CommError>
where
    C: Communicator,
    H: CommHook + ?Sized,
{
    let recvs = swap.recv_others();
    let peers: Vec<usize> = recvs.iter().map(|r| r.proc).collect();
    buffers.reserve_recv(width * recvs.iter().map(|r| r.recvnum).sum::<usize>());
    buffers.reserve_send(width * swap.max_sendnum());

    // 1) post receives
    let mut pending: Vec<_> = recvs
        .iter()
        .map(|r| Some(comm.irecv(r.proc, tag, width * r.recvnum * F64_BYTES)))
        .collect();

    // 2) send to other ranks
    let mut sends = Vec::with_capacity(swap.send.len());
    for sp in swap.send_others() {
        let n = hook.pack_forward_comm(&sp.sendlist, buffers.send_mut(), &sp.image);
        sends.push(comm.isend(sp.proc, tag, cast_slice(&buffers.send()[..n])));
    }

    // 3) local copy
    if let (Some(sp), Some(rp)) = (swap.send_self(), swap.recv_self()) {
        let n = hook.pack_forward_comm(&sp.sendlist, buffers.send_mut(), &sp.image);
        hook.unpack_forward_comm(rp.recvnum, rp.firstrecv, &buffers.send()[..n]);
    }

    // 4) unpack in arrival order
    let result = drain_recvs(&mut pending, &peers, |slot, data| {
        let rp = &recvs[slot];
        let off = width * rp.forward_recv_offset;
        let dst = &mut buffers.recv_mut()[off..off + width * rp.recvnum];
        copy_into_f64(dst, &data, rp.proc)?;
        hook.unpack_forward_comm(rp.recvnum, rp.firstrecv, dst);
        Ok(())
    });
    finish_sends(sends);
    result
}

/// Post receives for the values coming back from every rank I sent to.
fn post_reverse_recvs<C: Communicator>(
    comm: &C,
    swap: &Swap,
    buffers: &mut CommBuffers,
    width: usize,
    tag: u16,
) -> (Vec<usize>, Vec<Option<C::RecvHandle>>) {
    let owners = swap.send_others();
    buffers.reserve_recv(width * owners.iter().map(|sp| sp.sendnum()).sum::<usize>());
    let peers = owners.iter().map(|sp| sp.proc).collect();
    let pending = owners
        .iter()
        .map(|sp| Some(comm.irecv(sp.proc, tag, width * sp.sendnum() * F64_BYTES)))
        .collect();
    (peers, pending)
}

/// One reverse swap of forces, sent straight from the ghost slots.
fn reverse_swap_f<C, A>(
    comm: &C,
    swap: &Swap,
    buffers: &mut CommBuffers,
    avec: &mut A,
    tag: u16,
) -> Result<(), CommError>
where
    C: Communicator,
    A: AtomVec + ?Sized,
{
    let (peers, mut pending) = post_reverse_recvs(comm, swap, buffers, 3, tag);

    let mut sends = Vec::with_capacity(swap.recv.len());
    for rp in swap.recv_others() {
        let ghosts = &avec.f()[rp.firstrecv..rp.firstrecv + rp.recvnum];
        sends.push(comm.isend(rp.proc, tag, cast_slice(ghosts)));
    }

    if let (Some(sp), Some(rp)) = (swap.send_self(), swap.recv_self()) {
        buffers.reserve_send(3 * rp.recvnum);
        let n = avec.pack_reverse(rp.recvnum, rp.firstrecv, buffers.send_mut());
        avec.unpack_reverse(&sp.sendlist, &buffers.send()[..n]);
    }

    let owners = swap.send_others();
    let result = drain_recvs(&mut pending, &peers, |slot, data| {
        let sp = &owners[slot];
        let off = 3 * sp.reverse_recv_offset;
        let dst = &mut buffers.recv_mut()[off..off + 3 * sp.sendnum()];
        copy_into_f64(dst, &data, sp.proc)?;
        avec.unpack_reverse(&sp.sendlist, dst);
        Ok(())
    });
    finish_sends(sends);
    result
}

/// One reverse swap of any payload `width` values per atom.
fn reverse_swap<C, H>(
    comm: &C,
    swap: &Swap,
    buffers: &mut CommBuffers,
    hook: &mut H,
    width: usize,
    tag: u16,
) -> Result<(), CommError>
where
    C: Communicator,
    H: CommHook + ?Sized,
{
    let (peers, mut pending) = post_reverse_recvs(comm, swap, buffers, width, tag);
    buffers.reserve_send(width * swap.recv.iter().map(|r| r.recvnum).max().unwrap_or(0));

    let mut sends = Vec::with_capacity(swap.recv.len());
    for rp in swap.recv_others() {
        let n = hook.pack_reverse_comm(rp.recvnum, rp.firstrecv, buffers.send_mut());
        sends.push(comm.isend(rp.proc, tag, cast_slice(&buffers.send()[..n])));
    }

    if let (Some(sp), Some(rp)) = (swap.send_self(), swap.recv_self()) {
        let n = hook.pack_reverse_comm(rp.recvnum, rp.firstrecv, buffers.send_mut());
        hook.unpack_reverse_comm(&sp.sendlist, &buffers.send()[..n]);
    }

    let owners = swap.send_others();
    let result = drain_recvs(&mut pending, &peers, |slot, data| {
        let sp = &owners[slot];
        let off = width * sp.reverse_recv_offset;
        let dst = &mut buffers.recv_mut()[off..off + width * sp.sendnum()];
        copy_into_f64(dst, &data, sp.proc)?;
        hook.unpack_reverse_comm(&sp.sendlist, dst);
        Ok(())
    });
    finish_sends(sends);
    result
}
